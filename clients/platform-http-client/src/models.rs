use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type UserId = String;
pub type TemplateId = String;
pub type DeviceId = String;

/// Bearer token issued by the auth service.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.0))
    }
}

/// One-time token accepted by the data broker's push channel.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ChannelToken(String);

impl ChannelToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChannelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.0))
    }
}

fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…")
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub passwd: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub jwt: AccessToken,
}

/// User registration payload understood by the auth service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub service: String,
    pub email: String,
    pub name: String,
    pub profile: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CreatedUser {
    pub user: CreatedUserBody,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CreatedUserBody {
    #[serde(deserialize_with = "id_as_string")]
    pub id: UserId,
}

/// The auth service answers user creation with either a bare object or a
/// single-element array wrapping it.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CreateUserResponse {
    One(CreatedUser),
    Many(Vec<CreatedUser>),
}

impl CreateUserResponse {
    pub(crate) fn into_user_id(self) -> Option<UserId> {
        match self {
            Self::One(created) => Some(created.user.id),
            Self::Many(created) => created.into_iter().next().map(|created| created.user.id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateAttr {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value_type: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_id_as_string"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
}

impl TemplateAttr {
    #[must_use]
    pub fn dynamic(label: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: "dynamic".to_owned(),
            value_type: value_type.into(),
            id: None,
            static_value: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub label: String,
    pub attrs: Vec<TemplateAttr>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_id_as_string"
    )]
    pub id: Option<TemplateId>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CreateTemplateResponse {
    pub template: Template,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub label: String,
    pub templates: Vec<TemplateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_id_as_string"
    )]
    pub id: Option<DeviceId>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CreateDeviceResponse {
    pub devices: Vec<Device>,
}

/// Filter applied to a device history lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryQuery {
    pub attr: String,
    #[serde(rename = "lastN")]
    pub last_n: u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HistoryRecord {
    pub attr: String,
    pub value: Value,
    pub device_id: DeviceId,
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ChannelTokenResponse {
    pub token: ChannelToken,
}

// Template identifiers come back as integers while device identifiers are hex
// strings; both are handled as opaque strings.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected identifier {other}"
        ))),
    }
}

fn opt_id_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected identifier {other}"
        ))),
    }
}
