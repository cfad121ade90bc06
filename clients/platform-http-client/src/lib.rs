pub mod models;
pub mod paths;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

pub use crate::models::{
    AccessToken, ChannelToken, Device, DeviceId, HistoryQuery, HistoryRecord, NewUser, Template,
    TemplateAttr, TemplateId, UserId,
};
use crate::models::{
    ChannelTokenResponse, CreateDeviceResponse, CreateTemplateResponse, CreateUserResponse,
    LoginRequest, LoginResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to reach {url}: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("response from {url} is missing {what}")]
    MissingField { url: Url, what: &'static str },
    #[error("invalid endpoint {base}{path}: {source}")]
    Endpoint {
        base: Url,
        path: String,
        #[source]
        source: url::ParseError,
    },
}

impl Error {
    /// Status code returned by the service, if the request got that far.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Base URLs of every REST service the verifier talks to.
#[derive(Clone, Debug)]
pub struct ServiceEndpoints {
    pub auth: Url,
    pub device_manager: Url,
    pub history: Url,
    pub data_broker: Url,
}

#[derive(Clone)]
pub struct PlatformHttpClient {
    client: Client,
    endpoints: ServiceEndpoints,
}

impl PlatformHttpClient {
    #[must_use]
    pub fn new(endpoints: ServiceEndpoints) -> Self {
        Self::new_with_client(Client::new(), endpoints)
    }

    pub fn with_timeout(endpoints: ServiceEndpoints, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new_with_client(client, endpoints))
    }

    #[must_use]
    pub const fn new_with_client(client: Client, endpoints: ServiceEndpoints) -> Self {
        Self { client, endpoints }
    }

    #[must_use]
    pub const fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    /// Exchanges a username/password pair for an access token.
    pub async fn login(&self, username: &str, password: &str) -> Result<AccessToken, Error> {
        let url = self.endpoints.auth.clone();
        debug!(%url, username, "sending token request");
        let body = LoginRequest {
            username,
            passwd: password,
        };
        let response: LoginResponse =
            send_json(&url, self.client.post(url.clone()).json(&body)).await?;
        Ok(response.jwt)
    }

    /// Registers a new user. Requires an administrator token.
    pub async fn create_user(
        &self,
        user: &NewUser,
        admin_token: &AccessToken,
    ) -> Result<UserId, Error> {
        let url = join(&self.endpoints.auth, paths::AUTH_USER)?;
        debug!(%url, username = %user.username, "sending user creation request");
        let request = self
            .client
            .post(url.clone())
            .bearer_auth(admin_token.as_str())
            .json(user);
        let response: CreateUserResponse = send_json(&url, request).await?;
        response.into_user_id().ok_or(Error::MissingField {
            url,
            what: "user id",
        })
    }

    pub async fn create_template(
        &self,
        template: &Template,
        token: &AccessToken,
    ) -> Result<Template, Error> {
        let url = join(&self.endpoints.device_manager, paths::DEVICE_MANAGER_TEMPLATE)?;
        debug!(%url, label = %template.label, "sending template creation request");
        let request = self
            .client
            .post(url.clone())
            .bearer_auth(token.as_str())
            .json(template);
        let response: CreateTemplateResponse = send_json(&url, request).await?;
        Ok(response.template)
    }

    pub async fn create_device(
        &self,
        device: &Device,
        token: &AccessToken,
    ) -> Result<Device, Error> {
        let url = join(&self.endpoints.device_manager, paths::DEVICE_MANAGER_DEVICE)?;
        debug!(%url, label = %device.label, "sending device creation request");
        let request = self
            .client
            .post(url.clone())
            .bearer_auth(token.as_str())
            .json(device);
        let response: CreateDeviceResponse = send_json(&url, request).await?;
        response
            .devices
            .into_iter()
            .next()
            .ok_or(Error::MissingField {
                url,
                what: "created device",
            })
    }

    /// Reads the persisted values of one device attribute.
    pub async fn history(
        &self,
        device_id: &str,
        query: &HistoryQuery,
        token: &AccessToken,
    ) -> Result<Vec<HistoryRecord>, Error> {
        let path = paths::history_of(device_id);
        let url = join(&self.endpoints.history, &path)?;
        debug!(%url, attr = %query.attr, "sending historical data request");
        let request = self
            .client
            .get(url.clone())
            .bearer_auth(token.as_str())
            .query(query);
        send_json(&url, request).await
    }

    /// Requests a one-time token for the data broker push channel.
    pub async fn channel_token(&self, token: &AccessToken) -> Result<ChannelToken, Error> {
        let url = join(&self.endpoints.data_broker, paths::DATA_BROKER_SOCKETIO)?;
        debug!(%url, "retrieving push channel token");
        let request = self.client.get(url.clone()).bearer_auth(token.as_str());
        let response: ChannelTokenResponse = send_json(&url, request).await?;
        Ok(response.token)
    }
}

fn join(base: &Url, path: &str) -> Result<Url, Error> {
    let joined = format!("{}{path}", base.as_str().trim_end_matches('/'));
    Url::parse(&joined).map_err(|source| Error::Endpoint {
        base: base.clone(),
        path: path.to_owned(),
        source,
    })
}

async fn send_json<T>(url: &Url, request: RequestBuilder) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let response = request.send().await.map_err(|source| Error::Request {
        url: url.clone(),
        source,
    })?;
    let response = check_status(url, response).await?;
    response.json().await.map_err(|source| Error::Decode {
        url: url.clone(),
        source,
    })
}

async fn check_status(url: &Url, response: Response) -> Result<Response, Error> {
    let status = response.status();
    debug!(%url, %status, "processing results");
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Status {
        url: url.clone(),
        status,
        body,
    })
}
