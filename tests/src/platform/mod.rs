//! In-memory stand-in for the IoT platform.
//!
//! Auth, device manager, history, data broker and the MQTT agent share one
//! state, so a publish shows up in history and on push channels the way it
//! does on a real deployment.

mod broker;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use platform_http_client::{
    AccessToken, ChannelToken, Device, DeviceId, HistoryQuery, HistoryRecord, NewUser, Template,
    UserId,
};
use serde_json::Value;
use verifier_core::{
    ChannelTokenIssuer, Collaborators, CredentialExchange, DynError, HistoryStore,
    ResourceProvisioning,
};

use self::broker::Subscriber;

pub const ADMIN: &str = "admin";

#[derive(Debug, thiserror::Error)]
pub enum FakeError {
    #[error("401 Unauthorized: invalid credentials for `{0}`")]
    InvalidCredentials(String),
    #[error("401 Unauthorized: unknown token")]
    UnknownToken,
    #[error("403 Forbidden: `{0}` may not create users")]
    Forbidden(String),
    #[error("400 Bad Request: user `{0}` already exists")]
    UserExists(String),
    #[error("no route for topic `{0}`")]
    Topic(String),
}

/// Knobs that make the fake platform misbehave.
#[derive(Clone, Debug)]
pub struct Behaviour {
    /// Template creation succeeds without assigning an identifier.
    pub omit_template_id: bool,
    pub omit_device_id: bool,
    /// History queries answered with no records before published values
    /// become visible.
    pub hidden_history_queries: usize,
    /// Applied to every history record as it is stored.
    pub history_rewrite: Option<fn(&mut HistoryRecord)>,
    /// Time between a publish and its delivery on push channels.
    pub push_latency: Duration,
    /// Time a publish call takes to return after the message was accepted.
    pub publish_ack_delay: Duration,
    pub push_disabled: bool,
    pub push_rewrite: Option<fn(&mut Value)>,
    /// Push channel connections refused before one is accepted.
    pub refused_connections: usize,
    /// Accepted push channel connections that drop right after opening.
    pub dropped_connections: usize,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            omit_template_id: false,
            omit_device_id: false,
            hidden_history_queries: 0,
            history_rewrite: None,
            push_latency: Duration::from_millis(50),
            publish_ack_delay: Duration::ZERO,
            push_disabled: false,
            push_rewrite: None,
            refused_connections: 0,
            dropped_connections: 0,
        }
    }
}

struct Account {
    password: String,
    tenant: String,
}

struct State {
    behaviour: Behaviour,
    accounts: HashMap<String, Account>,
    sessions: HashMap<AccessToken, String>,
    channel_tokens: HashMap<String, String>,
    devices: HashMap<DeviceId, String>,
    history: HashMap<DeviceId, Vec<HistoryRecord>>,
    subscribers: Vec<Subscriber>,
    published: Vec<(String, Value)>,
    next_id: u64,
    logins: usize,
    history_queries: usize,
    opened_connections: usize,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn username(&self, token: &AccessToken) -> Result<&str, FakeError> {
        self.sessions
            .get(token)
            .map(String::as_str)
            .ok_or(FakeError::UnknownToken)
    }

    fn tenant(&self, token: &AccessToken) -> Result<String, FakeError> {
        let username = self.username(token)?;
        self.accounts
            .get(username)
            .map(|account| account.tenant.clone())
            .ok_or(FakeError::UnknownToken)
    }
}

#[derive(Clone)]
pub struct FakePlatform {
    state: Arc<Mutex<State>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::with_behaviour(Behaviour::default())
    }
}

impl FakePlatform {
    /// A platform holding only the bootstrap `admin`/`admin` account.
    #[must_use]
    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        let accounts = HashMap::from([(
            ADMIN.to_owned(),
            Account {
                password: ADMIN.to_owned(),
                tenant: ADMIN.to_owned(),
            },
        )]);
        Self {
            state: Arc::new(Mutex::new(State {
                behaviour,
                accounts,
                sessions: HashMap::new(),
                channel_tokens: HashMap::new(),
                devices: HashMap::new(),
                history: HashMap::new(),
                subscribers: Vec::new(),
                published: Vec::new(),
                next_id: 0,
                logins: 0,
                history_queries: 0,
                opened_connections: 0,
            })),
        }
    }

    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            credentials: Arc::new(self.clone()),
            provisioning: Arc::new(self.clone()),
            history: Arc::new(self.clone()),
            channel_tokens: Arc::new(self.clone()),
            publisher: Arc::new(self.clone()),
            stream_transport: Arc::new(self.clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Successful and rejected logins alike.
    #[must_use]
    pub fn login_count(&self) -> usize {
        self.lock().logins
    }

    #[must_use]
    pub fn history_query_count(&self) -> usize {
        self.lock().history_queries
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().opened_connections
    }

    /// Every `(topic, payload)` pair received over MQTT, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Value)> {
        self.lock().published.clone()
    }

    /// Tenants of the accounts other than the bootstrap one.
    #[must_use]
    pub fn created_tenants(&self) -> Vec<String> {
        let mut tenants: Vec<_> = self
            .lock()
            .accounts
            .iter()
            .filter(|(username, _)| *username != ADMIN)
            .map(|(_, account)| account.tenant.clone())
            .collect();
        tenants.sort();
        tenants
    }
}

#[async_trait]
impl CredentialExchange for FakePlatform {
    async fn login(&self, username: &str, password: &str) -> Result<AccessToken, DynError> {
        let mut state = self.lock();
        state.logins += 1;
        let valid = state
            .accounts
            .get(username)
            .is_some_and(|account| account.password == password);
        if !valid {
            return Err(FakeError::InvalidCredentials(username.to_owned()).into());
        }
        let token = AccessToken::new(format!("jwt-{username}-{}", state.next_id()));
        state.sessions.insert(token.clone(), username.to_owned());
        Ok(token)
    }

    async fn create_principal(
        &self,
        descriptor: &NewUser,
        admin_token: &AccessToken,
    ) -> Result<UserId, DynError> {
        let mut state = self.lock();
        let caller = state.username(admin_token)?;
        if caller != ADMIN {
            return Err(FakeError::Forbidden(caller.to_owned()).into());
        }
        if state.accounts.contains_key(&descriptor.username) {
            return Err(FakeError::UserExists(descriptor.username.clone()).into());
        }
        state.accounts.insert(
            descriptor.username.clone(),
            Account {
                // Every user created through the auth service starts with
                // the platform-wide default password.
                password: "temppwd".to_owned(),
                tenant: descriptor.service.clone(),
            },
        );
        Ok(state.next_id().to_string())
    }
}

#[async_trait]
impl ResourceProvisioning for FakePlatform {
    async fn create_schema(
        &self,
        schema: &Template,
        token: &AccessToken,
    ) -> Result<Template, DynError> {
        let mut state = self.lock();
        state.tenant(token)?;
        let id = state.next_id();
        Ok(Template {
            id: (!state.behaviour.omit_template_id).then(|| id.to_string()),
            ..schema.clone()
        })
    }

    async fn create_resource(
        &self,
        resource: &Device,
        token: &AccessToken,
    ) -> Result<Device, DynError> {
        let mut state = self.lock();
        let tenant = state.tenant(token)?;
        let id = format!("{:04x}", 0xd000 + state.next_id());
        state.devices.insert(id.clone(), tenant);
        Ok(Device {
            id: (!state.behaviour.omit_device_id).then_some(id),
            ..resource.clone()
        })
    }
}

#[async_trait]
impl HistoryStore for FakePlatform {
    async fn query(
        &self,
        resource_id: &str,
        filter: &HistoryQuery,
        token: &AccessToken,
    ) -> Result<Vec<HistoryRecord>, DynError> {
        let mut state = self.lock();
        let tenant = state.tenant(token)?;
        state.history_queries += 1;
        if state.behaviour.hidden_history_queries > 0 {
            state.behaviour.hidden_history_queries -= 1;
            return Ok(Vec::new());
        }
        if state.devices.get(resource_id) != Some(&tenant) {
            return Ok(Vec::new());
        }
        let last_n = usize::try_from(filter.last_n).unwrap_or(usize::MAX);
        Ok(state
            .history
            .get(resource_id)
            .map(|records| {
                records
                    .iter()
                    .rev()
                    .filter(|record| record.attr == filter.attr)
                    .take(last_n)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChannelTokenIssuer for FakePlatform {
    async fn channel_token(&self, token: &AccessToken) -> Result<ChannelToken, DynError> {
        let mut state = self.lock();
        let tenant = state.tenant(token)?;
        let channel_token = format!("chan-{}", state.next_id());
        state.channel_tokens.insert(channel_token.clone(), tenant);
        Ok(ChannelToken::new(channel_token))
    }
}
