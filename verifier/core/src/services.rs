//! Collaborator seams the scenarios are written against.
//!
//! The production implementations talk to the platform over HTTP and MQTT;
//! tests substitute in-memory fakes.

use async_trait::async_trait;
use platform_http_client::{
    AccessToken, ChannelToken, Device, HistoryQuery, HistoryRecord, NewUser, PlatformHttpClient,
    Template, UserId,
};
use serde_json::Value;

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<AccessToken, DynError>;

    async fn create_principal(
        &self,
        descriptor: &NewUser,
        admin_token: &AccessToken,
    ) -> Result<UserId, DynError>;
}

#[async_trait]
pub trait ResourceProvisioning: Send + Sync {
    async fn create_schema(
        &self,
        schema: &Template,
        token: &AccessToken,
    ) -> Result<Template, DynError>;

    async fn create_resource(
        &self,
        resource: &Device,
        token: &AccessToken,
    ) -> Result<Device, DynError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn query(
        &self,
        resource_id: &str,
        filter: &HistoryQuery,
        token: &AccessToken,
    ) -> Result<Vec<HistoryRecord>, DynError>;
}

#[async_trait]
pub trait ChannelTokenIssuer: Send + Sync {
    async fn channel_token(&self, token: &AccessToken) -> Result<ChannelToken, DynError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), DynError>;
}

#[async_trait]
impl CredentialExchange for PlatformHttpClient {
    async fn login(&self, username: &str, password: &str) -> Result<AccessToken, DynError> {
        Ok(Self::login(self, username, password).await?)
    }

    async fn create_principal(
        &self,
        descriptor: &NewUser,
        admin_token: &AccessToken,
    ) -> Result<UserId, DynError> {
        Ok(self.create_user(descriptor, admin_token).await?)
    }
}

#[async_trait]
impl ResourceProvisioning for PlatformHttpClient {
    async fn create_schema(
        &self,
        schema: &Template,
        token: &AccessToken,
    ) -> Result<Template, DynError> {
        Ok(self.create_template(schema, token).await?)
    }

    async fn create_resource(
        &self,
        resource: &Device,
        token: &AccessToken,
    ) -> Result<Device, DynError> {
        Ok(self.create_device(resource, token).await?)
    }
}

#[async_trait]
impl HistoryStore for PlatformHttpClient {
    async fn query(
        &self,
        resource_id: &str,
        filter: &HistoryQuery,
        token: &AccessToken,
    ) -> Result<Vec<HistoryRecord>, DynError> {
        Ok(self.history(resource_id, filter, token).await?)
    }
}

#[async_trait]
impl ChannelTokenIssuer for PlatformHttpClient {
    async fn channel_token(&self, token: &AccessToken) -> Result<ChannelToken, DynError> {
        Ok(Self::channel_token(self, token).await?)
    }
}
