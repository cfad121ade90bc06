//! Delivery-path use cases and the runner that sequences them.
//!
//! Every use case runs one delivery path twice: first as the bootstrap
//! administrator, then as a freshly created principal in its own tenant.

mod history;
mod provision;
mod push;
mod runner;

use std::{fmt, num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use platform_http_client::{AccessToken, NewUser};
use rand::Rng as _;
use tracing::{debug, info};

pub use self::{
    history::PublishingHistory,
    push::PublishingPushChannel,
    runner::{RunReport, ScenarioOutcome, ScenarioRunner},
};
use crate::{
    diff::PayloadMismatch,
    retry::RetryPolicy,
    services::{
        ChannelTokenIssuer, CredentialExchange, DynError, HistoryStore, Publisher,
        ResourceProvisioning,
    },
    session::{Principal, PrincipalSession},
    stream::StreamTransport,
};

const NEW_USER_NAME: &str = "User Mqtt Publishing Test";
const NEW_USER_PROFILE: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Login,
    CreatePrincipal,
    CreateSchema,
    CreateResource,
    ArmVerification,
    Publish,
    AwaitVerification,
    ValidatePayload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Login => "login",
            Self::CreatePrincipal => "create principal",
            Self::CreateSchema => "create template",
            Self::CreateResource => "create device",
            Self::ArmVerification => "arm verification",
            Self::Publish => "publish",
            Self::AwaitVerification => "await delivery",
            Self::ValidatePayload => "validate payload",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error("authentication failed: {0}")]
    Auth(#[source] DynError),
    #[error("provisioning failed: {0}")]
    Provisioning(#[source] DynError),
    #[error("delivery was not confirmed: {0}")]
    VerificationTimeout(#[source] DynError),
    #[error(transparent)]
    PayloadMismatch(#[from] PayloadMismatch),
    #[error("transport failure: {0}")]
    Transport(#[source] DynError),
}

impl StepFailure {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AuthError",
            Self::Provisioning(_) => "ProvisioningError",
            Self::VerificationTimeout(_) => "VerificationTimeout",
            Self::PayloadMismatch(_) => "PayloadMismatch",
            Self::Transport(_) => "TransportError",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{scenario} failed for `{principal}` at step `{step}`: {failure}")]
pub struct ScenarioError {
    pub scenario: String,
    pub principal: String,
    pub step: Step,
    #[source]
    pub failure: StepFailure,
}

pub type ScenarioResult = Result<(), ScenarioError>;

/// A failure inside one principal's pass, before it is attributed to a
/// scenario.
#[derive(Debug)]
pub(crate) struct StepError {
    step: Step,
    failure: StepFailure,
}

impl StepError {
    pub(crate) const fn new(step: Step, failure: StepFailure) -> Self {
        Self { step, failure }
    }

    fn attribute(self, scenario: &str, principal: &Principal) -> ScenarioError {
        ScenarioError {
            scenario: scenario.to_owned(),
            principal: principal.username.clone(),
            step: self.step,
            failure: self.failure,
        }
    }
}

#[async_trait]
pub trait UseCase: Send + Sync {
    fn name(&self) -> &str;

    async fn run_test(&self) -> ScenarioResult;
}

/// External services the use cases drive.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialExchange>,
    pub provisioning: Arc<dyn ResourceProvisioning>,
    pub history: Arc<dyn HistoryStore>,
    pub channel_tokens: Arc<dyn ChannelTokenIssuer>,
    pub publisher: Arc<dyn Publisher>,
    pub stream_transport: Arc<dyn StreamTransport>,
}

#[derive(Clone, Debug)]
pub struct ScenarioSettings {
    pub admin: Principal,
    pub new_user_password: String,
    pub history_retry: RetryPolicy,
    pub push_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            admin: Principal::new("admin", "admin", "admin"),
            new_user_password: "temppwd".to_owned(),
            history_retry: RetryPolicy::new(
                NonZeroU32::new(4).unwrap_or(NonZeroU32::MIN),
                Duration::from_millis(3000),
            ),
            push_timeout: Duration::from_millis(5000),
            reconnect_interval: Duration::from_millis(10),
        }
    }
}

/// Everything a use case needs for one run. The token cache is shared by all
/// use cases built from the same context.
pub struct ScenarioContext {
    pub collaborators: Collaborators,
    pub settings: ScenarioSettings,
    pub session: PrincipalSession,
}

impl ScenarioContext {
    #[must_use]
    pub fn new(collaborators: Collaborators, settings: ScenarioSettings) -> Arc<Self> {
        let session = PrincipalSession::new(Arc::clone(&collaborators.credentials));
        Arc::new(Self {
            collaborators,
            settings,
            session,
        })
    }
}

/// One delivery-path check for a logged-in principal.
#[async_trait]
pub(crate) trait DeliveryPass: Send + Sync {
    async fn run(&self, principal: &Principal, token: &AccessToken) -> Result<(), StepError>;
}

pub(crate) async fn run_for_admin_and_new_principal<P>(
    scenario: &str,
    context: &ScenarioContext,
    pass: &P,
) -> ScenarioResult
where
    P: DeliveryPass + ?Sized,
{
    let admin = &context.settings.admin;
    debug!(scenario, "running test for admin");
    let admin_token = login(context, admin)
        .await
        .map_err(|error| error.attribute(scenario, admin))?;
    pass.run(admin, &admin_token)
        .await
        .map_err(|error| error.attribute(scenario, admin))?;
    debug!(scenario, "successfully ran test for admin");

    let principal = create_principal(context, &admin_token)
        .await
        .map_err(|error| error.attribute(scenario, admin))?;
    let token = login(context, &principal)
        .await
        .map_err(|error| error.attribute(scenario, &principal))?;
    debug!(scenario, username = %principal.username, "running test for new principal");
    pass.run(&principal, &token)
        .await
        .map_err(|error| error.attribute(scenario, &principal))?;
    debug!(scenario, username = %principal.username, "successfully ran test for new principal");
    Ok(())
}

async fn login(context: &ScenarioContext, principal: &Principal) -> Result<AccessToken, StepError> {
    context
        .session
        .token(principal)
        .await
        .map_err(|error| StepError::new(Step::Login, StepFailure::Auth(error)))
}

async fn create_principal(
    context: &ScenarioContext,
    admin_token: &AccessToken,
) -> Result<Principal, StepError> {
    let (user_suffix, tenant_suffix) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(0..10_000), rng.gen_range(0..10_000))
    };
    let principal = Principal::new(
        format!("user_{user_suffix}"),
        format!("ten_{tenant_suffix}"),
        context.settings.new_user_password.clone(),
    );
    let descriptor = NewUser {
        username: principal.username.clone(),
        service: principal.tenant.clone(),
        email: format!("{}@test.com", principal.username),
        name: NEW_USER_NAME.to_owned(),
        profile: NEW_USER_PROFILE.to_owned(),
    };

    info!(username = %principal.username, tenant = %principal.tenant, "creating new user");
    let user_id = context
        .collaborators
        .credentials
        .create_principal(&descriptor, admin_token)
        .await
        .map_err(|error| StepError::new(Step::CreatePrincipal, StepFailure::Auth(error)))?;
    debug!(username = %principal.username, %user_id, "new user was created");
    Ok(principal)
}

pub(crate) fn attrs_topic(principal: &Principal, device_id: &str) -> String {
    format!("/{}/{device_id}/attrs", principal.tenant)
}
