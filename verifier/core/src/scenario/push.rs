use std::sync::Arc;

use async_trait::async_trait;
use platform_http_client::AccessToken;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{
    attrs_topic, provision, run_for_admin_and_new_principal, DeliveryPass, ScenarioContext,
    ScenarioResult, Step, StepError, StepFailure, UseCase,
};
use crate::{
    diff::{MatchExpectation, Object},
    race::{EventRace, RaceError},
    session::Principal,
    stream::ReconnectingStreamClient,
};

const NAME: &str = "MQTT - socket io use case";
const PUBLISHED_VALUE: &str = "this is a test";
/// Server-assigned and different on every delivery.
const VOLATILE_KEY: &str = "timestamp";

/// Publishes one attribute update over MQTT and waits for the data broker to
/// push it to a subscribed websocket client.
pub struct PublishingPushChannel {
    context: Arc<ScenarioContext>,
}

impl PublishingPushChannel {
    #[must_use]
    pub const fn new(context: Arc<ScenarioContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl UseCase for PublishingPushChannel {
    fn name(&self) -> &str {
        NAME
    }

    async fn run_test(&self) -> ScenarioResult {
        run_for_admin_and_new_principal(NAME, &self.context, self).await
    }
}

#[async_trait]
impl DeliveryPass for PublishingPushChannel {
    async fn run(&self, principal: &Principal, token: &AccessToken) -> Result<(), StepError> {
        let collaborators = &self.context.collaborators;
        let settings = &self.context.settings;
        let device_id = provision::sample_device(collaborators.provisioning.as_ref(), token).await?;

        let channel_token = collaborators
            .channel_tokens
            .channel_token(token)
            .await
            .map_err(|error| StepError::new(Step::ArmVerification, StepFailure::Transport(error)))?;
        let client = Arc::new(ReconnectingStreamClient::new(
            Arc::clone(&collaborators.stream_transport),
            settings.reconnect_interval,
        ));
        client.connect(channel_token);

        let listener = Arc::clone(&client);
        let armed = EventRace::arm(settings.push_timeout, move |emit| {
            listener.on_message(move |payload: Value| {
                if !emit.emit(payload) {
                    debug!("verification already resolved, ignoring message");
                }
            });
            listener.start();
            move || listener.stop()
        });

        let topic = attrs_topic(principal, &device_id);
        info!(%topic, "publishing attribute update");
        if let Err(error) = collaborators
            .publisher
            .publish(&topic, &json!({ "attr": PUBLISHED_VALUE }))
            .await
        {
            drop(armed);
            return Err(StepError::new(Step::Publish, StepFailure::Transport(error)));
        }

        let outcome = armed.resolve().await;
        client.stop();
        let received = outcome.map_err(|error| {
            let failure = match error {
                RaceError::Timeout(_) => StepFailure::VerificationTimeout(Box::new(error)),
                RaceError::Abandoned => StepFailure::Transport(Box::new(error)),
            };
            StepError::new(Step::AwaitVerification, failure)
        })?;
        debug!(%received, "received push message");

        expectation(&device_id, &principal.tenant)
            .check(&received)
            .map_err(|mismatch| StepError::new(Step::ValidatePayload, mismatch.into()))
    }
}

fn expectation(device_id: &str, tenant: &str) -> MatchExpectation {
    let mut expected = Object::new();
    expected.insert("attrs".to_owned(), json!({ "attr": PUBLISHED_VALUE }));
    expected.insert(
        "metadata".to_owned(),
        json!({ "deviceid": device_id, "tenant": tenant }),
    );
    MatchExpectation::new(expected).ignoring([VOLATILE_KEY])
}
