use std::sync::Arc;

use async_trait::async_trait;
use platform_http_client::{AccessToken, HistoryQuery, HistoryRecord};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{
    attrs_topic, provision, run_for_admin_and_new_principal, DeliveryPass, ScenarioContext,
    ScenarioResult, Step, StepError, StepFailure, UseCase,
};
use crate::{
    diff::MatchExpectation,
    retry::retry,
    services::DynError,
    session::Principal,
};

const NAME: &str = "MQTT - history use case";
const PUBLISHED_VALUE: &str = "this is a test";
const LAST_N: u32 = 3;

#[derive(Debug, thiserror::Error)]
enum HistoryProbeError {
    #[error("could not retrieve historical data: {0}")]
    Query(#[source] DynError),
    #[error("history service returned no records yet")]
    Empty,
}

/// Publishes one attribute update over MQTT and polls the history service
/// until it is persisted.
pub struct PublishingHistory {
    context: Arc<ScenarioContext>,
}

impl PublishingHistory {
    #[must_use]
    pub const fn new(context: Arc<ScenarioContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl UseCase for PublishingHistory {
    fn name(&self) -> &str {
        NAME
    }

    async fn run_test(&self) -> ScenarioResult {
        run_for_admin_and_new_principal(NAME, &self.context, self).await
    }
}

#[async_trait]
impl DeliveryPass for PublishingHistory {
    async fn run(&self, principal: &Principal, token: &AccessToken) -> Result<(), StepError> {
        let collaborators = &self.context.collaborators;
        let device_id = provision::sample_device(collaborators.provisioning.as_ref(), token).await?;

        let topic = attrs_topic(principal, &device_id);
        info!(%topic, "publishing attribute update");
        collaborators
            .publisher
            .publish(&topic, &json!({ (provision::ATTR_LABEL): PUBLISHED_VALUE }))
            .await
            .map_err(|error| StepError::new(Step::Publish, StepFailure::Transport(error)))?;

        let query = HistoryQuery {
            attr: provision::ATTR_LABEL.to_owned(),
            last_n: LAST_N,
        };
        let history = collaborators.history.as_ref();
        let (device, query) = (device_id.as_str(), &query);
        let records = retry(self.context.settings.history_retry, move || async move {
            debug!(device, "retrieving historical data");
            let records = history
                .query(device, query, token)
                .await
                .map_err(HistoryProbeError::Query)?;
            if records.is_empty() {
                return Err(HistoryProbeError::Empty);
            }
            Ok(records)
        })
        .await
        .map_err(|exhausted| {
            StepError::new(
                Step::AwaitVerification,
                StepFailure::VerificationTimeout(Box::new(exhausted)),
            )
        })?;

        check_first_record(&records, &device_id)
            .map_err(|failure| StepError::new(Step::ValidatePayload, failure))
    }
}

fn check_first_record(records: &[HistoryRecord], device_id: &str) -> Result<(), StepFailure> {
    let expectation = MatchExpectation::new(
        [
            ("attr".to_owned(), Value::from(provision::ATTR_LABEL)),
            ("value".to_owned(), Value::from(PUBLISHED_VALUE)),
            ("device_id".to_owned(), Value::from(device_id)),
        ]
        .into_iter()
        .collect(),
    )
    .ignoring(["ts"]);

    let first = records
        .first()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|error| StepFailure::Transport(Box::new(error)))?
        .unwrap_or(Value::Null);
    expectation.check(&first)?;
    Ok(())
}
