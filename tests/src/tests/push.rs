use std::time::Duration;

use serde_json::{json, Value};
use tests::{context, platform::ADMIN, Behaviour, FakePlatform};
use tokio::time::Instant;
use verifier_core::{
    PublishingPushChannel, ScenarioError, ScenarioSettings, Step, StepFailure, UseCase,
};

async fn run(platform: &FakePlatform) -> Result<(), ScenarioError> {
    PublishingPushChannel::new(context(platform, ScenarioSettings::default()))
        .run_test()
        .await
}

fn retarget_tenant(message: &mut Value) {
    message["metadata"]["tenant"] = json!("ten_0");
}

fn tag_source(message: &mut Value) {
    message["source"] = json!("iotagent-mqtt");
}

fn drop_timestamp(message: &mut Value) {
    if let Some(message) = message.as_object_mut() {
        message.remove("timestamp");
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn published_value_is_pushed_to_admin_and_new_principal() {
    let platform = FakePlatform::default();
    let started = Instant::now();
    run(&platform).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(platform.connection_count(), 2);
    let published = platform.published();
    assert_eq!(published.len(), 2);
    assert!(published[0].0.starts_with("/admin/"));
    for (_, payload) in &published {
        assert_eq!(payload, &json!({"attr": "this is a test"}));
    }
    assert_eq!(platform.created_tenants().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn message_without_timestamp_still_matches() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        push_rewrite: Some(drop_timestamp),
        ..Behaviour::default()
    });
    run(&platform).await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn dropped_channel_is_reopened_before_delivery() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        dropped_connections: 1,
        ..Behaviour::default()
    });
    run(&platform).await.unwrap();

    // One extra connection for the admin pass.
    assert_eq!(platform.connection_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn refused_connections_are_retried() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        refused_connections: 2,
        ..Behaviour::default()
    });
    run(&platform).await.unwrap();
    assert_eq!(platform.connection_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn message_pushed_before_a_slow_publish_returns_still_counts() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        publish_ack_delay: Duration::from_secs(6),
        ..Behaviour::default()
    });
    let started = Instant::now();
    run(&platform).await.unwrap();

    // Both passes wait for the slow acknowledgement, well past the push timeout.
    assert!(started.elapsed() >= Duration::from_secs(12));
    assert_eq!(platform.published().len(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn silent_broker_times_out_after_five_seconds() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        push_disabled: true,
        ..Behaviour::default()
    });
    let started = Instant::now();
    let error = run(&platform).await.unwrap_err();

    assert_eq!(error.scenario, "MQTT - socket io use case");
    assert_eq!(error.principal, ADMIN);
    assert_eq!(error.step, Step::AwaitVerification);
    assert!(matches!(error.failure, StepFailure::VerificationTimeout(_)));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
    assert!(platform.created_tenants().is_empty());
}

#[tokio::test(start_paused = true)]
async fn message_for_another_tenant_is_a_payload_mismatch() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        push_rewrite: Some(retarget_tenant),
        ..Behaviour::default()
    });
    let error = run(&platform).await.unwrap_err();

    assert_eq!(error.step, Step::ValidatePayload);
    let StepFailure::PayloadMismatch(mismatch) = error.failure else {
        panic!("unexpected failure: {}", error.failure);
    };
    assert_eq!(mismatch.changed, vec!["metadata".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn unexpected_extra_field_is_a_payload_mismatch() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        push_rewrite: Some(tag_source),
        ..Behaviour::default()
    });
    let error = run(&platform).await.unwrap_err();

    let StepFailure::PayloadMismatch(mismatch) = error.failure else {
        panic!("unexpected failure: {}", error.failure);
    };
    assert_eq!(mismatch.extra, vec!["source".to_owned()]);
    assert!(mismatch.changed.is_empty());
}

#[tokio::test(start_paused = true)]
async fn device_without_identifier_fails_before_connecting() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        omit_device_id: true,
        ..Behaviour::default()
    });
    let error = run(&platform).await.unwrap_err();

    assert_eq!(error.step, Step::CreateResource);
    assert_eq!(error.failure.kind(), "ProvisioningError");
    assert_eq!(platform.connection_count(), 0);
}
