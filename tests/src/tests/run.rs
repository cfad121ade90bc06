use std::sync::Arc;

use tests::{context, Behaviour, FakePlatform};
use verifier_core::{
    PublishingHistory, PublishingPushChannel, ScenarioRunner, ScenarioSettings, Step, UseCase,
};

fn runner(platform: &FakePlatform) -> ScenarioRunner {
    let context = context(platform, ScenarioSettings::default());
    ScenarioRunner::new(vec![
        Box::new(PublishingHistory::new(Arc::clone(&context))) as Box<dyn UseCase>,
        Box::new(PublishingPushChannel::new(context)),
    ])
}

#[test_log::test(tokio::test(start_paused = true))]
async fn every_use_case_passes_against_a_healthy_platform() {
    let platform = FakePlatform::default();
    let runner = runner(&platform);
    assert_eq!(
        runner.names(),
        vec!["MQTT - history use case", "MQTT - socket io use case"]
    );

    let report = runner.run().await;
    assert!(report.is_success());
    assert_eq!(report.outcomes().len(), 2);
    assert!(report.first_failure().is_none());
    // The admin token is exchanged once for the whole run, each new
    // principal logs in once.
    assert_eq!(platform.login_count(), 3);
    assert_eq!(platform.created_tenants().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn first_failure_ends_the_run() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        omit_template_id: true,
        ..Behaviour::default()
    });
    let report = runner(&platform).run().await;

    assert!(!report.is_success());
    assert_eq!(report.outcomes().len(), 1);
    let failure = report.first_failure().unwrap();
    assert_eq!(failure.scenario, "MQTT - history use case");
    assert_eq!(failure.step, Step::CreateSchema);
}

#[tokio::test(start_paused = true)]
async fn without_fail_fast_later_use_cases_still_run() {
    let platform = FakePlatform::with_behaviour(Behaviour {
        push_disabled: true,
        ..Behaviour::default()
    });
    let context = context(&platform, ScenarioSettings::default());
    let report = ScenarioRunner::new(vec![
        Box::new(PublishingPushChannel::new(Arc::clone(&context))) as Box<dyn UseCase>,
        Box::new(PublishingHistory::new(context)),
    ])
    .with_fail_fast(false)
    .run()
    .await;

    assert_eq!(report.outcomes().len(), 2);
    assert_eq!(report.failures().count(), 1);
    let failure = report.first_failure().unwrap();
    assert_eq!(failure.scenario, "MQTT - socket io use case");
    assert_eq!(failure.failure.kind(), "VerificationTimeout");
    assert!(report.outcomes()[1].result.is_ok());
}
