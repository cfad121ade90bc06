mod config;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use platform_http_client::PlatformHttpClient;
use tracing::{error, info};
use verifier_core::{
    Collaborators, MqttPublisher, PublishingHistory, PublishingPushChannel, ScenarioContext,
    ScenarioRunner, SocketIoTransport, UseCase,
};

use crate::config::{LogArgs, RunArgs, VerifierConfig};

/// Event name the data broker pushes device updates under.
const PUSH_EVENT: &str = "all";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path for a yaml-encoded verifier config file. Built-in defaults are used
    /// when omitted.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Dry-run flag. If active, the binary will try to load the config and
    /// then exit.
    #[clap(long = "check-config", action)]
    check_config_only: bool,
    /// Selects and orders use cases.
    #[clap(flatten)]
    run: RunArgs,
    /// Overrides log config.
    #[clap(flatten)]
    log: LogArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let Args {
        config,
        check_config_only,
        run: run_args,
        log: log_args,
    } = Args::parse();

    let config = VerifierConfig::load(config.as_deref())?
        .with_env_hosts(|var| std::env::var(var).ok())?
        .update_from_args(&run_args, log_args);
    let services = config.services.clone().resolve()?;

    #[expect(
        clippy::non_ascii_literal,
        reason = "Use of green checkmark for better UX."
    )]
    if check_config_only {
        println!("Config file is valid! ✅");
        return Ok(ExitCode::SUCCESS);
    }

    let _logging = verifier_tracing::init(&config.logging)?;

    let http = Arc::new(PlatformHttpClient::with_timeout(
        services.endpoints.clone(),
        config.http_timeout,
    )?);
    let collaborators = Collaborators {
        credentials: Arc::clone(&http) as _,
        provisioning: Arc::clone(&http) as _,
        history: Arc::clone(&http) as _,
        channel_tokens: http as _,
        publisher: Arc::new(MqttPublisher::from_url(&services.mqtt, config.http_timeout)?),
        stream_transport: Arc::new(SocketIoTransport::new(
            services.endpoints.data_broker,
            PUSH_EVENT,
        )),
    };
    let context = ScenarioContext::new(collaborators, config.scenario_settings());

    let mut use_cases: Vec<Box<dyn UseCase>> = vec![
        Box::new(PublishingHistory::new(Arc::clone(&context))),
        Box::new(PublishingPushChannel::new(context)),
    ];
    if let Some(only) = &run_args.only {
        use_cases.retain(|use_case| use_case.name() == only.as_str());
        if use_cases.is_empty() {
            return Err(eyre!("no use case is named `{only}`"));
        }
    }

    let runner = ScenarioRunner::new(use_cases).with_fail_fast(config.fail_fast);
    info!(use_cases = ?runner.names(), "starting verification run");
    let report = runner.run().await;
    if report.is_success() {
        info!("All tests ran successfully");
        return Ok(ExitCode::SUCCESS);
    }

    error!("Not all tests ran successfully");
    for failure in report.failures() {
        error!(
            use_case = %failure.scenario,
            principal = %failure.principal,
            step = %failure.step,
            kind = failure.failure.kind(),
            "{failure}"
        );
    }
    Ok(ExitCode::FAILURE)
}
