use std::{
    fs::File,
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Args, ValueEnum};
use platform_http_client::ServiceEndpoints;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::Level;
use url::Url;
use verifier_core::{Principal, RetryPolicy, ScenarioSettings};
use verifier_tracing::{FileConfig, LogFormat, LoggerLayer, LoggingSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{var}=`{value}` does not form a valid service address: {source}")]
    Host {
        var: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// Service addresses. Unset ones point at the platform's default host names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub auth: Option<Url>,
    pub device_manager: Option<Url>,
    pub history: Option<Url>,
    pub data_broker: Option<Url>,
    pub mqtt: Option<Url>,
}

type ServiceEntry = (
    &'static str,
    &'static str,
    &'static str,
    fn(&mut ServicesConfig) -> &mut Option<Url>,
);

/// Host variable, default host, address template and the service it sets.
const SERVICES: [ServiceEntry; 5] = [
    ("AUTH_HOST", "auth", "http://{}:5000", |services| &mut services.auth),
    (
        "DEVICE_MANAGER_HOST",
        "device-manager",
        "http://{}:5000",
        |services| &mut services.device_manager,
    ),
    ("HISTORY_HOST", "history", "http://{}:8000", |services| {
        &mut services.history
    }),
    ("DATA_BROKER_HOST", "data-broker", "http://{}", |services| {
        &mut services.data_broker
    }),
    ("IOTAGENT_MQTT_HOST", "iotagent-mqtt", "mqtt://{}", |services| {
        &mut services.mqtt
    }),
];

fn host_url(var: &'static str, template: &str, host: &str) -> Result<Url, ConfigError> {
    Url::parse(&template.replace("{}", host)).map_err(|source| ConfigError::Host {
        var,
        value: host.to_owned(),
        source,
    })
}

impl ServicesConfig {
    /// Fills every unset address from its default host.
    pub fn resolve(self) -> Result<ResolvedServices, ConfigError> {
        let [auth, device_manager, history, data_broker, mqtt] = SERVICES;
        Ok(ResolvedServices {
            endpoints: ServiceEndpoints {
                auth: or_default(self.auth, auth)?,
                device_manager: or_default(self.device_manager, device_manager)?,
                history: or_default(self.history, history)?,
                data_broker: or_default(self.data_broker, data_broker)?,
            },
            mqtt: or_default(self.mqtt, mqtt)?,
        })
    }
}

fn or_default(
    address: Option<Url>,
    (var, default_host, template, _): ServiceEntry,
) -> Result<Url, ConfigError> {
    address.map_or_else(|| host_url(var, template, default_host), Ok)
}

#[derive(Clone, Debug)]
pub struct ResolvedServices {
    pub endpoints: ServiceEndpoints,
    pub mqtt: Url,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminCredentials {
    pub username: String,
    pub tenant: String,
    pub password: String,
}

impl Default for AdminCredentials {
    fn default() -> Self {
        Self {
            username: "admin".to_owned(),
            tenant: "admin".to_owned(),
            password: "admin".to_owned(),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRetryConfig {
    pub max_attempts: NonZeroU32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "delay_ms")]
    pub delay: Duration,
}

impl Default for HistoryRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(4).unwrap_or(NonZeroU32::MIN),
            delay: Duration::from_millis(3000),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub services: ServicesConfig,
    pub admin: AdminCredentials,
    pub new_user_password: String,
    pub history_retry: HistoryRetryConfig,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "push_timeout_ms")]
    pub push_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "reconnect_interval_ms")]
    pub reconnect_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "http_timeout_ms")]
    pub http_timeout: Duration,
    pub fail_fast: bool,
    pub logging: LoggingSettings,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            services: ServicesConfig::default(),
            admin: AdminCredentials::default(),
            new_user_password: "temppwd".to_owned(),
            history_retry: HistoryRetryConfig::default(),
            push_timeout: Duration::from_millis(5000),
            reconnect_interval: Duration::from_millis(10),
            http_timeout: Duration::from_millis(30_000),
            fail_fast: true,
            logging: LoggingSettings::default(),
        }
    }
}

impl VerifierConfig {
    /// Reads `path` if given, falling back to the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_yaml::from_reader(file).map_err(|source| ConfigError::Yaml {
            path: path.to_owned(),
            source,
        })
    }

    /// Points services at the hosts named by the `*_HOST` variables `lookup`
    /// resolves.
    pub fn with_env_hosts<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, _, template, slot) in SERVICES {
            if let Some(host) = lookup(var).filter(|host| !host.is_empty()) {
                *slot(&mut self.services) = Some(host_url(var, template, &host)?);
            }
        }
        Ok(self)
    }

    #[must_use]
    pub fn update_from_args(mut self, run_args: &RunArgs, log_args: LogArgs) -> Self {
        let LogArgs {
            level,
            format,
            directory,
        } = log_args;
        if let Some(level) = level {
            self.logging.level = level;
        }
        if let Some(format) = format {
            self.logging.format = format.into();
        }
        if let Some(directory) = directory {
            self.logging.logger = LoggerLayer::File(FileConfig {
                directory,
                prefix: None,
            });
        }
        if run_args.keep_going {
            self.fail_fast = false;
        }
        self
    }

    #[must_use]
    pub fn scenario_settings(&self) -> ScenarioSettings {
        ScenarioSettings {
            admin: Principal::new(
                self.admin.username.clone(),
                self.admin.tenant.clone(),
                self.admin.password.clone(),
            ),
            new_user_password: self.new_user_password.clone(),
            history_retry: RetryPolicy::new(
                self.history_retry.max_attempts,
                self.history_retry.delay,
            ),
            push_timeout: self.push_timeout,
            reconnect_interval: self.reconnect_interval,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Minimum level of emitted log lines.
    #[clap(long = "log-level", env = "VERIFIER_LOG_LEVEL")]
    pub level: Option<Level>,
    #[clap(long = "log-format", env = "VERIFIER_LOG_FORMAT", value_enum)]
    pub format: Option<LogFormatArg>,
    /// Writes logs to a file in this directory instead of stdout.
    #[clap(long = "log-dir", env = "VERIFIER_LOG_DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Plain,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Plain => Self::Plain,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Runs only the use case with this name.
    #[clap(long)]
    pub only: Option<String>,
    /// Keeps running the remaining use cases after a failure.
    #[clap(long)]
    pub keep_going: bool,
}
