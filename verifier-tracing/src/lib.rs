//! Logging setup shared by the verifier binaries and tests.

use std::{error::Error, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::ParseError, fmt::MakeWriter, EnvFilter};

const DEFAULT_LOG_FILE: &str = "baseline-verifier.log";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoggerLayer {
    #[default]
    Stdout,
    File(FileConfig),
    None,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileConfig {
    pub directory: PathBuf,
    pub prefix: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSettings {
    #[serde(default)]
    pub logger: LoggerLayer,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_level", with = "level_serde")]
    pub level: Level,
    /// Extra `EnvFilter` directives, e.g. `verifier_core=debug,reqwest=warn`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            logger: LoggerLayer::default(),
            format: LogFormat::default(),
            level: default_level(),
            filter: None,
        }
    }
}

const fn default_level() -> Level {
    Level::INFO
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter `{directive}`: {source}")]
    Filter {
        directive: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to install the global subscriber: {0}")]
    Install(#[source] Box<dyn Error + Send + Sync + 'static>),
}

/// Keeps the non-blocking file writer flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _appender: Option<WorkerGuard>,
}

/// Installs the global subscriber described by `settings`.
///
/// `RUST_LOG` takes precedence over the configured level and filter.
pub fn init(settings: &LoggingSettings) -> Result<LoggingGuard, LoggingError> {
    match &settings.logger {
        LoggerLayer::None => Ok(LoggingGuard { _appender: None }),
        LoggerLayer::Stdout => {
            install(std::io::stdout, settings.format, build_filter(settings)?, true)?;
            Ok(LoggingGuard { _appender: None })
        }
        LoggerLayer::File(FileConfig { directory, prefix }) => {
            let file_name = prefix
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            install(writer, settings.format, build_filter(settings)?, false)?;
            Ok(LoggingGuard {
                _appender: Some(guard),
            })
        }
    }
}

pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = settings.filter.as_ref().map_or_else(
        || settings.level.to_string().to_lowercase(),
        |extra| format!("{},{extra}", settings.level.to_string().to_lowercase()),
    );
    EnvFilter::try_new(&directive).map_err(|source| LoggingError::Filter { directive, source })
}

fn install<W>(
    writer: W,
    format: LogFormat,
    filter: EnvFilter,
    ansi: bool,
) -> Result<(), LoggingError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);

    match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(LoggingError::Install)
}

mod level_serde {
    use std::str::FromStr as _;

    use serde::{Deserialize as _, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(level.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Level::from_str(&raw).map_err(serde::de::Error::custom)
    }
}
