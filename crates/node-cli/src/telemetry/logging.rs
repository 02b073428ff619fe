//! Logging backend adapter: the level flag and the pre-run step applying it.

use std::fmt;
use std::sync::Arc;

use clap::Arg;
use once_cell::sync::OnceCell;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::flags::{FlagError, FlagSet, ParsedFlags};

/// Filter directive active between install and level configuration.
pub const DEFAULT_DIRECTIVE: &str = "info";
/// Name of the flag set owned by [`LogConfig`].
pub const LOG_FLAG_SET: &str = "logging";

const LOG_LEVEL_FLAG: &str = "log-level";
const LOGGING_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::logging");

/// Accepted log levels. `fatal` and `panic` are kept for operators used to
/// those names and map onto the error level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum LogLevel {
    /// Everything, including fine-grained tracing.
    #[strum(to_string = "trace")]
    Trace,
    /// Debugging detail.
    #[strum(to_string = "debug")]
    Debug,
    /// Normal operational messages.
    #[default]
    #[strum(to_string = "info")]
    Info,
    /// Warnings.
    #[strum(to_string = "warn", serialize = "warning")]
    Warn,
    /// Errors only.
    #[strum(to_string = "error")]
    Error,
    /// Alias of [`LogLevel::Error`].
    #[strum(to_string = "fatal")]
    Fatal,
    /// Alias of [`LogLevel::Error`].
    #[strum(to_string = "panic")]
    Panic,
}

impl LogLevel {
    /// Filter directive enabling this level.
    #[must_use]
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal | Self::Panic => "error",
        }
    }
}

/// Errors raised while configuring the logger.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The level flag could not be read.
    #[error(transparent)]
    Flag(#[from] FlagError),
    /// The level was not recognised.
    #[error("unsupported log level '{value}'")]
    UnknownLevel {
        /// Offending value.
        value: String,
    },
    /// The level was already configured once.
    #[error("log level already configured as '{current}'")]
    AlreadyConfigured {
        /// Level set by the first configuration.
        current: LogLevel,
    },
    /// The installed filter could not be replaced.
    #[error("failed to apply log level: {message}")]
    Reload {
        /// Description of the reload failure.
        message: String,
    },
}

/// Logging configuration carried from flags to the pre-run step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogConfig {
    level: LogLevel,
}

impl LogConfig {
    /// Configuration defaulting to `level`.
    #[must_use]
    pub const fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// Default level when the flag is absent.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    /// The `--log-level` flag.
    #[must_use]
    pub fn flag_set(&self) -> FlagSet {
        FlagSet::new(LOG_FLAG_SET).arg(
            Arg::new(LOG_LEVEL_FLAG)
                .long(LOG_LEVEL_FLAG)
                .value_name("LEVEL")
                .help(format!(
                    "log level: trace, debug, info, warn, error, fatal, panic [default: {}]",
                    self.level
                )),
        )
    }

    /// Resolves the level from parsed flags, falling back to the default.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError::UnknownLevel`] for unrecognised names.
    pub fn resolve(&self, flags: &ParsedFlags) -> Result<LogLevel, LoggingError> {
        flags
            .string(LOG_LEVEL_FLAG)?
            .map_or(Ok(self.level), |raw| {
                raw.trim()
                    .parse::<LogLevel>()
                    .map_err(|_| LoggingError::UnknownLevel { value: raw })
            })
    }

    /// Pre-run step: resolves the level and applies it to the installed
    /// logger.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError`] when the level is invalid or the logger was
    /// already configured.
    pub fn configure(&self, flags: &ParsedFlags, handle: &LogHandle) -> Result<(), LoggingError> {
        let level = self.resolve(flags)?;
        handle.configure(level)?;
        debug!(target: LOGGING_TARGET, level = %level, "log level configured");
        Ok(())
    }
}

/// Handle onto the level filter of an installed subscriber.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    configured: Arc<OnceCell<LogLevel>>,
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LogHandle")
            .field("configured", &self.configured.get())
            .finish_non_exhaustive()
    }
}

impl LogHandle {
    pub(crate) fn new(filter: reload::Handle<EnvFilter, Registry>) -> Self {
        Self {
            filter,
            configured: Arc::new(OnceCell::new()),
        }
    }

    /// Applies `level`. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError::AlreadyConfigured`] on repeated calls and
    /// [`LoggingError::Reload`] when the subscriber is gone.
    pub fn configure(&self, level: LogLevel) -> Result<(), LoggingError> {
        if let Some(current) = self.configured.get() {
            return Err(LoggingError::AlreadyConfigured { current: *current });
        }
        let filter = EnvFilter::try_new(level.directive()).map_err(|error| LoggingError::Reload {
            message: error.to_string(),
        })?;
        self.filter
            .reload(filter)
            .map_err(|error| LoggingError::Reload {
                message: error.to_string(),
            })?;
        self.configured
            .set(level)
            .map_err(|_| LoggingError::AlreadyConfigured { current: level })
    }

    /// Level applied by [`LogHandle::configure`], if any.
    #[must_use]
    pub fn level(&self) -> Option<LogLevel> {
        self.configured.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{LogFormat, build_subscriber};
    use clap::Command;
    use rstest::rstest;

    fn parse(config: &LogConfig, args: &[&str]) -> ParsedFlags {
        let command = Command::new("test").args(config.flag_set().args().iter().cloned());
        let mut argv = vec!["test"];
        argv.extend_from_slice(args);
        ParsedFlags::new(command.try_get_matches_from(argv).expect("parse"))
    }

    #[rstest]
    #[case("trace", LogLevel::Trace, "trace")]
    #[case("WARNING", LogLevel::Warn, "warn")]
    #[case("fatal", LogLevel::Fatal, "error")]
    #[case("panic", LogLevel::Panic, "error")]
    fn parses_levels(#[case] raw: &str, #[case] level: LogLevel, #[case] directive: &str) {
        let parsed = raw.parse::<LogLevel>().expect("level parses");
        assert_eq!(parsed, level);
        assert_eq!(parsed.directive(), directive);
    }

    #[rstest]
    fn resolve_falls_back_to_default() {
        let config = LogConfig::new(LogLevel::Warn);
        let flags = parse(&config, &[]);
        assert_eq!(config.resolve(&flags).expect("resolve"), LogLevel::Warn);
    }

    #[rstest]
    fn resolve_rejects_unknown_levels() {
        let config = LogConfig::default();
        let flags = parse(&config, &["--log-level", "chatty"]);
        let error = config.resolve(&flags).expect_err("unknown level");
        assert!(matches!(error, LoggingError::UnknownLevel { ref value } if value == "chatty"));
    }

    #[rstest]
    fn configure_applies_once() {
        let (_subscriber, telemetry) = build_subscriber(LogFormat::Json);
        let config = LogConfig::default();
        let flags = parse(&config, &["--log-level", "debug"]);
        config
            .configure(&flags, telemetry.log())
            .expect("first configuration");
        assert_eq!(telemetry.log().level(), Some(LogLevel::Debug));
        let error = config
            .configure(&flags, telemetry.log())
            .expect_err("second configuration");
        assert!(matches!(
            error,
            LoggingError::AlreadyConfigured {
                current: LogLevel::Debug
            }
        ));
    }
}
