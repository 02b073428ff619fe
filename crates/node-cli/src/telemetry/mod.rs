//! Process-wide logging and tracing adapters.
//!
//! [`install`] registers one global `tracing` subscriber, at most once per
//! process. The subscriber carries a reloadable level filter and an empty
//! OpenTelemetry layer slot, so the logging and tracing pre-run callbacks
//! configure the installed adapters in place instead of reinstalling them. The returned [`Telemetry`] handle is the explicit
//! context through which those callbacks reach the adapters.

pub mod agent;
pub mod logging;
pub mod trace;

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use strum::{Display, EnumString};
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt, reload};

pub use logging::{LogConfig, LogHandle, LogLevel, LoggingError};
pub use agent::{AgentExporter, SpanRecord};
pub use trace::{
    ExporterContext, ExporterInit, SpanExporter, TraceConfig, TraceError, TraceHandle,
    parse_sample_rate,
};

static TELEMETRY: OnceCell<Telemetry> = OnceCell::new();

/// Supported logging output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

impl LogFormat {
    /// Compact output on interactive terminals, JSON otherwise.
    #[must_use]
    pub fn detect() -> Self {
        if io::stderr().is_terminal() {
            Self::Compact
        } else {
            Self::Json
        }
    }
}

/// Errors encountered while installing telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Another global subscriber was installed outside this crate.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Handles onto the installed logger and tracer.
#[derive(Debug, Clone)]
pub struct Telemetry {
    log: LogHandle,
    trace: TraceHandle,
}

impl Telemetry {
    /// Handle onto the level filter of the installed logger.
    #[must_use]
    pub const fn log(&self) -> &LogHandle {
        &self.log
    }

    /// Handle onto the tracer provider of the installed tracer.
    #[must_use]
    pub const fn trace(&self) -> &TraceHandle {
        &self.trace
    }
}

/// Installs the global subscriber on first use and returns its handles.
///
/// Repeated calls return the handles created by the first call without
/// touching the global state again; `format` only applies to the first call.
///
/// # Errors
///
/// Returns [`TelemetryError::Subscriber`] when another global subscriber is
/// already registered.
pub fn install(format: LogFormat) -> Result<Telemetry, TelemetryError> {
    TELEMETRY
        .get_or_try_init(|| {
            let (subscriber, telemetry) = build_subscriber(format);
            tracing::subscriber::set_global_default(subscriber)?;
            Ok::<_, TelemetryError>(telemetry)
        })
        .cloned()
}

/// Builds a subscriber and its handles without installing it globally.
///
/// The handles stay live for as long as the subscriber does.
#[must_use]
pub fn build_subscriber(format: LogFormat) -> (Box<dyn Subscriber + Send + Sync>, Telemetry) {
    let (filter, filter_handle) = reload::Layer::new(EnvFilter::new(logging::DEFAULT_DIRECTIVE));
    let (otel, trace) = TraceHandle::slot();
    let registry = tracing_subscriber::registry().with(filter).with(otel);

    let builder = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(registry.with(builder.json().flatten_event(true))),
        LogFormat::Compact => Box::new(registry.with(builder.compact())),
    };

    let telemetry = Telemetry {
        log: LogHandle::new(filter_handle),
        trace,
    };
    (subscriber, telemetry)
}
