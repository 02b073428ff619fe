//! Tracing backend registry on top of the OpenTelemetry SDK.
//!
//! [`TraceConfig`] maps exporter names to initialisation functions and owns
//! the tracing flags. Its pre-run step builds a tracer provider over the
//! selected exporters and hands it to the [`TraceHandle`], which swaps an
//! OpenTelemetry layer into the subscriber built at process start. Until
//! then the layer slot is empty and spans are not exported.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use clap::{Arg, ArgAction};
use futures_util::future::BoxFuture;
use once_cell::sync::OnceCell;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData};
use opentelemetry_sdk::trace::{self as sdk, Sampler, Tracer, TracerProvider};
use thiserror::Error;
use tracing::{debug, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{EnvFilter, Registry, reload};

pub use opentelemetry_sdk::export::trace::SpanExporter;

use crate::builder::PreRunContext;
use crate::cancel::Cancellation;
use crate::flags::{FlagError, FlagSet, ParsedFlags};
use crate::opts::BaseOptions;

/// Name of the flag set owned by [`TraceConfig`].
pub const TRACE_FLAG_SET: &str = "tracing";
/// Service name reported when the flag is absent.
pub const DEFAULT_SERVICE_NAME: &str = "virtual-kubelet";
/// Resource attribute carrying the service name.
pub const SERVICE_NAME_KEY: &str = "service.name";

const EXPORTER_FLAG: &str = "trace-exporter";
const SERVICE_NAME_FLAG: &str = "trace-service-name";
const TAG_FLAG: &str = "trace-tag";
const SAMPLE_RATE_FLAG: &str = "trace-sample-rate";
const TRACE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::trace");

type BaseSubscriber = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// OpenTelemetry layer slotted into the process subscriber.
pub type OtelLayer = OpenTelemetryLayer<BaseSubscriber, Tracer>;

/// Reloadable slot the [`TraceHandle`] installs the [`OtelLayer`] into.
pub type OtelSlot = reload::Layer<Option<OtelLayer>, BaseSubscriber>;

/// Exporter initialisation function registered under an exporter name.
pub type ExporterInit =
    Box<dyn Fn(&ExporterContext<'_>) -> Result<Box<dyn SpanExporter>, TraceError> + Send + Sync>;

/// Inputs available to exporter initialisation.
#[derive(Debug, Clone, Copy)]
pub struct ExporterContext<'a> {
    /// Service name spans are reported under.
    pub service_name: &'a str,
    /// Tags attached to the tracer's resource.
    pub tags: &'a BTreeMap<String, String>,
    /// Process cancellation context.
    pub cancellation: &'a Cancellation,
}

/// Errors raised while configuring tracing.
#[derive(Debug, Error)]
pub enum TraceError {
    /// A tracing flag could not be read.
    #[error(transparent)]
    Flag(#[from] FlagError),
    /// The selected exporter is not registered.
    #[error("unsupported trace exporter '{name}'; available exporters: {}", .available.join(", "))]
    UnknownExporter {
        /// Requested exporter name.
        name: String,
        /// Registered exporter names.
        available: Vec<String>,
    },
    /// The sample rate was neither a keyword nor a percentage.
    #[error("unsupported trace sample rate '{value}': expected always, never, or 0-100")]
    SampleRate {
        /// Offending value.
        value: String,
    },
    /// A tag was not written as `key=value`.
    #[error("invalid trace tag '{value}': expected key=value")]
    Tag {
        /// Offending value.
        value: String,
    },
    /// An exporter failed to initialise.
    #[error("failed to initialise trace exporter '{name}': {message}")]
    Exporter {
        /// Exporter name.
        name: String,
        /// Description of the failure.
        message: String,
    },
    /// A tracer provider was already installed.
    #[error("trace exporter already installed")]
    AlreadyInstalled,
    /// The subscriber owning the layer slot is gone.
    #[error("failed to attach the trace layer: {source}")]
    Layer {
        /// Underlying reload error.
        #[source]
        source: reload::Error,
    },
}

/// Parses `always`, `never`, or an integer percentage between 0 and 100 into
/// a sampler. An empty value samples every trace.
///
/// # Errors
///
/// Returns [`TraceError::SampleRate`] for anything else.
pub fn parse_sample_rate(raw: &str) -> Result<Sampler, TraceError> {
    let value = raw.trim();
    match value.to_ascii_lowercase().as_str() {
        "" | "always" | "100" => Ok(Sampler::AlwaysOn),
        "never" | "0" => Ok(Sampler::AlwaysOff),
        other => other
            .parse::<u8>()
            .ok()
            .filter(|percent| *percent < 100)
            .map(ratio_sampler)
            .ok_or_else(|| TraceError::SampleRate {
                value: value.to_owned(),
            }),
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "ratio samplers take the sampled fraction of trace ids"
)]
fn ratio_sampler(percent: u8) -> Sampler {
    Sampler::TraceIdRatioBased(f64::from(percent) / 100.0)
}

/// Resource describing the traced process: the service name plus `tags`.
#[must_use]
pub fn resource(service_name: &str, tags: &BTreeMap<String, String>) -> Resource {
    let service = KeyValue::new(SERVICE_NAME_KEY, service_name.to_owned());
    let attributes = tags
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));
    Resource::new(std::iter::once(service).chain(attributes))
}

/// Exporter as registered with the tracer provider, named for diagnostics.
#[derive(Debug)]
struct NamedExporter {
    name: String,
    exporter: Box<dyn SpanExporter>,
}

impl SpanExporter for NamedExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        self.exporter.export(batch)
    }

    fn shutdown(&mut self) {
        debug!(target: TRACE_TARGET, exporter = %self.name, "shutting down trace exporter");
        self.exporter.shutdown();
    }
}

/// Handle onto the install-once tracer provider and the layer slot it feeds.
#[derive(Clone)]
pub struct TraceHandle {
    slot: reload::Handle<Option<OtelLayer>, BaseSubscriber>,
    provider: Arc<OnceCell<TracerProvider>>,
}

impl fmt::Debug for TraceHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TraceHandle")
            .field("installed", &self.provider.get().is_some())
            .finish_non_exhaustive()
    }
}

impl TraceHandle {
    /// Empty layer slot for the subscriber and the handle that fills it.
    pub(crate) fn slot() -> (OtelSlot, Self) {
        let (layer, slot) = reload::Layer::new(None);
        let handle = Self {
            slot,
            provider: Arc::default(),
        };
        (layer, handle)
    }

    /// Installs `provider` and starts exporting spans through a tracer named
    /// after `service_name`. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::AlreadyInstalled`] on repeated calls and
    /// [`TraceError::Layer`] once the owning subscriber has been dropped.
    pub fn install(&self, provider: TracerProvider, service_name: &str) -> Result<(), TraceError> {
        let tracer = provider.tracer(service_name.to_owned());
        self.provider
            .set(provider)
            .map_err(|_| TraceError::AlreadyInstalled)?;
        self.slot
            .reload(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
            .map_err(|source| TraceError::Layer { source })
    }

    /// Installed tracer provider, if any.
    #[must_use]
    pub fn provider(&self) -> Option<&TracerProvider> {
        self.provider.get()
    }

    /// Flushes every exporter of the installed provider. Failures are logged.
    pub fn flush(&self) {
        let Some(provider) = self.provider.get() else {
            return;
        };
        for result in provider.force_flush() {
            if let Err(error) = result {
                warn!(target: TRACE_TARGET, error = %error, "failed to flush trace exporter");
            }
        }
    }
}

/// Tracing registry: exporter names, flags, and the pre-run step.
pub struct TraceConfig {
    available: BTreeMap<String, ExporterInit>,
    service_name: String,
}

impl fmt::Debug for TraceConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TraceConfig")
            .field("available", &self.exporter_names())
            .field("service_name", &self.service_name)
            .finish()
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            available: BTreeMap::new(),
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
        }
    }
}

impl TraceConfig {
    /// Creates a registry without exporters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `init` under `name`, replacing any earlier registration.
    #[must_use]
    pub fn with_exporter(mut self, name: impl Into<String>, init: ExporterInit) -> Self {
        self.available.insert(name.into(), init);
        self
    }

    /// Registered exporter names, sorted.
    #[must_use]
    pub fn exporter_names(&self) -> Vec<String> {
        self.available.keys().cloned().collect()
    }

    /// The tracing flags.
    #[must_use]
    pub fn flag_set(&self) -> FlagSet {
        FlagSet::new(TRACE_FLAG_SET)
            .arg(
                Arg::new(EXPORTER_FLAG)
                    .long(EXPORTER_FLAG)
                    .action(ArgAction::Append)
                    .value_delimiter(',')
                    .value_name("NAME")
                    .help(format!(
                        "trace exporter to use; available exporters: {}",
                        self.exporter_names().join(", ")
                    )),
            )
            .arg(
                Arg::new(SERVICE_NAME_FLAG)
                    .long(SERVICE_NAME_FLAG)
                    .help(format!(
                        "service name reported to the trace exporter [default: {}]",
                        self.service_name
                    )),
            )
            .arg(
                Arg::new(TAG_FLAG)
                    .long(TAG_FLAG)
                    .action(ArgAction::Append)
                    .value_name("KEY=VALUE")
                    .help("tag attached to every exported span"),
            )
            .arg(
                Arg::new(SAMPLE_RATE_FLAG)
                    .long(SAMPLE_RATE_FLAG)
                    .help("trace sampling: always, never, or a percentage between 0 and 100"),
            )
    }

    /// Pre-run step entry point used by the builder options.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError`] as for [`TraceConfig::configure`].
    pub fn configure_from(&self, context: &PreRunContext<'_>) -> Result<(), TraceError> {
        self.configure(
            context.flags,
            context.options,
            context.cancellation,
            context.telemetry.trace(),
        )
    }

    /// Builds a tracer provider over the selected exporters and installs it
    /// into `handle`.
    ///
    /// Selecting no exporter leaves tracing disabled.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError`] for unknown exporters, malformed tags or sample
    /// rates, exporter initialisation failures, or a second installation.
    pub fn configure(
        &self,
        flags: &ParsedFlags,
        options: &BaseOptions,
        cancellation: &Cancellation,
        handle: &TraceHandle,
    ) -> Result<(), TraceError> {
        let selected = flags.strings(EXPORTER_FLAG)?;
        let names: Vec<String> = selected
            .into_iter()
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            debug!(target: TRACE_TARGET, "no trace exporter selected; tracing disabled");
            return Ok(());
        }

        let service_name = flags
            .string(SERVICE_NAME_FLAG)?
            .unwrap_or_else(|| self.service_name.clone());
        let sampler = parse_sample_rate(&flags.string(SAMPLE_RATE_FLAG)?.unwrap_or_default())?;
        let mut tags = default_tags(options);
        for raw in flags.strings(TAG_FLAG)? {
            let (key, value) = parse_tag(&raw)?;
            tags.insert(key, value);
        }

        let context = ExporterContext {
            service_name: &service_name,
            tags: &tags,
            cancellation,
        };
        debug!(
            target: TRACE_TARGET,
            exporters = ?names,
            sampler = ?sampler,
            "configuring trace exporters"
        );
        let mut builder = TracerProvider::builder().with_config(
            sdk::config()
                .with_sampler(sampler)
                .with_resource(resource(&service_name, &tags)),
        );
        for name in names {
            let init = self
                .available
                .get(&name)
                .ok_or_else(|| TraceError::UnknownExporter {
                    name: name.clone(),
                    available: self.exporter_names(),
                })?;
            let exporter = init(&context)?;
            builder = builder.with_simple_exporter(NamedExporter { name, exporter });
        }
        handle.install(builder.build(), &service_name)
    }
}

fn default_tags(options: &BaseOptions) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            String::from("operatingSystem"),
            options.operating_system.clone(),
        ),
        (String::from("provider"), options.provider.clone()),
        (String::from("nodeName"), options.node_name.clone()),
    ])
}

fn parse_tag(raw: &str) -> Result<(String, String), TraceError> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| TraceError::Tag {
            value: raw.to_owned(),
        })
}
