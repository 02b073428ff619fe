//! Composition builder folding option units into one node.
//!
//! Building runs four phases, each finishing before the next starts:
//! registration (options folded in order, flag sets merged into one
//! namespace), parse, pre-run (callbacks in registration order), and
//! materialisation (the selected provider factory invoked once). Any failure
//! aborts the build; nothing is retried.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;

use clap::Command;
use clap::error::ErrorKind;
use thiserror::Error;
use tracing::{debug, info_span};

use crate::cancel::Cancellation;
use crate::flags::{FlagError, FlagNamespace, FlagSet, ParsedFlags};
use crate::health::{LifecycleReporter, StructuredLifecycleReporter};
use crate::node::{ControlLoop, HeartbeatLoop, Node};
use crate::options::{Opt, PreRunCallback, PreRunError};
use crate::opts::BaseOptions;
use crate::provider::{ProviderError, ProviderRegistry, RegistryError};
use crate::telemetry::Telemetry;

const BUILDER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::builder");
const VERSION_COMMAND: &str = "version";
const PROVIDERS_COMMAND: &str = "providers";

/// Read-only context handed to every pre-run callback.
#[derive(Debug, Clone, Copy)]
pub struct PreRunContext<'a> {
    /// Parsed command-line flags.
    pub flags: &'a ParsedFlags,
    /// Base options after parsed flags were applied.
    pub options: &'a BaseOptions,
    /// Process cancellation context.
    pub cancellation: &'a Cancellation,
    /// Handles onto the installed logger and tracer.
    pub telemetry: &'a Telemetry,
}

/// Version strings reported by the `version` subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    /// Release version.
    pub version: String,
    /// Build timestamp.
    pub build_time: String,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "Version: {}, Built: {}",
            or_unknown(&self.version),
            or_unknown(&self.build_time)
        )
    }
}

const fn or_unknown(value: &str) -> &str {
    if value.is_empty() { "N/A" } else { value }
}

/// What the parsed command line asked for.
#[derive(Debug)]
pub enum Invocation {
    /// Run the composed node.
    Run(Node),
    /// Print the rendered help text.
    Help(String),
    /// Print the version strings.
    Version(VersionInfo),
    /// Print the registered provider names.
    Providers(Vec<String>),
}

/// Errors raised while composing the node.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Flag sets collided or a parsed value could not be applied.
    #[error("invalid flag configuration: {source}")]
    Flag {
        /// Underlying flag error.
        #[source]
        source: FlagError,
    },
    /// Provider registration or selection failed.
    #[error("provider selection failed: {source}")]
    Registry {
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },
    /// The command line did not match the merged flag namespace.
    #[error("failed to parse command line: {source}")]
    Parse {
        /// Underlying parse error.
        #[source]
        source: clap::Error,
    },
    /// A pre-run callback failed.
    #[error("pre-run callback {index} failed: {source}")]
    PreRun {
        /// Zero-based registration index of the callback.
        index: usize,
        /// Callback error.
        #[source]
        source: PreRunError,
    },
    /// The selected provider factory failed.
    #[error("failed to initialise provider '{name}': {source}")]
    Provider {
        /// Provider name.
        name: String,
        /// Factory error.
        #[source]
        source: ProviderError,
    },
}

/// State accumulated by the registration phase.
pub(crate) struct Registration {
    pub(crate) base: BaseOptions,
    pub(crate) version: VersionInfo,
    pub(crate) registry: ProviderRegistry,
    pub(crate) namespace: FlagNamespace,
    pub(crate) callbacks: Vec<PreRunCallback>,
    pub(crate) control: Option<Box<dyn ControlLoop>>,
}

impl Registration {
    /// Folds `options` in order, then merges the base flag set and every
    /// persistent flag set into one namespace.
    pub(crate) fn fold(options: Vec<Opt>) -> Result<Self, BuildError> {
        let mut base = BaseOptions::default();
        let mut version = VersionInfo::default();
        let mut registry = ProviderRegistry::new();
        let mut flag_sets: Vec<FlagSet> = Vec::new();
        let mut callbacks = Vec::new();
        let mut control = None;

        for option in options {
            match option {
                Opt::Base(replacement) => base = replacement,
                Opt::BaseWith(mutate) => mutate(&mut base),
                Opt::CliVersion {
                    version: release,
                    build_time,
                } => {
                    version = VersionInfo {
                        version: release,
                        build_time,
                    };
                }
                Opt::Provider { name, factory } => registry
                    .register(name, factory)
                    .map_err(|source| BuildError::Registry { source })?,
                Opt::PersistentFlags(set) => flag_sets.push(set),
                Opt::PreRun(callback) => callbacks.push(callback),
                Opt::ControlLoop(replacement) => control = Some(replacement),
            }
        }

        let mut namespace = FlagNamespace::new();
        for set in std::iter::once(base.flag_set()).chain(flag_sets) {
            namespace
                .register(set)
                .map_err(|source| BuildError::Flag { source })?;
        }

        Ok(Self {
            base,
            version,
            registry,
            namespace,
            callbacks,
            control,
        })
    }
}

/// Builder turning option units and a command line into an [`Invocation`].
pub struct NodeBuilder {
    name: String,
    cancellation: Cancellation,
    telemetry: Telemetry,
    reporter: Arc<dyn LifecycleReporter>,
    options: Vec<Opt>,
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("NodeBuilder")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl NodeBuilder {
    /// Creates a builder for the program `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, cancellation: Cancellation, telemetry: Telemetry) -> Self {
        Self {
            name: name.into(),
            cancellation,
            telemetry,
            reporter: Arc::new(StructuredLifecycleReporter::new()),
            options: Vec::new(),
        }
    }

    /// Replaces the lifecycle reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn LifecycleReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Appends one option unit.
    #[must_use]
    pub fn option(mut self, option: Opt) -> Self {
        self.options.push(option);
        self
    }

    /// Appends several option units, keeping their order.
    #[must_use]
    pub fn options(mut self, options: impl IntoIterator<Item = Opt>) -> Self {
        self.options.extend(options);
        self
    }

    /// Runs every phase against `args`, the first of which is the program
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] from the first phase that fails.
    pub fn build<I, T>(self, args: I) -> Result<Invocation, BuildError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let reporter = Arc::clone(&self.reporter);
        reporter.build_starting();
        match self.compose(args) {
            Ok(invocation) => {
                if let Invocation::Run(node) = &invocation {
                    reporter.build_succeeded(node.options());
                }
                Ok(invocation)
            }
            Err(error) => {
                reporter.build_failed(&error);
                Err(error)
            }
        }
    }

    fn compose<I, T>(self, args: I) -> Result<Invocation, BuildError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let span = info_span!(target: BUILDER_TARGET, "node.compose", program = %self.name);
        let _entered = span.enter();

        let Registration {
            mut base,
            version,
            mut registry,
            namespace,
            callbacks,
            control,
        } = Registration::fold(self.options)?;
        debug!(
            target: BUILDER_TARGET,
            flags = namespace.flag_ids().len(),
            providers = ?registry.names(),
            callbacks = callbacks.len(),
            "options registered"
        );

        let command = Command::new(self.name)
            .disable_version_flag(true)
            .args(namespace.into_args())
            .subcommand(Command::new(VERSION_COMMAND).about("show the version of the program"))
            .subcommand(
                Command::new(PROVIDERS_COMMAND).about("show the list of supported providers"),
            );
        let matches = match command.try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(error) if error.kind() == ErrorKind::DisplayHelp => {
                return Ok(Invocation::Help(error.render().to_string()));
            }
            Err(source) => return Err(BuildError::Parse { source }),
        };
        let flags = ParsedFlags::new(matches);
        match flags.subcommand_name() {
            Some(VERSION_COMMAND) => return Ok(Invocation::Version(version)),
            Some(PROVIDERS_COMMAND) => return Ok(Invocation::Providers(registry.names())),
            _ => {}
        }
        base.apply_flags(&flags)
            .map_err(|source| BuildError::Flag { source })?;

        let context = PreRunContext {
            flags: &flags,
            options: &base,
            cancellation: &self.cancellation,
            telemetry: &self.telemetry,
        };
        for (index, callback) in callbacks.into_iter().enumerate() {
            callback(&context).map_err(|source| BuildError::PreRun { index, source })?;
        }
        debug!(target: BUILDER_TARGET, "pre-run callbacks completed");

        let factory = registry
            .resolve(&base.provider)
            .map_err(|source| BuildError::Registry { source })?;
        let provider = factory(&base.init_config()).map_err(|source| BuildError::Provider {
            name: base.provider.clone(),
            source,
        })?;
        let control = control.unwrap_or_else(|| Box::new(HeartbeatLoop::new()));
        Ok(Invocation::Run(Node::new(
            base,
            provider,
            self.telemetry,
            self.reporter,
            control,
        )))
    }
}
