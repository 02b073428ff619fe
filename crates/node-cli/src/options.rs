//! Option units folded into the builder.
//!
//! Each [`Opt`] is one tagged contribution: replacing or adjusting the base
//! options, naming the CLI version, registering a provider, contributing a
//! flag set, queuing a pre-run callback, or replacing the control loop. The
//! builder applies them in order in fixed phases.

use std::error::Error;
use std::fmt;

use crate::builder::PreRunContext;
use crate::flags::FlagSet;
use crate::node::ControlLoop;
use crate::opts::BaseOptions;
use crate::provider::ProviderFactory;
use crate::telemetry::{LogConfig, TraceConfig};

/// Error returned by a pre-run callback.
pub type PreRunError = Box<dyn Error + Send + Sync>;

/// Callback run once after flags are parsed and before the provider is built.
pub type PreRunCallback = Box<dyn FnOnce(&PreRunContext<'_>) -> Result<(), PreRunError> + Send>;

/// In-place adjustment of the base options.
pub type BaseMutator = Box<dyn FnOnce(&mut BaseOptions) + Send>;

/// A single unit of node composition.
pub enum Opt {
    /// Replaces the base options wholesale.
    Base(BaseOptions),
    /// Adjusts the base options in place.
    BaseWith(BaseMutator),
    /// Version strings reported by the `version` subcommand.
    CliVersion {
        /// Release version.
        version: String,
        /// Build timestamp.
        build_time: String,
    },
    /// Registers a provider factory under a name.
    Provider {
        /// Name the factory is selected by.
        name: String,
        /// Factory materialising the provider.
        factory: ProviderFactory,
    },
    /// Contributes a flag set to the shared namespace.
    PersistentFlags(FlagSet),
    /// Queues a pre-run callback.
    PreRun(PreRunCallback),
    /// Replaces the node's control loop.
    ControlLoop(Box<dyn ControlLoop>),
}

impl fmt::Debug for Opt {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base(options) => formatter.debug_tuple("Base").field(options).finish(),
            Self::BaseWith(_) => formatter.write_str("BaseWith"),
            Self::CliVersion {
                version,
                build_time,
            } => formatter
                .debug_struct("CliVersion")
                .field("version", version)
                .field("build_time", build_time)
                .finish(),
            Self::Provider { name, .. } => formatter
                .debug_struct("Provider")
                .field("name", name)
                .finish_non_exhaustive(),
            Self::PersistentFlags(set) => formatter
                .debug_tuple("PersistentFlags")
                .field(&set.name())
                .finish(),
            Self::PreRun(_) => formatter.write_str("PreRun"),
            Self::ControlLoop(_) => formatter.write_str("ControlLoop"),
        }
    }
}

impl Opt {
    /// Replaces the base options.
    #[must_use]
    pub const fn base(options: BaseOptions) -> Self {
        Self::Base(options)
    }

    /// Adjusts the base options in place.
    #[must_use]
    pub fn base_with<F>(mutate: F) -> Self
    where
        F: FnOnce(&mut BaseOptions) + Send + 'static,
    {
        Self::BaseWith(Box::new(mutate))
    }

    /// Sets the version strings reported by the `version` subcommand.
    #[must_use]
    pub fn cli_version(version: impl Into<String>, build_time: impl Into<String>) -> Self {
        Self::CliVersion {
            version: version.into(),
            build_time: build_time.into(),
        }
    }

    /// Registers `factory` under `name`.
    #[must_use]
    pub fn provider(name: impl Into<String>, factory: ProviderFactory) -> Self {
        Self::Provider {
            name: name.into(),
            factory,
        }
    }

    /// Contributes `set` to the shared flag namespace.
    #[must_use]
    pub const fn persistent_flags(set: FlagSet) -> Self {
        Self::PersistentFlags(set)
    }

    /// Queues `callback` to run after flag parsing.
    #[must_use]
    pub fn pre_run<F>(callback: F) -> Self
    where
        F: FnOnce(&PreRunContext<'_>) -> Result<(), PreRunError> + Send + 'static,
    {
        Self::PreRun(Box::new(callback))
    }

    /// Replaces the default control loop.
    #[must_use]
    pub fn control_loop(control: impl ControlLoop + 'static) -> Self {
        Self::ControlLoop(Box::new(control))
    }
}

/// The logging flag set followed by the pre-run step applying it.
#[must_use]
pub fn log_options(config: LogConfig) -> [Opt; 2] {
    [
        Opt::persistent_flags(config.flag_set()),
        Opt::pre_run(move |context| {
            config.configure(context.flags, context.telemetry.log())?;
            Ok(())
        }),
    ]
}

/// The tracing flag set followed by the pre-run step installing the
/// selected exporters.
#[must_use]
pub fn trace_options(config: TraceConfig) -> [Opt; 2] {
    let flags = config.flag_set();
    [
        Opt::persistent_flags(flags),
        Opt::pre_run(move |context| {
            config.configure_from(context)?;
            Ok(())
        }),
    ]
}
