//! Composition and lifecycle framework for virtual node agents.
//!
//! A node agent presents some local backend to an orchestrator as a
//! schedulable node. This crate assembles such a process from option units:
//! base node settings, flag sets contributed by the logging and tracing
//! adapters, pre-run callbacks, and named provider factories. The
//! [`NodeBuilder`] folds them into one [`Node`] in fixed phases
//! (registration, parse, pre-run, materialisation) and [`Node::run`] drives
//! the node until the shared [`Cancellation`] fires.
//!
//! Process-wide adapters are installed once by [`telemetry::install`] and
//! reached through the returned [`Telemetry`] handle, which the builder hands
//! to every pre-run callback.

pub mod builder;
pub mod cancel;
pub mod flags;
pub mod health;
pub mod identity;
pub mod node;
pub mod options;
pub mod opts;
pub mod provider;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use builder::{BuildError, Invocation, NodeBuilder, PreRunContext, VersionInfo};
pub use cancel::{Cancellation, SignalBinding, SignalError};
pub use flags::{FlagError, FlagNamespace, FlagSet, ParsedFlags};
pub use health::{LifecycleReporter, StructuredLifecycleReporter};
pub use identity::{EnvOverride, HostCommand, IdentityError, IdentitySource, StaticIdentity};
pub use node::{ControlLoop, HeartbeatLoop, Node, NodeError, NodeState, NodeView};
pub use options::{Opt, PreRunError, log_options, trace_options};
pub use opts::{BaseOptions, Taint};
pub use provider::{
    InitConfig, Provider, ProviderError, ProviderFactory, ProviderRegistry, RegistryError,
    ResourceManager,
};
pub use telemetry::{LogFormat, Telemetry, TelemetryError};

#[cfg(test)]
mod tests;
