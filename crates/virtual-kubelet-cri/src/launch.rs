//! Launch sequencing for the CRI node agent.
//!
//! The sequence is fixed: bind cancellation to termination signals, install
//! the process logger, resolve the node identity, fold the base options and
//! backend flag sets into the builder, then run the composed node.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use node_cli::identity::IdentitySource;
use node_cli::telemetry::{self, LogConfig, LogLevel, TraceConfig, agent};
use node_cli::{
    BaseOptions, BuildError, Cancellation, EnvOverride, HostCommand, IdentityError, Invocation,
    LifecycleReporter, LogFormat, NodeBuilder, NodeError, Opt, ProviderFactory, SignalError,
    StructuredLifecycleReporter, Telemetry, TelemetryError, log_options, trace_options,
};
use thiserror::Error;
use tracing::{error, info};

use crate::provider::{self, PROVIDER_NAME};

/// Orchestrator release the node reports compatibility with.
pub const K8S_VERSION: &str = "v1.15.2";
/// Build version stamped at compile time through `VK_BUILD_VERSION`.
pub const BUILD_VERSION: &str = match option_env!("VK_BUILD_VERSION") {
    Some(version) => version,
    None => "N/A",
};
/// Build timestamp stamped at compile time through `VK_BUILD_TIME`.
pub const BUILD_TIME: &str = match option_env!("VK_BUILD_TIME") {
    Some(time) => time,
    None => "N/A",
};
/// Program name shown in help output.
pub const PROGRAM: &str = "virtual-kubelet";

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Version string the node advertises.
#[must_use]
pub fn node_version() -> String {
    [K8S_VERSION, "vk-cri", BUILD_VERSION].join("-")
}

/// Errors surfaced while launching or running the node agent.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Termination signals could not be bound.
    #[error("failed to bind termination signals: {0}")]
    Signals(#[from] SignalError),
    /// The process logger could not be installed.
    #[error("failed to install telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    /// The node identity could not be resolved.
    #[error("failed to resolve node identity: {0}")]
    Identity(#[from] IdentityError),
    /// Composition failed.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// The node failed while running.
    #[error("node failed: {0}")]
    Node(#[from] NodeError),
    /// Informational output could not be written.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl LaunchError {
    /// Returns `true` when the failure happened before the logger existed.
    #[must_use]
    pub const fn precedes_logging(&self) -> bool {
        matches!(self, Self::Signals(_) | Self::Telemetry(_))
    }

    /// Returns `true` when the lifecycle reporter already recorded the
    /// failure.
    #[must_use]
    pub const fn reported_by_lifecycle(&self) -> bool {
        matches!(self, Self::Build(_) | Self::Node(_))
    }
}

/// Collaborators required to launch the node agent.
pub struct LaunchPlan<I, T> {
    /// Source of the node name.
    pub identity: I,
    /// Installs the process logger and returns its handles.
    pub telemetry: T,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn LifecycleReporter>,
    /// Factory registered under the `cri` provider name.
    pub provider: ProviderFactory,
    /// Available trace exporters.
    pub exporters: TraceConfig,
    /// Process cancellation context.
    pub cancellation: Cancellation,
    /// Binds `cancellation` to termination signals when set.
    pub bind_signals: bool,
}

/// Production plan: host identity with the environment override, the global
/// subscriber, the CRI provider, and the agent exporter.
#[must_use]
pub fn system_plan() -> LaunchPlan<
    EnvOverride<HostCommand>,
    impl FnOnce() -> Result<Telemetry, TelemetryError>,
> {
    LaunchPlan {
        identity: EnvOverride::node_name(HostCommand::local_host_name()),
        telemetry: || telemetry::install(LogFormat::detect()),
        reporter: Arc::new(StructuredLifecycleReporter::new()),
        provider: provider::factory(),
        exporters: TraceConfig::new().with_exporter(agent::AGENT_EXPORTER, agent::exporter_init()),
        cancellation: Cancellation::new(),
        bind_signals: true,
    }
}

/// Runs the node agent with production collaborators, writing informational
/// output to `stdout` and pre-logging failures to `stderr`.
pub fn run<A, S, W, E>(args: A, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    A: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
    W: Write,
    E: Write,
{
    run_plan(system_plan(), args, stdout, stderr)
}

/// Runs `plan` and maps the outcome to the process exit code.
///
/// Every failure surfaces exactly once: on `stderr` when the logger does not
/// exist yet, through the lifecycle reporter for composition and run
/// failures, and as one error event otherwise.
pub fn run_plan<I, T, A, S, W, E>(
    plan: LaunchPlan<I, T>,
    args: A,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode
where
    I: IdentitySource,
    T: FnOnce() -> Result<Telemetry, TelemetryError>,
    A: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
    W: Write,
    E: Write,
{
    let Err(launch_error) = run_with(plan, args, stdout) else {
        return ExitCode::SUCCESS;
    };
    if launch_error.precedes_logging() {
        writeln!(stderr, "{PROGRAM}: {launch_error}").ok();
    } else if !launch_error.reported_by_lifecycle() {
        error!(target: PROCESS_TARGET, error = %launch_error, "virtual-kubelet failed");
    }
    ExitCode::FAILURE
}

/// Runs the node agent with injected collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] from the first step that fails.
pub fn run_with<I, T, A, S, W>(
    plan: LaunchPlan<I, T>,
    args: A,
    stdout: &mut W,
) -> Result<(), LaunchError>
where
    I: IdentitySource,
    T: FnOnce() -> Result<Telemetry, TelemetryError>,
    A: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
    W: Write,
{
    let LaunchPlan {
        identity,
        telemetry,
        reporter,
        provider,
        exporters,
        cancellation,
        bind_signals,
    } = plan;

    let _signals = if bind_signals {
        Some(cancellation.bind_to_signals()?)
    } else {
        None
    };
    let handles = telemetry()?;
    info!(target: PROCESS_TARGET, version = %node_version(), "starting virtual-kubelet");

    let node_name = identity.resolve()?;
    let base = BaseOptions {
        provider: PROVIDER_NAME.to_owned(),
        version: node_version(),
        node_name,
        disable_taint: true,
        ..BaseOptions::default()
    };

    let trace = handles.trace().clone();
    let invocation = NodeBuilder::new(PROGRAM, cancellation.clone(), handles)
        .with_reporter(reporter)
        .option(Opt::base(base))
        .option(Opt::cli_version(BUILD_VERSION, BUILD_TIME))
        .option(Opt::provider(PROVIDER_NAME, provider))
        .options(log_options(LogConfig::new(LogLevel::Info)))
        .options(trace_options(exporters))
        .build(args)?;

    match invocation {
        Invocation::Run(node) => {
            let outcome = node.run(&cancellation);
            trace.flush();
            outcome?;
            info!(target: PROCESS_TARGET, "virtual-kubelet stopped");
        }
        Invocation::Help(text) => write!(stdout, "{text}")?,
        Invocation::Version(version) => writeln!(stdout, "{version}")?,
        Invocation::Providers(names) => {
            for name in names {
                writeln!(stdout, "{name}")?;
            }
        }
    }
    Ok(())
}
