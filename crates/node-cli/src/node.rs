//! Node lifecycle runner.
//!
//! A [`Node`] is produced once by the builder and consumed by [`Node::run`],
//! which drives the control loop until the cancellation context fires or the
//! loop fails. Consuming the node on run means a stopped node cannot be
//! resumed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use strum::Display;
use thiserror::Error;
use tracing::{debug, info_span};

use crate::cancel::Cancellation;
use crate::health::LifecycleReporter;
use crate::opts::BaseOptions;
use crate::provider::{Provider, ProviderError};
use crate::telemetry::Telemetry;

const NODE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::node");

/// Lifecycle state of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum NodeState {
    /// Built but not yet running.
    Created,
    /// Inside the control loop.
    Running,
    /// Returned after cancellation.
    Stopped,
    /// Returned with an error.
    Failed,
}

/// Errors raised while the node runs.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The provider stopped answering health checks.
    #[error("provider '{provider}' failed its health check: {source}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Provider failure.
        #[source]
        source: ProviderError,
    },
    /// The control loop failed for a reason of its own.
    #[error("control loop failed: {message}")]
    ControlLoop {
        /// Description of the failure.
        message: String,
    },
}

/// Read-only view of a node handed to its control loop.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    options: &'a BaseOptions,
    provider: &'a dyn Provider,
    telemetry: &'a Telemetry,
}

impl<'a> NodeView<'a> {
    /// Resolved base options.
    #[must_use]
    pub const fn options(&self) -> &'a BaseOptions {
        self.options
    }

    /// The materialised provider.
    #[must_use]
    pub const fn provider(&self) -> &'a dyn Provider {
        self.provider
    }

    /// Handles onto the process-wide logger and tracer.
    #[must_use]
    pub const fn telemetry(&self) -> &'a Telemetry {
        self.telemetry
    }
}

/// Long-lived loop driving the node once it is running.
pub trait ControlLoop: Send {
    /// Runs until `cancellation` fires, returning `Ok(())`, or until an
    /// unrecoverable error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] when the loop cannot continue.
    fn run(&self, node: &NodeView<'_>, cancellation: &Cancellation) -> Result<(), NodeError>;
}

/// Default control loop: checks the provider once per status interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatLoop {
    interval: Option<Duration>,
}

impl HeartbeatLoop {
    /// Loop pinging at the node's configured status interval.
    #[must_use]
    pub const fn new() -> Self {
        Self { interval: None }
    }

    /// Loop pinging every `interval`, ignoring the configured one.
    #[must_use]
    pub const fn with_interval(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
        }
    }
}

impl ControlLoop for HeartbeatLoop {
    fn run(&self, node: &NodeView<'_>, cancellation: &Cancellation) -> Result<(), NodeError> {
        let interval = self.interval.unwrap_or(node.options().status_interval);
        while !cancellation.is_cancelled() {
            node.provider()
                .ping()
                .map_err(|source| NodeError::Provider {
                    provider: node.options().provider.clone(),
                    source,
                })?;
            debug!(target: NODE_TARGET, node = %node.options().node_name, "provider heartbeat ok");
            if cancellation.wait_timeout(interval) {
                break;
            }
        }
        Ok(())
    }
}

/// Fully composed node.
pub struct Node {
    options: BaseOptions,
    provider: Arc<dyn Provider>,
    telemetry: Telemetry,
    reporter: Arc<dyn LifecycleReporter>,
    control: Box<dyn ControlLoop>,
    state: NodeState,
}

impl fmt::Debug for Node {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Node")
            .field("options", &self.options)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub(crate) fn new(
        options: BaseOptions,
        provider: Arc<dyn Provider>,
        telemetry: Telemetry,
        reporter: Arc<dyn LifecycleReporter>,
        control: Box<dyn ControlLoop>,
    ) -> Self {
        Self {
            options,
            provider,
            telemetry,
            reporter,
            control,
            state: NodeState::Created,
        }
    }

    /// Resolved base options, frozen once the node exists.
    #[must_use]
    pub const fn options(&self) -> &BaseOptions {
        &self.options
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    /// Handles onto the process-wide logger and tracer.
    #[must_use]
    pub const fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Runs the control loop until `cancellation` fires or the loop fails.
    ///
    /// The provider is shut down on both exits.
    ///
    /// # Errors
    ///
    /// Returns the control loop's [`NodeError`] unchanged.
    pub fn run(mut self, cancellation: &Cancellation) -> Result<(), NodeError> {
        let span = info_span!(target: NODE_TARGET, "node.run", node = %self.options.node_name);
        let _entered = span.enter();

        self.state = NodeState::Running;
        self.reporter.node_running(&self.options);
        let view = NodeView {
            options: &self.options,
            provider: self.provider.as_ref(),
            telemetry: &self.telemetry,
        };
        let result = self.control.run(&view, cancellation);
        self.provider.shutdown();

        match result {
            Ok(()) => {
                self.state = NodeState::Stopped;
                self.reporter.node_stopped(&self.options);
                Ok(())
            }
            Err(error) => {
                self.state = NodeState::Failed;
                self.reporter.node_failed(&self.options, &error);
                Err(error)
            }
        }
    }
}
