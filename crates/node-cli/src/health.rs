//! Structured reporting for composition and node lifecycle events.

use std::sync::Arc;

use crate::builder::BuildError;
use crate::node::NodeError;
use crate::opts::BaseOptions;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before the first option is folded into the builder.
    fn build_starting(&self);

    /// Invoked once the node has been materialised.
    fn build_succeeded(&self, options: &BaseOptions);

    /// Invoked when composition fails.
    fn build_failed(&self, error: &BuildError);

    /// Invoked when the node enters its control loop.
    fn node_running(&self, options: &BaseOptions);

    /// Invoked after the control loop returned because of cancellation.
    fn node_stopped(&self, options: &BaseOptions);

    /// Invoked when the control loop returned an error.
    fn node_failed(&self, options: &BaseOptions, error: &NodeError);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter + ?Sized,
{
    fn build_starting(&self) {
        (**self).build_starting();
    }

    fn build_succeeded(&self, options: &BaseOptions) {
        (**self).build_succeeded(options);
    }

    fn build_failed(&self, error: &BuildError) {
        (**self).build_failed(error);
    }

    fn node_running(&self, options: &BaseOptions) {
        (**self).node_running(options);
    }

    fn node_stopped(&self, options: &BaseOptions) {
        (**self).node_stopped(options);
    }

    fn node_failed(&self, options: &BaseOptions, error: &NodeError) {
        (**self).node_failed(options, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn build_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "build_starting",
            "composing node"
        );
    }

    fn build_succeeded(&self, options: &BaseOptions) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "build_succeeded",
            node = %options.node_name,
            provider = %options.provider,
            version = %options.version,
            "node composed"
        );
    }

    fn build_failed(&self, error: &BuildError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "build_failed",
            error = %error,
            "node composition failed"
        );
    }

    fn node_running(&self, options: &BaseOptions) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "node_running",
            node = %options.node_name,
            provider = %options.provider,
            status_interval_secs = options.status_interval.as_secs(),
            "node running"
        );
    }

    fn node_stopped(&self, options: &BaseOptions) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "node_stopped",
            node = %options.node_name,
            "node stopped"
        );
    }

    fn node_failed(&self, options: &BaseOptions, error: &NodeError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "node_failed",
            node = %options.node_name,
            error = %error,
            "node failed"
        );
    }
}
