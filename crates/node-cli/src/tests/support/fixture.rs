//! Composition harness: detached telemetry, recording doubles, and a
//! builder preloaded with the standard option units.

use std::sync::Arc;

use rstest::fixture;
use tracing::Subscriber;

use crate::builder::{BuildError, Invocation, NodeBuilder};
use crate::cancel::Cancellation;
use crate::health::LifecycleReporter;
use crate::options::Opt;
use crate::telemetry::{LogFormat, Telemetry, build_subscriber};
use crate::test_support::{CallbackLog, RecordingLifecycleReporter, RecordingProvider};

/// Program name passed as the first argument.
pub const PROGRAM: &str = "virtual-kubelet";

/// Collaborators shared by one composition scenario.
pub struct Harness {
    _subscriber: Box<dyn Subscriber + Send + Sync>,
    pub telemetry: Telemetry,
    pub cancellation: Cancellation,
    pub reporter: Arc<RecordingLifecycleReporter>,
    pub provider: RecordingProvider,
    pub callbacks: CallbackLog,
}

impl Harness {
    /// Builder wired to this harness, with the provider registered as `mock`.
    pub fn builder(&self) -> NodeBuilder {
        NodeBuilder::new(PROGRAM, self.cancellation.clone(), self.telemetry.clone())
            .with_reporter(Arc::clone(&self.reporter) as Arc<dyn LifecycleReporter>)
            .option(Opt::base_with(|options| {
                options.provider = String::from("mock");
            }))
            .option(Opt::provider("mock", self.provider.factory()))
    }

    /// Builds `options` on top of [`Harness::builder`] against `args`.
    pub fn build(&self, options: Vec<Opt>, args: &[&str]) -> Result<Invocation, BuildError> {
        let mut argv = vec![PROGRAM];
        argv.extend_from_slice(args);
        self.builder().options(options).build(argv)
    }
}

#[fixture]
pub fn harness() -> Harness {
    let (subscriber, telemetry) = build_subscriber(LogFormat::Compact);
    Harness {
        _subscriber: subscriber,
        telemetry,
        cancellation: Cancellation::new(),
        reporter: Arc::new(RecordingLifecycleReporter::default()),
        provider: RecordingProvider::default(),
        callbacks: CallbackLog::default(),
    }
}
