//! Recording doubles for composition and lifecycle tests.
//!
//! Available to this crate's tests and, through the `test-support` feature,
//! to downstream crates exercising their own launch sequences.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::builder::BuildError;
use crate::health::LifecycleReporter;
use crate::node::NodeError;
use crate::options::Opt;
use crate::opts::BaseOptions;
use crate::provider::{InitConfig, Provider, ProviderError, ProviderFactory};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle events tracked by [`RecordingLifecycleReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Composition started.
    BuildStarting,
    /// Composition produced a node for the named provider.
    BuildSucceeded {
        /// Node name.
        node: String,
        /// Provider name.
        provider: String,
    },
    /// Composition failed with an error description.
    BuildFailed(String),
    /// The node entered its control loop.
    NodeRunning,
    /// The node stopped after cancellation.
    NodeStopped,
    /// The node failed with an error description.
    NodeFailed(String),
}

/// Records lifecycle events for assertions.
#[derive(Debug, Default)]
pub struct RecordingLifecycleReporter {
    events: Mutex<Vec<LifecycleEvent>>,
    built: Mutex<Vec<BaseOptions>>,
}

impl RecordingLifecycleReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.events).clone()
    }

    /// Resolved options of every node that composed successfully.
    #[must_use]
    pub fn built_options(&self) -> Vec<BaseOptions> {
        lock(&self.built).clone()
    }

    fn record(&self, event: LifecycleEvent) {
        lock(&self.events).push(event);
    }
}

impl LifecycleReporter for RecordingLifecycleReporter {
    fn build_starting(&self) {
        self.record(LifecycleEvent::BuildStarting);
    }

    fn build_succeeded(&self, options: &BaseOptions) {
        lock(&self.built).push(options.clone());
        self.record(LifecycleEvent::BuildSucceeded {
            node: options.node_name.clone(),
            provider: options.provider.clone(),
        });
    }

    fn build_failed(&self, error: &BuildError) {
        self.record(LifecycleEvent::BuildFailed(error.to_string()));
    }

    fn node_running(&self, _options: &BaseOptions) {
        self.record(LifecycleEvent::NodeRunning);
    }

    fn node_stopped(&self, _options: &BaseOptions) {
        self.record(LifecycleEvent::NodeStopped);
    }

    fn node_failed(&self, _options: &BaseOptions, error: &NodeError) {
        self.record(LifecycleEvent::NodeFailed(error.to_string()));
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    factory_calls: Vec<InitConfig>,
    factory_failure: Option<String>,
    ping_failure: Option<String>,
    pings: usize,
    shutdowns: usize,
}

/// Provider double recording factory calls, pings, and shutdowns, with
/// injectable failures.
#[derive(Debug, Clone, Default)]
pub struct RecordingProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl RecordingProvider {
    /// Makes the factory fail with `message`.
    pub fn fail_factory(&self, message: impl Into<String>) {
        lock(&self.state).factory_failure = Some(message.into());
    }

    /// Makes every ping fail with `message`.
    pub fn fail_pings(&self, message: impl Into<String>) {
        lock(&self.state).ping_failure = Some(message.into());
    }

    /// Init configurations the factory was invoked with.
    #[must_use]
    pub fn factory_calls(&self) -> Vec<InitConfig> {
        lock(&self.state).factory_calls.clone()
    }

    /// Number of pings served.
    #[must_use]
    pub fn pings(&self) -> usize {
        lock(&self.state).pings
    }

    /// Number of shutdown calls.
    #[must_use]
    pub fn shutdowns(&self) -> usize {
        lock(&self.state).shutdowns
    }

    /// Factory materialising this double.
    #[must_use]
    pub fn factory(&self) -> ProviderFactory {
        let provider = self.clone();
        Box::new(move |config| {
            let failure = {
                let mut state = lock(&provider.state);
                state.factory_calls.push(config.clone());
                state.factory_failure.clone()
            };
            failure.map_or_else(
                || Ok(Arc::new(provider) as Arc<dyn Provider>),
                |message| Err(ProviderError::new(message)),
            )
        })
    }
}

impl Provider for RecordingProvider {
    fn ping(&self) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.pings += 1;
        state
            .ping_failure
            .clone()
            .map_or(Ok(()), |message| Err(ProviderError::new(message)))
    }

    fn shutdown(&self) {
        lock(&self.state).shutdowns += 1;
    }
}

/// Log of completed pre-run callbacks, by registration index.
#[derive(Debug, Clone, Default)]
pub struct CallbackLog {
    calls: Arc<Mutex<Vec<usize>>>,
}

impl CallbackLog {
    /// Indices of the callbacks that completed, in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<usize> {
        lock(&self.calls).clone()
    }

    /// Pre-run option recording `index` and succeeding.
    #[must_use]
    pub fn succeeding(&self, index: usize) -> Opt {
        let calls = Arc::clone(&self.calls);
        Opt::pre_run(move |_context| {
            lock(&calls).push(index);
            Ok(())
        })
    }

    /// Pre-run option failing with `message` before it records anything, so
    /// the log holds only the callbacks that completed.
    #[must_use]
    pub fn failing(&self, message: &str) -> Opt {
        let reason = message.to_owned();
        Opt::pre_run(move |_context| Err(reason.into()))
    }
}
