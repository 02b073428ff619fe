//! Virtual node agent presenting a local CRI container runtime to the
//! orchestrator.
//!
//! The binary wires the [`node_cli`] framework in a fixed order: termination
//! signals, the process logger, the host identity, then composition of the
//! base options, the `cri` provider, and the logging and tracing flag sets.
//! See [`run_with`] for the injectable form used by tests.

mod launch;
pub mod provider;

pub use launch::{
    BUILD_TIME, BUILD_VERSION, K8S_VERSION, LaunchError, LaunchPlan, PROGRAM, node_version, run,
    run_plan, run_with, system_plan,
};
pub use provider::{CriProvider, PROVIDER_NAME};

#[cfg(test)]
mod tests;
