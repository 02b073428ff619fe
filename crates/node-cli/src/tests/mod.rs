//! Test suites for node composition and the lifecycle runner.

mod builder_behaviour;
mod support;
