//! Test suites for the CRI node agent launch sequence.

mod provider_behaviour;
