//! Shared fixture for the composition suites.

mod fixture;

pub use fixture::{Harness, PROGRAM, harness};
