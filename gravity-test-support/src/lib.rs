//! Shared test utilities used across gravity crates.
//!
//! [`tracing`] captures spans and events for instrumentation assertions and
//! [`stub`] drives the `stub_engine` binary, a stand-in for the clustering
//! engine that speaks its argument and output protocol.

pub mod stub;
pub mod tracing;
