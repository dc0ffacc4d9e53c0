//! Tracing initialization for siphon binaries and tests.

pub mod tracing;
