//! Test helpers: scripted source drivers and DDL compilers.
//!
//! Available to integration tests and downstream crates through the `test-utils`
//! feature.

pub mod scripted;
