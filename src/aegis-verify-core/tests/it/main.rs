//! Integration tests for aegis-verify-core.
//!
//! Kept in one test binary so the async and proptest suites share a
//! single build and run.

mod monitor;
mod registry;
mod support;
