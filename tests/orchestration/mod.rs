//! Orchestration Integration Tests
//!
//! Tests for job lifecycle, dispatch scheduling, cancellation and sweeps.

pub mod bootstrap_test;
pub mod cancellation_test;
pub mod dispatch_test;
pub mod lifecycle_test;
pub mod sweep_test;
