//! Integration tests module
//!
//! End-to-end tests for the harvest engine, including:
//! - Fetch pipeline narrowing and adaptive throttling
//! - Job admission, orchestration and periodic-job cancellation
//! - HTTP error scenarios against a mock report source

pub mod error_scenarios;
pub mod fixtures;
pub mod orchestrator_test;
pub mod pipeline_test;
