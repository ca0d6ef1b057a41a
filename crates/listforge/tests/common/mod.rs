//! Shared test utilities for listforge integration tests.
//!
//! This module provides:
//! - `TestHarness` for runs against a temporary checkpoint database
//! - Scripted collaborators that count their calls and inject failures

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{fast_config, ids, TestHarness, WORKER_A, WORKER_B};
