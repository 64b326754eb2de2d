//! Testing utilities for code built on meetflow.
//!
//! This module provides:
//! - A scripted summary worker and an in-memory result store
//! - A recorder for summary updates
//! - A flaky operation for exercising retries
//! - Fixtures wiring a poller to the fakes

mod fakes;
mod fixtures;

pub use fakes::{FlakyOperation, InMemoryResultStore, ScriptedWorker, UpdateRecorder};
pub use fixtures::{fast_poller_options, test_model, test_request, PollerFixture};
