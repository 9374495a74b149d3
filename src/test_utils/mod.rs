//! Test utilities for use case and HTTP testing.
//!
//! This module provides:
//! - Test data factories for creating valid test fixtures
//! - An in-memory billing processor that behaves like the real one
//! - In-memory profile store, webhook event log and a manual clock
//! - A builder for `AppState` wired to the in-memory doubles

mod app_state_builder;
mod billing_mocks;
mod factories;
mod profile_mocks;

pub use app_state_builder::*;
pub use billing_mocks::*;
pub use factories::*;
pub use profile_mocks::*;
