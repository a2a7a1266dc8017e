//! Shared test utilities for mediaqueue integration tests.
//!
//! This module provides:
//! - `TestHarness` with a temp-file database, a manual clock and a wired engine
//! - `ConfigBuilder` for creating test configurations programmatically

pub mod builders;
pub mod harness;

#[allow(unused_imports)]
pub use builders::*;
#[allow(unused_imports)]
pub use harness::TestHarness;
