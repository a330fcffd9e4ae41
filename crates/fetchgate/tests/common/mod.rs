//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;
pub mod helpers;

#[allow(unused_imports)]
pub use fixtures::FakeExtractor;
#[allow(unused_imports)]
pub use helpers::{body_text, json_request, send};
