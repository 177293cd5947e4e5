//! Shared plumbing for the mock collaborators.

pub mod errors;

pub use errors::{ErrorConfig, ErrorScenario};
