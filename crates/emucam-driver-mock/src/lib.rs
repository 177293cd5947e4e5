//! Simulated collaborators for the emulated camera request processor.
//!
//! This crate provides stand-ins for everything the processor reaches through
//! a capability trait, so the pipeline can run without a real sensor or a
//! graphics allocator.
//!
//! # Available Mocks
//!
//! - [`MockSensor`] - vsync-paced sensor engine that fills buffers with a test pattern
//! - [`MockRequestState`] - settings interpretation with default templates and fake AE
//! - [`MockImporter`] - host-memory buffer importer with controllable fences
//! - [`MockFence`] - acquire fence a test can signal, fail or leave pending
//!
//! # Error Injection
//!
//! [`MockImporter`] and [`MockSensor`] accept an [`ErrorConfig`], which fails
//! named operations deterministically or at a seeded random rate:
//!
//! ```rust,ignore
//! use emucam_driver_mock::{ErrorConfig, ErrorScenario, MockImporter};
//!
//! let importer = MockImporter::with_errors(ErrorConfig::scenario(
//!     ErrorScenario::FailOnNth { operation: "lock", n: 2 },
//! ));
//! ```

pub mod common;
mod mock_fence;
mod mock_importer;
mod mock_request_state;
mod mock_sensor;
pub mod pattern;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario};

// Re-export collaborator types
pub use mock_fence::MockFence;
pub use mock_importer::MockImporter;
pub use mock_request_state::{
    default_characteristics, MockRequestState, EXPOSURE_TIME_RANGE_NS, MAX_FRAME_DURATION_NS,
    MIN_FRAME_DURATION_NS, SENSITIVITY_RANGE,
};
pub use mock_sensor::{DispatchRecord, MockSensor, MockSensorBuilder, DEFAULT_FRAME_INTERVAL};
