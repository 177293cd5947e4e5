//! # emucam
//!
//! Request processor of an emulated camera. Capture requests come in from a
//! client, their buffers are resolved into directly writable memory, and the
//! resolved requests are fed to a simulated sensor one per vsync.
//!
//! ## Crate Structure
//!
//! - **`processor`**: the [`RequestProcessor`], with its bounded submission
//!   queue, worker thread and flush.
//! - **`resolver`**: per-buffer resolution (stream lookup, stride and size
//!   per pixel format, memory lock, fence import).
//! - **`fence`**: bounded waits on acquire fences before the sensor writes.
//! - **`config`**: layered configuration (defaults, TOML file, `EMUCAM_*`
//!   environment) loaded with figment.
//! - **`tracing_setup`**: `tracing-subscriber` initialization.
//!
//! Shared types and collaborator traits live in `emucam-core`; simulated
//! collaborators in `emucam-driver-mock`.

pub mod config;
pub mod fence;
pub mod processor;
pub mod resolver;
pub mod tracing_setup;

pub use config::{ConfigError, EmucamConfig, ProcessorConfig};
pub use fence::acquire_buffers;
pub use processor::RequestProcessor;
pub use resolver::{buffer_size_and_stride, BufferResolver, FlatGeometry};
