//! `emucam-core`
//!
//! Core types and collaborator traits for the emulated camera request pipeline.
//!
//! This crate is the shared vocabulary between the request processor (the root
//! `emucam` crate) and the collaborators it drives. It defines stream and buffer
//! descriptors, the resolved buffer record handed to the sensor, notification
//! messages, opaque request settings, and the error type used across the
//! workspace.
//!
//! ## Collaborator Seams
//!
//! - [`SensorEngine`]: the sensor simulation that consumes resolved requests
//! - [`RequestState`]: turns opaque settings into [`SensorSettings`] and builds results
//! - [`BufferImporter`]: locks buffer memory and imports acquire fences
//! - [`AcquireFence`]: a waitable fence produced by the importer
//!
//! ## Key Types
//!
//! - [`SensorBuffer`]: self-describing, move-only record of one locked buffer
//! - [`PlaneLayout`]: flat or planar YCbCr memory layout
//! - [`NotifyMessage`]: asynchronous error and shutter notifications
//! - [`HalError`]: error taxonomy for every synchronous status

pub mod buffer;
pub mod capabilities;
pub mod error;
pub mod format;
pub mod metadata;
pub mod notify;
pub mod request;
pub mod stream;

pub use buffer::{
    BufferHandle, BufferLock, BufferStatus, Buffers, FenceHandle, FlatPlane, MappedRegion,
    PlaneLayout, Rect, SensorBuffer, StreamBuffer, YCbCrPlanes,
};
pub use capabilities::{AcquireFence, BufferImporter, RequestState, SensorEngine};
pub use error::{FenceError, HalError, HalResult};
pub use format::{align_to, DataSpace, PixelFormat};
pub use metadata::{CameraMetadata, MetadataEntry, RequestTemplate, SensorSettings};
pub use notify::{
    ErrorCode, ErrorMessage, MessageType, NotifyMessage, PipelineCallback, PipelineResult,
    ShutterMessage,
};
pub use request::{Pipeline, PipelineRequest};
pub use stream::{StreamDescriptor, UsageFlags};
