//! Collaborator capabilities
//!
//! The request processor owns queueing, buffer resolution and dispatch.
//! Everything around it is reached through one of these traits:
//!
//! - [`SensorEngine`]: consumes resolved requests and paces dispatch with vsync
//! - [`RequestState`]: interprets opaque settings and builds results
//! - [`BufferImporter`]: locks buffer memory and imports acquire fences
//! - [`AcquireFence`]: waits for a producer to release a buffer
//!
//! All traits are synchronous. The processor calls them from its dedicated
//! worker thread or from the submitting thread while holding its queue lock,
//! so implementations should not call back into the processor.

use crate::buffer::{BufferHandle, Buffers, FenceHandle, MappedRegion, Rect, YCbCrPlanes};
use crate::error::{FenceError, HalResult};
use crate::metadata::{CameraMetadata, RequestTemplate, SensorSettings};
use crate::notify::PipelineResult;
use crate::stream::UsageFlags;
use std::fmt;
use std::time::Duration;

/// Sensor simulation engine.
pub trait SensorEngine: Send + Sync {
    /// Hand over one resolved request. Ownership of every buffer moves to the
    /// sensor, which is responsible for completing them.
    fn set_current_request(
        &self,
        settings: SensorSettings,
        result: PipelineResult,
        input_buffers: Buffers,
        output_buffers: Buffers,
    );

    /// Abandon any in-flight request.
    fn flush(&self) -> HalResult<()>;

    /// Stop the sensor.
    fn shut_down(&self) -> HalResult<()>;

    /// Block until the next vertical sync or until `timeout` elapses.
    ///
    /// Returns true if a vsync was observed.
    fn wait_for_vsync(&self, timeout: Duration) -> bool;
}

/// Settings interpretation and default templates.
pub trait RequestState: Send {
    /// One-time setup from the camera's static characteristics.
    fn initialize(&mut self, static_characteristics: CameraMetadata) -> HalResult<()>;

    /// Derive sensor parameters from request settings.
    fn initialize_sensor_settings(&mut self, settings: CameraMetadata)
        -> HalResult<SensorSettings>;

    /// Result skeleton for a frame that is about to be dispatched.
    fn initialize_result(&mut self, pipeline_id: u32, frame_number: u32) -> PipelineResult;

    /// Default settings for `template`.
    fn get_default_request(&self, template: RequestTemplate) -> HalResult<CameraMetadata>;
}

/// Low-level buffer memory and fence access.
///
/// Each call may fail independently for a single buffer.
pub trait BufferImporter: Send + Sync {
    /// Lock the first `size` bytes of `buffer` for CPU access.
    fn lock(&self, buffer: &BufferHandle, usage: UsageFlags, size: u32) -> HalResult<MappedRegion>;

    /// Lock `region` of a planar YCbCr 4:2:0 buffer.
    fn lock_ycbcr(
        &self,
        buffer: &BufferHandle,
        usage: UsageFlags,
        region: Rect,
    ) -> HalResult<YCbCrPlanes>;

    /// Release a lock taken by `lock` or `lock_ycbcr`.
    fn unlock(&self, buffer: &BufferHandle);

    /// Turn a fence handle into a waitable fence.
    fn import_fence(&self, fence: &FenceHandle) -> HalResult<Box<dyn AcquireFence>>;
}

/// An imported acquire fence.
pub trait AcquireFence: Send + fmt::Debug {
    /// Wait until the fence signals, at most `timeout`.
    fn wait(&self, timeout: Duration) -> Result<(), FenceError>;
}
