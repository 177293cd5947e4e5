//! Buffer handles and resolved buffer records.
//!
//! A caller submits [`StreamBuffer`]s: opaque handles plus an optional acquire
//! fence. The processor resolves each of them into a [`SensorBuffer`], which
//! carries everything the sensor needs to write the frame without looking
//! anything up: dimensions, format, a locked memory layout and the pipeline's
//! callback.
//!
//! # Ownership
//!
//! `SensorBuffer` is move-only. It is owned by the pending request until the
//! worker hands it to the sensor, which then owns it until it completes the
//! frame. Dropping a record releases its memory lock through [`BufferLock`].

use crate::capabilities::{AcquireFence, BufferImporter};
use crate::format::{DataSpace, PixelFormat};
use crate::notify::PipelineCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Opaque handle to buffer memory owned by the memory importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferHandle(pub u64);

/// Opaque handle to an acquire fence, importable into an [`AcquireFence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FenceHandle(pub u64);

/// Completion status of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferStatus {
    /// The buffer holds valid frame data.
    Ok,
    /// The buffer contents must not be used.
    #[default]
    Error,
}

/// A buffer as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    /// Stream this buffer belongs to.
    pub stream_id: u32,
    /// Caller-assigned buffer id.
    pub buffer_id: u64,
    /// Memory handle.
    pub buffer: BufferHandle,
    /// Fence that must signal before the memory may be touched.
    pub acquire_fence: Option<FenceHandle>,
    /// Completion status reported back with the result.
    pub status: BufferStatus,
}

impl StreamBuffer {
    /// Buffer without an acquire fence.
    pub fn new(stream_id: u32, buffer_id: u64, buffer: BufferHandle) -> Self {
        Self {
            stream_id,
            buffer_id,
            buffer,
            acquire_fence: None,
            status: BufferStatus::Ok,
        }
    }

    /// Attach an acquire fence.
    pub fn with_acquire_fence(mut self, fence: FenceHandle) -> Self {
        self.acquire_fence = Some(fence);
        self
    }
}

/// Pixel rectangle passed to the importer's planar lock path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge.
    pub left: i32,
    /// Top edge.
    pub top: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

/// A locked, directly addressable memory region.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: MappedRegion is Send because:
// 1. The importer guarantees exclusive access to the region while it is locked
// 2. Ownership of the region moves with the record (request -> worker -> sensor)
// 3. No other MappedRegion aliases the same bytes
#[allow(unsafe_code)]
unsafe impl Send for MappedRegion {}

#[allow(unsafe_code)]
impl MappedRegion {
    /// Wrap a locked region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the buffer
    /// it belongs to is unlocked, and no other `MappedRegion` may cover the same
    /// bytes during that time.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Read access to the region.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: from_raw_parts contract: valid for `len` bytes while locked
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Write access to the region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: from_raw_parts contract, and &mut self gives exclusivity
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Single-plane layout shared by every non-planar format.
#[derive(Debug)]
pub struct FlatPlane {
    /// Locked bytes, `buffer_size` long.
    pub region: MappedRegion,
    /// Bytes per row.
    pub stride: u32,
    /// Size of the locked region in bytes.
    pub buffer_size: u32,
}

/// Planar YCbCr 4:2:0 layout as reported by the importer.
#[derive(Debug)]
pub struct YCbCrPlanes {
    /// Luma plane.
    pub y: MappedRegion,
    /// Blue-difference chroma plane.
    pub cb: MappedRegion,
    /// Red-difference chroma plane.
    pub cr: MappedRegion,
    /// Bytes per luma row.
    pub y_stride: u32,
    /// Bytes per chroma row.
    pub cbcr_stride: u32,
    /// Distance in bytes between consecutive chroma samples.
    pub cbcr_step: u32,
}

/// Memory layout of a resolved buffer.
#[derive(Debug)]
pub enum PlaneLayout {
    /// One contiguous plane.
    Flat(FlatPlane),
    /// Three chroma-subsampled planes.
    YCbCr(YCbCrPlanes),
}

impl PlaneLayout {
    /// Bytes per row of the first plane.
    pub fn stride(&self) -> u32 {
        match self {
            PlaneLayout::Flat(plane) => plane.stride,
            PlaneLayout::YCbCr(planes) => planes.y_stride,
        }
    }
}

/// Releases a buffer's memory lock when dropped.
pub struct BufferLock {
    importer: Arc<dyn BufferImporter>,
    handle: BufferHandle,
}

impl BufferLock {
    /// Guard for a buffer the importer has just locked.
    pub fn new(importer: Arc<dyn BufferImporter>, handle: BufferHandle) -> Self {
        Self { importer, handle }
    }

    /// Handle of the locked buffer.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }
}

impl Drop for BufferLock {
    fn drop(&mut self) {
        self.importer.unlock(&self.handle);
    }
}

impl fmt::Debug for BufferLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLock")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// A fully resolved buffer, ready to be written by the sensor.
///
/// `stream_buffer.status` starts as [`BufferStatus::Error`] and is only flipped
/// to `Ok` by whoever completes the frame.
#[derive(Debug)]
pub struct SensorBuffer {
    /// Frame this buffer belongs to.
    pub frame_number: u32,
    /// Pipeline the request was submitted on.
    pub pipeline_id: u32,
    /// Camera that resolved the buffer.
    pub camera_id: u32,
    /// Stream width in pixels.
    pub width: u32,
    /// Stream height in pixels.
    pub height: u32,
    /// Effective pixel format (normalized for input streams).
    pub format: PixelFormat,
    /// Stream color space.
    pub data_space: DataSpace,
    /// Buffer as submitted, with its completion status.
    pub stream_buffer: StreamBuffer,
    /// Locked memory.
    pub plane: PlaneLayout,
    /// Imported acquire fence, cleared once it has been waited on.
    pub acquire_fence: Option<Box<dyn AcquireFence>>,
    /// Completion callback of the pipeline.
    pub callback: PipelineCallback,
    /// Buffer of an input stream.
    pub is_input: bool,
    /// Memory lock, released on drop. Declared after `plane` so the mapping
    /// goes away before the unlock.
    pub lock: BufferLock,
}

impl SensorBuffer {
    /// Mark the buffer contents valid.
    pub fn mark_ok(&mut self) {
        self.stream_buffer.status = BufferStatus::Ok;
    }

    /// Current completion status.
    pub fn status(&self) -> BufferStatus {
        self.stream_buffer.status
    }

    /// Release the memory lock and return the caller-facing buffer.
    pub fn into_stream_buffer(self) -> StreamBuffer {
        self.stream_buffer
    }
}

/// Resolved buffers of one request, in submission order.
pub type Buffers = Vec<SensorBuffer>;
