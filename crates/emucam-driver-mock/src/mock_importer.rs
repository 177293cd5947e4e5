//! Host-memory buffer importer.
//!
//! Every [`BufferHandle`] handed out by [`MockImporter::allocate`] is backed by a
//! boxed byte slice owned by the importer. Locks are exclusive per handle, so a
//! handle can never produce two aliasing [`MappedRegion`]s.

use crate::common::ErrorConfig;
use crate::mock_fence::MockFence;
use emucam_core::{
    AcquireFence, BufferHandle, BufferImporter, FenceHandle, HalError, HalResult, MappedRegion,
    Rect, UsageFlags, YCbCrPlanes,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;
use tracing::{debug, trace, warn};

#[derive(Default)]
struct ImporterState {
    allocations: HashMap<BufferHandle, Box<[u8]>>,
    locked: HashMap<BufferHandle, UsageFlags>,
    last_usage: HashMap<BufferHandle, UsageFlags>,
    fences: HashMap<FenceHandle, MockFence>,
    next_buffer: u64,
    next_fence: u64,
    lock_calls: u64,
}

/// Buffer importer backed by host allocations.
pub struct MockImporter {
    state: Mutex<ImporterState>,
    errors: ErrorConfig,
}

impl MockImporter {
    /// Importer without error injection.
    pub fn new() -> Self {
        Self::with_errors(ErrorConfig::none())
    }

    /// Importer whose `lock`, `lock_ycbcr` and `import_fence` calls consult `errors`.
    pub fn with_errors(errors: ErrorConfig) -> Self {
        Self {
            state: Mutex::new(ImporterState {
                next_buffer: 1,
                next_fence: 1,
                ..Default::default()
            }),
            errors,
        }
    }

    /// Allocate a zeroed buffer of `size` bytes.
    pub fn allocate(&self, size: usize) -> BufferHandle {
        let mut state = self.state.lock();
        let handle = BufferHandle(state.next_buffer);
        state.next_buffer += 1;
        state
            .allocations
            .insert(handle, vec![0u8; size].into_boxed_slice());
        trace!(buffer = handle.0, size, "allocated mock buffer");
        handle
    }

    /// Allocate a buffer large enough for a planar 4:2:0 frame.
    pub fn allocate_ycbcr(&self, width: u32, height: u32) -> BufferHandle {
        let (y_len, c_len, _) = ycbcr_sizes(width as usize, height as usize);
        self.allocate(y_len + 2 * c_len)
    }

    /// Create a pending fence. The returned [`MockFence`] controls it.
    pub fn create_fence(&self) -> (FenceHandle, MockFence) {
        self.register_fence(MockFence::pending())
    }

    /// Create a fence that has already signaled.
    pub fn create_signaled_fence(&self) -> FenceHandle {
        self.register_fence(MockFence::signaled()).0
    }

    fn register_fence(&self, fence: MockFence) -> (FenceHandle, MockFence) {
        let mut state = self.state.lock();
        let handle = FenceHandle(state.next_fence);
        state.next_fence += 1;
        state.fences.insert(handle, fence.clone());
        (handle, fence)
    }

    /// Copy of a buffer's contents, or `None` while it is locked or unknown.
    pub fn read(&self, handle: BufferHandle) -> Option<Vec<u8>> {
        let state = self.state.lock();
        if state.locked.contains_key(&handle) {
            return None;
        }
        state.allocations.get(&handle).map(|bytes| bytes.to_vec())
    }

    /// Number of buffers currently locked.
    pub fn locked_count(&self) -> usize {
        self.state.lock().locked.len()
    }

    /// True while `handle` is locked.
    pub fn is_locked(&self, handle: BufferHandle) -> bool {
        self.state.lock().locked.contains_key(&handle)
    }

    /// Usage flags of the most recent successful lock of `handle`.
    pub fn last_usage(&self, handle: BufferHandle) -> Option<UsageFlags> {
        self.state.lock().last_usage.get(&handle).copied()
    }

    /// Lock attempts that got past error injection.
    pub fn lock_calls(&self) -> u64 {
        self.state.lock().lock_calls
    }

    /// Mark `handle` locked and return the start of its memory plus its length.
    fn begin_lock(
        &self,
        handle: &BufferHandle,
        usage: UsageFlags,
        required: usize,
    ) -> HalResult<(NonNull<u8>, usize)> {
        let mut state = self.state.lock();
        state.lock_calls += 1;
        if state.locked.contains_key(handle) {
            return Err(HalError::Import(format!("buffer {} is already locked", handle.0)));
        }
        let bytes = state
            .allocations
            .get_mut(handle)
            .ok_or_else(|| HalError::Import(format!("unknown buffer {}", handle.0)))?;
        if required > bytes.len() {
            return Err(HalError::Import(format!(
                "buffer {} holds {} bytes, {} requested",
                handle.0,
                bytes.len(),
                required
            )));
        }
        let len = bytes.len();
        let ptr = NonNull::new(bytes.as_mut_ptr())
            .ok_or_else(|| HalError::Import(format!("buffer {} has no memory", handle.0)))?;
        state.locked.insert(*handle, usage);
        state.last_usage.insert(*handle, usage);
        Ok((ptr, len))
    }
}

impl Default for MockImporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Luma length, chroma plane length and chroma stride of an I420 frame.
fn ycbcr_sizes(width: usize, height: usize) -> (usize, usize, usize) {
    let c_stride = width.div_ceil(2);
    let c_height = height.div_ceil(2);
    (width * height, c_stride * c_height, c_stride)
}

impl BufferImporter for MockImporter {
    #[allow(unsafe_code)]
    fn lock(&self, buffer: &BufferHandle, usage: UsageFlags, size: u32) -> HalResult<MappedRegion> {
        self.errors.check_operation("importer", "lock")?;
        let (ptr, _) = self.begin_lock(buffer, usage, size as usize)?;
        debug!(buffer = buffer.0, size, "locked buffer");
        // SAFETY: the allocation is at least `size` bytes, lives as long as the
        // importer (kept alive by the record's BufferLock), and stays exclusive
        // until `unlock` because a handle cannot be locked twice.
        Ok(unsafe { MappedRegion::from_raw_parts(ptr, size as usize) })
    }

    #[allow(unsafe_code)]
    fn lock_ycbcr(
        &self,
        buffer: &BufferHandle,
        usage: UsageFlags,
        region: Rect,
    ) -> HalResult<YCbCrPlanes> {
        self.errors.check_operation("importer", "lock_ycbcr")?;
        if region.width <= 0 || region.height <= 0 {
            return Err(HalError::InvalidArgument(format!(
                "empty YCbCr region {}x{}",
                region.width, region.height
            )));
        }
        let (y_len, c_len, c_stride) = ycbcr_sizes(region.width as usize, region.height as usize);
        let (base, _) = self.begin_lock(buffer, usage, y_len + 2 * c_len)?;
        debug!(buffer = buffer.0, width = region.width, height = region.height, "locked YCbCr buffer");

        // SAFETY: begin_lock verified the allocation covers y_len + 2 * c_len
        // bytes, so both offsets stay in bounds and the three regions are
        // disjoint. Exclusivity and lifetime as in `lock`.
        unsafe {
            let cb = NonNull::new_unchecked(base.as_ptr().add(y_len));
            let cr = NonNull::new_unchecked(base.as_ptr().add(y_len + c_len));
            Ok(YCbCrPlanes {
                y: MappedRegion::from_raw_parts(base, y_len),
                cb: MappedRegion::from_raw_parts(cb, c_len),
                cr: MappedRegion::from_raw_parts(cr, c_len),
                y_stride: region.width as u32,
                cbcr_stride: c_stride as u32,
                cbcr_step: 1,
            })
        }
    }

    fn unlock(&self, buffer: &BufferHandle) {
        if self.state.lock().locked.remove(buffer).is_none() {
            warn!(buffer = buffer.0, "unlock of a buffer that is not locked");
        } else {
            trace!(buffer = buffer.0, "unlocked buffer");
        }
    }

    fn import_fence(&self, fence: &FenceHandle) -> HalResult<Box<dyn AcquireFence>> {
        self.errors.check_operation("importer", "import_fence")?;
        let state = self.state.lock();
        let fence = state
            .fences
            .get(fence)
            .cloned()
            .ok_or_else(|| HalError::Import(format!("unknown fence {}", fence.0)))?;
        Ok(Box::new(fence))
    }
}
