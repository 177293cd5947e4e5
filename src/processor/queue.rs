//! Bounded FIFO of resolved requests.

use emucam_core::{
    Buffers, CameraMetadata, ErrorCode, HalError, HalResult, NotifyMessage, PipelineCallback,
    RequestState,
};
use parking_lot::{Condvar, MutexGuard};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// A request whose buffers have been resolved, waiting for the worker.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub frame_number: u32,
    pub pipeline_id: u32,
    pub callback: PipelineCallback,
    pub settings: Option<CameraMetadata>,
    pub input_buffers: Buffers,
    pub output_buffers: Buffers,
}

impl PendingRequest {
    /// Report the request as failed without dispatching it.
    ///
    /// Addressed through the first output buffer when there is one, since
    /// that is what the consumer tracks; otherwise through the request itself.
    pub fn notify_failed(&self) {
        let (frame_number, pipeline_id, callback) = match self.output_buffers.first() {
            Some(buffer) => (buffer.frame_number, buffer.pipeline_id, &buffer.callback),
            None => (self.frame_number, self.pipeline_id, &self.callback),
        };
        callback.notify(pipeline_id, NotifyMessage::error(frame_number, ErrorCode::Request));
    }
}

/// Everything guarded by the processor lock.
pub(crate) struct ProcessorState {
    pub pending: VecDeque<PendingRequest>,
    /// Settings of the most recent request that carried any.
    pub last_settings: Option<CameraMetadata>,
    pub request_state: Box<dyn RequestState>,
}

impl ProcessorState {
    pub fn new(request_state: Box<dyn RequestState>) -> Self {
        Self {
            pending: VecDeque::new(),
            last_settings: None,
            request_state,
        }
    }
}

/// Block until the queue holds at most `pipeline_depth` requests.
///
/// Each wait is bounded by `timeout`; a wait that elapses with the queue
/// still full fails the submission.
pub(crate) fn wait_for_slot(
    state: &mut MutexGuard<'_, ProcessorState>,
    request_slot: &Condvar,
    pipeline_depth: usize,
    timeout: Duration,
) -> HalResult<()> {
    while state.pending.len() > pipeline_depth {
        debug!(
            pending = state.pending.len(),
            pipeline_depth, "Submission queue full, waiting"
        );
        if request_slot.wait_for(state, timeout).timed_out()
            && state.pending.len() > pipeline_depth
        {
            warn!(
                pending = state.pending.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for a queue slot"
            );
            return Err(HalError::TimedOut(format!(
                "submission queue stayed full for {timeout:?}"
            )));
        }
    }
    Ok(())
}
