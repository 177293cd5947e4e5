//! Acquire fence synchronization.

use emucam_core::Buffers;
use std::time::Duration;
use tracing::warn;

/// Wait on each buffer's acquire fence, in order, and clear it.
///
/// Each wait is bounded by `timeout`. A fence that times out or reports an
/// error is logged and the buffer is still forwarded; the sensor writes into
/// it and the consumer sees the frame as usual.
pub fn acquire_buffers(mut buffers: Buffers, timeout: Duration) -> Buffers {
    for buffer in &mut buffers {
        let Some(fence) = buffer.acquire_fence.take() else {
            continue;
        };
        if let Err(e) = fence.wait(timeout) {
            warn!(
                frame_number = buffer.frame_number,
                stream_id = buffer.stream_buffer.stream_id,
                error = %e,
                "Acquire fence did not signal cleanly"
            );
        }
    }
    buffers
}
