//! The request worker: one dispatch per vsync.

use super::queue::{PendingRequest, ProcessorState};
use super::Shared;
use crate::fence::acquire_buffers;
use emucam_core::{ErrorCode, HalError, NotifyMessage};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(super) fn run(shared: Arc<Shared>) {
    info!(camera_id = shared.camera_id, "Request worker started");

    while !shared.done.load(Ordering::Acquire) {
        {
            let mut state = shared.state.lock();
            if let Some(request) = state.pending.pop_front() {
                dispatch(&shared, &mut state, request);
                shared.request_slot.notify_one();
            }
        }

        shared.sensor.wait_for_vsync(shared.max_frame_duration);
    }

    info!(camera_id = shared.camera_id, "Request worker stopped");
}

/// Hand one request to the sensor, or report it failed.
///
/// Runs with the processor lock held so that settings resolution, fence waits
/// and the handoff are not interleaved with submissions or a flush.
fn dispatch(shared: &Shared, state: &mut ProcessorState, request: PendingRequest) {
    let PendingRequest {
        frame_number,
        pipeline_id,
        callback,
        settings,
        input_buffers,
        output_buffers,
    } = request;

    let sensor_settings = match settings {
        Some(settings) => {
            state.last_settings = Some(settings.clone());
            state.request_state.initialize_sensor_settings(settings)
        }
        None => match state.last_settings.clone() {
            Some(previous) => state.request_state.initialize_sensor_settings(previous),
            None => Err(HalError::NoInit(
                "request carries no settings and none were applied before".to_string(),
            )),
        },
    };

    let output_buffers = acquire_buffers(output_buffers, shared.max_frame_duration);

    match sensor_settings {
        Ok(sensor_settings) if !output_buffers.is_empty() => {
            let result = state.request_state.initialize_result(pipeline_id, frame_number);
            let input_buffers = acquire_buffers(input_buffers, shared.max_frame_duration);
            debug!(
                frame_number,
                pipeline_id,
                outputs = output_buffers.len(),
                inputs = input_buffers.len(),
                "Dispatching request"
            );
            shared
                .sensor
                .set_current_request(sensor_settings, result, input_buffers, output_buffers);
        }
        Ok(_) => {
            warn!(frame_number, pipeline_id, "No output buffers left to fill");
            callback.notify(pipeline_id, NotifyMessage::error(frame_number, ErrorCode::Result));
        }
        Err(e) => {
            warn!(frame_number, pipeline_id, error = %e, "Failed to apply request settings");
            callback.notify(pipeline_id, NotifyMessage::error(frame_number, ErrorCode::Result));
        }
    }
}
