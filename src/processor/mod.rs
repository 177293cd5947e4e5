//! Request Processor
//!
//! Accepts capture requests, resolves their buffers and feeds them to the
//! sensor at most one per vsync, from a dedicated worker thread.
//!
//! ## Flow
//!
//! ```text
//!  process_pipeline_requests ──► resolve buffers ──► pending queue (≤ depth + 1)
//!                                                          │
//!                          worker: pop ◄───────────────────┘
//!                                   │ settings, fences, result skeleton
//!                                   ▼
//!                      SensorEngine::set_current_request
//!                                   │
//!                      SensorEngine::wait_for_vsync
//! ```
//!
//! Submission blocks while the queue already holds more than
//! `pipeline_depth` requests. [`RequestProcessor::flush`] fails everything
//! still queued with a `Request` error. Requests that reach the worker but
//! cannot be dispatched fail with a `Result` error.
//!
//! ## Example
//!
//! ```no_run
//! use emucam::config::ProcessorConfig;
//! use emucam::processor::RequestProcessor;
//! use emucam_core::{
//!     Pipeline, PipelineCallback, PipelineRequest, PixelFormat, RequestTemplate, StreamBuffer,
//!     StreamDescriptor,
//! };
//! use emucam_driver_mock::{default_characteristics, MockImporter, MockRequestState, MockSensor};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sensor = Arc::new(MockSensor::builder().build()?);
//! let importer = Arc::new(MockImporter::new());
//! let processor = RequestProcessor::new(
//!     ProcessorConfig::default(),
//!     sensor,
//!     Box::new(MockRequestState::new(0, 3)),
//!     importer.clone(),
//! )?;
//! processor.initialize(default_characteristics(640, 480))?;
//!
//! let preview = StreamDescriptor::output(0, 640, 480, PixelFormat::Rgba8888);
//! let pipelines = [Pipeline::new(0, PipelineCallback::discard(), [preview])];
//! let buffer = StreamBuffer::new(0, 1, importer.allocate(640 * 4 * 640));
//! let settings = processor.get_default_request(RequestTemplate::Preview)?;
//! let request = PipelineRequest::new(0, vec![buffer]).with_settings(settings);
//! processor.process_pipeline_requests(1, &[request], &pipelines)?;
//! # Ok(())
//! # }
//! ```

mod queue;
mod worker;

use crate::config::ProcessorConfig;
use crate::resolver::BufferResolver;
use emucam_core::{
    BufferImporter, CameraMetadata, HalError, HalResult, Pipeline, PipelineRequest, RequestState,
    RequestTemplate, SensorEngine,
};
use parking_lot::{Condvar, Mutex};
use queue::{PendingRequest, ProcessorState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// State shared between the submitting threads and the worker.
pub(crate) struct Shared {
    camera_id: u32,
    pipeline_depth: usize,
    max_frame_duration: Duration,
    state: Mutex<ProcessorState>,
    /// Signaled whenever the worker or a flush frees queue slots.
    request_slot: Condvar,
    done: AtomicBool,
    sensor: Arc<dyn SensorEngine>,
    resolver: BufferResolver,
}

/// Front end of the emulated camera's request pipeline.
///
/// Dropping the processor stops the worker and shuts the sensor down.
pub struct RequestProcessor {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    sensor_stopped: bool,
}

impl RequestProcessor {
    /// Start a processor and its worker thread.
    pub fn new(
        config: ProcessorConfig,
        sensor: Arc<dyn SensorEngine>,
        request_state: Box<dyn RequestState>,
        importer: Arc<dyn BufferImporter>,
    ) -> HalResult<Self> {
        let pipeline_depth = usize::try_from(config.pipeline_depth).map_err(|_| {
            HalError::InvalidArgument(format!("pipeline depth {}", config.pipeline_depth))
        })?;

        let shared = Arc::new(Shared {
            camera_id: config.camera_id,
            pipeline_depth,
            max_frame_duration: config.max_frame_duration,
            state: Mutex::new(ProcessorState::new(request_state)),
            request_slot: Condvar::new(),
            done: AtomicBool::new(false),
            sensor,
            resolver: BufferResolver::new(config.camera_id, importer),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("emucam-request-{}", config.camera_id))
            .spawn(move || worker::run(worker_shared))
            .map_err(|e| HalError::Thread(format!("failed to spawn request worker: {e}")))?;

        info!(
            camera_id = config.camera_id,
            pipeline_depth,
            max_frame_duration_ms = config.max_frame_duration.as_millis() as u64,
            "Request processor started"
        );

        Ok(Self {
            shared,
            worker: Some(worker),
            sensor_stopped: false,
        })
    }

    /// Initialize the request state with the camera's static characteristics.
    pub fn initialize(&self, static_characteristics: CameraMetadata) -> HalResult<()> {
        self.shared
            .state
            .lock()
            .request_state
            .initialize(static_characteristics)
    }

    /// Default settings for `template`.
    pub fn get_default_request(&self, template: RequestTemplate) -> HalResult<CameraMetadata> {
        self.shared
            .state
            .lock()
            .request_state
            .get_default_request(template)
    }

    /// Queue `requests` for capture, in order, all tagged with `frame_number`.
    ///
    /// Each request's buffers are resolved before it is queued; buffers that
    /// cannot be resolved are dropped and logged. Blocks while the queue is
    /// full.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if a request names a pipeline outside `pipelines`
    /// - `TimedOut` if a queue slot did not free up within the maximum frame
    ///   duration
    ///
    /// Requests queued earlier in the same call stay queued in both cases.
    pub fn process_pipeline_requests(
        &self,
        frame_number: u32,
        requests: &[PipelineRequest],
        pipelines: &[Pipeline],
    ) -> HalResult<()> {
        let mut state = self.shared.state.lock();

        for request in requests {
            let pipeline = usize::try_from(request.pipeline_id)
                .ok()
                .and_then(|index| pipelines.get(index))
                .ok_or_else(|| {
                    error!(
                        frame_number,
                        pipeline_id = request.pipeline_id,
                        pipelines = pipelines.len(),
                        "Invalid pipeline id"
                    );
                    HalError::InvalidArgument(format!(
                        "pipeline id {} out of range ({} pipelines)",
                        request.pipeline_id,
                        pipelines.len()
                    ))
                })?;

            queue::wait_for_slot(
                &mut state,
                &self.shared.request_slot,
                self.shared.pipeline_depth,
                self.shared.max_frame_duration,
            )?;

            let resolver = &self.shared.resolver;
            let output_buffers = resolver.resolve(
                frame_number,
                &request.output_buffers,
                &pipeline.streams,
                request.pipeline_id,
                &pipeline.callback,
            );
            let input_buffers = resolver.resolve(
                frame_number,
                &request.input_buffers,
                &pipeline.streams,
                request.pipeline_id,
                &pipeline.callback,
            );

            debug!(
                frame_number,
                pipeline_id = request.pipeline_id,
                outputs = output_buffers.len(),
                inputs = input_buffers.len(),
                has_settings = request.settings.is_some(),
                "Request queued"
            );

            state.pending.push_back(PendingRequest {
                frame_number,
                pipeline_id: request.pipeline_id,
                callback: pipeline.callback.clone(),
                settings: request.settings.clone(),
                input_buffers,
                output_buffers,
            });
        }

        Ok(())
    }

    /// Flush the sensor and fail every queued request with a `Request` error.
    ///
    /// Returns the sensor's flush status; queued requests are failed either way.
    pub fn flush(&self) -> HalResult<()> {
        let mut state = self.shared.state.lock();

        let status = self.shared.sensor.flush();
        if let Err(e) = &status {
            error!(error = %e, "Sensor flush failed");
        }

        let flushed = state.pending.len();
        while let Some(request) = state.pending.pop_front() {
            request.notify_failed();
        }
        self.shared.request_slot.notify_all();

        info!(flushed, "Flushed pending requests");
        status
    }

    /// Number of requests queued and not yet taken by the worker.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Camera served by this processor.
    pub fn camera_id(&self) -> u32 {
        self.shared.camera_id
    }

    /// Stop the worker and shut the sensor down, reporting the sensor status.
    pub fn shutdown(mut self) -> HalResult<()> {
        self.stop_worker();
        self.sensor_stopped = true;
        self.shared.sensor.shut_down()
    }

    fn stop_worker(&mut self) {
        self.shared.done.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(camera_id = self.shared.camera_id, "Request worker panicked");
            }
        }
    }
}

impl Drop for RequestProcessor {
    fn drop(&mut self) {
        self.stop_worker();
        if !self.sensor_stopped {
            if let Err(e) = self.shared.sensor.shut_down() {
                error!(camera_id = self.shared.camera_id, error = %e, "Sensor shutdown failed");
            }
        }
    }
}
