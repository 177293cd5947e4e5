//! Vsync-paced sensor simulation.
//!
//! A background thread ticks once per frame interval. On every tick it takes
//! the request handed over since the previous tick, signals vsync to anyone
//! blocked in [`SensorEngine::wait_for_vsync`], then captures: fills each
//! output buffer with the test pattern, emits a shutter notification and
//! delivers the result.
//!
//! A request that is replaced before a tick picks it up, or that is still
//! pending when the sensor is flushed or shut down, completes with every
//! buffer in `Error` status and a `Request` error notification.

use crate::common::ErrorConfig;
use crate::pattern;
use emucam_core::metadata::tags;
use emucam_core::{
    Buffers, ErrorCode, HalError, HalResult, MetadataEntry, NotifyMessage, PipelineResult,
    SensorBuffer, SensorEngine, SensorSettings, ShutterMessage, StreamBuffer,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default frame interval (~30 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// One request as the sensor received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Frame number of the request.
    pub frame_number: u32,
    /// Pipeline the request was submitted on.
    pub pipeline_id: u32,
    /// Sensor settings it was dispatched with.
    pub settings: SensorSettings,
    /// Number of output buffers that survived resolution.
    pub output_count: usize,
    /// Number of input buffers.
    pub input_count: usize,
}

struct CurrentRequest {
    settings: SensorSettings,
    result: PipelineResult,
    input_buffers: Buffers,
    output_buffers: Buffers,
}

#[derive(Default)]
struct SensorState {
    current: Option<CurrentRequest>,
    got_vsync: bool,
    vsync_count: u64,
    captured: u64,
    failed: u64,
    flush_count: u32,
    history: Vec<DispatchRecord>,
}

struct SensorShared {
    state: Mutex<SensorState>,
    /// Signaled on every vsync.
    vsync: Condvar,
    /// Wakes the vsync thread early on shutdown.
    tick: Condvar,
    running: AtomicBool,
    frame_interval: Duration,
    epoch: Instant,
}

/// Builder for [`MockSensor`].
pub struct MockSensorBuilder {
    camera_id: u32,
    frame_interval: Duration,
    error_config: ErrorConfig,
}

impl MockSensorBuilder {
    fn new() -> Self {
        Self {
            camera_id: 0,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            error_config: ErrorConfig::none(),
        }
    }

    /// Camera id used in log fields.
    pub fn camera_id(mut self, camera_id: u32) -> Self {
        self.camera_id = camera_id;
        self
    }

    /// Time between vsync ticks.
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Error injection for `flush` and `shutdown`.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Start the vsync thread.
    pub fn build(self) -> HalResult<MockSensor> {
        MockSensor::from_builder(self)
    }
}

/// Simulated sensor engine.
pub struct MockSensor {
    camera_id: u32,
    shared: Arc<SensorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    errors: ErrorConfig,
}

impl MockSensor {
    /// Builder with default timing and no error injection.
    pub fn builder() -> MockSensorBuilder {
        MockSensorBuilder::new()
    }

    fn from_builder(builder: MockSensorBuilder) -> HalResult<Self> {
        let shared = Arc::new(SensorShared {
            state: Mutex::new(SensorState::default()),
            vsync: Condvar::new(),
            tick: Condvar::new(),
            running: AtomicBool::new(true),
            frame_interval: builder.frame_interval,
            epoch: Instant::now(),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("emucam-sensor-{}", builder.camera_id))
            .spawn(move || vsync_loop(thread_shared))
            .map_err(|e| HalError::Thread(format!("failed to spawn sensor thread: {e}")))?;

        info!(
            camera_id = builder.camera_id,
            frame_interval_ms = builder.frame_interval.as_millis() as u64,
            "mock sensor started"
        );

        Ok(Self {
            camera_id: builder.camera_id,
            shared,
            thread: Mutex::new(Some(handle)),
            errors: builder.error_config,
        })
    }

    /// Frame numbers in the order they were handed to the sensor.
    pub fn dispatched_frames(&self) -> Vec<u32> {
        self.shared
            .state
            .lock()
            .history
            .iter()
            .map(|record| record.frame_number)
            .collect()
    }

    /// Sensor settings in dispatch order.
    pub fn dispatched_settings(&self) -> Vec<SensorSettings> {
        self.shared
            .state
            .lock()
            .history
            .iter()
            .map(|record| record.settings)
            .collect()
    }

    /// Full dispatch history.
    pub fn dispatch_history(&self) -> Vec<DispatchRecord> {
        self.shared.state.lock().history.clone()
    }

    /// Requests captured successfully.
    pub fn captured_count(&self) -> u64 {
        self.shared.state.lock().captured
    }

    /// Requests completed with errors (replaced, flushed or shut down).
    pub fn failed_count(&self) -> u64 {
        self.shared.state.lock().failed
    }

    /// Vsync ticks so far.
    pub fn vsync_count(&self) -> u64 {
        self.shared.state.lock().vsync_count
    }

    /// Number of `flush` calls that succeeded.
    pub fn flush_count(&self) -> u32 {
        self.shared.state.lock().flush_count
    }

    /// True until shut down.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            // Taking the lock orders the flag store before the thread's next check
            let _state = self.shared.state.lock();
            self.shared.tick.notify_all();
            self.shared.vsync.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!(camera_id = self.camera_id, "sensor thread panicked");
            }
        }
        let abandoned = self.shared.state.lock().current.take();
        if let Some(request) = abandoned {
            fail_request(&self.shared, request);
        }
        info!(camera_id = self.camera_id, "mock sensor stopped");
    }
}

impl SensorEngine for MockSensor {
    fn set_current_request(
        &self,
        settings: SensorSettings,
        result: PipelineResult,
        input_buffers: Buffers,
        output_buffers: Buffers,
    ) {
        trace!(
            frame_number = result.frame_number,
            pipeline_id = result.pipeline_id,
            outputs = output_buffers.len(),
            "sensor received request"
        );
        let replaced = {
            let mut state = self.shared.state.lock();
            state.history.push(DispatchRecord {
                frame_number: result.frame_number,
                pipeline_id: result.pipeline_id,
                settings,
                output_count: output_buffers.len(),
                input_count: input_buffers.len(),
            });
            state.current.replace(CurrentRequest {
                settings,
                result,
                input_buffers,
                output_buffers,
            })
        };
        if let Some(request) = replaced {
            warn!(
                frame_number = request.result.frame_number,
                "request replaced before capture"
            );
            fail_request(&self.shared, request);
        }
    }

    fn flush(&self) -> HalResult<()> {
        self.errors.check_operation("sensor", "flush")?;
        let in_flight = {
            let mut state = self.shared.state.lock();
            state.flush_count += 1;
            state.current.take()
        };
        if let Some(request) = in_flight {
            debug!(frame_number = request.result.frame_number, "flushing in-flight request");
            fail_request(&self.shared, request);
        }
        Ok(())
    }

    fn shut_down(&self) -> HalResult<()> {
        self.stop();
        self.errors.check_operation("sensor", "shutdown")
    }

    fn wait_for_vsync(&self, timeout: Duration) -> bool {
        if !self.is_running() {
            thread::sleep(timeout.min(self.shared.frame_interval));
            return false;
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        state.got_vsync = false;
        while !state.got_vsync && self.shared.running.load(Ordering::SeqCst) {
            if self.shared.vsync.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.got_vsync
    }
}

impl Drop for MockSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn vsync_loop(shared: Arc<SensorShared>) {
    loop {
        let request = {
            let mut state = shared.state.lock();
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            let _ = shared.tick.wait_for(&mut state, shared.frame_interval);
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            state.vsync_count += 1;
            state.got_vsync = true;
            shared.vsync.notify_all();
            state.current.take()
        };

        if let Some(request) = request {
            capture(&shared, request);
        }
    }
}

fn timestamp_ns(shared: &SensorShared) -> u64 {
    shared.epoch.elapsed().as_nanos() as u64
}

fn capture(shared: &SensorShared, request: CurrentRequest) {
    let CurrentRequest {
        settings,
        mut result,
        input_buffers,
        mut output_buffers,
    } = request;

    let Some(callback) = output_buffers.first().map(|b| b.callback.clone()) else {
        warn!(frame_number = result.frame_number, "request without output buffers");
        return;
    };
    let timestamp = timestamp_ns(shared);

    for buffer in output_buffers.iter_mut() {
        pattern::fill_buffer(buffer);
        buffer.mark_ok();
    }

    callback.notify(
        result.pipeline_id,
        NotifyMessage::Shutter(ShutterMessage {
            frame_number: result.frame_number,
            timestamp_ns: timestamp,
        }),
    );

    if let Some(metadata) = result.result_metadata.as_mut() {
        metadata.set(
            tags::SENSOR_TIMESTAMP,
            MetadataEntry::Int64(vec![timestamp as i64]),
        );
    }
    result.output_buffers = complete(output_buffers);
    result.input_buffers = complete(input_buffers.into_iter().map(|mut b| {
        b.mark_ok();
        b
    }));

    debug!(
        frame_number = result.frame_number,
        exposure_ns = settings.exposure_time_ns,
        gain = settings.gain,
        "frame captured"
    );
    shared.state.lock().captured += 1;
    callback.process_result(result);
}

fn fail_request(shared: &SensorShared, request: CurrentRequest) {
    let CurrentRequest {
        mut result,
        input_buffers,
        output_buffers,
        ..
    } = request;

    let callback = output_buffers.first().map(|b| b.callback.clone());
    result.result_metadata = None;
    result.output_buffers = complete(output_buffers);
    result.input_buffers = complete(input_buffers);
    shared.state.lock().failed += 1;

    if let Some(callback) = callback {
        callback.notify(
            result.pipeline_id,
            NotifyMessage::error(result.frame_number, ErrorCode::Request),
        );
        callback.process_result(result);
    }
}

/// Release every lock and keep the caller-facing buffers.
fn complete(buffers: impl IntoIterator<Item = SensorBuffer>) -> Vec<StreamBuffer> {
    buffers
        .into_iter()
        .map(SensorBuffer::into_stream_buffer)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    #[test]
    fn test_vsync_ticks() {
        let sensor = MockSensor::builder()
            .frame_interval(Duration::from_millis(5))
            .build()
            .unwrap();

        assert!(sensor.wait_for_vsync(Duration::from_secs(2)));
        assert!(sensor.wait_for_vsync(Duration::from_secs(2)));
        assert!(sensor.vsync_count() >= 2);
        sensor.shut_down().unwrap();
        assert!(!sensor.is_running());
    }

    #[test]
    fn test_wait_for_vsync_after_shutdown_returns_false() {
        let sensor = MockSensor::builder()
            .frame_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        sensor.shut_down().unwrap();
        assert!(!sensor.wait_for_vsync(Duration::from_millis(10)));
    }

    #[test]
    fn test_flush_without_request() {
        let sensor = MockSensor::builder().build().unwrap();
        sensor.flush().unwrap();
        sensor.flush().unwrap();
        assert_eq!(sensor.flush_count(), 2);
        assert_eq!(sensor.failed_count(), 0);
    }

    #[test]
    fn test_injected_shutdown_failure_still_stops() {
        let sensor = MockSensor::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::AlwaysFail {
                operation: "shutdown",
            }))
            .build()
            .unwrap();

        assert!(matches!(sensor.shut_down(), Err(HalError::Sensor(_))));
        assert!(!sensor.is_running());
    }
}
