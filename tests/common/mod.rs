//! Shared fixtures for the processor integration tests
//!
//! [`GatedSensor`] holds the worker in `wait_for_vsync` until the test hands
//! out vsync permits, which makes queue occupancy deterministic.
//! [`Harness`] wires a processor to it with a single RGBA stream.

#![allow(dead_code)]

use emucam::config::ProcessorConfig;
use emucam::RequestProcessor;
use emucam_core::{
    Buffers, ErrorCode, HalResult, NotifyMessage, Pipeline, PipelineCallback, PipelineRequest,
    PipelineResult, PixelFormat, RequestTemplate, SensorEngine, SensorSettings, StreamBuffer,
    StreamDescriptor,
};
use emucam_driver_mock::{default_characteristics, MockImporter, MockRequestState};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on any wait inside the fixtures.
pub const SAFETY_TIMEOUT: Duration = Duration::from_secs(10);

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 8;
/// RGBA stride × width.
pub const RGBA_SIZE: usize = (WIDTH * 4 * WIDTH) as usize;

#[derive(Default)]
struct GateState {
    free_running: bool,
    permits: u32,
    dispatched: Vec<u32>,
    settings: Vec<SensorSettings>,
    output_counts: Vec<usize>,
    flushes: u32,
    shut_down: bool,
    vsync_waits: u64,
}

/// Sensor whose vsync only fires when the test allows it.
///
/// Dispatched requests complete immediately: every output buffer is marked
/// `Ok` and the result goes out through the buffer's callback.
#[derive(Default)]
pub struct GatedSensor {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl GatedSensor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let vsync fire freely from now on.
    pub fn open(&self) {
        self.state.lock().free_running = true;
        self.changed.notify_all();
    }

    /// Allow `n` more vsyncs.
    pub fn release(&self, n: u32) {
        self.state.lock().permits += n;
        self.changed.notify_all();
    }

    pub fn dispatched(&self) -> Vec<u32> {
        self.state.lock().dispatched.clone()
    }

    pub fn dispatched_settings(&self) -> Vec<SensorSettings> {
        self.state.lock().settings.clone()
    }

    pub fn output_counts(&self) -> Vec<usize> {
        self.state.lock().output_counts.clone()
    }

    pub fn flushes(&self) -> u32 {
        self.state.lock().flushes
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Block until the worker has entered `wait_for_vsync` at least `count` times.
    pub fn wait_for_vsync_waits(&self, count: u64) {
        let deadline = Instant::now() + SAFETY_TIMEOUT;
        let mut state = self.state.lock();
        while state.vsync_waits < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    /// Block until at least `count` requests have been dispatched.
    pub fn wait_for_dispatched(&self, count: usize) -> Vec<u32> {
        let deadline = Instant::now() + SAFETY_TIMEOUT;
        let mut state = self.state.lock();
        while state.dispatched.len() < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.dispatched.clone()
    }
}

impl SensorEngine for GatedSensor {
    fn set_current_request(
        &self,
        settings: SensorSettings,
        mut result: PipelineResult,
        _input_buffers: Buffers,
        output_buffers: Buffers,
    ) {
        {
            let mut state = self.state.lock();
            state.dispatched.push(result.frame_number);
            state.settings.push(settings);
            state.output_counts.push(output_buffers.len());
        }
        self.changed.notify_all();

        let callback = output_buffers.first().map(|b| b.callback.clone());
        result.output_buffers = output_buffers
            .into_iter()
            .map(|mut buffer| {
                buffer.mark_ok();
                buffer.into_stream_buffer()
            })
            .collect();
        if let Some(callback) = callback {
            callback.process_result(result);
        }
    }

    fn flush(&self) -> HalResult<()> {
        self.state.lock().flushes += 1;
        Ok(())
    }

    fn shut_down(&self) -> HalResult<()> {
        self.state.lock().shut_down = true;
        Ok(())
    }

    // The processor's timeout is ignored so a short max frame duration does
    // not let the worker run ahead of the test.
    fn wait_for_vsync(&self, _timeout: Duration) -> bool {
        let deadline = Instant::now() + SAFETY_TIMEOUT;
        let mut state = self.state.lock();
        state.vsync_waits += 1;
        self.changed.notify_all();
        loop {
            if state.free_running {
                drop(state);
                std::thread::sleep(Duration::from_millis(1));
                return true;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return true;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return false;
            }
        }
    }
}

/// Something the pipeline callback received.
#[derive(Debug)]
pub enum Event {
    Notify(u32, NotifyMessage),
    Result(PipelineResult),
}

impl Event {
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Event::Notify(_, msg) => msg.error_code(),
            Event::Result(_) => None,
        }
    }

    pub fn frame_number(&self) -> u32 {
        match self {
            Event::Notify(_, msg) => msg.frame_number(),
            Event::Result(result) => result.frame_number,
        }
    }
}

/// Callback forwarding everything into a channel.
pub fn channel_callback() -> (PipelineCallback, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    let notify_tx = Mutex::new(tx.clone());
    let result_tx = Mutex::new(tx);
    let callback = PipelineCallback::new(
        move |pipeline_id, msg| {
            let _ = notify_tx.lock().send(Event::Notify(pipeline_id, msg));
        },
        move |result| {
            let _ = result_tx.lock().send(Event::Result(result));
        },
    );
    (callback, rx)
}

/// Receive events until `count` have arrived or `timeout` elapses.
pub fn collect_events(rx: &Receiver<Event>, count: usize, timeout: Duration) -> Vec<Event> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while events.len() < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
    }
    events
}

pub fn rgba_stream(id: u32) -> StreamDescriptor {
    StreamDescriptor::output(id, WIDTH, HEIGHT, PixelFormat::Rgba8888)
}

pub fn processor_config(pipeline_depth: u32, max_frame_duration: Duration) -> ProcessorConfig {
    ProcessorConfig {
        camera_id: 0,
        pipeline_depth,
        max_frame_duration,
    }
}

/// Processor on a [`GatedSensor`] with one RGBA stream (id 0) on pipeline 0.
pub struct Harness {
    pub processor: RequestProcessor,
    pub sensor: Arc<GatedSensor>,
    pub importer: Arc<MockImporter>,
    pub pipelines: Vec<Pipeline>,
    pub events: Receiver<Event>,
}

impl Harness {
    pub fn new(pipeline_depth: u32, max_frame_duration: Duration) -> Self {
        let sensor = GatedSensor::new();
        let importer = Arc::new(MockImporter::new());
        let processor = RequestProcessor::new(
            processor_config(pipeline_depth, max_frame_duration),
            sensor.clone(),
            Box::new(MockRequestState::new(0, pipeline_depth as u8)),
            importer.clone(),
        )
        .unwrap();
        processor
            .initialize(default_characteristics(640, 480))
            .unwrap();
        // Past its first (empty) iteration, the worker only moves on a permit
        sensor.wait_for_vsync_waits(1);

        let (callback, events) = channel_callback();
        let pipelines = vec![Pipeline::new(0, callback, [rgba_stream(0)])];

        Self {
            processor,
            sensor,
            importer,
            pipelines,
            events,
        }
    }

    /// Request with one freshly allocated RGBA buffer on stream 0.
    pub fn request(&self, frame_number: u32) -> PipelineRequest {
        let handle = self.importer.allocate(RGBA_SIZE);
        PipelineRequest::new(0, vec![StreamBuffer::new(0, u64::from(frame_number), handle)])
    }

    /// Like [`Harness::request`], carrying the preview template.
    pub fn request_with_settings(&self, frame_number: u32) -> PipelineRequest {
        let settings = self
            .processor
            .get_default_request(RequestTemplate::Preview)
            .unwrap();
        self.request(frame_number).with_settings(settings)
    }

    /// Hand out vsync permits one at a time until `total` requests have been
    /// dispatched.
    pub fn release_until_dispatched(&self, total: usize) {
        let mut dispatched = self.sensor.dispatched().len();
        while dispatched < total {
            self.sensor.release(1);
            dispatched = self.sensor.wait_for_dispatched(dispatched + 1).len();
        }
    }

    pub fn submit(&self, frame_number: u32, request: PipelineRequest) -> HalResult<()> {
        self.processor
            .process_pipeline_requests(frame_number, &[request], &self.pipelines)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        // The processor joins its worker on drop; let it out of wait_for_vsync
        self.sensor.open();
    }
}
