//! Integration tests for the simulated collaborators
//!
//! These tests drive the mock sensor directly with hand-resolved buffers, the
//! way the request processor would.

use emucam_core::{
    BufferHandle, BufferImporter, BufferLock, BufferStatus, DataSpace, ErrorCode, FlatPlane,
    MessageType, NotifyMessage, PipelineCallback, PipelineResult, PixelFormat, PlaneLayout,
    RequestState, SensorBuffer, SensorEngine, StreamBuffer, UsageFlags,
};
use emucam_driver_mock::*;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

const WIDTH: u32 = 16;
const HEIGHT: u32 = 8;
const STRIDE: u32 = WIDTH * 4;

enum Event {
    Notify(NotifyMessage),
    Result(PipelineResult),
}

fn channel_callback() -> (PipelineCallback, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    let result_tx = tx.clone();
    let callback = PipelineCallback::new(
        move |_, msg| {
            let _ = tx.send(Event::Notify(msg));
        },
        move |result| {
            let _ = result_tx.send(Event::Result(result));
        },
    );
    (callback, rx)
}

fn resolved_rgba(
    importer: &Arc<MockImporter>,
    handle: BufferHandle,
    frame_number: u32,
    callback: &PipelineCallback,
) -> SensorBuffer {
    let size = STRIDE * WIDTH;
    let region = importer
        .lock(&handle, UsageFlags::CPU_WRITE_OFTEN, size)
        .unwrap();
    let mut stream_buffer = StreamBuffer::new(0, handle.0, handle);
    stream_buffer.status = BufferStatus::Error;
    SensorBuffer {
        frame_number,
        pipeline_id: 0,
        camera_id: 0,
        width: WIDTH,
        height: HEIGHT,
        format: PixelFormat::Rgba8888,
        data_space: DataSpace::Unknown,
        stream_buffer,
        plane: PlaneLayout::Flat(FlatPlane {
            region,
            stride: STRIDE,
            buffer_size: size,
        }),
        acquire_fence: None,
        callback: callback.clone(),
        is_input: false,
        lock: BufferLock::new(importer.clone(), handle),
    }
}

fn next_result(rx: &Receiver<Event>, notifications: &mut Vec<NotifyMessage>) -> PipelineResult {
    loop {
        match rx.recv_timeout(Duration::from_secs(5)).expect("no result delivered") {
            Event::Notify(msg) => notifications.push(msg),
            Event::Result(result) => return result,
        }
    }
}

#[test]
fn test_capture_fills_buffer_and_reports_shutter() {
    let importer = Arc::new(MockImporter::new());
    let sensor = MockSensor::builder()
        .frame_interval(Duration::from_millis(5))
        .build()
        .unwrap();
    let mut state = MockRequestState::new(0, 4);
    state.initialize(default_characteristics(640, 480)).unwrap();

    let (callback, rx) = channel_callback();
    let handle = importer.allocate((STRIDE * WIDTH) as usize);
    let buffer = resolved_rgba(&importer, handle, 7, &callback);

    let preview = state
        .get_default_request(emucam_core::RequestTemplate::Preview)
        .unwrap();
    let settings = state.initialize_sensor_settings(preview).unwrap();
    let result = state.initialize_result(0, 7);
    sensor.set_current_request(settings, result, Vec::new(), vec![buffer]);

    let mut notifications = Vec::new();
    let result = next_result(&rx, &mut notifications);

    assert_eq!(result.frame_number, 7);
    assert_eq!(result.output_buffers.len(), 1);
    assert_eq!(result.output_buffers[0].status, BufferStatus::Ok);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].message_type(), MessageType::Shutter);

    // Lock released before the result is delivered
    assert_eq!(importer.locked_count(), 0);
    let bytes = importer.read(handle).unwrap();
    assert_eq!(bytes[0], pattern::origin_value(7));
    assert_eq!(bytes[1], pattern::origin_value(7) + 1);

    assert_eq!(sensor.dispatched_frames(), vec![7]);
    assert_eq!(sensor.captured_count(), 1);
}

#[test]
fn test_replaced_request_fails_with_request_error() {
    let importer = Arc::new(MockImporter::new());
    // Long interval so both requests land before the first tick
    let sensor = MockSensor::builder()
        .frame_interval(Duration::from_millis(500))
        .build()
        .unwrap();

    let (callback, rx) = channel_callback();
    let first = importer.allocate((STRIDE * WIDTH) as usize);
    let second = importer.allocate((STRIDE * WIDTH) as usize);
    let settings = emucam_core::SensorSettings {
        exposure_time_ns: 1_000_000,
        frame_duration_ns: 33_331_760,
        gain: 100,
    };
    let result = |frame_number| PipelineResult {
        frame_number,
        ..Default::default()
    };

    sensor.set_current_request(
        settings,
        result(1),
        Vec::new(),
        vec![resolved_rgba(&importer, first, 1, &callback)],
    );
    sensor.set_current_request(
        settings,
        result(2),
        Vec::new(),
        vec![resolved_rgba(&importer, second, 2, &callback)],
    );

    let mut notifications = Vec::new();
    let failed = next_result(&rx, &mut notifications);
    assert_eq!(failed.frame_number, 1);
    assert_eq!(failed.output_buffers[0].status, BufferStatus::Error);
    assert_eq!(notifications[0].error_code(), Some(ErrorCode::Request));

    let captured = next_result(&rx, &mut notifications);
    assert_eq!(captured.frame_number, 2);
    assert_eq!(captured.output_buffers[0].status, BufferStatus::Ok);
    assert_eq!(sensor.failed_count(), 1);
}

#[test]
fn test_flush_fails_in_flight_request() {
    let importer = Arc::new(MockImporter::new());
    let sensor = MockSensor::builder()
        .frame_interval(Duration::from_secs(5))
        .build()
        .unwrap();

    let (callback, rx) = channel_callback();
    let handle = importer.allocate((STRIDE * WIDTH) as usize);
    sensor.set_current_request(
        emucam_core::SensorSettings {
            exposure_time_ns: 1_000_000,
            frame_duration_ns: 33_331_760,
            gain: 100,
        },
        PipelineResult {
            frame_number: 3,
            ..Default::default()
        },
        Vec::new(),
        vec![resolved_rgba(&importer, handle, 3, &callback)],
    );
    assert!(importer.is_locked(handle));

    sensor.flush().unwrap();

    let mut notifications = Vec::new();
    let result = next_result(&rx, &mut notifications);
    assert_eq!(result.frame_number, 3);
    assert!(result.result_metadata.is_none());
    assert_eq!(notifications[0].error_code(), Some(ErrorCode::Request));
    assert!(!importer.is_locked(handle));
    assert_eq!(sensor.flush_count(), 1);
}

#[test]
fn test_error_scenarios() {
    let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
        operation: "import_fence",
        count: 1,
    });
    let importer = MockImporter::with_errors(config.clone());
    let fence = importer.create_signaled_fence();

    assert!(importer.import_fence(&fence).is_ok());
    assert!(importer.import_fence(&fence).is_err());
    assert_eq!(config.call_count("import_fence"), 2);
}
