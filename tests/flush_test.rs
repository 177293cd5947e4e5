//! Flush behavior: queued requests fail with `Request` errors, the sensor is
//! flushed, and the processor keeps working afterwards.

mod common;

use common::{collect_events, Event, Harness};
use emucam::RequestProcessor;
use emucam_core::{
    ErrorCode, HalError, Pipeline, PipelineCallback, PipelineRequest, StreamBuffer,
};
use emucam_driver_mock::{
    default_characteristics, ErrorConfig, ErrorScenario, MockImporter, MockRequestState,
    MockSensor,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_flush_fails_queued_requests_in_order() {
    let harness = Harness::new(3, Duration::from_secs(5));
    harness.submit(1, harness.request_with_settings(1)).unwrap();
    harness.submit(2, harness.request(2)).unwrap();
    harness.submit(3, harness.request(3)).unwrap();
    assert_eq!(harness.importer.locked_count(), 3);

    harness.processor.flush().unwrap();

    let events = collect_events(&harness.events, 3, Duration::from_secs(5));
    let failed: Vec<(u32, Option<ErrorCode>)> = events
        .iter()
        .map(|e| (e.frame_number(), e.error_code()))
        .collect();
    assert_eq!(
        failed,
        vec![
            (1, Some(ErrorCode::Request)),
            (2, Some(ErrorCode::Request)),
            (3, Some(ErrorCode::Request)),
        ]
    );
    assert_eq!(harness.processor.pending_len(), 0);
    assert_eq!(harness.sensor.flushes(), 1);
    assert_eq!(harness.importer.locked_count(), 0);
    assert!(harness.sensor.dispatched().is_empty());
}

#[test]
fn test_flush_on_empty_queue() {
    let harness = Harness::new(3, Duration::from_secs(5));

    harness.processor.flush().unwrap();

    assert!(collect_events(&harness.events, 1, Duration::from_millis(100)).is_empty());
    assert_eq!(harness.sensor.flushes(), 1);
}

#[test]
fn test_processing_resumes_after_flush() {
    let harness = Harness::new(3, Duration::from_secs(5));
    harness.submit(1, harness.request_with_settings(1)).unwrap();
    harness.processor.flush().unwrap();
    let _ = collect_events(&harness.events, 1, Duration::from_secs(5));

    // Settings from the flushed request were never applied
    harness.submit(2, harness.request_with_settings(2)).unwrap();
    harness.sensor.open();

    assert_eq!(harness.sensor.wait_for_dispatched(1), vec![2]);
    let events = collect_events(&harness.events, 1, Duration::from_secs(5));
    assert!(matches!(&events[0], Event::Result(r) if r.frame_number == 2));
}

#[test]
fn test_flushed_request_without_outputs_uses_request_callback() {
    let harness = Harness::new(3, Duration::from_secs(5));
    let settings = harness
        .processor
        .get_default_request(emucam_core::RequestTemplate::Preview)
        .unwrap();
    harness
        .submit(4, PipelineRequest::new(0, Vec::new()).with_settings(settings))
        .unwrap();

    harness.processor.flush().unwrap();

    let events = collect_events(&harness.events, 1, Duration::from_secs(5));
    match &events[0] {
        Event::Notify(pipeline_id, msg) => {
            assert_eq!(*pipeline_id, 0);
            assert_eq!(msg.frame_number(), 4);
            assert_eq!(msg.error_code(), Some(ErrorCode::Request));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_sensor_flush_error_is_returned() {
    let sensor = Arc::new(
        MockSensor::builder()
            .frame_interval(Duration::from_millis(5))
            .error_config(ErrorConfig::scenario(ErrorScenario::AlwaysFail {
                operation: "flush",
            }))
            .build()
            .unwrap(),
    );
    let importer = Arc::new(MockImporter::new());
    let processor = RequestProcessor::new(
        common::processor_config(3, Duration::from_secs(1)),
        sensor.clone(),
        Box::new(MockRequestState::new(0, 3)),
        importer.clone(),
    )
    .unwrap();
    processor
        .initialize(default_characteristics(640, 480))
        .unwrap();

    let err = processor.flush().unwrap_err();
    assert!(matches!(err, HalError::Sensor(_)));
    assert_eq!(processor.pending_len(), 0);

    // Still usable
    let pipelines = [Pipeline::new(
        0,
        PipelineCallback::discard(),
        [common::rgba_stream(0)],
    )];
    let request = PipelineRequest::new(
        0,
        vec![StreamBuffer::new(0, 1, importer.allocate(common::RGBA_SIZE))],
    );
    processor
        .process_pipeline_requests(1, &[request], &pipelines)
        .unwrap();
}
