//! Settings interpretation for the simulated sensor.
//!
//! Understands a handful of control tags: control mode, AE mode, the AE target
//! frame rate range and the manual sensor tags. With AE on, exposure tracks a
//! target derived from the frame rate range; with AE or control mode off, the
//! manual values are validated against the static sensor ranges.

use emucam_core::metadata::tags;
use emucam_core::{
    CameraMetadata, HalError, HalResult, MetadataEntry, PipelineResult, RequestState,
    RequestTemplate, SensorSettings,
};
use std::collections::HashMap;
use tracing::{debug, error};

/// Shortest frame duration the sensor supports.
pub const MIN_FRAME_DURATION_NS: i64 = 33_331_760;
/// Longest frame duration the sensor supports.
pub const MAX_FRAME_DURATION_NS: i64 = 30_000_000_000;
/// Supported exposure range.
pub const EXPOSURE_TIME_RANGE_NS: (i64, i64) = (1_000, 30_000_000_000);
/// Supported sensitivity range.
pub const SENSITIVITY_RANGE: (i32, i32) = (100, 1600);

const DEFAULT_EXPOSURE_TIME_NS: i64 = 15_000_000;
const DEFAULT_SENSITIVITY: i32 = 100;
const EXPOSURE_TRACK_RATE: f64 = 0.2;
const AVAILABLE_FPS_RANGES: [(i32, i32); 2] = [(15, 30), (30, 30)];

const CONTROL_MODE_OFF: u8 = 0;
const CONTROL_MODE_AUTO: u8 = 1;
const AE_MODE_OFF: u8 = 0;
const AE_MODE_ON: u8 = 1;

/// Static characteristics of the simulated sensor.
pub fn default_characteristics(width: i32, height: i32) -> CameraMetadata {
    CameraMetadata::new()
        .with(
            tags::SENSOR_INFO_EXPOSURE_TIME_RANGE,
            MetadataEntry::Int64(vec![EXPOSURE_TIME_RANGE_NS.0, EXPOSURE_TIME_RANGE_NS.1]),
        )
        .with(
            tags::SENSOR_INFO_SENSITIVITY_RANGE,
            MetadataEntry::Int32(vec![SENSITIVITY_RANGE.0, SENSITIVITY_RANGE.1]),
        )
        .with(
            tags::SENSOR_INFO_MAX_FRAME_DURATION,
            MetadataEntry::Int64(vec![MAX_FRAME_DURATION_NS]),
        )
        .with(
            tags::SENSOR_INFO_PIXEL_ARRAY_SIZE,
            MetadataEntry::Int32(vec![width, height]),
        )
}

#[derive(Debug, Clone, Copy)]
struct SensorRanges {
    exposure: (i64, i64),
    sensitivity: (i32, i32),
    max_frame_duration: i64,
}

/// Request state for the mock sensor.
#[derive(Debug)]
pub struct MockRequestState {
    camera_id: u32,
    pipeline_depth: u8,
    ranges: Option<SensorRanges>,
    default_requests: HashMap<RequestTemplate, CameraMetadata>,
    control_mode: u8,
    ae_mode: u8,
    exposure_time_ns: i64,
    frame_duration_ns: i64,
    sensitivity: i32,
}

impl MockRequestState {
    /// Uninitialized request state reporting `pipeline_depth` in its results.
    pub fn new(camera_id: u32, pipeline_depth: u8) -> Self {
        Self {
            camera_id,
            pipeline_depth,
            ranges: None,
            default_requests: HashMap::new(),
            control_mode: CONTROL_MODE_AUTO,
            ae_mode: AE_MODE_ON,
            exposure_time_ns: DEFAULT_EXPOSURE_TIME_NS,
            frame_duration_ns: MIN_FRAME_DURATION_NS,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }

    fn ranges(&self) -> HalResult<SensorRanges> {
        self.ranges
            .ok_or_else(|| HalError::NoInit("request state is not initialized".into()))
    }

    fn build_default_requests(&mut self) {
        for template in RequestTemplate::ALL {
            let mut request = CameraMetadata::new().with(
                tags::CONTROL_CAPTURE_INTENT,
                MetadataEntry::Byte(vec![template.capture_intent()]),
            );
            if template == RequestTemplate::Manual {
                request
                    .set(tags::CONTROL_MODE, MetadataEntry::Byte(vec![CONTROL_MODE_OFF]))
                    .set(tags::CONTROL_AE_MODE, MetadataEntry::Byte(vec![AE_MODE_OFF]))
                    .set(
                        tags::SENSOR_EXPOSURE_TIME,
                        MetadataEntry::Int64(vec![self.exposure_time_ns]),
                    )
                    .set(
                        tags::SENSOR_FRAME_DURATION,
                        MetadataEntry::Int64(vec![self.frame_duration_ns]),
                    )
                    .set(
                        tags::SENSOR_SENSITIVITY,
                        MetadataEntry::Int32(vec![self.sensitivity]),
                    );
            } else {
                let fps = match template {
                    RequestTemplate::VideoRecord | RequestTemplate::VideoSnapshot => (30, 30),
                    _ => (15, 30),
                };
                request
                    .set(tags::CONTROL_MODE, MetadataEntry::Byte(vec![CONTROL_MODE_AUTO]))
                    .set(tags::CONTROL_AE_MODE, MetadataEntry::Byte(vec![AE_MODE_ON]))
                    .set(
                        tags::CONTROL_AE_TARGET_FPS_RANGE,
                        MetadataEntry::Int32(vec![fps.0, fps.1]),
                    );
            }
            self.default_requests.insert(template, request);
        }
    }

    fn apply_manual(&mut self, settings: &CameraMetadata, ranges: SensorRanges) -> HalResult<()> {
        if let Some(exposure) = settings.get_i64(tags::SENSOR_EXPOSURE_TIME) {
            if !(ranges.exposure.0..=ranges.exposure.1).contains(&exposure) {
                return Err(out_of_range("exposure time", exposure, ranges.exposure));
            }
            self.exposure_time_ns = exposure;
        }
        if let Some(duration) = settings.get_i64(tags::SENSOR_FRAME_DURATION) {
            let range = (MIN_FRAME_DURATION_NS, ranges.max_frame_duration);
            if !(range.0..=range.1).contains(&duration) {
                return Err(out_of_range("frame duration", duration, range));
            }
            self.frame_duration_ns = duration;
        }
        if let Some(sensitivity) = settings.get_i32(tags::SENSOR_SENSITIVITY) {
            if !(ranges.sensitivity.0..=ranges.sensitivity.1).contains(&sensitivity) {
                return Err(out_of_range("sensitivity", sensitivity, ranges.sensitivity));
            }
            self.sensitivity = sensitivity;
        }
        Ok(())
    }

    fn apply_auto_exposure(&mut self, settings: &CameraMetadata, ranges: SensorRanges) -> HalResult<()> {
        let fps = match settings.get_i32_pair(tags::CONTROL_AE_TARGET_FPS_RANGE) {
            Some(requested) => AVAILABLE_FPS_RANGES
                .into_iter()
                .find(|range| *range == requested)
                .ok_or_else(|| {
                    HalError::InvalidArgument(format!(
                        "unsupported frame rate range [{}, {}]",
                        requested.0, requested.1
                    ))
                })?,
            None => AVAILABLE_FPS_RANGES[0],
        };

        let clamp_duration =
            |fps: i32| (1_000_000_000 / i64::from(fps.max(1))).clamp(MIN_FRAME_DURATION_NS, ranges.max_frame_duration);
        self.frame_duration_ns = (clamp_duration(fps.0) + clamp_duration(fps.1)) / 2;

        let target = (self.frame_duration_ns / 2).clamp(ranges.exposure.0, ranges.exposure.1);
        let step = ((target - self.exposure_time_ns) as f64 * EXPOSURE_TRACK_RATE) as i64;
        self.exposure_time_ns = if step == 0 { target } else { self.exposure_time_ns + step };
        Ok(())
    }
}

fn out_of_range<T: std::fmt::Display>(what: &str, value: T, range: (T, T)) -> HalError {
    error!("{} {} not within supported range [{}, {}]", what, value, range.0, range.1);
    HalError::InvalidArgument(format!(
        "{what} {value} not within supported range [{}, {}]",
        range.0, range.1
    ))
}

impl RequestState for MockRequestState {
    fn initialize(&mut self, static_characteristics: CameraMetadata) -> HalResult<()> {
        let missing = |tag: &str| HalError::InvalidArgument(format!("static characteristics lack {tag}"));
        let exposure = static_characteristics
            .get_i64_pair(tags::SENSOR_INFO_EXPOSURE_TIME_RANGE)
            .ok_or_else(|| missing("the exposure time range"))?;
        let sensitivity = static_characteristics
            .get_i32_pair(tags::SENSOR_INFO_SENSITIVITY_RANGE)
            .ok_or_else(|| missing("the sensitivity range"))?;
        let max_frame_duration = static_characteristics
            .get_i64(tags::SENSOR_INFO_MAX_FRAME_DURATION)
            .ok_or_else(|| missing("the maximum frame duration"))?;

        if exposure.0 > exposure.1 || sensitivity.0 > sensitivity.1 {
            return Err(HalError::InvalidArgument("inverted sensor range".into()));
        }
        if max_frame_duration < MIN_FRAME_DURATION_NS {
            return Err(HalError::InvalidArgument(format!(
                "maximum frame duration {max_frame_duration} below {MIN_FRAME_DURATION_NS}"
            )));
        }

        self.ranges = Some(SensorRanges {
            exposure,
            sensitivity,
            max_frame_duration,
        });
        self.exposure_time_ns = DEFAULT_EXPOSURE_TIME_NS.clamp(exposure.0, exposure.1);
        self.sensitivity = DEFAULT_SENSITIVITY.clamp(sensitivity.0, sensitivity.1);
        self.build_default_requests();
        debug!(camera_id = self.camera_id, "request state initialized");
        Ok(())
    }

    fn initialize_sensor_settings(&mut self, settings: CameraMetadata) -> HalResult<SensorSettings> {
        let ranges = self.ranges()?;

        if let Some(mode) = settings.get_u8(tags::CONTROL_MODE) {
            if mode > CONTROL_MODE_AUTO {
                return Err(HalError::InvalidArgument(format!("control mode {mode} not supported")));
            }
            self.control_mode = mode;
        }
        if let Some(mode) = settings.get_u8(tags::CONTROL_AE_MODE) {
            if mode > AE_MODE_ON {
                return Err(HalError::InvalidArgument(format!("AE mode {mode} not supported")));
            }
            self.ae_mode = mode;
        }

        if self.control_mode == CONTROL_MODE_OFF || self.ae_mode == AE_MODE_OFF {
            self.apply_manual(&settings, ranges)?;
        } else {
            self.apply_auto_exposure(&settings, ranges)?;
        }

        // Exposure cannot outlast the frame
        self.frame_duration_ns = self.frame_duration_ns.max(self.exposure_time_ns);

        Ok(SensorSettings {
            exposure_time_ns: self.exposure_time_ns.max(0) as u64,
            frame_duration_ns: self.frame_duration_ns.max(0) as u64,
            gain: self.sensitivity.max(0) as u32,
        })
    }

    fn initialize_result(&mut self, pipeline_id: u32, frame_number: u32) -> PipelineResult {
        let metadata = CameraMetadata::new()
            .with(tags::CONTROL_MODE, MetadataEntry::Byte(vec![self.control_mode]))
            .with(tags::CONTROL_AE_MODE, MetadataEntry::Byte(vec![self.ae_mode]))
            .with(
                tags::REQUEST_PIPELINE_DEPTH,
                MetadataEntry::Byte(vec![self.pipeline_depth]),
            )
            .with(
                tags::SENSOR_EXPOSURE_TIME,
                MetadataEntry::Int64(vec![self.exposure_time_ns]),
            )
            .with(
                tags::SENSOR_FRAME_DURATION,
                MetadataEntry::Int64(vec![self.frame_duration_ns]),
            )
            .with(tags::SENSOR_SENSITIVITY, MetadataEntry::Int32(vec![self.sensitivity]));

        PipelineResult {
            camera_id: self.camera_id,
            pipeline_id,
            frame_number,
            result_metadata: Some(metadata),
            partial_result: 1,
            ..Default::default()
        }
    }

    fn get_default_request(&self, template: RequestTemplate) -> HalResult<CameraMetadata> {
        self.ranges()?;
        self.default_requests
            .get(&template)
            .cloned()
            .ok_or_else(|| HalError::InvalidArgument(format!("no default request for {template:?}")))
    }
}
