//! Opaque request settings and the sensor-native parameters derived from them.
//!
//! The processor never interprets [`CameraMetadata`] itself; it only clones it,
//! remembers the last applied blob and hands it to the [`crate::RequestState`]
//! collaborator, which turns it into [`SensorSettings`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tags understood by the bundled request-state implementations.
pub mod tags {
    /// `u8`: capture intent, see [`super::RequestTemplate::capture_intent`].
    pub const CONTROL_CAPTURE_INTENT: u32 = 0x1_0012;
    /// `u8`: 0 = off, 1 = auto.
    pub const CONTROL_MODE: u32 = 0x1_0011;
    /// `u8`: 0 = off, 1 = on.
    pub const CONTROL_AE_MODE: u32 = 0x1_0003;
    /// `i32` pair: target frame rate range.
    pub const CONTROL_AE_TARGET_FPS_RANGE: u32 = 0x1_0005;
    /// `u8`: request pipeline depth reported in results.
    pub const REQUEST_PIPELINE_DEPTH: u32 = 0xC_0009;
    /// `i64`: exposure time in nanoseconds.
    pub const SENSOR_EXPOSURE_TIME: u32 = 0xE_0000;
    /// `i64`: frame duration in nanoseconds.
    pub const SENSOR_FRAME_DURATION: u32 = 0xE_0001;
    /// `i32`: sensitivity (ISO).
    pub const SENSOR_SENSITIVITY: u32 = 0xE_0002;
    /// `i64`: start of exposure, reported in results.
    pub const SENSOR_TIMESTAMP: u32 = 0xE_0010;
    /// `i32` pair: supported sensitivity range (static).
    pub const SENSOR_INFO_SENSITIVITY_RANGE: u32 = 0xF_0001;
    /// `i64` pair: supported exposure range (static).
    pub const SENSOR_INFO_EXPOSURE_TIME_RANGE: u32 = 0xF_0003;
    /// `i64`: longest supported frame duration (static).
    pub const SENSOR_INFO_MAX_FRAME_DURATION: u32 = 0xF_0004;
    /// `i32` pair: pixel array size (static).
    pub const SENSOR_INFO_PIXEL_ARRAY_SIZE: u32 = 0xF_0006;
}

/// Typed values stored under a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataEntry {
    /// Unsigned bytes (enums, booleans).
    Byte(Vec<u8>),
    /// 32-bit integers.
    Int32(Vec<i32>),
    /// 64-bit integers (durations, timestamps).
    Int64(Vec<i64>),
    /// Single precision floats.
    Float(Vec<f32>),
}

/// Ordered tag → value map used for request settings, results and static
/// characteristics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraMetadata {
    entries: BTreeMap<u32, MetadataEntry>,
}

impl CameraMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn set(&mut self, tag: u32, entry: MetadataEntry) -> &mut Self {
        self.entries.insert(tag, entry);
        self
    }

    /// Builder-style [`CameraMetadata::set`].
    pub fn with(mut self, tag: u32, entry: MetadataEntry) -> Self {
        self.set(tag, entry);
        self
    }

    /// Raw entry for `tag`.
    pub fn get(&self, tag: u32) -> Option<&MetadataEntry> {
        self.entries.get(&tag)
    }

    /// True if `tag` is present.
    pub fn contains(&self, tag: u32) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Remove an entry.
    pub fn remove(&mut self, tag: u32) -> Option<MetadataEntry> {
        self.entries.remove(&tag)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Single `u8` value.
    pub fn get_u8(&self, tag: u32) -> Option<u8> {
        match self.get(tag)? {
            MetadataEntry::Byte(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }

    /// Single `i32` value.
    pub fn get_i32(&self, tag: u32) -> Option<i32> {
        match self.get(tag)? {
            MetadataEntry::Int32(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }

    /// Single `i64` value.
    pub fn get_i64(&self, tag: u32) -> Option<i64> {
        match self.get(tag)? {
            MetadataEntry::Int64(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }

    /// `i32` pair, e.g. a range.
    pub fn get_i32_pair(&self, tag: u32) -> Option<(i32, i32)> {
        match self.get(tag)? {
            MetadataEntry::Int32(values) if values.len() == 2 => Some((values[0], values[1])),
            _ => None,
        }
    }

    /// `i64` pair, e.g. a range.
    pub fn get_i64_pair(&self, tag: u32) -> Option<(i64, i64)> {
        match self.get(tag)? {
            MetadataEntry::Int64(values) if values.len() == 2 => Some((values[0], values[1])),
            _ => None,
        }
    }
}

/// Default-request templates a client can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestTemplate {
    /// Viewfinder preview.
    Preview,
    /// Still capture.
    StillCapture,
    /// Video recording.
    VideoRecord,
    /// Still capture during video recording.
    VideoSnapshot,
    /// Zero shutter lag capture.
    ZeroShutterLag,
    /// Fully manual control.
    Manual,
}

impl RequestTemplate {
    /// Every template, in capture-intent order.
    pub const ALL: [RequestTemplate; 6] = [
        RequestTemplate::Preview,
        RequestTemplate::StillCapture,
        RequestTemplate::VideoRecord,
        RequestTemplate::VideoSnapshot,
        RequestTemplate::ZeroShutterLag,
        RequestTemplate::Manual,
    ];

    /// Capture intent value stored under [`tags::CONTROL_CAPTURE_INTENT`].
    pub const fn capture_intent(self) -> u8 {
        match self {
            RequestTemplate::Preview => 1,
            RequestTemplate::StillCapture => 2,
            RequestTemplate::VideoRecord => 3,
            RequestTemplate::VideoSnapshot => 4,
            RequestTemplate::ZeroShutterLag => 5,
            RequestTemplate::Manual => 6,
        }
    }
}

/// Sensor-native parameters for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSettings {
    /// Exposure time in nanoseconds.
    pub exposure_time_ns: u64,
    /// Frame duration in nanoseconds.
    pub frame_duration_ns: u64,
    /// Analog gain (ISO sensitivity).
    pub gain: u32,
}
