//! Pipelines and capture requests as submitted by the caller.

use crate::buffer::StreamBuffer;
use crate::metadata::CameraMetadata;
use crate::notify::PipelineCallback;
use crate::stream::StreamDescriptor;
use std::collections::HashMap;

/// A configured set of streams sharing one completion callback.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Index of this pipeline in the pipeline table.
    pub pipeline_id: u32,
    /// Physical camera backing the pipeline.
    pub physical_camera_id: u32,
    /// Completion callback shared by every buffer of the pipeline.
    pub callback: PipelineCallback,
    /// Stream id → stream.
    pub streams: HashMap<u32, StreamDescriptor>,
}

impl Pipeline {
    /// Pipeline over `streams`.
    pub fn new(
        pipeline_id: u32,
        callback: PipelineCallback,
        streams: impl IntoIterator<Item = StreamDescriptor>,
    ) -> Self {
        Self {
            pipeline_id,
            physical_camera_id: 0,
            callback,
            streams: streams.into_iter().map(|s| (s.id, s)).collect(),
        }
    }
}

/// One capture request for one pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    /// Index into the pipeline table passed alongside the request.
    pub pipeline_id: u32,
    /// Settings for this frame; `None` reuses the last applied settings.
    pub settings: Option<CameraMetadata>,
    /// Reprocess input buffers.
    pub input_buffers: Vec<StreamBuffer>,
    /// Output buffers to fill.
    pub output_buffers: Vec<StreamBuffer>,
}

impl PipelineRequest {
    /// Request with output buffers and no settings.
    pub fn new(pipeline_id: u32, output_buffers: Vec<StreamBuffer>) -> Self {
        Self {
            pipeline_id,
            settings: None,
            input_buffers: Vec::new(),
            output_buffers,
        }
    }

    /// Attach settings.
    pub fn with_settings(mut self, settings: CameraMetadata) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Attach input buffers.
    pub fn with_input_buffers(mut self, input_buffers: Vec<StreamBuffer>) -> Self {
        self.input_buffers = input_buffers;
        self
    }
}
