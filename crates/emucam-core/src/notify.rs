//! Notification messages, results and the per-pipeline callback.

use crate::buffer::StreamBuffer;
use crate::metadata::CameraMetadata;
use std::fmt;
use std::sync::Arc;

/// Error codes carried by an error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The device is unusable.
    Device,
    /// The whole request failed; no result or buffers will follow.
    Request,
    /// The result metadata for the frame will not be delivered.
    Result,
    /// A single buffer failed.
    Buffer,
}

/// Kind of a [`NotifyMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Error notification.
    Error,
    /// Start-of-exposure notification.
    Shutter,
}

/// Payload of an error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Frame the error refers to.
    pub frame_number: u32,
    /// Offending stream, if the error is stream specific.
    pub error_stream_id: Option<i32>,
    /// What failed.
    pub error_code: ErrorCode,
}

/// Payload of a shutter notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutterMessage {
    /// Frame being exposed.
    pub frame_number: u32,
    /// Start of exposure in nanoseconds.
    pub timestamp_ns: u64,
}

/// Asynchronous notification delivered through [`PipelineCallback::notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMessage {
    /// Something failed.
    Error(ErrorMessage),
    /// Exposure started.
    Shutter(ShutterMessage),
}

impl NotifyMessage {
    /// Error notification not tied to a specific stream.
    pub fn error(frame_number: u32, error_code: ErrorCode) -> Self {
        NotifyMessage::Error(ErrorMessage {
            frame_number,
            error_stream_id: None,
            error_code,
        })
    }

    /// Kind of message.
    pub fn message_type(&self) -> MessageType {
        match self {
            NotifyMessage::Error(_) => MessageType::Error,
            NotifyMessage::Shutter(_) => MessageType::Shutter,
        }
    }

    /// Frame the message refers to.
    pub fn frame_number(&self) -> u32 {
        match self {
            NotifyMessage::Error(msg) => msg.frame_number,
            NotifyMessage::Shutter(msg) => msg.frame_number,
        }
    }

    /// Error code, for error notifications.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            NotifyMessage::Error(msg) => Some(msg.error_code),
            NotifyMessage::Shutter(_) => None,
        }
    }
}

/// Completed (or failed) capture handed back through [`PipelineCallback::process_result`].
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Camera that produced the result.
    pub camera_id: u32,
    /// Pipeline the request was submitted on.
    pub pipeline_id: u32,
    /// Frame number of the request.
    pub frame_number: u32,
    /// Result metadata, if any.
    pub result_metadata: Option<CameraMetadata>,
    /// Output buffers with their final status.
    pub output_buffers: Vec<StreamBuffer>,
    /// Input buffers with their final status.
    pub input_buffers: Vec<StreamBuffer>,
    /// Partial result index; 1 for a single complete result.
    pub partial_result: u32,
}

type NotifyFn = dyn Fn(u32, NotifyMessage) + Send + Sync;
type ResultFn = dyn Fn(PipelineResult) + Send + Sync;

/// Completion callbacks shared by every buffer of a pipeline.
#[derive(Clone)]
pub struct PipelineCallback {
    notify: Arc<NotifyFn>,
    process_result: Arc<ResultFn>,
}

impl PipelineCallback {
    /// Callback from a notify closure and a result closure.
    pub fn new<N, R>(notify: N, process_result: R) -> Self
    where
        N: Fn(u32, NotifyMessage) + Send + Sync + 'static,
        R: Fn(PipelineResult) + Send + Sync + 'static,
    {
        Self {
            notify: Arc::new(notify),
            process_result: Arc::new(process_result),
        }
    }

    /// Callback that drops everything it is given.
    pub fn discard() -> Self {
        Self::new(|_, _| {}, |_| {})
    }

    /// Deliver a notification for `pipeline_id`.
    pub fn notify(&self, pipeline_id: u32, message: NotifyMessage) {
        (self.notify)(pipeline_id, message);
    }

    /// Deliver a capture result.
    pub fn process_result(&self, result: PipelineResult) {
        (self.process_result)(result);
    }
}

impl fmt::Debug for PipelineCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCallback").finish_non_exhaustive()
    }
}
