//! Error types for the request pipeline.
//!
//! `HalError` is the status returned by every synchronous operation of the
//! request processor and its collaborators. Its variants follow the failure
//! categories the processor distinguishes:
//!
//! - **`InvalidArgument`** / **`UnsupportedFormat`**: the call is rejected and no
//!   state changes for the offending entry.
//! - **`TimedOut`**: the submission queue stayed full for longer than the maximum
//!   frame duration. Entries queued earlier in the same call stay queued.
//! - **`Import`**: a single buffer could not be locked or its fence could not be
//!   imported. This never escapes the resolver as a call status; the buffer is
//!   dropped from the resolved set.
//! - **`Fence`**: a fence wait timed out or failed. Logged, and the buffer is
//!   still handed to the sensor.
//! - **`NoInit`**: a collaborator was used before it was initialized.
//! - **`Sensor`** / **`Thread`**: the sensor collaborator or the worker thread
//!   reported a failure.
//!
//! Request-level failures are not errors in this sense at all: they surface
//! asynchronously as [`crate::NotifyMessage::Error`] notifications.

use crate::format::{DataSpace, PixelFormat};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`HalError`].
pub type HalResult<T> = std::result::Result<T, HalError>;

/// Failure while waiting on an acquire fence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FenceError {
    /// The fence was not signaled within the allowed time.
    #[error("fence wait timed out after {0:?}")]
    Timeout(Duration),

    /// The fence was signaled with an error by its producer.
    #[error("fence signaled an error: {0}")]
    Signaled(String),
}

/// Primary error type of the emulated camera pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// An argument was out of range or otherwise unusable (e.g. unknown pipeline id).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream's pixel format (or format/data space combination) has no layout.
    #[error("Unsupported pixel format 0x{:x} ({format:?}) with data space {data_space:?}", .format.raw())]
    UnsupportedFormat {
        /// Offending format.
        format: PixelFormat,
        /// Data space the format was paired with.
        data_space: DataSpace,
    },

    /// A bounded wait elapsed.
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// A collaborator was used before initialization.
    #[error("Not initialized: {0}")]
    NoInit(String),

    /// Locking buffer memory or importing a fence handle failed.
    #[error("Buffer import failed: {0}")]
    Import(String),

    /// Waiting on an imported fence failed.
    #[error("Fence error: {0}")]
    Fence(#[from] FenceError),

    /// The sensor collaborator reported a failure.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// The dedicated worker thread could not be started.
    #[error("Worker thread error: {0}")]
    Thread(String),
}

impl HalError {
    /// True for the bounded-wait failures (`TimedOut` and fence timeouts).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HalError::TimedOut(_) | HalError::Fence(FenceError::Timeout(_))
        )
    }

    /// True for synchronous argument rejections, including unsupported formats.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            HalError::InvalidArgument(_) | HalError::UnsupportedFormat { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(HalError::TimedOut("queue".into()).is_timeout());
        assert!(HalError::from(FenceError::Timeout(Duration::from_millis(5))).is_timeout());
        assert!(!HalError::Sensor("boom".into()).is_timeout());

        let unsupported = HalError::UnsupportedFormat {
            format: PixelFormat::Raw10,
            data_space: DataSpace::Unknown,
        };
        assert!(unsupported.is_invalid_argument());
        assert!(HalError::InvalidArgument("pipeline".into()).is_invalid_argument());
        assert!(!HalError::NoInit("state".into()).is_invalid_argument());
    }

    #[test]
    fn test_unsupported_format_message_uses_hex_code() {
        let err = HalError::UnsupportedFormat {
            format: PixelFormat::Raw10,
            data_space: DataSpace::Unknown,
        };
        assert!(err.to_string().contains("0x25"));
    }
}
