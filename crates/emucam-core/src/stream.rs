//! Stream descriptors.

use crate::format::{DataSpace, PixelFormat};
use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Memory usage flags passed to the importer when locking a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageFlags(pub u64);

impl UsageFlags {
    /// No CPU access.
    pub const NONE: UsageFlags = UsageFlags(0);
    /// CPU reads the buffer often.
    pub const CPU_READ_OFTEN: UsageFlags = UsageFlags(0x3);
    /// CPU writes the buffer often.
    pub const CPU_WRITE_OFTEN: UsageFlags = UsageFlags(0x30);

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: UsageFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UsageFlags {
    type Output = UsageFlags;

    fn bitor(self, rhs: UsageFlags) -> UsageFlags {
        UsageFlags(self.0 | rhs.0)
    }
}

/// A configured input or output surface.
///
/// Immutable for the lifetime of a pipeline; every buffer of the stream refers
/// to it by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Identity shared by all buffers of this stream.
    pub id: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Logical pixel format.
    pub format: PixelFormat,
    /// Color space tag.
    #[serde(default)]
    pub data_space: DataSpace,
    /// Declared buffer size in bytes (only used by opaque formats).
    #[serde(default)]
    pub buffer_size: u32,
    /// Usage flags used when locking buffers of this stream.
    #[serde(default = "default_usage")]
    pub producer_usage: UsageFlags,
    /// Input (reprocess) stream rather than an output stream.
    #[serde(default)]
    pub is_input: bool,
}

fn default_usage() -> UsageFlags {
    UsageFlags::CPU_WRITE_OFTEN
}

impl StreamDescriptor {
    /// Output stream with CPU write usage and an unknown data space.
    pub fn output(id: u32, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            id,
            width,
            height,
            format,
            data_space: DataSpace::Unknown,
            buffer_size: 0,
            producer_usage: UsageFlags::CPU_WRITE_OFTEN,
            is_input: false,
        }
    }

    /// Input stream with CPU read usage.
    pub fn input(id: u32, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            producer_usage: UsageFlags::CPU_READ_OFTEN,
            is_input: true,
            ..Self::output(id, width, height, format)
        }
    }

    /// Set the data space.
    pub fn with_data_space(mut self, data_space: DataSpace) -> Self {
        self.data_space = data_space;
        self
    }

    /// Set the declared buffer size.
    pub fn with_buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}
