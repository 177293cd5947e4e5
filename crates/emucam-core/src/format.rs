//! Pixel formats, data spaces and layout arithmetic.

use serde::{Deserialize, Serialize};

/// Logical pixel format of a stream.
///
/// The numeric codes returned by [`PixelFormat::raw`] match the graphics HAL
/// constants and are what log messages print.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 4 bytes per pixel, R G B A.
    Rgba8888,
    /// 3 bytes per pixel, R G B.
    Rgb888,
    /// 16-bit bayer raw.
    Raw16,
    /// Packed 10-bit raw. No layout is defined for it.
    Raw10,
    /// Opaque compressed payload (JPEG) sized by the stream's declared buffer size.
    Blob,
    /// 16-bit single channel, used for depth.
    Y16,
    /// Planar YCbCr 4:2:0 with a layout supplied by the memory importer.
    #[serde(rename = "ycbcr_420_888")]
    YCbCr420_888,
    /// Producer-chosen format; only meaningful after normalization.
    ImplementationDefined,
}

impl PixelFormat {
    /// Graphics HAL code for this format.
    pub const fn raw(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 => 0x1,
            PixelFormat::Rgb888 => 0x3,
            PixelFormat::Raw16 => 0x20,
            PixelFormat::Raw10 => 0x25,
            PixelFormat::Blob => 0x21,
            PixelFormat::Y16 => 0x2036_3159,
            PixelFormat::YCbCr420_888 => 0x23,
            PixelFormat::ImplementationDefined => 0x22,
        }
    }

    /// Format an input (reprocess) stream is actually read in.
    ///
    /// Producer-defined input buffers are always YCbCr 4:2:0; every other
    /// format is left as declared.
    pub const fn normalized_input(self) -> PixelFormat {
        match self {
            PixelFormat::ImplementationDefined => PixelFormat::YCbCr420_888,
            other => other,
        }
    }
}

/// Color space tag attached to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSpace {
    /// No color space declared.
    #[default]
    Unknown,
    /// Arbitrary, producer-interpreted data.
    Arbitrary,
    /// Depth samples.
    Depth,
    /// JPEG File Interchange Format.
    V0Jfif,
    /// sRGB.
    V0Srgb,
}

/// Round `value` up to the next multiple of `alignment`.
///
/// An alignment of zero leaves the value untouched.
pub const fn align_to(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    let delta = value % alignment;
    if delta == 0 {
        value
    } else {
        value + (alignment - delta)
    }
}
