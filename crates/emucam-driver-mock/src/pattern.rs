//! Test pattern generation for simulated frames.
//!
//! Patterns are cheap and deterministic so tests can check which frame landed
//! in which buffer: every flat buffer gets a diagonal gradient offset by the
//! frame number, and YCbCr buffers get a luma gradient with constant chroma.

use emucam_core::{FlatPlane, PixelFormat, PlaneLayout, SensorBuffer, YCbCrPlanes};

/// Neutral chroma value.
pub const CHROMA_NEUTRAL: u8 = 128;

/// Pixel value the pattern writes at row 0, column 0 of a frame.
pub fn origin_value(frame_number: u32) -> u8 {
    (frame_number % 256) as u8
}

/// Fill `buffer` with the test pattern for its frame.
pub fn fill_buffer(buffer: &mut SensorBuffer) {
    let frame_number = buffer.frame_number;
    let (width, height, format) = (buffer.width, buffer.height, buffer.format);
    match &mut buffer.plane {
        PlaneLayout::Flat(plane) => fill_flat(plane, width, height, format, frame_number),
        PlaneLayout::YCbCr(planes) => fill_ycbcr(planes, width, height, frame_number),
    }
}

fn fill_flat(plane: &mut FlatPlane, width: u32, height: u32, format: PixelFormat, frame_number: u32) {
    let stride = plane.stride as usize;
    let data = plane.region.as_mut_slice();

    // Opaque formats have no rows; stamp a header and zero the rest
    if format == PixelFormat::Blob || stride == 0 {
        data.fill(0);
        let stamp = frame_number.to_le_bytes();
        let n = stamp.len().min(data.len());
        data[..n].copy_from_slice(&stamp[..n]);
        return;
    }

    let base = origin_value(frame_number) as usize;
    for (y, row) in data.chunks_mut(stride).take(height as usize).enumerate() {
        let bytes_per_row = row.len().min(width as usize * bytes_per_pixel(format));
        for (x, byte) in row[..bytes_per_row].iter_mut().enumerate() {
            *byte = ((base + x + y) & 0xFF) as u8;
        }
    }
}

fn fill_ycbcr(planes: &mut YCbCrPlanes, width: u32, height: u32, frame_number: u32) {
    let base = origin_value(frame_number) as usize;
    let y_stride = planes.y_stride as usize;
    if y_stride > 0 {
        for (y, row) in planes.y.as_mut_slice().chunks_mut(y_stride).take(height as usize).enumerate() {
            let n = row.len().min(width as usize);
            for (x, byte) in row[..n].iter_mut().enumerate() {
                *byte = ((base + x + y) & 0xFF) as u8;
            }
        }
    }
    planes.cb.as_mut_slice().fill(CHROMA_NEUTRAL);
    planes.cr.as_mut_slice().fill(CHROMA_NEUTRAL);
}

fn bytes_per_pixel(format: PixelFormat) -> usize {
    match format {
        PixelFormat::Rgba8888 => 4,
        PixelFormat::Rgb888 => 3,
        PixelFormat::Raw16 | PixelFormat::Y16 => 2,
        _ => 1,
    }
}
