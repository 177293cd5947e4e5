//! Buffer resolution.
//!
//! Turns submitted [`StreamBuffer`]s into [`SensorBuffer`] records: looks up the
//! stream, computes the memory layout for its pixel format, locks the memory
//! and imports the acquire fence. Every failure is local to one buffer, which
//! is logged and left out of the returned set.

use emucam_core::{
    align_to, BufferImporter, BufferLock, BufferStatus, Buffers, DataSpace, FlatPlane, HalError,
    HalResult, PipelineCallback, PixelFormat, PlaneLayout, Rect, SensorBuffer, StreamBuffer,
    StreamDescriptor,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, trace};

/// Row stride and total size of a single-plane buffer, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatGeometry {
    /// Bytes per row (equal to `size` for opaque payloads).
    pub stride: u32,
    /// Bytes to lock.
    pub size: u32,
}

/// Stride and size for every non-planar format.
///
/// | Format | Stride | Size |
/// |---|---|---|
/// | `Rgb888` | width × 3 | stride × width |
/// | `Rgba8888` | width × 4 | stride × width |
/// | `Y16` (depth only) | align(align(width, 2) × 2, 16) | stride × align(height, 2) |
/// | `Blob` (JFIF only) | size | declared buffer size |
/// | `Raw16` | width × 2 | stride × width |
///
/// The packed RGB and raw sizes are computed from the width on both axes; the
/// sensor writes at most `height` rows into them.
pub fn buffer_size_and_stride(stream: &StreamDescriptor) -> HalResult<FlatGeometry> {
    let unsupported = || HalError::UnsupportedFormat {
        format: stream.format,
        data_space: stream.data_space,
    };
    let overflow = || {
        HalError::InvalidArgument(format!(
            "stream {} of {}x{} overflows a 32-bit buffer size",
            stream.id, stream.width, stream.height
        ))
    };
    let packed = |bytes_per_pixel: u32| -> HalResult<FlatGeometry> {
        let stride = stream.width.checked_mul(bytes_per_pixel).ok_or_else(overflow)?;
        let size = stride.checked_mul(stream.width).ok_or_else(overflow)?;
        Ok(FlatGeometry { stride, size })
    };

    match stream.format {
        PixelFormat::Rgb888 => packed(3),
        PixelFormat::Rgba8888 => packed(4),
        PixelFormat::Raw16 => packed(2),
        PixelFormat::Y16 if stream.data_space == DataSpace::Depth => {
            let stride = align_to(stream.width, 2)
                .checked_mul(2)
                .map(|row| align_to(row, 16))
                .ok_or_else(overflow)?;
            let size = stride
                .checked_mul(align_to(stream.height, 2))
                .ok_or_else(overflow)?;
            Ok(FlatGeometry { stride, size })
        }
        PixelFormat::Blob if stream.data_space == DataSpace::V0Jfif => Ok(FlatGeometry {
            stride: stream.buffer_size,
            size: stream.buffer_size,
        }),
        _ => Err(unsupported()),
    }
}

/// Resolves submitted buffers against a pipeline's stream table.
#[derive(Clone)]
pub struct BufferResolver {
    camera_id: u32,
    importer: Arc<dyn BufferImporter>,
}

impl BufferResolver {
    /// Resolver locking memory through `importer`.
    pub fn new(camera_id: u32, importer: Arc<dyn BufferImporter>) -> Self {
        Self {
            camera_id,
            importer,
        }
    }

    /// Resolve `buffers` in order, dropping the ones that cannot be resolved.
    ///
    /// Every returned record has status [`BufferStatus::Error`]
    /// until whoever completes the frame marks it.
    pub fn resolve(
        &self,
        frame_number: u32,
        buffers: &[StreamBuffer],
        streams: &HashMap<u32, StreamDescriptor>,
        pipeline_id: u32,
        callback: &PipelineCallback,
    ) -> Buffers {
        buffers
            .iter()
            .filter_map(|buffer| {
                let Some(stream) = streams.get(&buffer.stream_id) else {
                    error!(
                        frame_number,
                        pipeline_id,
                        stream_id = buffer.stream_id,
                        "Buffer refers to an unknown stream, dropping it"
                    );
                    return None;
                };
                self.resolve_one(frame_number, buffer, stream, pipeline_id, callback)
                    .map_err(|e| {
                        error!(
                            frame_number,
                            pipeline_id,
                            stream_id = buffer.stream_id,
                            error = %e,
                            "Failed to resolve buffer, dropping it"
                        );
                    })
                    .ok()
            })
            .collect()
    }

    fn resolve_one(
        &self,
        frame_number: u32,
        buffer: &StreamBuffer,
        declared: &StreamDescriptor,
        pipeline_id: u32,
        callback: &PipelineCallback,
    ) -> HalResult<SensorBuffer> {
        let mut stream = declared.clone();
        if stream.is_input {
            stream.format = stream.format.normalized_input();
        }

        let plane = self.lock_plane(&stream, buffer)?;
        // From here on the lock is released if anything else fails
        let lock = BufferLock::new(self.importer.clone(), buffer.buffer);

        let acquire_fence = match &buffer.acquire_fence {
            Some(handle) => Some(self.importer.import_fence(handle)?),
            None => None,
        };

        let mut stream_buffer = buffer.clone();
        stream_buffer.status = BufferStatus::Error;

        trace!(
            frame_number,
            stream_id = stream.id,
            format = ?stream.format,
            stride = plane.stride(),
            "Resolved buffer"
        );

        Ok(SensorBuffer {
            frame_number,
            pipeline_id,
            camera_id: self.camera_id,
            width: stream.width,
            height: stream.height,
            format: stream.format,
            data_space: stream.data_space,
            stream_buffer,
            plane,
            acquire_fence,
            callback: callback.clone(),
            is_input: stream.is_input,
            lock,
        })
    }

    fn lock_plane(&self, stream: &StreamDescriptor, buffer: &StreamBuffer) -> HalResult<PlaneLayout> {
        if stream.format == PixelFormat::YCbCr420_888 {
            let region = Rect {
                left: 0,
                top: 0,
                width: i32::try_from(stream.width)
                    .map_err(|_| HalError::InvalidArgument(format!("width {}", stream.width)))?,
                height: i32::try_from(stream.height)
                    .map_err(|_| HalError::InvalidArgument(format!("height {}", stream.height)))?,
            };
            let planes = self
                .importer
                .lock_ycbcr(&buffer.buffer, stream.producer_usage, region)?;
            return Ok(PlaneLayout::YCbCr(planes));
        }

        let geometry = buffer_size_and_stride(stream).inspect_err(|_| {
            error!(
                stream_id = stream.id,
                "Unsupported pixel format: 0x{:x}",
                stream.format.raw()
            );
        })?;
        let region = self
            .importer
            .lock(&buffer.buffer, stream.producer_usage, geometry.size)?;
        Ok(PlaneLayout::Flat(FlatPlane {
            region,
            stride: geometry.stride,
            buffer_size: geometry.size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emucam_core::{BufferHandle, FenceHandle, UsageFlags};
    use emucam_driver_mock::{ErrorConfig, ErrorScenario, MockImporter};
    use tracing_test::traced_test;

    fn stream(format: PixelFormat, width: u32, height: u32) -> StreamDescriptor {
        StreamDescriptor::output(0, width, height, format)
    }

    #[test]
    fn test_raw16_geometry() {
        let geometry = buffer_size_and_stride(&stream(PixelFormat::Raw16, 640, 480)).unwrap();
        assert_eq!(geometry, FlatGeometry { stride: 1280, size: 819_200 });
    }

    #[test]
    fn test_rgba_geometry() {
        let geometry = buffer_size_and_stride(&stream(PixelFormat::Rgba8888, 100, 50)).unwrap();
        assert_eq!(geometry, FlatGeometry { stride: 400, size: 40_000 });
    }

    #[test]
    fn test_rgb_geometry() {
        let geometry = buffer_size_and_stride(&stream(PixelFormat::Rgb888, 10, 4)).unwrap();
        assert_eq!(geometry, FlatGeometry { stride: 30, size: 300 });
    }

    #[test]
    fn test_blob_geometry_requires_jfif() {
        let jpeg = stream(PixelFormat::Blob, 640, 480)
            .with_data_space(DataSpace::V0Jfif)
            .with_buffer_size(65_536);
        assert_eq!(
            buffer_size_and_stride(&jpeg).unwrap(),
            FlatGeometry { stride: 65_536, size: 65_536 }
        );

        let opaque = stream(PixelFormat::Blob, 640, 480).with_buffer_size(65_536);
        assert!(matches!(
            buffer_size_and_stride(&opaque),
            Err(HalError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_depth_geometry_aligns() {
        let depth = stream(PixelFormat::Y16, 15, 9).with_data_space(DataSpace::Depth);
        // align(15, 2) = 16 → 32 bytes → already 16-aligned; height 9 → 10
        assert_eq!(
            buffer_size_and_stride(&depth).unwrap(),
            FlatGeometry { stride: 32, size: 320 }
        );

        let narrow = stream(PixelFormat::Y16, 3, 2).with_data_space(DataSpace::Depth);
        // align(3, 2) = 4 → 8 bytes → 16
        assert_eq!(buffer_size_and_stride(&narrow).unwrap().stride, 16);

        let not_depth = stream(PixelFormat::Y16, 16, 16);
        assert!(buffer_size_and_stride(&not_depth).is_err());
    }

    #[test]
    fn test_unsupported_formats() {
        for format in [
            PixelFormat::Raw10,
            PixelFormat::ImplementationDefined,
            PixelFormat::YCbCr420_888,
        ] {
            let err = buffer_size_and_stride(&stream(format, 64, 64)).unwrap_err();
            assert!(err.is_invalid_argument(), "{format:?}");
        }
    }

    #[test]
    fn test_geometry_overflow() {
        let huge = stream(PixelFormat::Rgba8888, 100_000, 10);
        assert!(matches!(
            buffer_size_and_stride(&huge),
            Err(HalError::InvalidArgument(_))
        ));
    }

    fn streams(descriptors: impl IntoIterator<Item = StreamDescriptor>) -> HashMap<u32, StreamDescriptor> {
        descriptors.into_iter().map(|s| (s.id, s)).collect()
    }

    #[test]
    fn test_resolve_flat_buffer() {
        let importer = Arc::new(MockImporter::new());
        let resolver = BufferResolver::new(3, importer.clone());
        let table = streams([StreamDescriptor::output(1, 100, 50, PixelFormat::Rgba8888)]);
        let handle = importer.allocate(40_000);

        let resolved = resolver.resolve(
            9,
            &[StreamBuffer::new(1, 77, handle)],
            &table,
            0,
            &PipelineCallback::discard(),
        );

        assert_eq!(resolved.len(), 1);
        let record = &resolved[0];
        assert_eq!(record.frame_number, 9);
        assert_eq!(record.camera_id, 3);
        assert_eq!(record.status(), BufferStatus::Error);
        assert_eq!(record.stream_buffer.buffer_id, 77);
        assert!(record.acquire_fence.is_none());
        match &record.plane {
            PlaneLayout::Flat(plane) => {
                assert_eq!(plane.stride, 400);
                assert_eq!(plane.buffer_size, 40_000);
                assert_eq!(plane.region.len(), 40_000);
            }
            PlaneLayout::YCbCr(_) => panic!("expected a flat layout"),
        }
        assert!(importer.is_locked(handle));

        drop(resolved);
        assert!(!importer.is_locked(handle));
    }

    #[test]
    fn test_input_stream_is_normalized_to_ycbcr() {
        let importer = Arc::new(MockImporter::new());
        let resolver = BufferResolver::new(0, importer.clone());
        let table = streams([StreamDescriptor::input(
            2,
            32,
            16,
            PixelFormat::ImplementationDefined,
        )]);
        let handle = importer.allocate_ycbcr(32, 16);

        let resolved = resolver.resolve(
            1,
            &[StreamBuffer::new(2, 1, handle)],
            &table,
            0,
            &PipelineCallback::discard(),
        );

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].format, PixelFormat::YCbCr420_888);
        assert!(resolved[0].is_input);
        assert!(matches!(resolved[0].plane, PlaneLayout::YCbCr(_)));
        assert_eq!(importer.last_usage(handle), Some(UsageFlags::CPU_READ_OFTEN));
    }

    #[test]
    #[traced_test]
    fn test_lock_failure_drops_only_that_buffer() {
        let importer = Arc::new(MockImporter::with_errors(ErrorConfig::scenario(
            ErrorScenario::FailOnNth {
                operation: "lock",
                n: 2,
            },
        )));
        let resolver = BufferResolver::new(0, importer.clone());
        let table = streams([StreamDescriptor::output(0, 8, 8, PixelFormat::Raw16)]);
        let handles: Vec<BufferHandle> = (0..3).map(|_| importer.allocate(128)).collect();
        let buffers: Vec<StreamBuffer> = handles
            .iter()
            .enumerate()
            .map(|(i, h)| StreamBuffer::new(0, i as u64, *h))
            .collect();

        let resolved = resolver.resolve(5, &buffers, &table, 0, &PipelineCallback::discard());

        let ids: Vec<u64> = resolved.iter().map(|b| b.stream_buffer.buffer_id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(logs_contain("Failed to resolve buffer"));
    }

    #[test]
    #[traced_test]
    fn test_fence_import_failure_drops_buffer_and_unlocks() {
        let importer = Arc::new(MockImporter::new());
        let resolver = BufferResolver::new(0, importer.clone());
        let table = streams([StreamDescriptor::output(0, 8, 8, PixelFormat::Raw16)]);
        let good = importer.allocate(128);
        let bad = importer.allocate(128);
        let fence = importer.create_signaled_fence();

        let buffers = [
            StreamBuffer::new(0, 1, good).with_acquire_fence(fence),
            StreamBuffer::new(0, 2, bad).with_acquire_fence(FenceHandle(4242)),
        ];
        let resolved = resolver.resolve(5, &buffers, &table, 0, &PipelineCallback::discard());

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].stream_buffer.buffer_id, 1);
        assert!(resolved[0].acquire_fence.is_some());
        assert!(!importer.is_locked(bad));
        assert!(logs_contain("unknown fence"));
    }

    #[test]
    #[traced_test]
    fn test_unknown_stream_and_unsupported_format_are_dropped() {
        let importer = Arc::new(MockImporter::new());
        let resolver = BufferResolver::new(0, importer.clone());
        let table = streams([
            StreamDescriptor::output(0, 8, 8, PixelFormat::Raw10),
            StreamDescriptor::output(1, 8, 8, PixelFormat::Raw16),
        ]);
        let handle = importer.allocate(128);
        let buffers = [
            StreamBuffer::new(0, 1, importer.allocate(128)),
            StreamBuffer::new(7, 2, importer.allocate(128)),
            StreamBuffer::new(1, 3, handle),
        ];

        let resolved = resolver.resolve(2, &buffers, &table, 0, &PipelineCallback::discard());

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].stream_buffer.buffer_id, 3);
        assert!(logs_contain("Unsupported pixel format: 0x25"));
        assert!(logs_contain("unknown stream"));
        assert_eq!(importer.locked_count(), 1);
    }
}
