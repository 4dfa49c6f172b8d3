//! Image providers: GPU storage buffers with identity-preserving reuse.
//!
//! An [`ImageProvider`] is a handle to a pixel buffer on the device, laid
//! out as a flat `f32` RGBA array. Cloning a provider shares the same
//! buffer; two providers alias when [`ImageProvider::id`] compares equal.
//! Identity is what makes memoized filter output observable: a consumer
//! holding a destination provider sees new pixels after a recompute into
//! the same allocation without re-fetching the handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use wgpu::util::DeviceExt;

use fxflow_core::{PixelFormat, Size};

use crate::context::Context;
use crate::{ComputeError, ComputeResult};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of one GPU allocation. Survives pixel updates in place;
/// changes only when the backing buffer is reallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

pub(crate) struct GpuBuffer {
    pub(crate) raw: wgpu::Buffer,
    id: BufferId,
}

/// Handle to an image living in GPU memory.
///
/// A fresh provider is unallocated; [`reuse`](ImageProvider::reuse) or one
/// of the upload constructors allocates it. Clones share the allocation.
#[derive(Clone, Default)]
pub struct ImageProvider {
    buffer: Option<Arc<GpuBuffer>>,
    size: Size,
    format: PixelFormat,
}

impl ImageProvider {
    /// An unallocated provider. Reading or dispatching into it fails with
    /// [`ComputeError::Unallocated`] until it is given storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a provider and fills it from `pixels` (RGBA f32, row
    /// major, `size.area() * 4` values).
    pub fn from_pixels(ctx: &Context, size: Size, pixels: &[f32]) -> ComputeResult<Self> {
        let expected = size.area() as usize * 4;
        if pixels.len() != expected {
            return Err(ComputeError::BufferLen {
                expected,
                actual: pixels.len(),
            });
        }
        let raw = ctx
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("fxflow_image"),
                contents: bytemuck::cast_slice(pixels),
                usage: storage_usage(),
            });
        Ok(Self {
            buffer: Some(Arc::new(GpuBuffer {
                raw,
                id: next_buffer_id(),
            })),
            size,
            format: PixelFormat::Rgba32F,
        })
    }

    /// Allocates an uninitialized provider of the given geometry.
    pub fn allocated(ctx: &Context, size: Size, format: PixelFormat) -> Self {
        let mut provider = Self::new();
        provider.allocate(ctx, size, format);
        provider
    }

    /// Pixel dimensions, `0x0` while unallocated.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Pixel format of the allocation.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// `true` once backing storage exists.
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Identity of the current allocation, if any.
    pub fn id(&self) -> Option<BufferId> {
        self.buffer.as_ref().map(|b| b.id)
    }

    /// `true` when both providers share one allocation.
    pub fn aliases(&self, other: &ImageProvider) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Ensures the provider holds an allocation of exactly this geometry.
    ///
    /// When the existing allocation already matches, the handle is kept
    /// and its contents are left alone. Otherwise a fresh buffer replaces
    /// it and the identity changes.
    pub fn reuse(&mut self, ctx: &Context, size: Size, format: PixelFormat) -> ComputeResult<()> {
        if size.is_empty() {
            return Err(ComputeError::SizeMismatch {
                expected: size,
                actual: self.size,
            });
        }
        if self.buffer.is_some() && self.size == size && self.format == format {
            return Ok(());
        }
        self.allocate(ctx, size, format);
        Ok(())
    }

    fn allocate(&mut self, ctx: &Context, size: Size, format: PixelFormat) {
        let id = next_buffer_id();
        trace!("allocating {id} {size} {}", format.name());
        let raw = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("fxflow_image"),
            size: format.byte_len(size),
            usage: storage_usage(),
            mapped_at_creation: false,
        });
        self.buffer = Some(Arc::new(GpuBuffer { raw, id }));
        self.size = size;
        self.format = format;
    }

    /// Drops the allocation, returning the provider to the unallocated
    /// state. Clones holding the old buffer keep it alive.
    pub fn release(&mut self) {
        self.buffer = None;
        self.size = Size::default();
        self.format = PixelFormat::default();
    }

    /// Rebinds this provider to `other`'s allocation. Afterwards the two
    /// alias: same identity, same pixels. Disabled filters use this to
    /// hand the source through untouched.
    pub fn adopt(&mut self, other: &ImageProvider) {
        self.buffer = other.buffer.clone();
        self.size = other.size;
        self.format = other.format;
    }

    /// Overwrites this provider's pixels with `source`'s via a GPU copy,
    /// reallocating only when geometry differs. Identity is preserved when
    /// no reallocation happens.
    pub fn update_from(&mut self, ctx: &Context, source: &ImageProvider) -> ComputeResult<()> {
        let src = source.buffer.as_ref().ok_or(ComputeError::Unallocated)?;
        self.reuse(ctx, source.size, source.format)?;
        let dst = self.buffer.as_ref().ok_or(ComputeError::Unallocated)?;
        if src.id == dst.id {
            return Ok(());
        }
        let mut encoder = ctx.create_encoder("fxflow_copy");
        encoder.copy_buffer_to_buffer(
            &src.raw,
            0,
            &dst.raw,
            0,
            source.format.byte_len(source.size),
        );
        ctx.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Writes `pixels` into the existing allocation in place. The buffer
    /// identity does not change, so downstream dirty observation keyed on
    /// identity correctly sees "same image, new content".
    ///
    /// The `f32` slice view only fits [`PixelFormat::Rgba32F`] storage;
    /// other formats are rejected with [`ComputeError::FormatMismatch`].
    pub fn upload(&self, ctx: &Context, pixels: &[f32]) -> ComputeResult<()> {
        let buffer = self.buffer.as_ref().ok_or(ComputeError::Unallocated)?;
        self.require_f32()?;
        let expected = self.size.area() as usize * 4;
        if pixels.len() != expected {
            return Err(ComputeError::BufferLen {
                expected,
                actual: pixels.len(),
            });
        }
        ctx.queue()
            .write_buffer(&buffer.raw, 0, bytemuck::cast_slice(pixels));
        Ok(())
    }

    /// Reads the pixels back to host memory, blocking until the copy
    /// completes. Only [`PixelFormat::Rgba32F`] providers can be read as
    /// `f32` data.
    pub fn download(&self, ctx: &Context) -> ComputeResult<Vec<f32>> {
        let buffer = self.buffer.as_ref().ok_or(ComputeError::Unallocated)?;
        self.require_f32()?;
        let byte_len = self.format.byte_len(self.size);

        let staging = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("fxflow_staging"),
            size: byte_len,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctx.create_encoder("fxflow_download");
        encoder.copy_buffer_to_buffer(&buffer.raw, 0, &staging, 0, byte_len);
        ctx.queue().submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        ctx.device().poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| ComputeError::Submission("map channel closed".into()))?
            .map_err(|e| ComputeError::Submission(format!("map failed: {e}")))?;

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }

    /// Encodes a full copy of this provider's pixels into `dst` as part of
    /// a larger command buffer. Both must be allocated with matching
    /// geometry.
    pub fn encode_copy_to(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        dst: &ImageProvider,
    ) -> ComputeResult<()> {
        let src_buf = self.raw()?;
        let dst_buf = dst.raw()?;
        if dst.size != self.size {
            return Err(ComputeError::SizeMismatch {
                expected: self.size,
                actual: dst.size,
            });
        }
        if dst.format != self.format {
            return Err(ComputeError::FormatMismatch {
                expected: self.format,
                actual: dst.format,
            });
        }
        encoder.copy_buffer_to_buffer(src_buf, 0, dst_buf, 0, self.format.byte_len(self.size));
        Ok(())
    }

    fn require_f32(&self) -> ComputeResult<()> {
        if self.format != PixelFormat::Rgba32F {
            return Err(ComputeError::FormatMismatch {
                expected: PixelFormat::Rgba32F,
                actual: self.format,
            });
        }
        Ok(())
    }

    pub(crate) fn raw(&self) -> ComputeResult<&wgpu::Buffer> {
        self.buffer
            .as_ref()
            .map(|b| &b.raw)
            .ok_or(ComputeError::Unallocated)
    }
}

impl std::fmt::Debug for ImageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProvider")
            .field("id", &self.id())
            .field("size", &self.size)
            .field("format", &self.format)
            .finish()
    }
}

fn next_buffer_id() -> BufferId {
    BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
}

fn storage_usage() -> wgpu::BufferUsages {
    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
}
