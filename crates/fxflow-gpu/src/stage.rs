//! Stages: dispatchable handles to compiled kernels.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use fxflow_core::ParamBlob;

use crate::context::Context;
use crate::provider::ImageProvider;
use crate::registry::CompiledKernel;
use crate::{ComputeError, ComputeResult};

/// Threads per workgroup in every kernel; dispatch is linear over pixels.
pub const WORKGROUP_SIZE: u32 = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DimsUniform {
    dims: [u32; 4],
}

/// Immutable parameter snapshot captured at encode time.
///
/// A stage reads only what its config carries, so mutating filter
/// parameters after `apply` returns never changes work already in flight.
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    params: ParamBlob,
}

impl StageConfig {
    /// Snapshot of the given parameter bytes.
    pub fn new(params: ParamBlob) -> Self {
        Self { params }
    }

    /// Snapshot of a single `Pod` parameter struct.
    pub fn of<T: Pod>(value: T) -> Self {
        Self {
            params: ParamBlob::of(value),
        }
    }

    /// The raw parameter bytes.
    pub fn params(&self) -> &ParamBlob {
        &self.params
    }
}

/// A handle to one compiled kernel.
///
/// Cheap to clone; clones of the same registration compare equal. Obtained
/// from [`Context::registry`](crate::Context::registry).
#[derive(Clone)]
pub struct Stage {
    kernel: Arc<CompiledKernel>,
}

impl Stage {
    pub(crate) fn new(kernel: Arc<CompiledKernel>) -> Self {
        Self { kernel }
    }

    /// The kernel identity this stage dispatches.
    pub fn name(&self) -> &str {
        &self.kernel.name
    }

    /// Encodes one dispatch of this kernel into `encoder`.
    ///
    /// Kernels are geometry preserving: `output` must already hold an
    /// allocation matching `input`'s size and format. Validation failures
    /// surface here, before anything reaches the queue.
    pub fn dispatch(
        &self,
        ctx: &Context,
        encoder: &mut wgpu::CommandEncoder,
        config: &StageConfig,
        input: &ImageProvider,
        output: &ImageProvider,
    ) -> ComputeResult<()> {
        let src = input.raw()?;
        let dst = output.raw()?;
        if output.size() != input.size() {
            return Err(ComputeError::SizeMismatch {
                expected: input.size(),
                actual: output.size(),
            });
        }
        if output.format() != input.format() {
            return Err(ComputeError::FormatMismatch {
                expected: input.format(),
                actual: output.format(),
            });
        }

        let size = input.size();
        let dims = DimsUniform {
            dims: [size.width, size.height, input.format().channels(), 0],
        };
        let dims_buf = ctx
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("dims_uniform"),
                contents: bytemuck::bytes_of(&dims),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let params_buf = ctx
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("params_uniform"),
                contents: config.params.as_bytes(),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let layout = self.kernel.pipeline.get_bind_group_layout(0);
        let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.kernel.name),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dst.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dims_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.kernel.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let total = size.area() as u32;
            pass.dispatch_workgroups(total.div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        ctx.count_dispatch();
        Ok(())
    }
}

impl PartialEq for Stage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.kernel, &other.kernel)
    }
}
impl Eq for Stage {}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name()).finish()
    }
}
