//! Context-scoped kernel registry.
//!
//! Each [`Context`](crate::Context) owns one registry. Kernels are
//! identified by name; registering the same name twice yields the same
//! compiled pipeline, so filter assembly can register freely without
//! tracking what is already compiled.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use wgpu::Device;

use crate::shaders;
use crate::stage::Stage;
use crate::RegisterError;

/// A compiled compute kernel. Shared by every stage referencing its name.
pub(crate) struct CompiledKernel {
    pub(crate) name: String,
    pub(crate) pipeline: wgpu::ComputePipeline,
}

/// Name-to-pipeline table, lazily compiled.
pub struct KernelRegistry {
    compiled: Mutex<HashMap<String, Arc<CompiledKernel>>>,
    sources: Mutex<HashMap<String, String>>,
}

impl KernelRegistry {
    pub(crate) fn new() -> Self {
        Self {
            compiled: Mutex::new(HashMap::new()),
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `name` to a [`Stage`], compiling on first use.
    ///
    /// Unknown names fail with [`RegisterError::NotFound`]; WGSL that does
    /// not validate fails with [`RegisterError::Compile`].
    pub(crate) fn register(
        &self,
        device: &Arc<Device>,
        name: &str,
    ) -> Result<Stage, RegisterError> {
        let mut compiled = self.compiled.lock();
        if let Some(kernel) = compiled.get(name) {
            return Ok(Stage::new(kernel.clone()));
        }

        let source = {
            let sources = self.sources.lock();
            match sources.get(name) {
                Some(wgsl) => wgsl.clone(),
                None => shaders::builtin(name)
                    .ok_or_else(|| RegisterError::NotFound(name.to_string()))?
                    .to_string(),
            }
        };

        let kernel = Arc::new(compile(device, name, &source)?);
        debug!("compiled kernel '{name}'");
        compiled.insert(name.to_string(), kernel.clone());
        Ok(Stage::new(kernel))
    }

    /// Installs caller-supplied WGSL under `name`.
    ///
    /// Fails with [`RegisterError::AlreadyExists`] when the name shadows a
    /// built-in or a previously installed source. Compilation is deferred
    /// to the first [`register`](Self::register) of the name.
    pub(crate) fn register_source(&self, name: &str, wgsl: &str) -> Result<(), RegisterError> {
        if shaders::builtin(name).is_some() || self.compiled.lock().contains_key(name) {
            return Err(RegisterError::AlreadyExists(name.to_string()));
        }
        let mut sources = self.sources.lock();
        if sources.contains_key(name) {
            return Err(RegisterError::AlreadyExists(name.to_string()));
        }
        sources.insert(name.to_string(), wgsl.to_string());
        Ok(())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        shaders::builtin(name).is_some()
            || self.compiled.lock().contains_key(name)
            || self.sources.lock().contains_key(name)
    }
}

fn compile(device: &Arc<Device>, name: &str, source: &str) -> Result<CompiledKernel, RegisterError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    // The shared binding contract (see `shaders`): 0 source storage,
    // 1 destination storage, 2 dims uniform, 3 params uniform. Declared
    // explicitly so kernels that ignore `params` still accept the full
    // bind group the dispatch path always supplies.
    let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    let uniform = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(name),
        entries: &[storage(0, true), storage(1, false), uniform(2), uniform(3)],
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(name),
        bind_group_layouts: &[&bind_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(name),
        layout: Some(&layout),
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(RegisterError::Compile {
            name: name.to_string(),
            message: err.to_string(),
        });
    }

    Ok(CompiledKernel {
        name: name.to_string(),
        pipeline,
    })
}
