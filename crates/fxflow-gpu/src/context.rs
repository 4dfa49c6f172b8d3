//! GPU context: device, queue and the serializing submission domain.
//!
//! One [`Context`] owns one logical command queue. Filters sharing a
//! context share zero-copy handoff of image providers; filters on
//! different contexts may execute concurrently with no ordering guarantee
//! between them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use log::{debug, warn};
use parking_lot::Mutex;

use fxflow_core::Semaphore;
use wgpu::{Device, DeviceDescriptor, Features, Instance, Queue};

use crate::registry::KernelRegistry;
use crate::{ComputeError, ComputeResult, ContextError};

/// Default permit count for [`Context::wait`] / [`Context::resume`]
/// throttling; callers that pace submission against completion get at most
/// this many frames in flight.
pub const DEFAULT_THROTTLE_PERMITS: usize = 3;

/// How a submission interacts with GPU completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Block the calling thread until the GPU signals completion.
    #[default]
    Sync,
    /// Return immediately; completion surfaces through the completion
    /// callback, invoked on the context's serial worker thread.
    Async,
}

type CompleteFn = Box<dyn FnOnce() + Send + 'static>;
type EncodeFn = Box<dyn FnOnce(&mut wgpu::CommandEncoder) + Send + 'static>;

enum Job {
    Encode {
        action: EncodeFn,
        complete: Option<CompleteFn>,
    },
    Submit {
        buffer: wgpu::CommandBuffer,
        complete: Option<CompleteFn>,
    },
}

struct Counters {
    in_flight: AtomicUsize,
    dispatches: AtomicU64,
}

/// The serializing execution domain for one or more filters.
///
/// Cheap to clone; clones share the same device, queue, kernel registry
/// and counters. Device or queue acquisition failure is a
/// construction-time fatal condition reported once from [`Context::new`],
/// never per call.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    device: Arc<Device>,
    queue: Arc<Queue>,
    adapter_info: wgpu::AdapterInfo,
    registry: KernelRegistry,
    counters: Arc<Counters>,
    throttle: Semaphore,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
    /// Creates a context on the highest-performance available adapter.
    pub fn new() -> Result<Self, ContextError> {
        Self::with_power_preference(wgpu::PowerPreference::HighPerformance)
    }

    /// Creates a context with an explicit power preference.
    pub fn with_power_preference(power: wgpu::PowerPreference) -> Result<Self, ContextError> {
        pollster::block_on(Self::new_async(power))
    }

    /// Returns `true` if any GPU adapter can be acquired. Tests use this
    /// to skip GPU-dependent cases on adapterless machines.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    async fn new_async(power: wgpu::PowerPreference) -> Result<Self, ContextError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ContextError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        let adapter_limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("fxflow_device"),
                    required_features: Features::empty(),
                    required_limits: adapter_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| ContextError::DeviceCreation(e.to_string()))?;

        debug!(
            "fxflow context on {} ({:?})",
            adapter_info.name, adapter_info.backend
        );

        let device = Arc::new(device);
        let queue = Arc::new(queue);
        let counters = Arc::new(Counters {
            in_flight: AtomicUsize::new(0),
            dispatches: AtomicU64::new(0),
        });

        let (tx, rx) = mpsc::channel::<Job>();
        let worker = {
            let device = device.clone();
            let queue = queue.clone();
            let counters = counters.clone();
            std::thread::Builder::new()
                .name("fxflow-context".into())
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        match job {
                            Job::Encode { action, complete } => {
                                let mut encoder = device.create_command_encoder(
                                    &wgpu::CommandEncoderDescriptor {
                                        label: Some("fxflow_async_encoder"),
                                    },
                                );
                                action(&mut encoder);
                                finish_submission(
                                    &device,
                                    &queue,
                                    &counters,
                                    encoder.finish(),
                                    complete,
                                );
                            }
                            Job::Submit { buffer, complete } => {
                                finish_submission(&device, &queue, &counters, buffer, complete);
                            }
                        }
                    }
                })
                .expect("failed to spawn fxflow context worker")
        };

        Ok(Self {
            inner: Arc::new(ContextInner {
                device,
                queue,
                adapter_info,
                registry: KernelRegistry::new(),
                counters,
                throttle: Semaphore::new(DEFAULT_THROTTLE_PERMITS),
                sender: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// The wgpu device backing this context.
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub(crate) fn device_arc(&self) -> Arc<Device> {
        self.inner.device.clone()
    }

    /// The wgpu queue backing this context.
    pub fn queue(&self) -> &Queue {
        &self.inner.queue
    }

    /// The context-scoped kernel registry.
    pub fn registry(&self) -> RegistryHandle<'_> {
        RegistryHandle { ctx: self }
    }

    pub(crate) fn raw_registry(&self) -> &KernelRegistry {
        &self.inner.registry
    }

    /// Adapter name, vendor and backend.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.inner.adapter_info
    }

    /// Device name as reported by the adapter.
    pub fn device_name(&self) -> &str {
        &self.inner.adapter_info.name
    }

    /// Creates a command encoder for filter-driven encoding.
    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.inner
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Enqueues `action` for submission.
    ///
    /// `Sync` encodes and submits on the calling thread and blocks until
    /// GPU completion. `Async` hands the action to the context's serial
    /// worker and returns immediately; queued async actions run and
    /// complete in enqueue order.
    pub fn execute<F>(&self, mode: ExecMode, action: F) -> ComputeResult<()>
    where
        F: FnOnce(&mut wgpu::CommandEncoder) + Send + 'static,
    {
        self.execute_with(mode, action, || {})
    }

    /// Like [`execute`](Self::execute) with a completion callback invoked
    /// once the GPU signals done (inline for `Sync`, on the worker thread
    /// for `Async`).
    pub fn execute_with<F, C>(&self, mode: ExecMode, action: F, complete: C) -> ComputeResult<()>
    where
        F: FnOnce(&mut wgpu::CommandEncoder) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        match mode {
            ExecMode::Sync => {
                let mut encoder = self.create_encoder("fxflow_sync_encoder");
                action(&mut encoder);
                self.submit_with(ExecMode::Sync, encoder.finish(), complete)
            }
            ExecMode::Async => {
                self.inner.counters.in_flight.fetch_add(1, Ordering::AcqRel);
                self.send_job(Job::Encode {
                    action: Box::new(action),
                    complete: Some(Box::new(complete)),
                })
            }
        }
    }

    /// Submits a pre-encoded command buffer in the given mode.
    pub fn submit(&self, mode: ExecMode, buffer: wgpu::CommandBuffer) -> ComputeResult<()> {
        self.submit_with(mode, buffer, || {})
    }

    /// Submits a pre-encoded command buffer; `complete` fires after GPU
    /// completion. This is the path `Filter::apply` uses: the whole filter
    /// chain is encoded into one buffer, then submitted here.
    pub fn submit_with<C>(
        &self,
        mode: ExecMode,
        buffer: wgpu::CommandBuffer,
        complete: C,
    ) -> ComputeResult<()>
    where
        C: FnOnce() + Send + 'static,
    {
        self.inner.counters.in_flight.fetch_add(1, Ordering::AcqRel);
        match mode {
            ExecMode::Sync => {
                finish_submission(
                    &self.inner.device,
                    &self.inner.queue,
                    &self.inner.counters,
                    buffer,
                    Some(Box::new(complete)),
                );
                Ok(())
            }
            ExecMode::Async => self.send_job(Job::Submit {
                buffer,
                complete: Some(Box::new(complete)),
            }),
        }
    }

    fn send_job(&self, job: Job) -> ComputeResult<()> {
        let guard = self.inner.sender.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| {
                self.inner.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
                warn!("submission after context worker shut down");
                ComputeError::Submission("context worker stopped".into())
            }),
            None => {
                self.inner.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(ComputeError::Submission("context worker stopped".into()))
            }
        }
    }

    /// Acquires a throttle permit, blocking while none are available.
    /// Paired with [`resume`](Self::resume) from a completion callback this
    /// bounds in-flight submissions to [`DEFAULT_THROTTLE_PERMITS`].
    pub fn wait(&self) {
        self.inner.throttle.acquire();
    }

    /// Returns a throttle permit taken by [`wait`](Self::wait).
    pub fn resume(&self) {
        self.inner.throttle.release();
    }

    /// Submissions enqueued but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.inner.counters.in_flight.load(Ordering::Acquire)
    }

    /// Total kernel dispatches issued through this context. Tests use this
    /// to verify that clean filters resubmit no GPU work.
    pub fn dispatch_count(&self) -> u64 {
        self.inner.counters.dispatches.load(Ordering::Acquire)
    }

    pub(crate) fn count_dispatch(&self) {
        self.inner.counters.dispatches.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.inner.adapter_info.name)
            .field("backend", &self.inner.adapter_info.backend)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued jobs and exit.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn finish_submission(
    device: &Device,
    queue: &Queue,
    counters: &Counters,
    buffer: wgpu::CommandBuffer,
    complete: Option<CompleteFn>,
) {
    queue.submit(std::iter::once(buffer));
    device.poll(wgpu::Maintain::Wait);
    // The completion callback must run before the counter drops: callers
    // polling `in_flight() == 0` rely on completion side effects (observer
    // delivery, downstream re-sourcing) being visible by then.
    if let Some(complete) = complete {
        complete();
    }
    counters.in_flight.fetch_sub(1, Ordering::AcqRel);
}

/// Borrowed handle exposing registry operations with the device attached.
///
/// The registry itself is context-scoped state; compiling a kernel needs
/// the device, so registration goes through this handle rather than a
/// free-standing registry object.
pub struct RegistryHandle<'a> {
    ctx: &'a Context,
}

impl RegistryHandle<'_> {
    /// Registers (or looks up) a kernel by identity. Idempotent: repeated
    /// registration returns the same stage instance.
    pub fn register(&self, name: &str) -> Result<crate::Stage, crate::RegisterError> {
        self.ctx
            .raw_registry()
            .register(&self.ctx.device_arc(), name)
    }

    /// Installs caller-supplied WGSL under a new kernel identity.
    pub fn register_source(&self, name: &str, wgsl: &str) -> Result<(), crate::RegisterError> {
        self.ctx.raw_registry().register_source(name, wgsl)
    }

    /// Returns `true` if a kernel identity is known (built-in or installed).
    pub fn contains(&self, name: &str) -> bool {
        self.ctx.raw_registry().contains(name)
    }
}
