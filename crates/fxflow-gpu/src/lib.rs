//! GPU execution layer for the fxflow filter-pipeline engine.
//!
//! Provides the serializing execution domain ([`Context`]), the unit of
//! data flowing through filter graphs ([`ImageProvider`]), and the atomic
//! GPU operation ([`Stage`]) with its context-scoped [`KernelRegistry`].
//!
//! # Architecture
//!
//! ```text
//! Filter (fxflow-graph)
//!     └── Stage::dispatch ── CommandEncoder ── Context::submit
//!             │                                    │
//!             │ KernelRegistry (per Context)       │ sync: caller thread
//!             │   name -> ComputePipeline          │ async: serial worker
//!             └── ImageProvider (storage buffers)  └── device.poll(Wait)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fxflow_gpu::{Context, ExecMode, ImageProvider, StageConfig};
//! use fxflow_core::{ParamBlob, PixelFormat, Size};
//!
//! let ctx = Context::new()?;
//! let stage = ctx.registry().register("add")?;
//!
//! let input = ImageProvider::from_pixels(&ctx, Size::new(2, 2), &[0.5; 16])?;
//! let mut output = ImageProvider::new();
//! output.reuse(&ctx, input.size(), PixelFormat::Rgba32F)?;
//!
//! let mut encoder = ctx.create_encoder("demo");
//! let config = StageConfig::new(ParamBlob::of([0.1f32, 0.0, 0.0, 0.0]));
//! stage.dispatch(&ctx, &mut encoder, &config, &input, &output)?;
//! ctx.submit(ExecMode::Sync, encoder.finish())?;
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod provider;
pub mod registry;
mod shaders;
pub mod stage;

pub use context::{Context, ExecMode, RegistryHandle, DEFAULT_THROTTLE_PERMITS};
pub use provider::{BufferId, ImageProvider};
pub use registry::KernelRegistry;
pub use stage::{Stage, StageConfig};

use fxflow_core::{PixelFormat, Size};
use thiserror::Error;

/// Construction-time fatal conditions: the context cannot exist without a
/// capable device and queue. Detected once, at startup.
#[derive(Error, Debug)]
pub enum ContextError {
    /// No suitable GPU adapter found on this system.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// The adapter refused to create a device/queue pair.
    #[error("failed to create device: {0}")]
    DeviceCreation(String),
}

/// Registration-time errors returned from pipeline assembly. Each
/// operation fails independently, so assembly code can report several
/// broken stages without aborting the whole build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The named kernel has no registered source.
    #[error("kernel `{0}` is not registered")]
    NotFound(String),

    /// A kernel or step with this name already exists.
    #[error("`{0}` already exists")]
    AlreadyExists(String),

    /// Insertion index is past the end of the execution list.
    #[error("insertion index {index} out of range (len {len})")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Current list length.
        len: usize,
    },

    /// The kernel source failed WGSL validation.
    #[error("kernel `{name}` failed to compile: {message}")]
    Compile {
        /// Kernel identity.
        name: String,
        /// Validation error text.
        message: String,
    },
}

/// Runtime compute errors surfaced from `apply()` and provider operations.
///
/// Malformed buffer sizes and mismatched formats between chained stages are
/// caught by invariant checks before submission, never silently skipped.
#[derive(Error, Debug)]
pub enum ComputeError {
    /// The filter has no source attached.
    #[error("filter has no source attached")]
    NoSource,

    /// An image provider was used before any buffer was allocated.
    #[error("image buffer is not allocated")]
    Unallocated,

    /// Chained stages disagree on image dimensions.
    #[error("size mismatch between chained stages: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Size the stage expected.
        expected: Size,
        /// Size it was given.
        actual: Size,
    },

    /// Chained stages disagree on pixel format.
    #[error("pixel format mismatch: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        /// Format the stage expected.
        expected: PixelFormat,
        /// Format it was given.
        actual: PixelFormat,
    },

    /// Host-side pixel data has the wrong length for the stated size.
    #[error("pixel data length mismatch: expected {expected}, got {actual}")]
    BufferLen {
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        actual: usize,
    },

    /// The context's submission worker is gone or a read-back failed.
    #[error("GPU submission failed: {0}")]
    Submission(String),

    /// A registration error propagated through an apply path.
    #[error(transparent)]
    Register(#[from] RegisterError),
}

/// Result alias for runtime compute operations.
pub type ComputeResult<T> = std::result::Result<T, ComputeError>;
