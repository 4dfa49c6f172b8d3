//! Reactive filter graphs over the fxflow GPU layer.
//!
//! A [`Filter`] is an ordered list of [`Step`]s (leaf kernel dispatches or
//! nested filters) with a `{clean, dirty} x {enabled, disabled}` state
//! machine, a memoized destination image and four observer registries.
//! Pipelines are push-chains: one filter's destination-updated event feeds
//! the next filter's source, keeping independently owned filters causally
//! consistent without a global scheduler.
//!
//! ```ignore
//! use fxflow_core::ParamBlob;
//! use fxflow_gpu::Context;
//! use fxflow_graph::Filter;
//!
//! let ctx = Context::new()?;
//! let mut filter = Filter::new(&ctx, "tonemap");
//! filter.add_kernel_with("gamma", ParamBlob::of([2.2f32, 0.0, 0.0, 0.0]))?;
//! filter.add_kernel("grayscale")?;
//!
//! filter.set_source(Some(input));
//! let result = filter.apply()?;
//! ```

#![warn(missing_docs)]

mod filter;
mod observers;

pub use filter::{Filter, Step};
pub use observers::FrameStamp;
