//! # fxflow-core
//!
//! Core types for the fxflow GPU filter-pipeline engine.
//!
//! This crate provides the foundational types shared by the rest of the
//! workspace:
//!
//! - [`Size`] - Image dimensions in pixels
//! - [`PixelFormat`] - Pixel storage format of a GPU image buffer
//! - [`ParamBlob`] - Opaque POD snapshot of per-stage kernel constants
//! - [`Semaphore`] - Counting semaphore used for submission throttling
//!   and frame backpressure
//!
//! ## Crate Structure
//!
//! This crate is the foundation of fxflow and has no GPU dependencies.
//! All other fxflow crates depend on `fxflow-core`:
//!
//! ```text
//! fxflow-core (this crate)
//!    ^
//!    |
//!    +-- fxflow-gpu (Context, ImageProvider, Stage)
//!    +-- fxflow-graph (Filter graph, observers)
//!    +-- fxflow-view (frame pump, backpressure)
//! ```

#![warn(missing_docs)]

pub mod format;
pub mod geometry;
pub mod params;
pub mod sync;

pub use format::PixelFormat;
pub use geometry::Size;
pub use params::ParamBlob;
pub use sync::Semaphore;
