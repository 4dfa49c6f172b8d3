//! Presentation driver for fxflow filter graphs.
//!
//! The engine recomputes on demand; something still has to decide when
//! demand happens. [`FramePump`] is that driver: it owns a filter on a
//! worker thread, coalesces frame requests into a single latest-wins slot,
//! bounds outstanding requests with a counting semaphore and hands each
//! presented destination to a consumer callback.

#![warn(missing_docs)]

mod pump;

pub use pump::{Backpressure, FramePump, MAX_IN_FLIGHT};
