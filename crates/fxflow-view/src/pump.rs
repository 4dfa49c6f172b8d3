//! The frame pump worker and its request slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use log::{error, trace};
use parking_lot::{Condvar, Mutex};

use fxflow_core::Semaphore;
use fxflow_gpu::{ExecMode, ImageProvider};
use fxflow_graph::{Filter, FrameStamp};

/// Outstanding requests allowed before backpressure applies.
pub const MAX_IN_FLIGHT: usize = 3;

/// What happens to a frame request once [`MAX_IN_FLIGHT`] requests are
/// outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// The producer blocks until a slot frees up. Suits pull-paced
    /// producers such as a display link.
    #[default]
    Block,
    /// The request is discarded and counted. Suits live feeds that must
    /// never stall the capture thread.
    Drop,
}

enum Request {
    /// Recompute with a new source attached first.
    NewSource(ImageProvider),
    /// Recompute the current state (parameters changed).
    Redraw,
}

#[derive(Default)]
struct Slot {
    pending: Option<Request>,
    stopped: bool,
}

struct Shared {
    filter: Mutex<Filter>,
    slot: Mutex<Slot>,
    wake: Condvar,
    in_flight: Semaphore,
    backpressure: Backpressure,
    presented: AtomicU64,
    dropped: AtomicU64,
    cancelled: AtomicU64,
    stop: AtomicBool,
}

/// Drives a [`Filter`] from a worker thread, one recomputation at a time.
///
/// Requests land in a single slot: a request arriving while another is
/// still waiting supersedes it (advisory cancellation). Work already
/// handed to the GPU is never revoked; staleness is resolved downstream by
/// the generation stamp each destination notification carries.
pub struct FramePump {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FramePump {
    /// Takes ownership of `filter` and starts the pump. `consumer` runs on
    /// the worker thread once per presented frame, after GPU completion.
    pub fn new(
        mut filter: Filter,
        backpressure: Backpressure,
        consumer: impl FnMut(&ImageProvider, FrameStamp) + Send + 'static,
    ) -> Self {
        // The worker waits for each submission, so completion ordering is
        // the pump's own request ordering.
        filter.set_mode(ExecMode::Sync);

        let shared = Arc::new(Shared {
            filter: Mutex::new(filter),
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
            in_flight: Semaphore::new(MAX_IN_FLIGHT),
            backpressure,
            presented: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        });

        {
            let presented = Arc::downgrade(&shared);
            let consumer = Mutex::new(consumer);
            shared
                .filter
                .lock()
                .on_destination_updated(move |dest, stamp| {
                    if let Some(shared) = presented.upgrade() {
                        shared.presented.fetch_add(1, Ordering::AcqRel);
                    }
                    (consumer.lock())(dest, stamp);
                });
        }

        let worker = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("fxflow-pump".into())
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn frame pump worker")
        };

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Requests a recomputation with a new input image.
    ///
    /// Returns `false` only in [`Backpressure::Drop`] mode when the
    /// in-flight bound was reached and the request was discarded.
    pub fn push_frame(&self, source: ImageProvider) -> bool {
        self.enqueue(Request::NewSource(source))
    }

    /// Requests a recomputation of the current state, for parameter edits
    /// made through [`with_filter`](Self::with_filter).
    pub fn request_redraw(&self) -> bool {
        self.enqueue(Request::Redraw)
    }

    /// Runs `f` against the pumped filter under its lock. Mutations made
    /// here dirty the filter as usual; follow with
    /// [`request_redraw`](Self::request_redraw) to make them visible.
    pub fn with_filter<R>(&self, f: impl FnOnce(&mut Filter) -> R) -> R {
        f(&mut self.shared.filter.lock())
    }

    /// Discards the queued-but-unstarted request, if any. Work already on
    /// the GPU is unaffected.
    pub fn cancel_pending(&self) {
        let mut slot = self.shared.slot.lock();
        if slot.pending.take().is_some() {
            self.shared.cancelled.fetch_add(1, Ordering::AcqRel);
            self.shared.in_flight.release();
        }
    }

    /// Blocks until every outstanding request has been presented or
    /// cancelled.
    pub fn drain(&self) {
        for _ in 0..MAX_IN_FLIGHT {
            self.shared.in_flight.acquire();
        }
        for _ in 0..MAX_IN_FLIGHT {
            self.shared.in_flight.release();
        }
    }

    /// Frames delivered to the consumer.
    pub fn presented_frames(&self) -> u64 {
        self.shared.presented.load(Ordering::Acquire)
    }

    /// Requests discarded by [`Backpressure::Drop`].
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Acquire)
    }

    /// Requests superseded or cancelled before starting.
    pub fn cancelled_frames(&self) -> u64 {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Stops the worker after the current frame. Dropping the pump does
    /// the same.
    pub fn stop(&self) {
        self.shutdown();
    }

    fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let mut slot = self.shared.slot.lock();
            slot.stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    fn enqueue(&self, request: Request) -> bool {
        match self.shared.backpressure {
            Backpressure::Block => self.shared.in_flight.acquire(),
            Backpressure::Drop => {
                if !self.shared.in_flight.try_acquire() {
                    self.shared.dropped.fetch_add(1, Ordering::AcqRel);
                    trace!("frame request dropped, {MAX_IN_FLIGHT} in flight");
                    return false;
                }
            }
        }
        let mut slot = self.shared.slot.lock();
        if slot.pending.replace(request).is_some() {
            // The superseded request's permit goes back immediately.
            self.shared.cancelled.fetch_add(1, Ordering::AcqRel);
            self.shared.in_flight.release();
        }
        self.shared.wake.notify_one();
        true
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let request = {
            let mut slot = shared.slot.lock();
            loop {
                if let Some(request) = slot.pending.take() {
                    break request;
                }
                if slot.stopped {
                    return;
                }
                shared.wake.wait(&mut slot);
            }
        };

        {
            let mut filter = shared.filter.lock();
            match request {
                Request::NewSource(source) => filter.set_source(Some(source)),
                Request::Redraw => filter.set_dirty(),
            }
            if let Err(e) = filter.apply() {
                error!("frame pump apply failed: {e}");
            }
        }
        shared.in_flight.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backpressure_blocks() {
        assert_eq!(Backpressure::default(), Backpressure::Block);
    }
}
