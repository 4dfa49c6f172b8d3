//! Observer registries and the generation-stamped notification policy.
//!
//! Destination notifications race with superseded work when completion
//! callbacks arrive from the GPU out of request order. The policy here is
//! latest-wins: every notification carries a [`FrameStamp`] and a registry
//! delivers only stamps newer than the last one it let through. Stale
//! notifications are dropped, never reordered.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use fxflow_gpu::ImageProvider;

/// Monotonic identity of one recomputation. Greater means requested later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameStamp {
    generation: u64,
}

impl FrameStamp {
    pub(crate) fn new(generation: u64) -> Self {
        Self { generation }
    }

    /// The recomputation generation this stamp belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub(crate) type SourceFn = Box<dyn FnMut(&ImageProvider) + Send>;
pub(crate) type DirtyFn = Box<dyn FnMut() + Send>;
pub(crate) type EnablingFn = Box<dyn FnMut(bool) + Send>;
pub(crate) type DestinationFn = Box<dyn FnMut(&ImageProvider, FrameStamp) + Send>;

/// Destination observer list plus the high-water mark for latest-wins
/// delivery. Shared with in-flight completion callbacks, hence the lock.
pub(crate) struct DestinationRegistry {
    observers: Vec<DestinationFn>,
    delivered: u64,
}

impl DestinationRegistry {
    fn new() -> Self {
        Self {
            observers: Vec::new(),
            delivered: 0,
        }
    }

    fn subscribe(&mut self, f: DestinationFn) {
        self.observers.push(f);
    }

    /// Fires all observers in subscription order, unless `stamp` is older
    /// than something already delivered.
    fn notify(&mut self, destination: &ImageProvider, stamp: FrameStamp) {
        if stamp.generation <= self.delivered {
            trace!(
                "dropping stale destination notification (gen {} <= {})",
                stamp.generation, self.delivered
            );
            return;
        }
        self.delivered = stamp.generation;
        for observer in &mut self.observers {
            observer(destination, stamp);
        }
    }
}

/// A pending destination notification, captured while encoding and fired
/// from the submission's completion callback. Child filters encoded inside
/// a parent's command buffer contribute their own notices; the parent
/// fires them before its own.
pub(crate) struct CompletionNotice {
    registry: Arc<Mutex<DestinationRegistry>>,
    destination: ImageProvider,
    stamp: FrameStamp,
}

impl CompletionNotice {
    pub(crate) fn fire(self) {
        self.registry.lock().notify(&self.destination, self.stamp);
    }
}

/// All four observer registries of one filter.
///
/// Source, dirty and enabling observers fire on the thread mutating the
/// filter. Destination observers fire from completion callbacks, which in
/// async mode means the context's worker thread.
pub(crate) struct Observers {
    pub(crate) enabled: bool,
    source: Vec<SourceFn>,
    dirty: Vec<DirtyFn>,
    enabling: Vec<EnablingFn>,
    destination: Arc<Mutex<DestinationRegistry>>,
}

impl Observers {
    pub(crate) fn new() -> Self {
        Self {
            enabled: true,
            source: Vec::new(),
            dirty: Vec::new(),
            enabling: Vec::new(),
            destination: Arc::new(Mutex::new(DestinationRegistry::new())),
        }
    }

    pub(crate) fn subscribe_source(&mut self, f: SourceFn) {
        self.source.push(f);
    }

    pub(crate) fn subscribe_dirty(&mut self, f: DirtyFn) {
        self.dirty.push(f);
    }

    pub(crate) fn subscribe_enabling(&mut self, f: EnablingFn) {
        self.enabling.push(f);
    }

    pub(crate) fn subscribe_destination(&mut self, f: DestinationFn) {
        self.destination.lock().subscribe(f);
    }

    pub(crate) fn fire_source(&mut self, provider: &ImageProvider) {
        if !self.enabled {
            return;
        }
        for observer in &mut self.source {
            observer(provider);
        }
    }

    pub(crate) fn fire_dirty(&mut self) {
        if !self.enabled {
            return;
        }
        for observer in &mut self.dirty {
            observer();
        }
    }

    pub(crate) fn fire_enabling(&mut self, enabled: bool) {
        if !self.enabled {
            return;
        }
        for observer in &mut self.enabling {
            observer(enabled);
        }
    }

    /// Builds the notice that will deliver `destination` to the
    /// destination observers once the GPU signals completion.
    pub(crate) fn destination_notice(
        &self,
        destination: ImageProvider,
        stamp: FrameStamp,
    ) -> CompletionNotice {
        CompletionNotice {
            registry: self.destination.clone(),
            destination,
            stamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn latest_wins_drops_stale() {
        let mut registry = DestinationRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.subscribe(Box::new(move |_, stamp| {
            sink.lock().push(stamp.generation());
        }));

        let image = ImageProvider::new();
        registry.notify(&image, FrameStamp::new(1));
        registry.notify(&image, FrameStamp::new(3));
        registry.notify(&image, FrameStamp::new(2));
        registry.notify(&image, FrameStamp::new(4));

        assert_eq!(*seen.lock(), vec![1, 3, 4]);
    }

    #[test]
    fn subscription_order_is_delivery_order() {
        let mut registry = DestinationRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["d1", "d2", "d3"] {
            let order = order.clone();
            registry.subscribe(Box::new(move |_, _| order.lock().push(tag)));
        }
        registry.notify(&ImageProvider::new(), FrameStamp::new(1));
        assert_eq!(*order.lock(), vec!["d1", "d2", "d3"]);
    }

    #[test]
    fn disabled_observers_are_silent() {
        let mut obs = Observers::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        obs.subscribe_dirty(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        obs.fire_dirty();
        obs.enabled = false;
        obs.fire_dirty();
        obs.enabled = true;
        obs.fire_dirty();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
