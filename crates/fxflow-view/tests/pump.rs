//! Frame pump tests. Skipped without a GPU adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use parking_lot::Mutex;

use fxflow_core::{ParamBlob, Size};
use fxflow_gpu::{Context, ImageProvider};
use fxflow_graph::Filter;
use fxflow_view::{Backpressure, FramePump};

fn gpu() -> Option<Context> {
    if !Context::is_available() {
        eprintln!("no GPU adapter, skipping");
        return None;
    }
    Some(Context::new().unwrap())
}

fn uniform_source(ctx: &Context, value: f32) -> ImageProvider {
    ImageProvider::from_pixels(ctx, Size::new(2, 2), &vec![value; 16]).unwrap()
}

fn wait_for(pump: &FramePump, frames: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while pump.presented_frames() < frames {
        assert!(Instant::now() < deadline, "pump stalled");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn presents_pushed_frames() {
    let Some(ctx) = gpu() else { return };
    let mut filter = Filter::new(&ctx, "view");
    filter
        .add_kernel_with("mul", ParamBlob::of([2.0f32, 0.0, 0.0, 0.0]))
        .unwrap();

    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let pump = FramePump::new(filter, Backpressure::Block, move |dest, stamp| {
        sink.lock().push((stamp.generation(), dest.clone()));
    });

    pump.push_frame(uniform_source(&ctx, 0.25));
    wait_for(&pump, 1);
    pump.push_frame(uniform_source(&ctx, 0.4));
    wait_for(&pump, 2);
    pump.stop();

    let frames = frames.lock();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].0 < frames[1].0);
    let last = frames[1].1.download(&ctx).unwrap();
    assert_relative_eq!(last[0], 0.8, epsilon = 1e-6);
}

#[test]
fn generations_arrive_monotonic() {
    let Some(ctx) = gpu() else { return };
    let mut filter = Filter::new(&ctx, "view");
    filter.add_kernel("passthrough").unwrap();

    let generations = Arc::new(Mutex::new(Vec::new()));
    let sink = generations.clone();
    let pump = FramePump::new(filter, Backpressure::Block, move |_, stamp| {
        sink.lock().push(stamp.generation());
    });

    for i in 0..8 {
        pump.push_frame(uniform_source(&ctx, i as f32 / 8.0));
    }
    pump.drain();
    pump.stop();

    let generations = generations.lock();
    assert!(!generations.is_empty());
    assert!(generations.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn superseded_requests_are_counted_not_presented() {
    let Some(ctx) = gpu() else { return };
    let mut filter = Filter::new(&ctx, "view");
    filter.add_kernel("passthrough").unwrap();

    let pump = FramePump::new(filter, Backpressure::Block, |_, _| {});

    let pushed = 20u64;
    for i in 0..pushed {
        pump.push_frame(uniform_source(&ctx, i as f32 / 20.0));
    }
    pump.drain();
    pump.stop();

    // Every request is accounted for exactly once.
    assert_eq!(pump.presented_frames() + pump.cancelled_frames(), pushed);
    assert_eq!(pump.dropped_frames(), 0);
}

#[test]
fn drop_mode_sheds_load_without_blocking() {
    let Some(ctx) = gpu() else { return };
    let mut filter = Filter::new(&ctx, "view");
    filter.add_kernel("grayscale").unwrap();

    let pump = FramePump::new(filter, Backpressure::Drop, |_, _| {});

    let mut accepted = 0u64;
    for i in 0..50 {
        if pump.push_frame(uniform_source(&ctx, i as f32 / 50.0)) {
            accepted += 1;
        }
    }
    pump.drain();
    pump.stop();

    assert_eq!(pump.dropped_frames() + accepted, 50);
    assert_eq!(pump.presented_frames() + pump.cancelled_frames(), accepted);
}

#[test]
fn cancel_pending_discards_queued_request() {
    let Some(ctx) = gpu() else { return };
    let filter = Filter::new(&ctx, "view");
    let pump = FramePump::new(filter, Backpressure::Block, |_, _| {});

    // No guarantee the worker has not already taken the request, so only
    // the invariant holds: nothing is lost, nothing presented twice.
    pump.push_frame(uniform_source(&ctx, 0.5));
    pump.cancel_pending();
    pump.drain();
    pump.stop();
    assert_eq!(pump.presented_frames() + pump.cancelled_frames(), 1);
}

#[test]
fn redraw_after_parameter_edit() {
    let Some(ctx) = gpu() else { return };
    let mut filter = Filter::new(&ctx, "view");
    filter
        .add_kernel_with("add", ParamBlob::of([0.1f32, 0.0, 0.0, 0.0]))
        .unwrap();

    let latest = Arc::new(Mutex::new(None));
    let sink = latest.clone();
    let pump = FramePump::new(filter, Backpressure::Block, move |dest, _| {
        *sink.lock() = Some(dest.clone());
    });

    pump.push_frame(uniform_source(&ctx, 0.2));
    wait_for(&pump, 1);

    pump.with_filter(|f| {
        f.set_params("add", ParamBlob::of([0.5f32, 0.0, 0.0, 0.0]))
    })
    .unwrap();
    pump.request_redraw();
    wait_for(&pump, 2);
    pump.stop();

    let dest = latest.lock().clone().unwrap();
    assert_relative_eq!(dest.download(&ctx).unwrap()[0], 0.7, epsilon = 1e-6);
}
