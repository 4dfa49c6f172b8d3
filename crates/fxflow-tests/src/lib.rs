//! End-to-end integration tests for the fxflow crates.
//!
//! These exercise whole pipelines: context + registry + providers +
//! filter graphs + the frame pump, as a consumer of the public APIs only.
//! GPU-dependent cases skip on machines without an adapter.

use std::sync::Once;

static LOG_INIT: Once = Once::new();

/// Initializes logging once per test process. Controlled by the usual
/// `RUST_LOG`-style spec through flexi_logger, default `info`.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = flexi_logger::Logger::try_with_env_or_str("info")
            .map(|logger| logger.start());
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use approx::assert_relative_eq;
    use parking_lot::Mutex;

    use fxflow_core::{ParamBlob, PixelFormat, Size};
    use fxflow_gpu::{Context, ExecMode, ImageProvider};
    use fxflow_graph::Filter;
    use fxflow_view::{Backpressure, FramePump};

    fn gpu() -> Option<Context> {
        super::init_logging();
        if !Context::is_available() {
            eprintln!("no GPU adapter, skipping");
            return None;
        }
        Some(Context::new().unwrap())
    }

    fn gradient_source(ctx: &Context, size: Size) -> ImageProvider {
        let n = size.area() as usize * 4;
        let pixels: Vec<f32> = (0..n).map(|i| (i % 17) as f32 / 16.0).collect();
        ImageProvider::from_pixels(ctx, size, &pixels).unwrap()
    }

    fn vec4(x: f32) -> ParamBlob {
        ParamBlob::of([x, 0.0, 0.0, 0.0])
    }

    /// Full pipeline: upload, three chained kernels, download, verified
    /// against a CPU reference per pixel.
    #[test]
    fn pipeline_matches_cpu_reference() {
        let Some(ctx) = gpu() else { return };
        let size = Size::new(16, 9);
        let source = gradient_source(&ctx, size);
        let input = source.download(&ctx).unwrap();

        let mut filter = Filter::new(&ctx, "grade");
        filter.add_kernel_with("add", vec4(0.05)).unwrap();
        filter.add_kernel_with("mul", vec4(1.5)).unwrap();
        filter.add_kernel_with("gamma", vec4(2.0)).unwrap();
        filter.set_source(Some(source));

        let out = filter.apply().unwrap().download(&ctx).unwrap();
        assert_eq!(out.len(), input.len());
        for (px, (got, want_in)) in out.iter().zip(input.iter()).enumerate() {
            let lifted = ((want_in + 0.05).clamp(0.0, 1.0) * 1.5).clamp(0.0, 1.0);
            // Alpha channel skips the gamma curve.
            let expect = if px % 4 == 3 { lifted } else { lifted.powf(2.0) };
            assert_relative_eq!(*got, expect, epsilon = 1e-4);
        }
    }

    /// A three-deep composite graph behaves like the flattened chain.
    #[test]
    fn nested_composite_equals_flat_chain() {
        let Some(ctx) = gpu() else { return };
        let size = Size::new(8, 8);

        let mut inner = Filter::new(&ctx, "inner");
        inner.add_kernel_with("mul", vec4(0.5)).unwrap();
        let mut middle = Filter::new(&ctx, "middle");
        middle.add_kernel_with("add", vec4(0.2)).unwrap();
        middle.add_filter(inner).unwrap();
        let mut outer = Filter::new(&ctx, "outer");
        outer.add_filter(middle).unwrap();
        outer.add_kernel("grayscale").unwrap();
        outer.set_source(Some(gradient_source(&ctx, size)));
        let nested = outer.apply().unwrap().download(&ctx).unwrap();

        let mut flat = Filter::new(&ctx, "flat");
        flat.add_kernel_with("add", vec4(0.2)).unwrap();
        flat.add_kernel_with("mul", vec4(0.5)).unwrap();
        flat.add_kernel("grayscale").unwrap();
        flat.set_source(Some(gradient_source(&ctx, size)));
        let flattened = flat.apply().unwrap().download(&ctx).unwrap();

        for (a, b) in nested.iter().zip(flattened.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
    }

    /// Two contexts run independent pipelines without sharing registries.
    #[test]
    fn contexts_are_isolated() {
        let Some(ctx_a) = gpu() else { return };
        let ctx_b = Context::new().unwrap();

        ctx_a
            .registry()
            .register_source(
                "only_in_a",
                r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
@group(0) @binding(3) var<uniform> params: vec4<f32>;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let px = id.x;
    if px >= dims.x * dims.y { return; }
    let base = px * dims.z;
    dst[base] = 1.0 - src[base];
    dst[base + 1] = 1.0 - src[base + 1];
    dst[base + 2] = 1.0 - src[base + 2];
    dst[base + 3] = src[base + 3];
}
"#,
            )
            .unwrap();

        assert!(ctx_a.registry().contains("only_in_a"));
        assert!(!ctx_b.registry().contains("only_in_a"));
        assert!(ctx_b.registry().register("only_in_a").is_err());

        let mut filter = Filter::new(&ctx_a, "invert");
        filter.add_kernel("only_in_a").unwrap();
        filter.set_source(Some(ImageProvider::from_pixels(
            &ctx_a,
            Size::new(1, 1),
            &[0.25, 0.5, 0.75, 1.0],
        )
        .unwrap()));
        let out = filter.apply().unwrap().download(&ctx_a).unwrap();
        assert_relative_eq!(out[0], 0.75, epsilon = 1e-6);
        assert_relative_eq!(out[3], 1.0, epsilon = 1e-6);
    }

    /// In-place source updates keep identity and still drive recomputes.
    #[test]
    fn in_place_update_pipeline() {
        let Some(ctx) = gpu() else { return };
        let size = Size::new(4, 4);
        let source = ImageProvider::from_pixels(&ctx, size, &vec![0.2; 64]).unwrap();

        let mut filter = Filter::new(&ctx, "live");
        filter.add_kernel_with("mul", vec4(2.0)).unwrap();
        filter.set_source(Some(source.clone()));
        let first = filter.apply().unwrap();
        assert_relative_eq!(first.download(&ctx).unwrap()[0], 0.4, epsilon = 1e-6);

        // New content, same buffer. The filter must be told it is stale.
        source.upload(&ctx, &vec![0.3; 64]).unwrap();
        filter.set_dirty();
        let second = filter.apply().unwrap();
        assert!(first.aliases(&second));
        assert_relative_eq!(second.download(&ctx).unwrap()[0], 0.6, epsilon = 1e-6);
    }

    /// The observer push-chain feeds a pump-driven consumer end to end.
    #[test]
    fn chained_filters_through_pump() {
        let Some(ctx) = gpu() else { return };

        let mut filter = Filter::new(&ctx, "broadcast");
        filter.add_kernel_with("add", vec4(0.25)).unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let fanout_hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = fanout_hits.clone();
            filter.on_destination_updated(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let sink = received.clone();
        let pump = FramePump::new(filter, Backpressure::Block, move |dest, stamp| {
            sink.lock().push((stamp.generation(), dest.clone()));
        });

        pump.push_frame(
            ImageProvider::from_pixels(&ctx, Size::new(2, 2), &vec![0.5; 16]).unwrap(),
        );
        let deadline = Instant::now() + Duration::from_secs(10);
        while pump.presented_frames() < 1 {
            assert!(Instant::now() < deadline, "pump stalled");
            std::thread::sleep(Duration::from_millis(1));
        }
        pump.stop();

        // Both subscribers of the one destination event fired once.
        assert_eq!(fanout_hits.load(Ordering::SeqCst), 1);
        let received = received.lock();
        assert_eq!(received.len(), 1);
        let out = received[0].1.download(&ctx).unwrap();
        assert_relative_eq!(out[0], 0.75, epsilon = 1e-6);
    }

    /// Async applies on a shared context preserve causal order between an
    /// upstream filter and its downstream subscriber.
    #[test]
    fn async_push_chain_is_causal() {
        let Some(ctx) = gpu() else { return };

        let downstream = Arc::new(Mutex::new(Filter::new(&ctx, "down")));
        downstream.lock().add_kernel_with("mul", vec4(4.0)).unwrap();

        let mut upstream = Filter::new(&ctx, "up");
        upstream.set_mode(ExecMode::Async);
        upstream.add_kernel_with("mul", vec4(0.5)).unwrap();
        {
            let downstream = downstream.clone();
            upstream.on_destination_updated(move |dest, _| {
                downstream.lock().set_source(Some(dest.clone()));
            });
        }

        upstream.set_source(Some(ImageProvider::from_pixels(
            &ctx,
            Size::new(1, 1),
            &[0.4, 0.4, 0.4, 1.0],
        )
        .unwrap()));
        upstream.apply().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while ctx.in_flight() > 0 {
            assert!(Instant::now() < deadline, "completion never arrived");
            std::thread::yield_now();
        }

        let mut downstream = downstream.lock();
        assert!(downstream.is_dirty());
        let out = downstream.apply().unwrap().download(&ctx).unwrap();
        assert_relative_eq!(out[0], 0.8, epsilon = 1e-6);
    }

    /// Format metadata survives the whole path.
    #[test]
    fn provider_metadata_is_consistent() {
        let Some(ctx) = gpu() else { return };
        let size = Size::new(3, 5);
        let provider = gradient_source(&ctx, size);
        assert_eq!(provider.size(), size);
        assert_eq!(provider.format(), PixelFormat::Rgba32F);
        assert_eq!(provider.format().byte_len(size), 3 * 5 * 16);

        let mut filter = Filter::new(&ctx, "meta");
        filter.add_kernel("passthrough").unwrap();
        filter.set_source(Some(provider));
        let dest = filter.apply().unwrap();
        assert_eq!(dest.size(), size);
        assert_eq!(dest.format(), PixelFormat::Rgba32F);
    }
}
