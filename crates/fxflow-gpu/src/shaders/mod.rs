//! WGSL sources for the built-in kernels.
//!
//! Every kernel shares one binding contract so the dispatch path never
//! branches on the kernel: binding 0 source pixels, binding 1 destination
//! pixels, binding 2 dims uniform `[w, h, c, 0]`, binding 3 parameter
//! uniform (at least one vec4, padded by the caller).

/// Copies pixels unchanged. The identity transform and the default step
/// for filters assembled before any kernel is chosen.
pub const PASSTHROUGH: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
@group(0) @binding(3) var<uniform> params: vec4<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let px = id.x;
    let total = dims.x * dims.y;
    if px >= total { return; }

    let base = px * dims.z;
    dst[base] = src[base];
    dst[base + 1] = src[base + 1];
    dst[base + 2] = src[base + 2];
    dst[base + 3] = src[base + 3];
}
"#;

/// Adds `params.x` to every channel, clamped to [0, 1].
pub const ADD: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
@group(0) @binding(3) var<uniform> params: vec4<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let px = id.x;
    let total = dims.x * dims.y;
    if px >= total { return; }

    let base = px * dims.z;
    dst[base] = clamp(src[base] + params.x, 0.0, 1.0);
    dst[base + 1] = clamp(src[base + 1] + params.x, 0.0, 1.0);
    dst[base + 2] = clamp(src[base + 2] + params.x, 0.0, 1.0);
    dst[base + 3] = clamp(src[base + 3] + params.x, 0.0, 1.0);
}
"#;

/// Multiplies every channel by `params.x`, clamped to [0, 1].
pub const MUL: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
@group(0) @binding(3) var<uniform> params: vec4<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let px = id.x;
    let total = dims.x * dims.y;
    if px >= total { return; }

    let base = px * dims.z;
    dst[base] = clamp(src[base] * params.x, 0.0, 1.0);
    dst[base + 1] = clamp(src[base + 1] * params.x, 0.0, 1.0);
    dst[base + 2] = clamp(src[base + 2] * params.x, 0.0, 1.0);
    dst[base + 3] = clamp(src[base + 3] * params.x, 0.0, 1.0);
}
"#;

/// Raises RGB to the power `params.x`; alpha passes through.
pub const GAMMA: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
@group(0) @binding(3) var<uniform> params: vec4<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let px = id.x;
    let total = dims.x * dims.y;
    if px >= total { return; }

    let base = px * dims.z;
    dst[base] = pow(max(src[base], 0.0), params.x);
    dst[base + 1] = pow(max(src[base + 1], 0.0), params.x);
    dst[base + 2] = pow(max(src[base + 2], 0.0), params.x);
    dst[base + 3] = src[base + 3];
}
"#;

/// Rec. 709 luma written to RGB; alpha passes through.
pub const GRAYSCALE: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
@group(0) @binding(3) var<uniform> params: vec4<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let px = id.x;
    let total = dims.x * dims.y;
    if px >= total { return; }

    let base = px * dims.z;
    let luma = 0.2126 * src[base] + 0.7152 * src[base + 1] + 0.0722 * src[base + 2];
    dst[base] = luma;
    dst[base + 1] = luma;
    dst[base + 2] = luma;
    dst[base + 3] = src[base + 3];
}
"#;

/// Looks up a built-in kernel source by name.
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "passthrough" => Some(PASSTHROUGH),
        "add" => Some(ADD),
        "mul" => Some(MUL),
        "gamma" => Some(GAMMA),
        "grayscale" => Some(GRAYSCALE),
        _ => None,
    }
}
