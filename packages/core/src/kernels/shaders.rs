//! WGSL sources for the plane kernels
//!
//! Bindings are shared by every kernel:
//! 0 source luma, 1 source chroma (interleaved U/V), 2 destination luma,
//! 3 destination chroma, 4 the dimension uniform. Every sample occupies one
//! `u32` so 8-bit and 10-bit frames use the same kernels.

use crate::geometry::{Sampling, TransformMode};

pub const PRELUDE: &str = r#"
struct Params {
    // luma width, luma height, chroma width, chroma height
    src: vec4<u32>,
    dst: vec4<u32>,
};

@group(0) @binding(0) var<storage, read> src_luma: array<u32>;
@group(0) @binding(1) var<storage, read> src_chroma: array<u32>;
@group(0) @binding(2) var<storage, read_write> dst_luma: array<u32>;
@group(0) @binding(3) var<storage, read_write> dst_chroma: array<u32>;
@group(0) @binding(4) var<uniform> params: Params;

fn normalized(t: f32, out_len: f32) -> f32 {
    return (t / out_len - 0.5) * 2.0;
}

fn remap_stretch(t: f32, in_len: f32, out_len: f32) -> f32 {
    let x = normalized(t, out_len);
    let base = t - (out_len - in_len) / 2.0;
    let offset = x * x * sign(x) * (out_len - in_len) / 2.0;
    return base - offset;
}

fn linear_stretch(t: f32, in_len: f32, out_len: f32) -> f32 {
    let x = normalized(t, out_len);
    let base = t - (out_len - in_len) / 2.0;
    let offset = x * x * sign(x) * (in_len - out_len) / 2.0;
    return base - offset;
}

fn center_crop(t: f32, in_len: f32, out_len: f32) -> f32 {
    return t + (in_len - out_len) / 2.0;
}

fn downscale_normalized(t: f32, out_len: f32) -> f32 {
    return (t + 0.5) / out_len;
}

fn clamp_index(coord: f32, len: u32) -> u32 {
    return u32(clamp(floor(coord), 0.0, f32(len) - 1.0));
}

fn luma_at(x: i32, y: i32) -> f32 {
    let cx = u32(clamp(x, 0, i32(params.src.x) - 1));
    let cy = u32(clamp(y, 0, i32(params.src.y) - 1));
    return f32(src_luma[cy * params.src.x + cx]);
}

fn chroma_at(x: i32, y: i32, channel: u32) -> f32 {
    let cx = u32(clamp(x, 0, i32(params.src.z) - 1));
    let cy = u32(clamp(y, 0, i32(params.src.w) - 1));
    return f32(src_chroma[(cy * params.src.z + cx) * 2u + channel]);
}

fn sample_luma_bilinear(fx: f32, fy: f32) -> u32 {
    let x0 = floor(fx);
    let y0 = floor(fy);
    let wx = fx - x0;
    let wy = fy - y0;
    let ix = i32(x0);
    let iy = i32(y0);
    let top = mix(luma_at(ix, iy), luma_at(ix + 1, iy), wx);
    let bottom = mix(luma_at(ix, iy + 1), luma_at(ix + 1, iy + 1), wx);
    return u32(floor(mix(top, bottom, wy) + 0.5));
}

fn sample_chroma_bilinear(fx: f32, fy: f32, channel: u32) -> u32 {
    let x0 = floor(fx);
    let y0 = floor(fy);
    let wx = fx - x0;
    let wy = fy - y0;
    let ix = i32(x0);
    let iy = i32(y0);
    let top = mix(chroma_at(ix, iy, channel), chroma_at(ix + 1, iy, channel), wx);
    let bottom = mix(chroma_at(ix, iy + 1, channel), chroma_at(ix + 1, iy + 1, channel), wx);
    return u32(floor(mix(top, bottom, wy) + 0.5));
}
"#;

/// Nearest-sampling entry point shared by the coordinate remap kernels
const NEAREST_MAIN: &str = r#"
@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.dst.x || gid.y >= params.dst.y) {
        return;
    }

    let sx = map_axis(f32(gid.x), f32(params.src.x), f32(params.dst.x));
    let sy = map_axis(f32(gid.y), f32(params.src.y), f32(params.dst.y));

    let lx = clamp_index(sx, params.src.x);
    let ly = clamp_index(sy, params.src.y);
    dst_luma[gid.y * params.dst.x + gid.x] = src_luma[ly * params.src.x + lx];

    if ((gid.x & 1u) == 0u && (gid.y & 1u) == 0u) {
        let cx = gid.x / 2u;
        let cy = gid.y / 2u;
        if (cx < params.dst.z && cy < params.dst.w) {
            let scx = clamp_index(sx / 2.0, params.src.z);
            let scy = clamp_index(sy / 2.0, params.src.w);
            let s = (scy * params.src.z + scx) * 2u;
            let d = (cy * params.dst.z + cx) * 2u;
            dst_chroma[d] = src_chroma[s];
            dst_chroma[d + 1u] = src_chroma[s + 1u];
        }
    }
}
"#;

const DOWNSCALE_MAIN: &str = r#"
@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < params.dst.x && gid.y < params.dst.y) {
        let fx = downscale_normalized(f32(gid.x), f32(params.dst.x)) * f32(params.src.x) - 0.5;
        let fy = downscale_normalized(f32(gid.y), f32(params.dst.y)) * f32(params.src.y) - 0.5;
        dst_luma[gid.y * params.dst.x + gid.x] = sample_luma_bilinear(fx, fy);
    }

    if (gid.x < params.dst.z && gid.y < params.dst.w) {
        let fx = downscale_normalized(f32(gid.x), f32(params.dst.z)) * f32(params.src.z) - 0.5;
        let fy = downscale_normalized(f32(gid.y), f32(params.dst.w)) * f32(params.src.w) - 0.5;
        let d = (gid.y * params.dst.z + gid.x) * 2u;
        dst_chroma[d] = sample_chroma_bilinear(fx, fy, 0u);
        dst_chroma[d + 1u] = sample_chroma_bilinear(fx, fy, 1u);
    }
}
"#;

fn map_axis(function: &str) -> String {
    format!(
        "fn map_axis(t: f32, in_len: f32, out_len: f32) -> f32 {{\n    return {}(t, in_len, out_len);\n}}\n",
        function
    )
}

/// Mode-specific part of a kernel, appended after [`PRELUDE`]
pub fn body(mode: TransformMode) -> String {
    match mode.sampling() {
        Sampling::Bilinear => DOWNSCALE_MAIN.to_string(),
        Sampling::Nearest => format!("{}{}", map_axis(mode.name()), NEAREST_MAIN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_bodies_select_geometry_function() {
        assert!(body(TransformMode::LinearStretch).contains("return linear_stretch(t, in_len, out_len);"));
        assert!(body(TransformMode::CenterCrop).contains("return center_crop(t, in_len, out_len);"));
    }

    #[test]
    fn test_downscale_body_is_bilinear() {
        let source = body(TransformMode::Downscale);
        assert!(source.contains("sample_luma_bilinear"));
        assert!(!source.contains("map_axis"));
    }

    #[test]
    fn test_nearest_body_guards_chroma_writes() {
        let source = body(TransformMode::RemapStretch);
        assert!(source.contains("(gid.x & 1u) == 0u && (gid.y & 1u) == 0u"));
        assert!(source.contains("cx < params.dst.z && cy < params.dst.w"));
    }
}
