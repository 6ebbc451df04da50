//! Coordinate remapping functions for aspect ratio conversion
//!
//! Each function maps an output coordinate `t` along one axis back to the
//! input coordinate that should be sampled. All math is done in `f32` so the
//! CPU runtime and the WGSL kernels agree bit for bit on the same inputs.
//!
//! Sampling coordinates may fall outside the source plane; clamping is the
//! sampler's job, not the geometry function's.

use serde::{Deserialize, Serialize};

/// How a kernel reads its source plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    Nearest,
    Bilinear,
}

/// One stage of a frame transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    /// Non-linear "superview" widening: center nearly 1:1, edges stretched
    RemapStretch,
    /// Mirrored non-linear curve used when an axis is compressed
    LinearStretch,
    /// Fixed offset that trims the excess of an axis
    CenterCrop,
    /// Area-style bilinear resize in normalized space
    Downscale,
}

impl TransformMode {
    /// Source coordinate (in input pixel units) for output coordinate `t`
    ///
    /// For `Downscale` this converts the normalized sample position back to
    /// pixel units with the half-pixel offset a bilinear sampler expects.
    pub fn source_coordinate(&self, t: f32, in_len: f32, out_len: f32) -> f32 {
        match self {
            TransformMode::RemapStretch => remap_stretch(t, in_len, out_len),
            TransformMode::LinearStretch => linear_stretch(t, in_len, out_len),
            TransformMode::CenterCrop => center_crop(t, in_len, out_len),
            TransformMode::Downscale => downscale_normalized(t, out_len) * in_len - 0.5,
        }
    }

    pub fn sampling(&self) -> Sampling {
        match self {
            TransformMode::Downscale => Sampling::Bilinear,
            _ => Sampling::Nearest,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransformMode::RemapStretch => "remap_stretch",
            TransformMode::LinearStretch => "linear_stretch",
            TransformMode::CenterCrop => "center_crop",
            TransformMode::Downscale => "downscale",
        }
    }
}

impl std::fmt::Display for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Position along the output axis normalized to [-1, 1]
#[inline]
fn normalized(t: f32, out_len: f32) -> f32 {
    (t / out_len - 0.5) * 2.0
}

/// Superview remap used when the output axis is wider than the input
///
/// Identity when `out_len == in_len`.
#[inline]
pub fn remap_stretch(t: f32, in_len: f32, out_len: f32) -> f32 {
    let x = normalized(t, out_len);
    let base = t - (out_len - in_len) / 2.0;
    let offset = x * x * x.signum() * (out_len - in_len) / 2.0;
    base - offset
}

/// Remap with the size-difference term of the quadratic offset flipped
///
/// Used when the output axis is being compressed. The sign asymmetry with
/// [`remap_stretch`] is part of the contract and must not be "fixed".
#[inline]
pub fn linear_stretch(t: f32, in_len: f32, out_len: f32) -> f32 {
    let x = normalized(t, out_len);
    let base = t - (out_len - in_len) / 2.0;
    let offset = x * x * x.signum() * (in_len - out_len) / 2.0;
    base - offset
}

/// Constant offset that centers the output window in the input
#[inline]
pub fn center_crop(t: f32, in_len: f32, out_len: f32) -> f32 {
    t + (in_len - out_len) / 2.0
}

/// Normalized [0, 1] sample position for area resizing
#[inline]
pub fn downscale_normalized(t: f32, out_len: f32) -> f32 {
    (t + 0.5) / out_len
}

/// Clamp a sampling coordinate to a valid index along an axis of `len` pixels
#[inline]
pub fn clamp_index(coord: f32, len: u32) -> u32 {
    if len == 0 {
        return 0;
    }
    let max = (len - 1) as f32;
    coord.floor().clamp(0.0, max) as u32
}
