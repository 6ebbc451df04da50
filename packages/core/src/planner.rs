//! Output geometry and bitrate planning
//!
//! Everything here is pure: given the source properties and the caller's
//! orientation and quality choice, derive the output size, the stage
//! sequence the transform pipeline will run, and the encoder bitrate.

use crate::frame::BitDepth;
use crate::geometry::TransformMode;
use crate::{SuperviewError, SuperviewResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Bitrate overhead applied when none is configured
pub const DEFAULT_OVERHEAD_FACTOR: f64 = 1.15;

/// Properties of the source video, read once when the input is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputVideoProperties {
    /// Width after applying any stored display rotation
    pub width: u32,
    /// Height after applying any stored display rotation
    pub height: u32,
    /// Nominal frames per second
    pub frame_rate: f64,
    /// Average video data rate in bits per second (0 = unknown)
    pub bitrate: u64,
    pub duration: Duration,
    pub depth: BitDepth,
}

impl InputVideoProperties {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Frame count estimate used for progress, `duration * frame_rate`
    pub fn estimated_total_frames(&self) -> u64 {
        (self.duration.as_secs_f64() * self.frame_rate).round().max(0.0) as u64
    }

    fn validate(&self) -> SuperviewResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SuperviewError::Configuration(format!(
                "Source has invalid dimensions {}x{}",
                self.width, self.height
            )));
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(SuperviewError::Configuration(format!(
                "Source has invalid frame rate {}",
                self.frame_rate
            )));
        }
        Ok(())
    }
}

/// Output orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// 16:9 landscape
    #[default]
    Wide,
    /// 9:16 portrait
    Tall,
}

impl FromStr for Orientation {
    type Err = SuperviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wide" | "landscape" | "16:9" => Ok(Orientation::Wide),
            "tall" | "portrait" | "9:16" => Ok(Orientation::Tall),
            other => Err(SuperviewError::Configuration(format!(
                "Unknown orientation '{}' (expected wide or tall)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Orientation::Wide => write!(f, "wide"),
            Orientation::Tall => write!(f, "tall"),
        }
    }
}

/// Output resolution tier, selecting the long-axis pixel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Uhd4k,
    TwoPointSevenK,
    Qhd1440,
    #[default]
    Hd1080,
    Hd720,
}

impl QualityTier {
    /// Pixels along the output's long axis
    pub fn long_axis(&self) -> u32 {
        match self {
            QualityTier::Uhd4k => 3840,
            QualityTier::TwoPointSevenK => 2704,
            QualityTier::Qhd1440 => 2560,
            QualityTier::Hd1080 => 1920,
            QualityTier::Hd720 => 1280,
        }
    }

    /// Bitrate used when the source does not report one (bits per second)
    pub fn fallback_bitrate(&self) -> u64 {
        match self {
            QualityTier::Uhd4k => 8_000_000,
            QualityTier::TwoPointSevenK => 7_000_000,
            QualityTier::Qhd1440 => 6_000_000,
            QualityTier::Hd1080 => 5_000_000,
            QualityTier::Hd720 => 5_000_000,
        }
    }

    pub fn all() -> Vec<QualityTier> {
        vec![
            QualityTier::Uhd4k,
            QualityTier::TwoPointSevenK,
            QualityTier::Qhd1440,
            QualityTier::Hd1080,
            QualityTier::Hd720,
        ]
    }
}

impl FromStr for QualityTier {
    type Err = SuperviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "4k" | "2160p" | "uhd" | "high" => Ok(QualityTier::Uhd4k),
            "2.7k" | "medium" => Ok(QualityTier::TwoPointSevenK),
            "1440p" | "qhd" => Ok(QualityTier::Qhd1440),
            "1080p" | "hd" | "standard" => Ok(QualityTier::Hd1080),
            "720p" => Ok(QualityTier::Hd720),
            other => Err(SuperviewError::Configuration(format!(
                "Unknown quality tier '{}' (expected 4k, 2.7k, 1440p, 1080p or 720p)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityTier::Uhd4k => write!(f, "4K"),
            QualityTier::TwoPointSevenK => write!(f, "2.7K"),
            QualityTier::Qhd1440 => write!(f, "1440p"),
            QualityTier::Hd1080 => write!(f, "1080p"),
            QualityTier::Hd720 => write!(f, "720p"),
        }
    }
}

/// Which stage sequence the planner emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Resize so one axis matches, then non-linearly widen the other
    #[default]
    Superview,
    /// Resize so one axis matches, then non-linearly compress the other
    Squeeze,
    /// Resize so one axis matches, then trim the other
    Crop,
}

/// One stage of the transform: the mode and the size it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStage {
    pub mode: TransformMode,
    pub width: u32,
    pub height: u32,
}

/// Options that shape the plan beyond orientation and tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanOptions {
    pub overhead_factor: f64,
    pub fit_mode: FitMode,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            overhead_factor: DEFAULT_OVERHEAD_FACTOR,
            fit_mode: FitMode::Superview,
        }
    }
}

/// Immutable target geometry and bitrate for one conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPlan {
    pub output_width: u32,
    pub output_height: u32,
    pub target_bitrate: u64,
    pub stages: Vec<PlanStage>,
    pub estimated_total_frames: u64,
    pub depth: BitDepth,
}

impl OutputPlan {
    pub fn modes(&self) -> Vec<TransformMode> {
        self.stages.iter().map(|s| s.mode).collect()
    }

    pub fn pixel_count(&self) -> u64 {
        self.output_width as u64 * self.output_height as u64
    }
}

/// Round down to an even integer, never below 2
pub fn floor_to_even(value: f64) -> u32 {
    let v = (value / 2.0).floor() * 2.0;
    v.max(2.0) as u32
}

/// Round to the nearest even integer, never below 2
fn round_to_even(value: f64) -> u32 {
    let v = (value / 2.0).round() * 2.0;
    v.max(2.0) as u32
}

/// Output width and height for an orientation and quality tier
///
/// The long axis equals the tier's pixel count; the short axis keeps 16:9
/// and is rounded down to an even number for 4:2:0 chroma.
pub fn output_dimensions(orientation: Orientation, tier: QualityTier) -> (u32, u32) {
    let long = tier.long_axis();
    let short = floor_to_even(long as f64 * 9.0 / 16.0);
    match orientation {
        Orientation::Wide => (long, short),
        Orientation::Tall => (short, long),
    }
}

/// Target bitrate scaled by the change in pixel count
///
/// A zero source bitrate means "unknown" and yields `fallback`.
pub fn target_bitrate(
    source_bitrate: u64,
    input_pixels: u64,
    output_pixels: u64,
    overhead_factor: f64,
    fallback: u64,
) -> u64 {
    if source_bitrate == 0 || input_pixels == 0 {
        return fallback;
    }
    let ratio = output_pixels as f64 / input_pixels as f64;
    (source_bitrate as f64 * ratio * overhead_factor).round() as u64
}

/// Stage sequence taking an `in_w` x `in_h` frame to `out_w` x `out_h`
pub fn plan_stages(in_w: u32, in_h: u32, out_w: u32, out_h: u32, fit: FitMode) -> Vec<PlanStage> {
    let sx = out_w as f64 / in_w as f64;
    let sy = out_h as f64 / in_h as f64;

    // Superview matches the axis that grows least so the other one widens;
    // squeeze and crop match the axis that grows most so the other shrinks.
    let match_x = match fit {
        FitMode::Superview => sx <= sy,
        FitMode::Squeeze | FitMode::Crop => sx >= sy,
    };

    let (mid_w, mid_h) = if match_x {
        let h = round_to_even(in_h as f64 * sx);
        let h = match fit {
            FitMode::Superview => h.min(out_h),
            _ => h.max(out_h),
        };
        (out_w, h)
    } else {
        let w = round_to_even(in_w as f64 * sy);
        let w = match fit {
            FitMode::Superview => w.min(out_w),
            _ => w.max(out_w),
        };
        (w, out_h)
    };

    let final_mode = match fit {
        FitMode::Superview => TransformMode::RemapStretch,
        FitMode::Squeeze => TransformMode::LinearStretch,
        FitMode::Crop => TransformMode::CenterCrop,
    };

    let needs_resize = (mid_w, mid_h) != (in_w, in_h);
    let needs_final = (mid_w, mid_h) != (out_w, out_h);

    let mut stages = Vec::with_capacity(2);
    if needs_resize {
        stages.push(PlanStage {
            mode: TransformMode::Downscale,
            width: mid_w,
            height: mid_h,
        });
    }
    if needs_final || stages.is_empty() {
        stages.push(PlanStage {
            mode: final_mode,
            width: out_w,
            height: out_h,
        });
    }
    stages
}

/// Build the full plan for a conversion
pub fn plan(
    input: &InputVideoProperties,
    orientation: Orientation,
    tier: QualityTier,
    options: &PlanOptions,
) -> SuperviewResult<OutputPlan> {
    input.validate()?;

    let (output_width, output_height) = output_dimensions(orientation, tier);
    let output_pixels = output_width as u64 * output_height as u64;

    if input.bitrate == 0 {
        tracing::warn!(
            "Source bitrate unavailable, using {} fallback of {} bps",
            tier,
            tier.fallback_bitrate()
        );
    }
    let target_bitrate = target_bitrate(
        input.bitrate,
        input.pixel_count(),
        output_pixels,
        options.overhead_factor,
        tier.fallback_bitrate(),
    );

    let stages = plan_stages(
        input.width,
        input.height,
        output_width,
        output_height,
        options.fit_mode,
    );

    let plan = OutputPlan {
        output_width,
        output_height,
        target_bitrate,
        stages,
        estimated_total_frames: input.estimated_total_frames(),
        depth: input.depth,
    };

    tracing::info!(
        "Planned {}x{} -> {}x{} ({} {}), {} bps, stages: {:?}",
        input.width,
        input.height,
        plan.output_width,
        plan.output_height,
        orientation,
        tier,
        plan.target_bitrate,
        plan.modes()
    );

    Ok(plan)
}
