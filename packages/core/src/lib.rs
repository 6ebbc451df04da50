pub mod config;
pub mod converter;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod kernels;
pub mod media;
pub mod planner;
pub mod progress;
pub mod pump;
pub mod session;
pub mod transform;

pub use config::{ConvertSettings, SettingsStore};
pub use converter::{CancelHandle, ConversionReport, Converter};
pub use error::{ErrorContext, PipelineStage, ResultExt, SuperviewError, SuperviewResult, TrackKind};
pub use frame::{BitDepth, EncodedSample, PlaneFrame, VideoFrame};
pub use geometry::TransformMode;
pub use kernels::{CpuRuntime, GridSize, KernelParams, KernelRuntime, PlaneDims, PlaneKernel};
pub use planner::{
    FitMode, InputVideoProperties, Orientation, OutputPlan, PlanOptions, PlanStage, QualityTier,
};
pub use progress::{ProgressCallback, ProgressReporter};
pub use transform::FrameTransformPipeline;
