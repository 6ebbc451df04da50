use std::fmt;
use thiserror::Error;

/// Which track of the source a failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Setup,
    Decode,
    /// Index into the plan's stage sequence
    Transform(usize),
    Encode,
    Audio,
    Finalize,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Setup => write!(f, "setup"),
            PipelineStage::Decode => write!(f, "decode"),
            PipelineStage::Transform(index) => write!(f, "transform stage {}", index),
            PipelineStage::Encode => write!(f, "encode"),
            PipelineStage::Audio => write!(f, "audio passthrough"),
            PipelineStage::Finalize => write!(f, "finalize"),
        }
    }
}

/// Where in the pipeline an error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorContext {
    pub stage: PipelineStage,
    pub frame: Option<u64>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame {
            Some(frame) => write!(f, "{} (frame {})", self.stage, frame),
            None => write!(f, "{}", self.stage),
        }
    }
}

#[derive(Error, Debug)]
pub enum SuperviewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Setup failed: {0}")]
    SetupFailure(String),

    #[error("Source has no {0} track")]
    MissingTrack(TrackKind),

    #[error("Reader failed: {0}")]
    ReaderFailure(String),

    #[error("Writer failed: {0}")]
    WriterFailure(String),

    #[error("Buffer allocation failed: {0}")]
    BufferAllocationFailure(String),

    #[error("Kernel dispatch failed: {0}")]
    KernelDispatchFailure(String),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Context {
        context: ErrorContext,
        #[source]
        source: Box<SuperviewError>,
    },
}

impl SuperviewError {
    /// Wrap this error with the stage (and frame, if any) it came from
    pub fn in_stage(self, stage: PipelineStage, frame: Option<u64>) -> Self {
        SuperviewError::Context {
            context: ErrorContext { stage, frame },
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping any context wrappers
    pub fn root(&self) -> &SuperviewError {
        match self {
            SuperviewError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Outermost context attached to this error
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SuperviewError::Context { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Every pipeline failure ends the conversion; nothing is retried
    pub fn is_fatal(&self) -> bool {
        !matches!(self.root(), SuperviewError::Configuration(_))
    }

    /// True when the failure came from cancellation rather than a real fault
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root(), SuperviewError::Cancelled)
    }
}

pub type SuperviewResult<T> = Result<T, SuperviewError>;

/// Attach pipeline context to a result's error
pub trait ResultExt<T> {
    fn in_stage(self, stage: PipelineStage, frame: Option<u64>) -> SuperviewResult<T>;
}

impl<T> ResultExt<T> for SuperviewResult<T> {
    fn in_stage(self, stage: PipelineStage, frame: Option<u64>) -> SuperviewResult<T> {
        self.map_err(|e| e.in_stage(stage, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display_includes_stage_and_frame() {
        let err = SuperviewError::KernelDispatchFailure("queue lost".to_string())
            .in_stage(PipelineStage::Transform(1), Some(42));
        assert_eq!(
            err.to_string(),
            "transform stage 1 (frame 42): Kernel dispatch failed: queue lost"
        );
    }

    #[test]
    fn test_root_skips_nested_context() {
        let err = SuperviewError::MissingTrack(TrackKind::Audio)
            .in_stage(PipelineStage::Setup, None)
            .in_stage(PipelineStage::Finalize, None);
        assert!(matches!(
            err.root(),
            SuperviewError::MissingTrack(TrackKind::Audio)
        ));
        assert_eq!(err.context().unwrap().stage, PipelineStage::Finalize);
    }

    #[test]
    fn test_cancellation_detection() {
        let err = SuperviewError::Cancelled.in_stage(PipelineStage::Audio, None);
        assert!(err.is_cancellation());
        assert!(!SuperviewError::WriterFailure("x".into()).is_cancellation());
    }
}
