//! Per-conversion state and its single teardown path

use crate::error::{PipelineStage, ResultExt};
use crate::kernels::KernelRuntime;
use crate::media::MediaWriter;
use crate::pump::SharedWriter;
use crate::transform::FrameTransformPipeline;
use crate::SuperviewResult;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Resources held for the duration of one conversion
///
/// [`PipelineSession::teardown`] consumes the session, so every run ends
/// through it exactly once whether it succeeded, failed or was cancelled.
pub struct PipelineSession<R: KernelRuntime> {
    writer: SharedWriter,
    pipeline: Arc<FrameTransformPipeline<R>>,
    cancel: Arc<AtomicBool>,
}

impl<R: KernelRuntime> PipelineSession<R> {
    pub fn new(
        writer: Box<dyn MediaWriter>,
        pipeline: FrameTransformPipeline<R>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            pipeline: Arc::new(pipeline),
            cancel,
        }
    }

    pub fn writer(&self) -> SharedWriter {
        self.writer.clone()
    }

    pub fn pipeline(&self) -> Arc<FrameTransformPipeline<R>> {
        self.pipeline.clone()
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Finalize the output on success, abort it otherwise, then release
    /// the writer and all kernel state
    pub async fn teardown<T>(self, outcome: SuperviewResult<T>) -> SuperviewResult<T> {
        let result = {
            let mut writer = self.writer.lock().await;
            match outcome {
                Ok(value) => match writer
                    .finish()
                    .await
                    .in_stage(PipelineStage::Finalize, None)
                {
                    Ok(()) => Ok(value),
                    Err(e) => {
                        tracing::error!("Finalizing output failed: {}", e);
                        writer.abort().await;
                        Err(e)
                    }
                },
                Err(e) => {
                    if e.is_cancellation() {
                        tracing::warn!("Conversion cancelled, discarding output");
                    } else {
                        tracing::error!("Conversion failed: {}", e);
                    }
                    writer.abort().await;
                    Err(e)
                }
            }
        };

        drop(self.pipeline);
        drop(self.writer);
        tracing::debug!("Pipeline session torn down");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BitDepth;
    use crate::geometry::TransformMode;
    use crate::kernels::CpuRuntime;
    use crate::media::memory::RecordingMuxer;
    use crate::media::{AudioPassthroughConfig, MediaMuxer, VideoCodec, VideoCodecConfig};
    use crate::planner::{OutputPlan, PlanStage};
    use crate::SuperviewError;
    use std::path::Path;

    async fn session(muxer: &RecordingMuxer) -> PipelineSession<CpuRuntime> {
        let plan = OutputPlan {
            output_width: 16,
            output_height: 8,
            target_bitrate: 1_000_000,
            stages: vec![PlanStage {
                mode: TransformMode::RemapStretch,
                width: 16,
                height: 8,
            }],
            estimated_total_frames: 1,
            depth: BitDepth::Eight,
        };
        let pipeline =
            FrameTransformPipeline::new(Arc::new(CpuRuntime::new()), 12, 8, &plan).unwrap();
        let config = VideoCodecConfig {
            codec: VideoCodec::H264,
            width: 16,
            height: 8,
            bitrate: 1_000_000,
            frame_rate: 30.0,
            depth: BitDepth::Eight,
            hardware_accel: false,
            preset: "medium".to_string(),
        };
        let writer = muxer
            .open_for_writing(Path::new("out.mp4"), &config, &AudioPassthroughConfig::default())
            .await
            .unwrap();
        PipelineSession::new(writer, pipeline, Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn test_failure_aborts_writer() {
        let muxer = RecordingMuxer::new();
        let session = session(&muxer).await;
        let outcome: SuperviewResult<()> = Err(SuperviewError::ReaderFailure("boom".into()));
        assert!(session.teardown(outcome).await.is_err());

        let recording = muxer.recording();
        let recording = recording.lock().unwrap();
        assert!(recording.aborted);
        assert!(!recording.finished);
    }

    #[tokio::test]
    async fn test_success_finishes_writer() {
        let muxer = RecordingMuxer::new();
        let session = session(&muxer).await;
        {
            let writer = session.writer();
            let mut writer = writer.lock().await;
            writer.finish_video().await.unwrap();
            writer.finish_audio().await.unwrap();
        }
        assert_eq!(session.teardown(Ok(7)).await.unwrap(), 7);
        assert!(muxer.recording().lock().unwrap().finished);
    }

    #[tokio::test]
    async fn test_finalize_failure_aborts() {
        let muxer = RecordingMuxer::new().failing_finish();
        let session = session(&muxer).await;
        {
            let writer = session.writer();
            let mut writer = writer.lock().await;
            writer.finish_video().await.unwrap();
            writer.finish_audio().await.unwrap();
        }
        let err = session.teardown(Ok(())).await.unwrap_err();
        assert_eq!(err.context().unwrap().stage, PipelineStage::Finalize);
        assert!(muxer.recording().lock().unwrap().aborted);
    }
}
