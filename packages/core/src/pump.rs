//! Stream pump
//!
//! Two tasks move samples from the source to the writer: one pulls video
//! frames through the transform pipeline, the other copies audio samples.
//! Both poll the writer's readiness before pulling, so a slow writer only
//! delays reads and never causes frames to be dropped.

use crate::error::{PipelineStage, ResultExt};
use crate::kernels::KernelRuntime;
use crate::media::{AudioTrackReader, MediaWriter, VideoTrackReader};
use crate::progress::ProgressReporter;
use crate::transform::FrameTransformPipeline;
use crate::{SuperviewError, SuperviewResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Output writer shared by the video and audio tasks
pub type SharedWriter = Arc<Mutex<Box<dyn MediaWriter>>>;

/// Samples moved by a completed pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpStats {
    pub video_frames: u64,
    pub audio_samples: u64,
}

/// Stop signals checked at the top of every loop iteration
#[derive(Clone)]
struct StopFlags {
    cancel: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl StopFlags {
    fn check(&self) -> SuperviewResult<()> {
        if self.cancel.load(Ordering::SeqCst) || self.failed.load(Ordering::SeqCst) {
            return Err(SuperviewError::Cancelled);
        }
        Ok(())
    }

    fn record<T>(&self, result: &SuperviewResult<T>) {
        if result.is_err() {
            self.failed.store(true, Ordering::SeqCst);
        }
    }
}

pub struct StreamPump<R: KernelRuntime> {
    writer: SharedWriter,
    pipeline: Arc<FrameTransformPipeline<R>>,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<R: KernelRuntime> StreamPump<R> {
    pub fn new(
        writer: SharedWriter,
        pipeline: Arc<FrameTransformPipeline<R>>,
        cancel: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            writer,
            pipeline,
            cancel,
            poll_interval,
        }
    }

    /// Drive both streams to completion
    ///
    /// Each task finishes its writer input when its source ends. The first
    /// failure stops the sibling task; the returned error is the first real
    /// failure rather than the sibling's resulting cancellation.
    pub async fn run(
        self,
        video: Box<dyn VideoTrackReader>,
        audio: Box<dyn AudioTrackReader>,
        progress: ProgressReporter,
    ) -> SuperviewResult<(PumpStats, ProgressReporter)> {
        let flags = StopFlags {
            cancel: self.cancel.clone(),
            failed: Arc::new(AtomicBool::new(false)),
        };

        let video_task = {
            let flags = flags.clone();
            let writer = self.writer.clone();
            let pipeline = self.pipeline.clone();
            let poll = self.poll_interval;
            tokio::spawn(async move {
                let result = video_loop(writer, pipeline, video, progress, &flags, poll).await;
                flags.record(&result);
                result
            })
        };

        let audio_task = {
            let flags = flags.clone();
            let writer = self.writer.clone();
            let poll = self.poll_interval;
            tokio::spawn(async move {
                let result = audio_loop(writer, audio, &flags, poll).await;
                flags.record(&result);
                result
            })
        };

        let (video_result, audio_result) = tokio::join!(video_task, audio_task);
        let video_result = video_result.unwrap_or_else(|e| {
            Err(SuperviewError::KernelDispatchFailure(format!("Video task panicked: {}", e)))
        });
        let audio_result = audio_result.unwrap_or_else(|e| {
            Err(SuperviewError::WriterFailure(format!("Audio task panicked: {}", e)))
        });

        match (video_result, audio_result) {
            (Ok((video_frames, progress)), Ok(audio_samples)) => Ok((
                PumpStats {
                    video_frames,
                    audio_samples,
                },
                progress,
            )),
            (Err(video), Err(audio)) => {
                if video.is_cancellation() && !audio.is_cancellation() {
                    Err(audio)
                } else {
                    Err(video)
                }
            }
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        }
    }
}

/// Wait until the writer accepts video, or a stop is requested
async fn wait_ready(
    writer: &SharedWriter,
    flags: &StopFlags,
    poll: Duration,
    video: bool,
) -> SuperviewResult<()> {
    loop {
        flags.check()?;
        let ready = {
            let writer = writer.lock().await;
            if video {
                writer.is_video_ready()
            } else {
                writer.is_audio_ready()
            }
        };
        if ready {
            return Ok(());
        }
        tokio::time::sleep(poll).await;
    }
}

async fn video_loop<R: KernelRuntime>(
    writer: SharedWriter,
    pipeline: Arc<FrameTransformPipeline<R>>,
    mut reader: Box<dyn VideoTrackReader>,
    mut progress: ProgressReporter,
    flags: &StopFlags,
    poll: Duration,
) -> SuperviewResult<(u64, ProgressReporter)> {
    let mut processed: u64 = 0;

    loop {
        wait_ready(&writer, flags, poll, true).await?;

        let Some(frame) = reader
            .next_video_frame()
            .await
            .in_stage(PipelineStage::Decode, Some(processed))?
        else {
            break;
        };

        let index = processed;
        let stage_pipeline = pipeline.clone();
        let transformed = tokio::task::spawn_blocking(move || stage_pipeline.transform(frame, index))
            .await
            .map_err(|e| {
                SuperviewError::KernelDispatchFailure(format!("Transform task panicked: {}", e))
                    .in_stage(PipelineStage::Transform(0), Some(index))
            })??;

        writer
            .lock()
            .await
            .append_video(transformed)
            .await
            .in_stage(PipelineStage::Encode, Some(index))?;

        processed += 1;
        progress.frame_processed(processed);

        if processed % 100 == 0 {
            tracing::debug!("Pumped {} video frames", processed);
        }
    }

    writer
        .lock()
        .await
        .finish_video()
        .await
        .in_stage(PipelineStage::Encode, None)?;

    tracing::info!("Video stream finished: {} frames", processed);
    Ok((processed, progress))
}

async fn audio_loop(
    writer: SharedWriter,
    mut reader: Box<dyn AudioTrackReader>,
    flags: &StopFlags,
    poll: Duration,
) -> SuperviewResult<u64> {
    let mut copied: u64 = 0;

    loop {
        wait_ready(&writer, flags, poll, false).await?;

        let Some(sample) = reader
            .next_audio_sample()
            .await
            .in_stage(PipelineStage::Audio, None)?
        else {
            break;
        };

        writer
            .lock()
            .await
            .append_audio(sample)
            .await
            .in_stage(PipelineStage::Audio, None)?;
        copied += 1;
    }

    writer
        .lock()
        .await
        .finish_audio()
        .await
        .in_stage(PipelineStage::Audio, None)?;

    tracing::info!("Audio stream finished: {} samples", copied);
    Ok(copied)
}
