//! Conversion entry point

use crate::config::ConvertSettings;
use crate::error::{PipelineStage, ResultExt};
use crate::kernels::KernelRuntime;
use crate::media::{MediaDemuxer, MediaMuxer, VideoCodecConfig};
use crate::planner::{self, Orientation, OutputPlan, QualityTier};
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::pump::StreamPump;
use crate::session::PipelineSession;
use crate::transform::FrameTransformPipeline;
use crate::{SuperviewError, SuperviewResult};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Summary of a finished conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub plan: OutputPlan,
    pub video_frames: u64,
    pub audio_samples: u64,
    pub elapsed: Duration,
}

/// Requests cancellation of a running conversion
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Converts one input file to one output file at a time
pub struct Converter<R: KernelRuntime> {
    runtime: Arc<R>,
    demuxer: Box<dyn MediaDemuxer>,
    muxer: Box<dyn MediaMuxer>,
    settings: ConvertSettings,
    cancel: Arc<AtomicBool>,
}

impl<R: KernelRuntime> Converter<R> {
    pub fn new(
        runtime: R,
        demuxer: Box<dyn MediaDemuxer>,
        muxer: Box<dyn MediaMuxer>,
        settings: ConvertSettings,
    ) -> SuperviewResult<Self> {
        settings.validate()?;
        Ok(Self {
            runtime: Arc::new(runtime),
            demuxer,
            muxer,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Converter reading and writing through ffmpeg
    #[cfg(feature = "encoding")]
    pub fn with_ffmpeg(runtime: R, settings: ConvertSettings) -> SuperviewResult<Self> {
        use crate::media::ffmpeg::{FfmpegDemuxer, FfmpegMuxer};

        let muxer = FfmpegMuxer::new(settings.writer_queue_depth);
        Self::new(
            runtime,
            Box::new(FfmpegDemuxer::new()),
            Box::new(muxer),
            settings,
        )
    }

    pub fn settings(&self) -> &ConvertSettings {
        &self.settings
    }

    /// Handle that stops the current (or next) conversion
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancel.clone(),
        }
    }

    /// Plan a conversion of `input` without running it
    pub async fn plan(
        &self,
        input: &Path,
        orientation: Orientation,
        tier: QualityTier,
    ) -> SuperviewResult<OutputPlan> {
        let source = self
            .demuxer
            .open_for_reading(input)
            .await
            .in_stage(PipelineStage::Setup, None)?;
        planner::plan(
            &source.properties,
            orientation,
            tier,
            &self.settings.plan_options(),
        )
    }

    /// Convert `input` into `output`
    ///
    /// Either the output is fully finalized, or an error is returned and
    /// the writer has discarded what it wrote. A pending cancellation is
    /// consumed by this run however it ends.
    pub async fn convert(
        &mut self,
        input: &Path,
        output: &Path,
        orientation: Orientation,
        tier: QualityTier,
        progress: Option<ProgressCallback>,
    ) -> SuperviewResult<ConversionReport> {
        let result = self
            .run(input, output, orientation, tier, progress)
            .await;
        self.cancel.store(false, Ordering::SeqCst);
        result
    }

    async fn run(
        &mut self,
        input: &Path,
        output: &Path,
        orientation: Orientation,
        tier: QualityTier,
        progress: Option<ProgressCallback>,
    ) -> SuperviewResult<ConversionReport> {
        let started = Instant::now();
        tracing::info!(
            "Converting {:?} -> {:?} ({} {}, {} runtime)",
            input,
            output,
            orientation,
            tier,
            self.runtime.name()
        );

        if same_file(input, output).await {
            return Err(SuperviewError::Configuration(format!(
                "Output {:?} would overwrite the input",
                output
            ))
            .in_stage(PipelineStage::Setup, None));
        }

        let source = self
            .demuxer
            .open_for_reading(input)
            .await
            .in_stage(PipelineStage::Setup, None)?;

        let plan = planner::plan(
            &source.properties,
            orientation,
            tier,
            &self.settings.plan_options(),
        )?;

        let pipeline = FrameTransformPipeline::new(
            self.runtime.clone(),
            source.properties.width,
            source.properties.height,
            &plan,
        )
        .in_stage(PipelineStage::Setup, None)?;

        let video_config = VideoCodecConfig::for_plan(&plan, &source.properties, &self.settings);
        let writer = self
            .muxer
            .open_for_writing(output, &video_config, &source.audio_config)
            .await
            .in_stage(PipelineStage::Setup, None)?;

        let session = PipelineSession::new(writer, pipeline, self.cancel.clone());
        let reporter = ProgressReporter::new(plan.estimated_total_frames, progress);
        let pump = StreamPump::new(
            session.writer(),
            session.pipeline(),
            session.cancel_flag(),
            self.settings.poll_interval(),
        );

        let outcome = pump.run(source.video, source.audio, reporter).await;
        let (stats, mut reporter) = session.teardown(outcome).await?;
        reporter.complete();

        let report = ConversionReport {
            plan,
            video_frames: stats.video_frames,
            audio_samples: stats.audio_samples,
            elapsed: started.elapsed(),
        };

        tracing::info!(
            "Conversion complete: {} frames, {} audio samples in {:.1}s",
            report.video_frames,
            report.audio_samples,
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }
}

/// Whether two paths name the same file, resolving links and relative
/// segments when the files exist
async fn same_file(a: &Path, b: &Path) -> bool {
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
