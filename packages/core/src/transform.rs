//! Frame transform pipeline
//!
//! Runs a plan's stage sequence over one frame. Each stage reads the
//! previous stage's planes and writes into freshly allocated ones; the
//! previous planes are dropped as soon as the dispatch returns, so exactly
//! one buffer per frame is live between stages.

use crate::error::{PipelineStage, ResultExt};
use crate::frame::{BitDepth, VideoFrame};
use crate::kernels::{GridSize, KernelParams, KernelRuntime, PlaneKernel};
use crate::planner::OutputPlan;
use crate::{SuperviewError, SuperviewResult};
use std::sync::Arc;

struct CompiledStage<P> {
    kernel: PlaneKernel,
    params: KernelParams,
    pipeline: P,
}

pub struct FrameTransformPipeline<R: KernelRuntime> {
    runtime: Arc<R>,
    stages: Vec<CompiledStage<R::Pipeline>>,
    input_width: u32,
    input_height: u32,
    depth: BitDepth,
}

impl<R: KernelRuntime> FrameTransformPipeline<R> {
    /// Compile every stage of `plan` for frames of `input_width` x `input_height`
    pub fn new(
        runtime: Arc<R>,
        input_width: u32,
        input_height: u32,
        plan: &OutputPlan,
    ) -> SuperviewResult<Self> {
        if plan.stages.is_empty() {
            return Err(SuperviewError::SetupFailure(
                "Output plan has no transform stages".to_string(),
            ));
        }

        let mut stages = Vec::with_capacity(plan.stages.len());
        let (mut width, mut height) = (input_width, input_height);

        for (index, stage) in plan.stages.iter().enumerate() {
            let kernel = PlaneKernel::new(stage.mode);
            let pipeline = runtime
                .compile(kernel)
                .in_stage(PipelineStage::Transform(index), None)?;
            let params = KernelParams::new(width, height, stage.width, stage.height);

            tracing::debug!(
                "Stage {}: {} {}x{} -> {}x{} on {}",
                index,
                stage.mode,
                width,
                height,
                stage.width,
                stage.height,
                runtime.name()
            );

            stages.push(CompiledStage {
                kernel,
                params,
                pipeline,
            });
            width = stage.width;
            height = stage.height;
        }

        Ok(Self {
            runtime,
            stages,
            input_width,
            input_height,
            depth: plan.depth,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn output_dimensions(&self) -> (u32, u32) {
        self.stages
            .last()
            .map(|s| (s.params.dst.width, s.params.dst.height))
            .unwrap_or((self.input_width, self.input_height))
    }

    /// Transform one decoded frame, keeping its presentation time
    pub fn transform(&self, frame: VideoFrame, index: u64) -> SuperviewResult<VideoFrame> {
        let VideoFrame {
            planes,
            presentation_time,
        } = frame;

        if planes.width != self.input_width || planes.height != self.input_height {
            return Err(SuperviewError::ReaderFailure(format!(
                "Decoded frame is {}x{}, expected {}x{}",
                planes.width, planes.height, self.input_width, self.input_height
            ))
            .in_stage(PipelineStage::Decode, Some(index)));
        }

        let mut current = self
            .runtime
            .upload(planes)
            .in_stage(PipelineStage::Transform(0), Some(index))?;

        for (stage_index, stage) in self.stages.iter().enumerate() {
            let context = PipelineStage::Transform(stage_index);
            let dst = stage.params.dst;

            let mut output = self
                .runtime
                .allocate(dst.width, dst.height, self.depth)
                .in_stage(context, Some(index))?;
            self.runtime
                .dispatch(
                    &stage.pipeline,
                    &stage.params,
                    &current,
                    &mut output,
                    GridSize::for_output(&dst),
                )
                .in_stage(context, Some(index))?;

            // Hand-off: the previous planes are released here
            current = output;
        }

        let planes = self
            .runtime
            .download(current)
            .in_stage(PipelineStage::Transform(self.stages.len() - 1), Some(index))?;

        if index % 100 == 0 {
            tracing::debug!(
                "Transformed frame {} through {:?}",
                index,
                self.stages.iter().map(|s| s.kernel.mode()).collect::<Vec<_>>()
            );
        }

        Ok(VideoFrame {
            planes,
            presentation_time,
        })
    }
}
