//! Reference kernel runtime on the CPU
//!
//! Mirrors the WGSL kernels invocation for invocation: every grid position
//! runs [`shade_luma`] and [`shade_chroma`], rows in parallel with rayon.

use super::{GridSize, KernelParams, KernelRuntime, PlaneDims, PlaneKernel};
use crate::frame::{BitDepth, PlaneFrame};
use crate::geometry::{clamp_index, downscale_normalized, Sampling, TransformMode};
use crate::{SuperviewError, SuperviewResult};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// A chroma sample produced by one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromaWrite {
    pub x: u32,
    pub y: u32,
    pub value: [u16; 2],
}

fn luma_at(frame: &PlaneFrame, x: i64, y: i64) -> f32 {
    let cx = x.clamp(0, frame.width as i64 - 1) as u32;
    let cy = y.clamp(0, frame.height as i64 - 1) as u32;
    frame.luma_at(cx, cy) as f32
}

fn chroma_at(frame: &PlaneFrame, x: i64, y: i64, channel: usize) -> f32 {
    let cx = x.clamp(0, frame.chroma_width() as i64 - 1) as u32;
    let cy = y.clamp(0, frame.chroma_height() as i64 - 1) as u32;
    frame.chroma_at(cx, cy)[channel] as f32
}

#[inline]
fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Bilinear sample with edge clamping; `fx`/`fy` are in pixel units
fn bilinear(fx: f32, fy: f32, at: impl Fn(i64, i64) -> f32) -> u16 {
    let x0 = fx.floor();
    let y0 = fy.floor();
    let wx = fx - x0;
    let wy = fy - y0;
    let ix = x0 as i64;
    let iy = y0 as i64;
    let top = mix(at(ix, iy), at(ix + 1, iy), wx);
    let bottom = mix(at(ix, iy + 1), at(ix + 1, iy + 1), wx);
    (mix(top, bottom, wy) + 0.5).floor() as u16
}

fn source_position(mode: TransformMode, params: &KernelParams, gx: u32, gy: u32) -> (f32, f32) {
    (
        mode.source_coordinate(gx as f32, params.src.width as f32, params.dst.width as f32),
        mode.source_coordinate(gy as f32, params.src.height as f32, params.dst.height as f32),
    )
}

/// Luma value for output position (`gx`, `gy`)
pub fn shade_luma(mode: TransformMode, params: &KernelParams, input: &PlaneFrame, gx: u32, gy: u32) -> u16 {
    let (sx, sy) = source_position(mode, params, gx, gy);
    match mode.sampling() {
        Sampling::Bilinear => bilinear(sx, sy, |x, y| luma_at(input, x, y)),
        Sampling::Nearest => input.luma_at(
            clamp_index(sx, params.src.width),
            clamp_index(sy, params.src.height),
        ),
    }
}

/// Chroma write performed by the invocation at (`gx`, `gy`), if any
///
/// Remap kernels write only from even positions, to `gid / 2`. The
/// downscale kernel treats the grid position as a chroma coordinate.
/// Either way the write is dropped when it falls outside the output chroma
/// plane.
pub fn shade_chroma(
    mode: TransformMode,
    params: &KernelParams,
    input: &PlaneFrame,
    gx: u32,
    gy: u32,
) -> Option<ChromaWrite> {
    let dst = &params.dst;
    let src = &params.src;

    if mode.sampling() == Sampling::Bilinear {
        if gx >= dst.chroma_width || gy >= dst.chroma_height {
            return None;
        }
        let fx = downscale_normalized(gx as f32, dst.chroma_width as f32) * src.chroma_width as f32 - 0.5;
        let fy = downscale_normalized(gy as f32, dst.chroma_height as f32) * src.chroma_height as f32 - 0.5;
        let u = bilinear(fx, fy, |x, y| chroma_at(input, x, y, 0));
        let v = bilinear(fx, fy, |x, y| chroma_at(input, x, y, 1));
        return Some(ChromaWrite {
            x: gx,
            y: gy,
            value: [u, v],
        });
    }

    if gx % 2 != 0 || gy % 2 != 0 {
        return None;
    }
    let (cx, cy) = (gx / 2, gy / 2);
    if cx >= dst.chroma_width || cy >= dst.chroma_height {
        return None;
    }

    let (sx, sy) = source_position(mode, params, gx, gy);
    let value = input.chroma_at(
        clamp_index(sx / 2.0, src.chroma_width),
        clamp_index(sy / 2.0, src.chroma_height),
    );
    Some(ChromaWrite { x: cx, y: cy, value })
}

/// Compiled CPU kernel
#[derive(Debug, Clone, Copy)]
pub struct CpuPipeline {
    kernel: PlaneKernel,
}

impl CpuPipeline {
    pub fn mode(&self) -> TransformMode {
        self.kernel.mode()
    }
}

/// Kernel runtime executing on the CPU thread pool
#[derive(Debug, Default)]
pub struct CpuRuntime {
    dispatches: AtomicU64,
    chroma_writes: AtomicU64,
}

impl CpuRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel dispatches completed so far
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Chroma samples written so far
    pub fn chroma_write_count(&self) -> u64 {
        self.chroma_writes.load(Ordering::Relaxed)
    }
}

fn check_dims(frame: &PlaneFrame, expected: &PlaneDims, side: &str) -> SuperviewResult<()> {
    if PlaneDims::of(frame) != *expected {
        return Err(SuperviewError::KernelDispatchFailure(format!(
            "{} planes are {}x{}, params expect {}x{}",
            side, frame.width, frame.height, expected.width, expected.height
        )));
    }
    Ok(())
}

impl KernelRuntime for CpuRuntime {
    type Planes = PlaneFrame;
    type Pipeline = CpuPipeline;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn compile(&self, kernel: PlaneKernel) -> SuperviewResult<Self::Pipeline> {
        tracing::debug!("Prepared CPU kernel {}", kernel.label());
        Ok(CpuPipeline { kernel })
    }

    fn upload(&self, frame: PlaneFrame) -> SuperviewResult<Self::Planes> {
        frame.validate()?;
        Ok(frame)
    }

    fn allocate(&self, width: u32, height: u32, depth: BitDepth) -> SuperviewResult<Self::Planes> {
        if width == 0 || height == 0 {
            return Err(SuperviewError::BufferAllocationFailure(format!(
                "Cannot allocate {}x{} planes",
                width, height
            )));
        }
        Ok(PlaneFrame::new(width, height, depth))
    }

    fn dispatch(
        &self,
        pipeline: &Self::Pipeline,
        params: &KernelParams,
        input: &Self::Planes,
        output: &mut Self::Planes,
        grid: GridSize,
    ) -> SuperviewResult<()> {
        check_dims(input, &params.src, "Input")?;
        check_dims(output, &params.dst, "Output")?;
        if grid != GridSize::for_output(&params.dst) {
            return Err(SuperviewError::KernelDispatchFailure(format!(
                "Grid {}x{} does not cover output {}x{}",
                grid.x, grid.y, params.dst.width, params.dst.height
            )));
        }

        let mode = pipeline.mode();
        let row_len = params.dst.width as usize;

        let writes: Vec<ChromaWrite> = output
            .luma
            .par_chunks_mut(row_len)
            .enumerate()
            .flat_map_iter(|(gy, row)| {
                let gy = gy as u32;
                for (gx, value) in row.iter_mut().enumerate() {
                    *value = shade_luma(mode, params, input, gx as u32, gy);
                }
                (0..grid.x)
                    .filter_map(|gx| shade_chroma(mode, params, input, gx, gy))
                    .collect::<Vec<_>>()
            })
            .collect();

        let chroma_width = params.dst.chroma_width;
        for write in &writes {
            let index = ((write.y * chroma_width + write.x) * 2) as usize;
            output.chroma[index] = write.value[0];
            output.chroma[index + 1] = write.value[1];
        }

        self.chroma_writes
            .fetch_add(writes.len() as u64, Ordering::Relaxed);
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn download(&self, planes: Self::Planes) -> SuperviewResult<PlaneFrame> {
        Ok(planes)
    }
}
