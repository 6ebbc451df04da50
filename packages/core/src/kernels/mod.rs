//! Plane kernels and the runtime that executes them
//!
//! A [`PlaneKernel`] is one compute routine per [`TransformMode`]. The same
//! per-pixel contract is implemented twice: as WGSL for GPU runtimes and as
//! plain Rust in [`cpu`], which doubles as the reference used by tests.

pub mod cpu;
pub mod shaders;

use crate::frame::{chroma_dimensions, BitDepth, PlaneFrame};
use crate::geometry::TransformMode;
use crate::SuperviewResult;

pub use cpu::CpuRuntime;

/// Threads per workgroup along each axis
pub const WORKGROUP_SIZE: u32 = 16;

/// Compute routine applying one transform mode to a bi-planar frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneKernel {
    mode: TransformMode,
}

impl PlaneKernel {
    pub fn new(mode: TransformMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    /// Complete WGSL module for this kernel, entry point `main`
    pub fn source(&self) -> String {
        format!("{}\n{}", shaders::PRELUDE, shaders::body(self.mode))
    }

    pub fn label(&self) -> String {
        format!("superview_{}", self.mode.name())
    }
}

/// Luma and chroma plane dimensions of one side of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDims {
    pub width: u32,
    pub height: u32,
    pub chroma_width: u32,
    pub chroma_height: u32,
}

impl PlaneDims {
    pub fn new(width: u32, height: u32) -> Self {
        let (chroma_width, chroma_height) = chroma_dimensions(width, height);
        Self {
            width,
            height,
            chroma_width,
            chroma_height,
        }
    }

    pub fn of(frame: &PlaneFrame) -> Self {
        Self::new(frame.width, frame.height)
    }

    fn as_array(&self) -> [u32; 4] {
        [self.width, self.height, self.chroma_width, self.chroma_height]
    }
}

/// Per-dispatch uniform data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelParams {
    pub src: PlaneDims,
    pub dst: PlaneDims,
}

impl KernelParams {
    pub fn new(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
        Self {
            src: PlaneDims::new(src_width, src_height),
            dst: PlaneDims::new(dst_width, dst_height),
        }
    }

    /// Uniform buffer layout: `src` then `dst`, each a `vec4<u32>`
    pub fn to_uniform(&self) -> [u32; 8] {
        let [a, b, c, d] = self.src.as_array();
        let [e, f, g, h] = self.dst.as_array();
        [a, b, c, d, e, f, g, h]
    }
}

/// Number of invocations along each axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub x: u32,
    pub y: u32,
}

impl GridSize {
    /// One invocation per output luma pixel
    pub fn for_output(dims: &PlaneDims) -> Self {
        Self {
            x: dims.width,
            y: dims.height,
        }
    }

    /// Workgroup counts covering the grid
    pub fn workgroups(&self) -> (u32, u32) {
        (
            self.x.div_ceil(WORKGROUP_SIZE),
            self.y.div_ceil(WORKGROUP_SIZE),
        )
    }
}

/// Executes plane kernels against runtime-resident frames
///
/// `Planes` is exclusively owned by whoever holds it; `dispatch` reads its
/// input and writes only its output, and returns once the work completes.
pub trait KernelRuntime: Send + Sync + 'static {
    type Planes: Send + 'static;
    type Pipeline: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn compile(&self, kernel: PlaneKernel) -> SuperviewResult<Self::Pipeline>;

    /// Move a decoded frame into runtime memory
    fn upload(&self, frame: PlaneFrame) -> SuperviewResult<Self::Planes>;

    /// Fresh output planes for one stage
    fn allocate(&self, width: u32, height: u32, depth: BitDepth) -> SuperviewResult<Self::Planes>;

    fn dispatch(
        &self,
        pipeline: &Self::Pipeline,
        params: &KernelParams,
        input: &Self::Planes,
        output: &mut Self::Planes,
        grid: GridSize,
    ) -> SuperviewResult<()>;

    /// Read planes back for the encoder, consuming them
    fn download(&self, planes: Self::Planes) -> SuperviewResult<PlaneFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_uniform_layout() {
        let params = KernelParams::new(1440, 1080, 1921, 1081);
        assert_eq!(params.to_uniform(), [1440, 1080, 720, 540, 1921, 1081, 961, 541]);
    }

    #[test]
    fn test_grid_workgroups_round_up() {
        let grid = GridSize::for_output(&PlaneDims::new(1920, 1080));
        assert_eq!(grid.workgroups(), (120, 68));
    }

    #[test]
    fn test_kernel_source_contains_entry_point() {
        for mode in [
            TransformMode::RemapStretch,
            TransformMode::LinearStretch,
            TransformMode::CenterCrop,
            TransformMode::Downscale,
        ] {
            let source = PlaneKernel::new(mode).source();
            assert!(source.contains("fn main("));
            assert!(source.contains("@workgroup_size(16, 16)"));
            assert!(source.contains("var<uniform> params"));
        }
        assert!(PlaneKernel::new(TransformMode::RemapStretch)
            .source()
            .contains("remap_stretch(t, in_len, out_len)"));
    }
}
