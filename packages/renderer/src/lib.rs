//! wgpu runtime for the Superview plane kernels
//!
//! Frames live in storage buffers with one `u32` per sample, which lets the
//! same WGSL serve 8-bit and 10-bit sources. Each dispatch blocks until the
//! device has finished so the pipeline can hand buffers from stage to stage.

use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use superview_core::frame::chroma_dimensions;
use superview_core::{
    BitDepth, GridSize, KernelParams, KernelRuntime, PlaneFrame, PlaneKernel, SuperviewError,
    SuperviewResult,
};
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ParamsUniform {
    src: [u32; 4],
    dst: [u32; 4],
}

impl From<&KernelParams> for ParamsUniform {
    fn from(params: &KernelParams) -> Self {
        let raw = params.to_uniform();
        Self {
            src: [raw[0], raw[1], raw[2], raw[3]],
            dst: [raw[4], raw[5], raw[6], raw[7]],
        }
    }
}

/// Frame planes resident on the device
pub struct WgpuPlanes {
    luma: wgpu::Buffer,
    chroma: wgpu::Buffer,
    width: u32,
    height: u32,
    depth: BitDepth,
}

impl WgpuPlanes {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn luma_len(&self) -> usize {
        (self.width * self.height) as usize
    }

    fn chroma_len(&self) -> usize {
        let (cw, ch) = chroma_dimensions(self.width, self.height);
        (cw * ch * 2) as usize
    }
}

/// Compiled compute pipeline for one transform mode
pub struct WgpuKernel {
    kernel: PlaneKernel,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// GPU-backed [`KernelRuntime`]
pub struct WgpuRuntime {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
}

impl WgpuRuntime {
    /// Whether any adapter can be acquired on this machine
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
            instance
                .request_adapter(&wgpu::RequestAdapterOptions::default())
                .await
                .is_some()
        })
    }

    pub fn new() -> SuperviewResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> SuperviewResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SuperviewError::SetupFailure("No GPU adapter found".to_string()))?;

        let info = adapter.get_info();
        tracing::info!("Using GPU adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("superview"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| SuperviewError::SetupFailure(format!("Failed to open GPU device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: info.name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn storage_usage() -> wgpu::BufferUsages {
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
    }

    /// Run `f` inside an error scope and turn a captured error into `on_error`
    fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        f: impl FnOnce() -> T,
        on_error: impl FnOnce(String) -> SuperviewError,
    ) -> SuperviewResult<T> {
        self.device.push_error_scope(filter);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(on_error(e.to_string())),
            None => Ok(value),
        }
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer, len: usize) -> SuperviewResult<Vec<u16>> {
        let size = (len * std::mem::size_of::<u32>()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("superview_staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| SuperviewError::KernelDispatchFailure(format!("Readback lost: {}", e)))?
            .map_err(|e| SuperviewError::KernelDispatchFailure(format!("Readback failed: {}", e)))?;

        let samples = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, u32>(&data)
                .iter()
                .map(|&v| v as u16)
                .collect()
        };
        staging.unmap();
        Ok(samples)
    }
}

fn widen(samples: &[u16]) -> Vec<u32> {
    samples.iter().map(|&v| v as u32).collect()
}

impl KernelRuntime for WgpuRuntime {
    type Planes = WgpuPlanes;
    type Pipeline = WgpuKernel;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn compile(&self, kernel: PlaneKernel) -> SuperviewResult<Self::Pipeline> {
        let label = kernel.label();
        let source = kernel.source();

        let pipeline = self.scoped(
            wgpu::ErrorFilter::Validation,
            || {
                let module = self
                    .device
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(&label),
                        source: wgpu::ShaderSource::Wgsl(source.into()),
                    });
                self.device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(&label),
                        layout: None,
                        module: &module,
                        entry_point: "main",
                    })
            },
            |e| SuperviewError::SetupFailure(format!("Failed to compile {}: {}", label, e)),
        )?;

        let layout = pipeline.get_bind_group_layout(0);
        tracing::debug!("Compiled GPU kernel {}", label);

        Ok(WgpuKernel {
            kernel,
            pipeline,
            layout,
        })
    }

    fn upload(&self, frame: PlaneFrame) -> SuperviewResult<Self::Planes> {
        frame.validate()?;
        let luma = widen(&frame.luma);
        let chroma = widen(&frame.chroma);

        self.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            || {
                let luma = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("superview_luma"),
                        contents: bytemuck::cast_slice(&luma),
                        usage: Self::storage_usage(),
                    });
                let chroma = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("superview_chroma"),
                        contents: bytemuck::cast_slice(&chroma),
                        usage: Self::storage_usage(),
                    });
                WgpuPlanes {
                    luma,
                    chroma,
                    width: frame.width,
                    height: frame.height,
                    depth: frame.depth,
                }
            },
            |e| {
                SuperviewError::BufferAllocationFailure(format!(
                    "Failed to upload {}x{} frame: {}",
                    frame.width, frame.height, e
                ))
            },
        )
    }

    fn allocate(&self, width: u32, height: u32, depth: BitDepth) -> SuperviewResult<Self::Planes> {
        if width == 0 || height == 0 {
            return Err(SuperviewError::BufferAllocationFailure(format!(
                "Cannot allocate {}x{} planes",
                width, height
            )));
        }
        let (cw, ch) = chroma_dimensions(width, height);
        let word = std::mem::size_of::<u32>() as u64;
        let luma_size = width as u64 * height as u64 * word;
        let chroma_size = cw as u64 * ch as u64 * 2 * word;

        self.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            || {
                let create = |label, size| {
                    self.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(label),
                        size,
                        usage: Self::storage_usage(),
                        mapped_at_creation: false,
                    })
                };
                WgpuPlanes {
                    luma: create("superview_out_luma", luma_size),
                    chroma: create("superview_out_chroma", chroma_size),
                    width,
                    height,
                    depth,
                }
            },
            |e| {
                SuperviewError::BufferAllocationFailure(format!(
                    "Failed to allocate {}x{} planes: {}",
                    width, height, e
                ))
            },
        )
    }

    fn dispatch(
        &self,
        pipeline: &Self::Pipeline,
        params: &KernelParams,
        input: &Self::Planes,
        output: &mut Self::Planes,
        grid: GridSize,
    ) -> SuperviewResult<()> {
        if input.dimensions() != (params.src.width, params.src.height)
            || output.dimensions() != (params.dst.width, params.dst.height)
        {
            return Err(SuperviewError::KernelDispatchFailure(format!(
                "Planes {:?} -> {:?} do not match parameters {}x{} -> {}x{}",
                input.dimensions(),
                output.dimensions(),
                params.src.width,
                params.src.height,
                params.dst.width,
                params.dst.height
            )));
        }

        let uniform = ParamsUniform::from(params);
        let (groups_x, groups_y) = grid.workgroups();

        self.scoped(
            wgpu::ErrorFilter::Validation,
            || {
                let params_buffer =
                    self.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("superview_params"),
                            contents: bytemuck::bytes_of(&uniform),
                            usage: wgpu::BufferUsages::UNIFORM,
                        });

                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("superview_bind_group"),
                    layout: &pipeline.layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: input.luma.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: input.chroma.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: output.luma.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: output.chroma.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: params_buffer.as_entire_binding(),
                        },
                    ],
                });

                let mut encoder = self
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: None,
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&pipeline.pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(groups_x, groups_y, 1);
                }
                self.queue.submit(Some(encoder.finish()));
                self.device.poll(wgpu::Maintain::Wait);
            },
            |e| {
                SuperviewError::KernelDispatchFailure(format!(
                    "{} dispatch failed: {}",
                    pipeline.kernel.label(),
                    e
                ))
            },
        )
    }

    fn download(&self, planes: Self::Planes) -> SuperviewResult<PlaneFrame> {
        let luma = self.read_buffer(&planes.luma, planes.luma_len())?;
        let chroma = self.read_buffer(&planes.chroma, planes.chroma_len())?;
        let frame = PlaneFrame {
            width: planes.width,
            height: planes.height,
            depth: planes.depth,
            luma,
            chroma,
        };
        frame.validate()?;
        Ok(frame)
    }
}
