use crate::camera::Camera;
use crate::property::VolumeProperty;
use crate::raycaster::RaySample;
use crate::volume::Volume;

use half::f16;
use std::borrow::Cow;
use thiserror::Error;
use tracing::debug;
use wgpu::{PollType, util::DeviceExt};

/// Entries of the baked scalar-to-RGBA table.
const SCALAR_LUT_LEN: usize = 4096;
/// Entries of the baked gradient-magnitude opacity table.
const GRADIENT_LUT_LEN: usize = 1024;
const WORKGROUP_SIZE: u32 = 8;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("No GPU adapter available: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),

    #[error("Failed to open GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("Volume of {0:?} voxels exceeds the 3D texture limit of {1}")]
    VolumeTooLarge((u32, u32, u32), u32),

    #[error("GPU poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("Failed to map result buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("Result buffer mapping was cancelled")]
    Cancelled,
}

/// Device and queue shared by GPU renderers.
#[derive(Clone)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Open the default adapter.
    pub async fn request() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await?;
        debug!(adapter = ?adapter.get_info().name, "using GPU adapter");
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Raycast Device"),
                ..Default::default()
            })
            .await?;
        Ok(Self { device, queue })
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    eye: [f32; 4],
    forward: [f32; 4],
    right: [f32; 4],
    up: [f32; 4],
    bounds_max: [f32; 4],
    spacing: [f32; 4],
    lighting: [f32; 4],
    sampling: [f32; 4],
    domain: [f32; 4],
    output: [u32; 4],
}

/// Volume compositing in a compute shader.
///
/// The volume is uploaded once as a half-float 3D texture; transfer
/// functions are baked into lookup tables on every render.
pub struct GpuRaycaster {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    volume_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    dimensions: (u32, u32, u32), // (depth, height, width)
    volume: VolumeInfo,
}

struct VolumeInfo {
    spacing: [f32; 3],
    bounds_max: [f32; 3],
    scalar_range: (f32, f32),
}

impl GpuRaycaster {
    pub fn new(volume: &Volume, gpu: &GpuContext) -> Result<Self, GpuError> {
        let (depth, height, width) = volume.dim();
        let (depth, height, width) = (depth as u32, height as u32, width as u32);
        let GpuContext { device, queue } = gpu.clone();

        let limit = device.limits().max_texture_dimension_3d;
        if depth > limit || height > limit || width > limit {
            return Err(GpuError::VolumeTooLarge((depth, height, width), limit));
        }

        let texture_size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: depth,
        };

        let volume_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Volume 3D Texture"),
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: wgpu::TextureFormat::R16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let texels: Vec<f16> = volume.data().iter().map(|&v| f16::from_f32(v)).collect();
        queue.write_texture(
            wgpu::TexelCopyTextureInfoBase {
                texture: &volume_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * std::mem::size_of::<f16>() as u32),
                rows_per_image: Some(height),
            },
            texture_size,
        );

        let volume_view = volume_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volume Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Volume Raycast Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("shaders/raycast.wgsl"))),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Volume Raycast Bind Group Layout"),
            entries: &[
                // 3D texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Output pixels
                storage(2, false),
                // Uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Scalar lookup table
                storage(4, true),
                // Gradient opacity lookup table
                storage(5, true),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Volume Raycast Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Volume Raycast Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let spacing = volume.spacing();
        let bounds = volume.bounds();
        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            volume_view,
            sampler,
            dimensions: (depth, height, width),
            volume: VolumeInfo {
                spacing: [spacing.x, spacing.y, spacing.z],
                bounds_max: [bounds.max.x, bounds.max.y, bounds.max.z],
                scalar_range: volume.scalar_range(),
            },
        })
    }

    pub fn dimensions(&self) -> (u32, u32, u32) {
        self.dimensions
    }

    /// Premultiplied samples in row-major order, row 0 at the top.
    pub async fn render(
        &self,
        property: &VolumeProperty,
        camera: &Camera,
        width: u32,
        height: u32,
        sample_distance: f32,
    ) -> Result<Vec<RaySample>, GpuError> {
        let (right, up, forward) = camera.basis();
        let eye = camera.position();
        let (scalar_min, scalar_max) = self.volume.scalar_range;

        let scalar_lut: Vec<[f32; 4]> = {
            let colors = property.color.to_lut(scalar_min, scalar_max, SCALAR_LUT_LEN);
            let opacities = property
                .scalar_opacity
                .to_lut(scalar_min, scalar_max, SCALAR_LUT_LEN);
            colors
                .into_iter()
                .zip(opacities)
                .map(|(c, a)| [c.r, c.g, c.b, a])
                .collect()
        };
        let (gradient_lut, gradient_max) = match &property.gradient_opacity {
            Some(function) => {
                let max = function.range().map_or(1.0, |(_, hi)| hi.max(1e-3));
                (function.to_lut(0.0, max, GRADIENT_LUT_LEN), max)
            }
            // storage bindings must not be empty
            None => (vec![1.0], 1.0),
        };
        let gradient_len = if property.gradient_opacity.is_some() {
            GRADIENT_LUT_LEN as u32
        } else {
            0
        };

        let step = sample_distance.max(1e-3);
        let uniforms = Uniforms {
            eye: [eye.x, eye.y, eye.z, 1.0],
            forward: [forward.x, forward.y, forward.z, 0.0],
            right: [right.x, right.y, right.z, 0.0],
            up: [up.x, up.y, up.z, 0.0],
            bounds_max: [
                self.volume.bounds_max[0],
                self.volume.bounds_max[1],
                self.volume.bounds_max[2],
                0.0,
            ],
            spacing: [
                self.volume.spacing[0],
                self.volume.spacing[1],
                self.volume.spacing[2],
                0.0,
            ],
            lighting: [
                property.ambient,
                property.diffuse,
                property.specular,
                property.specular_power,
            ],
            sampling: [
                step,
                step / property.scalar_opacity_unit_distance.max(1e-6),
                camera.tan_half_angle(),
                width as f32 / height.max(1) as f32,
            ],
            domain: [
                scalar_min,
                scalar_max,
                gradient_max,
                if property.shade { 1.0 } else { 0.0 },
            ],
            output: [width, height, SCALAR_LUT_LEN as u32, gradient_len],
        };

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Uniform Buffer"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let scalar_lut_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Scalar LUT Buffer"),
                contents: bytemuck::cast_slice(&scalar_lut),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let gradient_lut_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Gradient LUT Buffer"),
                contents: bytemuck::cast_slice(&gradient_lut),
                usage: wgpu::BufferUsages::STORAGE,
            });

        let output_size = width as usize * height as usize;
        let output_bytes = (output_size * std::mem::size_of::<u32>()) as u64;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: output_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: output_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Volume Raycast Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.volume_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: scalar_lut_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: gradient_lut_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Volume Raycast Encoder"),
            });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Volume Raycast Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(
                width.div_ceil(WORKGROUP_SIZE),
                height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_bytes);
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        receiver.await.map_err(|_| GpuError::Cancelled)??;

        let data = buffer_slice.get_mapped_range();
        let packed: &[u32] = bytemuck::cast_slice(&data);
        let samples = packed.iter().map(|&p| Self::unpack(p)).collect();

        drop(data);
        staging_buffer.unmap();
        Ok(samples)
    }

    /// Inverse of WGSL `pack4x8unorm`: red in the lowest byte.
    fn unpack(packed: u32) -> RaySample {
        let [r, g, b, a] = packed.to_le_bytes().map(|v| v as f32 / 255.0);
        RaySample {
            color: [r, g, b],
            alpha: a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Color;
    use crate::raycaster::VolumeRaycaster;
    use crate::transfer_function::{PiecewiseFunction, uniform_color};
    use nalgebra::Vector3;
    use ndarray::Array3;

    #[test]
    fn unpack_reads_red_from_the_low_byte() {
        let sample = GpuRaycaster::unpack(u32::from_le_bytes([255, 0, 51, 255]));
        assert_eq!(sample.color, [1.0, 0.0, 0.2]);
        assert_eq!(sample.alpha, 1.0);
    }

    #[test]
    fn uniforms_match_the_shader_layout() {
        // ten 16-byte rows, no implicit padding
        assert_eq!(std::mem::size_of::<Uniforms>(), 160);
    }

    #[tokio::test]
    async fn matches_the_cpu_compositor_on_a_cube() {
        let Ok(gpu) = GpuContext::request().await else {
            // no adapter on this machine
            return;
        };
        // a small ramp keeps the scalar range non-degenerate for the lookup tables
        let data = Array3::from_shape_fn((10, 10, 10), |(_, _, x)| 100.0 + x as f32);
        let volume = Volume::new(data, Vector3::repeat(1.0));
        let mut scalar_opacity = PiecewiseFunction::new();
        scalar_opacity.add_point(0.0, 0.05);
        let property = VolumeProperty {
            scalar_opacity,
            color: uniform_color(Color::WHITE),
            ..VolumeProperty::default()
        };
        let mut camera = Camera::default();
        camera.reset(&volume.bounds());
        let (width, height) = (16, 16);

        let samples = GpuRaycaster::new(&volume, &gpu)
            .unwrap()
            .render(&property, &camera, width, height, 0.5)
            .await
            .unwrap();
        assert_eq!(samples.len(), (width * height) as usize);

        let cpu = VolumeRaycaster::new(&volume, &property, 0.5);
        let light = -camera.direction_of_projection();
        for (x, y) in [(width / 2, height / 2), (0, 0)] {
            let (origin, dir) = camera.ray(x, y, width, height);
            let expected = cpu.cast(&origin, &dir, &light);
            let actual = samples[(y * width + x) as usize];
            assert!(
                (expected.alpha - actual.alpha).abs() < 0.05,
                "pixel ({x}, {y}): cpu {} gpu {}",
                expected.alpha,
                actual.alpha
            );
        }
    }
}
