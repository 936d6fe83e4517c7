//! # wgpu Backend
//!
//! Headless GPU context for the filter engine. Each program is a render
//! pipeline made from the shared vertex module and one fragment module,
//! with its own uniform buffer so uniform values persist between passes.

use image::RgbaImage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use wgpu::util::DeviceExt;

use super::{RenderBackend, Uniform, UniformBlock};
use crate::config::EngineConfig;
use crate::error::{FilterError, FilterResult};
use crate::geometry::QuadGeometry;
use crate::shaders::{ProgramSource, FRAGMENT_ENTRY_POINT, VERTEX_ENTRY_POINT};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const POSITION_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        offset: 0,
        shader_location: 0,
        format: wgpu::VertexFormat::Float32x2,
    }],
};

const TEX_COORD_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        offset: 0,
        shader_location: 1,
        format: wgpu::VertexFormat::Float32x2,
    }],
};

// ============================================================================
// Handles
// ============================================================================

struct ProgramState {
    label: String,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniforms: Mutex<UniformBlock>,
}

/// Compiled GPU program; clones share the pipeline and its uniforms
#[derive(Clone)]
pub struct WgpuProgram {
    inner: Arc<ProgramState>,
}

impl WgpuProgram {
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn uniforms(&self) -> UniformBlock {
        *self.inner.uniforms.lock()
    }
}

impl PartialEq for WgpuProgram {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WgpuProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuProgram")
            .field("label", &self.inner.label)
            .finish()
    }
}

pub struct WgpuGeometry {
    positions: wgpu::Buffer,
    tex_coords: wgpu::Buffer,
    vertex_count: u32,
}

pub struct WgpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

// ============================================================================
// Backend
// ============================================================================

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    target: Option<RenderTarget>,
    bound: Option<WgpuProgram>,
}

impl WgpuBackend {
    /// Create a headless device. Fails with `ContextUnavailable` when no
    /// adapter or device can be obtained.
    pub fn new(config: &EngineConfig) -> FilterResult<Self> {
        pollster::block_on(Self::new_async(config))
    }

    pub async fn new_async(config: &EngineConfig) -> FilterResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
            .ok_or_else(|| FilterError::ContextUnavailable("no suitable GPU adapter".into()))?;

        let info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    label: Some(&config.device_label),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| FilterError::ContextUnavailable(format!("device request failed: {}", e)))?;

        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            "GPU device created for filter engine"
        );

        Ok(Self::from_device(Arc::new(device), Arc::new(queue), info.name, config))
    }

    /// Build on a device the host already owns
    pub fn from_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        adapter_name: impl Into<String>,
        config: &EngineConfig,
    ) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("filter_bind_group_layout"),
            entries: &[
                // Uniform block, read by both stages
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<UniformBlock>() as u64,
                        ),
                    },
                    count: None,
                },
                // tex0
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("filter_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("filter_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: config.sampling.mag_filter.into(),
            min_filter: config.sampling.min_filter.into(),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            device,
            queue,
            adapter_name: adapter_name.into(),
            bind_group_layout,
            pipeline_layout,
            sampler,
            target: None,
            bound: None,
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Caller-owned program from a fragment body written against the prelude
    pub fn filter_program(&mut self, label: &str, fragment_body: &str) -> FilterResult<WgpuProgram> {
        let source = ProgramSource::with_prelude(label.to_string(), fragment_body);
        self.compile_program(&source)
    }

    /// Caller-owned program from a complete fragment module
    pub fn program_from_wgsl(&mut self, label: &str, fragment: &str) -> FilterResult<WgpuProgram> {
        let source = ProgramSource::standalone(label.to_string(), fragment.to_string());
        self.compile_program(&source)
    }

    fn build_pipeline(&self, source: &ProgramSource) -> wgpu::RenderPipeline {
        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}_vertex", source.label)),
            source: wgpu::ShaderSource::Wgsl(source.vertex.clone()),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}_fragment", source.label)),
            source: wgpu::ShaderSource::Wgsl(source.fragment.clone()),
        });

        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&source.label),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some(VERTEX_ENTRY_POINT),
                buffers: &[POSITION_LAYOUT, TEX_COORD_LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some(FRAGMENT_ENTRY_POINT),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        })
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

impl RenderBackend for WgpuBackend {
    type Program = WgpuProgram;
    type Geometry = WgpuGeometry;
    type Texture = WgpuTexture;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn compile_program(&mut self, source: &ProgramSource) -> FilterResult<WgpuProgram> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.build_pipeline(source);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(FilterError::compilation(&*source.label, err));
        }

        let uniforms = UniformBlock::default();
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{}_uniforms", source.label)),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        tracing::info!(label = %source.label, "Compiled GPU program");
        Ok(WgpuProgram {
            inner: Arc::new(ProgramState {
                label: source.label.to_string(),
                pipeline,
                uniform_buffer,
                uniforms: Mutex::new(uniforms),
            }),
        })
    }

    fn upload_geometry(&mut self, quad: &QuadGeometry) -> WgpuGeometry {
        let positions = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_positions"),
            contents: bytemuck::cast_slice(&quad.positions),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let tex_coords = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_tex_coords"),
            contents: bytemuck::cast_slice(&quad.tex_coords),
            usage: wgpu::BufferUsages::VERTEX,
        });

        WgpuGeometry {
            positions,
            tex_coords,
            vertex_count: quad.vertex_count(),
        }
    }

    fn create_texture(&mut self, pixels: &RgbaImage) -> WgpuTexture {
        let (width, height) = pixels.dimensions();
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if width > 0 && height > 0 {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                pixels.as_raw(),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                size,
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        WgpuTexture {
            _texture: texture,
            view,
        }
    }

    fn ensure_target(&mut self, width: u32, height: u32) -> bool {
        if let Some(target) = &self.target {
            if target.width == width && target.height == height {
                return false;
            }
        }

        tracing::debug!(width, height, "Allocating offscreen filter target");
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("filter_target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.target = Some(RenderTarget {
            texture,
            view,
            width,
            height,
        });
        true
    }

    fn bind_program(&mut self, program: &WgpuProgram) {
        if let Some(active) = &self.bound {
            tracing::warn!(active = active.label(), "Binding over an active program");
        }
        self.bound = Some(program.clone());
    }

    fn set_uniform(&mut self, uniform: Uniform) {
        match &self.bound {
            Some(program) => program.inner.uniforms.lock().apply(uniform),
            None => tracing::warn!(?uniform, "Uniform set with no program bound"),
        }
    }

    fn draw_quad(&mut self, geometry: &WgpuGeometry, texture: &WgpuTexture) -> FilterResult<()> {
        let program = self.bound.as_ref().ok_or(FilterError::ShaderUnresolved)?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| FilterError::readback("offscreen target is not allocated"))?;

        let uniforms = program.uniforms();
        self.queue
            .write_buffer(&program.inner.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: program.inner.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("filter_encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("filter_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&program.inner.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_vertex_buffer(0, geometry.positions.slice(..));
            render_pass.set_vertex_buffer(1, geometry.tex_coords.slice(..));
            render_pass.draw(0..geometry.vertex_count, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn unbind_program(&mut self) {
        self.bound = None;
    }

    fn read_target(&mut self) -> FilterResult<RgbaImage> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| FilterError::readback("offscreen target is not allocated"))?;
        let (width, height) = (target.width, target.height);
        if width == 0 || height == 0 {
            return Err(FilterError::readback("offscreen target has no pixels"));
        }

        let padded_row = padded_bytes_per_row(width);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter_staging_buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("filter_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(FilterError::readback(e)),
            Err(e) => return Err(FilterError::readback(e)),
        }

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded_row as usize) {
                pixels.extend_from_slice(&row[..(width * 4) as usize]);
            }
        }
        staging.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| FilterError::readback("readback size mismatch"))
    }
}
