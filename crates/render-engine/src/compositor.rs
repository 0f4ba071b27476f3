//! wgpu compositor: draws the decoded frame, then alpha-blends the
//! overlay on top, into the encoder's input surface.
//!
//! Both layers are a single full-target quad drawn with the same shader;
//! only the texture, the texture transform and the blend state differ.
//! Rotation metadata is applied here through the video quad's texture
//! transform, so the decoder never rotates pixels.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::{OutputGeometry, OverlayImage, Rotation};

use crate::gpu::{EncoderSurface, GpuContext, VideoSurface, SURFACE_FORMAT};
use crate::stage::{Compositor, GpuFrame};

const COMPOSITE_SHADER: &str = include_str!("shaders/composite.wgsl");

/// Affine map from quad coordinates `(s, t)` to texture coordinates:
/// `u = u[0]·s + u[1]·t + u[2]`, `v = v[0]·s + v[1]·t + v[2]`.
///
/// Quad coordinates have their origin at the bottom-left of the target;
/// texture coordinates at the top-left of the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexTransform {
    pub u: [f32; 3],
    pub v: [f32; 3],
}

impl TexTransform {
    /// Upright image, no rotation.
    pub const IDENTITY: Self = Self {
        u: [1.0, 0.0, 0.0],
        v: [0.0, -1.0, 1.0],
    };

    /// Texture transform that displays a frame stored with `rotation`
    /// metadata upright.
    pub fn for_rotation(rotation: Rotation) -> Self {
        match rotation {
            Rotation::None => Self::IDENTITY,
            Rotation::Cw90 => Self {
                u: [0.0, -1.0, 1.0],
                v: [-1.0, 0.0, 1.0],
            },
            Rotation::Cw180 => Self {
                u: [-1.0, 0.0, 1.0],
                v: [0.0, 1.0, 0.0],
            },
            Rotation::Cw270 => Self {
                u: [0.0, 1.0, 0.0],
                v: [1.0, 0.0, 0.0],
            },
        }
    }

    /// The overlay is already in display orientation and cover-cropped to
    /// the output size.
    pub fn overlay() -> Self {
        Self::IDENTITY
    }

    pub fn apply(&self, s: f32, t: f32) -> (f32, f32) {
        (
            self.u[0] * s + self.u[1] * t + self.u[2],
            self.v[0] * s + self.v[1] * t + self.v[2],
        )
    }

    /// Column-major 4x4 matrix for the shader uniform.
    pub fn to_mat4(&self) -> [[f32; 4]; 4] {
        [
            [self.u[0], self.v[0], 0.0, 0.0],
            [self.u[1], self.v[1], 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [self.u[2], self.v[2], 0.0, 1.0],
        ]
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Uniforms {
    tex_transform: [[f32; 4]; 4],
}

/// One textured layer: its bind group keeps texture, sampler and uniform
/// buffer alive.
struct Layer {
    bind_group: wgpu::BindGroup,
    _uniforms: wgpu::Buffer,
}

pub struct GpuCompositor {
    context: Arc<GpuContext>,
    target: Arc<EncoderSurface>,
    geometry: OutputGeometry,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    video_pipeline: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,
    video: Layer,
    overlay: Option<(Layer, wgpu::Texture)>,
}

impl GpuCompositor {
    /// Build both pipelines and bind the video surface. Any validation
    /// error raised while doing so fails with `CompositorInitFailed`.
    pub fn new(
        context: Arc<GpuContext>,
        video: &VideoSurface,
        target: Arc<EncoderSurface>,
        rotation: Rotation,
    ) -> VeneerResult<Self> {
        let device = context.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("veneer-composite-shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITE_SHADER.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("veneer-layer-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("veneer-composite-pipeline-layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let video_pipeline = create_pipeline(device, &pipeline_layout, &shader, None, "video");
        let overlay_pipeline = create_pipeline(
            device,
            &pipeline_layout,
            &shader,
            Some(wgpu::BlendState::ALPHA_BLENDING),
            "overlay",
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("veneer-layer-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let video_layer = create_layer(
            device,
            &layout,
            &sampler,
            video.view(),
            TexTransform::for_rotation(rotation),
            "video",
        );

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(VeneerError::compositor_init(format!(
                "failed to build composite pipelines: {error}"
            )));
        }

        let geometry = target.geometry();
        tracing::debug!(
            output = %geometry,
            video_width = video.width(),
            video_height = video.height(),
            rotation = rotation.degrees(),
            "Compositor ready"
        );

        Ok(Self {
            context,
            target,
            geometry,
            layout,
            sampler,
            video_pipeline,
            overlay_pipeline,
            video: video_layer,
            overlay: None,
        })
    }
}

impl Compositor for GpuCompositor {
    fn upload_overlay(&mut self, overlay: &OverlayImage) -> VeneerResult<()> {
        if self.overlay.is_some() {
            tracing::debug!("Overlay already uploaded; ignoring");
            return Ok(());
        }

        let fitted = overlay.cover_to(self.geometry)?;
        let device = self.context.device();
        let size = wgpu::Extent3d {
            width: fitted.width(),
            height: fitted.height(),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("veneer-overlay"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.context.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            fitted.pixels(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * fitted.width()),
                rows_per_image: Some(fitted.height()),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let layer = create_layer(
            device,
            &self.layout,
            &self.sampler,
            &view,
            TexTransform::overlay(),
            "overlay",
        );
        tracing::info!(
            source_width = overlay.width(),
            source_height = overlay.height(),
            output = %self.geometry,
            "Overlay uploaded"
        );
        self.overlay = Some((layer, texture));
        Ok(())
    }

    fn composite(&mut self, frame: GpuFrame) -> VeneerResult<()> {
        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("veneer-composite"),
                });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("veneer-composite-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.target.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.video_pipeline);
            pass.set_bind_group(0, &self.video.bind_group, &[]);
            pass.draw(0..4, 0..1);

            if let Some((overlay, _)) = &self.overlay {
                pass.set_pipeline(&self.overlay_pipeline);
                pass.set_bind_group(0, &overlay.bind_group, &[]);
                pass.draw(0..4, 0..1);
            }
        }

        tracing::trace!(
            pts_us = frame.pts_micros(),
            sequence = frame.sequence(),
            "Composited frame"
        );
        self.target.present(encoder, frame.pts_micros())
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    blend: Option<wgpu::BlendState>,
    name: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("veneer-{name}-pipeline")),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: SURFACE_FORMAT,
                blend,
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
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn create_layer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    view: &wgpu::TextureView,
    transform: TexTransform,
    name: &str,
) -> Layer {
    use wgpu::util::DeviceExt;

    let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("veneer-{name}-uniforms")),
        contents: bytemuck::bytes_of(&Uniforms {
            tex_transform: transform.to_mat4(),
        }),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("veneer-{name}-bind-group")),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: uniforms.as_entire_binding(),
            },
        ],
    });
    Layer {
        bind_group,
        _uniforms: uniforms,
    }
}
