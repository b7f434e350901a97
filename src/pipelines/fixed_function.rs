//! The render pipeline every draw of the wgpu backend goes through.
//!
//! Fixed-function state (texture enables, env modes, texture matrices,
//! current colour) is packed into one [`DrawUniform`] per draw and read by
//! `fixed_function.wgsl`. Pipelines differ only by blend state and are created
//! on first use.

use std::collections::HashMap;

use cgmath::Matrix4;

use crate::{
    api::{BlendFactor, EnvMode},
    data_structures::{material::LAYER_COUNT, vertex_buffer::Vertex},
    pipelines::texture::{COLOUR_FORMAT, DEPTH_FORMAT},
};

/// Dynamic uniform offsets have to be multiples of 256.
pub const UNIFORM_STRIDE: u64 = 512;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniform {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub tex_matrix: [[[f32; 4]; 4]; LAYER_COUNT],
    pub colour: [f32; 4],
    pub units: [[f32; 4]; LAYER_COUNT],
}

/// Per-unit state as the shader reads it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UnitUniform {
    pub kind: UnitKind,
    pub env: EnvMode,
    pub rgb_scale: f32,
    pub texgen: bool,
    pub matrix: Matrix4<f32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnitKind {
    Disabled,
    Flat,
    Cube,
}

impl DrawUniform {
    pub fn new(
        view: Matrix4<f32>,
        projection: Matrix4<f32>,
        model: Matrix4<f32>,
        colour: [f32; 4],
        units: &[UnitUniform; LAYER_COUNT],
    ) -> Self {
        let kind = |kind: UnitKind| match kind {
            UnitKind::Disabled => 0.0,
            UnitKind::Flat => 1.0,
            UnitKind::Cube => 2.0,
        };
        let env = |env: EnvMode| match env {
            EnvMode::Modulate => 0.0,
            EnvMode::Replace => 1.0,
            EnvMode::Decal => 2.0,
            EnvMode::Add => 3.0,
            EnvMode::Combine => 4.0,
        };
        Self {
            view_proj: (projection * view).into(),
            view: view.into(),
            model: model.into(),
            tex_matrix: std::array::from_fn(|i| units[i].matrix.into()),
            colour,
            units: std::array::from_fn(|i| {
                let unit = &units[i];
                [
                    kind(unit.kind),
                    env(unit.env),
                    unit.rgb_scale,
                    if unit.texgen { 1.0 } else { 0.0 },
                ]
            }),
        }
    }
}

pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Float32x4,
    ];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

/// Blend state a pipeline was built for; `None` draws opaque.
pub type BlendKey = Option<(BlendFactor, BlendFactor)>;

pub struct FixedFunctionPipeline {
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    shader: wgpu::ShaderModule,
    pipelines: HashMap<BlendKey, wgpu::RenderPipeline>,
}

impl FixedFunctionPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("draw_uniform_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<DrawUniform>() as u64
                    ),
                },
                count: None,
            }],
        });

        let texture_entry = |binding: u32, dimension: wgpu::TextureViewDimension| {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: dimension,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            }
        };
        let mut entries: Vec<_> = (0..LAYER_COUNT as u32)
            .map(|unit| texture_entry(unit, wgpu::TextureViewDimension::D2))
            .chain(
                (0..LAYER_COUNT as u32).map(|unit| {
                    texture_entry(LAYER_COUNT as u32 + unit, wgpu::TextureViewDimension::Cube)
                }),
            )
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 * LAYER_COUNT as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("unit_texture_layout"),
            entries: &entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Fixed Function Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Fixed Function Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("fixed_function.wgsl").into()),
        });

        Self {
            uniform_layout,
            texture_layout,
            layout,
            shader,
            pipelines: HashMap::new(),
        }
    }

    /// Builds the pipeline for `blend` unless it exists already.
    pub fn prepare(&mut self, device: &wgpu::Device, blend: BlendKey) {
        if self.pipelines.contains_key(&blend) {
            return;
        }
        let state = blend.map(|(src, dst)| {
            let component = wgpu::BlendComponent {
                src_factor: blend_factor(src),
                dst_factor: blend_factor(dst),
                operation: wgpu::BlendOperation::Add,
            };
            wgpu::BlendState {
                color: component,
                alpha: component,
            }
        });
        let pipeline = mk_render_pipeline(
            device,
            &self.layout,
            COLOUR_FORMAT,
            state,
            Some(DEPTH_FORMAT),
            &[vertex_layout()],
            &self.shader,
        );
        self.pipelines.insert(blend, pipeline);
    }

    pub fn get(&self, blend: BlendKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&blend)
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
    }
}

pub fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    depth_format: Option<wgpu::TextureFormat>,
    vertex_layouts: &[wgpu::VertexBufferLayout],
    shader: &wgpu::ShaderModule,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some("Fixed Function Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: vertex_layouts,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            // post-effect quads and sky domes are seen from either side
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: blend.is_none(),
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_uniform_fits_its_stride() {
        assert_eq!(std::mem::size_of::<DrawUniform>(), 448);
        assert!(std::mem::size_of::<DrawUniform>() as u64 <= UNIFORM_STRIDE);
        assert_eq!(UNIFORM_STRIDE % 256, 0);
    }
}
