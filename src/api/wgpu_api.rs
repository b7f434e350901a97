//! wgpu implementation of [`GraphicsApi`].
//!
//! The fixed-function calls only update a CPU copy of the state. Each draw
//! snapshots that state into a [`DrawUniform`] and is queued; queued draws are
//! replayed in one render pass when the frame ends or a frame capture needs
//! what has been drawn so far. Rendering goes to an offscreen colour target
//! the host presents or reads back through [`WgpuApi::target_texture`].
//!
//! Shader programs are not supported; materials draw through the combiner
//! emulation only.

use std::{collections::HashMap, iter};

use anyhow::{Context as _, bail};
use cgmath::{Matrix4, SquareMatrix};
use image::{Rgba, RgbaImage};
use wgpu::util::DeviceExt;

use crate::{
    api::{
        BlendFactor, Capabilities, EnvMode, GpuBuffer, GpuProgram, GpuTexture, GraphicsApi,
        ShaderSource, TexGen, TextureImage, TextureTarget, UniformValue,
    },
    data_structures::{material::LAYER_COUNT, vertex_buffer::Vertex},
    pipelines::{
        fixed_function::{
            BlendKey, DrawUniform, FixedFunctionPipeline, UNIFORM_STRIDE, UnitKind, UnitUniform,
        },
        texture::{GpuImage, create_default_sampler, extent},
    },
};

/// Flat textures of every unit, then cube textures of every unit.
type TextureKey = [Option<GpuTexture>; 2 * LAYER_COUNT];

struct MeshBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

#[derive(Clone, Debug)]
struct UnitState {
    flat: bool,
    cube: bool,
    flat_texture: Option<GpuTexture>,
    cube_texture: Option<GpuTexture>,
    env: EnvMode,
    rgb_scale: f32,
    texgen: bool,
    matrices: Vec<Matrix4<f32>>,
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            flat: false,
            cube: false,
            flat_texture: None,
            cube_texture: None,
            env: EnvMode::Modulate,
            rgb_scale: 1.0,
            texgen: false,
            matrices: Vec::new(),
        }
    }
}

impl UnitState {
    fn uniform(&self) -> UnitUniform {
        let kind = if self.cube {
            UnitKind::Cube
        } else if self.flat {
            UnitKind::Flat
        } else {
            UnitKind::Disabled
        };
        UnitUniform {
            kind,
            env: self.env,
            rgb_scale: self.rgb_scale,
            texgen: self.texgen,
            matrix: self
                .matrices
                .last()
                .copied()
                .unwrap_or_else(Matrix4::identity),
        }
    }
}

enum Geometry {
    Buffer(GpuBuffer),
    Triangles { buffer: wgpu::Buffer, count: u32 },
}

struct DrawRecord {
    geometry: Geometry,
    uniform: DrawUniform,
    textures: TextureKey,
    blend: BlendKey,
}

struct Frame {
    /// Taken by the first flush so later flushes keep what was drawn.
    clear: Option<wgpu::Color>,
    draws: Vec<DrawRecord>,
}

pub struct WgpuApi {
    device: wgpu::Device,
    queue: wgpu::Queue,
    size: [u32; 2],
    target: GpuImage,
    depth: GpuImage,
    pipeline: FixedFunctionPipeline,
    sampler: wgpu::Sampler,
    blank_flat: GpuImage,
    blank_cube: GpuImage,
    textures: HashMap<GpuTexture, GpuImage>,
    buffers: HashMap<GpuBuffer, MeshBuffers>,
    bind_groups: HashMap<TextureKey, wgpu::BindGroup>,
    units: [UnitState; LAYER_COUNT],
    blend_enabled: bool,
    blend_func: (BlendFactor, BlendFactor),
    colour: [f32; 4],
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
    frame: Option<Frame>,
    // queued draws may still reference these until the frame ends
    retired_textures: Vec<GpuTexture>,
    retired_buffers: Vec<GpuBuffer>,
    next_id: u32,
}

impl WgpuApi {
    /// Opens the default adapter and renders offscreen at `width` x `height`.
    pub fn new(width: u32, height: u32) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("requesting a graphics adapter")?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
        }))
        .context("requesting a graphics device")?;
        Ok(Self::from_device(device, queue, width, height))
    }

    /// Uses a device the host already owns, e.g. the one driving its window.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let size = [width.max(1), height.max(1)];
        let white = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let blank_flat =
            GpuImage::from_image(&device, &queue, &TextureImage::flat(white.clone()), "blank");
        let blank_cube = GpuImage::from_image(
            &device,
            &queue,
            &TextureImage::cube(std::array::from_fn(|_| white.clone())),
            "blank cube",
        );
        Self {
            target: GpuImage::create_render_target(&device, size, "colour target"),
            depth: GpuImage::create_depth_texture(&device, size, "depth_texture"),
            pipeline: FixedFunctionPipeline::new(&device),
            sampler: create_default_sampler(&device),
            blank_flat,
            blank_cube,
            device,
            queue,
            size,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            bind_groups: HashMap::new(),
            units: std::array::from_fn(|_| UnitState::default()),
            blend_enabled: false,
            blend_func: (BlendFactor::One, BlendFactor::Zero),
            colour: [1.0, 1.0, 1.0, 1.0],
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            frame: None,
            retired_textures: Vec::new(),
            retired_buffers: Vec::new(),
            next_id: 1,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The colour target frames are rendered into.
    pub fn target_texture(&self) -> &wgpu::Texture {
        &self.target.texture
    }

    pub fn target_view(&self) -> &wgpu::TextureView {
        &self.target.view
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, geometry: Geometry, transform: &Matrix4<f32>) {
        let units: [UnitUniform; LAYER_COUNT] = std::array::from_fn(|i| self.units[i].uniform());
        let textures: TextureKey = std::array::from_fn(|i| {
            let unit = &self.units[i % LAYER_COUNT];
            if i < LAYER_COUNT {
                unit.flat_texture.filter(|_| unit.flat && !unit.cube)
            } else {
                unit.cube_texture.filter(|_| unit.cube)
            }
        });
        let record = DrawRecord {
            geometry,
            uniform: DrawUniform::new(self.view, self.projection, *transform, self.colour, &units),
            textures,
            blend: self.blend_enabled.then_some(self.blend_func),
        };
        match self.frame.as_mut() {
            Some(frame) => frame.draws.push(record),
            None => log::warn!("draw outside of a frame is dropped"),
        }
    }

    fn prepare_textures(&mut self, key: TextureKey) {
        if self.bind_groups.contains_key(&key) {
            return;
        }
        let view = |texture: Option<GpuTexture>, target: TextureTarget| {
            let fallback = match target {
                TextureTarget::Flat => &self.blank_flat.view,
                TextureTarget::Cube => &self.blank_cube.view,
            };
            texture
                .and_then(|texture| self.textures.get(&texture))
                .filter(|image| image.target == target)
                .map_or(fallback, |image| &image.view)
        };
        let mut entries: Vec<wgpu::BindGroupEntry> = key
            .iter()
            .enumerate()
            .map(|(i, &texture)| {
                let target = if i < LAYER_COUNT {
                    TextureTarget::Flat
                } else {
                    TextureTarget::Cube
                };
                wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: wgpu::BindingResource::TextureView(view(texture, target)),
                }
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: key.len() as u32,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("unit_textures"),
            layout: &self.pipeline.texture_layout,
            entries: &entries,
        });
        self.bind_groups.insert(key, group);
    }

    /// Replays `draws` into the colour target.
    fn flush(&mut self, draws: Vec<DrawRecord>, clear: Option<wgpu::Color>) {
        if draws.is_empty() && clear.is_none() {
            return;
        }
        for draw in &draws {
            self.pipeline.prepare(&self.device, draw.blend);
            self.prepare_textures(draw.textures);
        }

        let stride = UNIFORM_STRIDE as usize;
        let mut uniform_bytes = vec![0u8; draws.len().max(1) * stride];
        for (i, draw) in draws.iter().enumerate() {
            let bytes = bytemuck::bytes_of(&draw.uniform);
            uniform_bytes[i * stride..i * stride + bytes.len()].copy_from_slice(bytes);
        }
        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("draw uniforms"),
                contents: &uniform_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw uniforms"),
            layout: &self.pipeline.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniforms,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniform>() as u64),
                }),
            }],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: match clear {
                            Some(_) => wgpu::LoadOp::Clear(1.0),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            for (i, draw) in draws.iter().enumerate() {
                let (Some(pipeline), Some(textures)) = (
                    self.pipeline.get(draw.blend),
                    self.bind_groups.get(&draw.textures),
                ) else {
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, &uniform_group, &[(i * stride) as u32]);
                render_pass.set_bind_group(1, textures, &[]);
                match &draw.geometry {
                    Geometry::Buffer(id) => {
                        let Some(mesh) = self.buffers.get(id) else {
                            log::warn!("queued draw references destroyed buffer {id:?}");
                            continue;
                        };
                        render_pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                        render_pass
                            .set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                    }
                    Geometry::Triangles { buffer, count } => {
                        render_pass.set_vertex_buffer(0, buffer.slice(..));
                        render_pass.draw(0..*count, 0..1);
                    }
                }
            }
        }
        self.queue.submit(iter::once(encoder.finish()));
    }

    fn take_pending(&mut self) -> Option<(Vec<DrawRecord>, Option<wgpu::Color>)> {
        let frame = self.frame.as_mut()?;
        Some((std::mem::take(&mut frame.draws), frame.clear.take()))
    }
}

impl GraphicsApi for WgpuApi {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            texture_units: LAYER_COUNT,
            cube_maps: true,
            shaders: false,
        }
    }

    fn create_texture(&mut self, label: &str, image: &TextureImage) -> anyhow::Result<GpuTexture> {
        let expected_faces = match image.target {
            TextureTarget::Flat => 1,
            TextureTarget::Cube => 6,
        };
        if image.faces.len() != expected_faces {
            bail!(
                "texture {label} has {} faces, expected {expected_faces}",
                image.faces.len()
            );
        }
        let (width, height) = image.dimensions();
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            bail!("texture {label} is {width}x{height}, the device allows {max}");
        }
        let gpu = GpuImage::from_image(&self.device, &self.queue, image, label);
        let texture = GpuTexture(self.next());
        self.textures.insert(texture, gpu);
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        self.bind_groups
            .retain(|key, _| !key.contains(&Some(texture)));
        if self.frame.is_some() {
            self.retired_textures.push(texture);
        } else {
            self.textures.remove(&texture);
        }
    }

    fn create_program(&mut self, source: &ShaderSource) -> anyhow::Result<GpuProgram> {
        bail!(
            "program {}: the wgpu backend draws without shader programs",
            source.name
        )
    }

    fn destroy_program(&mut self, _program: GpuProgram) {}

    fn create_buffer(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> anyhow::Result<GpuBuffer> {
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            bail!("buffer {label} indexes vertex {bad} of {}", vertices.len());
        }
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        let buffer = GpuBuffer(self.next());
        self.buffers.insert(
            buffer,
            MeshBuffers {
                vertices: vertex_buffer,
                indices: index_buffer,
                index_count: indices.len() as u32,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: GpuBuffer) {
        if self.frame.is_some() {
            self.retired_buffers.push(buffer);
        } else {
            self.buffers.remove(&buffer);
        }
    }

    fn enable_texture(&mut self, unit: usize, target: TextureTarget, enabled: bool) {
        match target {
            TextureTarget::Flat => self.units[unit].flat = enabled,
            TextureTarget::Cube => self.units[unit].cube = enabled,
        }
    }

    fn bind_texture(&mut self, unit: usize, target: TextureTarget, texture: Option<GpuTexture>) {
        match target {
            TextureTarget::Flat => self.units[unit].flat_texture = texture,
            TextureTarget::Cube => self.units[unit].cube_texture = texture,
        }
    }

    fn push_texture_matrix(&mut self, unit: usize, matrix: Matrix4<f32>) {
        self.units[unit].matrices.push(matrix);
    }

    fn pop_texture_matrix(&mut self, unit: usize) {
        if self.units[unit].matrices.pop().is_none() {
            log::error!("texture matrix stack underflow on unit {unit}");
        }
    }

    fn load_identity_texture_matrix(&mut self, unit: usize) {
        if let Some(top) = self.units[unit].matrices.last_mut() {
            *top = Matrix4::identity();
        }
    }

    fn set_texgen(&mut self, unit: usize, texgen: Option<TexGen>) {
        self.units[unit].texgen = matches!(texgen, Some(TexGen::ReflectionMap));
    }

    fn set_env_mode(&mut self, unit: usize, mode: EnvMode) {
        self.units[unit].env = mode;
    }

    fn set_rgb_scale(&mut self, unit: usize, scale: f32) {
        self.units[unit].rgb_scale = scale;
    }

    fn set_blend_func(&mut self, src: BlendFactor, dst: BlendFactor) {
        self.blend_func = (src, dst);
    }

    fn enable_blend(&mut self, enabled: bool) {
        self.blend_enabled = enabled;
    }

    fn set_colour(&mut self, colour: [f32; 4]) {
        self.colour = colour;
    }

    fn use_program(&mut self, program: Option<GpuProgram>) {
        if let Some(program) = program {
            log::debug!("ignoring program {program:?}");
        }
    }

    fn set_uniform(&mut self, _program: GpuProgram, _name: &str, _value: UniformValue) -> bool {
        false
    }

    fn set_camera(&mut self, view: Matrix4<f32>, projection: Matrix4<f32>) {
        self.view = view;
        self.projection = projection;
    }

    fn draw(&mut self, buffer: GpuBuffer, transform: &Matrix4<f32>) {
        if !self.buffers.contains_key(&buffer) {
            log::warn!("draw with unknown buffer {buffer:?}");
            return;
        }
        self.record(Geometry::Buffer(buffer), transform);
    }

    fn draw_triangles(&mut self, vertices: &[Vertex], transform: &Matrix4<f32>) {
        if vertices.is_empty() {
            return;
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("immediate triangles"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let count = vertices.len() as u32;
        self.record(Geometry::Triangles { buffer, count }, transform);
    }

    fn begin_frame(&mut self, clear_colour: [f32; 4]) {
        if self.frame.is_some() {
            log::warn!("begin_frame while a frame is still open, dropping its draws");
        }
        let [r, g, b, a] = clear_colour.map(f64::from);
        self.frame = Some(Frame {
            clear: Some(wgpu::Color { r, g, b, a }),
            draws: Vec::new(),
        });
    }

    fn end_frame(&mut self) -> anyhow::Result<()> {
        let Some((draws, clear)) = self.take_pending() else {
            bail!("end_frame without begin_frame");
        };
        self.flush(draws, clear);
        self.frame = None;
        for texture in self.retired_textures.drain(..) {
            self.textures.remove(&texture);
        }
        for buffer in self.retired_buffers.drain(..) {
            self.buffers.remove(&buffer);
        }
        Ok(())
    }

    fn capture_frame(&mut self) -> anyhow::Result<GpuTexture> {
        let Some((draws, clear)) = self.take_pending() else {
            bail!("capture_frame outside of a frame");
        };
        self.flush(draws, clear);
        let capture = GpuImage::create_capture(&self.device, self.size, "post render source");
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Capture Encoder"),
            });
        encoder.copy_texture_to_texture(
            self.target.texture.as_image_copy(),
            capture.texture.as_image_copy(),
            extent(self.size),
        );
        self.queue.submit(iter::once(encoder.finish()));
        let texture = GpuTexture(self.next());
        self.textures.insert(texture, capture);
        Ok(texture)
    }

    fn resize(&mut self, width: u32, height: u32) {
        let size = [width.max(1), height.max(1)];
        if size == self.size {
            return;
        }
        self.size = size;
        self.target = GpuImage::create_render_target(&self.device, size, "colour target");
        self.depth = GpuImage::create_depth_texture(&self.device, size, "depth_texture");
    }
}
