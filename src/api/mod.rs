//! The immediate-mode graphics contract the renderer drives.
//!
//! [`GraphicsApi`] is deliberately shaped like a fixed-function pipeline:
//! per-unit texture enables and bindings, a texture-matrix stack per unit,
//! blend state and a current colour, plus shader programs with named uniforms.
//! The render state tracker only ever talks to this trait, so it can run on
//! the wgpu backend (feature `gpu`) or on the headless [`recording::RecordingApi`].

use cgmath::Matrix4;
use image::RgbaImage;

use crate::data_structures::vertex_buffer::Vertex;

pub mod recording;
#[cfg(feature = "gpu")]
pub mod wgpu_api;

/// Opaque texture object owned by the api.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuTexture(pub u32);

/// Opaque shader program owned by the api.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuProgram(pub u32);

/// Opaque vertex/index buffer pair owned by the api.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuBuffer(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Flat,
    Cube,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// How a texture unit combines its texel with the colour coming from the
/// previous unit (or the vertex colour for unit 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvMode {
    Modulate,
    Replace,
    Decal,
    Add,
    /// Modulate, then multiply by the unit's RGB scale.
    Combine,
}

/// Texture-coordinate generation for the S, T and R coordinates of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexGen {
    ReflectionMap,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

/// Pixels handed to the api for upload: one image for flat textures, six
/// (+x, -x, +y, -y, +z, -z) for cube maps.
#[derive(Clone, Debug)]
pub struct TextureImage {
    pub target: TextureTarget,
    pub faces: Vec<RgbaImage>,
}

impl TextureImage {
    pub fn flat(image: RgbaImage) -> Self {
        Self {
            target: TextureTarget::Flat,
            faces: vec![image],
        }
    }

    pub fn cube(faces: [RgbaImage; 6]) -> Self {
        Self {
            target: TextureTarget::Cube,
            faces: faces.into(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.faces
            .first()
            .map(|face| face.dimensions())
            .unwrap_or((0, 0))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShaderSource {
    pub name: String,
    pub vertex: String,
    pub fragment: String,
}

/// What the api can do. Checked once when the renderer starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub texture_units: usize,
    pub cube_maps: bool,
    pub shaders: bool,
}

pub trait GraphicsApi {
    fn capabilities(&self) -> Capabilities;

    fn create_texture(&mut self, label: &str, image: &TextureImage) -> anyhow::Result<GpuTexture>;

    fn destroy_texture(&mut self, texture: GpuTexture);

    fn create_program(&mut self, source: &ShaderSource) -> anyhow::Result<GpuProgram>;

    fn destroy_program(&mut self, program: GpuProgram);

    fn create_buffer(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> anyhow::Result<GpuBuffer>;

    fn destroy_buffer(&mut self, buffer: GpuBuffer);

    fn enable_texture(&mut self, unit: usize, target: TextureTarget, enabled: bool);

    fn bind_texture(&mut self, unit: usize, target: TextureTarget, texture: Option<GpuTexture>);

    fn push_texture_matrix(&mut self, unit: usize, matrix: Matrix4<f32>);

    fn pop_texture_matrix(&mut self, unit: usize);

    /// Replaces the top of the unit's texture-matrix stack with identity.
    fn load_identity_texture_matrix(&mut self, unit: usize);

    fn set_texgen(&mut self, unit: usize, texgen: Option<TexGen>);

    fn set_env_mode(&mut self, unit: usize, mode: EnvMode);

    fn set_rgb_scale(&mut self, unit: usize, scale: f32);

    fn set_blend_func(&mut self, src: BlendFactor, dst: BlendFactor);

    fn enable_blend(&mut self, enabled: bool);

    fn set_colour(&mut self, colour: [f32; 4]);

    fn use_program(&mut self, program: Option<GpuProgram>);

    /// Returns false when `program` has no uniform called `name`.
    fn set_uniform(&mut self, program: GpuProgram, name: &str, value: UniformValue) -> bool;

    fn set_camera(&mut self, view: Matrix4<f32>, projection: Matrix4<f32>);

    fn draw(&mut self, buffer: GpuBuffer, transform: &Matrix4<f32>);

    fn draw_triangles(&mut self, vertices: &[Vertex], transform: &Matrix4<f32>);

    fn begin_frame(&mut self, clear_colour: [f32; 4]);

    fn end_frame(&mut self) -> anyhow::Result<()>;

    /// Copies what has been drawn so far this frame into a new texture, the
    /// source post-render layers sample from.
    fn capture_frame(&mut self) -> anyhow::Result<GpuTexture>;

    fn resize(&mut self, _width: u32, _height: u32) {}
}
