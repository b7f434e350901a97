//! Headless [`GraphicsApi`] that mirrors GPU state in plain structs.
//!
//! Every call is appended to a log and applied to a per-unit mirror, so the
//! state the renderer leaves behind can be inspected without a device. Uploads
//! can be made to fail by label to exercise the registry's fallback paths.

use std::collections::{HashMap, HashSet};

use anyhow::bail;
use cgmath::{Matrix4, SquareMatrix};

use crate::{
    api::{
        BlendFactor, Capabilities, EnvMode, GpuBuffer, GpuProgram, GpuTexture, GraphicsApi,
        ShaderSource, TexGen, TextureImage, TextureTarget, UniformValue,
    },
    data_structures::vertex_buffer::Vertex,
};

/// One recorded api call.
#[derive(Clone, Debug, PartialEq)]
pub enum ApiCall {
    CreateTexture { label: String, texture: GpuTexture },
    DestroyTexture(GpuTexture),
    CreateProgram { name: String, program: GpuProgram },
    DestroyProgram(GpuProgram),
    CreateBuffer { label: String, buffer: GpuBuffer },
    DestroyBuffer(GpuBuffer),
    EnableTexture { unit: usize, target: TextureTarget, enabled: bool },
    BindTexture { unit: usize, target: TextureTarget, texture: Option<GpuTexture> },
    PushTextureMatrix { unit: usize },
    PopTextureMatrix { unit: usize },
    LoadIdentityTextureMatrix { unit: usize },
    SetTexGen { unit: usize, texgen: Option<TexGen> },
    SetEnvMode { unit: usize, mode: EnvMode },
    SetRgbScale { unit: usize, scale: f32 },
    SetBlendFunc(BlendFactor, BlendFactor),
    EnableBlend(bool),
    SetColour([f32; 4]),
    UseProgram(Option<GpuProgram>),
    SetUniform { program: GpuProgram, name: String, value: UniformValue },
    SetCamera,
    Draw { buffer: GpuBuffer, textures: Vec<Option<GpuTexture>> },
    DrawTriangles { count: usize, textures: Vec<Option<GpuTexture>> },
    BeginFrame,
    EndFrame,
    CaptureFrame(GpuTexture),
}

/// Mirrored state of one texture unit.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitMirror {
    pub flat_enabled: bool,
    pub cube_enabled: bool,
    pub flat_texture: Option<GpuTexture>,
    pub cube_texture: Option<GpuTexture>,
    /// Pushed matrices, top last. The implicit base identity is not stored.
    pub matrix_stack: Vec<Matrix4<f32>>,
    pub texgen: Option<TexGen>,
    pub env_mode: EnvMode,
    pub rgb_scale: f32,
}

impl Default for UnitMirror {
    fn default() -> Self {
        Self {
            flat_enabled: false,
            cube_enabled: false,
            flat_texture: None,
            cube_texture: None,
            matrix_stack: Vec::new(),
            texgen: None,
            env_mode: EnvMode::Modulate,
            rgb_scale: 1.0,
        }
    }
}

impl UnitMirror {
    /// The texture a draw would sample on this unit, if any.
    pub fn sampled_texture(&self) -> Option<GpuTexture> {
        if self.cube_enabled {
            self.cube_texture
        } else if self.flat_enabled {
            self.flat_texture
        } else {
            None
        }
    }

    /// Nothing enabled and nothing pushed.
    pub fn is_disabled(&self) -> bool {
        !self.flat_enabled
            && !self.cube_enabled
            && self.matrix_stack.is_empty()
            && self.texgen.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct TextureRecord {
    pub label: String,
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
}

pub struct RecordingApi {
    capabilities: Capabilities,
    calls: Vec<ApiCall>,
    units: Vec<UnitMirror>,
    blend_enabled: bool,
    blend_func: (BlendFactor, BlendFactor),
    colour: [f32; 4],
    program: Option<GpuProgram>,
    textures: HashMap<GpuTexture, TextureRecord>,
    programs: HashMap<GpuProgram, HashSet<String>>,
    buffers: HashMap<GpuBuffer, usize>,
    uniforms: HashMap<(GpuProgram, String), UniformValue>,
    failing_labels: HashSet<String>,
    next_id: u32,
    texture_uploads: usize,
    draws: usize,
    frame_open: bool,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities {
            texture_units: 4,
            cube_maps: true,
            shaders: true,
        })
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            calls: Vec::new(),
            units: vec![UnitMirror::default(); capabilities.texture_units],
            blend_enabled: false,
            blend_func: (BlendFactor::One, BlendFactor::Zero),
            colour: [1.0, 1.0, 1.0, 1.0],
            program: None,
            textures: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            uniforms: HashMap::new(),
            failing_labels: HashSet::new(),
            next_id: 1,
            texture_uploads: 0,
            draws: 0,
            frame_open: false,
        }
    }

    /// Makes every later upload (texture, program or buffer) carrying `label` fail.
    pub fn fail_uploads_for(&mut self, label: &str) {
        self.failing_labels.insert(label.to_string());
    }

    pub fn stop_failing_uploads(&mut self) {
        self.failing_labels.clear();
    }

    pub fn calls(&self) -> &[ApiCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn unit(&self, unit: usize) -> &UnitMirror {
        &self.units[unit]
    }

    /// Pushed texture matrices summed over all units.
    pub fn texture_matrix_depth(&self) -> usize {
        self.units.iter().map(|unit| unit.matrix_stack.len()).sum()
    }

    pub fn blend_enabled(&self) -> bool {
        self.blend_enabled
    }

    pub fn blend_func(&self) -> (BlendFactor, BlendFactor) {
        self.blend_func
    }

    pub fn colour(&self) -> [f32; 4] {
        self.colour
    }

    pub fn program(&self) -> Option<GpuProgram> {
        self.program
    }

    pub fn uniform(&self, program: GpuProgram, name: &str) -> Option<UniformValue> {
        self.uniforms.get(&(program, name.to_string())).copied()
    }

    pub fn texture(&self, texture: GpuTexture) -> Option<&TextureRecord> {
        self.textures.get(&texture)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Successful texture uploads since creation.
    pub fn texture_uploads(&self) -> usize {
        self.texture_uploads
    }

    pub fn draw_count(&self) -> usize {
        self.draws
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn sampled_textures(&self) -> Vec<Option<GpuTexture>> {
        self.units.iter().map(UnitMirror::sampled_texture).collect()
    }

    fn unit_mut(&mut self, unit: usize) -> &mut UnitMirror {
        assert!(
            unit < self.units.len(),
            "texture unit {unit} out of range ({} units)",
            self.units.len()
        );
        &mut self.units[unit]
    }
}

impl Default for RecordingApi {
    fn default() -> Self {
        Self::new()
    }
}

/// Names declared with `uniform <type> <name>;` in GLSL-style sources.
fn declared_uniforms(source: &str) -> HashSet<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("uniform "))
        .filter_map(|line| line.trim_end_matches(';').split_whitespace().last())
        .map(|name| name.split('[').next().unwrap_or(name).to_string())
        .collect()
}

impl GraphicsApi for RecordingApi {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_texture(&mut self, label: &str, image: &TextureImage) -> anyhow::Result<GpuTexture> {
        if self.failing_labels.contains(label) {
            bail!("upload of texture {label} rejected");
        }
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
        let texture = GpuTexture(self.next());
        self.textures.insert(
            texture,
            TextureRecord {
                label: label.to_string(),
                target: image.target,
                width,
                height,
            },
        );
        self.texture_uploads += 1;
        self.calls.push(ApiCall::CreateTexture {
            label: label.to_string(),
            texture,
        });
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        self.textures.remove(&texture);
        self.calls.push(ApiCall::DestroyTexture(texture));
    }

    fn create_program(&mut self, source: &ShaderSource) -> anyhow::Result<GpuProgram> {
        if self.failing_labels.contains(&source.name) {
            bail!("program {} failed to link", source.name);
        }
        if source.vertex.trim().is_empty() || source.fragment.trim().is_empty() {
            bail!("program {} has an empty stage", source.name);
        }
        let mut uniforms = declared_uniforms(&source.vertex);
        uniforms.extend(declared_uniforms(&source.fragment));
        let program = GpuProgram(self.next());
        self.programs.insert(program, uniforms);
        self.calls.push(ApiCall::CreateProgram {
            name: source.name.clone(),
            program,
        });
        Ok(program)
    }

    fn destroy_program(&mut self, program: GpuProgram) {
        self.programs.remove(&program);
        self.uniforms.retain(|(owner, _), _| *owner != program);
        if self.program == Some(program) {
            self.program = None;
        }
        self.calls.push(ApiCall::DestroyProgram(program));
    }

    fn create_buffer(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> anyhow::Result<GpuBuffer> {
        if self.failing_labels.contains(label) {
            bail!("upload of buffer {label} rejected");
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            bail!("buffer {label} indexes vertex {bad} of {}", vertices.len());
        }
        let buffer = GpuBuffer(self.next());
        self.buffers.insert(buffer, indices.len());
        self.calls.push(ApiCall::CreateBuffer {
            label: label.to_string(),
            buffer,
        });
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: GpuBuffer) {
        self.buffers.remove(&buffer);
        self.calls.push(ApiCall::DestroyBuffer(buffer));
    }

    fn enable_texture(&mut self, unit: usize, target: TextureTarget, enabled: bool) {
        let mirror = self.unit_mut(unit);
        match target {
            TextureTarget::Flat => mirror.flat_enabled = enabled,
            TextureTarget::Cube => mirror.cube_enabled = enabled,
        }
        self.calls.push(ApiCall::EnableTexture {
            unit,
            target,
            enabled,
        });
    }

    fn bind_texture(&mut self, unit: usize, target: TextureTarget, texture: Option<GpuTexture>) {
        let mirror = self.unit_mut(unit);
        match target {
            TextureTarget::Flat => mirror.flat_texture = texture,
            TextureTarget::Cube => mirror.cube_texture = texture,
        }
        self.calls.push(ApiCall::BindTexture {
            unit,
            target,
            texture,
        });
    }

    fn push_texture_matrix(&mut self, unit: usize, matrix: Matrix4<f32>) {
        self.unit_mut(unit).matrix_stack.push(matrix);
        self.calls.push(ApiCall::PushTextureMatrix { unit });
    }

    fn pop_texture_matrix(&mut self, unit: usize) {
        let popped = self.unit_mut(unit).matrix_stack.pop();
        if popped.is_none() {
            log::error!("texture matrix stack underflow on unit {unit}");
        }
        self.calls.push(ApiCall::PopTextureMatrix { unit });
    }

    fn load_identity_texture_matrix(&mut self, unit: usize) {
        if let Some(top) = self.unit_mut(unit).matrix_stack.last_mut() {
            *top = Matrix4::identity();
        }
        self.calls.push(ApiCall::LoadIdentityTextureMatrix { unit });
    }

    fn set_texgen(&mut self, unit: usize, texgen: Option<TexGen>) {
        self.unit_mut(unit).texgen = texgen;
        self.calls.push(ApiCall::SetTexGen { unit, texgen });
    }

    fn set_env_mode(&mut self, unit: usize, mode: EnvMode) {
        self.unit_mut(unit).env_mode = mode;
        self.calls.push(ApiCall::SetEnvMode { unit, mode });
    }

    fn set_rgb_scale(&mut self, unit: usize, scale: f32) {
        self.unit_mut(unit).rgb_scale = scale;
        self.calls.push(ApiCall::SetRgbScale { unit, scale });
    }

    fn set_blend_func(&mut self, src: BlendFactor, dst: BlendFactor) {
        self.blend_func = (src, dst);
        self.calls.push(ApiCall::SetBlendFunc(src, dst));
    }

    fn enable_blend(&mut self, enabled: bool) {
        self.blend_enabled = enabled;
        self.calls.push(ApiCall::EnableBlend(enabled));
    }

    fn set_colour(&mut self, colour: [f32; 4]) {
        self.colour = colour;
        self.calls.push(ApiCall::SetColour(colour));
    }

    fn use_program(&mut self, program: Option<GpuProgram>) {
        self.program = program;
        self.calls.push(ApiCall::UseProgram(program));
    }

    fn set_uniform(&mut self, program: GpuProgram, name: &str, value: UniformValue) -> bool {
        let declared = self
            .programs
            .get(&program)
            .is_some_and(|uniforms| uniforms.contains(name));
        if !declared {
            return false;
        }
        self.uniforms.insert((program, name.to_string()), value);
        self.calls.push(ApiCall::SetUniform {
            program,
            name: name.to_string(),
            value,
        });
        true
    }

    fn set_camera(&mut self, _view: Matrix4<f32>, _projection: Matrix4<f32>) {
        self.calls.push(ApiCall::SetCamera);
    }

    fn draw(&mut self, buffer: GpuBuffer, _transform: &Matrix4<f32>) {
        if !self.buffers.contains_key(&buffer) {
            log::warn!("draw with unknown buffer {buffer:?}");
            return;
        }
        self.draws += 1;
        let textures = self.sampled_textures();
        self.calls.push(ApiCall::Draw { buffer, textures });
    }

    fn draw_triangles(&mut self, vertices: &[Vertex], _transform: &Matrix4<f32>) {
        self.draws += 1;
        let textures = self.sampled_textures();
        self.calls.push(ApiCall::DrawTriangles {
            count: vertices.len() / 3,
            textures,
        });
    }

    fn begin_frame(&mut self, _clear_colour: [f32; 4]) {
        if self.frame_open {
            log::warn!("begin_frame while a frame is still open");
        }
        self.frame_open = true;
        self.calls.push(ApiCall::BeginFrame);
    }

    fn end_frame(&mut self) -> anyhow::Result<()> {
        if !self.frame_open {
            bail!("end_frame without begin_frame");
        }
        self.frame_open = false;
        self.calls.push(ApiCall::EndFrame);
        Ok(())
    }

    fn capture_frame(&mut self) -> anyhow::Result<GpuTexture> {
        if !self.frame_open {
            bail!("capture_frame outside of a frame");
        }
        let texture = GpuTexture(self.next());
        self.textures.insert(
            texture,
            TextureRecord {
                label: "post render source".to_string(),
                target: TextureTarget::Flat,
                width: 0,
                height: 0,
            },
        );
        self.calls.push(ApiCall::CaptureFrame(texture));
        Ok(texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_glsl_uniform_declarations() {
        let names = declared_uniforms(
            "uniform vec3 cameraPosition;\nvoid main() {}\n  uniform sampler2D texUnit[2];",
        );
        assert!(names.contains("cameraPosition"));
        assert!(names.contains("texUnit"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn failing_label_rejects_upload() {
        let mut api = RecordingApi::new();
        api.fail_uploads_for("broken");
        let image = TextureImage::flat(image::RgbaImage::new(2, 2));
        assert!(api.create_texture("broken", &image).is_err());
        assert!(api.create_texture("fine", &image).is_ok());
        assert_eq!(api.texture_uploads(), 1);
    }
}
