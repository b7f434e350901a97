//! Render state tracker.
//!
//! The [`Renderer`] mirrors what is bound on each texture unit (layer mode,
//! texture, whether a texture matrix is pushed) and, when a material is
//! applied, issues only the transitions needed to get from the live state to
//! the requested one:
//!
//! - mode changes tear down the old mode's side effects and set up the new one
//! - texture changes under the same mode only rebind
//! - atlas members sample their region through a pushed texture matrix
//! - identical layers issue nothing, apart from cube-map layers which always
//!   refresh their reflection matrix from the current camera
//!
//! Units past the material's first `None` layer are disabled. Applies must be
//! paired with unapplies in LIFO order; [`MaterialGuard`] does this on drop.

use cgmath::{EuclideanSpace, Matrix4, Point3};

use crate::{
    api::{
        BlendFactor, EnvMode, GpuProgram, GpuTexture, GraphicsApi, TexGen, TextureTarget,
        UniformValue,
    },
    camera::Camera,
    config::RenderConfig,
    data_structures::{
        material::{LAYER_COUNT, LayerMode, MaterialId},
        texture::TextureId,
        vertex_buffer::{Vertex, VertexBufferId},
    },
    error::RenderError,
    math::reflection_matrix,
    render::FrameStats,
    resources::Registry,
};

mod guard;

pub use guard::{MaterialGuard, TextureGuard};

const OPAQUE_WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const HALF_TRANSPARENT: [f32; 4] = [1.0, 1.0, 1.0, 0.5];

/// What the renderer believes is bound on one texture unit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UnitState {
    pub mode: LayerMode,
    pub texture: Option<GpuTexture>,
    pub matrix_pushed: bool,
    pub env: EnvMode,
    /// Atlas sub-rectangle the unit's texture matrix maps onto.
    pub uv_region: Option<Matrix4<f32>>,
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            mode: LayerMode::None,
            texture: None,
            matrix_pushed: false,
            env: EnvMode::Modulate,
            uv_region: None,
        }
    }
}

/// A layer with its texture resolved to a GPU handle.
#[derive(Copy, Clone, Debug, PartialEq)]
struct ResolvedLayer {
    mode: LayerMode,
    texture: Option<GpuTexture>,
    uv_region: Option<Matrix4<f32>>,
}

impl ResolvedLayer {
    const NONE: Self = Self {
        mode: LayerMode::None,
        texture: None,
        uv_region: None,
    };

    fn resolve(registry: &Registry, mode: LayerMode, texture: TextureId) -> Self {
        let uv_region = match mode {
            LayerMode::None | LayerMode::CubeMap => None,
            _ => registry.atlas_region(texture).map(|region| region.uv_matrix()),
        };
        Self {
            mode,
            texture: registry.texture_handle(texture),
            uv_region,
        }
    }
}

pub struct Renderer<A: GraphicsApi> {
    api: A,
    config: RenderConfig,
    units: [UnitState; LAYER_COUNT],
    blend_enabled: bool,
    program: Option<GpuProgram>,
    current_material: Option<MaterialId>,
    current_texture: Option<TextureId>,
    eye: Point3<f32>,
    target: Point3<f32>,
    ambient: [f32; 4],
    post_render_source: Option<GpuTexture>,
    shaders_enabled: bool,
    stats: FrameStats,
}

impl<A: GraphicsApi> Renderer<A> {
    /// Fails when the api cannot run the material model at all.
    pub fn new(api: A, config: RenderConfig) -> Result<Self, RenderError> {
        let caps = api.capabilities();
        if caps.texture_units < LAYER_COUNT {
            return Err(RenderError::MissingCapability(format!(
                "{LAYER_COUNT} texture units (found {})",
                caps.texture_units
            )));
        }
        if !caps.cube_maps {
            return Err(RenderError::MissingCapability("cube map textures".into()));
        }
        let shaders_enabled = config.shaders_enabled && caps.shaders;
        if config.shaders_enabled && !caps.shaders {
            log::warn!("graphics api has no shader support, materials draw without programs");
        }
        let camera = Camera::default();
        Ok(Self {
            api,
            ambient: config.ambient_colour,
            config,
            units: [UnitState::default(); LAYER_COUNT],
            blend_enabled: false,
            program: None,
            current_material: None,
            current_texture: None,
            eye: camera.eye,
            target: camera.target,
            post_render_source: None,
            shaders_enabled,
            stats: FrameStats::default(),
        })
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn unit(&self, unit: usize) -> &UnitState {
        &self.units[unit]
    }

    pub fn current_material(&self) -> Option<MaterialId> {
        self.current_material
    }

    pub fn current_texture(&self) -> Option<TextureId> {
        self.current_texture
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub(crate) fn count_batches(&mut self, batches: usize) {
        self.stats.batches += batches;
    }

    pub fn shaders_enabled(&self) -> bool {
        self.shaders_enabled
    }

    pub fn set_shaders_enabled(&mut self, enabled: bool) {
        self.shaders_enabled = enabled && self.api.capabilities().shaders;
    }

    pub fn set_ambient(&mut self, ambient: [f32; 4]) {
        self.ambient = ambient;
    }

    /// Texture sampled by `PostRender` layers that name no texture of their own.
    pub fn set_post_render_source(&mut self, texture: Option<GpuTexture>) {
        self.post_render_source = texture;
    }

    /// Uploads the camera matrices and remembers eye and target for reflections.
    pub fn set_camera(&mut self, camera: &Camera) {
        self.eye = camera.eye;
        self.target = camera.target;
        self.api.set_camera(camera.view(), camera.projection());
    }

    /// Camera for geometry drawn around the viewer (sky domes).
    pub fn set_camera_centred(&mut self, camera: &Camera) {
        self.eye = camera.eye;
        self.target = camera.target;
        self.api
            .set_camera(camera.rotation_only_view(), camera.projection());
    }

    pub fn begin_frame(&mut self) {
        self.stats = FrameStats::default();
        self.api.begin_frame(self.config.clear_colour);
    }

    pub fn end_frame(&mut self) -> anyhow::Result<FrameStats> {
        self.clear_material();
        self.api.end_frame()?;
        self.post_render_source = None;
        Ok(self.stats)
    }

    pub fn capture_frame(&mut self) -> anyhow::Result<GpuTexture> {
        self.api.capture_frame()
    }

    /// Makes `id` the current material.
    ///
    /// Passing the id that is already current only refreshes cube-map
    /// reflections. An id the registry does not know is a contract violation:
    /// debug builds panic, release builds return an error and change nothing.
    pub fn apply_material(
        &mut self,
        registry: &Registry,
        id: MaterialId,
    ) -> Result<(), RenderError> {
        let Some(material) = registry.material(id) else {
            debug_assert!(false, "apply of unregistered material {id:?}");
            return Err(RenderError::UnknownMaterial(id));
        };
        if self.current_material == Some(id) {
            self.refresh_reflections();
            return Ok(());
        }

        let active = material.active_layer_count();
        let mut layers = [ResolvedLayer::NONE; LAYER_COUNT];
        for (unit, layer) in material.active_layers().iter().enumerate() {
            let mut mode = layer.mode;
            if unit == 0 && mode == LayerMode::Detail {
                log::warn!(
                    "material {} has a detail layer on unit 0, drawing it as plain",
                    material.name
                );
                mode = LayerMode::Plain;
            }
            layers[unit] = match (mode, layer.texture) {
                (LayerMode::PostRender, None) => ResolvedLayer {
                    mode,
                    texture: self.post_render_source,
                    uv_region: None,
                },
                (_, Some(texture)) => ResolvedLayer::resolve(registry, mode, texture),
                (_, None) => ResolvedLayer::resolve(registry, mode, registry.not_found_texture()),
            };
        }

        let program = material
            .shader
            .filter(|_| self.shaders_enabled)
            .and_then(|shader| registry.shader_program(shader));

        self.apply_layers(&layers, active, program);
        self.current_material = Some(id);
        self.current_texture = None;
        self.stats.material_changes += 1;
        Ok(())
    }

    /// Undoes [`apply_material`](Self::apply_material): every unit back to
    /// `None`, no program, no current material.
    pub fn unapply_material(
        &mut self,
        registry: &Registry,
        id: MaterialId,
    ) -> Result<(), RenderError> {
        if registry.material(id).is_none() {
            debug_assert!(false, "unapply of unregistered material {id:?}");
            return Err(RenderError::UnknownMaterial(id));
        }
        if self.current_material != Some(id) {
            log::debug!(
                "unapplying material {id:?} while {:?} is current",
                self.current_material
            );
        }
        self.release();
        Ok(())
    }

    /// Binds a single plain texture on unit 0 with no program, as used for
    /// untextured materials and screen-space quads.
    pub fn apply_texture(&mut self, registry: &Registry, texture: TextureId) {
        if self.current_texture == Some(texture) && self.current_material.is_none() {
            return;
        }
        let mut layers = [ResolvedLayer::NONE; LAYER_COUNT];
        layers[0] = ResolvedLayer::resolve(registry, LayerMode::Plain, texture);
        self.apply_layers(&layers, 1, None);
        self.current_material = None;
        self.current_texture = Some(texture);
        self.stats.material_changes += 1;
    }

    pub fn unapply_texture(&mut self) {
        self.release();
    }

    /// Resets every unit, blending and the program whatever the tracker
    /// believes is bound.
    pub fn clear_material(&mut self) {
        for unit in 0..LAYER_COUNT {
            let live = self.units[unit];
            self.teardown(unit, live.mode);
            if self.units[unit].matrix_pushed {
                self.api.pop_texture_matrix(unit);
            }
            self.api.enable_texture(unit, TextureTarget::Cube, false);
            self.api.enable_texture(unit, TextureTarget::Flat, false);
            self.api.set_texgen(unit, None);
            self.api.set_rgb_scale(unit, 1.0);
            self.api.set_env_mode(unit, EnvMode::Modulate);
            self.units[unit] = UnitState::default();
        }
        self.api.set_colour(OPAQUE_WHITE);
        self.api.set_blend_func(BlendFactor::One, BlendFactor::Zero);
        self.api.enable_blend(false);
        self.blend_enabled = false;
        self.api.use_program(None);
        self.program = None;
        self.current_material = None;
        self.current_texture = None;
    }

    pub fn material_guard<'r>(
        &'r mut self,
        registry: &'r Registry,
        id: MaterialId,
    ) -> Result<MaterialGuard<'r, A>, RenderError> {
        let outer = self.current_material;
        self.apply_material(registry, id)?;
        Ok(MaterialGuard::new(self, registry, id, outer))
    }

    pub fn texture_guard<'r>(
        &'r mut self,
        registry: &'r Registry,
        texture: TextureId,
    ) -> TextureGuard<'r, A> {
        let outer = self.current_material;
        self.apply_texture(registry, texture);
        TextureGuard::new(self, registry, outer)
    }

    /// Puts back the material a dropped guard had replaced.
    fn restore_outer(&mut self, registry: &Registry, outer: Option<MaterialId>) {
        let Some(outer) = outer else {
            return;
        };
        if let Err(e) = self.apply_material(registry, outer) {
            log::error!("restoring material {outer:?} after a nested guard: {e}");
        }
    }

    /// Draws a registry vertex buffer with whatever state is current.
    pub fn draw(&mut self, registry: &Registry, mesh: VertexBufferId, transform: &Matrix4<f32>) {
        match registry.vertex_buffer(mesh).and_then(|buffer| buffer.gpu) {
            Some(buffer) => {
                self.api.draw(buffer, transform);
                self.stats.draws += 1;
            }
            None => log::warn!("vertex buffer {mesh:?} has no GPU buffer, skipping draw"),
        }
    }

    pub fn draw_triangles(&mut self, vertices: &[Vertex], transform: &Matrix4<f32>) {
        self.api.draw_triangles(vertices, transform);
        self.stats.draws += 1;
    }

    fn apply_layers(
        &mut self,
        layers: &[ResolvedLayer; LAYER_COUNT],
        active: usize,
        program: Option<GpuProgram>,
    ) {
        for (unit, layer) in layers.iter().enumerate() {
            let wanted = if unit < active { *layer } else { ResolvedLayer::NONE };
            self.transition(unit, wanted);
        }
        self.sync_blend(layers, active);

        if self.units[0].mode != LayerMode::CubeMap {
            match active {
                0 => {}
                1 => self.set_env(0, EnvMode::Modulate),
                _ => self.set_env(0, EnvMode::Replace),
            }
        }

        self.bind_program(program, active);
    }

    fn transition(&mut self, unit: usize, wanted: ResolvedLayer) {
        let live = self.units[unit];
        if live.mode != wanted.mode {
            self.teardown(unit, live.mode);
            self.setup(unit, wanted);
        } else if live.texture != wanted.texture || live.uv_region != wanted.uv_region {
            if live.texture == wanted.texture {
                self.push_flat_matrix(unit, wanted);
                return;
            }
            match wanted.mode {
                LayerMode::None => {}
                LayerMode::CubeMap => {
                    self.api
                        .bind_texture(unit, TextureTarget::Cube, wanted.texture);
                    self.repush_reflection(unit);
                }
                _ => {
                    self.api.bind_texture(unit, TextureTarget::Flat, wanted.texture);
                    if live.uv_region != wanted.uv_region {
                        self.push_flat_matrix(unit, wanted);
                    }
                }
            }
            self.units[unit].texture = wanted.texture;
        } else if wanted.mode == LayerMode::CubeMap {
            self.repush_reflection(unit);
        }
    }

    /// Undoes the side effects `mode` left on `unit`.
    fn teardown(&mut self, unit: usize, mode: LayerMode) {
        match mode {
            LayerMode::Mask | LayerMode::Blend => {
                if self.units[unit].matrix_pushed {
                    self.api.pop_texture_matrix(unit);
                    self.units[unit].matrix_pushed = false;
                }
                self.api.set_colour(OPAQUE_WHITE);
                self.api.set_blend_func(BlendFactor::One, BlendFactor::Zero);
                self.api.enable_blend(false);
                self.blend_enabled = false;
            }
            LayerMode::Detail => {
                if self.units[unit].matrix_pushed {
                    self.api.load_identity_texture_matrix(unit);
                    self.api.pop_texture_matrix(unit);
                    self.units[unit].matrix_pushed = false;
                }
            }
            LayerMode::CubeMap => {
                if self.units[unit].matrix_pushed {
                    self.api.pop_texture_matrix(unit);
                    self.units[unit].matrix_pushed = false;
                }
                self.api.enable_texture(unit, TextureTarget::Cube, false);
                self.api.set_texgen(unit, None);
                self.api.set_rgb_scale(unit, 1.0);
                self.set_env(unit, EnvMode::Modulate);
            }
            LayerMode::Plain | LayerMode::PostRender => {
                if self.units[unit].matrix_pushed {
                    self.api.pop_texture_matrix(unit);
                    self.units[unit].matrix_pushed = false;
                }
            }
            LayerMode::None => {}
        }
        self.units[unit].uv_region = None;
    }

    fn setup(&mut self, unit: usize, layer: ResolvedLayer) {
        match layer.mode {
            LayerMode::None => {
                self.api.enable_texture(unit, TextureTarget::Flat, false);
            }
            LayerMode::Plain | LayerMode::PostRender => {
                self.enable_flat(unit, layer.texture);
                self.push_flat_matrix(unit, layer);
            }
            LayerMode::Mask | LayerMode::Blend => {
                self.enable_flat(unit, layer.texture);
                self.push_flat_matrix(unit, layer);
                self.enable_blend_for(layer.mode);
            }
            LayerMode::Detail => {
                self.enable_flat(unit, layer.texture);
                self.push_flat_matrix(unit, layer);
                self.api.enable_blend(false);
                self.blend_enabled = false;
            }
            LayerMode::CubeMap => {
                self.api.enable_texture(unit, TextureTarget::Flat, false);
                self.api.enable_texture(unit, TextureTarget::Cube, true);
                self.api.bind_texture(unit, TextureTarget::Cube, layer.texture);
                self.api
                    .push_texture_matrix(unit, reflection_matrix(self.eye, self.target));
                self.units[unit].matrix_pushed = true;
                self.api.set_texgen(unit, Some(TexGen::ReflectionMap));
                self.api.set_rgb_scale(unit, self.config.cube_map_rgb_scale);
                self.set_env(unit, EnvMode::Combine);
            }
        }
        let state = &mut self.units[unit];
        state.mode = layer.mode;
        state.texture = match layer.mode {
            LayerMode::None => None,
            _ => layer.texture,
        };
    }

    /// Replaces whatever matrix `unit` has pushed with the one `layer` needs:
    /// its atlas region, times the detail scale for detail layers.
    fn push_flat_matrix(&mut self, unit: usize, layer: ResolvedLayer) {
        if self.units[unit].matrix_pushed {
            self.api.pop_texture_matrix(unit);
            self.units[unit].matrix_pushed = false;
        }
        let matrix = match (layer.mode, layer.uv_region) {
            (LayerMode::Detail, region) => {
                let scale = Matrix4::from_scale(self.config.detail_scale);
                Some(region.map_or(scale, |region| region * scale))
            }
            (_, region) => region,
        };
        if let Some(matrix) = matrix {
            self.api.push_texture_matrix(unit, matrix);
            self.units[unit].matrix_pushed = true;
        }
        self.units[unit].uv_region = layer.uv_region;
    }

    fn enable_flat(&mut self, unit: usize, texture: Option<GpuTexture>) {
        self.api.enable_texture(unit, TextureTarget::Flat, true);
        self.api.bind_texture(unit, TextureTarget::Flat, texture);
    }

    fn enable_blend_for(&mut self, mode: LayerMode) {
        self.api
            .set_blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
        let colour = if mode == LayerMode::Blend {
            HALF_TRANSPARENT
        } else {
            OPAQUE_WHITE
        };
        self.api.set_colour(colour);
        self.api.enable_blend(true);
        self.blend_enabled = true;
    }

    /// Blend state is shared by all units; a teardown on one unit must not
    /// switch off blending another active layer still needs.
    fn sync_blend(&mut self, layers: &[ResolvedLayer; LAYER_COUNT], active: usize) {
        if self.blend_enabled {
            return;
        }
        if let Some(layer) = layers[..active].iter().find(|layer| layer.mode.is_blended()) {
            self.enable_blend_for(layer.mode);
        }
    }

    fn set_env(&mut self, unit: usize, mode: EnvMode) {
        if self.units[unit].env != mode {
            self.api.set_env_mode(unit, mode);
            self.units[unit].env = mode;
        }
    }

    fn repush_reflection(&mut self, unit: usize) {
        if self.units[unit].matrix_pushed {
            self.api.pop_texture_matrix(unit);
        }
        self.api
            .push_texture_matrix(unit, reflection_matrix(self.eye, self.target));
        self.units[unit].matrix_pushed = true;
    }

    fn refresh_reflections(&mut self) {
        for unit in 0..LAYER_COUNT {
            if self.units[unit].mode == LayerMode::CubeMap {
                self.repush_reflection(unit);
            }
        }
    }

    fn bind_program(&mut self, program: Option<GpuProgram>, active: usize) {
        let Some(program) = program else {
            if self.program.take().is_some() {
                self.api.use_program(None);
            }
            return;
        };
        if self.program != Some(program) {
            self.api.use_program(Some(program));
            self.program = Some(program);
        }
        let eye = self.eye.to_vec();
        let uniforms = [
            ("cameraPosition", UniformValue::Vec3([eye.x, eye.y, eye.z])),
            ("ambientColour", UniformValue::Vec4(self.ambient)),
        ];
        for (name, value) in uniforms {
            if !self.api.set_uniform(program, name, value) {
                log::debug!("program {program:?} has no uniform {name}");
            }
        }
        for unit in 0..active {
            let name = format!("texUnit{unit}");
            if !self.api.set_uniform(program, &name, UniformValue::Int(unit as i32)) {
                log::debug!("program {program:?} has no uniform {name}");
            }
        }
    }

    fn release(&mut self) {
        for unit in 0..LAYER_COUNT {
            self.transition(unit, ResolvedLayer::NONE);
        }
        self.set_env(0, EnvMode::Modulate);
        if self.program.take().is_some() {
            self.api.use_program(None);
        }
        self.current_material = None;
        self.current_texture = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Capabilities, recording::RecordingApi};

    #[test]
    fn rejects_apis_with_too_few_units() {
        let api = RecordingApi::with_capabilities(Capabilities {
            texture_units: 2,
            cube_maps: true,
            shaders: true,
        });
        assert!(matches!(
            Renderer::new(api, RenderConfig::default()),
            Err(RenderError::MissingCapability(_))
        ));
    }

    #[test]
    fn shaders_follow_capabilities() {
        let api = RecordingApi::with_capabilities(Capabilities {
            texture_units: 4,
            cube_maps: true,
            shaders: false,
        });
        let mut renderer = Renderer::new(api, RenderConfig::default()).unwrap();
        assert!(!renderer.shaders_enabled());
        renderer.set_shaders_enabled(true);
        assert!(!renderer.shaders_enabled());
    }
}
