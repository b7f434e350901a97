//! Everything a running game state works with.
//!
//! [`Context`] owns the renderer (and through it the graphics api), the asset
//! registry, the scene, the camera and the per-frame render graph. The loading
//! helpers forward to the registry with the renderer's api, so callers never
//! juggle the two borrows themselves.

use cgmath::{Matrix4, SquareMatrix};
use instant::Duration;

use crate::{
    api::GraphicsApi,
    camera::Camera,
    config::EngineConfig,
    data_structures::{
        atlas::AtlasId,
        material::MaterialId,
        scene_graph::{LightNode, ModelNode, NodeId, NodeKind, Scene},
        shader::ShaderId,
        texture::TextureId,
        vertex_buffer::{MeshData, VertexBufferId},
    },
    error::RenderError,
    render::{FrameStats, Pass, RenderGraph, StateSet},
    renderer::Renderer,
    resources::{AssetSource, FileSystem, Registry, ReloadReport},
};

pub struct Context<A: GraphicsApi> {
    pub renderer: Renderer<A>,
    pub registry: Registry,
    pub scene: Scene,
    pub camera: Camera,
    pub graph: RenderGraph,
    pub config: EngineConfig,
    /// Materials drawn over the finished frame, in order. Each one samples
    /// the frame as left by the previous one through its post-render layer.
    pub post_effects: Vec<MaterialId>,
}

impl<A: GraphicsApi> Context<A> {
    /// Context loading assets from the configured search paths.
    pub fn new(api: A, config: EngineConfig) -> Result<Self, RenderError> {
        let source = FileSystem::new(config.search_paths.clone());
        Self::with_source(api, config, Box::new(source))
    }

    pub fn with_source(
        api: A,
        config: EngineConfig,
        source: Box<dyn AssetSource>,
    ) -> Result<Self, RenderError> {
        let mut renderer = Renderer::new(api, config.render.clone())?;
        let registry = Registry::new(source, config.render.clone(), renderer.api_mut());
        Ok(Self {
            renderer,
            registry,
            scene: Scene::new(),
            camera: Camera::default(),
            graph: RenderGraph::new(),
            config,
            post_effects: Vec::new(),
        })
    }

    pub fn load_texture(&mut self, name: &str) -> TextureId {
        self.registry.add_texture(self.renderer.api_mut(), name)
    }

    pub fn load_cube_map(&mut self, name: &str) -> TextureId {
        self.registry.add_cube_map(self.renderer.api_mut(), name)
    }

    pub fn load_material(&mut self, name: &str) -> MaterialId {
        self.registry.add_material(self.renderer.api_mut(), name)
    }

    pub fn load_shader(&mut self, name: &str) -> Option<ShaderId> {
        self.registry.add_shader(self.renderer.api_mut(), name)
    }

    pub fn add_mesh(&mut self, name: &str, mesh: MeshData) -> VertexBufferId {
        self.registry
            .add_vertex_buffer(self.renderer.api_mut(), name, mesh)
    }

    pub fn end_loading_textures(&mut self, atlas: AtlasId) -> Result<(), RenderError> {
        self.registry
            .end_loading_textures(self.renderer.api_mut(), atlas)
    }

    /// Adds a model node drawn with `state`. Materials with a blended layer
    /// go to the transparent pass, everything else is opaque.
    pub fn add_model(
        &mut self,
        parent: NodeId,
        name: &str,
        mesh: VertexBufferId,
        state: StateSet,
    ) -> NodeId {
        let transparent = state
            .material
            .and_then(|id| self.registry.material(id))
            .is_some_and(|material| material.is_transparent());
        let pass = if transparent {
            Pass::Transparent
        } else {
            Pass::Opaque
        };
        self.add_model_in_pass(parent, name, mesh, state, pass)
    }

    pub fn add_model_in_pass(
        &mut self,
        parent: NodeId,
        name: &str,
        mesh: VertexBufferId,
        state: StateSet,
        pass: Pass,
    ) -> NodeId {
        let radius = self
            .registry
            .vertex_buffer(mesh)
            .map_or(0.0, |buffer| buffer.radius);
        let model = ModelNode {
            mesh,
            state,
            pass,
            radius,
        };
        self.scene.add_node(parent, name, NodeKind::Model(model))
    }

    pub fn add_light(&mut self, parent: NodeId, name: &str, light: LightNode) -> NodeId {
        self.scene.add_node(parent, name, NodeKind::Light(light))
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.camera.set_aspect(width, height);
        self.renderer.api_mut().resize(width, height);
    }

    /// Rebuilds every GPU object after the graphics context was lost.
    pub fn reload(&mut self) -> ReloadReport {
        self.renderer.clear_material();
        let report = self.registry.reload_textures(self.renderer.api_mut());
        log::info!(
            "reloaded {} textures, {} atlases, {} shaders and {} vertex buffers",
            report.textures,
            report.atlases,
            report.shaders,
            report.vertex_buffers
        );
        report
    }

    /// Animations, switches and LODs, then transforms and bounds.
    pub fn update_scene(&mut self, dt: Duration) {
        self.scene.update(&self.camera, dt);
    }

    /// Rebuilds the render graph from what the camera sees.
    pub fn cull(&mut self) {
        self.scene.cull(&self.camera, &mut self.graph);
    }

    /// Starts a frame and draws the render graph.
    pub fn draw_scene(&mut self) -> FrameStats {
        self.renderer.begin_frame();
        self.graph
            .render(&mut self.renderer, &self.registry, &self.camera)
    }

    /// Runs the post effects and ends the frame.
    pub fn finish_frame(&mut self) -> anyhow::Result<FrameStats> {
        if !self.post_effects.is_empty() {
            self.apply_post_effects()?;
        }
        self.renderer.end_frame()
    }

    fn apply_post_effects(&mut self) -> anyhow::Result<()> {
        let quad = MeshData::fullscreen_triangles();
        self.renderer.clear_material();
        self.renderer
            .api_mut()
            .set_camera(Matrix4::identity(), Matrix4::identity());
        for &effect in &self.post_effects {
            let frame = self.renderer.capture_frame()?;
            self.renderer.set_post_render_source(Some(frame));
            match self.renderer.material_guard(&self.registry, effect) {
                Ok(mut guard) => guard.draw_triangles(&quad, &Matrix4::identity()),
                Err(e) => log::error!("skipping post effect: {e}"),
            }
            self.renderer.set_post_render_source(None);
            self.renderer.api_mut().destroy_texture(frame);
        }
        self.renderer.set_camera(&self.camera);
        Ok(())
    }
}
