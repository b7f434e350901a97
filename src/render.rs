//! Per-frame render graph.
//!
//! Culling fills a [`RenderGraph`] with [`RenderItem`]s grouped by the
//! [`StateSet`] they need and by [`Pass`]. Rendering walks the passes in a fixed
//! order, applying each state set once per batch so the tracker can diff
//! consecutive materials:
//!
//! 1. opaque
//! 2. animated
//! 3. sky dome, drawn around the camera
//! 4. transparent, sorted back to front
//! 5. particles, positioned relative to the camera
//!
//! The graph is rebuilt every cull and never kept across frames.

use cgmath::{EuclideanSpace, Matrix4, Point3};

use crate::{
    api::GraphicsApi,
    camera::Camera,
    data_structures::{material::MaterialId, texture::TextureId, vertex_buffer::VertexBufferId},
    renderer::Renderer,
    resources::Registry,
};

/// What has to be bound for a draw. Compared by value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StateSet {
    pub material: Option<MaterialId>,
    pub texture: Option<TextureId>,
}

impl StateSet {
    pub fn material(material: MaterialId) -> Self {
        Self {
            material: Some(material),
            texture: None,
        }
    }

    pub fn texture(texture: TextureId) -> Self {
        Self {
            material: None,
            texture: Some(texture),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    Opaque,
    Animated,
    SkyDome,
    Transparent,
    Particles,
}

impl Pass {
    pub const ORDER: [Pass; 5] = [
        Pass::Opaque,
        Pass::Animated,
        Pass::SkyDome,
        Pass::Transparent,
        Pass::Particles,
    ];

    fn index(self) -> usize {
        match self {
            Pass::Opaque => 0,
            Pass::Animated => 1,
            Pass::SkyDome => 2,
            Pass::Transparent => 3,
            Pass::Particles => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderItem {
    pub mesh: VertexBufferId,
    pub transform: Matrix4<f32>,
    /// Camera distance at cull time, the transparent sort key.
    pub distance: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub state: StateSet,
    pub items: Vec<RenderItem>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LightInfo {
    pub position: Point3<f32>,
    pub colour: [f32; 4],
    pub ambient: [f32; 4],
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub batches: usize,
    pub draws: usize,
    pub material_changes: usize,
}

#[derive(Debug, Default)]
pub struct RenderGraph {
    passes: [Vec<Batch>; 5],
    lights: Vec<LightInfo>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.passes.iter_mut().for_each(Vec::clear);
        self.lights.clear();
    }

    /// Appends `item` to the batch of `pass` using `state`, creating the batch
    /// on first use.
    pub fn add_renderable(&mut self, pass: Pass, state: StateSet, item: RenderItem) {
        let batches = &mut self.passes[pass.index()];
        match batches.iter_mut().find(|batch| batch.state == state) {
            Some(batch) => batch.items.push(item),
            None => batches.push(Batch {
                state,
                items: vec![item],
            }),
        }
    }

    pub fn add_light(&mut self, light: LightInfo) {
        self.lights.push(light);
    }

    pub fn batches(&self, pass: Pass) -> &[Batch] {
        &self.passes[pass.index()]
    }

    pub fn lights(&self) -> &[LightInfo] {
        &self.lights
    }

    pub fn item_count(&self) -> usize {
        self.passes
            .iter()
            .flatten()
            .map(|batch| batch.items.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Draws everything in pass order and leaves the tracker cleared.
    pub fn render<A: GraphicsApi>(
        &self,
        renderer: &mut Renderer<A>,
        registry: &Registry,
        camera: &Camera,
    ) -> FrameStats {
        if let Some(light) = self.lights.first() {
            renderer.set_ambient(light.ambient);
        }
        let mut batches = 0;
        for pass in Pass::ORDER {
            match pass {
                Pass::SkyDome => renderer.set_camera_centred(camera),
                _ => renderer.set_camera(camera),
            }
            let pass_batches = self.batches(pass);
            if pass_batches.is_empty() {
                continue;
            }
            batches += pass_batches.len();
            match pass {
                Pass::Transparent => self.render_sorted(renderer, registry, pass_batches),
                Pass::Particles => {
                    let eye = Matrix4::from_translation(camera.eye.to_vec());
                    for batch in pass_batches {
                        if bind_state(renderer, registry, batch.state) {
                            for item in &batch.items {
                                renderer.draw(registry, item.mesh, &(eye * item.transform));
                            }
                        }
                    }
                }
                _ => {
                    for batch in pass_batches {
                        if bind_state(renderer, registry, batch.state) {
                            for item in &batch.items {
                                renderer.draw(registry, item.mesh, &item.transform);
                            }
                        }
                    }
                }
            }
            renderer.clear_material();
        }
        renderer.set_camera(camera);
        renderer.count_batches(batches);
        renderer.stats()
    }

    /// Transparent items from every batch, farthest first.
    fn render_sorted<A: GraphicsApi>(
        &self,
        renderer: &mut Renderer<A>,
        registry: &Registry,
        batches: &[Batch],
    ) {
        let mut items: Vec<(StateSet, &RenderItem)> = batches
            .iter()
            .flat_map(|batch| batch.items.iter().map(move |item| (batch.state, item)))
            .collect();
        items.sort_by(|a, b| b.1.distance.total_cmp(&a.1.distance));
        let mut bound = None;
        for (state, item) in items {
            if bound != Some(state) {
                if !bind_state(renderer, registry, state) {
                    continue;
                }
                bound = Some(state);
            }
            renderer.draw(registry, item.mesh, &item.transform);
        }
    }
}

/// Applies `state`; false when nothing sensible can be drawn with it.
fn bind_state<A: GraphicsApi>(
    renderer: &mut Renderer<A>,
    registry: &Registry,
    state: StateSet,
) -> bool {
    match state {
        StateSet {
            material: Some(material),
            ..
        } => match renderer.apply_material(registry, material) {
            Ok(()) => true,
            Err(e) => {
                log::error!("skipping batch: {e}");
                false
            }
        },
        StateSet {
            texture: Some(texture),
            ..
        } => {
            renderer.apply_texture(registry, texture);
            true
        }
        _ => {
            renderer.clear_material();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;

    fn item(mesh: usize, distance: f32) -> RenderItem {
        RenderItem {
            mesh: VertexBufferId(mesh),
            transform: Matrix4::identity(),
            distance,
        }
    }

    #[test]
    fn equal_state_sets_share_a_batch() {
        let mut graph = RenderGraph::new();
        let a = StateSet::material(MaterialId(1));
        let b = StateSet::texture(TextureId(1));
        graph.add_renderable(Pass::Opaque, a, item(0, 1.0));
        graph.add_renderable(Pass::Opaque, b, item(1, 1.0));
        graph.add_renderable(Pass::Opaque, a, item(2, 1.0));
        graph.add_renderable(Pass::Transparent, a, item(3, 1.0));
        assert_eq!(graph.batches(Pass::Opaque).len(), 2);
        assert_eq!(graph.batches(Pass::Opaque)[0].items.len(), 2);
        assert_eq!(graph.batches(Pass::Transparent).len(), 1);
        assert_eq!(graph.item_count(), 4);

        graph.clear();
        assert!(graph.is_empty());
    }
}
