use std::ops::{Deref, DerefMut};

use cgmath::Matrix4;

use crate::{
    api::GraphicsApi,
    data_structures::{material::MaterialId, vertex_buffer::VertexBufferId},
    renderer::Renderer,
    resources::Registry,
};

/// Keeps a material applied until dropped, then unapplies it.
///
/// Derefs to the [`Renderer`], so draws (and nested guards) go through the
/// guard. The borrow checker enforces LIFO release. A nested guard re-applies
/// the material that was current when it was created once it drops.
pub struct MaterialGuard<'r, A: GraphicsApi> {
    renderer: &'r mut Renderer<A>,
    registry: &'r Registry,
    material: MaterialId,
    outer: Option<MaterialId>,
}

impl<'r, A: GraphicsApi> MaterialGuard<'r, A> {
    pub(super) fn new(
        renderer: &'r mut Renderer<A>,
        registry: &'r Registry,
        material: MaterialId,
        outer: Option<MaterialId>,
    ) -> Self {
        Self {
            renderer,
            registry,
            material,
            outer,
        }
    }

    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub fn draw_mesh(&mut self, mesh: VertexBufferId, transform: &Matrix4<f32>) {
        self.renderer.draw(self.registry, mesh, transform);
    }
}

impl<A: GraphicsApi> Deref for MaterialGuard<'_, A> {
    type Target = Renderer<A>;

    fn deref(&self) -> &Self::Target {
        self.renderer
    }
}

impl<A: GraphicsApi> DerefMut for MaterialGuard<'_, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.renderer
    }
}

impl<A: GraphicsApi> Drop for MaterialGuard<'_, A> {
    fn drop(&mut self) {
        if let Err(e) = self.renderer.unapply_material(self.registry, self.material) {
            log::error!("releasing material guard: {e}");
        }
        self.renderer.restore_outer(self.registry, self.outer);
    }
}

/// Keeps a single texture applied until dropped. Nested inside a
/// [`MaterialGuard`] it restores that material on drop.
pub struct TextureGuard<'r, A: GraphicsApi> {
    renderer: &'r mut Renderer<A>,
    registry: &'r Registry,
    outer: Option<MaterialId>,
}

impl<'r, A: GraphicsApi> TextureGuard<'r, A> {
    pub(super) fn new(
        renderer: &'r mut Renderer<A>,
        registry: &'r Registry,
        outer: Option<MaterialId>,
    ) -> Self {
        Self {
            renderer,
            registry,
            outer,
        }
    }
}

impl<A: GraphicsApi> Deref for TextureGuard<'_, A> {
    type Target = Renderer<A>;

    fn deref(&self) -> &Self::Target {
        self.renderer
    }
}

impl<A: GraphicsApi> DerefMut for TextureGuard<'_, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.renderer
    }
}

impl<A: GraphicsApi> Drop for TextureGuard<'_, A> {
    fn drop(&mut self) {
        self.renderer.unapply_texture();
        self.renderer.restore_outer(self.registry, self.outer);
    }
}
