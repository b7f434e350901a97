//! Mesh data kept by the registry.
//!
//! The CPU copy of every mesh is retained so its GPU buffer can be rebuilt
//! after a context reset.

use cgmath::{InnerSpace, Vector3};

use crate::api::GpuBuffer;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
    pub colour: [f32; 4],
}

impl Vertex {
    pub fn new(position: [f32; 3], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            normal: [0.0, 0.0, 1.0],
            tex_coords,
            colour: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Unit quad in the xy plane facing +z, centred on the origin.
    pub fn quad(half_extent: f32) -> Self {
        let e = half_extent;
        Self {
            vertices: vec![
                Vertex::new([-e, -e, 0.0], [0.0, 1.0]),
                Vertex::new([e, -e, 0.0], [1.0, 1.0]),
                Vertex::new([e, e, 0.0], [1.0, 0.0]),
                Vertex::new([-e, e, 0.0], [0.0, 0.0]),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Two triangles covering clip space, used for post-render effects.
    pub fn fullscreen_triangles() -> Vec<Vertex> {
        let quad = Self::quad(1.0);
        quad.indices
            .iter()
            .map(|&i| quad.vertices[i as usize])
            .collect()
    }

    /// Distance from the origin to the farthest vertex.
    pub fn radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| Vector3::from(v.position).magnitude())
            .fold(0.0, f32::max)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexBufferId(pub usize);

#[derive(Debug)]
pub struct VertexBuffer {
    pub name: String,
    pub mesh: MeshData,
    /// `None` until uploaded, or after a failed re-upload.
    pub gpu: Option<GpuBuffer>,
    pub radius: f32,
}

impl VertexBuffer {
    pub fn new(name: &str, mesh: MeshData) -> Self {
        let radius = mesh.radius();
        Self {
            name: name.to_string(),
            mesh,
            gpu: None,
            radius,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_radius_is_corner_distance() {
        let quad = MeshData::quad(1.0);
        assert!((quad.radius() - 2.0_f32.sqrt()).abs() < 1e-6);
        assert_eq!(MeshData::fullscreen_triangles().len(), 6);
    }
}
