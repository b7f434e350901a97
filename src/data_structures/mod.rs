//! Engine data structures: materials, textures, meshes and the scene graph.
//!
//! - `material` holds the three-layer material model
//! - `texture` and `atlas` describe loaded images and packed texture atlases
//! - `shader` and `vertex_buffer` keep the CPU side of GPU programs and meshes
//! - `transform` is the position/rotation/scale triple nodes are placed with
//! - `scene_graph` enables hierarchical scene organization

pub mod atlas;
pub mod material;
pub mod scene_graph;
pub mod shader;
pub mod texture;
pub mod transform;
pub mod vertex_buffer;
