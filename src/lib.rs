//! layer-ngin
//!
//! The engine core of a fixed-function style 3D renderer. Materials are
//! stacks of up to three texture layers (plain, mask, blend, detail, cube-map
//! reflection, post-render), and a render state tracker applies them with the
//! minimal set of state transitions. A typed scene graph is updated and culled
//! every frame into a render graph of batches that is drawn in pass order.
//!
//! High-level modules
//! - `api`: the graphics api contract, a headless recording backend and the
//!   wgpu backend (feature `gpu`)
//! - `renderer`: the render state tracker and its scoped guards
//! - `resources`: registry for textures, atlases, materials, shaders and meshes
//! - `data_structures`: engine data models (materials, textures, scene graph)
//! - `render`: per-frame render graph and pass ordering
//! - `camera`: camera and view frustum
//! - `context`: owns renderer, registry, scene and camera
//! - `flow`: application shell and game-state stack
//! - `pipelines`: wgpu pipeline emulating the texture combiner (feature `gpu`)
//!

pub mod api;
pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod math;
#[cfg(feature = "gpu")]
pub mod pipelines;
pub mod render;
pub mod renderer;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use context::Context;
pub use error::RenderError;
pub use instant::Duration;
