//! Errors callers are expected to match on.
//!
//! Loader and upload plumbing reports through `anyhow`; the variants below are
//! the conditions that cross the public api: programmer-contract violations
//! and capability gaps found while starting the renderer.

use thiserror::Error;

use crate::data_structures::{atlas::AtlasId, material::MaterialId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Passed a material id the registry does not know (the "null material").
    #[error("material {0:?} is not registered")]
    UnknownMaterial(MaterialId),

    /// The graphics api lacks something the renderer cannot run without.
    #[error("graphics api is missing a required capability: {0}")]
    MissingCapability(String),

    #[error("atlas {0:?} does not exist")]
    UnknownAtlas(AtlasId),

    /// Textures can only be packed between `begin_loading_textures` and
    /// `end_loading_textures`.
    #[error("atlas {0:?} is not accepting textures")]
    AtlasNotLoading(AtlasId),
}
