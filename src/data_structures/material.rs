//! Materials: up to [`LAYER_COUNT`] texture layers and an optional shader.
//!
//! Layers are applied one per texture unit. The first [`LayerMode::None`] layer
//! ends the run, every layer after it is ignored for drawing.

use std::fmt;

use crate::data_structures::{atlas::AtlasId, shader::ShaderId, texture::TextureId};

/// Layers per material, which is also the number of texture units tracked.
pub const LAYER_COUNT: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub usize);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LayerMode {
    #[default]
    None,
    /// Plain 2D texture.
    Plain,
    /// Alpha-tested cut-out, blended with the texture's own alpha.
    Mask,
    /// Half-transparent.
    Blend,
    /// Tiled detail texture multiplied over the layer below.
    Detail,
    /// Environment reflection from a cube map.
    CubeMap,
    /// Samples the frame rendered so far (post effects).
    PostRender,
}

impl LayerMode {
    /// Parses the keyword used in material files.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "none" => Some(LayerMode::None),
            "plain" | "normal" => Some(LayerMode::Plain),
            "mask" => Some(LayerMode::Mask),
            "blend" => Some(LayerMode::Blend),
            "detail" => Some(LayerMode::Detail),
            "cubemap" => Some(LayerMode::CubeMap),
            "postrender" => Some(LayerMode::PostRender),
            _ => None,
        }
    }

    /// Modes that leave blending enabled on their unit.
    pub fn is_blended(&self) -> bool {
        matches!(self, LayerMode::Mask | LayerMode::Blend)
    }
}

impl fmt::Display for LayerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            LayerMode::None => "none",
            LayerMode::Plain => "plain",
            LayerMode::Mask => "mask",
            LayerMode::Blend => "blend",
            LayerMode::Detail => "detail",
            LayerMode::CubeMap => "cubemap",
            LayerMode::PostRender => "postrender",
        };
        f.write_str(keyword)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layer {
    pub mode: LayerMode,
    /// Not owned; the registry keeps the texture alive.
    pub texture: Option<TextureId>,
    /// Name the texture was requested with, kept for relinking and logs.
    pub filename: String,
    pub atlas: Option<AtlasId>,
}

impl Layer {
    pub fn new(mode: LayerMode, texture: TextureId, filename: &str) -> Self {
        Self {
            mode,
            texture: Some(texture),
            filename: filename.to_string(),
            atlas: None,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub layers: [Layer; LAYER_COUNT],
    pub shader: Option<ShaderId>,
}

impl Material {
    pub fn new(name: &str, layers: [Layer; LAYER_COUNT]) -> Self {
        Self {
            name: name.to_string(),
            layers,
            shader: None,
        }
    }

    /// Number of layers before the first `None` layer.
    pub fn active_layer_count(&self) -> usize {
        active_layer_count(&self.layers)
    }

    pub fn active_layers(&self) -> &[Layer] {
        &self.layers[..self.active_layer_count()]
    }

    /// Whether any active layer blends, which routes draws to the transparent pass.
    pub fn is_transparent(&self) -> bool {
        self.active_layers().iter().any(|layer| layer.mode.is_blended())
    }
}

pub fn active_layer_count(layers: &[Layer]) -> usize {
    layers
        .iter()
        .position(|layer| layer.mode == LayerMode::None)
        .unwrap_or(layers.len())
        .min(LAYER_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_none_truncates() {
        let t = TextureId(0);
        let mat = Material::new(
            "m",
            [
                Layer::new(LayerMode::Plain, t, "a.png"),
                Layer::none(),
                Layer::new(LayerMode::Plain, t, "x.png"),
            ],
        );
        assert_eq!(mat.active_layer_count(), 1);

        let full = Material::new(
            "full",
            [
                Layer::new(LayerMode::Plain, t, "a.png"),
                Layer::new(LayerMode::Detail, t, "d.png"),
                Layer::new(LayerMode::Blend, t, "b.png"),
            ],
        );
        assert_eq!(full.active_layer_count(), LAYER_COUNT);
        assert!(full.is_transparent());
    }

    #[test]
    fn keywords_round_trip_through_display() {
        for mode in [
            LayerMode::None,
            LayerMode::Plain,
            LayerMode::Mask,
            LayerMode::Blend,
            LayerMode::Detail,
            LayerMode::CubeMap,
            LayerMode::PostRender,
        ] {
            assert_eq!(LayerMode::from_keyword(&mode.to_string()), Some(mode));
        }
        assert_eq!(LayerMode::from_keyword("Normal"), Some(LayerMode::Plain));
        assert_eq!(LayerMode::from_keyword("sparkly"), None);
    }
}
