//! Material definition files.
//!
//! ```toml
//! shader = "water"
//!
//! [[layer]]
//! mode = "plain"
//! texture = "water.png"
//!
//! [[layer]]
//! mode = "cubemap"
//! texture = "sky.png"
//!
//! [[layer]]
//! mode = "mask"
//! texture = "foam.png"
//! atlas = "effects"
//! ```
//!
//! Layers are listed in unit order; missing trailing layers are `none`.

use anyhow::{anyhow, bail};
use serde::Deserialize;

use crate::data_structures::material::{LAYER_COUNT, LayerMode};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaterialFile {
    shader: Option<String>,
    #[serde(default, rename = "layer")]
    layers: Vec<LayerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayerEntry {
    mode: String,
    texture: Option<String>,
    atlas: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayerSpec {
    pub mode: LayerMode,
    pub texture: Option<String>,
    pub atlas: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialSpec {
    pub shader: Option<String>,
    pub layers: Vec<LayerSpec>,
}

pub fn parse(text: &str) -> anyhow::Result<MaterialSpec> {
    let file: MaterialFile = toml::from_str(text)?;
    if file.layers.len() > LAYER_COUNT {
        bail!(
            "{} layers given, a material has at most {LAYER_COUNT}",
            file.layers.len()
        );
    }
    let layers = file
        .layers
        .into_iter()
        .enumerate()
        .map(|(i, entry)| -> anyhow::Result<LayerSpec> {
            let mode = LayerMode::from_keyword(&entry.mode)
                .ok_or_else(|| anyhow!("layer {i}: unknown mode {:?}", entry.mode))?;
            let needs_texture = !matches!(mode, LayerMode::None | LayerMode::PostRender);
            if needs_texture && entry.texture.is_none() {
                bail!("layer {i}: mode {mode} needs a texture");
            }
            Ok(LayerSpec {
                mode,
                texture: entry.texture,
                atlas: entry.atlas,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(MaterialSpec {
        shader: file.shader,
        layers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layers_in_order() {
        let spec = parse(
            r#"
            shader = "water"

            [[layer]]
            mode = "normal"
            texture = "water.png"

            [[layer]]
            mode = "mask"
            texture = "foam.png"
            atlas = "effects"
            "#,
        )
        .unwrap();
        assert_eq!(spec.shader.as_deref(), Some("water"));
        assert_eq!(spec.layers.len(), 2);
        assert_eq!(spec.layers[0].mode, LayerMode::Plain);
        assert_eq!(spec.layers[1].atlas.as_deref(), Some("effects"));
    }

    #[test]
    fn post_render_needs_no_texture() {
        let spec = parse("[[layer]]\nmode = \"postrender\"").unwrap();
        assert_eq!(spec.layers[0].texture, None);
    }

    #[test]
    fn rejects_bad_definitions() {
        let four = "[[layer]]\nmode=\"none\"\n".repeat(4);
        assert!(parse(&four).is_err());
        assert!(parse("[[layer]]\nmode = \"glitter\"\ntexture = \"a.png\"").is_err());
        assert!(parse("[[layer]]\nmode = \"plain\"").is_err());
        assert!(parse("shader = 3").is_err());
    }
}
