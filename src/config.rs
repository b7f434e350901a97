//! Engine configuration.
//!
//! Everything has a default so a config file only needs the keys it changes:
//!
//! ```toml
//! search_paths = ["assets", "data"]
//! tick_duration_millis = 50
//!
//! [render]
//! detail_scale = 12.0
//! shaders_enabled = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

/// Settings consumed by the renderer and the registry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Texture-coordinate scale pushed for detail layers.
    pub detail_scale: f32,
    /// RGB scale a cube-reflection unit combines with.
    pub cube_map_rgb_scale: f32,
    /// When false, materials render without their shader program.
    pub shaders_enabled: bool,
    pub ambient_colour: [f32; 4],
    pub clear_colour: [f32; 4],
    /// Edge length an atlas starts packing at.
    pub atlas_size: u32,
    /// Largest edge length an atlas may grow to.
    pub atlas_max_size: u32,
    /// Empty pixels kept around every packed sub-texture.
    pub atlas_padding: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            detail_scale: 16.0,
            cube_map_rgb_scale: 2.0,
            shaders_enabled: true,
            ambient_colour: [0.2, 0.2, 0.2, 1.0],
            clear_colour: [0.0, 0.0, 0.0, 1.0],
            atlas_size: 256,
            atlas_max_size: 4096,
            atlas_padding: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub render: RenderConfig,
    /// Directories searched (in order) when resolving asset names.
    pub search_paths: Vec<PathBuf>,
    /// Period of `GameState::on_tick`.
    pub tick_duration_millis: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            search_paths: vec![PathBuf::from("./"), PathBuf::from("./assets")],
            tick_duration_millis: 100,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            tick_duration_millis = 20

            [render]
            shaders_enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_duration_millis, 20);
        assert!(!config.render.shaders_enabled);
        assert_eq!(config.render.detail_scale, RenderConfig::default().detail_scale);
        assert_eq!(config.search_paths, EngineConfig::default().search_paths);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(EngineConfig::from_toml_str("tick_duration_millis = \"soon\"").is_err());
    }
}
