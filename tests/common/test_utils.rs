use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, anyhow};
use image::{ImageFormat, Rgba, RgbaImage};
use layer_ngin::{
    api::recording::RecordingApi,
    config::{EngineConfig, RenderConfig},
    context::Context,
    renderer::Renderer,
    resources::{AssetSource, Registry},
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Asset source backed by a map of file names to bytes.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(name.to_string(), bytes);
        self
    }

    pub fn with_text(self, name: &str, text: &str) -> Self {
        self.with_bytes(name, text.as_bytes().to_vec())
    }

    /// Adds a solid `size`x`size` PNG.
    pub fn with_image(self, name: &str, size: u32, colour: [u8; 4]) -> Self {
        self.with_bytes(name, png(size, size, colour))
    }

    /// Adds the six `stem_posx.png` ... `stem_negz.png` faces of a cube map.
    pub fn with_cube_faces(mut self, stem: &str, size: u32) -> Self {
        for (i, suffix) in ["posx", "negx", "posy", "negy", "posz", "negz"]
            .iter()
            .enumerate()
        {
            let shade = 40 * i as u8;
            self = self.with_image(&format!("{stem}_{suffix}.png"), size, [shade, 0, 0, 255]);
        }
        self
    }

    pub fn boxed(self) -> Box<dyn AssetSource> {
        Box::new(self)
    }
}

impl AssetSource for MemorySource {
    fn find_file(&self, name: &str) -> Option<PathBuf> {
        self.files.contains_key(name).then(|| PathBuf::from(name))
    }

    fn load_image(&self, path: &Path) -> anyhow::Result<RgbaImage> {
        let bytes = self.bytes(path)?;
        let image = image::load_from_memory(bytes)
            .with_context(|| format!("decoding {}", path.display()))?;
        Ok(image.to_rgba8())
    }

    fn read_to_string(&self, path: &Path) -> anyhow::Result<String> {
        Ok(String::from_utf8(self.bytes(path)?.to_vec())?)
    }
}

impl MemorySource {
    fn bytes(&self, path: &Path) -> anyhow::Result<&[u8]> {
        self.files
            .get(path.to_string_lossy().as_ref())
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("{} does not exist", path.display()))
    }
}

pub fn png(width: u32, height: u32, colour: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(colour));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Material file with one `[[layer]]` per `(mode, texture)` pair.
pub fn material_toml(layers: &[(&str, &str)]) -> String {
    layers
        .iter()
        .map(|(mode, texture)| format!("[[layer]]\nmode = \"{mode}\"\ntexture = \"{texture}\"\n"))
        .collect()
}

/// Images and materials most tests draw with.
pub fn standard_assets() -> MemorySource {
    MemorySource::new()
        .with_image("a.png", 4, [255, 0, 0, 255])
        .with_image("b.png", 4, [0, 255, 0, 255])
        .with_image("c.png", 8, [0, 0, 255, 255])
        .with_cube_faces("sky", 4)
        .with_text("plain_a.mat", &material_toml(&[("plain", "a.png")]))
        .with_text("plain_b.mat", &material_toml(&[("plain", "b.png")]))
        .with_text(
            "mask_detail.mat",
            &material_toml(&[("mask", "a.png"), ("detail", "c.png")]),
        )
        .with_text(
            "chrome.mat",
            &material_toml(&[("plain", "a.png"), ("cubemap", "sky.png")]),
        )
        .with_text("glass.mat", &material_toml(&[("blend", "b.png")]))
}

pub fn renderer_and_registry(source: MemorySource) -> (Renderer<RecordingApi>, Registry) {
    init_logger();
    let config = RenderConfig::default();
    let mut renderer = Renderer::new(RecordingApi::new(), config.clone()).unwrap();
    let registry = Registry::new(source.boxed(), config, renderer.api_mut());
    (renderer, registry)
}

pub fn context(source: MemorySource) -> Context<RecordingApi> {
    init_logger();
    Context::with_source(RecordingApi::new(), EngineConfig::default(), source.boxed()).unwrap()
}
