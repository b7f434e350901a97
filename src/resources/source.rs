use std::path::{Path, PathBuf};

use anyhow::Context as _;
use image::RgbaImage;

/// Where asset names are resolved and their contents read from.
pub trait AssetSource {
    /// Resolves `name` to the path it will be loaded from, or `None` when no
    /// search location has it.
    fn find_file(&self, name: &str) -> Option<PathBuf>;

    fn load_image(&self, path: &Path) -> anyhow::Result<RgbaImage>;

    fn read_to_string(&self, path: &Path) -> anyhow::Result<String>;
}

/// Searches a list of directories on disk, in order.
#[derive(Clone, Debug)]
pub struct FileSystem {
    search_paths: Vec<PathBuf>,
}

impl FileSystem {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new(vec![PathBuf::from("./"), PathBuf::from("./assets")])
    }
}

impl AssetSource for FileSystem {
    fn find_file(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    fn load_image(&self, path: &Path) -> anyhow::Result<RgbaImage> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("decoding {}", path.display()))?;
        Ok(image.to_rgba8())
    }

    fn read_to_string(&self, path: &Path) -> anyhow::Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}
