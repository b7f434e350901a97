//! Texture records owned by the registry.
//!
//! A [`Texture`] keeps its decoded pixels next to the GPU handle so it can be
//! re-uploaded after the context is lost. Textures packed into an atlas carry
//! no pixels of their own: they point at the atlas and their region in it.

use std::path::PathBuf;

use image::{Rgba, RgbaImage};

use crate::{
    api::{GpuTexture, TextureImage, TextureTarget},
    data_structures::atlas::AtlasId,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

#[derive(Clone, Debug)]
pub enum TextureData {
    /// Stand-alone texture with its own GPU object.
    Image(TextureImage),
    /// Sub-texture of an atlas, looked up by `key` once the atlas is packed.
    Atlas { atlas: AtlasId, key: String },
}

#[derive(Clone, Debug)]
pub struct Texture {
    /// Name the texture was requested with.
    pub name: String,
    /// Resolved path, the deduplication key. Procedural textures use their name.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub data: TextureData,
    pub gpu: Option<GpuTexture>,
}

impl Texture {
    pub fn target(&self) -> TextureTarget {
        match &self.data {
            TextureData::Image(image) => image.target,
            TextureData::Atlas { .. } => TextureTarget::Flat,
        }
    }

    pub fn atlas(&self) -> Option<AtlasId> {
        match &self.data {
            TextureData::Atlas { atlas, .. } => Some(*atlas),
            TextureData::Image(_) => None,
        }
    }
}

/// Magenta and black checker used wherever an image could not be found.
pub fn checker_image(size: u32, cell: u32) -> RgbaImage {
    let cell = cell.max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Rgba([255, 0, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checker_alternates_cells() {
        let image = checker_image(8, 4);
        assert_eq!(image.get_pixel(0, 0), &Rgba([255, 0, 255, 255]));
        assert_eq!(image.get_pixel(4, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(image.get_pixel(4, 4), &Rgba([255, 0, 255, 255]));
    }
}
