//! Texture atlases.
//!
//! Images are collected while the atlas is [`AtlasPhase::Loading`] and packed
//! into one image when loading ends. Packing uses shelves sorted by height; when
//! the images do not fit, the atlas edge doubles until `max_size` is reached.
//! The images are retained, so beginning to load again repacks everything.

use std::collections::HashMap;

use anyhow::bail;
use cgmath::{Matrix4, Vector3};
use image::{GenericImage, RgbaImage};

use crate::api::GpuTexture;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtlasId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AtlasPhase {
    Idle,
    Loading,
    Ended,
}

/// Where a sub-texture ended up, in pixels and in atlas UV space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AtlasRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub uv_min: [f32; 2],
    pub uv_max: [f32; 2],
}

impl AtlasRegion {
    fn new(x: u32, y: u32, width: u32, height: u32, atlas_size: u32) -> Self {
        let size = atlas_size as f32;
        Self {
            x,
            y,
            width,
            height,
            uv_min: [x as f32 / size, y as f32 / size],
            uv_max: [(x + width) as f32 / size, (y + height) as f32 / size],
        }
    }

    /// Maps a sub-texture coordinate in `[0, 1]` into the atlas.
    pub fn map_uv(&self, uv: [f32; 2]) -> [f32; 2] {
        [
            self.uv_min[0] + uv[0] * (self.uv_max[0] - self.uv_min[0]),
            self.uv_min[1] + uv[1] * (self.uv_max[1] - self.uv_min[1]),
        ]
    }

    /// Texture matrix doing [`map_uv`](Self::map_uv) on the sampler side.
    pub fn uv_matrix(&self) -> Matrix4<f32> {
        let [u0, v0] = self.uv_min;
        let [u1, v1] = self.uv_max;
        Matrix4::from_translation(Vector3::new(u0, v0, 0.0))
            * Matrix4::from_nonuniform_scale(u1 - u0, v1 - v0, 1.0)
    }
}

#[derive(Debug)]
pub struct TextureAtlas {
    pub name: String,
    pub phase: AtlasPhase,
    /// Member images in insertion order, keyed by resolved path.
    pub images: Vec<(String, RgbaImage)>,
    pub regions: HashMap<String, AtlasRegion>,
    /// Packed result, present once loading has ended successfully.
    pub image: Option<RgbaImage>,
    pub gpu: Option<GpuTexture>,
}

impl TextureAtlas {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: AtlasPhase::Idle,
            images: Vec::new(),
            regions: HashMap::new(),
            image: None,
            gpu: None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.images.iter().any(|(k, _)| k == key)
    }

    pub fn insert(&mut self, key: &str, image: RgbaImage) {
        if !self.contains(key) {
            self.images.push((key.to_string(), image));
        }
    }

    pub fn region(&self, key: &str) -> Option<&AtlasRegion> {
        self.regions.get(key)
    }

    /// Packs every member into a fresh atlas image.
    pub fn pack(&mut self, start_size: u32, max_size: u32, padding: u32) -> anyhow::Result<()> {
        let sizes: Vec<(u32, u32)> = self.images.iter().map(|(_, img)| img.dimensions()).collect();
        let (size, placements) = pack_shelves(&sizes, start_size, max_size, padding)?;
        let mut atlas = RgbaImage::new(size, size);
        self.regions.clear();
        for ((key, img), (x, y)) in self.images.iter().zip(placements) {
            atlas.copy_from(img, x, y)?;
            let (w, h) = img.dimensions();
            self.regions
                .insert(key.clone(), AtlasRegion::new(x, y, w, h, size));
        }
        self.image = Some(atlas);
        Ok(())
    }
}

/// Places `sizes` on shelves, returning the atlas edge used and the top-left
/// corner of every image (padding already applied), in input order.
pub fn pack_shelves(
    sizes: &[(u32, u32)],
    start_size: u32,
    max_size: u32,
    padding: u32,
) -> anyhow::Result<(u32, Vec<(u32, u32)>)> {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    // tallest first keeps shelves tight
    order.sort_by(|&a, &b| sizes[b].1.cmp(&sizes[a].1).then(sizes[b].0.cmp(&sizes[a].0)));

    let mut size = start_size.max(1);
    loop {
        if let Some(placements) = try_pack(sizes, &order, size, padding) {
            return Ok((size, placements));
        }
        if size >= max_size {
            bail!(
                "{} images do not fit into a {max_size}x{max_size} atlas",
                sizes.len()
            );
        }
        size = (size * 2).min(max_size);
    }
}

fn try_pack(
    sizes: &[(u32, u32)],
    order: &[usize],
    size: u32,
    padding: u32,
) -> Option<Vec<(u32, u32)>> {
    let mut placements = vec![(0, 0); sizes.len()];
    let (mut cursor_x, mut shelf_y, mut shelf_height) = (0u32, 0u32, 0u32);
    for &i in order {
        let (w, h) = sizes[i];
        let (pw, ph) = (w + 2 * padding, h + 2 * padding);
        if pw > size || ph > size {
            return None;
        }
        if cursor_x + pw > size {
            shelf_y += shelf_height;
            cursor_x = 0;
            shelf_height = 0;
        }
        if shelf_y + ph > size {
            return None;
        }
        placements[i] = (cursor_x + padding, shelf_y + padding);
        cursor_x += pw;
        shelf_height = shelf_height.max(ph);
    }
    Some(placements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlaps(a: (u32, u32, u32, u32), b: (u32, u32, u32, u32)) -> bool {
        a.0 < b.0 + b.2 && b.0 < a.0 + a.2 && a.1 < b.1 + b.3 && b.1 < a.1 + a.3
    }

    #[test]
    fn packs_without_overlap() {
        let sizes = [(30, 10), (20, 20), (10, 30), (16, 16)];
        let (size, placed) = pack_shelves(&sizes, 64, 64, 1).unwrap();
        assert_eq!(size, 64);
        let rects: Vec<_> = sizes
            .iter()
            .zip(&placed)
            .map(|(&(w, h), &(x, y))| (x, y, w, h))
            .collect();
        for (i, a) in rects.iter().enumerate() {
            assert!(a.0 >= 1 && a.1 >= 1);
            assert!(a.0 + a.2 < 64 && a.1 + a.3 < 64);
            for b in &rects[i + 1..] {
                assert!(!overlaps(*a, *b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn grows_until_everything_fits() {
        let sizes = [(40, 40); 4];
        let (size, _) = pack_shelves(&sizes, 32, 256, 0).unwrap();
        assert_eq!(size, 128);
    }

    #[test]
    fn gives_up_past_max_size() {
        assert!(pack_shelves(&[(300, 10)], 64, 256, 0).is_err());
    }

    #[test]
    fn regions_map_into_atlas_uvs() {
        let mut atlas = TextureAtlas::new("hud");
        atlas.insert("a.png", RgbaImage::new(16, 16));
        atlas.insert("b.png", RgbaImage::new(16, 16));
        atlas.insert("a.png", RgbaImage::new(99, 99));
        atlas.pack(32, 32, 0).unwrap();
        assert_eq!(atlas.images.len(), 2);
        let b = atlas.region("b.png").unwrap();
        assert_eq!((b.x, b.y), (16, 0));
        assert_eq!(b.map_uv([0.0, 1.0]), [0.5, 0.5]);
        let corner = b.uv_matrix() * cgmath::Vector4::new(1.0, 1.0, 0.0, 1.0);
        assert_eq!((corner.x, corner.y), (1.0, 0.5));
        assert_eq!(atlas.image.as_ref().unwrap().dimensions(), (32, 32));
    }
}
