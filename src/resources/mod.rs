//! Texture, material, shader and mesh registry.
//!
//! Everything the renderer binds is owned here and handed out by id. Loads
//! are keyed by resolved path, so asking twice for the same file returns the
//! same id. Nothing in here fails outward for a missing or broken asset: the
//! caller gets the procedurally generated not-found texture (or a material
//! using it) and the problem is logged.
//!
//! Pixels, mesh data and shader sources are retained so
//! [`Registry::reload_textures`] can rebuild every GPU object after the
//! graphics context was lost.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use image::RgbaImage;

use crate::{
    api::{GpuProgram, GpuTexture, GraphicsApi, ShaderSource, TextureImage},
    config::RenderConfig,
    data_structures::{
        atlas::{AtlasId, AtlasPhase, AtlasRegion, TextureAtlas},
        material::{LAYER_COUNT, Layer, LayerMode, Material, MaterialId},
        shader::{Shader, ShaderId},
        texture::{Texture, TextureData, TextureId, checker_image},
        vertex_buffer::{MeshData, VertexBuffer, VertexBufferId},
    },
    error::RenderError,
};

pub mod material_file;
pub mod source;

pub use source::{AssetSource, FileSystem};

const NOT_FOUND_NAME: &str = "<not found>";
const NOT_FOUND_CUBE_NAME: &str = "<not found cube>";
const NOT_FOUND_SIZE: u32 = 64;
const NOT_FOUND_CELL: u32 = 8;
const CUBE_FACE_SUFFIXES: [&str; 6] = ["posx", "negx", "posy", "negy", "posz", "negz"];

/// Outcome of [`Registry::reload_textures`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReloadReport {
    pub textures: usize,
    pub atlases: usize,
    pub shaders: usize,
    pub vertex_buffers: usize,
    /// Names of the assets that could not be recreated; they now draw with
    /// their fallback.
    pub failures: Vec<String>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Registry {
    source: Box<dyn AssetSource>,
    config: RenderConfig,
    textures: Vec<Texture>,
    texture_keys: HashMap<PathBuf, TextureId>,
    atlas_members: HashMap<(AtlasId, PathBuf), TextureId>,
    atlases: Vec<TextureAtlas>,
    atlas_names: HashMap<String, AtlasId>,
    materials: Vec<Material>,
    material_keys: HashMap<PathBuf, MaterialId>,
    shaders: Vec<Shader>,
    shader_names: HashMap<String, ShaderId>,
    vertex_buffers: Vec<VertexBuffer>,
    vertex_buffer_names: HashMap<String, VertexBufferId>,
    not_found_texture: TextureId,
    not_found_cube: Option<TextureId>,
    not_found_material: MaterialId,
    load_count: usize,
}

impl Registry {
    /// Creates the registry together with its fallback texture and material.
    pub fn new(
        source: Box<dyn AssetSource>,
        config: RenderConfig,
        api: &mut dyn GraphicsApi,
    ) -> Self {
        let mut registry = Self {
            source,
            config,
            textures: Vec::new(),
            texture_keys: HashMap::new(),
            atlas_members: HashMap::new(),
            atlases: Vec::new(),
            atlas_names: HashMap::new(),
            materials: Vec::new(),
            material_keys: HashMap::new(),
            shaders: Vec::new(),
            shader_names: HashMap::new(),
            vertex_buffers: Vec::new(),
            vertex_buffer_names: HashMap::new(),
            not_found_texture: TextureId(0),
            not_found_cube: None,
            not_found_material: MaterialId(0),
            load_count: 0,
        };
        let image = TextureImage::flat(checker_image(NOT_FOUND_SIZE, NOT_FOUND_CELL));
        registry.not_found_texture =
            registry.insert_image(api, NOT_FOUND_NAME, PathBuf::from(NOT_FOUND_NAME), image);
        let layers = [
            Layer::new(LayerMode::Plain, registry.not_found_texture, NOT_FOUND_NAME),
            Layer::none(),
            Layer::none(),
        ];
        registry.not_found_material =
            registry.insert_material(Material::new(NOT_FOUND_NAME, layers));
        registry
    }

    pub fn source(&self) -> &dyn AssetSource {
        self.source.as_ref()
    }

    /// Texture uploads performed so far, reloads included.
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    pub fn not_found_texture(&self) -> TextureId {
        self.not_found_texture
    }

    pub fn not_found_material(&self) -> MaterialId {
        self.not_found_material
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    pub fn textures(&self) -> impl Iterator<Item = (TextureId, &Texture)> {
        self.textures
            .iter()
            .enumerate()
            .map(|(i, texture)| (TextureId(i), texture))
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn find_material(&self, name: &str) -> Option<MaterialId> {
        self.materials
            .iter()
            .position(|material| material.name == name)
            .map(MaterialId)
    }

    pub fn atlas(&self, id: AtlasId) -> Option<&TextureAtlas> {
        self.atlases.get(id.0)
    }

    pub fn find_atlas(&self, name: &str) -> Option<AtlasId> {
        self.atlas_names.get(name).copied()
    }

    pub fn shader(&self, id: ShaderId) -> Option<&Shader> {
        self.shaders.get(id.0)
    }

    pub fn shader_program(&self, id: ShaderId) -> Option<GpuProgram> {
        self.shader(id).and_then(|shader| shader.program)
    }

    pub fn vertex_buffer(&self, id: VertexBufferId) -> Option<&VertexBuffer> {
        self.vertex_buffers.get(id.0)
    }

    /// GPU handle to bind for `id`: the atlas texture for atlas members, and
    /// the not-found texture when the real one has no GPU object.
    pub fn texture_handle(&self, id: TextureId) -> Option<GpuTexture> {
        let own = self.texture(id).and_then(|texture| match &texture.data {
            TextureData::Image(_) => texture.gpu,
            TextureData::Atlas { atlas, key } => self
                .atlas(*atlas)
                .filter(|atlas| atlas.region(key).is_some())
                .and_then(|atlas| atlas.gpu),
        });
        own.or_else(|| self.texture(self.not_found_texture).and_then(|t| t.gpu))
    }

    /// Region of the packed atlas that [`texture_handle`](Self::texture_handle)
    /// binds for `id`, or `None` when `id` is bound as a whole image.
    pub fn atlas_region(&self, id: TextureId) -> Option<&AtlasRegion> {
        let TextureData::Atlas { atlas, key } = &self.texture(id)?.data else {
            return None;
        };
        self.atlas(*atlas)
            .filter(|atlas| atlas.gpu.is_some())
            .and_then(|atlas| atlas.region(key))
    }

    /// Loads (or returns the already loaded) 2D texture called `name`.
    pub fn add_texture(&mut self, api: &mut dyn GraphicsApi, name: &str) -> TextureId {
        let Some(path) = self.source.find_file(name) else {
            log::error!("texture {name} not found");
            return self.not_found_texture;
        };
        if let Some(&id) = self.texture_keys.get(&path) {
            return id;
        }
        match self.source.load_image(&path) {
            Ok(image) => self.insert_image(api, name, path, TextureImage::flat(image)),
            Err(e) => {
                log::error!("loading texture {name}: {e:#}");
                self.not_found_texture
            }
        }
    }

    /// Loads a cube map from `stem_posx.ext`, `stem_negx.ext` and the other
    /// faces. Falls back to `name` itself on all six faces, then to the
    /// not-found image.
    pub fn add_cube_map(&mut self, api: &mut dyn GraphicsApi, name: &str) -> TextureId {
        let face_names = cube_face_names(name);
        let face_paths: Option<Vec<PathBuf>> =
            face_names.iter().map(|face| self.source.find_file(face)).collect();

        if let Some(paths) = face_paths {
            let key = cube_key(&paths[0]);
            if let Some(&id) = self.texture_keys.get(&key) {
                return id;
            }
            match self.load_faces(&paths) {
                Ok(faces) => return self.insert_image(api, name, key, TextureImage::cube(faces)),
                Err(e) => log::error!("loading cube map {name}: {e:#}"),
            }
        }

        if let Some(path) = self.source.find_file(name) {
            let key = cube_key(&path);
            if let Some(&id) = self.texture_keys.get(&key) {
                return id;
            }
            match self.source.load_image(&path) {
                Ok(image) => {
                    log::warn!(
                        "cube map {name} has no separate faces, using one image for all six"
                    );
                    let faces = std::array::from_fn(|_| image.clone());
                    return self.insert_image(api, name, key, TextureImage::cube(faces));
                }
                Err(e) => log::error!("loading cube map {name}: {e:#}"),
            }
        } else {
            log::error!("cube map {name} not found");
        }
        self.not_found_cube(api)
    }

    fn load_faces(&self, paths: &[PathBuf]) -> anyhow::Result<[RgbaImage; 6]> {
        let faces = paths
            .iter()
            .map(|path| self.source.load_image(path))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let size = faces[0].dimensions();
        if faces.iter().any(|face| face.dimensions() != size) {
            anyhow::bail!("cube faces differ in size");
        }
        faces
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected six cube faces"))
    }

    fn not_found_cube(&mut self, api: &mut dyn GraphicsApi) -> TextureId {
        if let Some(id) = self.not_found_cube {
            return id;
        }
        let checker = checker_image(NOT_FOUND_SIZE, NOT_FOUND_CELL);
        let image = TextureImage::cube(std::array::from_fn(|_| checker.clone()));
        let key = PathBuf::from(NOT_FOUND_CUBE_NAME);
        let id = self.insert_image(api, NOT_FOUND_CUBE_NAME, key, image);
        self.not_found_cube = Some(id);
        id
    }

    fn insert_image(
        &mut self,
        api: &mut dyn GraphicsApi,
        name: &str,
        key: PathBuf,
        image: TextureImage,
    ) -> TextureId {
        let (width, height) = image.dimensions();
        let gpu = self.upload(api, name, &image);
        let id = TextureId(self.textures.len());
        self.textures.push(Texture {
            name: name.to_string(),
            path: key.clone(),
            width,
            height,
            data: TextureData::Image(image),
            gpu,
        });
        self.texture_keys.insert(key, id);
        id
    }

    fn upload(
        &mut self,
        api: &mut dyn GraphicsApi,
        name: &str,
        image: &TextureImage,
    ) -> Option<GpuTexture> {
        match api.create_texture(name, image) {
            Ok(gpu) => {
                self.load_count += 1;
                Some(gpu)
            }
            Err(e) => {
                log::error!("uploading texture {name}: {e:#}");
                None
            }
        }
    }

    /// Starts (or restarts) collecting textures for the atlas called `name`.
    ///
    /// Restarting keeps the images already collected; they are packed again
    /// together with the new ones when loading ends.
    pub fn begin_loading_textures(&mut self, name: &str) -> AtlasId {
        let id = match self.atlas_names.get(name) {
            Some(&id) => id,
            None => {
                let id = AtlasId(self.atlases.len());
                self.atlases.push(TextureAtlas::new(name));
                self.atlas_names.insert(name.to_string(), id);
                id
            }
        };
        self.atlases[id.0].phase = AtlasPhase::Loading;
        id
    }

    /// Adds `name` to an atlas that is currently loading.
    pub fn add_texture_to_atlas(
        &mut self,
        name: &str,
        atlas: AtlasId,
    ) -> Result<TextureId, RenderError> {
        let phase = self
            .atlas(atlas)
            .map(|a| a.phase)
            .ok_or(RenderError::UnknownAtlas(atlas))?;
        if phase != AtlasPhase::Loading {
            return Err(RenderError::AtlasNotLoading(atlas));
        }
        let Some(path) = self.source.find_file(name) else {
            log::error!("texture {name} not found");
            return Ok(self.not_found_texture);
        };
        if let Some(&id) = self.atlas_members.get(&(atlas, path.clone())) {
            return Ok(id);
        }
        let image = match self.source.load_image(&path) {
            Ok(image) => image,
            Err(e) => {
                log::error!("loading texture {name}: {e:#}");
                return Ok(self.not_found_texture);
            }
        };
        let key = path.to_string_lossy().into_owned();
        let (width, height) = image.dimensions();
        self.atlases[atlas.0].insert(&key, image);
        let id = TextureId(self.textures.len());
        self.textures.push(Texture {
            name: name.to_string(),
            path: path.clone(),
            width,
            height,
            data: TextureData::Atlas { atlas, key },
            gpu: None,
        });
        self.atlas_members.insert((atlas, path), id);
        Ok(id)
    }

    /// Packs and uploads the atlas. Members of an atlas that failed to pack
    /// or upload draw with the not-found texture.
    pub fn end_loading_textures(
        &mut self,
        api: &mut dyn GraphicsApi,
        atlas: AtlasId,
    ) -> Result<(), RenderError> {
        let phase = self
            .atlas(atlas)
            .map(|a| a.phase)
            .ok_or(RenderError::UnknownAtlas(atlas))?;
        if phase != AtlasPhase::Loading {
            return Err(RenderError::AtlasNotLoading(atlas));
        }
        let (size, max_size, padding) = (
            self.config.atlas_size,
            self.config.atlas_max_size,
            self.config.atlas_padding,
        );
        let entry = &mut self.atlases[atlas.0];
        entry.phase = AtlasPhase::Ended;
        if let Some(old) = entry.gpu.take() {
            api.destroy_texture(old);
        }
        if let Err(e) = entry.pack(size, max_size, padding) {
            log::error!("packing atlas {}: {e:#}", entry.name);
            entry.regions.clear();
            entry.image = None;
            return Ok(());
        }
        self.upload_atlas(api, atlas);
        Ok(())
    }

    fn upload_atlas(&mut self, api: &mut dyn GraphicsApi, atlas: AtlasId) -> bool {
        let entry = &self.atlases[atlas.0];
        let Some(image) = entry.image.clone() else {
            return false;
        };
        let name = format!("atlas {}", entry.name);
        let gpu = self.upload(api, &name, &TextureImage::flat(image));
        self.atlases[atlas.0].gpu = gpu;
        gpu.is_some()
    }

    /// Loads (or returns the already loaded) material definition `name`.
    ///
    /// Any problem with the file yields the not-found material. Problems with
    /// single textures only substitute that layer's texture.
    pub fn add_material(&mut self, api: &mut dyn GraphicsApi, name: &str) -> MaterialId {
        let Some(path) = self.source.find_file(name) else {
            log::error!("material {name} not found");
            return self.not_found_material;
        };
        if let Some(&id) = self.material_keys.get(&path) {
            return id;
        }
        let spec = match self
            .source
            .read_to_string(&path)
            .and_then(|text| material_file::parse(&text))
        {
            Ok(spec) => spec,
            Err(e) => {
                log::error!("material {name}: {e:#}");
                return self.not_found_material;
            }
        };

        let mut layers: [Layer; LAYER_COUNT] = Default::default();
        for (slot, layer_spec) in layers.iter_mut().zip(&spec.layers) {
            *slot = self.resolve_layer(api, name, layer_spec);
        }
        let mut material = Material::new(name, layers);
        material.shader = spec
            .shader
            .as_deref()
            .and_then(|shader| self.add_shader(api, shader));

        let id = self.insert_material(material);
        self.material_keys.insert(path, id);
        id
    }

    fn resolve_layer(
        &mut self,
        api: &mut dyn GraphicsApi,
        material: &str,
        spec: &material_file::LayerSpec,
    ) -> Layer {
        let mut layer = Layer {
            mode: spec.mode,
            texture: None,
            filename: spec.texture.clone().unwrap_or_default(),
            atlas: None,
        };
        let Some(texture) = spec.texture.as_deref() else {
            return layer;
        };
        layer.texture = Some(match (spec.mode, spec.atlas.as_deref()) {
            (LayerMode::None, _) => return Layer::none(),
            (LayerMode::CubeMap, _) => self.add_cube_map(api, texture),
            (_, Some(atlas_name)) => match self.find_atlas(atlas_name) {
                Some(atlas) => match self.add_texture_to_atlas(texture, atlas) {
                    Ok(id) => {
                        layer.atlas = Some(atlas);
                        id
                    }
                    Err(e) => {
                        log::warn!("material {material}: {e}, loading {texture} directly");
                        self.add_texture(api, texture)
                    }
                },
                None => {
                    log::warn!(
                        "material {material}: atlas {atlas_name} does not exist, \
                         loading {texture} directly"
                    );
                    self.add_texture(api, texture)
                }
            },
            _ => self.add_texture(api, texture),
        });
        layer
    }

    /// Registers a material built in code. Its name does not take part in
    /// file deduplication.
    pub fn insert_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len());
        self.materials.push(material);
        id
    }

    /// Loads `name.vert` and `name.frag` and links them. Returns `None` when
    /// the sources cannot be read; a program that fails to link is kept so a
    /// later reload can retry it.
    pub fn add_shader(&mut self, api: &mut dyn GraphicsApi, name: &str) -> Option<ShaderId> {
        if let Some(&id) = self.shader_names.get(name) {
            return Some(id);
        }
        let source = match self.read_shader_source(name) {
            Ok(source) => source,
            Err(e) => {
                log::error!("shader {name}: {e:#}");
                return None;
            }
        };
        let program = match api.create_program(&source) {
            Ok(program) => Some(program),
            Err(e) => {
                log::error!("linking shader {name}: {e:#}");
                None
            }
        };
        let id = ShaderId(self.shaders.len());
        self.shaders.push(Shader { source, program });
        self.shader_names.insert(name.to_string(), id);
        Some(id)
    }

    fn read_shader_source(&self, name: &str) -> anyhow::Result<ShaderSource> {
        let read = |ext: &str| -> anyhow::Result<String> {
            let file = format!("{name}.{ext}");
            let path = self
                .source
                .find_file(&file)
                .ok_or_else(|| anyhow::anyhow!("{file} not found"))?;
            self.source.read_to_string(&path)
        };
        Ok(ShaderSource {
            name: name.to_string(),
            vertex: read("vert")?,
            fragment: read("frag")?,
        })
    }

    /// Registers mesh data under `name` and uploads it. A second call with a
    /// known name returns the existing buffer.
    pub fn add_vertex_buffer(
        &mut self,
        api: &mut dyn GraphicsApi,
        name: &str,
        mesh: MeshData,
    ) -> VertexBufferId {
        if let Some(&id) = self.vertex_buffer_names.get(name) {
            return id;
        }
        let mut buffer = VertexBuffer::new(name, mesh);
        let mesh = &buffer.mesh;
        buffer.gpu = match api.create_buffer(name, &mesh.vertices, &mesh.indices) {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                log::error!("uploading vertex buffer {name}: {e:#}");
                None
            }
        };
        let id = VertexBufferId(self.vertex_buffers.len());
        self.vertex_buffers.push(buffer);
        self.vertex_buffer_names.insert(name.to_string(), id);
        id
    }

    /// Recreates every GPU object from the retained CPU data.
    ///
    /// Ids stay valid. Each asset is handled on its own: a failure is logged
    /// and reported, the asset falls back, and the pass carries on.
    pub fn reload_textures(&mut self, api: &mut dyn GraphicsApi) -> ReloadReport {
        let mut report = ReloadReport::default();

        for i in 0..self.textures.len() {
            let TextureData::Image(image) = &self.textures[i].data else {
                continue;
            };
            let image = image.clone();
            let name = self.textures[i].name.clone();
            if let Some(old) = self.textures[i].gpu.take() {
                api.destroy_texture(old);
            }
            let gpu = self.upload(api, &name, &image);
            if gpu.is_none() {
                report.failures.push(name);
            }
            self.textures[i].gpu = gpu;
            report.textures += 1;
        }

        for i in 0..self.atlases.len() {
            if let Some(old) = self.atlases[i].gpu.take() {
                api.destroy_texture(old);
            }
            if self.atlases[i].image.is_none() {
                continue;
            }
            if !self.upload_atlas(api, AtlasId(i)) {
                report.failures.push(format!("atlas {}", self.atlases[i].name));
            }
            report.atlases += 1;
        }

        for shader in &mut self.shaders {
            if let Some(old) = shader.program.take() {
                api.destroy_program(old);
            }
            match api.create_program(&shader.source) {
                Ok(program) => shader.program = Some(program),
                Err(e) => {
                    log::error!("relinking shader {}: {e:#}", shader.name());
                    report.failures.push(shader.name().to_string());
                }
            }
            report.shaders += 1;
        }

        for buffer in &mut self.vertex_buffers {
            if let Some(old) = buffer.gpu.take() {
                api.destroy_buffer(old);
            }
            match api.create_buffer(&buffer.name, &buffer.mesh.vertices, &buffer.mesh.indices) {
                Ok(gpu) => buffer.gpu = Some(gpu),
                Err(e) => {
                    log::error!("re-uploading vertex buffer {}: {e:#}", buffer.name);
                    report.failures.push(buffer.name.clone());
                }
            }
            report.vertex_buffers += 1;
        }

        if !report.is_clean() {
            log::warn!("reload finished with {} failures", report.failures.len());
        }
        report
    }
}

/// `sky.png` becomes `sky_posx.png`, `sky_negx.png`, ...
fn cube_face_names(name: &str) -> [String; 6] {
    let path = Path::new(name);
    let stem = path.with_extension("");
    let stem = stem.to_string_lossy();
    let ext = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    CUBE_FACE_SUFFIXES.map(|suffix| format!("{stem}_{suffix}{ext}"))
}

/// Keeps cube maps apart from the same files loaded as 2D textures.
fn cube_key(path: &Path) -> PathBuf {
    let mut key = path.as_os_str().to_owned();
    key.push("#cube");
    PathBuf::from(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_keep_directory_and_extension() {
        let names = cube_face_names("env/sky.png");
        assert_eq!(names[0], "env/sky_posx.png");
        assert_eq!(names[5], "env/sky_negz.png");
        assert_eq!(cube_face_names("sky")[1], "sky_negx");
    }
}
