//! Scene graph and hierarchical scene organization.
//!
//! Nodes live in an arena owned by [`Scene`] and refer to each other by
//! [`NodeId`]. Each node stores a transform relative to its parent plus a
//! cached absolute transform and world-space bounding sphere. Moving a node
//! marks it and its ancestors dirty; [`Scene::update_bounding_volume_and_set_not_dirty`]
//! then recomputes the caches top-down from the root.
//!
//! Two traversals run every frame:
//!
//! - [`Scene::update`] advances animations and evaluates switches and LODs
//! - [`Scene::cull`] fills a [`RenderGraph`] with what the camera can see
//!
//! Invalid node ids are programmer errors and panic.

use cgmath::{EuclideanSpace, Point3, Transform as _, Vector3};
use instant::Duration;

use crate::{
    camera::{Camera, Frustum},
    data_structures::{transform::Transform, vertex_buffer::VertexBufferId},
    math::BoundingSphere,
    render::{LightInfo, Pass, RenderGraph, RenderItem, StateSet},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Keyframed relative transforms sampled by an animation node.
#[derive(Clone, Debug, Default)]
pub struct AnimationClip {
    pub name: String,
    pub transforms: Vec<Transform>,
    /// Seconds, ascending, one per transform.
    pub timestamps: Vec<f32>,
}

impl AnimationClip {
    pub fn duration(&self) -> f32 {
        self.timestamps.last().copied().unwrap_or(0.0)
    }

    /// Transform at `time`, clamped to the first and last keyframe.
    pub fn sample(&self, time: f32) -> Option<Transform> {
        let len = self.transforms.len().min(self.timestamps.len());
        if len == 0 {
            return None;
        }
        let next = self.timestamps[..len].partition_point(|&t| t <= time);
        if next == 0 {
            return Some(self.transforms[0]);
        }
        if next >= len {
            return Some(self.transforms[len - 1]);
        }
        let (t0, t1) = (self.timestamps[next - 1], self.timestamps[next]);
        let factor = if t1 > t0 { (time - t0) / (t1 - t0) } else { 0.0 };
        Some(self.transforms[next - 1].interpolate(&self.transforms[next], factor))
    }
}

#[derive(Clone, Debug)]
pub struct ModelNode {
    pub mesh: VertexBufferId,
    pub state: StateSet,
    pub pass: Pass,
    /// Bounding radius of the mesh in its own space.
    pub radius: f32,
}

#[derive(Clone, Debug)]
pub struct LightNode {
    pub colour: [f32; 4],
    pub ambient: [f32; 4],
    /// Distance the light reaches, used for culling.
    pub range: f32,
}

#[derive(Clone, Debug)]
pub struct LodNode {
    /// Child `i` is used while the camera is closer than `ranges[i]`. Finest
    /// child first; beyond the last range the last child is used.
    pub ranges: Vec<f32>,
}

/// One level of a paged LOD, loaded on demand.
#[derive(Clone, Debug)]
pub struct PagedLevel {
    pub source: String,
    pub max_distance: f32,
    pub node: Option<NodeId>,
    /// Set when loading failed, so it is not retried every frame.
    pub failed: bool,
}

/// Child of a paged LOD drawn only while the camera is within `max_distance`.
#[derive(Clone, Debug)]
pub struct Decoration {
    pub node: NodeId,
    pub max_distance: f32,
}

#[derive(Clone, Debug, Default)]
pub struct PagedLodNode {
    /// Coarsest level first. Levels are never unloaded.
    pub levels: Vec<PagedLevel>,
    pub decorations: Vec<Decoration>,
    /// Extent of the tile in its own space. Culling uses it before any level
    /// is loaded.
    pub radius: f32,
}

impl PagedLodNode {
    /// Finest level whose distance band contains `distance`.
    pub fn wanted_level(&self, distance: f32) -> Option<usize> {
        self.levels
            .iter()
            .rposition(|level| distance < level.max_distance)
    }
}

#[derive(Clone, Debug)]
pub struct AnimationNode {
    pub clip: AnimationClip,
    pub time: f32,
    pub looping: bool,
    pub playing: bool,
}

impl AnimationNode {
    pub fn new(clip: AnimationClip, looping: bool) -> Self {
        Self {
            clip,
            time: 0.0,
            looping,
            playing: true,
        }
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Group,
    Model(ModelNode),
    Light(LightNode),
    /// Visits only the child at `active`, or nothing when out of range.
    Switch { active: usize },
    Lod(LodNode),
    PagedLod(PagedLodNode),
    Animation(AnimationNode),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    dirty: bool,
    relative: Transform,
    absolute: Transform,
    bounds: BoundingSphere,
}

impl Node {
    fn new(name: &str, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parent,
            children: Vec::new(),
            dirty: true,
            relative: Transform::default(),
            absolute: Transform::default(),
            bounds: BoundingSphere::default(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn relative_transform(&self) -> &Transform {
        &self.relative
    }

    pub fn absolute_transform(&self) -> &Transform {
        &self.absolute
    }

    pub fn world_position(&self) -> Point3<f32> {
        Point3::from_vec(self.absolute.position)
    }

    pub fn bounds(&self) -> &BoundingSphere {
        &self.bounds
    }

    /// Sphere of the node's own content, without children.
    fn own_bounds(&self) -> BoundingSphere {
        let center = self.world_position();
        match &self.kind {
            NodeKind::Model(model) => {
                BoundingSphere::new(center, model.radius * self.absolute.max_scale())
            }
            NodeKind::Light(light) => BoundingSphere::new(center, light.range),
            NodeKind::PagedLod(paged) => {
                BoundingSphere::new(center, paged.radius * self.absolute.max_scale())
            }
            _ => BoundingSphere::new(center, 0.0),
        }
    }
}

/// Builds the node for one paged LOD level the first time the camera needs it.
pub trait PageLoader {
    /// Creates the level's subtree under `parent` and returns its root.
    fn load_level(&mut self, scene: &mut Scene, parent: NodeId, source: &str)
        -> anyhow::Result<NodeId>;
}

pub struct Scene {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    root: NodeId,
    loader: Option<Box<dyn PageLoader>>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node::new("root", NodeKind::Group, None))],
            free: Vec::new(),
            root: NodeId(0),
            loader: None,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_page_loader(&mut self, loader: Box<dyn PageLoader>) {
        self.loader = Some(loader);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("invalid scene node {id:?}"))
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("invalid scene node {id:?}"))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub fn add_node(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        // validates the parent before anything is allocated
        self.node(parent);
        let node = Node::new(name, kind, Some(parent));
        let id = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };
        self.node_mut(parent).children.push(id);
        self.mark_dirty(parent);
        id
    }

    pub fn add_group(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.add_node(parent, name, NodeKind::Group)
    }

    /// Adds a child of a paged LOD that is only drawn within `max_distance`.
    pub fn add_decoration(
        &mut self,
        paged_lod: NodeId,
        name: &str,
        kind: NodeKind,
        max_distance: f32,
    ) -> NodeId {
        let node = self.add_node(paged_lod, name, kind);
        match &mut self.node_mut(paged_lod).kind {
            NodeKind::PagedLod(paged) => paged.decorations.push(Decoration {
                node,
                max_distance,
            }),
            other => panic!("decorations need a paged LOD parent, got {other:?}"),
        }
        node
    }

    /// Removes `id` and its whole subtree.
    pub fn remove_node(&mut self, id: NodeId) {
        assert!(id != self.root, "the scene root cannot be removed");
        let parent = self.node(id).parent;
        if let Some(parent) = parent {
            let parent_node = self.node_mut(parent);
            parent_node.children.retain(|&child| child != id);
            if let NodeKind::PagedLod(paged) = &mut parent_node.kind {
                paged.decorations.retain(|decoration| decoration.node != id);
                for level in paged.levels.iter_mut().filter(|l| l.node == Some(id)) {
                    level.node = None;
                }
            }
            self.mark_dirty(parent);
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes[next.0].take() {
                stack.extend(node.children);
                self.free.push(next.0);
            }
        }
    }

    pub fn set_relative_transform(&mut self, id: NodeId, transform: Transform) {
        self.node_mut(id).relative = transform;
        self.mark_dirty(id);
    }

    pub fn set_relative_position(&mut self, id: NodeId, position: Vector3<f32>) {
        self.node_mut(id).relative.position = position;
        self.mark_dirty(id);
    }

    pub fn set_relative_rotation(&mut self, id: NodeId, rotation: cgmath::Quaternion<f32>) {
        self.node_mut(id).relative.rotation = rotation;
        self.mark_dirty(id);
    }

    pub fn set_relative_scale(&mut self, id: NodeId, scale: Vector3<f32>) {
        self.node_mut(id).relative.scale = scale;
        self.mark_dirty(id);
    }

    pub fn set_switch(&mut self, id: NodeId, active: usize) {
        match &mut self.node_mut(id).kind {
            NodeKind::Switch { active: current } => *current = active,
            other => panic!("set_switch on a non-switch node {other:?}"),
        }
    }

    /// Marks `id` and its ancestors dirty, stopping at the first ancestor that
    /// already is.
    pub fn mark_dirty(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(next) = current {
            let node = self.node_mut(next);
            if node.dirty {
                break;
            }
            node.dirty = true;
            current = node.parent;
        }
    }

    /// Recomputes absolute transforms and bounding spheres from the root and
    /// clears every dirty flag.
    pub fn update_bounding_volume_and_set_not_dirty(&mut self) {
        let root = self.root;
        self.refresh(root, Transform::default(), false);
    }

    fn refresh(&mut self, id: NodeId, parent_absolute: Transform, parent_moved: bool) {
        let moved = {
            let node = self.node_mut(id);
            let moved = node.dirty || parent_moved;
            if moved {
                node.absolute = &parent_absolute * &node.relative;
            }
            moved
        };
        let (absolute, children) = {
            let node = self.node(id);
            (node.absolute, node.children.clone())
        };
        for &child in &children {
            if moved || self.node(child).dirty {
                self.refresh(child, absolute, moved);
            }
        }
        let node = self.node(id);
        let bounds = children
            .iter()
            .map(|&child| self.node(child).bounds)
            .fold(node.own_bounds(), |acc, child| acc.merge(&child));
        let node = self.node_mut(id);
        node.bounds = bounds;
        node.dirty = false;
    }

    /// Advances animations by `dt`, then refreshes transforms and bounds.
    ///
    /// Switches and LODs only update the child they would draw.
    pub fn update(&mut self, camera: &Camera, dt: Duration) {
        let root = self.root;
        self.update_node(root, camera, dt.as_secs_f32());
        self.update_bounding_volume_and_set_not_dirty();
    }

    fn update_node(&mut self, id: NodeId, camera: &Camera, dt: f32) {
        let sampled = match &mut self.node_mut(id).kind {
            NodeKind::Animation(animation) if animation.playing => {
                animation.time += dt;
                let duration = animation.clip.duration();
                if animation.time > duration {
                    if animation.looping && duration > 0.0 {
                        animation.time %= duration;
                    } else {
                        animation.time = duration;
                        animation.playing = false;
                    }
                }
                animation.clip.sample(animation.time)
            }
            _ => None,
        };
        if let Some(transform) = sampled {
            self.set_relative_transform(id, transform);
        }
        for child in self.visible_children(id, camera) {
            self.update_node(child, camera, dt);
        }
    }

    /// Children a traversal descends into. Paged LOD levels are not loaded here.
    fn visible_children(&self, id: NodeId, camera: &Camera) -> Vec<NodeId> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Model(_) => Vec::new(),
            NodeKind::Switch { active } => {
                node.children.get(*active).copied().into_iter().collect()
            }
            NodeKind::Lod(lod) => {
                let distance = node.bounds.distance_to(camera.eye);
                select_lod_child(&lod.ranges, node.children.len(), distance)
                    .map(|i| node.children[i])
                    .into_iter()
                    .collect()
            }
            NodeKind::PagedLod(paged) => {
                let distance = node.bounds.distance_to(camera.eye);
                paged_visible(paged, distance)
            }
            _ => node.children.clone(),
        }
    }

    /// Fills `graph` with every visible renderable and light.
    ///
    /// Paged LOD levels the camera needs are loaded here through the page
    /// loader. The graph is cleared first.
    pub fn cull(&mut self, camera: &Camera, graph: &mut RenderGraph) {
        graph.clear();
        let frustum = camera.frustum();
        let root = self.root;
        self.cull_node(root, camera, &frustum, graph, false);
    }

    fn cull_node(
        &mut self,
        id: NodeId,
        camera: &Camera,
        frustum: &Frustum,
        graph: &mut RenderGraph,
        animated: bool,
    ) {
        if id != self.root && !frustum.intersects_sphere(&self.node(id).bounds) {
            return;
        }
        if let NodeKind::PagedLod(_) = self.node(id).kind {
            self.ensure_levels_loaded(id, camera);
        }
        let node = self.node(id);
        match &node.kind {
            NodeKind::Model(model) => {
                let pass = match model.pass {
                    Pass::Opaque if animated => Pass::Animated,
                    pass => pass,
                };
                graph.add_renderable(
                    pass,
                    model.state,
                    RenderItem {
                        mesh: model.mesh,
                        transform: node.absolute.to_matrix(),
                        distance: camera.distance_to(node.bounds.center),
                    },
                );
                return;
            }
            NodeKind::Light(light) => graph.add_light(LightInfo {
                position: node.world_position(),
                colour: light.colour,
                ambient: light.ambient,
            }),
            _ => {}
        }
        let animated = animated || matches!(node.kind, NodeKind::Animation(_));
        for child in self.visible_children(id, camera) {
            self.cull_node(child, camera, frustum, graph, animated);
        }
    }

    /// Loads levels `0..=wanted` that are not loaded yet.
    fn ensure_levels_loaded(&mut self, id: NodeId, camera: &Camera) {
        let (wanted, missing) = {
            let node = self.node(id);
            let NodeKind::PagedLod(paged) = &node.kind else {
                return;
            };
            let Some(wanted) = paged.wanted_level(node.bounds.distance_to(camera.eye)) else {
                return;
            };
            let missing: Vec<(usize, String)> = paged.levels[..=wanted]
                .iter()
                .enumerate()
                .filter(|(_, level)| level.node.is_none() && !level.failed)
                .map(|(i, level)| (i, level.source.clone()))
                .collect();
            (wanted, missing)
        };
        if missing.is_empty() {
            return;
        }
        let Some(mut loader) = self.loader.take() else {
            log::warn!("paged LOD {id:?} needs level {wanted} but the scene has no page loader");
            return;
        };
        for (level, source) in missing {
            let loaded = loader.load_level(self, id, &source);
            let node = self.node_mut(id);
            let NodeKind::PagedLod(paged) = &mut node.kind else {
                break;
            };
            match loaded {
                Ok(child) => paged.levels[level].node = Some(child),
                Err(e) => {
                    log::error!("loading paged LOD level {source}: {e:#}");
                    paged.levels[level].failed = true;
                }
            }
        }
        self.loader = Some(loader);
        self.refresh_subtree(id);
    }

    /// Recomputes the caches below `id` from its current absolute transform.
    fn refresh_subtree(&mut self, id: NodeId) {
        let parent_absolute = match self.node(id).parent {
            Some(parent) => self.node(parent).absolute,
            None => Transform::default(),
        };
        self.refresh(id, parent_absolute, true);
        // ancestors keep stale bounds until the next update
        if let Some(parent) = self.node(id).parent {
            self.mark_dirty(parent);
        }
    }

    /// Depth-first ids below `id`, `id` included.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next).children.iter().rev());
        }
        out
    }

    pub fn world_point(&self, id: NodeId, local: Point3<f32>) -> Point3<f32> {
        self.node(id).absolute.to_matrix().transform_point(local)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

fn select_lod_child(ranges: &[f32], children: usize, distance: f32) -> Option<usize> {
    if children == 0 {
        return None;
    }
    let band = ranges
        .iter()
        .position(|&range| distance < range)
        .unwrap_or(children - 1);
    Some(band.min(children - 1))
}

fn paged_visible(paged: &PagedLodNode, distance: f32) -> Vec<NodeId> {
    let level = paged
        .wanted_level(distance)
        .and_then(|wanted| paged.levels[wanted].node);
    level
        .into_iter()
        .chain(
            paged
                .decorations
                .iter()
                .filter(|decoration| distance < decoration.max_distance)
                .map(|decoration| decoration.node),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_bands_pick_finest_first() {
        let ranges = [10.0, 50.0];
        assert_eq!(select_lod_child(&ranges, 3, 5.0), Some(0));
        assert_eq!(select_lod_child(&ranges, 3, 20.0), Some(1));
        assert_eq!(select_lod_child(&ranges, 3, 500.0), Some(2));
        assert_eq!(select_lod_child(&ranges, 0, 5.0), None);
    }

    #[test]
    fn clip_sampling_interpolates_and_clamps() {
        let clip = AnimationClip {
            name: "slide".into(),
            transforms: vec![
                Transform::default(),
                Transform::from(Vector3::new(10.0, 0.0, 0.0)),
            ],
            timestamps: vec![0.0, 2.0],
        };
        assert!((clip.sample(1.0).unwrap().position.x - 5.0).abs() < 1e-5);
        assert_eq!(clip.sample(-1.0).unwrap().position.x, 0.0);
        assert_eq!(clip.sample(9.0).unwrap().position.x, 10.0);
        assert!(AnimationClip::default().sample(0.0).is_none());
    }

    #[test]
    fn wanted_level_is_finest_band_in_range() {
        let level = |d| PagedLevel {
            source: String::new(),
            max_distance: d,
            node: None,
            failed: false,
        };
        let paged = PagedLodNode {
            levels: vec![level(1000.0), level(200.0), level(50.0)],
            decorations: Vec::new(),
            radius: 0.0,
        };
        assert_eq!(paged.wanted_level(10.0), Some(2));
        assert_eq!(paged.wanted_level(100.0), Some(1));
        assert_eq!(paged.wanted_level(500.0), Some(0));
        assert_eq!(paged.wanted_level(5000.0), None);
    }
}
