use std::{cell::RefCell, rc::Rc};

use anyhow::bail;
use cgmath::{Point3, Vector3};
use layer_ngin::{
    Duration,
    camera::Camera,
    data_structures::{
        scene_graph::{
            AnimationClip, AnimationNode, LightNode, LodNode, ModelNode, NodeId, NodeKind,
            PageLoader, PagedLevel, PagedLodNode, Scene,
        },
        transform::Transform,
        vertex_buffer::VertexBufferId,
    },
    render::{Pass, RenderGraph, StateSet},
};

use crate::common::test_utils::init_logger;

mod common;

fn model(mesh: usize) -> NodeKind {
    NodeKind::Model(ModelNode {
        mesh: VertexBufferId(mesh),
        state: StateSet::default(),
        pass: Pass::Opaque,
        radius: 1.0,
    })
}

fn looking_at_origin_from(distance: f32) -> Camera {
    Camera::new(Point3::new(0.0, -distance, 0.0), Point3::new(0.0, 0.0, 0.0), 1.0)
}

/// Meshes of everything culled into `pass`, in graph order.
fn drawn(graph: &RenderGraph, pass: Pass) -> Vec<usize> {
    graph
        .batches(pass)
        .iter()
        .flat_map(|batch| batch.items.iter().map(|item| item.mesh.0))
        .collect()
}

fn update_and_cull(scene: &mut Scene, camera: &Camera) -> RenderGraph {
    let mut graph = RenderGraph::new();
    scene.update(camera, Duration::from_millis(0));
    scene.cull(camera, &mut graph);
    graph
}

#[test]
fn moving_a_node_dirties_its_ancestors_only() {
    let mut scene = Scene::new();
    let a = scene.add_group(scene.root(), "a");
    let b = scene.add_group(a, "b");
    let c = scene.add_node(b, "c", model(0));
    let sibling = scene.add_node(b, "sibling", model(1));
    scene.set_relative_position(a, Vector3::new(1.0, 0.0, 0.0));
    scene.set_relative_position(b, Vector3::new(0.0, 2.0, 0.0));
    scene.set_relative_position(c, Vector3::new(0.0, 0.0, 3.0));
    scene.update_bounding_volume_and_set_not_dirty();
    assert!(!scene.node(scene.root()).is_dirty());
    assert_eq!(scene.node(c).world_position(), Point3::new(1.0, 2.0, 3.0));

    scene.set_relative_position(c, Vector3::new(0.0, 0.0, 4.0));

    for id in [c, b, a, scene.root()] {
        assert!(scene.node(id).is_dirty(), "{id:?} should be dirty");
    }
    assert!(!scene.node(sibling).is_dirty());
}

#[test]
fn parent_moves_reach_every_descendant() {
    let mut scene = Scene::new();
    let a = scene.add_group(scene.root(), "a");
    let b = scene.add_group(a, "b");
    let c = scene.add_node(b, "c", model(0));
    scene.set_relative_position(c, Vector3::new(0.0, 0.0, 3.0));
    scene.update_bounding_volume_and_set_not_dirty();

    scene.set_relative_position(a, Vector3::new(10.0, 0.0, 0.0));
    scene.update_bounding_volume_and_set_not_dirty();

    assert_eq!(scene.node(c).world_position(), Point3::new(10.0, 0.0, 3.0));
    assert!(!scene.node(c).is_dirty());
    let bounds = scene.node(a).bounds();
    assert!(bounds.distance_to(Point3::new(10.0, 0.0, 3.0)) + 1.0 <= bounds.radius + 1e-4);
}

#[test]
fn switch_draws_only_the_active_child() {
    let mut scene = Scene::new();
    let switch = scene.add_node(scene.root(), "switch", NodeKind::Switch { active: 1 });
    for mesh in 0..3 {
        scene.add_node(switch, "option", model(mesh));
    }
    let camera = looking_at_origin_from(10.0);

    assert_eq!(drawn(&update_and_cull(&mut scene, &camera), Pass::Opaque), vec![1]);

    scene.set_switch(switch, 7);
    assert!(update_and_cull(&mut scene, &camera).is_empty());
}

#[test]
fn switch_only_animates_the_active_child() {
    let mut scene = Scene::new();
    let switch = scene.add_node(scene.root(), "switch", NodeKind::Switch { active: 0 });
    let clip = AnimationClip {
        name: "rise".into(),
        transforms: vec![
            Transform::default(),
            Transform::from(Vector3::new(0.0, 0.0, 4.0)),
        ],
        timestamps: vec![0.0, 4.0],
    };
    let animate = |clip| NodeKind::Animation(AnimationNode::new(clip, false));
    let shown = scene.add_node(switch, "shown", animate(clip.clone()));
    let hidden = scene.add_node(switch, "hidden", animate(clip));

    scene.update(&looking_at_origin_from(10.0), Duration::from_secs(1));

    let time = |id: NodeId| match &scene.node(id).kind {
        NodeKind::Animation(animation) => animation.time,
        other => panic!("not an animation: {other:?}"),
    };
    assert_eq!(time(shown), 1.0);
    assert_eq!(time(hidden), 0.0);
}

#[test]
fn lod_picks_the_child_for_the_camera_distance() {
    let mut scene = Scene::new();
    let lod = scene.add_node(
        scene.root(),
        "tree",
        NodeKind::Lod(LodNode {
            ranges: vec![10.0, 50.0],
        }),
    );
    for mesh in 0..3 {
        scene.add_node(lod, "level", model(mesh));
    }

    for (distance, expected) in [(5.0, 0), (20.0, 1), (200.0, 2)] {
        let graph = update_and_cull(&mut scene, &looking_at_origin_from(distance));
        assert_eq!(drawn(&graph, Pass::Opaque), vec![expected], "at {distance}");
    }
}

struct Pages {
    loaded: Rc<RefCell<Vec<String>>>,
}

impl PageLoader for Pages {
    fn load_level(
        &mut self,
        scene: &mut Scene,
        parent: NodeId,
        source: &str,
    ) -> anyhow::Result<NodeId> {
        self.loaded.borrow_mut().push(source.to_string());
        if source == "broken" {
            bail!("{source} is unreadable");
        }
        let mesh = match source {
            "coarse" => 10,
            _ => 11,
        };
        Ok(scene.add_node(parent, source, model(mesh)))
    }
}

fn level(source: &str, max_distance: f32) -> PagedLevel {
    PagedLevel {
        source: source.to_string(),
        max_distance,
        node: None,
        failed: false,
    }
}

#[test]
fn paged_lod_loads_levels_on_demand() {
    init_logger();
    let mut scene = Scene::new();
    let loaded = Rc::new(RefCell::new(Vec::new()));
    scene.set_page_loader(Box::new(Pages {
        loaded: loaded.clone(),
    }));
    let paged = scene.add_node(
        scene.root(),
        "terrain",
        NodeKind::PagedLod(PagedLodNode {
            levels: vec![level("coarse", 500.0), level("fine", 20.0)],
            decorations: Vec::new(),
            radius: 10.0,
        }),
    );
    scene.add_decoration(paged, "grass", model(20), 8.0);

    assert!(update_and_cull(&mut scene, &looking_at_origin_from(900.0)).is_empty());
    assert!(loaded.borrow().is_empty());

    let far = update_and_cull(&mut scene, &looking_at_origin_from(100.0));
    assert_eq!(drawn(&far, Pass::Opaque), vec![10]);
    assert_eq!(*loaded.borrow(), vec!["coarse".to_string()]);

    let near = update_and_cull(&mut scene, &looking_at_origin_from(5.0));
    assert_eq!(drawn(&near, Pass::Opaque), vec![11, 20]);
    assert_eq!(*loaded.borrow(), vec!["coarse".to_string(), "fine".to_string()]);

    // levels stay loaded once the camera moves away again
    update_and_cull(&mut scene, &looking_at_origin_from(100.0));
    assert_eq!(loaded.borrow().len(), 2);
    let NodeKind::PagedLod(paged_node) = &scene.node(paged).kind else {
        panic!("terrain is not a paged LOD");
    };
    assert!(paged_node.levels.iter().all(|level| level.node.is_some()));
}

#[test]
fn failed_page_is_not_retried() {
    init_logger();
    let mut scene = Scene::new();
    let loaded = Rc::new(RefCell::new(Vec::new()));
    scene.set_page_loader(Box::new(Pages {
        loaded: loaded.clone(),
    }));
    let paged = scene.add_node(
        scene.root(),
        "terrain",
        NodeKind::PagedLod(PagedLodNode {
            levels: vec![level("broken", 500.0)],
            decorations: Vec::new(),
            radius: 10.0,
        }),
    );
    let camera = looking_at_origin_from(50.0);

    assert!(update_and_cull(&mut scene, &camera).is_empty());
    assert!(update_and_cull(&mut scene, &camera).is_empty());

    assert_eq!(loaded.borrow().len(), 1);
    let NodeKind::PagedLod(paged_node) = &scene.node(paged).kind else {
        panic!("terrain is not a paged LOD");
    };
    assert!(paged_node.levels[0].failed);
}

#[test]
fn paged_tile_loads_while_its_origin_is_off_screen() {
    init_logger();
    let mut scene = Scene::new();
    let loaded = Rc::new(RefCell::new(Vec::new()));
    scene.set_page_loader(Box::new(Pages {
        loaded: loaded.clone(),
    }));
    let tile = scene.add_node(
        scene.root(),
        "tile",
        NodeKind::PagedLod(PagedLodNode {
            levels: vec![level("coarse", 500.0)],
            decorations: Vec::new(),
            radius: 40.0,
        }),
    );
    // the tile origin sits behind the camera, most of its extent in front
    scene.set_relative_position(tile, Vector3::new(0.0, -30.0, 0.0));
    let camera = looking_at_origin_from(10.0);

    for _ in 0..3 {
        update_and_cull(&mut scene, &camera);
    }

    assert_eq!(*loaded.borrow(), vec!["coarse".to_string()]);
    let NodeKind::PagedLod(paged_node) = &scene.node(tile).kind else {
        panic!("tile is not a paged LOD");
    };
    assert!(paged_node.levels[0].node.is_some());
}

#[test]
fn animation_moves_its_subtree() {
    let mut scene = Scene::new();
    let clip = AnimationClip {
        name: "slide".into(),
        transforms: vec![
            Transform::default(),
            Transform::from(Vector3::new(10.0, 0.0, 0.0)),
        ],
        timestamps: vec![0.0, 2.0],
    };
    let animation = scene.add_node(
        scene.root(),
        "slide",
        NodeKind::Animation(AnimationNode::new(clip, false)),
    );
    let child = scene.add_node(animation, "cart", model(0));
    let camera = Camera::new(Point3::new(5.0, -20.0, 0.0), Point3::new(5.0, 0.0, 0.0), 1.0);

    scene.update(&camera, Duration::from_secs(1));
    assert!((scene.node(child).world_position().x - 5.0).abs() < 1e-4);

    scene.update(&camera, Duration::from_secs(5));
    assert!((scene.node(child).world_position().x - 10.0).abs() < 1e-4);
    let NodeKind::Animation(state) = &scene.node(animation).kind else {
        panic!("slide is not an animation");
    };
    assert!(!state.playing);

    let mut graph = RenderGraph::new();
    scene.cull(&camera, &mut graph);
    assert_eq!(drawn(&graph, Pass::Animated), vec![0]);
    assert!(graph.batches(Pass::Opaque).is_empty());
}

#[test]
fn looping_animation_wraps_around() {
    let mut scene = Scene::new();
    let clip = AnimationClip {
        name: "spin".into(),
        transforms: vec![
            Transform::default(),
            Transform::from(Vector3::new(4.0, 0.0, 0.0)),
        ],
        timestamps: vec![0.0, 4.0],
    };
    let animation = scene.add_node(
        scene.root(),
        "spin",
        NodeKind::Animation(AnimationNode::new(clip, true)),
    );

    scene.update(&Camera::default(), Duration::from_secs(5));

    let NodeKind::Animation(state) = &scene.node(animation).kind else {
        panic!("spin is not an animation");
    };
    assert!(state.playing);
    assert!((state.time - 1.0).abs() < 1e-4);
    assert!((scene.node(animation).world_position().x - 1.0).abs() < 1e-4);
}

#[test]
fn removing_a_node_drops_its_subtree() {
    let mut scene = Scene::new();
    let group = scene.add_group(scene.root(), "group");
    let child = scene.add_node(group, "child", model(0));
    let grandchild = scene.add_node(child, "grandchild", model(1));
    let keep = scene.add_node(scene.root(), "keep", model(2));
    assert_eq!(scene.len(), 5);

    scene.remove_node(group);

    assert_eq!(scene.len(), 2);
    for id in [group, child, grandchild] {
        assert!(!scene.contains(id));
    }
    assert_eq!(scene.node(scene.root()).children(), &[keep]);

    let reused = scene.add_group(scene.root(), "new");
    assert!([group, child, grandchild].contains(&reused));
    assert_eq!(scene.descendants(scene.root()), vec![scene.root(), keep, reused]);
}

#[test]
#[should_panic(expected = "invalid scene node")]
fn removed_ids_are_invalid() {
    let mut scene = Scene::new();
    let group = scene.add_group(scene.root(), "group");
    scene.remove_node(group);
    scene.node(group);
}

#[test]
fn culling_skips_what_the_camera_cannot_see() {
    let mut scene = Scene::new();
    let front = scene.add_node(scene.root(), "front", model(0));
    let behind = scene.add_node(scene.root(), "behind", model(1));
    scene.set_relative_position(front, Vector3::new(0.0, 5.0, 0.0));
    scene.set_relative_position(behind, Vector3::new(0.0, -30.0, 0.0));
    let sun = scene.add_node(
        scene.root(),
        "sun",
        NodeKind::Light(LightNode {
            colour: [1.0, 1.0, 0.9, 1.0],
            ambient: [0.3, 0.3, 0.3, 1.0],
            range: 1000.0,
        }),
    );
    scene.set_relative_position(sun, Vector3::new(0.0, 0.0, 50.0));

    let graph = update_and_cull(&mut scene, &looking_at_origin_from(10.0));

    assert_eq!(drawn(&graph, Pass::Opaque), vec![0]);
    assert_eq!(graph.lights().len(), 1);
    assert_eq!(graph.lights()[0].position, Point3::new(0.0, 0.0, 50.0));
    let item = graph.batches(Pass::Opaque)[0].items[0];
    assert!((item.distance - 15.0).abs() < 1e-4);
}
