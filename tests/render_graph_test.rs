use cgmath::Vector3;
use layer_ngin::{
    api::{
        GpuBuffer, UniformValue,
        recording::{ApiCall, RecordingApi},
    },
    context::Context,
    data_structures::{scene_graph::LightNode, vertex_buffer::{MeshData, VertexBufferId}},
    render::{Pass, StateSet},
};

use crate::common::test_utils::{context, material_toml, standard_assets};

mod common;

fn mesh(ctx: &mut Context<RecordingApi>, name: &str) -> VertexBufferId {
    ctx.add_mesh(name, MeshData::quad(1.0))
}

/// Names of the vertex buffers drawn, in call order.
fn draw_order(ctx: &Context<RecordingApi>) -> Vec<String> {
    let name_of = |buffer: GpuBuffer| {
        (0..)
            .map(VertexBufferId)
            .map_while(|id| ctx.registry.vertex_buffer(id))
            .find(|vb| vb.gpu == Some(buffer))
            .map(|vb| vb.name.clone())
            .unwrap_or_default()
    };
    ctx.renderer
        .api()
        .calls()
        .iter()
        .filter_map(|call| match call {
            ApiCall::Draw { buffer, .. } => Some(name_of(*buffer)),
            _ => None,
        })
        .collect()
}

fn frame(ctx: &mut Context<RecordingApi>) {
    ctx.update_scene(layer_ngin::Duration::from_millis(16));
    ctx.cull();
    ctx.renderer.api_mut().clear_calls();
    ctx.draw_scene();
}

#[test]
fn passes_draw_in_fixed_order() {
    let mut ctx = context(standard_assets());
    let plain = ctx.load_material("plain_a.mat");
    let glass = ctx.load_material("glass.mat");
    let root = ctx.scene.root();
    // added in reverse so insertion order cannot explain the result
    let particles = mesh(&mut ctx, "particles");
    ctx.add_model_in_pass(root, "spark", particles, StateSet::material(plain), Pass::Particles);
    let window = mesh(&mut ctx, "transparent");
    ctx.add_model(root, "window", window, StateSet::material(glass));
    let sky = mesh(&mut ctx, "sky");
    ctx.add_model_in_pass(root, "sky", sky, StateSet::material(plain), Pass::SkyDome);
    let walker = mesh(&mut ctx, "animated");
    ctx.add_model_in_pass(root, "walker", walker, StateSet::material(plain), Pass::Animated);
    let wall = mesh(&mut ctx, "opaque");
    ctx.add_model(root, "wall", wall, StateSet::material(plain));

    frame(&mut ctx);

    assert_eq!(
        draw_order(&ctx),
        vec!["opaque", "animated", "sky", "transparent", "particles"]
    );
    assert_eq!(ctx.renderer.current_material(), None);
    assert!(!ctx.renderer.api().blend_enabled());
}

#[test]
fn transparent_items_draw_back_to_front_across_materials() {
    let source = standard_assets().with_text("tint.mat", &material_toml(&[("blend", "a.png")]));
    let mut ctx = context(source);
    let glass = ctx.load_material("glass.mat");
    let tint = ctx.load_material("tint.mat");
    let root = ctx.scene.root();
    for (name, material, y) in [
        ("near", glass, 0.0),
        ("far", glass, 20.0),
        ("middle", tint, 5.0),
    ] {
        let quad = mesh(&mut ctx, name);
        let node = ctx.add_model(root, name, quad, StateSet::material(material));
        ctx.scene.set_relative_position(node, Vector3::new(0.0, y, 0.0));
    }

    frame(&mut ctx);

    assert_eq!(ctx.graph.batches(Pass::Transparent).len(), 2);
    assert_eq!(draw_order(&ctx), vec!["far", "middle", "near"]);
}

#[test]
fn shared_state_sets_batch_together() {
    let mut ctx = context(standard_assets());
    let a = ctx.load_material("plain_a.mat");
    let b = ctx.load_material("plain_b.mat");
    let root = ctx.scene.root();
    let quad = mesh(&mut ctx, "quad");
    ctx.add_model(root, "first", quad, StateSet::material(a));
    ctx.add_model(root, "other", quad, StateSet::material(b));
    ctx.add_model(root, "second", quad, StateSet::material(a));

    ctx.update_scene(layer_ngin::Duration::from_millis(16));
    ctx.cull();
    let stats = ctx.draw_scene();

    assert_eq!(stats.batches, 2);
    assert_eq!(stats.draws, 3);
    assert_eq!(stats.material_changes, 2);
    assert_eq!(ctx.finish_frame().unwrap(), stats);
}

#[test]
fn texture_state_sets_bind_a_single_texture() {
    let mut ctx = context(standard_assets());
    let texture = ctx.load_texture("b.png");
    let root = ctx.scene.root();
    let quad = mesh(&mut ctx, "hud");
    ctx.add_model(root, "hud", quad, StateSet::texture(texture));

    frame(&mut ctx);

    let gpu = ctx.registry.texture_handle(texture);
    let draws: Vec<_> = ctx
        .renderer
        .api()
        .calls()
        .iter()
        .filter_map(|call| match call {
            ApiCall::Draw { textures, .. } => Some(textures[0]),
            _ => None,
        })
        .collect();
    assert_eq!(draws, vec![gpu]);
}

#[test]
fn first_light_sets_the_ambient_colour() {
    let source = standard_assets()
        .with_text("lit.vert", "uniform vec4 ambientColour;\nvoid main() {}")
        .with_text("lit.frag", "void main() {}")
        .with_text(
            "lit.mat",
            &format!("shader = \"lit\"\n{}", material_toml(&[("plain", "a.png")])),
        );
    let mut ctx = context(source);
    let lit = ctx.load_material("lit.mat");
    let root = ctx.scene.root();
    let quad = mesh(&mut ctx, "statue");
    ctx.add_model(root, "statue", quad, StateSet::material(lit));
    let lamp = ctx.add_light(
        root,
        "lamp",
        LightNode {
            colour: [1.0, 0.8, 0.6, 1.0],
            ambient: [0.4, 0.3, 0.2, 1.0],
            range: 100.0,
        },
    );
    ctx.scene.set_relative_position(lamp, Vector3::new(0.0, 0.0, 5.0));

    frame(&mut ctx);

    let shader = ctx.registry.material(lit).unwrap().shader.unwrap();
    let program = ctx.registry.shader_program(shader).unwrap();
    assert!(ctx.renderer.api().calls().contains(&ApiCall::SetUniform {
        program,
        name: "ambientColour".to_string(),
        value: UniformValue::Vec4([0.4, 0.3, 0.2, 1.0]),
    }));
}
