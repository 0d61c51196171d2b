//! Per-frame, per-view and per-draw resource groups and named constant offsets

use super::*;
use crate::render::nodes::{EffectPermutationSlot, RenderNodeState, StaticEffectObjectNodeReference};

fn main_effect(scene: &TestScene, object: RenderObjectId) -> StaticEffectObjectNodeReference {
    let feature = scene.feature();
    let slot = feature.stage_slot(scene.opaque).unwrap();
    scene
        .system
        .render_object(object)
        .unwrap()
        .static_node()
        .create_effect_reference(feature.effect_permutation_slot_count(), slot)
}

#[test]
fn test_constant_buffer_binding_without_descriptors_is_left_unbound() {
    let mut scene = TestScene::new();
    let mesh = scene.add_mesh("MeshBindless", 3.0);

    let stats = scene.prepare_main_view(&[mesh]);
    assert_eq!(stats.prepared, 1);
    assert_eq!(stats.skipped(), 0);

    let node = scene.render_nodes()[0];
    assert_eq!(node.state(), RenderNodeState::Prepared);
    let offset = node.constant_buffer_offset.unwrap();
    let depth: f32 = scene.system.constant_buffers().read(offset).unwrap();
    approx::assert_relative_eq!(depth, 3.0);

    let entries = scene.system.descriptor_pool().entries(&node.descriptor_set.unwrap()).unwrap();
    assert_eq!(entries, &[DescriptorEntry::ShaderResource(MESH_TEXTURE)]);
}

#[test]
fn test_per_frame_set_is_shared_by_every_view() {
    let mut scene = TestScene::new();
    let objects = [
        scene.add_mesh("SceneLit", 0.0),
        scene.add_mesh("SceneMetal", 1.0),
        scene.add_mesh("Lit", 2.0),
    ];

    scene.begin_frame(&objects);
    scene.system.extract().unwrap();
    scene.system.prepare().unwrap();

    let nodes = scene.render_nodes();
    let frame_sets: Vec<DescriptorSet> = nodes.iter().filter_map(|node| node.frame_descriptor_set).collect();
    // Two effects with a per-frame layout, each in the main and shadow views
    assert_eq!(frame_sets.len(), 4);
    let frame_set = frame_sets[0];
    assert!(frame_sets.iter().all(|set| *set == frame_set));
    assert_eq!(
        scene.system.descriptor_pool().entries(&frame_set).unwrap(),
        &[DescriptorEntry::ShaderResource(ENVIRONMENT_TEXTURE)]
    );
    for node in &nodes {
        let effect = scene.feature().render_effect(node.render_effect).unwrap();
        assert_eq!(node.frame_descriptor_set.is_some(), effect.effect_name.starts_with("Scene"));
    }

    let mut commands = RecordingCommandList::default();
    scene.system.draw(scene.main_view, scene.opaque, &mut commands).unwrap();
    scene.system.draw(scene.shadow_view, scene.shadow, &mut commands).unwrap();

    // Bound once per pass, not once per draw
    let bound = commands.descriptor_sets(DescriptorSetSlot::PerFrame);
    assert_eq!(bound.len(), 2);
    assert!(bound.iter().all(|(set, _)| *set == frame_set));
    assert_eq!(commands.draws(), 6);
}

#[test]
fn test_per_view_constants_are_written_and_bound() {
    let mut scene = TestScene::new();
    let objects = [scene.add_mesh("SceneLit", 0.0), scene.add_mesh("SceneLit", 1.0)];
    scene.prepare_main_view(&objects);

    let slot_count = scene.feature().effect_permutation_slot_count();
    let slot = scene.feature().stage_slot(scene.opaque).unwrap();
    let resources = scene
        .feature()
        .view_resources(scene.main_view.create_effect_reference(slot_count, slot))
        .unwrap();
    let offset = resources.constant_buffer_offset.unwrap();
    assert_eq!(offset % 256, 0);

    let eye_depth: f32 = scene.system.constant_buffers().read(offset + EYE_DEPTH_OFFSET).unwrap();
    let view_matrix = scene.system.view(scene.main_view).unwrap().view_matrix;
    approx::assert_relative_eq!(eye_depth, view_matrix[(2, 3)]);

    let set = resources.descriptor_set.unwrap();
    assert_eq!(
        scene.system.descriptor_pool().entries(&set).unwrap(),
        &[DescriptorEntry::ConstantBufferRange { offset, size: VIEW_CONSTANT_BUFFER_SIZE }]
    );
    for node in scene.render_nodes() {
        assert_eq!(node.view_descriptor_set, Some(set));
        assert_ne!(node.constant_buffer_offset, Some(offset));
    }
}

#[test]
fn test_effects_with_another_per_view_interface_get_their_own_set() {
    let mut scene = TestScene::new();
    let objects = [
        scene.add_mesh("SceneLit", 0.0),
        scene.add_mesh("SceneMetal", 1.0),
        scene.add_mesh("Lit", 2.0),
    ];
    let stats = scene.prepare_main_view(&objects);
    assert_eq!(stats.prepared, 3);

    let nodes = scene.render_nodes();
    assert!(nodes[0].view_descriptor_set.is_some());
    assert_eq!(nodes[0].view_descriptor_set, nodes[1].view_descriptor_set);
    assert!(nodes[2].view_descriptor_set.is_some());
    assert_ne!(nodes[0].view_descriptor_set, nodes[2].view_descriptor_set);

    let lit_set = nodes[2].view_descriptor_set.unwrap();
    assert_eq!(
        scene.system.descriptor_pool().entries(&lit_set).unwrap(),
        &[DescriptorEntry::Empty]
    );
}

#[test]
fn test_cbuffer_offset_slots_resolve_per_effect() {
    let mut scene = TestScene::new();
    let scene_mesh = scene.add_mesh("SceneLit", 0.0);
    let plain = scene.add_mesh("Lit", 1.0);
    scene.prepare_main_view(&[scene_mesh, plain]);

    let slots = scene.feature().cbuffer_offset_slots();
    assert_eq!(slots.draw_slots(), &["Depth".to_string()]);
    assert_eq!(slots.view_slots(), &["EyeDepth".to_string()]);

    let scene_effect = main_effect(&scene, scene_mesh);
    let plain_effect = main_effect(&scene, plain);
    let first = ConstantBufferOffsetSlot::new(0);
    assert_eq!(scene.feature().draw_cbuffer_offset(scene_effect, first), Some(0));
    assert_eq!(scene.feature().draw_cbuffer_offset(plain_effect, first), Some(0));
    assert_eq!(scene.feature().view_cbuffer_offset(scene_effect, first), Some(EYE_DEPTH_OFFSET));
    assert_eq!(scene.feature().view_cbuffer_offset(plain_effect, first), None);

    // Slots created after resolution apply to the effects already resolved
    let feature = scene.system.feature_mut(scene.meshes).unwrap();
    let tint = feature.create_draw_cbuffer_offset_slot("Tint");
    assert_eq!(tint, ConstantBufferOffsetSlot::new(1));
    assert_eq!(feature.create_draw_cbuffer_offset_slot("Tint"), tint);

    assert_eq!(scene.feature().draw_cbuffer_offset(scene_effect, tint), Some(16));
    assert_eq!(scene.feature().draw_cbuffer_offset(plain_effect, tint), None);
    assert_eq!(scene.feature().draw_cbuffer_offset(scene_effect, ConstantBufferOffsetSlot::new(5)), None);
}

#[test]
fn test_new_permutation_slot_drops_per_view_lookups() {
    let mut scene = TestScene::new();
    let mesh = scene.add_mesh("Lit", 0.0);
    scene.prepare_main_view(&[mesh]);

    let old_count = scene.feature().effect_permutation_slot_count();
    let main = scene.feature().stage_slot(scene.opaque).unwrap();
    assert!(scene
        .feature()
        .view_descriptor_set(scene.main_view.create_effect_reference(old_count, main))
        .is_some());

    scene
        .system
        .feature_mut(scene.meshes)
        .unwrap()
        .create_effect_permutation_slot("Picking")
        .unwrap();
    let new_count = scene.feature().effect_permutation_slot_count();
    assert_eq!(new_count, old_count + 1);
    for view in [scene.main_view, scene.shadow_view] {
        for slot in 0..new_count {
            let reference = view.create_effect_reference(new_count, EffectPermutationSlot::new(slot));
            assert_eq!(scene.feature().view_resources(reference), None);
        }
    }

    // The next frame allocates per-view resources at the new stride
    scene.prepare_main_view(&[mesh]);
    let reference = scene.main_view.create_effect_reference(new_count, main);
    assert!(scene.feature().view_descriptor_set(reference).is_some());
    assert_eq!(scene.feature().view_descriptor_set(reference), scene.render_nodes()[0].view_descriptor_set);
}
