use globe_ngin::{
    Engine, Vector3,
    animation::Priority,
    config::EngineConfig,
    data_structures::{light::PointLight, material::Material, transform::Transform},
    object::{DomainId, GeometryKind, ObjectId},
    resources::{AssetKind, mesh::parse_obj},
};

use crate::common::test_utils::{
    RecordingSink, TestHost, engine, manual_triangle, quad_obj, rig,
};

mod common;

fn stocked_engine(config: EngineConfig) -> (Engine, RecordingSink) {
    let (mut engine, sink, _) = engine(config, &[]);
    engine.define_material(Material::opaque("stone"));
    let quad = parse_obj("quad", quad_obj("stone").as_bytes()).unwrap();
    engine.cache_mut().insert_mesh("quad", quad);
    (engine, sink)
}

fn quad_at(engine: &mut Engine, x: f32) -> ObjectId {
    let id = engine.create_object(None).unwrap();
    let (scene, cache) = engine.scene_with_cache();
    scene
        .set_position(id, Vector3::new(x, 0.0, 0.0), &cache.materials)
        .unwrap();
    scene
        .attach_mesh(id, cache, &"quad".into(), true, Transform::default())
        .unwrap();
    id
}

#[test]
fn frame_runs_inside_the_renderer_context() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    let host = TestHost::new();

    engine.frame(0.016, &host);

    let contexts = engine.renderer().contexts();
    assert_eq!(contexts.depth(), 0);
    assert_eq!(contexts.swap_count(), 2);
    assert_eq!(sink.frames.borrow().len(), 1);

    engine.frame(0.016, &host);
    assert_eq!(engine.renderer().contexts().swap_count(), 4);
}

#[test]
fn nested_scope_inside_a_frame_does_not_swap() {
    let (engine, _) = stocked_engine(EngineConfig::default());
    let contexts = engine.renderer().contexts();
    {
        let _outer = contexts.scope();
        let _inner = contexts.scope();
        assert_eq!(contexts.depth(), 2);
    }
    assert_eq!(contexts.swap_count(), 2);
}

#[test]
fn zero_budget_still_drains_one_rebuild_per_frame() {
    let mut config = EngineConfig::default();
    config.renderer.rebuild_budget_ms = 0;
    let (mut engine, _) = stocked_engine(config);
    let mut host = TestHost::new();
    let ids: Vec<ObjectId> = (1..=3)
        .map(|n| {
            host.geometry.insert(DomainId(n), manual_triangle("stone"));
            engine.create_object(Some(DomainId(n))).unwrap()
        })
        .collect();
    for id in &ids {
        assert!(engine.renderer_mut().queue_geometry_rebuild(*id));
    }
    assert!(!engine.renderer_mut().queue_geometry_rebuild(ids[0]));

    engine.frame(0.016, &host);
    assert_eq!(engine.renderer().pending_rebuilds(), 2);
    assert_eq!(engine.renderer().stats().rebuilds_drained, 1);
    engine.frame(0.016, &host);
    engine.frame(0.016, &host);

    assert_eq!(engine.renderer().pending_rebuilds(), 0);
    assert_eq!(*host.builds.borrow(), vec![DomainId(1), DomainId(2), DomainId(3)]);
    for id in ids {
        assert_eq!(
            engine.scene().object(id).unwrap().geometry_kind(),
            Some(GeometryKind::Manual)
        );
    }
}

#[test]
fn generous_budget_drains_everything() {
    let (mut engine, _) = stocked_engine(EngineConfig::default());
    let mut host = TestHost::new();
    for n in 1..=4 {
        host.geometry.insert(DomainId(n), manual_triangle("stone"));
        let id = engine.create_object(Some(DomainId(n))).unwrap();
        engine.renderer_mut().queue_geometry_rebuild(id);
    }

    engine.frame(0.016, &host);

    assert_eq!(engine.renderer().pending_rebuilds(), 0);
    assert_eq!(host.builds.borrow().len(), 4);
}

#[test]
fn destroyed_objects_leave_the_rebuild_queue() {
    let (mut engine, _) = stocked_engine(EngineConfig::default());
    let host = TestHost::new();
    let id = engine.create_object(Some(DomainId(1))).unwrap();
    engine.renderer_mut().queue_geometry_rebuild(id);

    engine.destroy_object(id).unwrap();
    engine.frame(0.016, &host);

    assert_eq!(engine.renderer().pending_rebuilds(), 0);
    assert!(host.builds.borrow().is_empty());
    assert!(!engine.renderer_mut().cancel_geometry_rebuild(id));
}

#[test]
fn built_batch_replaces_individual_draws() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    let host = TestHost::new();
    quad_at(&mut engine, 0.0);
    quad_at(&mut engine, 1.0);
    quad_at(&mut engine, 100.0);

    engine.frame(0.016, &host);

    let frame = sink.frames.borrow()[0].clone();
    assert_eq!(frame.batch_draws, 1);
    assert_eq!(frame.object_draws, 1);
    assert_eq!(engine.renderer().stats().built_groups, 1);
}

#[test]
fn hidden_emitters_keep_their_particles() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    engine
        .cache_mut()
        .construct(
            AssetKind::ParticleScript,
            &"smoke".into(),
            b"particle_system smoke\n{\n    material stone\n}\n",
        )
        .unwrap();
    let id = quad_at(&mut engine, 0.0);
    let (scene, cache) = engine.scene_with_cache();
    scene.add_particle_system(id, cache, &"smoke".into()).unwrap();
    scene.set_light(id, Some(PointLight::default())).unwrap();
    scene.set_visible(id, false, &cache.materials).unwrap();

    engine.frame(0.016, &TestHost::new());

    let frame = sink.frames.borrow()[0].clone();
    assert_eq!(frame.object_draws, 0);
    assert_eq!(frame.particle_draws, 1);
    assert_eq!(frame.lights, 0);
}

#[test]
fn lights_follow_visible_objects() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    let id = quad_at(&mut engine, 0.0);
    let (scene, _) = engine.scene_with_cache();
    scene.set_light(id, Some(PointLight::default())).unwrap();

    engine.frame(0.016, &TestHost::new());

    assert_eq!(sink.frames.borrow()[0].lights, 1);
}

#[test]
fn camera_height_and_time_drive_the_environment() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    let mut host = TestHost::new();

    engine.frame(0.016, &host);
    host.camera.position.y = 5.0;
    host.time_of_day = 0.0;
    engine.frame(0.016, &host);

    let frames = sink.frames.borrow();
    assert!(!frames[0].underwater);
    assert!(!frames[0].moon);
    assert!(frames[1].underwater);
    assert!(frames[1].moon);
    assert_eq!(engine.renderer().camera().position.y, 5.0);
    assert!(engine.renderer().fog().underwater);
}

#[test]
fn statistics_are_attached_only_when_enabled() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    engine.frame(0.016, &TestHost::new());
    assert!(!sink.frames.borrow()[0].has_stats);

    let mut config = EngineConfig::default();
    config.renderer.show_stats = true;
    let (mut engine, sink) = stocked_engine(config);
    engine.frame(0.016, &TestHost::new());
    engine.frame(0.016, &TestHost::new());
    assert!(sink.frames.borrow()[1].has_stats);
    assert_eq!(engine.renderer().stats().frames, 2);
}

#[test]
fn frames_advance_animations() {
    let (mut engine, _) = stocked_engine(EngineConfig::default());
    engine
        .cache_mut()
        .insert_skeleton("rig", rig("rig", 4, &[("walk", 1.0, &[1, 2])]));
    let skinned = parse_obj(
        "avatar",
        format!("# skeleton rig\n{}", quad_obj("stone")).as_bytes(),
    )
    .unwrap();
    engine.cache_mut().insert_mesh("avatar", skinned);
    let id = engine.create_object(None).unwrap();
    engine
        .request_mesh(id, "avatar", true, Transform::default())
        .unwrap();
    let (scene, _) = engine.scene_with_cache();
    scene
        .enable_animation(id, "walk", true, Some(0.5), Priority::Low)
        .unwrap();

    // camera is 50 units up, inside the closest animation LOD band
    engine.frame(0.25, &TestHost::new());

    assert_eq!(engine.renderer().stats().animated_objects, 1);
    let walk = engine.scene().object(id).unwrap().animations().get("walk").unwrap();
    assert_eq!(walk.weight(), 0.5);
}

#[test]
fn material_edits_reach_batching_through_the_engine() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    let host = TestHost::new();
    quad_at(&mut engine, 0.0);
    quad_at(&mut engine, 1.0);
    engine.frame(0.016, &host);

    assert!(engine.modify_material("stone", |m| m.techniques[0].passes[0].depth_write = false));
    engine.frame(0.016, &host);

    let frames = sink.frames.borrow();
    assert_eq!(frames[0].batch_draws, 1);
    assert_eq!(frames[1].batch_draws, 0);
    assert_eq!(frames[1].object_draws, 2);
    assert!(!engine.modify_material("missing", |_| ()));
}

#[test]
fn shutdown_empties_the_scene() {
    let (mut engine, sink) = stocked_engine(EngineConfig::default());
    quad_at(&mut engine, 0.0);
    quad_at(&mut engine, 1.0);

    engine.shutdown();
    engine.frame(0.016, &TestHost::new());

    assert!(engine.scene().is_empty());
    assert_eq!(engine.scene().manager().group_count(), 0);
    let frame = sink.frames.borrow()[0].clone();
    assert_eq!(frame, Default::default());
    assert!(engine.create_object(None).is_err());
}

#[test]
fn material_edits_leave_clones_untouched() {
    let (mut engine, _) = stocked_engine(EngineConfig::default());
    engine
        .cache_mut()
        .materials
        .clone_material("stone", "stone_copy")
        .unwrap();

    assert!(engine.modify_material("stone", |m| m.techniques[0].passes[0].depth_write = false));

    let materials = &engine.cache().materials;
    assert!(!materials.is_grouping_compatible("stone"));
    assert!(materials.is_grouping_compatible("stone_copy"));
}
