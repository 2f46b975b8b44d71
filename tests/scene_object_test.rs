use approx::assert_abs_diff_eq;
use globe_ngin::{
    EngineError, Vector3,
    config::EngineConfig,
    data_structures::{geometry::Billboard, light::PointLight, transform::Transform},
    object::{DomainId, GeometryKind, TeardownStep},
    resources::{AssetKind, ResourceCache},
    scene::Scene,
};

use crate::common::test_utils::{cache, cache_with_avatar, manual_triangle};

mod common;

fn sparks() -> ResourceCache {
    let mut cache = cache();
    cache
        .construct(
            AssetKind::ParticleScript,
            &"sparks".into(),
            b"particle_system sparks\n{\n    quota 5\n    material stone\n}\n",
        )
        .unwrap();
    cache
}

fn lifted() -> Transform {
    Transform {
        position: Vector3::new(0.0, 2.0, 0.0),
        ..Default::default()
    }
}

fn billboard() -> Billboard {
    Billboard {
        width: 2.0,
        height: 1.0,
        colour: [1.0; 4],
        material: "stone".into(),
    }
}

#[test]
fn attaching_a_missing_mesh_fails_cleanly() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();

    let result = scene.attach_mesh(id, &cache, &"nonexistent-id".into(), true, Transform::default());

    assert!(matches!(
        result,
        Err(EngineError::ResourceNotFound {
            kind: AssetKind::Mesh,
            ..
        })
    ));
    let object = scene.object(id).unwrap();
    assert!(object.geometry().is_none());
    assert!(!object.has_geometry());
    assert_eq!(scene.manager().group_count(), 0);
}

#[test]
fn failed_attach_drops_the_previous_mesh() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();
    scene
        .attach_mesh(id, &cache, &"stone_quad".into(), true, Transform::default())
        .unwrap();

    assert!(scene
        .attach_mesh(id, &cache, &"nonexistent-id".into(), true, Transform::default())
        .is_err());

    assert!(!scene.object(id).unwrap().has_geometry());
    assert!(scene.manager().group_of(id).is_none());
}

#[test]
fn geometry_representations_are_exclusive() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();
    scene
        .attach_mesh(id, &cache, &"stone_quad".into(), true, lifted())
        .unwrap();
    let offset_node = scene.object(id).unwrap().geometry_node();
    assert_ne!(offset_node, scene.object(id).unwrap().node());

    scene
        .attach_billboard(id, billboard(), &cache.materials)
        .unwrap();

    let object = scene.object(id).unwrap();
    assert_eq!(object.geometry_kind(), Some(GeometryKind::Billboard));
    assert_eq!(object.geometry_node(), object.node());
    assert!(!scene.graph().contains(offset_node));

    scene
        .attach_manual_geometry(id, manual_triangle("stone"), &cache.materials)
        .unwrap();
    assert_eq!(
        scene.object(id).unwrap().geometry_kind(),
        Some(GeometryKind::Manual)
    );

    assert!(scene.detach_geometry(id).unwrap());
    assert!(!scene.detach_geometry(id).unwrap());
}

#[test]
fn replacing_a_skinned_mesh_drops_its_animations() {
    let cache = cache_with_avatar();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();
    scene
        .attach_mesh(id, &cache, &"avatar".into(), true, Transform::default())
        .unwrap();
    scene
        .enable_animation(id, "walk", true, Some(0.0), globe_ngin::animation::Priority::Low)
        .unwrap();

    scene
        .attach_billboard(id, billboard(), &cache.materials)
        .unwrap();

    let object = scene.object(id).unwrap();
    assert!(object.skeleton().is_none());
    assert!(object.animations().is_empty());
}

#[test]
fn mesh_teardown_runs_in_order() {
    let cache = sparks();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();
    scene
        .attach_mesh(id, &cache, &"stone_quad".into(), true, lifted())
        .unwrap();
    scene.set_light(id, Some(PointLight::default())).unwrap();
    scene
        .add_particle_system(id, &cache, &"sparks".into())
        .unwrap();
    let nodes_before = scene.graph().len();

    let steps = scene.destroy_object(id).unwrap();

    assert_eq!(
        steps,
        vec![
            TeardownStep::Mesh,
            TeardownStep::Light,
            TeardownStep::ParticleSystems,
            TeardownStep::OffsetNode,
            TeardownStep::Node,
        ]
    );
    assert_eq!(scene.graph().len(), nodes_before - 2);
    assert!(scene.object(id).is_none());
}

#[test]
fn billboard_and_manual_teardown() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let sprite = scene.create_object(None).unwrap();
    scene
        .attach_billboard(sprite, billboard(), &cache.materials)
        .unwrap();
    scene.set_light(sprite, Some(PointLight::default())).unwrap();
    let terrain = scene.create_object(None).unwrap();
    scene
        .attach_manual_geometry(terrain, manual_triangle("stone"), &cache.materials)
        .unwrap();

    assert_eq!(
        scene.destroy_object(sprite).unwrap(),
        vec![TeardownStep::Light, TeardownStep::Billboard, TeardownStep::Node]
    );
    assert_eq!(
        scene.destroy_object(terrain).unwrap(),
        vec![TeardownStep::ManualObject, TeardownStep::Node]
    );
}

#[test]
fn destroying_twice_is_an_error() {
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();
    scene.destroy_object(id).unwrap();

    assert!(matches!(
        scene.destroy_object(id),
        Err(EngineError::UnknownObject(_))
    ));
}

#[test]
fn missing_particle_script_is_reported() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();

    assert!(scene
        .add_particle_system(id, &cache, &"sparks".into())
        .is_err());
    assert!(scene.object(id).unwrap().particle_systems().is_empty());
}

#[test]
fn transform_changes_below_epsilon_are_dropped() {
    let cache = cache();
    let mut config = EngineConfig::default();
    config.transform_epsilon = 0.01;
    let mut scene = Scene::new(&config);
    let id = scene.create_object(None).unwrap();

    assert!(!scene
        .set_position(id, Vector3::new(0.005, 0.0, 0.0), &cache.materials)
        .unwrap());
    assert!(scene
        .set_position(id, Vector3::new(0.5, 0.0, 0.0), &cache.materials)
        .unwrap());
    assert!(!scene
        .set_scale(id, Vector3::new(1.001, 1.0, 1.0), &cache.materials)
        .unwrap());
    assert!(scene
        .set_scale(id, Vector3::new(2.0, 2.0, 2.0), &cache.materials)
        .unwrap());
    assert!(!scene.set_visible(id, true, &cache.materials).unwrap());
}

#[test]
fn bounding_box_follows_node_and_offset() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();
    scene
        .set_position(id, Vector3::new(10.0, 0.0, 0.0), &cache.materials)
        .unwrap();
    scene
        .attach_mesh(id, &cache, &"stone_quad".into(), true, lifted())
        .unwrap();

    let bounds = scene
        .object(id)
        .unwrap()
        .bounding_box(scene.graph())
        .unwrap();

    assert_abs_diff_eq!(bounds.min.x, 10.0, epsilon = 1e-5);
    assert_abs_diff_eq!(bounds.min.y, 2.0, epsilon = 1e-5);
    assert_abs_diff_eq!(bounds.max.x, 11.0, epsilon = 1e-5);
    assert_abs_diff_eq!(bounds.max.y, 3.0, epsilon = 1e-5);
}

#[test]
fn picking_resolves_nodes_to_objects() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(Some(DomainId(42))).unwrap();
    scene
        .attach_mesh(id, &cache, &"stone_quad".into(), true, lifted())
        .unwrap();
    let object = scene.object(id).unwrap();
    let (node, geometry_node) = (object.node(), object.geometry_node());

    assert_eq!(scene.pick(node), Some(id));
    assert_eq!(scene.pick(geometry_node), Some(id));
    assert_eq!(scene.pick(scene.graph().root()), None);
    assert_eq!(scene.find_by_domain(DomainId(42)), Some(id));

    scene.destroy_object(id).unwrap();
    assert_eq!(scene.pick(node), None);
    assert_eq!(scene.find_by_domain(DomainId(42)), None);
}

#[test]
fn objects_cannot_be_created_after_shutdown() {
    let cache = cache();
    let mut scene = Scene::new(&EngineConfig::default());
    let id = scene.create_object(None).unwrap();
    scene
        .attach_mesh(id, &cache, &"stone_quad".into(), true, Transform::default())
        .unwrap();

    scene.shutdown();

    assert!(scene.is_empty());
    assert!(matches!(
        scene.create_object(None),
        Err(EngineError::ContextPrecondition(_))
    ));
}
