use globe_ngin::{
    Vector3,
    config::EngineConfig,
    data_structures::transform::Transform,
    object::ObjectId,
    resources::{AssetId, ResourceCache},
    scene::Scene,
};

use crate::common::test_utils::{cache, cache_with_avatar};

mod common;

fn placed(scene: &mut Scene, cache: &ResourceCache, mesh: &str, x: f32) -> ObjectId {
    let id = scene.create_object(None).unwrap();
    scene
        .set_position(id, Vector3::new(x, 0.0, 0.0), &cache.materials)
        .unwrap();
    scene
        .attach_mesh(id, cache, &AssetId::from(mesh), true, Transform::default())
        .unwrap();
    id
}

fn scene() -> Scene {
    Scene::new(&EngineConfig::default())
}

#[test]
fn two_nearby_objects_share_a_built_batch() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = placed(&mut scene, &cache, "stone_quad", 1.0);

    scene.tick_batching(1.0);

    let manager = scene.manager();
    let group = manager.group_of(a).unwrap();
    assert_eq!(manager.group_of(b), Some(group));
    assert!(manager.is_built(group));
    assert_eq!(manager.object_count(group), 2);
    assert!(scene.object(a).unwrap().is_batched());
    assert!(scene.object(b).unwrap().is_batched());
    let quad = cache.mesh(&"stone_quad".into()).unwrap();
    let merged = manager.group(group).unwrap().geometry().unwrap();
    assert_eq!(merged.sections.len(), 1);
    assert_eq!(merged.vertex_count(), 2 * quad.vertex_count());
    assert!(merged.cast_shadows);
}

#[test]
fn lone_object_is_not_built() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);

    scene.tick_batching(1.0);

    let group = scene.manager().group_of(a).unwrap();
    assert!(!scene.manager().is_built(group));
    assert_eq!(scene.manager().object_count(group), 1);
    assert!(!scene.object(a).unwrap().is_batched());
}

#[test]
fn batch_unbuilds_when_down_to_one_member() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = placed(&mut scene, &cache, "stone_quad", 1.0);
    let c = placed(&mut scene, &cache, "stone_quad", 2.0);
    scene.tick_batching(1.0);
    let group = scene.manager().group_of(a).unwrap();
    assert!(scene.manager().is_built(group));

    scene.destroy_object(b).unwrap();
    scene.destroy_object(c).unwrap();
    scene.tick_batching(1.0);

    assert!(!scene.manager().is_built(group));
    assert_eq!(scene.manager().object_count(group), 1);
    assert!(!scene.object(a).unwrap().is_batched());
}

#[test]
fn moving_far_away_leaves_the_batch() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = placed(&mut scene, &cache, "stone_quad", 1.0);
    scene.tick_batching(1.0);
    let group = scene.manager().group_of(a).unwrap();

    scene
        .set_position(b, Vector3::new(50.0, 0.0, 0.0), &cache.materials)
        .unwrap();

    assert!(!scene.manager().contains_object(group, b));
    let new_group = scene.manager().group_of(b).unwrap();
    assert_ne!(new_group, group);
    assert_eq!(scene.manager().group(new_group).unwrap().anchor().x, 50.0);
    assert!(!scene.object(b).unwrap().is_batched());

    scene.tick_batching(1.0);
    assert!(!scene.manager().is_built(group));
}

#[test]
fn emptied_batch_ceases_to_exist() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let group = scene.manager().group_of(a).unwrap();

    scene
        .set_position(a, Vector3::new(0.0, 0.0, 40.0), &cache.materials)
        .unwrap();

    assert!(scene.manager().group(group).is_none());
    assert!(!scene.manager().contains_object(group, a));
    assert_eq!(scene.manager().group_count(), 1);
}

#[test]
fn small_moves_only_mark_the_batch_dirty() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let _b = placed(&mut scene, &cache, "stone_quad", 1.0);
    scene.tick_batching(1.0);
    let group = scene.manager().group_of(a).unwrap();
    assert_eq!(scene.manager().dirty_count(), 0);

    scene
        .set_position(a, Vector3::new(2.0, 0.0, 0.0), &cache.materials)
        .unwrap();

    assert_eq!(scene.manager().group_of(a), Some(group));
    assert_eq!(scene.manager().dirty_count(), 1);
}

#[test]
fn moves_below_epsilon_are_ignored() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let _b = placed(&mut scene, &cache, "stone_quad", 1.0);
    scene.tick_batching(1.0);

    let changed = scene
        .set_position(a, Vector3::new(0.00001, 0.0, 0.0), &cache.materials)
        .unwrap();

    assert!(!changed);
    assert_eq!(scene.manager().dirty_count(), 0);
}

#[test]
fn rebuilds_are_coalesced_by_the_throttle() {
    let cache = cache();
    let mut scene = scene();
    let _a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let _b = placed(&mut scene, &cache, "stone_quad", 1.0);
    assert_eq!(scene.tick_batching(0.1), 1);

    let _c = placed(&mut scene, &cache, "stone_quad", 2.0);
    let _d = placed(&mut scene, &cache, "stone_quad", 3.0);
    assert_eq!(scene.tick_batching(0.1), 0);
    assert_eq!(scene.manager().dirty_count(), 1);

    // the default interval is half a second
    assert_eq!(scene.tick_batching(0.5), 1);
    assert_eq!(scene.manager().dirty_count(), 0);
}

#[test]
fn different_shadow_flags_never_share_a_batch() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = scene.create_object(None).unwrap();
    scene
        .attach_mesh(b, &cache, &"stone_quad".into(), false, Transform::default())
        .unwrap();

    assert_ne!(scene.manager().group_of(a), scene.manager().group_of(b));
}

#[test]
fn equidistant_tie_goes_to_the_oldest_batch() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = placed(&mut scene, &cache, "stone_quad", 15.0);
    assert_ne!(scene.manager().group_of(a), scene.manager().group_of(b));

    let c = placed(&mut scene, &cache, "stone_quad", 7.5);

    assert_eq!(scene.manager().group_of(c), scene.manager().group_of(a));
}

#[test]
fn non_depth_writing_material_is_filed_as_ungrouped() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "glass_quad", 0.0);
    let _b = placed(&mut scene, &cache, "glass_quad", 1.0);

    assert_eq!(scene.manager().group_of(a), None);
    assert_eq!(scene.manager().ungrouped("glass").len(), 2);
    assert_eq!(scene.manager().group_count(), 0);
}

#[test]
fn material_edits_dissolve_and_restore_batches() {
    let mut cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = placed(&mut scene, &cache, "stone_quad", 1.0);
    scene.tick_batching(1.0);
    assert!(scene.object(a).unwrap().is_batched());

    cache
        .materials
        .modify("stone", |m| m.techniques[0].passes[0].depth_write = false);
    scene.material_modified("stone", &cache.materials);

    assert_eq!(scene.manager().group_count(), 0);
    assert_eq!(scene.manager().ungrouped("stone"), vec![a, b]);
    assert!(!scene.object(a).unwrap().is_batched());

    cache
        .materials
        .modify("stone", |m| m.techniques[0].passes[0].depth_write = true);
    scene.material_modified("stone", &cache.materials);
    scene.tick_batching(1.0);

    let group = scene.manager().group_of(a).unwrap();
    assert_eq!(scene.manager().group_of(b), Some(group));
    assert!(scene.manager().is_built(group));
    assert!(scene.manager().ungrouped("stone").is_empty());
}

#[test]
fn hidden_member_leaves_and_rejoins() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = placed(&mut scene, &cache, "stone_quad", 1.0);
    scene.tick_batching(1.0);
    let group = scene.manager().group_of(a).unwrap();

    scene.set_visible(b, false, &cache.materials).unwrap();
    assert_eq!(scene.manager().group_of(b), None);
    scene.tick_batching(1.0);
    assert!(!scene.manager().is_built(group));

    scene.set_visible(b, true, &cache.materials).unwrap();
    scene.tick_batching(1.0);
    assert_eq!(scene.manager().group_of(b), Some(group));
    assert!(scene.manager().is_built(group));
}

#[test]
fn skinned_objects_and_billboards_are_not_batched() {
    let cache = cache_with_avatar();
    let mut scene = scene();
    let avatar = scene.create_object(None).unwrap();
    scene
        .attach_mesh(avatar, &cache, &"avatar".into(), true, Transform::default())
        .unwrap();
    let sprite = scene.create_object(None).unwrap();
    scene
        .attach_billboard(
            sprite,
            globe_ngin::data_structures::geometry::Billboard {
                width: 1.0,
                height: 1.0,
                colour: [1.0; 4],
                material: "stone".into(),
            },
            &cache.materials,
        )
        .unwrap();

    assert!(scene.object(avatar).unwrap().skeleton().is_some());
    assert_eq!(scene.manager().group_of(avatar), None);
    assert_eq!(scene.manager().group_of(sprite), None);
    assert_eq!(scene.manager().ungrouped("stone").len(), 2);
}

#[test]
fn disabling_batching_tears_everything_down() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let _b = placed(&mut scene, &cache, "stone_quad", 1.0);
    scene.tick_batching(1.0);

    scene.set_batching_enabled(false, &cache.materials);
    assert_eq!(scene.manager().group_count(), 0);
    assert!(!scene.object(a).unwrap().is_batched());
    let _c = placed(&mut scene, &cache, "stone_quad", 2.0);
    assert_eq!(scene.manager().group_count(), 0);

    scene.set_batching_enabled(true, &cache.materials);
    scene.tick_batching(1.0);
    let group = scene.manager().group_of(a).unwrap();
    assert_eq!(scene.manager().object_count(group), 3);
}

#[test]
fn grouping_can_be_switched_off_per_object() {
    let cache = cache();
    let mut scene = scene();
    let a = placed(&mut scene, &cache, "stone_quad", 0.0);
    let b = placed(&mut scene, &cache, "stone_quad", 1.0);

    scene.set_grouping_enabled(b, false, &cache.materials).unwrap();

    let group = scene.manager().group_of(a).unwrap();
    assert!(!scene.manager().contains_object(group, b));
    scene.tick_batching(1.0);
    assert!(!scene.manager().is_built(group));
}
