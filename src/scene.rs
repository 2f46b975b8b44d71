//! The scene: graph, objects, batching and hit-testing in one place.
//!
//! Every object mutation goes through [`Scene`] so the batching manager hears
//! about it synchronously, in the order the host made the changes.

use std::sync::Arc;

use cgmath::{InnerSpace, Quaternion, Vector3};

use crate::{
    animation::{AnimationLod, LinkedClipUpdate, Priority},
    batch::{ModificationKind, ObjectManager},
    config::EngineConfig,
    data_structures::{
        geometry::{Billboard, ManualGeometry},
        light::PointLight,
        material::MaterialLibrary,
        scene_graph::{NodeId, SceneGraph},
        transform::Transform,
    },
    error::{EngineError, Result},
    object::{DomainId, ObjectId, ObjectStore, PickTable, SceneObject, TeardownStep},
    resources::{AssetId, AssetKind, ResourceCache},
};

pub struct Scene {
    graph: SceneGraph,
    objects: ObjectStore,
    manager: ObjectManager,
    picks: PickTable,
    next_object: u64,
    epsilon: f32,
    /// Fade period used when an animation command does not name one.
    default_fade: f32,
}

impl Scene {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            graph: SceneGraph::new(),
            objects: ObjectStore::new(),
            manager: ObjectManager::new(config.batching.clone()),
            picks: PickTable::new(),
            next_object: 1,
            epsilon: config.transform_epsilon,
            default_fade: config.animation.default_fade_secs,
        }
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn manager(&self) -> &ObjectManager {
        &self.manager
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn fade_or_default(&self, fade: Option<f32>) -> f32 {
        fade.unwrap_or(self.default_fade)
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut SceneObject> {
        self.objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))
    }

    pub fn create_object(&mut self, domain: Option<DomainId>) -> Result<ObjectId> {
        let id = ObjectId::new(self.next_object);
        let object = SceneObject::new(id, domain, &mut self.graph, self.epsilon)?;
        self.next_object += 1;
        self.objects.insert(id, object);
        Ok(id)
    }

    pub fn find_by_domain(&self, domain: DomainId) -> Option<ObjectId> {
        self.objects
            .values()
            .find(|o| o.domain() == Some(domain))
            .map(SceneObject::id)
    }

    /// Removes `id` from batching and hit-testing and tears it down.
    pub fn destroy_object(&mut self, id: ObjectId) -> Result<Vec<TeardownStep>> {
        if !self.objects.contains_key(&id) {
            return Err(EngineError::UnknownObject(id.raw()));
        }
        self.manager.object_removed(id, &mut self.objects);
        self.picks.untag_object(id);
        for object in self.objects.values_mut() {
            object.unlink_animations_to(id);
        }
        let object = self
            .objects
            .remove(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))?;
        Ok(object.destroy(&mut self.graph))
    }

    /// Runs `attach` between removing the object from batching and offering
    /// it again, keeping the pick tag in sync with the geometry.
    fn reattach<T>(
        &mut self,
        id: ObjectId,
        materials: &MaterialLibrary,
        attach: impl FnOnce(&mut SceneObject, &mut SceneGraph) -> Result<T>,
    ) -> Result<T> {
        if !self.objects.contains_key(&id) {
            return Err(EngineError::UnknownObject(id.raw()));
        }
        self.manager.object_removed(id, &mut self.objects);
        self.picks.untag_object(id);
        let graph = &mut self.graph;
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))?;
        let result = attach(object, graph);
        let nodes = self
            .objects
            .get(&id)
            .filter(|o| o.has_geometry())
            .map(|o| (o.node(), o.geometry_node()));
        if let Some((node, geometry_node)) = nodes {
            self.picks.tag(node, id);
            self.picks.tag(geometry_node, id);
            self.manager
                .object_added(id, &mut self.objects, &self.graph, materials);
        }
        result
    }

    /// Attaches the mesh `mesh_id`; on failure the object has no geometry.
    pub fn attach_mesh(
        &mut self,
        id: ObjectId,
        cache: &ResourceCache,
        mesh_id: &AssetId,
        cast_shadows: bool,
        offset: Transform,
    ) -> Result<()> {
        self.reattach(id, &cache.materials, |object, graph| {
            object.attach_mesh(graph, cache, mesh_id, cast_shadows, offset)
        })
        .inspect_err(|e| log::warn!("{} could not attach mesh: {}", id, e))
    }

    pub fn attach_billboard(
        &mut self,
        id: ObjectId,
        billboard: Billboard,
        materials: &MaterialLibrary,
    ) -> Result<()> {
        self.reattach(id, materials, |object, graph| {
            object.attach_billboard(graph, billboard);
            Ok(())
        })
    }

    pub fn attach_manual_geometry(
        &mut self,
        id: ObjectId,
        manual: ManualGeometry,
        materials: &MaterialLibrary,
    ) -> Result<()> {
        self.reattach(id, materials, |object, graph| {
            object.attach_manual_geometry(graph, manual);
            Ok(())
        })
    }

    pub fn detach_geometry(&mut self, id: ObjectId) -> Result<bool> {
        if !self.objects.contains_key(&id) {
            return Err(EngineError::UnknownObject(id.raw()));
        }
        self.manager.object_removed(id, &mut self.objects);
        self.picks.untag_object(id);
        let graph = &mut self.graph;
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))?;
        Ok(object.detach_geometry(graph))
    }

    fn notify(&mut self, id: ObjectId, kind: ModificationKind, materials: &MaterialLibrary) {
        self.manager
            .object_modified(id, kind, &mut self.objects, &self.graph, materials);
    }

    pub fn set_position(
        &mut self,
        id: ObjectId,
        position: Vector3<f32>,
        materials: &MaterialLibrary,
    ) -> Result<bool> {
        let graph = &mut self.graph;
        let changed = self
            .objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))?
            .set_position(graph, position);
        if changed {
            self.notify(id, ModificationKind::Transform, materials);
        }
        Ok(changed)
    }

    pub fn set_orientation(
        &mut self,
        id: ObjectId,
        rotation: Quaternion<f32>,
        materials: &MaterialLibrary,
    ) -> Result<bool> {
        let graph = &mut self.graph;
        let changed = self
            .objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))?
            .set_orientation(graph, rotation);
        if changed {
            self.notify(id, ModificationKind::Transform, materials);
        }
        Ok(changed)
    }

    pub fn set_scale(
        &mut self,
        id: ObjectId,
        scale: Vector3<f32>,
        materials: &MaterialLibrary,
    ) -> Result<bool> {
        let graph = &mut self.graph;
        let changed = self
            .objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))?
            .set_scale(graph, scale);
        if changed {
            self.notify(id, ModificationKind::Scale, materials);
        }
        Ok(changed)
    }

    pub fn set_visible(
        &mut self,
        id: ObjectId,
        visible: bool,
        materials: &MaterialLibrary,
    ) -> Result<bool> {
        let graph = &mut self.graph;
        let changed = self
            .objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.raw()))?
            .set_visible(graph, visible);
        if changed {
            self.notify(id, ModificationKind::Visibility, materials);
        }
        Ok(changed)
    }

    /// Opts one object in or out of batching.
    pub fn set_grouping_enabled(
        &mut self,
        id: ObjectId,
        grouping: bool,
        materials: &MaterialLibrary,
    ) -> Result<()> {
        let object = self.object_mut(id)?;
        if object.grouping_enabled() == grouping {
            return Ok(());
        }
        object.set_grouping_enabled(grouping);
        self.manager.object_removed(id, &mut self.objects);
        self.manager
            .object_added(id, &mut self.objects, &self.graph, materials);
        Ok(())
    }

    pub fn set_light(&mut self, id: ObjectId, light: Option<PointLight>) -> Result<()> {
        self.object_mut(id)?.set_light(light);
        Ok(())
    }

    pub fn add_particle_system(
        &mut self,
        id: ObjectId,
        cache: &ResourceCache,
        script: &AssetId,
    ) -> Result<()> {
        let template = cache
            .particle(script)
            .ok_or_else(|| EngineError::ResourceNotFound {
                kind: AssetKind::ParticleScript,
                id: script.clone(),
            })?;
        self.object_mut(id)?
            .add_particle_system(script.clone(), Arc::clone(&template));
        Ok(())
    }

    pub fn remove_particle_systems(&mut self, id: ObjectId) -> Result<usize> {
        Ok(self.object_mut(id)?.remove_particle_systems())
    }

    pub fn enable_animation(
        &mut self,
        id: ObjectId,
        clip: &str,
        looped: bool,
        fade_in: Option<f32>,
        priority: Priority,
    ) -> Result<bool> {
        let fade_in = self.fade_or_default(fade_in);
        Ok(self
            .object_mut(id)?
            .enable_animation(clip, looped, fade_in, priority))
    }

    pub fn enable_exclusive_animation(
        &mut self,
        id: ObjectId,
        clip: &str,
        looped: bool,
        fade_in: Option<f32>,
        priority: Priority,
        sibling_fade_out: Option<f32>,
    ) -> Result<bool> {
        let fade_in = self.fade_or_default(fade_in);
        let sibling_fade_out = self.fade_or_default(sibling_fade_out);
        Ok(self.object_mut(id)?.enable_exclusive_animation(
            clip,
            looped,
            fade_in,
            priority,
            sibling_fade_out,
        ))
    }

    pub fn disable_animation(
        &mut self,
        id: ObjectId,
        clip: &str,
        fade_out: Option<f32>,
    ) -> Result<()> {
        let fade_out = self.fade_or_default(fade_out);
        self.object_mut(id)?.disable_animation(clip, fade_out);
        Ok(())
    }

    pub fn disable_all_animations(&mut self, id: ObjectId, fade_out: Option<f32>) -> Result<()> {
        let fade_out = self.fade_or_default(fade_out);
        self.object_mut(id)?.disable_all_animations(fade_out);
        Ok(())
    }

    pub fn force_disable_animation(&mut self, id: ObjectId, clip: &str) -> Result<()> {
        let linked = self.object_mut(id)?.force_disable_animation(clip);
        self.apply_linked(&linked);
        Ok(())
    }

    /// Makes `target_clip` on `target` follow `clip` on `source`.
    pub fn link_animation(
        &mut self,
        source: ObjectId,
        clip: &str,
        target: ObjectId,
        target_clip: &str,
    ) -> Result<bool> {
        if !self.objects.contains_key(&target) {
            return Err(EngineError::UnknownObject(target.raw()));
        }
        Ok(self
            .object_mut(source)?
            .link_animation(clip, target, target_clip))
    }

    pub fn set_animation_speed(&mut self, id: ObjectId, clip: &str, speed: f32) -> Result<()> {
        self.object_mut(id)?.set_animation_speed(clip, speed);
        Ok(())
    }

    pub fn set_animation_weight_factor(
        &mut self,
        id: ObjectId,
        clip: &str,
        factor: f32,
    ) -> Result<()> {
        self.object_mut(id)?.set_animation_weight_factor(clip, factor);
        Ok(())
    }

    pub fn set_animation_repeat(&mut self, id: ObjectId, clip: &str, repeat: u32) -> Result<()> {
        self.object_mut(id)?.set_animation_repeat(clip, repeat);
        Ok(())
    }

    fn apply_linked(&mut self, updates: &[LinkedClipUpdate]) {
        for update in updates {
            match self.objects.get_mut(&update.object) {
                Some(target) => target.apply_linked(update),
                None => log::debug!("linked target {} is gone", update.object),
            }
        }
    }

    /// Advances every object's animations. Returns how many objects actually
    /// updated this frame.
    pub fn update_animations(&mut self, dt: f32, camera: Vector3<f32>, lod: &AnimationLod) -> usize {
        let mut updated = 0;
        let mut linked = Vec::new();
        for object in self.objects.values_mut() {
            let distance_sq = (object.position(&self.graph) - camera).magnitude2();
            if let Some(updates) = object.update_animations(dt, distance_sq, lod) {
                updated += 1;
                linked.extend(updates);
            }
        }
        self.apply_linked(&linked);
        updated
    }

    pub fn material_modified(&mut self, material: &str, materials: &MaterialLibrary) {
        self.manager
            .material_modified(material, &mut self.objects, &self.graph, materials);
    }

    pub fn set_batching_enabled(&mut self, enabled: bool, materials: &MaterialLibrary) {
        self.manager
            .set_enabled(enabled, &mut self.objects, &self.graph, materials);
    }

    /// Per-frame batching work. Returns the number of groups rebuilt.
    pub fn tick_batching(&mut self, dt: f32) -> usize {
        self.manager.tick(dt, &mut self.objects, &self.graph)
    }

    /// Rebuilds dirty groups now, bypassing the throttle.
    pub fn flush_batching(&mut self) -> usize {
        self.manager.rebuild_dirty(&mut self.objects, &self.graph)
    }

    /// The object a hit on `node` belongs to.
    pub fn pick(&self, node: NodeId) -> Option<ObjectId> {
        self.picks.resolve(&self.graph, node)
    }

    /// Destroys every object in id order and closes the graph.
    pub fn shutdown(&mut self) {
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.destroy_object(id) {
                log::error!("{}", e);
            }
        }
        self.graph.shutdown();
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        if !self.objects.is_empty() {
            self.shutdown();
        }
    }
}
