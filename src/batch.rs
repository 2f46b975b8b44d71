//! Spatial batching of static objects.
//!
//! Nearby objects sharing the same materials and shadow flag are collected in
//! an [`ObjectGroup`] and, once a group has enough members, merged into one
//! [`StaticGeometry`] while the members' own geometry is hidden.
//!
//! Mutations are applied to the bookkeeping immediately but only mark groups
//! dirty; the actual merge runs in [`ObjectManager::tick`] at most once per
//! rebuild interval, so a burst of changes costs a single rebuild.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use cgmath::{InnerSpace, Vector3};

use crate::{
    config::BatchingConfig,
    data_structures::{
        geometry::StaticGeometry, material::MaterialLibrary, scene_graph::SceneGraph,
    },
    error::{EngineError, Result},
    object::{ObjectId, ObjectStore},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// What members of one group must share.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BatchKey {
    /// Sorted, deduplicated material names.
    pub materials: Vec<String>,
    pub cast_shadows: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModificationKind {
    Transform,
    Scale,
    Visibility,
}

#[derive(Debug)]
pub struct ObjectGroup {
    id: GroupId,
    anchor: Vector3<f32>,
    key: BatchKey,
    members: BTreeSet<ObjectId>,
    dirty: bool,
    geometry: Option<StaticGeometry>,
    min_count: usize,
}

impl ObjectGroup {
    fn new(id: GroupId, anchor: Vector3<f32>, key: BatchKey, min_count: usize) -> Self {
        Self {
            id,
            anchor,
            key,
            members: BTreeSet::new(),
            dirty: true,
            geometry: None,
            min_count,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn anchor(&self) -> Vector3<f32> {
        self.anchor
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn members(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.members.iter().copied()
    }

    pub fn object_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.members.contains(&object)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_built(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn geometry(&self) -> Option<&StaticGeometry> {
        self.geometry.as_ref()
    }

    fn add(&mut self, object: ObjectId) {
        self.members.insert(object);
        self.dirty = true;
    }

    fn remove(&mut self, object: ObjectId) -> Result<()> {
        if !self.members.remove(&object) {
            return Err(EngineError::BatchInvariant(format!(
                "{} is not a member of group {}",
                object,
                self.id.raw()
            )));
        }
        self.dirty = true;
        Ok(())
    }

    /// Shows every member's own geometry again and drops the merged one.
    fn unbuild(&mut self, objects: &mut ObjectStore) {
        if self.geometry.take().is_some() {
            log::debug!("unbuilt group {} ({} members)", self.id.raw(), self.members.len());
        }
        for member in &self.members {
            if let Some(object) = objects.get_mut(member) {
                object.set_batched(false);
            }
        }
    }

    /// Regenerates the merged geometry from the members' current state.
    fn build(&mut self, objects: &mut ObjectStore, graph: &SceneGraph) {
        self.dirty = false;
        if self.members.len() < self.min_count {
            self.unbuild(objects);
            return;
        }
        let mut merged = StaticGeometry {
            sections: Vec::new(),
            cast_shadows: self.key.cast_shadows,
        };
        for member in &self.members {
            let Some(object) = objects.get_mut(member) else {
                log::error!("group {} references missing {}", self.id.raw(), member);
                continue;
            };
            let world = object.geometry_transform(graph);
            match object.geometry().and_then(|g| g.submeshes()) {
                Some(submeshes) => {
                    merged.add_mesh(submeshes, &world);
                    object.set_batched(true);
                }
                None => log::error!("{} has nothing to merge", member),
            }
        }
        log::debug!(
            "built group {} from {} members ({} vertices)",
            self.id.raw(),
            self.members.len(),
            merged.vertex_count()
        );
        self.geometry = Some(merged);
    }
}

/// Groups eligible objects by material, shadow flag and proximity.
#[derive(Debug)]
pub struct ObjectManager {
    config: BatchingConfig,
    groups: BTreeMap<GroupId, ObjectGroup>,
    membership: HashMap<ObjectId, GroupId>,
    /// Ineligible objects by material name, retried when a material changes.
    ungrouped: BTreeMap<String, BTreeSet<ObjectId>>,
    next_group: u64,
    rebuild_timer: f32,
}

impl ObjectManager {
    pub fn new(config: BatchingConfig) -> Self {
        Self {
            config,
            groups: BTreeMap::new(),
            membership: HashMap::new(),
            ungrouped: BTreeMap::new(),
            next_group: 0,
            rebuild_timer: 0.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    fn file_ungrouped(&mut self, object: ObjectId, materials: Vec<String>) {
        for material in materials {
            self.ungrouped.entry(material).or_default().insert(object);
        }
    }

    fn unfile(&mut self, object: ObjectId) {
        self.ungrouped.retain(|_, members| {
            members.remove(&object);
            !members.is_empty()
        });
    }

    fn nearest_group(&self, key: &BatchKey, position: Vector3<f32>) -> Option<GroupId> {
        let mut best: Option<(GroupId, f32)> = None;
        for group in self.groups.values().filter(|g| g.key == *key) {
            let distance = (group.anchor - position).magnitude();
            if distance > self.config.grouping_distance {
                continue;
            }
            // strict comparison: on ties the oldest group wins
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((group.id, distance));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Starts tracking `object`: joins or founds a group if it is eligible,
    /// otherwise files it under its materials.
    pub fn object_added(
        &mut self,
        id: ObjectId,
        objects: &mut ObjectStore,
        graph: &SceneGraph,
        materials: &MaterialLibrary,
    ) {
        let Some(object) = objects.get(&id) else {
            log::warn!("tried to add unknown {} to batching", id);
            return;
        };
        if let Some(group) = self.membership.get(&id).and_then(|g| self.groups.get_mut(g)) {
            group.dirty = true;
            return;
        }
        self.unfile(id);

        let eligible = self.config.enabled
            && object.is_grouping_eligible(|m| materials.is_grouping_compatible(m));
        if !eligible {
            self.file_ungrouped(id, object.materials());
            return;
        }

        let key = BatchKey {
            materials: object.materials(),
            cast_shadows: object.geometry().is_some_and(|g| g.casts_shadows()),
        };
        let position = object.position(graph);
        let group_id = match self.nearest_group(&key, position) {
            Some(group_id) => group_id,
            None => {
                let group_id = GroupId(self.next_group);
                self.next_group += 1;
                self.groups.insert(
                    group_id,
                    ObjectGroup::new(group_id, position, key, self.config.min_group_size),
                );
                log::debug!("created group {} at {:?}", group_id.raw(), position);
                group_id
            }
        };
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.add(id);
            self.membership.insert(id, group_id);
        }
    }

    pub fn object_modified(
        &mut self,
        id: ObjectId,
        kind: ModificationKind,
        objects: &mut ObjectStore,
        graph: &SceneGraph,
        materials: &MaterialLibrary,
    ) {
        let visible = objects.get(&id).is_some_and(|o| o.is_visible());
        match kind {
            ModificationKind::Visibility if visible => {
                self.object_added(id, objects, graph, materials)
            }
            ModificationKind::Visibility => {
                self.object_removed(id, objects);
                // keep it where a later material change can find it
                if let Some(object) = objects.get(&id) {
                    self.file_ungrouped(id, object.materials());
                }
            }
            ModificationKind::Transform | ModificationKind::Scale => {
                let Some(group_id) = self.membership.get(&id).copied() else {
                    return;
                };
                let anchor = match self.groups.get(&group_id) {
                    Some(group) => group.anchor,
                    None => return,
                };
                let position = objects
                    .get(&id)
                    .map(|o| o.position(graph))
                    .unwrap_or(anchor);
                if (position - anchor).magnitude() > self.config.grouping_distance {
                    self.object_removed(id, objects);
                    self.object_added(id, objects, graph, materials);
                } else if let Some(group) = self.groups.get_mut(&group_id) {
                    group.dirty = true;
                }
            }
        }
    }

    /// Stops tracking `object`. Groups left empty are deleted.
    pub fn object_removed(&mut self, id: ObjectId, objects: &mut ObjectStore) {
        self.unfile(id);
        let Some(group_id) = self.membership.remove(&id) else {
            return;
        };
        let Some(group) = self.groups.get_mut(&group_id) else {
            log::error!("{} belonged to missing group {}", id, group_id.raw());
            return;
        };
        if let Err(e) = group.remove(id) {
            log::error!("{}", e);
            return;
        }
        if let Some(object) = objects.get_mut(&id) {
            object.set_batched(false);
        }
        if group.members.is_empty() {
            group.unbuild(objects);
            self.groups.remove(&group_id);
            log::debug!("deleted empty group {}", group_id.raw());
        }
    }

    /// Reacts to a material edit: incompatible materials tear their groups
    /// down, newly compatible ones re-offer the objects waiting on them.
    pub fn material_modified(
        &mut self,
        material: &str,
        objects: &mut ObjectStore,
        graph: &SceneGraph,
        materials: &MaterialLibrary,
    ) {
        if materials.is_grouping_compatible(material) {
            let waiting: Vec<ObjectId> = self
                .ungrouped
                .get(material)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for id in waiting {
                self.object_added(id, objects, graph, materials);
            }
            return;
        }

        let affected: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.key.materials.iter().any(|m| m == material))
            .map(|g| g.id)
            .collect();
        for group_id in affected {
            self.dissolve(group_id, objects);
        }
    }

    /// Deletes a group and files its members as ungrouped.
    fn dissolve(&mut self, group_id: GroupId, objects: &mut ObjectStore) {
        let Some(mut group) = self.groups.remove(&group_id) else {
            return;
        };
        group.unbuild(objects);
        for member in std::mem::take(&mut group.members) {
            self.membership.remove(&member);
            if let Some(object) = objects.get(&member) {
                self.file_ungrouped(member, object.materials());
            }
        }
        log::debug!("dissolved group {}", group_id.raw());
    }

    /// Turns batching on or off. Off dissolves every group.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
        objects: &mut ObjectStore,
        graph: &SceneGraph,
        materials: &MaterialLibrary,
    ) {
        if self.config.enabled == enabled {
            return;
        }
        self.config.enabled = enabled;
        if enabled {
            let waiting: BTreeSet<ObjectId> = self.ungrouped.values().flatten().copied().collect();
            for id in waiting {
                self.object_added(id, objects, graph, materials);
            }
        } else {
            let all: Vec<GroupId> = self.groups.keys().copied().collect();
            for group_id in all {
                self.dissolve(group_id, objects);
            }
        }
    }

    /// Advances the rebuild throttle and rebuilds every dirty group once it
    /// elapses. Returns the number of groups rebuilt.
    pub fn tick(&mut self, dt: f32, objects: &mut ObjectStore, graph: &SceneGraph) -> usize {
        self.rebuild_timer -= dt;
        if self.rebuild_timer > 0.0 {
            return 0;
        }
        self.rebuild_timer = self.config.rebuild_interval_secs;
        self.rebuild_dirty(objects, graph)
    }

    /// Rebuilds dirty groups right away, ignoring the throttle.
    pub fn rebuild_dirty(&mut self, objects: &mut ObjectStore, graph: &SceneGraph) -> usize {
        let mut rebuilt = 0;
        for group in self.groups.values_mut().filter(|g| g.dirty) {
            group.build(objects, graph);
            rebuilt += 1;
        }
        rebuilt
    }

    pub fn group_of(&self, object: ObjectId) -> Option<GroupId> {
        self.membership.get(&object).copied()
    }

    pub fn group(&self, id: GroupId) -> Option<&ObjectGroup> {
        self.groups.get(&id)
    }

    pub fn is_built(&self, id: GroupId) -> bool {
        self.groups.get(&id).is_some_and(ObjectGroup::is_built)
    }

    pub fn object_count(&self, id: GroupId) -> usize {
        self.groups.get(&id).map_or(0, ObjectGroup::object_count)
    }

    pub fn contains_object(&self, id: GroupId, object: ObjectId) -> bool {
        self.groups.get(&id).is_some_and(|g| g.contains(object))
    }

    pub fn groups(&self) -> impl Iterator<Item = &ObjectGroup> {
        self.groups.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn ungrouped(&self, material: &str) -> Vec<ObjectId> {
        self.ungrouped
            .get(material)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dirty_count(&self) -> usize {
        self.groups.values().filter(|g| g.dirty).count()
    }
}
