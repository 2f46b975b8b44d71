//! Scene objects: one renderable entity mirrored from a host domain object.
//!
//! A [`SceneObject`] exclusively owns its scene-graph node (plus an optional
//! offset sub-node) and whatever it attaches to it: at most one geometry
//! representation, a point light, particle systems and, for skinned meshes,
//! a skeleton instance driven by its [`AnimationSet`].
//!
//! Methods here only touch the object and its nodes. Telling the batching
//! manager about changes is the job of [`crate::scene::Scene`], which reads
//! the "did it change" results these methods return.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use cgmath::{Quaternion, Vector3};

use crate::{
    animation::{AnimationLod, AnimationSet, LinkedClip, LinkedClipUpdate, Priority},
    data_structures::{
        geometry::{Aabb, Billboard, ManualGeometry, MeshData, SubMesh},
        light::PointLight,
        scene_graph::{NodeId, SceneGraph},
        skeleton::SkeletonInstance,
        transform::{Transform, position_differs, rotation_differs},
    },
    error::{EngineError, Result},
    resources::{AssetId, AssetKind, ResourceCache, particle::ParticleTemplate},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Every live object, ordered by id.
pub type ObjectStore = BTreeMap<ObjectId, SceneObject>;

/// Identifier of the host-side object this one mirrors. Lookup only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DomainId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryKind {
    Mesh,
    Billboard,
    Manual,
}

#[derive(Clone, Debug)]
pub enum Geometry {
    Mesh {
        id: AssetId,
        mesh: Arc<MeshData>,
        cast_shadows: bool,
    },
    Billboard(Billboard),
    Manual(ManualGeometry),
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Mesh { .. } => GeometryKind::Mesh,
            Geometry::Billboard(_) => GeometryKind::Billboard,
            Geometry::Manual(_) => GeometryKind::Manual,
        }
    }

    pub fn materials(&self) -> Vec<String> {
        match self {
            Geometry::Mesh { mesh, .. } => mesh.materials(),
            Geometry::Billboard(billboard) => vec![billboard.material.clone()],
            Geometry::Manual(manual) => manual.materials(),
        }
    }

    /// Triangle data that can be merged into static geometry.
    pub fn submeshes(&self) -> Option<&[SubMesh]> {
        match self {
            Geometry::Mesh { mesh, .. } => Some(&mesh.submeshes),
            Geometry::Manual(manual) => Some(&manual.sections),
            Geometry::Billboard(_) => None,
        }
    }

    pub fn casts_shadows(&self) -> bool {
        match self {
            Geometry::Mesh { cast_shadows, .. } => *cast_shadows,
            _ => false,
        }
    }

    fn local_bounds(&self) -> Option<Aabb> {
        match self {
            Geometry::Mesh { mesh, .. } => Some(mesh.bounds),
            Geometry::Manual(manual) => manual.bounds(),
            Geometry::Billboard(b) => Some(Aabb {
                min: Vector3::new(-b.width / 2.0, -b.height / 2.0, 0.0),
                max: Vector3::new(b.width / 2.0, b.height / 2.0, 0.0),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParticleSystem {
    pub script: AssetId,
    pub template: Arc<ParticleTemplate>,
}

/// One step of object destruction, in the order they happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    Mesh,
    ManualObject,
    Light,
    Billboard,
    ParticleSystems,
    OffsetNode,
    Node,
}

#[derive(Debug)]
pub struct SceneObject {
    id: ObjectId,
    domain: Option<DomainId>,
    node: NodeId,
    offset_node: Option<NodeId>,
    geometry: Option<Geometry>,
    light: Option<PointLight>,
    particles: Vec<ParticleSystem>,
    skeleton: Option<SkeletonInstance>,
    animations: AnimationSet,
    grouping: bool,
    visible: bool,
    /// The geometry is drawn as part of a built batch instead.
    batched: bool,
    epsilon: f32,
}

impl SceneObject {
    /// Creates the object's node under the scene root. Fails if the graph
    /// has been shut down.
    pub fn new(
        id: ObjectId,
        domain: Option<DomainId>,
        graph: &mut SceneGraph,
        epsilon: f32,
    ) -> Result<Self> {
        let node = graph.create_child(graph.root(), &format!("object{}", id))?;
        Ok(Self {
            id,
            domain,
            node,
            offset_node: None,
            geometry: None,
            light: None,
            particles: Vec::new(),
            skeleton: None,
            animations: AnimationSet::new(),
            grouping: true,
            visible: true,
            batched: false,
            epsilon,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn domain(&self) -> Option<DomainId> {
        self.domain
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The node geometry hangs off: the offset node if there is one.
    pub fn geometry_node(&self) -> NodeId {
        self.offset_node.unwrap_or(self.node)
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn geometry_kind(&self) -> Option<GeometryKind> {
        self.geometry.as_ref().map(Geometry::kind)
    }

    pub fn light(&self) -> Option<&PointLight> {
        self.light.as_ref()
    }

    pub fn particle_systems(&self) -> &[ParticleSystem] {
        &self.particles
    }

    pub fn skeleton(&self) -> Option<&SkeletonInstance> {
        self.skeleton.as_ref()
    }

    pub fn animations(&self) -> &AnimationSet {
        &self.animations
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_batched(&self) -> bool {
        self.batched
    }

    pub(crate) fn set_batched(&mut self, batched: bool) {
        self.batched = batched;
    }

    pub fn grouping_enabled(&self) -> bool {
        self.grouping
    }

    pub fn set_grouping_enabled(&mut self, grouping: bool) {
        self.grouping = grouping;
    }

    pub fn materials(&self) -> Vec<String> {
        let mut materials = self
            .geometry
            .as_ref()
            .map(Geometry::materials)
            .unwrap_or_default();
        materials.sort();
        materials.dedup();
        materials
    }

    pub fn world_transform(&self, graph: &SceneGraph) -> Transform {
        graph.world_transform(self.node).unwrap_or_default()
    }

    pub fn geometry_transform(&self, graph: &SceneGraph) -> Transform {
        graph.world_transform(self.geometry_node()).unwrap_or_default()
    }

    pub fn position(&self, graph: &SceneGraph) -> Vector3<f32> {
        self.world_transform(graph).position
    }

    /// World-space bounding box of the attached geometry.
    pub fn bounding_box(&self, graph: &SceneGraph) -> Option<Aabb> {
        let local = self.geometry.as_ref()?.local_bounds()?;
        Some(local.transformed(&self.geometry_transform(graph)))
    }

    /// Static, shadow-compatible and mergeable: what batching needs.
    ///
    /// `compatible` tells whether a material may be merged.
    pub fn is_grouping_eligible(&self, compatible: impl Fn(&str) -> bool) -> bool {
        let Some(geometry) = &self.geometry else {
            return false;
        };
        self.grouping
            && self.visible
            && self.skeleton.is_none()
            && geometry.submeshes().is_some()
            && geometry.materials().iter().all(|m| compatible(m.as_str()))
    }

    /// Replaces the geometry with `mesh_id` from `cache`.
    ///
    /// On failure the object is left with no geometry.
    pub fn attach_mesh(
        &mut self,
        graph: &mut SceneGraph,
        cache: &ResourceCache,
        mesh_id: &AssetId,
        cast_shadows: bool,
        offset: Transform,
    ) -> Result<()> {
        self.detach_geometry(graph);
        let mesh = cache
            .mesh(mesh_id)
            .ok_or_else(|| EngineError::ResourceNotFound {
                kind: AssetKind::Mesh,
                id: mesh_id.clone(),
            })?;

        if offset != Transform::default() {
            let offset_node = graph.create_child(self.node, &format!("object{}/offset", self.id))?;
            graph.set_local_transform(offset_node, offset);
            self.offset_node = Some(offset_node);
        }

        if let Some(skeleton_id) = &mesh.skeleton {
            match cache.skeleton(&AssetId::new(skeleton_id.as_str())) {
                Some(skeleton) => self.skeleton = Some(SkeletonInstance::new(skeleton)),
                None => log::warn!(
                    "skeleton '{}' of mesh '{}' is not loaded, {} renders unanimated",
                    skeleton_id,
                    mesh_id,
                    self.id
                ),
            }
        }

        self.geometry = Some(Geometry::Mesh {
            id: mesh_id.clone(),
            mesh,
            cast_shadows,
        });
        Ok(())
    }

    pub fn attach_billboard(&mut self, graph: &mut SceneGraph, billboard: Billboard) {
        self.detach_geometry(graph);
        self.geometry = Some(Geometry::Billboard(billboard));
    }

    pub fn attach_manual_geometry(&mut self, graph: &mut SceneGraph, manual: ManualGeometry) {
        self.detach_geometry(graph);
        self.geometry = Some(Geometry::Manual(manual));
    }

    /// Drops the current geometry (and the skeleton that came with it).
    /// Returns whether anything was attached.
    pub fn detach_geometry(&mut self, graph: &mut SceneGraph) -> bool {
        let had = self.geometry.take().is_some();
        if let Some(offset) = self.offset_node.take() {
            graph.destroy(offset);
        }
        if self.skeleton.take().is_some() {
            self.animations = AnimationSet::new();
        }
        self.batched = false;
        had
    }

    fn update_local(&mut self, graph: &mut SceneGraph, edit: impl FnOnce(&mut Transform) -> bool) -> bool {
        let mut local = graph.local_transform(self.node).unwrap_or_default();
        if !edit(&mut local) {
            return false;
        }
        graph.set_local_transform(self.node, local);
        true
    }

    /// Returns whether the position moved by more than the epsilon.
    pub fn set_position(&mut self, graph: &mut SceneGraph, position: Vector3<f32>) -> bool {
        let epsilon = self.epsilon;
        self.update_local(graph, |t| {
            if !position_differs(t.position, position, epsilon) {
                return false;
            }
            t.position = position;
            true
        })
    }

    pub fn set_orientation(&mut self, graph: &mut SceneGraph, rotation: Quaternion<f32>) -> bool {
        let epsilon = self.epsilon;
        self.update_local(graph, |t| {
            if !rotation_differs(t.rotation, rotation, epsilon) {
                return false;
            }
            t.rotation = rotation;
            true
        })
    }

    pub fn set_scale(&mut self, graph: &mut SceneGraph, scale: Vector3<f32>) -> bool {
        let epsilon = self.epsilon;
        self.update_local(graph, |t| {
            if !position_differs(t.scale, scale, epsilon) {
                return false;
            }
            t.scale = scale;
            true
        })
    }

    /// Hides or shows the node. Particle systems keep emitting either way.
    pub fn set_visible(&mut self, graph: &mut SceneGraph, visible: bool) -> bool {
        if self.visible == visible {
            return false;
        }
        self.visible = visible;
        graph.set_visible(self.node, visible);
        true
    }

    pub fn set_light(&mut self, light: Option<PointLight>) {
        self.light = light;
    }

    pub fn add_particle_system(&mut self, script: AssetId, template: Arc<ParticleTemplate>) {
        self.particles.push(ParticleSystem { script, template });
    }

    pub fn remove_particle_systems(&mut self) -> usize {
        std::mem::take(&mut self.particles).len()
    }

    fn skeleton_mut(&mut self) -> Option<&mut SkeletonInstance> {
        if self.skeleton.is_none() {
            log::warn!("{} has no skeleton to animate", self.id);
        }
        self.skeleton.as_mut()
    }

    pub fn enable_animation(&mut self, clip: &str, looped: bool, fade_in: f32, priority: Priority) -> bool {
        let Some(skeleton) = self.skeleton.as_mut() else {
            log::warn!("{} has no skeleton to animate", self.id);
            return false;
        };
        self.animations.enable(skeleton, clip, looped, fade_in, priority)
    }

    pub fn enable_exclusive_animation(
        &mut self,
        clip: &str,
        looped: bool,
        fade_in: f32,
        priority: Priority,
        sibling_fade_out: f32,
    ) -> bool {
        let Some(skeleton) = self.skeleton.as_mut() else {
            log::warn!("{} has no skeleton to animate", self.id);
            return false;
        };
        self.animations
            .enable_exclusive(skeleton, clip, looped, fade_in, priority, sibling_fade_out)
    }

    pub fn disable_animation(&mut self, clip: &str, fade_out: f32) {
        self.animations.disable(clip, fade_out);
    }

    pub fn disable_all_animations(&mut self, fade_out: f32) {
        self.animations.disable_all(fade_out);
    }

    /// Removes `clip` at once. Returns the linked clips to switch off.
    pub fn force_disable_animation(&mut self, clip: &str) -> Vec<LinkedClipUpdate> {
        match self.skeleton.as_mut() {
            Some(skeleton) => self.animations.force_disable(skeleton, clip),
            None => Vec::new(),
        }
    }

    pub fn set_animation_speed(&mut self, clip: &str, speed: f32) {
        self.animations.set_speed(clip, speed);
    }

    pub fn set_animation_weight_factor(&mut self, clip: &str, factor: f32) {
        self.animations.set_weight_factor(clip, factor);
    }

    pub fn set_animation_repeat(&mut self, clip: &str, repeat: u32) {
        self.animations.set_repeat(clip, repeat);
    }

    /// Mirrors `clip` onto `target_clip` of another object.
    pub fn link_animation(&mut self, clip: &str, target: ObjectId, target_clip: &str) -> bool {
        self.animations.link(
            clip,
            LinkedClip {
                object: target,
                clip: target_clip.to_string(),
            },
        )
    }

    pub(crate) fn unlink_animations_to(&mut self, target: ObjectId) {
        self.animations.unlink_object(target);
    }

    pub(crate) fn apply_linked(&mut self, update: &LinkedClipUpdate) {
        if let Some(skeleton) = self.skeleton_mut() {
            crate::animation::apply_linked(skeleton, update);
        }
    }

    /// Advances the animations unless the LOD policy skips this frame.
    ///
    /// Returns `None` when nothing was updated, otherwise the linked clip
    /// states other objects have to mirror.
    pub fn update_animations(
        &mut self,
        dt: f32,
        camera_distance_sq: f32,
        lod: &AnimationLod,
    ) -> Option<Vec<LinkedClipUpdate>> {
        let skeleton = self.skeleton.as_mut()?;
        if self.animations.is_empty() {
            return None;
        }
        let step = self.animations.lod_step(dt, camera_distance_sq, lod)?;
        Some(self.animations.update(step, skeleton))
    }

    /// Tears the object down in a fixed order and returns the steps taken.
    pub fn destroy(mut self, graph: &mut SceneGraph) -> Vec<TeardownStep> {
        let mut steps = Vec::new();
        let geometry = self.geometry.take();
        if let Some(Geometry::Mesh { .. }) = &geometry {
            self.skeleton = None;
            steps.push(TeardownStep::Mesh);
        }
        if let Some(Geometry::Manual(_)) = &geometry {
            steps.push(TeardownStep::ManualObject);
        }
        if self.light.take().is_some() {
            steps.push(TeardownStep::Light);
        }
        if let Some(Geometry::Billboard(_)) = &geometry {
            steps.push(TeardownStep::Billboard);
        }
        if !self.particles.is_empty() {
            self.particles.clear();
            steps.push(TeardownStep::ParticleSystems);
        }
        if let Some(offset) = self.offset_node.take() {
            graph.destroy(offset);
            steps.push(TeardownStep::OffsetNode);
        }
        graph.destroy(self.node);
        steps.push(TeardownStep::Node);
        log::debug!("destroyed {}: {:?}", self.id, steps);
        steps
    }
}

/// Maps scene nodes back to the object that owns them, for hit-testing.
#[derive(Debug, Default)]
pub struct PickTable {
    nodes: HashMap<NodeId, ObjectId>,
}

impl PickTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(&mut self, node: NodeId, object: ObjectId) {
        self.nodes.insert(node, object);
    }

    pub fn untag_object(&mut self, object: ObjectId) {
        self.nodes.retain(|_, o| *o != object);
    }

    pub fn object_at(&self, node: NodeId) -> Option<ObjectId> {
        self.nodes.get(&node).copied()
    }

    /// Finds the owning object of `node` or its closest tagged ancestor.
    pub fn resolve(&self, graph: &SceneGraph, node: NodeId) -> Option<ObjectId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(object) = self.object_at(id) {
                return Some(object);
            }
            current = graph.node(id).and_then(|n| n.parent());
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
