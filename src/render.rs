//! Per-frame rendering facade.
//!
//! [`Renderer`] owns the [`Scene`], the camera, the sun/moon light, fog and
//! the geometry rebuild worklist, and drives them once per host frame. What
//! ends up on screen is described by a [`Frame`] that is handed to a
//! [`FrameSink`], the seam where an actual graphics backend plugs in.
//!
//! # Key types
//!
//! - [`Draw<'a>`] is one draw operation borrowed from the scene
//! - [`Frame<'a>`] collects every draw plus the global lighting state
//! - [`HostView`] is what the renderer asks the host application each frame
//!

use std::collections::{HashSet, VecDeque};

use cgmath::{Deg, Matrix4, One, Quaternion, SquareMatrix, Vector3};
use instant::{Duration, Instant};

use crate::{
    animation::AnimationLod,
    batch::GroupId,
    config::{EngineConfig, FogConfig, RendererConfig},
    context::ContextSwitcher,
    data_structures::{
        geometry::{ManualGeometry, StaticGeometry},
        light::{DirectionalLight, Fog, PointLight},
        material::MaterialLibrary,
        transform::Transform,
    },
    object::{DomainId, Geometry, ObjectId, ParticleSystem},
    scene::Scene,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::one(),
            fov_y: 60.0,
            near: 0.1,
            far: 1024.0,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Matrix4<f32> {
        let eye = Transform {
            position: self.position,
            rotation: self.rotation,
            scale: Vector3::new(1.0, 1.0, 1.0),
        };
        eye.to_matrix().invert().unwrap_or(Matrix4::one())
    }

    pub fn projection_matrix(&self, aspect: f32) -> Matrix4<f32> {
        cgmath::perspective(Deg(self.fov_y), aspect, self.near, self.far)
    }
}

/// What the renderer needs from the host application each frame.
pub trait HostView {
    /// Normalized day cycle: 0 is midnight, 0.5 is noon.
    fn time_of_day(&self) -> f32;

    fn camera(&self) -> Camera;

    /// Regenerates geometry for a queued object. `None` leaves it unchanged.
    fn build_geometry(&self, domain: DomainId) -> Option<ManualGeometry>;
}

/// Receives finished frames. A graphics backend implements this.
pub trait FrameSink {
    fn submit(&mut self, frame: &Frame<'_>);
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn submit(&mut self, _frame: &Frame<'_>) {}
}

/// Describes one draw operation.
///
/// # Variants
///
/// - `Object` draws a single object with its own geometry, skinned by `pose`
///   when it carries a skeleton
/// - `Batch` draws the merged geometry of a built group
/// - `Particles` draws one particle system at its emitter
///
pub enum Draw<'a> {
    Object {
        id: ObjectId,
        geometry: &'a Geometry,
        world: Transform,
        pose: Option<Vec<Transform>>,
    },
    Batch {
        group: GroupId,
        geometry: &'a StaticGeometry,
    },
    Particles {
        id: ObjectId,
        system: &'a ParticleSystem,
        world: Transform,
    },
}

pub struct Frame<'a> {
    pub camera: Camera,
    pub sun: DirectionalLight,
    pub fog: Fog,
    pub draws: Vec<Draw<'a>>,
    pub lights: Vec<(ObjectId, Vector3<f32>, PointLight)>,
    /// Set when the statistics overlay is enabled.
    pub stats: Option<&'a FrameStats>,
}

impl<'a> Frame<'a> {
    /// Collects what is visible in `scene`.
    fn collect(scene: &'a Scene, camera: Camera, environment: &Environment) -> Self {
        let graph = scene.graph();
        let mut draws = Vec::new();
        let mut lights = Vec::new();

        for object in scene.objects() {
            let world = object.world_transform(graph);
            let visible = graph.is_visible(object.node());
            if visible && !object.is_batched() {
                if let Some(geometry) = object.geometry() {
                    draws.push(Draw::Object {
                        id: object.id(),
                        geometry,
                        world: object.geometry_transform(graph),
                        pose: object.skeleton().map(|s| s.evaluate_pose()),
                    });
                }
            }
            if visible {
                if let Some(light) = object.light() {
                    lights.push((object.id(), world.position, *light));
                }
            }
            // particles keep going while their emitter is hidden
            for system in object.particle_systems() {
                draws.push(Draw::Particles {
                    id: object.id(),
                    system,
                    world,
                });
            }
        }

        for group in scene.manager().groups() {
            if let Some(geometry) = group.geometry() {
                draws.push(Draw::Batch {
                    group: group.id(),
                    geometry,
                });
            }
        }

        Self {
            camera,
            sun: environment.sun,
            fog: environment.fog,
            draws,
            lights,
            stats: None,
        }
    }

    pub fn object_draws(&self) -> usize {
        self.draws
            .iter()
            .filter(|d| matches!(d, Draw::Object { .. }))
            .count()
    }

    pub fn batch_draws(&self) -> usize {
        self.draws
            .iter()
            .filter(|d| matches!(d, Draw::Batch { .. }))
            .count()
    }

    pub fn particle_draws(&self) -> usize {
        self.draws
            .iter()
            .filter(|d| matches!(d, Draw::Particles { .. }))
            .count()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub last_frame: Duration,
    pub rebuilds_drained: usize,
    pub rebuilds_pending: usize,
    pub groups_rebuilt: usize,
    pub built_groups: usize,
    pub animated_objects: usize,
}

fn fog_from(config: &FogConfig, underwater: bool) -> Fog {
    Fog {
        start: config.start,
        end: config.end,
        colour: config.colour,
        underwater,
    }
}

/// Sun, moon and fog.
#[derive(Clone, Debug)]
struct Environment {
    sun: DirectionalLight,
    fog: Fog,
    water_height: f32,
    above: FogConfig,
    below: FogConfig,
}

impl Environment {
    fn new(config: &RendererConfig) -> Self {
        Self {
            sun: DirectionalLight::default(),
            fog: fog_from(&config.fog_above_water, false),
            water_height: config.water_height,
            above: config.fog_above_water,
            below: config.fog_below_water,
        }
    }

    fn update(&mut self, time_of_day: f32, camera_height: f32) {
        self.sun = DirectionalLight::from_time_of_day(time_of_day);
        self.fog = if camera_height < self.water_height {
            fog_from(&self.below, true)
        } else {
            fog_from(&self.above, false)
        };
    }
}

/// Objects waiting for the host to regenerate their geometry.
#[derive(Debug, Default)]
struct RebuildQueue {
    queue: VecDeque<ObjectId>,
    queued: HashSet<ObjectId>,
}

impl RebuildQueue {
    fn push(&mut self, id: ObjectId) -> bool {
        if !self.queued.insert(id) {
            return false;
        }
        self.queue.push_back(id);
        true
    }

    fn cancel(&mut self, id: ObjectId) -> bool {
        if !self.queued.remove(&id) {
            return false;
        }
        self.queue.retain(|q| *q != id);
        true
    }

    /// Rebuilds queued objects until `budget` is used up. At least one entry
    /// is processed per call so the queue always makes progress.
    fn drain(
        &mut self,
        scene: &mut Scene,
        host: &dyn HostView,
        materials: &MaterialLibrary,
        budget: Duration,
    ) -> usize {
        let started = Instant::now();
        let mut drained = 0;
        while let Some(id) = self.queue.pop_front() {
            self.queued.remove(&id);
            drained += 1;
            match scene.object(id).and_then(|o| o.domain()) {
                Some(domain) => match host.build_geometry(domain) {
                    Some(manual) => {
                        if let Err(e) = scene.attach_manual_geometry(id, manual, materials) {
                            log::warn!("rebuilding {} failed: {}", id, e);
                        }
                    }
                    None => log::debug!("host had no geometry for {}", id),
                },
                None => log::debug!("dropping rebuild of {} without a domain object", id),
            }
            if started.elapsed() >= budget {
                break;
            }
        }
        if !self.queue.is_empty() {
            log::debug!("{} geometry rebuilds deferred to the next frame", self.queue.len());
        }
        drained
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

pub struct Renderer {
    config: RendererConfig,
    scene: Scene,
    camera: Camera,
    environment: Environment,
    contexts: ContextSwitcher,
    rebuilds: RebuildQueue,
    lod: AnimationLod,
    stats: FrameStats,
    sink: Box<dyn FrameSink>,
}

impl Renderer {
    pub fn new(config: &EngineConfig, sink: Box<dyn FrameSink>) -> Self {
        Self {
            config: config.renderer.clone(),
            scene: Scene::new(config),
            camera: Camera::default(),
            environment: Environment::new(&config.renderer),
            contexts: ContextSwitcher::new(),
            rebuilds: RebuildQueue::default(),
            lod: AnimationLod::from_config(&config.animation),
            stats: FrameStats::default(),
            sink,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn sun(&self) -> &DirectionalLight {
        &self.environment.sun
    }

    pub fn fog(&self) -> &Fog {
        &self.environment.fog
    }

    pub fn contexts(&self) -> &ContextSwitcher {
        &self.contexts
    }

    pub fn contexts_mut(&mut self) -> &mut ContextSwitcher {
        &mut self.contexts
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn set_animation_lod(&mut self, lod: AnimationLod) {
        self.lod = lod;
    }

    /// Queues `object` for a geometry rebuild. Returns false if it was
    /// already queued.
    pub fn queue_geometry_rebuild(&mut self, object: ObjectId) -> bool {
        self.rebuilds.push(object)
    }

    pub fn cancel_geometry_rebuild(&mut self, object: ObjectId) -> bool {
        self.rebuilds.cancel(object)
    }

    pub fn pending_rebuilds(&self) -> usize {
        self.rebuilds.len()
    }

    /// Runs one frame and hands the result to the sink.
    pub fn render_frame(&mut self, dt: f32, host: &dyn HostView, materials: &MaterialLibrary) {
        let started = Instant::now();
        let _context = self.contexts.scope();

        let camera = host.camera();
        self.environment.update(host.time_of_day(), camera.position.y);
        self.camera = camera;

        let budget = Duration::from_millis(self.config.rebuild_budget_ms);
        let drained = self.rebuilds.drain(&mut self.scene, host, materials, budget);

        let rebuilt = self.scene.tick_batching(dt);
        let animated = self.scene.update_animations(dt, self.camera.position, &self.lod);

        self.stats.frames += 1;
        self.stats.rebuilds_drained = drained;
        self.stats.rebuilds_pending = self.rebuilds.len();
        self.stats.groups_rebuilt = rebuilt;
        self.stats.built_groups = self.scene.manager().groups().filter(|g| g.is_built()).count();
        self.stats.animated_objects = animated;
        self.stats.last_frame = started.elapsed();

        let mut frame = Frame::collect(&self.scene, self.camera, &self.environment);
        if self.config.show_stats {
            frame.stats = Some(&self.stats);
        }
        self.sink.submit(&frame);
    }

    /// Cancels any queued rebuild of `object` before it is destroyed.
    pub(crate) fn forget_object(&mut self, object: ObjectId) {
        self.rebuilds.cancel(object);
    }
}
