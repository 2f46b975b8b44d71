//! The engine root.
//!
//! [`Engine`] is constructed once by the host and owns every subsystem: the
//! renderer (and through it the scene and batching manager), the asset
//! loader and the resource cache. There is no global state; whoever needs a
//! subsystem borrows it from the engine.

use std::collections::HashMap;

use crate::{
    config::EngineConfig,
    data_structures::{material::Material, transform::Transform},
    error::{EngineError, Result},
    object::{DomainId, ObjectId, TeardownStep},
    render::{FrameSink, HostView, Renderer},
    resources::{
        AssetEvent, AssetId, AssetKind, AssetLoader, RequesterId, ResourceCache,
        fetch::{CompletionQueue, Fetcher},
    },
    scene::Scene,
};

/// A mesh attach waiting for its data.
#[derive(Clone, Debug)]
struct PendingMesh {
    mesh: AssetId,
    cast_shadows: bool,
    offset: Transform,
    skeleton: Option<AssetId>,
}

pub struct Engine {
    config: EngineConfig,
    renderer: Renderer,
    loader: AssetLoader,
    cache: ResourceCache,
    completions: CompletionQueue,
    pending_meshes: HashMap<ObjectId, PendingMesh>,
    pending_particles: HashMap<ObjectId, Vec<AssetId>>,
    external_events: Vec<AssetEvent>,
    #[cfg(not(target_arch = "wasm32"))]
    runtime: Option<tokio::runtime::Runtime>,
}

impl Engine {
    /// `fetcher` must push its results into `completions`.
    pub fn new(
        config: EngineConfig,
        completions: CompletionQueue,
        fetcher: Box<dyn Fetcher>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        log::info!("starting engine");
        Self {
            renderer: Renderer::new(&config, sink),
            config,
            loader: AssetLoader::new(fetcher),
            cache: ResourceCache::new(),
            completions,
            pending_meshes: HashMap::new(),
            pending_particles: HashMap::new(),
            external_events: Vec::new(),
            #[cfg(not(target_arch = "wasm32"))]
            runtime: None,
        }
    }

    /// Loads assets from `config.assets.root` on a private tokio runtime.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_fs_fetcher(config: EngineConfig, sink: Box<dyn FrameSink>) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        let completions = CompletionQueue::new();
        let fetcher = crate::resources::fetch::FsFetcher::new(
            config.assets.root.clone(),
            runtime.handle().clone(),
            completions.clone(),
        );
        let mut engine = Self::new(config, completions, Box::new(fetcher), sink);
        engine.runtime = Some(runtime);
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn scene(&self) -> &Scene {
        self.renderer.scene()
    }

    /// The scene together with the resources its mutators consult.
    pub fn scene_with_cache(&mut self) -> (&mut Scene, &ResourceCache) {
        (self.renderer.scene_mut(), &self.cache)
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResourceCache {
        &mut self.cache
    }

    pub fn loader(&self) -> &AssetLoader {
        &self.loader
    }

    pub fn create_object(&mut self, domain: Option<DomainId>) -> Result<ObjectId> {
        self.renderer.scene_mut().create_object(domain)
    }

    /// Subscribes `requester` to an asset. Resident assets are delivered
    /// right away without a fetch. Returns whether a fetch was issued.
    pub fn request_asset(
        &mut self,
        id: &AssetId,
        kind: AssetKind,
        requester: RequesterId,
        high_priority: bool,
        chain_from: Option<&AssetId>,
    ) -> bool {
        if self.cache.contains(kind, id) {
            self.route(AssetEvent::Loaded {
                kind,
                id: id.clone(),
                requester,
            });
            return false;
        }
        self.loader
            .request(id, kind, requester, high_priority, chain_from)
    }

    /// Attaches `mesh` to `object` now if it is loaded, otherwise once it
    /// arrives.
    pub fn request_mesh(
        &mut self,
        object: ObjectId,
        mesh: impl Into<AssetId>,
        cast_shadows: bool,
        offset: Transform,
    ) -> Result<()> {
        if self.scene().object(object).is_none() {
            return Err(EngineError::UnknownObject(object.raw()));
        }
        let mesh = mesh.into();
        self.pending_meshes.insert(
            object,
            PendingMesh {
                mesh: mesh.clone(),
                cast_shadows,
                offset,
                skeleton: None,
            },
        );
        self.request_asset(
            &mesh,
            AssetKind::Mesh,
            RequesterId::Object(object),
            false,
            None,
        );
        Ok(())
    }

    /// Adds the particle system scripted by `script` once it is loaded.
    pub fn request_particle_system(
        &mut self,
        object: ObjectId,
        script: impl Into<AssetId>,
    ) -> Result<()> {
        if self.scene().object(object).is_none() {
            return Err(EngineError::UnknownObject(object.raw()));
        }
        let script = script.into();
        self.pending_particles
            .entry(object)
            .or_default()
            .push(script.clone());
        self.request_asset(
            &script,
            AssetKind::ParticleScript,
            RequesterId::Object(object),
            false,
            None,
        );
        Ok(())
    }

    /// Finishes a pending mesh attach if everything it needs is resident.
    fn advance_pending_mesh(&mut self, object: ObjectId) {
        let Some(pending) = self.pending_meshes.get_mut(&object) else {
            return;
        };
        let Some(mesh) = self.cache.mesh(&pending.mesh) else {
            return;
        };
        if pending.skeleton.is_none() {
            if let Some(skeleton) = mesh.skeleton.as_deref().map(AssetId::from) {
                if !self.cache.contains(AssetKind::Skeleton, &skeleton) {
                    pending.skeleton = Some(skeleton.clone());
                    self.request_asset(
                        &skeleton,
                        AssetKind::Skeleton,
                        RequesterId::Object(object),
                        false,
                        None,
                    );
                    return;
                }
            }
        }
        self.attach_pending_mesh(object);
    }

    fn attach_pending_mesh(&mut self, object: ObjectId) {
        let Some(pending) = self.pending_meshes.remove(&object) else {
            return;
        };
        let (scene, cache) = self.scene_with_cache();
        if let Err(e) = scene.attach_mesh(
            object,
            cache,
            &pending.mesh,
            pending.cast_shadows,
            pending.offset,
        ) {
            log::debug!("deferred attach of '{}' to {} failed: {}", pending.mesh, object, e);
        }
    }

    fn route(&mut self, event: AssetEvent) {
        let object = match event.requester() {
            RequesterId::Object(object) => object,
            RequesterId::External(_) => {
                self.external_events.push(event);
                return;
            }
        };
        match event {
            AssetEvent::Loaded {
                kind: AssetKind::Mesh | AssetKind::Skeleton,
                ..
            } => self.advance_pending_mesh(object),
            AssetEvent::Cancelled {
                kind: AssetKind::Mesh,
                id,
                ..
            } => {
                if self
                    .pending_meshes
                    .get(&object)
                    .is_some_and(|p| p.mesh == id)
                {
                    self.pending_meshes.remove(&object);
                    log::warn!("mesh '{}' for {} is unavailable", id, object);
                }
            }
            AssetEvent::Cancelled {
                kind: AssetKind::Skeleton,
                id,
                ..
            } => {
                // a superseded attach may still have a skeleton in flight
                if self
                    .pending_meshes
                    .get(&object)
                    .is_some_and(|p| p.skeleton.as_ref() == Some(&id))
                {
                    self.attach_pending_mesh(object);
                }
            }
            AssetEvent::Loaded {
                kind: AssetKind::ParticleScript,
                id,
                ..
            } => {
                if self.take_pending_particle(object, &id) {
                    let (scene, cache) = self.scene_with_cache();
                    if let Err(e) = scene.add_particle_system(object, cache, &id) {
                        log::warn!("{}", e);
                    }
                }
            }
            AssetEvent::Cancelled {
                kind: AssetKind::ParticleScript,
                id,
                ..
            } => {
                self.take_pending_particle(object, &id);
            }
            AssetEvent::Loaded {
                kind: AssetKind::Material,
                ..
            }
            | AssetEvent::Cancelled {
                kind: AssetKind::Material,
                ..
            } => (),
        }
    }

    fn take_pending_particle(&mut self, object: ObjectId, id: &AssetId) -> bool {
        let Some(scripts) = self.pending_particles.get_mut(&object) else {
            return false;
        };
        let Some(idx) = scripts.iter().position(|s| s == id) else {
            return false;
        };
        scripts.remove(idx);
        if scripts.is_empty() {
            self.pending_particles.remove(&object);
        }
        true
    }

    /// Drains finished fetches, constructs the resources and notifies
    /// subscribers. Returns the number of completions handled.
    pub fn pump_assets(&mut self) -> usize {
        let completions = self.completions.drain();
        let handled = completions.len();
        for completion in completions {
            let events = self.loader.on_fetch_complete(
                &completion.id,
                &completion.bytes,
                completion.success,
                &mut self.cache,
            );
            // freshly defined materials may let waiting objects batch
            let names = self.cache.material_names(&completion.id).to_vec();
            if events
                .iter()
                .any(|e| matches!(e, AssetEvent::Loaded { kind: AssetKind::Material, .. }))
            {
                for name in names {
                    self.renderer
                        .scene_mut()
                        .material_modified(&name, &self.cache.materials);
                }
            }
            for event in events {
                self.route(event);
            }
        }
        handled
    }

    /// Events for external requesters since the last call.
    pub fn drain_asset_events(&mut self) -> Vec<AssetEvent> {
        std::mem::take(&mut self.external_events)
    }

    /// Adds or replaces a material and re-evaluates batching against it.
    pub fn define_material(&mut self, material: Material) {
        let name = material.name.clone();
        self.cache.insert_material(material);
        self.renderer
            .scene_mut()
            .material_modified(&name, &self.cache.materials);
    }

    /// Edits a single material and re-evaluates batching against it.
    /// Clones made with `clone_material` are independent copies and keep
    /// their own settings.
    pub fn modify_material(&mut self, name: &str, edit: impl FnOnce(&mut Material)) -> bool {
        if self.cache.materials.modify(name, edit).is_none() {
            log::warn!("tried to modify unknown material '{}'", name);
            return false;
        }
        self.renderer
            .scene_mut()
            .material_modified(name, &self.cache.materials);
        true
    }

    pub fn destroy_object(&mut self, object: ObjectId) -> Result<Vec<TeardownStep>> {
        self.loader.cancel(RequesterId::Object(object));
        self.pending_meshes.remove(&object);
        self.pending_particles.remove(&object);
        self.renderer.forget_object(object);
        self.renderer.scene_mut().destroy_object(object)
    }

    /// One host frame: asset completions first, then rendering.
    pub fn frame(&mut self, dt: f32, host: &dyn HostView) {
        self.pump_assets();
        self.renderer.render_frame(dt, host, &self.cache.materials);
    }

    /// Destroys every object. The engine renders an empty scene afterwards
    /// and refuses to create new objects.
    pub fn shutdown(&mut self) {
        let objects: Vec<ObjectId> = self.scene().objects().map(|o| o.id()).collect();
        for object in &objects {
            self.loader.cancel(RequesterId::Object(*object));
            self.renderer.forget_object(*object);
        }
        self.pending_meshes.clear();
        self.pending_particles.clear();
        self.renderer.scene_mut().shutdown();
        log::info!("engine shut down ({} objects destroyed)", objects.len());
    }
}
