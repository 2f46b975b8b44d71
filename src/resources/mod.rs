//! Asset loading: request deduplication, subscriber bookkeeping and the
//! type-specific constructors that turn fetched bytes into resources.
//!
//! At most one fetch is in flight per identifier. Everyone asking for the
//! same identifier while it is in flight becomes a subscriber of that single
//! request and is notified exactly once when it completes: with
//! [`AssetEvent::Loaded`] if the resource was constructed, with
//! [`AssetEvent::Cancelled`] otherwise.

use std::{collections::HashMap, fmt, sync::Arc};

use instant::{Duration, Instant};

use crate::{
    data_structures::{
        geometry::MeshData,
        material::{Material, MaterialLibrary},
        skeleton::Skeleton,
    },
    error::{EngineError, Result},
    object::ObjectId,
    resources::{fetch::Fetcher, particle::ParticleTemplate},
};

pub mod fetch;
pub mod material;
pub mod mesh;
pub mod particle;
pub mod skeleton;

/// Content identifier of an asset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Mesh,
    Skeleton,
    Material,
    ParticleScript,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetKind::Mesh => "mesh",
            AssetKind::Skeleton => "skeleton",
            AssetKind::Material => "material",
            AssetKind::ParticleScript => "particle script",
        })
    }
}

/// Who is waiting for an asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequesterId {
    Object(ObjectId),
    External(u64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum AssetEvent {
    Loaded {
        kind: AssetKind,
        id: AssetId,
        requester: RequesterId,
    },
    Cancelled {
        kind: AssetKind,
        id: AssetId,
        requester: RequesterId,
    },
}

impl AssetEvent {
    pub fn requester(&self) -> RequesterId {
        match self {
            AssetEvent::Loaded { requester, .. } | AssetEvent::Cancelled { requester, .. } => {
                *requester
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Subscriber {
    pub requester: RequesterId,
    /// Set when the subscription was copied over from another request.
    pub chained_from: Option<AssetId>,
}

#[derive(Debug)]
struct AssetRequest {
    kind: AssetKind,
    high_priority: bool,
    subscribers: Vec<Subscriber>,
    issued_at: Instant,
}

impl AssetRequest {
    fn subscribe(&mut self, subscriber: Subscriber) {
        if !self
            .subscribers
            .iter()
            .any(|s| s.requester == subscriber.requester)
        {
            self.subscribers.push(subscriber);
        }
    }
}

/// Deduplicates in-flight fetches and fans out completion notifications.
pub struct AssetLoader {
    fetcher: Box<dyn Fetcher>,
    pending: HashMap<AssetId, AssetRequest>,
    fetches_issued: u64,
}

impl AssetLoader {
    pub fn new(fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            pending: HashMap::new(),
            fetches_issued: 0,
        }
    }

    /// Subscribes `requester` to `id`, issuing a fetch only if none is in flight.
    ///
    /// With `chain_from`, everyone currently waiting on `chain_from` is also
    /// subscribed to `id` (one asset turned out to depend on another).
    /// Returns whether an underlying fetch was issued.
    pub fn request(
        &mut self,
        id: &AssetId,
        kind: AssetKind,
        requester: RequesterId,
        high_priority: bool,
        chain_from: Option<&AssetId>,
    ) -> bool {
        let chained: Vec<Subscriber> = chain_from
            .and_then(|from| self.pending.get(from))
            .map(|req| {
                req.subscribers
                    .iter()
                    .map(|s| Subscriber {
                        requester: s.requester,
                        chained_from: chain_from.cloned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut issued = false;
        let request = self.pending.entry(id.clone()).or_insert_with(|| {
            issued = true;
            AssetRequest {
                kind,
                high_priority,
                subscribers: Vec::new(),
                issued_at: Instant::now(),
            }
        });
        if request.kind != kind {
            log::warn!(
                "asset '{}' requested as {} while in flight as {}",
                id,
                kind,
                request.kind
            );
        }
        request.high_priority |= high_priority;
        request.subscribe(Subscriber {
            requester,
            chained_from: None,
        });
        for subscriber in chained {
            request.subscribe(subscriber);
        }

        if issued {
            self.fetches_issued += 1;
            self.fetcher.fetch(id, kind, high_priority);
        }
        issued
    }

    /// Removes `requester` from every pending request. The fetches themselves
    /// keep running; the requester just won't hear about them.
    pub fn cancel(&mut self, requester: RequesterId) {
        for request in self.pending.values_mut() {
            request.subscribers.retain(|s| s.requester != requester);
        }
    }

    /// Finishes the request for `id`, constructing the resource into `cache`.
    ///
    /// Returns one event per subscriber. Completions for identifiers that
    /// are not pending are logged and ignored.
    pub fn on_fetch_complete(
        &mut self,
        id: &AssetId,
        bytes: &[u8],
        success: bool,
        cache: &mut ResourceCache,
    ) -> Vec<AssetEvent> {
        let Some(request) = self.pending.remove(id) else {
            log::warn!("fetch completed for '{}' which nobody requested", id);
            return Vec::new();
        };
        let kind = request.kind;

        let constructed = if success {
            match cache.construct(kind, id, bytes) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("{}", e);
                    // a later retry has to start from a clean slate
                    cache.remove(kind, id);
                    false
                }
            }
        } else {
            log::warn!("{} '{}' could not be fetched", kind, id);
            false
        };

        request
            .subscribers
            .into_iter()
            .map(|s| {
                if constructed {
                    AssetEvent::Loaded {
                        kind,
                        id: id.clone(),
                        requester: s.requester,
                    }
                } else {
                    AssetEvent::Cancelled {
                        kind,
                        id: id.clone(),
                        requester: s.requester,
                    }
                }
            })
            .collect()
    }

    pub fn is_pending(&self, id: &AssetId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn fetches_issued(&self) -> u64 {
        self.fetches_issued
    }

    pub fn subscribers(&self, id: &AssetId) -> Vec<Subscriber> {
        self.pending
            .get(id)
            .map(|r| r.subscribers.clone())
            .unwrap_or_default()
    }

    pub fn is_high_priority(&self, id: &AssetId) -> bool {
        self.pending.get(id).is_some_and(|r| r.high_priority)
    }

    /// The request that has been waiting longest, and for how long.
    pub fn oldest_pending(&self) -> Option<(AssetId, Duration)> {
        self.pending
            .iter()
            .min_by_key(|(_, r)| r.issued_at)
            .map(|(id, r)| (id.clone(), r.issued_at.elapsed()))
    }
}

/// Constructed resources, keyed by the identifier they were loaded from.
#[derive(Debug, Default)]
pub struct ResourceCache {
    meshes: HashMap<AssetId, Arc<MeshData>>,
    skeletons: HashMap<AssetId, Arc<Skeleton>>,
    particles: HashMap<AssetId, Arc<ParticleTemplate>>,
    /// material names defined by each material script
    material_sources: HashMap<AssetId, Vec<String>>,
    pub materials: MaterialLibrary,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the constructor for `kind` on `bytes` and stores the result.
    pub fn construct(&mut self, kind: AssetKind, id: &AssetId, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(EngineError::ResourceNotFound {
                kind,
                id: id.clone(),
            });
        }
        match kind {
            AssetKind::Mesh => {
                let mesh = mesh::parse_obj(id.as_str(), bytes)
                    .map_err(|e| EngineError::malformed(kind, id, e))?;
                self.meshes.insert(id.clone(), Arc::new(mesh));
            }
            AssetKind::Skeleton => {
                let skeleton = skeleton::parse_gltf(id.as_str(), bytes)
                    .map_err(|e| EngineError::malformed(kind, id, e))?;
                self.skeletons.insert(id.clone(), Arc::new(skeleton));
            }
            AssetKind::Material => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| EngineError::malformed(kind, id, e.into()))?;
                let materials = material::parse_material_script(text)
                    .map_err(|e| EngineError::malformed(kind, id, e))?;
                let names = materials.iter().map(|m| m.name.clone()).collect();
                for material in materials {
                    self.materials.insert(material);
                }
                self.material_sources.insert(id.clone(), names);
            }
            AssetKind::ParticleScript => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| EngineError::malformed(kind, id, e.into()))?;
                let template = particle::parse_particle_script(text)
                    .map_err(|e| EngineError::malformed(kind, id, e))?;
                self.particles.insert(id.clone(), Arc::new(template));
            }
        }
        log::debug!("constructed {} '{}'", kind, id);
        Ok(())
    }

    pub fn remove(&mut self, kind: AssetKind, id: &AssetId) {
        match kind {
            AssetKind::Mesh => {
                self.meshes.remove(id);
            }
            AssetKind::Skeleton => {
                self.skeletons.remove(id);
            }
            AssetKind::ParticleScript => {
                self.particles.remove(id);
            }
            AssetKind::Material => {
                for name in self.material_sources.remove(id).unwrap_or_default() {
                    self.materials.remove(&name);
                }
            }
        }
    }

    pub fn contains(&self, kind: AssetKind, id: &AssetId) -> bool {
        match kind {
            AssetKind::Mesh => self.meshes.contains_key(id),
            AssetKind::Skeleton => self.skeletons.contains_key(id),
            AssetKind::ParticleScript => self.particles.contains_key(id),
            AssetKind::Material => self.material_sources.contains_key(id),
        }
    }

    /// Names of the materials a material script defined.
    pub fn material_names(&self, id: &AssetId) -> &[String] {
        self.material_sources
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn insert_mesh(&mut self, id: impl Into<AssetId>, mesh: MeshData) {
        self.meshes.insert(id.into(), Arc::new(mesh));
    }

    pub fn insert_skeleton(&mut self, id: impl Into<AssetId>, skeleton: Skeleton) {
        self.skeletons.insert(id.into(), Arc::new(skeleton));
    }

    pub fn insert_material(&mut self, material: Material) {
        self.materials.insert(material);
    }

    pub fn mesh(&self, id: &AssetId) -> Option<Arc<MeshData>> {
        self.meshes.get(id).cloned()
    }

    pub fn skeleton(&self, id: &AssetId) -> Option<Arc<Skeleton>> {
        self.skeletons.get(id).cloned()
    }

    pub fn particle(&self, id: &AssetId) -> Option<Arc<ParticleTemplate>> {
        self.particles.get(id).cloned()
    }
}
