#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    sync::Arc,
};

use globe_ngin::{
    Vector3,
    config::EngineConfig,
    context::GraphicsContext,
    data_structures::{
        geometry::{ManualGeometry, ModelVertex, SubMesh},
        material::{Material, MaterialLibrary},
        skeleton::{AnimationClip, Bone, BoneTrack, Keyframe, Skeleton, SkeletonInstance},
        transform::Transform,
    },
    engine::Engine,
    object::DomainId,
    render::{Camera, Frame, FrameSink, HostView},
    resources::{
        ResourceCache,
        fetch::{CompletionQueue, Fetcher, MemoryFetcher},
        mesh::parse_obj,
    },
};

/// A unit quad OBJ using `material`.
pub fn quad_obj(material: &str) -> String {
    format!(
        "o quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nusemtl {}\nf 1/1 2/2 3/3 4/4\n",
        material
    )
}

/// A quad OBJ skinned against `skeleton`.
pub fn skinned_obj(material: &str, skeleton: &str) -> String {
    format!("# skeleton {}\n{}", skeleton, quad_obj(material))
}

/// A cache holding `stone` (opaque), `glass` (no depth write) and a quad
/// mesh per material.
pub fn cache() -> ResourceCache {
    let mut cache = ResourceCache::new();
    cache.insert_material(Material::opaque("stone"));
    let mut glass = Material::opaque("glass");
    glass.techniques[0].passes[0].depth_write = false;
    cache.insert_material(glass);
    for material in ["stone", "glass"] {
        let mesh = parse_obj(material, quad_obj(material).as_bytes()).unwrap();
        cache.insert_mesh(format!("{}_quad", material), mesh);
    }
    cache
}

/// A rig of `bones` bones with one clip per `(name, length, animated bones)`.
pub fn rig(name: &str, bones: usize, clips: &[(&str, f32, &[usize])]) -> Skeleton {
    Skeleton {
        name: name.to_string(),
        bones: (0..bones)
            .map(|i| Bone {
                name: format!("bone{i}"),
                parent: i.checked_sub(1),
                bind: Transform::default(),
            })
            .collect(),
        clips: clips
            .iter()
            .map(|(clip, length, animated)| AnimationClip {
                name: clip.to_string(),
                length: *length,
                tracks: animated
                    .iter()
                    .map(|&bone| BoneTrack {
                        bone,
                        translations: vec![
                            Keyframe {
                                time: 0.0,
                                value: Vector3::new(0.0, 0.0, 0.0),
                            },
                            Keyframe {
                                time: *length,
                                value: Vector3::new(0.0, 1.0, 0.0),
                            },
                        ],
                        ..Default::default()
                    })
                    .collect(),
            })
            .collect(),
    }
}

pub fn rig_instance(bones: usize, clips: &[(&str, f32, &[usize])]) -> SkeletonInstance {
    SkeletonInstance::new(Arc::new(rig("rig", bones, clips)))
}

/// `cache()` plus a skinned quad `avatar` bound to a 10-bone `rig`.
pub fn cache_with_avatar() -> ResourceCache {
    let mut cache = cache();
    cache.insert_skeleton(
        "rig",
        rig(
            "rig",
            10,
            &[
                ("walk", 1.0, &[1, 3, 5, 7, 9]),
                ("point", 0.5, &[3, 7]),
                ("wave", 2.0, &[3]),
            ],
        ),
    );
    let mesh = parse_obj("avatar", skinned_obj("stone", "rig").as_bytes()).unwrap();
    cache.insert_mesh("avatar", mesh);
    cache
}

pub fn manual_triangle(material: &str) -> ManualGeometry {
    ManualGeometry {
        sections: vec![SubMesh {
            name: "tri".into(),
            vertices: vec![
                ModelVertex {
                    position: [0.0, 0.0, 0.0],
                    ..Default::default()
                },
                ModelVertex {
                    position: [1.0, 0.0, 0.0],
                    ..Default::default()
                },
                ModelVertex {
                    position: [0.0, 1.0, 0.0],
                    ..Default::default()
                },
            ],
            indices: vec![0, 1, 2],
            material: material.to_string(),
        }],
    }
}

pub fn materials() -> MaterialLibrary {
    cache().materials
}

/// What a frame contained, copied out of the borrowed [`Frame`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameRecord {
    pub object_draws: usize,
    pub batch_draws: usize,
    pub particle_draws: usize,
    pub lights: usize,
    pub underwater: bool,
    pub moon: bool,
    pub has_stats: bool,
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub frames: Rc<RefCell<Vec<FrameRecord>>>,
}

impl FrameSink for RecordingSink {
    fn submit(&mut self, frame: &Frame<'_>) {
        self.frames.borrow_mut().push(FrameRecord {
            object_draws: frame.object_draws(),
            batch_draws: frame.batch_draws(),
            particle_draws: frame.particle_draws(),
            lights: frame.lights.len(),
            underwater: frame.fog.underwater,
            moon: frame.sun.is_moon,
            has_stats: frame.stats.is_some(),
        });
    }
}

/// Counts `make_current` calls.
pub struct CountingContext(pub Rc<Cell<u32>>);

impl GraphicsContext for CountingContext {
    fn make_current(&self) {
        self.0.set(self.0.get() + 1);
    }
}

/// A scripted host application.
pub struct TestHost {
    pub time_of_day: f32,
    pub camera: Camera,
    pub geometry: HashMap<DomainId, ManualGeometry>,
    pub builds: RefCell<Vec<DomainId>>,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            time_of_day: 0.5,
            camera: Camera {
                position: Vector3::new(0.0, 50.0, 0.0),
                ..Default::default()
            },
            geometry: HashMap::new(),
            builds: RefCell::new(Vec::new()),
        }
    }
}

impl HostView for TestHost {
    fn time_of_day(&self) -> f32 {
        self.time_of_day
    }

    fn camera(&self) -> Camera {
        self.camera
    }

    fn build_geometry(&self, domain: DomainId) -> Option<ManualGeometry> {
        self.builds.borrow_mut().push(domain);
        self.geometry.get(&domain).cloned()
    }
}

/// Counts fetches before handing them to a [`MemoryFetcher`].
pub struct CountingFetcher {
    pub inner: MemoryFetcher,
    pub fetches: Rc<Cell<u32>>,
}

impl Fetcher for CountingFetcher {
    fn fetch(
        &mut self,
        id: &globe_ngin::resources::AssetId,
        kind: globe_ngin::resources::AssetKind,
        high_priority: bool,
    ) {
        self.fetches.set(self.fetches.get() + 1);
        self.inner.fetch(id, kind, high_priority);
    }
}

/// An engine serving `assets` from memory, with contexts saved.
pub fn engine(
    config: EngineConfig,
    assets: &[(&str, Vec<u8>)],
) -> (Engine, RecordingSink, Rc<Cell<u32>>) {
    let queue = CompletionQueue::new();
    let mut fetcher = MemoryFetcher::new(queue.clone());
    for (id, bytes) in assets {
        fetcher = fetcher.with_asset(*id, bytes.clone());
    }
    let fetches = Rc::new(Cell::new(0));
    let sink = RecordingSink::default();
    let mut engine = Engine::new(
        config,
        queue,
        Box::new(CountingFetcher {
            inner: fetcher,
            fetches: fetches.clone(),
        }),
        Box::new(sink.clone()),
    );
    let swaps = Rc::new(Cell::new(0));
    let contexts = engine.renderer_mut().contexts_mut();
    contexts.save_host_context(Rc::new(CountingContext(swaps.clone())));
    contexts.save_renderer_context(Rc::new(CountingContext(swaps)));
    (engine, sink, fetches)
}
