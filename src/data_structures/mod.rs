//! Engine data structures: transforms, scene graph, geometry, materials,
//! skeletons and lights.
//!
//! - `transform` holds node position/rotation/scale and composition
//! - `scene_graph` is the node arena every scene object hangs off
//! - `geometry` contains meshes, manual geometry, billboards and merged batches
//! - `material` holds material definitions and the material library
//! - `skeleton` contains bones, clips and per-object clip playback state
//! - `light` holds point, directional and fog parameters

pub mod geometry;
pub mod light;
pub mod material;
pub mod scene_graph;
pub mod skeleton;
pub mod transform;
