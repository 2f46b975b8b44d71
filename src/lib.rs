//! globe-ngin
//!
//! The scene-object, material and animation synchronization core of a
//! virtual-world viewer. A host application mirrors its own object model
//! into scene objects; the engine keeps a CPU-side scene graph, loads and
//! caches assets, blends skeletal animations, merges nearby static objects
//! into batches and hands every finished frame to a pluggable backend.
//!
//! High-level modules
//! - `animation`: fade state machine, two-tier blend masks and animation LOD
//! - `batch`: spatial batching of static objects into merged geometry
//! - `config`: engine configuration loaded from TOML
//! - `context`: nestable switching between host and renderer graphics contexts
//! - `data_structures`: engine data models (transforms, scene graph, meshes, materials, skeletons)
//! - `engine`: the root object that owns every subsystem
//! - `error`: the engine error type
//! - `object`: scene objects and the hit-testing side table
//! - `render`: per-frame driver, camera, lighting and the frame sink seam
//! - `resources`: asset loading, fetching and resource constructors
//! - `scene`: scene graph, objects and batching wired together
//!

pub mod animation;
pub mod batch;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod engine;
pub mod error;
pub mod object;
pub mod render;
pub mod resources;
pub mod scene;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use engine::Engine;
pub use error::{EngineError, Result};

/// Sets up logging for the current target. Calling it twice only warns.
pub fn init_logging() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            log::warn!("Could not initialize logger: {}", e);
        }
    }
}
