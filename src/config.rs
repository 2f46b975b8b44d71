//! Engine configuration.
//!
//! Every field has a default so an empty TOML document is a valid config.
//!
//! ```toml
//! transform_epsilon = 0.0001
//!
//! [batching]
//! grouping_distance = 10.0
//! min_group_size = 2
//! rebuild_interval_secs = 0.5
//!
//! [[animation.lod]]
//! distance = 64.0
//! interval_secs = 0.1
//!
//! [renderer]
//! rebuild_budget_ms = 10
//! water_height = 20.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transform updates smaller than this never reach the batching manager.
    pub transform_epsilon: f32,
    pub batching: BatchingConfig,
    pub animation: AnimationConfig,
    pub renderer: RendererConfig,
    pub assets: AssetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transform_epsilon: 1e-4,
            batching: BatchingConfig::default(),
            animation: AnimationConfig::default(),
            renderer: RendererConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    /// Maximum distance from a group's anchor for a member to join it.
    pub grouping_distance: f32,
    /// Groups with fewer members are rendered as individual objects.
    pub min_group_size: usize,
    /// Dirty groups are rebuilt at most once per interval.
    pub rebuild_interval_secs: f32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grouping_distance: 10.0,
            min_group_size: 2,
            rebuild_interval_secs: 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LodEntry {
    /// Distance from the camera (not squared) beyond which the entry applies.
    pub distance: f32,
    /// Minimum time between animation updates; 0 disables updates.
    pub interval_secs: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub lod: Vec<LodEntry>,
    pub default_fade_secs: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            lod: vec![
                LodEntry {
                    distance: 64.0,
                    interval_secs: 0.1,
                },
                LodEntry {
                    distance: 128.0,
                    interval_secs: 0.25,
                },
                LodEntry {
                    distance: 256.0,
                    interval_secs: 0.0,
                },
            ],
            default_fade_secs: 0.25,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    pub start: f32,
    pub end: f32,
    pub colour: [f32; 3],
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            start: 64.0,
            end: 512.0,
            colour: [0.7, 0.8, 0.9],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Time the geometry rebuild queue may consume per frame.
    pub rebuild_budget_ms: u64,
    pub water_height: f32,
    pub fog_above_water: FogConfig,
    pub fog_below_water: FogConfig,
    pub show_stats: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            rebuild_budget_ms: 10,
            water_height: 20.0,
            fog_above_water: FogConfig::default(),
            fog_below_water: FogConfig {
                start: 0.0,
                end: 48.0,
                colour: [0.1, 0.25, 0.35],
            },
            show_stats: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory the filesystem fetcher resolves identifiers against.
    pub root: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: "./assets".to_string(),
        }
    }
}
