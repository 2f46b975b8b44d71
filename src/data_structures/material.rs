//! Materials and the material library.
//!
//! A material is a list of techniques, each a list of passes. Batching only
//! cares about one property: whether every pass writes depth. Materials that
//! don't (alpha-blended glass, particles) are rendered object by object.

use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneBlend {
    Replace,
    AlphaBlend,
    Add,
    Modulate,
}

impl SceneBlend {
    pub fn parse(s: &str) -> Option<SceneBlend> {
        match s {
            "replace" => Some(SceneBlend::Replace),
            "alpha_blend" => Some(SceneBlend::AlphaBlend),
            "add" => Some(SceneBlend::Add),
            "modulate" => Some(SceneBlend::Modulate),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pass {
    pub depth_write: bool,
    pub scene_blend: SceneBlend,
    pub diffuse: [f32; 4],
    pub texture: Option<String>,
}

impl Default for Pass {
    fn default() -> Self {
        Self {
            depth_write: true,
            scene_blend: SceneBlend::Replace,
            diffuse: [1.0, 1.0, 1.0, 1.0],
            texture: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Technique {
    pub passes: Vec<Pass>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub techniques: Vec<Technique>,
}

impl Material {
    /// Single technique, single default (opaque, depth-writing) pass.
    pub fn opaque(name: &str) -> Self {
        Self {
            name: name.to_string(),
            techniques: vec![Technique {
                passes: vec![Pass::default()],
            }],
        }
    }

    /// A material can be merged into static batches iff every pass writes depth.
    pub fn is_grouping_compatible(&self) -> bool {
        self.techniques
            .iter()
            .flat_map(|t| t.passes.iter())
            .all(|p| p.depth_write)
    }
}

/// Owns every material definition plus the clone lists derived from them.
#[derive(Debug, Default)]
pub struct MaterialLibrary {
    materials: HashMap<String, Material>,
    clones: HashMap<String, BTreeSet<String>>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) {
        self.materials.insert(material.name.clone(), material);
    }

    pub fn get(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.materials.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Unknown materials are treated as plain opaque ones.
    pub fn is_grouping_compatible(&self, name: &str) -> bool {
        self.materials
            .get(name)
            .map(Material::is_grouping_compatible)
            .unwrap_or(true)
    }

    /// Copies `base` under `new_name` and records it in `base`'s clone list.
    pub fn clone_material(&mut self, base: &str, new_name: &str) -> Option<&Material> {
        let mut clone = self.materials.get(base)?.clone();
        clone.name = new_name.to_string();
        self.materials.insert(new_name.to_string(), clone);
        self.clones
            .entry(base.to_string())
            .or_default()
            .insert(new_name.to_string());
        self.materials.get(new_name)
    }

    pub fn clones_of(&self, base: &str) -> Vec<String> {
        self.clones
            .get(base)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Applies `edit` to the named material; returns whether its
    /// grouping compatibility changed.
    pub fn modify(&mut self, name: &str, edit: impl FnOnce(&mut Material)) -> Option<bool> {
        let material = self.materials.get_mut(name)?;
        let before = material.is_grouping_compatible();
        edit(material);
        Some(before != material.is_grouping_compatible())
    }

    /// Removes the material and, recursively, every clone made from it.
    /// Returns all removed names.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        let mut removed = Vec::new();
        if self.materials.remove(name).is_some() {
            removed.push(name.to_string());
        }
        for clone in self.clones.remove(name).unwrap_or_default() {
            removed.extend(self.remove(&clone));
        }
        for list in self.clones.values_mut() {
            list.remove(name);
        }
        removed
    }
}
