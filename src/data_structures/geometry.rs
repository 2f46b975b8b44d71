//! CPU-side geometry: meshes, manual geometry, billboards and merged batches.
//!
//! All vertex data uses [`ModelVertex`], which is plain-old-data so a backend
//! can upload it with `bytemuck::cast_slice` without any conversion.

use cgmath::Vector3;

use crate::data_structures::transform::Transform;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

impl ModelVertex {
    pub fn transformed(&self, transform: &Transform) -> ModelVertex {
        ModelVertex {
            position: transform.transform_point(self.position.into()).into(),
            tex_coords: self.tex_coords,
            normal: transform.transform_direction(self.normal.into()).into(),
            tangent: transform.transform_direction(self.tangent.into()).into(),
            bitangent: transform.transform_direction(self.bitangent.into()).into(),
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn from_points(points: impl IntoIterator<Item = Vector3<f32>>) -> Option<Aabb> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Aabb {
            min: first,
            max: first,
        };
        for p in iter {
            aabb.min = Vector3::new(aabb.min.x.min(p.x), aabb.min.y.min(p.y), aabb.min.z.min(p.z));
            aabb.max = Vector3::new(aabb.max.x.max(p.x), aabb.max.y.max(p.y), aabb.max.z.max(p.z));
        }
        Some(aabb)
    }

    pub fn corners(&self) -> [Vector3<f32>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vector3::new(a.x, a.y, a.z),
            Vector3::new(b.x, a.y, a.z),
            Vector3::new(a.x, b.y, a.z),
            Vector3::new(b.x, b.y, a.z),
            Vector3::new(a.x, a.y, b.z),
            Vector3::new(b.x, a.y, b.z),
            Vector3::new(a.x, b.y, b.z),
            Vector3::new(b.x, b.y, b.z),
        ]
    }

    pub fn transformed(&self, transform: &Transform) -> Aabb {
        // corners() always yields eight points
        Aabb::from_points(self.corners().map(|c| transform.transform_point(c))).unwrap_or(*self)
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }
}

/// One material-homogeneous part of a mesh.
#[derive(Clone, Debug)]
pub struct SubMesh {
    pub name: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
    pub material: String,
}

#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,
    pub submeshes: Vec<SubMesh>,
    pub bounds: Aabb,
    /// Set when the mesh is skinned against a skeleton resource.
    pub skeleton: Option<String>,
}

impl MeshData {
    pub fn materials(&self) -> Vec<String> {
        self.submeshes.iter().map(|s| s.material.clone()).collect()
    }

    pub fn vertex_count(&self) -> usize {
        self.submeshes.iter().map(|s| s.vertices.len()).sum()
    }
}

/// Geometry pushed directly by the host (e.g. a prim's volume faces).
#[derive(Clone, Debug)]
pub struct ManualGeometry {
    pub sections: Vec<SubMesh>,
}

impl ManualGeometry {
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(
            self.sections
                .iter()
                .flat_map(|s| s.vertices.iter().map(|v| Vector3::from(v.position))),
        )
    }

    pub fn materials(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.material.clone()).collect()
    }
}

/// Camera-facing quad.
#[derive(Clone, Debug, PartialEq)]
pub struct Billboard {
    pub width: f32,
    pub height: f32,
    pub colour: [f32; 4],
    pub material: String,
}

/// Merged geometry of one batch: one section per material.
#[derive(Clone, Debug, Default)]
pub struct StaticGeometry {
    pub sections: Vec<SubMesh>,
    pub cast_shadows: bool,
}

impl StaticGeometry {
    /// Appends `mesh` baked into world space by `world`.
    pub fn add_mesh(&mut self, submeshes: &[SubMesh], world: &Transform) {
        for submesh in submeshes {
            let section = match self
                .sections
                .iter_mut()
                .position(|s| s.material == submesh.material)
            {
                Some(idx) => &mut self.sections[idx],
                None => {
                    self.sections.push(SubMesh {
                        name: format!("batch/{}", submesh.material),
                        vertices: Vec::new(),
                        indices: Vec::new(),
                        material: submesh.material.clone(),
                    });
                    let last = self.sections.len() - 1;
                    &mut self.sections[last]
                }
            };
            let base = section.vertices.len() as u32;
            section
                .vertices
                .extend(submesh.vertices.iter().map(|v| v.transformed(world)));
            section.indices.extend(submesh.indices.iter().map(|i| i + base));
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.sections.iter().map(|s| s.vertices.len()).sum()
    }

    pub fn vertex_bytes(&self, section: usize) -> &[u8] {
        self.sections
            .get(section)
            .map(|s| bytemuck::cast_slice(&s.vertices))
            .unwrap_or(&[])
    }
}
