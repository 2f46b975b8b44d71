use std::io::{BufReader, Cursor};

use anyhow::{Context, bail};
use cgmath::Vector3;

use crate::data_structures::geometry::{Aabb, MeshData, ModelVertex, SubMesh};

/// Material used by faces that never named one via `usemtl`.
pub const DEFAULT_MATERIAL: &str = "BaseWhite";

/// Parses OBJ text into a mesh with one submesh per OBJ model.
///
/// `usemtl` names refer to the engine's material library, not to `.mtl`
/// files, so the material list handed to `tobj` is synthesized from the
/// names used in the file. A `# skeleton <id>` comment marks the mesh as
/// skinned against that skeleton resource.
pub fn parse_obj(name: &str, bytes: &[u8]) -> anyhow::Result<MeshData> {
    let text = std::str::from_utf8(bytes).context("mesh is not valid UTF-8")?;

    let mut material_names: Vec<&str> = Vec::new();
    let mut skeleton = None;
    let mut has_mtllib = false;
    for line in text.lines() {
        let line = line.trim();
        if let Some(mat) = line.strip_prefix("usemtl ") {
            let mat = mat.trim();
            if !material_names.contains(&mat) {
                material_names.push(mat);
            }
        } else if let Some(skel) = line.strip_prefix("# skeleton ") {
            skeleton = Some(skel.trim().to_string());
        } else if line.starts_with("mtllib ") {
            has_mtllib = true;
        }
    }
    let mtl_text: String = material_names
        .iter()
        .map(|m| format!("newmtl {}\n", m))
        .collect();
    let obj_text = if has_mtllib || material_names.is_empty() {
        text.to_string()
    } else {
        format!("mtllib library.mtl\n{}", text)
    };

    let mut obj_reader = BufReader::new(Cursor::new(obj_text));
    let (models, obj_materials) = tobj::load_obj_buf(
        &mut obj_reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| tobj::load_mtl_buf(&mut BufReader::new(Cursor::new(mtl_text.as_bytes()))),
    )
    .context("failed to parse OBJ data")?;
    let obj_materials = obj_materials.unwrap_or_default();

    let submeshes = models
        .iter()
        .map(|m| {
            let material = m
                .mesh
                .material_id
                .and_then(|id| obj_materials.get(id))
                .map(|mat| mat.name.clone())
                .unwrap_or_else(|| DEFAULT_MATERIAL.to_string());
            SubMesh {
                name: m.name.clone(),
                vertices: build_vertices(&m.mesh),
                indices: m.mesh.indices.clone(),
                material,
            }
        })
        .filter(|s| !s.vertices.is_empty())
        .collect::<Vec<_>>();

    let bounds = Aabb::from_points(
        submeshes
            .iter()
            .flat_map(|s| s.vertices.iter().map(|v| Vector3::from(v.position))),
    );
    let Some(bounds) = bounds else {
        bail!("mesh '{}' has no vertices", name);
    };
    for submesh in &submeshes {
        let count = submesh.vertices.len() as u32;
        if let Some(bad) = submesh.indices.iter().find(|i| **i >= count) {
            bail!("submesh '{}' references vertex {} of {}", submesh.name, bad, count);
        }
    }

    Ok(MeshData {
        name: name.to_string(),
        submeshes,
        bounds,
        skeleton,
    })
}

/**
 * Obj files don't come with tangents and bitangents so they have to be calculated for
 * normal maps to work correctly.
 */
fn build_vertices(mesh: &tobj::Mesh) -> Vec<ModelVertex> {
    let mut vertices = (0..mesh.positions.len() / 3)
        .map(|i| ModelVertex {
            position: [
                mesh.positions[i * 3],
                mesh.positions[i * 3 + 1],
                mesh.positions[i * 3 + 2],
            ],
            tex_coords: [
                mesh.texcoords.get(i * 2).map_or(0.0, |f| *f),
                1.0 - mesh.texcoords.get(i * 2 + 1).map_or(0.0, |f| *f),
            ],
            normal: [
                mesh.normals.get(i * 3).map_or(0.0, |f| *f),
                mesh.normals.get(i * 3 + 1).map_or(0.0, |f| *f),
                mesh.normals.get(i * 3 + 2).map_or(0.0, |f| *f),
            ],
            // We'll calculate these later
            tangent: [0.0; 3],
            bitangent: [0.0; 3],
        })
        .collect::<Vec<_>>();

    let mut triangles_included = vec![0; vertices.len()];

    for c in mesh.indices.chunks(3) {
        if c.len() < 3 || c.iter().any(|i| *i as usize >= vertices.len()) {
            continue;
        }
        let v0 = vertices[c[0] as usize];
        let v1 = vertices[c[1] as usize];
        let v2 = vertices[c[2] as usize];

        let pos0: Vector3<_> = v0.position.into();
        let pos1: Vector3<_> = v1.position.into();
        let pos2: Vector3<_> = v2.position.into();

        let uv0: cgmath::Vector2<_> = v0.tex_coords.into();
        let uv1: cgmath::Vector2<_> = v1.tex_coords.into();
        let uv2: cgmath::Vector2<_> = v2.tex_coords.into();

        let delta_pos1 = pos1 - pos0;
        let delta_pos2 = pos2 - pos0;
        let delta_uv1 = uv1 - uv0;
        let delta_uv2 = uv2 - uv0;

        // Solving:
        //     delta_pos1 = delta_uv1.x * T + delta_u.y * B
        //     delta_pos2 = delta_uv2.x * T + delta_uv2.y * B
        let denom = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
        // degenerate uv mapping (or none at all): leave tangents at zero
        if denom.abs() < f32::EPSILON {
            continue;
        }
        let r = 1.0 / denom;
        let tangent = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
        // flipped for right-handed normal maps
        let bitangent = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * -r;

        for &idx in c {
            let v = &mut vertices[idx as usize];
            v.tangent = (tangent + Vector3::from(v.tangent)).into();
            v.bitangent = (bitangent + Vector3::from(v.bitangent)).into();
            triangles_included[idx as usize] += 1;
        }
    }

    // Average the tangents/bitangents
    for (i, n) in triangles_included.into_iter().enumerate() {
        if n == 0 {
            continue;
        }
        let denom = 1.0 / n as f32;
        let v = &mut vertices[i];
        v.tangent = (Vector3::from(v.tangent) * denom).into();
        v.bitangent = (Vector3::from(v.bitangent) * denom).into();
    }

    vertices
}
