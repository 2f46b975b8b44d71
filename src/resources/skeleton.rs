use std::collections::HashMap;

use anyhow::{Context, bail};
use cgmath::{Quaternion, Vector3};

use crate::data_structures::{
    skeleton::{AnimationClip, Bone, BoneTrack, Keyframe, Skeleton},
    transform::Transform,
};

/// Raw output of one glTF animation channel.
#[derive(Clone, Debug)]
enum Keyframes {
    Translation(Vec<Vector3<f32>>),
    Rotation(Vec<Quaternion<f32>>),
    Scale(Vec<Vector3<f32>>),
    Other,
}

fn to_transform((t, r, s): ([f32; 3], [f32; 4], [f32; 3])) -> Transform {
    Transform {
        position: t.into(),
        // glTF stores quaternions as x, y, z, w
        rotation: Quaternion::new(r[3], r[0], r[1], r[2]),
        scale: s.into(),
    }
}

/// Parses a glTF (JSON with embedded buffers, or GLB) document into a skeleton
/// and all of its animation clips.
///
/// Bones are the joints of the first skin. Documents without a skin are
/// treated as rigid hierarchies where every node is a bone.
pub fn parse_gltf(name: &str, bytes: &[u8]) -> anyhow::Result<Skeleton> {
    let (document, buffers, _) =
        gltf::import_slice(bytes).context("failed to parse glTF skeleton")?;

    let joint_nodes: Vec<gltf::Node> = match document.skins().next() {
        Some(skin) => skin.joints().collect(),
        None => document.nodes().collect(),
    };
    if joint_nodes.is_empty() {
        bail!("skeleton '{}' has no bones", name);
    }
    let bone_of_node: HashMap<usize, usize> = joint_nodes
        .iter()
        .enumerate()
        .map(|(bone, node)| (node.index(), bone))
        .collect();

    let mut bones: Vec<Bone> = joint_nodes
        .iter()
        .map(|node| Bone {
            name: node
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("bone_{}", node.index())),
            parent: None,
            bind: to_transform(node.transform().decomposed()),
        })
        .collect();
    for node in document.nodes() {
        let Some(&parent) = bone_of_node.get(&node.index()) else {
            continue;
        };
        for child in node.children() {
            if let Some(&child) = bone_of_node.get(&child.index()) {
                bones[child].parent = Some(parent);
            }
        }
    }

    let mut clips = Vec::new();
    for animation in document.animations() {
        let clip_name = animation
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("clip_{}", animation.index()));
        let mut tracks: HashMap<usize, BoneTrack> = HashMap::new();
        let mut length = 0.0f32;

        for channel in animation.channels() {
            let Some(&bone) = bone_of_node.get(&channel.target().node().index()) else {
                log::debug!(
                    "clip '{}' animates node {} which is not a bone, skipping",
                    clip_name,
                    channel.target().node().index()
                );
                continue;
            };
            let reader = channel.reader(|buffer| Some(buffers[buffer.index()].0.as_slice()));
            let timestamps: Vec<f32> = match reader.read_inputs() {
                Some(times) => times.collect(),
                None => {
                    log::warn!("no timestamps found in channel {}", channel.index());
                    Vec::new()
                }
            };
            let keyframes = match reader.read_outputs() {
                Some(gltf::animation::util::ReadOutputs::Translations(translation)) => {
                    Keyframes::Translation(translation.map(Vector3::from).collect())
                }
                Some(gltf::animation::util::ReadOutputs::Rotations(rotation)) => {
                    Keyframes::Rotation(
                        rotation
                            .into_f32()
                            .map(|r| Quaternion::new(r[3], r[0], r[1], r[2]))
                            .collect(),
                    )
                }
                Some(gltf::animation::util::ReadOutputs::Scales(scales)) => {
                    Keyframes::Scale(scales.map(Vector3::from).collect())
                }
                // morph targets don't drive bones
                Some(gltf::animation::util::ReadOutputs::MorphTargetWeights(_)) | None => {
                    Keyframes::Other
                }
            };
            if let Some(last) = timestamps.last() {
                length = length.max(*last);
            }
            let track = tracks.entry(bone).or_insert_with(|| BoneTrack {
                bone,
                ..Default::default()
            });
            match keyframes {
                Keyframes::Translation(values) => {
                    track.translations = zip_keys(&timestamps, values);
                }
                Keyframes::Rotation(values) => {
                    track.rotations = zip_keys(&timestamps, values);
                }
                Keyframes::Scale(values) => {
                    track.scales = zip_keys(&timestamps, values);
                }
                Keyframes::Other => (),
            }
        }

        let mut tracks: Vec<BoneTrack> = tracks.into_values().collect();
        tracks.sort_by_key(|t| t.bone);
        clips.push(AnimationClip {
            name: clip_name,
            length,
            tracks,
        });
    }

    Ok(Skeleton {
        name: name.to_string(),
        bones,
        clips,
    })
}

fn zip_keys<T>(timestamps: &[f32], values: Vec<T>) -> Vec<Keyframe<T>> {
    if timestamps.len() != values.len() {
        log::warn!(
            "animation track has {} timestamps but {} values, truncating",
            timestamps.len(),
            values.len()
        );
    }
    timestamps
        .iter()
        .zip(values)
        .map(|(&time, value)| Keyframe { time, value })
        .collect()
}
