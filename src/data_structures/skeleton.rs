//! Skeletons, animation clips and per-object skeleton instances.
//!
//! A [`Skeleton`] and its clips are immutable shared resources. Each animated
//! object owns a [`SkeletonInstance`] holding one [`ClipState`] per clip
//! (time, weight, enabled flag, per-bone blend mask), which is what the
//! animation engine drives every frame.

use std::{collections::HashMap, sync::Arc};

use cgmath::{Quaternion, Vector3};

use crate::data_structures::transform::Transform;

#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub bind: Transform,
}

#[derive(Clone, Debug)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
}

/// Keyframes of one bone. Empty channels leave the bind pose untouched.
#[derive(Clone, Debug, Default)]
pub struct BoneTrack {
    pub bone: usize,
    pub translations: Vec<Keyframe<Vector3<f32>>>,
    pub rotations: Vec<Keyframe<Quaternion<f32>>>,
    pub scales: Vec<Keyframe<Vector3<f32>>>,
}

fn bracket<T>(keys: &[Keyframe<T>], time: f32) -> Option<(&T, &T, f32)> {
    let first = keys.first()?;
    if time <= first.time || keys.len() == 1 {
        return Some((&first.value, &first.value, 0.0));
    }
    for pair in keys.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if time <= b.time {
            let span = b.time - a.time;
            let t = if span > 0.0 { (time - a.time) / span } else { 0.0 };
            return Some((&a.value, &b.value, t));
        }
    }
    keys.last().map(|last| (&last.value, &last.value, 0.0))
}

impl BoneTrack {
    pub fn sample(&self, time: f32, bind: &Transform) -> Transform {
        let mut out = *bind;
        if let Some((&a, &b, t)) = bracket(&self.translations, time) {
            out.position = a + (b - a) * t;
        }
        if let Some((&a, &b, t)) = bracket(&self.rotations, time) {
            out.rotation = a.nlerp(b, t);
        }
        if let Some((&a, &b, t)) = bracket(&self.scales, time) {
            out.scale = a + (b - a) * t;
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty() && self.rotations.is_empty() && self.scales.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct AnimationClip {
    pub name: String,
    pub length: f32,
    pub tracks: Vec<BoneTrack>,
}

impl AnimationClip {
    /// Indices of the bones this clip actually animates.
    pub fn animated_bones(&self) -> impl Iterator<Item = usize> + '_ {
        self.tracks.iter().filter(|t| !t.is_empty()).map(|t| t.bone)
    }
}

#[derive(Clone, Debug)]
pub struct Skeleton {
    pub name: String,
    pub bones: Vec<Bone>,
    pub clips: Vec<AnimationClip>,
}

impl Skeleton {
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn clip(&self, name: &str) -> Option<&AnimationClip> {
        self.clips.iter().find(|c| c.name == name)
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }
}

/// Playback state of one clip on one skeleton instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipState {
    pub time: f32,
    pub length: f32,
    pub weight: f32,
    pub enabled: bool,
    pub looped: bool,
    pub blend_mask: Option<Vec<f32>>,
}

impl ClipState {
    /// Advances time, wrapping when looped and clamping otherwise.
    pub fn add_time(&mut self, delta: f32) {
        self.time += delta;
        if self.length <= 0.0 {
            self.time = 0.0;
        } else if self.looped {
            self.time = self.time.rem_euclid(self.length);
        } else {
            self.time = self.time.clamp(0.0, self.length);
        }
    }

    pub fn has_ended(&self) -> bool {
        !self.looped && self.time >= self.length
    }
}

#[derive(Clone, Debug)]
pub struct SkeletonInstance {
    skeleton: Arc<Skeleton>,
    states: HashMap<String, ClipState>,
}

impl SkeletonInstance {
    pub fn new(skeleton: Arc<Skeleton>) -> Self {
        let states = skeleton
            .clips
            .iter()
            .map(|clip| {
                (
                    clip.name.clone(),
                    ClipState {
                        time: 0.0,
                        length: clip.length,
                        weight: 0.0,
                        enabled: false,
                        looped: true,
                        blend_mask: None,
                    },
                )
            })
            .collect();
        Self { skeleton, states }
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn has_clip(&self, clip: &str) -> bool {
        self.states.contains_key(clip)
    }

    pub fn state(&self, clip: &str) -> Option<&ClipState> {
        self.states.get(clip)
    }

    pub fn state_mut(&mut self, clip: &str) -> Option<&mut ClipState> {
        self.states.get_mut(clip)
    }

    pub fn enabled_clips(&self) -> impl Iterator<Item = (&String, &ClipState)> {
        self.states.iter().filter(|(_, s)| s.enabled)
    }

    /// Blends every enabled clip into per-bone local transforms.
    ///
    /// Each clip contributes with `weight * mask[bone]`; whatever weight is
    /// left below 1.0 is filled with the bind pose.
    pub fn evaluate_pose(&self) -> Vec<Transform> {
        let bones = &self.skeleton.bones;
        let mut pose: Vec<Transform> = bones.iter().map(|b| b.bind).collect();
        let mut accumulated = vec![0.0f32; bones.len()];
        let mut blended: Vec<Option<Transform>> = vec![None; bones.len()];

        for clip in &self.skeleton.clips {
            let Some(state) = self.states.get(&clip.name) else {
                continue;
            };
            if !state.enabled || state.weight <= 0.0 {
                continue;
            }
            for track in &clip.tracks {
                let Some(bone) = bones.get(track.bone) else {
                    continue;
                };
                let mask = state
                    .blend_mask
                    .as_ref()
                    .and_then(|m| m.get(track.bone).copied())
                    .unwrap_or(1.0);
                let w = state.weight * mask;
                if w <= 0.0 {
                    continue;
                }
                let sample = track.sample(state.time, &bone.bind);
                let total = accumulated[track.bone] + w;
                blended[track.bone] = Some(match blended[track.bone] {
                    None => sample,
                    Some(current) => current.lerp(&sample, w / total),
                });
                accumulated[track.bone] = total;
            }
        }

        for (idx, result) in blended.into_iter().enumerate() {
            if let Some(result) = result {
                let coverage = accumulated[idx].min(1.0);
                pose[idx] = bones[idx].bind.lerp(&result, coverage);
            }
        }
        pose
    }
}
