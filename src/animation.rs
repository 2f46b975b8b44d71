//! Per-object animation blending.
//!
//! Every playing clip on an object is an [`AnimationInstance`] that walks
//! through `FadeIn -> Play -> FadeOut -> Stopped`. Stopped instances are
//! dropped in the same update pass. Instances come in two priority tiers:
//! before instances advance, high-priority clips carve their bones out of
//! the blend mask shared by all low-priority clips, so an override like
//! "wave" only suppresses the arm of a looping "walk".

use crate::{
    config::AnimationConfig,
    data_structures::skeleton::{ClipState, Skeleton, SkeletonInstance},
    object::ObjectId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationPhase {
    FadeIn,
    Play,
    FadeOut,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Low,
}

/// A clip on another object's skeleton that mirrors an instance's state
/// (attachments posed by the avatar they are worn on).
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedClip {
    pub object: ObjectId,
    pub clip: String,
}

/// State to copy onto a linked clip after an update.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedClipUpdate {
    pub object: ObjectId,
    pub clip: String,
    pub time: f32,
    pub weight: f32,
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct AnimationInstance {
    clip: String,
    weight: f32,
    /// Scales the blend weight handed to the skeleton.
    pub weight_factor: f32,
    /// Playback speed multiplier; negative plays backwards.
    pub speed: f32,
    /// Remaining plays; 0 repeats forever.
    pub repeat: u32,
    phase: AnimationPhase,
    fade_in: f32,
    fade_out: f32,
    priority: Priority,
    /// Fade out once the clip reaches its end instead of looping.
    pub auto_stop: bool,
    looped: bool,
    /// Set once the clip time has been advanced at least once.
    started: bool,
    linked: Vec<LinkedClip>,
}

impl AnimationInstance {
    fn new(clip: &str, looped: bool, fade_in: f32, priority: Priority) -> Self {
        Self {
            clip: clip.to_string(),
            weight: 0.0,
            weight_factor: 1.0,
            speed: 1.0,
            repeat: 0,
            phase: AnimationPhase::FadeIn,
            fade_in: fade_in.max(0.0),
            fade_out: 0.0,
            priority,
            auto_stop: !looped,
            looped,
            started: false,
            linked: Vec::new(),
        }
    }

    pub fn clip(&self) -> &str {
        &self.clip
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn phase(&self) -> AnimationPhase {
        self.phase
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    pub fn linked(&self) -> &[LinkedClip] {
        &self.linked
    }

    pub fn is_active(&self) -> bool {
        self.phase != AnimationPhase::Stopped
    }

    fn set_weight(&mut self, weight: f32) {
        self.weight = weight.clamp(0.0, 1.0);
    }

    fn fade_in(&mut self, seconds: f32) {
        self.fade_in = seconds.max(0.0);
        if self.weight >= 1.0 {
            self.phase = AnimationPhase::Play;
        } else {
            self.phase = AnimationPhase::FadeIn;
        }
    }

    fn fade_out(&mut self, seconds: f32) {
        if self.phase == AnimationPhase::Stopped {
            return;
        }
        self.fade_out = seconds.max(0.0);
        self.phase = AnimationPhase::FadeOut;
    }

    /// Loops are wrapped by the clip state itself; clips that must detect
    /// their end are clamped instead.
    fn wraps_time(&self) -> bool {
        self.looped && !self.auto_stop && self.repeat == 0
    }

    /// Advances the state machine by `dt` and drives `state` (time only; the
    /// weight is written back by the caller).
    fn advance(&mut self, dt: f32, state: &mut ClipState) {
        state.looped = self.wraps_time();
        if !self.started {
            // a clip reversed before its first update plays from its end
            if self.speed < 0.0 {
                state.time = state.length;
            }
            self.started = true;
        }
        if self.phase != AnimationPhase::Stopped {
            state.add_time(self.speed * dt);
        }
        match self.phase {
            AnimationPhase::FadeIn => {
                if self.fade_in <= 0.0 {
                    self.set_weight(1.0);
                } else {
                    self.set_weight(self.weight + dt / self.fade_in);
                }
                if self.weight >= 1.0 {
                    self.phase = AnimationPhase::Play;
                }
            }
            AnimationPhase::Play => {
                if self.auto_stop || self.repeat > 0 {
                    let reached_end = if self.speed >= 0.0 {
                        state.time >= state.length
                    } else {
                        state.time <= 0.0
                    };
                    if reached_end {
                        if self.repeat > 1 {
                            self.repeat -= 1;
                            state.time = if self.speed >= 0.0 { 0.0 } else { state.length };
                        } else {
                            self.fade_out(self.fade_out.max(self.fade_in));
                        }
                    }
                }
            }
            AnimationPhase::FadeOut => {
                if self.fade_out <= 0.0 {
                    self.set_weight(0.0);
                } else {
                    self.set_weight(self.weight - dt / self.fade_out);
                }
                if self.weight <= 0.0 {
                    self.phase = AnimationPhase::Stopped;
                }
            }
            AnimationPhase::Stopped => (),
        }
        self.write_state(state);
    }

    fn write_state(&self, state: &mut ClipState) {
        state.weight = (self.weight * self.weight_factor).clamp(0.0, 1.0);
        state.enabled = self.phase != AnimationPhase::Stopped;
    }
}

/// Per-bone masks for both priority tiers.
#[derive(Clone, Debug, PartialEq)]
pub struct BlendMasks {
    pub high: Vec<f32>,
    pub low: Vec<f32>,
}

/// High-priority clips get the full mask; every bone they animate is
/// suppressed in the low-priority mask by their weight (floored at 0).
pub fn compute_blend_masks(instances: &[AnimationInstance], skeleton: &Skeleton) -> BlendMasks {
    let bones = skeleton.bone_count();
    let high = vec![1.0; bones];
    let mut low = vec![1.0; bones];
    for instance in instances
        .iter()
        .filter(|i| i.is_active() && i.priority == Priority::High && i.weight > 0.0)
    {
        let Some(clip) = skeleton.clip(&instance.clip) else {
            continue;
        };
        for bone in clip.animated_bones() {
            if let Some(entry) = low.get_mut(bone) {
                *entry = (*entry - instance.weight).max(0.0);
            }
        }
    }
    BlendMasks { high, low }
}

/// Distance-bucketed animation update throttling.
///
/// Entries are `(squared distance, interval)` kept farthest-first; an object
/// beyond a threshold only animates once the accumulated time exceeds that
/// threshold's interval. An interval of 0 stops updates beyond the distance.
#[derive(Clone, Debug, Default)]
pub struct AnimationLod {
    entries: Vec<(f32, f32)>,
}

impl AnimationLod {
    pub fn new(entries: impl IntoIterator<Item = (f32, f32)>) -> Self {
        let mut entries: Vec<(f32, f32)> = entries
            .into_iter()
            .map(|(distance, interval)| (distance * distance, interval.max(0.0)))
            .collect();
        entries.sort_by(|a, b| b.0.total_cmp(&a.0));
        Self { entries }
    }

    pub fn from_config(config: &AnimationConfig) -> Self {
        Self::new(config.lod.iter().map(|e| (e.distance, e.interval_secs)))
    }

    /// `None` means "update every frame".
    pub fn interval_for(&self, distance_sq: f32) -> Option<f32> {
        self.entries
            .iter()
            .find(|(threshold, _)| distance_sq > *threshold)
            .map(|(_, interval)| *interval)
    }
}

/// The active animation list of one object.
#[derive(Clone, Debug, Default)]
pub struct AnimationSet {
    instances: Vec<AnimationInstance>,
    lod_elapsed: f32,
}

impl AnimationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> &[AnimationInstance] {
        &self.instances
    }

    pub fn get(&self, clip: &str) -> Option<&AnimationInstance> {
        self.instances.iter().find(|i| i.clip == clip)
    }

    pub fn get_mut(&mut self, clip: &str) -> Option<&mut AnimationInstance> {
        self.instances.iter_mut().find(|i| i.clip == clip)
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Starts (or resumes fading in) `clip`. Returns false if the skeleton
    /// has no such clip.
    pub fn enable(
        &mut self,
        skeleton: &mut SkeletonInstance,
        clip: &str,
        looped: bool,
        fade_in: f32,
        priority: Priority,
    ) -> bool {
        let Some(state) = skeleton.state_mut(clip) else {
            log::warn!("skeleton has no animation clip '{}'", clip);
            return false;
        };
        match self.instances.iter_mut().find(|i| i.clip == clip) {
            Some(instance) => {
                instance.looped = looped;
                instance.auto_stop = !looped;
                instance.priority = priority;
                instance.fade_in(fade_in);
            }
            None => {
                state.time = 0.0;
                let instance = AnimationInstance::new(clip, looped, fade_in, priority);
                state.looped = instance.wraps_time();
                self.instances.push(instance);
            }
        }
        state.enabled = true;
        true
    }

    /// Fades out every other instance of the same tier, then enables `clip`.
    pub fn enable_exclusive(
        &mut self,
        skeleton: &mut SkeletonInstance,
        clip: &str,
        looped: bool,
        fade_in: f32,
        priority: Priority,
        sibling_fade_out: f32,
    ) -> bool {
        if !skeleton.has_clip(clip) {
            log::warn!("skeleton has no animation clip '{}'", clip);
            return false;
        }
        for sibling in self
            .instances
            .iter_mut()
            .filter(|i| i.priority == priority && i.clip != clip)
        {
            sibling.fade_out(sibling_fade_out);
        }
        self.enable(skeleton, clip, looped, fade_in, priority)
    }

    pub fn disable(&mut self, clip: &str, fade_out: f32) {
        match self.get_mut(clip) {
            Some(instance) => instance.fade_out(fade_out),
            None => log::debug!("animation '{}' is not playing", clip),
        }
    }

    pub fn disable_all(&mut self, fade_out: f32) {
        for instance in &mut self.instances {
            instance.fade_out(fade_out);
        }
    }

    /// Removes `clip` immediately, without fading. Returns the linked clips
    /// that must be disabled too.
    pub fn force_disable(
        &mut self,
        skeleton: &mut SkeletonInstance,
        clip: &str,
    ) -> Vec<LinkedClipUpdate> {
        let Some(idx) = self.instances.iter().position(|i| i.clip == clip) else {
            return Vec::new();
        };
        let instance = self.instances.remove(idx);
        if let Some(state) = skeleton.state_mut(clip) {
            state.enabled = false;
            state.weight = 0.0;
            state.blend_mask = None;
        }
        instance
            .linked
            .iter()
            .map(|link| LinkedClipUpdate {
                object: link.object,
                clip: link.clip.clone(),
                time: 0.0,
                weight: 0.0,
                enabled: false,
            })
            .collect()
    }

    pub fn set_speed(&mut self, clip: &str, speed: f32) {
        if let Some(instance) = self.get_mut(clip) {
            instance.speed = speed;
        }
    }

    pub fn set_weight_factor(&mut self, clip: &str, factor: f32) {
        if let Some(instance) = self.get_mut(clip) {
            instance.weight_factor = factor.clamp(0.0, 1.0);
        }
    }

    pub fn set_repeat(&mut self, clip: &str, repeat: u32) {
        if let Some(instance) = self.get_mut(clip) {
            instance.repeat = repeat;
        }
    }

    pub fn link(&mut self, clip: &str, target: LinkedClip) -> bool {
        match self.get_mut(clip) {
            Some(instance) => {
                if !instance.linked.contains(&target) {
                    instance.linked.push(target);
                }
                true
            }
            None => false,
        }
    }

    pub fn unlink_object(&mut self, object: ObjectId) {
        for instance in &mut self.instances {
            instance.linked.retain(|l| l.object != object);
        }
    }

    /// Decides whether this frame's update runs under the LOD policy and
    /// returns the time to advance by.
    pub fn lod_step(&mut self, dt: f32, distance_sq: f32, lod: &AnimationLod) -> Option<f32> {
        self.lod_elapsed += dt;
        match lod.interval_for(distance_sq) {
            None => Some(std::mem::take(&mut self.lod_elapsed)),
            Some(interval) if interval <= 0.0 => {
                self.lod_elapsed = 0.0;
                None
            }
            Some(interval) if self.lod_elapsed >= interval => {
                Some(std::mem::take(&mut self.lod_elapsed))
            }
            Some(_) => None,
        }
    }

    /// Computes blend masks, advances every instance, drops stopped ones and
    /// reports what linked clips on other skeletons must mirror.
    pub fn update(&mut self, dt: f32, skeleton: &mut SkeletonInstance) -> Vec<LinkedClipUpdate> {
        let masks = compute_blend_masks(&self.instances, skeleton.skeleton());
        let has_high = self
            .instances
            .iter()
            .any(|i| i.is_active() && i.priority == Priority::High && i.weight > 0.0);

        let mut linked = Vec::new();
        for instance in &mut self.instances {
            let Some(state) = skeleton.state_mut(&instance.clip) else {
                continue;
            };
            state.blend_mask = match instance.priority {
                Priority::High => None,
                Priority::Low if has_high => Some(masks.low.clone()),
                Priority::Low => None,
            };
            instance.advance(dt, state);
            if instance.phase == AnimationPhase::Stopped {
                state.blend_mask = None;
                state.time = 0.0;
            }
            for link in &instance.linked {
                linked.push(LinkedClipUpdate {
                    object: link.object,
                    clip: link.clip.clone(),
                    time: state.time,
                    weight: state.weight,
                    enabled: state.enabled,
                });
            }
        }
        self.instances.retain(AnimationInstance::is_active);
        linked
    }
}

/// Copies a linked update onto `skeleton`.
pub fn apply_linked(skeleton: &mut SkeletonInstance, update: &LinkedClipUpdate) {
    match skeleton.state_mut(&update.clip) {
        Some(state) => {
            state.time = update.time.clamp(0.0, state.length.max(0.0));
            state.weight = update.weight;
            state.enabled = update.enabled;
        }
        None => log::debug!("linked clip '{}' missing on target skeleton", update.clip),
    }
}
