//! Keyframe animation clips and the playback mixer.
//!
//! [`AnimationRuntime`] owns the clip list produced by a load, the playing
//! actions and their fade weights. It is rebuilt from scratch for every new
//! asset. Switching clips never hard-cuts: the old action fades out and the new
//! one fades in over [`CROSSFADE_SECONDS`].

use bevy::math::{Quat, Vec3};
use bevy::prelude::Transform;
use std::collections::BTreeMap;

use crate::lib::scene::{NodeId, SceneGraph};

pub const CROSSFADE_SECONDS: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackProperty {
    Translation,
    Rotation,
    Scale,
}

impl TrackProperty {
    /// Float components per value.
    pub fn components(&self) -> usize {
        match self {
            TrackProperty::Rotation => 4,
            TrackProperty::Translation | TrackProperty::Scale => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
    /// Values are stored as (in-tangent, value, out-tangent) triples.
    CubicSpline,
}

/// Keyframes for one property of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub target: NodeId,
    pub property: TrackProperty,
    pub interpolation: Interpolation,
    pub times: Vec<f32>,
    /// Flat component data, `components()` floats per value.
    pub values: Vec<f32>,
}

enum Sample {
    Vec(Vec3),
    Rot(Quat),
}

impl Track {
    fn value_at(&self, key: usize) -> &[f32] {
        let n = self.property.components();
        let stride = if self.interpolation == Interpolation::CubicSpline {
            3
        } else {
            1
        };
        let offset = if stride == 3 { key * 3 + 1 } else { key };
        let start = offset * n;
        self.values.get(start..start + n).unwrap_or(&[])
    }

    fn tangent_at(&self, key: usize, out: bool) -> &[f32] {
        let n = self.property.components();
        let start = (key * 3 + if out { 2 } else { 0 }) * n;
        self.values.get(start..start + n).unwrap_or(&[])
    }

    fn to_sample(&self, v: &[f32]) -> Option<Sample> {
        match (self.property, v) {
            (TrackProperty::Rotation, [x, y, z, w]) => {
                Some(Sample::Rot(Quat::from_xyzw(*x, *y, *z, *w).normalize()))
            }
            (TrackProperty::Translation | TrackProperty::Scale, [x, y, z]) => {
                Some(Sample::Vec(Vec3::new(*x, *y, *z)))
            }
            _ => None,
        }
    }

    fn sample(&self, time: f32) -> Option<Sample> {
        let last = self.times.len().checked_sub(1)?;
        let next = self.times.partition_point(|t| *t <= time);
        if next == 0 {
            return self.to_sample(self.value_at(0));
        }
        if next > last {
            return self.to_sample(self.value_at(last));
        }
        let prev = next - 1;
        let (t0, t1) = (self.times[prev], self.times[next]);
        let dt = t1 - t0;
        let s = if dt > 0.0 { (time - t0) / dt } else { 0.0 };

        match self.interpolation {
            Interpolation::Step => self.to_sample(self.value_at(prev)),
            Interpolation::Linear => {
                match (
                    self.to_sample(self.value_at(prev))?,
                    self.to_sample(self.value_at(next))?,
                ) {
                    (Sample::Vec(a), Sample::Vec(b)) => Some(Sample::Vec(a.lerp(b, s))),
                    (Sample::Rot(a), Sample::Rot(b)) => Some(Sample::Rot(a.slerp(b, s))),
                    _ => None,
                }
            }
            Interpolation::CubicSpline => {
                let n = self.property.components();
                let p0 = self.value_at(prev);
                let m0 = self.tangent_at(prev, true);
                let p1 = self.value_at(next);
                let m1 = self.tangent_at(next, false);
                if p0.len() != n || m0.len() != n || p1.len() != n || m1.len() != n {
                    return None;
                }
                let (s2, s3) = (s * s, s * s * s);
                let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
                let h10 = s3 - 2.0 * s2 + s;
                let h01 = -2.0 * s3 + 3.0 * s2;
                let h11 = s3 - s2;
                let out: Vec<f32> = (0..n)
                    .map(|i| h00 * p0[i] + h10 * dt * m0[i] + h01 * p1[i] + h11 * dt * m1[i])
                    .collect();
                self.to_sample(&out)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: Option<String>,
    pub duration: f32,
    pub tracks: Vec<Track>,
}

impl AnimationClip {
    /// Build a clip whose duration is the last keyframe time over all tracks.
    pub fn new(name: Option<String>, tracks: Vec<Track>) -> Self {
        let duration = tracks
            .iter()
            .filter_map(|t| t.times.last().copied())
            .fold(0.0_f32, f32::max);
        Self {
            name,
            duration,
            tracks,
        }
    }

    /// The clip's name, or `"Animation {index+1}"` when it has none.
    pub fn display_name(&self, index: usize) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Animation {}", index + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fade {
    from: f32,
    to: f32,
    elapsed: f32,
}

/// One clip being played by the mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationAction {
    pub clip: usize,
    pub time: f32,
    pub weight: f32,
    fade: Option<Fade>,
}

impl AnimationAction {
    pub fn is_fading_in(&self) -> bool {
        self.fade.is_some_and(|f| f.to > f.from)
    }

    pub fn is_fading_out(&self) -> bool {
        self.fade.is_some_and(|f| f.to < f.from)
    }

    fn advance_fade(&mut self, dt: f32) {
        if let Some(fade) = self.fade.as_mut() {
            fade.elapsed += dt;
            let t = (fade.elapsed / CROSSFADE_SECONDS).min(1.0);
            self.weight = fade.from + (fade.to - fade.from) * t;
            if t >= 1.0 {
                self.weight = fade.to;
                self.fade = None;
            }
        }
    }
}

/// Playback clock plus clip list for the current scene object.
#[derive(Debug, Clone, Default)]
pub struct AnimationRuntime {
    clips: Vec<AnimationClip>,
    actions: Vec<AnimationAction>,
    active: Option<usize>,
    playing: bool,
    rest_pose: BTreeMap<NodeId, Transform>,
}

impl AnimationRuntime {
    /// Bind `clips` to `graph`, remembering the rest pose of every animated
    /// node so partially weighted blends fall back to it.
    pub fn new(clips: Vec<AnimationClip>, graph: &SceneGraph) -> Self {
        let mut rest_pose = BTreeMap::new();
        for track in clips.iter().flat_map(|c| c.tracks.iter()) {
            if let Some(node) = graph.node(track.target) {
                rest_pose.insert(track.target, node.transform);
            }
        }
        Self {
            clips,
            actions: Vec::new(),
            active: None,
            playing: true,
            rest_pose,
        }
    }

    pub fn clips(&self) -> &[AnimationClip] {
        &self.clips
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn actions(&self) -> &[AnimationAction] {
        &self.actions
    }

    pub fn action(&self, clip: usize) -> Option<&AnimationAction> {
        self.actions.iter().find(|a| a.clip == clip)
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Nodes whose transforms are driven by some clip.
    pub fn animated_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.rest_pose.keys().copied()
    }

    /// Switch to clip `index`, cross-fading from the current one.
    ///
    /// An index with no clip falls back to clip 0 when nothing is playing yet
    /// and is otherwise ignored. Returns whether anything changed.
    pub fn select(&mut self, index: usize) -> bool {
        let index = if index < self.clips.len() {
            index
        } else if self.active.is_none() && !self.clips.is_empty() {
            0
        } else {
            return false;
        };
        if self.active == Some(index) {
            return false;
        }

        if let Some(previous) = self.active {
            if let Some(action) = self.actions.iter_mut().find(|a| a.clip == previous) {
                action.fade = Some(Fade {
                    from: action.weight,
                    to: 0.0,
                    elapsed: 0.0,
                });
            }
        }

        // A clip still fading out turns around from where it is.
        match self.actions.iter_mut().find(|a| a.clip == index) {
            Some(action) => {
                action.fade = Some(Fade {
                    from: action.weight,
                    to: 1.0,
                    elapsed: 0.0,
                });
            }
            None => self.actions.push(AnimationAction {
                clip: index,
                time: 0.0,
                weight: 0.0,
                fade: Some(Fade {
                    from: 0.0,
                    to: 1.0,
                    elapsed: 0.0,
                }),
            }),
        }
        self.active = Some(index);
        true
    }

    /// Advance the clock by `dt` seconds. Nothing moves while paused.
    pub fn tick(&mut self, dt: f32) {
        if !self.playing {
            return;
        }
        for action in &mut self.actions {
            let duration = self.clips.get(action.clip).map_or(0.0, |c| c.duration);
            action.time = if duration > 0.0 {
                (action.time + dt) % duration
            } else {
                0.0
            };
            action.advance_fade(dt);
        }
        self.actions
            .retain(|a| !(a.fade.is_none() && a.weight <= 0.0));
    }

    /// Write the blended pose of every playing action into `graph`.
    pub fn apply(&self, graph: &mut SceneGraph) {
        #[derive(Default)]
        struct Blend {
            translation: Option<(Vec3, f32)>,
            rotation: Option<(Quat, f32)>,
            scale: Option<(Vec3, f32)>,
        }

        let mut blends: BTreeMap<NodeId, Blend> = BTreeMap::new();
        for action in &self.actions {
            if action.weight <= 0.0 {
                continue;
            }
            let Some(clip) = self.clips.get(action.clip) else {
                continue;
            };
            for track in &clip.tracks {
                let Some(sample) = track.sample(action.time) else {
                    continue;
                };
                let blend = blends.entry(track.target).or_default();
                let w = action.weight;
                match (track.property, sample) {
                    (TrackProperty::Translation, Sample::Vec(v)) => {
                        let (acc, total) = blend.translation.get_or_insert((Vec3::ZERO, 0.0));
                        *acc += v * w;
                        *total += w;
                    }
                    (TrackProperty::Scale, Sample::Vec(v)) => {
                        let (acc, total) = blend.scale.get_or_insert((Vec3::ZERO, 0.0));
                        *acc += v * w;
                        *total += w;
                    }
                    (TrackProperty::Rotation, Sample::Rot(q)) => match blend.rotation.as_mut() {
                        Some((acc, total)) => {
                            *total += w;
                            *acc = acc.slerp(q, w / *total);
                        }
                        None => blend.rotation = Some((q, w)),
                    },
                    _ => {}
                }
            }
        }

        for (id, blend) in blends {
            let Some(rest) = self.rest_pose.get(&id).copied() else {
                continue;
            };
            let Some(node) = graph.node_mut(id) else {
                continue;
            };
            let mut pose = rest;
            if let Some((acc, total)) = blend.translation {
                pose.translation = blend_vec(rest.translation, acc, total);
            }
            if let Some((acc, total)) = blend.scale {
                pose.scale = blend_vec(rest.scale, acc, total);
            }
            if let Some((q, total)) = blend.rotation {
                pose.rotation = if total < 1.0 {
                    rest.rotation.slerp(q, total)
                } else {
                    q
                };
            }
            node.transform = pose;
        }
    }
}

fn blend_vec(rest: Vec3, weighted_sum: Vec3, total: f32) -> Vec3 {
    if total < 1.0 {
        weighted_sum + rest * (1.0 - total)
    } else {
        weighted_sum / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::scene::{Node, NodeKind};

    fn graph_with_bone() -> (SceneGraph, NodeId) {
        let mut graph = SceneGraph::new("root");
        let bone = graph.add_node(None, Node::new(NodeKind::Bone));
        (graph, bone)
    }

    fn slide(target: NodeId, to_x: f32) -> AnimationClip {
        AnimationClip::new(
            None,
            vec![Track {
                target,
                property: TrackProperty::Translation,
                interpolation: Interpolation::Linear,
                times: vec![0.0, 1.0],
                values: vec![0.0, 0.0, 0.0, to_x, 0.0, 0.0],
            }],
        )
    }

    #[test]
    fn test_display_name_defaults() {
        let clip = AnimationClip::new(None, vec![]);
        assert_eq!(clip.display_name(0), "Animation 1");
        let named = AnimationClip::new(Some("Walk".into()), vec![]);
        assert_eq!(named.display_name(3), "Walk");
    }

    #[test]
    fn test_switch_crossfades() {
        let (graph, bone) = graph_with_bone();
        let mut runtime = AnimationRuntime::new(vec![slide(bone, 1.0), slide(bone, -1.0)], &graph);
        assert!(runtime.select(0));
        runtime.tick(CROSSFADE_SECONDS);
        assert!((runtime.action(0).unwrap().weight - 1.0).abs() < 1e-6);

        assert!(runtime.select(1));
        assert!(runtime.action(0).unwrap().is_fading_out());
        assert!(runtime.action(1).unwrap().is_fading_in());
        assert_eq!(runtime.action(1).unwrap().time, 0.0);

        runtime.tick(CROSSFADE_SECONDS / 2.0);
        assert!((runtime.action(0).unwrap().weight - 0.5).abs() < 1e-4);
        assert!((runtime.action(1).unwrap().weight - 0.5).abs() < 1e-4);

        runtime.tick(CROSSFADE_SECONDS);
        assert!(runtime.action(0).is_none());
        assert!((runtime.action(1).unwrap().weight - 1.0).abs() < 1e-6);
        assert_eq!(runtime.active_index(), Some(1));
    }

    #[test]
    fn test_reselecting_a_fading_clip_resumes_it() {
        let (graph, bone) = graph_with_bone();
        let mut runtime = AnimationRuntime::new(vec![slide(bone, 1.0), slide(bone, -1.0)], &graph);
        runtime.select(0);
        runtime.tick(CROSSFADE_SECONDS);
        runtime.select(1);
        runtime.tick(CROSSFADE_SECONDS / 3.0);
        let before = runtime.action(0).unwrap().clone();
        assert!(before.is_fading_out());

        assert!(runtime.select(0));
        let resumed = runtime.action(0).unwrap();
        assert!(resumed.is_fading_in());
        assert_eq!(resumed.time, before.time);
        assert_eq!(resumed.weight, before.weight);
        assert!(runtime.action(1).unwrap().is_fading_out());
        assert_eq!(runtime.actions().len(), 2);

        runtime.tick(CROSSFADE_SECONDS);
        assert!((runtime.action(0).unwrap().weight - 1.0).abs() < 1e-6);
        assert!(runtime.action(1).is_none());
    }

    #[test]
    fn test_out_of_range_is_noop() {
        let (graph, bone) = graph_with_bone();
        let mut runtime = AnimationRuntime::new(vec![slide(bone, 1.0), slide(bone, -1.0)], &graph);
        runtime.select(1);
        assert!(!runtime.select(5));
        assert_eq!(runtime.active_index(), Some(1));
    }

    #[test]
    fn test_out_of_range_falls_back_to_first_clip() {
        let (graph, bone) = graph_with_bone();
        let mut runtime = AnimationRuntime::new(vec![slide(bone, 1.0)], &graph);
        assert!(runtime.select(5));
        assert_eq!(runtime.active_index(), Some(0));

        let mut empty = AnimationRuntime::new(vec![], &graph);
        assert!(!empty.select(0));
        assert_eq!(empty.active_index(), None);
    }

    #[test]
    fn test_paused_clock_does_not_advance() {
        let (graph, bone) = graph_with_bone();
        let mut runtime = AnimationRuntime::new(vec![slide(bone, 1.0)], &graph);
        runtime.select(0);
        runtime.set_playing(false);
        runtime.tick(0.5);
        assert_eq!(runtime.action(0).unwrap().time, 0.0);
    }

    #[test]
    fn test_apply_writes_sampled_pose() {
        let (mut graph, bone) = graph_with_bone();
        let mut runtime = AnimationRuntime::new(vec![slide(bone, 2.0)], &graph);
        runtime.select(0);
        runtime.tick(CROSSFADE_SECONDS);
        runtime.tick(0.2);
        runtime.apply(&mut graph);
        let x = graph.node(bone).unwrap().transform.translation.x;
        assert!((x - 1.0).abs() < 1e-4, "x = {x}");
    }

    #[test]
    fn test_step_and_rotation_sampling() {
        let (_, bone) = graph_with_bone();
        let track = Track {
            target: bone,
            property: TrackProperty::Rotation,
            interpolation: Interpolation::Step,
            times: vec![0.0, 1.0],
            values: vec![0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0],
        };
        match track.sample(0.9) {
            Some(Sample::Rot(q)) => assert!((q.w - 1.0).abs() < 1e-6),
            _ => panic!("expected rotation"),
        }
    }
}
