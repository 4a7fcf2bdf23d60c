//! Display settings and their application onto a loaded object.

use bevy::prelude::*;

use crate::lib::scene::{Material, NodeId, SceneGraph, SceneObject};

pub const MIN_POINT_SIZE: f32 = 0.01;
pub const MAX_POINT_SIZE: f32 = 0.5;
pub const DEFAULT_POINT_SIZE: f32 = 0.05;

/// User-facing viewer configuration.
#[derive(Debug, Clone, PartialEq, Resource)]
pub struct SceneSettings {
    pub auto_rotate: bool,
    pub wireframe: bool,
    pub show_skeleton: bool,
    pub play_animation: bool,
    pub active_animation_index: usize,
    pub(crate) point_size: f32,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            auto_rotate: false,
            wireframe: false,
            show_skeleton: false,
            play_animation: true,
            active_animation_index: 0,
            point_size: DEFAULT_POINT_SIZE,
        }
    }
}

impl SceneSettings {
    pub fn point_size(&self) -> f32 {
        self.point_size
    }

    /// Set the point size, clamped to the supported range.
    pub fn set_point_size(&mut self, size: f32) {
        self.point_size = if size.is_finite() {
            size.clamp(MIN_POINT_SIZE, MAX_POINT_SIZE)
        } else {
            DEFAULT_POINT_SIZE
        };
    }

    pub fn with_point_size(mut self, size: f32) -> Self {
        self.set_point_size(size);
        self
    }

    /// The subset of settings that changes how the loaded object looks.
    pub fn display(&self) -> DisplaySettings {
        DisplaySettings {
            wireframe: self.wireframe,
            point_size: self.point_size,
            show_skeleton: self.show_skeleton,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySettings {
    pub wireframe: bool,
    pub point_size: f32,
    pub show_skeleton: bool,
}

/// How the skeleton overlay is drawn: on top of everything and translucent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub depth_test: bool,
    pub depth_write: bool,
    pub color: [f32; 4],
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            color: [0.2, 1.0, 0.4, 0.6],
        }
    }
}

/// Lines between connected bones.
///
/// Only the bone pairs are stored; endpoints are read from the graph each
/// time so the overlay follows the animated pose.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonOverlay {
    links: Vec<(NodeId, NodeId)>,
    pub style: OverlayStyle,
}

impl SkeletonOverlay {
    /// `None` when the graph has no bones.
    pub fn build(graph: &SceneGraph) -> Option<Self> {
        if !graph.has_bones() {
            return None;
        }
        Some(Self {
            links: graph.bone_links(),
            style: OverlayStyle::default(),
        })
    }

    pub fn links(&self) -> &[(NodeId, NodeId)] {
        &self.links
    }

    /// World-space line segments for the current pose.
    pub fn segments(&self, graph: &SceneGraph) -> Vec<(Vec3, Vec3)> {
        let world = graph.world_matrices();
        self.links
            .iter()
            .filter_map(|(parent, child)| {
                let a = world.get(parent.0)?.transform_point3(Vec3::ZERO);
                let b = world.get(child.0)?.transform_point3(Vec3::ZERO);
                Some((a, b))
            })
            .collect()
    }
}

/// Re-applies display settings when they change.
#[derive(Debug, Default, Clone)]
pub struct SettingsApplier {
    applied: Option<DisplaySettings>,
}

impl SettingsApplier {
    /// Forget what was applied so the next call runs unconditionally.
    pub fn reset(&mut self) {
        self.applied = None;
    }

    /// Push `settings` onto `object`'s materials and the overlay. Does
    /// nothing unless a watched setting changed since the last call.
    /// Returns whether anything was applied.
    pub fn apply(
        &mut self,
        object: &mut SceneObject,
        overlay: &mut Option<SkeletonOverlay>,
        settings: &SceneSettings,
    ) -> bool {
        let display = settings.display();
        if self.applied == Some(display) {
            return false;
        }
        for material in object.graph.materials_mut() {
            match material {
                Material::Surface(surface) => surface.wireframe = display.wireframe,
                Material::Points(points) => {
                    points.size = display.point_size;
                    points.size_attenuation = true;
                }
            }
        }

        if display.show_skeleton {
            if overlay.is_none() {
                *overlay = SkeletonOverlay::build(&object.graph);
                if overlay.is_some() {
                    debug!("Skeleton overlay attached");
                }
            }
        } else if overlay.take().is_some() {
            debug!("Skeleton overlay detached");
        }

        self.applied = Some(display);
        true
    }
}
