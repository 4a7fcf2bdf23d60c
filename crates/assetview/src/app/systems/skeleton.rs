//! Bone overlay drawn with gizmos.

use bevy::gizmos::config::{GizmoConfigGroup, GizmoConfigStore};
use bevy::prelude::*;

use crate::app::systems::animation::advance_animation;
use crate::lib::session::ViewerSession;
use crate::lib::settings::OverlayStyle;

/// Gizmo group for the skeleton so it can be drawn on top of the model.
#[derive(Default, Reflect, GizmoConfigGroup)]
pub struct SkeletonGizmos;

pub struct SkeletonOverlayPlugin;

impl Plugin for SkeletonOverlayPlugin {
    fn build(&self, app: &mut App) {
        app.init_gizmo_group::<SkeletonGizmos>()
            .add_systems(Startup, configure_skeleton_gizmos)
            .add_systems(Update, draw_skeleton.after(advance_animation));
    }
}

fn configure_skeleton_gizmos(mut store: ResMut<GizmoConfigStore>) {
    let style = OverlayStyle::default();
    let (config, _) = store.config_mut::<SkeletonGizmos>();
    config.line.width = 2.0;
    // Negative bias moves lines in front of all geometry.
    config.depth_bias = if style.depth_test { 0.0 } else { -1.0 };
}

pub fn draw_skeleton(session: Res<ViewerSession>, mut gizmos: Gizmos<SkeletonGizmos>) {
    let (Some(object), Some(overlay)) = (session.object(), session.overlay()) else {
        return;
    };
    let [r, g, b, a] = overlay.style.color;
    let color = Color::linear_rgba(r, g, b, a);
    for (start, end) in overlay.segments(&object.graph) {
        gizmos.line(start, end, color);
    }
}
