//! Keyboard shortcuts
//!
//! - W: Toggle wireframe
//! - K: Toggle skeleton overlay
//! - Space: Play/pause animation
//! - 1-9: Select animation clip
//! - +/-: Grow/shrink point size
//! - R: Toggle auto-rotate
//! - F: Frame the object
//! - E: Export

use bevy::prelude::*;

use crate::app::systems::animation::advance_animation;
use crate::app::systems::camera::FrameObject;
use crate::app::systems::export::RequestExport;
use crate::lib::session::ViewerSession;

const CLIP_KEYS: [KeyCode; 9] = [
    KeyCode::Digit1,
    KeyCode::Digit2,
    KeyCode::Digit3,
    KeyCode::Digit4,
    KeyCode::Digit5,
    KeyCode::Digit6,
    KeyCode::Digit7,
    KeyCode::Digit8,
    KeyCode::Digit9,
];

/// Factor applied per +/- press.
const POINT_SIZE_STEP: f32 = 1.25;

pub struct ViewerControlsPlugin;

impl Plugin for ViewerControlsPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, keyboard_controls.before(advance_animation));
    }
}

pub fn keyboard_controls(
    keys: Res<ButtonInput<KeyCode>>,
    mut session: ResMut<ViewerSession>,
    mut frame: MessageWriter<FrameObject>,
    mut export: MessageWriter<RequestExport>,
) {
    let settings = &mut session.settings;
    if keys.just_pressed(KeyCode::KeyW) {
        settings.wireframe = !settings.wireframe;
        info!("Wireframe: {}", settings.wireframe);
    }
    if keys.just_pressed(KeyCode::KeyK) {
        settings.show_skeleton = !settings.show_skeleton;
        info!("Skeleton overlay: {}", settings.show_skeleton);
    }
    if keys.just_pressed(KeyCode::Space) {
        settings.play_animation = !settings.play_animation;
        info!("Animation playing: {}", settings.play_animation);
    }
    if keys.just_pressed(KeyCode::KeyR) {
        settings.auto_rotate = !settings.auto_rotate;
    }
    if keys.any_just_pressed([KeyCode::Equal, KeyCode::NumpadAdd]) {
        let size = settings.point_size() * POINT_SIZE_STEP;
        settings.set_point_size(size);
        info!("Point size: {:.3}", settings.point_size());
    }
    if keys.any_just_pressed([KeyCode::Minus, KeyCode::NumpadSubtract]) {
        let size = settings.point_size() / POINT_SIZE_STEP;
        settings.set_point_size(size);
        info!("Point size: {:.3}", settings.point_size());
    }

    if let Some(index) = CLIP_KEYS.iter().position(|key| keys.just_pressed(*key)) {
        if session.select_animation(index) {
            info!("Playing animation {}", index);
        }
    }

    if keys.just_pressed(KeyCode::KeyF) {
        frame.write(FrameObject);
    }
    if keys.just_pressed(KeyCode::KeyE) {
        export.write(RequestExport);
    }
}
