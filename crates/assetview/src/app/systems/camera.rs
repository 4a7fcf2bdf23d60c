//! Orbit camera around the loaded object
//!
//! Controls:
//! - Left drag: Orbit
//! - Right or middle drag: Pan
//! - Mouse wheel: Zoom
//! - F: Frame the object

use bevy::input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel};
use bevy::prelude::*;

use crate::app::systems::loading::process_completed_loads;
use crate::lib::camera::CameraState;
use crate::lib::session::ViewerSession;

/// Radians per second while auto-rotate is on.
pub const AUTO_ROTATE_SPEED: f32 = 0.5;
const MAX_PITCH: f32 = 1.5;

/// Ask for the camera to be fitted to the current object.
#[derive(Message, Debug, Clone, Copy)]
pub struct FrameObject;

#[derive(Component, Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub sensitivity: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 5.0,
            yaw: std::f32::consts::FRAC_PI_2,
            pitch: 0.3,
            sensitivity: 0.005,
        }
    }
}

impl OrbitCamera {
    /// Offset from the target to the camera.
    pub fn offset(&self) -> Vec3 {
        let cos_pitch = self.pitch.cos();
        Vec3::new(
            self.yaw.cos() * cos_pitch,
            self.pitch.sin(),
            self.yaw.sin() * cos_pitch,
        ) * self.distance
    }

    /// Set yaw and pitch so the camera sits along `backward` from the target.
    pub fn look_along(&mut self, backward: Vec3) {
        let backward = backward.normalize_or(Vec3::Z);
        self.pitch = backward.y.clamp(-1.0, 1.0).asin().clamp(-MAX_PITCH, MAX_PITCH);
        self.yaw = backward.z.atan2(backward.x);
    }

    pub fn apply(&self, transform: &mut Transform) {
        transform.translation = self.target + self.offset();
        transform.look_at(self.target, Vec3::Y);
    }
}

pub struct OrbitCameraPlugin;

impl Plugin for OrbitCameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<FrameObject>().add_systems(
            Update,
            (frame_camera.after(process_completed_loads), orbit_camera).chain(),
        );
    }
}

pub fn orbit_camera(
    time: Res<Time>,
    mut mouse_motion: MessageReader<MouseMotion>,
    mut mouse_wheel: MessageReader<MouseWheel>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    session: Res<ViewerSession>,
    mut query: Query<(&mut OrbitCamera, &mut Transform)>,
) {
    let motion: Vec2 = mouse_motion.read().map(|m| m.delta).sum();
    let mut zoom = 0.0;
    for wheel in mouse_wheel.read() {
        zoom += match wheel.unit {
            MouseScrollUnit::Line => wheel.y,
            MouseScrollUnit::Pixel => wheel.y * 0.02,
        };
    }

    for (mut orbit, mut transform) in query.iter_mut() {
        if mouse_button.pressed(MouseButton::Left) {
            orbit.yaw += motion.x * orbit.sensitivity;
            orbit.pitch = (orbit.pitch + motion.y * orbit.sensitivity).clamp(-MAX_PITCH, MAX_PITCH);
        } else if mouse_button.pressed(MouseButton::Right) || mouse_button.pressed(MouseButton::Middle) {
            let pan_speed = orbit.distance * orbit.sensitivity * 0.2;
            let right = *transform.right();
            let up = *transform.up();
            orbit.target += (up * motion.y - right * motion.x) * pan_speed;
        }

        if zoom != 0.0 {
            orbit.distance = (orbit.distance * (1.0 - zoom * 0.1).clamp(0.5, 1.5)).max(1e-3);
        }

        if session.settings.auto_rotate {
            orbit.yaw += AUTO_ROTATE_SPEED * time.delta_secs();
        }

        orbit.apply(&mut transform);
    }
}

/// Fit the camera to the object on request.
///
/// After a load the fit runs on the following frame, once the new entities
/// exist; the F key fits immediately.
pub fn frame_camera(
    mut requests: MessageReader<FrameObject>,
    mut session: ResMut<ViewerSession>,
    mut deferred: Local<bool>,
    mut cameras: Query<(&mut OrbitCamera, &mut Transform, &mut Projection)>,
) {
    let mut frame_now = requests.read().count() > 0 || std::mem::take(&mut *deferred);
    if session.take_frame_request() {
        *deferred = true;
        frame_now = false;
    }
    if !frame_now {
        return;
    }

    for (mut orbit, mut transform, mut projection) in &mut cameras {
        let Projection::Perspective(perspective) = projection.as_mut() else {
            continue;
        };
        let state = CameraState {
            position: transform.translation,
            target: orbit.target,
            fov_y: perspective.fov,
            aspect: perspective.aspect_ratio,
            near: perspective.near,
            far: perspective.far,
        };
        let Some(framing) = session.frame_camera(&state) else {
            continue;
        };
        perspective.near = framing.near;
        perspective.far = framing.far;
        orbit.target = framing.target;
        orbit.distance = framing.distance;
        orbit.look_along(framing.position - framing.target);
        orbit.apply(&mut transform);
        debug!(
            "Framed object at {:?}, distance {:.3}",
            framing.target, framing.distance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_along_roundtrips_offset() {
        let mut orbit = OrbitCamera {
            distance: 2.0,
            ..Default::default()
        };
        let backward = Vec3::new(1.0, 1.0, 1.0).normalize();
        orbit.look_along(backward);
        assert!((orbit.offset() - backward * 2.0).length() < 1e-5);
    }
}
