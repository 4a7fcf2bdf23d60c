//! Camera framing: place the camera so a bounding box fills the view.

use bevy::math::Vec3;

use crate::lib::scene::{Aabb, SceneObject};

/// Extra room around the framed object.
pub const FRAMING_MARGIN: f32 = 1.2;

/// Perspective camera plus the point it orbits around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: Vec3,
    pub target: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width over height.
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            fov_y: 45f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraState {
    /// Unit vector from the target towards the camera.
    pub fn backward(&self) -> Vec3 {
        (self.position - self.target).normalize_or(Vec3::Z)
    }

    pub fn distance(&self) -> f32 {
        self.position.distance(self.target)
    }
}

/// Result of framing, applied to the camera and orbit controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    pub position: Vec3,
    pub target: Vec3,
    pub near: f32,
    pub far: f32,
    pub distance: f32,
}

impl Framing {
    pub fn apply(&self, camera: &mut CameraState) {
        camera.position = self.position;
        camera.target = self.target;
        camera.near = self.near;
        camera.far = self.far;
    }
}

pub struct CameraFramer;

impl CameraFramer {
    /// Distance at which `size` fills the tighter of the two fields of view.
    pub fn fit_distance(size: f32, fov_y: f32, aspect: f32) -> f32 {
        let fit_height = size / (2.0 * (fov_y * 0.5).tan());
        let fit_width = if aspect > 0.0 {
            fit_height / aspect
        } else {
            fit_height
        };
        FRAMING_MARGIN * fit_height.max(fit_width)
    }

    /// Frame `bounds`, keeping the camera's current viewing direction.
    pub fn frame_bounds(bounds: &Aabb, camera: &CameraState) -> Framing {
        let center = bounds.center();
        let size = match bounds.max_extent() {
            s if s > f32::EPSILON => s,
            _ => 1.0,
        };
        let distance = Self::fit_distance(size, camera.fov_y, camera.aspect);
        Framing {
            position: center + camera.backward() * distance,
            target: center,
            near: distance / 1000.0,
            far: distance * 1000.0,
            distance,
        }
    }

    /// Frame a whole object. `None` when it has no geometry.
    pub fn frame(object: &SceneObject, camera: &CameraState) -> Option<Framing> {
        object
            .bounding_box()
            .map(|bounds| Self::frame_bounds(&bounds, camera))
    }
}
