pub mod animation;
pub mod camera;
pub mod controls;
pub mod export;
pub mod hud;
pub mod loading;
pub mod scene_sync;
pub mod skeleton;

use bevy::prelude::*;

/// Everything the interactive viewer runs on top of `DefaultPlugins`.
pub struct ViewerPlugin;

impl Plugin for ViewerPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((
            loading::AssetLoadingPlugin,
            animation::PlaybackPlugin,
            scene_sync::SceneSyncPlugin,
            camera::OrbitCameraPlugin,
            controls::ViewerControlsPlugin,
            skeleton::SkeletonOverlayPlugin,
            export::ExportPlugin,
            hud::HudPlugin,
        ));
    }
}
