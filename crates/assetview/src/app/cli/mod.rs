use bevy::prelude::Resource;
use clap::Parser;
use std::path::PathBuf;

use crate::lib::export::ExportConfig;
use crate::lib::settings::{SceneSettings, DEFAULT_POINT_SIZE};

#[derive(Parser, Debug, Clone, Resource)]
#[command(name = "assetview")]
#[command(about = "A viewer for glTF, OBJ, PLY, PCD and XYZ assets", long_about = None)]
pub struct Args {
    /// Asset to open on startup
    pub path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Point size for point clouds, clamped to 0.01..=0.5
    #[arg(long, default_value_t = DEFAULT_POINT_SIZE)]
    pub point_size: f32,

    /// Slowly orbit around the object
    #[arg(long)]
    pub auto_rotate: bool,

    /// Draw meshes as wireframes
    #[arg(long)]
    pub wireframe: bool,

    /// Draw bones on top of the model
    #[arg(long)]
    pub show_skeleton: bool,

    /// Start with animation playback paused
    #[arg(long)]
    pub no_play: bool,

    /// Clip to play after loading
    #[arg(long, value_name = "INDEX")]
    pub animation: Option<usize>,

    /// Directory exported files are written to
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub export_dir: PathBuf,

    /// Compress geometry on export
    #[arg(long)]
    pub draco: bool,

    /// Compress textures to KTX2 on export
    #[arg(long)]
    pub ktx2: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    pub fn scene_settings(&self) -> SceneSettings {
        SceneSettings {
            auto_rotate: self.auto_rotate,
            wireframe: self.wireframe,
            show_skeleton: self.show_skeleton,
            play_animation: !self.no_play,
            ..Default::default()
        }
        .with_point_size(self.point_size)
    }

    pub fn export_config(&self) -> ExportConfig {
        ExportConfig {
            draco: self.draco,
            ktx2: self.ktx2,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_seed_settings() {
        let args = Args::parse_from([
            "assetview",
            "scan.ply",
            "--point-size",
            "3.0",
            "--wireframe",
            "--no-play",
            "--draco",
        ]);
        let settings = args.scene_settings();
        assert!(settings.wireframe);
        assert!(!settings.play_animation);
        assert_eq!(settings.point_size(), 0.5);
        assert!(args.export_config().draco);
        assert!(!args.export_config().ktx2);
    }
}
