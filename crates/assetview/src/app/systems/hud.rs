//! Text overlay with loader status, model statistics and export progress.

use bevy::prelude::*;
use std::fmt::Write;

use crate::app::systems::loading::StatusLine;
use crate::lib::export::ExportProgress;
use crate::lib::metadata::ModelMetadata;
use crate::lib::session::ViewerSession;

const KEY_HELP: &str =
    "W wireframe  K skeleton  Space play  1-9 clip  +/- point size  R rotate  F frame  E export";

pub struct HudPlugin;

impl Plugin for HudPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, spawn_hud)
            .add_systems(Update, update_hud);
    }
}

#[derive(Component)]
pub struct HudText;

fn spawn_hud(mut commands: Commands) {
    commands.spawn((
        Text::new(KEY_HELP),
        TextFont {
            font_size: 14.0,
            ..default()
        },
        TextColor(Color::WHITE),
        Node {
            position_type: PositionType::Absolute,
            top: Val::Px(8.0),
            left: Val::Px(8.0),
            ..default()
        },
        HudText,
    ));
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn describe_model(out: &mut String, metadata: &ModelMetadata, session: &ViewerSession) {
    let _ = writeln!(
        out,
        "{} ({}, {})",
        metadata.name,
        metadata.format,
        format_size(metadata.byte_size)
    );
    let _ = writeln!(
        out,
        "{} vertices  {} triangles  {} meshes  {} materials  {} textures",
        metadata.vertex_count,
        metadata.triangle_count,
        metadata.mesh_count,
        metadata.material_count,
        metadata.texture_count
    );
    if !metadata.animations.is_empty() {
        let active = session.animation().active_index();
        let clips: Vec<String> = metadata
            .animations
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let marker = if active == Some(i) { "*" } else { "" };
                format!("[{}] {}{}", i + 1, name, marker)
            })
            .collect();
        let state = if session.animation().is_playing() {
            "playing"
        } else {
            "paused"
        };
        let _ = writeln!(out, "Animations ({}): {}", state, clips.join("  "));
    }
}

pub fn update_hud(
    session: Res<ViewerSession>,
    status: Res<StatusLine>,
    progress: Res<ExportProgress>,
    mut query: Query<&mut Text, With<HudText>>,
) {
    let Ok(mut text) = query.single_mut() else {
        return;
    };

    let mut out = String::new();
    if !status.0.is_empty() {
        let _ = writeln!(out, "{}", status.0);
    }
    if let Some(metadata) = session.metadata() {
        describe_model(&mut out, metadata, &session);
    }
    let settings = &session.settings;
    let _ = writeln!(
        out,
        "wireframe {}  skeleton {}  point size {:.3}",
        if settings.wireframe { "on" } else { "off" },
        if settings.show_skeleton { "on" } else { "off" },
        settings.point_size()
    );
    match &*progress {
        ExportProgress::Idle => {}
        ExportProgress::Running { .. } => {
            let _ = writeln!(out, "Exporting... {:.0}%", progress.percent());
        }
        ExportProgress::Succeeded { file_name } => {
            let _ = writeln!(out, "Exported {}", file_name);
        }
        ExportProgress::Failed { message } => {
            let _ = writeln!(out, "Export failed: {}", message);
        }
    }
    out.push_str(KEY_HELP);

    if text.0 != out {
        text.0 = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 1024 * 512), "5.5 MB");
    }
}
