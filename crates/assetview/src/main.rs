use bevy::light::AmbientLight as GlobalAmbientLight;
use bevy::log::{Level, LogPlugin};
use bevy::pbr::wireframe::WireframePlugin;
use bevy::prelude::*;

use assetview::app::cli::Args;
use assetview::app::systems::camera::OrbitCamera;
use assetview::app::systems::export::ExportDirectory;
use assetview::app::systems::loading::{InitialAnimation, OpenAsset};
use assetview::app::systems::ViewerPlugin;
use assetview::{CodecConfig, ViewerSession};

fn main() {
    let args = Args::parse_args();

    let mut session = ViewerSession::new(args.scene_settings(), CodecConfig::default());
    session.set_metadata_callback(Box::new(|metadata| {
        if let Ok(json) = serde_json::to_string(metadata) {
            info!("Metadata: {}", json);
        }
    }));

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    App::new()
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "assetview".into(),
                        ..default()
                    }),
                    ..default()
                })
                .set(LogPlugin {
                    level,
                    filter: "wgpu=error,naga=warn".into(),
                    ..default()
                }),
        )
        .add_plugins(WireframePlugin::default())
        .insert_resource(session)
        .add_plugins(ViewerPlugin)
        .insert_resource(args.export_config())
        .insert_resource(ExportDirectory(args.export_dir.clone()))
        .insert_resource(InitialAnimation(args.animation))
        .insert_resource(args)
        .add_systems(Startup, (setup, open_input_path))
        .run();
}

fn setup(mut commands: Commands) {
    let orbit = OrbitCamera::default();
    let mut transform = Transform::default();
    orbit.apply(&mut transform);
    commands.spawn((Camera3d::default(), transform, orbit));

    // Key light
    commands.spawn((
        DirectionalLight {
            illuminance: 10000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(0.0, 1.0, 0.0).looking_at(Vec3::new(-0.3, -1.0, -0.5), Vec3::Y),
    ));

    // Fill light from the opposite side
    commands.spawn((
        DirectionalLight {
            illuminance: 3000.0,
            shadows_enabled: false,
            ..default()
        },
        Transform::from_xyz(0.0, 1.0, 0.0).looking_at(Vec3::new(0.5, -0.5, 0.8), Vec3::Y),
    ));

    commands.insert_resource(GlobalAmbientLight {
        color: Color::WHITE,
        brightness: 500.0,
        ..default()
    });
}

/// Open the file given on the command line, if any.
fn open_input_path(args: Res<Args>, mut open: MessageWriter<OpenAsset>) {
    if let Some(path) = &args.path {
        info!("Opening {:?}", path);
        open.write(OpenAsset(path.clone()));
    } else {
        info!("Drop a file on the window to open it");
    }
}
