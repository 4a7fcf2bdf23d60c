//! Integration tests for exporting a loaded asset and loading it back

use assetview::lib::status::NullStatus;
use assetview::{
    load_bytes, AssetExporter, Codecs, ExportConfig, LoadOutcome, LoadedAsset, MetadataExtractor,
    ModelMetadata, ViewerSession,
};
use base64::Engine;
use serde_json::json;

const POSITIONS: [[f32; 3]; 3] = [[2.0, 0.0, 0.0], [4.0, 0.0, 0.0], [2.0, 2.0, 0.0]];

/// A single indexed triangle with two clips on its node.
fn animated_gltf() -> Vec<u8> {
    let mut bin = Vec::new();
    bin.extend(POSITIONS.iter().flatten().flat_map(|f| f.to_le_bytes())); // 0..36
    bin.extend([0u16, 1, 2].iter().flat_map(|i| i.to_le_bytes())); // 36..42
    bin.extend([0u8; 2]); // 42..44
    bin.extend([0.0f32, 1.0].iter().flat_map(|f| f.to_le_bytes())); // 44..52
    bin.extend(
        [0.0f32, 0.0, 0.0, 0.0, 1.0, 0.0]
            .iter()
            .flat_map(|f| f.to_le_bytes()),
    ); // 52..76
    bin.extend(
        [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.707_106_8, 0.0, 0.707_106_8]
            .iter()
            .flat_map(|f| f.to_le_bytes()),
    ); // 76..108

    let uri = format!(
        "data:application/octet-stream;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bin)
    );
    json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "body", "mesh": 0 }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [2.0, 0.0, 0.0], "max": [4.0, 2.0, 0.0] },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
            { "bufferView": 2, "componentType": 5126, "count": 2, "type": "SCALAR",
              "min": [0.0], "max": [1.0] },
            { "bufferView": 3, "componentType": 5126, "count": 2, "type": "VEC3" },
            { "bufferView": 4, "componentType": 5126, "count": 2, "type": "VEC4" }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 },
            { "buffer": 0, "byteOffset": 44, "byteLength": 8 },
            { "buffer": 0, "byteOffset": 52, "byteLength": 24 },
            { "buffer": 0, "byteOffset": 76, "byteLength": 32 }
        ],
        "buffers": [{ "byteLength": bin.len(), "uri": uri }],
        "animations": [
            {
                "name": "Slide",
                "channels": [{ "sampler": 0, "target": { "node": 0, "path": "translation" } }],
                "samplers": [{ "input": 2, "output": 3, "interpolation": "LINEAR" }]
            },
            {
                "channels": [{ "sampler": 0, "target": { "node": 0, "path": "rotation" } }],
                "samplers": [{ "input": 2, "output": 4, "interpolation": "STEP" }]
            }
        ]
    })
    .to_string()
    .into_bytes()
}

fn load(name: &str, bytes: Vec<u8>) -> LoadedAsset {
    load_bytes(name, bytes, None, 0.05, &Codecs::default(), &NullStatus).expect("load failed")
}

fn metadata(asset: &LoadedAsset) -> ModelMetadata {
    MetadataExtractor::extract(&asset.object, &asset.clips)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn test_plain_export_preserves_counts() {
    let original = load("robot.gltf", animated_gltf());
    let before = metadata(&original);
    assert_eq!(before.animations, vec!["Slide", "Animation 2"]);

    let config = ExportConfig::new(before.name.clone());
    let exported =
        AssetExporter::export(&original.object, &original.clips, &config, &Codecs::default())
            .unwrap();
    assert_eq!(exported.file_name, "robot_optimized.glb");
    assert_eq!(&exported.bytes[..4], b"glTF");
    assert!(!contains(&exported.bytes, b"EXT_meshopt_compression"));

    let reloaded = load(&exported.file_name, exported.bytes);
    let after = metadata(&reloaded);
    assert_eq!(after.vertex_count, before.vertex_count);
    assert_eq!(after.triangle_count, before.triangle_count);
    assert_eq!(after.animations.len(), before.animations.len());
    assert_eq!(after.animations[0], "Slide");
    assert_eq!(after.format, "GLB");
}

#[test]
fn test_compressed_export_preserves_counts_and_shape() {
    let original = load("robot.gltf", animated_gltf());
    let before = metadata(&original);

    let config = ExportConfig {
        draco: true,
        ..ExportConfig::new("robot.gltf")
    };
    let exported =
        AssetExporter::export(&original.object, &original.clips, &config, &Codecs::default())
            .unwrap();
    assert_eq!(exported.file_name, "robot_draco.glb");
    assert!(contains(&exported.bytes, b"EXT_meshopt_compression"));

    let reloaded = load(&exported.file_name, exported.bytes);
    let after = metadata(&reloaded);
    assert_eq!(after.vertex_count, before.vertex_count);
    assert_eq!(after.triangle_count, before.triangle_count);
    assert_eq!(after.animations.len(), 2);

    // Export recenters; the extent survives.
    let size_before = original.object.bounding_box().unwrap().size();
    let bounds_after = reloaded.object.bounding_box().unwrap();
    assert!((bounds_after.size() - size_before).length() < 1e-4);
    assert!(bounds_after.center().length() < 1e-4);
}

#[test]
fn test_uncompressed_points_roundtrip() {
    let original = load("scan.xyz", b"0 0 0\n1 0 0\n0 1 0\n0 0 1\n".to_vec());
    let exported = AssetExporter::export(
        &original.object,
        &original.clips,
        &ExportConfig::new("scan.xyz"),
        &Codecs::default(),
    )
    .unwrap();
    assert_eq!(exported.file_name, "scan_optimized.glb");

    let reloaded = load(&exported.file_name, exported.bytes);
    let after = metadata(&reloaded);
    assert_eq!(after.vertex_count, 4);
    assert_eq!(after.triangle_count, 0);
}

#[test]
fn test_session_installs_latest_and_exports_it() {
    let mut session = ViewerSession::default();
    let (older, _) = session.begin_load();
    let (newer, _) = session.begin_load();

    let info = match session.complete_load(newer, Ok(load("robot.gltf", animated_gltf()))) {
        LoadOutcome::Installed(info) => info,
        other => panic!("expected the newest load to install, got {other:?}"),
    };
    assert_eq!(info.animations.len(), 2);

    let stale = session.complete_load(older, Ok(load("scan.xyz", b"0 0 0\n".to_vec())));
    assert_eq!(stale, LoadOutcome::Stale);
    assert_eq!(session.object().unwrap().name, "robot.gltf");

    let exported = session
        .export(&ExportConfig {
            ktx2: true,
            ..ExportConfig::new("robot.gltf")
        })
        .unwrap();
    // No textures: the name changes, the content does not need an encoder.
    assert_eq!(exported.file_name, "robot_ktx2.glb");
    let reloaded = load(&exported.file_name, exported.bytes);
    assert_eq!(metadata(&reloaded).vertex_count, 3);
}
