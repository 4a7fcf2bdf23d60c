//! Integration tests for loading and inspecting assets

use assetview::lib::scene::{Material, NodeKind};
use assetview::lib::status::NullStatus;
use assetview::{load_bytes, load_file, AssetError, AssetKind, Codecs, MetadataExtractor};
use base64::Engine;
use serde_json::json;
use std::cell::RefCell;

fn codecs() -> Codecs {
    Codecs::default()
}

#[test]
fn test_unsupported_extension_is_rejected() {
    let err = load_bytes("part.stl", vec![0; 84], None, 0.05, &codecs(), &NullStatus).unwrap_err();
    assert!(matches!(err, AssetError::UnsupportedFormat(_)));
}

#[test]
fn test_ply_without_faces_is_a_point_cloud() {
    let ply = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n1 0 0\n0 1 0\n";
    let loaded = load_bytes("cloud.ply", ply.into(), None, 0.1, &codecs(), &NullStatus).unwrap();
    let graph = &loaded.object.graph;

    let points: Vec<_> = graph.nodes().filter(|(_, n)| n.kind.is_points()).collect();
    assert_eq!(points.len(), 1);
    let material = points[0].1.kind.mesh_data().and_then(|d| d.material).unwrap();
    match graph.material(material) {
        Some(Material::Points(m)) => {
            assert_eq!(m.size, 0.1);
            assert!(m.size_attenuation);
            assert!(!m.vertex_colors);
        }
        other => panic!("expected a point material, got {other:?}"),
    }

    let metadata = MetadataExtractor::extract(&loaded.object, &loaded.clips);
    assert_eq!(metadata.vertex_count, 3);
    assert_eq!(metadata.triangle_count, 0);
    assert_eq!(metadata.format, "PLY");
}

#[test]
fn test_ply_with_faces_is_a_mesh() {
    let ply = "ply\nformat ascii 1.0\nelement vertex 4\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n0 0 0\n1 0 0\n1 1 0\n0 1 0\n4 0 1 2 3\n";
    let loaded = load_bytes("quad.ply", ply.into(), None, 0.05, &codecs(), &NullStatus).unwrap();
    let graph = &loaded.object.graph;

    let (_, node) = graph
        .nodes()
        .find(|(_, n)| matches!(n.kind, NodeKind::Mesh(_)))
        .unwrap();
    let data = node.kind.mesh_data().unwrap();
    assert!(data.geometry.normals.is_some());
    match data.material.and_then(|m| graph.material(m)) {
        Some(Material::Surface(surface)) => {
            assert_eq!(surface.base_color, [0.8, 0.8, 0.8, 1.0]);
            assert_eq!(surface.roughness, 0.5);
            assert_eq!(surface.metallic, 0.5);
        }
        other => panic!("expected a surface material, got {other:?}"),
    }
    assert_eq!(data.geometry.indices.as_ref().map(Vec::len), Some(6));
    let metadata = MetadataExtractor::extract(&loaded.object, &[]);
    assert_eq!(metadata.triangle_count, metadata.vertex_count);
}

#[test]
fn test_non_indexed_mesh_counts_a_triangle_per_vertex() {
    let positions: Vec<u8> = (0..1000u32)
        .flat_map(|i| [(i % 10) as f32, (i / 10) as f32, 0.0])
        .flat_map(|f| f.to_le_bytes())
        .collect();
    let doc = json!({
        "asset": { "version": "2.0" },
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
        "accessors": [{
            "bufferView": 0, "componentType": 5126, "count": 1000, "type": "VEC3",
            "min": [0.0, 0.0, 0.0], "max": [9.0, 99.0, 0.0]
        }],
        "bufferViews": [{ "buffer": 0, "byteLength": positions.len() }],
        "buffers": [{ "byteLength": positions.len(), "uri": data_uri(&positions) }]
    });
    let loaded = load_bytes(
        "soup.gltf",
        doc.to_string().into_bytes(),
        None,
        0.05,
        &codecs(),
        &NullStatus,
    )
    .unwrap();
    let metadata = MetadataExtractor::extract(&loaded.object, &loaded.clips);
    assert_eq!(metadata.vertex_count, 1000);
    assert_eq!(metadata.triangle_count, 1000);
    assert_eq!(metadata.format, "GLTF");
}

#[test]
fn test_metadata_is_stable_across_calls() {
    let xyz = "0 0 0 255 0 0\n1 1 1 0 255 0\n";
    let loaded = load_bytes("pts.xyz", xyz.into(), None, 0.05, &codecs(), &NullStatus).unwrap();
    let first = MetadataExtractor::extract(&loaded.object, &loaded.clips);
    let second = MetadataExtractor::extract(&loaded.object, &loaded.clips);
    assert_eq!(first, second);
    assert_eq!(first.byte_size, xyz.len() as u64);
    assert_eq!(first.name, "pts.xyz");
}

#[test]
fn test_obj_with_sidecar_material() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("box.mtl"), "newmtl blue\nKd 0 0 1\n").unwrap();
    std::fs::write(
        dir.path().join("box.obj"),
        "mtllib box.mtl\no face\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nusemtl blue\nf 1 2 3 4\n",
    )
    .unwrap();

    let seen = RefCell::new(Vec::new());
    let status = |message: &str| seen.borrow_mut().push(message.to_string());
    let loaded = load_file(&dir.path().join("box.obj"), 0.05, &codecs(), &status).unwrap();
    assert_eq!(loaded.object.kind, AssetKind::Obj);
    assert!(!seen.borrow().is_empty());

    let surfaces: Vec<_> = loaded
        .object
        .graph
        .materials()
        .iter()
        .filter_map(|m| match m {
            Material::Surface(s) => Some(s),
            Material::Points(_) => None,
        })
        .collect();
    assert_eq!(surfaces.len(), 1);
    assert_eq!(&surfaces[0].base_color[..3], &[0.0, 0.0, 1.0]);

    let metadata = MetadataExtractor::extract(&loaded.object, &loaded.clips);
    assert_eq!(metadata.triangle_count, metadata.vertex_count);
    assert_eq!(metadata.material_count, 1);
}

fn data_uri(bytes: &[u8]) -> String {
    format!(
        "data:application/octet-stream;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
