//! Wavefront OBJ meshes with optional MTL materials.

use bevy::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

use crate::lib::scene::{
    Geometry, Material, MaterialId, MeshData, Node, NodeKind, SceneGraph, SurfaceMaterial,
    Texture, TextureId,
};

#[derive(Debug, Error)]
pub enum ObjError {
    #[error("OBJ: payload is not valid UTF-8")]
    NotUtf8,

    #[error("OBJ: {0}")]
    Parse(#[from] tobj::LoadError),

    #[error("OBJ: file contains no geometry")]
    Empty,
}

/// Parse an OBJ buffer into a graph with one mesh node per object/group.
///
/// `mtllib` references are resolved against `base_dir`. A missing or broken
/// MTL file is not fatal; the affected meshes simply have no material.
pub fn parse_obj(bytes: &[u8], name: &str, base_dir: Option<&Path>) -> Result<SceneGraph, ObjError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ObjError::NotUtf8)?;
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };

    let (models, materials) = tobj::load_obj_buf(&mut text.as_bytes(), &options, |mtl| {
        let Some(dir) = base_dir else {
            return Err(tobj::LoadError::OpenFileFailed);
        };
        let path = dir.join(mtl);
        match File::open(&path) {
            Ok(file) => tobj::load_mtl_buf(&mut BufReader::new(file)),
            Err(err) => {
                warn!("Material library {} unavailable: {}", path.display(), err);
                Err(tobj::LoadError::OpenFileFailed)
            }
        }
    })?;

    let materials = materials.unwrap_or_else(|err| {
        debug!("No usable materials for {}: {}", name, err);
        Vec::new()
    });

    if models.iter().all(|m| m.mesh.positions.is_empty()) {
        return Err(ObjError::Empty);
    }

    let mut graph = SceneGraph::new(name);
    let mut textures: HashMap<String, Option<TextureId>> = HashMap::new();
    let material_ids: Vec<MaterialId> = materials
        .iter()
        .map(|mtl| {
            let albedo_map = mtl.diffuse_texture.as_deref().and_then(|file| {
                *textures
                    .entry(file.to_string())
                    .or_insert_with(|| load_texture(&mut graph, base_dir, file))
            });
            let normal_map = mtl.normal_texture.as_deref().and_then(|file| {
                *textures
                    .entry(file.to_string())
                    .or_insert_with(|| load_texture(&mut graph, base_dir, file))
            });
            let [r, g, b] = mtl.diffuse.unwrap_or([1.0, 1.0, 1.0]);
            let alpha = mtl.dissolve.unwrap_or(1.0);
            graph.add_material(Material::Surface(SurfaceMaterial {
                name: Some(mtl.name.clone()),
                base_color: [r, g, b, alpha],
                albedo_map,
                normal_map,
                alpha_blend: alpha < 1.0,
                ..Default::default()
            }))
        })
        .collect();

    for model in models {
        let mesh = model.mesh;
        if mesh.positions.is_empty() {
            continue;
        }
        let vertex_count = mesh.positions.len() / 3;
        let mut geometry = Geometry::from_positions(
            mesh.positions
                .chunks_exact(3)
                .map(|p| [p[0], p[1], p[2]])
                .collect(),
        );
        if mesh.normals.len() == vertex_count * 3 {
            geometry.normals = Some(
                mesh.normals
                    .chunks_exact(3)
                    .map(|n| [n[0], n[1], n[2]])
                    .collect(),
            );
        }
        if mesh.texcoords.len() == vertex_count * 2 {
            geometry.uvs = Some(
                mesh.texcoords
                    .chunks_exact(2)
                    .map(|t| [t[0], 1.0 - t[1]])
                    .collect(),
            );
        }
        if mesh.vertex_color.len() == vertex_count * 3 {
            geometry.colors = Some(
                mesh.vertex_color
                    .chunks_exact(3)
                    .map(|c| [c[0], c[1], c[2], 1.0])
                    .collect(),
            );
        }
        geometry.indices = Some(mesh.indices);

        let material = mesh.material_id.and_then(|i| material_ids.get(i).copied());
        let node_name = if model.name.is_empty() {
            "mesh".to_string()
        } else {
            model.name
        };
        debug!("OBJ object '{}': {} vertices", node_name, vertex_count);
        graph.add_node(
            None,
            Node::new(NodeKind::Mesh(MeshData::new(geometry, material))).named(node_name),
        );
    }

    Ok(graph)
}

fn load_texture(graph: &mut SceneGraph, base_dir: Option<&Path>, file: &str) -> Option<TextureId> {
    let path = base_dir?.join(file);
    match std::fs::read(&path) {
        Ok(bytes) => Some(graph.add_texture(Texture {
            name: Some(file.to_string()),
            mime_type: mime_for(&path).to_string(),
            bytes,
        })),
        Err(err) => {
            warn!("Texture {} unavailable: {}", path.display(), err);
            None
        }
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ktx2") => "image/ktx2",
        _ => "image/png",
    }
}
