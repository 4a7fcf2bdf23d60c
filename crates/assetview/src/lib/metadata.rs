//! Descriptive statistics about a loaded asset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::lib::animation::AnimationClip;
use crate::lib::scene::SceneObject;

/// Snapshot reported once per successful load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub byte_size: u64,
    pub format: String,
    pub vertex_count: usize,
    pub triangle_count: usize,
    /// Mesh and point-cloud instances.
    pub mesh_count: usize,
    pub material_count: usize,
    pub texture_count: usize,
    pub animations: Vec<String>,
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Walk `object` once and count what it contains.
    ///
    /// Materials and textures are counted by identity, so a material shared by
    /// several meshes counts once. Triangles are a third of the position
    /// components of triangulated meshes, rounded down over the whole object.
    pub fn extract(object: &SceneObject, clips: &[AnimationClip]) -> ModelMetadata {
        let graph = &object.graph;
        let mut vertex_count = 0;
        let mut triangle_components = 0;
        let mut mesh_count = 0;
        let mut materials = BTreeSet::new();
        let mut textures = BTreeSet::new();

        for id in graph.depth_first() {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let Some(data) = node.kind.mesh_data() else {
                continue;
            };
            mesh_count += 1;
            let positions = data.geometry.vertex_count();
            vertex_count += positions;
            if node.kind.is_triangulated() {
                triangle_components += positions * 3;
            }
            if let Some(material_id) = data.material {
                materials.insert(material_id);
                if let Some(material) = graph.material(material_id) {
                    textures.extend(material.texture_slots().into_iter().flatten());
                }
            }
        }

        ModelMetadata {
            name: object.name.clone(),
            byte_size: object.byte_size,
            format: object.kind.label().to_string(),
            vertex_count,
            triangle_count: triangle_components / 3,
            mesh_count,
            material_count: materials.len(),
            texture_count: textures.len(),
            animations: clips
                .iter()
                .enumerate()
                .map(|(i, clip)| clip.display_name(i))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::format::AssetKind;
    use crate::lib::scene::{
        Geometry, Material, MeshData, Node, NodeKind, SceneGraph, SurfaceMaterial, Texture,
    };

    fn object(graph: SceneGraph) -> SceneObject {
        SceneObject {
            name: "robot.glb".into(),
            kind: AssetKind::Glb,
            byte_size: 2048,
            graph,
        }
    }

    fn mesh(vertices: usize, material: Option<crate::lib::scene::MaterialId>) -> Node {
        Node::new(NodeKind::Mesh(MeshData::new(
            Geometry::from_positions(vec![[0.0; 3]; vertices]),
            material,
        )))
    }

    #[test]
    fn test_triangle_count_without_index_buffer() {
        let mut graph = SceneGraph::new("root");
        graph.add_node(None, mesh(1000, None));
        let metadata = MetadataExtractor::extract(&object(graph), &[]);
        assert_eq!(metadata.vertex_count, 1000);
        assert_eq!(metadata.triangle_count, 1000);
        assert_eq!(metadata.mesh_count, 1);
    }

    #[test]
    fn test_shared_material_counted_once() {
        let mut graph = SceneGraph::new("root");
        let shared = graph.add_material(Material::Surface(SurfaceMaterial::default()));
        graph.add_node(None, mesh(3, Some(shared)));
        graph.add_node(None, mesh(3, Some(shared)));
        assert_eq!(MetadataExtractor::extract(&object(graph.clone()), &[]).material_count, 1);

        let other = graph.add_material(Material::Surface(SurfaceMaterial::default()));
        graph.add_node(None, mesh(3, Some(other)));
        assert_eq!(MetadataExtractor::extract(&object(graph), &[]).material_count, 2);
    }

    #[test]
    fn test_textures_deduplicated_across_slots() {
        let mut graph = SceneGraph::new("root");
        let packed = graph.add_texture(Texture {
            name: None,
            mime_type: "image/png".into(),
            bytes: vec![],
        });
        let albedo = graph.add_texture(Texture {
            name: None,
            mime_type: "image/png".into(),
            bytes: vec![],
        });
        let material = graph.add_material(Material::Surface(SurfaceMaterial {
            albedo_map: Some(albedo),
            roughness_map: Some(packed),
            metalness_map: Some(packed),
            ..Default::default()
        }));
        graph.add_node(None, mesh(3, Some(material)));
        assert_eq!(MetadataExtractor::extract(&object(graph), &[]).texture_count, 2);
    }

    #[test]
    fn test_points_count_vertices_not_triangles() {
        let mut graph = SceneGraph::new("root");
        graph.add_node(
            None,
            Node::new(NodeKind::Points(MeshData::new(
                Geometry::from_positions(vec![[0.0; 3]; 7]),
                None,
            ))),
        );
        let metadata = MetadataExtractor::extract(&object(graph), &[]);
        assert_eq!(metadata.vertex_count, 7);
        assert_eq!(metadata.triangle_count, 0);
        assert_eq!(metadata.mesh_count, 1);
    }

    #[test]
    fn test_idempotent_with_animation_names() {
        let mut graph = SceneGraph::new("root");
        graph.add_node(None, mesh(6, None));
        let clips = vec![
            AnimationClip::new(Some("Walk".into()), vec![]),
            AnimationClip::new(None, vec![]),
        ];
        let object = object(graph);
        let first = MetadataExtractor::extract(&object, &clips);
        let second = MetadataExtractor::extract(&object, &clips);
        assert_eq!(first, second);
        assert_eq!(first.animations, vec!["Walk", "Animation 2"]);
        assert_eq!(first.format, "GLB");
    }
}
