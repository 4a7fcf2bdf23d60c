//! Turns whatever a parser produced into a uniform [`SceneObject`].
//!
//! Which fix-ups apply depends only on the [`AssetKind`]:
//!
//! * interchange formats keep their own materials; skinned meshes get
//!   frustum culling disabled because their rest-pose bounds do not follow
//!   the deformed pose
//! * point clouds get a point material sized to the current point size
//! * mesh-only formats get a neutral surface material, or have the materials
//!   they bring rebuilt from their color and albedo texture

use bevy::prelude::*;

use crate::lib::asset_loaders::{GeometryClass, Payload};
use crate::lib::format::AssetKind;
use crate::lib::scene::{
    Geometry, Material, MaterialId, MeshData, Node, NodeKind, PointMaterial, SceneGraph,
    SceneObject, SurfaceMaterial,
};

pub const DEFAULT_SURFACE_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];
pub const DEFAULT_ROUGHNESS: f32 = 0.5;
pub const DEFAULT_METALNESS: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct AssetNormalizer {
    pub point_size: f32,
}

impl AssetNormalizer {
    pub fn new(point_size: f32) -> Self {
        Self { point_size }
    }

    pub fn normalize(
        &self,
        payload: Payload,
        kind: AssetKind,
        name: &str,
        byte_size: u64,
    ) -> SceneObject {
        let graph = match payload {
            Payload::Scene(mut graph) => {
                if kind.is_interchange() {
                    disable_skinned_culling(&mut graph);
                } else {
                    self.attach_point_materials(&mut graph);
                    rebuild_surface_materials(&mut graph);
                }
                graph
            }
            Payload::Geometry(geometry) => self.wrap_geometry(geometry, name),
        };
        SceneObject {
            name: name.to_string(),
            kind,
            byte_size,
            graph,
        }
    }

    pub fn point_material(&self, geometry: &Geometry) -> PointMaterial {
        PointMaterial {
            color: [1.0; 4],
            size: self.point_size,
            size_attenuation: true,
            vertex_colors: geometry.has_colors(),
        }
    }

    fn wrap_geometry(&self, mut geometry: Geometry, name: &str) -> SceneGraph {
        let mut graph = SceneGraph::new(name);
        match GeometryClass::classify(&geometry) {
            GeometryClass::Points => {
                let material = graph.add_material(Material::Points(self.point_material(&geometry)));
                debug!("{}: {} points", name, geometry.vertex_count());
                graph.add_node(
                    None,
                    Node::new(NodeKind::Points(MeshData::new(geometry, Some(material))))
                        .named("points"),
                );
            }
            GeometryClass::Triangles => {
                if geometry.normals.is_none() {
                    geometry.compute_vertex_normals();
                }
                let mut surface = default_surface();
                surface.vertex_colors = geometry.has_colors();
                let material = graph.add_material(Material::Surface(surface));
                graph.add_node(
                    None,
                    Node::new(NodeKind::Mesh(MeshData::new(geometry, Some(material)))).named("mesh"),
                );
            }
        }
        graph
    }

    /// Give every point node that arrived without a material its own one.
    fn attach_point_materials(&self, graph: &mut SceneGraph) {
        let ids: Vec<_> = graph
            .nodes()
            .filter(|(_, n)| n.kind.is_points())
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let Some(material) = graph
                .node(id)
                .and_then(|n| n.kind.mesh_data())
                .filter(|d| d.material.is_none())
                .map(|d| self.point_material(&d.geometry))
            else {
                continue;
            };
            let material = graph.add_material(Material::Points(material));
            if let Some(data) = graph.node_mut(id).and_then(|n| n.kind.mesh_data_mut()) {
                data.material = Some(material);
            }
        }
    }
}

/// The neutral material used for meshes that bring none.
pub fn default_surface() -> SurfaceMaterial {
    SurfaceMaterial {
        base_color: DEFAULT_SURFACE_COLOR,
        metallic: DEFAULT_METALNESS,
        roughness: DEFAULT_ROUGHNESS,
        ..Default::default()
    }
}

fn disable_skinned_culling(graph: &mut SceneGraph) {
    let skinned: Vec<_> = graph
        .nodes()
        .filter(|(_, n)| matches!(n.kind, NodeKind::SkinnedMesh(..)))
        .map(|(id, _)| id)
        .collect();
    for id in skinned {
        if let Some(node) = graph.node_mut(id) {
            node.frustum_culled = false;
        }
    }
}

/// Replace the surface materials of a mesh-only format with equivalents
/// built from their color and albedo map. Shared materials stay shared, and
/// meshes without one share a single default material.
fn rebuild_surface_materials(graph: &mut SceneGraph) {
    let mut default_id: Option<MaterialId> = None;
    let meshes: Vec<_> = graph
        .nodes()
        .filter(|(_, n)| n.kind.is_triangulated())
        .map(|(id, _)| id)
        .collect();

    for id in meshes {
        let (material, has_colors) = {
            let Some(data) = graph.node_mut(id).and_then(|n| n.kind.mesh_data_mut()) else {
                continue;
            };
            if data.geometry.normals.is_none() {
                data.geometry.compute_vertex_normals();
            }
            (data.material, data.geometry.has_colors())
        };
        let material = match material {
            Some(material) => material,
            None => {
                let material = *default_id
                    .get_or_insert_with(|| graph.add_material(Material::Surface(default_surface())));
                if let Some(data) = graph.node_mut(id).and_then(|n| n.kind.mesh_data_mut()) {
                    data.material = Some(material);
                }
                material
            }
        };
        if has_colors {
            if let Some(Material::Surface(surface)) = graph.material_mut(material) {
                surface.vertex_colors = true;
            }
        }
    }

    for material in graph.materials_mut() {
        if let Material::Surface(original) = material {
            *original = SurfaceMaterial {
                name: original.name.take(),
                base_color: original.base_color,
                albedo_map: original.albedo_map,
                normal_map: original.normal_map,
                alpha_blend: original.alpha_blend,
                vertex_colors: original.vertex_colors,
                metallic: DEFAULT_METALNESS,
                roughness: DEFAULT_ROUGHNESS,
                ..Default::default()
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::scene::Skin;

    fn surface(graph: &SceneGraph, node: &Node) -> SurfaceMaterial {
        let id = node.kind.mesh_data().unwrap().material.unwrap();
        match graph.material(id).unwrap() {
            Material::Surface(s) => s.clone(),
            other => panic!("expected surface material, got {other:?}"),
        }
    }

    #[test]
    fn test_ply_points_get_point_material() {
        let mut geometry = Geometry::from_positions(vec![[0.0; 3], [1.0; 3]]);
        geometry.colors = Some(vec![[1.0, 0.0, 0.0, 1.0]; 2]);
        geometry.indices = Some(Vec::new());
        let object = AssetNormalizer::new(0.1).normalize(
            Payload::Geometry(geometry),
            AssetKind::Ply,
            "scan.ply",
            10,
        );
        let (_, node) = object.graph.nodes().find(|(_, n)| n.kind.is_points()).unwrap();
        let material = object
            .graph
            .material(node.kind.mesh_data().unwrap().material.unwrap())
            .unwrap();
        assert_eq!(
            material,
            &Material::Points(PointMaterial {
                color: [1.0; 4],
                size: 0.1,
                size_attenuation: true,
                vertex_colors: true,
            })
        );
    }

    #[test]
    fn test_ply_mesh_gets_default_surface() {
        let mut geometry =
            Geometry::from_positions(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        geometry.indices = Some(vec![0, 1, 2]);
        let object =
            AssetNormalizer::new(0.05).normalize(Payload::Geometry(geometry), AssetKind::Ply, "m.ply", 1);
        let (_, node) = object
            .graph
            .nodes()
            .find(|(_, n)| n.kind.is_triangulated())
            .unwrap();
        let s = surface(&object.graph, node);
        assert_eq!(s.base_color, DEFAULT_SURFACE_COLOR);
        assert!((s.roughness - 0.5).abs() < 1e-6);
        assert!((s.metallic - 0.5).abs() < 1e-6);
        assert!(node.kind.mesh_data().unwrap().geometry.normals.is_some());
    }

    #[test]
    fn test_obj_materials_rebuilt_and_shared() {
        let mut graph = SceneGraph::new("obj");
        let red = graph.add_material(Material::Surface(SurfaceMaterial {
            base_color: [1.0, 0.0, 0.0, 1.0],
            metallic: 1.0,
            roughness: 1.0,
            ..Default::default()
        }));
        let tri = Geometry {
            indices: Some(vec![0, 1, 2]),
            ..Geometry::from_positions(vec![[0.0; 3]; 3])
        };
        for material in [Some(red), Some(red), None, None] {
            graph.add_node(None, Node::new(NodeKind::Mesh(MeshData::new(tri.clone(), material))));
        }

        let object =
            AssetNormalizer::new(0.05).normalize(Payload::Scene(graph), AssetKind::Obj, "a.obj", 1);
        assert_eq!(object.graph.materials().len(), 2);
        match object.graph.material(red).unwrap() {
            Material::Surface(s) => {
                assert_eq!(s.base_color, [1.0, 0.0, 0.0, 1.0]);
                assert!((s.roughness - DEFAULT_ROUGHNESS).abs() < 1e-6);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_interchange_materials_untouched_and_skins_unculled() {
        let mut graph = SceneGraph::new("gltf");
        let shiny = graph.add_material(Material::Surface(SurfaceMaterial::default()));
        let data = MeshData::new(Geometry::from_positions(vec![[0.0; 3]]), Some(shiny));
        let skinned = graph.add_node(
            None,
            Node::new(NodeKind::SkinnedMesh(data.clone(), Skin::default())),
        );
        let plain = graph.add_node(None, Node::new(NodeKind::Mesh(data)));

        let object =
            AssetNormalizer::new(0.05).normalize(Payload::Scene(graph), AssetKind::Glb, "a.glb", 1);
        assert!(!object.graph.node(skinned).unwrap().frustum_culled);
        assert!(object.graph.node(plain).unwrap().frustum_culled);
        assert_eq!(
            object.graph.material(shiny).unwrap(),
            &Material::Surface(SurfaceMaterial::default())
        );
    }

    #[test]
    fn test_pcd_points_node_gets_material() {
        let mut graph = SceneGraph::new("cloud");
        let points = graph.add_node(
            None,
            Node::new(NodeKind::Points(MeshData::new(
                Geometry::from_positions(vec![[0.0; 3]]),
                None,
            ))),
        );
        let object =
            AssetNormalizer::new(0.2).normalize(Payload::Scene(graph), AssetKind::Pcd, "c.pcd", 1);
        let id = object.graph.node(points).unwrap().kind.mesh_data().unwrap().material.unwrap();
        assert!(matches!(
            object.graph.material(id),
            Some(Material::Points(PointMaterial { vertex_colors: false, .. }))
        ));
    }
}
