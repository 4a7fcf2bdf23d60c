//! In-memory scene graph shared by every stage of the pipeline.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Every node carries
//! an explicit [`NodeKind`] tag set when it is created, so traversals switch on
//! the tag instead of probing for capabilities. Materials and textures are
//! stored once per graph and referenced by id; two nodes holding the same
//! [`MaterialId`] share one material instance.

use bevy::math::{Mat4, Vec3};
use bevy::prelude::Transform;

use crate::lib::format::AssetKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&mut self, other: &Aabb) {
        self.extend(other.min);
        self.extend(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Largest of the three extents.
    pub fn max_extent(&self) -> f32 {
        self.size().max_element()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

/// Sub-range of a geometry that is actually drawn.
///
/// Counts index elements for indexed geometry and vertices otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRange {
    pub start: usize,
    pub count: usize,
}

/// Vertex attributes plus an optional triangle index buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub colors: Option<Vec<[f32; 4]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub joints: Option<Vec<[u16; 4]>>,
    pub weights: Option<Vec<[f32; 4]>>,
    /// `Some(empty)` means an index buffer exists but holds no triangles.
    pub indices: Option<Vec<u32>>,
    pub draw_range: Option<DrawRange>,
}

impl Geometry {
    pub fn from_positions(positions: Vec<[f32; 3]>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// True when the geometry carries at least one index.
    pub fn has_triangle_indices(&self) -> bool {
        self.indices.as_ref().is_some_and(|i| !i.is_empty())
    }

    /// Local-space bounds, `None` for an empty geometry.
    pub fn bounding_box(&self) -> Option<Aabb> {
        let mut iter = self.positions.iter().map(|p| Vec3::from_array(*p));
        let mut aabb = Aabb::from_point(iter.next()?);
        for p in iter {
            aabb.extend(p);
        }
        Some(aabb)
    }

    /// Triangle corner indices, generating the implicit sequence for
    /// non-indexed geometry.
    fn triangle_corners(&self) -> Vec<u32> {
        match &self.indices {
            Some(indices) => indices.clone(),
            None => (0..self.positions.len() as u32).collect(),
        }
    }

    /// Area-weighted smooth vertex normals.
    pub fn compute_vertex_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        let corners = self.triangle_corners();
        for tri in corners.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a >= normals.len() || b >= normals.len() || c >= normals.len() {
                continue;
            }
            let pa = Vec3::from_array(self.positions[a]);
            let pb = Vec3::from_array(self.positions[b]);
            let pc = Vec3::from_array(self.positions[c]);
            let face = (pb - pa).cross(pc - pa);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }
        self.normals = Some(
            normals
                .into_iter()
                .map(|n| n.normalize_or(Vec3::Y).to_array())
                .collect(),
        );
    }

    /// Copy with unused trailing data removed.
    ///
    /// Indexed geometry keeps only the indices inside the draw range and drops
    /// vertices past the highest referenced one. Non-indexed geometry keeps the
    /// vertex prefix covered by the draw range.
    pub fn truncated(&self) -> Geometry {
        let mut out = self.clone();
        out.draw_range = None;
        // An empty index list draws nothing through indices; keep the vertices.
        match (self.indices.as_ref().filter(|i| !i.is_empty()), self.draw_range) {
            (Some(indices), range) => {
                let kept: Vec<u32> = match range {
                    Some(r) => indices
                        .iter()
                        .skip(r.start)
                        .take(r.count)
                        .copied()
                        .collect(),
                    None => indices.clone(),
                };
                let used = kept.iter().max().map_or(0, |m| *m as usize + 1);
                out.truncate_vertices(used.min(self.positions.len()));
                out.indices = Some(kept);
            }
            (None, Some(r)) => {
                let end = (r.start + r.count).min(self.positions.len());
                let start = r.start.min(end);
                out.slice_vertices(start, end);
            }
            (None, None) => {}
        }
        out
    }

    fn truncate_vertices(&mut self, len: usize) {
        self.positions.truncate(len);
        if let Some(v) = self.normals.as_mut() {
            v.truncate(len);
        }
        if let Some(v) = self.colors.as_mut() {
            v.truncate(len);
        }
        if let Some(v) = self.uvs.as_mut() {
            v.truncate(len);
        }
        if let Some(v) = self.joints.as_mut() {
            v.truncate(len);
        }
        if let Some(v) = self.weights.as_mut() {
            v.truncate(len);
        }
    }

    fn slice_vertices(&mut self, start: usize, end: usize) {
        fn slice<T: Clone>(v: &mut Vec<T>, start: usize, end: usize) {
            let end = end.min(v.len());
            let start = start.min(end);
            *v = v[start..end].to_vec();
        }
        slice(&mut self.positions, start, end);
        if let Some(v) = self.normals.as_mut() {
            slice(v, start, end);
        }
        if let Some(v) = self.colors.as_mut() {
            slice(v, start, end);
        }
        if let Some(v) = self.uvs.as_mut() {
            slice(v, start, end);
        }
        if let Some(v) = self.joints.as_mut() {
            slice(v, start, end);
        }
        if let Some(v) = self.weights.as_mut() {
            slice(v, start, end);
        }
    }
}

/// Bone binding for a skinned mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skin {
    pub joints: Vec<NodeId>,
    pub inverse_bind_matrices: Vec<Mat4>,
}

/// Geometry with its (optional) material.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub geometry: Geometry,
    pub material: Option<MaterialId>,
}

impl MeshData {
    pub fn new(geometry: Geometry, material: Option<MaterialId>) -> Self {
        Self { geometry, material }
    }
}

/// What a node is. Set once when the node is built.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh(MeshData),
    SkinnedMesh(MeshData, Skin),
    Points(MeshData),
    Bone,
}

impl NodeKind {
    /// Mesh-like and point-like nodes carry drawable data.
    pub fn mesh_data(&self) -> Option<&MeshData> {
        match self {
            NodeKind::Mesh(data) | NodeKind::SkinnedMesh(data, _) | NodeKind::Points(data) => {
                Some(data)
            }
            NodeKind::Group | NodeKind::Bone => None,
        }
    }

    pub fn mesh_data_mut(&mut self) -> Option<&mut MeshData> {
        match self {
            NodeKind::Mesh(data) | NodeKind::SkinnedMesh(data, _) | NodeKind::Points(data) => {
                Some(data)
            }
            NodeKind::Group | NodeKind::Bone => None,
        }
    }

    /// Meshes drawn as triangles, as opposed to points.
    pub fn is_triangulated(&self) -> bool {
        matches!(self, NodeKind::Mesh(_) | NodeKind::SkinnedMesh(..))
    }

    pub fn is_points(&self) -> bool {
        matches!(self, NodeKind::Points(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: Option<String>,
    pub kind: NodeKind,
    pub transform: Transform,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub frustum_culled: bool,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            name: None,
            kind,
            transform: Transform::IDENTITY,
            parent: None,
            children: Vec::new(),
            frustum_culled: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// Physically based surface material.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMaterial {
    pub name: Option<String>,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: [f32; 3],
    pub albedo_map: Option<TextureId>,
    pub normal_map: Option<TextureId>,
    pub roughness_map: Option<TextureId>,
    pub metalness_map: Option<TextureId>,
    pub emissive_map: Option<TextureId>,
    pub double_sided: bool,
    pub alpha_blend: bool,
    pub vertex_colors: bool,
    pub wireframe: bool,
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            name: None,
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 1.0,
            roughness: 1.0,
            emissive: [0.0; 3],
            albedo_map: None,
            normal_map: None,
            roughness_map: None,
            metalness_map: None,
            emissive_map: None,
            double_sided: false,
            alpha_blend: false,
            vertex_colors: false,
            wireframe: false,
        }
    }
}

/// Sprite material for point clouds.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMaterial {
    pub color: [f32; 4],
    pub size: f32,
    pub size_attenuation: bool,
    pub vertex_colors: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    Surface(SurfaceMaterial),
    Points(PointMaterial),
}

impl Material {
    /// Texture references in slot order: albedo, normal, roughness,
    /// metalness, emissive.
    pub fn texture_slots(&self) -> [Option<TextureId>; 5] {
        match self {
            Material::Surface(m) => [
                m.albedo_map,
                m.normal_map,
                m.roughness_map,
                m.metalness_map,
                m.emissive_map,
            ],
            Material::Points(_) => [None; 5],
        }
    }
}

/// Encoded image kept as the source file's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub name: Option<String>,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Arena of nodes, materials and textures under a single root.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    root: NodeId,
    materials: Vec<Material>,
    textures: Vec<Texture>,
}

impl SceneGraph {
    /// Create a graph holding only an empty root group.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Group).named(root_name)],
            root: NodeId(0),
            materials: Vec::new(),
            textures: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Insert `node` under `parent` (the root when `None`).
    pub fn add_node(&mut self, parent: Option<NodeId>, mut node: Node) -> NodeId {
        let parent = parent.unwrap_or(self.root);
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        TextureId(self.textures.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0)
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut [Material] {
        &mut self.materials
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    /// Pre-order depth-first walk from the root.
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.nodes.get(id.0) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    /// World matrix of every node, indexed by node id.
    ///
    /// Nodes not reachable from the root keep their local matrix.
    pub fn world_matrices(&self) -> Vec<Mat4> {
        let mut world: Vec<Mat4> = self.nodes.iter().map(|n| n.transform.to_matrix()).collect();
        for id in self.depth_first() {
            if let Some(parent) = self.nodes[id.0].parent {
                world[id.0] = world[parent.0] * self.nodes[id.0].transform.to_matrix();
            }
        }
        world
    }

    /// World-space bounds over every drawable node.
    pub fn bounding_box(&self) -> Option<Aabb> {
        let world = self.world_matrices();
        let mut bounds: Option<Aabb> = None;
        for id in self.depth_first() {
            let Some(data) = self.nodes[id.0].kind.mesh_data() else {
                continue;
            };
            let matrix = world[id.0];
            for p in &data.geometry.positions {
                let wp = matrix.transform_point3(Vec3::from_array(*p));
                match bounds.as_mut() {
                    Some(b) => b.extend(wp),
                    None => bounds = Some(Aabb::from_point(wp)),
                }
            }
        }
        bounds
    }

    /// Shift the whole graph by moving the root.
    pub fn translate(&mut self, offset: Vec3) {
        let root = self.root.0;
        self.nodes[root].transform.translation += offset;
    }

    pub fn has_bones(&self) -> bool {
        self.nodes.iter().any(|n| matches!(n.kind, NodeKind::Bone))
    }

    /// Parent/child pairs where both ends are bones.
    pub fn bone_links(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Bone))
            .filter_map(|(id, n)| {
                let parent = n.parent?;
                matches!(self.nodes[parent.0].kind, NodeKind::Bone).then_some((parent, id))
            })
            .collect()
    }
}

/// The normalized, renderable result of a load.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub kind: AssetKind,
    pub byte_size: u64,
    pub graph: SceneGraph,
}

impl SceneObject {
    pub fn bounding_box(&self) -> Option<Aabb> {
        self.graph.bounding_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Quat;

    fn triangle() -> Geometry {
        Geometry::from_positions(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    #[test]
    fn test_depth_first_order() {
        let mut graph = SceneGraph::new("root");
        let a = graph.add_node(None, Node::new(NodeKind::Group).named("a"));
        let _a1 = graph.add_node(Some(a), Node::new(NodeKind::Group).named("a1"));
        let b = graph.add_node(None, Node::new(NodeKind::Group).named("b"));

        let names: Vec<_> = graph
            .depth_first()
            .into_iter()
            .map(|id| graph.node(id).unwrap().name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
        assert_eq!(graph.node(b).unwrap().parent, Some(graph.root()));
    }

    #[test]
    fn test_world_bounds_follow_parent_transform() {
        let mut graph = SceneGraph::new("root");
        let group = graph.add_node(
            None,
            Node::new(NodeKind::Group).with_transform(Transform::from_xyz(10.0, 0.0, 0.0)),
        );
        graph.add_node(
            Some(group),
            Node::new(NodeKind::Mesh(MeshData::new(triangle(), None)))
                .with_transform(Transform::from_scale(Vec3::splat(2.0))),
        );

        let bounds = graph.bounding_box().unwrap();
        assert!((bounds.min - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);
        assert!((bounds.max - Vec3::new(12.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_translate_recenters() {
        let mut graph = SceneGraph::new("root");
        graph.node_mut(graph.root()).unwrap().transform.rotation =
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        graph.add_node(None, Node::new(NodeKind::Mesh(MeshData::new(triangle(), None))));

        let center = graph.bounding_box().unwrap().center();
        graph.translate(-center);
        let recentered = graph.bounding_box().unwrap().center();
        assert!(recentered.length() < 1e-5);
    }

    #[test]
    fn test_compute_vertex_normals() {
        let mut geometry = triangle();
        geometry.compute_vertex_normals();
        for n in geometry.normals.unwrap() {
            assert!((n[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_truncate_indexed_drops_trailing_vertices() {
        let mut geometry = Geometry::from_positions(vec![[0.0; 3]; 6]);
        geometry.indices = Some(vec![0, 1, 2, 3, 4, 5]);
        geometry.draw_range = Some(DrawRange { start: 0, count: 3 });

        let truncated = geometry.truncated();
        assert_eq!(truncated.indices.as_deref(), Some(&[0, 1, 2][..]));
        assert_eq!(truncated.positions.len(), 3);
        assert_eq!(truncated.draw_range, None);
    }

    #[test]
    fn test_truncate_non_indexed_range() {
        let mut geometry = Geometry::from_positions((0..9).map(|i| [i as f32, 0.0, 0.0]).collect());
        geometry.draw_range = Some(DrawRange { start: 3, count: 3 });
        let truncated = geometry.truncated();
        assert_eq!(truncated.positions.len(), 3);
        assert_eq!(truncated.positions[0][0], 3.0);
    }

    #[test]
    fn test_truncate_keeps_points_with_empty_index_list() {
        let mut geometry = Geometry::from_positions(vec![[1.0, 0.0, 0.0]; 4]);
        geometry.indices = Some(vec![]);
        assert_eq!(geometry.truncated().positions.len(), 4);
    }

    #[test]
    fn test_bone_links() {
        let mut graph = SceneGraph::new("root");
        let hip = graph.add_node(None, Node::new(NodeKind::Bone));
        let knee = graph.add_node(Some(hip), Node::new(NodeKind::Bone));
        graph.add_node(Some(knee), Node::new(NodeKind::Group));
        assert!(graph.has_bones());
        assert_eq!(graph.bone_links(), vec![(hip, knee)]);
    }
}
