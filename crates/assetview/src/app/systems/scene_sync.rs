//! Mirror the session's scene graph into Bevy entities.
//!
//! The graph is rebuilt as an entity hierarchy whenever a new object is
//! installed. Afterwards only what can change is synced: animated node
//! transforms, the wireframe flag and point-cloud splat size.

use bevy::asset::RenderAssetUsages;
use bevy::camera::visibility::NoFrustumCulling;
use bevy::image::{CompressedImageFormats, ImageSampler, ImageType};
use bevy::mesh::skinning::{SkinnedMesh, SkinnedMeshInverseBindposes};
use bevy::mesh::{Indices, PrimitiveTopology, VertexAttributeValues};
use bevy::pbr::wireframe::Wireframe;
use bevy::prelude::*;
use bevy::render::render_resource::Face;
use std::collections::HashMap;

use crate::app::systems::animation::advance_animation;
use crate::app::systems::loading::{process_completed_loads, SceneReplaced};
use crate::lib::scene::{
    Geometry, Material as SceneMaterial, MaterialId, NodeId, NodeKind, SceneGraph,
    SurfaceMaterial, TextureId,
};
use crate::lib::session::ViewerSession;

pub struct SceneSyncPlugin;

impl Plugin for SceneSyncPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SceneEntities>().add_systems(
            Update,
            (
                rebuild_scene.after(process_completed_loads),
                sync_display_settings,
                sync_node_transforms.after(advance_animation),
            )
                .chain(),
        );
    }
}

/// Entities spawned for the current object, keyed by graph node.
#[derive(Resource, Debug, Default)]
pub struct SceneEntities {
    root: Option<Entity>,
    nodes: HashMap<NodeId, Entity>,
}

impl SceneEntities {
    pub fn root(&self) -> Option<Entity> {
        self.root
    }

    pub fn entity(&self, id: NodeId) -> Option<Entity> {
        self.nodes.get(&id).copied()
    }
}

/// Entity built from a scene graph node.
#[derive(Component, Debug, Clone, Copy)]
pub struct SceneNode(pub NodeId);

/// Triangle mesh entity and the wireframe state it was last given.
#[derive(Component, Debug, Clone, Copy)]
pub struct SurfaceMesh {
    wireframe: bool,
}

/// Point-cloud entity and the splat size its mesh was built with.
#[derive(Component, Debug, Clone, Copy)]
pub struct PointCloud {
    size: f32,
}

/// Unit octahedron used as the splat for each point.
const SPLAT_CORNERS: [Vec3; 6] = [
    Vec3::X,
    Vec3::NEG_X,
    Vec3::Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
];
const SPLAT_FACES: [[u32; 3]; 8] = [
    [0, 2, 4],
    [2, 1, 4],
    [1, 3, 4],
    [3, 0, 4],
    [2, 0, 5],
    [1, 2, 5],
    [3, 1, 5],
    [0, 3, 5],
];

/// Decoded images, one per texture and color space.
struct TextureCache<'a> {
    graph: &'a SceneGraph,
    handles: HashMap<(TextureId, bool), Option<Handle<Image>>>,
}

impl<'a> TextureCache<'a> {
    fn new(graph: &'a SceneGraph) -> Self {
        Self {
            graph,
            handles: HashMap::new(),
        }
    }

    fn get(
        &mut self,
        id: Option<TextureId>,
        srgb: bool,
        images: &mut Assets<Image>,
    ) -> Option<Handle<Image>> {
        let id = id?;
        let graph = self.graph;
        self.handles
            .entry((id, srgb))
            .or_insert_with(|| {
                let texture = graph.texture(id)?;
                match Image::from_buffer(
                    &texture.bytes,
                    ImageType::MimeType(&texture.mime_type),
                    CompressedImageFormats::NONE,
                    srgb,
                    ImageSampler::Default,
                    RenderAssetUsages::default(),
                ) {
                    Ok(image) => Some(images.add(image)),
                    Err(err) => {
                        warn!("Texture {} ({}) not displayed: {}", id.0, texture.mime_type, err);
                        None
                    }
                }
            })
            .clone()
    }
}

fn linear(color: [f32; 4]) -> Color {
    Color::linear_rgba(color[0], color[1], color[2], color[3])
}

fn surface_material(
    surface: &SurfaceMaterial,
    tangents: bool,
    textures: &mut TextureCache,
    images: &mut Assets<Image>,
) -> StandardMaterial {
    let normal_map = if tangents {
        textures.get(surface.normal_map, false, images)
    } else {
        None
    };
    StandardMaterial {
        base_color: linear(surface.base_color),
        base_color_texture: textures.get(surface.albedo_map, true, images),
        metallic: surface.metallic,
        perceptual_roughness: surface.roughness,
        metallic_roughness_texture: textures.get(
            surface.roughness_map.or(surface.metalness_map),
            false,
            images,
        ),
        normal_map_texture: normal_map,
        emissive: LinearRgba::rgb(surface.emissive[0], surface.emissive[1], surface.emissive[2]),
        emissive_texture: textures.get(surface.emissive_map, true, images),
        double_sided: surface.double_sided,
        cull_mode: if surface.double_sided {
            None
        } else {
            Some(Face::Back)
        },
        alpha_mode: if surface.alpha_blend {
            AlphaMode::Blend
        } else {
            AlphaMode::Opaque
        },
        ..default()
    }
}

/// Bevy materials for one object. Surfaces that use a normal map get a
/// second variant for meshes that cannot carry tangents.
struct MaterialCache<'a> {
    textures: TextureCache<'a>,
    handles: HashMap<(Option<MaterialId>, bool), Handle<StandardMaterial>>,
}

impl<'a> MaterialCache<'a> {
    fn new(graph: &'a SceneGraph) -> Self {
        Self {
            textures: TextureCache::new(graph),
            handles: HashMap::new(),
        }
    }

    fn get(
        &mut self,
        id: Option<MaterialId>,
        tangents: bool,
        materials: &mut Assets<StandardMaterial>,
        images: &mut Assets<Image>,
    ) -> Handle<StandardMaterial> {
        if let Some(handle) = self.handles.get(&(id, tangents)) {
            return handle.clone();
        }
        let graph = self.textures.graph;
        let material = match id.and_then(|id| graph.material(id)) {
            Some(SceneMaterial::Surface(surface)) => {
                surface_material(surface, tangents, &mut self.textures, images)
            }
            Some(SceneMaterial::Points(points)) => StandardMaterial {
                base_color: linear(points.color),
                unlit: true,
                ..default()
            },
            None => surface_material(&SurfaceMaterial::default(), false, &mut self.textures, images),
        };
        let handle = materials.add(material);
        self.handles.insert((id, tangents), handle.clone());
        handle
    }
}

fn uses_vertex_colors(graph: &SceneGraph, id: Option<MaterialId>) -> bool {
    match id.and_then(|id| graph.material(id)) {
        Some(SceneMaterial::Surface(surface)) => surface.vertex_colors,
        Some(SceneMaterial::Points(points)) => points.vertex_colors,
        None => false,
    }
}

fn has_normal_map(graph: &SceneGraph, id: Option<MaterialId>) -> bool {
    matches!(
        id.and_then(|id| graph.material(id)),
        Some(SceneMaterial::Surface(SurfaceMaterial {
            normal_map: Some(_),
            ..
        }))
    )
}

fn wireframe_of(graph: &SceneGraph, id: Option<MaterialId>) -> bool {
    matches!(
        id.and_then(|id| graph.material(id)),
        Some(SceneMaterial::Surface(SurfaceMaterial {
            wireframe: true,
            ..
        }))
    )
}

fn point_size_of(graph: &SceneGraph, id: Option<MaterialId>) -> Option<f32> {
    match id.and_then(|id| graph.material(id)) {
        Some(SceneMaterial::Points(points)) => Some(points.size),
        _ => None,
    }
}

/// Triangle mesh for a surface node. Attributes whose length does not match
/// the positions are left out.
pub fn surface_mesh(geometry: &Geometry, vertex_colors: bool, skinned: bool) -> Mesh {
    let mut geometry = geometry.truncated();
    if geometry.normals.is_none() {
        geometry.compute_vertex_normals();
    }
    let count = geometry.positions.len();
    let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
    if let Some(normals) = geometry.normals.take().filter(|n| n.len() == count) {
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    }
    if let Some(uvs) = geometry.uvs.take().filter(|u| u.len() == count) {
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
    }
    if vertex_colors {
        if let Some(colors) = geometry.colors.take().filter(|c| c.len() == count) {
            mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, colors);
        }
    }
    if skinned {
        if let (Some(joints), Some(weights)) = (geometry.joints.take(), geometry.weights.take()) {
            if joints.len() == count && weights.len() == count {
                mesh.insert_attribute(
                    Mesh::ATTRIBUTE_JOINT_INDEX,
                    VertexAttributeValues::Uint16x4(joints),
                );
                mesh.insert_attribute(Mesh::ATTRIBUTE_JOINT_WEIGHT, weights);
            }
        }
    }
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, geometry.positions);
    if let Some(indices) = geometry.indices {
        mesh.insert_indices(Indices::U32(indices));
    }
    mesh
}

/// Each point becomes a small octahedron `size` across, so splats have a
/// world-space size and shrink with distance.
pub fn point_cloud_mesh(geometry: &Geometry, size: f32, vertex_colors: bool) -> Mesh {
    let geometry = geometry.truncated();
    let radius = size * 0.5;
    let count = geometry.positions.len();
    let colors = geometry
        .colors
        .as_ref()
        .filter(|c| vertex_colors && c.len() == count);

    let mut positions = Vec::with_capacity(count * SPLAT_CORNERS.len());
    let mut normals = Vec::with_capacity(count * SPLAT_CORNERS.len());
    let mut splat_colors = Vec::with_capacity(colors.map_or(0, |_| count * SPLAT_CORNERS.len()));
    let mut indices = Vec::with_capacity(count * SPLAT_FACES.len() * 3);

    for (i, position) in geometry.positions.iter().enumerate() {
        let center = Vec3::from_array(*position);
        let base = positions.len() as u32;
        for corner in SPLAT_CORNERS {
            positions.push((center + corner * radius).to_array());
            normals.push(corner.to_array());
        }
        if let Some(colors) = colors {
            splat_colors.extend(std::iter::repeat_n(colors[i], SPLAT_CORNERS.len()));
        }
        for face in SPLAT_FACES {
            indices.extend(face.iter().map(|corner| base + corner));
        }
    }

    let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
    mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    if !splat_colors.is_empty() {
        mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, splat_colors);
    }
    mesh.insert_indices(Indices::U32(indices));
    mesh
}

/// Despawn the previous object and spawn the newly installed one.
#[allow(clippy::too_many_arguments)]
pub fn rebuild_scene(
    mut commands: Commands,
    mut replaced: MessageReader<SceneReplaced>,
    session: Res<ViewerSession>,
    mut entities: ResMut<SceneEntities>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut images: ResMut<Assets<Image>>,
    mut bindposes: ResMut<Assets<SkinnedMeshInverseBindposes>>,
) {
    if replaced.read().count() == 0 {
        return;
    }
    if let Some(root) = entities.root.take() {
        commands.entity(root).despawn();
    }
    entities.nodes.clear();

    let Some(object) = session.object() else {
        return;
    };
    let graph = &object.graph;
    let order = graph.depth_first();

    // Every node first, so skins can reference joints anywhere in the tree.
    for &id in &order {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let parent = node.parent.and_then(|p| entities.entity(p));
        let name = node
            .name
            .clone()
            .unwrap_or_else(|| format!("node {}", id.0));
        let mut entity = commands.spawn((
            SceneNode(id),
            node.transform,
            Visibility::default(),
            Name::new(name),
        ));
        if let Some(parent) = parent {
            entity.insert(ChildOf(parent));
        }
        if !node.frustum_culled {
            entity.insert(NoFrustumCulling);
        }
        let entity = entity.id();
        entities.nodes.insert(id, entity);
    }
    entities.root = entities.entity(graph.root());

    let mut cache = MaterialCache::new(graph);
    let mut drawables = 0;
    for &id in &order {
        let (Some(node), Some(entity)) = (graph.node(id), entities.entity(id)) else {
            continue;
        };
        let Some(data) = node.kind.mesh_data() else {
            continue;
        };
        let vertex_colors = uses_vertex_colors(graph, data.material);
        drawables += 1;

        if let NodeKind::Points(_) = node.kind {
            let size = point_size_of(graph, data.material).unwrap_or(0.0);
            let material = cache.get(data.material, false, &mut materials, &mut images);
            commands.entity(entity).insert((
                Mesh3d(meshes.add(point_cloud_mesh(&data.geometry, size, vertex_colors))),
                MeshMaterial3d(material),
                PointCloud { size },
            ));
            continue;
        }

        let skin = match &node.kind {
            NodeKind::SkinnedMesh(_, skin) => {
                let joints: Option<Vec<Entity>> =
                    skin.joints.iter().map(|joint| entities.entity(*joint)).collect();
                match joints {
                    Some(joints)
                        if !joints.is_empty()
                            && data.geometry.joints.is_some()
                            && data.geometry.weights.is_some() =>
                    {
                        let mut matrices = skin.inverse_bind_matrices.clone();
                        matrices.resize(joints.len(), Mat4::IDENTITY);
                        Some(SkinnedMesh {
                            inverse_bindposes: bindposes
                                .add(SkinnedMeshInverseBindposes::from(matrices)),
                            joints,
                        })
                    }
                    _ => {
                        warn!("Skin on node {} is incomplete, drawing it unskinned", id.0);
                        None
                    }
                }
            }
            _ => None,
        };

        let mut mesh = surface_mesh(&data.geometry, vertex_colors, skin.is_some());
        let tangents = has_normal_map(graph, data.material) && mesh.generate_tangents().is_ok();
        let material = cache.get(data.material, tangents, &mut materials, &mut images);
        let wireframe = wireframe_of(graph, data.material);

        let mut entity = commands.entity(entity);
        entity.insert((
            Mesh3d(meshes.add(mesh)),
            MeshMaterial3d(material),
            SurfaceMesh { wireframe },
        ));
        if wireframe {
            entity.insert(Wireframe);
        }
        if let Some(skin) = skin {
            entity.insert(skin);
        }
    }
    info!(
        "Spawned {} ({} nodes, {} drawables)",
        object.name,
        entities.nodes.len(),
        drawables
    );
}

/// Follow the applied wireframe flag and point size.
pub fn sync_display_settings(
    mut commands: Commands,
    session: Res<ViewerSession>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut surfaces: Query<(Entity, &SceneNode, &mut SurfaceMesh)>,
    mut clouds: Query<(Entity, &SceneNode, &mut PointCloud)>,
) {
    let Some(object) = session.object() else {
        return;
    };
    let graph = &object.graph;

    for (entity, node, mut surface) in &mut surfaces {
        let Some(data) = graph.node(node.0).and_then(|n| n.kind.mesh_data()) else {
            continue;
        };
        let wireframe = wireframe_of(graph, data.material);
        if surface.wireframe == wireframe {
            continue;
        }
        surface.wireframe = wireframe;
        if wireframe {
            commands.entity(entity).insert(Wireframe);
        } else {
            commands.entity(entity).remove::<Wireframe>();
        }
    }

    for (entity, node, mut cloud) in &mut clouds {
        let Some(data) = graph.node(node.0).and_then(|n| n.kind.mesh_data()) else {
            continue;
        };
        let Some(size) = point_size_of(graph, data.material) else {
            continue;
        };
        if (cloud.size - size).abs() <= f32::EPSILON {
            continue;
        }
        cloud.size = size;
        let mesh = point_cloud_mesh(&data.geometry, size, uses_vertex_colors(graph, data.material));
        commands.entity(entity).insert(Mesh3d(meshes.add(mesh)));
        debug!("Rebuilt point cloud {} at size {:.3}", node.0 .0, size);
    }
}

/// Copy animated node transforms from the graph to their entities.
pub fn sync_node_transforms(
    session: Res<ViewerSession>,
    entities: Res<SceneEntities>,
    mut transforms: Query<&mut Transform, With<SceneNode>>,
) {
    let Some(object) = session.object() else {
        return;
    };
    for id in session.animation().animated_nodes() {
        let (Some(node), Some(entity)) = (object.graph.node(id), entities.entity(id)) else {
            continue;
        };
        if let Ok(mut transform) = transforms.get_mut(entity) {
            if *transform != node.transform {
                *transform = node.transform;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_cloud_expands_each_point() {
        let mut geometry = Geometry::from_positions(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        geometry.colors = Some(vec![[1.0, 0.0, 0.0, 1.0]; 2]);
        let mesh = point_cloud_mesh(&geometry, 0.2, true);
        assert_eq!(mesh.count_vertices(), 12);
        assert_eq!(mesh.indices().map(|i| i.len()), Some(48));
        let Some(VertexAttributeValues::Float32x3(positions)) =
            mesh.attribute(Mesh::ATTRIBUTE_POSITION)
        else {
            panic!("positions missing");
        };
        assert_eq!(positions[0], [0.1, 0.0, 0.0]);
        assert!(mesh.attribute(Mesh::ATTRIBUTE_COLOR).is_some());
    }

    #[test]
    fn test_surface_mesh_generates_normals_and_skips_colors() {
        let mut geometry =
            Geometry::from_positions(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        geometry.colors = Some(vec![[1.0; 4]; 3]);
        geometry.indices = Some(vec![0, 1, 2]);
        let mesh = surface_mesh(&geometry, false, false);
        assert!(mesh.attribute(Mesh::ATTRIBUTE_NORMAL).is_some());
        assert!(mesh.attribute(Mesh::ATTRIBUTE_COLOR).is_none());
        assert_eq!(mesh.indices().map(|i| i.len()), Some(3));
    }
}
