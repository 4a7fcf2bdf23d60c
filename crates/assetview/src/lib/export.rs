//! Re-encode the live scene as a single binary glTF container.
//!
//! The exporter works on a deep copy of the [`SceneObject`], so the displayed
//! scene is never touched. The copy is recentered on its bounding box, every
//! drawable node is written with its draw range applied, and the clip list is
//! attached as glTF animations.
//!
//! Geometry compression writes vertex attributes and triangle lists as
//! `EXT_meshopt_compression` streams. Texture compression asks the registered
//! [`TextureEncoder`](crate::lib::codecs::TextureEncoder) for a KTX2 payload
//! per image and references it through `KHR_texture_basisu`, keeping the
//! original image as the fallback source.

use bevy::prelude::*;
use byteorder::{ByteOrder, LittleEndian};
use gltf::json;
use gltf::json::validation::{Checked, USize64};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::lib::animation::{AnimationClip, Interpolation, TrackProperty};
use crate::lib::codecs::{
    encode_triangles, encode_vertices, CodecError, Codecs, MeshoptMode, BASISU_EXTENSION,
    MESHOPT_EXTENSION,
};
use crate::lib::error::AssetError;
use crate::lib::scene::{
    Geometry, Material, MaterialId, NodeId, NodeKind, SceneGraph, SceneObject, Skin, TextureId,
};

pub const GENERATOR: &str = "assetview";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("geometry compression failed: {0}")]
    Codec(#[from] CodecError),

    #[error("KTX2 texture compression requested but no texture encoder is registered")]
    NoTextureEncoder,

    #[error("texture {index} could not be encoded as KTX2: {message}")]
    TextureEncode { index: usize, message: String },

    #[error("could not serialize glTF document: {0}")]
    Json(#[from] json::Error),

    #[error("could not write GLB container: {0}")]
    Container(#[from] gltf::Error),
}

impl From<ExportError> for AssetError {
    fn from(err: ExportError) -> Self {
        AssetError::Encode(err.to_string())
    }
}

/// Output container. Only binary glTF is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Glb,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Glb => "glb",
        }
    }
}

/// What to export and how.
///
/// `draco` and `ktx2` are independent; a front end may choose to make them
/// exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Resource)]
pub struct ExportConfig {
    pub format: ExportFormat,
    /// Compress vertex attributes and triangle lists.
    pub draco: bool,
    /// Compress textures to KTX2.
    pub ktx2: bool,
    /// Name of the loaded asset the output name is derived from.
    pub source_name: String,
}

impl ExportConfig {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    pub fn file_name(&self) -> String {
        export_file_name(&self.source_name, self.draco, self.ktx2)
    }
}

/// `robot.gltf` becomes `robot_draco.glb`, `robot_ktx2.glb`,
/// `robot_draco_ktx2.glb` or `robot_optimized.glb`.
pub fn export_file_name(source_name: &str, draco: bool, ktx2: bool) -> String {
    let stem = match source_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => source_name,
    };
    let suffix = match (draco, ktx2) {
        (true, true) => "_draco_ktx2",
        (true, false) => "_draco",
        (false, true) => "_ktx2",
        (false, false) => "_optimized",
    };
    format!("{stem}{suffix}.{}", ExportFormat::Glb.extension())
}

/// A finished export, ready to be handed to whatever saves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedAsset {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct AssetExporter;

impl AssetExporter {
    pub fn export(
        object: &SceneObject,
        clips: &[AnimationClip],
        config: &ExportConfig,
        codecs: &Codecs,
    ) -> Result<ExportedAsset, ExportError> {
        let file_name = config.file_name();
        info!(
            "Exporting {} as {} (draco: {}, ktx2: {})",
            object.name, file_name, config.draco, config.ktx2
        );

        let mut graph = object.graph.clone();
        if let Some(bounds) = graph.bounding_box() {
            graph.translate(-bounds.center());
        }

        if config.ktx2 && !graph.textures().is_empty() && codecs.texture_encoder().is_none() {
            return Err(ExportError::NoTextureEncoder);
        }

        let mut writer = GlbWriter::new(&graph, codecs, config);
        writer.write_scene()?;
        writer.write_animations(clips);
        let bytes = writer.finish()?;

        info!("Exported {} ({} bytes)", file_name, bytes.len());
        Ok(ExportedAsset { file_name, bytes })
    }
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    let mut out = vec![0; values.len() * 4];
    LittleEndian::write_f32_into(values, &mut out);
    out
}

fn u16_bytes(values: &[u16]) -> Vec<u8> {
    let mut out = vec![0; values.len() * 2];
    LittleEndian::write_u16_into(values, &mut out);
    out
}

fn u32_bytes(values: &[u32]) -> Vec<u8> {
    let mut out = vec![0; values.len() * 4];
    LittleEndian::write_u32_into(values, &mut out);
    out
}

fn pad_to_four(bytes: &mut Vec<u8>) {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
}

fn bounds_of(positions: &[[f32; 3]]) -> (json::Value, json::Value) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in positions {
        for i in 0..3 {
            min[i] = min[i].min(p[i]);
            max[i] = max[i].max(p[i]);
        }
    }
    (json::Value::from(min.to_vec()), json::Value::from(max.to_vec()))
}

/// One vertex attribute or index list on its way into the buffer.
struct Stream {
    raw: Vec<u8>,
    count: usize,
    stride: usize,
    mode: MeshoptMode,
    target: json::buffer::Target,
}

struct GlbWriter<'a> {
    graph: &'a SceneGraph,
    codecs: &'a Codecs,
    meshopt: bool,
    ktx2: bool,
    root: json::Root,
    bin: Vec<u8>,
    /// Size of the uncompressed stand-in buffer for meshopt streams.
    fallback_len: usize,
    node_map: HashMap<NodeId, json::Index<json::Node>>,
    materials: HashMap<MaterialId, json::Index<json::Material>>,
    textures: HashMap<TextureId, json::Index<json::Texture>>,
}

impl<'a> GlbWriter<'a> {
    fn new(graph: &'a SceneGraph, codecs: &'a Codecs, config: &ExportConfig) -> Self {
        Self {
            graph,
            codecs,
            meshopt: config.draco,
            ktx2: config.ktx2,
            root: json::Root {
                asset: json::Asset {
                    generator: Some(GENERATOR.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            bin: Vec::new(),
            fallback_len: 0,
            node_map: HashMap::new(),
            materials: HashMap::new(),
            textures: HashMap::new(),
        }
    }

    fn use_extension(&mut self, name: &str, required: bool) {
        if !self.root.extensions_used.iter().any(|e| e == name) {
            self.root.extensions_used.push(name.to_string());
        }
        if required && !self.root.extensions_required.iter().any(|e| e == name) {
            self.root.extensions_required.push(name.to_string());
        }
    }

    /// Append raw bytes to the binary chunk and describe them with a view.
    fn push_view(
        &mut self,
        bytes: &[u8],
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::buffer::View> {
        pad_to_four(&mut self.bin);
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        self.root.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64::from(bytes.len()),
            byte_offset: Some(USize64::from(offset)),
            byte_stride: None,
            name: None,
            target: target.map(Checked::Valid),
            extensions: None,
            extras: Default::default(),
        })
    }

    /// Geometry goes through meshopt when compression is on; the view then
    /// points into the zero-filled fallback buffer and carries the
    /// compressed location in its extension.
    fn push_stream(&mut self, stream: Stream, encoded: Option<Vec<u8>>) -> json::Index<json::buffer::View> {
        let Some(encoded) = encoded else {
            return self.push_view(&stream.raw, Some(stream.target));
        };
        pad_to_four(&mut self.bin);
        let offset = self.bin.len();
        self.bin.extend_from_slice(&encoded);

        let fallback_offset = self.fallback_len;
        self.fallback_len += stream.raw.len();
        self.fallback_len += (4 - self.fallback_len % 4) % 4;

        let mut ext = serde_json::Map::new();
        ext.insert("buffer".into(), json::Value::from(0));
        ext.insert("byteOffset".into(), json::Value::from(offset));
        ext.insert("byteLength".into(), json::Value::from(encoded.len()));
        ext.insert("byteStride".into(), json::Value::from(stream.stride));
        ext.insert("count".into(), json::Value::from(stream.count));
        ext.insert("mode".into(), json::Value::from(stream.mode.as_str()));
        let mut others = serde_json::Map::new();
        others.insert(MESHOPT_EXTENSION.into(), json::Value::Object(ext));

        let byte_stride = (stream.mode == MeshoptMode::Attributes)
            .then_some(json::buffer::Stride(stream.stride));
        self.root.push(json::buffer::View {
            buffer: json::Index::new(1),
            byte_length: USize64::from(stream.raw.len()),
            byte_offset: Some(USize64::from(fallback_offset)),
            byte_stride,
            name: None,
            target: Some(Checked::Valid(stream.target)),
            extensions: Some(json::extensions::buffer::View { others }),
            extras: Default::default(),
        })
    }

    fn push_accessor(
        &mut self,
        view: json::Index<json::buffer::View>,
        count: usize,
        component: json::accessor::ComponentType,
        type_: json::accessor::Type,
        bounds: Option<(json::Value, json::Value)>,
    ) -> json::Index<json::Accessor> {
        let (min, max) = match bounds {
            Some((min, max)) => (Some(min), Some(max)),
            None => (None, None),
        };
        self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64::from(0usize)),
            count: USize64::from(count),
            component_type: Checked::Valid(json::accessor::GenericComponentType(component)),
            extensions: None,
            extras: Default::default(),
            type_: Checked::Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        })
    }

    /// Write a vertex attribute of `components` floats per vertex.
    fn float_attribute<const N: usize>(
        &mut self,
        values: &[[f32; N]],
        type_: json::accessor::Type,
        bounds: Option<(json::Value, json::Value)>,
    ) -> Result<json::Index<json::Accessor>, ExportError> {
        let stream = Stream {
            raw: f32_bytes(values.as_flattened()),
            count: values.len(),
            stride: N * 4,
            mode: MeshoptMode::Attributes,
            target: json::buffer::Target::ArrayBuffer,
        };
        let encoded = if self.meshopt {
            Some(encode_vertices(values)?)
        } else {
            None
        };
        let view = self.push_stream(stream, encoded);
        Ok(self.push_accessor(
            view,
            values.len(),
            json::accessor::ComponentType::F32,
            type_,
            bounds,
        ))
    }

    /// `None` when nothing survives draw-range truncation.
    fn primitive(
        &mut self,
        geometry: &Geometry,
        points: bool,
    ) -> Result<Option<json::mesh::Primitive>, ExportError> {
        use json::accessor::Type;
        use json::mesh::Semantic;

        let geometry = geometry.truncated();
        if geometry.positions.is_empty() {
            return Ok(None);
        }
        let mut attributes = BTreeMap::new();

        let bounds = bounds_of(&geometry.positions);
        let positions = self.float_attribute(&geometry.positions, Type::Vec3, Some(bounds))?;
        attributes.insert(Checked::Valid(Semantic::Positions), positions);

        let count = geometry.vertex_count();
        if let Some(normals) = geometry.normals.as_ref().filter(|n| n.len() == count) {
            let index = self.float_attribute(normals, Type::Vec3, None)?;
            attributes.insert(Checked::Valid(Semantic::Normals), index);
        }
        if let Some(colors) = geometry.colors.as_ref().filter(|c| c.len() == count) {
            let index = self.float_attribute(colors, Type::Vec4, None)?;
            attributes.insert(Checked::Valid(Semantic::Colors(0)), index);
        }
        if let Some(uvs) = geometry.uvs.as_ref().filter(|u| u.len() == count) {
            let index = self.float_attribute(uvs, Type::Vec2, None)?;
            attributes.insert(Checked::Valid(Semantic::TexCoords(0)), index);
        }
        if let (Some(joints), Some(weights)) = (&geometry.joints, &geometry.weights) {
            if joints.len() == count && weights.len() == count {
                let stream = Stream {
                    raw: u16_bytes(joints.as_flattened()),
                    count,
                    stride: 8,
                    mode: MeshoptMode::Attributes,
                    target: json::buffer::Target::ArrayBuffer,
                };
                let encoded = if self.meshopt {
                    Some(encode_vertices(joints)?)
                } else {
                    None
                };
                let view = self.push_stream(stream, encoded);
                let index = self.push_accessor(
                    view,
                    count,
                    json::accessor::ComponentType::U16,
                    Type::Vec4,
                    None,
                );
                attributes.insert(Checked::Valid(Semantic::Joints(0)), index);
                let index = self.float_attribute(weights, Type::Vec4, None)?;
                attributes.insert(Checked::Valid(Semantic::Weights(0)), index);
            }
        }

        let indices = match geometry.indices.as_ref().filter(|i| !i.is_empty()) {
            Some(indices) => {
                let stream = Stream {
                    raw: u32_bytes(indices),
                    count: indices.len(),
                    stride: 4,
                    mode: MeshoptMode::Triangles,
                    target: json::buffer::Target::ElementArrayBuffer,
                };
                // meshopt only encodes whole triangles
                let encoded = if self.meshopt && !points && indices.len() % 3 == 0 {
                    Some(encode_triangles(indices, count)?)
                } else {
                    None
                };
                let view = self.push_stream(stream, encoded);
                Some(self.push_accessor(
                    view,
                    indices.len(),
                    json::accessor::ComponentType::U32,
                    Type::Scalar,
                    None,
                ))
            }
            None => None,
        };

        let mode = if points {
            json::mesh::Mode::Points
        } else {
            json::mesh::Mode::Triangles
        };
        Ok(Some(json::mesh::Primitive {
            attributes,
            extensions: None,
            extras: Default::default(),
            indices,
            material: None,
            mode: Checked::Valid(mode),
            targets: None,
        }))
    }

    fn texture(&mut self, id: TextureId) -> Result<Option<json::Index<json::Texture>>, ExportError> {
        if let Some(index) = self.textures.get(&id) {
            return Ok(Some(*index));
        }
        let graph = self.graph;
        let Some(texture) = graph.texture(id) else {
            return Ok(None);
        };

        let view = self.push_view(&texture.bytes, None);
        let image = self.root.push(json::Image {
            buffer_view: Some(view),
            mime_type: Some(json::image::MimeType(texture.mime_type.clone())),
            name: texture.name.clone(),
            uri: None,
            extensions: None,
            extras: Default::default(),
        });

        let mut extensions = None;
        if self.ktx2 {
            let ktx2_image = if texture.mime_type == "image/ktx2" {
                image
            } else {
                let encoder = self.codecs.texture_encoder().ok_or(ExportError::NoTextureEncoder)?;
                let encoded = encoder
                    .encode(&texture.bytes, &texture.mime_type)
                    .map_err(|message| ExportError::TextureEncode {
                        index: id.0,
                        message,
                    })?;
                let view = self.push_view(&encoded, None);
                self.root.push(json::Image {
                    buffer_view: Some(view),
                    mime_type: Some(json::image::MimeType("image/ktx2".into())),
                    name: texture.name.clone(),
                    uri: None,
                    extensions: None,
                    extras: Default::default(),
                })
            };
            let mut basisu = serde_json::Map::new();
            basisu.insert("source".into(), json::Value::from(ktx2_image.value()));
            let mut others = serde_json::Map::new();
            others.insert(BASISU_EXTENSION.into(), json::Value::Object(basisu));
            extensions = Some(json::extensions::texture::Texture { others });
            self.use_extension(BASISU_EXTENSION, false);
        }

        let index = self.root.push(json::Texture {
            name: texture.name.clone(),
            sampler: None,
            source: image,
            extensions,
            extras: Default::default(),
        });
        self.textures.insert(id, index);
        Ok(Some(index))
    }

    fn texture_info(&mut self, id: Option<TextureId>) -> Result<Option<json::texture::Info>, ExportError> {
        let Some(id) = id else {
            return Ok(None);
        };
        Ok(self.texture(id)?.map(|index| json::texture::Info {
            index,
            tex_coord: 0,
            extensions: None,
            extras: Default::default(),
        }))
    }

    fn material(&mut self, id: MaterialId) -> Result<Option<json::Index<json::Material>>, ExportError> {
        if let Some(index) = self.materials.get(&id) {
            return Ok(Some(*index));
        }
        let graph = self.graph;
        let Some(material) = graph.material(id) else {
            return Ok(None);
        };
        let material = match material {
            Material::Surface(surface) => {
                let base_color_texture = self.texture_info(surface.albedo_map)?;
                let metallic_roughness_texture =
                    self.texture_info(surface.roughness_map.or(surface.metalness_map))?;
                let emissive_texture = self.texture_info(surface.emissive_map)?;
                let normal_texture = self.texture_info(surface.normal_map)?.map(|info| {
                    json::material::NormalTexture {
                        index: info.index,
                        scale: 1.0,
                        tex_coord: 0,
                        extensions: None,
                        extras: Default::default(),
                    }
                });
                let alpha_mode = if surface.alpha_blend {
                    json::material::AlphaMode::Blend
                } else {
                    json::material::AlphaMode::Opaque
                };
                json::Material {
                    alpha_mode: Checked::Valid(alpha_mode),
                    double_sided: surface.double_sided,
                    name: surface.name.clone(),
                    pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                        base_color_factor: json::material::PbrBaseColorFactor(surface.base_color),
                        base_color_texture,
                        metallic_factor: json::material::StrengthFactor(surface.metallic),
                        roughness_factor: json::material::StrengthFactor(surface.roughness),
                        metallic_roughness_texture,
                        ..Default::default()
                    },
                    normal_texture,
                    emissive_texture,
                    emissive_factor: json::material::EmissiveFactor(surface.emissive),
                    ..Default::default()
                }
            }
            Material::Points(points) => json::Material {
                name: Some("points".into()),
                pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                    base_color_factor: json::material::PbrBaseColorFactor(points.color),
                    metallic_factor: json::material::StrengthFactor(0.0),
                    roughness_factor: json::material::StrengthFactor(1.0),
                    ..Default::default()
                },
                ..Default::default()
            },
        };
        let index = self.root.push(material);
        self.materials.insert(id, index);
        Ok(Some(index))
    }

    fn write_scene(&mut self) -> Result<(), ExportError> {
        let graph = self.graph;
        let order = graph.depth_first();
        for (i, id) in order.iter().enumerate() {
            self.node_map.insert(*id, json::Index::new(i as u32));
        }

        let mut skinned = Vec::new();
        for id in &order {
            let Some(node) = graph.node(*id) else {
                continue;
            };
            let primitive = match node.kind.mesh_data() {
                Some(data) => self
                    .primitive(&data.geometry, node.kind.is_points())?
                    .map(|primitive| (primitive, data)),
                None => None,
            };
            if primitive.is_none() && node.kind.mesh_data().is_some() {
                debug!("Export node {} has no vertices, writing it without a mesh", id.0);
            }
            let mesh = match primitive {
                Some((mut primitive, data)) => {
                    primitive.material = match data.material {
                        Some(material) => self.material(material)?,
                        None => None,
                    };
                    Some(self.root.push(json::Mesh {
                        name: node.name.clone(),
                        primitives: vec![primitive],
                        weights: None,
                        extensions: None,
                        extras: Default::default(),
                    }))
                }
                None => None,
            };
            match (&mesh, &node.kind) {
                (Some(_), NodeKind::SkinnedMesh(_, skin)) => skinned.push((self.root.nodes.len(), skin)),
                _ => {}
            }

            let children: Vec<_> = node
                .children
                .iter()
                .filter_map(|child| self.node_map.get(child).copied())
                .collect();
            let t = node.transform;
            self.root.push(json::Node {
                name: node.name.clone(),
                mesh,
                children: (!children.is_empty()).then_some(children),
                translation: Some(t.translation.to_array()),
                rotation: Some(json::scene::UnitQuaternion(t.rotation.to_array())),
                scale: Some(t.scale.to_array()),
                ..Default::default()
            });
            debug!("Export node {} ({:?})", id.0, node.name);
        }

        for (node, skin) in skinned {
            let index = self.skin(skin);
            if let Some(node) = self.root.nodes.get_mut(node) {
                node.skin = Some(index);
            }
        }

        if let Some(root) = self.node_map.get(&graph.root()).copied() {
            self.root.push(json::Scene {
                name: None,
                nodes: vec![root],
                extensions: None,
                extras: Default::default(),
            });
            self.root.scene = Some(json::Index::new(0));
        }
        Ok(())
    }

    fn skin(&mut self, skin: &Skin) -> json::Index<json::Skin> {
        let joints: Vec<_> = skin
            .joints
            .iter()
            .filter_map(|joint| self.node_map.get(joint).copied())
            .collect();
        let inverse_bind_matrices = (skin.inverse_bind_matrices.len() == joints.len()
            && !joints.is_empty())
        .then(|| {
            let floats: Vec<f32> = skin
                .inverse_bind_matrices
                .iter()
                .flat_map(|m| m.to_cols_array())
                .collect();
            let view = self.push_view(&f32_bytes(&floats), None);
            self.push_accessor(
                view,
                joints.len(),
                json::accessor::ComponentType::F32,
                json::accessor::Type::Mat4,
                None,
            )
        });
        self.root.push(json::Skin {
            extensions: None,
            extras: Default::default(),
            inverse_bind_matrices,
            joints,
            name: None,
            skeleton: None,
        })
    }

    fn write_animations(&mut self, clips: &[AnimationClip]) {
        use json::animation::{Channel, Property, Sampler, Target};

        for clip in clips {
            let mut channels = Vec::new();
            let mut samplers = Vec::new();
            for track in &clip.tracks {
                let Some(node) = self.node_map.get(&track.target).copied() else {
                    continue;
                };
                if track.times.is_empty() {
                    continue;
                }
                let (min, max) = track
                    .times
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(lo, hi), t| (lo.min(*t), hi.max(*t)));
                let view = self.push_view(&f32_bytes(&track.times), None);
                let input = self.push_accessor(
                    view,
                    track.times.len(),
                    json::accessor::ComponentType::F32,
                    json::accessor::Type::Scalar,
                    Some((json::Value::from(vec![min]), json::Value::from(vec![max]))),
                );

                let components = track.property.components();
                let (type_, path) = match track.property {
                    TrackProperty::Translation => (json::accessor::Type::Vec3, Property::Translation),
                    TrackProperty::Rotation => (json::accessor::Type::Vec4, Property::Rotation),
                    TrackProperty::Scale => (json::accessor::Type::Vec3, Property::Scale),
                };
                let view = self.push_view(&f32_bytes(&track.values), None);
                let output = self.push_accessor(
                    view,
                    track.values.len() / components,
                    json::accessor::ComponentType::F32,
                    type_,
                    None,
                );

                let interpolation = match track.interpolation {
                    Interpolation::Linear => json::animation::Interpolation::Linear,
                    Interpolation::Step => json::animation::Interpolation::Step,
                    Interpolation::CubicSpline => json::animation::Interpolation::CubicSpline,
                };
                samplers.push(Sampler {
                    input,
                    output,
                    interpolation: Checked::Valid(interpolation),
                    extensions: None,
                    extras: Default::default(),
                });
                channels.push(Channel {
                    sampler: json::Index::new(samplers.len() as u32 - 1),
                    target: Target {
                        node,
                        path: Checked::Valid(path),
                        extensions: None,
                        extras: Default::default(),
                    },
                    extensions: None,
                    extras: Default::default(),
                });
            }
            self.root.push(json::Animation {
                name: clip.name.clone(),
                channels,
                samplers,
                extensions: None,
                extras: Default::default(),
            });
        }
    }

    fn finish(mut self) -> Result<Vec<u8>, ExportError> {
        pad_to_four(&mut self.bin);
        self.root.buffers.push(json::Buffer {
            byte_length: USize64::from(self.bin.len()),
            name: None,
            uri: None,
            extensions: None,
            extras: Default::default(),
        });
        if self.fallback_len > 0 {
            let mut fallback = serde_json::Map::new();
            fallback.insert("fallback".into(), json::Value::Bool(true));
            let mut others = serde_json::Map::new();
            others.insert(MESHOPT_EXTENSION.into(), json::Value::Object(fallback));
            self.root.buffers.push(json::Buffer {
                byte_length: USize64::from(self.fallback_len),
                name: None,
                uri: None,
                extensions: Some(json::extensions::buffer::Buffer { others }),
                extras: Default::default(),
            });
            self.use_extension(MESHOPT_EXTENSION, true);
        }

        let json = json::serialize::to_vec(&self.root)?;
        let glb = gltf::Glb {
            header: gltf::binary::Header {
                magic: *b"glTF",
                version: 2,
                length: 0,
            },
            json: Cow::Owned(json),
            bin: (!self.bin.is_empty()).then_some(Cow::Owned(self.bin)),
        };
        Ok(glb.to_vec()?)
    }
}

/// Cosmetic export indicator plus the real outcome.
///
/// The percentage only animates; reaching a terminal state requires the
/// actual export result.
#[derive(Debug, Clone, Default, PartialEq, Resource)]
pub enum ExportProgress {
    #[default]
    Idle,
    Running {
        cosmetic_percent: f32,
    },
    Succeeded {
        file_name: String,
    },
    Failed {
        message: String,
    },
}

impl ExportProgress {
    /// Percent per second while running.
    pub const COSMETIC_RATE: f32 = 40.0;
    /// The indicator never reaches 100 on its own.
    pub const COSMETIC_CEILING: f32 = 95.0;

    pub fn start(&mut self) {
        *self = ExportProgress::Running {
            cosmetic_percent: 0.0,
        };
    }

    pub fn tick(&mut self, dt: f32) {
        if let ExportProgress::Running { cosmetic_percent } = self {
            *cosmetic_percent =
                (*cosmetic_percent + dt * Self::COSMETIC_RATE).min(Self::COSMETIC_CEILING);
        }
    }

    pub fn finish(&mut self, result: &Result<ExportedAsset, ExportError>) {
        *self = match result {
            Ok(asset) => ExportProgress::Succeeded {
                file_name: asset.file_name.clone(),
            },
            Err(err) => ExportProgress::Failed {
                message: err.to_string(),
            },
        };
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ExportProgress::Running { .. })
    }

    /// What a progress bar should show.
    pub fn percent(&self) -> f32 {
        match self {
            ExportProgress::Idle | ExportProgress::Failed { .. } => 0.0,
            ExportProgress::Running { cosmetic_percent } => *cosmetic_percent,
            ExportProgress::Succeeded { .. } => 100.0,
        }
    }
}
