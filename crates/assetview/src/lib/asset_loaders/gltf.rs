//! glTF 2.0 import, text (`.gltf`) and binary (`.glb`).
//!
//! Parsing goes through the `gltf` crate in two phases. The JSON is first read
//! without validation so compression extensions can be resolved: required
//! extensions our codecs handle are removed from `extensionsRequired`,
//! KTX2-only textures are pointed at their KTX2 image, and meshopt-compressed
//! buffer views are collected. The document is then validated, buffers are
//! resolved and compressed views are decoded in place before any accessor is
//! read.

use base64::Engine;
use bevy::math::Mat4;
use bevy::prelude::*;
use gltf::json;
use gltf::mesh::Mode;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::lib::animation::{AnimationClip, Interpolation, Track, TrackProperty};
use crate::lib::codecs::{
    decode_meshopt_view, CodecError, Codecs, MeshoptMode, BASISU_EXTENSION, MESHOPT_EXTENSION,
    MESHOPT_MAX_EXPANSION,
};
use crate::lib::scene::{
    Geometry, Material, MaterialId, MeshData, Node, NodeId, NodeKind, SceneGraph, Skin,
    SurfaceMaterial, Texture, TextureId,
};

#[derive(Debug, Error)]
pub enum GltfImportError {
    #[error("glTF: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("glTF: required extension '{0}' is not supported")]
    UnsupportedExtension(String),

    #[error("glTF: {0}")]
    Codec(#[from] CodecError),

    #[error("glTF: buffer {0} has no data")]
    MissingBuffer(usize),

    #[error("glTF: cannot read '{uri}': {source}")]
    ExternalResource {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("glTF: external resource '{0}' cannot be resolved without a directory")]
    NoBaseDir(String),

    #[error("glTF: invalid data URI: {0}")]
    DataUri(#[from] base64::DecodeError),

    #[error("glTF: invalid {MESHOPT_EXTENSION} data on buffer view {view}: {message}")]
    MeshoptView { view: usize, message: String },

    #[error("glTF: {0}")]
    OutOfRange(String),

    #[error("glTF: document has no nodes to display")]
    NoScene,
}

/// Accessors without a buffer view are zero filled; this caps what one can
/// make us allocate.
const MAX_ZERO_FILLED_BYTES: usize = 1 << 28;

/// `EXT_meshopt_compression` object on a buffer view.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeshoptViewExt {
    buffer: usize,
    #[serde(default)]
    byte_offset: usize,
    byte_length: usize,
    byte_stride: usize,
    count: usize,
    mode: String,
    #[serde(default)]
    filter: Option<String>,
}

struct CompressedView {
    view: usize,
    ext: MeshoptViewExt,
}

/// Parse a glTF or GLB payload into a scene graph plus its animation clips.
///
/// `base_dir` resolves relative buffer and image URIs; without it only GLB
/// blobs and `data:` URIs can be read.
pub fn parse_gltf(
    bytes: &[u8],
    base_dir: Option<&Path>,
    codecs: &Codecs,
) -> Result<(SceneGraph, Vec<AnimationClip>), GltfImportError> {
    let gltf::Gltf { document, blob } = gltf::Gltf::from_slice_without_validation(bytes)?;
    let mut root = document.into_json();

    strip_handled_extensions(&mut root, codecs)?;
    let ktx2_only = adopt_ktx2_sources(&mut root);
    let compressed = collect_compressed_views(&root)?;

    let document = gltf::Document::from_json(root)?;
    let mut buffers = resolve_buffers(&document, blob, base_dir, &compressed)?;
    check_ranges(&document, &buffers)?;
    for view in &compressed {
        decode_view(&document, &mut buffers, view)?;
    }

    let mut import = Import {
        buffers: &buffers,
        base_dir,
        codecs,
        ktx2_only,
        graph: SceneGraph::new("glTF"),
        node_map: vec![None; document.nodes().len()],
        materials: HashMap::new(),
        textures: HashMap::new(),
    };
    import.build_nodes(&document)?;
    import.build_meshes(&document);
    let clips = import.build_animations(&document);

    info!(
        "Imported glTF: {} nodes, {} materials, {} textures, {} animations",
        import.graph.node_count(),
        import.graph.materials().len(),
        import.graph.textures().len(),
        clips.len()
    );
    Ok((import.graph, clips))
}

fn strip_handled_extensions(root: &mut json::Root, codecs: &Codecs) -> Result<(), GltfImportError> {
    if let Some(unsupported) = root
        .extensions_required
        .iter()
        .find(|ext| {
            !codecs.handles_extension(ext) && !json::extensions::ENABLED_EXTENSIONS.contains(&ext.as_str())
        })
    {
        return Err(GltfImportError::UnsupportedExtension(unsupported.clone()));
    }
    root.extensions_required
        .retain(|ext| !codecs.handles_extension(ext));
    Ok(())
}

/// Point textures that only carry a KTX2 image at that image. Returns the
/// indices of those textures.
fn adopt_ktx2_sources(root: &mut json::Root) -> HashSet<usize> {
    let mut adopted = HashSet::new();
    for (i, texture) in root.textures.iter_mut().enumerate() {
        if texture.source.value() != u32::MAX as usize {
            continue;
        }
        let ktx2 = texture
            .extensions
            .as_ref()
            .and_then(|e| e.others.get(BASISU_EXTENSION))
            .and_then(|ext| ext.get("source"))
            .and_then(|s| s.as_u64());
        if let Some(source) = ktx2 {
            texture.source = json::Index::new(source as u32);
            adopted.insert(i);
        }
    }
    adopted
}

fn collect_compressed_views(root: &json::Root) -> Result<Vec<CompressedView>, GltfImportError> {
    let mut views = Vec::new();
    for (i, view) in root.buffer_views.iter().enumerate() {
        let Some(value) = view
            .extensions
            .as_ref()
            .and_then(|e| e.others.get(MESHOPT_EXTENSION))
        else {
            continue;
        };
        let ext: MeshoptViewExt =
            serde_json::from_value(value.clone()).map_err(|err| GltfImportError::MeshoptView {
                view: i,
                message: err.to_string(),
            })?;
        views.push(CompressedView { view: i, ext });
    }
    Ok(views)
}

fn is_fallback_buffer(buffer: &gltf::Buffer) -> bool {
    buffer
        .extension_value(MESHOPT_EXTENSION)
        .and_then(|ext| ext.get("fallback"))
        .and_then(|f| f.as_bool())
        .unwrap_or(false)
}

fn resolve_buffers(
    document: &gltf::Document,
    mut blob: Option<Vec<u8>>,
    base_dir: Option<&Path>,
    compressed: &[CompressedView],
) -> Result<Vec<Vec<u8>>, GltfImportError> {
    let mut buffers = Vec::with_capacity(document.buffers().len());
    for buffer in document.buffers() {
        if is_fallback_buffer(&buffer) {
            buffers.push(Vec::new());
            continue;
        }
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => blob
                .take()
                .ok_or(GltfImportError::MissingBuffer(buffer.index()))?,
            gltf::buffer::Source::Uri(uri) => read_uri(uri, base_dir)?.0,
        };
        if data.len() < buffer.length() {
            return Err(GltfImportError::MissingBuffer(buffer.index()));
        }
        buffers.push(data);
    }

    // Fallback buffers only need room for the views decoded into them, and
    // those are bounded by the compressed bytes that actually exist.
    for buffer in document.buffers().filter(is_fallback_buffer) {
        let mut len = 0;
        for entry in compressed {
            let Some(view) = document.views().nth(entry.view) else {
                continue;
            };
            if view.buffer().index() != buffer.index() {
                continue;
            }
            let ext = &entry.ext;
            let available = buffers.get(ext.buffer).map_or(0, Vec::len);
            let limit = ext
                .byte_length
                .min(available)
                .saturating_mul(MESHOPT_MAX_EXPANSION);
            let end = view.offset().checked_add(view.length());
            match end {
                Some(end) if view.length() <= limit => len = len.max(end),
                _ => {
                    return Err(GltfImportError::MeshoptView {
                        view: entry.view,
                        message: format!(
                            "{} decoded bytes cannot come from {} compressed bytes",
                            view.length(),
                            ext.byte_length.min(available)
                        ),
                    })
                }
            }
        }
        buffers[buffer.index()] = vec![0; len];
    }
    Ok(buffers)
}

/// Every buffer view and accessor must lie inside the resolved buffer data.
fn check_ranges(document: &gltf::Document, buffers: &[Vec<u8>]) -> Result<(), GltfImportError> {
    for view in document.views() {
        let available = buffers.get(view.buffer().index()).map_or(0, Vec::len);
        let end = view.offset().checked_add(view.length());
        if end.map_or(true, |end| end > available) {
            return Err(GltfImportError::OutOfRange(format!(
                "buffer view {} ({} bytes at offset {}) exceeds buffer {} ({} bytes)",
                view.index(),
                view.length(),
                view.offset(),
                view.buffer().index(),
                available
            )));
        }
    }

    for accessor in document.accessors() {
        let size = accessor.size();
        let count = accessor.count();
        match accessor.view() {
            Some(view) => {
                let stride = view.stride().unwrap_or(size);
                let end = match count.checked_sub(1) {
                    None => Some(0),
                    Some(last) => last
                        .checked_mul(stride)
                        .and_then(|n| n.checked_add(size))
                        .and_then(|n| n.checked_add(accessor.offset())),
                };
                if end.map_or(true, |end| end > view.length()) {
                    return Err(GltfImportError::OutOfRange(format!(
                        "accessor {} ({} elements of {} bytes) exceeds buffer view {} ({} bytes)",
                        accessor.index(),
                        count,
                        size,
                        view.index(),
                        view.length()
                    )));
                }
            }
            None => {
                if count.checked_mul(size).map_or(true, |len| len > MAX_ZERO_FILLED_BYTES) {
                    return Err(GltfImportError::OutOfRange(format!(
                        "accessor {} has no buffer view and {} elements",
                        accessor.index(),
                        count
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Read a `data:` or relative URI. Returns the bytes and the URI's MIME type
/// when it declares one.
fn read_uri(uri: &str, base_dir: Option<&Path>) -> Result<(Vec<u8>, Option<String>), GltfImportError> {
    if let Some(data) = uri.strip_prefix("data:") {
        let (header, payload) = data.split_once(',').unwrap_or(("", data));
        let mime = header
            .split(';')
            .next()
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let bytes = if header.ends_with(";base64") {
            base64::engine::general_purpose::STANDARD.decode(payload)?
        } else {
            payload.as_bytes().to_vec()
        };
        return Ok((bytes, mime));
    }
    let dir = base_dir.ok_or_else(|| GltfImportError::NoBaseDir(uri.to_string()))?;
    let path = dir.join(uri);
    let bytes = std::fs::read(&path).map_err(|source| GltfImportError::ExternalResource {
        uri: uri.to_string(),
        source,
    })?;
    Ok((bytes, None))
}

fn decode_view(
    document: &gltf::Document,
    buffers: &mut [Vec<u8>],
    compressed: &CompressedView,
) -> Result<(), GltfImportError> {
    let ext = &compressed.ext;
    let invalid = |message: String| GltfImportError::MeshoptView {
        view: compressed.view,
        message,
    };
    if let Some(filter) = ext.filter.as_deref().filter(|f| *f != "NONE") {
        return Err(CodecError::UnsupportedMode {
            what: "filter",
            value: filter.to_string(),
        }
        .into());
    }
    let mode = MeshoptMode::parse(&ext.mode)?;
    let view = document
        .views()
        .nth(compressed.view)
        .ok_or_else(|| invalid("view does not exist".into()))?;

    let source = ext
        .byte_offset
        .checked_add(ext.byte_length)
        .and_then(|end| buffers.get(ext.buffer)?.get(ext.byte_offset..end))
        .ok_or_else(|| invalid("compressed range is outside its buffer".into()))?;
    let decoded = decode_meshopt_view(source, ext.count, ext.byte_stride, mode)?;

    let target = view.buffer().index();
    let start = view.offset();
    let end = start.saturating_add(decoded.len().min(view.length()));
    let dest = buffers
        .get_mut(target)
        .and_then(|b| b.get_mut(start..end))
        .ok_or_else(|| invalid("decoded data does not fit the view".into()))?;
    let len = dest.len();
    dest.copy_from_slice(&decoded[..len]);
    debug!(
        "Decoded meshopt view {} ({} x {} bytes, {})",
        compressed.view,
        ext.count,
        ext.byte_stride,
        mode.as_str()
    );
    Ok(())
}

struct Import<'a> {
    buffers: &'a [Vec<u8>],
    base_dir: Option<&'a Path>,
    codecs: &'a Codecs,
    ktx2_only: HashSet<usize>,
    graph: SceneGraph,
    node_map: Vec<Option<NodeId>>,
    materials: HashMap<Option<usize>, MaterialId>,
    textures: HashMap<usize, Option<TextureId>>,
}

impl<'a> Import<'a> {
    fn build_nodes(&mut self, document: &gltf::Document) -> Result<(), GltfImportError> {
        let joints: HashSet<usize> = document
            .skins()
            .flat_map(|skin| skin.joints().map(|j| j.index()))
            .collect();

        let scene = document.default_scene().or_else(|| document.scenes().next());
        let roots: Vec<gltf::Node> = match &scene {
            Some(scene) => {
                if let Some(name) = scene.name() {
                    if let Some(root) = self.graph.node_mut(self.graph.root()) {
                        root.name = Some(name.to_string());
                    }
                }
                scene.nodes().collect()
            }
            None => {
                let children: HashSet<usize> = document
                    .nodes()
                    .flat_map(|n| n.children().map(|c| c.index()))
                    .collect();
                document
                    .nodes()
                    .filter(|n| !children.contains(&n.index()))
                    .collect()
            }
        };
        if roots.is_empty() {
            return Err(GltfImportError::NoScene);
        }

        let mut stack: Vec<(gltf::Node, Option<NodeId>)> =
            roots.into_iter().rev().map(|n| (n, None)).collect();
        while let Some((node, parent)) = stack.pop() {
            if self.node_map[node.index()].is_some() {
                continue;
            }
            let kind = if joints.contains(&node.index()) {
                NodeKind::Bone
            } else {
                NodeKind::Group
            };
            let (t, r, s) = node.transform().decomposed();
            let mut entry = Node::new(kind).with_transform(Transform {
                translation: Vec3::from_array(t),
                rotation: Quat::from_array(r),
                scale: Vec3::from_array(s),
            });
            entry.name = node.name().map(str::to_string);
            let id = self.graph.add_node(parent, entry);
            self.node_map[node.index()] = Some(id);

            let children: Vec<gltf::Node> = node.children().collect();
            stack.extend(children.into_iter().rev().map(|c| (c, Some(id))));
        }
        Ok(())
    }

    fn build_meshes(&mut self, document: &gltf::Document) {
        let buffers = self.buffers;
        let get = |b: gltf::Buffer| buffers.get(b.index()).map(|d| d.as_slice());

        for node in document.nodes() {
            let (Some(parent), Some(mesh)) = (self.node_map[node.index()], node.mesh()) else {
                continue;
            };
            let skin = node.skin().map(|skin| {
                let joints: Vec<NodeId> = skin
                    .joints()
                    .filter_map(|j| self.node_map[j.index()])
                    .collect();
                let inverse_bind_matrices = skin
                    .reader(get)
                    .read_inverse_bind_matrices()
                    .map(|m| m.map(|c| Mat4::from_cols_array_2d(&c)).collect())
                    .unwrap_or_else(|| vec![Mat4::IDENTITY; joints.len()]);
                Skin {
                    joints,
                    inverse_bind_matrices,
                }
            });

            for primitive in mesh.primitives() {
                let reader = primitive.reader(get);
                let Some(positions) = reader.read_positions() else {
                    warn!(
                        "Skipping primitive {} of mesh {}: no POSITION attribute",
                        primitive.index(),
                        mesh.index()
                    );
                    continue;
                };
                let mut geometry = Geometry::from_positions(positions.collect());
                geometry.normals = reader.read_normals().map(|n| n.collect());
                geometry.colors = reader.read_colors(0).map(|c| c.into_rgba_f32().collect());
                geometry.uvs = reader.read_tex_coords(0).map(|t| t.into_f32().collect());
                geometry.joints = reader.read_joints(0).map(|j| j.into_u16().collect());
                geometry.weights = reader.read_weights(0).map(|w| w.into_f32().collect());
                let indices: Option<Vec<u32>> = reader.read_indices().map(|i| i.into_u32().collect());
                let vertex_count = geometry.vertex_count();
                if let Some(bad) = indices
                    .iter()
                    .flatten()
                    .find(|i| **i as usize >= vertex_count)
                {
                    warn!(
                        "Skipping primitive {} of mesh {}: index {} but {} vertices",
                        primitive.index(),
                        mesh.index(),
                        bad,
                        vertex_count
                    );
                    continue;
                }
                if primitive.morph_targets().len() > 0 {
                    warn!("Morph targets of mesh {} are not imported", mesh.index());
                }

                let material = Some(self.material(primitive.material()));
                let data = |geometry| MeshData::new(geometry, material);
                let kind = match primitive.mode() {
                    Mode::Points => {
                        geometry.indices = indices;
                        NodeKind::Points(data(geometry))
                    }
                    Mode::Triangles => {
                        geometry.indices = indices;
                        mesh_kind(data(geometry), skin.clone())
                    }
                    Mode::TriangleStrip | Mode::TriangleFan => {
                        let corners = indices
                            .unwrap_or_else(|| (0..geometry.vertex_count() as u32).collect());
                        geometry.indices = Some(if primitive.mode() == Mode::TriangleStrip {
                            strip_to_list(&corners)
                        } else {
                            fan_to_list(&corners)
                        });
                        mesh_kind(data(geometry), skin.clone())
                    }
                    other => {
                        warn!("Skipping {:?} primitive of mesh {}", other, mesh.index());
                        continue;
                    }
                };
                let name = mesh
                    .name()
                    .map(|n| format!("{n}.{}", primitive.index()))
                    .unwrap_or_else(|| format!("primitive {}", primitive.index()));
                self.graph.add_node(Some(parent), Node::new(kind).named(name));
            }
        }
    }

    fn material(&mut self, material: gltf::Material) -> MaterialId {
        if let Some(id) = self.materials.get(&material.index()) {
            return *id;
        }
        let pbr = material.pbr_metallic_roughness();
        let metallic_roughness = pbr
            .metallic_roughness_texture()
            .and_then(|info| self.texture(info.texture()));
        let surface = SurfaceMaterial {
            name: material.name().map(str::to_string),
            base_color: pbr.base_color_factor(),
            metallic: pbr.metallic_factor(),
            roughness: pbr.roughness_factor(),
            emissive: material.emissive_factor(),
            albedo_map: pbr
                .base_color_texture()
                .and_then(|info| self.texture(info.texture())),
            normal_map: material
                .normal_texture()
                .and_then(|n| self.texture(n.texture())),
            roughness_map: metallic_roughness,
            metalness_map: metallic_roughness,
            emissive_map: material
                .emissive_texture()
                .and_then(|info| self.texture(info.texture())),
            double_sided: material.double_sided(),
            alpha_blend: material.alpha_mode() == gltf::material::AlphaMode::Blend,
            ..Default::default()
        };
        let id = self.graph.add_material(Material::Surface(surface));
        self.materials.insert(material.index(), id);
        id
    }

    fn texture(&mut self, texture: gltf::Texture) -> Option<TextureId> {
        if let Some(id) = self.textures.get(&texture.index()) {
            return *id;
        }
        let id = match self.read_image(&texture) {
            Ok((bytes, mime_type)) => Some(self.graph.add_texture(Texture {
                name: texture.name().map(str::to_string),
                mime_type,
                bytes,
            })),
            Err(message) => {
                warn!("Texture {} unavailable: {}", texture.index(), message);
                None
            }
        };
        self.textures.insert(texture.index(), id);
        id
    }

    fn read_image(&self, texture: &gltf::Texture) -> Result<(Vec<u8>, String), String> {
        let image = texture.source();
        let (bytes, mime) = match image.source() {
            gltf::image::Source::View { view, mime_type } => {
                let start = view.offset();
                let bytes = self
                    .buffers
                    .get(view.buffer().index())
                    .and_then(|b| b.get(start..start + view.length()))
                    .ok_or_else(|| format!("image view {} is out of bounds", view.index()))?;
                (bytes.to_vec(), Some(mime_type.to_string()))
            }
            gltf::image::Source::Uri { uri, mime_type } => {
                let (bytes, uri_mime) = read_uri(uri, self.base_dir).map_err(|e| e.to_string())?;
                (bytes, mime_type.map(str::to_string).or(uri_mime))
            }
        };
        let mime = mime.unwrap_or_else(|| sniff_mime(&bytes).to_string());

        if !self.ktx2_only.contains(&texture.index()) {
            return Ok((bytes, mime));
        }
        match self.codecs.texture_transcoder() {
            Some(transcoder) => transcoder.transcode(&bytes),
            None => Ok((bytes, "image/ktx2".to_string())),
        }
    }

    fn build_animations(&self, document: &gltf::Document) -> Vec<AnimationClip> {
        let buffers = self.buffers;
        let get = |b: gltf::Buffer| buffers.get(b.index()).map(|d| d.as_slice());
        let mut clips = Vec::new();

        for animation in document.animations() {
            let mut tracks = Vec::new();
            for channel in animation.channels() {
                let Some(target) = self.node_map[channel.target().node().index()] else {
                    continue;
                };
                let reader = channel.reader(get);
                let Some(times) = reader.read_inputs() else {
                    continue;
                };
                let (property, values): (TrackProperty, Vec<f32>) = match reader.read_outputs() {
                    Some(gltf::animation::util::ReadOutputs::Translations(t)) => {
                        (TrackProperty::Translation, t.flatten().collect())
                    }
                    Some(gltf::animation::util::ReadOutputs::Rotations(r)) => {
                        (TrackProperty::Rotation, r.into_f32().flatten().collect())
                    }
                    Some(gltf::animation::util::ReadOutputs::Scales(s)) => {
                        (TrackProperty::Scale, s.flatten().collect())
                    }
                    Some(gltf::animation::util::ReadOutputs::MorphTargetWeights(_)) => {
                        warn!(
                            "Dropping morph weight channel of animation {}",
                            animation.index()
                        );
                        continue;
                    }
                    None => continue,
                };
                let interpolation = match channel.sampler().interpolation() {
                    gltf::animation::Interpolation::Linear => Interpolation::Linear,
                    gltf::animation::Interpolation::Step => Interpolation::Step,
                    gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
                };
                tracks.push(Track {
                    target,
                    property,
                    interpolation,
                    times: times.collect(),
                    values,
                });
            }
            clips.push(AnimationClip::new(
                animation.name().map(str::to_string),
                tracks,
            ));
        }
        clips
    }
}

fn mesh_kind(data: MeshData, skin: Option<Skin>) -> NodeKind {
    match skin {
        Some(skin) => NodeKind::SkinnedMesh(data, skin),
        None => NodeKind::Mesh(data),
    }
}

fn strip_to_list(strip: &[u32]) -> Vec<u32> {
    let mut list = Vec::with_capacity(strip.len().saturating_sub(2) * 3);
    for (i, w) in strip.windows(3).enumerate() {
        if i % 2 == 0 {
            list.extend_from_slice(&[w[0], w[1], w[2]]);
        } else {
            list.extend_from_slice(&[w[1], w[0], w[2]]);
        }
    }
    list
}

fn fan_to_list(fan: &[u32]) -> Vec<u32> {
    let Some((&first, rest)) = fan.split_first() else {
        return Vec::new();
    };
    rest.windows(2)
        .flat_map(|w| [first, w[0], w[1]])
        .collect()
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else if bytes.starts_with(&[0xab, b'K', b'T', b'X', b' ', b'2', b'0']) {
        "image/ktx2"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::codecs::encode_vertices;
    use serde_json::json;

    const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

    fn data_uri(bytes: &[u8]) -> String {
        format!(
            "data:application/octet-stream;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    fn triangle_bytes() -> Vec<u8> {
        TRIANGLE
            .iter()
            .flatten()
            .flat_map(|f| f.to_le_bytes())
            .collect()
    }

    fn triangle_document(buffers: serde_json::Value, view: serde_json::Value) -> serde_json::Value {
        json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "name": "tri", "mesh": 0 }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
            "accessors": [{
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "min": [0.0, 0.0, 0.0],
                "max": [1.0, 1.0, 0.0]
            }],
            "bufferViews": [view],
            "buffers": buffers
        })
    }

    #[test]
    fn test_data_uri_triangle() {
        let doc = triangle_document(
            json!([{ "byteLength": 36, "uri": data_uri(&triangle_bytes()) }]),
            json!({ "buffer": 0, "byteLength": 36 }),
        );
        let (graph, clips) =
            parse_gltf(doc.to_string().as_bytes(), None, &Codecs::default()).unwrap();
        assert!(clips.is_empty());
        let meshes: Vec<_> = graph
            .nodes()
            .filter(|(_, n)| n.kind.is_triangulated())
            .collect();
        assert_eq!(meshes.len(), 1);
        let data = meshes[0].1.kind.mesh_data().unwrap();
        assert_eq!(data.geometry.positions, TRIANGLE.to_vec());
        assert!(data.material.is_some());
        assert_eq!(graph.node(meshes[0].1.parent.unwrap()).unwrap().name.as_deref(), Some("tri"));
    }

    #[test]
    fn test_meshopt_view_is_decoded() {
        let encoded = encode_vertices(&TRIANGLE).unwrap();
        let mut doc = triangle_document(
            json!([
                { "byteLength": encoded.len(), "uri": data_uri(&encoded) },
                { "byteLength": 36, "extensions": { "EXT_meshopt_compression": { "fallback": true } } }
            ]),
            json!({
                "buffer": 1,
                "byteLength": 36,
                "extensions": { "EXT_meshopt_compression": {
                    "buffer": 0,
                    "byteLength": encoded.len(),
                    "byteStride": 12,
                    "count": 3,
                    "mode": "ATTRIBUTES"
                }}
            }),
        );
        doc["extensionsUsed"] = json!(["EXT_meshopt_compression"]);
        doc["extensionsRequired"] = json!(["EXT_meshopt_compression"]);
        let bytes = doc.to_string().into_bytes();

        let (graph, _) = parse_gltf(&bytes, None, &Codecs::default()).unwrap();
        let positions = graph
            .nodes()
            .find_map(|(_, n)| n.kind.mesh_data().map(|d| d.geometry.positions.clone()))
            .unwrap();
        assert_eq!(positions, TRIANGLE.to_vec());

        let disabled = Codecs::new(&crate::lib::codecs::CodecConfig {
            disable_meshopt: true,
            ..Default::default()
        });
        let err = parse_gltf(&bytes, None, &disabled).unwrap_err();
        assert!(err.to_string().contains("EXT_meshopt_compression"));
    }

    #[test]
    fn test_draco_required_is_rejected() {
        let mut doc = triangle_document(
            json!([{ "byteLength": 36, "uri": data_uri(&triangle_bytes()) }]),
            json!({ "buffer": 0, "byteLength": 36 }),
        );
        doc["extensionsUsed"] = json!(["KHR_draco_mesh_compression"]);
        doc["extensionsRequired"] = json!(["KHR_draco_mesh_compression"]);
        let err = parse_gltf(doc.to_string().as_bytes(), None, &Codecs::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "glTF: required extension 'KHR_draco_mesh_compression' is not supported"
        );
    }

    #[test]
    fn test_external_buffer_needs_directory() {
        let doc = triangle_document(
            json!([{ "byteLength": 36, "uri": "tri.bin" }]),
            json!({ "buffer": 0, "byteLength": 36 }),
        );
        let bytes = doc.to_string().into_bytes();
        assert!(matches!(
            parse_gltf(&bytes, None, &Codecs::default()),
            Err(GltfImportError::NoBaseDir(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tri.bin"), triangle_bytes()).unwrap();
        assert!(parse_gltf(&bytes, Some(dir.path()), &Codecs::default()).is_ok());
    }

    #[test]
    fn test_view_past_buffer_end_is_rejected() {
        let doc = triangle_document(
            json!([{ "byteLength": 36, "uri": data_uri(&triangle_bytes()) }]),
            json!({ "buffer": 0, "byteOffset": 18446744073709551600u64, "byteLength": 36 }),
        );
        let err = parse_gltf(doc.to_string().as_bytes(), None, &Codecs::default()).unwrap_err();
        assert!(err.to_string().starts_with("glTF: "), "{err}");

        let doc = triangle_document(
            json!([{ "byteLength": 36, "uri": data_uri(&triangle_bytes()) }]),
            json!({ "buffer": 0, "byteLength": 24 }),
        );
        let err = parse_gltf(doc.to_string().as_bytes(), None, &Codecs::default()).unwrap_err();
        assert!(err.to_string().starts_with("glTF: "), "{err}");
    }

    #[test]
    fn test_huge_meshopt_ranges_are_rejected() {
        let encoded = encode_vertices(&TRIANGLE).unwrap();
        let compressed_doc = |ext: serde_json::Value, fallback_len: u64| {
            let mut doc = triangle_document(
                json!([
                    { "byteLength": encoded.len(), "uri": data_uri(&encoded) },
                    { "byteLength": fallback_len, "extensions": { "EXT_meshopt_compression": { "fallback": true } } }
                ]),
                json!({
                    "buffer": 1,
                    "byteLength": 36,
                    "extensions": { "EXT_meshopt_compression": ext }
                }),
            );
            doc["extensionsUsed"] = json!(["EXT_meshopt_compression"]);
            doc.to_string().into_bytes()
        };

        // The declared fallback size is never allocated up front.
        let bytes = compressed_doc(
            json!({ "buffer": 0, "byteLength": encoded.len(), "byteStride": 12, "count": 3, "mode": "ATTRIBUTES" }),
            1 << 50,
        );
        assert!(parse_gltf(&bytes, None, &Codecs::default()).is_ok());

        let bytes = compressed_doc(
            json!({ "buffer": 0, "byteOffset": 18446744073709551615u64, "byteLength": 2, "byteStride": 12, "count": 3, "mode": "ATTRIBUTES" }),
            36,
        );
        assert!(matches!(
            parse_gltf(&bytes, None, &Codecs::default()),
            Err(GltfImportError::MeshoptView { view: 0, .. })
        ));

        let bytes = compressed_doc(
            json!({ "buffer": 0, "byteLength": encoded.len(), "byteStride": 12, "count": 100000000000u64, "mode": "ATTRIBUTES" }),
            36,
        );
        assert!(parse_gltf(&bytes, None, &Codecs::default()).is_err());
    }

    #[test]
    fn test_out_of_range_indices_skip_the_primitive() {
        let mut bin = triangle_bytes();
        bin.extend([0u16, 1, 7].iter().flat_map(|i| i.to_le_bytes()));
        let mut doc = triangle_document(
            json!([{ "byteLength": bin.len(), "uri": data_uri(&bin) }]),
            json!({ "buffer": 0, "byteLength": 36 }),
        );
        doc["bufferViews"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "buffer": 0, "byteOffset": 36, "byteLength": 6 }));
        doc["accessors"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }));
        doc["meshes"][0]["primitives"][0]["indices"] = json!(1);

        let (graph, _) = parse_gltf(doc.to_string().as_bytes(), None, &Codecs::default()).unwrap();
        assert!(graph.nodes().all(|(_, n)| n.kind.mesh_data().is_none()));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = parse_gltf(b"not gltf at all", None, &Codecs::default()).unwrap_err();
        assert!(err.to_string().starts_with("glTF: "));
    }

    #[test]
    fn test_strip_and_fan_conversion() {
        assert_eq!(strip_to_list(&[0, 1, 2, 3]), vec![0, 1, 2, 2, 1, 3]);
        assert_eq!(fan_to_list(&[0, 1, 2, 3]), vec![0, 1, 2, 0, 2, 3]);
    }
}
