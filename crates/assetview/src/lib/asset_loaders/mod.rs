//! Format-specific parsers and the loader that dispatches between them.

pub mod gltf;
pub mod obj;
pub mod pcd;
pub mod ply;
pub mod xyz;

use bevy::prelude::*;
use std::path::{Path, PathBuf};

use crate::lib::animation::AnimationClip;
use crate::lib::codecs::Codecs;
use crate::lib::error::{AssetError, AssetResult};
use crate::lib::format::AssetKind;
use crate::lib::scene::{Geometry, SceneGraph};
use crate::lib::status::{decoding_message, StatusSink, FETCHING};

/// Raw bytes of an asset plus where its sidecar files live.
#[derive(Debug, Clone)]
pub struct AssetSource {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Directory used to resolve relative references (MTL files, glTF
    /// buffers and images).
    pub base_dir: Option<PathBuf>,
}

impl AssetSource {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Read a file from disk, reporting progress to `status`.
    pub fn read(path: &Path, status: &dyn StatusSink) -> AssetResult<Self> {
        status.status(FETCHING);
        let bytes = std::fs::read(path).map_err(|source| AssetError::Fetch {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            bytes,
            base_dir: path.parent().map(Path::to_path_buf),
        })
    }

    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// What a parser produced before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A ready-made node tree (glTF, OBJ, PCD).
    Scene(SceneGraph),
    /// A bare geometry that still has to be wrapped (PLY, XYZ).
    Geometry(Geometry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAsset {
    pub payload: Payload,
    /// Empty for formats without animation support.
    pub clips: Vec<AnimationClip>,
}

impl ParsedAsset {
    fn still(payload: Payload) -> Self {
        Self {
            payload,
            clips: Vec::new(),
        }
    }
}

/// How a bare geometry is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryClass {
    Points,
    Triangles,
}

impl GeometryClass {
    /// Points unless the geometry has a non-empty triangle index buffer.
    pub fn classify(geometry: &Geometry) -> Self {
        if geometry.has_triangle_indices() {
            GeometryClass::Triangles
        } else {
            GeometryClass::Points
        }
    }
}

/// Dispatches a byte buffer to the parser for its kind.
pub struct AssetLoader<'a> {
    codecs: &'a Codecs,
    status: &'a dyn StatusSink,
}

impl<'a> AssetLoader<'a> {
    pub fn new(codecs: &'a Codecs, status: &'a dyn StatusSink) -> Self {
        Self { codecs, status }
    }

    /// Parse `source` as `kind`.
    ///
    /// A parser failure is reported to the status sink with the parser's own
    /// message and returned as [`AssetError::Decode`] carrying the same text.
    pub fn decode(&self, source: &AssetSource, kind: AssetKind) -> AssetResult<ParsedAsset> {
        self.status.status(&decoding_message(kind));
        info!(
            "Decoding {} ({} bytes) as {}",
            source.name,
            source.bytes.len(),
            kind
        );
        self.parse(source, kind).map_err(|message| {
            error!("Failed to decode {}: {}", source.name, message);
            self.status.status(&message);
            AssetError::Decode(message)
        })
    }

    fn parse(&self, source: &AssetSource, kind: AssetKind) -> Result<ParsedAsset, String> {
        let bytes = source.bytes.as_slice();
        let base_dir = source.base_dir.as_deref();
        let parsed = match kind {
            AssetKind::Glb | AssetKind::Gltf => {
                let (graph, clips) =
                    gltf::parse_gltf(bytes, base_dir, self.codecs).map_err(|e| e.to_string())?;
                ParsedAsset {
                    payload: Payload::Scene(graph),
                    clips,
                }
            }
            AssetKind::Obj => ParsedAsset::still(Payload::Scene(
                obj::parse_obj(bytes, &source.name, base_dir).map_err(|e| e.to_string())?,
            )),
            AssetKind::Ply => ParsedAsset::still(Payload::Geometry(
                ply::parse_ply(bytes).map_err(|e| e.to_string())?,
            )),
            AssetKind::Pcd => ParsedAsset::still(Payload::Scene(
                pcd::parse_pcd(bytes, &source.name).map_err(|e| e.to_string())?,
            )),
            AssetKind::Xyz => ParsedAsset::still(Payload::Geometry(
                xyz::parse_xyz(bytes).map_err(|e| e.to_string())?,
            )),
        };
        Ok(parsed)
    }
}
