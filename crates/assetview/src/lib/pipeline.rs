//! Detect, read, decode and normalize in one call.
//!
//! These functions are what the viewer's load worker and the headless tools
//! run. They never touch session state, so a result can be discarded without
//! side effects when a newer load has started in the meantime.

use bevy::prelude::*;
use std::path::{Path, PathBuf};

use crate::lib::animation::AnimationClip;
use crate::lib::asset_loaders::{AssetLoader, AssetSource};
use crate::lib::codecs::Codecs;
use crate::lib::error::AssetResult;
use crate::lib::format::AssetKind;
use crate::lib::normalize::AssetNormalizer;
use crate::lib::scene::SceneObject;
use crate::lib::status::StatusSink;

/// A normalized object together with the clips its file carried.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAsset {
    pub object: SceneObject,
    pub clips: Vec<AnimationClip>,
}

/// Load an asset from disk.
///
/// The format is detected from the file name first, so an unsupported
/// extension fails without reading the file.
pub fn load_file(
    path: &Path,
    point_size: f32,
    codecs: &Codecs,
    status: &dyn StatusSink,
) -> AssetResult<LoadedAsset> {
    let kind = AssetKind::from_path(path)?;
    let source = AssetSource::read(path, status)?;
    load_source(source, kind, point_size, codecs, status)
}

/// Load an asset that is already in memory, e.g. an upload.
///
/// `base_dir` is where sidecar files (MTL, external glTF buffers) are looked
/// up, if anywhere.
pub fn load_bytes(
    name: &str,
    bytes: Vec<u8>,
    base_dir: Option<PathBuf>,
    point_size: f32,
    codecs: &Codecs,
    status: &dyn StatusSink,
) -> AssetResult<LoadedAsset> {
    let kind = AssetKind::from_file_name(name)?;
    let mut source = AssetSource::from_bytes(name, bytes);
    source.base_dir = base_dir;
    load_source(source, kind, point_size, codecs, status)
}

fn load_source(
    source: AssetSource,
    kind: AssetKind,
    point_size: f32,
    codecs: &Codecs,
    status: &dyn StatusSink,
) -> AssetResult<LoadedAsset> {
    let parsed = AssetLoader::new(codecs, status).decode(&source, kind)?;
    let object = AssetNormalizer::new(point_size).normalize(
        parsed.payload,
        kind,
        &source.name,
        source.byte_size(),
    );
    debug!(
        "Normalized {} into {} nodes, {} clips",
        object.name,
        object.graph.node_count(),
        parsed.clips.len()
    );
    Ok(LoadedAsset {
        object,
        clips: parsed.clips,
    })
}
