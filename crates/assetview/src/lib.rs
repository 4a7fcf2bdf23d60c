//! Assetview asset viewer library
//!
//! This library provides the ingestion, normalization, inspection and export
//! pipeline for 3D meshes and point clouds, plus the Bevy glue that drives it
//! from an interactive viewer.

pub mod lib {
    pub mod animation;
    pub mod asset_loaders;
    pub mod camera;
    pub mod codecs;
    pub mod error;
    pub mod export;
    pub mod format;
    pub mod metadata;
    pub mod normalize;
    pub mod pipeline;
    pub mod scene;
    pub mod session;
    pub mod settings;
    pub mod status;
}

pub mod app {
    pub mod cli;
    pub mod systems;
}

// Re-export commonly used types from lib modules
pub use lib::animation::{AnimationClip, AnimationRuntime};
pub use lib::camera::{CameraFramer, CameraState, Framing};
pub use lib::codecs::{CodecConfig, Codecs, TextureEncoder, TextureTranscoder};
pub use lib::error::{AssetError, AssetResult};
pub use lib::export::{export_file_name, AssetExporter, ExportConfig, ExportError, ExportedAsset};
pub use lib::format::AssetKind;
pub use lib::metadata::{MetadataExtractor, ModelMetadata};
pub use lib::pipeline::{load_bytes, load_file, LoadedAsset};
pub use lib::scene::{SceneGraph, SceneObject};
pub use lib::session::{LoadHandle, LoadOutcome, ViewerSession};
pub use lib::settings::SceneSettings;
pub use lib::status::StatusSink;
