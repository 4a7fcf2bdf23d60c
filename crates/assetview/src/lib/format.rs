//! Asset kind detection.
//!
//! The kind is decided from the file name alone: the text after the last `.`
//! is lowercased and looked up in a fixed table. File contents are never
//! sniffed, so an unknown extension is rejected before any I/O happens.

use crate::lib::error::{AssetError, AssetResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// The six supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    /// Binary interchange container (`.glb`)
    Glb,
    /// Text interchange format (`.gltf`)
    Gltf,
    /// Wavefront mesh (`.obj`)
    Obj,
    /// Stanford polygon file, either points or a mesh (`.ply`)
    Ply,
    /// Point Cloud Library point cloud (`.pcd`)
    Pcd,
    /// Plain text point list (`.xyz`)
    Xyz,
}

impl AssetKind {
    pub const ALL: [AssetKind; 6] = [
        AssetKind::Glb,
        AssetKind::Gltf,
        AssetKind::Obj,
        AssetKind::Ply,
        AssetKind::Pcd,
        AssetKind::Xyz,
    ];

    /// Look up an extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "glb" => Some(AssetKind::Glb),
            "gltf" => Some(AssetKind::Gltf),
            "obj" => Some(AssetKind::Obj),
            "ply" => Some(AssetKind::Ply),
            "pcd" => Some(AssetKind::Pcd),
            "xyz" => Some(AssetKind::Xyz),
            _ => None,
        }
    }

    /// Detect the kind from a file name such as `"model.GLB"`.
    pub fn from_file_name(name: &str) -> AssetResult<Self> {
        name.rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext))
            .ok_or_else(|| AssetError::UnsupportedFormat(name.to_string()))
    }

    /// Detect the kind from the file-name component of a path.
    pub fn from_path(path: &Path) -> AssetResult<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_file_name(&name)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AssetKind::Glb => "glb",
            AssetKind::Gltf => "gltf",
            AssetKind::Obj => "obj",
            AssetKind::Ply => "ply",
            AssetKind::Pcd => "pcd",
            AssetKind::Xyz => "xyz",
        }
    }

    /// Upper-case label used in status messages and metadata.
    pub fn label(&self) -> &'static str {
        match self {
            AssetKind::Glb => "GLB",
            AssetKind::Gltf => "GLTF",
            AssetKind::Obj => "OBJ",
            AssetKind::Ply => "PLY",
            AssetKind::Pcd => "PCD",
            AssetKind::Xyz => "XYZ",
        }
    }

    /// Interchange formats embed their own materials and animations.
    pub fn is_interchange(&self) -> bool {
        matches!(self, AssetKind::Glb | AssetKind::Gltf)
    }

    /// Formats whose payload is decoded from UTF-8 text before parsing.
    pub fn is_text(&self) -> bool {
        matches!(self, AssetKind::Obj | AssetKind::Xyz)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_extensions_detected() {
        let cases = [
            ("scene.glb", AssetKind::Glb),
            ("scene.gltf", AssetKind::Gltf),
            ("bunny.obj", AssetKind::Obj),
            ("scan.ply", AssetKind::Ply),
            ("lidar.pcd", AssetKind::Pcd),
            ("points.xyz", AssetKind::Xyz),
        ];
        for (name, expected) in cases {
            assert_eq!(AssetKind::from_file_name(name).unwrap(), expected, "{name}");
        }
    }

    #[test]
    fn test_detection_is_case_insensitive() {
        assert_eq!(AssetKind::from_file_name("model.GLB").unwrap(), AssetKind::Glb);
        assert_eq!(AssetKind::from_file_name("Model.Ply").unwrap(), AssetKind::Ply);
    }

    #[test]
    fn test_last_dot_wins() {
        assert_eq!(
            AssetKind::from_file_name("archive.tar.xyz").unwrap(),
            AssetKind::Xyz
        );
        assert!(AssetKind::from_file_name("model.glb.bak").is_err());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = AssetKind::from_file_name("model.stl").unwrap_err();
        assert!(err.is_unsupported_format());
        assert!(AssetKind::from_file_name("README").is_err());
    }

    #[test]
    fn test_from_path_uses_file_name() {
        let path = Path::new("/data/v1.2/robot.gltf");
        assert_eq!(AssetKind::from_path(path).unwrap(), AssetKind::Gltf);
    }
}
