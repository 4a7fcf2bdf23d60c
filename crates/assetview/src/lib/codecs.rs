//! Compression codec collaborators.
//!
//! A [`Codecs`] bundle is created for each load and shared with the decode
//! worker. It carries the vertex/index decoder for `EXT_meshopt_compression`
//! (provided by `meshopt`) and the optional KTX2 texture collaborators that an
//! embedder can register. The bundle logs its own release when the last
//! reference to it is dropped.

use bevy::prelude::*;
use std::sync::Arc;
use thiserror::Error;

pub const MESHOPT_EXTENSION: &str = "EXT_meshopt_compression";
pub const BASISU_EXTENSION: &str = "KHR_texture_basisu";
pub const DRACO_EXTENSION: &str = "KHR_draco_mesh_compression";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("meshopt: {0}")]
    Meshopt(String),

    #[error("unsupported meshopt {what} '{value}'")]
    UnsupportedMode { what: &'static str, value: String },

    #[error("meshopt vertex stride {0} is not a multiple of 4 up to 128 bytes")]
    UnsupportedStride(usize),

    #[error("texture codec: {0}")]
    Texture(String),
}

/// Turns a KTX2 payload back into an image the renderer can upload.
pub trait TextureTranscoder: Send + Sync {
    /// Returns `(bytes, mime_type)` of the transcoded image.
    fn transcode(&self, ktx2: &[u8]) -> Result<(Vec<u8>, String), String>;
}

/// Encodes an image into a KTX2 payload for export.
pub trait TextureEncoder: Send + Sync {
    fn encode(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, String>;
}

/// Which collaborators a session wires into each load.
#[derive(Clone, Default)]
pub struct CodecConfig {
    /// Disable to reject meshopt-compressed inputs outright.
    pub disable_meshopt: bool,
    pub texture_transcoder: Option<Arc<dyn TextureTranscoder>>,
    pub texture_encoder: Option<Arc<dyn TextureEncoder>>,
}

impl std::fmt::Debug for CodecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecConfig")
            .field("disable_meshopt", &self.disable_meshopt)
            .field("texture_transcoder", &self.texture_transcoder.is_some())
            .field("texture_encoder", &self.texture_encoder.is_some())
            .finish()
    }
}

/// Codec instances used by one load or export.
pub struct Codecs {
    meshopt: bool,
    texture_transcoder: Option<Arc<dyn TextureTranscoder>>,
    texture_encoder: Option<Arc<dyn TextureEncoder>>,
}

impl Codecs {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            meshopt: !config.disable_meshopt,
            texture_transcoder: config.texture_transcoder.clone(),
            texture_encoder: config.texture_encoder.clone(),
        }
    }

    pub fn supports_meshopt(&self) -> bool {
        self.meshopt
    }

    pub fn texture_transcoder(&self) -> Option<&dyn TextureTranscoder> {
        self.texture_transcoder.as_deref()
    }

    pub fn texture_encoder(&self) -> Option<&dyn TextureEncoder> {
        self.texture_encoder.as_deref()
    }

    /// Whether a required glTF extension can be decoded with these codecs.
    pub fn handles_extension(&self, name: &str) -> bool {
        match name {
            MESHOPT_EXTENSION => self.meshopt,
            BASISU_EXTENSION => true,
            _ => false,
        }
    }
}

impl Default for Codecs {
    fn default() -> Self {
        Self::new(&CodecConfig::default())
    }
}

impl Drop for Codecs {
    fn drop(&mut self) {
        debug!(
            "Released codecs (meshopt: {}, ktx2 transcoder: {}, ktx2 encoder: {})",
            self.meshopt,
            self.texture_transcoder.is_some(),
            self.texture_encoder.is_some()
        );
    }
}

/// `mode` of a meshopt-compressed buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshoptMode {
    Attributes,
    Triangles,
}

impl MeshoptMode {
    pub fn parse(value: &str) -> Result<Self, CodecError> {
        match value {
            "ATTRIBUTES" => Ok(MeshoptMode::Attributes),
            "TRIANGLES" => Ok(MeshoptMode::Triangles),
            other => Err(CodecError::UnsupportedMode {
                what: "mode",
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeshoptMode::Attributes => "ATTRIBUTES",
            MeshoptMode::Triangles => "TRIANGLES",
        }
    }
}

fn meshopt_err(err: impl std::fmt::Display) -> CodecError {
    CodecError::Meshopt(err.to_string())
}

fn decode_words<const K: usize>(encoded: &[u8], count: usize) -> Result<Vec<u8>, CodecError>
where
    [u32; K]: Default + Clone,
{
    let decoded: Vec<[u32; K]> = meshopt::decode_vertex_buffer(encoded, count).map_err(meshopt_err)?;
    Ok(decoded
        .iter()
        .flat_map(|v| v.iter().flat_map(|w| w.to_ne_bytes()))
        .collect())
}

macro_rules! decode_by_words {
    ($encoded:expr, $count:expr, $words:expr, [$($k:literal),*]) => {
        match $words {
            $($k => decode_words::<$k>($encoded, $count),)*
            _ => Err(CodecError::UnsupportedStride($words * 4)),
        }
    };
}

/// Upper bound of decoded bytes per encoded byte. Zero-delta vertex groups
/// are the densest case: 16 bytes from 2 header bits.
pub const MESHOPT_MAX_EXPANSION: usize = 64;

/// Decode one compressed buffer view into `count * stride` raw bytes.
pub fn decode_meshopt_view(
    encoded: &[u8],
    count: usize,
    stride: usize,
    mode: MeshoptMode,
) -> Result<Vec<u8>, CodecError> {
    let fits = count
        .checked_mul(stride)
        .is_some_and(|len| len <= encoded.len().saturating_mul(MESHOPT_MAX_EXPANSION));
    if !fits {
        return Err(CodecError::Meshopt(format!(
            "{count} elements of {stride} bytes cannot come from {} encoded bytes",
            encoded.len()
        )));
    }
    match mode {
        MeshoptMode::Triangles => match stride {
            2 => {
                let indices: Vec<u16> =
                    meshopt::decode_index_buffer(encoded, count).map_err(meshopt_err)?;
                Ok(indices.iter().flat_map(|i| i.to_le_bytes()).collect())
            }
            4 => {
                let indices: Vec<u32> =
                    meshopt::decode_index_buffer(encoded, count).map_err(meshopt_err)?;
                Ok(indices.iter().flat_map(|i| i.to_le_bytes()).collect())
            }
            other => Err(CodecError::UnsupportedStride(other)),
        },
        MeshoptMode::Attributes => {
            if stride == 0 || stride % 4 != 0 {
                return Err(CodecError::UnsupportedStride(stride));
            }
            decode_by_words!(
                encoded,
                count,
                stride / 4,
                [
                    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22,
                    23, 24, 25, 26, 27, 28, 29, 30, 31, 32
                ]
            )
        }
    }
}

/// Compress a tightly packed vertex attribute.
pub fn encode_vertices<T>(vertices: &[T]) -> Result<Vec<u8>, CodecError> {
    meshopt::encode_vertex_buffer(vertices).map_err(meshopt_err)
}

/// Reorder triangles for the post-transform cache, then compress them.
pub fn encode_triangles(indices: &[u32], vertex_count: usize) -> Result<Vec<u8>, CodecError> {
    let mut optimized = indices.to_vec();
    meshopt::optimize_vertex_cache_in_place(&mut optimized, vertex_count);
    meshopt::encode_index_buffer(&optimized, vertex_count).map_err(meshopt_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_roundtrip_through_stride() {
        let positions: Vec<[f32; 3]> = (0..64)
            .map(|i| [i as f32, (i * 2) as f32, -(i as f32)])
            .collect();
        let encoded = encode_vertices(&positions).unwrap();
        let decoded = decode_meshopt_view(&encoded, positions.len(), 12, MeshoptMode::Attributes)
            .unwrap();
        assert_eq!(decoded.len(), positions.len() * 12);
        let first_y = f32::from_ne_bytes([decoded[16], decoded[17], decoded[18], decoded[19]]);
        assert_eq!(first_y, 2.0);
    }

    #[test]
    fn test_index_roundtrip_keeps_triangle_count() {
        let indices: Vec<u32> = vec![0, 1, 2, 2, 1, 3, 3, 1, 4];
        let encoded = encode_triangles(&indices, 5).unwrap();
        let decoded = decode_meshopt_view(&encoded, indices.len(), 4, MeshoptMode::Triangles)
            .unwrap();
        assert_eq!(decoded.len(), indices.len() * 4);
    }

    #[test]
    fn test_rejects_unknown_mode_and_stride() {
        assert!(MeshoptMode::parse("INDICES").is_err());
        assert!(decode_meshopt_view(&[], 1, 6, MeshoptMode::Attributes).is_err());
    }

    #[test]
    fn test_impossible_element_count_is_rejected() {
        let encoded = encode_vertices(&[[0.0_f32; 3]; 4]).unwrap();
        let err = decode_meshopt_view(&encoded, usize::MAX / 2, 12, MeshoptMode::Attributes)
            .unwrap_err();
        assert!(err.to_string().starts_with("meshopt: "));
        assert!(decode_meshopt_view(&encoded, 1 << 40, 4, MeshoptMode::Triangles).is_err());
    }

    #[test]
    fn test_extension_support() {
        let codecs = Codecs::default();
        assert!(codecs.handles_extension(MESHOPT_EXTENSION));
        assert!(!codecs.handles_extension(DRACO_EXTENSION));

        let disabled = Codecs::new(&CodecConfig {
            disable_meshopt: true,
            ..Default::default()
        });
        assert!(!disabled.handles_extension(MESHOPT_EXTENSION));
    }
}
