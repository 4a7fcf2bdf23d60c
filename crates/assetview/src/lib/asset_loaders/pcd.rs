//! Point Cloud Library `.pcd` reader.
//!
//! Handles `ascii`, `binary` and `binary_compressed` (LZF) data sections and
//! produces a ready-made point node without a material.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::lib::scene::{Geometry, MeshData, Node, NodeKind, SceneGraph};

#[derive(Debug, Error)]
pub enum PcdError {
    #[error("PCD: header is missing the DATA line")]
    MissingData,

    #[error("PCD: malformed header line '{0}'")]
    MalformedHeader(String),

    #[error("PCD: unsupported data encoding '{0}'")]
    UnsupportedData(String),

    #[error("PCD: fields x, y and z are required")]
    MissingPositions,

    #[error("PCD: data section is shorter than {points} points")]
    Truncated { points: usize },

    #[error("PCD: invalid value '{0}'")]
    InvalidValue(String),

    #[error("PCD: corrupt LZF stream")]
    CorruptCompression,
}

/// Largest element count accepted for one field.
const MAX_FIELD_COUNT: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Signed,
    Unsigned,
    Float,
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    size: usize,
    ty: FieldType,
    count: usize,
}

impl Field {
    fn byte_len(&self) -> usize {
        self.size * self.count
    }
}

#[derive(Debug)]
struct Header {
    fields: Vec<Field>,
    points: usize,
    data: String,
    body_offset: usize,
}

fn parse_header(bytes: &[u8]) -> Result<Header, PcdError> {
    let mut names = Vec::new();
    let mut sizes = Vec::new();
    let mut types = Vec::new();
    let mut counts = Vec::new();
    let mut width: Option<usize> = None;
    let mut height = 1_usize;
    let mut points: Option<usize> = None;
    let mut offset = 0;

    let data = loop {
        let rest = bytes.get(offset..).ok_or(PcdError::MissingData)?;
        let end = rest
            .iter()
            .position(|b| *b == b'\n')
            .unwrap_or(rest.len());
        if end == 0 && rest.is_empty() {
            return Err(PcdError::MissingData);
        }
        let line = String::from_utf8_lossy(&rest[..end]).trim().to_string();
        offset += (end + 1).min(rest.len());

        let mut tokens = line.split_whitespace();
        let Some(key) = tokens.next() else {
            continue;
        };
        let values: Vec<&str> = tokens.collect();
        let malformed = || PcdError::MalformedHeader(line.clone());
        match key.to_ascii_uppercase().as_str() {
            k if k.starts_with('#') => {}
            "VERSION" | "VIEWPOINT" => {}
            "FIELDS" => names = values.iter().map(|s| s.to_string()).collect(),
            "SIZE" => {
                sizes = values
                    .iter()
                    .map(|s| s.parse::<usize>().map_err(|_| malformed()))
                    .collect::<Result<_, _>>()?
            }
            "TYPE" => {
                types = values
                    .iter()
                    .map(|s| match *s {
                        "I" | "i" => Ok(FieldType::Signed),
                        "U" | "u" => Ok(FieldType::Unsigned),
                        "F" | "f" => Ok(FieldType::Float),
                        _ => Err(malformed()),
                    })
                    .collect::<Result<_, _>>()?
            }
            "COUNT" => {
                counts = values
                    .iter()
                    .map(|s| s.parse::<usize>().map_err(|_| malformed()))
                    .collect::<Result<_, _>>()?
            }
            "WIDTH" => width = Some(values.first().and_then(|s| s.parse().ok()).ok_or_else(malformed)?),
            "HEIGHT" => height = values.first().and_then(|s| s.parse().ok()).ok_or_else(malformed)?,
            "POINTS" => points = Some(values.first().and_then(|s| s.parse().ok()).ok_or_else(malformed)?),
            "DATA" => break values.first().map(|s| s.to_ascii_lowercase()).ok_or_else(malformed)?,
            _ => return Err(malformed()),
        }
    };

    if counts.is_empty() {
        counts = vec![1; names.len()];
    }
    if sizes.len() != names.len() || types.len() != names.len() || counts.len() != names.len() {
        return Err(PcdError::MalformedHeader(
            "FIELDS, SIZE, TYPE and COUNT disagree in length".into(),
        ));
    }
    let fields = names
        .into_iter()
        .zip(sizes)
        .zip(types)
        .zip(counts)
        .map(|(((name, size), ty), count)| {
            if !matches!(size, 1 | 2 | 4 | 8) || count == 0 || count > MAX_FIELD_COUNT {
                return Err(PcdError::MalformedHeader(format!(
                    "field '{name}' has SIZE {size} and COUNT {count}"
                )));
            }
            Ok(Field {
                name,
                size,
                ty,
                count,
            })
        })
        .collect::<Result<_, _>>()?;

    let points = match points {
        Some(points) => points,
        None => match width {
            Some(width) => width
                .checked_mul(height)
                .ok_or_else(|| PcdError::MalformedHeader("WIDTH * HEIGHT overflows".into()))?,
            None => 0,
        },
    };

    Ok(Header {
        fields,
        points,
        data,
        body_offset: offset,
    })
}

/// Value of one field element read from raw little-endian bytes.
fn read_binary(field: &Field, raw: &[u8]) -> f64 {
    match (field.ty, field.size) {
        (FieldType::Float, 4) => LittleEndian::read_f32(raw) as f64,
        (FieldType::Float, 8) => LittleEndian::read_f64(raw),
        (FieldType::Unsigned, 1) => raw[0] as f64,
        (FieldType::Unsigned, 2) => LittleEndian::read_u16(raw) as f64,
        (FieldType::Unsigned, 4) => LittleEndian::read_u32(raw) as f64,
        (FieldType::Unsigned, 8) => LittleEndian::read_u64(raw) as f64,
        (FieldType::Signed, 1) => raw[0] as i8 as f64,
        (FieldType::Signed, 2) => LittleEndian::read_i16(raw) as f64,
        (FieldType::Signed, 4) => LittleEndian::read_i32(raw) as f64,
        (FieldType::Signed, 8) => LittleEndian::read_i64(raw) as f64,
        _ => 0.0,
    }
}

/// Packed 0x00RRGGBB color stored in the field's raw bits.
fn read_packed_color(field: &Field, raw: &[u8]) -> [f32; 4] {
    let bits = if field.size >= 4 {
        LittleEndian::read_u32(raw)
    } else {
        0
    };
    unpack_rgb(bits)
}

fn unpack_rgb(bits: u32) -> [f32; 4] {
    [
        ((bits >> 16) & 0xff) as f32 / 255.0,
        ((bits >> 8) & 0xff) as f32 / 255.0,
        (bits & 0xff) as f32 / 255.0,
        1.0,
    ]
}

/// Decompress an LZF stream into exactly `expected` bytes.
pub(crate) fn lzf_decompress(input: &[u8], expected: usize) -> Result<Vec<u8>, PcdError> {
    // A back reference emits at most 264 bytes from 3 input bytes.
    if expected > input.len().saturating_mul(LZF_MAX_RATIO) {
        return Err(PcdError::CorruptCompression);
    }
    let mut out = Vec::with_capacity(expected);
    let mut i = 0;
    while i < input.len() {
        let ctrl = input[i] as usize;
        i += 1;
        if ctrl < 32 {
            let len = ctrl + 1;
            let literal = input.get(i..i + len).ok_or(PcdError::CorruptCompression)?;
            out.extend_from_slice(literal);
            i += len;
        } else {
            let mut len = ctrl >> 5;
            if len == 7 {
                len += *input.get(i).ok_or(PcdError::CorruptCompression)? as usize;
                i += 1;
            }
            let low = *input.get(i).ok_or(PcdError::CorruptCompression)? as usize;
            i += 1;
            let back = ((ctrl & 0x1f) << 8) + low + 1;
            let start = out.len().checked_sub(back).ok_or(PcdError::CorruptCompression)?;
            for k in 0..len + 2 {
                let byte = out[start + k];
                out.push(byte);
            }
        }
        if out.len() > expected {
            return Err(PcdError::CorruptCompression);
        }
    }
    if out.len() != expected {
        return Err(PcdError::CorruptCompression);
    }
    Ok(out)
}

const LZF_MAX_RATIO: usize = 88;

struct Columns {
    x: usize,
    y: usize,
    z: usize,
    rgb: Option<usize>,
    normal: Option<[usize; 3]>,
}

impl Columns {
    fn locate(fields: &[Field]) -> Result<Self, PcdError> {
        let find = |name: &str| fields.iter().position(|f| f.name == name);
        let normal = match (find("normal_x"), find("normal_y"), find("normal_z")) {
            (Some(a), Some(b), Some(c)) => Some([a, b, c]),
            _ => None,
        };
        Ok(Self {
            x: find("x").ok_or(PcdError::MissingPositions)?,
            y: find("y").ok_or(PcdError::MissingPositions)?,
            z: find("z").ok_or(PcdError::MissingPositions)?,
            rgb: find("rgb").or_else(|| find("rgba")),
            normal,
        })
    }
}

/// Parse a PCD file into a scene holding one point node.
pub fn parse_pcd(bytes: &[u8], name: &str) -> Result<SceneGraph, PcdError> {
    let header = parse_header(bytes)?;
    let columns = Columns::locate(&header.fields)?;
    let body = &bytes[header.body_offset.min(bytes.len())..];
    let n = header.points;

    let truncated = || PcdError::Truncated { points: n };

    // Points never outnumber body bytes in any encoding; LZF output is
    // checked against the header once decompressed.
    let capacity = n.min(body.len());
    let mut positions = Vec::with_capacity(capacity);
    let mut colors = columns.rgb.map(|_| Vec::with_capacity(capacity));
    let mut normals = columns.normal.map(|_| Vec::with_capacity(capacity));

    match header.data.as_str() {
        "ascii" => {
            let text = String::from_utf8_lossy(body);
            let offsets: Vec<usize> = header
                .fields
                .iter()
                .scan(0_usize, |acc, f| {
                    let start = *acc;
                    *acc = acc.saturating_add(f.count);
                    Some(start)
                })
                .collect();
            for line in text.lines().filter(|l| !l.trim().is_empty()).take(n) {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                let value = |field: usize| -> Result<f64, PcdError> {
                    let token = tokens
                        .get(offsets[field])
                        .ok_or(PcdError::Truncated { points: n })?;
                    token
                        .parse::<f64>()
                        .map_err(|_| PcdError::InvalidValue(token.to_string()))
                };
                positions.push([
                    value(columns.x)? as f32,
                    value(columns.y)? as f32,
                    value(columns.z)? as f32,
                ]);
                if let (Some(out), Some(c)) = (colors.as_mut(), columns.rgb) {
                    let token = tokens
                        .get(offsets[c])
                        .ok_or(PcdError::Truncated { points: n })?;
                    let bits = match header.fields[c].ty {
                        FieldType::Float => token
                            .parse::<f32>()
                            .map(f32::to_bits)
                            .map_err(|_| PcdError::InvalidValue(token.to_string()))?,
                        _ => token
                            .parse::<u32>()
                            .map_err(|_| PcdError::InvalidValue(token.to_string()))?,
                    };
                    out.push(unpack_rgb(bits));
                }
                if let (Some(out), Some([a, b, c])) = (normals.as_mut(), columns.normal) {
                    out.push([value(a)? as f32, value(b)? as f32, value(c)? as f32]);
                }
            }
            if positions.len() < n {
                return Err(truncated());
            }
        }
        "binary" => {
            let row: usize = header.fields.iter().map(Field::byte_len).sum();
            let offsets: Vec<usize> = header
                .fields
                .iter()
                .scan(0, |acc, f| {
                    let start = *acc;
                    *acc += f.byte_len();
                    Some(start)
                })
                .collect();
            if row.checked_mul(n).map_or(true, |len| body.len() < len) {
                return Err(truncated());
            }
            for point in body.chunks_exact(row).take(n) {
                let at = |f: usize| &point[offsets[f]..offsets[f] + header.fields[f].size];
                positions.push([
                    read_binary(&header.fields[columns.x], at(columns.x)) as f32,
                    read_binary(&header.fields[columns.y], at(columns.y)) as f32,
                    read_binary(&header.fields[columns.z], at(columns.z)) as f32,
                ]);
                if let (Some(out), Some(c)) = (colors.as_mut(), columns.rgb) {
                    out.push(read_packed_color(&header.fields[c], at(c)));
                }
                if let (Some(out), Some([a, b, c])) = (normals.as_mut(), columns.normal) {
                    out.push([
                        read_binary(&header.fields[a], at(a)) as f32,
                        read_binary(&header.fields[b], at(b)) as f32,
                        read_binary(&header.fields[c], at(c)) as f32,
                    ]);
                }
            }
        }
        "binary_compressed" => {
            if body.len() < 8 {
                return Err(truncated());
            }
            let compressed = LittleEndian::read_u32(&body[0..4]) as usize;
            let uncompressed = LittleEndian::read_u32(&body[4..8]) as usize;
            let payload = body
                .get(8..8 + compressed)
                .ok_or_else(truncated)?;
            let data = lzf_decompress(payload, uncompressed)?;

            // Decompressed data is laid out field by field.
            let mut starts = Vec::with_capacity(header.fields.len());
            let mut acc = 0_usize;
            for field in &header.fields {
                starts.push(acc);
                acc = field
                    .byte_len()
                    .checked_mul(n)
                    .and_then(|len| acc.checked_add(len))
                    .ok_or_else(truncated)?;
            }
            if data.len() < acc {
                return Err(truncated());
            }
            let at = |f: usize, i: usize| {
                let field = &header.fields[f];
                let start = starts[f] + i * field.byte_len();
                &data[start..start + field.size]
            };
            for i in 0..n {
                positions.push([
                    read_binary(&header.fields[columns.x], at(columns.x, i)) as f32,
                    read_binary(&header.fields[columns.y], at(columns.y, i)) as f32,
                    read_binary(&header.fields[columns.z], at(columns.z, i)) as f32,
                ]);
                if let (Some(out), Some(c)) = (colors.as_mut(), columns.rgb) {
                    out.push(read_packed_color(&header.fields[c], at(c, i)));
                }
                if let (Some(out), Some([a, b, c])) = (normals.as_mut(), columns.normal) {
                    out.push([
                        read_binary(&header.fields[a], at(a, i)) as f32,
                        read_binary(&header.fields[b], at(b, i)) as f32,
                        read_binary(&header.fields[c], at(c, i)) as f32,
                    ]);
                }
            }
        }
        other => return Err(PcdError::UnsupportedData(other.to_string())),
    }

    let geometry = Geometry {
        positions,
        normals,
        colors,
        ..Default::default()
    };
    let mut graph = SceneGraph::new(name);
    graph.add_node(
        None,
        Node::new(NodeKind::Points(MeshData::new(geometry, None))).named("points"),
    );
    Ok(graph)
}
