//! Stanford PLY reader.
//!
//! Supports `ascii`, `binary_little_endian` and `binary_big_endian` bodies.
//! The `vertex` element provides positions plus optional normals, colors and
//! texture coordinates. A `face` element, when declared, becomes a triangle
//! index buffer (polygons are fan-triangulated). Whether the result is a mesh
//! or a point cloud is decided by the caller from that index buffer.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use crate::lib::scene::Geometry;

#[derive(Debug, Error)]
pub enum PlyError {
    #[error("PLY: missing 'ply' magic line")]
    MissingMagic,

    #[error("PLY: header is not terminated by 'end_header'")]
    UnterminatedHeader,

    #[error("PLY: unsupported format '{0}'")]
    UnsupportedFormat(String),

    #[error("PLY: malformed header line '{0}'")]
    MalformedHeader(String),

    #[error("PLY: unknown property type '{0}'")]
    UnknownType(String),

    #[error("PLY: vertex element has no x/y/z properties")]
    MissingPositions,

    #[error("PLY: unexpected end of data in element '{0}'")]
    Truncated(String),

    #[error("PLY: invalid number '{0}'")]
    InvalidNumber(String),

    #[error("PLY: face references vertex {index} but only {count} vertices exist")]
    IndexOutOfRange { index: u32, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Result<Self, PlyError> {
        Ok(match name {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            other => return Err(PlyError::UnknownType(other.to_string())),
        })
    }

    /// Normalizing divisor for color channels stored as integers.
    fn color_scale(&self) -> f64 {
        match self {
            Scalar::U8 | Scalar::I8 => 255.0,
            Scalar::U16 | Scalar::I16 => 65535.0,
            Scalar::U32 | Scalar::I32 => u32::MAX as f64,
            Scalar::F32 | Scalar::F64 => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { name: String, count: Scalar, item: Scalar },
}

impl Property {
    fn name(&self) -> &str {
        match self {
            Property::Scalar { name, .. } | Property::List { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
    body_offset: usize,
}

fn parse_header(bytes: &[u8]) -> Result<Header, PlyError> {
    let mut lines = Vec::new();
    let mut offset = 0;
    loop {
        let rest = bytes.get(offset..).ok_or(PlyError::UnterminatedHeader)?;
        let end = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(PlyError::UnterminatedHeader)?;
        let line = String::from_utf8_lossy(&rest[..end]).trim().to_string();
        offset += end + 1;
        if line == "end_header" {
            break;
        }
        lines.push(line);
    }

    let mut iter = lines.into_iter();
    if iter.next().as_deref() != Some("ply") {
        return Err(PlyError::MissingMagic);
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in iter {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            ["comment", ..] | ["obj_info", ..] => {}
            ["format", format, _version] => {
                encoding = Some(match *format {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" => Encoding::BinaryLittleEndian,
                    "binary_big_endian" => Encoding::BinaryBigEndian,
                    other => return Err(PlyError::UnsupportedFormat(other.to_string())),
                });
            }
            ["element", name, count] => {
                let count = count
                    .parse()
                    .map_err(|_| PlyError::MalformedHeader(line.clone()))?;
                elements.push(Element {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| PlyError::MalformedHeader(line.clone()))?;
                element.properties.push(Property::List {
                    name: name.to_string(),
                    count: Scalar::parse(count)?,
                    item: Scalar::parse(item)?,
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| PlyError::MalformedHeader(line.clone()))?;
                element.properties.push(Property::Scalar {
                    name: name.to_string(),
                    ty: Scalar::parse(ty)?,
                });
            }
            _ => return Err(PlyError::MalformedHeader(line.clone())),
        }
    }

    Ok(Header {
        encoding: encoding.ok_or_else(|| PlyError::MalformedHeader("missing format".into()))?,
        elements,
        body_offset: offset,
    })
}

/// Reads scalars from either body encoding.
enum Body<'a> {
    Ascii(std::str::SplitAsciiWhitespace<'a>),
    Binary(Cursor<&'a [u8]>, Encoding),
}

impl Body<'_> {
    fn read(&mut self, ty: Scalar, element: &str) -> Result<f64, PlyError> {
        match self {
            Body::Ascii(tokens) => {
                let token = tokens
                    .next()
                    .ok_or_else(|| PlyError::Truncated(element.to_string()))?;
                token
                    .parse::<f64>()
                    .map_err(|_| PlyError::InvalidNumber(token.to_string()))
            }
            Body::Binary(cursor, encoding) => {
                let truncated = |_: std::io::Error| PlyError::Truncated(element.to_string());
                let value = match (*encoding, ty) {
                    (_, Scalar::I8) => cursor.read_i8().map(f64::from),
                    (_, Scalar::U8) => cursor.read_u8().map(f64::from),
                    (Encoding::BinaryBigEndian, Scalar::I16) => {
                        cursor.read_i16::<BigEndian>().map(f64::from)
                    }
                    (Encoding::BinaryBigEndian, Scalar::U16) => {
                        cursor.read_u16::<BigEndian>().map(f64::from)
                    }
                    (Encoding::BinaryBigEndian, Scalar::I32) => {
                        cursor.read_i32::<BigEndian>().map(f64::from)
                    }
                    (Encoding::BinaryBigEndian, Scalar::U32) => {
                        cursor.read_u32::<BigEndian>().map(f64::from)
                    }
                    (Encoding::BinaryBigEndian, Scalar::F32) => {
                        cursor.read_f32::<BigEndian>().map(f64::from)
                    }
                    (Encoding::BinaryBigEndian, Scalar::F64) => cursor.read_f64::<BigEndian>(),
                    (_, Scalar::I16) => cursor.read_i16::<LittleEndian>().map(f64::from),
                    (_, Scalar::U16) => cursor.read_u16::<LittleEndian>().map(f64::from),
                    (_, Scalar::I32) => cursor.read_i32::<LittleEndian>().map(f64::from),
                    (_, Scalar::U32) => cursor.read_u32::<LittleEndian>().map(f64::from),
                    (_, Scalar::F32) => cursor.read_f32::<LittleEndian>().map(f64::from),
                    (_, Scalar::F64) => cursor.read_f64::<LittleEndian>(),
                };
                value.map_err(truncated)
            }
        }
    }
}

/// Column positions of the vertex properties we understand.
#[derive(Default)]
struct VertexLayout {
    position: [Option<usize>; 3],
    normal: [Option<usize>; 3],
    color: [Option<usize>; 4],
    uv: [Option<usize>; 2],
    color_scale: f64,
}

impl VertexLayout {
    fn from_element(element: &Element) -> Self {
        let mut layout = VertexLayout {
            color_scale: 1.0,
            ..Default::default()
        };
        for (i, property) in element.properties.iter().enumerate() {
            let Property::Scalar { name, ty } = property else {
                continue;
            };
            match name.as_str() {
                "x" => layout.position[0] = Some(i),
                "y" => layout.position[1] = Some(i),
                "z" => layout.position[2] = Some(i),
                "nx" => layout.normal[0] = Some(i),
                "ny" => layout.normal[1] = Some(i),
                "nz" => layout.normal[2] = Some(i),
                "red" | "r" | "diffuse_red" => {
                    layout.color[0] = Some(i);
                    layout.color_scale = ty.color_scale();
                }
                "green" | "g" | "diffuse_green" => layout.color[1] = Some(i),
                "blue" | "b" | "diffuse_blue" => layout.color[2] = Some(i),
                "alpha" | "a" | "diffuse_alpha" => layout.color[3] = Some(i),
                "s" | "u" | "texture_u" => layout.uv[0] = Some(i),
                "t" | "v" | "texture_v" => layout.uv[1] = Some(i),
                _ => {}
            }
        }
        layout
    }

    fn has_all<const N: usize>(slots: &[Option<usize>; N], required: usize) -> bool {
        slots.iter().take(required).all(Option::is_some)
    }
}

/// Parse a PLY file into a geometry.
///
/// `indices` is `Some` whenever the file declares a `face` element, even one
/// with zero faces.
pub fn parse_ply(bytes: &[u8]) -> Result<Geometry, PlyError> {
    let header = parse_header(bytes)?;
    let body_bytes = &bytes[header.body_offset.min(bytes.len())..];
    let text;
    let mut body = match header.encoding {
        Encoding::Ascii => {
            text = String::from_utf8_lossy(body_bytes);
            Body::Ascii(text.split_ascii_whitespace())
        }
        encoding => Body::Binary(Cursor::new(body_bytes), encoding),
    };

    let mut geometry = Geometry::default();
    let mut normals = Vec::new();
    let mut colors = Vec::new();
    let mut uvs = Vec::new();
    let mut indices: Option<Vec<u32>> = None;
    let mut saw_vertices = false;

    for element in &header.elements {
        if element.properties.is_empty() {
            continue;
        }
        match element.name.as_str() {
            "vertex" => {
                saw_vertices = true;
                let layout = VertexLayout::from_element(element);
                if !VertexLayout::has_all(&layout.position, 3) {
                    return Err(PlyError::MissingPositions);
                }
                let has_normals = VertexLayout::has_all(&layout.normal, 3);
                let has_colors = VertexLayout::has_all(&layout.color, 3);
                let has_uvs = VertexLayout::has_all(&layout.uv, 2);
                // Every vertex takes at least one body byte.
                geometry.positions.reserve(element.count.min(body_bytes.len()));

                let mut row = vec![0.0_f64; element.properties.len()];
                for _ in 0..element.count {
                    for (i, property) in element.properties.iter().enumerate() {
                        row[i] = match property {
                            Property::Scalar { ty, .. } => body.read(*ty, &element.name)?,
                            Property::List { .. } => {
                                read_property(&mut body, property, &element.name)?;
                                0.0
                            }
                        };
                    }
                    let at = |slot: Option<usize>| slot.map_or(0.0, |i| row[i]) as f32;
                    geometry.positions.push([
                        at(layout.position[0]),
                        at(layout.position[1]),
                        at(layout.position[2]),
                    ]);
                    if has_normals {
                        normals.push([
                            at(layout.normal[0]),
                            at(layout.normal[1]),
                            at(layout.normal[2]),
                        ]);
                    }
                    if has_colors {
                        let scale = layout.color_scale as f32;
                        let alpha = layout.color[3].map_or(1.0, |i| row[i] as f32 / scale);
                        colors.push([
                            at(layout.color[0]) / scale,
                            at(layout.color[1]) / scale,
                            at(layout.color[2]) / scale,
                            alpha,
                        ]);
                    }
                    if has_uvs {
                        uvs.push([at(layout.uv[0]), 1.0 - at(layout.uv[1])]);
                    }
                }
            }
            "face" => {
                let list = element
                    .properties
                    .iter()
                    .position(|p| matches!(p.name(), "vertex_indices" | "vertex_index"));
                let faces = indices.get_or_insert_with(Vec::new);
                for _ in 0..element.count {
                    for (i, property) in element.properties.iter().enumerate() {
                        let values = read_property(&mut body, property, &element.name)?;
                        if Some(i) == list && values.len() >= 3 {
                            let first = values[0] as u32;
                            for pair in values[1..].windows(2) {
                                faces.extend_from_slice(&[first, pair[0] as u32, pair[1] as u32]);
                            }
                        }
                    }
                }
            }
            _ => {
                for _ in 0..element.count {
                    for property in &element.properties {
                        read_property(&mut body, property, &element.name)?;
                    }
                }
            }
        }
    }

    if !saw_vertices {
        return Err(PlyError::MissingPositions);
    }
    if let Some(faces) = &indices {
        let count = geometry.positions.len();
        if let Some(bad) = faces.iter().find(|i| **i as usize >= count) {
            return Err(PlyError::IndexOutOfRange { index: *bad, count });
        }
    }

    geometry.normals = (!normals.is_empty()).then_some(normals);
    geometry.colors = (!colors.is_empty()).then_some(colors);
    geometry.uvs = (!uvs.is_empty()).then_some(uvs);
    geometry.indices = indices;
    Ok(geometry)
}

fn read_property(body: &mut Body<'_>, property: &Property, element: &str) -> Result<Vec<f64>, PlyError> {
    match property {
        Property::Scalar { ty, .. } => Ok(vec![body.read(*ty, element)?]),
        Property::List { count, item, .. } => {
            let n = body.read(*count, element)?;
            if !(0.0..=u32::MAX as f64).contains(&n) {
                return Err(PlyError::InvalidNumber(n.to_string()));
            }
            let mut values = Vec::new();
            for _ in 0..n as usize {
                values.push(body.read(*item, element)?);
            }
            Ok(values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    const ASCII_MESH: &str = "ply
format ascii 1.0
comment made by hand
element vertex 4
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
element face 1
property list uchar int vertex_indices
end_header
0 0 0 255 0 0
1 0 0 0 255 0
1 1 0 0 0 255
0 1 0 255 255 255
4 0 1 2 3
";

    #[test]
    fn test_ascii_quad_is_fan_triangulated() {
        let geometry = parse_ply(ASCII_MESH.as_bytes()).unwrap();
        assert_eq!(geometry.positions.len(), 4);
        assert_eq!(geometry.indices.as_deref(), Some(&[0, 1, 2, 0, 2, 3][..]));
        let colors = geometry.colors.unwrap();
        assert!((colors[0][0] - 1.0).abs() < 1e-6);
        assert!((colors[1][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_face_element_yields_empty_indices() {
        let src = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nelement face 0\nproperty list uchar int vertex_indices\nend_header\n0 0 0\n1 1 1\n";
        let geometry = parse_ply(src.as_bytes()).unwrap();
        assert_eq!(geometry.indices, Some(vec![]));
        assert!(!geometry.has_triangle_indices());
    }

    #[test]
    fn test_binary_little_endian_points() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nproperty double nx\nproperty double ny\nproperty double nz\nend_header\n".to_vec();
        for p in [[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]] {
            for c in p {
                bytes.write_f32::<LittleEndian>(c).unwrap();
            }
            for n in [0.0_f64, 0.0, 1.0] {
                bytes.write_f64::<LittleEndian>(n).unwrap();
            }
        }
        let geometry = parse_ply(&bytes).unwrap();
        assert_eq!(geometry.positions, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(geometry.normals.unwrap()[1], [0.0, 0.0, 1.0]);
        assert!(geometry.indices.is_none());
    }

    #[test]
    fn test_binary_big_endian_faces() {
        let mut bytes = b"ply\nformat binary_big_endian 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar uint vertex_indices\nend_header\n".to_vec();
        for p in [[0.0_f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for c in p {
                bytes.write_f32::<BigEndian>(c).unwrap();
            }
        }
        bytes.write_u8(3).unwrap();
        for i in [0_u32, 1, 2] {
            bytes.write_u32::<BigEndian>(i).unwrap();
        }
        let geometry = parse_ply(&bytes).unwrap();
        assert_eq!(geometry.indices.as_deref(), Some(&[0, 1, 2][..]));
        assert_eq!(geometry.positions[1], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_errors_are_descriptive() {
        assert!(matches!(parse_ply(b"solid cube\n"), Err(PlyError::UnterminatedHeader)));
        assert!(matches!(
            parse_ply(b"nope\nformat ascii 1.0\nend_header\n"),
            Err(PlyError::MissingMagic)
        ));
        let truncated = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n";
        let err = parse_ply(truncated.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "PLY: unexpected end of data in element 'vertex'");
    }

    #[test]
    fn test_huge_vertex_count_is_truncated_not_allocated() {
        let src = "ply\nformat ascii 1.0\nelement vertex 18446744073709551615\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n";
        assert!(matches!(parse_ply(src.as_bytes()), Err(PlyError::Truncated(e)) if e == "vertex"));

        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 100000000000\nproperty float x\nproperty float y\nproperty float z\nend_header\n".to_vec();
        bytes.extend_from_slice(&[0; 12]);
        assert!(matches!(parse_ply(&bytes), Err(PlyError::Truncated(_))));
    }

    #[test]
    fn test_huge_list_length_is_truncated() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uint uint vertex_indices\nend_header\n".to_vec();
        bytes.extend_from_slice(&[0; 36]);
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        assert!(matches!(parse_ply(&bytes), Err(PlyError::Truncated(e)) if e == "face"));
    }

    #[test]
    fn test_element_without_properties_is_skipped() {
        let src = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nelement marker 18446744073709551615\nend_header\n1 2 3\n";
        let geometry = parse_ply(src.as_bytes()).unwrap();
        assert_eq!(geometry.positions, vec![[1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_negative_list_length_is_rejected() {
        let src = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list int int vertex_indices\nend_header\n0 0 0\n1 0 0\n0 1 0\n-3 0 1 2\n";
        assert!(matches!(parse_ply(src.as_bytes()), Err(PlyError::InvalidNumber(_))));
    }
}
