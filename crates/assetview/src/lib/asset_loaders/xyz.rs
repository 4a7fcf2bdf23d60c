//! Plain-text `.xyz` point lists: `x y z [r g b]` per line.

use thiserror::Error;

use crate::lib::scene::Geometry;

#[derive(Debug, Error)]
pub enum XyzError {
    #[error("XYZ: payload is not valid UTF-8")]
    NotUtf8,

    #[error("XYZ: line {line}: expected at least 3 numbers")]
    TooFewValues { line: usize },

    #[error("XYZ: line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },
}

/// Parse a point list. Colors are kept only when every point has one, and
/// are rescaled from 0..255 when any channel exceeds 1.
pub fn parse_xyz(bytes: &[u8]) -> Result<Geometry, XyzError> {
    let text = std::str::from_utf8(bytes).map_err(|_| XyzError::NotUtf8)?;
    let mut positions = Vec::new();
    let mut colors = Vec::new();
    let mut every_point_colored = true;

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let values = line
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<f32>().map_err(|_| XyzError::InvalidNumber {
                    line: i + 1,
                    token: t.to_string(),
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;
        if values.len() < 3 {
            return Err(XyzError::TooFewValues { line: i + 1 });
        }
        positions.push([values[0], values[1], values[2]]);
        if values.len() >= 6 {
            colors.push([values[3], values[4], values[5], 1.0]);
        } else {
            every_point_colored = false;
        }
    }

    let colors = (every_point_colored && !colors.is_empty()).then(|| {
        let scale = if colors.iter().flatten().any(|c| *c > 1.0) {
            255.0
        } else {
            1.0
        };
        colors
            .into_iter()
            .map(|[r, g, b, a]| [r / scale, g / scale, b / scale, a])
            .collect()
    });

    Ok(Geometry {
        positions,
        colors,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_with_byte_colors() {
        let geometry = parse_xyz(b"# scan\n0 0 0 255 0 0\n1 2 3 0 255 0\n\n").unwrap();
        assert_eq!(geometry.positions, vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]]);
        assert_eq!(geometry.colors.unwrap()[1], [0.0, 1.0, 0.0, 1.0]);
        assert!(geometry.indices.is_none());
    }

    #[test]
    fn test_partial_colors_dropped() {
        let geometry = parse_xyz(b"0 0 0 0.5 0.5 0.5\n1 1 1\n").unwrap();
        assert!(geometry.colors.is_none());
    }

    #[test]
    fn test_comma_separated() {
        let geometry = parse_xyz(b"1.5,2.5,3.5\n").unwrap();
        assert_eq!(geometry.positions, vec![[1.5, 2.5, 3.5]]);
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse_xyz(b"0 0 0\n1 x 1\n").unwrap_err();
        assert_eq!(err.to_string(), "XYZ: line 2: invalid number 'x'");
        assert!(matches!(
            parse_xyz(b"1 2\n"),
            Err(XyzError::TooFewValues { line: 1 })
        ));
        assert!(matches!(parse_xyz(&[0xff, 0xfe]), Err(XyzError::NotUtf8)));
    }
}
