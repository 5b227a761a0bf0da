//! STL Loading
//!
//! Binary STL is detected by a 5-byte header that is not `"solid"`;
//! anything else parses as ASCII. STL carries no texture coordinates, so
//! vertices get zero UVs and a white color; facet normals are kept.

use std::collections::HashMap;

use glam::{Vec2, Vec3, Vec4};

use crate::assets::mesh::{MeshData, Vertex};
use crate::errors::{KilnError, Result};

/// Parses an STL file (binary or ASCII) into a single mesh.
pub fn parse_stl(bytes: &[u8], debug_name: &str) -> Result<Vec<MeshData>> {
    let mesh = if bytes.len() >= 5 && &bytes[..5] != b"solid" {
        parse_binary(bytes, debug_name)?
    } else {
        let text = std::str::from_utf8(bytes).map_err(|err| {
            KilnError::MeshParse(format!("{debug_name}: not valid ASCII STL: {err}"))
        })?;
        parse_ascii(text, debug_name)?
    };
    Ok(vec![mesh])
}

fn parse_binary(bytes: &[u8], debug_name: &str) -> Result<MeshData> {
    const HEADER: usize = 80;
    const COUNT: usize = 4;
    const TRIANGLE: usize = 50;

    if bytes.len() < HEADER + COUNT {
        return Err(KilnError::MeshParse(format!(
            "{debug_name}: binary STL truncated"
        )));
    }
    let triangle_count =
        u32::from_le_bytes(bytes[HEADER..HEADER + COUNT].try_into().unwrap()) as usize;
    let expected = HEADER + COUNT + triangle_count * TRIANGLE;
    if bytes.len() < expected {
        return Err(KilnError::MeshParse(format!(
            "{debug_name}: binary STL declares {triangle_count} triangles but is too short"
        )));
    }

    let mut builder = StlBuilder::new(debug_name);
    for triangle in 0..triangle_count {
        let base = HEADER + COUNT + triangle * TRIANGLE;
        let normal = read_vec3(bytes, base);
        let a = read_vec3(bytes, base + 12);
        let b = read_vec3(bytes, base + 24);
        let c = read_vec3(bytes, base + 36);
        builder.push_triangle(normal, a, b, c);
    }
    Ok(builder.finish())
}

fn parse_ascii(text: &str, debug_name: &str) -> Result<MeshData> {
    let mut builder = StlBuilder::new(debug_name);
    let mut normal = Vec3::ZERO;
    let mut corners: Vec<Vec3> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("facet normal") {
            normal = parse_triplet(rest).ok_or_else(|| {
                KilnError::MeshParse(format!("{debug_name}: malformed facet normal"))
            })?;
        } else if let Some(rest) = line.strip_prefix("vertex") {
            corners.push(parse_triplet(rest).ok_or_else(|| {
                KilnError::MeshParse(format!("{debug_name}: malformed vertex"))
            })?);
        } else if line.starts_with("endfacet") {
            if corners.len() != 3 {
                return Err(KilnError::MeshParse(format!(
                    "{debug_name}: facet with {} vertices",
                    corners.len()
                )));
            }
            builder.push_triangle(normal, corners[0], corners[1], corners[2]);
            corners.clear();
        }
    }

    let mesh = builder.finish();
    if mesh.vertices.is_empty() {
        return Err(KilnError::MeshParse(format!(
            "{debug_name}: no geometry found"
        )));
    }
    Ok(mesh)
}

struct StlBuilder {
    mesh: MeshData,
    dedup: HashMap<([u32; 3], [u32; 3]), u32>,
}

impl StlBuilder {
    fn new(debug_name: &str) -> Self {
        Self {
            mesh: MeshData {
                debug_name: debug_name.to_string(),
                ..MeshData::default()
            },
            dedup: HashMap::new(),
        }
    }

    fn push_triangle(&mut self, normal: Vec3, a: Vec3, b: Vec3, c: Vec3) {
        // A zero facet normal is legal in STL; derive one from the winding.
        let normal = if normal.length_squared() > 0.0 {
            normal
        } else {
            (b - a).cross(c - a).normalize_or_zero()
        };
        for position in [a, b, c] {
            let index = self.vertex_index(position, normal);
            self.mesh.indices.push(index);
        }
    }

    fn vertex_index(&mut self, position: Vec3, normal: Vec3) -> u32 {
        let key = (
            position.to_array().map(f32::to_bits),
            normal.to_array().map(f32::to_bits),
        );
        if let Some(&index) = self.dedup.get(&key) {
            return index;
        }
        let index = self.mesh.vertices.len() as u32;
        self.mesh
            .vertices
            .push(Vertex::new(position, normal, Vec2::ZERO, Vec4::ONE));
        self.dedup.insert(key, index);
        index
    }

    fn finish(self) -> MeshData {
        self.mesh
    }
}

fn read_vec3(bytes: &[u8], offset: usize) -> Vec3 {
    let component = |i: usize| {
        f32::from_le_bytes(bytes[offset + i * 4..offset + i * 4 + 4].try_into().unwrap())
    };
    Vec3::new(component(0), component(1), component(2))
}

fn parse_triplet(text: &str) -> Option<Vec3> {
    let mut tokens = text.split_whitespace();
    let x: f32 = tokens.next()?.parse().ok()?;
    let y: f32 = tokens.next()?.parse().ok()?;
    let z: f32 = tokens.next()?.parse().ok()?;
    Some(Vec3::new(x, y, z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_stl_parses_one_facet() {
        let source = "solid tri\n facet normal 0 0 1\n  outer loop\n   vertex 0 0 0\n   vertex 1 0 0\n   vertex 0 1 0\n  endloop\n endfacet\nendsolid tri\n";
        let meshes = parse_stl(source.as_bytes(), "tri").unwrap();
        assert_eq!(meshes[0].indices.len(), 3);
        assert_eq!(meshes[0].vertices[0].normal, Vec3::Z);
    }

    #[test]
    fn binary_stl_parses_declared_triangles() {
        let mut bytes = vec![0u8; 80];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        for value in [
            0.0f32, 0.0, 1.0, // normal
            0.0, 0.0, 0.0, // a
            1.0, 0.0, 0.0, // b
            0.0, 1.0, 0.0, // c
        ] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let meshes = parse_stl(&bytes, "tri").unwrap();
        assert_eq!(meshes[0].indices.len(), 3);
        assert_eq!(meshes[0].vertices.len(), 3);
    }

    #[test]
    fn shared_corners_are_deduplicated() {
        let source = "solid quad\n facet normal 0 0 1\n  outer loop\n   vertex 0 0 0\n   vertex 1 0 0\n   vertex 1 1 0\n  endloop\n endfacet\n facet normal 0 0 1\n  outer loop\n   vertex 0 0 0\n   vertex 1 1 0\n   vertex 0 1 0\n  endloop\n endfacet\nendsolid quad\n";
        let meshes = parse_stl(source.as_bytes(), "quad").unwrap();
        assert_eq!(meshes[0].vertices.len(), 4);
        assert_eq!(meshes[0].indices.len(), 6);
    }
}
