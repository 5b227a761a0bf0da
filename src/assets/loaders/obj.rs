//! Wavefront OBJ Loading
//!
//! ASCII parser for the `v`/`vn`/`vt`/`f` subset with `v[/vt][/vn]` face
//! syntax. Polygons with more than three corners are fan-triangulated.
//! Objects (`o`) split the file into separate meshes.

use std::collections::HashMap;

use glam::{Vec2, Vec3, Vec4};

use crate::assets::mesh::{MeshData, Vertex};
use crate::errors::{KilnError, Result};

#[derive(Default)]
struct ObjBuilder {
    name: String,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    dedup: HashMap<(usize, usize, usize), u32>,
    has_normals: bool,
}

impl ObjBuilder {
    fn finish(mut self) -> Option<MeshData> {
        if self.vertices.is_empty() {
            return None;
        }
        let mut mesh = MeshData {
            debug_name: std::mem::take(&mut self.name),
            vertices: std::mem::take(&mut self.vertices),
            indices: std::mem::take(&mut self.indices),
        };
        if !self.has_normals {
            mesh.compute_normals();
        }
        Some(mesh)
    }
}

/// Parses OBJ text into one mesh per object.
pub fn parse_obj(source: &str, debug_name: &str) -> Result<Vec<MeshData>> {
    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut tex_coords: Vec<Vec2> = Vec::new();

    let mut meshes = Vec::new();
    let mut builder = ObjBuilder {
        name: debug_name.to_string(),
        ..ObjBuilder::default()
    };

    for (line_number, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let keyword = tokens.next().unwrap_or_default();
        let fail = |message: String| {
            KilnError::MeshParse(format!(
                "{debug_name}:{}: {message}",
                line_number + 1
            ))
        };

        match keyword {
            "v" => positions.push(parse_vec3(&mut tokens).ok_or_else(|| {
                fail("malformed vertex position".to_string())
            })?),
            "vn" => normals.push(parse_vec3(&mut tokens).ok_or_else(|| {
                fail("malformed vertex normal".to_string())
            })?),
            "vt" => {
                let u = parse_f32(tokens.next())
                    .ok_or_else(|| fail("malformed texture coordinate".to_string()))?;
                let v = parse_f32(tokens.next()).unwrap_or(0.0);
                tex_coords.push(Vec2::new(u, v));
            }
            "o" => {
                if let Some(mesh) = std::mem::take(&mut builder).finish() {
                    meshes.push(mesh);
                }
                builder.name = tokens
                    .next()
                    .map_or_else(|| debug_name.to_string(), str::to_string);
            }
            "f" => {
                let corners: Vec<&str> = tokens.collect();
                if corners.len() < 3 {
                    return Err(fail(format!(
                        "face with {} corners",
                        corners.len()
                    )));
                }
                let mut face_indices = Vec::with_capacity(corners.len());
                for corner in corners {
                    face_indices.push(resolve_corner(
                        corner,
                        &positions,
                        &tex_coords,
                        &normals,
                        &mut builder,
                    )
                    .ok_or_else(|| fail(format!("malformed face corner \"{corner}\"")))?);
                }
                // Fan triangulation: (0, i, i+1) for every interior corner.
                for i in 1..face_indices.len() - 1 {
                    builder.indices.push(face_indices[0]);
                    builder.indices.push(face_indices[i]);
                    builder.indices.push(face_indices[i + 1]);
                }
            }
            // Materials, groups and smoothing hints are ignored.
            _ => {}
        }
    }

    if let Some(mesh) = builder.finish() {
        meshes.push(mesh);
    }

    if meshes.is_empty() {
        return Err(KilnError::MeshParse(format!(
            "{debug_name}: no geometry found"
        )));
    }
    Ok(meshes)
}

fn parse_f32(token: Option<&str>) -> Option<f32> {
    token?.parse().ok()
}

fn parse_vec3<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Option<Vec3> {
    let x = parse_f32(tokens.next())?;
    let y = parse_f32(tokens.next())?;
    let z = parse_f32(tokens.next())?;
    Some(Vec3::new(x, y, z))
}

/// Resolves one `v[/vt][/vn]` corner into a deduplicated vertex index.
fn resolve_corner(
    corner: &str,
    positions: &[Vec3],
    tex_coords: &[Vec2],
    normals: &[Vec3],
    builder: &mut ObjBuilder,
) -> Option<u32> {
    let mut parts = corner.split('/');
    let position_index = resolve_index(parts.next()?, positions.len())?;
    let tex_index = match parts.next() {
        Some("") | None => usize::MAX,
        Some(token) => resolve_index(token, tex_coords.len())?,
    };
    let normal_index = match parts.next() {
        Some("") | None => usize::MAX,
        Some(token) => resolve_index(token, normals.len())?,
    };

    let key = (position_index, tex_index, normal_index);
    if let Some(&index) = builder.dedup.get(&key) {
        return Some(index);
    }

    let normal = if normal_index != usize::MAX {
        builder.has_normals = true;
        normals[normal_index]
    } else {
        Vec3::ZERO
    };
    let tex_coord = if tex_index != usize::MAX {
        tex_coords[tex_index]
    } else {
        Vec2::ZERO
    };

    let index = builder.vertices.len() as u32;
    builder.vertices.push(Vertex::new(
        positions[position_index],
        normal,
        tex_coord,
        Vec4::ONE,
    ));
    builder.dedup.insert(key, index);
    Some(index)
}

/// OBJ indices are 1-based; negative values count back from the end.
fn resolve_index(token: &str, len: usize) -> Option<usize> {
    let value: i64 = token.parse().ok()?;
    let resolved = if value > 0 {
        value as usize - 1
    } else if value < 0 {
        len.checked_sub(value.unsigned_abs() as usize)?
    } else {
        return None;
    };
    (resolved < len).then_some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_face_is_fan_triangulated() {
        let source = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let meshes = parse_obj(source, "quad").unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn corner_variants_parse() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 3//1\n";
        let meshes = parse_obj(source, "tri").unwrap();
        assert_eq!(meshes[0].indices.len(), 3);
        assert_eq!(meshes[0].vertices[0].normal, glam::Vec3::Z);
    }

    #[test]
    fn negative_indices_resolve_from_end() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let meshes = parse_obj(source, "tri").unwrap();
        assert_eq!(meshes[0].indices, vec![0, 1, 2]);
    }

    #[test]
    fn missing_normals_are_computed() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let meshes = parse_obj(source, "tri").unwrap();
        let normal = meshes[0].vertices[0].normal;
        assert!((normal.z - 1.0).abs() < 1e-5);
    }
}
