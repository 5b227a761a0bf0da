//! Mesh Data & Primitives
//!
//! CPU-side mesh payloads with the engine's fixed vertex layout, plus the
//! built-in cube and sphere primitives that prime the resource cache.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Fixed vertex layout used by every mesh pipeline in the core.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub color: Vec4,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2, color: Vec4) -> Self {
        Self {
            position,
            normal,
            tex_coord,
            color,
        }
    }
}

/// Triangulated mesh payload. Valid iff it has at least one vertex.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub debug_name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty()
    }

    /// Axis-aligned bounds as `(min, max)`, or `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = self.vertices.first()?.position;
        let mut min = first;
        let mut max = first;
        for vertex in &self.vertices[1..] {
            min = min.min(vertex.position);
            max = max.max(vertex.position);
        }
        Some((min, max))
    }

    /// Recomputes per-vertex normals by area-weighted accumulation over the
    /// index list. Existing normals are overwritten.
    pub fn compute_normals(&mut self) {
        let mut accumulated = vec![Vec3::ZERO; self.vertices.len()];
        for triangle in self.indices.chunks_exact(3) {
            let [a, b, c] = [
                triangle[0] as usize,
                triangle[1] as usize,
                triangle[2] as usize,
            ];
            let edge1 = self.vertices[b].position - self.vertices[a].position;
            let edge2 = self.vertices[c].position - self.vertices[a].position;
            // Cross-product length is twice the triangle area, so the raw
            // cross already weights by area.
            let face_normal = edge1.cross(edge2);
            accumulated[a] += face_normal;
            accumulated[b] += face_normal;
            accumulated[c] += face_normal;
        }
        for (vertex, normal) in self.vertices.iter_mut().zip(accumulated) {
            vertex.normal = normal.normalize_or_zero();
        }
    }
}

/// Axis-aligned cube with per-face normals and UVs: 24 vertices, 36
/// indices, extents `[-size/2, size/2]` on each axis.
pub fn create_cube(size: f32, color: Vec4) -> MeshData {
    let h = size / 2.0;

    // (normal, four corners CCW from outside, shared UV layout)
    let faces: [(Vec3, [Vec3; 4]); 6] = [
        (
            Vec3::Z,
            [
                Vec3::new(-h, -h, h),
                Vec3::new(h, -h, h),
                Vec3::new(h, h, h),
                Vec3::new(-h, h, h),
            ],
        ),
        (
            Vec3::NEG_Z,
            [
                Vec3::new(h, -h, -h),
                Vec3::new(-h, -h, -h),
                Vec3::new(-h, h, -h),
                Vec3::new(h, h, -h),
            ],
        ),
        (
            Vec3::X,
            [
                Vec3::new(h, -h, h),
                Vec3::new(h, -h, -h),
                Vec3::new(h, h, -h),
                Vec3::new(h, h, h),
            ],
        ),
        (
            Vec3::NEG_X,
            [
                Vec3::new(-h, -h, -h),
                Vec3::new(-h, -h, h),
                Vec3::new(-h, h, h),
                Vec3::new(-h, h, -h),
            ],
        ),
        (
            Vec3::Y,
            [
                Vec3::new(-h, h, h),
                Vec3::new(h, h, h),
                Vec3::new(h, h, -h),
                Vec3::new(-h, h, -h),
            ],
        ),
        (
            Vec3::NEG_Y,
            [
                Vec3::new(-h, -h, -h),
                Vec3::new(h, -h, -h),
                Vec3::new(h, -h, h),
                Vec3::new(-h, -h, h),
            ],
        ),
    ];

    let uvs = [
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, corners) in faces {
        let base = vertices.len() as u32;
        for (corner, uv) in corners.into_iter().zip(uvs) {
            vertices.push(Vertex::new(corner, normal, uv, color));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData {
        debug_name: "cube".to_string(),
        vertices,
        indices,
    }
}

/// UV sphere with `(rings + 1) * (segments + 1)` vertices. Every vertex
/// position has length `radius` and its normal equals `position / radius`.
pub fn create_sphere(radius: f32, segments: u32, rings: u32) -> MeshData {
    use std::f32::consts::PI;

    let segments = segments.max(3);
    let rings = rings.max(2);

    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    for ring in 0..=rings {
        let v = ring as f32 / rings as f32;
        // Latitude from the south pole to the north pole.
        let theta = v * PI;
        let y = -radius * theta.cos();
        let ring_radius = radius * theta.sin();

        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let phi = u * 2.0 * PI;

            let position = Vec3::new(-ring_radius * phi.cos(), y, ring_radius * phi.sin());
            vertices.push(Vertex::new(
                position,
                position / radius,
                Vec2::new(u, 1.0 - v),
                Vec4::ONE,
            ));
        }
    }

    let stride = segments + 1;
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
    for ring in 0..rings {
        for segment in 0..segments {
            let v0 = ring * stride + segment;
            let v1 = v0 + 1;
            let v2 = (ring + 1) * stride + segment;
            let v3 = v2 + 1;

            indices.extend_from_slice(&[v0, v1, v2, v1, v3, v2]);
        }
    }

    MeshData {
        debug_name: "sphere".to_string(),
        vertices,
        indices,
    }
}
