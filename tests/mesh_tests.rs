//! Mesh Tests
//!
//! Tests for:
//! - Cube primitive invariants (vertex/index counts, bounds)
//! - Sphere primitive sanity (grid size, radius, normals)
//! - OBJ parsing (fan triangulation, corner syntax variants)
//! - STL parsing (binary and ASCII)
//! - Mesh format detection and unsupported formats

use glam::{Vec3, Vec4};

use kiln::assets::loaders::{self, MeshFormat};
use kiln::assets::{create_cube, create_sphere};
use kiln::KilnError;

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

// ============================================================================
// Cube Primitive Tests
// ============================================================================

#[test]
fn cube_has_24_vertices_and_36_indices() {
    let cube = create_cube(2.0, Vec4::ONE);
    assert_eq!(cube.vertices.len(), 24);
    assert_eq!(cube.indices.len(), 36);
}

#[test]
fn cube_bounds_are_half_size() {
    let cube = create_cube(3.0, Vec4::ONE);
    let (min, max) = cube.bounds().unwrap();
    for axis in 0..3 {
        assert!(approx(min[axis], -1.5), "min[{axis}] = {}", min[axis]);
        assert!(approx(max[axis], 1.5), "max[{axis}] = {}", max[axis]);
    }
}

#[test]
fn cube_normals_are_axis_aligned_unit_vectors() {
    let cube = create_cube(1.0, Vec4::ONE);
    for vertex in &cube.vertices {
        let n = vertex.normal;
        assert!(approx(n.length(), 1.0));
        // Exactly one component is +-1.
        let ones = [n.x, n.y, n.z]
            .iter()
            .filter(|c| approx(c.abs(), 1.0))
            .count();
        assert_eq!(ones, 1, "normal {n:?} is not axis-aligned");
    }
}

#[test]
fn cube_carries_requested_color() {
    let color = Vec4::new(0.2, 0.4, 0.6, 1.0);
    let cube = create_cube(1.0, color);
    assert!(cube.vertices.iter().all(|v| v.color == color));
}

#[test]
fn cube_indices_stay_in_range() {
    let cube = create_cube(1.0, Vec4::ONE);
    assert!(cube
        .indices
        .iter()
        .all(|&i| (i as usize) < cube.vertices.len()));
}

// ============================================================================
// Sphere Primitive Tests
// ============================================================================

#[test]
fn sphere_vertex_count_matches_grid() {
    let sphere = create_sphere(1.0, 32, 16);
    assert_eq!(sphere.vertices.len(), (16 + 1) * (32 + 1));
}

#[test]
fn sphere_vertices_lie_on_the_radius() {
    let radius = 2.5;
    let sphere = create_sphere(radius, 12, 8);
    for vertex in &sphere.vertices {
        assert!(
            (vertex.position.length() - radius).abs() < EPSILON,
            "position {:?} is off the sphere",
            vertex.position
        );
    }
}

#[test]
fn sphere_normals_point_outward() {
    let radius = 4.0;
    let sphere = create_sphere(radius, 12, 8);
    for vertex in &sphere.vertices {
        let expected = vertex.position / radius;
        assert!(
            (vertex.normal - expected).length() < EPSILON,
            "normal {:?} != position/radius {:?}",
            vertex.normal,
            expected
        );
    }
}

#[test]
fn sphere_clamps_degenerate_tessellation() {
    // Requests below the minimum tessellation still produce a valid mesh.
    let sphere = create_sphere(1.0, 1, 1);
    assert_eq!(sphere.vertices.len(), (2 + 1) * (3 + 1));
    assert!(!sphere.indices.is_empty());
}

// ============================================================================
// OBJ Parsing Tests
// ============================================================================

#[test]
fn obj_quad_face_triangulates_as_a_fan() {
    let source = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
    let meshes = loaders::obj::parse_obj(source, "quad").unwrap();
    assert_eq!(meshes.len(), 1);
    // (a, b, c, a, c, d)
    assert_eq!(meshes[0].indices, vec![0, 1, 2, 0, 2, 3]);
}

#[test]
fn obj_pentagon_yields_three_triangles() {
    let source = "v 0 0 0\nv 1 0 0\nv 2 1 0\nv 1 2 0\nv 0 1 0\nf 1 2 3 4 5\n";
    let meshes = loaders::obj::parse_obj(source, "pentagon").unwrap();
    assert_eq!(meshes[0].indices.len(), 9);
}

#[test]
fn obj_full_corner_syntax_resolves_attributes() {
    let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0.5 0.5\nvn 0 0 1\nf 1/1/1 2/1/1 3/1/1\n";
    let meshes = loaders::obj::parse_obj(source, "tri").unwrap();
    let vertex = &meshes[0].vertices[0];
    assert_eq!(vertex.normal, Vec3::Z);
    assert!(approx(vertex.tex_coord.x, 0.5));
}

#[test]
fn obj_objects_split_into_separate_meshes() {
    let source = "o first\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\no second\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 4 5 6\n";
    let meshes = loaders::obj::parse_obj(source, "two").unwrap();
    assert_eq!(meshes.len(), 2);
    assert_eq!(meshes[0].debug_name, "first");
    assert_eq!(meshes[1].debug_name, "second");
}

#[test]
fn obj_without_geometry_is_an_error() {
    let err = loaders::obj::parse_obj("# empty file\n", "empty").unwrap_err();
    assert!(matches!(err, KilnError::MeshParse(_)));
}

// ============================================================================
// STL Parsing Tests
// ============================================================================

#[test]
fn stl_binary_roundtrip_counts() {
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&2u32.to_le_bytes());
    for triangle in 0..2u32 {
        let z = triangle as f32;
        for value in [
            0.0f32, 0.0, 1.0, // normal
            0.0, 0.0, z, // a
            1.0, 0.0, z, // b
            0.0, 1.0, z, // c
        ] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
    }

    let meshes = loaders::stl::parse_stl(&bytes, "two-tris").unwrap();
    assert_eq!(meshes[0].indices.len(), 6);
    assert_eq!(meshes[0].vertices.len(), 6);
}

#[test]
fn stl_ascii_detected_by_solid_header() {
    let source = "solid part\n facet normal 0 1 0\n  outer loop\n   vertex 0 0 0\n   vertex 0 0 1\n   vertex 1 0 0\n  endloop\n endfacet\nendsolid part\n";
    let meshes = loaders::stl::parse_stl(source.as_bytes(), "part").unwrap();
    assert_eq!(meshes[0].indices.len(), 3);
    assert_eq!(meshes[0].vertices[0].normal, Vec3::Y);
}

#[test]
fn stl_truncated_binary_is_an_error() {
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&5u32.to_le_bytes());
    let err = loaders::stl::parse_stl(&bytes, "truncated").unwrap_err();
    assert!(matches!(err, KilnError::MeshParse(_)));
}

// ============================================================================
// Format Detection Tests
// ============================================================================

#[test]
fn mesh_format_detected_by_extension() {
    use std::path::Path;
    assert_eq!(MeshFormat::from_path(Path::new("a/b.obj")), Some(MeshFormat::Obj));
    assert_eq!(MeshFormat::from_path(Path::new("a/B.STL")), Some(MeshFormat::Stl));
    assert_eq!(MeshFormat::from_path(Path::new("a/c.gltf")), Some(MeshFormat::Gltf));
    assert_eq!(MeshFormat::from_path(Path::new("a/noext")), None);
}

#[test]
fn reserved_formats_fail_with_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.ply");
    std::fs::write(&path, b"ply\n").unwrap();

    let err = loaders::load_meshes(&path).unwrap_err();
    assert!(matches!(err, KilnError::UnsupportedFormat(_)));
}

// ============================================================================
// Normal Computation Tests
// ============================================================================

#[test]
fn computed_normals_face_out_of_a_ccw_triangle() {
    let mut mesh = loaders::obj::parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n", "tri")
        .unwrap()
        .remove(0);
    mesh.compute_normals();
    for vertex in &mesh.vertices {
        assert!(vertex.normal.z > 0.9, "normal {:?}", vertex.normal);
    }
}
