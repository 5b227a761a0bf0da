//! Scene Tests
//!
//! Tests for:
//! - Node id assignment (monotonic, never reused)
//! - Active-camera selection rules
//! - Camera view/projection characteristics
//! - Camera and light UBO construction

use glam::{Vec3, Vec4Swizzles};

use kiln::assets::ResourceId;
use kiln::scene::{Camera, Light, LightType, NodeKind, Renderable, Scene, MAX_LIGHTS};

const EPSILON: f32 = 1e-4;

// ============================================================================
// Node Id Tests
// ============================================================================

#[test]
fn node_ids_start_at_one_and_increase() {
    let mut scene = Scene::new();
    let a = scene.create_light_node(Light::default());
    let b = scene.create_light_node(Light::default());
    let c = scene.create_camera_node(Camera::default());
    assert_eq!(a, 1);
    assert_eq!(b, 2);
    assert_eq!(c, 3);
}

#[test]
fn removed_ids_are_never_reused() {
    let mut scene = Scene::new();
    let a = scene.create_light_node(Light::default());
    assert!(scene.remove_node(a));

    let b = scene.create_light_node(Light::default());
    assert!(b > a, "id {b} reused after removing {a}");
    assert!(scene.node(a).is_none());
}

#[test]
fn remove_unknown_node_returns_false() {
    let mut scene = Scene::new();
    assert!(!scene.remove_node(42));
}

#[test]
fn renderable_nodes_keep_their_component() {
    let mut scene = Scene::new();
    let id = scene.create_renderable_node(Renderable {
        mesh: ResourceId::from_name("default_cube"),
        material: None,
    });
    let node = scene.node(id).unwrap();
    assert_eq!(node.kind, NodeKind::Renderable);
    assert_eq!(
        node.renderable.as_ref().unwrap().mesh,
        ResourceId::from_name("default_cube")
    );
}

// ============================================================================
// Active Camera Tests
// ============================================================================

#[test]
fn no_camera_means_no_active_camera() {
    let mut scene = Scene::new();
    scene.create_light_node(Light::default());
    assert_eq!(scene.active_camera(), None);
}

#[test]
fn first_camera_becomes_active() {
    let mut scene = Scene::new();
    scene.create_light_node(Light::default());
    let first = scene.create_camera_node(Camera::default());
    let _second = scene.create_camera_node(Camera::default());
    assert_eq!(scene.active_camera(), Some(first));
}

#[test]
fn set_active_camera_rejects_non_cameras() {
    let mut scene = Scene::new();
    let light = scene.create_light_node(Light::default());
    assert!(scene.set_active_camera(light).is_err());

    let camera = scene.create_camera_node(Camera::default());
    let other = scene.create_camera_node(Camera::default());
    scene.set_active_camera(other).unwrap();
    assert_eq!(scene.active_camera(), Some(other));
    let _ = camera;
}

#[test]
fn removing_active_camera_falls_back() {
    let mut scene = Scene::new();
    let first = scene.create_camera_node(Camera::default());
    let second = scene.create_camera_node(Camera::default());

    scene.remove_node(first);
    assert_eq!(scene.active_camera(), Some(second));

    scene.remove_node(second);
    assert_eq!(scene.active_camera(), None);
}

// ============================================================================
// Camera Matrix Tests
// ============================================================================

#[test]
fn view_matrix_moves_the_eye_to_the_origin() {
    let camera = Camera {
        position: Vec3::new(0.0, 0.0, 5.0),
        target: Vec3::ZERO,
        ..Camera::default()
    };
    let eye_in_view = camera.view_matrix() * camera.position.extend(1.0);
    assert!(eye_in_view.xyz().length() < EPSILON);
}

#[test]
fn projection_maps_near_plane_to_zero_depth() {
    let camera = Camera {
        near_clip: 0.5,
        far_clip: 100.0,
        ..Camera::default()
    };
    // A point on the near plane straight ahead.
    let clip = camera.projection_matrix() * glam::Vec4::new(0.0, 0.0, -0.5, 1.0);
    let depth = clip.z / clip.w;
    assert!(depth.abs() < EPSILON, "near-plane depth {depth} != 0");
}

// ============================================================================
// UBO Builder Tests
// ============================================================================

#[test]
fn camera_ubo_is_identity_without_a_camera() {
    let scene = Scene::new();
    let ubo = scene.camera_ubo();
    assert_eq!(ubo.view, glam::Mat4::IDENTITY);
    assert_eq!(ubo.projection, glam::Mat4::IDENTITY);
}

#[test]
fn camera_ubo_tracks_the_active_camera() {
    let mut scene = Scene::new();
    let camera = Camera {
        position: Vec3::new(1.0, 2.0, 3.0),
        ..Camera::default()
    };
    scene.create_camera_node(camera.clone());

    let ubo = scene.camera_ubo();
    assert_eq!(ubo.view, camera.view_matrix());
    assert_eq!(ubo.view_position.xyz(), camera.position);
}

#[test]
fn light_ubo_packs_type_and_parameters() {
    let mut scene = Scene::new();
    scene.create_light_node(Light::point(
        Vec3::new(1.0, 2.0, 3.0),
        Vec3::new(0.5, 0.6, 0.7),
        2.0,
        15.0,
    ));
    scene.create_light_node(Light::directional(Vec3::NEG_Y, Vec3::ONE, 3.0));

    let ubo = scene.light_ubo();
    assert_eq!(ubo.count, 2);

    let point = &ubo.lights[0];
    assert_eq!(point.position_range.xyz(), Vec3::new(1.0, 2.0, 3.0));
    assert!((point.position_range.w - 15.0).abs() < EPSILON);
    assert!((point.direction_type.w - 0.0).abs() < EPSILON);
    assert!((point.color_intensity.w - 2.0).abs() < EPSILON);

    let directional = &ubo.lights[1];
    assert!((directional.direction_type.w - 1.0).abs() < EPSILON);
}

#[test]
fn light_ubo_clamps_to_sixteen_lights() {
    let mut scene = Scene::new();
    for _ in 0..MAX_LIGHTS + 4 {
        scene.create_light_node(Light::default());
    }
    let ubo = scene.light_ubo();
    assert_eq!(ubo.count as usize, MAX_LIGHTS);
}

#[test]
fn spot_light_constructor_keeps_cone_bounds() {
    let light = Light::spot(Vec3::ZERO, Vec3::NEG_Y, Vec3::ONE, 1.0, 20.0, 0.95, 0.85);
    assert_eq!(light.light_type, LightType::Spot);
    assert!((light.inner_cone - 0.95).abs() < EPSILON);
    assert!((light.outer_cone - 0.85).abs() < EPSILON);
}
