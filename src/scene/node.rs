//! Scene Nodes
//!
//! Flat node records: a transform plus optional camera / light /
//! renderable / collider components. Node ids are assigned by the scene
//! and never reused.

use glam::{Mat4, Quat, Vec3};

use crate::assets::path::ResourceId;
use crate::scene::camera::Camera;
use crate::scene::light::Light;

/// Local transform (TRS).
#[derive(Debug, Clone)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// What a node primarily is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Camera,
    Light,
    Renderable,
}

/// Drawable component: a cached mesh plus an optional material reference.
#[derive(Debug, Clone)]
pub struct Renderable {
    pub mesh: ResourceId,
    pub material: Option<String>,
}

/// Axis-aligned collider component.
#[derive(Debug, Clone)]
pub struct Collider {
    pub half_extents: Vec3,
}

/// One node in the flat scene list.
#[derive(Debug, Clone)]
pub struct SceneNode {
    id: u32,
    pub kind: NodeKind,
    pub transform: Transform,
    pub camera: Option<Camera>,
    pub light: Option<Light>,
    pub renderable: Option<Renderable>,
    pub collider: Option<Collider>,
}

impl SceneNode {
    pub(crate) fn new(id: u32, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            transform: Transform::default(),
            camera: None,
            light: None,
            renderable: None,
            collider: None,
        }
    }

    /// Stable id, assigned monotonically from 1.
    pub fn id(&self) -> u32 {
        self.id
    }
}
