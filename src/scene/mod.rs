//! Scene
//!
//! Flat node container with monotonically increasing ids, an active-camera
//! slot, and the camera/light uniform builders the frame orchestrator
//! consumes each frame.

pub mod camera;
pub mod light;
pub mod node;
pub mod uniforms;

pub use camera::Camera;
pub use light::{Light, LightType};
pub use node::{Collider, NodeKind, Renderable, SceneNode, Transform};
pub use uniforms::{CameraUbo, GpuLight, LightUbo, MAX_LIGHTS};

use crate::errors::{KilnError, Result};

/// Ordered node list. Ids start at 1 and are never reused; id 0 means
/// "no node".
#[derive(Default)]
pub struct Scene {
    nodes: Vec<SceneNode>,
    next_id: u32,
    active_camera: u32,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            next_id: 1,
            active_camera: 0,
        }
    }

    fn allocate(&mut self, kind: NodeKind) -> &mut SceneNode {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.push(SceneNode::new(id, kind));
        self.nodes.last_mut().unwrap()
    }

    /// Adds a camera node. The first camera created becomes active.
    pub fn create_camera_node(&mut self, camera: Camera) -> u32 {
        let node = self.allocate(NodeKind::Camera);
        node.camera = Some(camera);
        let id = node.id();
        if self.active_camera == 0 {
            self.active_camera = id;
        }
        id
    }

    pub fn create_light_node(&mut self, light: Light) -> u32 {
        let node = self.allocate(NodeKind::Light);
        node.light = Some(light);
        node.id()
    }

    pub fn create_renderable_node(&mut self, renderable: Renderable) -> u32 {
        let node = self.allocate(NodeKind::Renderable);
        node.renderable = Some(renderable);
        node.id()
    }

    pub fn node(&self, id: u32) -> Option<&SceneNode> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    pub fn node_mut(&mut self, id: u32) -> Option<&mut SceneNode> {
        self.nodes.iter_mut().find(|node| node.id() == id)
    }

    /// Removes a node. A removed active camera falls back to the first
    /// remaining camera, or to none.
    pub fn remove_node(&mut self, id: u32) -> bool {
        let Some(index) = self.nodes.iter().position(|node| node.id() == id) else {
            return false;
        };
        self.nodes.remove(index);
        if self.active_camera == id {
            self.active_camera = self
                .nodes
                .iter()
                .find(|node| node.kind == NodeKind::Camera)
                .map_or(0, SceneNode::id);
        }
        true
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ========================================================================
    // Cameras & Lights
    // ========================================================================

    /// Id of the active camera node, if any camera exists.
    pub fn active_camera(&self) -> Option<u32> {
        (self.active_camera != 0).then_some(self.active_camera)
    }

    pub fn set_active_camera(&mut self, id: u32) -> Result<()> {
        let is_camera = self
            .node(id)
            .is_some_and(|node| node.kind == NodeKind::Camera);
        if !is_camera {
            return Err(KilnError::InvalidArgument(format!(
                "node {id} is not a camera"
            )));
        }
        self.active_camera = id;
        Ok(())
    }

    /// Camera uniforms from the active camera; identity when none exists.
    pub fn camera_ubo(&self) -> CameraUbo {
        self.active_camera()
            .and_then(|id| self.node(id))
            .and_then(|node| node.camera.as_ref())
            .map_or_else(CameraUbo::identity, CameraUbo::from_camera)
    }

    /// Light uniforms from every light node, clamped to [`MAX_LIGHTS`].
    pub fn light_ubo(&self) -> LightUbo {
        LightUbo::from_lights(self.nodes.iter().filter_map(|node| node.light.as_ref()))
    }
}
