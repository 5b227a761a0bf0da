//! Lights
//!
//! Point, directional and spot lights with the parameters the light UBO
//! packs for the shaders.

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Point,
    Directional,
    Spot,
}

/// One scene light.
#[derive(Debug, Clone)]
pub struct Light {
    pub light_type: LightType,
    pub color: Vec3,
    pub intensity: f32,
    pub direction: Vec3,
    pub position: Vec3,
    pub range: f32,
    /// Inner cone angle cosine bound (spot lights only).
    pub inner_cone: f32,
    /// Outer cone angle cosine bound (spot lights only).
    pub outer_cone: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            light_type: LightType::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            direction: Vec3::NEG_Y,
            position: Vec3::ZERO,
            range: 10.0,
            inner_cone: 0.9,
            outer_cone: 0.8,
        }
    }
}

impl Light {
    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            light_type: LightType::Point,
            color,
            intensity,
            position,
            range,
            ..Self::default()
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            color,
            intensity,
            direction: direction.normalize_or_zero(),
            ..Self::default()
        }
    }

    pub fn spot(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        range: f32,
        inner_cone: f32,
        outer_cone: f32,
    ) -> Self {
        Self {
            light_type: LightType::Spot,
            color,
            intensity,
            position,
            direction: direction.normalize_or_zero(),
            range,
            inner_cone,
            outer_cone,
        }
    }
}
