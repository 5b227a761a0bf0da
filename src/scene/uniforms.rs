//! GPU Uniform Layouts
//!
//! The canonical camera/light uniform-buffer layouts consumed by the frame
//! orchestrator. All structs are `#[repr(C)]`, 16-byte aligned, and `Pod`
//! so they upload byte-for-byte.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::scene::camera::Camera;
use crate::scene::light::{Light, LightType};

/// Maximum number of lights packed into one [`LightUbo`].
pub const MAX_LIGHTS: usize = 16;

/// Camera uniforms: view, projection, and the eye position.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUbo {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_position: Vec4,
}

impl Default for CameraUbo {
    fn default() -> Self {
        Self::identity()
    }
}

impl CameraUbo {
    /// Identity matrices; used when a scene has no active camera.
    pub fn identity() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_position: Vec4::W,
        }
    }

    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            view_position: camera.position.extend(1.0),
        }
    }
}

/// One packed light: position.xyz + range, direction.xyz + type,
/// color.rgb + intensity, cone bounds + padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct GpuLight {
    pub position_range: Vec4,
    pub direction_type: Vec4,
    pub color_intensity: Vec4,
    pub cone: Vec4,
}

impl GpuLight {
    pub fn pack(light: &Light) -> Self {
        let type_code = match light.light_type {
            LightType::Point => 0.0,
            LightType::Directional => 1.0,
            LightType::Spot => 2.0,
        };
        Self {
            position_range: light.position.extend(light.range),
            direction_type: light.direction.extend(type_code),
            color_intensity: light.color.extend(light.intensity),
            cone: Vec4::new(light.inner_cone, light.outer_cone, 0.0, 0.0),
        }
    }
}

/// Fixed-capacity light array plus the live count.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightUbo {
    pub lights: [GpuLight; MAX_LIGHTS],
    pub count: u32,
    pub _padding: [u32; 3],
}

impl Default for LightUbo {
    fn default() -> Self {
        Self {
            lights: [GpuLight::default(); MAX_LIGHTS],
            count: 0,
            _padding: [0; 3],
        }
    }
}

impl LightUbo {
    /// Packs up to [`MAX_LIGHTS`] lights in iteration order; the rest are
    /// dropped.
    pub fn from_lights<'a>(lights: impl IntoIterator<Item = &'a Light>) -> Self {
        let mut ubo = Self::default();
        for light in lights.into_iter().take(MAX_LIGHTS) {
            ubo.lights[ubo.count as usize] = GpuLight::pack(light);
            ubo.count += 1;
        }
        ubo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubo_sizes_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<CameraUbo>(), 144);
        assert_eq!(std::mem::size_of::<GpuLight>(), 64);
        assert_eq!(std::mem::size_of::<LightUbo>(), 64 * MAX_LIGHTS + 16);
        assert_eq!(std::mem::size_of::<LightUbo>() % 16, 0);
    }

    #[test]
    fn light_count_clamps_to_capacity() {
        let lights: Vec<Light> = (0..20).map(|_| Light::default()).collect();
        let ubo = LightUbo::from_lights(lights.iter());
        assert_eq!(ubo.count as usize, MAX_LIGHTS);
    }
}
