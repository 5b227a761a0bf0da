//! PBR Materials
//!
//! JSON material descriptors parsed into [`PbrMaterial`] records whose
//! texture slots carry resource ids from the texture cache. Texture paths
//! resolve relative to the material file and are loaded eagerly.

use std::path::Path;
use std::sync::Arc;

use glam::{Vec3, Vec4};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::assets::cache::ResourceCache;
use crate::assets::loaders::texture::TextureLoadOptions;
use crate::assets::path::ResourceId;
use crate::errors::Result;

/// Alpha handling of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

impl AlphaMode {
    /// Case-insensitive parse; anything unrecognized falls back to opaque.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "mask" => Self::Mask,
            "blend" => Self::Blend,
            _ => Self::Opaque,
        }
    }
}

/// Texture slots of a PBR material, as cache ids.
#[derive(Debug, Clone, Default)]
pub struct MaterialTextures {
    pub base_color: Option<ResourceId>,
    pub metallic: Option<ResourceId>,
    pub roughness: Option<ResourceId>,
    pub normal: Option<ResourceId>,
    pub occlusion: Option<ResourceId>,
    pub emissive: Option<ResourceId>,
}

/// Scalar/vector factors of a PBR material.
#[derive(Debug, Clone)]
pub struct MaterialFactors {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub normal_scale: f32,
}

impl Default for MaterialFactors {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 1.0,
            roughness: 1.0,
            emissive: Vec3::ZERO,
            normal_scale: 1.0,
        }
    }
}

/// Parsed PBR material record.
#[derive(Debug, Clone)]
pub struct PbrMaterial {
    pub name: String,
    pub domain: String,
    pub textures: MaterialTextures,
    pub factors: MaterialFactors,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
    pub refraction_index: f32,
}

impl Default for PbrMaterial {
    fn default() -> Self {
        Self {
            name: String::new(),
            domain: "opaque".to_string(),
            textures: MaterialTextures::default(),
            factors: MaterialFactors::default(),
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            refraction_index: 1.5,
        }
    }
}

// ============================================================================
// JSON schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMaterial {
    name: Option<String>,
    domain: Option<String>,
    textures: RawTextures,
    factors: RawFactors,
    alpha: RawAlpha,
    optical: RawOptical,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawTextures {
    base_color: Option<String>,
    metallic: Option<String>,
    roughness: Option<String>,
    normal: Option<String>,
    occlusion: Option<String>,
    emissive: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawFactors {
    base_color: Option<[f32; 4]>,
    metallic: Option<f32>,
    roughness: Option<f32>,
    emissive: Option<[f32; 3]>,
    normal_scale: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawAlpha {
    mode: Option<String>,
    cutoff: Option<f32>,
    double_sided: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawOptical {
    refraction_index: Option<f32>,
}

// ============================================================================
// Manager
// ============================================================================

/// Parses material descriptors and holds the records by name.
#[derive(Default)]
pub struct MaterialManager {
    materials: Mutex<FxHashMap<String, Arc<PbrMaterial>>>,
}

impl MaterialManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a material JSON file; its texture paths resolve relative to
    /// the file's directory and load eagerly into `cache`.
    pub fn load_material(&self, path: &Path, cache: &ResourceCache) -> Result<Arc<PbrMaterial>> {
        let json = std::fs::read_to_string(path)?;
        let fallback_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.load_material_from_str(&json, &fallback_name, base_dir, cache)
    }

    /// Parses a material descriptor from a JSON string.
    pub fn load_material_from_str(
        &self,
        json: &str,
        fallback_name: &str,
        base_dir: &Path,
        cache: &ResourceCache,
    ) -> Result<Arc<PbrMaterial>> {
        let raw: RawMaterial = serde_json::from_str(json)?;

        let mut resolve = |relative: &Option<String>| -> Result<Option<ResourceId>> {
            match relative {
                Some(relative) => {
                    let id =
                        cache.load_texture(&base_dir.join(relative), TextureLoadOptions::default())?;
                    Ok(Some(id))
                }
                None => Ok(None),
            }
        };

        let textures = MaterialTextures {
            base_color: resolve(&raw.textures.base_color)?,
            metallic: resolve(&raw.textures.metallic)?,
            roughness: resolve(&raw.textures.roughness)?,
            normal: resolve(&raw.textures.normal)?,
            occlusion: resolve(&raw.textures.occlusion)?,
            emissive: resolve(&raw.textures.emissive)?,
        };

        let defaults = MaterialFactors::default();
        let material = Arc::new(PbrMaterial {
            name: raw.name.unwrap_or_else(|| fallback_name.to_string()),
            domain: raw.domain.unwrap_or_else(|| "opaque".to_string()),
            textures,
            factors: MaterialFactors {
                base_color: raw
                    .factors
                    .base_color
                    .map_or(defaults.base_color, Vec4::from_array),
                metallic: raw.factors.metallic.unwrap_or(defaults.metallic),
                roughness: raw.factors.roughness.unwrap_or(defaults.roughness),
                emissive: raw
                    .factors
                    .emissive
                    .map_or(defaults.emissive, Vec3::from_array),
                normal_scale: raw.factors.normal_scale.unwrap_or(defaults.normal_scale),
            },
            alpha_mode: raw
                .alpha
                .mode
                .as_deref()
                .map_or(AlphaMode::Opaque, AlphaMode::parse),
            alpha_cutoff: raw.alpha.cutoff.unwrap_or(0.5),
            double_sided: raw.alpha.double_sided.unwrap_or(false),
            refraction_index: raw.optical.refraction_index.unwrap_or(1.5),
        });

        self.materials
            .lock()
            .insert(material.name.clone(), material.clone());
        log::debug!("Loaded material \"{}\"", material.name);
        Ok(material)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PbrMaterial>> {
        self.materials.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.materials.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_mode_parse_is_case_insensitive() {
        assert_eq!(AlphaMode::parse("OPAQUE"), AlphaMode::Opaque);
        assert_eq!(AlphaMode::parse("Mask"), AlphaMode::Mask);
        assert_eq!(AlphaMode::parse("blend"), AlphaMode::Blend);
    }

    #[test]
    fn alpha_mode_unknown_falls_back_to_opaque() {
        assert_eq!(AlphaMode::parse("translucent"), AlphaMode::Opaque);
        assert_eq!(AlphaMode::parse(""), AlphaMode::Opaque);
    }
}
