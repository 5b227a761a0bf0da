//! Material Tests
//!
//! Tests for:
//! - JSON descriptor parsing (full schema, defaults for absent fields)
//! - Case-insensitive alpha mode with opaque fallback
//! - Relative texture paths resolving through the texture cache

use std::path::Path;

use kiln::assets::{AlphaMode, MaterialManager, ResourceCache};

// ============================================================================
// Alpha Mode Tests
// ============================================================================

#[test]
fn alpha_mode_matches_case_insensitively() {
    assert_eq!(AlphaMode::parse("opaque"), AlphaMode::Opaque);
    assert_eq!(AlphaMode::parse("OPAQUE"), AlphaMode::Opaque);
    assert_eq!(AlphaMode::parse("mAsK"), AlphaMode::Mask);
    assert_eq!(AlphaMode::parse("BLEND"), AlphaMode::Blend);
}

#[test]
fn unknown_alpha_mode_yields_opaque() {
    assert_eq!(AlphaMode::parse("additive"), AlphaMode::Opaque);
    assert_eq!(AlphaMode::parse(""), AlphaMode::Opaque);
}

// ============================================================================
// Descriptor Parsing Tests
// ============================================================================

#[test]
fn full_descriptor_parses_every_section() {
    let json = r#"{
        "name": "brushed-steel",
        "domain": "opaque",
        "factors": {
            "baseColor": [0.8, 0.8, 0.9, 1.0],
            "metallic": 0.9,
            "roughness": 0.35,
            "emissive": [0.0, 0.0, 0.0],
            "normalScale": 1.2
        },
        "alpha": { "mode": "Mask", "cutoff": 0.25, "doubleSided": true },
        "optical": { "refractionIndex": 1.45 }
    }"#;

    let manager = MaterialManager::new();
    let cache = ResourceCache::new();
    let material = manager
        .load_material_from_str(json, "fallback", Path::new("."), &cache)
        .unwrap();

    assert_eq!(material.name, "brushed-steel");
    assert_eq!(material.alpha_mode, AlphaMode::Mask);
    assert!((material.alpha_cutoff - 0.25).abs() < 1e-6);
    assert!(material.double_sided);
    assert!((material.factors.metallic - 0.9).abs() < 1e-6);
    assert!((material.factors.normal_scale - 1.2).abs() < 1e-6);
    assert!((material.refraction_index - 1.45).abs() < 1e-6);
}

#[test]
fn empty_descriptor_falls_back_to_defaults() {
    let manager = MaterialManager::new();
    let cache = ResourceCache::new();
    let material = manager
        .load_material_from_str("{}", "unnamed", Path::new("."), &cache)
        .unwrap();

    assert_eq!(material.name, "unnamed");
    assert_eq!(material.alpha_mode, AlphaMode::Opaque);
    assert!((material.alpha_cutoff - 0.5).abs() < 1e-6);
    assert!(!material.double_sided);
    assert_eq!(material.factors.base_color, glam::Vec4::ONE);
    assert!((material.refraction_index - 1.5).abs() < 1e-6);
    assert!(material.textures.base_color.is_none());
}

#[test]
fn malformed_json_is_an_error() {
    let manager = MaterialManager::new();
    let cache = ResourceCache::new();
    let result = manager.load_material_from_str("{ not json", "bad", Path::new("."), &cache);
    assert!(matches!(result, Err(kiln::KilnError::Json(_))));
}

#[test]
fn materials_are_retrievable_by_name() {
    let manager = MaterialManager::new();
    let cache = ResourceCache::new();
    manager
        .load_material_from_str(r#"{"name": "gold"}"#, "x", Path::new("."), &cache)
        .unwrap();

    assert!(manager.get("gold").is_some());
    assert!(manager.get("silver").is_none());
    assert_eq!(manager.len(), 1);
}

// ============================================================================
// Texture Resolution Tests
// ============================================================================

#[test]
fn texture_paths_resolve_relative_to_the_material() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbaImage::from_pixel(2, 2, image::Rgba([128, 64, 32, 255]))
        .save(dir.path().join("albedo.png"))
        .unwrap();

    let json = r#"{ "name": "textured", "textures": { "baseColor": "albedo.png" } }"#;
    let manager = MaterialManager::new();
    let cache = ResourceCache::new();
    let material = manager
        .load_material_from_str(json, "x", dir.path(), &cache)
        .unwrap();

    let id = material.textures.base_color.as_ref().expect("texture id");
    let texture = cache.get_texture(id).expect("texture loaded eagerly");
    assert_eq!((texture.width, texture.height), (2, 2));
}

#[test]
fn missing_texture_file_fails_the_material() {
    let json = r#"{ "textures": { "baseColor": "missing.png" } }"#;
    let manager = MaterialManager::new();
    let cache = ResourceCache::new();
    let result = manager.load_material_from_str(json, "x", Path::new("/nonexistent"), &cache);
    assert!(result.is_err());
}

#[test]
fn material_file_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steel.json");
    std::fs::write(&path, r#"{ "alpha": { "mode": "blend" } }"#).unwrap();

    let manager = MaterialManager::new();
    let cache = ResourceCache::new();
    let material = manager.load_material(&path, &cache).unwrap();

    // Name falls back to the file stem.
    assert_eq!(material.name, "steel");
    assert_eq!(material.alpha_mode, AlphaMode::Blend);
}
