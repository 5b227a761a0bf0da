//! Resource Cache Tests
//!
//! Tests for:
//! - Path normalization idempotence through the cache key
//! - Default resources (presence, non-removability)
//! - Sync load dedup and unload semantics
//! - Async load coalescing and failure propagation
//! - Batch loads resolving in input order

use std::path::PathBuf;

use futures::executor::block_on;
use kiln::assets::{ResourceCache, ResourceId, DEFAULT_CUBE_ID, DEFAULT_WHITE_ID};
use kiln::{KilnError, TextureLoadOptions};

const TRIANGLE_OBJ: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";

fn write_obj(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = dir.path().join(name);
    std::fs::write(&path, TRIANGLE_OBJ).unwrap();
    path
}

// ============================================================================
// Normalization Tests
// ============================================================================

#[test]
fn repeated_loads_return_the_same_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(&dir, "tri.obj");

    let cache = ResourceCache::new();
    let first = cache.load_mesh(&path).unwrap();
    let second = cache.load_mesh(&path).unwrap();
    assert_eq!(first, second);
}

#[test]
fn dot_segments_normalize_to_the_same_id() {
    let dir = tempfile::tempdir().unwrap();
    write_obj(&dir, "tri.obj");

    let cache = ResourceCache::new();
    let plain = cache.load_mesh(&dir.path().join("tri.obj")).unwrap();
    let dotted = cache
        .load_mesh(&dir.path().join("./sub/../tri.obj"))
        .unwrap();
    assert_eq!(plain, dotted);
}

#[test]
fn normalized_ids_are_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(&dir, "tri.obj");

    let cache = ResourceCache::new();
    let id = cache.load_mesh(&path).unwrap();
    assert!(std::path::Path::new(id.as_str()).is_absolute());
}

// ============================================================================
// Default Resource Tests
// ============================================================================

#[test]
fn default_resources_are_primed() {
    let cache = ResourceCache::new();

    let cube = cache
        .get_mesh(&ResourceId::from_name(DEFAULT_CUBE_ID))
        .expect("default cube missing");
    assert_eq!(cube[0].vertices.len(), 24);
    assert_eq!(cube[0].indices.len(), 36);

    let white = cache
        .get_texture(&ResourceId::from_name(DEFAULT_WHITE_ID))
        .expect("default white missing");
    assert_eq!((white.width, white.height), (4, 4));
    assert!(white.pixels.iter().all(|&b| b == 255));
}

#[test]
fn default_resources_cannot_be_unloaded() {
    let cache = ResourceCache::new();
    assert!(!cache.unload_mesh(&ResourceId::from_name(DEFAULT_CUBE_ID)));
    assert!(!cache.unload_texture(&ResourceId::from_name(DEFAULT_WHITE_ID)));
    assert!(cache
        .get_mesh(&ResourceId::from_name(DEFAULT_CUBE_ID))
        .is_some());
}

// ============================================================================
// Sync Load & Unload Tests
// ============================================================================

#[test]
fn loaded_meshes_are_retrievable_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(&dir, "tri.obj");

    let cache = ResourceCache::new();
    let id = cache.load_mesh(&path).unwrap();
    let meshes = cache.get_mesh(&id).unwrap();
    assert_eq!(meshes[0].vertices.len(), 3);
}

#[test]
fn unload_removes_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(&dir, "tri.obj");

    let cache = ResourceCache::new();
    let id = cache.load_mesh(&path).unwrap();
    assert!(cache.unload_mesh(&id));
    assert!(cache.get_mesh(&id).is_none());
    assert!(!cache.unload_mesh(&id));
}

#[test]
fn missing_file_surfaces_an_io_error() {
    let cache = ResourceCache::new();
    let err = cache
        .load_mesh(std::path::Path::new("/definitely/missing.obj"))
        .unwrap_err();
    assert!(matches!(err, KilnError::Io(_)));
}

#[test]
fn unknown_extension_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.xyz");
    std::fs::write(&path, b"data").unwrap();

    let cache = ResourceCache::new();
    let err = cache.load_mesh(&path).unwrap_err();
    assert!(matches!(err, KilnError::UnsupportedFormat(_)));
}

// ============================================================================
// Async Load Tests
// ============================================================================

#[test]
fn concurrent_async_loads_coalesce_to_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(&dir, "tri.obj");

    let cache = ResourceCache::new();
    let baseline = cache.loaded_mesh_count();

    let futures: Vec<_> = (0..8).map(|_| cache.load_mesh_async(&path)).collect();
    // At most one in-flight task exists regardless of how many requests
    // arrived before it finished.
    assert!(cache.pending_mesh_count() <= 1);

    let ids = block_on(futures::future::join_all(futures));
    let first = ids[0].as_ref().unwrap().clone();
    for id in &ids {
        assert_eq!(id.as_ref().unwrap(), &first);
    }

    assert_eq!(cache.loaded_mesh_count(), baseline + 1);
    assert_eq!(cache.pending_mesh_count(), 0);
}

#[test]
fn async_load_failure_reaches_every_waiter() {
    let cache = ResourceCache::new();
    let path = std::path::Path::new("/definitely/missing.obj");

    let first = cache.load_mesh_async(path);
    let second = cache.load_mesh_async(path);

    assert!(block_on(first).is_err());
    assert!(block_on(second).is_err());
    assert_eq!(cache.pending_mesh_count(), 0);
}

#[test]
fn async_load_of_cached_resource_resolves_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_obj(&dir, "tri.obj");

    let cache = ResourceCache::new();
    let id = cache.load_mesh(&path).unwrap();

    let resolved = block_on(cache.load_mesh_async(&path)).unwrap();
    assert_eq!(resolved, id);
}

#[test]
fn batch_load_preserves_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_obj(&dir, "a.obj");
    let b = write_obj(&dir, "b.obj");
    let c = write_obj(&dir, "c.obj");

    let cache = ResourceCache::new();
    let ids = block_on(cache.load_meshes_async(&[a.clone(), b.clone(), c.clone()])).unwrap();

    assert_eq!(ids[0], cache.load_mesh(&a).unwrap());
    assert_eq!(ids[1], cache.load_mesh(&b).unwrap());
    assert_eq!(ids[2], cache.load_mesh(&c).unwrap());
}

// ============================================================================
// Texture Cache Tests
// ============================================================================

#[test]
fn texture_loads_dedupe_by_normalized_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("white.png");
    image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 255, 255, 255]))
        .save(&path)
        .unwrap();

    let cache = ResourceCache::new();
    let baseline = cache.loaded_texture_count();
    let first = cache.load_texture(&path, TextureLoadOptions::default()).unwrap();
    let second = cache.load_texture(&path, TextureLoadOptions::default()).unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.loaded_texture_count(), baseline + 1);

    let texture = cache.get_texture(&first).unwrap();
    assert_eq!((texture.width, texture.height, texture.channels), (2, 2, 4));
}

#[test]
fn concurrent_async_texture_loads_resolve_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("white.png");
    image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 200, 200, 255]))
        .save(&path)
        .unwrap();

    let cache = ResourceCache::new();
    let baseline = cache.loaded_texture_count();
    let futures: Vec<_> = (0..8)
        .map(|_| cache.load_texture_async(&path, TextureLoadOptions::default()))
        .collect();

    let ids = block_on(futures::future::join_all(futures));
    let first = ids[0].as_ref().unwrap().clone();
    assert!(ids.iter().all(|id| id.as_ref().unwrap() == &first));
    assert_eq!(cache.loaded_texture_count(), baseline + 1);
    assert_eq!(cache.pending_texture_count(), 0);
}
