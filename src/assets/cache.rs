//! Resource Cache
//!
//! Central, thread-safe cache of mesh/texture/shader-program resources
//! keyed by normalized absolute paths. Repeated loads are served from the
//! cache; concurrent async loads of the same id coalesce onto one in-flight
//! task. No lock is held across file I/O or parsing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use futures::future::{BoxFuture, FutureExt, Shared};
use glam::Vec4;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Runtime;

use crate::assets::loaders;
use crate::assets::loaders::texture::TextureLoadOptions;
use crate::assets::mesh::{create_cube, MeshData};
use crate::assets::path::ResourceId;
use crate::assets::texture::TextureData;
use crate::errors::{KilnError, Result};
use crate::shader::layout::DescriptorLayoutCache;
use crate::shader::module::{ShaderModule, ShaderProgram};
use crate::shader::reflection::{merge_reflections, reflect_stage};

/// Reserved id of the built-in unit cube.
pub const DEFAULT_CUBE_ID: &str = "default_cube";
/// Reserved id of the built-in 4x4 white texture.
pub const DEFAULT_WHITE_ID: &str = "default_white";

/// Outcome shared between all waiters of one in-flight load.
pub type LoadResult = std::result::Result<ResourceId, Arc<KilnError>>;
/// Cloneable handle to an in-flight (or already resolved) load.
pub type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

fn asset_runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| Runtime::new().expect("Failed to create asset loader runtime"))
}

struct CacheShard<T> {
    loaded: FxHashMap<ResourceId, Arc<T>>,
    loading: FxHashMap<ResourceId, LoadFuture>,
}

impl<T> Default for CacheShard<T> {
    fn default() -> Self {
        Self {
            loaded: FxHashMap::default(),
            loading: FxHashMap::default(),
        }
    }
}

/// Device access required by shader loading: module creation plus layout
/// registration.
#[derive(Clone)]
pub struct ShaderEnvironment {
    pub device: ash::Device,
    pub layouts: Arc<DescriptorLayoutCache>,
}

/// Mesh, texture and shader-program caches with async coalescing.
pub struct ResourceCache {
    meshes: Arc<Mutex<CacheShard<Vec<MeshData>>>>,
    textures: Arc<Mutex<CacheShard<TextureData>>>,
    shaders: Arc<Mutex<CacheShard<ShaderProgram>>>,
    shader_env: Option<ShaderEnvironment>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    /// CPU-only cache: meshes and textures work, shader loads fail with
    /// `NotInitialized` until a shader environment is attached.
    pub fn new() -> Self {
        let cache = Self {
            meshes: Arc::new(Mutex::new(CacheShard::default())),
            textures: Arc::new(Mutex::new(CacheShard::default())),
            shaders: Arc::new(Mutex::new(CacheShard::default())),
            shader_env: None,
        };
        cache.prime_defaults();
        cache
    }

    /// Cache with shader loading enabled.
    pub fn with_shader_environment(env: ShaderEnvironment) -> Self {
        let mut cache = Self::new();
        cache.shader_env = Some(env);
        cache
    }

    /// Registers the default resources. They are never removable.
    fn prime_defaults(&self) {
        self.meshes.lock().loaded.insert(
            ResourceId::from_name(DEFAULT_CUBE_ID),
            Arc::new(vec![create_cube(1.0, Vec4::ONE)]),
        );
        self.textures.lock().loaded.insert(
            ResourceId::from_name(DEFAULT_WHITE_ID),
            Arc::new(TextureData::solid(DEFAULT_WHITE_ID, 4, 4, [255, 255, 255, 255])),
        );
    }

    fn is_default(id: &ResourceId) -> bool {
        id.as_str() == DEFAULT_CUBE_ID || id.as_str() == DEFAULT_WHITE_ID
    }

    // ========================================================================
    // Meshes
    // ========================================================================

    /// Loads (or returns the cached id of) a mesh file.
    pub fn load_mesh(&self, path: &Path) -> Result<ResourceId> {
        let id = ResourceId::from_path(path);
        let path = path.to_path_buf();
        sync_load(&self.meshes, id, move || loaders::load_meshes(&path))
    }

    /// Async mesh load; concurrent requests for the same id share one task.
    pub fn load_mesh_async(&self, path: &Path) -> LoadFuture {
        let id = ResourceId::from_path(path);
        let path = path.to_path_buf();
        async_load(&self.meshes, id, move || loaders::load_meshes(&path))
    }

    /// Loads a batch of meshes; resolves once all complete, ids in input
    /// order.
    pub fn load_meshes_async(
        &self,
        paths: &[PathBuf],
    ) -> impl std::future::Future<Output = Result<Vec<ResourceId>>> + Send + 'static {
        let futures: Vec<LoadFuture> = paths.iter().map(|p| self.load_mesh_async(p)).collect();
        async move {
            futures::future::try_join_all(futures)
                .await
                .map_err(KilnError::from)
        }
    }

    pub fn get_mesh(&self, id: &ResourceId) -> Option<Arc<Vec<MeshData>>> {
        self.meshes.lock().loaded.get(id).cloned()
    }

    /// Removes a mesh from the cache. Default resources are kept; returns
    /// whether an entry was removed.
    pub fn unload_mesh(&self, id: &ResourceId) -> bool {
        if Self::is_default(id) {
            return false;
        }
        let mut shard = self.meshes.lock();
        let removed_loaded = shard.loaded.remove(id).is_some();
        let removed_loading = shard.loading.remove(id).is_some();
        removed_loaded || removed_loading
    }

    // ========================================================================
    // Textures
    // ========================================================================

    pub fn load_texture(&self, path: &Path, options: TextureLoadOptions) -> Result<ResourceId> {
        let id = ResourceId::from_path(path);
        let path = path.to_path_buf();
        sync_load(&self.textures, id, move || {
            loaders::texture::load_texture(&path, options)
        })
    }

    pub fn load_texture_async(&self, path: &Path, options: TextureLoadOptions) -> LoadFuture {
        let id = ResourceId::from_path(path);
        let path = path.to_path_buf();
        async_load(&self.textures, id, move || {
            loaders::texture::load_texture(&path, options)
        })
    }

    pub fn load_textures_async(
        &self,
        paths: &[PathBuf],
        options: TextureLoadOptions,
    ) -> impl std::future::Future<Output = Result<Vec<ResourceId>>> + Send + 'static {
        let futures: Vec<LoadFuture> = paths
            .iter()
            .map(|p| self.load_texture_async(p, options))
            .collect();
        async move {
            futures::future::try_join_all(futures)
                .await
                .map_err(KilnError::from)
        }
    }

    pub fn get_texture(&self, id: &ResourceId) -> Option<Arc<TextureData>> {
        self.textures.lock().loaded.get(id).cloned()
    }

    pub fn unload_texture(&self, id: &ResourceId) -> bool {
        if Self::is_default(id) {
            return false;
        }
        let mut shard = self.textures.lock();
        let removed_loaded = shard.loaded.remove(id).is_some();
        let removed_loading = shard.loading.remove(id).is_some();
        removed_loaded || removed_loading
    }

    // ========================================================================
    // Shader Programs
    // ========================================================================

    /// Loads `<name>.{vert,frag,comp}.spv` from `directory`, reflects and
    /// merges the stages, registers the set layouts under `name`, and
    /// stores the program under both the normalized path id and the bare
    /// `name` prefix.
    pub fn load_shader(
        &self,
        directory: &Path,
        name: &str,
        include_compute: bool,
    ) -> Result<ResourceId> {
        let env = self.shader_env()?.clone();
        let id = ResourceId::from_path(&directory.join(name));
        let prefix_id = ResourceId::from_name(name);

        if self.shaders.lock().loaded.contains_key(&id) {
            return Ok(id);
        }
        let program = Arc::new(build_shader_program(
            &env,
            directory,
            name,
            include_compute,
        )?);
        publish_shader(&self.shaders, &id, &prefix_id, program);
        Ok(id)
    }

    pub fn load_shader_async(
        &self,
        directory: &Path,
        name: &str,
        include_compute: bool,
    ) -> LoadFuture {
        let env = match self.shader_env() {
            Ok(env) => env.clone(),
            Err(err) => return futures::future::ready(Err(Arc::new(err))).boxed().shared(),
        };
        let id = ResourceId::from_path(&directory.join(name));
        let prefix_id = ResourceId::from_name(name);
        let directory = directory.to_path_buf();
        let name = name.to_string();

        let mut shard = self.shaders.lock();
        if shard.loaded.contains_key(&id) {
            return futures::future::ready(Ok(id)).boxed().shared();
        }
        if let Some(existing) = shard.loading.get(&id) {
            return existing.clone();
        }

        let shards = self.shaders.clone();
        let task_id = id.clone();
        let handle = asset_runtime().spawn_blocking(move || {
            let result = build_shader_program(&env, &directory, &name, include_compute)
                .map(|program| {
                    publish_shader(&shards, &task_id, &prefix_id, Arc::new(program));
                    task_id.clone()
                });
            shards.lock().loading.remove(&task_id);
            result
        });

        let future: LoadFuture = async move {
            match handle.await {
                Ok(result) => result.map_err(Arc::new),
                Err(join_err) => Err(Arc::new(KilnError::from(join_err))),
            }
        }
        .boxed()
        .shared();
        shard.loading.insert(id, future.clone());
        future
    }

    /// Looks a program up by bare prefix first, then by normalized path.
    pub fn get_shader(&self, key: &str) -> Option<Arc<ShaderProgram>> {
        let shard = self.shaders.lock();
        if let Some(program) = shard.loaded.get(&ResourceId::from_name(key)) {
            return Some(program.clone());
        }
        shard
            .loaded
            .get(&ResourceId::from_path(Path::new(key)))
            .cloned()
    }

    pub fn unload_shader(&self, id: &ResourceId) -> bool {
        let mut shard = self.shaders.lock();
        let removed_loaded = shard.loaded.remove(id).is_some();
        let removed_loading = shard.loading.remove(id).is_some();
        removed_loaded || removed_loading
    }

    fn shader_env(&self) -> Result<&ShaderEnvironment> {
        self.shader_env
            .as_ref()
            .ok_or(KilnError::NotInitialized("shader environment"))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn loaded_mesh_count(&self) -> usize {
        self.meshes.lock().loaded.len()
    }

    pub fn loaded_texture_count(&self) -> usize {
        self.textures.lock().loaded.len()
    }

    pub fn pending_mesh_count(&self) -> usize {
        self.meshes.lock().loading.len()
    }

    pub fn pending_texture_count(&self) -> usize {
        self.textures.lock().loading.len()
    }
}

// ============================================================================
// Load plumbing
// ============================================================================

/// Sync load: parse outside the lock, then insert-if-vacant. A racing
/// thread may re-parse; the loser's result is discarded, which is benign
/// because parses of the same path are idempotent.
fn sync_load<T, F>(shard: &Arc<Mutex<CacheShard<T>>>, id: ResourceId, parse: F) -> Result<ResourceId>
where
    F: FnOnce() -> Result<T>,
{
    if shard.lock().loaded.contains_key(&id) {
        return Ok(id);
    }
    let value = parse()?;
    let mut guard = shard.lock();
    guard
        .loaded
        .entry(id.clone())
        .or_insert_with(|| Arc::new(value));
    Ok(id)
}

/// Async load with coalescing: a load already in flight hands back a clone
/// of its shared future. The background task publishes into `loaded` and
/// removes its own `loading` entry on completion or error.
fn async_load<T, F>(
    shard: &Arc<Mutex<CacheShard<T>>>,
    id: ResourceId,
    parse: F,
) -> LoadFuture
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let mut guard = shard.lock();
    if guard.loaded.contains_key(&id) {
        return futures::future::ready(Ok(id)).boxed().shared();
    }
    if let Some(existing) = guard.loading.get(&id) {
        return existing.clone();
    }

    let task_shard = shard.clone();
    let task_id = id.clone();
    let handle = asset_runtime().spawn_blocking(move || {
        let result = parse().map(|value| {
            let mut guard = task_shard.lock();
            guard
                .loaded
                .entry(task_id.clone())
                .or_insert_with(|| Arc::new(value));
            task_id.clone()
        });
        task_shard.lock().loading.remove(&task_id);
        result
    });

    let future: LoadFuture = async move {
        match handle.await {
            Ok(result) => result.map_err(Arc::new),
            Err(join_err) => Err(Arc::new(KilnError::from(join_err))),
        }
    }
    .boxed()
    .shared();
    guard.loading.insert(id, future.clone());
    future
}

fn publish_shader(
    shard: &Arc<Mutex<CacheShard<ShaderProgram>>>,
    id: &ResourceId,
    prefix_id: &ResourceId,
    program: Arc<ShaderProgram>,
) {
    let mut guard = shard.lock();
    guard
        .loaded
        .entry(id.clone())
        .or_insert_with(|| program.clone());
    guard.loaded.entry(prefix_id.clone()).or_insert(program);
}

/// Reads, reflects, merges and links the program's stages, registering its
/// descriptor-set layouts under the `name` prefix. Layout registration only
/// happens after the merge succeeds, so a failed merge leaves no schemas
/// behind.
fn build_shader_program(
    env: &ShaderEnvironment,
    directory: &Path,
    name: &str,
    include_compute: bool,
) -> Result<ShaderProgram> {
    use ash::vk;

    let read_stage = |suffix: &str, required: bool| -> Result<Option<Vec<u8>>> {
        let path = directory.join(format!("{name}.{suffix}.spv"));
        if !path.exists() {
            if required {
                return Err(KilnError::NotFound(format!(
                    "shader stage file {}",
                    path.display()
                )));
            }
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        if bytes.len() % 4 != 0 {
            return Err(KilnError::MisalignedSpirv {
                path: path.display().to_string(),
                len: bytes.len(),
            });
        }
        Ok(Some(bytes))
    };

    let vertex_bytes = read_stage("vert", false)?;
    let fragment_bytes = read_stage("frag", false)?;
    let compute_bytes = if include_compute {
        read_stage("comp", true)?
    } else {
        None
    };

    if vertex_bytes.is_none() && fragment_bytes.is_none() && compute_bytes.is_none() {
        return Err(KilnError::NotFound(format!(
            "no shader stages for \"{name}\" in {}",
            directory.display()
        )));
    }

    let mut reflections = Vec::new();
    if let Some(bytes) = &vertex_bytes {
        reflections.push(reflect_stage(bytes, vk::ShaderStageFlags::VERTEX)?);
    }
    if let Some(bytes) = &fragment_bytes {
        reflections.push(reflect_stage(bytes, vk::ShaderStageFlags::FRAGMENT)?);
    }
    if let Some(bytes) = &compute_bytes {
        reflections.push(reflect_stage(bytes, vk::ShaderStageFlags::COMPUTE)?);
    }
    let merged = merge_reflections(&reflections)?;

    let mut schemas = Vec::with_capacity(merged.len());
    for (set_index, bindings) in merged {
        schemas.push(env.layouts.register_set_layout(name, set_index, bindings)?);
    }

    let make_module = |bytes: Option<Vec<u8>>, stage| -> Result<Option<Arc<ShaderModule>>> {
        bytes
            .map(|bytes| ShaderModule::new(&env.device, &bytes, stage).map(Arc::new))
            .transpose()
    };
    let vertex = make_module(vertex_bytes, vk::ShaderStageFlags::VERTEX)?;
    let fragment = make_module(fragment_bytes, vk::ShaderStageFlags::FRAGMENT)?;
    let compute = make_module(compute_bytes, vk::ShaderStageFlags::COMPUTE)?;

    log::debug!("Loaded shader program \"{name}\" ({} sets)", schemas.len());
    ShaderProgram::new(name, vertex, fragment, compute, schemas)
}
