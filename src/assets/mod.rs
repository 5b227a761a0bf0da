//! Asset System
//!
//! Resource identity, file-format loaders, the dedup cache, and material
//! records.

pub mod cache;
pub mod loaders;
pub mod material;
pub mod mesh;
pub mod path;
pub mod texture;

pub use cache::{
    LoadFuture, LoadResult, ResourceCache, ShaderEnvironment, DEFAULT_CUBE_ID, DEFAULT_WHITE_ID,
};
pub use loaders::texture::TextureLoadOptions;
pub use loaders::MeshFormat;
pub use material::{AlphaMode, MaterialManager, PbrMaterial};
pub use mesh::{create_cube, create_sphere, MeshData, Vertex};
pub use path::ResourceId;
pub use texture::TextureData;
