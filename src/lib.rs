#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod assets;
pub mod errors;
pub mod gpu;
pub mod render;
pub mod scene;
pub mod settings;
pub mod shader;

pub use assets::{
    create_cube, create_sphere, MaterialManager, MeshData, PbrMaterial, ResourceCache, ResourceId,
    TextureData, TextureLoadOptions, Vertex,
};
pub use errors::{KilnError, Result};
pub use gpu::{
    BufferUsage, DeviceContext, ImageDesc, ImageUsage, ManagedBuffer, ManagedImage,
    ManagedSampler, MemoryMode, ResourceAllocator, TransferEngine, TransferToken,
};
pub use render::{AttachmentDesc, DrawContext, RenderPassDesc, Renderer};
pub use scene::{Camera, CameraUbo, Light, LightUbo, Scene, SceneNode};
pub use settings::{EngineSettings, StagingSettings};
pub use shader::{
    DescriptorLayoutCache, DescriptorPoolAllocator, DescriptorSetSchema, DescriptorWriter,
    ShaderModule, ShaderProgram,
};
