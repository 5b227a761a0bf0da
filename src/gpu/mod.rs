//! GPU Resource Layer
//!
//! Device context, RAII resource handles, and the transfer engine.

pub mod allocator;
pub mod buffer;
pub mod context;
pub mod image;
pub mod transfer;

pub use allocator::{BufferUsage, ImageDesc, ImageUsage, MemoryMode, ResourceAllocator};
pub use buffer::ManagedBuffer;
pub use context::{DeviceContext, QueueFamilies};
pub use image::{ManagedImage, ManagedSampler};
pub use transfer::{TransferEngine, TransferToken};
