//! Shader Reflection & Descriptor Subsystem
//!
//! Turns compiled shader bytecode into reusable descriptor-set layouts,
//! allocates sets from pooled pools, and writes bindings by semantic name.

pub mod layout;
pub mod module;
pub mod pool;
pub mod reflection;
pub mod writer;

pub use layout::{DescriptorLayoutCache, DescriptorSetSchema};
pub use module::{ShaderModule, ShaderProgram};
pub use pool::DescriptorPoolAllocator;
pub use reflection::{merge_reflections, reflect_stage, DescriptorBindingInfo, StageReflection};
pub use writer::DescriptorWriter;
