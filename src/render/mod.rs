//! Frame Orchestration
//!
//! Declarative render passes, the pipeline cache, and the frame recorder.

pub mod frame;
pub mod pass;
pub mod pipeline;

pub use frame::{DrawCallback, DrawContext, PerFrameGpuResources, Renderer};
pub use pass::{AttachmentDesc, AttachmentType, PassResources, RenderPassDesc};
pub use pipeline::PassPipelineCache;
