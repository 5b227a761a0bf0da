//! Render-Pass Declarations
//!
//! Declarative descriptions of a pass's attachments and resources; the
//! frame orchestrator turns these into dynamic-rendering commands.

use ash::vk;

/// Kind of render target an attachment binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentType {
    Color,
    Depth,
    DepthStencil,
}

/// One attachment binding of a pass.
#[derive(Clone)]
pub struct AttachmentDesc {
    pub ty: AttachmentType,
    /// Name resolved at record time: the reserved swapchain name, or a
    /// render target registered with the orchestrator.
    pub resource_name: String,
    /// `UNDEFINED` means "use the current swapchain format".
    pub format: vk::Format,
    pub sample_count: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<vk::ClearValue>,
}

impl AttachmentDesc {
    /// Color attachment bound to the swapchain image, cleared to the given
    /// color.
    pub fn swapchain(clear_color: [f32; 4]) -> Self {
        Self {
            ty: AttachmentType::Color,
            resource_name: "Swapchain".to_string(),
            format: vk::Format::UNDEFINED,
            sample_count: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: Some(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            }),
        }
    }

    /// Color attachment bound to a named render target.
    pub fn color(resource_name: &str, format: vk::Format) -> Self {
        Self {
            ty: AttachmentType::Color,
            resource_name: resource_name.to_string(),
            format,
            sample_count: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: Some(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            }),
        }
    }

    /// Depth attachment bound to a named render target, cleared to 1.0.
    pub fn depth(resource_name: &str, format: vk::Format) -> Self {
        Self {
            ty: AttachmentType::Depth,
            resource_name: resource_name.to_string(),
            format,
            sample_count: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: Some(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            }),
        }
    }
}

/// Resources a pass reads and writes.
#[derive(Clone, Default)]
pub struct PassResources {
    pub color_outputs: Vec<AttachmentDesc>,
    pub depth_stencil_output: Option<AttachmentDesc>,
    pub sampled_images: Vec<String>,
    pub storage_images: Vec<String>,
    pub buffer_inputs: Vec<String>,
    pub buffer_outputs: Vec<String>,
}

/// One declarative render pass.
#[derive(Clone)]
pub struct RenderPassDesc {
    /// Unique within the pass sequence.
    pub name: String,
    /// Shader prefix whose schemas define the pass's pipeline layout.
    pub shader_prefix: String,
    pub resources: PassResources,
    /// Zero means "use the window extent".
    pub render_extent: vk::Extent2D,
}

impl RenderPassDesc {
    pub fn new(name: &str, shader_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            shader_prefix: shader_prefix.to_string(),
            resources: PassResources::default(),
            render_extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
        }
    }

    pub fn with_color_output(mut self, attachment: AttachmentDesc) -> Self {
        self.resources.color_outputs.push(attachment);
        self
    }

    pub fn with_depth_output(mut self, attachment: AttachmentDesc) -> Self {
        self.resources.depth_stencil_output = Some(attachment);
        self
    }

    pub fn with_render_extent(mut self, extent: vk::Extent2D) -> Self {
        self.render_extent = extent;
        self
    }
}
