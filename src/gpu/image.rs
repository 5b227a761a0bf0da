//! Managed Image & Sampler
//!
//! Owning handles over device images, image views and samplers. An image
//! handle either owns the image allocation plus its default view, or only
//! an alias view over another handle's image.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::gpu::allocator::{ImageDesc, ResourceAllocator};

/// Owning handle over a `vk::Image` (or an alias view of one).
pub struct ManagedImage {
    raw: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent3D,
    format: vk::Format,
    mip_levels: u32,
    array_layers: u32,
    aspect_mask: vk::ImageAspectFlags,
    allocation: Option<Allocation>,
    owns_image: bool,
    allocator: Arc<ResourceAllocator>,
    debug_name: String,
}

impl ManagedImage {
    pub(crate) fn new_owned(
        allocator: Arc<ResourceAllocator>,
        raw: vk::Image,
        view: vk::ImageView,
        desc: &ImageDesc,
        aspect_mask: vk::ImageAspectFlags,
        allocation: Allocation,
    ) -> Self {
        Self {
            raw,
            view,
            extent: desc.extent,
            format: desc.format,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            aspect_mask,
            allocation: Some(allocation),
            owns_image: true,
            allocator,
            debug_name: desc.debug_name.clone(),
        }
    }

    pub(crate) fn new_alias_view(
        allocator: Arc<ResourceAllocator>,
        base: &ManagedImage,
        view: vk::ImageView,
        aspect_mask: vk::ImageAspectFlags,
        debug_name: &str,
    ) -> Self {
        Self {
            raw: base.raw,
            view,
            extent: base.extent,
            format: base.format,
            mip_levels: base.mip_levels,
            array_layers: base.array_layers,
            aspect_mask,
            allocation: None,
            owns_image: false,
            allocator,
            debug_name: debug_name.to_string(),
        }
    }

    pub fn raw(&self) -> vk::Image {
        self.raw
    }

    /// Default view for owned images, the alias view otherwise.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for ManagedImage {
    fn drop(&mut self) {
        self.allocator
            .destroy_image(self.raw, self.view, self.allocation.take(), self.owns_image);
    }
}

/// Owning handle over a `vk::Sampler`.
pub struct ManagedSampler {
    raw: vk::Sampler,
    allocator: Arc<ResourceAllocator>,
    debug_name: String,
}

impl ManagedSampler {
    pub(crate) fn new(allocator: Arc<ResourceAllocator>, raw: vk::Sampler, debug_name: &str) -> Self {
        Self {
            raw,
            allocator,
            debug_name: debug_name.to_string(),
        }
    }

    pub fn raw(&self) -> vk::Sampler {
        self.raw
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for ManagedSampler {
    fn drop(&mut self) {
        self.allocator.destroy_sampler(self.raw);
    }
}
