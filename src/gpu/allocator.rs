//! Resource Allocator
//!
//! Creates device buffers, images, image views and samplers as owning
//! [`ManagedBuffer`]/[`ManagedImage`]/[`ManagedSampler`] handles. Handles
//! carry an `Arc` back-reference here, so no device resource can outlive
//! the allocator and every resource is released exactly once, on drop.

use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::errors::{KilnError, Result};
use crate::gpu::buffer::ManagedBuffer;
use crate::gpu::context::DeviceContext;
use crate::gpu::image::{ManagedImage, ManagedSampler};

bitflags! {
    /// Semantic buffer usage, translated to `vk::BufferUsageFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX       = 1 << 0;
        const INDEX        = 1 << 1;
        const UNIFORM      = 1 << 2;
        const STORAGE      = 1 << 3;
        const STAGING_SRC  = 1 << 4;
        const STAGING_DST  = 1 << 5;
        const INDIRECT     = 1 << 6;
        const TRANSFER_SRC = 1 << 7;
        const TRANSFER_DST = 1 << 8;
    }
}

bitflags! {
    /// Semantic image usage, translated to `vk::ImageUsageFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const COLOR_RT         = 1 << 0;
        const DEPTH_STENCIL    = 1 << 1;
        const SAMPLED          = 1 << 2;
        const STORAGE          = 1 << 3;
        const TRANSFER_SRC     = 1 << 4;
        const TRANSFER_DST     = 1 << 5;
        const INPUT_ATTACHMENT = 1 << 6;
    }
}

/// Where an allocation lives and how the CPU may touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    /// Device-local, never host-mapped.
    GpuOnly,
    /// Host-visible upload memory.
    CpuToGpu,
    /// Host-visible readback memory.
    GpuToCpu,
}

impl MemoryMode {
    fn location(self) -> MemoryLocation {
        match self {
            MemoryMode::GpuOnly => MemoryLocation::GpuOnly,
            MemoryMode::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryMode::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }
}

impl BufferUsage {
    fn to_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.intersects(BufferUsage::STAGING_SRC | BufferUsage::TRANSFER_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.intersects(BufferUsage::STAGING_DST | BufferUsage::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(BufferUsage::INDIRECT) {
            flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        flags
    }
}

impl ImageUsage {
    fn to_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(ImageUsage::COLOR_RT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(ImageUsage::DEPTH_STENCIL) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(ImageUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(ImageUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(ImageUsage::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(ImageUsage::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(ImageUsage::INPUT_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
        }
        flags
    }
}

/// Description of a device image to create.
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: ImageUsage,
    pub cube_compatible: bool,
    pub debug_name: String,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            cube_compatible: false,
            debug_name: String::new(),
        }
    }
}

/// Creates and releases device buffers, images, views and samplers.
pub struct ResourceAllocator {
    context: Arc<DeviceContext>,
    allocator: Mutex<Option<Allocator>>,
}

impl ResourceAllocator {
    pub fn new(context: Arc<DeviceContext>) -> Result<Arc<Self>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance().clone(),
            device: context.device().clone(),
            physical_device: context.physical_device(),
            debug_settings: gpu_allocator::AllocatorDebugSettings::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })?;

        Ok(Arc::new(Self {
            context,
            allocator: Mutex::new(Some(allocator)),
        }))
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Creates a device buffer. Fails with `InvalidArgument` when `size` is 0.
    pub fn create_buffer(
        self: &Arc<Self>,
        size: u64,
        usage: BufferUsage,
        memory_mode: MemoryMode,
        debug_name: &str,
    ) -> Result<ManagedBuffer> {
        if size == 0 {
            return Err(KilnError::InvalidArgument(format!(
                "buffer \"{debug_name}\" requested with zero size"
            )));
        }

        let device = self.context.device();
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { device.create_buffer(&create_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(raw) };

        let allocation = match self.allocate(
            debug_name,
            requirements,
            memory_mode.location(),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(raw, None) };
                return Err(err);
            }
        };

        unsafe { device.bind_buffer_memory(raw, allocation.memory(), allocation.offset())? };

        if !debug_name.is_empty() {
            self.context.set_debug_name(raw, debug_name);
        }
        log::debug!("Created buffer \"{debug_name}\" ({size} bytes, {usage:?})");

        Ok(ManagedBuffer::new(
            self.clone(),
            raw,
            size,
            usage,
            memory_mode,
            allocation,
            debug_name,
        ))
    }

    /// Creates a device image plus its default view. The view type is
    /// inferred from the description (cube flag, depth, height).
    pub fn create_image(
        self: &Arc<Self>,
        desc: &ImageDesc,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<ManagedImage> {
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.extent.depth == 0 {
            return Err(KilnError::InvalidArgument(format!(
                "image \"{}\" requested with zero extent",
                desc.debug_name
            )));
        }

        let device = self.context.device();

        let image_type = if desc.extent.depth > 1 {
            vk::ImageType::TYPE_3D
        } else if desc.extent.height > 1 || desc.cube_compatible {
            vk::ImageType::TYPE_2D
        } else {
            vk::ImageType::TYPE_1D
        };

        let mut flags = vk::ImageCreateFlags::empty();
        if desc.cube_compatible {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(desc.tiling)
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = unsafe { device.create_image(&create_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(raw) };

        let allocation =
            match self.allocate(&desc.debug_name, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(err) => {
                    unsafe { device.destroy_image(raw, None) };
                    return Err(err);
                }
            };

        unsafe { device.bind_image_memory(raw, allocation.memory(), allocation.offset())? };

        let view_type = if desc.cube_compatible {
            vk::ImageViewType::CUBE
        } else if desc.extent.depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else if desc.extent.height > 1 {
            vk::ImageViewType::TYPE_2D
        } else {
            vk::ImageViewType::TYPE_1D
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            });
        let view = unsafe { device.create_image_view(&view_info, None)? };

        if !desc.debug_name.is_empty() {
            self.context.set_debug_name(raw, &desc.debug_name);
            self.context.set_debug_name(view, &desc.debug_name);
        }
        log::debug!(
            "Created image \"{}\" ({}x{}x{}, {:?}, {} mips)",
            desc.debug_name,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth,
            desc.format,
            desc.mip_levels
        );

        Ok(ManagedImage::new_owned(
            self.clone(),
            raw,
            view,
            desc,
            aspect_mask,
            allocation,
        ))
    }

    /// Creates an additional view over an existing image. The returned
    /// handle owns only the view; dropping it leaves the image intact.
    pub fn create_image_view(
        self: &Arc<Self>,
        base: &ManagedImage,
        aspect_mask: vk::ImageAspectFlags,
        base_mip: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
        view_type: vk::ImageViewType,
        debug_name: &str,
    ) -> Result<ManagedImage> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(base.raw())
            .view_type(view_type)
            .format(base.format())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: base_mip,
                level_count,
                base_array_layer: base_layer,
                layer_count,
            });
        let view = unsafe { self.context.device().create_image_view(&view_info, None)? };

        if !debug_name.is_empty() {
            self.context.set_debug_name(view, debug_name);
        }

        Ok(ManagedImage::new_alias_view(
            self.clone(),
            base,
            view,
            aspect_mask,
            debug_name,
        ))
    }

    /// Creates a sampler. Anisotropic filtering is enabled iff
    /// `max_anisotropy > 1`.
    pub fn create_sampler(
        self: &Arc<Self>,
        mag_filter: vk::Filter,
        min_filter: vk::Filter,
        mipmap_mode: vk::SamplerMipmapMode,
        address_mode: vk::SamplerAddressMode,
        max_anisotropy: f32,
        debug_name: &str,
    ) -> Result<ManagedSampler> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(mag_filter)
            .min_filter(min_filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy.max(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let raw = unsafe { self.context.device().create_sampler(&create_info, None)? };
        if !debug_name.is_empty() {
            self.context.set_debug_name(raw, debug_name);
        }

        Ok(ManagedSampler::new(self.clone(), raw, debug_name))
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let mut guard = self.allocator.lock();
        let allocator = guard
            .as_mut()
            .ok_or(KilnError::NotInitialized("resource allocator"))?;
        Ok(allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    // ========================================================================
    // Release paths (called from handle drops)
    // ========================================================================

    pub(crate) fn destroy_buffer(&self, raw: vk::Buffer, allocation: Allocation) {
        unsafe { self.context.device().destroy_buffer(raw, None) };
        self.free(allocation);
    }

    pub(crate) fn destroy_image(
        &self,
        raw: vk::Image,
        view: vk::ImageView,
        allocation: Option<Allocation>,
        owns_image: bool,
    ) {
        let device = self.context.device();
        unsafe { device.destroy_image_view(view, None) };
        if owns_image {
            unsafe { device.destroy_image(raw, None) };
        }
        if let Some(allocation) = allocation {
            self.free(allocation);
        }
    }

    pub(crate) fn destroy_sampler(&self, raw: vk::Sampler) {
        unsafe { self.context.device().destroy_sampler(raw, None) };
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(err) = allocator.free(allocation) {
                log::error!("Failed to free allocation: {err}");
            }
        }
    }
}

impl Drop for ResourceAllocator {
    fn drop(&mut self) {
        // Drop the gpu-allocator instance before the device context goes away.
        self.allocator.get_mut().take();
    }
}
