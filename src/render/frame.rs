//! Frame Orchestrator
//!
//! Consumes the declarative pass sequence and records one frame: per-frame
//! uniform uploads, swapchain/depth barriers, dynamic rendering, pluggable
//! draw callbacks, and the acquire/submit/present loop with per-frame
//! fences and semaphores.

use std::sync::Arc;

use ash::vk;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::assets::cache::ResourceCache;
use crate::assets::material::MaterialManager;
use crate::errors::{KilnError, Result};
use crate::gpu::allocator::{BufferUsage, MemoryMode, ResourceAllocator};
use crate::gpu::buffer::ManagedBuffer;
use crate::gpu::context::DeviceContext;
use crate::gpu::image::ManagedImage;
use crate::gpu::transfer::{barrier, TransferEngine};
use crate::render::pass::{AttachmentDesc, RenderPassDesc};
use crate::render::pipeline::PassPipelineCache;
use crate::scene::Scene;
use crate::settings::EngineSettings;
use crate::shader::layout::{DescriptorLayoutCache, DescriptorSetSchema};
use crate::shader::pool::DescriptorPoolAllocator;

/// GPU resources owned by one in-flight frame slot.
pub struct PerFrameGpuResources {
    pub camera_buffer: ManagedBuffer,
    pub light_buffer: ManagedBuffer,
    /// Schemas resolved from the frame shader prefix, ascending set index.
    pub schemas: Vec<Arc<DescriptorSetSchema>>,
    /// Descriptor sets matched 1:1 to `schemas`.
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

/// Everything a draw callback needs to issue draws for one pass.
pub struct DrawContext<'a> {
    pub cmd: vk::CommandBuffer,
    /// Frame slot index in `0..frames_in_flight`.
    pub frame_slot: usize,
    pub pipeline_layout: vk::PipelineLayout,
    pub frame: &'a PerFrameGpuResources,
    pub scene: &'a Scene,
    pub resources: &'a ResourceCache,
    pub materials: Option<&'a MaterialManager>,
}

/// Per-pass draw hook. The callback writes descriptors, binds sets and
/// vertex/index buffers, and issues draw calls; the orchestrator has
/// already begun dynamic rendering and bound the pass pipeline.
pub type DrawCallback = Box<dyn FnMut(&mut DrawContext<'_>) -> Result<()> + Send>;

struct FrameSlot {
    command_buffer: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    resources: PerFrameGpuResources,
}

/// Records and submits frames from the declarative pass sequence.
pub struct Renderer {
    context: Arc<DeviceContext>,
    allocator: Arc<ResourceAllocator>,
    transfer: Arc<TransferEngine>,
    layouts: Arc<DescriptorLayoutCache>,
    descriptor_pool: DescriptorPoolAllocator,
    pipelines: PassPipelineCache,
    settings: EngineSettings,
    command_pool: vk::CommandPool,
    passes: Vec<RenderPassDesc>,
    callbacks: FxHashMap<String, DrawCallback>,
    render_targets: FxHashMap<String, ManagedImage>,
    frames: Vec<FrameSlot>,
    frame_counter: u64,
    transitioned_depth: FxHashSet<String>,
    swapchain_format: vk::Format,
}

impl Renderer {
    pub fn new(
        context: Arc<DeviceContext>,
        allocator: Arc<ResourceAllocator>,
        transfer: Arc<TransferEngine>,
        layouts: Arc<DescriptorLayoutCache>,
        settings: EngineSettings,
    ) -> Result<Self> {
        if settings.frames_in_flight == 0 {
            return Err(KilnError::InvalidArgument(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        let device = context.device();
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.queue_families().graphics);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let descriptor_pool = DescriptorPoolAllocator::new(device.clone());
        let pipelines = PassPipelineCache::new(device.clone());
        let swapchain_format = context.swapchain_format();

        Ok(Self {
            context,
            allocator,
            transfer,
            layouts,
            descriptor_pool,
            pipelines,
            settings,
            command_pool,
            passes: Vec::new(),
            callbacks: FxHashMap::default(),
            render_targets: FxHashMap::default(),
            frames: Vec::new(),
            frame_counter: 0,
            transitioned_depth: FxHashSet::default(),
            swapchain_format,
        })
    }

    // ========================================================================
    // Pass Sequence
    // ========================================================================

    /// Appends a pass. Names are unique within the sequence.
    pub fn add_pass(&mut self, desc: RenderPassDesc) -> Result<()> {
        if self.passes.iter().any(|pass| pass.name == desc.name) {
            return Err(KilnError::InvalidArgument(format!(
                "render pass \"{}\" already registered",
                desc.name
            )));
        }
        self.passes.push(desc);
        Ok(())
    }

    /// Installs the draw callback for a registered pass.
    pub fn set_draw_callback(&mut self, pass_name: &str, callback: DrawCallback) -> Result<()> {
        if !self.passes.iter().any(|pass| pass.name == pass_name) {
            return Err(KilnError::NotFound(format!(
                "render pass \"{pass_name}\""
            )));
        }
        self.callbacks.insert(pass_name.to_string(), callback);
        Ok(())
    }

    /// Registers an offscreen render target resolvable by attachment name.
    pub fn register_render_target(&mut self, name: &str, image: ManagedImage) {
        self.render_targets.insert(name.to_string(), image);
    }

    pub fn render_target(&self, name: &str) -> Option<&ManagedImage> {
        self.render_targets.get(name)
    }

    // ========================================================================
    // Per-Frame Resources
    // ========================================================================

    /// Allocates the per-frame GPU resources against a shader prefix whose
    /// layouts are registered: camera/light buffers plus one descriptor set
    /// per schema, for every frame in flight.
    pub fn prepare_frame_resources(&mut self, shader_prefix: &str) -> Result<()> {
        let schemas = self.layouts.lookup_all(shader_prefix);
        if schemas.is_empty() {
            return Err(KilnError::NotFound(format!(
                "no descriptor schemas registered under \"{shader_prefix}\""
            )));
        }

        self.destroy_frames();

        let device = self.context.device();
        for slot in 0..self.settings.frames_in_flight {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info)? }[0];

            let image_available =
                unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
            let render_finished =
                unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
            // Signaled so the first wait on this slot passes immediately.
            let fence_info =
                vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            let in_flight = unsafe { device.create_fence(&fence_info, None)? };

            let camera_buffer = self.allocator.create_buffer(
                std::mem::size_of::<crate::scene::CameraUbo>() as u64,
                BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST,
                MemoryMode::GpuOnly,
                &format!("frame{slot}-camera"),
            )?;
            let light_buffer = self.allocator.create_buffer(
                std::mem::size_of::<crate::scene::LightUbo>() as u64,
                BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST,
                MemoryMode::GpuOnly,
                &format!("frame{slot}-lights"),
            )?;

            let mut descriptor_sets = Vec::with_capacity(schemas.len());
            for schema in &schemas {
                descriptor_sets.push(self.descriptor_pool.allocate(schema, 1)?[0]);
            }

            self.frames.push(FrameSlot {
                command_buffer,
                image_available,
                render_finished,
                in_flight,
                resources: PerFrameGpuResources {
                    camera_buffer,
                    light_buffer,
                    schemas: schemas.clone(),
                    descriptor_sets,
                },
            });
        }

        log::debug!(
            "Prepared {} frame slots for \"{shader_prefix}\"",
            self.frames.len()
        );
        Ok(())
    }

    fn destroy_frames(&mut self) {
        if self.frames.is_empty() {
            return;
        }
        let _ = self.context.wait_idle();
        let device = self.context.device();
        for slot in self.frames.drain(..) {
            unsafe {
                device.free_command_buffers(self.command_pool, &[slot.command_buffer]);
                device.destroy_semaphore(slot.image_available, None);
                device.destroy_semaphore(slot.render_finished, None);
                device.destroy_fence(slot.in_flight, None);
            }
            // ManagedBuffers in slot.resources release on drop.
        }
    }

    // ========================================================================
    // Frame Recording
    // ========================================================================

    /// Records, submits and presents one frame.
    pub fn render_frame(
        &mut self,
        scene: &Scene,
        resources: &ResourceCache,
        materials: Option<&MaterialManager>,
    ) -> Result<()> {
        if self.frames.is_empty() {
            return Err(KilnError::NotInitialized(
                "per-frame resources (call prepare_frame_resources)",
            ));
        }

        let device = self.context.device().clone();
        let slot_index = (self.frame_counter % u64::from(self.settings.frames_in_flight)) as usize;

        // Gate on this slot's previous submission; frame N and frame
        // N + frames_in_flight are never recorded simultaneously.
        let fence = self.frames[slot_index].in_flight;
        unsafe { device.wait_for_fences(&[fence], true, u64::MAX)? };

        let image_available = self.frames[slot_index].image_available;
        let image_index = match self.context.acquire_next_image(image_available) {
            Ok((index, _suboptimal)) => index,
            Err(KilnError::Device(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                self.recreate_swapchain()?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        unsafe { device.reset_fences(&[fence])? };

        // Step 1: per-frame uniforms. The buffers are device-local, so the
        // data goes through the transfer engine and both uploads must
        // complete before the frame reads them.
        let camera_ubo = scene.camera_ubo();
        let light_ubo = scene.light_ubo();
        let camera_token = self.transfer.upload_to_buffer(
            &self.frames[slot_index].resources.camera_buffer,
            bytemuck::bytes_of(&camera_ubo),
            0,
        )?;
        let light_token = self.transfer.upload_to_buffer(
            &self.frames[slot_index].resources.light_buffer,
            bytemuck::bytes_of(&light_ubo),
            0,
        )?;
        camera_token.wait()?;
        light_token.wait()?;

        // Step 2: record all passes.
        let cmd = self.frames[slot_index].command_buffer;
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        let record_result =
            self.record_passes(cmd, slot_index, image_index, scene, resources, materials);
        if let Err(err) = record_result {
            log::error!("Frame recording failed: {err}");
            unsafe { device.end_command_buffer(cmd).ok() };
            return Err(err);
        }

        unsafe { device.end_command_buffer(cmd)? };

        // Step 3: submit and present.
        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let render_finished = self.frames[slot_index].render_finished;
        let signal_semaphores = [render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        self.context
            .submit(self.context.graphics_queue(), &[submit], fence)?;

        match self.context.present(render_finished, image_index) {
            Ok(false) => {}
            Ok(true) | Err(KilnError::Device(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                self.recreate_swapchain()?;
            }
            Err(err) => return Err(err),
        }

        self.frame_counter += 1;
        Ok(())
    }

    fn record_passes(
        &mut self,
        cmd: vk::CommandBuffer,
        slot_index: usize,
        image_index: u32,
        scene: &Scene,
        resources: &ResourceCache,
        materials: Option<&MaterialManager>,
    ) -> Result<()> {
        let device = self.context.device().clone();
        let swapchain_image = self.context.swapchain_image(image_index as usize);
        let mut swapchain_bound = false;

        // Detach the callbacks so the frame resources can be borrowed while
        // callbacks run; restored before returning.
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let passes = self.passes.clone();

        let result = (|| -> Result<()> {
            for pass in &passes {
                self.record_one_pass(
                    cmd,
                    slot_index,
                    image_index,
                    pass,
                    scene,
                    resources,
                    materials,
                    &mut callbacks,
                    &mut swapchain_bound,
                )?;
            }
            Ok(())
        })();

        self.callbacks = callbacks;
        result?;

        // The presented image was transitioned from Undefined at first use;
        // hand it to the presentation engine now.
        if swapchain_bound {
            record_layout_transition(
                &device,
                cmd,
                swapchain_image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_one_pass(
        &mut self,
        cmd: vk::CommandBuffer,
        slot_index: usize,
        image_index: u32,
        pass: &RenderPassDesc,
        scene: &Scene,
        resources: &ResourceCache,
        materials: Option<&MaterialManager>,
        callbacks: &mut FxHashMap<String, DrawCallback>,
        swapchain_bound: &mut bool,
    ) -> Result<()> {
        let device = self.context.device().clone();

        // Resolve color attachments.
        let mut color_views = Vec::with_capacity(pass.resources.color_outputs.len());
        let mut color_formats = Vec::with_capacity(pass.resources.color_outputs.len());
        for attachment in &pass.resources.color_outputs {
            if attachment.resource_name == self.settings.swapchain_attachment_name {
                color_views.push(self.context.swapchain_view(image_index as usize));
                color_formats.push(self.context.swapchain_format());
                if !*swapchain_bound {
                    // First use in the frame; previous contents are not
                    // carried over, the attachment clears.
                    record_layout_transition(
                        &device,
                        cmd,
                        self.context.swapchain_image(image_index as usize),
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    );
                    *swapchain_bound = true;
                }
            } else {
                let target = self.render_targets.get(&attachment.resource_name).ok_or_else(
                    || {
                        KilnError::InvalidArgument(format!(
                            "unknown attachment \"{}\" in pass \"{}\"",
                            attachment.resource_name, pass.name
                        ))
                    },
                )?;
                color_views.push(target.view());
                color_formats.push(target.format());
            }
        }

        // Resolve the depth attachment with its one-time layout transition.
        let mut depth_view = None;
        let mut depth_format = None;
        if let Some(attachment) = &pass.resources.depth_stencil_output {
            let target = self
                .render_targets
                .get(&attachment.resource_name)
                .ok_or_else(|| {
                    KilnError::InvalidArgument(format!(
                        "unknown depth attachment \"{}\" in pass \"{}\"",
                        attachment.resource_name, pass.name
                    ))
                })?;
            if self.transitioned_depth.insert(attachment.resource_name.clone()) {
                record_layout_transition(
                    &device,
                    cmd,
                    target.raw(),
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                );
            }
            depth_view = Some(target.view());
            depth_format = Some(target.format());
        }

        let render_area = if pass.render_extent.width > 0 && pass.render_extent.height > 0 {
            pass.render_extent
        } else {
            self.context.swapchain_extent()
        };

        // Pass runtime: layout and default pipeline from the cache.
        let schemas = self.layouts.lookup_all(&pass.shader_prefix);
        let pipeline_layout = self
            .pipelines
            .get_or_create_layout(&pass.shader_prefix, &schemas)?;
        let program = resources.get_shader(&pass.shader_prefix).ok_or_else(|| {
            KilnError::NotFound(format!(
                "shader program \"{}\" for pass \"{}\"",
                pass.shader_prefix, pass.name
            ))
        })?;
        let pipeline = self.pipelines.get_or_create_pipeline(
            &pass.shader_prefix,
            &color_formats,
            depth_format,
            &program,
            pipeline_layout,
        )?;

        // Dynamic rendering.
        let color_attachments: Vec<vk::RenderingAttachmentInfo> = pass
            .resources
            .color_outputs
            .iter()
            .zip(&color_views)
            .map(|(attachment, &view)| rendering_attachment(attachment, view))
            .collect();

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: render_area,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        let depth_attachment_info;
        if let (Some(attachment), Some(view)) =
            (&pass.resources.depth_stencil_output, depth_view)
        {
            depth_attachment_info = rendering_attachment(attachment, view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
            rendering_info = rendering_info.depth_attachment(&depth_attachment_info);
        }

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: render_area.width as f32,
                height: render_area.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: render_area,
                }],
            );
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }

        // A pass without a callback still runs attachment setup so later
        // passes observe predictable layouts.
        let callback_result = match callbacks.get_mut(&pass.name) {
            Some(callback) => {
                let mut context = DrawContext {
                    cmd,
                    frame_slot: slot_index,
                    pipeline_layout,
                    frame: &self.frames[slot_index].resources,
                    scene,
                    resources,
                    materials,
                };
                callback(&mut context)
            }
            None => Ok(()),
        };

        unsafe { device.cmd_end_rendering(cmd) };
        callback_result
    }

    // ========================================================================
    // Resize & Teardown
    // ========================================================================

    /// Host-driven resize: waits for the device, recreates the swapchain at
    /// the new extent, and rebuilds pipelines if the format changed.
    pub fn on_resize(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.context.recreate_swapchain(extent)?;
        self.refresh_swapchain_format();
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let extent = self.context.swapchain_extent();
        self.context.recreate_swapchain(extent)?;
        self.refresh_swapchain_format();
        Ok(())
    }

    fn refresh_swapchain_format(&mut self) {
        let format = self.context.swapchain_format();
        if format != self.swapchain_format {
            log::debug!(
                "Swapchain format changed {:?} -> {:?}; rebuilding pipelines",
                self.swapchain_format,
                format
            );
            self.pipelines.invalidate_pipelines();
            self.swapchain_format = format;
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.context.wait_idle()
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    pub fn transfer(&self) -> &Arc<TransferEngine> {
        &self.transfer
    }

    pub fn layouts(&self) -> &Arc<DescriptorLayoutCache> {
        &self.layouts
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy_frames();
        let device = self.context.device();
        unsafe { device.destroy_command_pool(self.command_pool, None) };
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

fn rendering_attachment(
    attachment: &AttachmentDesc,
    view: vk::ImageView,
) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(attachment.load_op)
        .store_op(attachment.store_op)
        .clear_value(attachment.clear_value.unwrap_or_default())
}

fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let aspect = if new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };
    let range = vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let (image_barrier, src_stage, dst_stage) =
        barrier::image_barrier(image, old_layout, new_layout, range);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&image_barrier),
        );
    }
}
