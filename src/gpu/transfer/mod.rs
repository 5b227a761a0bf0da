//! Transfer Engine
//!
//! One-shot copy/blit/barrier submissions with recycled staging buffers and
//! fence-backed completion tokens.
//!
//! Every thread that issues transfers owns its own command pools, staging
//! pool and submission records, created lazily on first use. A process-level
//! registry keeps the per-thread state reachable for teardown; the hot path
//! only touches the thread's own (uncontended) lock.

pub(crate) mod barrier;
mod staging;
mod token;

pub use token::TransferToken;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::errors::{KilnError, Result};
use crate::gpu::allocator::ResourceAllocator;
use crate::gpu::buffer::ManagedBuffer;
use crate::gpu::image::ManagedImage;
use crate::settings::StagingSettings;
use staging::StagingPool;
use token::TokenState;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_STATES: RefCell<HashMap<u64, Arc<Mutex<ThreadTransferState>>>> =
        RefCell::new(HashMap::new());
}

/// Which queue a recorded command list must be submitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitQueue {
    Transfer,
    Graphics,
}

struct SubmissionRecord {
    token: Arc<TokenState>,
    cmd: vk::CommandBuffer,
    pool: vk::CommandPool,
    staging_indices: Vec<usize>,
}

struct ThreadTransferState {
    transfer_pool: vk::CommandPool,
    graphics_pool: vk::CommandPool,
    staging: StagingPool,
    active: Vec<SubmissionRecord>,
    free_fences: Vec<vk::Fence>,
}

/// Asynchronous upload/copy engine with per-thread submission tracking.
pub struct TransferEngine {
    allocator: Arc<ResourceAllocator>,
    settings: StagingSettings,
    engine_id: u64,
    registry: Mutex<Vec<Arc<Mutex<ThreadTransferState>>>>,
}

impl TransferEngine {
    pub fn new(allocator: Arc<ResourceAllocator>, settings: StagingSettings) -> Arc<Self> {
        Arc::new(Self {
            allocator,
            settings,
            engine_id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            registry: Mutex::new(Vec::new()),
        })
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    // ========================================================================
    // Upload & Copy Operations
    // ========================================================================

    /// Stages `bytes` and records a single-region copy into `dst` at
    /// `dst_offset`, submitted on the transfer queue.
    pub fn upload_to_buffer(
        &self,
        dst: &ManagedBuffer,
        bytes: &[u8],
        dst_offset: u64,
    ) -> Result<TransferToken> {
        let size = bytes.len() as u64;
        self.check_range("upload_to_buffer", dst, dst_offset, size)?;

        let state = self.thread_state()?;
        let mut state = state.lock();

        let staging_index = state.staging.acquire(&self.allocator, size)?;
        if let Err(err) = state.staging.buffer_mut(staging_index).write_mapped(bytes, 0) {
            state.staging.release(staging_index);
            return Err(err);
        }

        let cmd = match self.begin_commands(&state, SubmitQueue::Transfer) {
            Ok(cmd) => cmd,
            Err(err) => {
                state.staging.release(staging_index);
                return Err(err);
            }
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset,
            size,
        };
        let src = state.staging.buffer(staging_index).raw();
        unsafe {
            self.device()
                .cmd_copy_buffer(cmd, src, dst.raw(), std::slice::from_ref(&region));
        }

        self.finish_commands(&mut state, cmd, SubmitQueue::Transfer, vec![staging_index])
    }

    /// Stages `bytes` and records an upload into one mip/layer of `dst`,
    /// bracketed by Undefined→TransferDst and TransferDst→ShaderReadOnly
    /// barriers. Layout transitions reach past the transfer stage, so this
    /// submits on the graphics queue.
    pub fn upload_to_image(
        &self,
        dst: &ManagedImage,
        bytes: &[u8],
        width: u32,
        height: u32,
        depth: u32,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<TransferToken> {
        if bytes.is_empty() {
            return Err(KilnError::InvalidArgument(
                "upload_to_image with empty payload".to_string(),
            ));
        }

        let state = self.thread_state()?;
        let mut state = state.lock();

        let staging_index = state.staging.acquire(&self.allocator, bytes.len() as u64)?;
        if let Err(err) = state.staging.buffer_mut(staging_index).write_mapped(bytes, 0) {
            state.staging.release(staging_index);
            return Err(err);
        }
        let src = state.staging.buffer(staging_index).raw();

        let cmd = match self.begin_commands(&state, SubmitQueue::Graphics) {
            Ok(cmd) => cmd,
            Err(err) => {
                state.staging.release(staging_index);
                return Err(err);
            }
        };
        self.record_buffer_to_image(cmd, src, dst, width, height, depth, mip_level, array_layer);

        self.finish_commands(&mut state, cmd, SubmitQueue::Graphics, vec![staging_index])
    }

    /// Buffer-to-buffer copy on the transfer queue.
    pub fn copy_buffer(
        &self,
        src: &ManagedBuffer,
        dst: &ManagedBuffer,
        size: u64,
        src_offset: u64,
        dst_offset: u64,
    ) -> Result<TransferToken> {
        self.check_range("copy_buffer (source)", src, src_offset, size)?;
        self.check_range("copy_buffer (destination)", dst, dst_offset, size)?;

        let state = self.thread_state()?;
        let mut state = state.lock();

        let cmd = self.begin_commands(&state, SubmitQueue::Transfer)?;
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device()
                .cmd_copy_buffer(cmd, src.raw(), dst.raw(), std::slice::from_ref(&region));
        }

        self.finish_commands(&mut state, cmd, SubmitQueue::Transfer, Vec::new())
    }

    /// Buffer-to-image copy with the same barrier pair as
    /// [`Self::upload_to_image`]; graphics queue.
    pub fn copy_buffer_to_image(
        &self,
        src: &ManagedBuffer,
        dst: &ManagedImage,
        width: u32,
        height: u32,
        depth: u32,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<TransferToken> {
        let state = self.thread_state()?;
        let mut state = state.lock();

        let cmd = self.begin_commands(&state, SubmitQueue::Graphics)?;
        self.record_buffer_to_image(cmd, src.raw(), dst, width, height, depth, mip_level, array_layer);

        self.finish_commands(&mut state, cmd, SubmitQueue::Graphics, Vec::new())
    }

    /// Synchronous host write into a CpuToGpu buffer. The caller guarantees
    /// the device is not reading the range (per-frame buffers in flight).
    pub fn write_to_uniform_buffer(
        &self,
        dst: &mut ManagedBuffer,
        bytes: &[u8],
        dst_offset: u64,
    ) -> Result<()> {
        dst.write_mapped(bytes, dst_offset)
    }

    // ========================================================================
    // Layout Transitions & Mipmaps
    // ========================================================================

    /// Records a single layout transition over the given subresource range.
    ///
    /// The queue is derived from the transition table: stages beyond the
    /// transfer domain (or an explicit request) force the graphics queue.
    pub fn transition_image_layout(
        &self,
        image: &ManagedImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        aspect_mask: vk::ImageAspectFlags,
        base_mip: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
        use_graphics_queue: bool,
    ) -> Result<TransferToken> {
        let range = vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: base_mip,
            level_count,
            base_array_layer: base_layer,
            layer_count,
        };
        let (image_barrier, src_stage, dst_stage) =
            barrier::image_barrier(image.raw(), old_layout, new_layout, range);

        let queue = if use_graphics_queue || barrier::requires_graphics_queue(src_stage, dst_stage)
        {
            SubmitQueue::Graphics
        } else {
            SubmitQueue::Transfer
        };

        let state = self.thread_state()?;
        let mut state = state.lock();

        let cmd = self.begin_commands(&state, queue)?;
        unsafe {
            self.device().cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&image_barrier),
            );
        }

        self.finish_commands(&mut state, cmd, queue, Vec::new())
    }

    /// Generates the full mip chain by blitting each level into the next
    /// with linear filtering, leaving every level in ShaderReadOnly.
    ///
    /// Fails with `UnsupportedFormat` when the image's format does not
    /// support linear sampled-filter blits; level 0 is expected to be in
    /// TransferDst from the preceding upload.
    pub fn generate_mipmaps(
        &self,
        image: &ManagedImage,
        width: u32,
        height: u32,
        levels: u32,
    ) -> Result<TransferToken> {
        if !self
            .allocator
            .context()
            .supports_linear_blit(image.format())
        {
            return Err(KilnError::UnsupportedFormat(format!(
                "format {:?} does not support linear blit for mipmap generation",
                image.format()
            )));
        }

        let state = self.thread_state()?;
        let mut state = state.lock();
        let cmd = self.begin_commands(&state, SubmitQueue::Graphics)?;
        let device = self.device();

        let mut mip_width = width;
        let mut mip_height = height;

        for level in 1..levels {
            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);

            self.record_transition(
                cmd,
                image.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                level_range(image, level - 1),
            );

            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect_mask(),
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: image.array_layers(),
                },
                src_offsets: [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: mip_width as i32,
                        y: mip_height as i32,
                        z: 1,
                    },
                ],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect_mask(),
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: image.array_layers(),
                },
                dst_offsets: [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: next_width as i32,
                        y: next_height as i32,
                        z: 1,
                    },
                ],
            };
            unsafe {
                device.cmd_blit_image(
                    cmd,
                    image.raw(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.raw(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );
            }

            self.record_transition(
                cmd,
                image.raw(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                level_range(image, level - 1),
            );

            mip_width = next_width;
            mip_height = next_height;
        }

        self.record_transition(
            cmd,
            image.raw(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            level_range(image, levels - 1),
        );

        self.finish_commands(&mut state, cmd, SubmitQueue::Graphics, Vec::new())
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    fn record_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: &ManagedImage,
        width: u32,
        height: u32,
        depth: u32,
        mip_level: u32,
        array_layer: u32,
    ) {
        let range = vk::ImageSubresourceRange {
            aspect_mask: dst.aspect_mask(),
            base_mip_level: mip_level,
            level_count: 1,
            base_array_layer: array_layer,
            layer_count: 1,
        };

        self.record_transition(
            cmd,
            dst.raw(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            range,
        );

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: dst.aspect_mask(),
                mip_level,
                base_array_layer: array_layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width,
                height,
                depth,
            },
        };
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                cmd,
                src,
                dst.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }

        self.record_transition(
            cmd,
            dst.raw(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            range,
        );
    }

    fn record_transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
    ) {
        let (image_barrier, src_stage, dst_stage) =
            barrier::image_barrier(image, old_layout, new_layout, range);
        unsafe {
            self.device().cmd_pipeline_barrier(
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

    // ========================================================================
    // Per-thread state & submission tracking
    // ========================================================================

    fn device(&self) -> &ash::Device {
        self.allocator.context().device()
    }

    fn check_range(
        &self,
        context: &str,
        buffer: &ManagedBuffer,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        if size == 0 {
            return Err(KilnError::InvalidArgument(format!(
                "{context}: zero-sized transfer"
            )));
        }
        if offset >= buffer.size() || size > buffer.size() - offset {
            return Err(KilnError::OutOfRange {
                context: format!("{context} into \"{}\"", buffer.debug_name()),
                offset,
                size,
                capacity: buffer.size(),
            });
        }
        Ok(())
    }

    /// Returns this thread's transfer state, creating pools on first use.
    fn thread_state(&self) -> Result<Arc<Mutex<ThreadTransferState>>> {
        let cached = THREAD_STATES.with(|states| states.borrow().get(&self.engine_id).cloned());
        if let Some(state) = cached {
            return Ok(state);
        }

        let context = self.allocator.context();
        let families = context.queue_families();
        let transfer_family = families.transfer.unwrap_or(families.graphics);

        let device = self.device();
        let pool_flags =
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER | vk::CommandPoolCreateFlags::TRANSIENT;

        let transfer_pool_info = vk::CommandPoolCreateInfo::default()
            .flags(pool_flags)
            .queue_family_index(transfer_family);
        let transfer_pool = unsafe { device.create_command_pool(&transfer_pool_info, None)? };

        let graphics_pool_info = vk::CommandPoolCreateInfo::default()
            .flags(pool_flags)
            .queue_family_index(families.graphics);
        let graphics_pool = match unsafe { device.create_command_pool(&graphics_pool_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_command_pool(transfer_pool, None) };
                return Err(err.into());
            }
        };

        let state = Arc::new(Mutex::new(ThreadTransferState {
            transfer_pool,
            graphics_pool,
            staging: StagingPool::new(self.settings),
            active: Vec::new(),
            free_fences: Vec::new(),
        }));

        self.registry.lock().push(state.clone());
        THREAD_STATES.with(|states| {
            states.borrow_mut().insert(self.engine_id, state.clone());
        });
        Ok(state)
    }

    fn begin_commands(
        &self,
        state: &ThreadTransferState,
        queue: SubmitQueue,
    ) -> Result<vk::CommandBuffer> {
        let pool = match queue {
            SubmitQueue::Transfer => state.transfer_pool,
            SubmitQueue::Graphics => state.graphics_pool,
        };

        let device = self.device();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info)? }[0];

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(err) = unsafe { device.begin_command_buffer(cmd, &begin_info) } {
            unsafe { device.free_command_buffers(pool, &[cmd]) };
            return Err(err.into());
        }
        Ok(cmd)
    }

    /// Ends recording, reclaims retired submissions, then submits with a
    /// recycled (or fresh) fence and tracks the new record.
    fn finish_commands(
        &self,
        state: &mut ThreadTransferState,
        cmd: vk::CommandBuffer,
        queue: SubmitQueue,
        staging_indices: Vec<usize>,
    ) -> Result<TransferToken> {
        let device = self.device().clone();
        let pool = match queue {
            SubmitQueue::Transfer => state.transfer_pool,
            SubmitQueue::Graphics => state.graphics_pool,
        };

        if let Err(err) = unsafe { device.end_command_buffer(cmd) } {
            unsafe { device.free_command_buffers(pool, &[cmd]) };
            return Err(err.into());
        }

        self.reclaim(state);

        let fence = match state.free_fences.pop() {
            Some(fence) => fence,
            None => unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? },
        };

        let context = self.allocator.context();
        let vk_queue = match queue {
            SubmitQueue::Transfer => context
                .transfer_queue()
                .unwrap_or_else(|| context.graphics_queue()),
            SubmitQueue::Graphics => context.graphics_queue(),
        };

        let cmds = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&cmds);
        if let Err(err) = context.submit(vk_queue, std::slice::from_ref(&submit), fence) {
            // Discard the partially recorded work; the fence returns to the
            // free list untouched (it was never submitted).
            state.free_fences.push(fence);
            unsafe { device.free_command_buffers(pool, &[cmd]) };
            for index in staging_indices {
                state.staging.release(index);
            }
            return Err(err);
        }

        let token_state = Arc::new(TokenState::new(fence, device));
        state.active.push(SubmissionRecord {
            token: token_state.clone(),
            cmd,
            pool,
            staging_indices,
        });

        Ok(TransferToken::new(token_state))
    }

    /// Recycles submissions whose fence has signaled and whose token has no
    /// external holders; their fences, command lists and staging entries
    /// become reusable.
    fn reclaim(&self, state: &mut ThreadTransferState) {
        let device = self.device().clone();
        let records = std::mem::take(&mut state.active);

        for record in records {
            let retired = record.token.poll() && Arc::strong_count(&record.token) == 1;
            if retired {
                unsafe {
                    let _ = device.reset_fences(&[record.token.fence()]);
                    device.free_command_buffers(record.pool, &[record.cmd]);
                }
                state.free_fences.push(record.token.fence());
                for index in record.staging_indices {
                    state.staging.release(index);
                }
            } else {
                state.active.push(record);
            }
        }

        state.staging.cleanup();
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        let context = self.allocator.context();
        if context.wait_idle().is_err() {
            log::error!("wait_idle failed during transfer engine teardown");
        }

        let device = context.device();
        let registry = std::mem::take(&mut *self.registry.lock());
        for slot in registry {
            let mut state = slot.lock();
            for record in state.active.drain(..) {
                record.token.mark_complete();
                unsafe { device.destroy_fence(record.token.fence(), None) };
            }
            for fence in state.free_fences.drain(..) {
                unsafe { device.destroy_fence(fence, None) };
            }
            unsafe {
                device.destroy_command_pool(state.transfer_pool, None);
                device.destroy_command_pool(state.graphics_pool, None);
            }
        }
    }
}

fn level_range(image: &ManagedImage, level: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: image.aspect_mask(),
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: image.array_layers(),
    }
}
