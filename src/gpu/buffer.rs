//! Managed Buffer
//!
//! Owning handle over a device buffer and its allocation. Move-only; the
//! device resource is released exactly once when the handle drops.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::errors::{KilnError, Result};
use crate::gpu::allocator::{BufferUsage, MemoryMode, ResourceAllocator};

/// Owning handle over a `vk::Buffer` plus its backing allocation.
pub struct ManagedBuffer {
    raw: vk::Buffer,
    size: u64,
    usage: BufferUsage,
    memory_mode: MemoryMode,
    allocation: Option<Allocation>,
    allocator: Arc<ResourceAllocator>,
    debug_name: String,
}

impl ManagedBuffer {
    pub(crate) fn new(
        allocator: Arc<ResourceAllocator>,
        raw: vk::Buffer,
        size: u64,
        usage: BufferUsage,
        memory_mode: MemoryMode,
        allocation: Allocation,
        debug_name: &str,
    ) -> Self {
        Self {
            raw,
            size,
            usage,
            memory_mode,
            allocation: Some(allocation),
            allocator,
            debug_name: debug_name.to_string(),
        }
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn memory_mode(&self) -> MemoryMode {
        self.memory_mode
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// Copies `bytes` into the mapped allocation at `offset`.
    ///
    /// Only valid for host-visible memory modes; the caller must guarantee
    /// the device is not reading the range during the write.
    pub fn write_mapped(&mut self, bytes: &[u8], offset: u64) -> Result<()> {
        let size = bytes.len() as u64;
        if offset >= self.size || size > self.size - offset {
            return Err(KilnError::OutOfRange {
                context: format!("write to buffer \"{}\"", self.debug_name),
                offset,
                size,
                capacity: self.size,
            });
        }

        let allocation = self
            .allocation
            .as_mut()
            .ok_or(KilnError::NotInitialized("buffer allocation"))?;
        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            KilnError::InvalidArgument(format!(
                "buffer \"{}\" is not host-visible",
                self.debug_name
            ))
        })?;

        let offset = offset as usize;
        mapped[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for ManagedBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator.destroy_buffer(self.raw, allocation);
        }
    }
}
