//! Staging-Buffer Pool
//!
//! Per-thread pool of host-visible staging buffers. Uploads borrow an entry
//! for the lifetime of one submission; the submission tracker releases it
//! once the fence retires.

use std::sync::Arc;

use crate::errors::Result;
use crate::gpu::allocator::{BufferUsage, MemoryMode, ResourceAllocator};
use crate::gpu::buffer::ManagedBuffer;
use crate::settings::StagingSettings;

struct StagingEntry {
    buffer: ManagedBuffer,
    in_use: bool,
}

pub(crate) struct StagingPool {
    settings: StagingSettings,
    entries: Vec<StagingEntry>,
}

impl StagingPool {
    pub(crate) fn new(settings: StagingSettings) -> Self {
        Self {
            settings,
            entries: Vec::new(),
        }
    }

    /// Borrows a staging buffer of at least `requested` bytes and returns
    /// its index.
    ///
    /// Pooled entries are first-fit by capacity; a full (or disabled) pool
    /// still serves the request with a one-shot entry that the next cleanup
    /// pass discards.
    pub(crate) fn acquire(
        &mut self,
        allocator: &Arc<ResourceAllocator>,
        requested: u64,
    ) -> Result<usize> {
        if self.settings.pool_enabled {
            if let Some(index) = self
                .entries
                .iter()
                .position(|e| !e.in_use && e.buffer.size() >= requested)
            {
                self.entries[index].in_use = true;
                return Ok(index);
            }
        }

        let size = if self.settings.pool_enabled && self.entries.len() < self.settings.max_pooled_buffers
        {
            // Pooled entries are rounded up so later uploads can reuse them,
            // but an oversized request always gets a buffer that fits it.
            requested
                .max(self.settings.min_buffer_size)
                .min(self.settings.max_buffer_size)
                .max(requested)
        } else {
            requested
        };

        let buffer = allocator.create_buffer(
            size,
            BufferUsage::STAGING_SRC,
            MemoryMode::CpuToGpu,
            "staging",
        )?;
        self.entries.push(StagingEntry {
            buffer,
            in_use: true,
        });
        Ok(self.entries.len() - 1)
    }

    pub(crate) fn release(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.in_use = false;
        }
    }

    pub(crate) fn buffer_mut(&mut self, index: usize) -> &mut ManagedBuffer {
        &mut self.entries[index].buffer
    }

    pub(crate) fn buffer(&self, index: usize) -> &ManagedBuffer {
        &self.entries[index].buffer
    }

    /// Shrinks the pool back to its configured capacity by dropping idle
    /// entries from the tail. Entries still in use are kept regardless.
    pub(crate) fn cleanup(&mut self) {
        let cap = if self.settings.pool_enabled {
            self.settings.max_pooled_buffers
        } else {
            0
        };
        while self.entries.len() > cap {
            let tail_idle = self.entries.last().is_some_and(|entry| !entry.in_use);
            if !tail_idle {
                break;
            }
            self.entries.pop();
        }
    }
}
