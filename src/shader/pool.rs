//! Descriptor Pool Allocator
//!
//! Ring of descriptor pools sized for a mixed workload. Allocation targets
//! the current pool; an exhausted pool moves to the used list and the next
//! one comes from the free list or is created fresh.

use ash::vk;
use parking_lot::Mutex;

use crate::errors::Result;
use crate::shader::layout::DescriptorSetSchema;

const MAX_SETS_PER_POOL: u32 = 1024;

const POOL_SIZES: &[(vk::DescriptorType, u32)] = &[
    (vk::DescriptorType::UNIFORM_BUFFER, 1024),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1024),
    (vk::DescriptorType::STORAGE_BUFFER, 512),
    (vk::DescriptorType::SAMPLED_IMAGE, 512),
    (vk::DescriptorType::STORAGE_IMAGE, 256),
    (vk::DescriptorType::SAMPLER, 256),
    (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 256),
    (vk::DescriptorType::INPUT_ATTACHMENT, 256),
];

#[derive(Default)]
struct PoolRing {
    current: Option<vk::DescriptorPool>,
    free: Vec<vk::DescriptorPool>,
    used: Vec<vk::DescriptorPool>,
}

/// Pooled allocator for descriptor sets.
pub struct DescriptorPoolAllocator {
    device: ash::Device,
    ring: Mutex<PoolRing>,
}

impl DescriptorPoolAllocator {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            ring: Mutex::new(PoolRing::default()),
        }
    }

    /// Allocates `count` descriptor sets against `schema`'s layout.
    ///
    /// Pool exhaustion rotates the current pool into the used list and
    /// retries once from a recycled or fresh pool.
    pub fn allocate(
        &self,
        schema: &DescriptorSetSchema,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let mut ring = self.ring.lock();

        let pool = self.current_pool(&mut ring)?;
        match self.try_allocate(pool, schema, count) {
            Ok(sets) => Ok(sets),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                ring.used.push(pool);
                ring.current = None;
                let pool = self.current_pool(&mut ring)?;
                Ok(self.try_allocate(pool, schema, count)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn current_pool(&self, ring: &mut PoolRing) -> Result<vk::DescriptorPool> {
        if let Some(pool) = ring.current {
            return Ok(pool);
        }
        let pool = match ring.free.pop() {
            Some(pool) => pool,
            None => self.create_pool()?,
        };
        ring.current = Some(pool);
        Ok(pool)
    }

    fn try_allocate(
        &self,
        pool: vk::DescriptorPool,
        schema: &DescriptorSetSchema,
        count: u32,
    ) -> std::result::Result<Vec<vk::DescriptorSet>, vk::Result> {
        let layouts = vec![schema.layout(); count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
    }

    fn create_pool(&self) -> Result<vk::DescriptorPool> {
        let sizes: Vec<vk::DescriptorPoolSize> = POOL_SIZES
            .iter()
            .map(|&(ty, count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: count,
            })
            .collect();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(MAX_SETS_PER_POOL)
            .pool_sizes(&sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None)? };
        log::debug!("Created descriptor pool {pool:?}");
        Ok(pool)
    }

    /// Returns every pool to the free list without destroying anything. All
    /// previously allocated sets become invalid.
    pub fn reset_pools(&self) -> Result<()> {
        let mut ring = self.ring.lock();
        let ring = &mut *ring;
        let pools: Vec<_> = ring.used.drain(..).chain(ring.current.take()).collect();
        for pool in pools {
            unsafe {
                self.device
                    .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
            }
            ring.free.push(pool);
        }
        Ok(())
    }

    /// Destroys every pool.
    pub fn cleanup(&self) {
        let mut ring = self.ring.lock();
        let ring = &mut *ring;
        for pool in ring
            .used
            .drain(..)
            .chain(ring.free.drain(..))
            .chain(ring.current.take())
        {
            unsafe { self.device.destroy_descriptor_pool(pool, None) };
        }
    }
}

impl Drop for DescriptorPoolAllocator {
    fn drop(&mut self) {
        self.cleanup();
    }
}
