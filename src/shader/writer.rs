//! Descriptor Writer
//!
//! Semantic (by-name) descriptor writes against a schema: `begin` →
//! `write*` → `update`. Call sites never hard-code binding indices; the
//! writer resolves names through the schema's reflected bindings and
//! flushes everything in a single device call.

use ash::vk;

use crate::errors::{KilnError, Result};
use crate::gpu::buffer::ManagedBuffer;
use crate::gpu::image::{ManagedImage, ManagedSampler};
use crate::shader::layout::DescriptorSetSchema;

enum PendingEntries {
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Images(Vec<vk::DescriptorImageInfo>),
}

struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    entries: PendingEntries,
}

/// Writer session bound to one schema and one descriptor set.
pub struct DescriptorWriter<'a> {
    schema: &'a DescriptorSetSchema,
    set: vk::DescriptorSet,
    pending: Vec<PendingWrite>,
}

impl std::fmt::Debug for DescriptorWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorWriter")
            .field("set", &self.set)
            .field("pending_count", &self.pending.len())
            .finish()
    }
}

impl<'a> DescriptorWriter<'a> {
    /// Starts a write session against `set`, which must have been allocated
    /// from `schema`'s layout.
    pub fn begin(schema: &'a DescriptorSetSchema, set: vk::DescriptorSet) -> Self {
        Self {
            schema,
            set,
            pending: Vec::new(),
        }
    }

    // ========================================================================
    // Buffer writes
    // ========================================================================

    pub fn write_buffer(
        &mut self,
        name: &str,
        info: vk::DescriptorBufferInfo,
    ) -> Result<&mut Self> {
        self.write_buffers(name, &[info])
    }

    /// Queues an array write. When more entries than the binding's declared
    /// count are supplied, the **last** `count` entries win; a writer reused
    /// across frames keeps the most recently supplied data.
    pub fn write_buffers(
        &mut self,
        name: &str,
        infos: &[vk::DescriptorBufferInfo],
    ) -> Result<&mut Self> {
        let binding = self.resolve(name, false)?;
        let entries = keep_last(infos, binding.1 as usize)?;
        self.replace(binding.0, binding.2, PendingEntries::Buffers(entries));
        Ok(self)
    }

    /// Whole-buffer convenience write for an owning handle.
    pub fn bind_uniform_buffer(&mut self, name: &str, buffer: &ManagedBuffer) -> Result<&mut Self> {
        let info = vk::DescriptorBufferInfo {
            buffer: buffer.raw(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        self.write_buffer(name, info)
    }

    // ========================================================================
    // Image writes
    // ========================================================================

    pub fn write_image(&mut self, name: &str, info: vk::DescriptorImageInfo) -> Result<&mut Self> {
        self.write_images(name, &[info])
    }

    pub fn write_images(
        &mut self,
        name: &str,
        infos: &[vk::DescriptorImageInfo],
    ) -> Result<&mut Self> {
        let binding = self.resolve(name, true)?;
        let entries = keep_last(infos, binding.1 as usize)?;
        self.replace(binding.0, binding.2, PendingEntries::Images(entries));
        Ok(self)
    }

    /// Combined image/sampler convenience write for owning handles.
    pub fn bind_image(
        &mut self,
        name: &str,
        image: &ManagedImage,
        sampler: &ManagedSampler,
        layout: vk::ImageLayout,
    ) -> Result<&mut Self> {
        let info = vk::DescriptorImageInfo {
            sampler: sampler.raw(),
            image_view: image.view(),
            image_layout: layout,
        };
        self.write_image(name, info)
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Flushes all queued writes in one device call and clears the writer,
    /// which may then be reused.
    pub fn update(&mut self) -> Result<()> {
        let device = self
            .schema
            .device()
            .ok_or(KilnError::NotInitialized("descriptor writer device"))?;

        let writes: Vec<vk::WriteDescriptorSet> = self
            .pending
            .iter()
            .map(|pending| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(pending.binding)
                    .dst_array_element(0)
                    .descriptor_type(pending.descriptor_type);
                match &pending.entries {
                    PendingEntries::Buffers(infos) => write.buffer_info(infos),
                    PendingEntries::Images(infos) => write.image_info(infos),
                }
            })
            .collect();

        if !writes.is_empty() {
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }
        self.pending.clear();
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Resolves `name` to `(binding index, declared count, type)`, checking
    /// that the binding's descriptor type matches the write kind.
    fn resolve(&self, name: &str, image_write: bool) -> Result<(u32, u32, vk::DescriptorType)> {
        let binding = self.schema.find_binding(name).ok_or_else(|| {
            KilnError::NotFound(format!(
                "binding \"{name}\" not present in schema \"{}\" set {}",
                self.schema.schema_name(),
                self.schema.set_index()
            ))
        })?;

        let is_image_type = matches!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                | vk::DescriptorType::SAMPLED_IMAGE
                | vk::DescriptorType::STORAGE_IMAGE
                | vk::DescriptorType::SAMPLER
                | vk::DescriptorType::INPUT_ATTACHMENT
        );
        if is_image_type != image_write {
            return Err(KilnError::InvalidArgument(format!(
                "binding \"{name}\" is {:?}; wrong write kind",
                binding.descriptor_type
            )));
        }

        Ok((binding.binding, binding.count, binding.descriptor_type))
    }

    fn replace(&mut self, binding: u32, ty: vk::DescriptorType, entries: PendingEntries) {
        self.pending.retain(|p| p.binding != binding);
        self.pending.push(PendingWrite {
            binding,
            descriptor_type: ty,
            entries,
        });
    }
}

/// Keeps the last `min(entries.len(), capacity)` elements in order.
fn keep_last<T: Copy>(entries: &[T], capacity: usize) -> Result<Vec<T>> {
    if entries.is_empty() {
        return Err(KilnError::InvalidArgument(
            "descriptor write with no entries".to_string(),
        ));
    }
    let kept = entries.len().min(capacity);
    Ok(entries[entries.len() - kept..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflection::DescriptorBindingInfo;
    use ash::vk::Handle;

    fn schema_with(bindings: Vec<DescriptorBindingInfo>) -> DescriptorSetSchema {
        DescriptorSetSchema::detached("test", 0, bindings)
    }

    fn image_binding(name: &str, index: u32, count: u32) -> DescriptorBindingInfo {
        DescriptorBindingInfo {
            name: name.to_string(),
            binding: index,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        }
    }

    fn image_info(id: u64) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: vk::ImageView::from_raw(id),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn array_write_keeps_last_entries() {
        let schema = schema_with(vec![image_binding("uTex", 0, 4)]);
        let mut writer = DescriptorWriter::begin(&schema, vk::DescriptorSet::null());

        let infos: Vec<_> = (1..=6).map(image_info).collect();
        writer.write_images("uTex", &infos).unwrap();

        let PendingEntries::Images(kept) = &writer.pending[0].entries else {
            panic!("expected image entries");
        };
        let ids: Vec<u64> = kept.iter().map(|i| i.image_view.as_raw()).collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);
    }

    #[test]
    fn shorter_array_is_kept_verbatim() {
        let schema = schema_with(vec![image_binding("uTex", 0, 4)]);
        let mut writer = DescriptorWriter::begin(&schema, vk::DescriptorSet::null());

        let infos: Vec<_> = (1..=2).map(image_info).collect();
        writer.write_images("uTex", &infos).unwrap();

        let PendingEntries::Images(kept) = &writer.pending[0].entries else {
            panic!("expected image entries");
        };
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn missing_name_is_not_found() {
        let schema = schema_with(vec![image_binding("uTex", 0, 1)]);
        let mut writer = DescriptorWriter::begin(&schema, vk::DescriptorSet::null());
        let err = writer.write_image("uOther", image_info(1)).unwrap_err();
        assert!(matches!(err, KilnError::NotFound(_)));
    }

    #[test]
    fn later_write_replaces_earlier_for_same_binding() {
        let schema = schema_with(vec![image_binding("uTex", 0, 1)]);
        let mut writer = DescriptorWriter::begin(&schema, vk::DescriptorSet::null());

        writer.write_image("uTex", image_info(1)).unwrap();
        writer.write_image("uTex", image_info(2)).unwrap();

        assert_eq!(writer.pending.len(), 1);
        let PendingEntries::Images(kept) = &writer.pending[0].entries else {
            panic!("expected image entries");
        };
        assert_eq!(kept[0].image_view.as_raw(), 2);
    }

    #[test]
    fn buffer_write_against_image_binding_is_rejected() {
        let schema = schema_with(vec![image_binding("uTex", 0, 1)]);
        let mut writer = DescriptorWriter::begin(&schema, vk::DescriptorSet::null());
        let info = vk::DescriptorBufferInfo {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        let err = writer.write_buffer("uTex", info).unwrap_err();
        assert!(matches!(err, KilnError::InvalidArgument(_)));
    }
}
