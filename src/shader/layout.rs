//! Descriptor-Set Layout Cache
//!
//! Deduplicates descriptor-set layouts by structural identity and indexes
//! them weakly by `(schema_name, set_index)` for lookups from rendering
//! code. The cache never extends a schema's lifetime: once the last strong
//! reference is gone, the layout is destroyed and both map entries go
//! stale.

use std::sync::{Arc, Weak};

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{KilnError, Result};
use crate::shader::reflection::DescriptorBindingInfo;

/// Structural identity of a set layout: the set index plus the sorted
/// binding tuples. Names do not participate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StructuralKey {
    set_index: u32,
    bindings: Vec<(u32, vk::DescriptorType, u32, vk::ShaderStageFlags)>,
}

impl StructuralKey {
    pub(crate) fn new(set_index: u32, bindings: &[DescriptorBindingInfo]) -> Self {
        let mut tuples: Vec<_> = bindings
            .iter()
            .map(|b| (b.binding, b.descriptor_type, b.count, b.stage_flags))
            .collect();
        tuples.sort_by_key(|t| t.0);
        Self {
            set_index,
            bindings: tuples,
        }
    }
}

/// Immutable descriptor-set schema: the layout handle plus its bindings,
/// sorted by binding index.
pub struct DescriptorSetSchema {
    schema_name: String,
    set_index: u32,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBindingInfo>,
    device: Option<ash::Device>,
}

impl DescriptorSetSchema {
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn bindings(&self) -> &[DescriptorBindingInfo] {
        &self.bindings
    }

    /// Looks a binding up by its reflected name.
    pub fn find_binding(&self, name: &str) -> Option<&DescriptorBindingInfo> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub(crate) fn device(&self) -> Option<&ash::Device> {
        self.device.as_ref()
    }

    /// Schema without a device-side layout, for logic that never touches the
    /// device (writer queueing, tests).
    #[doc(hidden)]
    pub fn detached(
        schema_name: &str,
        set_index: u32,
        mut bindings: Vec<DescriptorBindingInfo>,
    ) -> Self {
        bindings.sort_by_key(|b| b.binding);
        Self {
            schema_name: schema_name.to_string(),
            set_index,
            layout: vk::DescriptorSetLayout::null(),
            bindings,
            device: None,
        }
    }
}

impl Drop for DescriptorSetSchema {
    fn drop(&mut self) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_descriptor_set_layout(self.layout, None) };
        }
    }
}

#[derive(Default)]
struct CacheMaps {
    by_structure: FxHashMap<StructuralKey, Weak<DescriptorSetSchema>>,
    by_name: FxHashMap<(String, u32), Weak<DescriptorSetSchema>>,
}

/// Structural dedup table for descriptor-set layouts.
pub struct DescriptorLayoutCache {
    device: ash::Device,
    maps: Mutex<CacheMaps>,
}

impl DescriptorLayoutCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            maps: Mutex::new(CacheMaps::default()),
        }
    }

    /// Registers (or retrieves) the layout for `(schema_name, set_index)`.
    ///
    /// Structurally equal registrations return the same schema instance.
    /// Re-registering an existing name with a different structure fails with
    /// `IncompatibleSchema`; an identical structure returns the existing
    /// schema unchanged.
    pub fn register_set_layout(
        &self,
        schema_name: &str,
        set_index: u32,
        mut bindings: Vec<DescriptorBindingInfo>,
    ) -> Result<Arc<DescriptorSetSchema>> {
        bindings.sort_by_key(|b| b.binding);
        for pair in bindings.windows(2) {
            if pair[0].binding == pair[1].binding {
                return Err(KilnError::IncompatibleSchema(format!(
                    "schema \"{schema_name}\" set {set_index} declares binding {} twice",
                    pair[0].binding
                )));
            }
        }

        let key = StructuralKey::new(set_index, &bindings);
        let name_key = (schema_name.to_string(), set_index);

        let mut maps = self.maps.lock();

        if let Some(existing) = maps.by_name.get(&name_key).and_then(Weak::upgrade) {
            let existing_key = StructuralKey::new(set_index, existing.bindings());
            if existing_key != key {
                return Err(KilnError::IncompatibleSchema(format!(
                    "schema \"{schema_name}\" set {set_index} re-registered with a different structure"
                )));
            }
            return Ok(existing);
        }

        if let Some(existing) = maps.by_structure.get(&key).and_then(Weak::upgrade) {
            maps.by_name.insert(name_key, Arc::downgrade(&existing));
            return Ok(existing);
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_flags)
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None)? };

        let schema = Arc::new(DescriptorSetSchema {
            schema_name: schema_name.to_string(),
            set_index,
            layout,
            bindings,
            device: Some(self.device.clone()),
        });

        maps.by_structure.insert(key, Arc::downgrade(&schema));
        maps.by_name.insert(name_key, Arc::downgrade(&schema));
        log::debug!("Registered descriptor schema \"{schema_name}\" set {set_index}");
        Ok(schema)
    }

    /// Looks up a live schema by name and set index.
    pub fn lookup(&self, schema_name: &str, set_index: u32) -> Option<Arc<DescriptorSetSchema>> {
        self.maps
            .lock()
            .by_name
            .get(&(schema_name.to_string(), set_index))
            .and_then(Weak::upgrade)
    }

    /// All live schemas registered under `schema_name`, ascending by set
    /// index.
    pub fn lookup_all(&self, schema_name: &str) -> Vec<Arc<DescriptorSetSchema>> {
        let maps = self.maps.lock();
        let mut schemas: Vec<_> = maps
            .by_name
            .iter()
            .filter(|((name, _), _)| name == schema_name)
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        schemas.sort_by_key(|s| s.set_index());
        schemas
    }

    /// Drops stale weak entries left behind by retired schemas.
    pub fn prune(&self) {
        let mut maps = self.maps.lock();
        maps.by_structure.retain(|_, weak| weak.strong_count() > 0);
        maps.by_name.retain(|_, weak| weak.strong_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(index: u32, ty: vk::DescriptorType, count: u32) -> DescriptorBindingInfo {
        DescriptorBindingInfo {
            name: format!("b{index}"),
            binding: index,
            descriptor_type: ty,
            count,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        }
    }

    #[test]
    fn structural_key_ignores_declaration_order() {
        let a = [
            binding(1, vk::DescriptorType::UNIFORM_BUFFER, 1),
            binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
        ];
        let b = [
            binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
            binding(1, vk::DescriptorType::UNIFORM_BUFFER, 1),
        ];
        assert_eq!(StructuralKey::new(0, &a), StructuralKey::new(0, &b));
    }

    #[test]
    fn structural_key_distinguishes_counts_and_sets() {
        let a = [binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1)];
        let b = [binding(0, vk::DescriptorType::UNIFORM_BUFFER, 2)];
        assert_ne!(StructuralKey::new(0, &a), StructuralKey::new(0, &b));
        assert_ne!(StructuralKey::new(0, &a), StructuralKey::new(1, &a));
    }
}
