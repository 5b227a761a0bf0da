//! Shader Reflection
//!
//! Extracts per-set descriptor binding declarations from compiled SPIR-V
//! and merges the reflections of multiple stages into one schema per set.
//! The merge stage is pure data, independent of any device.

use std::collections::BTreeMap;

use ash::vk;

use crate::errors::{KilnError, Result};

/// One binding declaration extracted from shader bytecode.
///
/// `name` is diagnostic metadata: bindings are identified by
/// `(binding, descriptor_type)` during merge and by structure in the layout
/// cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBindingInfo {
    pub name: String,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Reflection result of a single shader stage: bindings grouped by set.
#[derive(Debug, Clone)]
pub struct StageReflection {
    pub stage: vk::ShaderStageFlags,
    pub sets: BTreeMap<u32, Vec<DescriptorBindingInfo>>,
}

/// Reflects one stage's bytecode into its per-set binding declarations.
pub fn reflect_stage(bytecode: &[u8], stage: vk::ShaderStageFlags) -> Result<StageReflection> {
    let module = spirv_reflect::ShaderModule::load_u8_data(bytecode)
        .map_err(|err| KilnError::Reflection(err.to_string()))?;

    let descriptor_sets = module
        .enumerate_descriptor_sets(None)
        .map_err(|err| KilnError::Reflection(err.to_string()))?;

    let mut sets = BTreeMap::new();
    for set in descriptor_sets {
        let mut bindings = Vec::with_capacity(set.bindings.len());
        for binding in set.bindings {
            bindings.push(DescriptorBindingInfo {
                name: binding.name.clone(),
                binding: binding.binding,
                descriptor_type: translate_descriptor_type(binding.descriptor_type)?,
                count: binding.count,
                stage_flags: stage,
            });
        }
        bindings.sort_by_key(|b| b.binding);
        sets.insert(set.set, bindings);
    }

    Ok(StageReflection { stage, sets })
}

/// Merges the reflections of several stages (typically vertex + fragment).
///
/// Bindings match by `(binding, descriptor_type)`; a matched pair OR-combines
/// its stage flags and keeps the first-seen name. A declared-count mismatch
/// between stages is an error. Unmatched bindings append unchanged. Bindings
/// within each set come out sorted by binding index.
pub fn merge_reflections(
    stages: &[StageReflection],
) -> Result<BTreeMap<u32, Vec<DescriptorBindingInfo>>> {
    let mut merged: BTreeMap<u32, Vec<DescriptorBindingInfo>> = BTreeMap::new();

    for stage in stages {
        for (&set_index, bindings) in &stage.sets {
            let merged_bindings = merged.entry(set_index).or_default();
            for binding in bindings {
                let existing = merged_bindings.iter_mut().find(|b| {
                    b.binding == binding.binding && b.descriptor_type == binding.descriptor_type
                });
                match existing {
                    Some(existing) => {
                        if existing.count != binding.count {
                            return Err(KilnError::IncompatibleSchema(format!(
                                "descriptor count mismatch at set {set_index} binding {}: {} vs {}",
                                binding.binding, existing.count, binding.count
                            )));
                        }
                        existing.stage_flags |= binding.stage_flags;
                    }
                    None => merged_bindings.push(binding.clone()),
                }
            }
        }
    }

    for bindings in merged.values_mut() {
        bindings.sort_by_key(|b| b.binding);
    }

    Ok(merged)
}

fn translate_descriptor_type(
    ty: spirv_reflect::types::ReflectDescriptorType,
) -> Result<vk::DescriptorType> {
    use spirv_reflect::types::ReflectDescriptorType as R;
    Ok(match ty {
        R::Sampler => vk::DescriptorType::SAMPLER,
        R::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        R::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        R::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        R::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        R::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        R::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        R::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        R::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        R::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        R::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        R::AccelerationStructureNV => vk::DescriptorType::ACCELERATION_STRUCTURE_NV,
        R::Undefined => {
            return Err(KilnError::Reflection(
                "undefined descriptor type in bytecode".to_string(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(
        name: &str,
        index: u32,
        ty: vk::DescriptorType,
        count: u32,
        stage: vk::ShaderStageFlags,
    ) -> DescriptorBindingInfo {
        DescriptorBindingInfo {
            name: name.to_string(),
            binding: index,
            descriptor_type: ty,
            count,
            stage_flags: stage,
        }
    }

    fn stage_with(
        stage: vk::ShaderStageFlags,
        set: u32,
        bindings: Vec<DescriptorBindingInfo>,
    ) -> StageReflection {
        let mut sets = BTreeMap::new();
        sets.insert(set, bindings);
        StageReflection { stage, sets }
    }

    #[test]
    fn merge_combines_stage_flags_for_matching_bindings() {
        let vs = stage_with(
            vk::ShaderStageFlags::VERTEX,
            0,
            vec![binding(
                "uCamera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fs = stage_with(
            vk::ShaderStageFlags::FRAGMENT,
            0,
            vec![binding(
                "uCamera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let merged = merge_reflections(&[vs, fs]).unwrap();
        let bindings = &merged[&0];
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn merge_keeps_first_seen_name() {
        let vs = stage_with(
            vk::ShaderStageFlags::VERTEX,
            0,
            vec![binding(
                "uCamera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fs = stage_with(
            vk::ShaderStageFlags::FRAGMENT,
            0,
            vec![binding(
                "uCameraData",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let merged = merge_reflections(&[vs, fs]).unwrap();
        assert_eq!(merged[&0][0].name, "uCamera");
    }

    #[test]
    fn merge_rejects_count_mismatch() {
        let vs = stage_with(
            vk::ShaderStageFlags::VERTEX,
            0,
            vec![binding(
                "uData",
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fs = stage_with(
            vk::ShaderStageFlags::FRAGMENT,
            0,
            vec![binding(
                "uData",
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                2,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let err = merge_reflections(&[vs, fs]).unwrap_err();
        assert!(matches!(err, KilnError::IncompatibleSchema(_)));
    }

    #[test]
    fn merge_appends_unmatched_bindings_and_sorts() {
        let vs = stage_with(
            vk::ShaderStageFlags::VERTEX,
            0,
            vec![binding(
                "uModel",
                3,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let fs = stage_with(
            vk::ShaderStageFlags::FRAGMENT,
            0,
            vec![
                binding(
                    "uAlbedo",
                    1,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
                binding(
                    "uLights",
                    0,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        );

        let merged = merge_reflections(&[vs, fs]).unwrap();
        let indices: Vec<u32> = merged[&0].iter().map(|b| b.binding).collect();
        assert_eq!(indices, vec![0, 1, 3]);
    }
}
