//! Shader Reflection Tests
//!
//! Tests for the stage-merge rules: stage-flag combination, first-name
//! precedence, binding sort order, and the descriptor-count mismatch that
//! must reject a program before any layout is registered.

use std::collections::BTreeMap;

use ash::vk;
use kiln::shader::{merge_reflections, DescriptorBindingInfo, StageReflection};
use kiln::KilnError;

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

fn stage(
    flags: vk::ShaderStageFlags,
    sets: Vec<(u32, Vec<DescriptorBindingInfo>)>,
) -> StageReflection {
    StageReflection {
        stage: flags,
        sets: sets.into_iter().collect::<BTreeMap<_, _>>(),
    }
}

#[test]
fn vertex_and_fragment_stages_share_a_binding() {
    let vs = stage(
        vk::ShaderStageFlags::VERTEX,
        vec![(
            0,
            vec![binding(
                "uCamera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        )],
    );
    let fs = stage(
        vk::ShaderStageFlags::FRAGMENT,
        vec![(
            0,
            vec![binding(
                "uCamera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )],
    );

    let merged = merge_reflections(&[vs, fs]).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[&0].len(), 1);
    assert_eq!(
        merged[&0][0].stage_flags,
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
    );
}

#[test]
fn count_mismatch_rejects_the_program() {
    // Vertex declares (set 0, binding 1, uniform, count 1); fragment
    // declares the same binding with count 2.
    let vs = stage(
        vk::ShaderStageFlags::VERTEX,
        vec![(
            0,
            vec![binding(
                "uBlock",
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        )],
    );
    let fs = stage(
        vk::ShaderStageFlags::FRAGMENT,
        vec![(
            0,
            vec![binding(
                "uBlock",
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                2,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )],
    );

    let err = merge_reflections(&[vs, fs]).unwrap_err();
    assert!(matches!(err, KilnError::IncompatibleSchema(_)));
}

#[test]
fn distinct_sets_merge_independently() {
    let vs = stage(
        vk::ShaderStageFlags::VERTEX,
        vec![(
            0,
            vec![binding(
                "uCamera",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        )],
    );
    let fs = stage(
        vk::ShaderStageFlags::FRAGMENT,
        vec![(
            1,
            vec![binding(
                "uAlbedo",
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )],
    );

    let merged = merge_reflections(&[vs, fs]).unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[&0][0].name, "uCamera");
    assert_eq!(merged[&1][0].name, "uAlbedo");
}

#[test]
fn merged_bindings_sort_by_index() {
    let fs = stage(
        vk::ShaderStageFlags::FRAGMENT,
        vec![(
            0,
            vec![
                binding(
                    "uB",
                    2,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
                binding(
                    "uA",
                    0,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        )],
    );
    let vs = stage(
        vk::ShaderStageFlags::VERTEX,
        vec![(
            0,
            vec![binding(
                "uC",
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        )],
    );

    let merged = merge_reflections(&[fs, vs]).unwrap();
    let order: Vec<u32> = merged[&0].iter().map(|b| b.binding).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn same_binding_different_type_appends_both() {
    // Matching is by (binding, type); a type difference is not a merge.
    let vs = stage(
        vk::ShaderStageFlags::VERTEX,
        vec![(
            0,
            vec![binding(
                "uA",
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        )],
    );
    let fs = stage(
        vk::ShaderStageFlags::FRAGMENT,
        vec![(
            0,
            vec![binding(
                "uA",
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )],
    );

    let merged = merge_reflections(&[vs, fs]).unwrap();
    assert_eq!(merged[&0].len(), 2);
}

#[test]
fn compute_stage_merges_like_any_other() {
    let cs = stage(
        vk::ShaderStageFlags::COMPUTE,
        vec![(
            0,
            vec![binding(
                "uParticles",
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                1,
                vk::ShaderStageFlags::COMPUTE,
            )],
        )],
    );
    let merged = merge_reflections(&[cs]).unwrap();
    assert_eq!(
        merged[&0][0].stage_flags,
        vk::ShaderStageFlags::COMPUTE
    );
}
