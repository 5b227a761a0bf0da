//! Pipeline Cache
//!
//! Caches pipeline layouts by shader prefix and default graphics pipelines
//! by `prefix | color formats | depth format`, so pass runtimes reuse the
//! same pipelines across frames.

use std::mem::offset_of;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::assets::mesh::Vertex;
use crate::errors::{KilnError, Result};
use crate::shader::layout::DescriptorSetSchema;
use crate::shader::module::ShaderProgram;

/// Canonical identity of a default pass pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader_prefix: String,
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
}

/// Cache of pipeline layouts and default graphics pipelines.
pub struct PassPipelineCache {
    device: ash::Device,
    layouts: Mutex<FxHashMap<String, vk::PipelineLayout>>,
    pipelines: Mutex<FxHashMap<PipelineKey, vk::Pipeline>>,
}

impl PassPipelineCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            layouts: Mutex::new(FxHashMap::default()),
            pipelines: Mutex::new(FxHashMap::default()),
        }
    }

    /// Pipeline layout for a shader prefix, built from its registered set
    /// schemas (ascending set index).
    pub fn get_or_create_layout(
        &self,
        shader_prefix: &str,
        schemas: &[Arc<DescriptorSetSchema>],
    ) -> Result<vk::PipelineLayout> {
        if let Some(&layout) = self.layouts.lock().get(shader_prefix) {
            return Ok(layout);
        }

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            schemas.iter().map(|schema| schema.layout()).collect();
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None)? };

        self.layouts
            .lock()
            .insert(shader_prefix.to_string(), layout);
        Ok(layout)
    }

    /// Default graphics pipeline for a pass's attachment formats.
    pub fn get_or_create_pipeline(
        &self,
        shader_prefix: &str,
        color_formats: &[vk::Format],
        depth_format: Option<vk::Format>,
        program: &ShaderProgram,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let key = PipelineKey {
            shader_prefix: shader_prefix.to_string(),
            color_formats: color_formats.to_vec(),
            depth_format,
        };
        if let Some(&pipeline) = self.pipelines.lock().get(&key) {
            return Ok(pipeline);
        }

        let pipeline = self.build_pipeline(color_formats, depth_format, program, layout)?;
        self.pipelines.lock().insert(key, pipeline);
        Ok(pipeline)
    }

    fn build_pipeline(
        &self,
        color_formats: &[vk::Format],
        depth_format: Option<vk::Format>,
        program: &ShaderProgram,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let vertex = program.vertex().ok_or_else(|| {
            KilnError::InvalidArgument(format!(
                "program \"{}\" has no vertex stage",
                program.name()
            ))
        })?;
        let fragment = program.fragment().ok_or_else(|| {
            KilnError::InvalidArgument(format!(
                "program \"{}\" has no fragment stage",
                program.name()
            ))
        })?;

        let entry_point = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.raw())
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.raw())
                .name(entry_point),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 3,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_enabled = depth_format.is_some();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_enabled)
            .depth_write_enable(depth_enabled)
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(color_formats)
            .depth_attachment_format(depth_format.unwrap_or(vk::Format::UNDEFINED));

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&create_info),
                    None,
                )
                .map_err(|(_, err)| err)?
        };
        log::debug!(
            "Built pipeline for \"{}\" ({} color targets)",
            program.name(),
            color_formats.len()
        );
        Ok(pipelines[0])
    }

    /// Destroys every cached pipeline (layouts survive). Used when the
    /// swapchain format changes on resize.
    pub fn invalidate_pipelines(&self) {
        let mut pipelines = self.pipelines.lock();
        for (_, pipeline) in pipelines.drain() {
            unsafe { self.device.destroy_pipeline(pipeline, None) };
        }
    }
}

impl Drop for PassPipelineCache {
    fn drop(&mut self) {
        self.invalidate_pipelines();
        let mut layouts = self.layouts.lock();
        for (_, layout) in layouts.drain() {
            unsafe { self.device.destroy_pipeline_layout(layout, None) };
        }
    }
}
