//! Shader Modules & Programs
//!
//! A [`ShaderModule`] is a move-only owner of one compiled stage. A
//! [`ShaderProgram`] shares modules across programs through `Arc` and
//! retains the descriptor-set schemas its reflection registered, so the
//! layouts stay alive as long as any program uses them.

use std::io::Cursor;
use std::sync::Arc;

use ash::vk;

use crate::errors::{KilnError, Result};
use crate::shader::layout::DescriptorSetSchema;

/// Move-only owner of a `vk::ShaderModule`.
pub struct ShaderModule {
    raw: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    device: ash::Device,
}

impl ShaderModule {
    /// Creates a module from word-aligned SPIR-V bytes.
    pub fn new(device: &ash::Device, bytecode: &[u8], stage: vk::ShaderStageFlags) -> Result<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytecode))
            .map_err(|err| KilnError::Reflection(format!("invalid SPIR-V: {err}")))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let raw = unsafe { device.create_shader_module(&create_info, None)? };
        Ok(Self {
            raw,
            stage,
            device: device.clone(),
        })
    }

    pub fn raw(&self) -> vk::ShaderModule {
        self.raw
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.raw, None) };
    }
}

/// A linked set of shader stages plus the set schemas they declared.
///
/// Valid iff at least one module is present.
pub struct ShaderProgram {
    name: String,
    vertex: Option<Arc<ShaderModule>>,
    fragment: Option<Arc<ShaderModule>>,
    compute: Option<Arc<ShaderModule>>,
    set_schemas: Vec<Arc<DescriptorSetSchema>>,
}

impl ShaderProgram {
    pub fn new(
        name: &str,
        vertex: Option<Arc<ShaderModule>>,
        fragment: Option<Arc<ShaderModule>>,
        compute: Option<Arc<ShaderModule>>,
        set_schemas: Vec<Arc<DescriptorSetSchema>>,
    ) -> Result<Self> {
        if vertex.is_none() && fragment.is_none() && compute.is_none() {
            return Err(KilnError::InvalidArgument(format!(
                "shader program \"{name}\" has no modules"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            vertex,
            fragment,
            compute,
            set_schemas,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex(&self) -> Option<&Arc<ShaderModule>> {
        self.vertex.as_ref()
    }

    pub fn fragment(&self) -> Option<&Arc<ShaderModule>> {
        self.fragment.as_ref()
    }

    pub fn compute(&self) -> Option<&Arc<ShaderModule>> {
        self.compute.as_ref()
    }

    /// Schemas registered from this program's reflection, ascending by set
    /// index.
    pub fn set_schemas(&self) -> &[Arc<DescriptorSetSchema>] {
        &self.set_schemas
    }
}
