// Shader stages and programs
//
// Vulkan consumes SPIR-V bytecode. A `ShaderProgram` bundles the compiled
// stages with the reflection data (uniform blocks) the handlers resolve
// named pushes against.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use crate::uniforms::UniformBlock;
use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// One compiled stage of a program.
#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub name: String,
    pub code: Vec<u32>,
}

impl ShaderStage {
    /// Decode SPIR-V bytes. Misaligned or non-SPIR-V input is rejected.
    pub fn from_spirv(stage: vk::ShaderStageFlags, name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let name = name.into();
        let code = ash::util::read_spv(&mut Cursor::new(bytes))
            .with_context(|| format!("Invalid SPIR-V in shader stage '{}'", name))?;

        if code.first() != Some(&SPIRV_MAGIC) {
            anyhow::bail!("Shader stage '{}' is missing the SPIR-V magic number", name);
        }

        Ok(Self { stage, name, code })
    }

    /// Load a compiled stage from disk
    pub fn load<P: AsRef<Path>>(stage: vk::ShaderStageFlags, path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader: {:?}", path))?;
        Self::from_spirv(stage, path.display().to_string(), &bytes)
    }
}

/// Compiled stages plus their reflected uniform blocks.
#[derive(Debug, Clone, Default)]
pub struct ShaderProgram {
    pub stages: Vec<ShaderStage>,
    pub uniform_blocks: Vec<UniformBlock>,
}

impl ShaderProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: ShaderStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_uniform_block(mut self, block: UniformBlock) -> Self {
        self.uniform_blocks.push(block);
        self
    }

    pub fn uniform_block(&self, name: &str) -> Option<&UniformBlock> {
        self.uniform_blocks.iter().find(|b| b.name() == name)
    }
}

/// Create a shader module from a decoded stage
pub fn create_shader_module(device: &VulkanDevice, stage: &ShaderStage) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder()
        .code(&stage.code);

    unsafe {
        device.device.create_shader_module(&create_info, None)
            .with_context(|| format!("Failed to create shader module '{}'", stage.name))
    }
}
