//! SPIR-V shader loading.
//!
//! Shader compilation is outside this crate: pipelines are keyed by name
//! and load precompiled `<name>.vert.spv` / `<name>.frag.spv` files from
//! the context's shader directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use ash::util::read_spv;
use ash::vk;
use log::debug;

use crate::error::{Result, VulkanError};

/// The two shader stages a pipeline consists of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// The file suffix for this stage.
    fn suffix(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

/// Builds the path of a compiled shader.
pub fn shader_path(dir: &Path, name: &str, stage: ShaderStage) -> PathBuf {
    dir.join(format!("{}.{}.spv", name, stage.suffix()))
}

/// Loads SPIR-V bytecode from a file as a stream of 32-bit words.
pub fn load_spirv_file(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path)?;
    read_spv(&mut file).map_err(|_| VulkanError::InvalidShader(path.display().to_string()))
}

/// Creates a Vulkan shader module from SPIR-V bytecode.
pub fn create_shader_module(device: &ash::Device, spirv_code: &[u32]) -> Result<vk::ShaderModule> {
    debug!(
        "Creating shader module from SPIR-V code ({} words)",
        spirv_code.len()
    );
    let create_info = vk::ShaderModuleCreateInfo::builder().code(spirv_code);
    let module = unsafe { device.create_shader_module(&create_info, None) }?;
    Ok(module)
}
