//! The device context shared by all rendering objects.
//!
//! Instance creation, physical device selection and logical device setup
//! happen outside this crate; the context wraps the handles the renderer
//! needs, plus the GPU memory allocator and the pipeline cache.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use log::{debug, info, warn};
use lucent_core::ColorDepth;

use crate::error::{Result, VulkanError};
use crate::shader::{self, ShaderStage};

/// Shared device state: logical device, queue, memory allocator, pipeline
/// cache and the shader directory.
pub struct VulkanContext {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
    pipeline_cache: vk::PipelineCache,
    allocator: Mutex<Allocator>,
    shader_dir: PathBuf,
}

impl VulkanContext {
    /// Wraps externally created device handles into a shared context.
    ///
    /// The caller keeps ownership of instance and device teardown; the
    /// context only destroys the objects it creates itself.
    pub fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue: vk::Queue,
        queue_family_index: u32,
        shader_dir: PathBuf,
    ) -> Result<Arc<Self>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
        })
        .map_err(VulkanError::Allocation)?;

        let cache_create_info = vk::PipelineCacheCreateInfo::builder();
        let pipeline_cache = unsafe { device.create_pipeline_cache(&cache_create_info, None) }?;
        info!("Vulkan context created, pipeline cache {:?}", pipeline_cache);

        Ok(Arc::new(VulkanContext {
            instance,
            physical_device,
            device,
            queue,
            queue_family_index,
            pipeline_cache,
            allocator: Mutex::new(allocator),
            shader_dir,
        }))
    }

    /// The logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The graphics queue used for uploads and submission.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// The queue family index of [`Self::queue`].
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// The pipeline cache all pipelines are created against.
    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    /// The GPU memory allocator.
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Loads and compiles the shader module `<name>.<stage>.spv` from the
    /// shader directory.
    pub fn load_shader(&self, name: &str, stage: ShaderStage) -> Result<vk::ShaderModule> {
        let path = shader::shader_path(&self.shader_dir, name, stage);
        let code = shader::load_spirv_file(&path)?;
        shader::create_shader_module(&self.device, &code)
    }

    /// Picks the image format for an offscreen rendering at the given
    /// color depth, degrading to the next lower depth when the device
    /// lacks renderable support for the preferred one.
    pub fn offscreen_format(&self, depth: ColorDepth) -> vk::Format {
        let candidates: &[vk::Format] = match depth {
            ColorDepth::U8 => &[vk::Format::R8G8B8A8_UNORM],
            ColorDepth::U16 => &[vk::Format::R16G16B16A16_UNORM, vk::Format::R8G8B8A8_UNORM],
            ColorDepth::F16 => &[
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R16G16B16A16_UNORM,
                vk::Format::R8G8B8A8_UNORM,
            ],
            ColorDepth::F32 => &[
                vk::Format::R32G32B32A32_SFLOAT,
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R8G8B8A8_UNORM,
            ],
        };
        let required = vk::FormatFeatureFlags::COLOR_ATTACHMENT
            | vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND
            | vk::FormatFeatureFlags::SAMPLED_IMAGE;
        for &format in candidates {
            let props = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.physical_device, format)
            };
            if props.optimal_tiling_features.contains(required) {
                return format;
            }
        }
        // R8G8B8A8_UNORM renderability is required by the spec for any
        // device this renderer targets.
        warn!("No renderable format for depth {:?}, using RGBA8", depth);
        vk::Format::R8G8B8A8_UNORM
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        debug!("Dropping Vulkan context");
        unsafe {
            self.device.destroy_pipeline_cache(self.pipeline_cache, None);
        }
    }
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("queue_family_index", &self.queue_family_index)
            .field("shader_dir", &self.shader_dir)
            .finish_non_exhaustive()
    }
}
