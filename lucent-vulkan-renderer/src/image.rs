//! GPU images and the staging uploader.
//!
//! Images come in two flavors: upload images filled from CPU pixel data
//! (fallback rasterizations, scene textures, glyph atlas pages) and
//! offscreen images rendered to by nested passes. Upload images go through
//! a staging buffer recorded into the uploader's command buffer, which the
//! render session submits before any pass samples the data.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::debug;

use crate::buffer::VulkanBuffer;
use crate::context::VulkanContext;
use crate::error::{Result, VulkanError};

/// One GPU image with its view and memory.
pub struct VulkanImage {
    context: Arc<VulkanContext>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    width: u32,
    height: u32,
}

impl VulkanImage {
    fn create(
        context: Arc<VulkanContext>,
        format: vk::Format,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { context.device().create_image(&image_info, None) }?;
        let requirements = unsafe { context.device().get_image_memory_requirements(image) };

        let allocation = context
            .allocator()
            .lock()
            .expect("allocator lock")
            .allocate(&AllocationCreateDesc {
                name: "lucent image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(VulkanError::Allocation)?;
        unsafe {
            context
                .device()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { context.device().create_image_view(&view_info, None) }?;

        Ok(VulkanImage {
            context,
            image,
            view,
            allocation: Some(allocation),
            format,
            width,
            height,
        })
    }

    /// Creates an image and fills it from tightly packed premultiplied
    /// RGBA8 pixels via the uploader's staging path.
    pub fn new_for_upload(
        uploader: &mut VulkanUploader,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Arc<Self>> {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        let image = Self::create(
            uploader.context.clone(),
            vk::Format::R8G8B8A8_UNORM,
            width,
            height,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        let image = Arc::new(image);
        uploader.upload_pixels(&image, pixels)?;
        Ok(image)
    }

    /// Creates an image a nested pass renders to and a parent pass samples.
    pub fn new_for_offscreen(
        context: Arc<VulkanContext>,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<Arc<Self>> {
        debug!("Creating {}x{} offscreen image ({:?})", width, height, format);
        let image = Self::create(
            context,
            format,
            width,
            height,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )?;
        Ok(Arc::new(image))
    }

    /// The raw image handle.
    pub fn vk_image(&self) -> vk::Image {
        self.image
    }

    /// The sampled/attachment view of the image.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// The image format.
    pub fn vk_format(&self) -> vk::Format {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        debug!("Dropping image {:?} ({}x{})", self.image, self.width, self.height);
        unsafe {
            self.context.device().destroy_image_view(self.view, None);
            self.context.device().destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self
                .context
                .allocator()
                .lock()
                .expect("allocator lock")
                .free(allocation);
        }
    }
}

impl std::fmt::Debug for VulkanImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanImage")
            .field("image", &self.image)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Records staging-buffer uploads into one command buffer, submitted by
/// the render session before the passes that sample the uploaded images.
pub struct VulkanUploader {
    context: Arc<VulkanContext>,
    command_pool: vk::CommandPool,
    command_buffer: Option<vk::CommandBuffer>,
    staging: Vec<VulkanBuffer>,
}

impl VulkanUploader {
    /// Creates an uploader with its own transient command pool.
    pub fn new(context: Arc<VulkanContext>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { context.device().create_command_pool(&pool_info, None) }?;
        Ok(VulkanUploader {
            context,
            command_pool,
            command_buffer: None,
            staging: Vec::new(),
        })
    }

    /// The command buffer uploads record into, begun on first use.
    fn command_buffer(&mut self) -> Result<vk::CommandBuffer> {
        if let Some(cb) = self.command_buffer {
            return Ok(cb);
        }
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cb = unsafe { self.context.device().allocate_command_buffers(&alloc_info) }?[0];
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.context.device().begin_command_buffer(cb, &begin_info) }?;
        self.command_buffer = Some(cb);
        Ok(cb)
    }

    /// Copies `pixels` into `image` and transitions it to shader-readable
    /// layout. The staging buffer stays alive until the uploader is
    /// dropped after the frame's fence.
    fn upload_pixels(&mut self, image: &Arc<VulkanImage>, pixels: &[u8]) -> Result<()> {
        let mut staging = VulkanBuffer::new_staging(self.context.clone(), pixels.len())?;
        staging.map().copy_from_slice(pixels);

        let cb = self.command_buffer()?;
        let device = self.context.device().clone();
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        unsafe {
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.vk_image())
                .subresource_range(subresource_range)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .build();
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: image.width(),
                    height: image.height(),
                    depth: 1,
                })
                .build();
            device.cmd_copy_buffer_to_image(
                cb,
                staging.vk_buffer(),
                image.vk_image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_sampled = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.vk_image())
                .subresource_range(subresource_range)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_sampled],
            );
        }

        self.staging.push(staging);
        Ok(())
    }

    /// Ends recording and hands the command buffer to the caller for
    /// submission, or `None` if nothing was uploaded.
    pub fn finish(&mut self) -> Result<Option<vk::CommandBuffer>> {
        match self.command_buffer {
            Some(cb) => {
                unsafe { self.context.device().end_command_buffer(cb) }?;
                Ok(Some(cb))
            }
            None => Ok(None),
        }
    }
}

impl Drop for VulkanUploader {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device()
                .destroy_command_pool(self.command_pool, None);
        }
    }
}

impl std::fmt::Debug for VulkanUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanUploader")
            .field("staging_buffers", &self.staging.len())
            .finish_non_exhaustive()
    }
}
