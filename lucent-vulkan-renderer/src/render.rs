//! The render session driving all passes of one frame.
//!
//! A [`Render`] owns the state shared between the render passes of one
//! rendering session: the pipeline cache, the descriptor table (one
//! partially-bound image array, the sampler trio and the gradient-stop
//! storage buffer), the scene-texture cache, and the cleanup list of
//! images that may only be released once the GPU has finished the frame.
//!
//! Submission respects the pass DAG: every nested offscreen pass is
//! submitted before the parent that samples its output, with one semaphore
//! encoding each producer/consumer edge.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use log::{debug, error, info};
use lucent_core::{ColorStop, Rect, RectInt, RenderNode, SceneTexture};

use crate::buffer::VulkanBuffer;
use crate::context::VulkanContext;
use crate::error::Result;
use crate::glyphs::GlyphAtlas;
use crate::image::{VulkanImage, VulkanUploader};
use crate::pipeline::{Pipeline, PipelineKind};
use crate::push_constants::PushConstants;
use crate::raster::{NodeRasterizer, RasterClip, RasterImage};
use crate::render_pass::RenderPass;

/// Capacity of the bound sampled-image array. Indices beyond this degrade
/// to slot 0 rather than failing the frame.
pub const MAX_DESCRIPTOR_IMAGES: u32 = 1024;

/// The samplers available to draw operations, in descriptor-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RenderSampler {
    /// Linear filtering, clamp to edge.
    Default = 0,
    /// Linear filtering, repeat wrapping (repeat nodes).
    Repeat = 1,
    /// Nearest filtering, clamp to edge (texture-scale nodes).
    Nearest = 2,
}

/// One gradient color stop as the shaders read it from the storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct GpuColorStop {
    offset: f32,
    _padding: [f32; 3],
    color: [f32; 4],
}

/// Byte stride of one color stop in the shared storage buffer.
pub const COLOR_STOP_SIZE: usize = std::mem::size_of::<GpuColorStop>();

/// Shared state of one rendering session.
pub struct Render {
    context: Arc<VulkanContext>,
    rasterizer: Box<dyn NodeRasterizer>,
    glyph_atlas: Box<dyn GlyphAtlas>,

    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    samplers: [vk::Sampler; 3],

    /// Pipelines cached per kind and target format; all passes rendering
    /// to the same format share compatible render passes.
    pipelines: HashMap<(PipelineKind, vk::Format), Arc<Pipeline>>,

    /// The image descriptor table of the current frame.
    images: Vec<Arc<VulkanImage>>,
    image_indices: HashMap<vk::Image, u32>,

    /// CPU-side gradient stop data, uploaded once per frame.
    storage_data: Vec<u8>,
    storage_buffer: Option<VulkanBuffer>,

    /// Uploaded scene textures, cached across frames by texture id.
    texture_cache: HashMap<u64, Arc<VulkanImage>>,
    /// Images the GPU may still read; released after the frame fence.
    cleanup_images: Vec<Arc<VulkanImage>>,

    command_pool: vk::CommandPool,
    frame_command_buffers: Vec<vk::CommandBuffer>,
    fence: vk::Fence,
    fence_pending: bool,
    pending_uploader: Option<VulkanUploader>,
    finished_passes: Vec<RenderPass>,
}

impl Render {
    /// Creates a render session on `context` with the given collaborators.
    pub fn new(
        context: Arc<VulkanContext>,
        rasterizer: Box<dyn NodeRasterizer>,
        glyph_atlas: Box<dyn GlyphAtlas>,
    ) -> Result<Self> {
        let device = context.device();

        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(MAX_DESCRIPTOR_IMAGES)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(3)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];
        // The image array and the storage buffer are only written as far
        // as a frame actually references them.
        let binding_flags = [
            vk::DescriptorBindingFlags::PARTIALLY_BOUND,
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND,
        ];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings)
            .push_next(&mut flags_info);
        let descriptor_set_layout =
            unsafe { device.create_descriptor_set_layout(&layout_info, None) }?;

        let set_layouts = [descriptor_set_layout];
        let push_constant_ranges = [PushConstants::range()];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout =
            unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: MAX_DESCRIPTOR_IMAGES,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: 3,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }?;

        let samplers = [
            create_sampler(device, vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE)?,
            create_sampler(device, vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT)?,
            create_sampler(device, vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_EDGE)?,
        ];

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.create_command_pool(&command_pool_info, None) }?;

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) }?;

        info!("Render session created");
        Ok(Render {
            context,
            rasterizer,
            glyph_atlas,
            descriptor_set_layout,
            pipeline_layout,
            descriptor_pool,
            descriptor_set: vk::DescriptorSet::null(),
            samplers,
            pipelines: HashMap::new(),
            images: Vec::new(),
            image_indices: HashMap::new(),
            storage_data: Vec::new(),
            storage_buffer: None,
            texture_cache: HashMap::new(),
            cleanup_images: Vec::new(),
            command_pool,
            frame_command_buffers: Vec::new(),
            fence,
            fence_pending: false,
            pending_uploader: None,
            finished_passes: Vec::new(),
        })
    }

    /// The shared device context.
    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.context
    }

    /// The pipeline layout shared by all pipelines of this session.
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// The glyph-cache collaborator.
    pub fn glyph_atlas(&self) -> &dyn GlyphAtlas {
        self.glyph_atlas.as_ref()
    }

    pub fn glyph_atlas_mut(&mut self) -> &mut dyn GlyphAtlas {
        self.glyph_atlas.as_mut()
    }

    pub(crate) fn atlas_image(
        &mut self,
        texture_index: usize,
        uploader: &mut VulkanUploader,
    ) -> Result<Arc<VulkanImage>> {
        self.glyph_atlas.atlas_image(texture_index, uploader)
    }

    pub(crate) fn rasterize_node(
        &mut self,
        node: &RenderNode,
        clip: &RasterClip,
        width: u32,
        height: u32,
        scale_x: f32,
        scale_y: f32,
    ) -> RasterImage {
        self.rasterizer
            .rasterize(node, clip, width, height, scale_x, scale_y)
    }

    /// The GPU image of a scene texture, uploaded on first use and cached
    /// by texture id afterwards.
    pub fn texture_image(
        &mut self,
        texture: &SceneTexture,
        uploader: &mut VulkanUploader,
    ) -> Result<Arc<VulkanImage>> {
        if let Some(image) = self.texture_cache.get(&texture.id()) {
            return Ok(image.clone());
        }
        let image =
            VulkanImage::new_for_upload(uploader, texture.width, texture.height, &texture.data)?;
        self.texture_cache.insert(texture.id(), image.clone());
        Ok(image)
    }

    /// Keeps `image` alive until the GPU has finished the current frame.
    pub fn add_cleanup_image(&mut self, image: Arc<VulkanImage>) {
        self.cleanup_images.push(image);
    }

    /// The index of `image` in this frame's descriptor table, adding it on
    /// first use.
    pub fn get_image_descriptor(&mut self, image: &Arc<VulkanImage>) -> u32 {
        if let Some(&index) = self.image_indices.get(&image.vk_image()) {
            return index;
        }
        let index = self.images.len() as u32;
        if index >= MAX_DESCRIPTOR_IMAGES {
            // Degrade that draw to the wrong image rather than failing the
            // frame.
            error!("Image descriptor table overflow ({} images)", index);
            return 0;
        }
        self.image_indices.insert(image.vk_image(), index);
        self.images.push(image.clone());
        index
    }

    /// The descriptor-table index of a sampler.
    pub fn get_sampler_descriptor(&self, sampler: RenderSampler) -> u32 {
        sampler as u32
    }

    /// Appends gradient stops to the shared storage buffer data and returns
    /// their byte offset.
    pub fn reserve_color_stops(&mut self, stops: &[ColorStop]) -> usize {
        let offset = self.storage_data.len();
        for stop in stops {
            let gpu = GpuColorStop {
                offset: stop.offset,
                _padding: [0.0; 3],
                color: stop.color.to_array(),
            };
            self.storage_data.extend_from_slice(bytemuck::bytes_of(&gpu));
        }
        offset
    }

    /// The cached pipeline for `kind`, created lazily against
    /// `render_pass`. Pipelines are shared between all passes rendering to
    /// the same target format.
    pub fn pipeline(
        &mut self,
        kind: PipelineKind,
        render_pass: vk::RenderPass,
        format: vk::Format,
    ) -> Result<Arc<Pipeline>> {
        if let Some(pipeline) = self.pipelines.get(&(kind, format)) {
            return Ok(pipeline.clone());
        }
        let pipeline = Pipeline::new(&self.context, kind, self.pipeline_layout, render_pass)?;
        self.pipelines.insert((kind, format), pipeline.clone());
        Ok(pipeline)
    }

    /// Allocates and writes this frame's descriptor set from the reserved
    /// images, samplers and gradient stops. Call after every pass has run
    /// [`RenderPass::reserve_descriptors`].
    pub fn write_descriptors(&mut self) -> Result<()> {
        let device = self.context.device();
        unsafe {
            device.reset_descriptor_pool(
                self.descriptor_pool,
                vk::DescriptorPoolResetFlags::empty(),
            )
        }?;

        let set_layouts = [self.descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }?[0];

        let mut writes = Vec::with_capacity(3);

        let image_infos: Vec<vk::DescriptorImageInfo> = self
            .images
            .iter()
            .map(|image| vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: image.view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
            .collect();
        if !image_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(0)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(&image_infos)
                    .build(),
            );
        }

        let sampler_infos: Vec<vk::DescriptorImageInfo> = self
            .samplers
            .iter()
            .map(|&sampler| vk::DescriptorImageInfo {
                sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            })
            .collect();
        writes.push(
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .image_info(&sampler_infos)
                .build(),
        );

        let buffer_infos;
        if !self.storage_data.is_empty() {
            let mut buffer =
                VulkanBuffer::new_storage(self.context.clone(), self.storage_data.len())?;
            buffer.map().copy_from_slice(&self.storage_data);
            buffer_infos = [vk::DescriptorBufferInfo {
                buffer: buffer.vk_buffer(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            }];
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(2)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(&buffer_infos)
                    .build(),
            );
            self.storage_buffer = Some(buffer);
        }

        unsafe { device.update_descriptor_sets(&writes, &[]) };
        self.descriptor_set = set;
        debug!(
            "Wrote frame descriptors: {} images, {} gradient stop bytes",
            self.images.len(),
            self.storage_data.len()
        );
        Ok(())
    }

    /// Binds this frame's descriptor set; called once per pass.
    pub fn bind_descriptor_sets(&self, command_buffer: vk::CommandBuffer) {
        let sets = [self.descriptor_set];
        unsafe {
            self.context.device().cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &sets,
                &[],
            );
        }
    }

    /// Submits the uploader's staged copies. The uploader is kept alive
    /// until the frame fence so the GPU can read its staging buffers.
    pub fn submit_upload(&mut self, mut uploader: VulkanUploader) -> Result<()> {
        if let Some(command_buffer) = uploader.finish()? {
            let command_buffers = [command_buffer];
            let submit = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .build();
            unsafe {
                self.context
                    .device()
                    .queue_submit(self.context.queue(), &[submit], vk::Fence::null())
            }?;
        }
        self.pending_uploader = Some(uploader);
        Ok(())
    }

    /// Records and submits `pass` and, before it, every nested pass it
    /// spawned, waiting on the semaphores encoding those dependencies. The
    /// root pass (no signal semaphore) signals the frame fence.
    pub fn submit_pass(&mut self, pass: &mut RenderPass) -> Result<()> {
        for i in 0..pass.children_mut().len() {
            self.submit_pass(&mut pass.children_mut()[i])?;
        }

        let device = self.context.device().clone();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }?[0];
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;

        pass.draw(self, command_buffer)?;

        unsafe { device.end_command_buffer(command_buffer) }?;

        let wait_semaphores = pass.wait_semaphores().to_vec();
        // Nested outputs are sampled in fragment shaders.
        let wait_stages =
            vec![vk::PipelineStageFlags::FRAGMENT_SHADER; wait_semaphores.len()];
        let command_buffers = [command_buffer];
        let signal_semaphores: Vec<vk::Semaphore> =
            pass.signal_semaphore().into_iter().collect();
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        let fence = if signal_semaphores.is_empty() {
            self.fence_pending = true;
            self.fence
        } else {
            vk::Fence::null()
        };
        unsafe { device.queue_submit(self.context.queue(), &[submit], fence) }?;
        self.frame_command_buffers.push(command_buffer);
        Ok(())
    }

    /// Renders one frame: compiles `node` into a root pass targeting
    /// `target`, resolves resources, and submits the whole pass DAG. The
    /// frame's resources are reclaimed by [`Render::finish_frame`], which
    /// is called automatically when the next frame starts.
    pub fn render_frame(
        &mut self,
        target: Arc<VulkanImage>,
        scale: Vec2,
        viewport: Rect,
        clip_region: RectInt,
        node: &Arc<RenderNode>,
    ) -> Result<()> {
        if self.fence_pending {
            self.finish_frame()?;
        }

        let mut uploader = VulkanUploader::new(self.context.clone())?;
        let mut pass =
            RenderPass::new(&self.context, target, scale, viewport, clip_region, None)?;
        pass.add(self, node);
        pass.upload(self, &mut uploader)?;
        pass.reserve_descriptors(self);
        self.write_descriptors()?;
        self.submit_upload(uploader)?;
        self.submit_pass(&mut pass)?;
        self.finished_passes.push(pass);
        Ok(())
    }

    /// Waits for the frame fence and releases everything the GPU was still
    /// reading: passes (with their vertex buffers), staging buffers and
    /// cleanup images.
    pub fn finish_frame(&mut self) -> Result<()> {
        let device = self.context.device();
        if self.fence_pending {
            unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX) }?;
            unsafe { device.reset_fences(&[self.fence]) }?;
            self.fence_pending = false;
        }
        if !self.frame_command_buffers.is_empty() {
            unsafe {
                device.free_command_buffers(self.command_pool, &self.frame_command_buffers)
            };
            self.frame_command_buffers.clear();
        }
        self.finished_passes.clear();
        self.pending_uploader = None;
        self.cleanup_images.clear();
        self.images.clear();
        self.image_indices.clear();
        self.storage_data.clear();
        self.storage_buffer = None;
        self.descriptor_set = vk::DescriptorSet::null();
        Ok(())
    }
}

fn create_sampler(
    device: &ash::Device,
    filter: vk::Filter,
    address_mode: vk::SamplerAddressMode,
) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
    let sampler = unsafe { device.create_sampler(&info, None) }?;
    Ok(sampler)
}

impl Drop for Render {
    fn drop(&mut self) {
        debug!("Dropping render session");
        let device = self.context.device().clone();
        if self.fence_pending {
            // The GPU may still use this session's resources; a failed wait
            // here leaves nothing sensible to do but proceed.
            let _ = unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX) };
        }
        self.finished_passes.clear();
        self.pipelines.clear();
        unsafe {
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.command_pool, None);
            for sampler in self.samplers {
                device.destroy_sampler(sampler, None);
            }
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

impl std::fmt::Debug for Render {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Render")
            .field("pipelines", &self.pipelines.len())
            .field("images", &self.images.len())
            .field("cleanup_images", &self.cleanup_images.len())
            .field("fence_pending", &self.fence_pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucent_core::Color;

    #[test]
    fn test_color_stop_layout() {
        assert_eq!(COLOR_STOP_SIZE, 32);
        let stop = GpuColorStop {
            offset: 0.5,
            _padding: [0.0; 3],
            color: Color::WHITE.to_array(),
        };
        let bytes = bytemuck::bytes_of(&stop);
        assert_eq!(bytes.len(), COLOR_STOP_SIZE);
        let read: &GpuColorStop = bytemuck::from_bytes(bytes);
        assert_eq!(*read, stop);
    }

    #[test]
    fn test_sampler_descriptor_indices() {
        assert_eq!(RenderSampler::Default as u32, 0);
        assert_eq!(RenderSampler::Repeat as u32, 1);
        assert_eq!(RenderSampler::Nearest as u32, 2);
    }
}
