//! GPU pipeline objects and their registry keys.
//!
//! One [`Pipeline`] exists per (effect family × clip variant) pair,
//! lazily created against a compatible render pass and cached by the
//! render session for the rest of the rendering session. All pipelines
//! share the same pipeline layout (one descriptor set + push constants),
//! draw instanced quads, and blend premultiplied alpha.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use log::debug;
use lucent_core::{Point, Rect};

use crate::clip::{Clip, ClipKind};
use crate::context::VulkanContext;
use crate::error::Result;
use crate::instances::{
    BlendModeInstance, BlurInstance, BorderInstance, BoxShadowInstance, ColorInstance,
    ColorMatrixInstance, ColorTextInstance, CrossFadeInstance, LinearGradientInstance,
    TextInstance, TextureInstance, VertexInputDescription,
};
use crate::shader::ShaderStage;

/// The shader families, one per visual effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineFamily {
    Texture,
    Color,
    LinearGradient,
    ColorMatrix,
    Border,
    InsetShadow,
    OutsetShadow,
    Blur,
    Text,
    ColorText,
    CrossFade,
    BlendMode,
}

impl PipelineFamily {
    /// The base shader name of this family.
    fn shader_base(&self) -> &'static str {
        match self {
            PipelineFamily::Texture => "texture",
            PipelineFamily::Color => "color",
            PipelineFamily::LinearGradient => "linear-gradient",
            PipelineFamily::ColorMatrix => "color-matrix",
            PipelineFamily::Border => "border",
            PipelineFamily::InsetShadow => "inset-shadow",
            PipelineFamily::OutsetShadow => "outset-shadow",
            PipelineFamily::Blur => "blur",
            PipelineFamily::Text => "mask",
            PipelineFamily::ColorText => "color-text",
            PipelineFamily::CrossFade => "cross-fade",
            PipelineFamily::BlendMode => "blend-mode",
        }
    }

    /// The vertex input state for this family's instance struct.
    pub fn vertex_input(&self) -> VertexInputDescription {
        match self {
            PipelineFamily::Texture => TextureInstance::vertex_input(),
            PipelineFamily::Color => ColorInstance::vertex_input(),
            PipelineFamily::LinearGradient => LinearGradientInstance::vertex_input(),
            PipelineFamily::ColorMatrix => ColorMatrixInstance::vertex_input(),
            PipelineFamily::Border => BorderInstance::vertex_input(),
            PipelineFamily::InsetShadow | PipelineFamily::OutsetShadow => {
                BoxShadowInstance::vertex_input()
            }
            PipelineFamily::Blur => BlurInstance::vertex_input(),
            PipelineFamily::Text => TextInstance::vertex_input(),
            PipelineFamily::ColorText => ColorTextInstance::vertex_input(),
            PipelineFamily::CrossFade => CrossFadeInstance::vertex_input(),
            PipelineFamily::BlendMode => BlendModeInstance::vertex_input(),
        }
    }

    /// The per-instance byte stride of this family.
    pub fn vertex_stride(&self) -> usize {
        match self {
            PipelineFamily::Texture => std::mem::size_of::<TextureInstance>(),
            PipelineFamily::Color => std::mem::size_of::<ColorInstance>(),
            PipelineFamily::LinearGradient => std::mem::size_of::<LinearGradientInstance>(),
            PipelineFamily::ColorMatrix => std::mem::size_of::<ColorMatrixInstance>(),
            PipelineFamily::Border => std::mem::size_of::<BorderInstance>(),
            PipelineFamily::InsetShadow | PipelineFamily::OutsetShadow => {
                std::mem::size_of::<BoxShadowInstance>()
            }
            PipelineFamily::Blur => std::mem::size_of::<BlurInstance>(),
            PipelineFamily::Text => std::mem::size_of::<TextInstance>(),
            PipelineFamily::ColorText => std::mem::size_of::<ColorTextInstance>(),
            PipelineFamily::CrossFade => std::mem::size_of::<CrossFadeInstance>(),
            PipelineFamily::BlendMode => std::mem::size_of::<BlendModeInstance>(),
        }
    }
}

/// Which clip path a pipeline's fragment shader takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineClip {
    /// No shader-side clipping.
    None,
    /// Clip against the push-constant rect.
    Rect,
    /// Clip against the push-constant rounded rect.
    Rounded,
}

/// The registry key of one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKind {
    pub family: PipelineFamily,
    pub clip: PipelineClip,
}

impl PipelineKind {
    pub const fn new(family: PipelineFamily, clip: PipelineClip) -> Self {
        PipelineKind { family, clip }
    }

    /// Selects the cheapest clip variant able to render `bounds` at
    /// `offset` under `clip`: unclipped when fully contained, rect-clipped
    /// under a rect clip, rounded-clipped otherwise.
    pub fn select(family: PipelineFamily, clip: &Clip, offset: &Point, bounds: &Rect) -> Self {
        let clip_variant = if clip.contains_rect(offset, bounds) {
            PipelineClip::None
        } else if clip.kind == ClipKind::Rect {
            PipelineClip::Rect
        } else {
            PipelineClip::Rounded
        };
        PipelineKind::new(family, clip_variant)
    }

    /// The shader name this pipeline loads.
    pub fn shader_name(&self) -> String {
        let base = self.family.shader_base();
        match self.clip {
            PipelineClip::None => base.to_string(),
            PipelineClip::Rect => format!("{}-clip", base),
            PipelineClip::Rounded => format!("{}-clip-rounded", base),
        }
    }

    /// The per-instance byte stride of this pipeline.
    pub fn vertex_stride(&self) -> usize {
        self.family.vertex_stride()
    }
}

/// One cached GPU pipeline, immutable once created.
pub struct Pipeline {
    device: ash::Device,
    kind: PipelineKind,
    pipeline: vk::Pipeline,
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
}

impl Pipeline {
    /// Creates the pipeline for `kind` against the given layout and a
    /// compatible render pass.
    pub fn new(
        context: &VulkanContext,
        kind: PipelineKind,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> Result<Arc<Self>> {
        let device = context.device().clone();
        let shader_name = kind.shader_name();
        let vertex_shader = context.load_shader(&shader_name, ShaderStage::Vertex)?;
        let fragment_shader = context.load_shader(&shader_name, ShaderStage::Fragment)?;

        let entry_point = CString::new("main").expect("static entry point name");
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader)
                .name(&entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader)
                .name(&entry_point)
                .build(),
        ];

        let input = kind.family.vertex_input();
        let bindings = [input.binding];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are always dynamic; a pass sets them when
        // recording.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder();

        // Premultiplied alpha over.
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .color_blend_op(vk::BlendOp::ADD)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            context.device().create_graphics_pipelines(
                context.pipeline_cache(),
                &[create_info],
                None,
            )
        }
        .map_err(|(pipelines, result)| {
            for pipeline in pipelines {
                unsafe { device.destroy_pipeline(pipeline, None) };
            }
            crate::error::VulkanError::ResourceCreation {
                resource: "pipeline",
                message: format!("{} ({:?})", result, kind),
            }
        })?;

        debug!("Created pipeline {:?} ({})", kind, shader_name);
        Ok(Arc::new(Pipeline {
            device,
            kind,
            pipeline: pipelines[0],
            vertex_shader,
            fragment_shader,
        }))
    }

    /// The raw pipeline handle.
    pub fn vk_pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// The registry key this pipeline was created for.
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// The per-instance byte stride of this pipeline's vertex input.
    pub fn vertex_stride(&self) -> usize {
        self.kind.vertex_stride()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        debug!("Dropping pipeline {:?}", self.kind);
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_shader_module(self.vertex_shader, None);
            self.device.destroy_shader_module(self.fragment_shader, None);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("kind", &self.kind)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucent_core::RoundedRect;

    #[test]
    fn test_select_variant_by_clip() {
        let bounds = Rect::new(0.0, 0.0, 10.0, 10.0);
        let offset = Point::ZERO;

        let none = Clip::none(&Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(
            PipelineKind::select(PipelineFamily::Color, &none, &offset, &bounds).clip,
            PipelineClip::None
        );

        let rect_clip = Clip {
            kind: ClipKind::Rect,
            rect: RoundedRect::from_rect(Rect::new(5.0, 5.0, 100.0, 100.0)),
        };
        assert_eq!(
            PipelineKind::select(PipelineFamily::Color, &rect_clip, &offset, &bounds).clip,
            PipelineClip::Rect
        );

        let rounded_clip = Clip {
            kind: ClipKind::Rounded,
            rect: RoundedRect::with_uniform_radius(Rect::new(0.0, 0.0, 8.0, 8.0), 4.0),
        };
        assert_eq!(
            PipelineKind::select(PipelineFamily::Color, &rounded_clip, &offset, &bounds).clip,
            PipelineClip::Rounded
        );
    }

    #[test]
    fn test_shader_names() {
        let kind = PipelineKind::new(PipelineFamily::Color, PipelineClip::None);
        assert_eq!(kind.shader_name(), "color");
        let kind = PipelineKind::new(PipelineFamily::Texture, PipelineClip::Rect);
        assert_eq!(kind.shader_name(), "texture-clip");
        let kind = PipelineKind::new(PipelineFamily::Text, PipelineClip::Rounded);
        assert_eq!(kind.shader_name(), "mask-clip-rounded");
    }
}
