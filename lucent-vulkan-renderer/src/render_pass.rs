//! The render-pass compiler.
//!
//! One [`RenderPass`] paints one target image. Rendering happens in
//! phases: the tree walk compiles render nodes into a flat list of
//! [`DrawOp`]s ([`OpList`], device-free and unit-testable), the upload
//! phase resolves every operation's source images (rasterizing fallbacks
//! and spawning nested offscreen passes), the packing phase lays all
//! instance data into one vertex buffer, and emission streams the
//! operations into a Vulkan command buffer with pipeline-change batching.

use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec2};
use log::debug;
use lucent_core::{
    Point, Rect, RectInt, RenderNode, RoundedRect, ScalingFilter, Transform, TransformCategory,
};

use crate::buffer::VulkanBuffer;
use crate::clip::{Clip, ClipKind};
use crate::context::VulkanContext;
use crate::error::Result;
use crate::glyphs::GlyphAtlas;
use crate::image::{VulkanImage, VulkanUploader};
use crate::instances::{
    self, BlendModeInstance, BlurInstance, BorderInstance, BoxShadowInstance, ColorInstance,
    ColorMatrixInstance, ColorTextInstance, CrossFadeInstance, LinearGradientInstance,
    TextInstance, TextureInstance,
};
use crate::pipeline::{PipelineClip, PipelineFamily, PipelineKind};
use crate::push_constants::PushConstants;
use crate::raster::RasterClip;
use crate::render::{Render, RenderSampler};

const ORTHO_NEAR_PLANE: f32 = -10000.0;
const ORTHO_FAR_PLANE: f32 = 10000.0;

/// The operation variants that carry up to two source images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOpKind {
    /// CPU-rasterize the node, unclipped.
    Fallback,
    /// CPU-rasterize the node under a rectangular clip.
    FallbackClip,
    /// CPU-rasterize the node under a rounded clip.
    FallbackRoundedClip,
    Texture,
    TextureScale,
    Color,
    LinearGradient,
    Opacity,
    Blur,
    ColorMatrix,
    Border,
    InsetShadow,
    OutsetShadow,
    Repeat,
    CrossFade,
    BlendMode,
}

/// One compiled draw with 0, 1 or 2 image sources.
#[derive(Debug, Clone)]
pub struct RenderOp {
    pub kind: RenderOpKind,
    /// The node this operation was compiled from; parameters are read from
    /// it during upload and packing.
    pub node: Arc<RenderNode>,
    /// Offset of the node in the pass's coordinate space.
    pub offset: Point,
    pub pipeline: PipelineKind,
    /// Clip snapshot, used by the fallback variants as the raster clip.
    pub clip: RoundedRect,
    /// Resolved during upload.
    pub source: Option<Arc<VulkanImage>>,
    pub source2: Option<Arc<VulkanImage>>,
    /// Normalized texture rect `source` maps to.
    pub source_rect: Rect,
    pub source2_rect: Rect,
    /// Byte offset into the vertex buffer, filled by the counting pass.
    pub vertex_offset: usize,
    /// Byte offset into the shared storage buffer (gradient stops).
    pub buffer_offset: usize,
    /// (image, sampler) descriptor indices.
    pub image_descriptor: [u32; 2],
    pub image_descriptor2: [u32; 2],
}

/// Whether a text operation renders alpha masks or color glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOpKind {
    Text,
    ColorText,
}

/// One glyph run sharing a single atlas page.
#[derive(Debug, Clone)]
pub struct TextOp {
    pub kind: TextOpKind,
    pub node: Arc<RenderNode>,
    pub offset: Point,
    pub pipeline: PipelineKind,
    pub source: Option<Arc<VulkanImage>>,
    pub vertex_offset: usize,
    pub image_descriptor: [u32; 2],
    /// Atlas page shared by the whole run.
    pub texture_index: usize,
    /// Index of the first glyph of the run in the node's glyph string.
    pub start_glyph: usize,
    /// Number of non-empty glyphs in the run (= instance count).
    pub num_glyphs: usize,
    /// Raster scale the glyphs were cached at.
    pub scale: f32,
}

/// Snapshot of the per-draw uniform state.
#[derive(Debug, Clone)]
pub struct PushConstantsOp {
    pub node: Arc<RenderNode>,
    pub scale: Vec2,
    pub mvp: Mat4,
    pub clip: RoundedRect,
}

/// A device scissor change.
#[derive(Debug, Clone)]
pub struct ScissorOp {
    pub node: Arc<RenderNode>,
    pub rect: RectInt,
}

/// One entry of the compiled operation list.
#[derive(Debug, Clone)]
pub enum DrawOp {
    Render(RenderOp),
    Text(TextOp),
    PushConstants(PushConstantsOp),
    Scissor(ScissorOp),
}

/// The state threaded through the recursive tree walk. Value semantics:
/// every recursion clones and adjusts, so enter/exit never needs explicit
/// save/restore.
#[derive(Debug, Clone)]
pub struct ParseState {
    /// Device scissor rectangle.
    pub scissor: RectInt,
    /// Translation from node-local units to the current space.
    pub offset: Point,
    /// Accumulated raster scale.
    pub scale: Vec2,
    /// Accumulated modelview; `None` means identity.
    pub modelview: Option<Transform>,
    pub projection: Mat4,
    /// Clip in the current coordinate space.
    pub clip: Clip,
}

/// Whether `rect` under the current scale and modelview lands exactly on
/// integer device pixels, making it expressible as a hardware scissor.
fn clip_can_be_scissored(rect: &Rect, scale: Vec2, modelview: &Option<Transform>) -> Option<RectInt> {
    let transformed;
    let rect = match modelview {
        None => rect,
        Some(mv) => match mv.category() {
            TransformCategory::Identity => rect,
            TransformCategory::Translate2d | TransformCategory::Affine2d => {
                transformed = mv.transform_bounds(rect);
                &transformed
            }
            _ => return None,
        },
    };

    let x = rect.origin.x * scale.x;
    let y = rect.origin.y * scale.y;
    let width = rect.size.width * scale.x;
    let height = rect.size.height * scale.y;
    let int_rect = RectInt::new(x as i32, y as i32, width as i32, height as i32);
    if int_rect.x as f32 == x
        && int_rect.y as f32 == y
        && int_rect.width as f32 == width
        && int_rect.height as f32 == height
    {
        Some(int_rect)
    } else {
        None
    }
}

/// Maps `rect` into the normalized texture space of `tex`.
fn get_tex_rect(rect: &Rect, tex: &Rect) -> Rect {
    Rect::new(
        (rect.origin.x - tex.origin.x) / tex.size.width,
        (rect.origin.y - tex.origin.y) / tex.size.height,
        rect.size.width / tex.size.width,
        rect.size.height / tex.size.height,
    )
}

fn round_up(number: usize, divisor: usize) -> usize {
    (number + divisor - 1) / divisor * divisor
}

/// The device-free part of a render pass: the compiled operation list and
/// the tree walk, packing and batching logic operating on it.
#[derive(Debug)]
pub struct OpList {
    ops: Vec<DrawOp>,
    scale: Vec2,
    viewport: Rect,
    clip_region: RectInt,
}

impl OpList {
    /// Creates an empty list for a pass with the given fixed viewport,
    /// scale and device clip region.
    pub fn new(scale: Vec2, viewport: Rect, clip_region: RectInt) -> Self {
        OpList {
            ops: Vec::new(),
            scale,
            viewport,
            clip_region,
        }
    }

    /// The compiled operations.
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub(crate) fn ops_mut(&mut self) -> &mut [DrawOp] {
        &mut self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Seeds the parse state from the pass parameters and walks the node
    /// tree, appending operations.
    pub fn add(&mut self, glyphs: &mut dyn GlyphAtlas, node: &Arc<RenderNode>) {
        let inv_x = 1.0 / self.scale.x;
        let inv_y = 1.0 / self.scale.y;
        let clip = self.clip_region.to_rect().scale(inv_x, inv_y);
        let state = ParseState {
            scissor: self.clip_region,
            offset: Point::new(
                -self.viewport.origin.x * inv_x,
                -self.viewport.origin.y * inv_y,
            ),
            scale: self.scale,
            modelview: None,
            projection: Mat4::orthographic_rh(
                0.0,
                self.viewport.size.width,
                self.viewport.size.height,
                0.0,
                2.0 * ORTHO_NEAR_PLANE - ORTHO_FAR_PLANE,
                ORTHO_FAR_PLANE,
            ),
            clip: Clip::none(&clip),
        };

        self.append_scissor(node, &state);
        self.append_push_constants(node, &state);
        self.add_node(glyphs, &state, node);
    }

    /// The core recursive walker: prune, dispatch, fall back.
    fn add_node(&mut self, glyphs: &mut dyn GlyphAtlas, state: &ParseState, node: &Arc<RenderNode>) {
        // This catches the corner cases of empty nodes, so after this check
        // there's guaranteed to be at least 1 pixel that needs to be drawn.
        if !state.clip.may_intersect_rect(&state.offset, &node.bounds()) {
            return;
        }

        let handled = match node.as_ref() {
            RenderNode::Container { children, .. } => {
                for child in children {
                    self.add_node(glyphs, state, child);
                }
                true
            }
            RenderNode::Debug { child, .. } => {
                self.add_node(glyphs, state, child);
                true
            }
            // Canvas content can only be painted by the CPU rasterizer,
            // which is exactly what the fallback does. An empty canvas
            // draws nothing.
            RenderNode::Canvas { surface, .. } => surface.is_none(),
            RenderNode::Color { .. } => {
                self.push_render_op(RenderOpKind::Color, PipelineFamily::Color, state, node)
            }
            RenderNode::LinearGradient { .. } => self.push_render_op(
                RenderOpKind::LinearGradient,
                PipelineFamily::LinearGradient,
                state,
                node,
            ),
            RenderNode::Texture { .. } => {
                self.push_render_op(RenderOpKind::Texture, PipelineFamily::Texture, state, node)
            }
            RenderNode::TextureScale { .. } => self.push_render_op(
                RenderOpKind::TextureScale,
                PipelineFamily::Texture,
                state,
                node,
            ),
            RenderNode::Border { .. } => {
                self.push_render_op(RenderOpKind::Border, PipelineFamily::Border, state, node)
            }
            RenderNode::InsetShadow { blur_radius, .. } => {
                if *blur_radius > 0.0 {
                    debug!("Blur support not implemented for inset shadows");
                    false
                } else {
                    self.push_render_op(
                        RenderOpKind::InsetShadow,
                        PipelineFamily::InsetShadow,
                        state,
                        node,
                    )
                }
            }
            RenderNode::OutsetShadow { blur_radius, .. } => {
                if *blur_radius > 0.0 {
                    debug!("Blur support not implemented for outset shadows");
                    false
                } else {
                    self.push_render_op(
                        RenderOpKind::OutsetShadow,
                        PipelineFamily::OutsetShadow,
                        state,
                        node,
                    )
                }
            }
            // Opacity is an alpha-only color matrix.
            RenderNode::Opacity { .. } => self.push_render_op(
                RenderOpKind::Opacity,
                PipelineFamily::ColorMatrix,
                state,
                node,
            ),
            RenderNode::ColorMatrix { .. } => self.push_render_op(
                RenderOpKind::ColorMatrix,
                PipelineFamily::ColorMatrix,
                state,
                node,
            ),
            RenderNode::Blur { .. } => {
                self.push_render_op(RenderOpKind::Blur, PipelineFamily::Blur, state, node)
            }
            RenderNode::Repeat { child_bounds, .. } => {
                if child_bounds.area() == 0.0 {
                    // Nothing to tile; degrade to a no-op.
                    true
                } else {
                    self.push_render_op(RenderOpKind::Repeat, PipelineFamily::Texture, state, node)
                }
            }
            RenderNode::CrossFade { .. } => self.push_render_op(
                RenderOpKind::CrossFade,
                PipelineFamily::CrossFade,
                state,
                node,
            ),
            RenderNode::Blend { .. } => self.push_render_op(
                RenderOpKind::BlendMode,
                PipelineFamily::BlendMode,
                state,
                node,
            ),
            RenderNode::Text { .. } => self.add_text_node(glyphs, state, node),
            RenderNode::Transform { .. } => self.add_transform_node(glyphs, state, node),
            RenderNode::Clip { .. } => self.add_clip_node(glyphs, state, node),
            RenderNode::RoundedClip { .. } => self.add_rounded_clip_node(glyphs, state, node),
        };

        if !handled {
            debug!("Falling back for node '{}'", node.variant_name());
            self.add_fallback_node(state, node);
        }
    }

    /// Appends one operation rendering `node` through the pipeline family
    /// `family`, selecting the clip variant from the current state.
    fn push_render_op(
        &mut self,
        kind: RenderOpKind,
        family: PipelineFamily,
        state: &ParseState,
        node: &Arc<RenderNode>,
    ) -> bool {
        let pipeline = PipelineKind::select(family, &state.clip, &state.offset, &node.bounds());
        self.ops.push(DrawOp::Render(RenderOp {
            kind,
            node: node.clone(),
            offset: state.offset,
            pipeline,
            clip: state.clip.rect,
            source: None,
            source2: None,
            source_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            source2_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            vertex_offset: 0,
            buffer_offset: 0,
            image_descriptor: [0; 2],
            image_descriptor2: [0; 2],
        }));
        true
    }

    /// Records the node for CPU rasterization, picking the fallback
    /// variant matching the current clip shape.
    fn add_fallback_node(&mut self, state: &ParseState, node: &Arc<RenderNode>) {
        let kind = match state.clip.kind {
            ClipKind::None => RenderOpKind::Fallback,
            ClipKind::Rect => RenderOpKind::FallbackClip,
            ClipKind::Rounded => RenderOpKind::FallbackRoundedClip,
            // The walk prunes fully clipped subtrees before dispatching.
            ClipKind::AllClipped => unreachable!("fallback requested under a fully clipped state"),
        };
        self.ops.push(DrawOp::Render(RenderOp {
            kind,
            node: node.clone(),
            offset: state.offset,
            // The raster already applies the clip, so the plain texture
            // pipeline suffices.
            pipeline: PipelineKind::new(PipelineFamily::Texture, PipelineClip::None),
            clip: state.clip.rect,
            source: None,
            source2: None,
            source_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            source2_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            vertex_offset: 0,
            buffer_offset: 0,
            image_descriptor: [0; 2],
            image_descriptor2: [0; 2],
        }));
    }

    fn append_scissor(&mut self, node: &Arc<RenderNode>, state: &ParseState) {
        self.ops.push(DrawOp::Scissor(ScissorOp {
            node: node.clone(),
            rect: state.scissor,
        }));
    }

    fn append_push_constants(&mut self, node: &Arc<RenderNode>, state: &ParseState) {
        let mvp = match &state.modelview {
            Some(modelview) => state.projection * modelview.to_matrix(),
            None => state.projection,
        };
        self.ops.push(DrawOp::PushConstants(PushConstantsOp {
            node: node.clone(),
            scale: state.scale,
            mvp,
            clip: state.clip.rect,
        }));
    }

    /// Batches the node's glyphs into runs sharing an atlas page; one
    /// operation per run, empty glyphs skipped without breaking runs.
    fn add_text_node(
        &mut self,
        atlas: &mut dyn GlyphAtlas,
        state: &ParseState,
        node: &Arc<RenderNode>,
    ) -> bool {
        let (font, node_glyphs, has_color_glyphs) = match node.as_ref() {
            RenderNode::Text {
                font,
                glyphs,
                has_color_glyphs,
                ..
            } => (*font, glyphs, *has_color_glyphs),
            _ => unreachable!("add_text_node dispatched on a non-text node"),
        };

        let (kind, family) = if has_color_glyphs {
            (TextOpKind::ColorText, PipelineFamily::ColorText)
        } else {
            (TextOpKind::Text, PipelineFamily::Text)
        };
        let pipeline = PipelineKind::select(family, &state.clip, &state.offset, &node.bounds());
        let scale = state.scale.x.max(state.scale.y);

        let mut op = TextOp {
            kind,
            node: node.clone(),
            offset: state.offset,
            pipeline,
            source: None,
            vertex_offset: 0,
            image_descriptor: [0; 2],
            texture_index: usize::MAX,
            start_glyph: 0,
            num_glyphs: 0,
            scale,
        };

        let mut x_position = 0.0f32;
        for (i, glyph) in node_glyphs.iter().enumerate() {
            if glyph.is_empty() {
                x_position += glyph.advance;
                continue;
            }
            let texture_index = atlas.cache_glyph(
                font,
                glyph.glyph_id,
                x_position + glyph.x_offset,
                glyph.y_offset,
                scale,
            );
            if op.texture_index == usize::MAX {
                op.texture_index = texture_index;
                op.start_glyph = i;
                op.num_glyphs = 1;
            } else if texture_index == op.texture_index {
                op.num_glyphs += 1;
            } else {
                // The atlas page changed: finish the current run.
                self.ops.push(DrawOp::Text(op.clone()));
                op.texture_index = texture_index;
                op.start_glyph = i;
                op.num_glyphs = 1;
            }
            x_position += glyph.advance;
        }

        if op.texture_index != usize::MAX && op.num_glyphs > 0 {
            self.ops.push(DrawOp::Text(op));
        }

        true
    }

    /// Computes the child state for a transform node and recurses, with
    /// push-constant snapshots bracketing the subtree.
    fn add_transform_node(
        &mut self,
        glyphs: &mut dyn GlyphAtlas,
        state: &ParseState,
        node: &Arc<RenderNode>,
    ) -> bool {
        let (transform, child) = match node.as_ref() {
            RenderNode::Transform {
                transform, child, ..
            } => (transform, child),
            _ => unreachable!("add_transform_node dispatched on a non-transform node"),
        };

        let mut new_state = state.clone();

        match transform.category() {
            TransformCategory::Identity | TransformCategory::Translate2d => {
                // Cheapest path: only the offset moves, no uniform push
                // needed.
                let (dx, dy) = transform.to_translate();
                new_state.offset = state.offset.offset(dx, dy);
                self.add_node(glyphs, &new_state, child);
                return true;
            }

            TransformCategory::Affine2d => {
                let (scale_x, scale_y, dx, dy) = transform.to_affine();
                if scale_x == 0.0 || scale_y == 0.0 {
                    debug!("Transform nodes can't deal with a degenerate scale");
                    return false;
                }
                new_state.clip = state.clip.scale(scale_x, scale_y);
                new_state.offset = Point::new(
                    (state.offset.x + dx) / scale_x,
                    (state.offset.y + dy) / scale_y,
                );
                new_state.scale =
                    Vec2::new(scale_x.abs(), scale_y.abs()) * state.scale;
                // Negative scale factors become flips carried by the
                // modelview; the scale state stays positive.
                new_state.modelview = compose_modelview(
                    &state.modelview,
                    &Transform::scale(scale_x / scale_x.abs(), scale_y / scale_y.abs()),
                );
            }

            TransformCategory::Any2d => {
                let clip_transform =
                    Transform::translate(state.offset.x, state.offset.y).then(transform);

                if state.clip.contains_rect(&state.offset, &node.bounds()) {
                    new_state.clip = Clip::none(&child.bounds());
                } else {
                    match state.clip.transform(&clip_transform, &child.bounds()) {
                        Some(clip) => new_state.clip = clip,
                        None => {
                            debug!(
                                "Transform nodes can't deal with clip kind {:?}",
                                state.clip.kind
                            );
                            return false;
                        }
                    }
                }

                let modelview = modelview_or_identity(&state.modelview)
                    .scaled(state.scale.x, state.scale.y)
                    .then(&clip_transform);
                // Peel the 2D scale back out of the modelview so fallback
                // rasters stay at native resolution under rotation.
                let components = modelview.to_2d_components();
                let scale_x = components.scale_x.abs();
                let scale_y = components.scale_y.abs();
                if scale_x == 0.0 || scale_y == 0.0 {
                    debug!("Transform node collapsed to zero scale");
                    return false;
                }
                new_state.modelview = Some(modelview.scaled(1.0 / scale_x, 1.0 / scale_y));
                new_state.scale = Vec2::new(scale_x, scale_y);
                new_state.offset = Point::ZERO;
            }

            TransformCategory::Any3d => {
                let clip_transform =
                    Transform::translate(state.offset.x, state.offset.y).then(transform);

                if state.clip.contains_rect(&state.offset, &node.bounds()) {
                    new_state.clip = Clip::none(&child.bounds());
                } else {
                    match state.clip.transform(&clip_transform, &child.bounds()) {
                        Some(clip) => new_state.clip = clip,
                        None => {
                            debug!(
                                "Transform nodes can't deal with clip kind {:?}",
                                state.clip.kind
                            );
                            return false;
                        }
                    }
                }

                let modelview = modelview_or_identity(&state.modelview)
                    .scaled(state.scale.x, state.scale.y)
                    .then(&clip_transform);
                let decomposed = match modelview.decompose() {
                    Some(decomposed) => decomposed,
                    None => {
                        debug!("Transform node matrix is singular");
                        return false;
                    }
                };

                let mut scale_x = decomposed.scale.x.abs();
                let mut scale_y = decomposed.scale.y.abs();

                // Cap oversampling: never rasterize more than twice the
                // pixels the current clip would produce.
                let old_pixels =
                    state.scale.x * state.scale.y * state.clip.rect.bounds.area();
                let new_pixels = scale_x * scale_y * new_state.clip.rect.bounds.area();
                if new_pixels > 2.0 * old_pixels {
                    let forced_downscale = 2.0 * old_pixels / new_pixels;
                    scale_x *= forced_downscale;
                    scale_y *= forced_downscale;
                }
                if scale_x == 0.0 || scale_y == 0.0 {
                    debug!("Transform node collapsed to zero scale");
                    return false;
                }

                new_state.modelview = Some(modelview.scaled(1.0 / scale_x, 1.0 / scale_y));
                new_state.scale = Vec2::new(scale_x, scale_y);
                new_state.offset = Point::ZERO;
            }
        }

        new_state.scissor = state.scissor;
        new_state.projection = state.projection;

        self.append_push_constants(node, &new_state);
        self.add_node(glyphs, &new_state, child);
        self.append_push_constants(node, state);

        true
    }

    /// Clip node: prefer a hardware scissor when the rect lands on integer
    /// device pixels, shader clipping otherwise.
    fn add_clip_node(
        &mut self,
        glyphs: &mut dyn GlyphAtlas,
        state: &ParseState,
        node: &Arc<RenderNode>,
    ) -> bool {
        let (clip_rect, child) = match node.as_ref() {
            RenderNode::Clip { clip, child, .. } => (clip, child),
            _ => unreachable!("add_clip_node dispatched on a non-clip node"),
        };

        let clip = clip_rect.offset(state.offset.x, state.offset.y);
        let mut new_state = state.clone();
        let do_push_constants;
        let do_scissor;

        if let Some(scissor) = clip_can_be_scissored(&clip, state.scale, &state.modelview) {
            new_state.scissor = match scissor.intersection(&state.scissor) {
                Some(intersection) => intersection,
                None => return true,
            };

            match state.clip.intersect_rect(&clip) {
                Some(mut intersected) => {
                    if intersected.kind == ClipKind::Rect {
                        // The scissor already expresses the rectangle;
                        // skip the shader-side clip.
                        intersected.kind = ClipKind::None;
                    }
                    new_state.clip = intersected;
                    do_push_constants = true;
                }
                None => {
                    new_state.clip = state.clip;
                    do_push_constants = false;
                }
            }

            do_scissor = true;
        } else {
            match state.clip.intersect_rect(&clip) {
                Some(intersected) => new_state.clip = intersected,
                None => {
                    debug!(
                        "No intersection between clip kind {:?} and rectangle",
                        state.clip.kind
                    );
                    return false;
                }
            }

            new_state.scissor = state.scissor;
            do_push_constants = true;
            do_scissor = false;
        }

        if new_state.clip.is_all_clipped() {
            return true;
        }

        if do_scissor {
            self.append_scissor(node, &new_state);
        }
        if do_push_constants {
            self.append_push_constants(node, &new_state);
        }

        self.add_node(glyphs, &new_state, child);

        if do_push_constants {
            self.append_push_constants(node, state);
        }
        if do_scissor {
            self.append_scissor(node, state);
        }

        true
    }

    fn add_rounded_clip_node(
        &mut self,
        glyphs: &mut dyn GlyphAtlas,
        state: &ParseState,
        node: &Arc<RenderNode>,
    ) -> bool {
        let (clip_rounded, child) = match node.as_ref() {
            RenderNode::RoundedClip { clip, child, .. } => (clip, child),
            _ => unreachable!("add_rounded_clip_node dispatched on a non-rounded-clip node"),
        };

        let clip = clip_rounded.offset(state.offset.x, state.offset.y);
        let mut new_state = state.clone();
        match state.clip.intersect_rounded(&clip) {
            Some(intersected) => new_state.clip = intersected,
            None => {
                debug!(
                    "No intersection between clip kind {:?} and rounded rectangle",
                    state.clip.kind
                );
                return false;
            }
        }

        if new_state.clip.is_all_clipped() {
            return true;
        }

        self.append_push_constants(node, &new_state);
        self.add_node(glyphs, &new_state, child);
        self.append_push_constants(node, state);

        true
    }

    // --- Vertex data ---

    /// First packing pass: assigns every operation its stride-aligned
    /// offset and returns the total byte count.
    pub fn count_vertex_data(&mut self) -> usize {
        let mut n_bytes = 0usize;
        for op in &mut self.ops {
            match op {
                DrawOp::Render(render) => {
                    let stride = render.pipeline.vertex_stride();
                    n_bytes = round_up(n_bytes, stride);
                    render.vertex_offset = n_bytes;
                    n_bytes += stride;
                }
                DrawOp::Text(text) => {
                    let stride = text.pipeline.vertex_stride();
                    n_bytes = round_up(n_bytes, stride);
                    text.vertex_offset = n_bytes;
                    n_bytes += stride * text.num_glyphs;
                }
                DrawOp::PushConstants(_) | DrawOp::Scissor(_) => {}
            }
        }
        n_bytes
    }

    /// Second packing pass: serializes every operation's parameters at the
    /// offsets assigned by [`OpList::count_vertex_data`].
    pub fn collect_vertex_data(&self, atlas: &dyn GlyphAtlas, data: &mut [u8]) {
        for op in &self.ops {
            match op {
                DrawOp::Render(render) => Self::collect_render_op(render, data),
                DrawOp::Text(text) => Self::collect_text_op(text, atlas, data),
                DrawOp::PushConstants(_) | DrawOp::Scissor(_) => {}
            }
        }
    }

    fn collect_render_op(op: &RenderOp, data: &mut [u8]) {
        let bounds = op.node.bounds();
        let rect = [
            bounds.origin.x + op.offset.x,
            bounds.origin.y + op.offset.y,
            bounds.size.width,
            bounds.size.height,
        ];
        let tex_rect = |r: &Rect| [r.origin.x, r.origin.y, r.size.width, r.size.height];

        match op.kind {
            RenderOpKind::Fallback
            | RenderOpKind::FallbackClip
            | RenderOpKind::FallbackRoundedClip
            | RenderOpKind::Texture
            | RenderOpKind::TextureScale
            | RenderOpKind::Repeat => {
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &TextureInstance {
                        rect,
                        tex_rect: tex_rect(&op.source_rect),
                        tex_id: op.image_descriptor,
                    },
                );
            }

            RenderOpKind::Color => {
                let color = match op.node.as_ref() {
                    RenderNode::Color { color, .. } => *color,
                    _ => unreachable!("color op on a non-color node"),
                };
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &ColorInstance {
                        rect,
                        color: color.to_array(),
                    },
                );
            }

            RenderOpKind::LinearGradient => {
                let (start, end, stops, repeating) = match op.node.as_ref() {
                    RenderNode::LinearGradient {
                        start,
                        end,
                        stops,
                        repeating,
                        ..
                    } => (start, end, stops, *repeating),
                    _ => unreachable!("gradient op on a non-gradient node"),
                };
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &LinearGradientInstance {
                        rect,
                        start: [start.x + op.offset.x, start.y + op.offset.y],
                        end: [end.x + op.offset.x, end.y + op.offset.y],
                        repeating: repeating as u32,
                        stop_offset: (op.buffer_offset / crate::render::COLOR_STOP_SIZE) as u32,
                        stop_count: stops.len() as u32,
                    },
                );
            }

            RenderOpKind::Opacity => {
                let opacity = match op.node.as_ref() {
                    RenderNode::Opacity { opacity, .. } => *opacity,
                    _ => unreachable!("opacity op on a non-opacity node"),
                };
                let matrix = Mat4::from_diagonal(glam::Vec4::new(1.0, 1.0, 1.0, opacity));
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &ColorMatrixInstance {
                        rect,
                        tex_rect: tex_rect(&op.source_rect),
                        tex_id: op.image_descriptor,
                        color_matrix: matrix.to_cols_array(),
                        color_offset: [0.0; 4],
                    },
                );
            }

            RenderOpKind::ColorMatrix => {
                let (matrix, offset) = match op.node.as_ref() {
                    RenderNode::ColorMatrix { matrix, offset, .. } => (matrix, offset),
                    _ => unreachable!("color-matrix op on a non-color-matrix node"),
                };
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &ColorMatrixInstance {
                        rect,
                        tex_rect: tex_rect(&op.source_rect),
                        tex_id: op.image_descriptor,
                        color_matrix: matrix.to_cols_array(),
                        color_offset: *offset,
                    },
                );
            }

            RenderOpKind::Blur => {
                let radius = match op.node.as_ref() {
                    RenderNode::Blur { radius, .. } => *radius,
                    _ => unreachable!("blur op on a non-blur node"),
                };
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &BlurInstance {
                        rect,
                        tex_rect: tex_rect(&op.source_rect),
                        tex_id: op.image_descriptor,
                        radius,
                    },
                );
            }

            RenderOpKind::Border => {
                let (outline, widths, colors) = match op.node.as_ref() {
                    RenderNode::Border {
                        outline,
                        widths,
                        colors,
                        ..
                    } => (outline, widths, colors),
                    _ => unreachable!("border op on a non-border node"),
                };
                let mut color_array = [0.0f32; 16];
                for (i, color) in colors.iter().enumerate() {
                    color_array[i * 4..i * 4 + 4].copy_from_slice(&color.to_array());
                }
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &BorderInstance {
                        outline: outline.offset(op.offset.x, op.offset.y).to_float_array(),
                        widths: *widths,
                        colors: color_array,
                    },
                );
            }

            RenderOpKind::InsetShadow | RenderOpKind::OutsetShadow => {
                let (outline, color, dx, dy, spread, blur_radius) = match op.node.as_ref() {
                    RenderNode::InsetShadow {
                        outline,
                        color,
                        dx,
                        dy,
                        spread,
                        blur_radius,
                        ..
                    }
                    | RenderNode::OutsetShadow {
                        outline,
                        color,
                        dx,
                        dy,
                        spread,
                        blur_radius,
                        ..
                    } => (outline, color, *dx, *dy, *spread, *blur_radius),
                    _ => unreachable!("box-shadow op on a non-shadow node"),
                };
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &BoxShadowInstance {
                        outline: outline.offset(op.offset.x, op.offset.y).to_float_array(),
                        color: color.to_array(),
                        offset: [dx, dy],
                        spread,
                        blur_radius,
                    },
                );
            }

            RenderOpKind::CrossFade => {
                let progress = match op.node.as_ref() {
                    RenderNode::CrossFade { progress, .. } => *progress,
                    _ => unreachable!("cross-fade op on a non-cross-fade node"),
                };
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &CrossFadeInstance {
                        rect,
                        start_tex_rect: tex_rect(&op.source_rect),
                        end_tex_rect: tex_rect(&op.source2_rect),
                        start_tex_id: op.image_descriptor,
                        end_tex_id: op.image_descriptor2,
                        progress,
                    },
                );
            }

            RenderOpKind::BlendMode => {
                let blend_mode = match op.node.as_ref() {
                    RenderNode::Blend { blend_mode, .. } => *blend_mode,
                    _ => unreachable!("blend op on a non-blend node"),
                };
                instances::write_instance(
                    data,
                    op.vertex_offset,
                    &BlendModeInstance {
                        rect,
                        top_tex_rect: tex_rect(&op.source_rect),
                        bottom_tex_rect: tex_rect(&op.source2_rect),
                        top_tex_id: op.image_descriptor,
                        bottom_tex_id: op.image_descriptor2,
                        blend_mode: blend_mode as u32,
                    },
                );
            }
        }
    }

    fn collect_text_op(op: &TextOp, atlas: &dyn GlyphAtlas, data: &mut [u8]) {
        let (font, glyphs, color, text_offset) = match op.node.as_ref() {
            RenderNode::Text {
                font,
                glyphs,
                color,
                offset,
                ..
            } => (*font, glyphs, *color, *offset),
            _ => unreachable!("text op on a non-text node"),
        };

        let origin = Point::new(
            text_offset.x + op.offset.x,
            text_offset.y + op.offset.y,
        );
        let stride = op.pipeline.vertex_stride();

        // Re-accumulate the pen position up to the run's first glyph.
        let mut x_position: f32 = glyphs[..op.start_glyph].iter().map(|g| g.advance).sum();

        let mut count = 0usize;
        for glyph in &glyphs[op.start_glyph..] {
            if count >= op.num_glyphs {
                break;
            }
            if glyph.is_empty() {
                x_position += glyph.advance;
                continue;
            }

            let cached = atlas.cached_glyph(
                font,
                glyph.glyph_id,
                x_position + glyph.x_offset,
                glyph.y_offset,
                op.scale,
            );
            let cx = x_position + glyph.x_offset;
            let cy = glyph.y_offset;
            let rect = [
                origin.x + cx + cached.draw_x,
                origin.y + cy + cached.draw_y,
                cached.draw_width,
                cached.draw_height,
            ];
            let tex_rect = [cached.tx, cached.ty, cached.tw, cached.th];
            let offset = op.vertex_offset + count * stride;

            match op.kind {
                TextOpKind::Text => instances::write_instance(
                    data,
                    offset,
                    &TextInstance {
                        rect,
                        tex_rect,
                        color: color.to_array(),
                        tex_id: op.image_descriptor,
                    },
                ),
                TextOpKind::ColorText => instances::write_instance(
                    data,
                    offset,
                    &ColorTextInstance {
                        rect,
                        tex_rect,
                        tex_id: op.image_descriptor,
                    },
                ),
            }

            count += 1;
            x_position += glyph.advance;
        }
    }

    /// Length of the run of adjacent color operations sharing `pipeline`,
    /// starting at `start`. Used to merge them into one instanced draw.
    pub fn color_run_len(&self, start: usize) -> usize {
        let pipeline = match &self.ops[start] {
            DrawOp::Render(render) if render.kind == RenderOpKind::Color => render.pipeline,
            _ => return 1,
        };
        let mut len = 1;
        for op in &self.ops[start + 1..] {
            match op {
                DrawOp::Render(render)
                    if render.kind == RenderOpKind::Color && render.pipeline == pipeline =>
                {
                    len += 1;
                }
                _ => break,
            }
        }
        len
    }
}

/// Composes `transform` onto an optional modelview, keeping `None` as the
/// identity representation where possible.
fn compose_modelview(modelview: &Option<Transform>, transform: &Transform) -> Option<Transform> {
    match modelview {
        Some(modelview) => Some(modelview.then(transform)),
        None => {
            if transform.category() == TransformCategory::Identity {
                None
            } else {
                Some(*transform)
            }
        }
    }
}

fn modelview_or_identity(modelview: &Option<Transform>) -> Transform {
    (*modelview).unwrap_or_else(Transform::identity)
}

/// One render pass painting one target image.
///
/// A pass owns the Vulkan render-pass/framebuffer pair for its target, the
/// compiled operation list, the per-pass vertex buffer, and the nested
/// offscreen passes it spawned during upload. Nested passes signal a
/// semaphore their parent waits on, so submission (children first) encodes
/// the producer/consumer DAG.
pub struct RenderPass {
    context: Arc<VulkanContext>,
    target: Arc<VulkanImage>,
    viewport: Rect,
    clip_region: RectInt,
    scale: Vec2,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    /// Signaled on submission; present iff this pass is nested.
    signal_semaphore: Option<vk::Semaphore>,
    /// One semaphore per nested pass this pass samples from.
    wait_semaphores: Vec<vk::Semaphore>,
    children: Vec<RenderPass>,
    ops: OpList,
    vertex_buffer: Option<VulkanBuffer>,
}

impl RenderPass {
    /// Creates a pass rendering into `target` with fixed viewport, scale
    /// and device clip region.
    ///
    /// A nested pass passes the semaphore its parent will wait on; its
    /// target ends up shader-readable, a root target ends up presentable.
    pub fn new(
        context: &Arc<VulkanContext>,
        target: Arc<VulkanImage>,
        scale: Vec2,
        viewport: Rect,
        clip_region: RectInt,
        signal_semaphore: Option<vk::Semaphore>,
    ) -> Result<Self> {
        let final_layout = if signal_semaphore.is_some() {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        };
        let attachments = [vk::AttachmentDescription::builder()
            .format(target.vk_format())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(final_layout)
            .build()];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];
        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let render_pass =
            unsafe { context.device().create_render_pass(&render_pass_info, None) }?;

        let framebuffer_attachments = [target.view()];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&framebuffer_attachments)
            .width(target.width())
            .height(target.height())
            .layers(1);
        let framebuffer =
            unsafe { context.device().create_framebuffer(&framebuffer_info, None) }?;

        debug!(
            "Created {}x{} render pass (nested: {})",
            target.width(),
            target.height(),
            signal_semaphore.is_some()
        );
        Ok(RenderPass {
            context: context.clone(),
            ops: OpList::new(scale, viewport, clip_region),
            target,
            viewport,
            clip_region,
            scale,
            render_pass,
            framebuffer,
            signal_semaphore,
            wait_semaphores: Vec::new(),
            children: Vec::new(),
            vertex_buffer: None,
        })
    }

    /// Compiles `node` as a root of this pass, appending to the operation
    /// list.
    pub fn add(&mut self, render: &mut Render, node: &Arc<RenderNode>) {
        self.ops.add(render.glyph_atlas_mut(), node);
    }

    /// The compiled operation list.
    pub fn ops(&self) -> &OpList {
        &self.ops
    }

    /// The image this pass renders into.
    pub fn target(&self) -> &Arc<VulkanImage> {
        &self.target
    }

    /// The raw render pass handle, for pipeline compatibility.
    pub fn vk_render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Semaphores of the nested passes this pass must wait on.
    pub fn wait_semaphores(&self) -> &[vk::Semaphore] {
        &self.wait_semaphores
    }

    /// The semaphore this pass signals, if it is nested.
    pub fn signal_semaphore(&self) -> Option<vk::Semaphore> {
        self.signal_semaphore
    }

    /// The nested passes spawned during upload, in creation order.
    pub fn children(&self) -> &[RenderPass] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut [RenderPass] {
        &mut self.children
    }

    /// Resolves every operation's source images: fallbacks are rasterized
    /// and uploaded, glyph runs reference their atlas page, textures hit
    /// the session cache, and effect children become textures (directly,
    /// via fallback, or through a nested offscreen pass).
    ///
    /// Resolution happens exactly once per operation; calling upload again
    /// leaves already-resolved sources untouched.
    pub fn upload(&mut self, render: &mut Render, uploader: &mut VulkanUploader) -> Result<()> {
        let mut clip_bounds: Option<Rect> = None;
        let mut current_scale = self.scale;

        for i in 0..self.ops.len() {
            // The resolution helpers borrow `self` mutably (nested passes
            // append wait semaphores and children), so snapshot the
            // operation first and write results back by index.
            let op = match &self.ops.ops()[i] {
                DrawOp::PushConstants(pc) => {
                    clip_bounds = Some(pc.clip.bounds);
                    current_scale = pc.scale;
                    continue;
                }
                DrawOp::Scissor(_) => continue,
                DrawOp::Text(text) => {
                    if text.source.is_none() {
                        let image = render.atlas_image(text.texture_index, uploader)?;
                        render.add_cleanup_image(image.clone());
                        if let DrawOp::Text(text) = &mut self.ops.ops_mut()[i] {
                            text.source = Some(image);
                        }
                    }
                    continue;
                }
                DrawOp::Render(op) => op.clone(),
            };
            if op.source.is_some() {
                continue;
            }

            match op.kind {
                RenderOpKind::Fallback
                | RenderOpKind::FallbackClip
                | RenderOpKind::FallbackRoundedClip => {
                    let source = self.upload_fallback(render, uploader, &op)?;
                    if let DrawOp::Render(slot) = &mut self.ops.ops_mut()[i] {
                        slot.source = source;
                        slot.source_rect = Rect::new(0.0, 0.0, 1.0, 1.0);
                    }
                }

                RenderOpKind::Texture | RenderOpKind::TextureScale => {
                    let texture = match op.node.as_ref() {
                        RenderNode::Texture { texture, .. }
                        | RenderNode::TextureScale { texture, .. } => texture.clone(),
                        _ => unreachable!("texture op on a non-texture node"),
                    };
                    let image = render.texture_image(&texture, uploader)?;
                    render.add_cleanup_image(image.clone());
                    if let DrawOp::Render(slot) = &mut self.ops.ops_mut()[i] {
                        slot.source = Some(image);
                        slot.source_rect = Rect::new(0.0, 0.0, 1.0, 1.0);
                    }
                }

                RenderOpKind::Opacity | RenderOpKind::Blur | RenderOpKind::ColorMatrix => {
                    let child = match op.node.as_ref() {
                        RenderNode::Opacity { child, .. }
                        | RenderNode::Blur { child, .. }
                        | RenderNode::ColorMatrix { child, .. } => child.clone(),
                        _ => unreachable!("effect op on a non-effect node"),
                    };
                    let resolved = self.node_as_texture(
                        render,
                        uploader,
                        &child,
                        current_scale,
                        clip_bounds,
                        op.offset,
                    )?;
                    if let DrawOp::Render(slot) = &mut self.ops.ops_mut()[i] {
                        if let Some((image, tex_bounds)) = resolved {
                            slot.source_rect = get_tex_rect(&slot.node.bounds(), &tex_bounds);
                            slot.source = Some(image);
                        }
                    }
                }

                RenderOpKind::Repeat => {
                    let (child, child_bounds) = match op.node.as_ref() {
                        RenderNode::Repeat {
                            child,
                            child_bounds,
                            ..
                        } => (child.clone(), *child_bounds),
                        _ => unreachable!("repeat op on a non-repeat node"),
                    };
                    // Tiling needs a texture of exactly the tile size, so a
                    // texture of any other dimensions cannot be reused and
                    // the clip must be ignored.
                    let resolved = if child_bounds != child.bounds() {
                        self.render_offscreen(
                            render,
                            uploader,
                            &child,
                            current_scale,
                            &child_bounds,
                        )?
                        .map(|image| (image, child_bounds))
                    } else {
                        self.node_as_texture(
                            render,
                            uploader,
                            &child,
                            current_scale,
                            Some(child.bounds()),
                            Point::ZERO,
                        )?
                    };
                    if let DrawOp::Render(slot) = &mut self.ops.ops_mut()[i] {
                        if let Some((image, tex_bounds)) = resolved {
                            slot.source_rect = get_tex_rect(&slot.node.bounds(), &tex_bounds);
                            slot.source = Some(image);
                        }
                    }
                }

                RenderOpKind::CrossFade => {
                    let (start, end) = match op.node.as_ref() {
                        RenderNode::CrossFade { start, end, .. } => (start.clone(), end.clone()),
                        _ => unreachable!("cross-fade op on a non-cross-fade node"),
                    };
                    let bounds = op.node.bounds();
                    let first = self
                        .node_as_texture(render, uploader, &start, current_scale, clip_bounds, op.offset)?
                        .map(|(image, tex)| (image, get_tex_rect(&bounds, &tex)));
                    let second = self
                        .node_as_texture(render, uploader, &end, current_scale, clip_bounds, op.offset)?
                        .map(|(image, tex)| (image, get_tex_rect(&bounds, &tex)));
                    self.apply_two_sources(i, first, second);
                }

                RenderOpKind::BlendMode => {
                    let (top, bottom) = match op.node.as_ref() {
                        RenderNode::Blend { top, bottom, .. } => (top.clone(), bottom.clone()),
                        _ => unreachable!("blend op on a non-blend node"),
                    };
                    let bounds = op.node.bounds();
                    let first = self
                        .node_as_texture(render, uploader, &top, current_scale, clip_bounds, op.offset)?
                        .map(|(image, tex)| (image, get_tex_rect(&bounds, &tex)));
                    let second = self
                        .node_as_texture(render, uploader, &bottom, current_scale, clip_bounds, op.offset)?
                        .map(|(image, tex)| (image, get_tex_rect(&bounds, &tex)));
                    self.apply_two_sources(i, first, second);
                }

                RenderOpKind::Color
                | RenderOpKind::LinearGradient
                | RenderOpKind::Border
                | RenderOpKind::InsetShadow
                | RenderOpKind::OutsetShadow => {}
            }
        }
        Ok(())
    }

    /// Writes both sources of a two-source operation. When one side failed
    /// to resolve, the present side stands in at a zero-area texture rect,
    /// which samples as fully transparent.
    fn apply_two_sources(
        &mut self,
        index: usize,
        mut first: Option<(Arc<VulkanImage>, Rect)>,
        mut second: Option<(Arc<VulkanImage>, Rect)>,
    ) {
        match (&first, &second) {
            (None, Some((image, _))) => first = Some((image.clone(), Rect::ZERO)),
            (Some((image, _)), None) => second = Some((image.clone(), Rect::ZERO)),
            _ => {}
        }
        if let DrawOp::Render(slot) = &mut self.ops.ops_mut()[index] {
            if let Some((image, rect)) = first {
                slot.source = Some(image);
                slot.source_rect = rect;
            }
            if let Some((image, rect)) = second {
                slot.source2 = Some(image);
                slot.source2_rect = rect;
            }
        }
    }

    /// Rasterizes a fallback operation's node on the CPU at the pass scale
    /// and uploads the pixels. The operation's clip snapshot becomes the
    /// drawing clip, re-expressed in node-local coordinates.
    fn upload_fallback(
        &mut self,
        render: &mut Render,
        uploader: &mut VulkanUploader,
        op: &RenderOp,
    ) -> Result<Option<Arc<VulkanImage>>> {
        let bounds = op.node.bounds();
        let width = (bounds.size.width * self.scale.x).ceil() as u32;
        let height = (bounds.size.height * self.scale.y).ceil() as u32;
        if width == 0 || height == 0 {
            debug!("Skipping zero-area fallback for '{}'", op.node.variant_name());
            return Ok(None);
        }
        let clip = match op.kind {
            RenderOpKind::FallbackClip => {
                RasterClip::Rect(op.clip.bounds.offset(-op.offset.x, -op.offset.y))
            }
            RenderOpKind::FallbackRoundedClip => {
                RasterClip::Rounded(op.clip.offset(-op.offset.x, -op.offset.y))
            }
            _ => RasterClip::None,
        };
        debug!(
            "Uploading fallback raster for '{}' ({}x{})",
            op.node.variant_name(),
            width,
            height
        );
        let raster =
            render.rasterize_node(&op.node, &clip, width, height, self.scale.x, self.scale.y);
        debug_assert_eq!((raster.width, raster.height), (width, height));
        let image = VulkanImage::new_for_upload(uploader, width, height, &raster.data)?;
        render.add_cleanup_image(image.clone());
        Ok(Some(image))
    }

    /// Renders an effect child to a texture: literal texture nodes are
    /// reused directly, canvas nodes go through the CPU fallback, anything
    /// else spawns a nested offscreen pass. Returns the image and the
    /// node-space bounds it covers, or `None` when clipping leaves nothing.
    fn node_as_texture(
        &mut self,
        render: &mut Render,
        uploader: &mut VulkanUploader,
        node: &Arc<RenderNode>,
        scale: Vec2,
        clip_bounds: Option<Rect>,
        clip_offset: Point,
    ) -> Result<Option<(Arc<VulkanImage>, Rect)>> {
        match node.as_ref() {
            RenderNode::Texture { texture, .. } => {
                let image = render.texture_image(texture, uploader)?;
                render.add_cleanup_image(image.clone());
                return Ok(Some((image, node.bounds())));
            }
            // Canvas content is painted by the CPU rasterizer anyway, which
            // is exactly what the fallback path below does.
            RenderNode::Canvas { .. } => {}
            _ => {
                let mut clipped = node.bounds();
                if let Some(clip) = clip_bounds {
                    let clip = clip.offset(-clip_offset.x, -clip_offset.y);
                    clipped = match clip.intersection(&clipped) {
                        Some(clipped) => clipped,
                        None => return Ok(None),
                    };
                }
                if clipped.is_empty() {
                    return Ok(None);
                }
                let image =
                    self.render_offscreen(render, uploader, node, scale, &clipped)?;
                return Ok(image.map(|image| (image, clipped)));
            }
        }

        let bounds = node.bounds();
        let width = (bounds.size.width * scale.x).ceil() as u32;
        let height = (bounds.size.height * scale.y).ceil() as u32;
        if width == 0 || height == 0 {
            return Ok(None);
        }
        debug!(
            "Node as texture via {}x{} fallback surface for '{}'",
            width,
            height,
            node.variant_name()
        );
        let raster = render.rasterize_node(node, &RasterClip::None, width, height, scale.x, scale.y);
        let image = VulkanImage::new_for_upload(uploader, width, height, &raster.data)?;
        render.add_cleanup_image(image.clone());
        Ok(Some((image, bounds)))
    }

    /// Spawns a nested pass rendering `node` at `scale` into a fresh
    /// offscreen image covering `viewport`, recursively compiling and
    /// uploading it. The new pass's signal semaphore joins this pass's
    /// wait list.
    fn render_offscreen(
        &mut self,
        render: &mut Render,
        uploader: &mut VulkanUploader,
        node: &Arc<RenderNode>,
        scale: Vec2,
        viewport: &Rect,
    ) -> Result<Option<Arc<VulkanImage>>> {
        let width = (scale.x * viewport.size.width).ceil();
        let height = (scale.y * viewport.size.height).ceil();
        if width < 1.0 || height < 1.0 {
            debug!("Skipping zero-area offscreen render for '{}'", node.variant_name());
            return Ok(None);
        }
        let view = Rect::new(
            scale.x * viewport.origin.x,
            scale.y * viewport.origin.y,
            width,
            height,
        );
        let format = render.context().offscreen_format(node.preferred_depth());
        let image = VulkanImage::new_for_offscreen(
            render.context().clone(),
            format,
            width as u32,
            height as u32,
        )?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.context.device().create_semaphore(&semaphore_info, None) }?;
        self.wait_semaphores.push(semaphore);

        let clip_region = RectInt::new(0, 0, image.width() as i32, image.height() as i32);
        let mut pass = RenderPass::new(
            &self.context,
            image.clone(),
            scale,
            view,
            clip_region,
            Some(semaphore),
        )?;
        pass.add(render, node);
        pass.upload(render, uploader)?;
        render.add_cleanup_image(image.clone());
        self.children.push(pass);
        Ok(Some(image))
    }

    /// Assigns descriptor-table indices to every resolved source and
    /// reserves gradient-stop storage, for this pass and its children.
    pub fn reserve_descriptors(&mut self, render: &mut Render) {
        for op in self.ops.ops_mut() {
            match op {
                DrawOp::Render(op) => match op.kind {
                    RenderOpKind::Fallback
                    | RenderOpKind::FallbackClip
                    | RenderOpKind::FallbackRoundedClip
                    | RenderOpKind::Texture
                    | RenderOpKind::Opacity
                    | RenderOpKind::Blur
                    | RenderOpKind::ColorMatrix => {
                        if let Some(source) = op.source.clone() {
                            op.image_descriptor = [
                                render.get_image_descriptor(&source),
                                render.get_sampler_descriptor(RenderSampler::Default),
                            ];
                        }
                    }

                    RenderOpKind::TextureScale => {
                        if let Some(source) = op.source.clone() {
                            let filter = match op.node.as_ref() {
                                RenderNode::TextureScale { filter, .. } => *filter,
                                _ => unreachable!("texture-scale op on a non-texture-scale node"),
                            };
                            let sampler = match filter {
                                ScalingFilter::Linear | ScalingFilter::Trilinear => {
                                    RenderSampler::Default
                                }
                                ScalingFilter::Nearest => RenderSampler::Nearest,
                            };
                            op.image_descriptor = [
                                render.get_image_descriptor(&source),
                                render.get_sampler_descriptor(sampler),
                            ];
                        }
                    }

                    RenderOpKind::Repeat => {
                        if let Some(source) = op.source.clone() {
                            op.image_descriptor = [
                                render.get_image_descriptor(&source),
                                render.get_sampler_descriptor(RenderSampler::Repeat),
                            ];
                        }
                    }

                    RenderOpKind::CrossFade | RenderOpKind::BlendMode => {
                        if let (Some(source), Some(source2)) =
                            (op.source.clone(), op.source2.clone())
                        {
                            op.image_descriptor = [
                                render.get_image_descriptor(&source),
                                render.get_sampler_descriptor(RenderSampler::Default),
                            ];
                            op.image_descriptor2 = [
                                render.get_image_descriptor(&source2),
                                render.get_sampler_descriptor(RenderSampler::Default),
                            ];
                        }
                    }

                    RenderOpKind::LinearGradient => {
                        let stops = match op.node.as_ref() {
                            RenderNode::LinearGradient { stops, .. } => stops,
                            _ => unreachable!("gradient op on a non-gradient node"),
                        };
                        op.buffer_offset = render.reserve_color_stops(stops);
                    }

                    RenderOpKind::Color
                    | RenderOpKind::Border
                    | RenderOpKind::InsetShadow
                    | RenderOpKind::OutsetShadow => {}
                },

                DrawOp::Text(op) => {
                    if let Some(source) = op.source.clone() {
                        op.image_descriptor = [
                            render.get_image_descriptor(&source),
                            render.get_sampler_descriptor(RenderSampler::Default),
                        ];
                    }
                }

                DrawOp::PushConstants(_) | DrawOp::Scissor(_) => {}
            }
        }

        for child in &mut self.children {
            child.reserve_descriptors(render);
        }
    }

    /// Records this pass's commands: viewport, render pass begin with a
    /// transparent clear, one descriptor bind, then the operation stream
    /// with pipeline-change batching.
    pub fn draw(&mut self, render: &mut Render, command_buffer: vk::CommandBuffer) -> Result<()> {
        let device = self.context.device().clone();
        unsafe {
            device.cmd_set_viewport(
                command_buffer,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: self.viewport.size.width,
                    height: self.viewport.size.height,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            let clear = vk::ClearValue {
                color: vk::ClearColorValue { float32: [0.0; 4] },
            };
            let begin_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass)
                .framebuffer(self.framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D {
                        x: self.clip_region.x,
                        y: self.clip_region.y,
                    },
                    extent: vk::Extent2D {
                        width: self.clip_region.width.max(0) as u32,
                        height: self.clip_region.height.max(0) as u32,
                    },
                })
                .clear_values(std::slice::from_ref(&clear));
            device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }

        render.bind_descriptor_sets(command_buffer);
        self.draw_ops(render, command_buffer)?;

        unsafe { device.cmd_end_render_pass(command_buffer) };
        Ok(())
    }

    /// Streams the operation list into the command buffer. The vertex
    /// buffer is built lazily here; adjacent color operations sharing a
    /// pipeline merge into one instanced draw.
    fn draw_ops(&mut self, render: &mut Render, command_buffer: vk::CommandBuffer) -> Result<()> {
        let device = self.context.device().clone();

        let n_bytes = self.ops.count_vertex_data();
        if n_bytes > 0 && self.vertex_buffer.is_none() {
            let mut buffer = VulkanBuffer::new_vertex(self.context.clone(), n_bytes)?;
            self.ops.collect_vertex_data(render.glyph_atlas(), buffer.map());
            self.vertex_buffer = Some(buffer);
        }
        if let Some(buffer) = &self.vertex_buffer {
            unsafe {
                device.cmd_bind_vertex_buffers(command_buffer, 0, &[buffer.vk_buffer()], &[0])
            };
        }

        let format = self.target.vk_format();
        let mut current: Option<PipelineKind> = None;
        let mut i = 0;
        while i < self.ops.len() {
            let mut step = 1;
            match &self.ops.ops()[i] {
                DrawOp::Render(op) => {
                    let needs_source = !matches!(
                        op.kind,
                        RenderOpKind::Color
                            | RenderOpKind::LinearGradient
                            | RenderOpKind::Border
                            | RenderOpKind::InsetShadow
                            | RenderOpKind::OutsetShadow
                    );
                    let needs_two =
                        matches!(op.kind, RenderOpKind::CrossFade | RenderOpKind::BlendMode);
                    if (needs_source && op.source.is_none())
                        || (needs_two && op.source2.is_none())
                    {
                        // An upload failure degrades this one draw, never
                        // the whole pass.
                        debug!("Skipping {:?} op with unresolved source", op.kind);
                        i += 1;
                        continue;
                    }

                    if current != Some(op.pipeline) {
                        let pipeline = render.pipeline(op.pipeline, self.render_pass, format)?;
                        unsafe {
                            device.cmd_bind_pipeline(
                                command_buffer,
                                vk::PipelineBindPoint::GRAPHICS,
                                pipeline.vk_pipeline(),
                            );
                        }
                        current = Some(op.pipeline);
                    }

                    let stride = op.pipeline.vertex_stride();
                    let mut instances = 1;
                    if op.kind == RenderOpKind::Color {
                        step = self.ops.color_run_len(i);
                        instances = step;
                    }
                    unsafe {
                        device.cmd_draw(
                            command_buffer,
                            6,
                            instances as u32,
                            0,
                            (op.vertex_offset / stride) as u32,
                        );
                    }
                }

                DrawOp::Text(op) => {
                    if op.source.is_none() {
                        debug!("Skipping text op with unresolved atlas page");
                        i += 1;
                        continue;
                    }
                    if current != Some(op.pipeline) {
                        let pipeline = render.pipeline(op.pipeline, self.render_pass, format)?;
                        unsafe {
                            device.cmd_bind_pipeline(
                                command_buffer,
                                vk::PipelineBindPoint::GRAPHICS,
                                pipeline.vk_pipeline(),
                            );
                        }
                        current = Some(op.pipeline);
                    }
                    let stride = op.pipeline.vertex_stride();
                    unsafe {
                        device.cmd_draw(
                            command_buffer,
                            6,
                            op.num_glyphs as u32,
                            0,
                            (op.vertex_offset / stride) as u32,
                        );
                    }
                }

                DrawOp::PushConstants(op) => {
                    PushConstants::new(&op.mvp, &op.clip, op.scale).push(
                        &device,
                        command_buffer,
                        render.pipeline_layout(),
                    );
                }

                DrawOp::Scissor(op) => unsafe {
                    device.cmd_set_scissor(
                        command_buffer,
                        0,
                        &[vk::Rect2D {
                            offset: vk::Offset2D {
                                x: op.rect.x,
                                y: op.rect.y,
                            },
                            extent: vk::Extent2D {
                                width: op.rect.width.max(0) as u32,
                                height: op.rect.height.max(0) as u32,
                            },
                        }],
                    );
                },
            }
            i += step;
        }
        Ok(())
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        debug!("Dropping render pass ({} ops)", self.ops.len());
        unsafe {
            self.context.device().destroy_framebuffer(self.framebuffer, None);
            self.context.device().destroy_render_pass(self.render_pass, None);
            if let Some(semaphore) = self.signal_semaphore.take() {
                self.context.device().destroy_semaphore(semaphore, None);
            }
        }
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("viewport", &self.viewport)
            .field("scale", &self.scale)
            .field("ops", &self.ops.len())
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucent_core::{Color, FontId, ImageSurface, PositionedGlyph};

    use crate::glyphs::CachedGlyph;
    use crate::pipeline::PipelineClip;

    /// Atlas stub: glyphs land on page `glyph_id / 100`, geometry is
    /// synthetic. Never uploads.
    struct TestAtlas;

    impl GlyphAtlas for TestAtlas {
        fn cache_glyph(&mut self, _font: FontId, glyph: u32, _x: f32, _y: f32, _scale: f32) -> usize {
            (glyph / 100) as usize
        }

        fn cached_glyph(&self, _font: FontId, _glyph: u32, x: f32, y: f32, _scale: f32) -> CachedGlyph {
            CachedGlyph {
                texture_index: 0,
                draw_x: 0.0,
                draw_y: -8.0,
                draw_width: 6.0,
                draw_height: 10.0,
                tx: x * 0.01,
                ty: y * 0.01,
                tw: 0.1,
                th: 0.1,
            }
        }

        fn atlas_image(
            &mut self,
            _texture_index: usize,
            _uploader: &mut VulkanUploader,
        ) -> Result<Arc<VulkanImage>> {
            unreachable!("tests never upload atlas pages")
        }
    }

    fn op_list() -> OpList {
        OpList::new(
            Vec2::ONE,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            RectInt::new(0, 0, 100, 100),
        )
    }

    fn color_node(x: f32, y: f32, w: f32, h: f32) -> Arc<RenderNode> {
        Arc::new(RenderNode::color(Rect::new(x, y, w, h), Color::BLACK))
    }

    fn render_ops(list: &OpList) -> Vec<&RenderOp> {
        list.ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Render(render) => Some(render),
                _ => None,
            })
            .collect()
    }

    fn push_constants_ops(list: &OpList) -> Vec<&PushConstantsOp> {
        list.ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::PushConstants(pc) => Some(pc),
                _ => None,
            })
            .collect()
    }

    fn scissor_ops(list: &OpList) -> Vec<&ScissorOp> {
        list.ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Scissor(scissor) => Some(scissor),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_walk_prunes_subtree_outside_clip() {
        let mut list = op_list();
        list.add(&mut TestAtlas, &color_node(200.0, 200.0, 10.0, 10.0));
        assert!(render_ops(&list).is_empty());
        // Only the initial scissor and push-constants ops remain.
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_container_of_two_colors_merges_into_one_run() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::container(vec![
            color_node(0.0, 0.0, 10.0, 10.0),
            color_node(20.0, 20.0, 10.0, 10.0),
        ]));
        list.add(&mut TestAtlas, &node);

        let colors = render_ops(&list);
        assert_eq!(colors.len(), 2);
        for op in &colors {
            assert_eq!(op.kind, RenderOpKind::Color);
            assert_eq!(op.pipeline, PipelineKind::new(PipelineFamily::Color, PipelineClip::None));
        }
        // Both ops merge into a single instanced draw of count 2.
        assert_eq!(list.color_run_len(2), 2);
    }

    #[test]
    fn test_leaf_variant_selection_under_rect_clip() {
        let mut list = op_list();
        // The quarter-pixel origin keeps the clip off the scissor path.
        let partial = Arc::new(RenderNode::clip(
            Rect::new(0.25, 0.25, 50.0, 50.0),
            color_node(0.0, 0.0, 100.0, 100.0),
        ));
        list.add(&mut TestAtlas, &partial);
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].pipeline.clip, PipelineClip::Rect);

        let mut list = op_list();
        let contained = Arc::new(RenderNode::clip(
            Rect::new(0.25, 0.25, 80.0, 80.0),
            color_node(10.0, 10.0, 20.0, 20.0),
        ));
        list.add(&mut TestAtlas, &contained);
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].pipeline.clip, PipelineClip::None);
    }

    #[test]
    fn test_leaf_variant_selection_under_rounded_clip() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::rounded_clip(
            RoundedRect::with_uniform_radius(Rect::new(0.0, 0.0, 100.0, 100.0), 20.0),
            color_node(0.0, 0.0, 100.0, 100.0),
        ));
        list.add(&mut TestAtlas, &node);
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].pipeline.clip, PipelineClip::Rounded);
    }

    #[test]
    fn test_scissorable_clip_brackets_with_scissor_ops() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::clip(
            Rect::new(10.0, 10.0, 50.0, 50.0),
            color_node(10.0, 10.0, 50.0, 50.0),
        ));
        list.add(&mut TestAtlas, &node);

        let scissors = scissor_ops(&list);
        assert_eq!(scissors.len(), 3);
        assert_eq!(scissors[1].rect, RectInt::new(10, 10, 50, 50));
        // Exit restores the pass scissor.
        assert_eq!(scissors[2].rect, RectInt::new(0, 0, 100, 100));

        // The scissor fully expresses the rectangle, so the color op takes
        // the unclipped pipeline.
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].pipeline.clip, PipelineClip::None);
    }

    #[test]
    fn test_all_clipped_subtree_records_nothing() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::clip(
            Rect::new(200.0, 200.0, 50.0, 50.0),
            color_node(0.0, 0.0, 100.0, 100.0),
        ));
        list.add(&mut TestAtlas, &node);
        assert!(render_ops(&list).is_empty());
    }

    #[test]
    fn test_blurred_shadow_falls_back() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::outset_shadow(
            RoundedRect::with_uniform_radius(Rect::new(10.0, 10.0, 40.0, 40.0), 4.0),
            Color::BLACK,
            2.0,
            2.0,
            0.0,
            3.0,
        ));
        list.add(&mut TestAtlas, &node);
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, RenderOpKind::Fallback);
        assert_eq!(
            ops[0].pipeline,
            PipelineKind::new(PipelineFamily::Texture, PipelineClip::None)
        );

        // Without blur the shadow renders directly.
        let mut list = op_list();
        let node = Arc::new(RenderNode::outset_shadow(
            RoundedRect::with_uniform_radius(Rect::new(10.0, 10.0, 40.0, 40.0), 4.0),
            Color::BLACK,
            2.0,
            2.0,
            0.0,
            0.0,
        ));
        list.add(&mut TestAtlas, &node);
        assert_eq!(render_ops(&list)[0].kind, RenderOpKind::OutsetShadow);
    }

    #[test]
    fn test_rotation_of_color_node_never_panics() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::transform(
            Transform::translate(50.0, 50.0).then(&Transform::rotate(45.0)),
            color_node(-10.0, -10.0, 20.0, 20.0),
        ));
        list.add(&mut TestAtlas, &node);

        // The unclipped root state carries the rotation on the GPU.
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, RenderOpKind::Color);

        // The bracketing push constants carry a non-trivial modelview.
        let pcs = push_constants_ops(&list);
        assert_eq!(pcs.len(), 3);
        assert_ne!(pcs[1].mvp, pcs[0].mvp);
        assert_eq!(pcs[2].mvp, pcs[0].mvp);
    }

    #[test]
    fn test_rotation_under_rect_clip_falls_back() {
        let mut list = op_list();
        // Quarter-pixel clip origin forces the shader-clip path, the clip
        // only partially covers the rotated child, and a rect clip cannot
        // be carried through a rotation exactly.
        let node = Arc::new(RenderNode::clip(
            Rect::new(0.25, 0.25, 30.0, 30.0),
            Arc::new(RenderNode::transform(
                Transform::translate(30.0, 30.0).then(&Transform::rotate(45.0)),
                color_node(-10.0, -10.0, 20.0, 20.0),
            )),
        ));
        list.add(&mut TestAtlas, &node);

        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, RenderOpKind::FallbackClip);
    }

    #[test]
    fn test_affine_transform_scales_state() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::transform(
            Transform::scale(2.0, 2.0),
            color_node(10.0, 10.0, 10.0, 10.0),
        ));
        list.add(&mut TestAtlas, &node);

        let pcs = push_constants_ops(&list);
        assert_eq!(pcs.len(), 3);
        assert_eq!(pcs[1].scale, Vec2::new(2.0, 2.0));
        assert_eq!(pcs[2].scale, Vec2::ONE);
        assert_eq!(render_ops(&list).len(), 1);
    }

    #[test]
    fn test_repeat_with_empty_child_bounds_is_a_noop() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::repeat(
            Rect::new(0.0, 0.0, 50.0, 50.0),
            Rect::ZERO,
            color_node(0.0, 0.0, 10.0, 10.0),
        ));
        list.add(&mut TestAtlas, &node);
        assert!(render_ops(&list).is_empty());
    }

    #[test]
    fn test_text_runs_batch_by_atlas_page() {
        let glyph = |id: u32| PositionedGlyph {
            glyph_id: id,
            advance: 8.0,
            x_offset: 0.0,
            y_offset: 0.0,
        };
        let empty = PositionedGlyph {
            glyph_id: 0,
            advance: 4.0,
            x_offset: 0.0,
            y_offset: 0.0,
        };
        let node = Arc::new(RenderNode::text(
            Rect::new(0.0, 0.0, 60.0, 16.0),
            FontId(1),
            vec![glyph(1), empty, glyph(2), glyph(101), glyph(102)],
            Color::BLACK,
            Point::new(0.0, 12.0),
            false,
        ));

        let mut list = op_list();
        list.add(&mut TestAtlas, &node);

        let texts: Vec<&TextOp> = list
            .ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts.len(), 2);
        // The empty glyph is skipped without breaking the first run.
        assert_eq!((texts[0].start_glyph, texts[0].num_glyphs), (0, 2));
        assert_eq!(texts[0].texture_index, 0);
        assert_eq!((texts[1].start_glyph, texts[1].num_glyphs), (3, 2));
        assert_eq!(texts[1].texture_index, 1);
    }

    #[test]
    fn test_count_vertex_data_aligns_to_stride() {
        let mut list = op_list();
        let surface = Arc::new(ImageSurface {
            width: 20,
            height: 20,
            stride: 80,
            data: vec![0; 80 * 20],
        });
        let node = Arc::new(RenderNode::container(vec![
            color_node(0.0, 0.0, 10.0, 10.0),
            Arc::new(RenderNode::Canvas {
                bounds: Rect::new(0.0, 0.0, 20.0, 20.0),
                surface: Some(surface),
            }),
        ]));
        list.add(&mut TestAtlas, &node);

        // Color instances are 32 bytes, texture (fallback) instances 40;
        // the fallback op starts on the next 40-byte boundary.
        let total = list.count_vertex_data();
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].vertex_offset, 0);
        assert_eq!(ops[1].vertex_offset, 40);
        assert_eq!(total, 80);
    }

    #[test]
    fn test_collect_vertex_data_roundtrip() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::color(
            Rect::new(5.0, 6.0, 30.0, 40.0),
            Color::new(0.25, 0.5, 0.75, 1.0),
        ));
        list.add(&mut TestAtlas, &node);

        let total = list.count_vertex_data();
        let mut data = vec![0u8; total];
        list.collect_vertex_data(&TestAtlas, &mut data);

        let instance: ColorInstance = bytemuck::pod_read_unaligned(&data[0..total]);
        assert_eq!(instance.rect, [5.0, 6.0, 30.0, 40.0]);
        assert_eq!(instance.color, [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_empty_pass_packs_zero_bytes() {
        let mut list = op_list();
        list.add(&mut TestAtlas, &color_node(500.0, 500.0, 10.0, 10.0));
        assert_eq!(list.count_vertex_data(), 0);
    }

    #[test]
    fn test_canvas_without_surface_records_nothing() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::Canvas {
            bounds: Rect::new(0.0, 0.0, 20.0, 20.0),
            surface: None,
        });
        list.add(&mut TestAtlas, &node);
        assert!(render_ops(&list).is_empty());
    }

    #[test]
    fn test_debug_node_is_transparent() {
        let mut list = op_list();
        let node = Arc::new(RenderNode::debug(
            "button".into(),
            color_node(0.0, 0.0, 10.0, 10.0),
        ));
        list.add(&mut TestAtlas, &node);
        let ops = render_ops(&list);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, RenderOpKind::Color);
    }
}
