//! The immutable render-node scene graph.
//!
//! A [`RenderNode`] is one drawing instruction in a scene description tree:
//! "paint this color in this rect", "clip everything below to this rounded
//! rect", and so on. Nodes are immutable once built and shared via [`Arc`];
//! renderers only ever read them. Bounds are computed at construction time
//! and are always axis-aligned boxes in the node's local coordinate space.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Mat4;

use crate::types::color::{Color, ColorStop};
use crate::types::geometry::{Point, Rect};
use crate::types::rounded::RoundedRect;
use crate::types::transform::Transform;

/// Glyph id marking an empty glyph (no ink, no advance contribution to
/// rendering). Such glyphs are skipped by renderers without breaking glyph
/// runs.
pub const EMPTY_GLYPH: u32 = 0;

/// Opaque identifier of a font face + size combination, resolved by the
/// glyph cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontId(pub u64);

/// One shaped glyph, positioned relative to the text node's offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionedGlyph {
    /// Glyph index in the font, [`EMPTY_GLYPH`] for empty glyphs.
    pub glyph_id: u32,
    /// Horizontal advance to the next glyph.
    pub advance: f32,
    /// Horizontal offset from the pen position.
    pub x_offset: f32,
    /// Vertical offset from the baseline.
    pub y_offset: f32,
}

impl PositionedGlyph {
    /// Whether this glyph produces no ink.
    pub fn is_empty(&self) -> bool {
        self.glyph_id == EMPTY_GLYPH
    }
}

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// CPU-side texture data referenced by texture nodes.
///
/// Pixels are tightly packed RGBA8 with premultiplied alpha. The id is
/// unique per texture and lets renderers cache the uploaded GPU image.
#[derive(Debug, Clone)]
pub struct SceneTexture {
    id: u64,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl SceneTexture {
    /// Creates a texture from premultiplied RGBA8 pixel data.
    pub fn new(width: u32, height: u32, data: Arc<[u8]>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 4);
        SceneTexture {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            data,
        }
    }

    /// The unique id of this texture.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A CPU pixel surface, the payload of canvas nodes. Pixels are
/// premultiplied RGBA8 with the given row stride in bytes.
#[derive(Debug, Clone)]
pub struct ImageSurface {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: Vec<u8>,
}

/// Filter used when a texture is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingFilter {
    Linear,
    Trilinear,
    Nearest,
}

/// The compositing modes supported by blend nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlendMode {
    Normal = 0,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Color,
    Hue,
    Saturation,
    Luminosity,
}

/// The color depth an offscreen rendering of a subtree should use.
///
/// Ordered by increasing precision so that merging depths of children is a
/// plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColorDepth {
    U8,
    U16,
    F16,
    F32,
}

/// One immutable instruction in a scene-description tree.
#[derive(Debug, Clone)]
pub enum RenderNode {
    /// Draws all children in order, back to front.
    Container {
        bounds: Rect,
        children: Vec<Arc<RenderNode>>,
    },
    /// Fills `bounds` with a solid color.
    Color { bounds: Rect, color: Color },
    /// Fills `bounds` with a linear gradient between two points.
    LinearGradient {
        bounds: Rect,
        start: Point,
        end: Point,
        stops: Vec<ColorStop>,
        repeating: bool,
    },
    /// Draws a texture stretched over `bounds`.
    Texture {
        bounds: Rect,
        texture: Arc<SceneTexture>,
    },
    /// Draws a texture with an explicit scaling filter.
    TextureScale {
        bounds: Rect,
        texture: Arc<SceneTexture>,
        filter: ScalingFilter,
    },
    /// Draws a run of glyphs.
    Text {
        bounds: Rect,
        font: FontId,
        glyphs: Vec<PositionedGlyph>,
        color: Color,
        /// Pen start position of the first glyph.
        offset: Point,
        /// Whether the glyphs carry their own colors (emoji fonts).
        has_color_glyphs: bool,
    },
    /// Applies a transform to the child.
    Transform {
        bounds: Rect,
        transform: Transform,
        child: Arc<RenderNode>,
    },
    /// Clips the child to a rectangle.
    Clip {
        bounds: Rect,
        clip: Rect,
        child: Arc<RenderNode>,
    },
    /// Clips the child to a rounded rectangle.
    RoundedClip {
        bounds: Rect,
        clip: RoundedRect,
        child: Arc<RenderNode>,
    },
    /// Draws the child with a global opacity.
    Opacity {
        bounds: Rect,
        opacity: f32,
        child: Arc<RenderNode>,
    },
    /// Draws the child blurred by the given radius.
    Blur {
        bounds: Rect,
        radius: f32,
        child: Arc<RenderNode>,
    },
    /// Draws the child with its colors mapped through `matrix * c + offset`.
    ColorMatrix {
        bounds: Rect,
        matrix: Mat4,
        offset: [f32; 4],
        child: Arc<RenderNode>,
    },
    /// Strokes the inside of a rounded outline with per-side widths and
    /// colors (top, right, bottom, left).
    Border {
        bounds: Rect,
        outline: RoundedRect,
        widths: [f32; 4],
        colors: [Color; 4],
    },
    /// An inset box shadow on the given outline.
    InsetShadow {
        bounds: Rect,
        outline: RoundedRect,
        color: Color,
        dx: f32,
        dy: f32,
        spread: f32,
        blur_radius: f32,
    },
    /// An outset box shadow behind the given outline.
    OutsetShadow {
        bounds: Rect,
        outline: RoundedRect,
        color: Color,
        dx: f32,
        dy: f32,
        spread: f32,
        blur_radius: f32,
    },
    /// Tiles the child's `child_bounds` region across `bounds`.
    Repeat {
        bounds: Rect,
        child_bounds: Rect,
        child: Arc<RenderNode>,
    },
    /// Interpolates between two children.
    CrossFade {
        bounds: Rect,
        /// Blend position, `0.0` = only `start`, `1.0` = only `end`.
        progress: f32,
        start: Arc<RenderNode>,
        end: Arc<RenderNode>,
    },
    /// Composites `top` over `bottom` with a blend mode.
    Blend {
        bounds: Rect,
        blend_mode: BlendMode,
        top: Arc<RenderNode>,
        bottom: Arc<RenderNode>,
    },
    /// CPU-drawn content; only ever rendered through the fallback
    /// rasterizer. A canvas without a surface draws nothing.
    Canvas {
        bounds: Rect,
        surface: Option<Arc<ImageSurface>>,
    },
    /// Transparent wrapper carrying a debug annotation.
    Debug {
        bounds: Rect,
        message: String,
        child: Arc<RenderNode>,
    },
}

impl RenderNode {
    /// The axis-aligned bounds of this node in its local coordinates.
    pub fn bounds(&self) -> Rect {
        match self {
            RenderNode::Container { bounds, .. }
            | RenderNode::Color { bounds, .. }
            | RenderNode::LinearGradient { bounds, .. }
            | RenderNode::Texture { bounds, .. }
            | RenderNode::TextureScale { bounds, .. }
            | RenderNode::Text { bounds, .. }
            | RenderNode::Transform { bounds, .. }
            | RenderNode::Clip { bounds, .. }
            | RenderNode::RoundedClip { bounds, .. }
            | RenderNode::Opacity { bounds, .. }
            | RenderNode::Blur { bounds, .. }
            | RenderNode::ColorMatrix { bounds, .. }
            | RenderNode::Border { bounds, .. }
            | RenderNode::InsetShadow { bounds, .. }
            | RenderNode::OutsetShadow { bounds, .. }
            | RenderNode::Repeat { bounds, .. }
            | RenderNode::CrossFade { bounds, .. }
            | RenderNode::Blend { bounds, .. }
            | RenderNode::Canvas { bounds, .. }
            | RenderNode::Debug { bounds, .. } => *bounds,
        }
    }

    /// A short name for diagnostics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            RenderNode::Container { .. } => "container",
            RenderNode::Color { .. } => "color",
            RenderNode::LinearGradient { .. } => "linear-gradient",
            RenderNode::Texture { .. } => "texture",
            RenderNode::TextureScale { .. } => "texture-scale",
            RenderNode::Text { .. } => "text",
            RenderNode::Transform { .. } => "transform",
            RenderNode::Clip { .. } => "clip",
            RenderNode::RoundedClip { .. } => "rounded-clip",
            RenderNode::Opacity { .. } => "opacity",
            RenderNode::Blur { .. } => "blur",
            RenderNode::ColorMatrix { .. } => "color-matrix",
            RenderNode::Border { .. } => "border",
            RenderNode::InsetShadow { .. } => "inset-shadow",
            RenderNode::OutsetShadow { .. } => "outset-shadow",
            RenderNode::Repeat { .. } => "repeat",
            RenderNode::CrossFade { .. } => "cross-fade",
            RenderNode::Blend { .. } => "blend",
            RenderNode::Canvas { .. } => "canvas",
            RenderNode::Debug { .. } => "debug",
        }
    }

    /// The color depth an offscreen rendering of this subtree should use.
    pub fn preferred_depth(&self) -> ColorDepth {
        match self {
            RenderNode::Container { children, .. } => children
                .iter()
                .map(|c| c.preferred_depth())
                .max()
                .unwrap_or(ColorDepth::U8),
            RenderNode::Transform { child, .. }
            | RenderNode::Clip { child, .. }
            | RenderNode::RoundedClip { child, .. }
            | RenderNode::Opacity { child, .. }
            | RenderNode::Blur { child, .. }
            | RenderNode::Repeat { child, .. }
            | RenderNode::Debug { child, .. } => child.preferred_depth(),
            // Color mapping benefits from headroom beyond 8 bits.
            RenderNode::ColorMatrix { child, .. } => child.preferred_depth().max(ColorDepth::F16),
            RenderNode::CrossFade { start, end, .. } => {
                start.preferred_depth().max(end.preferred_depth())
            }
            RenderNode::Blend { top, bottom, .. } => {
                top.preferred_depth().max(bottom.preferred_depth())
            }
            _ => ColorDepth::U8,
        }
    }

    // --- Constructors. Bounds derive from the payload where they are not
    // an independent input.

    /// A container drawing `children` in order.
    pub fn container(children: Vec<Arc<RenderNode>>) -> Self {
        let bounds = children
            .iter()
            .fold(Rect::ZERO, |acc, c| acc.union(&c.bounds()));
        RenderNode::Container { bounds, children }
    }

    /// A solid color fill.
    pub fn color(bounds: Rect, color: Color) -> Self {
        RenderNode::Color { bounds, color }
    }

    /// A linear gradient fill.
    pub fn linear_gradient(
        bounds: Rect,
        start: Point,
        end: Point,
        stops: Vec<ColorStop>,
        repeating: bool,
    ) -> Self {
        RenderNode::LinearGradient {
            bounds,
            start,
            end,
            stops,
            repeating,
        }
    }

    /// A textured quad.
    pub fn texture(bounds: Rect, texture: Arc<SceneTexture>) -> Self {
        RenderNode::Texture { bounds, texture }
    }

    /// A glyph run.
    pub fn text(
        bounds: Rect,
        font: FontId,
        glyphs: Vec<PositionedGlyph>,
        color: Color,
        offset: Point,
        has_color_glyphs: bool,
    ) -> Self {
        RenderNode::Text {
            bounds,
            font,
            glyphs,
            color,
            offset,
            has_color_glyphs,
        }
    }

    /// A transformed child.
    pub fn transform(transform: Transform, child: Arc<RenderNode>) -> Self {
        let bounds = transform.transform_bounds(&child.bounds());
        RenderNode::Transform {
            bounds,
            transform,
            child,
        }
    }

    /// A rectangle-clipped child.
    pub fn clip(clip: Rect, child: Arc<RenderNode>) -> Self {
        let bounds = clip.intersection(&child.bounds()).unwrap_or(Rect::ZERO);
        RenderNode::Clip {
            bounds,
            clip,
            child,
        }
    }

    /// A rounded-rectangle-clipped child.
    pub fn rounded_clip(clip: RoundedRect, child: Arc<RenderNode>) -> Self {
        let bounds = clip
            .bounds
            .intersection(&child.bounds())
            .unwrap_or(Rect::ZERO);
        RenderNode::RoundedClip {
            bounds,
            clip,
            child,
        }
    }

    /// A child with global opacity.
    pub fn opacity(opacity: f32, child: Arc<RenderNode>) -> Self {
        RenderNode::Opacity {
            bounds: child.bounds(),
            opacity: opacity.clamp(0.0, 1.0),
            child,
        }
    }

    /// A blurred child; bounds grow by the blur radius.
    pub fn blur(radius: f32, child: Arc<RenderNode>) -> Self {
        RenderNode::Blur {
            bounds: child.bounds().inflate(radius, radius),
            radius,
            child,
        }
    }

    /// A color-mapped child.
    pub fn color_matrix(matrix: Mat4, offset: [f32; 4], child: Arc<RenderNode>) -> Self {
        RenderNode::ColorMatrix {
            bounds: child.bounds(),
            matrix,
            offset,
            child,
        }
    }

    /// A border stroke inside `outline`.
    pub fn border(outline: RoundedRect, widths: [f32; 4], colors: [Color; 4]) -> Self {
        RenderNode::Border {
            bounds: outline.bounds,
            outline,
            widths,
            colors,
        }
    }

    /// An inset shadow.
    pub fn inset_shadow(
        outline: RoundedRect,
        color: Color,
        dx: f32,
        dy: f32,
        spread: f32,
        blur_radius: f32,
    ) -> Self {
        RenderNode::InsetShadow {
            bounds: outline.bounds,
            outline,
            color,
            dx,
            dy,
            spread,
            blur_radius,
        }
    }

    /// An outset shadow; bounds grow by offset, spread and blur.
    pub fn outset_shadow(
        outline: RoundedRect,
        color: Color,
        dx: f32,
        dy: f32,
        spread: f32,
        blur_radius: f32,
    ) -> Self {
        let grow = spread + blur_radius;
        let bounds = outline
            .bounds
            .inflate(grow, grow)
            .offset(dx, dy)
            .union(&outline.bounds);
        RenderNode::OutsetShadow {
            bounds,
            outline,
            color,
            dx,
            dy,
            spread,
            blur_radius,
        }
    }

    /// A repeat node tiling `child_bounds` of the child across `bounds`.
    pub fn repeat(bounds: Rect, child_bounds: Rect, child: Arc<RenderNode>) -> Self {
        RenderNode::Repeat {
            bounds,
            child_bounds,
            child,
        }
    }

    /// A cross-fade between two children.
    pub fn cross_fade(progress: f32, start: Arc<RenderNode>, end: Arc<RenderNode>) -> Self {
        let bounds = start.bounds().union(&end.bounds());
        RenderNode::CrossFade {
            bounds,
            progress: progress.clamp(0.0, 1.0),
            start,
            end,
        }
    }

    /// A blend of two children.
    pub fn blend(blend_mode: BlendMode, top: Arc<RenderNode>, bottom: Arc<RenderNode>) -> Self {
        let bounds = top.bounds().union(&bottom.bounds());
        RenderNode::Blend {
            bounds,
            blend_mode,
            top,
            bottom,
        }
    }

    /// A debug wrapper around a child.
    pub fn debug(message: String, child: Arc<RenderNode>) -> Self {
        RenderNode::Debug {
            bounds: child.bounds(),
            message,
            child,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_node(x: f32, y: f32, w: f32, h: f32) -> Arc<RenderNode> {
        Arc::new(RenderNode::color(Rect::new(x, y, w, h), Color::BLACK))
    }

    #[test]
    fn test_container_bounds_union() {
        let node = RenderNode::container(vec![
            color_node(0.0, 0.0, 10.0, 10.0),
            color_node(20.0, 20.0, 10.0, 10.0),
        ]);
        assert_eq!(node.bounds(), Rect::new(0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn test_clip_bounds_intersection() {
        let node = RenderNode::clip(Rect::new(5.0, 5.0, 100.0, 100.0), color_node(0.0, 0.0, 10.0, 10.0));
        assert_eq!(node.bounds(), Rect::new(5.0, 5.0, 5.0, 5.0));
    }

    #[test]
    fn test_blur_bounds_grow() {
        let node = RenderNode::blur(4.0, color_node(0.0, 0.0, 10.0, 10.0));
        assert_eq!(node.bounds(), Rect::new(-4.0, -4.0, 18.0, 18.0));
    }

    #[test]
    fn test_preferred_depth_color_matrix() {
        let node = RenderNode::color_matrix(
            Mat4::IDENTITY,
            [0.0; 4],
            color_node(0.0, 0.0, 1.0, 1.0),
        );
        assert_eq!(node.preferred_depth(), ColorDepth::F16);
        assert_eq!(color_node(0.0, 0.0, 1.0, 1.0).preferred_depth(), ColorDepth::U8);
    }
}
