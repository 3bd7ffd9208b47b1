//! The CPU rasterizer collaborator interface.
//!
//! Nodes without a direct GPU path are painted by an external 2D
//! rasterizer into a pixel buffer which is then uploaded. The renderer
//! never interprets node contents itself.

use lucent_core::{Rect, RenderNode, RoundedRect};

/// The clip to apply before painting a fallback node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RasterClip {
    /// No clipping beyond the target surface.
    None,
    /// Clip to an axis-aligned rectangle, in node-local coordinates.
    Rect(Rect),
    /// Clip to a rounded rectangle, in node-local coordinates.
    Rounded(RoundedRect),
}

/// A CPU-rasterized pixel buffer: tightly packed premultiplied RGBA8.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Paints render nodes on the CPU.
///
/// Implementations draw `node` into a `width`x`height` surface whose
/// device scale is `(scale_x, scale_y)`, translated so that the node's
/// bounds origin lands at the surface origin, with `clip` applied as a
/// drawing clip first.
pub trait NodeRasterizer {
    fn rasterize(
        &mut self,
        node: &RenderNode,
        clip: &RasterClip,
        width: u32,
        height: u32,
        scale_x: f32,
        scale_y: f32,
    ) -> RasterImage;
}
