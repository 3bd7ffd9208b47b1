//! The glyph-cache collaborator interface.
//!
//! Text shaping and glyph rasterization live outside this crate. The
//! renderer only needs two things from a glyph cache: a stable atlas page
//! index per glyph (used to batch runs during the tree walk) and the
//! glyph's draw/texture geometry (used when packing vertex data).

use std::sync::Arc;

use lucent_core::FontId;

use crate::error::Result;
use crate::image::{VulkanImage, VulkanUploader};

/// Geometry of one cached glyph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedGlyph {
    /// Atlas page holding the glyph.
    pub texture_index: usize,
    /// Draw offset relative to the glyph's pen position.
    pub draw_x: f32,
    pub draw_y: f32,
    /// Draw size in node-local units.
    pub draw_width: f32,
    pub draw_height: f32,
    /// Normalized texture rectangle inside the atlas page.
    pub tx: f32,
    pub ty: f32,
    pub tw: f32,
    pub th: f32,
}

/// A glyph atlas shared between the renderer and the text stack.
///
/// Subpixel positions and the raster scale are part of the cache key, so
/// `x`/`y`/`scale` are passed on every lookup.
pub trait GlyphAtlas {
    /// Ensures the glyph is cached and returns its atlas page index.
    fn cache_glyph(&mut self, font: FontId, glyph: u32, x: f32, y: f32, scale: f32) -> usize;

    /// Returns the geometry of a previously cached glyph.
    fn cached_glyph(&self, font: FontId, glyph: u32, x: f32, y: f32, scale: f32) -> CachedGlyph;

    /// Returns the GPU image of an atlas page, uploading dirty pages as
    /// needed.
    fn atlas_image(
        &mut self,
        texture_index: usize,
        uploader: &mut VulkanUploader,
    ) -> Result<Arc<VulkanImage>>;
}
