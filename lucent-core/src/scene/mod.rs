//! The immutable scene graph consumed by renderers.

pub mod node;

pub use node::{
    BlendMode, ColorDepth, FontId, ImageSurface, PositionedGlyph, RenderNode, ScalingFilter,
    SceneTexture, EMPTY_GLYPH,
};
