//! Core value types for the Lucent toolkit: geometry, colors, transforms,
//! and the immutable render-node scene graph consumed by the rendering
//! backends.
//!
//! This crate is deliberately free of any GPU or windowing dependency; it
//! only defines the data renderers read.

pub mod error;
pub mod scene;
pub mod types;

pub use error::CoreError;
pub use scene::{
    BlendMode, ColorDepth, FontId, ImageSurface, PositionedGlyph, RenderNode, ScalingFilter,
    SceneTexture, EMPTY_GLYPH,
};
pub use types::{
    Color, ColorStop, Components2d, Decomposed, Point, Rect, RectInt, RoundedRect, Size, Transform,
    TransformCategory,
};
