//! Fundamental value types shared across the Lucent crates.

pub mod color;
pub mod geometry;
pub mod rounded;
pub mod transform;

pub use color::{Color, ColorStop};
pub use geometry::{Point, Rect, RectInt, Size};
pub use rounded::RoundedRect;
pub use transform::{Components2d, Decomposed, Transform, TransformCategory};
