//! Error types of the core layer.

use thiserror::Error;

/// Errors produced while constructing core value types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A numeric input was outside its valid range.
    #[error("value out of range: {0}")]
    OutOfRange(String),
    /// Pixel data did not match the declared dimensions.
    #[error("invalid pixel data: expected {expected} bytes, got {actual}")]
    InvalidPixelData { expected: usize, actual: usize },
}
