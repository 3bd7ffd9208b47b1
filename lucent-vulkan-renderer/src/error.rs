//! The custom error type and `Result` alias for the Vulkan rendering
//! subsystem.
//!
//! Note that per-node rendering degradation (CPU fallback, dropped draws)
//! is *not* an error: the renderer never fails a frame outright. Errors
//! here are resource-level failures surfaced to the render session driver.

use ash::vk;
use thiserror::Error;

/// Errors of the Vulkan rendering subsystem.
#[derive(Debug, Error)]
pub enum VulkanError {
    /// An error originating directly from a Vulkan API call.
    #[error("Vulkan API error: {0}")]
    VkResult(#[from] vk::Result),

    /// An error from the GPU memory allocator.
    #[error("GPU allocation error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    /// A standard I/O error, typically from loading SPIR-V shaders.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A SPIR-V file was malformed.
    #[error("invalid SPIR-V in shader '{0}'")]
    InvalidShader(String),

    /// Creation of a specific Vulkan resource failed.
    #[error("failed to create {resource}: {message}")]
    ResourceCreation {
        /// The resource type, e.g. "framebuffer" or "pipeline".
        resource: &'static str,
        message: String,
    },

    /// No supported image format for the requested offscreen color depth.
    #[error("no supported offscreen format for {0}")]
    UnsupportedFormat(String),
}

/// `Result` alias used throughout the renderer.
pub type Result<T, E = VulkanError> = std::result::Result<T, E>;
