//! Vulkan rendering backend for the Lucent scene graph.
//!
//! The renderer compiles an immutable [`lucent_core::RenderNode`] tree into
//! batched Vulkan draw commands. Rendering one pass happens in phases:
//!
//! 1. the tree walk ([`render_pass`]) compiles nodes into a flat list of
//!    draw operations, deciding per node whether the GPU can render it
//!    directly or the CPU rasterizer must be used;
//! 2. the upload phase resolves every operation's source images, spawning
//!    nested offscreen passes for effects that sample their child;
//! 3. descriptor reservation assigns image/sampler table indices;
//! 4. packing lays all instance data into one vertex buffer;
//! 5. emission streams the operations into a command buffer, batching
//!    pipeline changes.
//!
//! Device creation, swapchains and shader compilation live outside this
//! crate; the [`context::VulkanContext`] wraps externally created handles.

pub mod buffer;
pub mod clip;
pub mod context;
pub mod error;
pub mod glyphs;
pub mod image;
pub mod instances;
pub mod pipeline;
pub mod push_constants;
pub mod raster;
pub mod render;
pub mod render_pass;
pub mod shader;

pub use clip::{Clip, ClipKind};
pub use context::VulkanContext;
pub use error::{Result, VulkanError};
pub use glyphs::{CachedGlyph, GlyphAtlas};
pub use image::{VulkanImage, VulkanUploader};
pub use pipeline::{Pipeline, PipelineClip, PipelineFamily, PipelineKind};
pub use raster::{NodeRasterizer, RasterClip, RasterImage};
pub use render::{Render, RenderSampler};
pub use render_pass::{DrawOp, OpList, ParseState, RenderPass};
