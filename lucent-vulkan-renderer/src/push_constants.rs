//! The per-draw uniform push shared by all pipelines.
//!
//! Every pipeline layout carries one push-constant block holding the
//! current modelview-projection matrix, the shader-side clip in rounded
//! rect form, and the device scale. The compiler snapshots these into
//! PUSH_CONSTANTS operations; emission pushes them before the draws they
//! bracket.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};
use lucent_core::RoundedRect;

/// The push-constant block layout. 120 bytes, within the 128-byte minimum
/// push-constant budget Vulkan guarantees.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    /// Column-major modelview-projection matrix.
    pub mvp: [f32; 16],
    /// Clip shape: bounds, horizontal radii, vertical radii.
    pub clip: [f32; 12],
    /// Device scale factors.
    pub scale: [f32; 2],
}

impl PushConstants {
    /// Assembles the block from the compiler's snapshot.
    pub fn new(mvp: &Mat4, clip: &RoundedRect, scale: Vec2) -> Self {
        PushConstants {
            mvp: mvp.to_cols_array(),
            clip: clip.to_float_array(),
            scale: [scale.x, scale.y],
        }
    }

    /// The stages reading the block.
    pub fn stage_flags() -> vk::ShaderStageFlags {
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
    }

    /// The push-constant range used when creating the shared pipeline
    /// layout.
    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: Self::stage_flags(),
            offset: 0,
            size: std::mem::size_of::<PushConstants>() as u32,
        }
    }

    /// Records the push into `command_buffer`.
    pub fn push(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
    ) {
        unsafe {
            device.cmd_push_constants(
                command_buffer,
                layout,
                Self::stage_flags(),
                0,
                bytemuck::bytes_of(self),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucent_core::Rect;

    #[test]
    fn test_block_fits_guaranteed_budget() {
        assert!(std::mem::size_of::<PushConstants>() <= 128);
        assert_eq!(std::mem::size_of::<PushConstants>(), 120);
    }

    #[test]
    fn test_layout_roundtrip() {
        let pc = PushConstants::new(
            &Mat4::IDENTITY,
            &RoundedRect::with_uniform_radius(Rect::new(1.0, 2.0, 3.0, 4.0), 0.5),
            Vec2::new(2.0, 2.0),
        );
        let bytes = bytemuck::bytes_of(&pc);
        let read: &PushConstants = bytemuck::from_bytes(bytes);
        assert_eq!(*read, pc);
        assert_eq!(read.scale, [2.0, 2.0]);
    }
}
