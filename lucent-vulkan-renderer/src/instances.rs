//! Per-pipeline vertex instance layouts.
//!
//! Every draw operation packs its parameters into one `#[repr(C)]`
//! instance struct; a draw call steps through them with per-instance
//! vertex input. The structs here are the single source of truth for both
//! the byte layout written by the packer and the
//! `VkVertexInputAttributeDescription`s the pipelines are created with.
//!
//! The layout is private to each pipeline family and not a stable
//! interface.

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Vertex input state of one pipeline family.
#[derive(Debug, Clone)]
pub struct VertexInputDescription {
    pub binding: vk::VertexInputBindingDescription,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Writes one instance struct into the vertex buffer at `offset`.
///
/// Panics if the slice is too small; offsets are precomputed by the
/// counting pass, so that would be a compiler bug.
pub fn write_instance<T: Pod>(data: &mut [u8], offset: usize, instance: &T) {
    let bytes = bytemuck::bytes_of(instance);
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn instance_binding(stride: usize) -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: stride as u32,
        input_rate: vk::VertexInputRate::INSTANCE,
    }
}

fn attr(location: u32, offset: usize, format: vk::Format) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    }
}

const VEC4: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
const VEC2: vk::Format = vk::Format::R32G32_SFLOAT;
const FLOAT: vk::Format = vk::Format::R32_SFLOAT;
const UINT: vk::Format = vk::Format::R32_UINT;
const UVEC2: vk::Format = vk::Format::R32G32_UINT;

// --- Color ---

/// Instance data of the color pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorInstance {
    pub rect: [f32; 4],
    pub color: [f32; 4],
}

impl ColorInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![attr(0, 0, VEC4), attr(1, 16, VEC4)],
        }
    }
}

// --- Texture ---

/// Instance data of the texture pipelines, also used by fallback and
/// repeat operations.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TextureInstance {
    pub rect: [f32; 4],
    pub tex_rect: [f32; 4],
    pub tex_id: [u32; 2],
}

impl TextureInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![attr(0, 0, VEC4), attr(1, 16, VEC4), attr(2, 32, UVEC2)],
        }
    }
}

// --- Linear gradient ---

/// Instance data of the linear-gradient pipelines. The color stops live in
/// the shared storage buffer; `stop_offset` indexes into it in units of
/// stops.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LinearGradientInstance {
    pub rect: [f32; 4],
    pub start: [f32; 2],
    pub end: [f32; 2],
    pub repeating: u32,
    pub stop_offset: u32,
    pub stop_count: u32,
}

impl LinearGradientInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC2),
                attr(2, 24, VEC2),
                attr(3, 32, UINT),
                attr(4, 36, UINT),
                attr(5, 40, UINT),
            ],
        }
    }
}

// --- Color matrix (also used for opacity) ---

/// Instance data of the color-matrix pipelines. Opacity renders through
/// the same family with an alpha-only matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorMatrixInstance {
    pub rect: [f32; 4],
    pub tex_rect: [f32; 4],
    pub tex_id: [u32; 2],
    pub color_matrix: [f32; 16],
    pub color_offset: [f32; 4],
}

impl ColorMatrixInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC4),
                attr(2, 32, UVEC2),
                attr(3, 40, VEC4),
                attr(4, 56, VEC4),
                attr(5, 72, VEC4),
                attr(6, 88, VEC4),
                attr(7, 104, VEC4),
            ],
        }
    }
}

// --- Blur ---

/// Instance data of the blur pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlurInstance {
    pub rect: [f32; 4],
    pub tex_rect: [f32; 4],
    pub tex_id: [u32; 2],
    pub radius: f32,
}

impl BlurInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC4),
                attr(2, 32, UVEC2),
                attr(3, 40, FLOAT),
            ],
        }
    }
}

// --- Border ---

/// Instance data of the border pipelines. The outline is a rounded rect
/// serialized as bounds + horizontal radii + vertical radii; colors are
/// top, right, bottom, left.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BorderInstance {
    pub outline: [f32; 12],
    pub widths: [f32; 4],
    pub colors: [f32; 16],
}

impl BorderInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC4),
                attr(2, 32, VEC4),
                attr(3, 48, VEC4),
                attr(4, 64, VEC4),
                attr(5, 80, VEC4),
                attr(6, 96, VEC4),
                attr(7, 112, VEC4),
            ],
        }
    }
}

// --- Box shadow (inset and outset) ---

/// Instance data of the inset/outset shadow pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BoxShadowInstance {
    pub outline: [f32; 12],
    pub color: [f32; 4],
    pub offset: [f32; 2],
    pub spread: f32,
    pub blur_radius: f32,
}

impl BoxShadowInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC4),
                attr(2, 32, VEC4),
                attr(3, 48, VEC4),
                attr(4, 64, VEC2),
                attr(5, 72, FLOAT),
                attr(6, 76, FLOAT),
            ],
        }
    }
}

// --- Text ---

/// Instance data of the mask (text) pipelines; one instance per glyph.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TextInstance {
    pub rect: [f32; 4],
    pub tex_rect: [f32; 4],
    pub color: [f32; 4],
    pub tex_id: [u32; 2],
}

impl TextInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC4),
                attr(2, 32, VEC4),
                attr(3, 48, UVEC2),
            ],
        }
    }
}

/// Instance data of the color-text pipelines (color glyphs carry their own
/// colors, so the layout is the texture layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorTextInstance {
    pub rect: [f32; 4],
    pub tex_rect: [f32; 4],
    pub tex_id: [u32; 2],
}

impl ColorTextInstance {
    pub fn vertex_input() -> VertexInputDescription {
        TextureInstance::vertex_input()
    }
}

// --- Cross fade ---

/// Instance data of the cross-fade pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CrossFadeInstance {
    pub rect: [f32; 4],
    pub start_tex_rect: [f32; 4],
    pub end_tex_rect: [f32; 4],
    pub start_tex_id: [u32; 2],
    pub end_tex_id: [u32; 2],
    pub progress: f32,
}

impl CrossFadeInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC4),
                attr(2, 32, VEC4),
                attr(3, 48, UVEC2),
                attr(4, 56, UVEC2),
                attr(5, 64, FLOAT),
            ],
        }
    }
}

// --- Blend mode ---

/// Instance data of the blend-mode pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlendModeInstance {
    pub rect: [f32; 4],
    pub top_tex_rect: [f32; 4],
    pub bottom_tex_rect: [f32; 4],
    pub top_tex_id: [u32; 2],
    pub bottom_tex_id: [u32; 2],
    pub blend_mode: u32,
}

impl BlendModeInstance {
    pub fn vertex_input() -> VertexInputDescription {
        VertexInputDescription {
            binding: instance_binding(std::mem::size_of::<Self>()),
            attributes: vec![
                attr(0, 0, VEC4),
                attr(1, 16, VEC4),
                attr(2, 32, VEC4),
                attr(3, 48, UVEC2),
                attr(4, 56, UVEC2),
                attr(5, 64, UINT),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_match_attribute_layout() {
        assert_eq!(std::mem::size_of::<ColorInstance>(), 32);
        assert_eq!(std::mem::size_of::<TextureInstance>(), 40);
        assert_eq!(std::mem::size_of::<LinearGradientInstance>(), 44);
        assert_eq!(std::mem::size_of::<ColorMatrixInstance>(), 120);
        assert_eq!(std::mem::size_of::<BlurInstance>(), 44);
        assert_eq!(std::mem::size_of::<BorderInstance>(), 128);
        assert_eq!(std::mem::size_of::<BoxShadowInstance>(), 80);
        assert_eq!(std::mem::size_of::<TextInstance>(), 56);
        assert_eq!(std::mem::size_of::<CrossFadeInstance>(), 68);
        assert_eq!(std::mem::size_of::<BlendModeInstance>(), 68);
    }

    #[test]
    fn test_write_instance_roundtrip() {
        let instance = ColorInstance {
            rect: [1.0, 2.0, 3.0, 4.0],
            color: [0.5, 0.25, 0.125, 1.0],
        };
        let mut data = vec![0u8; 64];
        write_instance(&mut data, 32, &instance);
        let read: &ColorInstance = bytemuck::from_bytes(&data[32..64]);
        assert_eq!(*read, instance);
    }
}
