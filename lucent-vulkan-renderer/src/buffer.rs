//! Host-visible Vulkan buffers.
//!
//! The renderer only ever needs CPU-written buffers: the per-pass vertex
//! buffer, the gradient-stop storage buffer and staging buffers for image
//! uploads. All of them are allocated `CpuToGpu` and written through the
//! allocator's persistent mapping.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::debug;

use crate::context::VulkanContext;
use crate::error::{Result, VulkanError};

/// A host-visible buffer with its memory allocation.
pub struct VulkanBuffer {
    context: Arc<VulkanContext>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: usize,
}

impl VulkanBuffer {
    fn new(context: Arc<VulkanContext>, size: usize, usage: vk::BufferUsageFlags) -> Result<Self> {
        debug_assert!(size > 0, "zero-size buffers are skipped by callers");
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size as vk::DeviceSize)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { context.device().create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { context.device().get_buffer_memory_requirements(buffer) };

        let allocation = context
            .allocator()
            .lock()
            .expect("allocator lock")
            .allocate(&AllocationCreateDesc {
                name: "lucent buffer",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(VulkanError::Allocation)?;

        unsafe {
            context
                .device()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }?;

        Ok(VulkanBuffer {
            context,
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Creates the per-pass vertex buffer.
    pub fn new_vertex(context: Arc<VulkanContext>, size: usize) -> Result<Self> {
        Self::new(context, size, vk::BufferUsageFlags::VERTEX_BUFFER)
    }

    /// Creates the shared storage buffer (gradient color stops).
    pub fn new_storage(context: Arc<VulkanContext>, size: usize) -> Result<Self> {
        Self::new(context, size, vk::BufferUsageFlags::STORAGE_BUFFER)
    }

    /// Creates a staging buffer for image uploads.
    pub fn new_staging(context: Arc<VulkanContext>, size: usize) -> Result<Self> {
        Self::new(context, size, vk::BufferUsageFlags::TRANSFER_SRC)
    }

    /// The raw buffer handle.
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer
    }

    /// The buffer size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The persistently mapped memory of this buffer.
    pub fn map(&mut self) -> &mut [u8] {
        let size = self.size;
        let slice = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .expect("CpuToGpu allocations are always mapped");
        &mut slice[..size]
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        debug!("Dropping buffer {:?} ({} bytes)", self.buffer, self.size);
        unsafe {
            self.context.device().destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self
                .context
                .allocator()
                .lock()
                .expect("allocator lock")
                .free(allocation);
        }
    }
}

impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
