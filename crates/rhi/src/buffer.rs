//! GPU buffer management.
//!
//! - [`BufferUsage`] presets for the buffers the renderer creates
//! - [`Buffer`] wraps a VkBuffer bound to gpu-allocator managed memory
//!
//! Vertex and index buffers live in device-local memory and are filled
//! through [`crate::upload::UploadContext`]. Uniform, staging and readback
//! buffers are host-visible, coherent and persistently mapped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::buffer::{Buffer, BufferUsage};
//! use renderer_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let view_projection = [0.0f32; 32];
//! let uniform = Buffer::new_with_data(
//!     device,
//!     BufferUsage::Uniform,
//!     bytemuck::cast_slice(&view_projection),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory;

/// Buffer presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local vertex data, filled by transfer
    Vertex,
    /// Device-local index data, filled by transfer
    Index,
    /// Host-visible uniform data rewritten every frame
    Uniform,
    /// Host-visible transfer source
    Staging,
    /// Host-visible transfer destination for reading results back
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory property flags the backing memory must have.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferUsage::Uniform | BufferUsage::Staging | BufferUsage::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    /// Allocator location used for this preset.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// GPU buffer with its memory allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    name: &'static str,
}

impl Buffer {
    /// Creates a buffer from a preset.
    ///
    /// # Errors
    ///
    /// Fails on a zero size, when no memory type fits, or when creation or
    /// allocation fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        Self::create(
            device,
            size,
            usage.to_vk_usage(),
            usage.memory_properties(),
            usage.memory_location(),
            usage.name(),
        )
    }

    /// Creates a buffer whose memory type satisfies both the buffer's
    /// memory-type bits and `properties`.
    ///
    /// The returned buffer's [`Buffer::memory_properties`] always contain
    /// `properties`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableMemoryType`] when the device has no
    /// matching memory type.
    pub fn with_properties(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let location = memory::location_for_properties(properties);
        Self::create(device, size, usage, properties, location, "buffer")
    }

    /// Creates a host-visible buffer and fills it with `data`.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    fn create(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        location: MemoryLocation,
        name: &'static str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidSize(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation =
            match memory::allocate(&device, name, requirements, properties, location, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.handle().destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        let bound = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            memory::release(&device, allocation, name);
            unsafe { device.handle().destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        debug!("Created {} buffer: {} bytes", name, size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            name,
        })
    }

    fn mapped(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<*mut u8> {
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidSize(format!(
                "Access exceeds {} buffer: offset {} + {} > {}",
                self.name, offset, len, self.size
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle(format!("{} buffer is not mapped", self.name)))?;

        // SAFETY: offset + len was checked against the buffer size above.
        Ok(unsafe { mapped_ptr.as_ptr().cast::<u8>().add(offset as usize) })
    }

    /// Copies `data` into the mapped buffer at `offset`.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is not host-visible or the write would overrun.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let dst = self.mapped(offset, data.len())?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    /// Writes a plain-old-data value at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, value: &T) -> RhiResult<()> {
        self.write_data(offset, bytemuck::bytes_of(value))
    }

    /// Reads `len` bytes from the mapped buffer at `offset`.
    pub fn read_data(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let src = self.mapped(offset, len)?;
        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len) };
        Ok(out)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Property flags of the memory type backing this buffer.
    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.allocation
            .as_ref()
            .map(Allocation::memory_properties)
            .unwrap_or_default()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            memory::release(&self.device, allocation, self.name);
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_geometry_is_device_local() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            assert_eq!(
                usage.memory_properties(),
                vk::MemoryPropertyFlags::DEVICE_LOCAL
            );
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
        }
    }

    #[test]
    fn test_host_buffers_are_coherent() {
        for usage in [
            BufferUsage::Uniform,
            BufferUsage::Staging,
            BufferUsage::Readback,
        ] {
            assert!(usage.memory_properties().contains(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ));
            assert_ne!(usage.memory_location(), MemoryLocation::GpuOnly);
        }
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Readback.name(), "readback");
    }
}
