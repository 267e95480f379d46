// Buffer utilities for vertex, uniform and storage buffers
//
// Host-visible buffers are allocated through gpu-allocator and stay
// persistently mapped. The `HostBuffer` trait is the seam the uniform
// handlers write through, so the same dirty-tracking code runs against
// GPU memory or plain host memory.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::VulkanDevice;

/// What a handler-owned buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Uniform,
    Storage,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }

    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BufferKind::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            BufferKind::Storage => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

/// A buffer whose contents can be mapped into host memory.
pub trait HostBuffer {
    /// Size in bytes visible through the mapping.
    fn size(&self) -> usize;

    /// Maps the buffer. Called once before the first write.
    fn map(&mut self) -> Result<()>;

    /// The mapped bytes, or `None` while unmapped.
    fn mapped_mut(&mut self) -> Option<&mut [u8]>;

    fn unmap(&mut self);
}

/// Creates buffers for handlers.
pub trait BufferAllocator {
    type Buffer: HostBuffer;

    fn allocate(&self, kind: BufferKind, size: usize) -> Result<Self::Buffer>;
}

/// Plain host memory standing in for a mapped buffer.
#[derive(Debug, Clone, Default)]
pub struct HostMemory {
    bytes: Vec<u8>,
    mapped: bool,
    map_count: usize,
}

impl HostMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            mapped: false,
            map_count: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// How many times `map` was called.
    pub fn map_count(&self) -> usize {
        self.map_count
    }
}

impl HostBuffer for HostMemory {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn map(&mut self) -> Result<()> {
        self.mapped = true;
        self.map_count += 1;
        Ok(())
    }

    fn mapped_mut(&mut self) -> Option<&mut [u8]> {
        if self.mapped {
            Some(&mut self.bytes)
        } else {
            None
        }
    }

    fn unmap(&mut self) {
        self.mapped = false;
    }
}

/// Allocator producing `HostMemory`; used headless and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAllocator;

impl BufferAllocator for HostAllocator {
    type Buffer = HostMemory;

    fn allocate(&self, _kind: BufferKind, size: usize) -> Result<HostMemory> {
        Ok(HostMemory::new(size))
    }
}

/// A host-visible Vulkan buffer backed by a gpu-allocator allocation.
pub struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: usize,
    mapped: bool,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        size: usize,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size.max(1) as vk::DeviceSize)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.device.create_buffer(&buffer_info, None)
                .context("Failed to create buffer")?
        };

        let requirements = unsafe {
            device.device.get_buffer_memory_requirements(buffer)
        };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for buffer '{}'", name));
            }
        };

        let bound = unsafe {
            device.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            if let Err(free_err) = device.allocator.lock().free(allocation) {
                log::error!("Failed to free allocation for '{}': {}", name, free_err);
            }
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e).context("Failed to bind buffer memory");
        }

        log::debug!("Created buffer '{}' ({} bytes, {:?})", name, size, usage);

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
            mapped: false,
            device: Arc::clone(device),
        })
    }

    /// Create a buffer and fill it with data
    pub fn with_data<T: bytemuck::Pod>(
        device: &Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(device, bytes.len(), usage, name)?;

        buffer.map()?;
        let mapped = buffer.mapped_mut()
            .context("Buffer memory is not host visible")?;
        mapped.copy_from_slice(bytes);

        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size.max(1) as vk::DeviceSize,
        }
    }
}

impl HostBuffer for GpuBuffer {
    fn size(&self) -> usize {
        self.size
    }

    fn map(&mut self) -> Result<()> {
        // CpuToGpu allocations are persistently mapped by the allocator.
        let allocation = self.allocation.as_ref().context("Buffer already freed")?;
        if allocation.mapped_ptr().is_none() {
            anyhow::bail!("Buffer memory is not host visible");
        }
        self.mapped = true;
        Ok(())
    }

    fn mapped_mut(&mut self) -> Option<&mut [u8]> {
        if !self.mapped {
            return None;
        }
        let size = self.size;
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .map(|slice| &mut slice[..size])
    }

    fn unmap(&mut self) {
        self.mapped = false;
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer allocation: {}", e);
            }
        }
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

impl BufferAllocator for Arc<VulkanDevice> {
    type Buffer = GpuBuffer;

    fn allocate(&self, kind: BufferKind, size: usize) -> Result<GpuBuffer> {
        let name = match kind {
            BufferKind::Uniform => "uniform handler",
            BufferKind::Storage => "storage handler",
        };
        GpuBuffer::new(self, size, kind.usage(), name)
    }
}

/// Vertex data uploaded for drawing.
pub struct GpuMesh {
    buffer: GpuBuffer,
    vertex_count: u32,
}

impl GpuMesh {
    pub fn upload<T: bytemuck::Pod>(device: &Arc<VulkanDevice>, vertices: &[T]) -> Result<Self> {
        let buffer = GpuBuffer::with_data(
            device,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertices,
            "mesh vertices",
        )?;

        Ok(Self {
            buffer,
            vertex_count: vertices.len() as u32,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Record the vertex bind and draw.
    pub fn cmd_render(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.vertex_count == 0 {
            return;
        }
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.buffer.handle()], &[0]);
            device.cmd_draw(cmd, self.vertex_count, 1, 0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_memory_only_writable_while_mapped() {
        let mut memory = HostMemory::new(8);
        assert!(memory.mapped_mut().is_none());

        memory.map().unwrap();
        memory.mapped_mut().unwrap()[0] = 7;
        memory.unmap();

        assert!(memory.mapped_mut().is_none());
        assert_eq!(memory.bytes()[0], 7);
        assert_eq!(memory.map_count(), 1);
    }

    #[test]
    fn test_kind_maps_to_usage_and_descriptor() {
        assert_eq!(BufferKind::Uniform.usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert_eq!(BufferKind::Storage.descriptor_type(), vk::DescriptorType::STORAGE_BUFFER);
    }
}
