// Buffer management for vertex and uniform data
//
// Each Buffer owns exactly one memory allocation bound at offset 0. Memory
// types are chosen explicitly from the adapter's memory properties.

use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::command::CommandPool;
use super::{RenderError, RenderResult, VulkanContext};

const HOST_VISIBLE_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// First memory type allowed by `type_filter` whose flags contain `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let has_type = (type_filter & (1 << i)) != 0;
            let has_properties = memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties);
            has_type && has_properties
        })
        .ok_or(RenderError::UnsupportedMemoryType {
            type_filter,
            properties,
        })
}

/// Usage flags for a device-local buffer filled by staging. The buffer is a
/// copy destination on upload and a copy source for `read_back`.
pub fn staged_usage(usage: vk::BufferUsageFlags) -> vk::BufferUsageFlags {
    usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC
}

/// Copy `data` into the start of a mapped region
pub fn copy_to_mapped<T: Pod>(mapped: &mut [u8], data: &[T]) {
    let bytes = bytemuck::cast_slice::<T, u8>(data);
    mapped[..bytes.len()].copy_from_slice(bytes);
}

/// Copy `count` records out of the start of a mapped region
pub fn copy_from_mapped<T: Pod>(mapped: &[u8], count: usize) -> Vec<T> {
    let stride = std::mem::size_of::<T>();
    mapped[..count * stride]
        .chunks_exact(stride)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    ctx: Arc<VulkanContext>,
}

impl Buffer {
    /// Create a buffer and bind a fresh allocation satisfying `properties`
    pub fn new(
        ctx: &Arc<VulkanContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        let device = &ctx.device;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.create_buffer(&buffer_info, None) }?;

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };

        let allocate = || -> RenderResult<vk::DeviceMemory> {
            let memory_type_index = find_memory_type(
                &ctx.memory_properties,
                requirements.memory_type_bits,
                properties,
            )?;

            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type_index);

            let memory = unsafe { device.allocate_memory(&alloc_info, None) }?;
            if let Err(e) = unsafe { device.bind_buffer_memory(handle, memory, 0) } {
                unsafe { device.free_memory(memory, None) };
                return Err(e.into());
            }
            Ok(memory)
        };

        let memory = match allocate() {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(e);
            }
        };

        Ok(Self {
            handle,
            memory,
            size,
            ctx: ctx.clone(),
        })
    }

    /// Host-visible buffer filled with `data`
    pub fn with_data<T: Pod>(
        ctx: &Arc<VulkanContext>,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> RenderResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Self::new(ctx, size, usage, HOST_VISIBLE_COHERENT)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Device-local buffer filled through a temporary staging buffer
    pub fn device_local<T: Pod>(
        ctx: &Arc<VulkanContext>,
        pool: &CommandPool,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> RenderResult<Self> {
        let staging = Self::with_data(ctx, vk::BufferUsageFlags::TRANSFER_SRC, data)?;

        let buffer = Self::new(
            ctx,
            staging.size,
            staged_usage(usage),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        staging.copy_to(pool, &buffer)?;
        log::debug!("Uploaded {} bytes to device-local memory", buffer.size);

        // staging dropped here, after the queue went idle
        Ok(buffer)
    }

    /// Copy this buffer's whole contents into `dst` and wait for completion
    pub fn copy_to(&self, pool: &CommandPool, dst: &Buffer) -> RenderResult<()> {
        let size = self.size.min(dst.size);
        let queue = self.ctx.graphics_queue;

        pool.submit_one_time(queue, |device, command_buffer| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { device.cmd_copy_buffer(command_buffer, self.handle, dst.handle, &[region]) };
        })
    }

    /// Overwrite the start of a host-visible buffer with `data`
    pub fn write<T: Pod>(&self, data: &[T]) -> RenderResult<()> {
        let len = std::mem::size_of_val(data) as vk::DeviceSize;
        if len > self.size {
            return Err(RenderError::BufferOverflow {
                len,
                capacity: self.size,
            });
        }

        unsafe {
            let ptr = self
                .ctx
                .device
                .map_memory(self.memory, 0, len, vk::MemoryMapFlags::empty())?;
            let mapped = std::slice::from_raw_parts_mut(ptr as *mut u8, len as usize);
            copy_to_mapped(mapped, data);
            self.ctx.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Debug path: copy a device-local buffer back to the host
    pub fn read_back<T: Pod>(&self, pool: &CommandPool) -> RenderResult<Vec<T>> {
        let staging = Self::new(
            &self.ctx,
            self.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            HOST_VISIBLE_COHERENT,
        )?;
        self.copy_to(pool, &staging)?;

        let count = self.size as usize / std::mem::size_of::<T>();
        unsafe {
            let ptr = self.ctx.device.map_memory(
                staging.memory,
                0,
                staging.size,
                vk::MemoryMapFlags::empty(),
            )?;
            let mapped = std::slice::from_raw_parts(ptr as *const u8, staging.size as usize);
            let records = copy_from_mapped(mapped, count);
            self.ctx.device.unmap_memory(staging.memory);
            Ok(records)
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_buffer(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}

/// Host-visible uniform buffer that stays mapped for its whole lifetime
pub struct UniformBuffer<T: Pod> {
    buffer: Buffer,
    mapped: *mut T,
}

impl<T: Pod> UniformBuffer<T> {
    pub fn new(ctx: &Arc<VulkanContext>) -> RenderResult<Self> {
        let size = std::mem::size_of::<T>() as vk::DeviceSize;
        let buffer = Buffer::new(
            ctx,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            HOST_VISIBLE_COHERENT,
        )?;

        let ptr = unsafe {
            ctx.device
                .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())
        }?;

        Ok(Self {
            buffer,
            mapped: ptr as *mut T,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size
    }

    /// Only call once the GPU is done with this slot (after its fence wait)
    pub fn update(&mut self, value: &T) {
        // Mapping offsets honor minMemoryMapAlignment, which covers T
        unsafe { self.mapped.write_unaligned(*value) };
    }
}

impl<T: Pod> Drop for UniformBuffer<T> {
    fn drop(&mut self) {
        unsafe { self.buffer.ctx.device.unmap_memory(self.buffer.memory) };
    }
}
