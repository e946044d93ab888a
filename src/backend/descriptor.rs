// Descriptors for the per-frame uniform buffer
//
// A single uniform buffer binding (binding 0, vertex stage) and one set per
// frame in flight, each pointing at that slot's buffer.

use ash::vk;
use std::sync::Arc;

use super::{RenderResult, VulkanContext};

pub const UNIFORM_BINDING: u32 = 0;

pub fn uniform_layout_binding() -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(UNIFORM_BINDING)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .build()
}

pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    ctx: Arc<VulkanContext>,
}

impl DescriptorSetLayout {
    pub fn uniform(ctx: &Arc<VulkanContext>) -> RenderResult<Self> {
        let bindings = [uniform_layout_binding()];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let handle = unsafe { ctx.device.create_descriptor_set_layout(&layout_info, None) }?;

        Ok(Self {
            handle,
            ctx: ctx.clone(),
        })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device
                .destroy_descriptor_set_layout(self.handle, None)
        };
    }
}

/// Pool sized for `count` uniform-buffer sets; sets are freed with the pool
pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    ctx: Arc<VulkanContext>,
}

impl DescriptorPool {
    pub fn new(ctx: &Arc<VulkanContext>, count: u32) -> RenderResult<Self> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);

        let handle = unsafe { ctx.device.create_descriptor_pool(&pool_info, None) }?;

        Ok(Self {
            handle,
            ctx: ctx.clone(),
        })
    }

    /// One set per entry of `buffers`, each bound to that whole buffer
    pub fn allocate_uniform_sets(
        &self,
        layout: &DescriptorSetLayout,
        buffers: &[(vk::Buffer, vk::DeviceSize)],
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle; buffers.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.handle)
            .set_layouts(&layouts);

        let sets = unsafe { self.ctx.device.allocate_descriptor_sets(&alloc_info) }?;

        for (&set, &(buffer, range)) in sets.iter().zip(buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }];

            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();

            unsafe { self.ctx.device.update_descriptor_sets(&[write], &[]) };
        }

        Ok(sets)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_descriptor_pool(self.handle, None) };
    }
}
