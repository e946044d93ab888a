// Command pool + one-shot submissions
//
// One pool per queue family. Per-frame buffers are reset individually and
// re-recorded each use; transfer work goes through `submit_one_time`.

use ash::vk;
use std::sync::Arc;

use super::{RenderResult, VulkanContext};

pub struct CommandPool {
    pub handle: vk::CommandPool,
    ctx: Arc<VulkanContext>,
}

impl CommandPool {
    pub fn new(ctx: &Arc<VulkanContext>, queue_family: u32) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        let handle = unsafe { ctx.device.create_command_pool(&pool_info, None) }?;

        Ok(Self {
            handle,
            ctx: ctx.clone(),
        })
    }

    /// Allocate `count` primary command buffers
    pub fn allocate(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.ctx.device.allocate_command_buffers(&alloc_info) }?;
        Ok(buffers)
    }

    /// Record with `record`, submit to `queue` and block until the queue is idle
    pub fn submit_one_time<F>(&self, queue: vk::Queue, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.ctx.device;
        let command_buffer = self.allocate(1)?[0];

        let result = (|| -> RenderResult<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;
            record(device, command_buffer);
            unsafe { device.end_command_buffer(command_buffer) }?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

            unsafe {
                device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
                device.queue_wait_idle(queue)?;
            }
            Ok(())
        })();

        unsafe { device.free_command_buffers(self.handle, &[command_buffer]) };
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_command_pool(self.handle, None) };
    }
}
