// Synchronization primitives
//
// One set per frame in flight. The fence is the only thing the CPU waits on;
// the semaphores order acquire -> render -> present on the GPU.

use ash::vk;
use std::sync::Arc;

use super::{RenderResult, VulkanContext};

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    ctx: Arc<VulkanContext>,
}

impl FrameSync {
    pub fn new(ctx: &Arc<VulkanContext>) -> RenderResult<Self> {
        let device = &ctx.device;
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let image_available = unsafe { device.create_semaphore(&semaphore_info, None) }?;
        let render_finished = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(e.into());
            }
        };
        let in_flight_fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
            ctx: ctx.clone(),
        })
    }

    /// Block until this slot's previous submission has completed.
    /// Returns whether the fence was already signaled.
    pub fn wait(&self) -> RenderResult<bool> {
        let device = &self.ctx.device;
        let ready = unsafe { device.get_fence_status(self.in_flight_fence) }?;
        if !ready {
            log::trace!("Waiting on in-flight fence");
            unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }?;
        }
        Ok(ready)
    }

    /// Unsignal the fence. Only call once a submission using it is certain.
    pub fn reset(&self) -> RenderResult<()> {
        unsafe { self.ctx.device.reset_fences(&[self.in_flight_fence]) }?;
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_semaphore(self.image_available, None);
            self.ctx.device.destroy_semaphore(self.render_finished, None);
            self.ctx.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
