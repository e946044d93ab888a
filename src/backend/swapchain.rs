// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// along with the per-image views and framebuffers that depend on it.
// The chain is rebuilt from scratch whenever the surface changes.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::device::SurfaceSupport;
use super::pipeline::create_framebuffers;
use super::{RenderError, RenderResult, VulkanContext};
use crate::window::{wait_for_drawable_extent, WindowHost};

/// Result of asking the chain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image is (or will be, once the semaphore fires) ready for writing
    Ready { image_index: u32, suboptimal: bool },
    /// Chain no longer matches the surface; nothing was acquired
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// Parameters chosen for a swapchain before it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Prefer B8G8R8A8_SRGB with the sRGB non-linear color space, else the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Use `preferred` when offered, otherwise FIFO (always supported)
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface dictates the extent unless it reports the u32::MAX sentinel,
/// in which case the window size is clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum so we never wait on the driver, capped by the
/// maximum when the surface has one (0 means unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && desired > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        desired
    }
}

/// Derive every swapchain parameter from the surface and the window size
pub fn plan_swapchain(
    support: &SurfaceSupport,
    window: vk::Extent2D,
    preferred_present_mode: vk::PresentModeKHR,
) -> RenderResult<SwapchainPlan> {
    let surface_format = choose_surface_format(&support.formats)
        .ok_or(RenderError::SwapChainCreation(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;

    Ok(SwapchainPlan {
        surface_format,
        present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
        extent: choose_extent(&support.capabilities, window),
        image_count: choose_image_count(&support.capabilities),
        pre_transform: support.capabilities.current_transform,
    })
}

/// One live swapchain with its per-image resources
pub struct SwapChain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    loader: khr::Swapchain,
    ctx: Arc<VulkanContext>,
}

impl SwapChain {
    fn build(
        ctx: &Arc<VulkanContext>,
        loader: &khr::Swapchain,
        plan: &SwapchainPlan,
    ) -> RenderResult<Self> {
        let families = ctx.queue_families;
        let family_indices = [families.graphics, families.present];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        // Images are used by two families without ownership transfers
        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::SwapChainCreation)?;

        // Owned from here on, so early returns clean up
        let mut chain = Self {
            handle,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: plan.surface_format.format,
            extent: plan.extent,
            present_mode: plan.present_mode,
            loader: loader.clone(),
            ctx: ctx.clone(),
        };

        chain.images = unsafe { loader.get_swapchain_images(handle) }?;

        for &image in &chain.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(chain.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { ctx.device.create_image_view(&view_info, None) }?;
            chain.image_views.push(view);
        }

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            chain.extent.width,
            chain.extent.height,
            chain.images.len(),
            chain.format,
            chain.present_mode
        );

        Ok(chain)
    }

    /// Destroy framebuffers, views and the swapchain. Safe to call twice.
    fn teardown(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.ctx.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                self.ctx.device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Owns the current chain and rebuilds it on demand
pub struct SwapchainManager {
    chain: SwapChain,
    loader: khr::Swapchain,
    preferred_present_mode: vk::PresentModeKHR,
    recreate_count: u64,
    ctx: Arc<VulkanContext>,
}

impl SwapchainManager {
    /// Build the initial chain. Framebuffers are attached separately once
    /// the render pass exists.
    pub fn new(
        ctx: Arc<VulkanContext>,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RenderResult<Self> {
        let loader = khr::Swapchain::new(&ctx.instance, &ctx.device);
        let plan = plan_swapchain(&ctx.surface_support()?, window_extent, preferred_present_mode)?;
        let chain = SwapChain::build(&ctx, &loader, &plan)?;

        Ok(Self {
            chain,
            loader,
            preferred_present_mode,
            recreate_count: 0,
            ctx,
        })
    }

    pub fn chain(&self) -> &SwapChain {
        &self.chain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    pub fn format(&self) -> vk::Format {
        self.chain.format
    }

    /// (Re)create one framebuffer per image view against `render_pass`
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> RenderResult<()> {
        unsafe {
            for framebuffer in self.chain.framebuffers.drain(..) {
                self.ctx.device.destroy_framebuffer(framebuffer, None);
            }
        }
        self.chain.framebuffers = create_framebuffers(
            &self.ctx.device,
            &self.chain.image_views,
            render_pass,
            self.chain.extent,
        )?;
        Ok(())
    }

    /// Rebuild the chain for the current surface.
    ///
    /// Blocks while the window is minimized and returns `Ok(false)` without
    /// touching anything if the window closes in the meantime. The render
    /// pass is kept; images, views and framebuffers are replaced.
    pub fn recreate(
        &mut self,
        window: &mut dyn WindowHost,
        render_pass: vk::RenderPass,
    ) -> RenderResult<bool> {
        let Some(window_extent) = wait_for_drawable_extent(window) else {
            return Ok(false);
        };

        // Old images may still be referenced by in-flight work
        self.ctx.wait_idle()?;

        let old_format = self.chain.format;
        self.chain.teardown();

        let plan = plan_swapchain(
            &self.ctx.surface_support()?,
            window_extent,
            self.preferred_present_mode,
        )?;
        self.chain = SwapChain::build(&self.ctx, &self.loader, &plan)?;

        if self.chain.format != old_format {
            log::warn!(
                "Swapchain format changed from {:?} to {:?}; render pass was built for the old one",
                old_format,
                self.chain.format
            );
        }

        self.create_framebuffers(render_pass)?;
        self.recreate_count += 1;
        log::info!(
            "Swapchain recreated ({}): {}x{}",
            self.recreate_count,
            self.chain.extent.width,
            self.chain.extent.height
        );

        Ok(true)
    }

    /// Request the next image; `image_available` is signaled when it is writable
    pub fn acquire_next_image(&self, image_available: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.chain.handle,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphores` fire
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> RenderResult<PresentOutcome> {
        let swapchains = [self.chain.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}
