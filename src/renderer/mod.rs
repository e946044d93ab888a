// Renderer - owns every GPU resource and sequences their teardown
//
// Field order in `FrameResources` is destruction order: per-frame objects
// first, then swapchain, render pass and finally the context itself.

pub mod frame;

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::buffer::{Buffer, UniformBuffer};
use crate::backend::command::CommandPool;
use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout};
use crate::backend::pipeline::{GraphicsPipeline, PipelineDesc, RenderPass};
use crate::backend::shader::load_spirv;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome, SwapchainManager};
use crate::backend::sync::FrameSync;
use crate::backend::error::log_teardown_failure;
use crate::backend::{RenderResult, VulkanContext};
use crate::config::Config;
use crate::geometry::{self, Transforms, Vertex};
use crate::window::{wait_for_drawable_extent, WindowHost, WinitWindow};

pub use frame::{FrameOrchestrator, FrameOutcome, FrameTarget};

/// Vulkan implementation of the per-frame operations
pub struct FrameResources {
    descriptor_sets: Vec<vk::DescriptorSet>,
    _descriptor_pool: DescriptorPool,
    uniforms: Vec<UniformBuffer<Transforms>>,
    vertex_buffer: Buffer,
    vertex_count: u32,
    frames: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    _command_pool: CommandPool,
    pipeline: GraphicsPipeline,
    _descriptor_layout: DescriptorSetLayout,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    ctx: Arc<VulkanContext>,

    clear_color: [f32; 4],
    start_time: Instant,
}

impl FrameTarget for FrameResources {
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        let already_done = self.frames[slot].wait()?;
        if !already_done {
            log::trace!("Slot {} was still in flight", slot);
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.frames[slot].image_available)
    }

    fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.frames[slot].reset()
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
        let device = &self.ctx.device;
        let cmd = self.command_buffers[slot];
        let extent = self.swapchain.extent();

        // The slot's fence has been waited on, so its uniform buffer is free
        let transforms = Transforms::at(self.start_time.elapsed().as_secs_f32(), extent);
        self.uniforms[slot].update(&transforms);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device.begin_command_buffer(cmd, &begin_info)?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            }];

            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass.handle)
                .framebuffer(self.swapchain.chain().framebuffers[image_index as usize])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle], &[0]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[self.descriptor_sets[slot]],
                &[],
            );
            device.cmd_draw(cmd, self.vertex_count, 1, 0, 0);

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    fn submit(&mut self, slot: usize) -> RenderResult<()> {
        let sync = &self.frames[slot];

        let wait_semaphores = [sync.image_available];
        // Vertex work may start before the image is available
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.command_buffers[slot]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        self.swapchain.present(
            self.ctx.present_queue,
            image_index,
            &[self.frames[slot].render_finished],
        )
    }

    fn recreate_swapchain(&mut self, window: &mut dyn WindowHost) -> RenderResult<bool> {
        self.swapchain.recreate(window, self.render_pass.handle)
    }
}

pub struct Renderer {
    orchestrator: FrameOrchestrator,
    resources: FrameResources,
}

impl Renderer {
    pub fn new(window: &mut WinitWindow, config: &Config) -> Result<Self> {
        let ctx = Arc::new(
            VulkanContext::new(
                &config.window.title,
                window.window(),
                config.debug.validation_layers,
            )
            .context("Failed to initialize Vulkan")?,
        );

        let extent = wait_for_drawable_extent(window)
            .context("Window closed before rendering started")?;

        let mut swapchain =
            SwapchainManager::new(ctx.clone(), extent, config.preferred_present_mode())
                .context("Failed to create swapchain")?;

        let render_pass = RenderPass::new(&ctx, swapchain.format())
            .context("Failed to create render pass")?;
        swapchain
            .create_framebuffers(render_pass.handle)
            .context("Failed to create framebuffers")?;

        // Shaders
        let vertex_spirv = load_spirv(&config.shaders.vertex)
            .with_context(|| format!("Failed to load {:?}", config.shaders.vertex))?;
        let fragment_spirv = load_spirv(&config.shaders.fragment)
            .with_context(|| format!("Failed to load {:?}", config.shaders.fragment))?;

        let descriptor_layout = DescriptorSetLayout::uniform(&ctx)?;
        let vertex_layout = Vertex::layout();
        let set_layouts = [descriptor_layout.handle];

        let pipeline = GraphicsPipeline::new(
            &ctx,
            &PipelineDesc {
                vertex_spirv: &vertex_spirv,
                fragment_spirv: &fragment_spirv,
                vertex_layout: &vertex_layout,
                render_pass: render_pass.handle,
                set_layouts: &set_layouts,
                push_constant_ranges: &[],
            },
        )
        .context("Failed to create graphics pipeline")?;

        // Commands + per-frame sync
        let frames_in_flight = config.graphics.max_frames_in_flight;
        let command_pool = CommandPool::new(&ctx, ctx.queue_families.graphics)?;
        let command_buffers = command_pool.allocate(frames_in_flight as u32)?;
        let frames = (0..frames_in_flight)
            .map(|_| FrameSync::new(&ctx))
            .collect::<RenderResult<Vec<_>>>()
            .context("Failed to create frame synchronization")?;

        // Geometry
        let vertices = geometry::mesh(config.graphics.mesh);
        let vertex_buffer = Buffer::device_local(
            &ctx,
            &command_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertices,
        )
        .context("Failed to upload vertex data")?;

        // Read-back only when validation actually resolved on
        if ctx.validation_enabled() {
            let uploaded: Vec<Vertex> = vertex_buffer.read_back(&command_pool)?;
            if uploaded != vertices {
                log::warn!("Vertex buffer contents differ from the uploaded mesh");
            } else {
                log::debug!("Vertex upload verified ({} vertices)", uploaded.len());
            }
        }

        // Uniforms
        let uniforms = (0..frames_in_flight)
            .map(|_| UniformBuffer::<Transforms>::new(&ctx))
            .collect::<RenderResult<Vec<_>>>()
            .context("Failed to create uniform buffers")?;

        let descriptor_pool = DescriptorPool::new(&ctx, frames_in_flight as u32)?;
        let uniform_ranges: Vec<_> = uniforms.iter().map(|u| (u.handle(), u.size())).collect();
        let descriptor_sets =
            descriptor_pool.allocate_uniform_sets(&descriptor_layout, &uniform_ranges)?;

        log::info!(
            "Renderer ready on {}: {} vertices, {} frames in flight",
            ctx.adapter_name(),
            vertices.len(),
            frames_in_flight
        );

        Ok(Self {
            orchestrator: FrameOrchestrator::new(frames_in_flight),
            resources: FrameResources {
                descriptor_sets,
                _descriptor_pool: descriptor_pool,
                uniforms,
                vertex_buffer,
                vertex_count: vertices.len() as u32,
                frames,
                command_buffers,
                _command_pool: command_pool,
                pipeline,
                _descriptor_layout: descriptor_layout,
                swapchain,
                render_pass,
                ctx,
                clear_color: config.graphics.clear_color,
                start_time: Instant::now(),
            },
        })
    }

    /// Render and present one frame
    pub fn draw_frame(&mut self, window: &mut dyn WindowHost) -> RenderResult<FrameOutcome> {
        self.orchestrator.draw_frame(&mut self.resources, window)
    }

    pub fn frame_counter(&self) -> u64 {
        self.orchestrator.frame_counter()
    }

    /// Block until the GPU has finished all submitted work
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.resources.ctx.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!(
            "Cleaning up Vulkan resources after {} frames ({} swapchain rebuilds)...",
            self.orchestrator.frame_counter(),
            self.orchestrator.recreations()
        );

        for (slot, phase) in self.orchestrator.interrupted_slots() {
            log::warn!("Frame slot {} interrupted while {:?}", slot, phase);
        }

        // Nothing below may be destroyed while the GPU still uses it
        log_teardown_failure("wait for device idle", self.resources.ctx.wait_idle());
    }
}
