// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every object holds an Arc to the context,
// so the device outlives everything created from it.

pub mod buffer;
pub mod command;
pub mod debug;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanContext;
pub use error::{RenderError, RenderResult};
