// Backend error types
//
// Everything here is fatal to the caller. Swapchain staleness is not an
// error: it travels as AcquireOutcome / PresentOutcome values instead.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Vulkan loader could not be found or opened
    #[error("Failed to load Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Any other Vulkan call failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No adapter offers graphics + present + a usable surface
    #[error("No suitable GPU found (need graphics and present queues, surface formats and present modes)")]
    NoSuitableDevice,

    #[error("Swap chain creation failed: {0}")]
    SwapChainCreation(vk::Result),

    #[error("Graphics pipeline creation failed: {0}")]
    PipelineCreation(vk::Result),

    #[error("Shader module creation failed for {stage}: {result}")]
    ShaderModule {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("No memory type matches filter {type_filter:#034b} with properties {properties:?}")]
    UnsupportedMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Write of {len} bytes exceeds buffer capacity of {capacity} bytes")]
    BufferOverflow {
        len: ash::vk::DeviceSize,
        capacity: ash::vk::DeviceSize,
    },

    #[error("Invalid SPIR-V binary ({reason})")]
    InvalidShaderBinary { reason: String },

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Drop paths cannot propagate. Log a failed teardown step and carry on;
/// returns whether the step succeeded.
pub fn log_teardown_failure(step: &str, result: RenderResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to {}: {}", step, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_failures_are_reported_not_swallowed() {
        assert!(log_teardown_failure("wait for device idle", Ok(())));
        assert!(!log_teardown_failure(
            "wait for device idle",
            Err(RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn messages_name_the_failing_resource() {
        let err = RenderError::BufferOverflow {
            len: 128,
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "Write of 128 bytes exceeds buffer capacity of 64 bytes"
        );
    }
}
