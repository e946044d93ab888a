// Shader loading
//
// Vulkan consumes SPIR-V as 32-bit words. Binaries are read from disk at
// startup and checked before they reach the driver.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::{RenderError, RenderResult};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Convert raw bytes into SPIR-V words, rejecting anything that is not a
/// whole number of words or lacks the magic number
pub fn spirv_words(bytes: &[u8]) -> RenderResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RenderError::InvalidShaderBinary {
            reason: "empty binary".into(),
        });
    }
    if bytes.len() % 4 != 0 {
        return Err(RenderError::InvalidShaderBinary {
            reason: format!("length {} is not a multiple of 4", bytes.len()),
        });
    }

    // read_spv also fixes up byte order and alignment
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
        RenderError::InvalidShaderBinary {
            reason: e.to_string(),
        }
    })?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(RenderError::InvalidShaderBinary {
            reason: format!("bad magic number {:#010x}", other),
        }),
        None => Err(RenderError::InvalidShaderBinary {
            reason: "empty binary".into(),
        }),
    }
}

/// Read and validate a compiled shader
pub fn load_spirv(path: impl AsRef<Path>) -> RenderResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let words = spirv_words(&bytes)?;
    log::debug!("Loaded shader {:?} ({} words)", path, words.len());
    Ok(words)
}

/// Shader module that is destroyed when dropped
pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    device: ash::Device,
}

impl ShaderModule {
    pub fn new(device: &ash::Device, stage: &'static str, code: &[u32]) -> RenderResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let handle = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|result| RenderError::ShaderModule { stage, result })?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}
