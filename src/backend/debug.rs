// Validation layer + debug messenger capability
//
// The messenger is optional: when validation is disabled, the layer is not
// installed, or VK_EXT_debug_utils is missing, `DebugMessenger` is simply
// inactive and every operation on it is a no-op.

use ash::{vk, Entry};
use std::ffi::CStr;

use super::RenderResult;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Which debug facilities the loader actually offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugSupport {
    pub validation_layer: bool,
    pub debug_utils: bool,
}

impl DebugSupport {
    /// Probe the loader for the validation layer and the debug utils extension
    pub fn probe(entry: &Entry) -> RenderResult<Self> {
        let layers = entry.enumerate_instance_layer_properties()?;
        let layer_names: Vec<&CStr> = layers
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();

        let extensions = entry.enumerate_instance_extension_properties(None)?;
        let extension_names: Vec<&CStr> = extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        for name in &extension_names {
            log::debug!("Instance extension available: {}", name.to_string_lossy());
        }

        Ok(Self {
            validation_layer: layer_names.contains(&VALIDATION_LAYER),
            debug_utils: extension_names.contains(&ash::extensions::ext::DebugUtils::name()),
        })
    }

    /// Decide whether validation can be turned on given what was requested
    pub fn resolve(self, requested: bool) -> bool {
        if !requested {
            return false;
        }
        if !self.validation_layer {
            log::warn!(
                "{} requested but not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
            return false;
        }
        if !self.debug_utils {
            log::warn!("VK_EXT_debug_utils unavailable, continuing without validation");
            return false;
        }
        true
    }
}

/// Names from `required` that are absent from `available`
pub fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.iter().any(|candidate| candidate == name))
        .collect()
}

/// Debug messenger that may or may not exist
pub struct DebugMessenger {
    inner: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl DebugMessenger {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(entry: &Entry, instance: &ash::Instance) -> RenderResult<Self> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);
        let create_info = messenger_create_info();

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        log::info!("Validation layers enabled");
        Ok(Self {
            inner: Some((debug_utils, messenger)),
        })
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Destroy the messenger. Must run before the instance is destroyed.
    pub fn destroy(&mut self) {
        if let Some((debug_utils, messenger)) = self.inner.take() {
            unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) };
        }
    }
}

/// Shared by the messenger and instance creation (to cover vkCreateInstance)
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
