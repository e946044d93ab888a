// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation (window-system extensions, optional validation)
// - Surface creation for the window
// - Physical device negotiation (graphics + present + usable surface)
// - Logical device + queue creation

use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};

use super::debug::{self, DebugMessenger, DebugSupport};
use super::error::log_teardown_failure;
use super::{RenderError, RenderResult};

/// Device extensions every candidate must expose
const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [c"VK_KHR_swapchain"];

/// Graphics and present family indices (may be the same family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Capabilities of a single queue family relevant to presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Everything the negotiator learned about one adapter
#[derive(Debug, Clone)]
pub struct AdapterReport {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilySupport>,
    pub swapchain_extension: bool,
    pub format_count: usize,
    pub present_mode_count: usize,
}

impl AdapterReport {
    /// Queue families to use if this adapter satisfies every requirement
    pub fn suitability(&self) -> Option<QueueFamilyIndices> {
        if !self.swapchain_extension || self.format_count == 0 || self.present_mode_count == 0 {
            return None;
        }
        find_queue_families(&self.queue_families)
    }
}

/// First graphics family; present prefers that same family when it can
/// present, otherwise the first family that can.
pub fn find_queue_families(families: &[QueueFamilySupport]) -> Option<QueueFamilyIndices> {
    let graphics = families.iter().position(|f| f.graphics)? as u32;

    let present = if families[graphics as usize].present {
        graphics
    } else {
        families.iter().position(|f| f.present)? as u32
    };

    Some(QueueFamilyIndices { graphics, present })
}

/// Pick the first suitable adapter
pub fn select_adapter(reports: &[AdapterReport]) -> RenderResult<(usize, QueueFamilyIndices)> {
    reports
        .iter()
        .enumerate()
        .find_map(|(index, report)| report.suitability().map(|families| (index, families)))
        .ok_or(RenderError::NoSuitableDevice)
}

/// Surface properties of the selected adapter, re-queried on every swapchain build
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    debug: DebugMessenger,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanContext {
    /// Create instance, surface and logical device for `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `window` - Window the surface is created for
    /// * `enable_validation` - Request Vulkan validation layers
    pub fn new<W>(app_name: &str, window: &W, enable_validation: bool) -> RenderResult<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Creating Vulkan context: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let validation = DebugSupport::probe(&entry)?.resolve(enable_validation);
        let instance = Self::create_instance(&entry, app_name, window, validation)?;

        // From here on, failures must unwind what was already created
        let mut debug = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => messenger,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            DebugMessenger::disabled()
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        } {
            Ok(surface) => surface,
            Err(e) => {
                debug.destroy();
                unsafe { instance.destroy_instance(None) };
                return Err(e.into());
            }
        };

        let setup = Self::pick_physical_device(&instance, &surface_loader, surface).and_then(
            |(physical_device, families)| {
                Self::create_logical_device(&instance, physical_device, families, validation)
                    .map(|device| (physical_device, families, device))
            },
        );

        let (physical_device, queue_families, device) = match setup {
            Ok(found) => found,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                debug.destroy();
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {} ({:?})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            properties.device_type
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        Ok(Self {
            device,
            physical_device,
            surface,
            surface_loader,
            debug,
            instance,
            _entry: entry,
            queue_families,
            graphics_queue,
            present_queue,
            properties,
            memory_properties,
        })
    }

    fn create_instance<W: HasRawDisplayHandle>(
        entry: &Entry,
        app_name: &str,
        window: &W,
        validation: bool,
    ) -> RenderResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_else(|_| CString::from(c"vk-triangle"));

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        // Window-system extensions (VK_KHR_surface + the platform one)
        let mut extensions =
            ash_window::enumerate_required_extensions(window.raw_display_handle())?.to_vec();
        if validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        for &ext in &extensions {
            log::debug!("Instance extension required: {}", unsafe {
                CStr::from_ptr(ext).to_string_lossy()
            });
        }

        let layer_names = if validation {
            vec![debug::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        // Covers messages emitted during vkCreateInstance itself
        let mut debug_info = debug::messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        Ok(instance)
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        log::info!("Found {} GPU(s) with Vulkan support", devices.len());

        let mut reports = Vec::with_capacity(devices.len());
        for &device in &devices {
            let report = Self::inspect_adapter(instance, surface_loader, surface, device)?;
            log::info!(
                "  {} | {:?} | swapchain={} formats={} present_modes={} suitable={}",
                report.name,
                report.device_type,
                report.swapchain_extension,
                report.format_count,
                report.present_mode_count,
                report.suitability().is_some()
            );
            reports.push(report);
        }

        let (index, families) = select_adapter(&reports)?;
        Ok((devices[index], families))
    }

    fn inspect_adapter(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> RenderResult<AdapterReport> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let family_props = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let mut queue_families = Vec::with_capacity(family_props.len());
        for (index, family) in family_props.iter().enumerate() {
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index as u32, surface)
            }?;
            queue_families.push(QueueFamilySupport {
                graphics: family.queue_count > 0
                    && family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present,
            });
        }

        let available = unsafe { instance.enumerate_device_extension_properties(device) }?;
        let available_names: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        let swapchain_extension =
            debug::missing_names(&REQUIRED_DEVICE_EXTENSIONS, &available_names).is_empty();

        // Surface queries are only meaningful once the swapchain extension exists
        let (format_count, present_mode_count) = if swapchain_extension {
            let formats = unsafe {
                surface_loader.get_physical_device_surface_formats(device, surface)
            }?;
            let modes = unsafe {
                surface_loader.get_physical_device_surface_present_modes(device, surface)
            }?;
            (formats.len(), modes.len())
        } else {
            (0, 0)
        };

        Ok(AdapterReport {
            name,
            device_type: props.device_type,
            queue_families,
            swapchain_extension,
            format_count,
            present_mode_count,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilyIndices,
        validation: bool,
    ) -> RenderResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const std::os::raw::c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // Ignored by current loaders, kept for older implementations
        let layer_names = if validation {
            vec![debug::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
        Ok(device)
    }

    /// Current surface capabilities, formats and present modes
    pub fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)?,
            })
        }
    }

    /// Block until no queue has outstanding work
    /// Whether the validation layer and its messenger are actually running
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_active()
    }

    /// Human-readable name of the selected adapter
    pub fn adapter_name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan context...");

        log_teardown_failure("wait for device idle", self.wait_idle());

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        self.debug.destroy();
        unsafe { self.instance.destroy_instance(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(graphics: bool, present: bool) -> QueueFamilySupport {
        QueueFamilySupport { graphics, present }
    }

    fn adapter(name: &str, families: Vec<QueueFamilySupport>) -> AdapterReport {
        AdapterReport {
            name: name.to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_families: families,
            swapchain_extension: true,
            format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn shared_family_is_preferred_for_present() {
        let families = [family(false, true), family(true, true)];
        let indices = find_queue_families(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 1 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn separate_present_family_is_found() {
        let families = [family(true, false), family(false, false), family(false, true)];
        let indices = find_queue_families(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 2 });
        assert_eq!(indices.unique(), vec![0, 2]);
    }

    #[test]
    fn missing_graphics_or_present_is_unsuitable() {
        assert!(find_queue_families(&[family(false, true)]).is_none());
        assert!(find_queue_families(&[family(true, false)]).is_none());
        assert!(find_queue_families(&[]).is_none());
    }

    #[test]
    fn first_suitable_adapter_wins() {
        let mut no_formats = adapter("headless", vec![family(true, true)]);
        no_formats.format_count = 0;
        let reports = vec![
            no_formats,
            adapter("integrated", vec![family(true, true)]),
            adapter("discrete", vec![family(true, true)]),
        ];

        let (index, families) = select_adapter(&reports).unwrap();
        assert_eq!(index, 1);
        assert_eq!(families.graphics, 0);
    }

    #[test]
    fn adapter_without_present_modes_or_swapchain_is_rejected() {
        let mut no_modes = adapter("a", vec![family(true, true)]);
        no_modes.present_mode_count = 0;
        assert!(no_modes.suitability().is_none());

        let mut no_swapchain = adapter("b", vec![family(true, true)]);
        no_swapchain.swapchain_extension = false;
        assert!(no_swapchain.suitability().is_none());
    }

    #[test]
    fn no_suitable_adapter_is_an_error() {
        let reports = vec![adapter("compute-only", vec![family(false, false)])];
        assert!(matches!(
            select_adapter(&reports),
            Err(RenderError::NoSuitableDevice)
        ));
        assert!(matches!(select_adapter(&[]), Err(RenderError::NoSuitableDevice)));
    }
}
