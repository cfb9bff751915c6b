//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use std::sync::Arc;

/// Required instance extensions for presenting to a window.
pub fn required_instance_extensions() -> Vec<&'static CStr> {
    let extensions = vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ];

    extensions
}

/// Validation layers to enable when validation is requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Loaded Vulkan instance plus the surface loader every consumer needs.
///
/// The device context and presentation surface both hold an `Arc` to this;
/// the instance is destroyed when the last of them is dropped.
pub struct InstanceContext {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    enabled_layers: Vec<&'static CStr>,
    validation_enabled: bool,
}

impl InstanceContext {
    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Whether validation was requested for this instance.
    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }

    /// Validation layers actually enabled on the instance.
    ///
    /// Empty when validation is disabled or no layer was available.
    pub fn enabled_layers(&self) -> &[&'static CStr] {
        &self.enabled_layers
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating an instance context.
pub struct InstanceContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for InstanceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Kiln".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl InstanceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Load Vulkan and create the instance.
    pub fn build(self) -> Result<Arc<InstanceContext>> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let enabled_layers = if self.enable_validation {
            unsafe { available_validation_layers(&entry) }?
        } else {
            Vec::new()
        };

        let instance = unsafe { create_instance(&entry, &self.app_name, &enabled_layers) }?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        tracing::info!(
            app = %self.app_name,
            validation = self.enable_validation,
            layers = enabled_layers.len(),
            "Vulkan instance created"
        );

        Ok(Arc::new(InstanceContext {
            entry,
            instance,
            surface_loader,
            enabled_layers,
            validation_enabled: self.enable_validation,
        }))
    }
}

/// Filter the validation layers down to those the loader reports.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn available_validation_layers(entry: &ash::Entry) -> Result<Vec<&'static CStr>> {
    let available = entry.enumerate_instance_layer_properties()?;

    let layers = validation_layers()
        .into_iter()
        .filter(|layer| {
            let found = available
                .iter()
                .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
            if !found {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect();

    Ok(layers)
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    layers: &[&'static CStr],
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name.replace('\0', "")).unwrap_or_default();

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Kiln")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    let extension_names: Vec<*const std::ffi::c_char> = required_instance_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();
    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_extension_always_required() {
        assert!(required_instance_extensions().contains(&ash::khr::surface::NAME));
    }

    #[test]
    fn builder_defaults_follow_build_profile() {
        let builder = InstanceContextBuilder::new();
        assert_eq!(builder.enable_validation, cfg!(debug_assertions));
        assert_eq!(builder.app_name, "Kiln");

        let builder = builder.app_name("viewer").validation(false);
        assert!(!builder.enable_validation);
        assert_eq!(builder.app_name, "viewer");
    }
}
