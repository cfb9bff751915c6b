//! Presentation surface and the window-side collaborator.
//!
//! The surface is created from any window exposing raw handles, before a
//! device is selected, because presentation support is part of selecting one.

use crate::error::{GpuError, Result};
use crate::instance::InstanceContext;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Source of the live framebuffer size, in pixels.
///
/// Queried only when the surface leaves the swap extent up to the
/// application.
pub trait FramebufferSize {
    /// Current framebuffer width and height in pixels.
    fn framebuffer_size(&self) -> (u32, u32);
}

impl FramebufferSize for vk::Extent2D {
    fn framebuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// A Vulkan surface bound to a window.
pub struct PresentationSurface {
    instance: Arc<InstanceContext>,
    surface: vk::SurfaceKHR,
}

impl PresentationSurface {
    /// Create a surface for a window.
    ///
    /// # Safety
    /// The window must outlive the returned surface.
    pub unsafe fn from_window<W>(instance: Arc<InstanceContext>, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            instance.entry(),
            instance.instance(),
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        Ok(Self { instance, surface })
    }

    /// Get the raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether a queue family of `physical_device` can present to this surface.
    ///
    /// # Safety
    /// The physical device must come from the same instance.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let supported = self
            .instance
            .surface_loader()
            .get_physical_device_surface_support(physical_device, queue_family, self.surface)?;
        Ok(supported)
    }

    /// Query capabilities, formats and present modes for a physical device.
    ///
    /// # Safety
    /// The physical device must come from the same instance.
    pub unsafe fn snapshot(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceCapabilitySnapshot> {
        let loader = self.instance.surface_loader();

        let capabilities =
            loader.get_physical_device_surface_capabilities(physical_device, self.surface)?;
        let formats = loader.get_physical_device_surface_formats(physical_device, self.surface)?;
        let present_modes =
            loader.get_physical_device_surface_present_modes(physical_device, self.surface)?;

        Ok(SurfaceCapabilitySnapshot {
            capabilities,
            formats,
            present_modes,
        })
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe {
            self.instance
                .surface_loader()
                .destroy_surface(self.surface, None);
        }
    }
}

/// Surface capabilities of one physical device, as reported at query time.
#[derive(Debug, Clone, Default)]
pub struct SurfaceCapabilitySnapshot {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats, in driver order.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes, in driver order.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilitySnapshot {
    /// A surface is adequate when at least one format and one present mode exist.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}
