//! GPU context management.

use crate::capabilities::CapabilityCache;
use crate::command::CommandSession;
use crate::error::{GpuError, Result};
use crate::instance::InstanceContext;
use crate::memory::find_memory_type;
use crate::physical::enumerate_candidates;
use crate::selection::{select_device, DeviceRequirements, ResolvedQueueFamilies};
use crate::surface::{FramebufferSize, PresentationSurface, SurfaceCapabilitySnapshot};
use ash::vk;
use std::ffi::c_char;
use std::sync::Arc;

/// The selected device and everything resolved for it.
///
/// Built once at startup and shared as `Arc<DeviceContext>`; nothing in it
/// changes afterwards. Dropping the last reference destroys the logical
/// device. The physical device is only referenced.
pub struct DeviceContext {
    instance: Arc<InstanceContext>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    device_name: String,
    queue_families: ResolvedQueueFamilies,
    graphics_queue: vk::Queue,
    // Shares the graphics queue; no separate compute family is requested.
    compute_queue: vk::Queue,
    present_queue: vk::Queue,
    capabilities: CapabilityCache,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the instance context this device was created from.
    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    /// Name reported by the driver.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the compute queue.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the presentation queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the resolved queue family indices.
    pub fn queue_families(&self) -> ResolvedQueueFamilies {
        self.queue_families
    }

    /// Get the graphics (and compute) queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.queue_families.graphics_compute
    }

    /// Get the presentation queue family index.
    pub fn present_queue_family(&self) -> u32 {
        self.queue_families.present
    }

    /// Multisample count for color and depth attachments.
    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.capabilities.msaa_samples
    }

    /// Swap extent resolved at selection time.
    pub fn swap_extent(&self) -> vk::Extent2D {
        self.capabilities.swap_extent
    }

    /// Surface capabilities, formats and present modes of the selected device.
    pub fn surface_capabilities(&self) -> &SurfaceCapabilitySnapshot {
        &self.capabilities.surface
    }

    /// Index of the first memory type allowed by `type_filter` with `properties`.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_filter, properties)
    }

    /// Create a command session on the graphics queue.
    pub fn create_command_session(
        self: &Arc<Self>,
        buffer_count: u32,
        fence_flags: vk::FenceCreateFlags,
    ) -> Result<CommandSession> {
        CommandSession::new(
            Arc::clone(self),
            self.graphics_queue_family(),
            self.graphics_queue,
            buffer_count,
            fence_flags,
        )
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        tracing::debug!("Logical device destroyed");
    }
}

/// Builder for selecting a device and creating its context.
pub struct DeviceContextBuilder {
    instance: Arc<InstanceContext>,
    requirements: DeviceRequirements,
}

impl DeviceContextBuilder {
    /// Create a new builder on top of an instance.
    pub fn new(instance: Arc<InstanceContext>) -> Self {
        Self {
            instance,
            requirements: DeviceRequirements::default(),
        }
    }

    /// Replace the device requirements.
    pub fn requirements(mut self, requirements: DeviceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Select a device for `surface` and create the logical device.
    ///
    /// `window` is consulted for the framebuffer size when the surface does
    /// not dictate the swap extent.
    pub fn build(
        self,
        surface: &PresentationSurface,
        window: &dyn FramebufferSize,
    ) -> Result<Arc<DeviceContext>> {
        let candidates = unsafe { enumerate_candidates(&self.instance, surface) }?;
        let selected = select_device(candidates, &self.requirements, window)?;

        let physical_device = selected.candidate.handle;
        let queue_families = selected.queue_families;

        let device = unsafe {
            create_device(
                &self.instance,
                physical_device,
                &queue_families,
                &self.requirements,
            )
        }?;

        let (graphics_queue, compute_queue, present_queue) = unsafe {
            (
                device.get_device_queue(queue_families.graphics_compute, 0),
                device.get_device_queue(queue_families.graphics_compute, 0),
                device.get_device_queue(queue_families.present, 0),
            )
        };

        let memory_properties = unsafe {
            self.instance
                .instance()
                .get_physical_device_memory_properties(physical_device)
        };

        tracing::info!(
            graphics_family = queue_families.graphics_compute,
            present_family = queue_families.present,
            "Logical device created on {}",
            selected.candidate.name
        );

        Ok(Arc::new(DeviceContext {
            instance: self.instance,
            physical_device,
            device,
            device_name: selected.candidate.name,
            queue_families,
            graphics_queue,
            compute_queue,
            present_queue,
            capabilities: selected.capabilities,
            memory_properties,
        }))
    }
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The physical device must come from `instance`.
unsafe fn create_device(
    instance: &InstanceContext,
    physical_device: vk::PhysicalDevice,
    queue_families: &ResolvedQueueFamilies,
    requirements: &DeviceRequirements,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = requirements
        .extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    // Device layers are ignored by current loaders but still set for older ones
    let layer_names: Vec<*const c_char> = if instance.validation_enabled() {
        instance.enabled_layers().iter().map(|l| l.as_ptr()).collect()
    } else {
        Vec::new()
    };

    let features = requirements.enabled_features();

    #[allow(deprecated)]
    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .enabled_features(&features);

    instance
        .instance()
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::DeviceCreationFailed)
}
