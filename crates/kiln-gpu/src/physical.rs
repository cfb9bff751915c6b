//! Physical device enumeration.

use crate::error::{GpuError, Result};
use crate::instance::InstanceContext;
use crate::surface::{PresentationSurface, SurfaceCapabilitySnapshot};
use ash::vk;
use std::collections::HashSet;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Capabilities of one queue family relevant to selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Operations supported by queues in this family.
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the target surface.
    pub supports_present: bool,
}

/// A physical device together with everything selection needs to know about it.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub vendor: GpuVendor,
    pub features: vk::PhysicalDeviceFeatures,
    pub color_sample_counts: vk::SampleCountFlags,
    pub depth_sample_counts: vk::SampleCountFlags,
    /// Queue families in index order.
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: HashSet<String>,
    /// Empty when the surface could not be queried for this device.
    pub surface: SurfaceCapabilitySnapshot,
}

impl PhysicalDeviceCandidate {
    /// Query a physical device against the target surface.
    ///
    /// Failed per-device queries are logged and leave the matching field
    /// empty, so the device is rejected during selection instead of ending
    /// enumeration.
    ///
    /// # Safety
    /// The physical device must come from `instance`.
    pub unsafe fn query(
        instance: &InstanceContext,
        surface: &PresentationSurface,
        handle: vk::PhysicalDevice,
    ) -> Self {
        let raw = instance.instance();
        let properties = raw.get_physical_device_properties(handle);
        let features = raw.get_physical_device_features(handle);

        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let queue_families = raw
            .get_physical_device_queue_family_properties(handle)
            .iter()
            .enumerate()
            .map(|(index, family)| QueueFamilyInfo {
                flags: family.queue_flags,
                supports_present: surface
                    .supports_present(handle, index as u32)
                    .unwrap_or_else(|e| {
                        tracing::warn!(
                            "Present support query failed for {name} family {index}: {e}"
                        );
                        false
                    }),
            })
            .collect();

        let extensions = match raw.enumerate_device_extension_properties(handle) {
            Ok(properties) => properties
                .iter()
                .filter_map(|ext| {
                    ext.extension_name_as_c_str()
                        .ok()
                        .and_then(|name| name.to_str().ok())
                        .map(String::from)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Extension query failed for {name}: {e}");
                HashSet::new()
            }
        };

        let surface = surface.snapshot(handle).unwrap_or_else(|e| {
            tracing::warn!("Surface query failed for {name}: {e}");
            SurfaceCapabilitySnapshot::default()
        });

        Self {
            handle,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            name,
            features,
            color_sample_counts: properties.limits.framebuffer_color_sample_counts,
            depth_sample_counts: properties.limits.framebuffer_depth_sample_counts,
            queue_families,
            extensions,
            surface,
        }
    }

    /// Get a human-readable summary of the device.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - {} queue families, {} extensions",
            self.name,
            self.vendor,
            self.queue_families.len(),
            self.extensions.len(),
        )
    }
}

/// List the physical devices of an instance, in enumeration order.
///
/// # Safety
/// The surface must belong to `instance`.
pub unsafe fn enumerate_candidates(
    instance: &InstanceContext,
    surface: &PresentationSurface,
) -> Result<Vec<PhysicalDeviceCandidate>> {
    let devices = instance.instance().enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(GpuError::NoDeviceFound);
    }

    tracing::debug!("Found {} physical device(s)", devices.len());

    Ok(devices
        .into_iter()
        .map(|device| PhysicalDeviceCandidate::query(instance, surface, device))
        .collect())
}
