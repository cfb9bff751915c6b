//! Capabilities cached for the selected device.

use crate::physical::PhysicalDeviceCandidate;
use crate::surface::{FramebufferSize, SurfaceCapabilitySnapshot};
use ash::vk;

/// Sentinel width meaning the surface size is decided by the swap extent.
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

/// Values resolved once for the winning device.
#[derive(Debug, Clone)]
pub struct CapabilityCache {
    /// Highest sample count usable for both color and depth attachments.
    pub msaa_samples: vk::SampleCountFlags,
    /// Pixel size of the presentable surface.
    pub swap_extent: vk::Extent2D,
    /// Surface capabilities, formats and present modes.
    pub surface: SurfaceCapabilitySnapshot,
}

impl CapabilityCache {
    /// Resolve the cache for a candidate that passed selection.
    pub fn resolve(candidate: &PhysicalDeviceCandidate, window: &dyn FramebufferSize) -> Self {
        let msaa_samples =
            resolve_sample_count(candidate.color_sample_counts & candidate.depth_sample_counts);
        let swap_extent = resolve_swap_extent(&candidate.surface.capabilities, window);

        Self {
            msaa_samples,
            swap_extent,
            surface: candidate.surface.clone(),
        }
    }
}

/// Pick the highest sample count present in `counts`, falling back to 1.
pub fn resolve_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    if counts.contains(vk::SampleCountFlags::TYPE_64) {
        vk::SampleCountFlags::TYPE_64
    } else if counts.contains(vk::SampleCountFlags::TYPE_32) {
        vk::SampleCountFlags::TYPE_32
    } else if counts.contains(vk::SampleCountFlags::TYPE_16) {
        vk::SampleCountFlags::TYPE_16
    } else if counts.contains(vk::SampleCountFlags::TYPE_8) {
        vk::SampleCountFlags::TYPE_8
    } else if counts.contains(vk::SampleCountFlags::TYPE_4) {
        vk::SampleCountFlags::TYPE_4
    } else if counts.contains(vk::SampleCountFlags::TYPE_2) {
        vk::SampleCountFlags::TYPE_2
    } else {
        vk::SampleCountFlags::TYPE_1
    }
}

/// Resolve the swap extent from the surface, asking the window only when needed.
pub fn resolve_swap_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window: &dyn FramebufferSize,
) -> vk::Extent2D {
    if capabilities.current_extent.width != UNDEFINED_EXTENT {
        capabilities.current_extent
    } else {
        let (width, height) = window.framebuffer_size();
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}
