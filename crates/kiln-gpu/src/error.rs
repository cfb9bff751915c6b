//! GPU error types.

use ash::vk;
use thiserror::Error;

/// Errors raised while bringing up the device context or a command session.
///
/// Every variant is a startup or resource-acquisition failure. Callers are
/// expected to abort initialization rather than continue with a partially
/// built context.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The instance exposes no physical devices at all.
    #[error("Device search failed: no GPU with Vulkan support found")]
    NoDeviceFound,

    /// Devices exist but none passed the suitability checks.
    #[error("Device search failed: no GPU meets the selection requirements")]
    NoSuitableDevice,

    /// Logical device creation failed.
    #[error("Logical device creation failed: {0}")]
    DeviceCreationFailed(vk::Result),

    /// Command pool creation failed.
    #[error("Command pool creation failed: {0}")]
    CommandPoolCreationFailed(vk::Result),

    /// Fence creation failed.
    #[error("Fence creation failed: {0}")]
    FenceCreationFailed(vk::Result),

    /// Command buffer allocation failed.
    #[error("Command buffer allocation failed: {0}")]
    BufferAllocationFailed(vk::Result),

    /// No memory type matches the filter and property flags.
    #[error("Memory type search failed: no type in filter {type_filter:#b} has {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Vulkan loader could not be loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_step() {
        assert!(GpuError::NoDeviceFound.to_string().contains("Device search"));
        assert!(GpuError::NoSuitableDevice
            .to_string()
            .starts_with("Device search failed: no GPU meets"));
        assert!(GpuError::FenceCreationFailed(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
            .to_string()
            .starts_with("Fence creation"));

        let err = GpuError::NoSuitableMemoryType {
            type_filter: 0b0110,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Memory type search"));
        assert!(msg.contains("0b110"));
    }
}
