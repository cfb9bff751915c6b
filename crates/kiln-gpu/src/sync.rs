//! Synchronization primitives.

use ash::prelude::VkResult;
use ash::vk;

/// Fence wait timeout. Waits are effectively unbounded; a hung submission
/// blocks the caller.
pub const FENCE_TIMEOUT_NS: u64 = u64::MAX;

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(
    device: &ash::Device,
    flags: vk::FenceCreateFlags,
) -> VkResult<vk::Fence> {
    let create_info = vk::FenceCreateInfo::default().flags(flags);
    device.create_fence(&create_info, None)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> VkResult<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid, and the fence must not be pending.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> VkResult<()> {
    device.reset_fences(&[fence])
}
