//! Memory type lookup.

use crate::error::{GpuError, Result};
use ash::vk;

/// Find the first memory type allowed by `type_filter` that has all of `properties`.
///
/// `type_filter` is the `memory_type_bits` mask from a resource's memory
/// requirements: bit `i` set means memory type `i` is acceptable.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_filter & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
        .ok_or(GpuError::NoSuitableMemoryType {
            type_filter,
            properties,
        })
}
