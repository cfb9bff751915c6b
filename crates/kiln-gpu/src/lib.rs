//! Vulkan device selection and command submission for Kiln.
//!
//! This crate provides:
//! - Instance creation and presentation surfaces
//! - Physical device enumeration and first-fit suitability selection
//! - Capability caching (multisample count, swap extent, surface support)
//! - Logical device and queue creation
//! - Memory type lookup
//! - Fence-synchronized command recording sessions

pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod instance;
pub mod memory;
pub mod physical;
pub mod selection;
pub mod surface;
pub mod sync;

pub use capabilities::CapabilityCache;
pub use command::{CommandDevice, CommandSession};
pub use context::{DeviceContext, DeviceContextBuilder};
pub use error::{GpuError, Result};
pub use instance::{InstanceContext, InstanceContextBuilder};
pub use physical::{GpuVendor, PhysicalDeviceCandidate, QueueFamilyInfo};
pub use selection::{DeviceRequirements, QueueFamilyAssignment, ResolvedQueueFamilies};
pub use surface::{FramebufferSize, PresentationSurface, SurfaceCapabilitySnapshot};
