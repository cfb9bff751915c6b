//! Physical device suitability and first-fit selection.
//!
//! Candidates are checked in enumeration order and the first one passing
//! every check wins. There is no ranking between suitable devices.

use crate::capabilities::CapabilityCache;
use crate::error::{GpuError, Result};
use crate::physical::{PhysicalDeviceCandidate, QueueFamilyInfo};
use crate::surface::FramebufferSize;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::fmt;

/// What a device must offer to be selected, and what gets enabled on it.
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    extensions: Vec<&'static CStr>,
    sampler_anisotropy: bool,
    shader_float64: bool,
    sample_rate_shading: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            extensions: vec![ash::khr::swapchain::NAME],
            sampler_anisotropy: true,
            // Excludes most integrated GPUs; kept on to match existing shaders.
            shader_float64: true,
            sample_rate_shading: true,
        }
    }
}

impl DeviceRequirements {
    /// Create the default requirement set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an additional device extension.
    pub fn with_extension(mut self, name: &'static CStr) -> Self {
        if !self.extensions.contains(&name) {
            self.extensions.push(name);
        }
        self
    }

    /// Require anisotropic sampling.
    pub fn with_sampler_anisotropy(mut self, required: bool) -> Self {
        self.sampler_anisotropy = required;
        self
    }

    /// Require double-precision shader arithmetic.
    pub fn with_shader_float64(mut self, required: bool) -> Self {
        self.shader_float64 = required;
        self
    }

    /// Enable sample-rate shading on the logical device.
    pub fn with_sample_rate_shading(mut self, enabled: bool) -> Self {
        self.sample_rate_shading = enabled;
        self
    }

    /// Device extensions that must be present and get enabled.
    pub fn extensions(&self) -> &[&'static CStr] {
        &self.extensions
    }

    /// Features to enable on the logical device.
    pub fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(self.sampler_anisotropy)
            .sample_rate_shading(self.sample_rate_shading)
    }
}

/// Queue family roles as found while scanning a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    /// First family supporting both graphics and compute.
    pub graphics_compute: Option<u32>,
    /// First family able to present to the target surface.
    pub present: Option<u32>,
}

impl QueueFamilyAssignment {
    /// Scan families in index order, recording the first match for each role.
    pub fn scan(families: &[QueueFamilyInfo]) -> Self {
        let mut assignment = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if assignment.graphics_compute.is_none()
                && family
                    .flags
                    .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            {
                assignment.graphics_compute = Some(index);
            }

            if assignment.present.is_none() && family.supports_present {
                assignment.present = Some(index);
            }

            if assignment.resolve().is_some() {
                break;
            }
        }

        assignment
    }

    /// Both roles, once each has a family.
    pub fn resolve(&self) -> Option<ResolvedQueueFamilies> {
        Some(ResolvedQueueFamilies {
            graphics_compute: self.graphics_compute?,
            present: self.present?,
        })
    }
}

/// Queue family indices with every role filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQueueFamilies {
    pub graphics_compute: u32,
    pub present: u32,
}

impl ResolvedQueueFamilies {
    /// Distinct family indices, ascending. One entry when a family fills both roles.
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics_compute, self.present])
            .into_iter()
            .collect()
    }
}

/// Why a candidate was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No graphics+compute family, no present family, or neither.
    QueueFamilies(QueueFamilyAssignment),
    /// Required extensions the device does not expose.
    MissingExtensions(Vec<String>),
    /// No surface formats or no present modes.
    InadequateSurface,
    SamplerAnisotropy,
    ShaderFloat64,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFamilies(found) => write!(
                f,
                "queue families unresolved (graphics+compute: {:?}, present: {:?})",
                found.graphics_compute, found.present
            ),
            Self::MissingExtensions(names) => {
                write!(f, "missing extensions: {}", names.join(", "))
            }
            Self::InadequateSurface => f.write_str("surface has no formats or present modes"),
            Self::SamplerAnisotropy => f.write_str("no anisotropic sampling"),
            Self::ShaderFloat64 => f.write_str("no double-precision shader support"),
        }
    }
}

/// Required extensions absent from the candidate, in requirement order.
pub fn missing_extensions(
    candidate: &PhysicalDeviceCandidate,
    required: &[&'static CStr],
) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !candidate.extensions.contains(name))
        .collect()
}

/// Run every suitability check on one candidate.
pub fn evaluate(
    candidate: &PhysicalDeviceCandidate,
    requirements: &DeviceRequirements,
) -> std::result::Result<ResolvedQueueFamilies, Rejection> {
    let assignment = QueueFamilyAssignment::scan(&candidate.queue_families);
    let families = assignment
        .resolve()
        .ok_or(Rejection::QueueFamilies(assignment))?;

    let missing = missing_extensions(candidate, &requirements.extensions);
    if !missing.is_empty() {
        return Err(Rejection::MissingExtensions(missing));
    }

    if !candidate.surface.is_adequate() {
        return Err(Rejection::InadequateSurface);
    }

    if requirements.sampler_anisotropy && candidate.features.sampler_anisotropy != vk::TRUE {
        return Err(Rejection::SamplerAnisotropy);
    }

    if requirements.shader_float64 && candidate.features.shader_float64 != vk::TRUE {
        return Err(Rejection::ShaderFloat64);
    }

    Ok(families)
}

/// The winning candidate with its resolved families and cached capabilities.
#[derive(Debug, Clone)]
pub struct SelectedCandidate {
    pub candidate: PhysicalDeviceCandidate,
    pub queue_families: ResolvedQueueFamilies,
    pub capabilities: CapabilityCache,
}

/// Pick the first suitable candidate in enumeration order.
pub fn select_device(
    candidates: Vec<PhysicalDeviceCandidate>,
    requirements: &DeviceRequirements,
    window: &dyn FramebufferSize,
) -> Result<SelectedCandidate> {
    if candidates.is_empty() {
        return Err(GpuError::NoDeviceFound);
    }

    for candidate in candidates {
        match evaluate(&candidate, requirements) {
            Ok(queue_families) => {
                let capabilities = CapabilityCache::resolve(&candidate, window);
                tracing::info!(
                    "Selected GPU: {} ({:?} MSAA, {}x{} swap extent)",
                    candidate.summary(),
                    capabilities.msaa_samples,
                    capabilities.swap_extent.width,
                    capabilities.swap_extent.height,
                );
                return Ok(SelectedCandidate {
                    candidate,
                    queue_families,
                    capabilities,
                });
            }
            Err(reason) => {
                tracing::debug!("Skipping GPU {}: {reason}", candidate.name);
            }
        }
    }

    Err(GpuError::NoSuitableDevice)
}
