//! Physical device (GPU) selection.
//!
//! Selection enumerates every GPU, scores it with [`rate_device`] and keeps the
//! best positive score. A score of zero disqualifies a device: it lacks a
//! graphics or presentation queue family, the swapchain extension, or any
//! surface format / present mode.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::instance::Instance;
//! use renderer_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new("example", false, None).expect("Failed to create instance");
//! let device_info = select_physical_device(&instance, None)
//!     .expect("Failed to select physical device");
//!
//! println!("Selected GPU: {:?}", device_info.device_name());
//! ```

use std::collections::BTreeSet;
use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// A surface the selected device must be able to present to.
#[derive(Clone, Copy)]
pub struct SurfaceTarget<'a> {
    pub loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

/// Queue family indices for the queues the renderer uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family supporting graphics (and therefore transfer) operations.
    pub graphics_family: Option<u32>,
    /// Family able to present to the target surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both required families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Whether presentation needs a different family from rendering.
    #[inline]
    pub fn is_split(&self) -> bool {
        self.graphics_family != self.present_family
    }

    /// Distinct family indices, one logical-device queue each.
    pub fn unique_families(&self) -> BTreeSet<u32> {
        [self.graphics_family, self.present_family]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Everything [`rate_device`] looks at, gathered from one physical device.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCapabilities {
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: QueueFamilyIndices,
    /// Presentation checks apply only when a surface was supplied.
    pub requires_presentation: bool,
    pub swapchain_extension: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

/// Scores a device. Zero means unusable; among usable devices, discrete GPUs
/// win over integrated, virtual and CPU implementations.
pub fn rate_device(caps: &DeviceCapabilities) -> u32 {
    if caps.queue_families.graphics_family.is_none() {
        return 0;
    }
    if caps.requires_presentation
        && (caps.queue_families.present_family.is_none()
            || !caps.swapchain_extension
            || caps.surface_format_count == 0
            || caps.present_mode_count == 0)
    {
        return 0;
    }

    let mut score = match caps.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        _ => 1,
    };

    // One family for both saves ownership juggling on the swapchain images.
    if !caps.queue_families.is_split() {
        score += 1;
    }

    score
}

/// Returns the candidate with the highest positive score. Ties keep the
/// earliest candidate so selection follows enumeration order.
pub fn pick_best<T>(candidates: impl IntoIterator<Item = (T, u32)>) -> Option<(T, u32)> {
    candidates
        .into_iter()
        .filter(|(_, score)| *score > 0)
        .fold(None, |best, (candidate, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((candidate, score)),
        })
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family indices for rendering and presentation.
    pub queue_families: QueueFamilyIndices,
    /// The device was selected against a surface and needs the swapchain
    /// extension.
    pub presentation: bool,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        device_name(&self.properties)
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Alignment every dynamic uniform buffer offset must respect.
    pub fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> &str {
    // SAFETY: the driver writes a NUL-terminated string into the fixed array.
    unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown Device")
    }
}

/// Selects the most suitable physical device.
///
/// With `surface` set, the device must be able to present to it; without
/// one (headless use) only a graphics queue is required.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if every device scores zero.
pub fn select_physical_device(
    instance: &Instance,
    surface: Option<SurfaceTarget<'_>>,
) -> RhiResult<PhysicalDeviceInfo> {
    let instance = instance.handle();
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut candidates = Vec::with_capacity(devices.len());
    for device in devices {
        let (info, caps) = inspect_device(instance, device, surface)?;
        let score = rate_device(&caps);
        debug!(
            "GPU '{}' ({}) - Score: {}",
            info.device_name(),
            info.device_type_name(),
            score
        );
        candidates.push((info, score));
    }

    let Some((selected, score)) = pick_best(candidates) else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

/// Gathers device info plus the capabilities used for scoring.
fn inspect_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceTarget<'_>>,
) -> RhiResult<(PhysicalDeviceInfo, DeviceCapabilities)> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let queue_families = find_queue_families(instance, device, surface);

    let (swapchain_extension, surface_format_count, present_mode_count) = match surface {
        Some(target) => {
            let extension = supports_swapchain(instance, device)?;
            let formats = unsafe {
                target
                    .loader
                    .get_physical_device_surface_formats(device, target.surface)
                    .unwrap_or_default()
            };
            let modes = unsafe {
                target
                    .loader
                    .get_physical_device_surface_present_modes(device, target.surface)
                    .unwrap_or_default()
            };
            (extension, formats.len(), modes.len())
        }
        None => (false, 0, 0),
    };

    let caps = DeviceCapabilities {
        device_type: properties.device_type,
        queue_families,
        requires_presentation: surface.is_some(),
        swapchain_extension,
        surface_format_count,
        present_mode_count,
    };

    if rate_device(&caps) == 0 {
        debug!(
            "GPU '{}' disqualified: {:?}",
            device_name(&properties),
            caps
        );
    }

    let info = PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
        presentation: surface.is_some(),
    };

    Ok((info, caps))
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> RhiResult<bool> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
    Ok(extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    }))
}

/// Finds the graphics family and a family that can present to `surface`.
///
/// A family supporting both is preferred so the swapchain can stay
/// exclusive. Without a surface the graphics family doubles as present.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceTarget<'_>>,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = match surface {
            Some(target) => unsafe {
                target
                    .loader
                    .get_physical_device_surface_support(device, i, target.surface)
                    .unwrap_or(false)
            },
            None => graphics,
        };

        if graphics && present {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable(device_type: vk::PhysicalDeviceType) -> DeviceCapabilities {
        DeviceCapabilities {
            device_type,
            queue_families: QueueFamilyIndices {
                graphics_family: Some(0),
                present_family: Some(0),
            },
            requires_presentation: true,
            swapchain_extension: true,
            surface_format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_queue_family_indices_incomplete() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_unique_families_deduplicates() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(2),
        };
        assert_eq!(shared.unique_families().into_iter().collect::<Vec<_>>(), vec![2]);
        assert!(!shared.is_split());

        let split = QueueFamilyIndices {
            graphics_family: Some(1),
            present_family: Some(0),
        };
        assert_eq!(split.unique_families().into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(split.is_split());
    }

    #[test]
    fn test_discrete_preferred() {
        let discrete = rate_device(&capable(vk::PhysicalDeviceType::DISCRETE_GPU));
        let integrated = rate_device(&capable(vk::PhysicalDeviceType::INTEGRATED_GPU));
        let cpu = rate_device(&capable(vk::PhysicalDeviceType::CPU));
        assert!(discrete > integrated);
        assert!(integrated > cpu);
        assert!(cpu > 0);
    }

    #[test]
    fn test_disqualifications() {
        let mut caps = capable(vk::PhysicalDeviceType::DISCRETE_GPU);
        caps.swapchain_extension = false;
        assert_eq!(rate_device(&caps), 0);

        let mut caps = capable(vk::PhysicalDeviceType::DISCRETE_GPU);
        caps.queue_families.present_family = None;
        assert_eq!(rate_device(&caps), 0);

        let mut caps = capable(vk::PhysicalDeviceType::DISCRETE_GPU);
        caps.surface_format_count = 0;
        assert_eq!(rate_device(&caps), 0);

        let mut caps = capable(vk::PhysicalDeviceType::DISCRETE_GPU);
        caps.present_mode_count = 0;
        assert_eq!(rate_device(&caps), 0);
    }

    #[test]
    fn test_headless_ignores_presentation() {
        let caps = DeviceCapabilities {
            requires_presentation: false,
            swapchain_extension: false,
            surface_format_count: 0,
            present_mode_count: 0,
            ..capable(vk::PhysicalDeviceType::INTEGRATED_GPU)
        };
        assert!(rate_device(&caps) > 0);
    }

    #[test]
    fn test_pick_best() {
        assert_eq!(pick_best([("a", 0), ("b", 0)]), None);
        assert_eq!(pick_best([("a", 0), ("b", 5), ("c", 3)]), Some(("b", 5)));
        // Ties keep enumeration order.
        assert_eq!(pick_best([("a", 5), ("b", 5)]), Some(("a", 5)));
    }
}
