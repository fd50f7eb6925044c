//! Swapchain management.
//!
//! Creation, image acquisition, presentation and re-creation on resize.
//! The selection helpers ([`choose_surface_format`], [`choose_present_mode`],
//! [`choose_extent`], [`determine_image_count`]) are pure so the policy can
//! be tested without a surface.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::instance::Instance;
//! use renderer_rhi::swapchain::Swapchain;
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR, semaphore: vk::Semaphore) -> Result<(), renderer_rhi::RhiError> {
//! let mut swapchain = Swapchain::new(instance, device.clone(), surface, 800, 600)?;
//! let (image_index, suboptimal) = swapchain.acquire_next_image(semaphore)?;
//! // ... record and submit ...
//! let suboptimal = swapchain.present(device.present_queue(), image_index, semaphore)?;
//! swapchain.recreate(instance, surface, 1024, 768)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::subresource_range;
use crate::instance::Instance;

/// Surface formats in order of preference, all paired with SRGB_NONLINEAR.
pub const PREFERRED_SURFACE_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
];

/// What a surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan swapchain wrapper owning the image views.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let mut swapchain = Self {
            device,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
        };
        swapchain.create(instance, surface, width, height)?;
        Ok(swapchain)
    }

    /// Builds a swapchain, passing the current handle (if any) as
    /// `old_swapchain`, then retires the old handle and views.
    fn create(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let support =
            SwapchainSupportDetails::query(self.device.physical_device(), surface, &surface_loader)?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let queue_families = self.device.queue_families();
        let (graphics_family, present_family) =
            match (queue_families.graphics_family, queue_families.present_family) {
                (Some(g), Some(p)) => (g, p),
                _ => {
                    return Err(RhiError::SwapchainError(
                        "Device has no presentation queue family".to_string(),
                    ));
                }
            };
        let family_indices = [graphics_family, present_family];

        let (sharing_mode, family_indices) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
        }
        self.swapchain = swapchain;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, self.format)?;

        info!("Swapchain created with {} images", self.images.len());
        Ok(())
    }

    /// Re-creates the swapchain for a new window size.
    ///
    /// Waits for the device to go idle first. Everything that references the
    /// old images (framebuffers, recorded command buffers) must be rebuilt by
    /// the caller.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;
        info!("Recreating swapchain for new size: {}x{}", width, height);
        self.create(instance, surface, width, height)
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Returns `(image_index, suboptimal)`. `ERROR_OUT_OF_DATE_KHR` is passed
    /// through untouched so callers can match on it.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// Returns true when the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();

        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Picks the surface format.
///
/// A single `UNDEFINED` entry means the surface has no preference, so
/// R8G8B8A8_UNORM/SRGB_NONLINEAR is used. Otherwise the first entry of
/// [`PREFERRED_SURFACE_FORMATS`] available with SRGB_NONLINEAR wins,
/// independent of the order the driver lists them in. Failing that, the
/// first listed format.
///
/// `formats` must not be empty.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let [only] = formats
        && only.format == vk::Format::UNDEFINED
    {
        return vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
    }

    for preferred in PREFERRED_SURFACE_FORMATS {
        if let Some(&found) = formats.iter().find(|f| {
            f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            debug!("Selected surface format {:?}", found.format);
            return found;
        }
    }

    let first = formats.first().copied().unwrap_or_default();
    warn!("Using first available surface format: {:?}", first.format);
    first
}

/// MAILBOX, then FIFO, then whatever the driver lists first.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .or_else(|| present_modes.first().copied())
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Current surface extent, or the window size clamped to the surface
/// limits when the surface leaves it to the swapchain (`u32::MAX`).
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

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

/// One more than the minimum, clamped to the maximum (0 = no maximum).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                for view in image_views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::SwapchainError(format!(
                    "Failed to create image view {}: {:?}",
                    i, e
                )));
            }
        }
    }

    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_surface_format_undefined_means_free_choice() {
        let selected = choose_surface_format(&[srgb(vk::Format::UNDEFINED)]);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_surface_format_independent_of_order() {
        let mut formats = vec![
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_UNORM),
            srgb(vk::Format::R8G8B8A8_SRGB),
            srgb(vk::Format::B8G8R8A8_SRGB),
        ];
        for _ in 0..formats.len() {
            formats.rotate_left(1);
            assert_eq!(
                choose_surface_format(&formats).format,
                vk::Format::B8G8R8A8_SRGB
            );
        }

        let mut formats = vec![
            srgb(vk::Format::B8G8R8A8_UNORM),
            srgb(vk::Format::R8G8B8A8_SRGB),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_SRGB
        );
        formats.reverse();
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn test_surface_format_ignores_other_color_spaces() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            },
            srgb(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [
            srgb(vk::Format::A2B10G10R10_UNORM_PACK32),
            srgb(vk::Format::R16G16B16A16_SFLOAT),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
    }

    #[test]
    fn test_present_mode_table() {
        use vk::PresentModeKHR as P;
        let cases: [(&[P], P); 5] = [
            (&[P::FIFO, P::MAILBOX, P::IMMEDIATE], P::MAILBOX),
            (&[P::MAILBOX], P::MAILBOX),
            (&[P::IMMEDIATE, P::FIFO], P::FIFO),
            (&[P::IMMEDIATE, P::FIFO_RELAXED], P::IMMEDIATE),
            (&[P::FIFO_RELAXED], P::FIFO_RELAXED),
        ];
        for (modes, expected) in cases {
            assert_eq!(choose_present_mode(modes), expected, "modes {:?}", modes);
        }
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let count = |min, max| {
            determine_image_count(&vk::SurfaceCapabilitiesKHR {
                min_image_count: min,
                max_image_count: max,
                ..Default::default()
            })
        };
        assert_eq!(count(2, 2), 2);
        assert_eq!(count(2, 8), 3);
        assert_eq!(count(2, 0), 3);
        assert_eq!(count(1, 0), 2);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let details = |formats: Vec<vk::SurfaceFormatKHR>, modes: Vec<vk::PresentModeKHR>| {
            SwapchainSupportDetails {
                capabilities: vk::SurfaceCapabilitiesKHR::default(),
                formats,
                present_modes: modes,
            }
        };
        let format = srgb(vk::Format::B8G8R8A8_SRGB);
        assert!(details(vec![format], vec![vk::PresentModeKHR::FIFO]).is_adequate());
        assert!(!details(vec![], vec![vk::PresentModeKHR::FIFO]).is_adequate());
        assert!(!details(vec![format], vec![]).is_adequate());
    }
}
