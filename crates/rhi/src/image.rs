//! 2D images, layout transitions and buffer-to-image copies.
//!
//! [`Image`] owns a VkImage, its memory and a view over the whole image. It
//! backs textures and the per-swapchain-image color and depth attachments.
//!
//! Layout transitions only know the barriers the renderer needs; any other
//! pair is rejected by [`layout_transition_masks`] instead of falling back to
//! a catch-all barrier.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use tracing::debug;

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Parameters for [`Image::new`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
    /// Aspect the view covers.
    pub aspect: vk::ImageAspectFlags,
    pub name: &'static str,
}

impl ImageDesc {
    /// Optimal-tiling device-local image.
    pub fn device_local(
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &'static str,
    ) -> Self {
        Self {
            width,
            height,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect,
            name,
        }
    }
}

/// A 2D image with one mip level, one layer and a view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
    name: &'static str,
}

impl Image {
    /// Creates the image, binds memory matching `desc.memory` and creates a
    /// view over `desc.aspect`.
    ///
    /// # Errors
    ///
    /// Fails on zero dimensions, when no memory type matches, or when any
    /// creation call fails. Partially created objects are released.
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidSize(format!(
                "{} image dimensions must be greater than 0",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = match memory::allocate(
            &device,
            desc.name,
            requirements,
            desc.memory,
            memory::location_for_properties(desc.memory),
            desc.tiling == vk::ImageTiling::LINEAR,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on Drop releases whatever exists.
        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            aspect: desc.aspect,
            name: desc.name,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device.handle().bind_image_memory(
                    this.image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(this.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(subresource_range(desc.aspect));

        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {} image: {}x{} ({:?})",
            desc.name, desc.width, desc.height, desc.format
        );

        Ok(this)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
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
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            memory::release(&self.device, allocation, self.name);
        }
        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
        debug!("Destroyed {} image", self.name);
    }
}

/// Whole-image subresource range for `aspect`.
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Access and stage masks for one layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Minimal barrier masks for a supported transition.
///
/// # Errors
///
/// Returns [`RhiError::UnsupportedLayoutTransition`] for any pair other than
/// `UNDEFINED → TRANSFER_DST_OPTIMAL` and
/// `TRANSFER_DST_OPTIMAL → SHADER_READ_ONLY_OPTIMAL`.
pub fn layout_transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(RhiError::UnsupportedLayoutTransition { old, new }),
    }
}

/// Records a layout transition barrier for the whole image.
pub fn transition_image_layout(
    cmd: &CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<()> {
    let masks = layout_transition_masks(old, new)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect))
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    cmd.pipeline_barrier(masks.src_stage, masks.dst_stage, &[barrier]);
    Ok(())
}

/// Records a copy of tightly packed pixels from `buffer` into `image`,
/// which must be in `TRANSFER_DST_OPTIMAL`.
pub fn copy_buffer_to_image(
    cmd: &CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) {
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width,
            height,
            depth: 1,
        },
    };

    cmd.copy_buffer_to_image(buffer, image, &[region]);
}

/// First candidate whose optimal-tiling features contain `features`.
pub fn find_supported_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    features: vk::FormatFeatureFlags,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props =
                unsafe { instance.get_physical_device_format_properties(physical_device, format) };
            props.optimal_tiling_features.contains(features)
        })
        .ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "None of {:?} supports {:?}",
                candidates, features
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let masks = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_sampling_transition_masks() {
        let masks = layout_transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_unknown_transition_rejected() {
        let pairs = [
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
        ];
        for (old, new) in pairs {
            let err = layout_transition_masks(old, new).unwrap_err();
            assert!(matches!(
                err,
                RhiError::UnsupportedLayoutTransition { old: o, new: n } if o == old && n == new
            ));
        }
    }

    #[test]
    fn test_subresource_range_covers_single_level() {
        let range = subresource_range(vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }
}
