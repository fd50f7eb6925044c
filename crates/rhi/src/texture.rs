//! Sampled textures uploaded from RGBA8 pixels.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{self, Image, ImageDesc};
use crate::upload::UploadContext;

/// Format of every texture: 8-bit RGBA in sRGB encoding.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// A device-local image in `SHADER_READ_ONLY_OPTIMAL`, ready to sample.
pub struct Texture {
    image: Image,
}

impl Texture {
    /// Uploads tightly packed RGBA8 `pixels` of `width` x `height`.
    ///
    /// Staging copy, `UNDEFINED → TRANSFER_DST` transition, copy and
    /// `TRANSFER_DST → SHADER_READ_ONLY` transition go into one blocking
    /// submission.
    pub fn from_rgba8(
        device: Arc<Device>,
        upload: &UploadContext,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let expected = rgba8_len(width, height)?;
        if pixels.len() != expected {
            return Err(RhiError::InvalidSize(format!(
                "Texture {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, pixels)?;
        let image = Image::new(
            device,
            &ImageDesc::device_local(
                width,
                height,
                TEXTURE_FORMAT,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::COLOR,
                "texture",
            ),
        )?;

        upload.submit(|cmd| {
            image::transition_image_layout(
                cmd,
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            image::copy_buffer_to_image(cmd, staging.handle(), image.handle(), width, height);
            image::transition_image_layout(
                cmd,
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        debug!("Uploaded {}x{} texture", width, height);
        Ok(Self { image })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

/// Byte length of tightly packed RGBA8 pixels.
pub fn rgba8_len(width: u32, height: u32) -> RhiResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|texels| texels.checked_mul(4))
        .ok_or_else(|| {
            RhiError::InvalidSize(format!("Texture {}x{} overflows usize", width, height))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_len() {
        assert_eq!(rgba8_len(2, 3).unwrap(), 24);
        assert_eq!(rgba8_len(0, 7).unwrap(), 0);
    }

    #[test]
    #[cfg(target_pointer_width = "32")]
    fn test_rgba8_len_overflow_is_a_size_error() {
        let err = rgba8_len(u32::MAX, 2).unwrap_err();
        assert!(matches!(err, RhiError::InvalidSize(_)));
    }
}
