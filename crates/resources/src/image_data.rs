//! Image decoding for texture upload.

use std::path::Path;

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// Decoded RGBA8 pixels, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// `width` x `height` image filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: rgba.repeat(count),
        }
    }
}

/// Decodes any PNG or JPEG file into RGBA8.
pub fn load_image(path: &Path) -> ResourceResult<ImageData> {
    let decoded = image::open(path).map_err(|source| ResourceError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();

    debug!("Decoded image {:?}: {}x{}", path, width, height);

    Ok(ImageData {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_image() {
        let image = ImageData::solid(1, 1, [255, 255, 255, 255]);
        assert_eq!(image.pixels, vec![255; 4]);

        let image = ImageData::solid(3, 2, [1, 2, 3, 4]);
        assert_eq!(image.pixels.len(), 24);
        assert_eq!(&image.pixels[20..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.png");
        let mut source = image::RgbaImage::new(2, 2);
        source.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        source.put_pixel(1, 1, image::Rgba([0, 0, 255, 128]));
        source.save(&path).unwrap();

        let decoded = load_image(&path).unwrap();
        assert_eq!((decoded.width, decoded.height), (2, 2));
        assert_eq!(decoded.pixels.len(), 16);
        assert_eq!(&decoded.pixels[0..4], &[255, 0, 0, 255]);
        assert_eq!(&decoded.pixels[12..16], &[0, 0, 255, 128]);
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_image(&dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, ResourceError::Image { .. }));
    }
}
