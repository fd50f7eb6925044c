//! Uniform and push-constant blocks shared with the GLSL shaders.
//!
//! All structures use `#[repr(C)]` and derive `Pod`/`Zeroable` so they can be
//! copied into mapped buffers byte for byte.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use renderer_rhi::{RhiError, RhiResult};

/// Camera block, set 0 binding 0.
///
/// # Memory Layout
///
/// - Offset 0: projection matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub projection: Mat4,
    pub view: Mat4,
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

impl ViewProjection {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Perspective camera at `eye` looking at the origin.
    ///
    /// The projection's Y axis is flipped: Vulkan clip space points Y down.
    pub fn look_at(eye: Vec3, aspect: f32) -> Self {
        let mut projection = Mat4::perspective_rh(45.0_f32.to_radians(), aspect, 0.1, 100.0);
        projection.y_axis.y *= -1.0;
        Self {
            projection,
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
        }
    }
}

/// Per-object block, set 0 binding 1 (dynamic uniform buffer).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ModelUbo {
    pub model: Mat4,
}

impl ModelUbo {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4) -> Self {
        Self { model }
    }
}

/// Per-draw material push constant, read by the geometry vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushModel {
    /// Tint multiplied with the vertex color. Alpha is kept for std430
    /// alignment and ignored.
    pub color: Vec4,
}

impl Default for PushModel {
    fn default() -> Self {
        Self { color: Vec4::ONE }
    }
}

impl PushModel {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn tint(color: Vec3) -> Self {
        Self {
            color: color.extend(1.0),
        }
    }
}

/// Rounds `size` up to a multiple of `min_alignment`.
///
/// Vulkan guarantees the alignment is a power of two; zero means no
/// requirement.
pub fn aligned_stride(size: u64, min_alignment: u64) -> u64 {
    if min_alignment == 0 {
        return size;
    }
    size.div_ceil(min_alignment) * min_alignment
}

/// Placement of [`ModelUbo`] entries inside one dynamic uniform buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicUniformLayout {
    stride: u64,
    max_objects: u32,
}

impl DynamicUniformLayout {
    pub fn new(min_alignment: u64, max_objects: u32) -> Self {
        Self {
            stride: aligned_stride(ModelUbo::SIZE as u64, min_alignment),
            max_objects,
        }
    }

    /// Byte offset of object `index`, used both for writes and as the
    /// dynamic offset at bind time.
    pub fn offset(&self, index: usize) -> RhiResult<u32> {
        if index >= self.max_objects as usize {
            return Err(RhiError::InvalidHandle(format!(
                "object index {} out of range (max {})",
                index, self.max_objects
            )));
        }
        u32::try_from(self.stride * index as u64).map_err(|_| {
            RhiError::InvalidSize(format!("dynamic offset for object {} overflows u32", index))
        })
    }

    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    #[inline]
    pub fn max_objects(&self) -> u32 {
        self.max_objects
    }

    /// Size of the whole buffer: `stride * max_objects`.
    #[inline]
    pub fn buffer_size(&self) -> u64 {
        self.stride * self.max_objects as u64
    }

    /// Packs `models` at their aligned offsets.
    pub fn pack(&self, models: &[ModelUbo]) -> RhiResult<Vec<u8>> {
        let mut bytes = vec![0u8; self.buffer_size() as usize];
        for (index, model) in models.iter().enumerate() {
            let offset = self.offset(index)? as usize;
            bytes[offset..offset + ModelUbo::SIZE].copy_from_slice(bytemuck::bytes_of(model));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(ViewProjection::SIZE, 128);
        assert_eq!(ModelUbo::SIZE, 64);
        assert_eq!(PushModel::SIZE, 16);
    }

    #[test]
    fn test_block_alignment() {
        assert_eq!(std::mem::align_of::<ViewProjection>(), 16);
        assert_eq!(std::mem::align_of::<ModelUbo>(), 16);
    }

    #[test]
    fn test_aligned_stride() {
        assert_eq!(aligned_stride(64, 256), 256);
        assert_eq!(aligned_stride(64, 64), 64);
        assert_eq!(aligned_stride(65, 64), 128);
        assert_eq!(aligned_stride(64, 16), 64);
        assert_eq!(aligned_stride(64, 0), 64);
    }

    #[test]
    fn test_offsets_respect_alignment() {
        for alignment in [16, 64, 256] {
            let layout = DynamicUniformLayout::new(alignment, 32);
            for i in 0..32 {
                let offset = layout.offset(i).unwrap() as u64;
                assert!(offset.is_multiple_of(alignment));
                assert!(offset + ModelUbo::SIZE as u64 <= layout.buffer_size());
            }
        }
    }

    #[test]
    fn test_offset_out_of_range() {
        let layout = DynamicUniformLayout::new(256, 4);
        assert_eq!(layout.offset(3).unwrap(), 768);
        assert!(layout.offset(4).is_err());
        assert_eq!(layout.buffer_size(), 1024);
    }

    #[test]
    fn test_offset_past_u32_is_a_size_error() {
        let layout = DynamicUniformLayout::new(256, 1 << 25);
        assert_eq!(layout.offset((1 << 24) - 1).unwrap(), u32::MAX - 255);

        let err = layout.offset(1 << 24).unwrap_err();
        assert!(matches!(err, RhiError::InvalidSize(_)));
        let err = layout.offset(1 << 25).unwrap_err();
        assert!(matches!(err, RhiError::InvalidHandle(_)));
    }

    #[test]
    fn test_pack_places_models_at_offsets() {
        let layout = DynamicUniformLayout::new(256, 2);
        let second = ModelUbo::new(Mat4::from_translation(Vec3::X));
        let bytes = layout.pack(&[ModelUbo::new(Mat4::IDENTITY), second]).unwrap();

        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[256..256 + ModelUbo::SIZE], bytemuck::bytes_of(&second));
        assert!(layout.pack(&[second; 3]).is_err());
    }

    #[test]
    fn test_look_at_flips_y() {
        let vp = ViewProjection::look_at(Vec3::new(0.0, 0.0, 3.0), 16.0 / 9.0);
        assert!(vp.projection.y_axis.y < 0.0);

        // The origin lands in the middle of clip space.
        let clip = vp.projection * vp.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
    }

    #[test]
    fn test_push_model_default_is_white() {
        assert_eq!(PushModel::default().color, Vec4::ONE);
        assert_eq!(PushModel::tint(Vec3::X).color, Vec4::new(1.0, 0.0, 0.0, 1.0));
    }
}
