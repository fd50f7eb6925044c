//! Vertex format consumed by the geometry subpass.
//!
//! # Memory Layout
//!
//! - Offset 0: position (12 bytes), location 0
//! - Offset 12: color (12 bytes), location 1
//! - Offset 24: tex_coord (8 bytes), location 2
//! - Total size: 32 bytes

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position.
    pub position: Vec3,
    /// Linear RGB color, multiplied with the texture sample.
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }

    /// Single interleaved binding, stride = `size_of::<Vertex>()`.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// One attribute per field, in field order.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);

        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24]);
    }

    #[test]
    fn test_attribute_locations_are_sequential() {
        for (i, attribute) in Vertex::attribute_descriptions().iter().enumerate() {
            assert_eq!(attribute.location, i as u32);
            assert_eq!(attribute.binding, 0);
        }
    }

    #[test]
    fn test_vertex_bytes_are_tightly_packed() {
        let vertices = [
            Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, Vec2::new(0.5, 0.25)),
            Vertex::default(),
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 64);
        let first: &[f32] = bytemuck::cast_slice(&bytes[..32]);
        assert_eq!(first, &[1.0, 2.0, 3.0, 1.0, 1.0, 1.0, 0.5, 0.25]);
    }
}
