//! Asset decoding.
//!
//! Turns files on disk into CPU-side byte buffers the renderer uploads:
//! - glTF models into [`MeshData`] (interleaved [`renderer_rhi::vertex::Vertex`] + `u32` indices)
//! - PNG/JPEG images into tightly packed RGBA8 [`ImageData`]

mod error;
pub mod image_data;
pub mod model;

pub use error::{ResourceError, ResourceResult};
pub use image_data::{ImageData, load_image};
pub use model::{MeshData, ModelData};
