//! Error types for asset loading.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Failed to load glTF file {path:?}")]
    GltfLoad {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },

    #[error("glTF file {0:?} contains no triangle meshes")]
    NoMeshes(PathBuf),

    #[error("Mesh {mesh} in {path:?} has no position data")]
    NoPositionData { path: PathBuf, mesh: usize },

    #[error("Index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("Failed to decode image {path:?}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ResourceResult<T> = Result<T, ResourceError>;
