//! GPU meshes and the fixed-capacity model table.

use glam::Mat4;
use tracing::debug;

use renderer_resources::MeshData;
use renderer_rhi::RhiResult;
use renderer_rhi::buffer::{Buffer, BufferUsage};
use renderer_rhi::upload::UploadContext;

use crate::error::{RendererError, RendererResult};
use crate::uniforms::PushModel;

/// What [`ModelStore::update`] changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelUpdate {
    /// No model at that index; nothing changed.
    Unknown,
    /// Only the transform, which reaches the GPU through uniforms.
    Moved,
    /// The push constant changed, so recorded command buffers are stale.
    Retinted,
}

/// Device-local vertex and index buffers of one mesh.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    vertex_count: u32,
    index_count: u32,
    texture_index: usize,
}

impl Mesh {
    /// Uploads `data` through staging buffers.
    pub fn new(upload: &UploadContext, data: &MeshData, texture_index: usize) -> RhiResult<Self> {
        let vertex_buffer = upload.create_device_local(
            BufferUsage::Vertex,
            bytemuck::cast_slice(&data.vertices),
        )?;
        let index_buffer =
            upload.create_device_local(BufferUsage::Index, bytemuck::cast_slice(&data.indices))?;

        debug!(
            "Uploaded mesh: {} vertices, {} indices, texture {}",
            data.vertices.len(),
            data.indices.len(),
            texture_index
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
            texture_index,
        })
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Index into the renderer's texture table; 0 is the default texture.
    #[inline]
    pub fn texture_index(&self) -> usize {
        self.texture_index
    }
}

/// Sub-meshes sharing one transform and material tint.
pub struct Model<M = Mesh> {
    pub meshes: Vec<M>,
    pub transform: Mat4,
    pub push: PushModel,
}

impl<M> Model<M> {
    pub fn new(meshes: Vec<M>) -> Self {
        Self {
            meshes,
            transform: Mat4::IDENTITY,
            push: PushModel::default(),
        }
    }
}

/// Models indexed by insertion order, at most `capacity` of them.
///
/// The index doubles as the model's slot in the dynamic uniform buffer.
pub struct ModelStore<M = Mesh> {
    models: Vec<Model<M>>,
    capacity: usize,
}

impl<M> ModelStore<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            models: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a model and returns its index.
    ///
    /// # Errors
    ///
    /// [`RendererError::ResourceExhausted`] once `capacity` models exist; the
    /// rejected model is dropped.
    pub fn add(&mut self, model: Model<M>) -> RendererResult<usize> {
        if self.models.len() >= self.capacity {
            return Err(RendererError::ResourceExhausted {
                what: "model",
                capacity: self.capacity,
            });
        }
        self.models.push(model);
        Ok(self.models.len() - 1)
    }

    /// Sets transform and tint of model `index`.
    pub fn update(&mut self, index: usize, transform: Mat4, push: PushModel) -> ModelUpdate {
        let Some(model) = self.models.get_mut(index) else {
            return ModelUpdate::Unknown;
        };
        model.transform = transform;
        if model.push == push {
            return ModelUpdate::Moved;
        }
        model.push = push;
        ModelUpdate::Retinted
    }

    pub fn get(&self, index: usize) -> Option<&Model<M>> {
        self.models.get(index)
    }

    /// Models in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Model<M>> {
        self.models.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every model, releasing its GPU buffers.
    pub fn clear(&mut self) {
        self.models.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_add_returns_sequential_indices() {
        let mut store = ModelStore::<u8>::new(3);
        assert_eq!(store.add(Model::new(vec![0])).unwrap(), 0);
        assert_eq!(store.add(Model::new(vec![1, 2])).unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_add_past_capacity_is_rejected() {
        let mut store = ModelStore::<u8>::new(1);
        store.add(Model::new(vec![])).unwrap();

        let err = store.add(Model::new(vec![])).unwrap_err();
        assert!(matches!(
            err,
            RendererError::ResourceExhausted {
                what: "model",
                capacity: 1
            }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_out_of_range_is_noop() {
        let mut store = ModelStore::<u8>::new(2);
        store.add(Model::new(vec![])).unwrap();

        let moved = Mat4::from_translation(Vec3::X);
        assert_eq!(
            store.update(5, moved, PushModel::default()),
            ModelUpdate::Unknown
        );
        assert_eq!(store.get(0).unwrap().transform, Mat4::IDENTITY);

        assert_eq!(
            store.update(0, moved, PushModel::tint(Vec3::Y)),
            ModelUpdate::Retinted
        );
        let model = store.get(0).unwrap();
        assert_eq!(model.transform, moved);
        assert_eq!(model.push, PushModel::tint(Vec3::Y));
    }

    #[test]
    fn test_update_reports_tint_changes_only_once() {
        let mut store = ModelStore::<u8>::new(1);
        store.add(Model::new(vec![])).unwrap();

        let spin = Mat4::from_rotation_y(0.5);
        assert_eq!(
            store.update(0, spin, PushModel::default()),
            ModelUpdate::Moved
        );
        assert_eq!(
            store.update(0, spin, PushModel::tint(Vec3::X)),
            ModelUpdate::Retinted
        );
        assert_eq!(
            store.update(0, Mat4::IDENTITY, PushModel::tint(Vec3::X)),
            ModelUpdate::Moved
        );
    }

    #[test]
    fn test_iter_in_index_order() {
        let mut store = ModelStore::new(4);
        for id in 0..3u8 {
            store.add(Model::new(vec![id])).unwrap();
        }
        let ids: Vec<u8> = store.iter().map(|m| m.meshes[0]).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
