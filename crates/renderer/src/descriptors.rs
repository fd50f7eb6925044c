//! Descriptor layouts, pools and set writes for the deferred renderer.
//!
//! | Set | Layout | Bindings | Allocated |
//! |-----|--------|----------|-----------|
//! | 0 | `uniforms` | 0: view-projection UBO, 1: model dynamic UBO (vertex) | one per swapchain image |
//! | 1 | `texture` | 0: combined image sampler (fragment) | one per distinct texture |
//! | 0 (composition) | `inputs` | 0: color input, 1: depth input (fragment) | one per swapchain image |

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use renderer_rhi::RhiResult;
use renderer_rhi::buffer::Buffer;
use renderer_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, buffer_info, image_info,
    update_descriptor_sets, write_buffers, write_images,
};
use renderer_rhi::device::Device;

use crate::error::{RendererError, RendererResult};
use crate::uniforms::{ModelUbo, ViewProjection};

/// The three set layouts both pipelines are built from.
pub struct DescriptorLayouts {
    pub uniforms: DescriptorSetLayout,
    pub texture: DescriptorSetLayout,
    pub inputs: DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub fn new(device: &Arc<Device>) -> RhiResult<Self> {
        let uniforms = DescriptorSetLayout::new(
            device.clone(),
            &[
                DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
                DescriptorBindingBuilder::uniform_buffer_dynamic(1, vk::ShaderStageFlags::VERTEX),
            ],
        )?;
        let texture = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::combined_image_sampler(
                0,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let inputs = DescriptorSetLayout::new(
            device.clone(),
            &[
                DescriptorBindingBuilder::input_attachment(0),
                DescriptorBindingBuilder::input_attachment(1),
            ],
        )?;

        debug!("Created descriptor set layouts");
        Ok(Self {
            uniforms,
            texture,
            inputs,
        })
    }
}

/// Pool sized for the uniform and input-attachment sets of `image_count`
/// swapchain images.
pub fn create_frame_pool(device: &Arc<Device>, image_count: u32) -> RhiResult<DescriptorPool> {
    let sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: image_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count: image_count * 2,
        },
    ];
    DescriptorPool::new(device.clone(), image_count * 2, &sizes)
}

/// Pool holding at most `max_textures` sampler sets.
pub fn create_texture_pool(device: &Arc<Device>, max_textures: u32) -> RhiResult<DescriptorPool> {
    let sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: max_textures,
    }];
    DescriptorPool::new(device.clone(), max_textures, &sizes)
}

/// Points set 0 at an image's view-projection and model buffers.
///
/// The dynamic binding covers a single [`ModelUbo`]; the bind-time offset
/// selects the object.
pub fn write_uniform_set(
    device: &Device,
    set: vk::DescriptorSet,
    view_projection: &Buffer,
    models: &Buffer,
) {
    let vp_info = [buffer_info(
        view_projection.handle(),
        0,
        ViewProjection::SIZE as vk::DeviceSize,
    )];
    let model_info = [buffer_info(models.handle(), 0, ModelUbo::SIZE as vk::DeviceSize)];

    update_descriptor_sets(
        device,
        &[
            write_buffers(set, 0, vk::DescriptorType::UNIFORM_BUFFER, &vp_info),
            write_buffers(set, 1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, &model_info),
        ],
    );
}

/// Points the composition set at an image's offscreen attachments.
pub fn write_input_set(
    device: &Device,
    set: vk::DescriptorSet,
    color_view: vk::ImageView,
    depth_view: vk::ImageView,
) {
    let color_info = [image_info(
        vk::Sampler::null(),
        color_view,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )];
    let depth_info = [image_info(
        vk::Sampler::null(),
        depth_view,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )];

    update_descriptor_sets(
        device,
        &[
            write_images(set, 0, vk::DescriptorType::INPUT_ATTACHMENT, &color_info),
            write_images(set, 1, vk::DescriptorType::INPUT_ATTACHMENT, &depth_info),
        ],
    );
}

pub fn write_texture_set(
    device: &Device,
    set: vk::DescriptorSet,
    sampler: vk::Sampler,
    view: vk::ImageView,
) {
    let info = [image_info(
        sampler,
        view,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )];
    update_descriptor_sets(
        device,
        &[write_images(
            set,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            &info,
        )],
    );
}

/// Texture indices by source file, bounded by the texture pool size.
#[derive(Debug, Default)]
pub struct TextureCache {
    by_path: HashMap<PathBuf, usize>,
    count: usize,
    capacity: usize,
}

impl TextureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_path: HashMap::new(),
            count: 0,
            capacity,
        }
    }

    /// Index of an already loaded file.
    pub fn get(&self, path: &Path) -> Option<usize> {
        self.by_path.get(&normalize(path)).copied()
    }

    /// Fails when another texture would not fit.
    pub fn ensure_room(&self) -> RendererResult<()> {
        if self.count >= self.capacity {
            return Err(RendererError::ResourceExhausted {
                what: "texture",
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Assigns the next index, remembering `path` when given. Textures
    /// without a path (the default texture) are never returned by
    /// [`get`](Self::get).
    pub fn insert(&mut self, path: Option<&Path>) -> RendererResult<usize> {
        self.ensure_room()?;
        let index = self.count;
        self.count += 1;
        if let Some(path) = path {
            self.by_path.insert(normalize(path), index);
        }
        Ok(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Lexically collapses `.` and `name/..` so spellings of one file share a
/// key. Symlinks are not resolved and leading `..` components are kept.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hands_out_sequential_indices() {
        let mut cache = TextureCache::new(4);
        assert_eq!(cache.insert(None).unwrap(), 0);
        assert_eq!(cache.insert(Some(Path::new("a.png"))).unwrap(), 1);
        assert_eq!(cache.insert(Some(Path::new("b.png"))).unwrap(), 2);

        assert_eq!(cache.get(Path::new("a.png")), Some(1));
        assert_eq!(cache.get(Path::new("b.png")), Some(2));
        assert_eq!(cache.get(Path::new("c.png")), None);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_cache_rejects_past_capacity() {
        let mut cache = TextureCache::new(2);
        cache.insert(None).unwrap();
        cache.insert(Some(Path::new("a.png"))).unwrap();

        assert!(cache.ensure_room().is_err());
        let err = cache.insert(Some(Path::new("b.png"))).unwrap_err();
        assert!(matches!(
            err,
            RendererError::ResourceExhausted {
                what: "texture",
                capacity: 2
            }
        ));
        assert_eq!(cache.get(Path::new("b.png")), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_shares_index_across_path_spellings() {
        let mut cache = TextureCache::new(4);
        let index = cache.insert(Some(Path::new("a.png"))).unwrap();

        assert_eq!(cache.get(Path::new("./a.png")), Some(index));
        assert_eq!(cache.get(Path::new("textures/../a.png")), Some(index));
        assert_eq!(cache.get(Path::new("textures/./../a.png")), Some(index));
        assert_eq!(cache.get(Path::new("../a.png")), None);
    }

    #[test]
    fn test_normalize_keeps_unresolvable_parents() {
        assert_eq!(normalize(Path::new("../x/./y.png")), PathBuf::from("../x/y.png"));
        assert_eq!(normalize(Path::new("a/b/../../c.png")), PathBuf::from("c.png"));
        assert_eq!(normalize(Path::new("/../c.png")), PathBuf::from("/c.png"));
    }
}
