//! Descriptor set layouts, capacity-tracked pools and write helpers.
//!
//! - [`DescriptorSetLayout`] declares binding slots and their kinds
//! - [`DescriptorPool`] hands out sets and refuses to go past `max_sets`
//! - [`PoolBudget`] is the pool's set accounting
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use renderer_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
//! use renderer_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(
//!     device.clone(),
//!     &[DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX)],
//! )?;
//!
//! let sizes = [vk::DescriptorPoolSize {
//!     ty: vk::DescriptorType::UNIFORM_BUFFER,
//!     descriptor_count: 3,
//! }];
//! let mut pool = DescriptorPool::new(device, 3, &sizes)?;
//! let sets = pool.allocate(&[layout.handle(); 3])?;
//! assert!(pool.allocate(&[layout.handle()]).is_err());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Tracks how many sets a pool has handed out against its `max_sets`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolBudget {
    max_sets: u32,
    allocated: u32,
}

impl PoolBudget {
    pub fn new(max_sets: u32) -> Self {
        Self {
            max_sets,
            allocated: 0,
        }
    }

    /// Claims `count` sets.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PoolExhausted`] and claims nothing if the pool
    /// would exceed `max_sets`.
    pub fn reserve(&mut self, count: u32) -> RhiResult<()> {
        match self.allocated.checked_add(count) {
            Some(total) if total <= self.max_sets => {
                self.allocated = total;
                Ok(())
            }
            _ => Err(RhiError::PoolExhausted {
                max_sets: self.max_sets,
                allocated: self.allocated,
                requested: count,
            }),
        }
    }

    /// Returns `count` sets to the budget.
    pub fn release(&mut self, count: u32) {
        self.allocated = self.allocated.saturating_sub(count);
    }

    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.max_sets - self.allocated
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

/// Descriptor pool that never allocates more than `max_sets` sets.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    budget: PoolBudget,
}

impl DescriptorPool {
    /// Creates a pool; `pool_sizes` must cover every descriptor the sets
    /// allocated from it will hold.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={:?}",
            max_sets, pool_sizes
        );

        Ok(Self {
            device,
            pool,
            budget: PoolBudget::new(max_sets),
        })
    }

    /// Allocates one set per layout.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PoolExhausted`] without touching the driver when
    /// the request would exceed `max_sets`.
    pub fn allocate(
        &mut self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let count = layouts.len() as u32;
        self.budget.reserve(count)?;

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        match unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets),
            Err(e) => {
                self.budget.release(count);
                Err(e.into())
            }
        }
    }

    /// Returns sets to the pool.
    pub fn free(&mut self, sets: &[vk::DescriptorSet]) -> RhiResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        unsafe {
            self.device.handle().free_descriptor_sets(self.pool, sets)?;
        }
        self.budget.release(sets.len() as u32);
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn budget(&self) -> PoolBudget {
        self.budget
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Applies descriptor writes.
pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet<'_>]) {
    if writes.is_empty() {
        return;
    }
    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }
}

#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo {
        buffer,
        offset,
        range,
    }
}

/// Image descriptor info. Input attachments pass `vk::Sampler::null()`.
#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo {
        sampler,
        image_view,
        image_layout,
    }
}

/// Write of buffer descriptors into `binding` of `set`.
pub fn write_buffers<'a>(
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    infos: &'a [vk::DescriptorBufferInfo],
) -> vk::WriteDescriptorSet<'a> {
    vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(ty)
        .buffer_info(infos)
}

/// Write of image descriptors into `binding` of `set`.
pub fn write_images<'a>(
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    infos: &'a [vk::DescriptorImageInfo],
) -> vk::WriteDescriptorSet<'a> {
    vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(ty)
        .image_info(infos)
}

/// Single-descriptor layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    fn single(
        binding: u32,
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(ty)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Uniform buffer addressed with a dynamic offset at bind time.
    #[inline]
    pub fn uniform_buffer_dynamic(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(
            binding,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            stage_flags,
        )
    }

    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stage_flags,
        )
    }

    /// Subpass input, fragment stage only.
    #[inline]
    pub fn input_attachment(binding: u32) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(
            binding,
            vk::DescriptorType::INPUT_ATTACHMENT,
            vk::ShaderStageFlags::FRAGMENT,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_enforces_max_sets() {
        let mut budget = PoolBudget::new(3);
        budget.reserve(2).unwrap();
        budget.reserve(1).unwrap();
        assert_eq!(budget.remaining(), 0);

        let err = budget.reserve(1).unwrap_err();
        assert!(matches!(
            err,
            RhiError::PoolExhausted {
                max_sets: 3,
                allocated: 3,
                requested: 1
            }
        ));
        assert_eq!(budget.allocated(), 3);
    }

    #[test]
    fn test_budget_rejects_oversized_batch_atomically() {
        let mut budget = PoolBudget::new(4);
        budget.reserve(2).unwrap();
        assert!(budget.reserve(3).is_err());
        assert_eq!(budget.allocated(), 2);
        budget.reserve(2).unwrap();
        assert_eq!(budget.allocated(), budget.max_sets());
    }

    #[test]
    fn test_budget_release_frees_capacity() {
        let mut budget = PoolBudget::new(1);
        budget.reserve(1).unwrap();
        budget.release(1);
        budget.reserve(1).unwrap();
        budget.release(5);
        assert_eq!(budget.allocated(), 0);
    }

    #[test]
    fn test_budget_never_exceeds_max_sets() {
        let mut budget = PoolBudget::new(7);
        for request in [1, 3, 2, 4, 1, 1, 2] {
            let _ = budget.reserve(request);
            assert!(budget.allocated() <= budget.max_sets());
        }
        assert_eq!(budget.allocated(), 7);
    }

    #[test]
    fn test_binding_kinds() {
        let ubo = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(ubo.binding, 0);
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ubo.descriptor_count, 1);

        let dynamic =
            DescriptorBindingBuilder::uniform_buffer_dynamic(1, vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            dynamic.descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );

        let input = DescriptorBindingBuilder::input_attachment(1);
        assert_eq!(input.descriptor_type, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(input.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_input_attachment_info_has_null_sampler() {
        let info = image_info(
            vk::Sampler::null(),
            vk::ImageView::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(info.sampler, vk::Sampler::null());
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_write_sets_count_from_infos() {
        let infos = [buffer_info(vk::Buffer::null(), 0, 64); 2];
        let write = write_buffers(
            vk::DescriptorSet::null(),
            1,
            vk::DescriptorType::UNIFORM_BUFFER,
            &infos,
        );
        assert_eq!(write.dst_binding, 1);
        assert_eq!(write.descriptor_count, 2);
    }
}
