//! Memory type selection shared by buffers and images.
//!
//! gpu-allocator picks the memory type from a [`MemoryLocation`]; this module
//! maps explicit property flags onto a location, checks up front that some
//! memory type can satisfy the request, and verifies the block it handed
//! back really carries the requested flags.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Index of the first memory type allowed by `type_bits` whose flags
/// contain all of `properties`.
pub fn find_memory_type_index(
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> Option<u32> {
    memory_properties
        .memory_types_as_slice()
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
}

/// Allocator location that prefers memory with `properties`.
pub fn location_for_properties(properties: vk::MemoryPropertyFlags) -> MemoryLocation {
    if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        if properties.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
            MemoryLocation::GpuToCpu
        } else {
            MemoryLocation::CpuToGpu
        }
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Allocates memory for a resource with the given requirements.
///
/// Fails with [`RhiError::NoSuitableMemoryType`] when no memory type matches
/// both `requirements.memory_type_bits` and `properties`, or when the block
/// the allocator chose lacks one of the requested flags. A rejected block is
/// freed before returning.
pub(crate) fn allocate(
    device: &Device,
    name: &str,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    location: MemoryLocation,
    linear: bool,
) -> RhiResult<Allocation> {
    let no_match = || RhiError::NoSuitableMemoryType {
        type_bits: requirements.memory_type_bits,
        properties,
    };

    if find_memory_type_index(
        requirements.memory_type_bits,
        properties,
        device.memory_properties(),
    )
    .is_none()
    {
        return Err(no_match());
    }

    let mut allocator = device.lock_allocator()?;
    let allocation = allocator.allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    })?;

    if !allocation.memory_properties().contains(properties) {
        tracing::warn!(
            "Allocator returned {:?} for '{}', requested {:?}",
            allocation.memory_properties(),
            name,
            properties
        );
        allocator.free(allocation)?;
        return Err(no_match());
    }

    Ok(allocation)
}

/// Returns an allocation to the device allocator, logging failures.
///
/// Used from `Drop` implementations, which cannot propagate errors.
pub(crate) fn release(device: &Device, allocation: Allocation, what: &str) {
    match device.lock_allocator() {
        Ok(mut allocator) => {
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free {} allocation: {:?}", what, e);
            }
        }
        Err(e) => tracing::error!("Leaking {} allocation: {}", what, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            *slot = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        props
    }

    fn typical_device() -> vk::PhysicalDeviceMemoryProperties {
        memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn test_finds_first_matching_type() {
        let props = typical_device();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type_index(0b111, host, &props), Some(1));
        assert_eq!(
            find_memory_type_index(0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props),
            Some(0)
        );
    }

    #[test]
    fn test_respects_type_bits() {
        let props = typical_device();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        // Type 1 excluded by the resource, type 2 still qualifies.
        assert_eq!(find_memory_type_index(0b101, host, &props), Some(2));
        assert_eq!(find_memory_type_index(0b001, host, &props), None);
    }

    #[test]
    fn test_result_is_superset_of_request() {
        let props = typical_device();
        let requests = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        ];
        for request in requests {
            let index = find_memory_type_index(u32::MAX, request, &props).unwrap();
            assert!(props.memory_types[index as usize]
                .property_flags
                .contains(request));
        }
    }

    #[test]
    fn test_no_match() {
        let props = typical_device();
        let impossible =
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type_index(u32::MAX, impossible, &props), None);
        assert_eq!(
            find_memory_type_index(
                u32::MAX,
                vk::MemoryPropertyFlags::PROTECTED,
                &props
            ),
            None
        );
    }

    #[test]
    fn test_ignores_types_past_count() {
        let mut props = typical_device();
        props.memory_types[5].property_flags = vk::MemoryPropertyFlags::LAZILY_ALLOCATED;
        assert_eq!(
            find_memory_type_index(
                u32::MAX,
                vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
                &props
            ),
            None
        );
    }

    #[test]
    fn test_location_for_properties() {
        assert_eq!(
            location_for_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            location_for_properties(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            location_for_properties(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED
            ),
            MemoryLocation::GpuToCpu
        );
    }
}
