//! Resource allocator tests against a real device.
//!
//! Every test builds a headless instance and device and returns early with a
//! skip message when no Vulkan implementation is available.

use std::sync::Arc;

use ash::vk;
use renderer_rhi::RhiError;
use renderer_rhi::buffer::{Buffer, BufferUsage};
use renderer_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use renderer_rhi::device::Device;
use renderer_rhi::instance::Instance;
use renderer_rhi::physical_device::select_physical_device;
use renderer_rhi::texture::Texture;
use renderer_rhi::upload::UploadContext;

struct Gpu {
    device: Arc<Device>,
    // Declared after the device so it is dropped last.
    _instance: Instance,
}

fn headless_gpu() -> Option<Gpu> {
    let instance = match Instance::new("rhi-tests", false, None) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("skipping: no Vulkan instance ({e})");
            return None;
        }
    };
    let info = match select_physical_device(&instance, None) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("skipping: no usable GPU ({e})");
            return None;
        }
    };
    let device = match Device::new(&instance, &info) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("skipping: device creation failed ({e})");
            return None;
        }
    };
    Some(Gpu {
        device,
        _instance: instance,
    })
}

#[test]
fn test_create_buffer_memory_contains_requested_flags() {
    let Some(gpu) = headless_gpu() else { return };

    let requests = [
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        vk::MemoryPropertyFlags::HOST_VISIBLE,
    ];
    for requested in requests {
        let buffer = Buffer::with_properties(
            gpu.device.clone(),
            256,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            requested,
        )
        .unwrap();
        assert!(
            buffer.memory_properties().contains(requested),
            "got {:?} for {:?}",
            buffer.memory_properties(),
            requested
        );
    }
}

#[test]
fn test_create_buffer_rejects_impossible_properties() {
    let Some(gpu) = headless_gpu() else { return };

    // Lazily allocated memory is never host visible.
    let result = Buffer::with_properties(
        gpu.device.clone(),
        64,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
    );
    assert!(matches!(
        result,
        Err(RhiError::NoSuitableMemoryType { .. })
    ));
}

#[test]
fn test_staged_upload_round_trip() {
    let Some(gpu) = headless_gpu() else { return };
    let upload = UploadContext::new(gpu.device.clone()).unwrap();

    let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let buffer = upload
        .create_device_local(BufferUsage::Vertex, &data)
        .unwrap();
    assert!(
        buffer
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
    );

    let read = upload.read_buffer(&buffer, data.len()).unwrap();
    assert_eq!(read, data);
}

#[test]
fn test_texture_upload_completes() {
    let Some(gpu) = headless_gpu() else { return };
    let upload = UploadContext::new(gpu.device.clone()).unwrap();

    let pixels = [255u8; 2 * 2 * 4];
    let texture = Texture::from_rgba8(gpu.device.clone(), &upload, 2, 2, &pixels).unwrap();
    assert_eq!(texture.extent().width, 2);

    let short = Texture::from_rgba8(gpu.device.clone(), &upload, 2, 2, &pixels[..8]);
    assert!(matches!(short, Err(RhiError::InvalidSize(_))));
}

#[test]
fn test_oversized_upload_is_a_size_error() {
    let Some(gpu) = headless_gpu() else { return };
    let upload = UploadContext::new(gpu.device.clone()).unwrap();

    let dst = Buffer::new(gpu.device.clone(), BufferUsage::Vertex, 16).unwrap();
    let result = upload.upload_to_buffer(&dst, &[0u8; 32]);
    assert!(matches!(result, Err(RhiError::InvalidSize(_))));

    let empty = Buffer::new(gpu.device.clone(), BufferUsage::Vertex, 0);
    assert!(matches!(empty, Err(RhiError::InvalidSize(_))));
}

#[test]
fn test_descriptor_pool_refuses_past_max_sets() {
    let Some(gpu) = headless_gpu() else { return };

    let layout = DescriptorSetLayout::new(
        gpu.device.clone(),
        &[DescriptorBindingBuilder::uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX,
        )],
    )
    .unwrap();
    let sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 2,
    }];
    let mut pool = DescriptorPool::new(gpu.device.clone(), 2, &sizes).unwrap();

    let sets = pool.allocate(&[layout.handle(), layout.handle()]).unwrap();
    assert_eq!(sets.len(), 2);
    assert!(matches!(
        pool.allocate(&[layout.handle()]),
        Err(RhiError::PoolExhausted { max_sets: 2, .. })
    ));

    pool.free(&sets[..1]).unwrap();
    assert!(pool.allocate(&[layout.handle()]).is_ok());
    assert_eq!(pool.budget().allocated(), 2);
}
