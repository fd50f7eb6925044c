//! Every Vulkan object the renderer owns, and the [`FrameBackend`] that
//! drives them.
//!
//! # Resource Destruction Order
//!
//! Fields drop in declaration order, which is the reverse of creation:
//!
//! 1. Per-swapchain-image resources (command buffers, framebuffers,
//!    attachments, uniform buffers)
//! 2. Models and textures
//! 3. Descriptor pools, sampler, render graph, set layouts
//! 4. Command pool, frame sync objects, upload context
//! 5. Swapchain
//! 6. Device (last `Arc`), then surface, then instance
//!
//! [`Drop`] waits for the device to go idle before any of that happens.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{debug, error, info, warn};

use renderer_core::config::{RenderSettings, RendererConfig, ShaderPaths};
use renderer_platform::{Surface, Window};
use renderer_resources::{ImageData, MeshData, ModelData, load_image};
use renderer_rhi::buffer::{Buffer, BufferUsage};
use renderer_rhi::command::{CommandBuffer, CommandPool};
use renderer_rhi::descriptor::DescriptorPool;
use renderer_rhi::device::Device;
use renderer_rhi::image::{DEPTH_FORMAT_CANDIDATES, Image, ImageDesc, find_supported_format};
use renderer_rhi::instance::Instance;
use renderer_rhi::physical_device::{SurfaceTarget, select_physical_device};
use renderer_rhi::render_pass::Framebuffer;
use renderer_rhi::sampler::Sampler;
use renderer_rhi::swapchain::Swapchain;
use renderer_rhi::sync::{FrameSync, MAX_FRAMES_IN_FLIGHT};
use renderer_rhi::texture::Texture;
use renderer_rhi::upload::UploadContext;
use renderer_rhi::{RhiError, RhiResult};

use crate::descriptors::{
    DescriptorLayouts, TextureCache, create_frame_pool, create_texture_pool, write_input_set,
    write_texture_set, write_uniform_set,
};
use crate::error::{RendererError, RendererResult};
use crate::frame_manager::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::mesh::{Mesh, Model, ModelStore, ModelUpdate};
use crate::render_graph::{OFFSCREEN_COLOR_FORMAT, RenderGraph};
use crate::uniforms::{DynamicUniformLayout, ModelUbo, PushModel, ViewProjection};

/// Resources tied to one swapchain image.
struct ImageResources {
    command_buffer: CommandBuffer,
    framebuffer: Framebuffer,
    _color: Image,
    _depth: Image,
    view_projection: Buffer,
    models: Buffer,
    uniform_set: vk::DescriptorSet,
    input_set: vk::DescriptorSet,
}

/// A sampled texture and the set binding it.
struct LoadedTexture {
    _texture: Texture,
    set: vk::DescriptorSet,
}

pub struct RenderContext {
    images: Vec<ImageResources>,
    frame_pool: DescriptorPool,
    models: ModelStore,
    textures: Vec<LoadedTexture>,
    texture_cache: TextureCache,
    texture_pool: DescriptorPool,
    sampler: Sampler,
    graph: RenderGraph,
    layouts: DescriptorLayouts,
    command_pool: CommandPool,
    frames: Vec<FrameSync>,
    upload: UploadContext,
    swapchain: Swapchain,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,

    uniform_layout: DynamicUniformLayout,
    view_projection: ViewProjection,
    /// Fixed recordings that predate a push constant change, per image.
    stale_recordings: Vec<bool>,
    settings: RenderSettings,
    shaders: ShaderPaths,
}

impl RenderContext {
    /// Brings up the device, swapchain, render graph and per-image resources,
    /// then uploads the default white texture at index 0.
    ///
    /// On failure everything created so far is dropped in reverse order.
    pub fn new(window: &Window, config: &RendererConfig) -> RendererResult<Self> {
        let settings = config.renderer.clone();

        let instance = Instance::new(
            &config.window.title,
            settings.validation_enabled(),
            Some(window.raw_display_handle()?),
        )?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let physical = select_physical_device(
            &instance,
            Some(SurfaceTarget {
                loader: surface.loader(),
                surface: surface.handle(),
            }),
        )?;
        let device = Device::new(&instance, &physical)?;
        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            window.width(),
            window.height(),
        )?;
        let upload = UploadContext::new(device.clone())?;
        let frames = FrameSync::for_slots(&device, MAX_FRAMES_IN_FLIGHT)?;
        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let layouts = DescriptorLayouts::new(&device)?;

        let depth_format = find_supported_format(
            instance.handle(),
            device.physical_device(),
            &DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        let graph = RenderGraph::new(
            &device,
            swapchain.format(),
            depth_format,
            &layouts,
            &config.shaders,
            settings.front_face,
        )?;

        let sampler = Sampler::linear(device.clone())?;
        let texture_pool = create_texture_pool(&device, settings.max_textures)?;
        let texture_cache = TextureCache::new(settings.max_textures as usize);
        let models = ModelStore::new(settings.max_objects as usize);

        let uniform_layout = DynamicUniformLayout::new(
            device.min_uniform_buffer_offset_alignment(),
            settings.max_objects,
        );
        debug!(
            "Dynamic uniform stride {} bytes for {} objects",
            uniform_layout.stride(),
            uniform_layout.max_objects()
        );

        let mut frame_pool = create_frame_pool(&device, swapchain.image_count() as u32)?;
        let images = create_image_resources(
            &device,
            &swapchain,
            &graph,
            &layouts,
            &command_pool,
            &mut frame_pool,
            &uniform_layout,
        )?;

        let view_projection = ViewProjection::look_at(Vec3::new(0.0, 0.0, 3.0), window.aspect_ratio());

        let mut context = Self {
            images,
            frame_pool,
            models,
            textures: Vec::new(),
            texture_cache,
            texture_pool,
            sampler,
            graph,
            layouts,
            command_pool,
            frames,
            upload,
            swapchain,
            device,
            surface,
            instance,
            uniform_layout,
            view_projection,
            stale_recordings: Vec::new(),
            settings,
            shaders: config.shaders.clone(),
        };

        context.create_texture(None, &ImageData::solid(1, 1, [255, 255, 255, 255]))?;
        if context.settings.fixed_command_recording {
            context.record_all()?;
        }

        info!(
            "Render context ready: {} swapchain images, {} frames in flight",
            context.images.len(),
            MAX_FRAMES_IN_FLIGHT
        );
        Ok(context)
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    // =========================================================================
    // Swapchain
    // =========================================================================

    /// Rebuilds the swapchain and everything sized by it.
    ///
    /// The render graph is rebuilt only when it no longer matches the
    /// surface format. Frame sync objects are replaced because an
    /// out-of-date present or an abandoned frame may leave a semaphore
    /// signaled. On failure the context has no per-image resources and
    /// calling this again retries from scratch.
    pub fn recreate(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.device.wait_idle()?;

        self.destroy_image_resources()?;

        self.swapchain
            .recreate(&self.instance, self.surface.handle(), width, height)?;

        if self.swapchain.format() != self.graph.swapchain_format() {
            info!(
                "Surface format changed {:?} -> {:?}, rebuilding render graph",
                self.graph.swapchain_format(),
                self.swapchain.format()
            );
            self.graph = RenderGraph::new(
                &self.device,
                self.swapchain.format(),
                self.graph.depth_format(),
                &self.layouts,
                &self.shaders,
                self.settings.front_face,
            )?;
        }

        self.frame_pool = create_frame_pool(&self.device, self.swapchain.image_count() as u32)?;
        self.images = create_image_resources(
            &self.device,
            &self.swapchain,
            &self.graph,
            &self.layouts,
            &self.command_pool,
            &mut self.frame_pool,
            &self.uniform_layout,
        )?;
        self.frames = FrameSync::for_slots(&self.device, MAX_FRAMES_IN_FLIGHT)?;

        if self.settings.fixed_command_recording {
            self.record_all()?;
        }
        Ok(())
    }

    fn destroy_image_resources(&mut self) -> RhiResult<()> {
        self.stale_recordings.clear();
        let mut buffers = Vec::with_capacity(self.images.len());
        let mut sets = Vec::with_capacity(self.images.len() * 2);
        for image in std::mem::take(&mut self.images) {
            sets.extend([image.uniform_set, image.input_set]);
            buffers.push(image.command_buffer);
        }

        self.command_pool.free(&buffers);
        self.frame_pool.free(&sets)
    }

    // =========================================================================
    // Scene data
    // =========================================================================

    pub fn set_view_projection(&mut self, view_projection: ViewProjection) {
        self.view_projection = view_projection;
    }

    /// Transforms reach the GPU through uniforms every frame. A new push
    /// constant is baked into recordings, so fixed recordings go stale.
    pub fn update_model(&mut self, index: usize, transform: Mat4, push: PushModel) {
        match self.models.update(index, transform, push) {
            ModelUpdate::Unknown => debug!("Ignoring update for unknown model {}", index),
            ModelUpdate::Moved => {}
            ModelUpdate::Retinted => self.stale_recordings.fill(true),
        }
    }

    /// Loads an image file, reusing the texture if the same path was
    /// loaded before.
    pub fn load_texture(&mut self, path: &Path) -> RendererResult<usize> {
        if let Some(index) = self.texture_cache.get(path) {
            return Ok(index);
        }
        self.texture_cache.ensure_room()?;
        let image = load_image(path)?;
        self.create_texture(Some(path), &image)
    }

    fn create_texture(&mut self, path: Option<&Path>, image: &ImageData) -> RendererResult<usize> {
        self.texture_cache.ensure_room()?;

        let texture = Texture::from_rgba8(
            self.device.clone(),
            &self.upload,
            image.width,
            image.height,
            &image.pixels,
        )?;
        let set = self
            .texture_pool
            .allocate(&[self.layouts.texture.handle()])?
            .pop()
            .ok_or_else(|| RhiError::InvalidHandle("no texture set allocated".to_string()))?;
        write_texture_set(&self.device, set, self.sampler.handle(), texture.view());

        let index = self.texture_cache.insert(path)?;
        self.textures.push(LoadedTexture {
            _texture: texture,
            set,
        });
        debug!("Texture {} ready ({:?})", index, path);
        Ok(index)
    }

    /// Uploads `meshes` as one model and returns its index.
    ///
    /// A mesh whose texture fails to load falls back to the default texture.
    pub fn add_model(&mut self, meshes: Vec<MeshData>) -> RendererResult<usize> {
        if self.models.len() >= self.models.capacity() {
            return Err(RendererError::ResourceExhausted {
                what: "model",
                capacity: self.models.capacity(),
            });
        }

        let mut uploaded = Vec::with_capacity(meshes.len());
        for data in &meshes {
            if data.vertices.is_empty() || data.indices.is_empty() {
                warn!("Skipping empty mesh");
                continue;
            }
            let texture_index = match &data.texture {
                Some(path) => self.load_texture(path).unwrap_or_else(|e| {
                    warn!("Texture {:?} unavailable, using default: {}", path, e);
                    0
                }),
                None => 0,
            };
            uploaded.push(Mesh::new(&self.upload, data, texture_index)?);
        }

        let index = self.models.add(Model::new(uploaded))?;
        info!("Added model {}", index);

        if self.settings.fixed_command_recording {
            self.device.wait_idle()?;
            self.record_all()?;
        }
        Ok(index)
    }

    pub fn load_model(&mut self, path: &Path) -> RendererResult<usize> {
        let model = ModelData::load(path)?;
        self.add_model(model.meshes)
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Records every image's command buffer. The device must be idle.
    fn record_all(&mut self) -> RhiResult<()> {
        for image_index in 0..self.images.len() as u32 {
            self.record(image_index)?;
        }
        self.stale_recordings = vec![false; self.images.len()];
        debug!("Recorded {} fixed command buffers", self.images.len());
        Ok(())
    }

    fn image(&self, image_index: u32) -> RhiResult<&ImageResources> {
        self.images.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidHandle(format!("no resources for image {}", image_index))
        })
    }

    fn record(&self, image_index: u32) -> RhiResult<()> {
        let image = self.image(image_index)?;
        let cmd = &image.command_buffer;
        let extent = self.swapchain.extent();

        cmd.reset()?;
        if self.settings.fixed_command_recording {
            cmd.begin_reusable()?;
        } else {
            cmd.begin()?;
        }

        let clear_values = self
            .graph
            .render_pass()
            .clear_values(self.settings.clear_color);
        cmd.begin_render_pass(
            self.graph.render_pass().handle(),
            image.framebuffer.handle(),
            extent,
            &clear_values,
        );
        cmd.set_full_viewport(extent);

        // Subpass 0: geometry into the offscreen attachments.
        let geometry = self.graph.geometry_pipeline();
        let layout = self.graph.geometry_layout().handle();
        cmd.bind_pipeline(geometry.bind_point(), geometry.handle());

        for (index, model) in self.models.iter().enumerate() {
            let offset = self.uniform_layout.offset(index)?;
            cmd.push_constants(layout, vk::ShaderStageFlags::VERTEX, 0, &model.push);

            for mesh in &model.meshes {
                let texture = self
                    .textures
                    .get(mesh.texture_index())
                    .or_else(|| self.textures.first())
                    .ok_or_else(|| RhiError::InvalidHandle("no textures loaded".to_string()))?;

                cmd.bind_descriptor_sets(
                    geometry.bind_point(),
                    layout,
                    0,
                    &[image.uniform_set, texture.set],
                    &[offset],
                );
                cmd.bind_geometry(mesh.vertex_buffer().handle(), mesh.index_buffer().handle());
                cmd.draw_indexed(mesh.index_count());
            }
        }

        // Subpass 1: composition into the swapchain image.
        cmd.next_subpass();
        let composition = self.graph.composition_pipeline();
        cmd.bind_pipeline(composition.bind_point(), composition.handle());
        cmd.bind_descriptor_sets(
            composition.bind_point(),
            self.graph.composition_layout().handle(),
            0,
            &[image.input_set],
            &[],
        );
        cmd.draw(3);

        cmd.end_render_pass();
        cmd.end()
    }
}

impl FrameBackend for RenderContext {
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frames[slot]
            .in_flight()
            .wait(self.settings.fence_timeout_ns())
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let semaphore = self.frames[slot].image_available().handle();
        match self.swapchain.acquire_next_image(semaphore) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frames[slot].in_flight().reset()
    }

    fn update_image(&mut self, image_index: u32) -> RhiResult<()> {
        let image = self.image(image_index)?;
        image.view_projection.write_pod(0, &self.view_projection)?;

        let models: Vec<ModelUbo> = self
            .models
            .iter()
            .map(|model| ModelUbo::new(model.transform))
            .collect();
        image.models.write_data(0, &self.uniform_layout.pack(&models)?)
    }

    fn record_image(&mut self, image_index: u32) -> RhiResult<()> {
        self.record(image_index)?;
        if let Some(stale) = self.stale_recordings.get_mut(image_index as usize) {
            *stale = false;
        }
        Ok(())
    }

    fn image_needs_record(&self, image_index: u32) -> bool {
        self.stale_recordings
            .get(image_index as usize)
            .copied()
            .unwrap_or(false)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let frame = &self.frames[slot];
        let image = self.image(image_index)?;

        let wait_semaphores = [frame.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished().handle()];
        let command_buffers = [image.command_buffer.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.handle().queue_submit(
                self.device.graphics_queue(),
                &[submit_info],
                frame.in_flight().handle(),
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        match self.swapchain.present(
            self.device.present_queue(),
            image_index,
            self.frames[slot].render_finished().handle(),
        ) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during teardown: {}", e);
        }
        debug!("Destroying render context");
    }
}

/// Creates attachments, framebuffer, uniform buffers, descriptor sets and a
/// command buffer for every swapchain image.
fn create_image_resources(
    device: &Arc<Device>,
    swapchain: &Swapchain,
    graph: &RenderGraph,
    layouts: &DescriptorLayouts,
    command_pool: &CommandPool,
    frame_pool: &mut DescriptorPool,
    uniform_layout: &DynamicUniformLayout,
) -> RhiResult<Vec<ImageResources>> {
    let extent = swapchain.extent();
    let command_buffers = command_pool.allocate_command_buffers(swapchain.image_count() as u32)?;

    let mut images = Vec::with_capacity(command_buffers.len());
    for (&swapchain_view, command_buffer) in swapchain.image_views().iter().zip(command_buffers) {
        let color = Image::new(
            device.clone(),
            &ImageDesc::device_local(
                extent.width,
                extent.height,
                OFFSCREEN_COLOR_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
                "offscreen color",
            ),
        )?;
        let depth = Image::new(
            device.clone(),
            &ImageDesc::device_local(
                extent.width,
                extent.height,
                graph.depth_format(),
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::INPUT_ATTACHMENT,
                vk::ImageAspectFlags::DEPTH,
                "depth",
            ),
        )?;
        let framebuffer = Framebuffer::new(
            device.clone(),
            graph.render_pass(),
            &[swapchain_view, color.view(), depth.view()],
            extent,
        )?;

        let view_projection = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            ViewProjection::SIZE as vk::DeviceSize,
        )?;
        let models = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            uniform_layout.buffer_size(),
        )?;

        let sets = frame_pool.allocate(&[layouts.uniforms.handle(), layouts.inputs.handle()])?;
        let &[uniform_set, input_set] = sets.as_slice() else {
            return Err(RhiError::InvalidHandle(format!(
                "expected 2 descriptor sets, got {}",
                sets.len()
            )));
        };
        write_uniform_set(device, uniform_set, &view_projection, &models);
        write_input_set(device, input_set, color.view(), depth.view());

        images.push(ImageResources {
            command_buffer,
            framebuffer,
            _color: color,
            _depth: depth,
            view_projection,
            models,
            uniform_set,
            input_set,
        });
    }

    debug!(
        "Created resources for {} swapchain images at {}x{}",
        images.len(),
        extent.width,
        extent.height
    );
    Ok(images)
}
