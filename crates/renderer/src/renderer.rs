//! The renderer facade the application talks to.

use std::path::Path;

use ash::vk;
use glam::Mat4;
use tracing::{error, info, warn};

use renderer_core::config::RendererConfig;
use renderer_platform::Window;
use renderer_resources::MeshData;
use renderer_rhi::sync::MAX_FRAMES_IN_FLIGHT;

use crate::context::RenderContext;
use crate::error::{RendererError, RendererResult};
use crate::frame_manager::{FrameManager, FrameStatus};
use crate::uniforms::{PushModel, ViewProjection};

/// Multi-frame-in-flight deferred renderer.
///
/// # Example
///
/// ```no_run
/// use renderer_core::RendererConfig;
/// use renderer_platform::Window;
/// use renderer_renderer::{FrameStatus, Renderer};
///
/// # fn example(window: &Window) -> Result<(), renderer_renderer::RendererError> {
/// let mut renderer = Renderer::init(window, &RendererConfig::default())?;
/// if renderer.draw()?.needs_recreate() {
///     renderer.recreate_swapchain(window.width(), window.height())?;
/// }
/// renderer.cleanup();
/// # Ok(())
/// # }
/// ```
pub struct Renderer {
    frame_manager: FrameManager,
    context: Option<RenderContext>,
}

impl Renderer {
    /// Creates every GPU object for `window`.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, a missing Vulkan driver or GPU,
    /// missing shader files, or any failed Vulkan call. Objects created
    /// before the failure are destroyed.
    pub fn init(window: &Window, config: &RendererConfig) -> RendererResult<Self> {
        config.validate()?;

        let context = RenderContext::new(window, config).inspect_err(|e| {
            error!("Renderer initialization failed: {}", e);
        })?;
        let frame_manager = FrameManager::new(
            MAX_FRAMES_IN_FLIGHT,
            context.image_count(),
            config.renderer.fixed_command_recording,
        );

        info!("Renderer initialized");
        Ok(Self {
            frame_manager,
            context: Some(context),
        })
    }

    fn context(&mut self) -> RendererResult<&mut RenderContext> {
        self.context.as_mut().ok_or(RendererError::NotInitialized)
    }

    /// Renders and presents one frame.
    ///
    /// Out-of-date and suboptimal swapchains are returned as a status; call
    /// [`recreate_swapchain`](Self::recreate_swapchain) when
    /// [`FrameStatus::needs_recreate`] is true.
    ///
    /// A frame abandoned by a non-fatal error may leave its acquire
    /// semaphore signaled, so later frames report
    /// [`FrameStatus::SwapchainOutOfDate`] until the swapchain is recreated.
    pub fn draw(&mut self) -> RendererResult<FrameStatus> {
        let context = self.context.as_mut().ok_or(RendererError::NotInitialized)?;
        self.frame_manager.draw_frame(context).map_err(|e| {
            error!("Frame {} failed: {}", self.frame_manager.frames_presented(), e);
            self.frame_manager.mark_stale();
            RendererError::from(e)
        })
    }

    /// Rebuilds the swapchain for a new window size. Ignored while the
    /// window is minimized.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            warn!("Skipping swapchain recreation for a {}x{} window", width, height);
            return Ok(());
        }

        // Until recreation succeeds there are no per-image resources to
        // draw with.
        self.frame_manager.mark_stale();
        let context = self.context()?;
        context.recreate(width, height).inspect_err(|e| {
            warn!("Swapchain recreation failed, will retry: {}", e);
        })?;
        let image_count = context.image_count();
        self.frame_manager.reset_images(image_count);
        Ok(())
    }

    /// Loads an image file as a texture and returns its index.
    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> RendererResult<usize> {
        self.context()?.load_texture(path.as_ref())
    }

    /// Loads a glTF file as one model and returns its index.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> RendererResult<usize> {
        self.context()?.load_model(path.as_ref())
    }

    /// Uploads in-memory meshes as one model and returns its index.
    pub fn add_model(&mut self, meshes: Vec<MeshData>) -> RendererResult<usize> {
        self.context()?.add_model(meshes)
    }

    /// Sets a model's transform and tint. Unknown indices are ignored.
    pub fn update_model_data(&mut self, index: usize, transform: Mat4, push: PushModel) {
        if let Some(context) = self.context.as_mut() {
            context.update_model(index, transform, push);
        }
    }

    pub fn set_view_projection(&mut self, view: Mat4, projection: Mat4) {
        if let Some(context) = self.context.as_mut() {
            context.set_view_projection(ViewProjection { projection, view });
        }
    }

    /// Current swapchain extent, zero after cleanup.
    pub fn extent(&self) -> vk::Extent2D {
        self.context
            .as_ref()
            .map(RenderContext::extent)
            .unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Waits for the GPU and destroys everything. Safe to call twice.
    pub fn cleanup(&mut self) {
        if let Some(context) = self.context.take() {
            drop(context);
            info!("Renderer destroyed");
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
