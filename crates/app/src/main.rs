//! Vulkan Renderer - Main Entry Point
//!
//! Opens a window, loads the models listed in `renderer.toml` (or two demo
//! quads) and spins them. Pass another config path as the first argument.

use std::path::PathBuf;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::window::WindowId;

use renderer_core::{RendererConfig, Timer};
use renderer_platform::{
    ActiveEventLoop, ControlFlow, EventLoop, KeyCode, PhysicalKey, Window, WindowEvent,
};
use renderer_renderer::{PushModel, Renderer, ViewProjection};
use renderer_resources::MeshData;

const DEFAULT_CONFIG: &str = "renderer.toml";

struct App {
    config: RendererConfig,
    // Dropped before the window: the surface must not outlive it.
    renderer: Option<Renderer>,
    window: Option<Window>,
    models: Vec<usize>,
    timer: Timer,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            models: Vec::new(),
            timer: Timer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let mut renderer = Renderer::init(&window, &self.config)?;

        if self.config.scene.models.is_empty() {
            let quads = [
                MeshData::quad(Vec3::new(-0.4, 0.0, 0.0), 0.5, Vec3::new(1.0, 0.3, 0.2)),
                MeshData::quad(Vec3::new(0.4, 0.0, -0.5), 0.5, Vec3::new(0.2, 0.5, 1.0)),
            ];
            for quad in quads {
                self.models.push(renderer.add_model(vec![quad])?);
            }
        } else {
            for path in &self.config.scene.models {
                let index = renderer
                    .load_model(path)
                    .with_context(|| format!("loading model {}", path))?;
                self.models.push(index);
            }
        }

        let aspect = window.aspect_ratio();
        let camera = ViewProjection::look_at(Vec3::new(0.0, 0.5, 3.0), aspect);
        renderer.set_view_projection(camera.view, camera.projection);

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn recreate(&mut self) {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return;
        };
        if window.is_minimized() {
            return;
        }
        match renderer.recreate_swapchain(window.width(), window.height()) {
            Ok(()) => {
                let camera =
                    ViewProjection::look_at(Vec3::new(0.0, 0.5, 3.0), window.aspect_ratio());
                renderer.set_view_projection(camera.view, camera.projection);
            }
            Err(e) => error!("Swapchain recreation failed: {}", e),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.as_ref().is_none_or(Window::is_minimized) {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let t = self.timer.elapsed_secs();
        let count = self.models.len().max(1) as f32;
        for (i, &index) in self.models.iter().enumerate() {
            let phase = i as f32 / count * std::f32::consts::TAU;
            let transform = Mat4::from_rotation_y(t * 0.8 + phase);
            renderer.update_model_data(index, transform, PushModel::default());
        }

        match renderer.draw() {
            Ok(status) if status.needs_recreate() => self.recreate(),
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                error!("Fatal render error: {}", e);
                event_loop.exit();
            }
            Err(e) => error!("Render error: {}", e),
        }

        if let (_, Some(fps)) = self.timer.frame() {
            info!("{:.1} fps", fps);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            error!("Failed to initialize: {:#}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                self.recreate();
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.cleanup();
        }
    }
}

fn main() -> Result<()> {
    renderer_core::init_logging();
    info!("Starting Vulkan Renderer");

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = RendererConfig::load_or_default(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    if config.scene.models.is_empty() {
        warn!("No models configured, showing the demo scene");
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
