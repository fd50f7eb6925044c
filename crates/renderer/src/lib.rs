//! Multi-frame-in-flight deferred renderer.
//!
//! This crate builds on `renderer_rhi`:
//! - [`render_graph`]: the two-subpass render pass and its pipelines
//! - [`descriptors`] and [`uniforms`]: set layouts, pools and uniform blocks
//! - [`mesh`]: GPU meshes and the fixed-capacity model table
//! - [`frame_manager`]: the per-frame synchronization state machine
//! - [`Renderer`]: the facade tying them together

mod context;
mod error;
mod renderer;

pub mod descriptors;
pub mod frame_manager;
pub mod mesh;
pub mod render_graph;
pub mod uniforms;

pub use error::{RendererError, RendererResult};
pub use frame_manager::{FrameManager, FrameStatus};
pub use renderer::Renderer;
pub use uniforms::{PushModel, ViewProjection};
