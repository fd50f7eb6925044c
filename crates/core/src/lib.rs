//! Core utilities for the Vulkan renderer.
//!
//! This crate provides foundational types shared by every other crate:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - TOML configuration

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    RenderSettings, RendererConfig, SceneConfig, ShaderPaths, WindingOrder, WindowConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
