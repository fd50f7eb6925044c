//! Renderer configuration loaded from TOML.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! [window]
//! title = "Deferred demo"
//!
//! [renderer]
//! fixed_command_recording = true
//! max_objects = 128
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub window: WindowConfig,
    pub renderer: RenderSettings,
    pub shaders: ShaderPaths,
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Winding order treated as front-facing by the rasterizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindingOrder {
    #[default]
    CounterClockwise,
    Clockwise,
}

/// Settings consumed by the renderer itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Enable the Khronos validation layer. `None` enables it in debug builds.
    pub enable_validation: Option<bool>,
    /// Record command buffers once and replay them every frame.
    pub fixed_command_recording: bool,
    /// Capacity of the per-object dynamic uniform buffer.
    pub max_objects: u32,
    /// Capacity of the texture descriptor pool, including the default texture.
    pub max_textures: u32,
    /// How long a frame fence may stay unsignaled before the device is
    /// considered lost.
    pub fence_timeout_ms: u64,
    pub front_face: WindingOrder,
    pub clear_color: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enable_validation: None,
            fixed_command_recording: false,
            max_objects: 64,
            max_textures: 32,
            fence_timeout_ms: 5_000,
            front_face: WindingOrder::CounterClockwise,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RenderSettings {
    /// Resolve the validation setting against the build type.
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Fence timeout in nanoseconds, as Vulkan expects it.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }
}

/// Pre-compiled SPIR-V files for the two subpasses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderPaths {
    pub geometry_vertex: String,
    pub geometry_fragment: String,
    pub composition_vertex: String,
    pub composition_fragment: String,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            geometry_vertex: "shaders/spirv/geometry.vert.spv".to_string(),
            geometry_fragment: "shaders/spirv/geometry.frag.spv".to_string(),
            composition_vertex: "shaders/spirv/composition.vert.spv".to_string(),
            composition_fragment: "shaders/spirv/composition.frag.spv".to_string(),
        }
    }
}

/// Models loaded at startup. Empty means the built-in demo scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub models: Vec<String>,
}

impl RendererConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|source| Error::ConfigParse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Reject values the renderer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.renderer.max_objects == 0 {
            return Err(Error::Config("max_objects must be at least 1".to_string()));
        }
        // Index 0 is always the default white texture.
        if self.renderer.max_textures < 2 {
            return Err(Error::Config("max_textures must be at least 2".to_string()));
        }
        if self.renderer.fence_timeout_ms == 0 {
            return Err(Error::Config("fence_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.renderer.max_objects, 64);
        assert!(!config.renderer.fixed_command_recording);
    }

    #[test]
    fn test_partial_override() {
        let config = RendererConfig::from_toml_str(
            r#"
            [renderer]
            fixed_command_recording = true
            max_textures = 8
            front_face = "clockwise"

            [scene]
            models = ["assets/models/box.gltf"]
            "#,
        )
        .unwrap();

        assert!(config.renderer.fixed_command_recording);
        assert_eq!(config.renderer.max_textures, 8);
        assert_eq!(config.renderer.max_objects, 64);
        assert_eq!(config.renderer.front_face, WindingOrder::Clockwise);
        assert_eq!(config.scene.models, vec!["assets/models/box.gltf"]);
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = RendererConfig::from_toml_str("[renderer]\nmax_objects = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = RendererConfig::from_toml_str("[renderer\nmax_objects = 1").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_fence_timeout_conversion() {
        let settings = RenderSettings {
            fence_timeout_ms: 2,
            ..Default::default()
        };
        assert_eq!(settings.fence_timeout_ns(), 2_000_000);
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");

        let missing = RendererConfig::load_or_default(&path).unwrap();
        assert_eq!(missing, RendererConfig::default());

        std::fs::write(&path, "[window]\nwidth = 640\nheight = 480\n").unwrap();
        let loaded = RendererConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.window.width, 640);
        assert_eq!(loaded.window.height, 480);
    }
}
