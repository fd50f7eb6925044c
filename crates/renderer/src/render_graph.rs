//! The deferred render pass and the two pipelines drawing into it.
//!
//! Subpass 0 (geometry) rasterizes every mesh into an offscreen color
//! attachment and a depth attachment. Subpass 1 (composition) reads both as
//! input attachments and draws a fullscreen triangle into the swapchain
//! image.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use renderer_core::config::{ShaderPaths, WindingOrder};
use renderer_rhi::RhiResult;
use renderer_rhi::device::Device;
use renderer_rhi::pipeline::{
    BlendMode, CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
};
use renderer_rhi::render_pass::{RenderPass, RenderPassDesc};
use renderer_rhi::shader::{Shader, ShaderStage};
use renderer_rhi::vertex::Vertex;

use crate::descriptors::DescriptorLayouts;
use crate::uniforms::PushModel;

pub const GEOMETRY_SUBPASS: u32 = 0;
pub const COMPOSITION_SUBPASS: u32 = 1;

/// Format of the offscreen color attachment written by the geometry subpass.
pub const OFFSCREEN_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const SHADER_ENTRY: &str = "main";

/// Push constant range of the geometry pipeline: one [`PushModel`] for the
/// vertex stage.
pub fn geometry_push_range() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: PushModel::SIZE as u32,
    }
}

/// Rasterizer front face for the configured winding order.
pub fn front_face(winding: WindingOrder) -> FrontFace {
    match winding {
        WindingOrder::CounterClockwise => FrontFace::CounterClockwise,
        WindingOrder::Clockwise => FrontFace::Clockwise,
    }
}

/// Render pass, pipeline layouts and pipelines. Depends on the swapchain
/// format but not on its extent.
pub struct RenderGraph {
    geometry_pipeline: Pipeline,
    composition_pipeline: Pipeline,
    geometry_layout: PipelineLayout,
    composition_layout: PipelineLayout,
    render_pass: RenderPass,
    swapchain_format: vk::Format,
    depth_format: vk::Format,
}

impl RenderGraph {
    /// Builds the render pass and both pipelines.
    ///
    /// # Errors
    ///
    /// Fails when a shader file is missing or invalid, the render pass
    /// description does not validate, or pipeline creation fails.
    pub fn new(
        device: &Arc<Device>,
        swapchain_format: vk::Format,
        depth_format: vk::Format,
        layouts: &DescriptorLayouts,
        shaders: &ShaderPaths,
        winding: WindingOrder,
    ) -> RhiResult<Self> {
        let desc = RenderPassDesc::deferred_composition(
            swapchain_format,
            OFFSCREEN_COLOR_FORMAT,
            depth_format,
        );
        let render_pass = RenderPass::new(device.clone(), &desc)?;

        let geometry_layout = PipelineLayout::new(
            device.clone(),
            &[layouts.uniforms.handle(), layouts.texture.handle()],
            &[geometry_push_range()],
        )?;
        let composition_layout =
            PipelineLayout::new(device.clone(), &[layouts.inputs.handle()], &[])?;

        let load = |path: &str, stage| {
            Shader::from_spirv_file(device.clone(), Path::new(path), stage, SHADER_ENTRY)
        };

        let geometry_pipeline = {
            let vert = load(&shaders.geometry_vertex, ShaderStage::Vertex)?;
            let frag = load(&shaders.geometry_fragment, ShaderStage::Fragment)?;
            GraphicsPipelineBuilder::new()
                .vertex_shader(&vert)
                .fragment_shader(&frag)
                .vertex_binding(Vertex::binding_description())
                .vertex_attributes(&Vertex::attribute_descriptions())
                .cull_mode(CullMode::Back)
                .front_face(front_face(winding))
                .depth(true, true)
                .blend(BlendMode::Alpha)
                .render_pass(&render_pass, GEOMETRY_SUBPASS)
                .build(device.clone(), &geometry_layout)?
        };

        // Fullscreen triangle generated from gl_VertexIndex, no vertex input.
        let composition_pipeline = {
            let vert = load(&shaders.composition_vertex, ShaderStage::Vertex)?;
            let frag = load(&shaders.composition_fragment, ShaderStage::Fragment)?;
            GraphicsPipelineBuilder::new()
                .vertex_shader(&vert)
                .fragment_shader(&frag)
                .cull_mode(CullMode::None)
                .depth(false, false)
                .blend(BlendMode::Opaque)
                .render_pass(&render_pass, COMPOSITION_SUBPASS)
                .build(device.clone(), &composition_layout)?
        };

        info!(
            "Render graph built: swapchain {:?}, offscreen {:?}, depth {:?}",
            swapchain_format, OFFSCREEN_COLOR_FORMAT, depth_format
        );

        Ok(Self {
            geometry_pipeline,
            composition_pipeline,
            geometry_layout,
            composition_layout,
            render_pass,
            swapchain_format,
            depth_format,
        })
    }

    #[inline]
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    #[inline]
    pub fn geometry_pipeline(&self) -> &Pipeline {
        &self.geometry_pipeline
    }

    #[inline]
    pub fn geometry_layout(&self) -> &PipelineLayout {
        &self.geometry_layout
    }

    #[inline]
    pub fn composition_pipeline(&self) -> &Pipeline {
        &self.composition_pipeline
    }

    #[inline]
    pub fn composition_layout(&self) -> &PipelineLayout {
        &self.composition_layout
    }

    #[inline]
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain_format
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_range_covers_push_model() {
        let range = geometry_push_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size as usize, std::mem::size_of::<PushModel>());
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_front_face_follows_winding() {
        assert_eq!(
            front_face(WindingOrder::CounterClockwise).to_vk(),
            vk::FrontFace::COUNTER_CLOCKWISE
        );
        assert_eq!(
            front_face(WindingOrder::Clockwise).to_vk(),
            vk::FrontFace::CLOCKWISE
        );
    }

    #[test]
    fn test_deferred_graph_validates_with_offscreen_format() {
        let desc = RenderPassDesc::deferred_composition(
            vk::Format::B8G8R8A8_SRGB,
            OFFSCREEN_COLOR_FORMAT,
            vk::Format::D32_SFLOAT,
        );
        assert!(desc.validate().is_ok());
        assert_eq!(desc.subpasses.len(), (COMPOSITION_SUBPASS + 1) as usize);
    }
}
