//! Render pass graphs and framebuffers.
//!
//! A [`RenderPassDesc`] is the plain-data form of a render pass: ordered
//! attachments, subpasses referencing them by index, and dependency edges.
//! It is validated before any Vulkan object is created from it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::render_pass::{Framebuffer, RenderPass, RenderPassDesc};
//!
//! # fn example(device: Arc<Device>, views: &[vk::ImageView]) -> Result<(), renderer_rhi::RhiError> {
//! let desc = RenderPassDesc::deferred_composition(
//!     vk::Format::B8G8R8A8_SRGB,
//!     vk::Format::R8G8B8A8_UNORM,
//!     vk::Format::D32_SFLOAT,
//! );
//! let render_pass = RenderPass::new(device.clone(), &desc)?;
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let framebuffer = Framebuffer::new(device, &render_pass, views, extent)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Index of the presentable attachment in the deferred layout.
pub const SWAPCHAIN_ATTACHMENT: u32 = 0;
/// Index of the offscreen color attachment in the deferred layout.
pub const COLOR_ATTACHMENT: u32 = 1;
/// Index of the depth attachment in the deferred layout.
pub const DEPTH_ATTACHMENT: u32 = 2;

/// One attachment of a render pass.
#[derive(Clone, Copy, Debug)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    /// Cleared with a depth value rather than a color.
    pub is_depth: bool,
}

impl AttachmentDesc {
    /// Color attachment: cleared, contents discarded after the pass.
    pub fn color(format: vk::Format) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            is_depth: false,
        }
    }

    /// Swapchain attachment: cleared, stored, handed to presentation.
    pub fn present(format: vk::Format) -> Self {
        Self {
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Self::color(format)
        }
    }

    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            is_depth: true,
        }
    }

    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// Attachment references of one subpass.
#[derive(Clone, Debug, Default)]
pub struct SubpassDesc {
    pub color: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub inputs: Vec<vk::AttachmentReference>,
}

impl SubpassDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, attachment: u32) -> Self {
        self.color.push(vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        self
    }

    pub fn with_depth(mut self, attachment: u32) -> Self {
        self.depth = Some(vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });
        self
    }

    /// Reads `attachment` as a subpass input.
    pub fn with_input(mut self, attachment: u32) -> Self {
        self.inputs.push(vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
        self
    }

    fn references(&self) -> impl Iterator<Item = &vk::AttachmentReference> {
        self.color.iter().chain(self.depth.iter()).chain(&self.inputs)
    }
}

/// Ordered attachments, subpasses and dependency edges.
#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassDesc {
    /// Geometry subpass into an offscreen color + depth pair, then a
    /// composition subpass reading both as inputs and writing the swapchain
    /// image.
    ///
    /// Attachment order is [`SWAPCHAIN_ATTACHMENT`], [`COLOR_ATTACHMENT`],
    /// [`DEPTH_ATTACHMENT`]; framebuffers must supply views in that order.
    pub fn deferred_composition(
        swapchain_format: vk::Format,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Self {
        let attachments = vec![
            AttachmentDesc::present(swapchain_format),
            AttachmentDesc::color(color_format),
            AttachmentDesc::depth(depth_format),
        ];

        let subpasses = vec![
            SubpassDesc::new()
                .with_color(COLOR_ATTACHMENT)
                .with_depth(DEPTH_ATTACHMENT),
            SubpassDesc::new()
                .with_color(SWAPCHAIN_ATTACHMENT)
                .with_input(COLOR_ATTACHMENT)
                .with_input(DEPTH_ATTACHMENT),
        ];

        let dependencies = vec![
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .dst_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                )
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            // The swapchain image is first touched here; its layout
            // transition must wait for the acquire semaphore, which is
            // waited on at COLOR_ATTACHMENT_OUTPUT.
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(1)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(1)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            vk::SubpassDependency::default()
                .src_subpass(1)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        Self {
            attachments,
            subpasses,
            dependencies,
        }
    }

    /// Checks every attachment reference and dependency edge.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidRenderGraph`] describing the first bad
    /// index found.
    pub fn validate(&self) -> RhiResult<()> {
        if self.subpasses.is_empty() {
            return Err(RhiError::InvalidRenderGraph(
                "render pass has no subpasses".to_string(),
            ));
        }

        let attachment_count = self.attachments.len() as u32;
        for (i, subpass) in self.subpasses.iter().enumerate() {
            if let Some(bad) = subpass
                .references()
                .find(|r| r.attachment >= attachment_count)
            {
                return Err(RhiError::InvalidRenderGraph(format!(
                    "subpass {} references attachment {} but only {} exist",
                    i, bad.attachment, attachment_count
                )));
            }
        }

        let subpass_count = self.subpasses.len() as u32;
        let valid = |s: u32| s == vk::SUBPASS_EXTERNAL || s < subpass_count;
        for (i, dep) in self.dependencies.iter().enumerate() {
            if !valid(dep.src_subpass) || !valid(dep.dst_subpass) {
                return Err(RhiError::InvalidRenderGraph(format!(
                    "dependency {} links subpass {} -> {} with {} subpass(es)",
                    i, dep.src_subpass, dep.dst_subpass, subpass_count
                )));
            }
            if dep.src_subpass == vk::SUBPASS_EXTERNAL && dep.dst_subpass == vk::SUBPASS_EXTERNAL
            {
                return Err(RhiError::InvalidRenderGraph(format!(
                    "dependency {} is external on both ends",
                    i
                )));
            }
            if dep.src_subpass != vk::SUBPASS_EXTERNAL
                && dep.dst_subpass != vk::SUBPASS_EXTERNAL
                && dep.src_subpass > dep.dst_subpass
            {
                return Err(RhiError::InvalidRenderGraph(format!(
                    "dependency {} points backwards ({} -> {})",
                    i, dep.src_subpass, dep.dst_subpass
                )));
            }
        }

        Ok(())
    }

    /// Index of the first subpass referencing `attachment`, if any does.
    pub fn first_use(&self, attachment: u32) -> Option<u32> {
        self.subpasses
            .iter()
            .position(|s| s.references().any(|r| r.attachment == attachment))
            .map(|i| i as u32)
    }

    /// One clear value per attachment, depth attachments cleared to 1.0.
    pub fn clear_values(&self, clear_color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.attachments
            .iter()
            .map(|a| {
                if a.is_depth {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 1.0,
                            stencil: 0,
                        },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color,
                        },
                    }
                }
            })
            .collect()
    }
}

/// Vulkan render pass wrapper.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    /// Validates `desc` and creates the render pass.
    pub fn new(device: Arc<Device>, desc: &RenderPassDesc) -> RhiResult<Self> {
        desc.validate()?;

        let attachments: Vec<vk::AttachmentDescription> =
            desc.attachments.iter().map(|a| a.to_vk()).collect();

        let subpasses: Vec<vk::SubpassDescription<'_>> = desc
            .subpasses
            .iter()
            .map(|s| {
                let mut info = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&s.color)
                    .input_attachments(&s.inputs);
                if let Some(depth) = s.depth.as_ref() {
                    info = info.depth_stencil_attachment(depth);
                }
                info
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&desc.dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        debug!(
            "Created render pass: {} attachment(s), {} subpass(es), {} dependency edge(s)",
            attachments.len(),
            subpasses.len(),
            desc.dependencies.len()
        );

        Ok(Self {
            device,
            render_pass,
            desc: desc.clone(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.desc.attachments.len()
    }

    pub fn clear_values(&self, clear_color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.desc.clear_values(clear_color)
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Render pass destroyed");
    }
}

/// Framebuffer binding one view per render pass attachment.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// `views` must be in attachment order.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if views.len() != render_pass.attachment_count() {
            return Err(RhiError::InvalidRenderGraph(format!(
                "framebuffer has {} view(s) for {} attachment(s)",
                views.len(),
                render_pass.attachment_count()
            )));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deferred() -> RenderPassDesc {
        RenderPassDesc::deferred_composition(
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::D32_SFLOAT,
        )
    }

    #[test]
    fn test_deferred_attachments() {
        let desc = deferred();
        assert_eq!(desc.attachments.len(), 3);

        let swapchain = desc.attachments[SWAPCHAIN_ATTACHMENT as usize];
        assert_eq!(swapchain.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(swapchain.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(swapchain.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        let color = desc.attachments[COLOR_ATTACHMENT as usize];
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            color.final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );

        let depth = desc.attachments[DEPTH_ATTACHMENT as usize];
        assert!(depth.is_depth);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_deferred_subpasses() {
        let desc = deferred();
        assert_eq!(desc.subpasses.len(), 2);

        let geometry = &desc.subpasses[0];
        assert_eq!(geometry.color[0].attachment, COLOR_ATTACHMENT);
        assert_eq!(geometry.depth.map(|d| d.attachment), Some(DEPTH_ATTACHMENT));
        assert!(geometry.inputs.is_empty());

        let composition = &desc.subpasses[1];
        assert_eq!(composition.color[0].attachment, SWAPCHAIN_ATTACHMENT);
        assert!(composition.depth.is_none());
        let inputs: Vec<u32> = composition.inputs.iter().map(|r| r.attachment).collect();
        assert_eq!(inputs, vec![COLOR_ATTACHMENT, DEPTH_ATTACHMENT]);
        assert!(
            composition
                .inputs
                .iter()
                .all(|r| r.layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn test_deferred_dependencies() {
        let desc = deferred();
        let deps = &desc.dependencies;
        assert_eq!(deps.len(), 4);

        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, 0);
        assert!(
            deps[0]
                .dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );

        assert_eq!(deps[1].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[1].dst_subpass, 1);

        assert_eq!((deps[2].src_subpass, deps[2].dst_subpass), (0, 1));
        assert_eq!(deps[2].dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(deps[2].dst_access_mask, vk::AccessFlags::INPUT_ATTACHMENT_READ);
        assert!(deps[2].dependency_flags.contains(vk::DependencyFlags::BY_REGION));

        assert_eq!(deps[3].src_subpass, 1);
        assert_eq!(deps[3].dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[3].dst_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_every_attachment_is_gated_where_first_used() {
        let desc = deferred();
        for attachment in 0..desc.attachments.len() as u32 {
            let first = desc.first_use(attachment).unwrap();
            let gate = desc
                .dependencies
                .iter()
                .find(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass == first)
                .unwrap_or_else(|| {
                    panic!("attachment {attachment} first used in subpass {first} has no external edge")
                });
            assert!(
                gate.dst_access_mask.intersects(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                )
            );
        }
    }

    #[test]
    fn test_swapchain_transition_waits_for_acquire_stage() {
        let desc = deferred();
        assert_eq!(desc.first_use(SWAPCHAIN_ATTACHMENT), Some(1));
        let gate = desc
            .dependencies
            .iter()
            .find(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass == 1)
            .unwrap();
        assert!(
            gate.src_stage_mask
                .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        );
        assert!(
            gate.dst_stage_mask
                .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        );
    }

    #[test]
    fn test_first_use_of_unreferenced_attachment() {
        assert_eq!(deferred().first_use(7), None);
    }

    #[test]
    fn test_deferred_validates() {
        assert!(deferred().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_attachment() {
        let mut desc = deferred();
        desc.subpasses[1] = SubpassDesc::new().with_color(0).with_input(3);
        assert!(matches!(
            desc.validate(),
            Err(RhiError::InvalidRenderGraph(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_dependency() {
        let mut desc = deferred();
        desc.dependencies[2].dst_subpass = 2;
        assert!(desc.validate().is_err());

        let mut desc = deferred();
        desc.dependencies[2] = desc.dependencies[2].src_subpass(1).dst_subpass(0);
        assert!(desc.validate().is_err());

        let mut desc = deferred();
        desc.dependencies[0].dst_subpass = vk::SUBPASS_EXTERNAL;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(RenderPassDesc::default().validate().is_err());
    }

    #[test]
    fn test_clear_values_follow_attachment_kind() {
        let desc = deferred();
        let clears = desc.clear_values([0.1, 0.2, 0.3, 1.0]);
        assert_eq!(clears.len(), 3);
        unsafe {
            assert_eq!(clears[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(clears[1].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(clears[2].depth_stencil.depth, 1.0);
        }
    }
}
