//! The slice of a Vulkan device the renderer needs.
//!
//! Render targets and the frame ring only talk to the GPU through
//! [`GpuDevice`], so they can run against the host's real device
//! ([`crate::AshDevice`]) or a recording fake in tests.

use ash::vk;
use dreamxr_vr::VrResult;

use crate::runtime::GraphicsBinding;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D24_UNORM_S8_UINT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub samples: u32,
    pub usage: vk::ImageUsageFlags,
}

/// Attachments of the eye render pass. With `samples > 1` the pass has a
/// multisampled color attachment, depth, and a single-sample resolve target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: u32,
}

impl RenderPassDesc {
    pub fn has_resolve(&self) -> bool {
        self.samples > 1
    }

    pub fn attachment_count(&self) -> usize {
        if self.has_resolve() {
            3
        } else {
            2
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: Option<vk::Semaphore>,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

pub trait GpuDevice: Send + Sync {
    fn binding(&self) -> GraphicsBinding;

    fn create_image(&self, desc: &ImageDesc) -> VrResult<vk::Image>;
    /// Allocate device-local memory for `image` and bind it.
    fn bind_image_memory(&self, image: vk::Image) -> VrResult<vk::DeviceMemory>;
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VrResult<vk::ImageView>;
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VrResult<vk::RenderPass>;
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VrResult<vk::Framebuffer>;

    fn allocate_command_buffer(&self) -> VrResult<vk::CommandBuffer>;
    fn create_fence(&self, signaled: bool) -> VrResult<vk::Fence>;
    fn create_semaphore(&self) -> VrResult<vk::Semaphore>;

    /// Blocks until `fence` is signaled. No timeout.
    fn wait_for_fence(&self, fence: vk::Fence) -> VrResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VrResult<()>;
    /// Reset and begin one-time recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VrResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VrResult<()>;
    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn queue_submit(&self, submit: &FrameSubmit) -> VrResult<()>;
    fn wait_idle(&self) -> VrResult<()>;

    fn destroy_image(&self, image: vk::Image);
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);
    fn destroy_fence(&self, fence: vk::Fence);
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
}
