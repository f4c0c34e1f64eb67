//! Render Target Manager: MSAA color, depth, render pass and per-eye
//! framebuffers over runtime-owned swapchain images.

use std::sync::Arc;

use ash::vk;
use dreamxr_vr::{VrError, VrResult};
use tracing::{debug, info};

use crate::gpu::{GpuDevice, ImageDesc, RenderPassDesc, DEPTH_FORMAT};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetSettings {
    pub msaa_samples: u32,
    pub multiview: bool,
    pub foveated: bool,
    pub clear_color: [f32; 4],
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            msaa_samples: 4,
            multiview: false,
            foveated: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

fn resource(err: VrError) -> VrError {
    match err {
        VrError::Resource(_) => err,
        other => VrError::Resource(other.to_string()),
    }
}

/// Owns everything it creates and releases it on drop, including after a
/// failed [`RenderTargets::create`]. Swapchain images and views are only
/// referenced.
pub struct RenderTargets<G: GpuDevice> {
    gpu: Arc<G>,
    extent: vk::Extent2D,
    color_format: vk::Format,
    settings: TargetSettings,
    image_count: usize,
    color_image: vk::Image,
    color_memory: vk::DeviceMemory,
    color_view: vk::ImageView,
    depth_image: vk::Image,
    depth_memory: vk::DeviceMemory,
    depth_view: vk::ImageView,
    render_pass: vk::RenderPass,
    framebuffers: [Vec<vk::Framebuffer>; 2],
}

impl<G: GpuDevice> RenderTargets<G> {
    pub fn create(
        gpu: Arc<G>,
        width: u32,
        height: u32,
        image_count: usize,
        color_format: vk::Format,
        settings: TargetSettings,
    ) -> VrResult<Self> {
        if width == 0 || height == 0 || image_count == 0 {
            return Err(VrError::Resource(format!(
                "invalid target geometry {width}x{height} with {image_count} images"
            )));
        }
        let mut targets = Self {
            gpu,
            extent: vk::Extent2D { width, height },
            color_format,
            settings,
            image_count,
            color_image: vk::Image::null(),
            color_memory: vk::DeviceMemory::null(),
            color_view: vk::ImageView::null(),
            depth_image: vk::Image::null(),
            depth_memory: vk::DeviceMemory::null(),
            depth_view: vk::ImageView::null(),
            render_pass: vk::RenderPass::null(),
            framebuffers: [
                vec![vk::Framebuffer::null(); image_count],
                vec![vk::Framebuffer::null(); image_count],
            ],
        };
        targets.allocate().map_err(resource)?;
        info!(
            width,
            height,
            image_count,
            samples = settings.msaa_samples,
            "render targets created"
        );
        Ok(targets)
    }

    fn allocate(&mut self) -> VrResult<()> {
        let samples = self.settings.msaa_samples;

        if samples > 1 {
            self.color_image = self.gpu.create_image(&ImageDesc {
                width: self.extent.width,
                height: self.extent.height,
                format: self.color_format,
                samples,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            })?;
            self.color_memory = self.gpu.bind_image_memory(self.color_image)?;
            self.color_view = self.gpu.create_image_view(
                self.color_image,
                self.color_format,
                vk::ImageAspectFlags::COLOR,
            )?;
        }

        self.depth_image = self.gpu.create_image(&ImageDesc {
            width: self.extent.width,
            height: self.extent.height,
            format: DEPTH_FORMAT,
            samples,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        })?;
        self.depth_memory = self.gpu.bind_image_memory(self.depth_image)?;
        self.depth_view = self.gpu.create_image_view(
            self.depth_image,
            DEPTH_FORMAT,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        )?;

        self.render_pass = self.gpu.create_render_pass(&self.render_pass_desc())?;
        Ok(())
    }

    pub fn render_pass_desc(&self) -> RenderPassDesc {
        RenderPassDesc {
            color_format: self.color_format,
            depth_format: DEPTH_FORMAT,
            samples: self.settings.msaa_samples,
        }
    }

    /// Build the framebuffer for swapchain image `index` of `eye`.
    pub fn set_swapchain_image(
        &mut self,
        eye: usize,
        index: usize,
        image: vk::Image,
        view: vk::ImageView,
    ) -> VrResult<()> {
        if eye > 1 || index >= self.image_count {
            return Err(VrError::Resource(format!(
                "swapchain slot eye={eye} index={index} outside {} images",
                self.image_count
            )));
        }
        if image == vk::Image::null() || view == vk::ImageView::null() {
            return Err(VrError::Resource("null swapchain image".to_string()));
        }

        let attachments: Vec<vk::ImageView> = if self.settings.msaa_samples > 1 {
            vec![self.color_view, self.depth_view, view]
        } else {
            vec![view, self.depth_view]
        };
        let framebuffer = self
            .gpu
            .create_framebuffer(self.render_pass, &attachments, self.extent)
            .map_err(resource)?;

        let slot = &mut self.framebuffers[eye][index];
        if *slot != vk::Framebuffer::null() {
            self.gpu.destroy_framebuffer(*slot);
        }
        *slot = framebuffer;
        debug!(eye, index, "swapchain image bound");
        Ok(())
    }

    pub fn framebuffer(&self, eye: usize, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers
            .get(eye)?
            .get(index)
            .copied()
            .filter(|fb| *fb != vk::Framebuffer::null())
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn settings(&self) -> TargetSettings {
        self.settings
    }
}

impl<G: GpuDevice> Drop for RenderTargets<G> {
    fn drop(&mut self) {
        for fb in self.framebuffers.iter().flatten() {
            if *fb != vk::Framebuffer::null() {
                self.gpu.destroy_framebuffer(*fb);
            }
        }
        if self.render_pass != vk::RenderPass::null() {
            self.gpu.destroy_render_pass(self.render_pass);
        }
        if self.depth_view != vk::ImageView::null() {
            self.gpu.destroy_image_view(self.depth_view);
        }
        if self.depth_image != vk::Image::null() {
            self.gpu.destroy_image(self.depth_image);
        }
        if self.depth_memory != vk::DeviceMemory::null() {
            self.gpu.free_memory(self.depth_memory);
        }
        if self.color_view != vk::ImageView::null() {
            self.gpu.destroy_image_view(self.color_view);
        }
        if self.color_image != vk::Image::null() {
            self.gpu.destroy_image(self.color_image);
        }
        if self.color_memory != vk::DeviceMemory::null() {
            self.gpu.free_memory(self.color_memory);
        }
    }
}
