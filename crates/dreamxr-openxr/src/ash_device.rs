use std::sync::Mutex;

use ash::vk::{self, Handle};
use dreamxr_vr::{VrError, VrResult};
use tracing::{debug, info, warn};

use crate::gpu::{FrameSubmit, GpuDevice, ImageDesc, RenderPassBegin, RenderPassDesc};
use crate::runtime::GraphicsBinding;

/// [`GpuDevice`] over the host's Vulkan device. The instance and device stay
/// owned by the host; only the command pool is created (and destroyed) here.
pub struct AshDevice {
    // Keeps the loader alive for the function tables below.
    _entry: ash::Entry,
    device: ash::Device,
    binding: GraphicsBinding,
    queue: vk::Queue,
    // Command pools must be externally synchronized.
    command_pool: Mutex<vk::CommandPool>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl AshDevice {
    /// # Safety
    ///
    /// `binding` must name a live instance, physical device and device
    /// created by the host, and they must outlive the returned value.
    pub unsafe fn from_binding(binding: GraphicsBinding) -> VrResult<Self> {
        if binding.instance == vk::Instance::null() || binding.device == vk::Device::null() {
            return Err(VrError::Init("null Vulkan handles from host".to_string()));
        }
        let entry = ash::Entry::load()
            .map_err(|e| VrError::Init(format!("Vulkan entry load failed: {e}")))?;
        let instance = ash::Instance::load(entry.static_fn(), binding.instance);
        let device = ash::Device::load(instance.fp_v1_0(), binding.device);
        let queue = device.get_device_queue(binding.queue_family_index, binding.queue_index);
        let memory_properties =
            instance.get_physical_device_memory_properties(binding.physical_device);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(binding.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = device
            .create_command_pool(&pool_info, None)
            .map_err(|e| VrError::Init(format!("Vulkan command pool create failed: {e}")))?;

        info!(
            queue_family = binding.queue_family_index,
            queue_index = binding.queue_index,
            "bound host Vulkan device"
        );
        Ok(Self {
            _entry: entry,
            device,
            binding,
            queue,
            command_pool: Mutex::new(command_pool),
            memory_properties,
        })
    }

    fn pool(&self) -> std::sync::MutexGuard<'_, vk::CommandPool> {
        match self.command_pool.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> Option<u32> {
        let mem = &self.memory_properties;
        (0..mem.memory_type_count).find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
    }
}

fn sample_count(samples: u32) -> vk::SampleCountFlags {
    vk::SampleCountFlags::from_raw(samples.max(1))
}

impl GpuDevice for AshDevice {
    fn binding(&self) -> GraphicsBinding {
        self.binding
    }

    fn create_image(&self, desc: &ImageDesc) -> VrResult<vk::Image> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(sample_count(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe { self.device.create_image(&info, None) }
            .map_err(|e| VrError::Resource(format!("Vulkan image create failed: {e}")))
    }

    fn bind_image_memory(&self, image: vk::Image) -> VrResult<vk::DeviceMemory> {
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory_type = self
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .ok_or_else(|| VrError::Resource("no device-local memory type".to_string()))?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None) }
            .map_err(|e| VrError::Resource(format!("Vulkan memory alloc failed: {e}")))?;
        if let Err(e) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(VrError::Resource(format!("Vulkan bind image memory failed: {e}")));
        }
        Ok(memory)
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VrResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&info, None) }
            .map_err(|e| VrError::Resource(format!("Vulkan image view create failed: {e}")))
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VrResult<vk::RenderPass> {
        let samples = sample_count(desc.samples);
        let color = vk::AttachmentDescription::builder()
            .format(desc.color_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();
        let depth = vk::AttachmentDescription::builder()
            .format(desc.depth_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();
        let resolve = vk::AttachmentDescription::builder()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_ref = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);
        if desc.has_resolve() {
            subpass = subpass.resolve_attachments(&resolve_ref);
        }
        let subpasses = [subpass.build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let all = [color, depth, resolve];
        let attachments = &all[..desc.attachment_count()];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { self.device.create_render_pass(&info, None) }
            .map_err(|e| VrError::Resource(format!("Vulkan render pass create failed: {e}")))
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VrResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&info, None) }
            .map_err(|e| VrError::Resource(format!("Vulkan framebuffer create failed: {e}")))
    }

    fn allocate_command_buffer(&self) -> VrResult<vk::CommandBuffer> {
        let pool = self.pool();
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| VrError::Resource(format!("Vulkan command buffer alloc failed: {e}")))?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| VrError::Resource("Vulkan returned no command buffer".to_string()))
    }

    fn create_fence(&self, signaled: bool) -> VrResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
            .map_err(|e| VrError::Resource(format!("Vulkan fence create failed: {e}")))
    }

    fn create_semaphore(&self) -> VrResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&info, None) }
            .map_err(|e| VrError::Resource(format!("Vulkan semaphore create failed: {e}")))
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VrResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| VrError::Runtime(format!("Vulkan fence wait failed: {e}")))
    }

    fn reset_fence(&self, fence: vk::Fence) -> VrResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
            .map_err(|e| VrError::Runtime(format!("Vulkan fence reset failed: {e}")))
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VrResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| VrError::Runtime(format!("Vulkan command buffer reset failed: {e}")))?;
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| VrError::Runtime(format!("Vulkan command buffer begin failed: {e}")))
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VrResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
            .map_err(|e| VrError::Runtime(format!("Vulkan command buffer end failed: {e}")))
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: begin.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
            vk::ClearValue::default(),
        ];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) };
    }

    fn queue_submit(&self, submit: &FrameSubmit) -> VrResult<()> {
        let command_buffers = [submit.command_buffer];
        let wait_semaphores: Vec<vk::Semaphore> = submit.wait_semaphore.into_iter().collect();
        let wait_stages = vec![submit.wait_stage; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = submit.signal_semaphore.into_iter().collect();
        let info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe { self.device.queue_submit(self.queue, &[info], submit.fence) }
            .map_err(|e| VrError::Runtime(format!("Vulkan queue submit failed: {e}")))
    }

    fn wait_idle(&self) -> VrResult<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| VrError::Runtime(format!("Vulkan device wait idle failed: {e}")))
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let pool = self.pool();
        unsafe { self.device.free_command_buffers(*pool, &[command_buffer]) };
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            warn!("releasing device without idle: {err}");
        }
        let pool = *self.pool();
        unsafe {
            if pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(pool, None);
            }
        }
        debug!(device = self.binding.device.as_raw(), "released host Vulkan device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_binding_rejected_before_loading_vulkan() {
        let binding = GraphicsBinding {
            instance: vk::Instance::null(),
            physical_device: vk::PhysicalDevice::null(),
            device: vk::Device::null(),
            queue_family_index: 0,
            queue_index: 0,
        };
        let err = unsafe { AshDevice::from_binding(binding) }.err();
        assert!(matches!(err, Some(VrError::Init(_))));
    }

    #[test]
    fn test_sample_count_floors_at_one() {
        assert_eq!(sample_count(0), vk::SampleCountFlags::TYPE_1);
        assert_eq!(sample_count(4), vk::SampleCountFlags::TYPE_4);
    }
}
