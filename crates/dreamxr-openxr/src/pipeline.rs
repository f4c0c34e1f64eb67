//! Frame Pipeline Coordinator: a two-slot ring of command buffers, fences
//! and semaphores.
//!
//! Slot `i` is only re-recorded after its fence has been observed signaled,
//! which caps outstanding GPU work at [`FRAMES_IN_FLIGHT`] frames.

use std::sync::Arc;

use ash::vk;
use dreamxr_vr::{Fov, Pose, VrError, VrResult};
use tracing::{trace, warn};

use crate::gpu::{FrameSubmit, GpuDevice, RenderPassBegin};
use crate::projection::{EyeMatrices, DEFAULT_NEAR_PLANE};
use crate::targets::RenderTargets;

pub const FRAMES_IN_FLIGHT: usize = 2;

/// Records the scene for one eye inside an already-begun render pass.
pub trait SceneRenderer {
    /// Returns the number of draw calls recorded.
    fn draw_eye(&mut self, command_buffer: vk::CommandBuffer, eye: usize, matrices: &EyeMatrices)
        -> u32;
}

/// Renders nothing; the pass still clears the targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClearOnly;

impl SceneRenderer for ClearOnly {
    fn draw_eye(&mut self, _: vk::CommandBuffer, _: usize, _: &EyeMatrices) -> u32 {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlightFrame {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    semaphore: vk::Semaphore,
    // Set once a submit has signaled `semaphore`; the next use of the slot
    // waits on it.
    semaphore_signaled: bool,
}

impl InFlightFrame {
    fn empty() -> Self {
        Self {
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            semaphore: vk::Semaphore::null(),
            semaphore_signaled: false,
        }
    }
}

pub struct FramePipeline<G: GpuDevice> {
    gpu: Arc<G>,
    frames: [InFlightFrame; FRAMES_IN_FLIGHT],
    frame_counter: u64,
    recording: bool,
    draw_calls: u32,
    near_plane: f32,
}

impl<G: GpuDevice> FramePipeline<G> {
    pub fn new(gpu: Arc<G>) -> VrResult<Self> {
        let mut pipeline = Self {
            gpu,
            frames: [InFlightFrame::empty(); FRAMES_IN_FLIGHT],
            frame_counter: 0,
            recording: false,
            draw_calls: 0,
            near_plane: DEFAULT_NEAR_PLANE,
        };
        for i in 0..FRAMES_IN_FLIGHT {
            let frame = &mut pipeline.frames[i];
            frame.command_buffer = pipeline.gpu.allocate_command_buffer()?;
            // Signaled so the first wait on each slot returns immediately.
            frame.fence = pipeline.gpu.create_fence(true)?;
            frame.semaphore = pipeline.gpu.create_semaphore()?;
        }
        Ok(pipeline)
    }

    pub fn with_near_plane(mut self, near: f32) -> Self {
        self.near_plane = near;
        self
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % FRAMES_IN_FLIGHT as u64) as usize
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn draw_calls(&self) -> u32 {
        self.draw_calls
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.frames[self.current_slot()].command_buffer
    }

    pub fn begin_frame(&mut self) -> VrResult<()> {
        if self.recording {
            return Err(VrError::Protocol(
                "begin_frame while a frame is recording".to_string(),
            ));
        }
        let slot = self.current_slot();
        if self.frames[slot].fence == vk::Fence::null() {
            self.frames[slot].fence = self.gpu.create_fence(true)?;
        }
        let frame = self.frames[slot];
        self.gpu.wait_for_fence(frame.fence)?;
        self.gpu.reset_fence(frame.fence)?;
        if let Err(err) = self.gpu.begin_command_buffer(frame.command_buffer) {
            self.recover_fence(slot);
            return Err(err);
        }
        self.recording = true;
        self.draw_calls = 0;
        trace!(frame = self.frame_counter, slot, "frame begun");
        Ok(())
    }

    /// Record one eye into the framebuffer of swapchain image `image_index`.
    /// Eyes other than 0 and 1 are ignored.
    pub fn render_eye(
        &mut self,
        targets: &RenderTargets<G>,
        eye: usize,
        image_index: u32,
        pose: &Pose,
        fov: &Fov,
        scene: &mut dyn SceneRenderer,
    ) -> VrResult<()> {
        if !self.recording {
            return Err(VrError::Protocol(
                "render_eye outside begin_frame/end_frame".to_string(),
            ));
        }
        if eye > 1 {
            return Ok(());
        }
        let framebuffer = targets
            .framebuffer(eye, image_index as usize)
            .ok_or_else(|| {
                VrError::Resource(format!("no framebuffer for eye {eye} image {image_index}"))
            })?;

        let command_buffer = self.command_buffer();
        self.gpu.cmd_begin_render_pass(
            command_buffer,
            &RenderPassBegin {
                render_pass: targets.render_pass(),
                framebuffer,
                extent: targets.extent(),
                clear_color: targets.settings().clear_color,
            },
        );
        let matrices = EyeMatrices::new(pose, fov, self.near_plane);
        self.draw_calls += scene.draw_eye(command_buffer, eye, &matrices);
        self.gpu.cmd_end_render_pass(command_buffer);
        Ok(())
    }

    /// Submit the slot's work and advance the ring. Does not wait for the GPU.
    pub fn end_frame(&mut self) -> VrResult<()> {
        if !self.recording {
            return Err(VrError::Protocol(
                "end_frame without begin_frame".to_string(),
            ));
        }
        let slot = self.current_slot();
        let frame = self.frames[slot];
        self.recording = false;

        let submitted = self
            .gpu
            .end_command_buffer(frame.command_buffer)
            .and_then(|()| {
                self.gpu.queue_submit(&FrameSubmit {
                    command_buffer: frame.command_buffer,
                    wait_semaphore: frame.semaphore_signaled.then_some(frame.semaphore),
                    wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    signal_semaphore: Some(frame.semaphore),
                    fence: frame.fence,
                })
            });
        if let Err(err) = submitted {
            self.recover_fence(slot);
            self.frame_counter += 1;
            return Err(err);
        }

        self.frames[slot].semaphore_signaled = true;
        self.frame_counter += 1;
        Ok(())
    }

    /// Close a frame that failed mid-recording. The slot's fence is
    /// re-armed so the next use of the slot does not block forever.
    pub fn abort_frame(&mut self) {
        if !self.recording {
            return;
        }
        let slot = self.current_slot();
        warn!(frame = self.frame_counter, slot, "aborting frame");
        self.recording = false;
        if let Err(err) = self.gpu.end_command_buffer(self.frames[slot].command_buffer) {
            warn!("end_command_buffer during abort failed: {err}");
        }
        self.recover_fence(slot);
        self.frame_counter += 1;
    }

    // The fence was reset in begin_frame and never submitted, so swap in a
    // fresh signaled one.
    fn recover_fence(&mut self, slot: usize) {
        let old = self.frames[slot].fence;
        if old != vk::Fence::null() {
            self.gpu.destroy_fence(old);
        }
        match self.gpu.create_fence(true) {
            Ok(fence) => self.frames[slot].fence = fence,
            Err(err) => {
                warn!(slot, "could not re-arm frame fence: {err}");
                self.frames[slot].fence = vk::Fence::null();
            }
        }
    }
}

impl<G: GpuDevice> Drop for FramePipeline<G> {
    fn drop(&mut self) {
        for frame in &self.frames {
            if frame.fence != vk::Fence::null() {
                self.gpu.destroy_fence(frame.fence);
            }
            if frame.semaphore != vk::Semaphore::null() {
                self.gpu.destroy_semaphore(frame.semaphore);
            }
            if frame.command_buffer != vk::CommandBuffer::null() {
                self.gpu.free_command_buffer(frame.command_buffer);
            }
        }
    }
}
