//! Boundary to the XR runtime.
//!
//! [`crate::VrSession`] drives an [`XrRuntime`] through the session
//! lifecycle and the per-frame bracket. The OpenXR implementation lives in
//! [`crate::xr_backend`]; tests substitute a scripted runtime.

use std::ffi::c_void;

use ash::vk;
use dreamxr_vr::{ControllerPair, Eye, Fov, Pose, VrResult};

/// Android handles forwarded from the host activity. Null on other platforms.
#[derive(Debug, Clone, Copy)]
pub struct HostContext {
    pub java_vm: *mut c_void,
    pub activity: *mut c_void,
}

impl Default for HostContext {
    fn default() -> Self {
        Self {
            java_vm: std::ptr::null_mut(),
            activity: std::ptr::null_mut(),
        }
    }
}

/// The host's already-created Vulkan device that the session binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsBinding {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfig {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

/// Per-eye swapchains. The images belong to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainSet {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: [Vec<vk::Image>; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// The runtime is ready for the session to begin.
    Ready,
    Stopping,
    Exiting,
    LossPending,
    FocusChanged(bool),
}

/// Result of one frame wait. Valid until handed back to
/// [`XrRuntime::end_frame`], which consumes it.
#[derive(Debug)]
pub struct FrameTiming {
    /// Nanoseconds on the runtime's monotonic clock.
    pub predicted_display_time: i64,
    pub predicted_display_period: i64,
    pub should_render: bool,
}

impl FrameTiming {
    pub fn refresh_hz(&self) -> Option<f32> {
        (self.predicted_display_period > 0)
            .then(|| 1_000_000_000.0 / self.predicted_display_period as f32)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeView {
    pub pose: Pose,
    pub fov: Fov,
}

pub trait XrRuntime {
    fn create_instance(&mut self, host: &HostContext) -> VrResult<()>;
    /// Find a head-mounted system and create a session bound to `binding`.
    fn create_session(&mut self, binding: &GraphicsBinding) -> VrResult<ViewConfig>;
    fn create_swapchains(&mut self, extent: vk::Extent2D) -> VrResult<SwapchainSet>;
    fn create_actions(&mut self) -> VrResult<()>;
    fn create_reference_space(&mut self) -> VrResult<()>;

    fn poll_events(&mut self) -> VrResult<Vec<RuntimeEvent>>;
    fn begin_session(&mut self) -> VrResult<()>;
    fn end_session(&mut self) -> VrResult<()>;

    /// Blocks until the runtime predicts the next display time.
    fn wait_frame(&mut self) -> VrResult<FrameTiming>;
    fn begin_frame(&mut self, timing: &FrameTiming) -> VrResult<()>;
    fn locate_views(&mut self, timing: &FrameTiming) -> VrResult<[EyeView; 2]>;
    /// Acquire and wait for the next swapchain image of `eye`.
    fn acquire_image(&mut self, eye: Eye) -> VrResult<u32>;
    fn release_image(&mut self, eye: Eye) -> VrResult<()>;
    /// Close the frame. `views` is `None` when nothing was rendered.
    fn end_frame(&mut self, timing: FrameTiming, views: Option<&[EyeView; 2]>) -> VrResult<()>;

    /// Sync actions and read both controllers at `display_time`.
    fn sync_controllers(&mut self, display_time: i64) -> VrResult<ControllerPair>;

    fn destroy_space(&mut self);
    fn destroy_actions(&mut self);
    fn destroy_swapchains(&mut self);
    fn destroy_session(&mut self);
    fn destroy_instance(&mut self);
}
