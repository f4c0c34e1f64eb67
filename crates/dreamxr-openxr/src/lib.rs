//! Stereo VR session management on OpenXR and Vulkan.
//!
//! [`VrSession`] is generic over the runtime ([`XrRuntime`]) and the device
//! ([`GpuDevice`]) so the state machine and the frame ring run unchanged
//! against [`OpenXrRuntime`] + [`AshDevice`] on a headset and against
//! scripted stand-ins in tests.

pub mod ash_device;
pub mod gpu;
pub mod pipeline;
pub mod projection;
pub mod runtime;
pub mod session;
pub mod targets;
pub mod xr_backend;

mod actions;

#[cfg(target_os = "android")]
mod android;

pub use ash_device::AshDevice;
pub use gpu::{FrameSubmit, GpuDevice, ImageDesc, RenderPassBegin, RenderPassDesc, DEPTH_FORMAT};
pub use pipeline::{ClearOnly, FramePipeline, SceneRenderer, FRAMES_IN_FLIGHT};
pub use projection::{projection_matrix, view_matrix, EyeMatrices};
pub use runtime::{
    EyeView, FrameTiming, GraphicsBinding, HostContext, RuntimeEvent, SwapchainSet, ViewConfig,
    XrRuntime,
};
pub use session::{FrameOutcome, VrSession};
pub use targets::{RenderTargets, TargetSettings};
pub use xr_backend::{choose_swapchain_format, OpenXrRuntime};

/// The production pairing handed out across the host boundary.
pub type OpenXrSession = VrSession<OpenXrRuntime, AshDevice>;
