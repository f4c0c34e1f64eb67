//! Recording stand-ins for the GPU and the XR runtime.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use ash::vk::{self, Handle};
use dreamxr_openxr::{
    EyeView, FrameSubmit, FrameTiming, GpuDevice, GraphicsBinding, HostContext, ImageDesc,
    RenderPassBegin, RenderPassDesc, RuntimeEvent, SwapchainSet, ViewConfig, XrRuntime,
};
use dreamxr_vr::{
    ControllerPair, Eye, Fov, HostCallbacks, InteractionMode, Pose, SessionState, VrError,
    VrResult,
};

pub const EYE_OFFSET: f32 = 0.032;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---- GPU ----

#[derive(Default)]
pub struct GpuState {
    next_handle: u64,
    pub log: Vec<String>,
    live: HashMap<&'static str, i64>,
    calls: HashMap<&'static str, usize>,
    fail: Option<(&'static str, usize)>,
    fences: HashMap<u64, bool>,
    manual_fences: bool,
    pub submits: Vec<FrameSubmit>,
    pub images: Vec<ImageDesc>,
    pub render_passes: Vec<RenderPassDesc>,
    pub framebuffer_attachments: Vec<usize>,
    pub passes: Vec<RenderPassBegin>,
}

impl GpuState {
    fn step(&mut self, name: &'static str) -> VrResult<()> {
        let count = self.calls.entry(name).or_insert(0);
        *count += 1;
        if self.fail == Some((name, *count)) {
            return Err(VrError::Runtime(format!("injected failure at {name}")));
        }
        Ok(())
    }

    fn handle(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        *self.live.entry(kind).or_insert(0) += 1;
        self.next_handle
    }

    fn release(&mut self, kind: &'static str, raw: u64) {
        assert_ne!(raw, 0, "released a null {kind}");
        *self.live.entry(kind).or_insert(0) -= 1;
    }
}

/// Handles are plain counters. Fences complete at submit unless manual
/// completion is enabled, in which case [`FakeGpu::signal`] completes them.
#[derive(Default)]
pub struct FakeGpu {
    state: Mutex<GpuState>,
    fence_signaled: Condvar,
}

impl FakeGpu {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_manual_fences() -> Arc<Self> {
        let gpu = Self::default();
        lock(&gpu.state).manual_fences = true;
        Arc::new(gpu)
    }

    /// Make the `nth` call (1-based) to `step` fail.
    pub fn fail_on(&self, step: &'static str, nth: usize) {
        let mut state = lock(&self.state);
        let seen = state.calls.get(step).copied().unwrap_or(0);
        state.fail = Some((step, seen + nth));
    }

    pub fn state(&self) -> MutexGuard<'_, GpuState> {
        lock(&self.state)
    }

    pub fn live(&self, kind: &'static str) -> i64 {
        lock(&self.state).live.get(kind).copied().unwrap_or(0)
    }

    pub fn total_live(&self) -> i64 {
        lock(&self.state).live.values().sum()
    }

    pub fn calls(&self, step: &'static str) -> usize {
        lock(&self.state).calls.get(step).copied().unwrap_or(0)
    }

    pub fn signal(&self, fence: vk::Fence) {
        lock(&self.state).fences.insert(fence.as_raw(), true);
        self.fence_signaled.notify_all();
    }
}

impl GpuDevice for FakeGpu {
    fn binding(&self) -> GraphicsBinding {
        GraphicsBinding {
            instance: vk::Instance::from_raw(0x1000),
            physical_device: vk::PhysicalDevice::from_raw(0x2000),
            device: vk::Device::from_raw(0x3000),
            queue_family_index: 0,
            queue_index: 0,
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> VrResult<vk::Image> {
        let mut s = lock(&self.state);
        s.step("create_image")?;
        s.images.push(*desc);
        Ok(vk::Image::from_raw(s.handle("image")))
    }

    fn bind_image_memory(&self, _image: vk::Image) -> VrResult<vk::DeviceMemory> {
        let mut s = lock(&self.state);
        s.step("bind_image_memory")?;
        Ok(vk::DeviceMemory::from_raw(s.handle("memory")))
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VrResult<vk::ImageView> {
        let mut s = lock(&self.state);
        s.step("create_image_view")?;
        Ok(vk::ImageView::from_raw(s.handle("image_view")))
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VrResult<vk::RenderPass> {
        let mut s = lock(&self.state);
        s.step("create_render_pass")?;
        s.render_passes.push(*desc);
        Ok(vk::RenderPass::from_raw(s.handle("render_pass")))
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VrResult<vk::Framebuffer> {
        let mut s = lock(&self.state);
        s.step("create_framebuffer")?;
        s.framebuffer_attachments.push(attachments.len());
        Ok(vk::Framebuffer::from_raw(s.handle("framebuffer")))
    }

    fn allocate_command_buffer(&self) -> VrResult<vk::CommandBuffer> {
        let mut s = lock(&self.state);
        s.step("allocate_command_buffer")?;
        Ok(vk::CommandBuffer::from_raw(s.handle("command_buffer")))
    }

    fn create_fence(&self, signaled: bool) -> VrResult<vk::Fence> {
        let mut s = lock(&self.state);
        s.step("create_fence")?;
        let raw = s.handle("fence");
        s.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn create_semaphore(&self) -> VrResult<vk::Semaphore> {
        let mut s = lock(&self.state);
        s.step("create_semaphore")?;
        Ok(vk::Semaphore::from_raw(s.handle("semaphore")))
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VrResult<()> {
        let mut s = lock(&self.state);
        s.step("wait_for_fence")?;
        s.log.push(format!("wait_fence:{}", fence.as_raw()));
        if s.manual_fences {
            let raw = fence.as_raw();
            let guard = self
                .fence_signaled
                .wait_while(s, |s| !s.fences.get(&raw).copied().unwrap_or(false));
            s = match guard {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        s.log.push(format!("fence_done:{}", fence.as_raw()));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VrResult<()> {
        let mut s = lock(&self.state);
        s.step("reset_fence")?;
        s.fences.insert(fence.as_raw(), false);
        s.log.push(format!("reset_fence:{}", fence.as_raw()));
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VrResult<()> {
        let mut s = lock(&self.state);
        s.step("begin_command_buffer")?;
        s.log.push(format!("begin_cb:{}", command_buffer.as_raw()));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VrResult<()> {
        let mut s = lock(&self.state);
        s.step("end_command_buffer")?;
        s.log.push(format!("end_cb:{}", command_buffer.as_raw()));
        Ok(())
    }

    fn cmd_begin_render_pass(&self, _command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let mut s = lock(&self.state);
        s.log.push(format!("begin_pass:{}", begin.framebuffer.as_raw()));
        s.passes.push(*begin);
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {
        lock(&self.state).log.push("end_pass".to_string());
    }

    fn queue_submit(&self, submit: &FrameSubmit) -> VrResult<()> {
        let mut s = lock(&self.state);
        s.step("queue_submit")?;
        s.log.push(format!("submit:{}", submit.fence.as_raw()));
        s.submits.push(*submit);
        if !s.manual_fences {
            s.fences.insert(submit.fence.as_raw(), true);
        }
        Ok(())
    }

    fn wait_idle(&self) -> VrResult<()> {
        let mut s = lock(&self.state);
        s.step("wait_idle")?;
        s.log.push("wait_idle".to_string());
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        lock(&self.state).release("image", image.as_raw());
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        lock(&self.state).release("memory", memory.as_raw());
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        lock(&self.state).release("image_view", view.as_raw());
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        lock(&self.state).release("render_pass", render_pass.as_raw());
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        lock(&self.state).release("framebuffer", framebuffer.as_raw());
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        lock(&self.state).release("command_buffer", command_buffer.as_raw());
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = lock(&self.state);
        s.fences.remove(&fence.as_raw());
        s.release("fence", fence.as_raw());
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        lock(&self.state).release("semaphore", semaphore.as_raw());
    }
}

// ---- runtime ----

pub struct Script {
    pub calls: Vec<String>,
    pub events: VecDeque<RuntimeEvent>,
    pub should_render: VecDeque<bool>,
    pub fail: Option<&'static str>,
    pub images_per_eye: usize,
    pub controllers: ControllerPair,
    pub submitted: Vec<Option<[EyeView; 2]>>,
    next_image: [usize; 2],
    display_time: i64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            events: VecDeque::new(),
            should_render: VecDeque::new(),
            fail: None,
            images_per_eye: 3,
            controllers: ControllerPair::default(),
            submitted: Vec::new(),
            next_image: [0; 2],
            display_time: 0,
        }
    }
}

/// Test-side view of a [`FakeRuntime`] owned by a session.
#[derive(Clone, Default)]
pub struct RuntimeScript(Arc<Mutex<Script>>);

impl RuntimeScript {
    pub fn get(&self) -> MutexGuard<'_, Script> {
        lock(&self.0)
    }

    pub fn push_event(&self, event: RuntimeEvent) {
        self.get().events.push_back(event);
    }

    pub fn fail_at(&self, call: &'static str) {
        self.get().fail = Some(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.get().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.get().calls.iter().filter(|c| c.as_str() == call).count()
    }

    pub fn clear_calls(&self) {
        self.get().calls.clear();
    }
}

pub struct FakeRuntime {
    script: RuntimeScript,
}

impl FakeRuntime {
    pub fn new() -> (Self, RuntimeScript) {
        let script = RuntimeScript::default();
        (
            Self {
                script: script.clone(),
            },
            script,
        )
    }

    fn call(&self, name: &'static str) -> VrResult<MutexGuard<'_, Script>> {
        let mut s = self.script.get();
        s.calls.push(name.to_string());
        if s.fail == Some(name) {
            s.fail = None;
            return Err(VrError::Runtime(format!("injected failure at {name}")));
        }
        Ok(s)
    }
}

pub fn eye_views() -> [EyeView; 2] {
    let fov = Fov {
        angle_left: -0.8,
        angle_right: 0.8,
        angle_up: 0.8,
        angle_down: -0.8,
    };
    [
        EyeView {
            pose: Pose {
                position: [-EYE_OFFSET, 1.6, 0.0],
                ..Pose::IDENTITY
            },
            fov,
        },
        EyeView {
            pose: Pose {
                position: [EYE_OFFSET, 1.6, 0.0],
                ..Pose::IDENTITY
            },
            fov,
        },
    ]
}

fn eye_name(eye: Eye) -> &'static str {
    match eye {
        Eye::Left => "left",
        Eye::Right => "right",
    }
}

impl XrRuntime for FakeRuntime {
    fn create_instance(&mut self, _host: &HostContext) -> VrResult<()> {
        self.call("create_instance").map(drop)
    }

    fn create_session(&mut self, _binding: &GraphicsBinding) -> VrResult<ViewConfig> {
        self.call("create_session")?;
        Ok(ViewConfig {
            recommended_width: 1440,
            recommended_height: 1584,
            max_width: 2880,
            max_height: 3168,
        })
    }

    fn create_swapchains(&mut self, extent: vk::Extent2D) -> VrResult<SwapchainSet> {
        let s = self.call("create_swapchains")?;
        let images = |base: u64| {
            (0..s.images_per_eye as u64)
                .map(|i| vk::Image::from_raw(base + i))
                .collect::<Vec<_>>()
        };
        Ok(SwapchainSet {
            format: vk::Format::R8G8B8A8_SRGB,
            extent,
            images: [images(0x10_0000), images(0x20_0000)],
        })
    }

    fn create_actions(&mut self) -> VrResult<()> {
        self.call("create_actions").map(drop)
    }

    fn create_reference_space(&mut self) -> VrResult<()> {
        self.call("create_reference_space").map(drop)
    }

    fn poll_events(&mut self) -> VrResult<Vec<RuntimeEvent>> {
        let mut s = self.script.get();
        Ok(s.events.drain(..).collect())
    }

    fn begin_session(&mut self) -> VrResult<()> {
        self.call("begin_session").map(drop)
    }

    fn end_session(&mut self) -> VrResult<()> {
        self.call("end_session").map(drop)
    }

    fn wait_frame(&mut self) -> VrResult<FrameTiming> {
        let mut s = self.call("wait_frame")?;
        s.display_time += 11_111_111;
        let should_render = s.should_render.pop_front().unwrap_or(true);
        Ok(FrameTiming {
            predicted_display_time: s.display_time,
            predicted_display_period: 11_111_111,
            should_render,
        })
    }

    fn begin_frame(&mut self, _timing: &FrameTiming) -> VrResult<()> {
        self.call("begin_frame").map(drop)
    }

    fn locate_views(&mut self, _timing: &FrameTiming) -> VrResult<[EyeView; 2]> {
        self.call("locate_views")?;
        Ok(eye_views())
    }

    fn acquire_image(&mut self, eye: Eye) -> VrResult<u32> {
        let mut s = self.call("acquire_image")?;
        s.calls.push(format!("acquired:{}", eye_name(eye)));
        let index = s.next_image[eye.index()];
        s.next_image[eye.index()] = (index + 1) % s.images_per_eye;
        Ok(index as u32)
    }

    fn release_image(&mut self, eye: Eye) -> VrResult<()> {
        let mut s = self.call("release_image")?;
        s.calls.push(format!("released:{}", eye_name(eye)));
        Ok(())
    }

    fn end_frame(&mut self, _timing: FrameTiming, views: Option<&[EyeView; 2]>) -> VrResult<()> {
        let mut s = self.call("end_frame")?;
        s.submitted.push(views.copied());
        Ok(())
    }

    fn sync_controllers(&mut self, _display_time: i64) -> VrResult<ControllerPair> {
        let s = self.call("sync_controllers")?;
        Ok(s.controllers)
    }

    fn destroy_space(&mut self) {
        drop(self.call("destroy_space"));
    }

    fn destroy_actions(&mut self) {
        drop(self.call("destroy_actions"));
    }

    fn destroy_swapchains(&mut self) {
        drop(self.call("destroy_swapchains"));
    }

    fn destroy_session(&mut self) {
        drop(self.call("destroy_session"));
    }

    fn destroy_instance(&mut self) {
        drop(self.call("destroy_instance"));
    }
}

// ---- callbacks ----

#[derive(Default)]
pub struct RecordingCallbacks {
    pub modes: Mutex<Vec<(InteractionMode, String)>>,
    pub states: Mutex<Vec<SessionState>>,
}

impl RecordingCallbacks {
    pub fn modes(&self) -> Vec<(InteractionMode, String)> {
        lock(&self.modes).clone()
    }

    pub fn states(&self) -> Vec<SessionState> {
        lock(&self.states).clone()
    }
}

impl HostCallbacks for RecordingCallbacks {
    fn on_mode_changed(&self, mode: InteractionMode, name: &str) {
        lock(&self.modes).push((mode, name.to_string()));
    }

    fn on_session_state(&self, state: SessionState) {
        lock(&self.states).push(state);
    }
}
