//! Session State Machine.
//!
//! [`VrSession`] owns the runtime handles, the render targets and the frame
//! ring, and serializes the whole per-frame bracket on the calling thread:
//! wait, begin, locate, adjust, record and submit, end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use dreamxr_common::{ClampEvent, ScaleRange, VrConfig};
use dreamxr_vr::{
    adjust_pose, ControllerState, Eye, Hand, HostCallbacks, InputHandle, InteractionMode,
    ModeSwitcher, NoopCallbacks, NormalizedGamepadState, SessionState, VrError, VrResult,
};
use tracing::{debug, info, trace, warn};

use crate::gpu::GpuDevice;
use crate::pipeline::{FramePipeline, SceneRenderer};
use crate::runtime::{
    EyeView, FrameTiming, HostContext, RuntimeEvent, SwapchainSet, ViewConfig, XrRuntime,
};
use crate::targets::{RenderTargets, TargetSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered { draw_calls: u32 },
    /// The runtime asked for no rendering this tick; no frame bracket was opened.
    Skipped,
    /// The session exists but the runtime has not reported ready yet.
    Pending,
    /// A runtime event shut the session down.
    Stopped,
}

#[derive(Debug, Default, Clone, Copy)]
struct Created {
    instance: bool,
    session: bool,
    swapchains: bool,
    actions: bool,
    space: bool,
}

/// Swapchain images are the runtime's; the views over them are ours.
struct SwapchainChain {
    format: vk::Format,
    extent: vk::Extent2D,
    images: [Vec<vk::Image>; 2],
    views: [Vec<vk::ImageView>; 2],
}

impl SwapchainChain {
    fn new(set: SwapchainSet) -> Self {
        Self {
            format: set.format,
            extent: set.extent,
            images: set.images,
            views: [Vec::new(), Vec::new()],
        }
    }

    fn create_views<G: GpuDevice>(&mut self, gpu: &G) -> VrResult<()> {
        for eye in 0..2 {
            for &image in &self.images[eye] {
                let view =
                    gpu.create_image_view(image, self.format, vk::ImageAspectFlags::COLOR)?;
                self.views[eye].push(view);
            }
        }
        Ok(())
    }

    fn release<G: GpuDevice>(self, gpu: &G) {
        for view in self.views.into_iter().flatten() {
            gpu.destroy_image_view(view);
        }
    }

    fn image_count(&self) -> usize {
        self.images[0].len().max(self.images[1].len())
    }
}

fn scaled_extent(view: &ViewConfig, scale: f32) -> vk::Extent2D {
    let scale_dim = |recommended: u32, max: u32| {
        let scaled = ((recommended as f32) * scale).round().max(1.0) as u32;
        if max > 0 {
            scaled.min(max)
        } else {
            scaled
        }
    };
    vk::Extent2D {
        width: scale_dim(view.recommended_width, view.max_width),
        height: scale_dim(view.recommended_height, view.max_height),
    }
}

pub struct VrSession<R: XrRuntime, G: GpuDevice> {
    runtime: R,
    config: VrConfig,
    state: SessionState,
    created: Created,
    gpu: Option<Arc<G>>,
    view_config: Option<ViewConfig>,
    swapchain: Option<SwapchainChain>,
    targets: Option<RenderTargets<G>>,
    pipeline: Option<FramePipeline<G>>,
    settings: TargetSettings,
    dynamic_resolution: ScaleRange,
    modes: ModeSwitcher,
    input: InputHandle,
    callbacks: Arc<dyn HostCallbacks>,
    runtime_ready: bool,
    focused: bool,
    refresh_hz: Option<f32>,
    last_display_time: i64,
}

impl<R: XrRuntime, G: GpuDevice> VrSession<R, G> {
    pub fn new(runtime: R, config: VrConfig) -> Self {
        let (config, clamps) = config.normalized();
        for clamp in &clamps {
            debug!(field = clamp.field, applied = clamp.applied, "config value adjusted");
        }
        let initial = InteractionMode::try_from(config.initial_mode).unwrap_or_else(|err| {
            warn!("{err}; starting in {}", InteractionMode::Cinema);
            InteractionMode::Cinema
        });
        Self {
            runtime,
            settings: TargetSettings {
                msaa_samples: config.msaa_samples,
                multiview: config.multiview,
                foveated: config.foveated,
                clear_color: config.clear_color,
            },
            dynamic_resolution: config.dynamic_resolution,
            modes: ModeSwitcher::new(
                initial,
                Duration::from_millis(config.mode_switch_cooldown_ms),
            ),
            config,
            state: SessionState::Uninitialized,
            created: Created::default(),
            gpu: None,
            view_config: None,
            swapchain: None,
            targets: None,
            pipeline: None,
            input: InputHandle::new(),
            callbacks: Arc::new(NoopCallbacks),
            runtime_ready: false,
            focused: false,
            refresh_hz: None,
            last_display_time: 0,
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn HostCallbacks>) {
        self.callbacks = callbacks;
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &VrConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.state,
            SessionState::InstanceReady | SessionState::SessionReady | SessionState::Running
        )
    }

    /// True while frames may be driven: the session exists and is not stopped.
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::SessionReady | SessionState::Running)
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn refresh_hz(&self) -> Option<f32> {
        self.refresh_hz
    }

    /// Eye resolution the runtime recommended, before `resolution_scale`.
    pub fn view_config(&self) -> Option<ViewConfig> {
        self.view_config
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "session state");
        self.state = state;
        self.callbacks.on_session_state(state);
    }

    // ---- lifecycle ----

    /// Bring the session up against the host's graphics device. A second call
    /// without an intervening [`shutdown`](Self::shutdown) succeeds without
    /// creating anything.
    pub fn initialize(&mut self, host: &HostContext, gpu: Arc<G>) -> VrResult<()> {
        if self.is_initialized() {
            debug!("initialize called on a live session");
            return Ok(());
        }
        if let Err(err) = self.try_initialize(host, gpu) {
            warn!("VR initialization failed: {err}");
            self.teardown();
            self.set_state(SessionState::Uninitialized);
            return Err(match err {
                VrError::Init(_) => err,
                other => VrError::Init(other.to_string()),
            });
        }
        info!(mode = %self.modes.current(), "VR session initialized");
        Ok(())
    }

    /// Like [`initialize`](Self::initialize), but the device is only opened
    /// when the session is not already up.
    pub fn initialize_with<F>(&mut self, host: &HostContext, connect: F) -> VrResult<()>
    where
        F: FnOnce() -> VrResult<Arc<G>>,
    {
        if self.is_initialized() {
            debug!("initialize called on a live session");
            return Ok(());
        }
        let gpu = connect().map_err(|err| match err {
            VrError::Init(_) => err,
            other => VrError::Init(other.to_string()),
        })?;
        self.initialize(host, gpu)
    }

    fn try_initialize(&mut self, host: &HostContext, gpu: Arc<G>) -> VrResult<()> {
        self.runtime.create_instance(host)?;
        self.created.instance = true;
        self.set_state(SessionState::InstanceReady);

        let view = self.runtime.create_session(&gpu.binding())?;
        self.created.session = true;
        self.view_config = Some(view);
        self.gpu = Some(Arc::clone(&gpu));

        let extent = scaled_extent(&view, self.config.resolution_scale);
        let set = self.runtime.create_swapchains(extent)?;
        self.created.swapchains = true;
        let mut chain = SwapchainChain::new(set);
        let views = chain.create_views(gpu.as_ref());
        self.swapchain = Some(chain);
        views?;

        self.runtime.create_actions()?;
        self.created.actions = true;
        self.runtime.create_reference_space()?;
        self.created.space = true;

        self.targets = Some(self.build_targets()?);
        self.pipeline =
            Some(FramePipeline::new(gpu)?.with_near_plane(self.config.near_plane));

        self.set_state(SessionState::SessionReady);
        Ok(())
    }

    fn build_targets(&self) -> VrResult<RenderTargets<G>> {
        let (Some(gpu), Some(chain)) = (self.gpu.as_ref(), self.swapchain.as_ref()) else {
            return Err(VrError::Protocol("no swapchains to target".to_string()));
        };
        let mut targets = RenderTargets::create(
            Arc::clone(gpu),
            chain.extent.width,
            chain.extent.height,
            chain.image_count(),
            chain.format,
            self.settings,
        )?;
        for eye in 0..2 {
            for (index, (&image, &view)) in chain.images[eye]
                .iter()
                .zip(&chain.views[eye])
                .enumerate()
            {
                targets.set_swapchain_image(eye, index, image, view)?;
            }
        }
        Ok(targets)
    }

    /// Release everything in reverse creation order. Safe from any state.
    pub fn shutdown(&mut self) {
        match self.state {
            SessionState::Uninitialized => {
                debug!("shutdown before initialize");
            }
            SessionState::Stopped => {}
            _ => {
                self.teardown();
                self.set_state(SessionState::Stopped);
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(gpu) = self.gpu.as_ref() {
            if let Err(err) = gpu.wait_idle() {
                warn!("wait_idle during teardown failed: {err}");
            }
        }
        self.pipeline = None;
        self.targets = None;
        if let (Some(chain), Some(gpu)) = (self.swapchain.take(), self.gpu.as_ref()) {
            chain.release(gpu.as_ref());
        }

        if self.state == SessionState::Running {
            if let Err(err) = self.runtime.end_session() {
                warn!("end_session during teardown failed: {err}");
            }
        }
        let created = std::mem::take(&mut self.created);
        if created.space {
            self.runtime.destroy_space();
        }
        if created.actions {
            self.runtime.destroy_actions();
        }
        if created.swapchains {
            self.runtime.destroy_swapchains();
        }
        if created.session {
            self.runtime.destroy_session();
        }
        if created.instance {
            self.runtime.destroy_instance();
        }

        self.gpu = None;
        self.view_config = None;
        self.runtime_ready = false;
        self.focused = false;
        self.refresh_hz = None;
    }

    // ---- per frame ----

    /// Drive one display refresh. Must be called from a single thread.
    pub fn run_frame(&mut self, scene: &mut dyn SceneRenderer) -> VrResult<FrameOutcome> {
        if !self.is_active() {
            return Err(VrError::Protocol(format!("run_frame while {}", self.state)));
        }
        self.pump_events()?;

        match self.state {
            SessionState::Stopped => return Ok(FrameOutcome::Stopped),
            SessionState::SessionReady if !self.runtime_ready => {
                return Ok(FrameOutcome::Pending)
            }
            SessionState::SessionReady => {
                self.runtime.begin_session()?;
                self.set_state(SessionState::Running);
            }
            _ => {}
        }

        let timing = self.runtime.wait_frame()?;
        self.track_refresh(&timing);
        self.last_display_time = timing.predicted_display_time;
        if !timing.should_render {
            trace!("runtime skipped frame");
            return Ok(FrameOutcome::Skipped);
        }

        self.runtime.begin_frame(&timing)?;
        let rendered = self.render(&timing, scene);
        let views = rendered.as_ref().ok().map(|(views, _)| *views);
        let ended = self.runtime.end_frame(timing, views.as_ref());

        let (_, draw_calls) = rendered?;
        ended?;
        Ok(FrameOutcome::Rendered { draw_calls })
    }

    fn render(
        &mut self,
        timing: &FrameTiming,
        scene: &mut dyn SceneRenderer,
    ) -> VrResult<([EyeView; 2], u32)> {
        let views = self.runtime.locate_views(timing)?;
        let mode = self.modes.current();
        let (Some(pipeline), Some(targets)) = (self.pipeline.as_mut(), self.targets.as_ref())
        else {
            return Err(VrError::Protocol("render targets are not built".to_string()));
        };

        pipeline.begin_frame()?;
        let mut acquired = [false; 2];
        let mut outcome = Ok(());
        for eye in Eye::BOTH {
            let i = eye.index();
            let step = self.runtime.acquire_image(eye).and_then(|image_index| {
                acquired[i] = true;
                let pose = adjust_pose(mode, views[i].pose);
                pipeline.render_eye(targets, i, image_index, &pose, &views[i].fov, scene)
            });
            if let Err(err) = step {
                outcome = Err(err);
                break;
            }
        }
        if outcome.is_ok() {
            outcome = pipeline.end_frame();
        } else {
            pipeline.abort_frame();
        }

        for eye in Eye::BOTH {
            if !acquired[eye.index()] {
                continue;
            }
            if let Err(err) = self.runtime.release_image(eye) {
                if outcome.is_ok() {
                    outcome = Err(err);
                } else {
                    warn!(?eye, "release_image after failed frame: {err}");
                }
            }
        }
        outcome?;
        Ok((views, pipeline.draw_calls()))
    }

    fn pump_events(&mut self) -> VrResult<()> {
        for event in self.runtime.poll_events()? {
            match event {
                RuntimeEvent::Ready => {
                    debug!("runtime ready");
                    self.runtime_ready = true;
                }
                RuntimeEvent::Stopping => {
                    self.runtime_ready = false;
                    if self.state == SessionState::Running {
                        if let Some(gpu) = self.gpu.as_ref() {
                            if let Err(err) = gpu.wait_idle() {
                                warn!("wait_idle on stop failed: {err}");
                            }
                        }
                        if let Err(err) = self.runtime.end_session() {
                            warn!("end_session on stop failed: {err}");
                        }
                        self.set_state(SessionState::SessionReady);
                    }
                }
                RuntimeEvent::Exiting | RuntimeEvent::LossPending => {
                    info!(?event, "runtime is ending the session");
                    self.shutdown();
                    return Ok(());
                }
                RuntimeEvent::FocusChanged(focused) => {
                    if self.focused != focused {
                        debug!(focused, "focus changed");
                    }
                    self.focused = focused;
                }
            }
        }
        Ok(())
    }

    fn track_refresh(&mut self, timing: &FrameTiming) {
        if let Some(hz) = timing.refresh_hz() {
            if self.refresh_hz.is_none_or(|prev| (prev - hz).abs() > 0.1) {
                info!(refresh_hz = hz, "display refresh rate");
                self.refresh_hz = Some(hz);
            }
        }
    }

    // ---- modes ----

    pub fn mode(&self) -> InteractionMode {
        self.modes.current()
    }

    pub fn set_mode(&mut self, id: i32) -> VrResult<()> {
        if let Some(mode) = self.modes.set(id)? {
            self.callbacks.on_mode_changed(mode, mode.name());
        }
        Ok(())
    }

    pub fn cycle_mode(&mut self) -> InteractionMode {
        let mode = self.modes.cycle();
        self.callbacks.on_mode_changed(mode, mode.name());
        mode
    }

    /// Key-driven cycling, ignored within the configured cooldown.
    pub fn request_mode_cycle(&mut self, now: Instant) -> Option<InteractionMode> {
        let mode = self.modes.request_cycle(now)?;
        self.callbacks.on_mode_changed(mode, mode.name());
        Some(mode)
    }

    // ---- input ----

    pub fn update_input(&mut self) -> VrResult<()> {
        if self.state != SessionState::Running {
            return Err(VrError::Protocol(format!("update_input while {}", self.state)));
        }
        let pair = self.runtime.sync_controllers(self.last_display_time)?;
        self.input.replace(pair);
        Ok(())
    }

    pub fn input(&self) -> InputHandle {
        self.input.clone()
    }

    pub fn controller(&self, hand: Hand) -> ControllerState {
        self.input.controller(hand)
    }

    pub fn normalized_input(&self) -> NormalizedGamepadState {
        self.input.normalized()
    }

    // ---- renderer tuning ----

    /// Takes effect on the next [`recreate_targets`](Self::recreate_targets).
    pub fn set_msaa_samples(&mut self, samples: u32) -> VrResult<()> {
        if !matches!(samples, 1 | 2 | 4 | 8) {
            warn!(samples, "unsupported MSAA sample count");
            return Err(VrError::Resource(format!(
                "unsupported MSAA sample count {samples}"
            )));
        }
        self.settings.msaa_samples = samples;
        Ok(())
    }

    pub fn enable_multiview(&mut self, enabled: bool) {
        self.settings.multiview = enabled;
    }

    pub fn enable_foveated_rendering(&mut self, enabled: bool) {
        self.settings.foveated = enabled;
    }

    pub fn set_dynamic_resolution(&mut self, min_scale: f32, max_scale: f32) -> Vec<ClampEvent> {
        let (range, events) = ScaleRange::clamped(min_scale, max_scale);
        self.dynamic_resolution = range;
        events
    }

    pub fn dynamic_resolution(&self) -> ScaleRange {
        self.dynamic_resolution
    }

    pub fn pending_settings(&self) -> TargetSettings {
        self.settings
    }

    /// Settings of the targets currently in use.
    pub fn active_settings(&self) -> Option<TargetSettings> {
        self.targets.as_ref().map(RenderTargets::settings)
    }

    pub fn target_size(&self) -> Option<(u32, u32)> {
        self.targets.as_ref().map(|t| (t.width(), t.height()))
    }

    pub fn draw_calls(&self) -> u32 {
        self.pipeline.as_ref().map_or(0, FramePipeline::draw_calls)
    }

    /// Rebuild the render targets with the pending settings. On failure the
    /// current targets stay in use.
    pub fn recreate_targets(&mut self) -> VrResult<()> {
        if !self.is_active() {
            return Err(VrError::Protocol(format!(
                "recreate_targets while {}",
                self.state
            )));
        }
        if let Some(gpu) = self.gpu.as_ref() {
            gpu.wait_idle()?;
        }
        let targets = self.build_targets()?;
        self.targets = Some(targets);
        info!(samples = self.settings.msaa_samples, "render targets recreated");
        Ok(())
    }
}

impl<R: XrRuntime, G: GpuDevice> Drop for VrSession<R, G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_extent_respects_max() {
        let view = ViewConfig {
            recommended_width: 1832,
            recommended_height: 1920,
            max_width: 2000,
            max_height: 2000,
        };
        assert_eq!(
            scaled_extent(&view, 1.0),
            vk::Extent2D {
                width: 1832,
                height: 1920
            }
        );
        assert_eq!(
            scaled_extent(&view, 0.5),
            vk::Extent2D {
                width: 916,
                height: 960
            }
        );
        let no_max = ViewConfig {
            max_width: 0,
            max_height: 0,
            ..view
        };
        assert_eq!(scaled_extent(&no_max, 1.0).width, 1832);
    }
}
