#![allow(clippy::missing_safety_doc)]

//! C ABI over [`dreamxr_openxr::VrSession`].
//!
//! Every entry point takes the handle returned by [`dreamxr_create`]. Errors
//! are logged and reported as `false`, `-1` or null; nothing unwinds across
//! the boundary.

use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;
use std::time::Instant;

use ash::vk::{self, Handle};
use dreamxr_common::VrConfig;
use dreamxr_openxr::{
    AshDevice, EyeMatrices, FrameOutcome, GraphicsBinding, HostContext, OpenXrRuntime,
    OpenXrSession, SceneRenderer, VrSession,
};
use dreamxr_vr::{
    HostCallbacks, InteractionMode, NormalizedGamepadState, SessionState, VrError, VrResult,
};
use tracing::{error, info, warn};

pub const DREAMXR_FRAME_ERROR: i32 = -1;
pub const DREAMXR_FRAME_SKIPPED: i32 = 0;
pub const DREAMXR_FRAME_RENDERED: i32 = 1;
pub const DREAMXR_FRAME_PENDING: i32 = 2;
pub const DREAMXR_FRAME_STOPPED: i32 = 3;

/// Mode change notification. `name` is a static NUL-terminated string.
pub type DreamXrModeCallback =
    Option<unsafe extern "C" fn(user_data: *mut c_void, mode: i32, name: *const c_char)>;

/// Session state notification: 0 uninitialized, 1 instance ready,
/// 2 session ready, 3 running, 4 stopped.
pub type DreamXrStateCallback = Option<unsafe extern "C" fn(user_data: *mut c_void, state: i32)>;

/// Records one eye into `command_buffer` (a `VkCommandBuffer`) inside an
/// open render pass. `projection` and `view` point at 16 column-major
/// floats valid for the duration of the call. Returns the draw calls issued.
pub type DreamXrSceneCallback = Option<
    unsafe extern "C" fn(
        user_data: *mut c_void,
        command_buffer: u64,
        eye: i32,
        projection: *const f32,
        view: *const f32,
    ) -> u32,
>;

/// The host's already-created Vulkan objects.
#[repr(C)]
pub struct DreamXrVulkanDevice {
    pub instance: *mut c_void,
    pub physical_device: *mut c_void,
    pub device: *mut c_void,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DreamXrGamepadState {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub start: bool,
    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,
    pub analog_x: f32,
    pub analog_y: f32,
    pub lt: f32,
    pub rt: f32,
}

impl From<NormalizedGamepadState> for DreamXrGamepadState {
    fn from(pad: NormalizedGamepadState) -> Self {
        Self {
            a: pad.a,
            b: pad.b,
            x: pad.x,
            y: pad.y,
            start: pad.start,
            dpad_up: pad.dpad_up,
            dpad_down: pad.dpad_down,
            dpad_left: pad.dpad_left,
            dpad_right: pad.dpad_right,
            analog_x: pad.analog_x,
            analog_y: pad.analog_y,
            lt: pad.lt,
            rt: pad.rt,
        }
    }
}

fn mode_name_c(mode: InteractionMode) -> &'static CStr {
    match mode {
        InteractionMode::Cinema => c"Cinema Mode",
        InteractionMode::Arcade => c"Arcade Mode",
        InteractionMode::Immersive => c"Immersive Mode",
    }
}

fn state_code(state: SessionState) -> i32 {
    match state {
        SessionState::Uninitialized => 0,
        SessionState::InstanceReady => 1,
        SessionState::SessionReady => 2,
        SessionState::Running => 3,
        SessionState::Stopped => 4,
    }
}

#[derive(Clone, Copy)]
struct CCallbacks {
    mode: DreamXrModeCallback,
    mode_user_data: *mut c_void,
    state: DreamXrStateCallback,
    state_user_data: *mut c_void,
}

// The host promises its callbacks and user data may be used from the
// thread that drives the session.
unsafe impl Send for CCallbacks {}
unsafe impl Sync for CCallbacks {}

impl Default for CCallbacks {
    fn default() -> Self {
        Self {
            mode: None,
            mode_user_data: std::ptr::null_mut(),
            state: None,
            state_user_data: std::ptr::null_mut(),
        }
    }
}

impl HostCallbacks for CCallbacks {
    fn on_mode_changed(&self, mode: InteractionMode, _name: &str) {
        if let Some(callback) = self.mode {
            unsafe { callback(self.mode_user_data, mode.id(), mode_name_c(mode).as_ptr()) };
        }
    }

    fn on_session_state(&self, state: SessionState) {
        if let Some(callback) = self.state {
            unsafe { callback(self.state_user_data, state_code(state)) };
        }
    }
}

struct CScene {
    draw: DreamXrSceneCallback,
    user_data: *mut c_void,
}

impl SceneRenderer for CScene {
    fn draw_eye(&mut self, command_buffer: vk::CommandBuffer, eye: usize, m: &EyeMatrices) -> u32 {
        let Some(draw) = self.draw else {
            return 0;
        };
        let projection = m.projection.to_cols_array();
        let view = m.view.to_cols_array();
        unsafe {
            draw(
                self.user_data,
                command_buffer.as_raw(),
                eye as i32,
                projection.as_ptr(),
                view.as_ptr(),
            )
        }
    }
}

/// Opaque handle owned by the host between `dreamxr_create` and
/// `dreamxr_destroy`.
pub struct DreamXrHost {
    session: OpenXrSession,
    callbacks: CCallbacks,
    scene: CScene,
}

impl DreamXrHost {
    fn new(config: VrConfig) -> Self {
        let runtime = OpenXrRuntime::new(config.application_name.clone());
        Self {
            session: VrSession::new(runtime, config),
            callbacks: CCallbacks::default(),
            scene: CScene {
                draw: None,
                user_data: std::ptr::null_mut(),
            },
        }
    }

    fn install_callbacks(&mut self) {
        self.session.set_callbacks(Arc::new(self.callbacks));
    }
}

fn parse_config(config_json: *const c_char) -> Option<VrConfig> {
    if config_json.is_null() {
        return Some(VrConfig::default());
    }
    let text = match unsafe { CStr::from_ptr(config_json) }.to_str() {
        Ok(text) => text,
        Err(e) => {
            error!("config is not UTF-8: {e}");
            return None;
        }
    };
    let config = match VrConfig::from_json_str(text) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid VR config: {e}");
            return None;
        }
    };
    if let Err(e) = config.validate() {
        error!("{e}");
        return None;
    }
    Some(config)
}

/// Create a session handle. `config_json` may be null for defaults.
#[no_mangle]
pub unsafe extern "C" fn dreamxr_create(config_json: *const c_char) -> *mut DreamXrHost {
    dreamxr_common::init_tracing();
    match parse_config(config_json) {
        Some(config) => {
            info!(app = %config.application_name, "DreamXR host created");
            Box::into_raw(Box::new(DreamXrHost::new(config)))
        }
        None => std::ptr::null_mut(),
    }
}

/// Shut down and free the handle. Null is ignored.
#[no_mangle]
pub unsafe extern "C" fn dreamxr_destroy(host: *mut DreamXrHost) {
    if host.is_null() {
        return;
    }
    drop(Box::from_raw(host));
}

unsafe fn graphics_binding(device: *const DreamXrVulkanDevice) -> VrResult<GraphicsBinding> {
    let device = device
        .as_ref()
        .ok_or_else(|| VrError::Init("null Vulkan device".to_string()))?;
    Ok(GraphicsBinding {
        instance: vk::Instance::from_raw(device.instance as u64),
        physical_device: vk::PhysicalDevice::from_raw(device.physical_device as u64),
        device: vk::Device::from_raw(device.device as u64),
        queue_family_index: device.queue_family_index,
        queue_index: device.queue_index,
    })
}

/// Returns `true` at once if the session is already up; the device is
/// not touched in that case.
#[no_mangle]
pub unsafe extern "C" fn dreamxr_initialize(
    host: *mut DreamXrHost,
    java_vm: *mut c_void,
    activity: *mut c_void,
    device: *const DreamXrVulkanDevice,
) -> bool {
    let Some(host) = host.as_mut() else {
        return false;
    };
    let context = HostContext { java_vm, activity };
    let connect = || unsafe {
        let binding = graphics_binding(device)?;
        AshDevice::from_binding(binding).map(Arc::new)
    };
    match host.session.initialize_with(&context, connect) {
        Ok(()) => true,
        Err(e) => {
            error!("{e}");
            false
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_shutdown(host: *mut DreamXrHost) {
    if let Some(host) = host.as_mut() {
        host.session.shutdown();
    }
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_set_mode(host: *mut DreamXrHost, mode: i32) -> bool {
    let Some(host) = host.as_mut() else {
        return false;
    };
    match host.session.set_mode(mode) {
        Ok(()) => true,
        Err(e) => {
            error!("{e}");
            false
        }
    }
}

/// Current mode id, or -1 for a null handle.
#[no_mangle]
pub unsafe extern "C" fn dreamxr_get_mode(host: *const DreamXrHost) -> i32 {
    host.as_ref().map_or(-1, |host| host.session.mode().id())
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_cycle_mode(host: *mut DreamXrHost) -> i32 {
    host.as_mut()
        .map_or(-1, |host| host.session.cycle_mode().id())
}

/// Cycle the mode unless a cycle was accepted within the cooldown.
#[no_mangle]
pub unsafe extern "C" fn dreamxr_request_mode_cycle(host: *mut DreamXrHost) -> bool {
    host.as_mut()
        .and_then(|host| host.session.request_mode_cycle(Instant::now()))
        .is_some()
}

/// Static display name for a mode id, or null for an unknown id.
#[no_mangle]
pub extern "C" fn dreamxr_get_mode_name(mode: i32) -> *const c_char {
    match InteractionMode::try_from(mode) {
        Ok(mode) => mode_name_c(mode).as_ptr(),
        Err(_) => {
            warn!(mode, "no name for unknown mode");
            std::ptr::null()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_is_active(host: *const DreamXrHost) -> bool {
    host.as_ref().is_some_and(|host| host.session.is_active())
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_is_focused(host: *const DreamXrHost) -> bool {
    host.as_ref().is_some_and(|host| host.session.is_focused())
}

/// Drive one frame. Returns one of the `DREAMXR_FRAME_*` codes.
#[no_mangle]
pub unsafe extern "C" fn dreamxr_run_frame(host: *mut DreamXrHost) -> i32 {
    let Some(host) = host.as_mut() else {
        return DREAMXR_FRAME_ERROR;
    };
    match host.session.run_frame(&mut host.scene) {
        Ok(FrameOutcome::Rendered { .. }) => DREAMXR_FRAME_RENDERED,
        Ok(FrameOutcome::Skipped) => DREAMXR_FRAME_SKIPPED,
        Ok(FrameOutcome::Pending) => DREAMXR_FRAME_PENDING,
        Ok(FrameOutcome::Stopped) => DREAMXR_FRAME_STOPPED,
        Err(e) => {
            error!("frame failed: {e}");
            DREAMXR_FRAME_ERROR
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_get_draw_calls(host: *const DreamXrHost) -> u32 {
    host.as_ref().map_or(0, |host| host.session.draw_calls())
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_update_input(host: *mut DreamXrHost) -> bool {
    let Some(host) = host.as_mut() else {
        return false;
    };
    match host.session.update_input() {
        Ok(()) => true,
        Err(e) => {
            warn!("input update skipped: {e}");
            false
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_get_normalized_input(
    host: *const DreamXrHost,
    out: *mut DreamXrGamepadState,
) -> bool {
    let (Some(host), Some(out)) = (host.as_ref(), out.as_mut()) else {
        return false;
    };
    *out = host.session.normalized_input().into();
    true
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_set_mode_callback(
    host: *mut DreamXrHost,
    callback: DreamXrModeCallback,
    user_data: *mut c_void,
) {
    if let Some(host) = host.as_mut() {
        host.callbacks.mode = callback;
        host.callbacks.mode_user_data = user_data;
        host.install_callbacks();
    }
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_set_state_callback(
    host: *mut DreamXrHost,
    callback: DreamXrStateCallback,
    user_data: *mut c_void,
) {
    if let Some(host) = host.as_mut() {
        host.callbacks.state = callback;
        host.callbacks.state_user_data = user_data;
        host.install_callbacks();
    }
}

#[no_mangle]
pub unsafe extern "C" fn dreamxr_set_scene_callback(
    host: *mut DreamXrHost,
    callback: DreamXrSceneCallback,
    user_data: *mut c_void,
) {
    if let Some(host) = host.as_mut() {
        host.scene = CScene {
            draw: callback,
            user_data,
        };
    }
}

#[no_mangle]
pub extern "C" fn dreamxr_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn create(json: &str) -> *mut DreamXrHost {
        let json = CString::new(json).unwrap();
        unsafe { dreamxr_create(json.as_ptr()) }
    }

    #[test]
    fn test_mode_names_are_static_c_strings() {
        for mode in InteractionMode::ALL {
            let ptr = dreamxr_get_mode_name(mode.id());
            let name = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap();
            assert_eq!(name, mode.name());
        }
        assert!(dreamxr_get_mode_name(3).is_null());
        assert!(dreamxr_get_mode_name(-1).is_null());
    }

    #[test]
    fn test_version_matches_package() {
        let version = unsafe { CStr::from_ptr(dreamxr_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_null_handle_is_harmless() {
        let null = std::ptr::null_mut::<DreamXrHost>();
        unsafe {
            assert_eq!(dreamxr_get_mode(null), -1);
            assert_eq!(dreamxr_cycle_mode(null), -1);
            assert!(!dreamxr_set_mode(null, 1));
            assert!(!dreamxr_is_active(null));
            assert!(!dreamxr_update_input(null));
            assert_eq!(dreamxr_run_frame(null), DREAMXR_FRAME_ERROR);
            dreamxr_shutdown(null);
            dreamxr_destroy(null);
        }
    }

    #[test]
    fn test_null_device_is_init_error() {
        let err = unsafe { graphics_binding(std::ptr::null()) }.unwrap_err();
        assert!(matches!(err, VrError::Init(_)));
    }

    #[test]
    fn test_bad_config_yields_null() {
        assert!(create("{not json").is_null());
        assert!(create(r#"{"application_name": "  "}"#).is_null());
    }

    #[test]
    fn test_mode_round_trip_through_handle() {
        let host = create(r#"{"initial_mode": 2}"#);
        assert!(!host.is_null());
        unsafe {
            assert_eq!(dreamxr_get_mode(host), 2);
            assert!(dreamxr_set_mode(host, 1));
            assert!(!dreamxr_set_mode(host, 9));
            assert_eq!(dreamxr_get_mode(host), 1);
            assert_eq!(dreamxr_cycle_mode(host), 2);
            dreamxr_destroy(host);
        }
    }

    static LAST_MODE: AtomicI32 = AtomicI32::new(-1);

    unsafe extern "C" fn record_mode(_: *mut c_void, mode: i32, name: *const c_char) {
        let name = CStr::from_ptr(name).to_str().unwrap();
        assert_eq!(InteractionMode::name_of(mode), Some(name));
        LAST_MODE.store(mode, Ordering::SeqCst);
    }

    #[test]
    fn test_mode_callback_receives_name() {
        let host = create("{}");
        unsafe {
            dreamxr_set_mode_callback(host, Some(record_mode), std::ptr::null_mut());
            assert!(dreamxr_set_mode(host, 1));
            assert_eq!(LAST_MODE.load(Ordering::SeqCst), 1);
            dreamxr_destroy(host);
        }
    }

    #[test]
    fn test_uninitialized_host_reports_inactive() {
        let host = create("{}");
        let mut pad = DreamXrGamepadState {
            a: true,
            ..Default::default()
        };
        unsafe {
            assert!(!dreamxr_is_active(host));
            assert!(!dreamxr_is_focused(host));
            assert_eq!(dreamxr_run_frame(host), DREAMXR_FRAME_ERROR);
            assert!(!dreamxr_update_input(host));
            assert!(dreamxr_get_normalized_input(host, &mut pad));
            assert!(!dreamxr_get_normalized_input(host, std::ptr::null_mut()));
            assert!(!dreamxr_initialize(
                host,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null()
            ));
            dreamxr_destroy(host);
        }
        assert_eq!(pad, DreamXrGamepadState::default());
    }
}
