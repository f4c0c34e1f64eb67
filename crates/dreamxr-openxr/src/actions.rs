use dreamxr_vr::{ControllerPair, ControllerState, Pose, VrError, VrResult};
use openxr as xr;
use tracing::warn;

const PROFILES: [&str; 5] = [
    "/interaction_profiles/khr/simple_controller",
    "/interaction_profiles/oculus/touch_controller",
    "/interaction_profiles/valve/index_controller",
    "/interaction_profiles/microsoft/motion_controller",
    "/interaction_profiles/htc/vive_controller",
];

pub(crate) fn to_pose(pose: xr::Posef) -> Pose {
    Pose {
        position: [pose.position.x, pose.position.y, pose.position.z],
        orientation: [
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ],
    }
}

/// Controller action set with one grip space per hand.
pub(crate) struct ControllerActions {
    action_set: xr::ActionSet,
    trigger: xr::Action<f32>,
    trigger_click: xr::Action<bool>,
    grip: xr::Action<f32>,
    grip_click: xr::Action<bool>,
    stick: xr::Action<xr::Vector2f>,
    button_a: xr::Action<bool>,
    button_b: xr::Action<bool>,
    menu: xr::Action<bool>,
    // Kept alive for the grip spaces.
    _grip_pose: xr::Action<xr::Posef>,
    hands: [xr::Path; 2],
    spaces: [xr::Space; 2],
}

impl ControllerActions {
    pub(crate) fn new<G: xr::Graphics>(
        instance: &xr::Instance,
        session: &xr::Session<G>,
    ) -> VrResult<Self> {
        let err =
            |what: &str, e: xr::sys::Result| VrError::Init(format!("OpenXR {what}: {e:?}"));

        let action_set = instance
            .create_action_set("dreamxr", "DreamXR Controllers", 0)
            .map_err(|e| err("action set", e))?;

        let left = instance
            .string_to_path("/user/hand/left")
            .map_err(|e| err("path left", e))?;
        let right = instance
            .string_to_path("/user/hand/right")
            .map_err(|e| err("path right", e))?;
        let hands = [left, right];

        let trigger = action_set
            .create_action("trigger", "Trigger", &hands)
            .map_err(|e| err("action trigger", e))?;
        let trigger_click = action_set
            .create_action("trigger_click", "Trigger Click", &hands)
            .map_err(|e| err("action trigger_click", e))?;
        let grip = action_set
            .create_action("grip", "Grip", &hands)
            .map_err(|e| err("action grip", e))?;
        let grip_click = action_set
            .create_action("grip_click", "Grip Click", &hands)
            .map_err(|e| err("action grip_click", e))?;
        let stick = action_set
            .create_action("thumbstick", "Thumbstick", &hands)
            .map_err(|e| err("action thumbstick", e))?;
        let button_a = action_set
            .create_action("button_a", "A / X", &hands)
            .map_err(|e| err("action button_a", e))?;
        let button_b = action_set
            .create_action("button_b", "B / Y", &hands)
            .map_err(|e| err("action button_b", e))?;
        let menu = action_set
            .create_action("menu", "Menu", &hands)
            .map_err(|e| err("action menu", e))?;
        let grip_pose = action_set
            .create_action::<xr::Posef>("grip_pose", "Grip Pose", &hands)
            .map_err(|e| err("action grip_pose", e))?;

        for profile in PROFILES {
            let profile_path = instance
                .string_to_path(profile)
                .map_err(|e| err("profile path", e))?;
            let mut bindings = Vec::with_capacity(24);
            macro_rules! bind {
                ($action:expr, $path:expr) => {
                    if let Ok(path) = instance.string_to_path($path) {
                        bindings.push(xr::Binding::new($action, path));
                    }
                };
            }
            for hand in ["left", "right"] {
                bind!(&grip_pose, &format!("/user/hand/{hand}/input/grip/pose"));
            }
            match profile {
                "/interaction_profiles/khr/simple_controller" => {
                    for hand in ["left", "right"] {
                        bind!(&trigger_click, &format!("/user/hand/{hand}/input/select/click"));
                        bind!(&menu, &format!("/user/hand/{hand}/input/menu/click"));
                    }
                }
                "/interaction_profiles/oculus/touch_controller" => {
                    for hand in ["left", "right"] {
                        bind!(&trigger, &format!("/user/hand/{hand}/input/trigger/value"));
                        bind!(&grip, &format!("/user/hand/{hand}/input/squeeze/value"));
                        bind!(&stick, &format!("/user/hand/{hand}/input/thumbstick"));
                    }
                    bind!(&button_a, "/user/hand/left/input/x/click");
                    bind!(&button_a, "/user/hand/right/input/a/click");
                    bind!(&button_b, "/user/hand/left/input/y/click");
                    bind!(&button_b, "/user/hand/right/input/b/click");
                    bind!(&menu, "/user/hand/left/input/menu/click");
                }
                "/interaction_profiles/valve/index_controller" => {
                    for hand in ["left", "right"] {
                        bind!(&trigger, &format!("/user/hand/{hand}/input/trigger/value"));
                        bind!(&grip, &format!("/user/hand/{hand}/input/squeeze/value"));
                        bind!(&stick, &format!("/user/hand/{hand}/input/thumbstick"));
                        bind!(&button_a, &format!("/user/hand/{hand}/input/a/click"));
                        bind!(&button_b, &format!("/user/hand/{hand}/input/b/click"));
                    }
                }
                "/interaction_profiles/microsoft/motion_controller" => {
                    for hand in ["left", "right"] {
                        bind!(&trigger, &format!("/user/hand/{hand}/input/trigger/value"));
                        bind!(&grip_click, &format!("/user/hand/{hand}/input/squeeze/click"));
                        bind!(&stick, &format!("/user/hand/{hand}/input/thumbstick"));
                        bind!(&button_a, &format!("/user/hand/{hand}/input/trackpad/click"));
                        bind!(&menu, &format!("/user/hand/{hand}/input/menu/click"));
                    }
                }
                "/interaction_profiles/htc/vive_controller" => {
                    for hand in ["left", "right"] {
                        bind!(&trigger, &format!("/user/hand/{hand}/input/trigger/value"));
                        bind!(&grip_click, &format!("/user/hand/{hand}/input/squeeze/click"));
                        bind!(&stick, &format!("/user/hand/{hand}/input/trackpad"));
                        bind!(&button_a, &format!("/user/hand/{hand}/input/trackpad/click"));
                        bind!(&menu, &format!("/user/hand/{hand}/input/menu/click"));
                    }
                }
                _ => {}
            }
            if let Err(e) = instance.suggest_interaction_profile_bindings(profile_path, &bindings) {
                warn!(profile, "OpenXR binding suggestion rejected: {e:?}");
            }
        }

        session
            .attach_action_sets(&[&action_set])
            .map_err(|e| err("attach actions", e))?;

        let left_space = grip_pose
            .create_space(session, left, xr::Posef::IDENTITY)
            .map_err(|e| err("left grip space", e))?;
        let right_space = grip_pose
            .create_space(session, right, xr::Posef::IDENTITY)
            .map_err(|e| err("right grip space", e))?;

        Ok(Self {
            action_set,
            trigger,
            trigger_click,
            grip,
            grip_click,
            stick,
            button_a,
            button_b,
            menu,
            _grip_pose: grip_pose,
            hands,
            spaces: [left_space, right_space],
        })
    }

    /// Sync actions and rebuild both controllers from scratch.
    pub(crate) fn poll<G: xr::Graphics>(
        &self,
        session: &xr::Session<G>,
        reference_space: Option<&xr::Space>,
        time: xr::Time,
    ) -> VrResult<ControllerPair> {
        session
            .sync_actions(&[xr::ActiveActionSet::new(&self.action_set)])
            .map_err(|e| VrError::Runtime(format!("OpenXR sync actions: {e:?}")))?;

        let mut states = [ControllerState::default(); 2];
        for (index, state) in states.iter_mut().enumerate() {
            let path = self.hands[index];
            let value = |action: &xr::Action<f32>| {
                action
                    .state(session, path)
                    .map(|s| s.current_state)
                    .unwrap_or(0.0)
            };
            let pressed = |action: &xr::Action<bool>| {
                action
                    .state(session, path)
                    .map(|s| s.current_state)
                    .unwrap_or(false)
            };
            let click = |action: &xr::Action<bool>| if pressed(action) { 1.0 } else { 0.0 };

            let stick = self
                .stick
                .state(session, path)
                .map(|s| s.current_state)
                .unwrap_or(xr::Vector2f { x: 0.0, y: 0.0 });

            state.trigger = value(&self.trigger).max(click(&self.trigger_click));
            state.grip = value(&self.grip).max(click(&self.grip_click));
            state.thumbstick = [stick.x, stick.y];
            state.button_a = pressed(&self.button_a);
            state.button_b = pressed(&self.button_b);
            state.menu = pressed(&self.menu);

            if let Some(base) = reference_space {
                if let Ok(location) = self.spaces[index].locate(base, time) {
                    let flags = location.location_flags;
                    if flags.contains(xr::SpaceLocationFlags::POSITION_VALID)
                        && flags.contains(xr::SpaceLocationFlags::ORIENTATION_VALID)
                    {
                        state.pose = to_pose(location.pose);
                    }
                }
            }
        }

        Ok(states.into())
    }
}
