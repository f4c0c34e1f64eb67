#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: [f32; 3],
    /// Unit quaternion, `[x, y, z, w]`.
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0, 0.0, 0.0],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Half-angles of a view frustum in radians. Left and down are usually negative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left = 0,
    Right = 1,
}

impl Hand {
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub trigger: f32,
    pub grip: f32,
    pub thumbstick: [f32; 2],
    /// A on the right controller, X on the left.
    pub button_a: bool,
    /// B on the right controller, Y on the left.
    pub button_b: bool,
    pub menu: bool,
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerPair {
    pub left: ControllerState,
    pub right: ControllerState,
}

impl ControllerPair {
    pub fn get(&self, hand: Hand) -> ControllerState {
        match hand {
            Hand::Left => self.left,
            Hand::Right => self.right,
        }
    }
}

impl From<[ControllerState; 2]> for ControllerPair {
    fn from([left, right]: [ControllerState; 2]) -> Self {
        Self { left, right }
    }
}

/// Console-style pad snapshot derived from the two controllers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NormalizedGamepadState {
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
