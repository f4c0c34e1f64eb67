//! Controller telemetry to console pad mapping.

use std::sync::{Arc, Mutex};

use crate::{ControllerPair, ControllerState, Hand, NormalizedGamepadState};

const BUTTON_THRESHOLD: f32 = 0.5;
const DPAD_THRESHOLD: f32 = 0.7;

/// Map the latest controller snapshots onto the pad.
///
/// Face buttons A and B read the right hand's trigger and grip, while the
/// analog trigger axes read each hand's own trigger.
pub fn aggregate(left: &ControllerState, right: &ControllerState) -> NormalizedGamepadState {
    let [stick_x, stick_y] = right.thumbstick;
    NormalizedGamepadState {
        a: right.trigger > BUTTON_THRESHOLD,
        b: right.grip > BUTTON_THRESHOLD,
        x: right.button_a,
        y: right.button_b,
        start: right.menu,
        dpad_up: stick_y > DPAD_THRESHOLD,
        dpad_down: stick_y < -DPAD_THRESHOLD,
        dpad_left: stick_x < -DPAD_THRESHOLD,
        dpad_right: stick_x > DPAD_THRESHOLD,
        analog_x: stick_x,
        analog_y: stick_y,
        lt: left.trigger,
        rt: right.trigger,
    }
}

/// Shared controller snapshots. Writers replace the pair as a whole, so a
/// reader on another thread never sees a half-updated hand.
#[derive(Debug, Clone, Default)]
pub struct InputHandle {
    inner: Arc<Mutex<ControllerPair>>,
}

impl InputHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, pair: ControllerPair) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = pair;
    }

    pub fn snapshot(&self) -> ControllerPair {
        match self.inner.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn controller(&self, hand: Hand) -> ControllerState {
        self.snapshot().get(hand)
    }

    pub fn normalized(&self) -> NormalizedGamepadState {
        let pair = self.snapshot();
        aggregate(&pair.left, &pair.right)
    }
}
