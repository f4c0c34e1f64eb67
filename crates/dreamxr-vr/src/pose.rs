//! Head pose adjustment per interaction mode.

use glam::{Quat, Vec3};

use crate::{InteractionMode, Pose};

const CINEMA_OFFSET: Vec3 = Vec3::new(0.0, -0.2, -2.5);
const ARCADE_OFFSET: Vec3 = Vec3::new(0.0, -1.0, -1.5);

/// Offset applied to the head in the pose's own frame, `None` for full 6-DOF.
pub fn mode_offset(mode: InteractionMode) -> Option<Vec3> {
    match mode {
        InteractionMode::Cinema => Some(CINEMA_OFFSET),
        InteractionMode::Arcade => Some(ARCADE_OFFSET),
        InteractionMode::Immersive => None,
    }
}

/// Move the viewpoint along the pose's local axes. Orientation is never changed.
pub fn adjust_pose(mode: InteractionMode, head: Pose) -> Pose {
    let Some(offset) = mode_offset(mode) else {
        return head;
    };
    let rotation = Quat::from_array(head.orientation);
    let position = Vec3::from_array(head.position) + rotation * offset;
    Pose {
        position: position.to_array(),
        orientation: head.orientation,
    }
}
