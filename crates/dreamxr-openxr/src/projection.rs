//! Per-eye matrices handed to the scene renderer.
//!
//! Both matrices are laid out as flat column-major arrays, the form the
//! renderer uploads directly.

use dreamxr_vr::{Fov, Pose};
use glam::Mat4;

pub const DEFAULT_NEAR_PLANE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeMatrices {
    pub projection: Mat4,
    pub view: Mat4,
}

impl EyeMatrices {
    pub fn new(pose: &Pose, fov: &Fov, near: f32) -> Self {
        Self {
            projection: projection_matrix(fov, near),
            view: view_matrix(pose),
        }
    }
}

/// Off-axis perspective from tangents of the four half-angles. Only the
/// near plane is encoded; there is no far clip term.
pub fn projection_matrix(fov: &Fov, near: f32) -> Mat4 {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = tan_up - tan_down;

    let mut m = [0.0f32; 16];
    m[0] = 2.0 / tan_width;
    m[2] = (tan_right + tan_left) / tan_width;
    m[5] = 2.0 / tan_height;
    m[6] = (tan_up + tan_down) / tan_height;
    m[10] = -1.0;
    m[11] = -near;
    m[15] = 1.0;
    Mat4::from_cols_array(&m)
}

/// Rotation from the pose quaternion with the position in the last column.
pub fn view_matrix(pose: &Pose) -> Mat4 {
    let [x, y, z, w] = pose.orientation;
    let [px, py, pz] = pose.position;

    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, xz, yz) = (x * y, x * z, y * z);
    let (wx, wy, wz) = (w * x, w * y, w * z);

    Mat4::from_cols_array(&[
        1.0 - 2.0 * (yy + zz),
        2.0 * (xy + wz),
        2.0 * (xz - wy),
        0.0,
        2.0 * (xy - wz),
        1.0 - 2.0 * (xx + zz),
        2.0 * (yz + wx),
        0.0,
        2.0 * (xz + wy),
        2.0 * (yz - wx),
        1.0 - 2.0 * (xx + yy),
        0.0,
        px,
        py,
        pz,
        1.0,
    ])
}
