#![forbid(unsafe_code)]

pub mod callbacks;
pub mod input;
pub mod mode;
pub mod pose;
pub mod types;

pub use callbacks::{HostCallbacks, NoopCallbacks, SessionState};
pub use input::{aggregate, InputHandle};
pub use mode::{InteractionMode, ModeSwitcher};
pub use pose::adjust_pose;
pub use types::{ControllerPair, ControllerState, Eye, Fov, Hand, NormalizedGamepadState, Pose};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VrError {
    #[error("initialization failed: {0}")]
    Init(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("frame protocol violation: {0}")]
    Protocol(String),
    #[error("invalid interaction mode: {0}")]
    Mode(i32),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type VrResult<T> = Result<T, VrError>;
