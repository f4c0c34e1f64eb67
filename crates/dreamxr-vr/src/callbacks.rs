use std::fmt;

use crate::InteractionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    InstanceReady,
    SessionReady,
    Running,
    Stopped,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::InstanceReady => "instance-ready",
            SessionState::SessionReady => "session-ready",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications delivered back to the host application.
pub trait HostCallbacks: Send + Sync {
    // Host shows `name` as UI feedback.
    fn on_mode_changed(&self, mode: InteractionMode, name: &str);
    fn on_session_state(&self, state: SessionState);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl HostCallbacks for NoopCallbacks {
    fn on_mode_changed(&self, _mode: InteractionMode, _name: &str) {}
    fn on_session_state(&self, _state: SessionState) {}
}
