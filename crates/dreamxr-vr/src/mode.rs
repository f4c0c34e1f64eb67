use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{VrError, VrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InteractionMode {
    #[default]
    Cinema = 0,
    Arcade = 1,
    Immersive = 2,
}

impl InteractionMode {
    pub const ALL: [InteractionMode; 3] = [
        InteractionMode::Cinema,
        InteractionMode::Arcade,
        InteractionMode::Immersive,
    ];

    pub fn next(self) -> Self {
        match self {
            InteractionMode::Cinema => InteractionMode::Arcade,
            InteractionMode::Arcade => InteractionMode::Immersive,
            InteractionMode::Immersive => InteractionMode::Cinema,
        }
    }

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            InteractionMode::Cinema => "Cinema Mode",
            InteractionMode::Arcade => "Arcade Mode",
            InteractionMode::Immersive => "Immersive Mode",
        }
    }

    /// Name for a raw id, `None` when the id is not a defined mode.
    pub fn name_of(id: i32) -> Option<&'static str> {
        InteractionMode::try_from(id).ok().map(InteractionMode::name)
    }
}

impl TryFrom<i32> for InteractionMode {
    type Error = VrError;

    fn try_from(id: i32) -> VrResult<Self> {
        match id {
            0 => Ok(InteractionMode::Cinema),
            1 => Ok(InteractionMode::Arcade),
            2 => Ok(InteractionMode::Immersive),
            other => Err(VrError::Mode(other)),
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Active mode plus the debounce used for key-driven cycling.
#[derive(Debug)]
pub struct ModeSwitcher {
    current: InteractionMode,
    cooldown: Duration,
    last_request: Option<Instant>,
}

impl ModeSwitcher {
    pub fn new(initial: InteractionMode, cooldown: Duration) -> Self {
        Self {
            current: initial,
            cooldown,
            last_request: None,
        }
    }

    pub fn current(&self) -> InteractionMode {
        self.current
    }

    /// Returns the new mode when it changed, `None` when already active.
    pub fn set(&mut self, id: i32) -> VrResult<Option<InteractionMode>> {
        let mode = InteractionMode::try_from(id).map_err(|e| {
            warn!(mode_id = id, "rejected interaction mode");
            e
        })?;
        if mode == self.current {
            debug!(mode = %mode, "mode already active");
            return Ok(None);
        }
        self.current = mode;
        info!(mode = %mode, "interaction mode changed");
        Ok(Some(mode))
    }

    pub fn cycle(&mut self) -> InteractionMode {
        self.current = self.current.next();
        info!(mode = %self.current, "interaction mode cycled");
        self.current
    }

    /// Cycles only when the cooldown has elapsed since the last accepted request.
    pub fn request_cycle(&mut self, now: Instant) -> Option<InteractionMode> {
        if let Some(last) = self.last_request {
            if now.saturating_duration_since(last) < self.cooldown {
                debug!("mode cycle request ignored during cooldown");
                return None;
            }
        }
        self.last_request = Some(now);
        Some(self.cycle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_returns_after_three_steps() {
        for start in InteractionMode::ALL {
            assert_eq!(start.next().next().next(), start);
        }
        assert_eq!(InteractionMode::Cinema.next(), InteractionMode::Arcade);
        assert_eq!(InteractionMode::Arcade.next(), InteractionMode::Immersive);
        assert_eq!(InteractionMode::Immersive.next(), InteractionMode::Cinema);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!(matches!(InteractionMode::try_from(3), Err(VrError::Mode(3))));
        assert!(matches!(InteractionMode::try_from(-1), Err(VrError::Mode(-1))));
        assert_eq!(InteractionMode::name_of(7), None);
        assert_eq!(InteractionMode::name_of(1), Some("Arcade Mode"));
    }

    #[test]
    fn test_set_same_mode_is_noop() {
        let mut switcher = ModeSwitcher::new(InteractionMode::Arcade, Duration::ZERO);
        assert_eq!(switcher.set(1).unwrap(), None);
        assert_eq!(switcher.current(), InteractionMode::Arcade);
        assert_eq!(switcher.set(2).unwrap(), Some(InteractionMode::Immersive));
    }

    #[test]
    fn test_set_invalid_keeps_state() {
        let mut switcher = ModeSwitcher::new(InteractionMode::Immersive, Duration::ZERO);
        assert!(switcher.set(9).is_err());
        assert_eq!(switcher.current(), InteractionMode::Immersive);
    }

    #[test]
    fn test_request_cycle_debounced() {
        let mut switcher = ModeSwitcher::new(InteractionMode::Cinema, Duration::from_millis(500));
        let t0 = Instant::now();
        assert_eq!(switcher.request_cycle(t0), Some(InteractionMode::Arcade));
        assert_eq!(switcher.request_cycle(t0 + Duration::from_millis(200)), None);
        assert_eq!(switcher.current(), InteractionMode::Arcade);
        assert_eq!(
            switcher.request_cycle(t0 + Duration::from_millis(500)),
            Some(InteractionMode::Immersive)
        );
    }
}
