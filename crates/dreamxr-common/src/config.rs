//! Session and renderer configuration.
//!
//! Values are loaded from JSON and then normalized: out-of-range numbers are
//! clamped, but every clamp is reported so callers (and tests) can see it.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

pub const MIN_RESOLUTION_SCALE: f32 = 0.5;
pub const MAX_RESOLUTION_SCALE: f32 = 1.0;
pub const DEFAULT_MSAA_SAMPLES: u32 = 4;

/// A value that may have been forced into range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped<T> {
    pub value: T,
    pub clamped: bool,
}

/// Record of one value that normalization changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClampEvent {
    pub field: &'static str,
    pub requested: f32,
    pub applied: f32,
}

/// Clamp a resolution scale into `[0.5, 1.0]`, logging when it moved.
pub fn clamp_scale(field: &'static str, requested: f32) -> Clamped<f32> {
    let value = if requested.is_nan() {
        MAX_RESOLUTION_SCALE
    } else {
        requested.clamp(MIN_RESOLUTION_SCALE, MAX_RESOLUTION_SCALE)
    };
    let clamped = value != requested;
    if clamped {
        warn!(field, requested, applied = value, "resolution scale clamped");
    }
    Clamped { value, clamped }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleRange {
    pub min_scale: f32,
    pub max_scale: f32,
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self {
            min_scale: 0.7,
            max_scale: 1.0,
        }
    }
}

impl ScaleRange {
    /// Clamp both bounds, returning the events for any that changed.
    pub fn clamped(min_scale: f32, max_scale: f32) -> (Self, Vec<ClampEvent>) {
        let mut events = Vec::new();
        let min = clamp_scale("dynamic_resolution.min_scale", min_scale);
        if min.clamped {
            events.push(ClampEvent {
                field: "dynamic_resolution.min_scale",
                requested: min_scale,
                applied: min.value,
            });
        }
        let max = clamp_scale("dynamic_resolution.max_scale", max_scale);
        if max.clamped {
            events.push(ClampEvent {
                field: "dynamic_resolution.max_scale",
                requested: max_scale,
                applied: max.value,
            });
        }
        (
            Self {
                min_scale: min.value,
                max_scale: max.value,
            },
            events,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VrConfig {
    pub application_name: String,
    /// Interaction mode id at startup (0 cinema, 1 arcade, 2 immersive).
    pub initial_mode: i32,
    pub msaa_samples: u32,
    /// Multiplier applied to the runtime's recommended eye resolution.
    pub resolution_scale: f32,
    pub dynamic_resolution: ScaleRange,
    pub multiview: bool,
    pub foveated: bool,
    pub near_plane: f32,
    pub clear_color: [f32; 4],
    pub mode_switch_cooldown_ms: u64,
}

impl Default for VrConfig {
    fn default() -> Self {
        Self {
            application_name: "DreamXR".to_string(),
            initial_mode: 0,
            msaa_samples: DEFAULT_MSAA_SAMPLES,
            resolution_scale: 1.0,
            dynamic_resolution: ScaleRange::default(),
            multiview: false,
            foveated: false,
            near_plane: 0.01,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            mode_switch_cooldown_ms: 500,
        }
    }
}

impl VrConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        Ok(cfg.normalized().0)
    }

    /// Bring every numeric field into its legal range.
    pub fn normalized(mut self) -> (Self, Vec<ClampEvent>) {
        let mut events = Vec::new();

        let scale = clamp_scale("resolution_scale", self.resolution_scale);
        if scale.clamped {
            events.push(ClampEvent {
                field: "resolution_scale",
                requested: self.resolution_scale,
                applied: scale.value,
            });
        }
        self.resolution_scale = scale.value;

        let (range, range_events) = ScaleRange::clamped(
            self.dynamic_resolution.min_scale,
            self.dynamic_resolution.max_scale,
        );
        self.dynamic_resolution = range;
        events.extend(range_events);

        if !matches!(self.msaa_samples, 1 | 2 | 4 | 8) {
            warn!(
                requested = self.msaa_samples,
                applied = DEFAULT_MSAA_SAMPLES,
                "unsupported MSAA sample count"
            );
            events.push(ClampEvent {
                field: "msaa_samples",
                requested: self.msaa_samples as f32,
                applied: DEFAULT_MSAA_SAMPLES as f32,
            });
            self.msaa_samples = DEFAULT_MSAA_SAMPLES;
        }

        if !(self.near_plane > 0.0) {
            warn!(requested = self.near_plane, "near plane must be positive");
            events.push(ClampEvent {
                field: "near_plane",
                requested: self.near_plane,
                applied: 0.01,
            });
            self.near_plane = 0.01;
        }

        (self, events)
    }

    pub fn validate(&self) -> Result<()> {
        if self.application_name.trim().is_empty() {
            return Err(Error::config("application_name must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_scale_reports_only_changes() {
        let inside = clamp_scale("s", 0.8);
        assert_eq!(inside.value, 0.8);
        assert!(!inside.clamped);

        let low = clamp_scale("s", 0.2);
        assert_eq!(low.value, 0.5);
        assert!(low.clamped);

        let high = clamp_scale("s", 1.7);
        assert_eq!(high.value, 1.0);
        assert!(high.clamped);
    }

    #[test]
    fn test_scale_range_events() {
        let (range, events) = ScaleRange::clamped(0.1, 0.9);
        assert_eq!(range.min_scale, 0.5);
        assert_eq!(range.max_scale, 0.9);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field, "dynamic_resolution.min_scale");
        assert_eq!(events[0].requested, 0.1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = VrConfig::from_json_str(r#"{"msaa_samples": 2, "foveated": true}"#).unwrap();
        assert_eq!(cfg.msaa_samples, 2);
        assert!(cfg.foveated);
        assert_eq!(cfg.mode_switch_cooldown_ms, 500);
        assert_eq!(cfg.application_name, "DreamXR");
    }

    #[test]
    fn test_normalized_fixes_bad_values() {
        let cfg = VrConfig {
            msaa_samples: 3,
            resolution_scale: 2.0,
            near_plane: 0.0,
            ..VrConfig::default()
        };
        let (cfg, events) = cfg.normalized();
        assert_eq!(cfg.msaa_samples, 4);
        assert_eq!(cfg.resolution_scale, 1.0);
        assert_eq!(cfg.near_plane, 0.01);
        let fields: Vec<_> = events.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["resolution_scale", "msaa_samples", "near_plane"]);
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let err = VrConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
