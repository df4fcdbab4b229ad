//! Runtime tunables for the motion filters.
//!
//! Every section deserializes from TOML with per-field defaults, so a file only
//! needs to name the values it overrides:
//!
//! ```toml
//! [foe]
//! update_radius = 30
//!
//! [ttc]
//! directional_gate = "none"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MotionError, Result};

/// Shape of the neighborhood updated around the current FOE estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowShape {
    /// Rows bounded per column by `cy ± sqrt(R² − (x−cx)²)`.
    Circle,
    Square,
}

/// Quadrant restriction applied before a TTC observation is admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionalGate {
    /// Only flow with `vy < 0` at events with `distY < 0` (above the FOE in image rows).
    UpperHalf,
    None,
}

impl DirectionalGate {
    pub fn admits(self, dist_y: i32, vy: f64) -> bool {
        match self {
            DirectionalGate::UpperHalf => vy < 0.0 && dist_y < 0,
            DirectionalGate::None => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoeConfig {
    /// Radius in pixels of the window updated around the current FOE.
    pub update_radius: u32,
    /// Probability decay time constant in microseconds.
    pub decay_tau_us: f64,
    /// Weight reinforcement by the event's flow confidence instead of 1.
    pub use_confidence: bool,
    pub window: WindowShape,
}

impl Default for FoeConfig {
    fn default() -> Self {
        Self {
            update_radius: 50,
            decay_tau_us: 1000.0,
            use_confidence: true,
            window: WindowShape::Circle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtcConfig {
    /// Acceptance radius around the FOE in pixels.
    pub distance_threshold: u32,
    /// Events closer than this to the FOE are ignored.
    pub inner_exclusion_radius: u32,
    /// Minimum flow magnitude in pixels/s.
    pub velocity_threshold: f64,
    /// Maximum admitted time to contact in seconds.
    pub ttc_threshold: f64,
    /// Maximum angle in degrees between the FOE offset and the flow direction.
    pub valid_angle_deg: f64,
    /// Smoothing factor of the packet-level moving average.
    pub alpha_ttc: f64,
    /// Observations averaged cumulatively before switching to the moving average.
    pub init_count: u32,
    pub directional_gate: DirectionalGate,
    /// Count flow that does not diverge from the ground-truth FOE.
    pub central_filter: bool,
}

impl Default for TtcConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 30,
            inner_exclusion_radius: 10,
            velocity_threshold: 0.5,
            ttc_threshold: 10.0,
            valid_angle_deg: 120.0,
            alpha_ttc: 0.033,
            init_count: 10,
            directional_gate: DirectionalGate::UpperHalf,
            central_filter: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Initial half-extent of a new cluster in pixels.
    pub init_dim: f32,
    /// Activity decay time constant in microseconds.
    pub activity_decay_us: f64,
    /// Clusters whose activity drops below this are removed.
    pub activity_threshold: f64,
    /// Preallocated list capacity.
    pub capacity: usize,
    /// Hard cap; creating a cluster beyond it evicts the least active one.
    pub max_clusters: usize,
    /// Never pick the first cluster in the list as an outlier fallback.
    pub skip_first_fallback: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            init_dim: 15.0,
            activity_decay_us: 100_000.0,
            activity_threshold: 0.1,
            capacity: 10,
            max_clusters: 64,
            skip_first_fallback: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationConfig {
    /// Half length of the receptive field along the orientation axis.
    pub length: u32,
    /// Half width of the receptive field across the orientation axis.
    pub width: u32,
    /// Time differences above this are discarded as outliers (µs).
    pub dt_reject_threshold_us: i64,
    /// An orientation is accepted when its score is below this (µs).
    pub min_dt_threshold_us: i64,
    /// Score by mean dt instead of max dt.
    pub average_dt: bool,
    /// Emit every passing orientation instead of a single winner.
    pub multi_output: bool,
    pub history_enabled: bool,
    pub history_mixing_factor: f32,
    pub history_diff_threshold: f32,
    /// Emit unlabeled events for inputs without an accepted orientation.
    pub pass_all_events: bool,
    pub subsample_shift: u32,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            length: 3,
            width: 0,
            dt_reject_threshold_us: 50_000,
            min_dt_threshold_us: 100_000,
            average_dt: true,
            multi_output: false,
            history_enabled: false,
            history_mixing_factor: 0.1,
            history_diff_threshold: 0.5,
            pass_all_events: false,
            subsample_shift: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Return the unmodified input packet instead of the processed one.
    pub display_raw_input: bool,
    /// FOE log window start, seconds.
    pub log_begin_s: f64,
    /// FOE log window end, seconds.
    pub log_end_s: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            display_raw_input: false,
            log_begin_s: 0.0,
            log_end_s: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub foe: FoeConfig,
    pub ttc: TtcConfig,
    pub cluster: ClusterConfig,
    pub orientation: OrientationConfig,
    pub output: OutputConfig,
}

impl MotionConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MotionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges; every violation is reported, not just the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        let positive = |errors: &mut Vec<String>, name: &str, v: f64| {
            if !v.is_finite() || v <= 0.0 {
                errors.push(format!("{} must be finite and > 0, got {}", name, v));
            }
        };

        positive(&mut errors, "foe.decay_tau_us", self.foe.decay_tau_us);
        if self.foe.update_radius == 0 {
            errors.push("foe.update_radius must be > 0".into());
        }

        positive(&mut errors, "ttc.ttc_threshold", self.ttc.ttc_threshold);
        if !self.ttc.velocity_threshold.is_finite() || self.ttc.velocity_threshold < 0.0 {
            errors.push(format!(
                "ttc.velocity_threshold must be finite and >= 0, got {}",
                self.ttc.velocity_threshold
            ));
        }
        if !(0.0..=180.0).contains(&self.ttc.valid_angle_deg) {
            errors.push(format!(
                "ttc.valid_angle_deg must be in [0, 180], got {}",
                self.ttc.valid_angle_deg
            ));
        }
        if !(self.ttc.alpha_ttc > 0.0 && self.ttc.alpha_ttc <= 1.0) {
            errors.push(format!(
                "ttc.alpha_ttc must be in (0, 1], got {}",
                self.ttc.alpha_ttc
            ));
        }
        if self.ttc.inner_exclusion_radius >= self.ttc.distance_threshold {
            errors.push(format!(
                "ttc.inner_exclusion_radius ({}) must be below ttc.distance_threshold ({})",
                self.ttc.inner_exclusion_radius, self.ttc.distance_threshold
            ));
        }

        positive(&mut errors, "cluster.init_dim", self.cluster.init_dim as f64);
        positive(
            &mut errors,
            "cluster.activity_decay_us",
            self.cluster.activity_decay_us,
        );
        if !(self.cluster.activity_threshold > 0.0 && self.cluster.activity_threshold < 1.0) {
            errors.push(format!(
                "cluster.activity_threshold must be in (0, 1), got {}",
                self.cluster.activity_threshold
            ));
        }
        if self.cluster.max_clusters == 0 {
            errors.push("cluster.max_clusters must be > 0".into());
        }

        let ori = &self.orientation;
        if ori.length == 0 {
            errors.push("orientation.length must be > 0".into());
        }
        if ori.dt_reject_threshold_us <= 0 || ori.min_dt_threshold_us <= 0 {
            errors.push("orientation dt thresholds must be > 0".into());
        }
        if !(0.0..=1.0).contains(&ori.history_mixing_factor) {
            errors.push(format!(
                "orientation.history_mixing_factor must be in [0, 1], got {}",
                ori.history_mixing_factor
            ));
        }
        if ori.subsample_shift > 8 {
            errors.push(format!(
                "orientation.subsample_shift must be <= 8, got {}",
                ori.subsample_shift
            ));
        }

        if self.output.log_end_s < self.output.log_begin_s {
            errors.push("output.log_end_s must not precede output.log_begin_s".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MotionError::Config(
                errors
                    .iter()
                    .map(|e| format!("  - {}", e))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }
    }
}
