use crate::cluster::ClusterTracker;
use crate::config::{ClusterConfig, DirectionalGate, TtcConfig};
use crate::event::FlowEvent;

/// Closed-form time to contact from the offset to the FOE and the flow at that offset.
///
/// Averages the per-axis estimates `dist / v`. Returns a non-finite value when a
/// velocity component is zero.
pub fn time_to_contact(dist_x: f64, dist_y: f64, vx: f64, vy: f64) -> f64 {
    0.5 * (dist_x / vx + dist_y / vy)
}

/// Unsigned angle in radians between two vectors; NaN if either is zero.
pub fn relative_angle(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let n1 = (x1 * x1 + y1 * y1).sqrt();
    let n2 = (x2 * x2 + y2 * y2).sqrt();
    ((x1 * x2 + y1 * y2) / (n1 * n2)).clamp(-1.0, 1.0).acos()
}

/// Why a flow event did not produce a TTC observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    ZeroSpeed,
    TooFar,
    TooClose,
    TooSlow,
    NotDiverging,
    Gate,
    OutOfRange,
}

/// Per-event TTC estimation feeding the obstacle clusters.
///
/// An event is admitted only if it lies in the annulus between the inner
/// exclusion radius and the distance threshold around the reference FOE,
/// moves fast enough, diverges from the FOE within the valid angle and
/// passes the directional gate. The resulting TTC must fall in
/// `(0, ttc_threshold)`.
pub struct TtcEstimator {
    distance_sq: i64,
    inner_sq: i64,
    velocity_threshold: f64,
    ttc_threshold: f64,
    valid_angle_rad: f64,
    alpha: f64,
    init_count: u32,
    gate: DirectionalGate,
    tracker: ClusterTracker,
    running_ttc: Option<f64>,
    observations: u32,
}

impl TtcEstimator {
    pub fn new(config: &TtcConfig, cluster: &ClusterConfig) -> Self {
        let d = config.distance_threshold as i64;
        let r = config.inner_exclusion_radius as i64;
        Self {
            distance_sq: d * d,
            inner_sq: r * r,
            velocity_threshold: config.velocity_threshold,
            ttc_threshold: config.ttc_threshold,
            valid_angle_rad: config.valid_angle_deg.to_radians(),
            alpha: config.alpha_ttc,
            init_count: config.init_count,
            gate: config.directional_gate,
            tracker: ClusterTracker::new(cluster),
            running_ttc: None,
            observations: 0,
        }
    }

    /// Compute the TTC for an event without touching any state.
    pub fn evaluate(
        &self,
        event: &FlowEvent,
        reference: (f32, f32),
    ) -> std::result::Result<f64, Rejection> {
        if event.speed == 0.0 {
            return Err(Rejection::ZeroSpeed);
        }
        let dist_x = event.x as i32 - reference.0.round() as i32;
        let dist_y = event.y as i32 - reference.1.round() as i32;
        let vx = event.vx as f64;
        let vy = event.vy as f64;

        let d2 = (dist_x as i64).pow(2) + (dist_y as i64).pow(2);
        if d2 >= self.distance_sq {
            return Err(Rejection::TooFar);
        }
        if d2 <= self.inner_sq {
            return Err(Rejection::TooClose);
        }
        if (vx * vx + vy * vy).sqrt() <= self.velocity_threshold {
            return Err(Rejection::TooSlow);
        }
        let angle = relative_angle(dist_x as f64, dist_y as f64, vx, vy);
        if angle.is_nan() || angle >= self.valid_angle_rad {
            return Err(Rejection::NotDiverging);
        }
        if !self.gate.admits(dist_y, vy) {
            return Err(Rejection::Gate);
        }

        let ttc = time_to_contact(dist_x as f64, dist_y as f64, vx, vy);
        if ttc > 0.0 && ttc < self.ttc_threshold {
            Ok(ttc)
        } else {
            Err(Rejection::OutOfRange)
        }
    }

    /// Evaluate an event and, if admitted, feed the clusters and running estimate.
    pub fn observe(&mut self, event: &FlowEvent, reference: (f32, f32)) -> Option<f64> {
        let ttc = self.evaluate(event, reference).ok()?;
        self.tracker
            .assign(event.x as i32, event.y as i32, ttc, event.timestamp);
        self.update_running(ttc);
        Some(ttc)
    }

    fn update_running(&mut self, ttc: f64) {
        let next = match self.running_ttc {
            Some(prev) if self.observations >= self.init_count => prev + self.alpha * (ttc - prev),
            Some(prev) => (prev * self.observations as f64 + ttc) / (self.observations + 1) as f64,
            None => ttc,
        };
        self.running_ttc = Some(next);
        self.observations = self.observations.saturating_add(1);
    }

    /// Coarse global TTC: cumulative mean over the first `init_count`
    /// observations, exponential moving average afterwards.
    pub fn running_ttc(&self) -> Option<f64> {
        self.running_ttc
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }

    pub fn tracker(&self) -> &ClusterTracker {
        &self.tracker
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
        self.running_ttc = None;
        self.observations = 0;
    }
}
