use tracing::info;

use crate::config::{FoeConfig, WindowShape};
use crate::decay_grid::DecayGrid;
use crate::error::{check_dimensions, MotionError, Result};
use crate::event::FlowEvent;

/// Focus-of-expansion estimator (Clady et al., 2014).
///
/// Every flow event votes for the pixels lying behind it with respect to its
/// flow direction: for a pixel `p` in the update window,
///
///   (e - p) · v > 0   =>  reinforce p
///   otherwise         =>  decay p
///
/// Under forward self-motion all flow radiates from the FOE, so the FOE is
/// the only point every event keeps reinforcing. The estimate is the most
/// probable cell seen while scanning the window, and the window is centered
/// on the current estimate so the per-event cost stays bounded by the radius.
pub struct FoeEstimator {
    grid: DecayGrid,
    foe_x: i32,
    foe_y: i32,
    max_probability: f64,
    radius: i32,
    window: WindowShape,
    use_confidence: bool,
}

impl FoeEstimator {
    pub fn new(width: u32, height: u32, config: &FoeConfig) -> Result<Self> {
        if config.update_radius == 0 || config.update_radius > crate::MAX_SENSOR_DIM {
            return Err(MotionError::InvalidParameter {
                name: "update_radius",
                reason: format!(
                    "must be in 1..={}, got {}",
                    crate::MAX_SENSOR_DIM,
                    config.update_radius
                ),
            });
        }
        let grid = DecayGrid::new(width, height, config.decay_tau_us)?;
        let mut estimator = Self {
            grid,
            foe_x: 0,
            foe_y: 0,
            max_probability: 0.0,
            radius: config.update_radius as i32,
            window: config.window,
            use_confidence: config.use_confidence,
        };
        estimator.center_estimate();
        Ok(estimator)
    }

    fn center_estimate(&mut self) {
        self.foe_x = self.grid.width() as i32 / 2 - 1;
        self.foe_y = self.grid.height() as i32 / 2 - 1;
        self.max_probability = 0.0;
    }

    /// Column range `[lo, hi]` of the update window, clipped to the sensor.
    fn column_bounds(&self) -> (i32, i32) {
        let lo = (self.foe_x - self.radius).max(0);
        let hi = (self.foe_x + self.radius).min(self.grid.width() as i32 - 1);
        (lo, hi)
    }

    /// Row range `[lo, hi]` of the update window in column `ix`, clipped to the sensor.
    fn row_bounds(&self, ix: i32) -> (i32, i32) {
        let (lo, hi) = match self.window {
            WindowShape::Square => (self.foe_y - self.radius, self.foe_y + self.radius),
            WindowShape::Circle => {
                let dx = (ix - self.foe_x) as f64;
                let r = self.radius as f64;
                let half = (r * r - dx * dx).max(0.0).sqrt();
                let cy = self.foe_y as f64;
                ((cy - half).round() as i32, (cy + half).round() as i32)
            }
        };
        (lo.max(0), hi.min(self.grid.height() as i32 - 1))
    }

    /// Vote with one flow event and refresh the estimate.
    ///
    /// Events with zero speed are ignored. Returns the number of grid cells
    /// touched, which is zero when the window does not intersect the sensor.
    pub fn process_event(&mut self, event: &FlowEvent) -> usize {
        if event.speed == 0.0 {
            return 0;
        }
        self.max_probability = 0.0;

        let ex = event.x as f64;
        let ey = event.y as f64;
        let vx = event.vx as f64;
        let vy = event.vy as f64;
        // Cells must never go negative.
        let weight = if self.use_confidence {
            (event.confidence as f64).max(0.0)
        } else {
            1.0
        };

        // Bounds come from the estimate at the start of the event; the running
        // winner is only committed after the scan.
        let (x_lo, x_hi) = self.column_bounds();

        let mut touched = 0;
        let mut best: Option<(i32, i32)> = None;
        for ix in x_lo..=x_hi {
            let (y_lo, y_hi) = self.row_bounds(ix);
            for iy in y_lo..=y_hi {
                let reinforce = (ex - ix as f64) * vx + (ey - iy as f64) * vy > 0.0;
                let (cx, cy) = (ix as usize, iy as usize);
                self.grid.update(cx, cy, reinforce, event.timestamp, weight);
                touched += 1;

                let p = self.grid.value(cx, cy);
                if p > self.max_probability {
                    self.max_probability = p;
                    best = Some((ix, iy));
                }
            }
        }

        if let Some((bx, by)) = best {
            self.foe_x = bx;
            self.foe_y = by;
        }
        touched
    }

    /// Current FOE estimate in pixel coordinates.
    pub fn foe(&self) -> (i32, i32) {
        (self.foe_x, self.foe_y)
    }

    /// Highest probability seen while scanning the window of the last event.
    pub fn winning_probability(&self) -> f64 {
        self.max_probability
    }

    /// Stored probability at the current estimate.
    pub fn estimate_probability(&self) -> f64 {
        if self.foe_x < 0 || self.foe_y < 0 {
            return 0.0;
        }
        self.grid.value(self.foe_x as usize, self.foe_y as usize)
    }

    pub fn grid(&self) -> &DecayGrid {
        &self.grid
    }

    pub fn radius(&self) -> u32 {
        self.radius as u32
    }

    /// Clear the grid and return the estimate to the sensor center.
    pub fn reset(&mut self) {
        self.grid.reset();
        self.center_estimate();
        info!(
            foe_x = self.foe_x,
            foe_y = self.foe_y,
            "FOE estimator reset"
        );
    }

    /// Reallocate for new sensor dimensions and recenter.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        check_dimensions(width, height)?;
        self.grid.resize(width, height)?;
        self.center_estimate();
        info!(width, height, "FOE estimator resized");
        Ok(())
    }
}
