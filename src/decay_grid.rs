use crate::error::{check_dimensions, check_positive, Result};

/// Per-pixel probability grid with lazy exponential decay.
///
/// Each cell holds a non-negative value and the timestamp of its last
/// reinforcement. Reinforcing a cell adds weight and stamps the time;
/// touching it without reinforcement multiplies it by
///
///   exp(-|t - t_last| / decay_tau_us)
///
/// so a cell only decays when it is visited. The absolute elapsed time keeps
/// the factor at most 1 if timestamps wrap or arrive out of order.
pub struct DecayGrid {
    values: Vec<f64>,
    last_update: Vec<i64>,
    width: usize,
    height: usize,
    decay_tau_us: f64,
}

impl DecayGrid {
    /// Create a zeroed grid.
    pub fn new(width: u32, height: u32, decay_tau_us: f64) -> Result<Self> {
        let (w, h) = check_dimensions(width, height)?;
        check_positive("decay_tau_us", decay_tau_us)?;
        Ok(Self {
            values: vec![0.0; w * h],
            last_update: vec![0; w * h],
            width: w,
            height: h,
            decay_tau_us,
        })
    }

    /// Reinforce or decay the cell at `(x, y)`.
    ///
    /// Out-of-range coordinates are ignored.
    pub fn update(&mut self, x: usize, y: usize, reinforce: bool, timestamp: i64, weight: f64) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = y * self.width + x;
        if reinforce {
            self.values[idx] += weight;
            self.last_update[idx] = timestamp;
        } else {
            let dt = timestamp.abs_diff(self.last_update[idx]) as f64;
            self.values[idx] *= (-dt / self.decay_tau_us).exp();
        }
    }

    /// Current (not decayed) value of a cell; 0 outside the grid.
    pub fn value(&self, x: usize, y: usize) -> f64 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.values[y * self.width + x]
    }

    /// Value the cell would have if touched without reinforcement at `timestamp`.
    pub fn decayed_value(&self, x: usize, y: usize, timestamp: i64) -> f64 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        let idx = y * self.width + x;
        let dt = timestamp.abs_diff(self.last_update[idx]) as f64;
        self.values[idx] * (-dt / self.decay_tau_us).exp()
    }

    pub fn last_update(&self, x: usize, y: usize) -> i64 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.last_update[y * self.width + x]
    }

    /// Raw row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn decay_tau_us(&self) -> f64 {
        self.decay_tau_us
    }

    pub fn set_decay_tau_us(&mut self, decay_tau_us: f64) -> Result<()> {
        check_positive("decay_tau_us", decay_tau_us)?;
        self.decay_tau_us = decay_tau_us;
        Ok(())
    }

    /// Zero all values and timestamps.
    pub fn reset(&mut self) {
        self.values.fill(0.0);
        self.last_update.fill(0);
    }

    /// Reallocate for new sensor dimensions; all state is discarded.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let (w, h) = check_dimensions(width, height)?;
        self.values = vec![0.0; w * h];
        self.last_update = vec![0; w * h];
        self.width = w;
        self.height = h;
        Ok(())
    }
}
