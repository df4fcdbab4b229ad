use tracing::{debug, warn};

use crate::config::ClusterConfig;

/// Square cluster of TTC observations, a candidate obstacle.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub center_x: f32,
    pub center_y: f32,
    /// Time to contact in seconds, averaged over assigned observations.
    pub ttc: f64,
    /// Half extent in pixels, grown by outlier assignments.
    pub dim: f32,
    pub activity: f64,
    pub last_update: i64,
}

impl Cluster {
    fn new(x: i32, y: i32, ttc: f64, timestamp: i64, init_dim: f32) -> Self {
        Self {
            center_x: x as f32,
            center_y: y as f32,
            ttc,
            dim: init_dim,
            activity: 1.0,
            last_update: timestamp,
        }
    }

    /// Overlap area between this cluster's catchment and a new square of
    /// half extent `init_dim` at `(x, y)`.
    ///
    /// Positive when the point falls within `dim + init_dim` on both axes,
    /// zero or negative otherwise.
    pub fn overlap(&self, x: i32, y: i32, init_dim: f32) -> f32 {
        let sx = self.dim + init_dim - (x as f32 - self.center_x).abs();
        let sy = self.dim + init_dim - (y as f32 - self.center_y).abs();
        if sx < 0.0 && sy < 0.0 {
            -(sx * sy)
        } else {
            sx * sy
        }
    }

    fn absorb(&mut self, x: i32, y: i32, ttc: f64, timestamp: i64) {
        self.activity += 1.0;
        self.ttc += (ttc - self.ttc) / self.activity;
        self.center_x += (x as f32 - self.center_x) / self.activity as f32;
        self.center_y += (y as f32 - self.center_y) / self.activity as f32;
        self.last_update = timestamp;
    }

    fn decay(&mut self, timestamp: i64, tau_us: f64) {
        let dt = timestamp.abs_diff(self.last_update) as f64;
        self.activity *= (-dt / tau_us).exp();
    }
}

/// Online clustering of TTC observations with activity-based pruning.
///
/// Each observation is absorbed by the first cluster that fully contains it,
/// otherwise by the cluster it overlaps most (which then grows), otherwise it
/// seeds a new cluster. Cluster activity decays exponentially with time since
/// the last assignment and clusters falling below the threshold are dropped.
pub struct ClusterTracker {
    clusters: Vec<Cluster>,
    init_dim: f32,
    activity_decay_us: f64,
    activity_threshold: f64,
    max_clusters: usize,
    skip_first_fallback: bool,
}

impl ClusterTracker {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            clusters: Vec::with_capacity(config.capacity),
            init_dim: config.init_dim,
            activity_decay_us: config.activity_decay_us,
            activity_threshold: config.activity_threshold,
            max_clusters: config.max_clusters.max(1),
            skip_first_fallback: config.skip_first_fallback,
        }
    }

    /// Assign one TTC observation.
    pub fn assign(&mut self, x: i32, y: i32, ttc: f64, timestamp: i64) {
        let inlier_area = self.init_dim * self.init_dim;
        let mut assigned = false;
        let mut best_area = 0.0f32;
        let mut best: Option<usize> = None;

        let mut i = 0;
        while i < self.clusters.len() {
            let cl = &mut self.clusters[i];
            if !assigned {
                let area = cl.overlap(x, y, self.init_dim);
                if area >= inlier_area {
                    cl.absorb(x, y, ttc, timestamp);
                    assigned = true;
                } else if area > best_area {
                    best_area = area;
                    best = Some(i);
                }
            }

            cl.decay(timestamp, self.activity_decay_us);
            if cl.activity < self.activity_threshold {
                self.clusters.remove(i);
                if best == Some(i) {
                    best = None;
                }
                continue;
            }
            i += 1;
        }

        if !assigned {
            let fallback = match best {
                Some(0) if self.skip_first_fallback => None,
                other => other,
            };
            if let Some(b) = fallback {
                let cl = &mut self.clusters[b];
                cl.absorb(x, y, ttc, timestamp);
                cl.dim += 1.0 / cl.activity as f32;
                assigned = true;
            }
        }

        if !assigned {
            if self.clusters.len() >= self.max_clusters {
                self.evict_least_active();
            }
            self.clusters
                .push(Cluster::new(x, y, ttc, timestamp, self.init_dim));
            debug!(x, y, ttc, count = self.clusters.len(), "new cluster");
        }
    }

    fn evict_least_active(&mut self) {
        let weakest = self
            .clusters
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.activity.total_cmp(&b.1.activity))
            .map(|(i, _)| i);
        if let Some(i) = weakest {
            let cl = self.clusters.remove(i);
            warn!(
                activity = cl.activity,
                max = self.max_clusters,
                "cluster cap reached, evicting least active cluster"
            );
        }
    }

    /// Live clusters in list order. Positions are not stable across calls.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Cluster with the smallest TTC, i.e. the most imminent obstacle.
    pub fn nearest(&self) -> Option<&Cluster> {
        self.clusters.iter().min_by(|a, b| a.ttc.total_cmp(&b.ttc))
    }

    pub fn reset(&mut self) {
        self.clusters.clear();
    }
}
