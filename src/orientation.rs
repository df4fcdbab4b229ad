use tracing::{debug, info, warn};

use crate::config::OrientationConfig;
use crate::error::{check_dimensions, MotionError, Result};
use crate::event::{EventPacket, Eye, OrientationEvent, PolarityEvent};

/// Number of orientation labels: 0°, 45°, 90°, 135°.
pub const NUM_ORIENTATIONS: usize = 4;

/// Timestamp channels per pixel: OFF/ON for each eye.
const NUM_CHANNELS: usize = 4;

/// Unit step along each orientation axis (y grows upward in sensor coordinates).
const AXES: [(i32, i32); NUM_ORIENTATIONS] = [(1, 0), (1, 1), (0, 1), (-1, 1)];

/// Receptive-field offsets for every orientation.
///
/// Each field is a bar `2 * length + 1` pixels long along the orientation axis
/// and `2 * width + 1` pixels wide across it, without the center pixel.
pub fn receptive_fields(length: u32, width: u32) -> [Vec<(i32, i32)>; NUM_ORIENTATIONS] {
    let l = length as i32;
    let w = width as i32;
    AXES.map(|(ax, ay)| {
        let (nx, ny) = (-ay, ax);
        let mut offsets = Vec::with_capacity(((2 * l + 1) * (2 * w + 1)) as usize);
        for s in -l..=l {
            for t in -w..=w {
                if s == 0 && t == 0 {
                    continue;
                }
                offsets.push((ax * s + nx * t, ay * s + ny * t));
            }
        }
        offsets
    })
}

/// Coincidence score of one orientation; smaller is more coherent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Score {
    pub value: i64,
    /// Tie-break between equal values; smaller wins.
    pub helper: i64,
}

impl Score {
    const OUTLIER: Score = Score {
        value: i64::MAX,
        helper: i64::MAX,
    };
}

/// Mean of the kept time differences, with their population variance as helper.
fn average_score(dts: &[i64], reject: i64) -> Score {
    let kept = dts.iter().copied().filter(|&dt| dt <= reject);
    let (sum, count) = kept.clone().fold((0i64, 0i64), |(s, c), dt| (s.saturating_add(dt), c + 1));
    if count == 0 {
        return Score::OUTLIER;
    }
    let mean = sum / count;
    let sq = kept.fold(0i64, |acc, dt| {
        let d = dt.saturating_sub(mean);
        acc.saturating_add(d.saturating_mul(d))
    });
    Score {
        value: mean,
        helper: sq / count,
    }
}

/// Largest kept time difference, with the second largest as helper.
fn max_score(dts: &[i64], reject: i64) -> Score {
    let mut first: Option<i64> = None;
    let mut second: Option<i64> = None;
    for dt in dts.iter().copied().filter(|&dt| dt <= reject) {
        match first {
            Some(f) if dt <= f => {
                if second.map_or(true, |s| dt > s) {
                    second = Some(dt);
                }
            }
            _ => {
                second = first;
                first = Some(dt);
            }
        }
    }
    match first {
        Some(value) => Score {
            value,
            helper: second.unwrap_or(0),
        },
        None => Score::OUTLIER,
    }
}

/// Index of the smallest score; equal scores go to the smaller helper, then the lower index.
pub fn winner(scores: &[Score; NUM_ORIENTATIONS]) -> usize {
    let mut best = 0;
    for (ori, s) in scores.iter().enumerate().skip(1) {
        let b = scores[best];
        if s.value < b.value || (s.value == b.value && s.helper < b.helper) {
            best = ori;
        }
    }
    best
}

/// Signed distance between two orientation labels on the 4-label circle.
fn circular_diff(a: f32, b: f32) -> f32 {
    let half = (NUM_ORIENTATIONS / 2) as f32;
    let d = a - b;
    if d > half {
        d - NUM_ORIENTATIONS as f32
    } else if d < -half {
        d + NUM_ORIENTATIONS as f32
    } else {
        d
    }
}

/// Spatio-temporal orientation detector for DVS events.
///
/// For every event, the time since the last same-channel event is gathered
/// at each pixel of an oriented receptive field. An orientation whose field
/// fired almost simultaneously with the event (low mean or max delay) marks an
/// edge with that orientation.
///
/// Accepts polarity or binocular packets. Any other packet kind disables the
/// detector until it is re-enabled.
pub struct OrientationDetector {
    last_times: Vec<i64>,
    history: Vec<Option<f32>>,
    width: usize,
    height: usize,
    fields: [Vec<(i32, i32)>; NUM_ORIENTATIONS],
    dts: Vec<i64>,
    config: OrientationConfig,
    histogram: [u64; NUM_ORIENTATIONS],
    enabled: bool,
    display_raw_input: bool,
}

impl OrientationDetector {
    pub fn new(width: u32, height: u32, config: &OrientationConfig) -> Result<Self> {
        if config.length == 0 || config.length > 64 || config.width > 64 {
            return Err(MotionError::InvalidParameter {
                name: "orientation.length",
                reason: format!(
                    "receptive field {}x{} must have length in 1..=64 and width <= 64",
                    config.length, config.width
                ),
            });
        }
        if config.subsample_shift > 8 {
            return Err(MotionError::InvalidParameter {
                name: "orientation.subsample_shift",
                reason: format!("must be <= 8, got {}", config.subsample_shift),
            });
        }
        let (w, h) = Self::map_size(width, height, config.subsample_shift)?;
        let fields = receptive_fields(config.length, config.width);
        let rf_len = fields[0].len();
        Ok(Self {
            last_times: vec![0; w * h * NUM_CHANNELS],
            history: vec![None; w * h],
            width: w,
            height: h,
            fields,
            dts: Vec::with_capacity(rf_len),
            config: config.clone(),
            histogram: [0; NUM_ORIENTATIONS],
            enabled: true,
            display_raw_input: false,
        })
    }

    fn map_size(width: u32, height: u32, shift: u32) -> Result<(usize, usize)> {
        let (w, h) = check_dimensions(width, height)?;
        Ok((((w - 1) >> shift) + 1, ((h - 1) >> shift) + 1))
    }

    /// Label every event of a polarity or binocular packet.
    pub fn process(&mut self, packet: &EventPacket) -> EventPacket {
        if !self.enabled {
            return packet.clone();
        }
        if !matches!(packet, EventPacket::Polarity(_) | EventPacket::Binocular(_)) {
            warn!(
                kind = packet.kind(),
                "orientation detector needs polarity or binocular events, disabling"
            );
            self.enabled = false;
            return packet.clone();
        }
        if packet.is_empty() {
            return packet.clone();
        }
        self.histogram = [0; NUM_ORIENTATIONS];
        let mut out = Vec::with_capacity(packet.len());
        match packet {
            EventPacket::Polarity(events) => {
                for ev in events {
                    self.process_event(ev, Eye::Left, &mut out);
                }
            }
            EventPacket::Binocular(events) => {
                for ev in events {
                    self.process_event(&ev.event, ev.eye, &mut out);
                }
            }
            EventPacket::Flow(_) | EventPacket::Orientation(_) => {}
        }
        debug!(
            input = packet.len(),
            output = out.len(),
            histogram = ?self.histogram,
            "orientation packet processed"
        );
        if self.display_raw_input {
            packet.clone()
        } else {
            EventPacket::Orientation(out)
        }
    }

    /// Label one event, appending zero or more outputs.
    pub fn process_event(&mut self, e: &PolarityEvent, eye: Eye, out: &mut Vec<OrientationEvent>) {
        if e.special {
            return;
        }
        let shift = self.config.subsample_shift;
        let x = (e.x >> shift) as usize;
        let y = (e.y >> shift) as usize;
        if x >= self.width || y >= self.height {
            return;
        }
        let channel = e.type_index() + if eye == Eye::Right { 2 } else { 0 };
        self.last_times[(y * self.width + x) * NUM_CHANNELS + channel] = e.timestamp;

        let scores = self.scores(x, y, channel, e.timestamp);
        let min_dt = self.config.min_dt_threshold_us;

        if self.config.multi_output {
            for (ori, s) in scores.iter().enumerate() {
                if s.value < min_dt {
                    out.push(OrientationEvent::labeled(e, eye, Some(ori as u8)));
                    self.histogram[ori] += 1;
                } else if self.config.pass_all_events {
                    out.push(OrientationEvent::labeled(e, eye, None));
                }
            }
            return;
        }

        let dir = winner(&scores);
        let accepted = scores[dir].value < min_dt && self.agrees_with_history(x, y, dir);
        if accepted {
            out.push(OrientationEvent::labeled(e, eye, Some(dir as u8)));
            self.histogram[dir] += 1;
        } else if self.config.pass_all_events {
            out.push(OrientationEvent::labeled(e, eye, None));
        }
    }

    fn scores(&mut self, x: usize, y: usize, channel: usize, ts: i64) -> [Score; NUM_ORIENTATIONS] {
        let mut scores = [Score::OUTLIER; NUM_ORIENTATIONS];
        let reject = self.config.dt_reject_threshold_us;
        for (ori, field) in self.fields.iter().enumerate() {
            self.dts.clear();
            for &(dx, dy) in field {
                let xx = x as i64 + dx as i64;
                let yy = y as i64 + dy as i64;
                if xx < 0 || yy < 0 || xx >= self.width as i64 || yy >= self.height as i64 {
                    continue;
                }
                let idx = (yy as usize * self.width + xx as usize) * NUM_CHANNELS + channel;
                self.dts.push(ts - self.last_times[idx]);
            }
            scores[ori] = if self.config.average_dt {
                average_score(&self.dts, reject)
            } else {
                max_score(&self.dts, reject)
            };
        }
        scores
    }

    /// Blend the pixel's orientation history toward `dir` and check agreement.
    ///
    /// Always true when history is disabled.
    fn agrees_with_history(&mut self, x: usize, y: usize, dir: usize) -> bool {
        if !self.config.history_enabled {
            return true;
        }
        let d = dir as f32;
        let m = self.config.history_mixing_factor;
        let slot = &mut self.history[y * self.width + x];
        let prev = slot.unwrap_or(d);
        let blended = (1.0 - m) * prev + m * d;
        *slot = Some(blended);
        circular_diff(blended, d).abs() <= self.config.history_diff_threshold
    }

    /// Smoothed orientation at a (subsampled) pixel, `None` until first set.
    pub fn history_at(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.history[y * self.width + x]
    }

    /// Last timestamp of a channel (0/1 left OFF/ON, 2/3 right OFF/ON) at a pixel.
    pub fn last_time(&self, x: usize, y: usize, channel: usize) -> i64 {
        if x >= self.width || y >= self.height || channel >= NUM_CHANNELS {
            return 0;
        }
        self.last_times[(y * self.width + x) * NUM_CHANNELS + channel]
    }

    /// Oriented outputs per label in the last packet.
    pub fn histogram(&self) -> [u64; NUM_ORIENTATIONS] {
        self.histogram
    }

    pub fn receptive_field(&self, orientation: usize) -> &[(i32, i32)] {
        &self.fields[orientation]
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_display_raw_input(&mut self, raw: bool) {
        self.display_raw_input = raw;
    }

    pub fn reset(&mut self) {
        self.last_times.fill(0);
        self.history.fill(None);
        self.histogram = [0; NUM_ORIENTATIONS];
        info!("orientation detector reset");
    }

    /// Reallocate maps for a new sensor geometry.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let (w, h) = Self::map_size(width, height, self.config.subsample_shift)?;
        self.last_times = vec![0; w * h * NUM_CHANNELS];
        self.history = vec![None; w * h];
        self.width = w;
        self.height = h;
        self.histogram = [0; NUM_ORIENTATIONS];
        info!(width, height, "orientation detector resized");
        Ok(())
    }
}
