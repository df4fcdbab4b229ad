use std::f64::consts::FRAC_PI_2;
use std::io::Write;

use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::config::MotionConfig;
use crate::error::Result;
use crate::event::{EventPacket, FlowEvent};
use crate::foe::FoeEstimator;
use crate::foe_log::{EventCounters, FoeLogRecord, FoeLogger};
use crate::ground_truth::GroundTruth;
use crate::ttc::{relative_angle, TtcEstimator};

/// Time-to-contact filter (Clady et al., 2014).
///
/// Consumes packets of flow events. Each event first votes for the focus of
/// expansion, then is tested as a TTC observation relative to either the
/// ground-truth FOE (when loaded) or the live estimate. Admitted observations
/// are clustered into candidate obstacles.
pub struct TimeToContactFilter {
    foe: FoeEstimator,
    ttc: TtcEstimator,
    ground_truth: Option<GroundTruth>,
    logger: Option<FoeLogger<Box<dyn Write + Send>>>,
    log_begin_s: f64,
    log_end_s: f64,
    counters: EventCounters,
    filtered_zero_speed: u64,
    packet_observations: usize,
    last_timestamp: i64,
    central_filter: bool,
    display_raw_input: bool,
    enabled: bool,
}

impl TimeToContactFilter {
    pub fn new(width: u32, height: u32, config: &MotionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            foe: FoeEstimator::new(width, height, &config.foe)?,
            ttc: TtcEstimator::new(&config.ttc, &config.cluster),
            ground_truth: None,
            logger: None,
            log_begin_s: config.output.log_begin_s,
            log_end_s: config.output.log_end_s,
            counters: EventCounters::default(),
            filtered_zero_speed: 0,
            packet_observations: 0,
            last_timestamp: 0,
            central_filter: config.ttc.central_filter,
            display_raw_input: config.output.display_raw_input,
            enabled: true,
        })
    }

    /// Process one packet.
    ///
    /// Returns the input unchanged when the filter is disabled, when the packet
    /// is not a flow packet, when raw display is selected, or when the packet
    /// contains a malformed event (in which case no state is touched).
    /// Otherwise returns the events that carried flow.
    pub fn process(&mut self, packet: &EventPacket) -> EventPacket {
        if !self.enabled {
            return packet.clone();
        }
        let events = match packet {
            EventPacket::Flow(events) => events,
            other => {
                warn!(kind = other.kind(), "time-to-contact filter expects flow events");
                return packet.clone();
            }
        };
        if let Some(pos) = events.iter().position(|e| !e.is_well_formed()) {
            warn!(
                index = pos,
                len = events.len(),
                "malformed flow event, returning input packet"
            );
            return packet.clone();
        }

        self.counters.total += events.len() as u64;
        self.packet_observations = 0;
        let mut with_flow = Vec::with_capacity(events.len());
        for ev in events {
            if ev.speed == 0.0 {
                self.filtered_zero_speed += 1;
                continue;
            }
            self.process_event(ev);
            with_flow.push(*ev);
        }
        if let Some(ts) = packet.last_timestamp() {
            self.last_timestamp = ts;
        }

        let (fx, fy) = self.foe.foe();
        debug!(
            events = events.len(),
            flow = with_flow.len(),
            foe_x = fx,
            foe_y = fy,
            probability = self.foe.estimate_probability(),
            observations = self.packet_observations,
            clusters = self.ttc.tracker().len(),
            "packet processed"
        );
        self.write_log();

        if self.display_raw_input {
            packet.clone()
        } else {
            EventPacket::Flow(with_flow)
        }
    }

    fn process_event(&mut self, ev: &FlowEvent) {
        self.counters.flow += 1;

        let gt_foe = self
            .ground_truth
            .as_ref()
            .and_then(|gt| gt.foe_at(ev.timestamp as f64 * 1e-6));
        if let Some((gx, gy)) = gt_foe {
            if self.central_filter {
                let angle = relative_angle(
                    ev.x as f64 - gx as f64,
                    ev.y as f64 - gy as f64,
                    ev.vx as f64,
                    ev.vy as f64,
                );
                if angle > FRAC_PI_2 {
                    self.counters.non_diverging += 1;
                }
            }
        }

        self.foe.process_event(ev);

        let reference = gt_foe.unwrap_or_else(|| {
            let (fx, fy) = self.foe.foe();
            (fx as f32, fy as f32)
        });
        if self.ttc.observe(ev, reference).is_some() {
            self.packet_observations += 1;
        }
    }

    fn write_log(&mut self) {
        let record = self.log_record();
        if let Some(logger) = self.logger.as_mut() {
            if let Err(err) = logger.log(&record) {
                warn!(%err, "FOE log write failed, logging stopped");
                self.logger = None;
            }
        }
    }

    /// Snapshot of the current estimate in log-record form.
    pub fn log_record(&self) -> FoeLogRecord {
        let (foe_x, foe_y) = self.foe.foe();
        let ground_truth = self
            .ground_truth
            .as_ref()
            .and_then(|gt| gt.foe_at(self.last_timestamp as f64 * 1e-6))
            .map(|foe| (foe, self.counters));
        FoeLogRecord {
            timestamp: self.last_timestamp,
            foe_x,
            foe_y,
            ground_truth,
            winning_probability: self.foe.estimate_probability(),
            ttc: self.ttc.running_ttc().unwrap_or(0.0),
        }
    }

    /// Start writing one log record per packet to `out`.
    pub fn start_logging(&mut self, out: Box<dyn Write + Send>) -> Result<()> {
        if self.logger.is_some() {
            info!("FOE logging already started");
            return Ok(());
        }
        let logger = FoeLogger::new(
            out,
            self.ground_truth.is_some(),
            self.log_begin_s,
            self.log_end_s,
        )?;
        self.logger = Some(logger);
        Ok(())
    }

    /// Stop logging and flush the writer.
    pub fn stop_logging(&mut self) -> Result<()> {
        if let Some(logger) = self.logger.take() {
            logger.finish()?;
        }
        Ok(())
    }

    pub fn is_logging(&self) -> bool {
        self.logger.is_some()
    }

    /// Use `gt` as the TTC reference instead of the live estimate.
    pub fn set_ground_truth(&mut self, gt: GroundTruth) {
        info!(samples = gt.len(), "ground truth attached");
        self.ground_truth = Some(gt);
        self.sync_log_layout();
    }

    pub fn clear_ground_truth(&mut self) {
        if self.ground_truth.take().is_some() {
            info!("ground truth cleared");
            self.sync_log_layout();
        }
    }

    fn sync_log_layout(&mut self) {
        let with_ground_truth = self.ground_truth.is_some();
        if let Some(logger) = self.logger.as_mut() {
            if let Err(err) = logger.set_ground_truth(with_ground_truth) {
                warn!(%err, "FOE log write failed, logging stopped");
                self.logger = None;
            }
        }
    }

    pub fn has_ground_truth(&self) -> bool {
        self.ground_truth.is_some()
    }

    pub fn foe(&self) -> (i32, i32) {
        self.foe.foe()
    }

    pub fn foe_estimator(&self) -> &FoeEstimator {
        &self.foe
    }

    pub fn running_ttc(&self) -> Option<f64> {
        self.ttc.running_ttc()
    }

    pub fn clusters(&self) -> &[Cluster] {
        self.ttc.tracker().clusters()
    }

    pub fn counters(&self) -> EventCounters {
        self.counters
    }

    pub fn filtered_zero_speed(&self) -> u64 {
        self.filtered_zero_speed
    }

    /// TTC observations admitted in the last processed packet.
    pub fn packet_observations(&self) -> usize {
        self.packet_observations
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

    /// Clear all estimates and counters; ground truth and logging stay attached.
    pub fn reset(&mut self) {
        self.foe.reset();
        self.ttc.reset();
        self.counters = EventCounters::default();
        self.filtered_zero_speed = 0;
        self.packet_observations = 0;
        self.last_timestamp = 0;
        if let Some(logger) = self.logger.as_mut() {
            logger.rearm();
        }
    }

    /// Reallocate for a new sensor geometry and reset.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.foe.resize(width, height)?;
        self.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectionalGate;
    use std::sync::{Arc, Mutex};

    fn filter() -> TimeToContactFilter {
        TimeToContactFilter::new(100, 100, &MotionConfig::default()).unwrap()
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_disabled_passthrough() {
        let mut f = filter();
        f.set_enabled(false);
        let packet = EventPacket::Flow(vec![FlowEvent::new(10, 10, 100, 1.0, 0.0)]);
        assert_eq!(f.process(&packet), packet);
        assert_eq!(f.counters().total, 0);
    }

    #[test]
    fn test_wrong_packet_kind_passthrough() {
        let mut f = filter();
        let packet = EventPacket::Polarity(vec![]);
        assert_eq!(f.process(&packet), packet);
    }

    #[test]
    fn test_zero_speed_dropped_from_output() {
        let mut f = filter();
        let packet = EventPacket::Flow(vec![
            FlowEvent::new(10, 10, 100, 1.0, 0.0),
            FlowEvent::new(11, 10, 200, 0.0, 0.0),
        ]);
        let out = f.process(&packet);
        assert_eq!(out.len(), 1);
        assert_eq!(f.filtered_zero_speed(), 1);
        assert_eq!(f.counters().total, 2);
        assert_eq!(f.counters().flow, 1);
    }

    #[test]
    fn test_raw_display_returns_input() {
        let mut f = filter();
        f.set_display_raw_input(true);
        let packet = EventPacket::Flow(vec![
            FlowEvent::new(10, 10, 100, 1.0, 0.0),
            FlowEvent::new(11, 10, 200, 0.0, 0.0),
        ]);
        assert_eq!(f.process(&packet), packet);
    }

    #[test]
    fn test_malformed_event_aborts_packet() {
        let mut f = filter();
        let packet = EventPacket::Flow(vec![
            FlowEvent::new(80, 80, 100, 1.0, 1.0),
            FlowEvent::new(10, 10, 200, f32::NAN, 0.0),
        ]);
        assert_eq!(f.process(&packet), packet);
        assert_eq!(f.counters().total, 0);
        assert_eq!(f.foe(), (49, 49), "no partial update applied");
        assert!(f.foe_estimator().grid().values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_negative_confidence_aborts_packet() {
        let mut f = filter();
        let packet = EventPacket::Flow(vec![
            FlowEvent::new(80, 80, 100, 1.0, 1.0).with_confidence(-2.0)
        ]);
        assert_eq!(f.process(&packet), packet);
        assert_eq!(f.counters().total, 0);
        let min = f
            .foe_estimator()
            .grid()
            .values()
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        assert!(min >= 0.0, "min probability = {}", min);
    }

    #[test]
    fn test_ground_truth_reference_used() {
        let mut cfg = MotionConfig::default();
        cfg.ttc.directional_gate = DirectionalGate::UpperHalf;
        let mut f = TimeToContactFilter::new(100, 100, &cfg).unwrap();
        let mut gt = GroundTruth::new();
        gt.push(0.0, 40.0, 40.0);
        f.set_ground_truth(gt);
        let packet = EventPacket::Flow(vec![FlowEvent::new(50, 20, 1000, 2.0, -4.0)]);
        f.process(&packet);
        assert_eq!(f.packet_observations(), 1);
        assert_eq!(f.running_ttc(), Some(5.0));
        assert_eq!(f.clusters().len(), 1);
    }

    #[test]
    fn test_non_diverging_counted_with_ground_truth() {
        let mut f = filter();
        let mut gt = GroundTruth::new();
        gt.push(0.0, 40.0, 40.0);
        f.set_ground_truth(gt);
        let packet = EventPacket::Flow(vec![
            FlowEvent::new(50, 40, 1000, 1.0, 0.0),  // diverging
            FlowEvent::new(50, 40, 2000, -1.0, 0.0), // converging
        ]);
        f.process(&packet);
        assert_eq!(f.counters().non_diverging, 1);
    }

    #[test]
    fn test_logging_one_record_per_packet() {
        let mut f = filter();
        let buf = SharedBuf::default();
        f.start_logging(Box::new(buf.clone())).unwrap();
        f.process(&EventPacket::Flow(vec![FlowEvent::new(60, 60, 1000, 1.0, 1.0)]));
        f.process(&EventPacket::Flow(vec![FlowEvent::new(60, 60, 2000, 1.0, 1.0)]));
        f.stop_logging().unwrap();
        assert!(!f.is_logging());
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3, "{}", text);
        assert!(lines[1].starts_with("1000 "));
        assert!(lines[2].starts_with("2000 "));
    }

    #[test]
    fn test_log_header_follows_ground_truth() {
        let mut f = filter();
        let buf = SharedBuf::default();
        f.start_logging(Box::new(buf.clone())).unwrap();
        f.process(&EventPacket::Flow(vec![FlowEvent::new(60, 60, 1000, 1.0, 1.0)]));
        let mut gt = GroundTruth::new();
        gt.push(0.0, 40.0, 40.0);
        f.set_ground_truth(gt);
        f.process(&EventPacket::Flow(vec![FlowEvent::new(60, 60, 2000, 1.0, 1.0)]));
        f.clear_ground_truth();
        f.process(&EventPacket::Flow(vec![FlowEvent::new(60, 60, 3000, 1.0, 1.0)]));
        f.stop_logging().unwrap();
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6, "{}", text);
        let columns = |line: &str| line.trim_start_matches("# ").split_whitespace().count();
        for pair in lines.chunks(2) {
            assert!(pair[0].starts_with('#'));
            assert_eq!(columns(pair[0]), columns(pair[1]), "{}", text);
        }
        assert_eq!(columns(lines[3]), 10);
    }

    #[test]
    fn test_reset_and_resize() {
        let mut f = filter();
        f.process(&EventPacket::Flow(vec![FlowEvent::new(60, 60, 1000, 1.0, 1.0)]));
        f.reset();
        assert_eq!(f.foe(), (49, 49));
        assert_eq!(f.counters(), EventCounters::default());
        f.resize(40, 20).unwrap();
        assert_eq!(f.foe(), (19, 9));
    }
}
