use std::io::Write;

use edvs_motion::config::{DirectionalGate, FoeConfig, MotionConfig, WindowShape};
use edvs_motion::event::{EventPacket, FlowEvent, PolarityEvent};
use edvs_motion::foe::FoeEstimator;
use edvs_motion::ground_truth::GroundTruth;
use edvs_motion::ttc::time_to_contact;
use edvs_motion::{MotionError, OrientationDetector, TimeToContactFilter};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every pixel of a 100x100 sensor within `rmax` of (50, 50), excluding the center.
fn radial_locations(rmax: f64) -> Vec<(u16, u16)> {
    let mut locs = Vec::new();
    for y in 0..100u16 {
        for x in 0..100u16 {
            let d = ((x as f64 - 50.0).powi(2) + (y as f64 - 50.0).powi(2)).sqrt();
            if d > 0.0 && d <= rmax {
                locs.push((x, y));
            }
        }
    }
    locs
}

/// Deterministic Fisher-Yates shuffle driven by a 64-bit LCG.
fn shuffle<T>(items: &mut [T], seed: u64) {
    let mut s = seed;
    for i in (1..items.len()).rev() {
        s = s
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = ((s >> 33) % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

/// Flow events radiating from (50, 50) with speed proportional to distance.
fn radial_packet(locs: &[(u16, u16)], t0: i64, gain: f32) -> Vec<FlowEvent> {
    locs.iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let vx = (x as f32 - 50.0) * gain;
            let vy = (y as f32 - 50.0) * gain;
            FlowEvent::new(x, y, t0 + i as i64 * 100, vx, vy)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// FOE estimation
// ---------------------------------------------------------------------------

#[test]
fn test_foe_converges_on_radial_flow() {
    let cfg = FoeConfig {
        update_radius: 10,
        ..FoeConfig::default()
    };
    let mut foe = FoeEstimator::new(100, 100, &cfg).unwrap();
    assert_eq!(foe.foe(), (49, 49));

    let mut locs = radial_locations(20.0);
    shuffle(&mut locs, 7);
    let budget = 2 * locs.len();

    let mut converged_at = None;
    for k in 0..budget {
        let (x, y) = locs[k % locs.len()];
        let ev = FlowEvent::new(x, y, 100 * (k as i64 + 1), x as f32 - 50.0, y as f32 - 50.0);
        foe.process_event(&ev);
        let (fx, fy) = foe.foe();
        let d2 = (fx - 50).pow(2) + (fy - 50).pow(2);
        if d2 <= 100 {
            if converged_at.is_none() {
                converged_at = Some(k + 1);
            }
        } else {
            converged_at = None;
        }
    }
    let converged_at = converged_at.expect("estimate did not settle near (50, 50)");
    assert!(converged_at < budget);
    assert_eq!(foe.foe(), (50, 50));
}

#[test]
fn test_foe_square_window_converges() {
    let cfg = FoeConfig {
        update_radius: 10,
        window: WindowShape::Square,
        ..FoeConfig::default()
    };
    let mut foe = FoeEstimator::new(100, 100, &cfg).unwrap();
    let mut locs = radial_locations(20.0);
    shuffle(&mut locs, 42);
    let first = radial_packet(&locs, 100, 1.0);
    let second = radial_packet(&locs, 200_000, 1.0);
    for ev in first.iter().chain(second.iter()) {
        foe.process_event(ev);
    }
    let (fx, fy) = foe.foe();
    assert!((fx - 50).abs() <= 10 && (fy - 50).abs() <= 10, "foe = ({}, {})", fx, fy);
}

// ---------------------------------------------------------------------------
// Time-to-contact pipeline
// ---------------------------------------------------------------------------

#[test]
fn test_ttc_closed_form() {
    assert!((time_to_contact(10.0, -20.0, 2.0, -4.0) - 5.0).abs() < 1e-12);
}

#[test]
fn test_contact_pipeline_with_ground_truth() {
    let mut f = TimeToContactFilter::new(100, 100, &MotionConfig::default()).unwrap();
    let mut gt = GroundTruth::new();
    gt.push(0.0, 50.0, 50.0);
    gt.push(10.0, 50.0, 50.0);
    f.set_ground_truth(gt);

    // Flow of twice the offset: TTC is 0.5 s at every admitted event.
    let mut locs = radial_locations(29.0);
    shuffle(&mut locs, 1);
    let events = radial_packet(&locs, 1_000, 2.0);
    let n = events.len();
    let out = f.process(&EventPacket::Flow(events));

    assert_eq!(out.len(), n, "every event carries flow");
    assert_eq!(f.counters().total, n as u64);
    assert_eq!(f.counters().flow, n as u64);
    assert_eq!(f.counters().non_diverging, 0);
    assert!(f.packet_observations() > 0);
    let ttc = f.running_ttc().unwrap();
    assert!((ttc - 0.5).abs() < 1e-6, "ttc = {}", ttc);
    assert!(!f.clusters().is_empty());
    assert!(f.clusters().iter().all(|c| (c.ttc - 0.5).abs() < 1e-6));
    assert!(f.clusters().iter().all(|c| c.center_y < 50.0), "upper half only");
}

#[test]
fn test_contact_pipeline_live_foe() {
    let mut cfg = MotionConfig::default();
    cfg.foe.update_radius = 10;
    cfg.ttc.directional_gate = DirectionalGate::None;
    let mut f = TimeToContactFilter::new(100, 100, &cfg).unwrap();

    let mut locs = radial_locations(20.0);
    shuffle(&mut locs, 7);
    f.process(&EventPacket::Flow(radial_packet(&locs, 1_000, 1.0)));
    f.process(&EventPacket::Flow(radial_packet(&locs, 500_000, 1.0)));

    assert_eq!(f.foe(), (50, 50));
    assert!(f.running_ttc().is_some());
    assert!(f.running_ttc().unwrap() > 0.0);
}

#[test]
fn test_contact_pipeline_writes_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foe.log");

    let mut f = TimeToContactFilter::new(100, 100, &MotionConfig::default()).unwrap();
    let file = std::fs::File::create(&path).unwrap();
    f.start_logging(Box::new(file)).unwrap();
    let locs = radial_locations(5.0);
    f.process(&EventPacket::Flow(radial_packet(&locs, 1_000, 1.0)));
    f.process(&EventPacket::Flow(radial_packet(&locs, 100_000, 1.0)));
    f.stop_logging().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with('#'));
    assert_eq!(lines[1].split_whitespace().count(), 5);
}

#[test]
fn test_ground_truth_file_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gt.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "# recorded trajectory").unwrap();
    for (t, x, y) in [(0.0, 40.0, 41.0), (0.5, 45.0, 46.0)] {
        let mut cols = vec!["0".to_string(); 24];
        cols[0] = format!("{}", t);
        cols[22] = format!("{}", x);
        cols[23] = format!("{}", y);
        writeln!(file, "{}", cols.join("\t")).unwrap();
    }
    drop(file);

    let gt = GroundTruth::load(&path).unwrap();
    assert_eq!(gt.len(), 2);
    assert_eq!(gt.foe_at(0.4), Some((45.0, 46.0)));
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

/// A vertical edge sweeping right, one column per 500 µs, rows 1 µs apart.
fn sweeping_bar(w: u16, h: u16) -> Vec<PolarityEvent> {
    let mut events = Vec::new();
    for x in 0..w {
        for y in 0..h {
            events.push(PolarityEvent::new(x, y, 1_000_000 + x as i64 * 500 + y as i64, 1));
        }
    }
    events
}

#[test]
fn test_orientation_labels_vertical_edge() {
    let cfg = MotionConfig::default();
    let mut det = OrientationDetector::new(32, 32, &cfg.orientation).unwrap();
    let out = det.process(&EventPacket::Polarity(sweeping_bar(32, 32)));
    let hist = det.histogram();
    // Every pixel below the first row sees its column neighbors fire 1 µs apart.
    assert_eq!(hist[2], 32 * 31);
    assert_eq!(out.len(), 32 * 32 - 1);
}

#[test]
fn test_orientation_multi_output_pass_all() {
    let mut cfg = MotionConfig::default();
    cfg.orientation.multi_output = true;
    cfg.orientation.pass_all_events = true;
    let mut det = OrientationDetector::new(32, 32, &cfg.orientation).unwrap();
    let events = sweeping_bar(8, 8);
    let n = events.len();
    let out = det.process(&EventPacket::Polarity(events));
    assert_eq!(out.len(), 4 * n);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn test_config_file_drives_pipeline() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[foe]
update_radius = 10
window = "square"

[ttc]
directional_gate = "none"

[orientation]
length = 2
multi_output = true
"#
    )
    .unwrap();

    let cfg = MotionConfig::load(file.path()).unwrap();
    assert_eq!(cfg.foe.update_radius, 10);
    assert_eq!(cfg.foe.window, WindowShape::Square);
    assert_eq!(cfg.ttc.directional_gate, DirectionalGate::None);
    assert_eq!(cfg.ttc, {
        let mut t = MotionConfig::default().ttc;
        t.directional_gate = DirectionalGate::None;
        t
    });

    let f = TimeToContactFilter::new(100, 100, &cfg).unwrap();
    assert_eq!(f.foe_estimator().radius(), 10);
    let det = OrientationDetector::new(64, 64, &cfg.orientation).unwrap();
    assert_eq!(det.receptive_field(0).len(), 4);
}

#[test]
fn test_invalid_config_rejected() {
    let mut cfg = MotionConfig::default();
    cfg.foe.decay_tau_us = 0.0;
    assert!(matches!(
        TimeToContactFilter::new(100, 100, &cfg),
        Err(MotionError::Config(_))
    ));
    assert!(matches!(
        TimeToContactFilter::new(0, 100, &MotionConfig::default()),
        Err(MotionError::InvalidDimensions { .. })
    ));
}
