use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};

use edvs_motion::event::{BinocularEvent, EventPacket, FlowEvent, PolarityEvent};
use edvs_motion::ground_truth::GroundTruth;
use edvs_motion::{MotionConfig, OrientationDetector, TimeToContactFilter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// FOE and time-to-contact from flow events (`x y ts pol vx vy [conf]`).
    Contact,
    /// Edge orientation from polarity events (`x y ts pol [eye]`).
    Orientation,
}

/// Motion filters for eDVS event streams.
///
/// Reads whitespace-separated events from stdin, groups them into packets,
/// and writes the processed events to stdout.
#[derive(Parser, Debug)]
#[command(name = "edvs-motion", version)]
struct Args {
    #[arg(long, value_enum, default_value = "contact")]
    mode: Mode,

    /// Sensor width
    #[arg(long, default_value_t = 128)]
    width: u32,

    /// Sensor height
    #[arg(long, default_value_t = 128)]
    height: u32,

    /// TOML parameter file; defaults apply to missing keys
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ground-truth FOE file (contact mode)
    #[arg(long)]
    ground_truth: Option<PathBuf>,

    /// Write the per-packet FOE log here (contact mode)
    #[arg(long)]
    foe_log: Option<PathBuf>,

    /// Events per packet
    #[arg(long, default_value_t = 1024)]
    packet_size: usize,

    /// Treat a fifth column as the eye (0/L left, 1/R right) in orientation mode
    #[arg(long)]
    binocular: bool,
}

enum Pipeline {
    Contact(TimeToContactFilter),
    Orientation(OrientationDetector),
}

impl Pipeline {
    fn process(&mut self, packet: &EventPacket) -> EventPacket {
        match self {
            Pipeline::Contact(f) => f.process(packet),
            Pipeline::Orientation(d) => d.process(packet),
        }
    }
}

/// Events of one packet being read from the input.
enum Pending {
    Flow(Vec<FlowEvent>),
    Polarity(Vec<PolarityEvent>),
    Binocular(Vec<BinocularEvent>),
}

impl Pending {
    fn new(args: &Args) -> Self {
        match (args.mode, args.binocular) {
            (Mode::Contact, _) => Pending::Flow(Vec::with_capacity(args.packet_size)),
            (Mode::Orientation, false) => Pending::Polarity(Vec::with_capacity(args.packet_size)),
            (Mode::Orientation, true) => Pending::Binocular(Vec::with_capacity(args.packet_size)),
        }
    }

    fn push_line(&mut self, line: &str) -> std::result::Result<(), String> {
        match self {
            Pending::Flow(v) => v.push(line.parse()?),
            Pending::Polarity(v) => v.push(line.parse()?),
            Pending::Binocular(v) => v.push(line.parse()?),
        }
        Ok(())
    }

    fn len(&self) -> usize {
        match self {
            Pending::Flow(v) => v.len(),
            Pending::Polarity(v) => v.len(),
            Pending::Binocular(v) => v.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&mut self) -> EventPacket {
        match self {
            Pending::Flow(v) => EventPacket::Flow(std::mem::take(v)),
            Pending::Polarity(v) => EventPacket::Polarity(std::mem::take(v)),
            Pending::Binocular(v) => EventPacket::Binocular(std::mem::take(v)),
        }
    }
}

fn write_packet(out: &mut impl Write, packet: &EventPacket) -> io::Result<usize> {
    match packet {
        EventPacket::Polarity(v) => v.iter().try_for_each(|e| writeln!(out, "{}", e))?,
        EventPacket::Binocular(v) => v.iter().try_for_each(|e| writeln!(out, "{}", e))?,
        EventPacket::Flow(v) => v.iter().try_for_each(|e| writeln!(out, "{}", e))?,
        EventPacket::Orientation(v) => v.iter().try_for_each(|e| writeln!(out, "{}", e))?,
    }
    Ok(packet.len())
}

fn build_pipeline(args: &Args, config: &MotionConfig) -> Result<Pipeline> {
    match args.mode {
        Mode::Contact => {
            let mut filter = TimeToContactFilter::new(args.width, args.height, config)?;
            if let Some(path) = &args.ground_truth {
                let gt = GroundTruth::load(path)
                    .with_context(|| format!("loading ground truth {}", path.display()))?;
                filter.set_ground_truth(gt);
            }
            if let Some(path) = &args.foe_log {
                let file = File::create(path)
                    .with_context(|| format!("creating FOE log {}", path.display()))?;
                filter.start_logging(Box::new(BufWriter::new(file)))?;
            }
            Ok(Pipeline::Contact(filter))
        }
        Mode::Orientation => {
            config.validate()?;
            let mut detector =
                OrientationDetector::new(args.width, args.height, &config.orientation)?;
            detector.set_display_raw_input(config.output.display_raw_input);
            Ok(Pipeline::Orientation(detector))
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edvs_motion=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if args.packet_size == 0 {
        anyhow::bail!("--packet-size must be at least 1");
    }

    let config = match &args.config {
        Some(path) => MotionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MotionConfig::default(),
    };
    let mut pipeline = build_pipeline(&args, &config)?;
    info!(mode = ?args.mode, width = args.width, height = args.height, "edvs-motion starting");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut pending = Pending::new(&args);
    let mut total: u64 = 0;
    let mut skipped: u64 = 0;
    let mut written: u64 = 0;

    for (idx, line) in stdin.lock().lines().enumerate() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Err(reason) = pending.push_line(line) {
            debug!(line = idx + 1, %reason, "skipping malformed event");
            skipped += 1;
            continue;
        }
        total += 1;
        if pending.len() >= args.packet_size {
            let result = pipeline.process(&pending.take());
            written += write_packet(&mut out, &result)? as u64;
        }
    }
    if !pending.is_empty() {
        let result = pipeline.process(&pending.take());
        written += write_packet(&mut out, &result)? as u64;
    }
    out.flush()?;

    if skipped > 0 {
        warn!(skipped, "malformed input lines ignored");
    }
    match pipeline {
        Pipeline::Contact(mut filter) => {
            let foe = filter.foe();
            info!(
                events = total,
                written,
                foe_x = foe.0,
                foe_y = foe.1,
                ttc = ?filter.running_ttc(),
                clusters = filter.clusters().len(),
                "done"
            );
            filter.stop_logging()?;
        }
        Pipeline::Orientation(_) => info!(events = total, written, "done"),
    }
    Ok(())
}
