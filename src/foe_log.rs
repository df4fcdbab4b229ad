use std::fmt;
use std::io::{self, Write};

use tracing::info;

/// Event counters reported alongside ground-truth comparisons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventCounters {
    /// All events handed to the filter.
    pub total: u64,
    /// Events carrying a nonzero flow.
    pub flow: u64,
    /// Flow events not diverging from the ground-truth FOE.
    pub non_diverging: u64,
}

/// One line of the FOE log, written once per packet.
#[derive(Clone, Debug, PartialEq)]
pub struct FoeLogRecord {
    pub timestamp: i64,
    pub foe_x: i32,
    pub foe_y: i32,
    /// Reference FOE and counters, present when ground truth is loaded.
    pub ground_truth: Option<((f32, f32), EventCounters)>,
    pub winning_probability: f64,
    pub ttc: f64,
}

/// Format like Java's `%g`: six significant digits with trailing zeros kept,
/// exponent form when the rounded value lies outside [1e-4, 1e6).
fn fmt_g(v: f64) -> String {
    if v == 0.0 {
        return "0.00000".to_string();
    }
    if !v.is_finite() {
        return v.to_string();
    }
    // Exponent after rounding to six significant digits.
    let sci = format!("{:.5e}", v);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return sci,
    };
    if (-4..6).contains(&exp) {
        format!("{:.*}", (5 - exp) as usize, v)
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

impl fmt::Display for FoeLogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.timestamp, self.foe_x, self.foe_y)?;
        match &self.ground_truth {
            Some(((gx, gy), counters)) => write!(
                f,
                " {} {} {} {} {} {} {}",
                fmt_g(*gx as f64),
                fmt_g(*gy as f64),
                fmt_g(self.winning_probability),
                fmt_g(self.ttc),
                counters.total,
                counters.flow,
                counters.non_diverging
            ),
            None => write!(
                f,
                " {} {}",
                fmt_g(self.winning_probability),
                fmt_g(self.ttc)
            ),
        }
    }
}

/// Writes FOE log records within a time window, at most one per timestamp.
pub struct FoeLogger<W: Write> {
    out: W,
    begin_us: f64,
    end_us: f64,
    last_logged: i64,
    written: u64,
    with_ground_truth: bool,
}

fn header(with_ground_truth: bool) -> &'static str {
    if with_ground_truth {
        "# timestamp(us) foeX foeY foeXgt foeYgt winningProb ttc eventsTotal eventsFlow flowValid"
    } else {
        "# timestamp(us) foeX foeY winningProb ttc"
    }
}

impl<W: Write> FoeLogger<W> {
    /// Create a logger and write the header line.
    ///
    /// Records are kept only for timestamps strictly inside `(begin_s, end_s)`.
    pub fn new(mut out: W, with_ground_truth: bool, begin_s: f64, end_s: f64) -> io::Result<Self> {
        writeln!(out, "{}", header(with_ground_truth))?;
        info!(begin_s, end_s, "FOE logging started");
        Ok(Self {
            out,
            begin_us: begin_s * 1e6,
            end_us: end_s * 1e6,
            last_logged: 0,
            written: 0,
            with_ground_truth,
        })
    }

    /// Switch the record layout, writing a fresh header line when it changes.
    pub fn set_ground_truth(&mut self, with_ground_truth: bool) -> io::Result<()> {
        if self.with_ground_truth != with_ground_truth {
            writeln!(self.out, "{}", header(with_ground_truth))?;
            self.with_ground_truth = with_ground_truth;
        }
        Ok(())
    }

    /// Write the record if it is newer than the last one and inside the window.
    pub fn log(&mut self, record: &FoeLogRecord) -> io::Result<bool> {
        let ts = record.timestamp;
        let t = ts as f64;
        if ts <= self.last_logged || t <= self.begin_us || t >= self.end_us {
            return Ok(false);
        }
        writeln!(self.out, "{}", record)?;
        self.last_logged = ts;
        self.written += 1;
        Ok(true)
    }

    /// Forget the last logged timestamp, e.g. after the source was rewound.
    pub fn rearm(&mut self) {
        self.last_logged = 0;
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        info!(records = self.written, "FOE logging stopped");
        Ok(self.out)
    }
}
