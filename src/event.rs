use std::fmt;
use std::str::FromStr;

/// Single polarity event from a DVS sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolarityEvent {
    pub x: u16,
    pub y: u16,
    pub timestamp: i64,
    pub polarity: i8, // -1 or +1
    /// Marks out-of-band samples (IMU, frame markers) that carry no pixel data.
    pub special: bool,
}

impl PolarityEvent {
    pub fn new(x: u16, y: u16, timestamp: i64, polarity: i8) -> Self {
        Self {
            x,
            y,
            timestamp,
            polarity,
            special: false,
        }
    }

    /// Polarity as a channel index: 0 = OFF, 1 = ON.
    pub fn type_index(&self) -> usize {
        if self.polarity > 0 {
            1
        } else {
            0
        }
    }
}

/// Which retina a binocular event came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Eye {
    #[default]
    Left,
    Right,
}

/// Polarity event tagged with the eye of a stereo rig.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinocularEvent {
    pub event: PolarityEvent,
    pub eye: Eye,
}

impl BinocularEvent {
    pub fn new(x: u16, y: u16, timestamp: i64, polarity: i8, eye: Eye) -> Self {
        Self {
            event: PolarityEvent::new(x, y, timestamp, polarity),
            eye,
        }
    }
}

/// Event carrying a local optical-flow estimate from an upstream flow producer.
///
/// Velocities are in pixels per second, `speed` is the flow magnitude and
/// `confidence` the producer's quality measure for this estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowEvent {
    pub x: u16,
    pub y: u16,
    pub timestamp: i64,
    pub polarity: i8,
    pub speed: f32,
    pub vx: f32,
    pub vy: f32,
    pub confidence: f32,
}

impl FlowEvent {
    /// Build a flow event with speed derived from the velocity and unit confidence.
    pub fn new(x: u16, y: u16, timestamp: i64, vx: f32, vy: f32) -> Self {
        Self {
            x,
            y,
            timestamp,
            polarity: 1,
            speed: (vx * vx + vy * vy).sqrt(),
            vx,
            vy,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// False when any numeric field is NaN or infinite, or confidence is negative.
    pub fn is_well_formed(&self) -> bool {
        self.speed.is_finite()
            && self.vx.is_finite()
            && self.vy.is_finite()
            && self.confidence.is_finite()
            && self.confidence >= 0.0
    }
}

/// Output of the orientation detector: the input event plus an orientation label.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientationEvent {
    pub x: u16,
    pub y: u16,
    pub timestamp: i64,
    pub polarity: i8,
    pub eye: Eye,
    pub has_orientation: bool,
    /// 0 = horizontal, 1 = 45°, 2 = vertical, 3 = 135°. Zero when `has_orientation` is false.
    pub orientation: u8,
}

impl OrientationEvent {
    pub fn labeled(event: &PolarityEvent, eye: Eye, orientation: Option<u8>) -> Self {
        Self {
            x: event.x,
            y: event.y,
            timestamp: event.timestamp,
            polarity: event.polarity,
            eye,
            has_orientation: orientation.is_some(),
            orientation: orientation.unwrap_or(0),
        }
    }
}

/// A packet of events of a single kind, processed in iteration order.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPacket {
    Polarity(Vec<PolarityEvent>),
    Binocular(Vec<BinocularEvent>),
    Flow(Vec<FlowEvent>),
    Orientation(Vec<OrientationEvent>),
}

impl EventPacket {
    pub fn len(&self) -> usize {
        match self {
            EventPacket::Polarity(v) => v.len(),
            EventPacket::Binocular(v) => v.len(),
            EventPacket::Flow(v) => v.len(),
            EventPacket::Orientation(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventPacket::Polarity(_) => "polarity",
            EventPacket::Binocular(_) => "binocular",
            EventPacket::Flow(_) => "flow",
            EventPacket::Orientation(_) => "orientation",
        }
    }

    /// Timestamp of the last event in the packet, if any.
    pub fn last_timestamp(&self) -> Option<i64> {
        match self {
            EventPacket::Polarity(v) => v.last().map(|e| e.timestamp),
            EventPacket::Binocular(v) => v.last().map(|e| e.event.timestamp),
            EventPacket::Flow(v) => v.last().map(|e| e.timestamp),
            EventPacket::Orientation(v) => v.last().map(|e| e.timestamp),
        }
    }
}

impl fmt::Display for PolarityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t{}", self.x, self.y, self.timestamp, self.polarity)
    }
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => f.write_str("0"),
            Eye::Right => f.write_str("1"),
        }
    }
}

impl fmt::Display for BinocularEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.event, self.eye)
    }
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.x, self.y, self.timestamp, self.polarity, self.vx, self.vy, self.confidence
        )
    }
}

impl fmt::Display for OrientationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ori = if self.has_orientation {
            self.orientation.to_string()
        } else {
            "-".to_string()
        };
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.x, self.y, self.timestamp, self.polarity, ori
        )
    }
}

fn field<T: FromStr>(parts: &[&str], idx: usize, name: &str) -> Result<T, String> {
    let raw = parts
        .get(idx)
        .ok_or_else(|| format!("missing field `{}`", name))?;
    raw.trim()
        .parse()
        .map_err(|_| format!("invalid `{}`: {:?}", name, raw))
}

impl FromStr for PolarityEvent {
    type Err = String;

    /// Parses `x y timestamp polarity`, separated by tabs or spaces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        Ok(PolarityEvent::new(
            field(&parts, 0, "x")?,
            field(&parts, 1, "y")?,
            field(&parts, 2, "timestamp")?,
            field(&parts, 3, "polarity")?,
        ))
    }
}

impl FromStr for BinocularEvent {
    type Err = String;

    /// Parses `x y timestamp polarity [eye]`; eye is 0/L for left, 1/R for right.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event: PolarityEvent = s.parse()?;
        let eye = match s.split_whitespace().nth(4) {
            None | Some("0") | Some("L") | Some("l") => Eye::Left,
            Some("1") | Some("R") | Some("r") => Eye::Right,
            Some(other) => return Err(format!("invalid `eye`: {:?}", other)),
        };
        Ok(BinocularEvent { event, eye })
    }
}

impl FromStr for FlowEvent {
    type Err = String;

    /// Parses `x y timestamp polarity vx vy [confidence]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let mut ev = FlowEvent::new(
            field(&parts, 0, "x")?,
            field(&parts, 1, "y")?,
            field(&parts, 2, "timestamp")?,
            field(&parts, 4, "vx")?,
            field(&parts, 5, "vy")?,
        );
        ev.polarity = field(&parts, 3, "polarity")?;
        if parts.len() > 6 {
            ev.confidence = field(&parts, 6, "confidence")?;
        }
        Ok(ev)
    }
}
