pub mod cluster;
pub mod config;
pub mod contact;
pub mod decay_grid;
pub mod error;
pub mod event;
pub mod foe;
pub mod foe_log;
pub mod ground_truth;
pub mod orientation;
pub mod ttc;

pub use config::MotionConfig;
pub use contact::TimeToContactFilter;
pub use error::{MotionError, Result};
pub use event::{BinocularEvent, EventPacket, Eye, FlowEvent, OrientationEvent, PolarityEvent};
pub use orientation::OrientationDetector;

/// Maximum allowed sensor dimension to prevent excessive memory allocation.
/// 32768 x 32768 = ~1 GB per grid, far beyond any real eDVS sensor.
pub const MAX_SENSOR_DIM: u32 = 32768;
