//! Sync I/O
//!
//! The physical sync lines between the primary and its secondaries. The
//! emitter drives output lines high and low; the follower blocks on, or
//! registers callbacks for, edges on its single input line.
//!
//! Two implementations are selected once at start-up: the GPIO character
//! device backend (Linux only) and a simulated backend for running off target.
//! Role loops only ever see `dyn SyncIo`.

#[cfg(target_os = "linux")]
pub mod gpio;
pub mod simulated;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[cfg(target_os = "linux")]
pub use gpio::GpioSyncIo;
pub use simulated::{EdgeScript, SimulatedSyncIo, LineMonitor, Transition};

/// Line number; BCM numbering, which is the line offset on `gpiochip0`.
pub type PinId = u32;

/// Callback run by the edge dispatcher. Must return quickly and must not
/// wait on further edges.
pub type EdgeCallback = Box<dyn FnMut() + Send + 'static>;

/// Sync I/O errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("GPIO backend unavailable: {0}")]
    Unavailable(String),

    #[error("GPIO error on pin {pin}: {reason}")]
    Gpio { pin: PinId, reason: String },

    #[error("Pin {0} has not been configured")]
    PinNotConfigured(PinId),

    #[error("Edge source closed")]
    EdgeSourceClosed,
}

/// Digital line level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Raw value for the character device API.
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Low => write!(f, "LOW"),
            Level::High => write!(f, "HIGH"),
        }
    }
}

/// Edge direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Low to high
    Rising,
    /// High to low
    Falling,
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Rising => write!(f, "rising"),
            Edge::Falling => write!(f, "falling"),
        }
    }
}

impl Edge {
    /// The other direction.
    pub fn opposite(self) -> Edge {
        match self {
            Edge::Rising => Edge::Falling,
            Edge::Falling => Edge::Rising,
        }
    }
}

impl std::str::FromStr for Edge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rising" => Ok(Edge::Rising),
            "falling" => Ok(Edge::Falling),
            other => Err(format!("unknown edge '{}' (expected rising or falling)", other)),
        }
    }
}

/// Input bias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    None,
    Up,
    /// Pin 4 on the Pi has an internal pull-down, which suits an idle-low line
    #[default]
    Down,
}

impl std::str::FromStr for Pull {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Pull::None),
            "up" => Ok(Pull::Up),
            "down" => Ok(Pull::Down),
            other => Err(format!("unknown pull '{}' (expected none, up or down)", other)),
        }
    }
}

/// Capability over the sync lines.
pub trait SyncIo: Send {
    /// Claim `pins` as outputs, initially low.
    fn configure_outputs(&mut self, pins: &[PinId]) -> Result<(), SyncError>;

    /// Claim `pin` as the input line.
    fn configure_input(&mut self, pin: PinId, pull: Pull) -> Result<(), SyncError>;

    /// Drive one output line.
    fn set(&mut self, pin: PinId, level: Level) -> Result<(), SyncError>;

    /// Block until `edge` is seen on `pin`. No timeout.
    fn wait_for_edge(&mut self, pin: PinId, edge: Edge) -> Result<(), SyncError>;

    /// Register `callback` for `edge` on `pin`; returns immediately.
    fn on_edge(&mut self, pin: PinId, edge: Edge, callback: EdgeCallback)
        -> Result<(), SyncError>;

    /// Drive outputs low, stop dispatch and release every line.
    fn teardown(&mut self) -> Result<(), SyncError>;

    /// Drive every pin in `pins` to `level`.
    fn set_all(&mut self, pins: &[PinId], level: Level) -> Result<(), SyncError> {
        tracing::debug!("Setting pins {:?} {}", pins, level);
        for &pin in pins {
            self.set(pin, level)?;
        }
        Ok(())
    }
}

/// Input debounce over edge timestamps.
///
/// An edge within `window` of the previously accepted edge is dropped,
/// whatever its direction. Dropped edges do not restart the window.
#[derive(Debug, Clone)]
pub struct Debounce {
    window_ns: u64,
    last_accepted: Option<u64>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ns: u64::try_from(window.as_nanos()).unwrap_or(u64::MAX),
            last_accepted: None,
        }
    }

    /// Whether an edge stamped `at_ns` passes.
    pub fn accept(&mut self, at_ns: u64) -> bool {
        if let Some(previous) = self.last_accepted {
            if at_ns.saturating_sub(previous) < self.window_ns {
                return false;
            }
        }
        self.last_accepted = Some(at_ns);
        true
    }
}

/// Level a line settles at after `edge`.
pub fn level_after(edge: Edge) -> Level {
    match edge {
        Edge::Rising => Level::High,
        Edge::Falling => Level::Low,
    }
}
