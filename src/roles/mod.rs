//! Role loops
//!
//! The primary (emitter) schedules every loop restart and pulses its output
//! lines; secondaries (followers) restart when they see the pulse. Both take
//! an already-loaded [`PlaybackController`](crate::playback::PlaybackController)
//! and a `dyn SyncIo`, and both always release the player and tear down the
//! lines before returning.

pub mod emitter;
pub mod follower;

use std::collections::VecDeque;
use std::time::Duration;

pub use emitter::{Emitter, EmitterPhase};
pub use follower::Follower;

/// How a follower reacts to the sync line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowerMode {
    /// Block on the trigger edge, restart, then play to near the end
    Poll,
    /// Restart and resume from edge callbacks; the main loop only paces
    #[default]
    Callback,
}

impl std::str::FromStr for FollowerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Ok(FollowerMode::Poll),
            "callback" => Ok(FollowerMode::Callback),
            other => Err(format!("unknown mode '{}' (expected callback or poll)", other)),
        }
    }
}

impl std::fmt::Display for FollowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FollowerMode::Poll => write!(f, "poll"),
            FollowerMode::Callback => write!(f, "callback"),
        }
    }
}

/// One completed playback cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// 1-based cycle number
    pub index: u32,
    /// Position when the near-end threshold was crossed
    pub end_position: Duration,
}

/// Cycle reports a summary keeps; older cycles are only counted.
pub const RECENT_CYCLES: usize = 32;

/// Outcome of a role loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Most recent completed cycles, oldest first
    pub cycles: VecDeque<CycleReport>,
    /// Whether the loop stopped on a shutdown request
    pub interrupted: bool,
    completed: u32,
}

impl RunSummary {
    /// Number of completed cycles.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Report of the latest completed cycle.
    pub fn last(&self) -> Option<&CycleReport> {
        self.cycles.back()
    }

    fn record(&mut self, end_position: Duration) -> CycleReport {
        self.completed = self.completed.saturating_add(1);
        let report = CycleReport {
            index: self.completed,
            end_position,
        };
        if self.cycles.len() == RECENT_CYCLES {
            self.cycles.pop_front();
        }
        self.cycles.push_back(report);
        report
    }
}
