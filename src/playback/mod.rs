//! Playback
//!
//! A small, role-agnostic surface over the media engine: load, learn the
//! clip duration, restart from zero, resume, and wait until the clip is close
//! to its end. Emitter and follower use it identically.

pub mod controller;
#[cfg(unix)]
pub mod mpv;
pub mod simulated;

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// Re-export main types
pub use controller::{PlaybackController, WaitOutcome};
#[cfg(unix)]
pub use mpv::{KillHandle, MpvBackend, MpvOptions};
pub use simulated::{PlayerCall, SimulatedPlayer};

/// Playback errors
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Player initialisation failed: {0}")]
    Init(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Media duration unavailable after settling")]
    DurationUnavailable,

    #[error("Media engine error: {0}")]
    Engine(String),

    #[error("Position query failed: {0}")]
    Query(String),

    #[error("Player already released")]
    Released,
}

impl PlaybackError {
    /// Transient failures are re-polled; everything else is fatal.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackError::Query(_))
    }
}

/// Engine-reported playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing loaded
    Idle,
    /// Actively playing
    Playing,
    /// Paused at a position
    Paused,
    /// Stopped or finished
    Stopped,
}

/// Media engine capability.
///
/// Methods take `&self` so the engine can be driven from the edge-callback
/// dispatcher while the main loop polls the position.
pub trait MediaBackend: Send + Sync {
    /// Load a media file; playback stays paused.
    fn open(&self, path: &Path) -> Result<(), PlaybackError>;

    /// Start or continue playback
    fn play(&self) -> Result<(), PlaybackError>;

    /// Pause playback
    fn pause(&self) -> Result<(), PlaybackError>;

    /// Seek to an absolute position
    fn seek(&self, position: Duration) -> Result<(), PlaybackError>;

    /// Current position
    fn position(&self) -> Result<Duration, PlaybackError>;

    /// Total duration, if the engine knows it yet
    fn duration(&self) -> Result<Option<Duration>, PlaybackError>;

    /// Current state
    fn state(&self) -> Result<PlayerState, PlaybackError>;

    /// Enter or leave fullscreen
    fn set_fullscreen(&self, fullscreen: bool) -> Result<(), PlaybackError>;

    /// Stop playback
    fn stop(&self) -> Result<(), PlaybackError>;

    /// Release all engine resources
    fn release(&self) -> Result<(), PlaybackError>;
}

/// Position below which the clip is not yet "near the end".
///
/// The guard band never drops below three poll intervals, so poll
/// granularity alone cannot carry the wait past the real end.
pub fn near_end_threshold(duration: Duration, guard: Duration, poll_interval: Duration) -> Duration {
    duration.saturating_sub(guard.max(poll_interval * 3))
}
