//! Simulated media engine
//!
//! Position advances with the injected clock while playing and clamps at the
//! end of the clip. Like real engines it only reports a duration after some
//! playback has buffered. Calls are journaled only when a journal is attached,
//! so long simulated runs stay bounded.

use super::{MediaBackend, PlaybackError, PlayerState};
use crate::clock::Clock;
use crate::journal::{Journal, SimEvent};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Playback time needed before the simulated engine reports a duration
pub const DEFAULT_BUFFER_BEFORE_DURATION: Duration = Duration::from_millis(500);

/// Command issued to the simulated engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCall {
    Open(PathBuf),
    Play,
    Pause,
    Seek(Duration),
    SetFullscreen(bool),
    Stop,
    Release,
}

#[derive(Debug)]
struct SimState {
    loaded: bool,
    state: PlayerState,
    /// Position at the last play/pause/seek
    anchor: Duration,
    /// Clock time playback (re)started, while playing
    playing_since: Option<Duration>,
    /// Total time spent playing, for duration buffering
    played: Duration,
    fullscreen: bool,
    released: bool,
    failing_queries: u32,
}

/// Media engine stand-in driven by a [`Clock`].
pub struct SimulatedPlayer {
    clock: Arc<dyn Clock>,
    journal: Option<Arc<Journal>>,
    clip: Duration,
    buffer_before_duration: Duration,
    unplayable: bool,
    inner: Mutex<SimState>,
}

impl SimulatedPlayer {
    /// Simulate a clip of length `clip`.
    pub fn new(clock: Arc<dyn Clock>, clip: Duration) -> Self {
        Self {
            clock,
            journal: None,
            clip,
            buffer_before_duration: DEFAULT_BUFFER_BEFORE_DURATION,
            unplayable: false,
            inner: Mutex::new(SimState {
                loaded: false,
                state: PlayerState::Idle,
                anchor: Duration::ZERO,
                playing_since: None,
                played: Duration::ZERO,
                fullscreen: false,
                released: false,
                failing_queries: 0,
            }),
        }
    }

    /// Record every call into `journal`.
    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Make `open` fail as if the file could not be decoded.
    pub fn with_unplayable_media(mut self) -> Self {
        self.unplayable = true;
        self
    }

    /// Change how much playback is needed before a duration is reported.
    pub fn with_buffer_before_duration(mut self, buffer: Duration) -> Self {
        self.buffer_before_duration = buffer;
        self
    }

    /// Make the next `count` position queries fail transiently.
    pub fn fail_next_position_queries(&self, count: u32) {
        self.lock().failing_queries = count;
    }

    /// Whether fullscreen is currently on.
    pub fn is_fullscreen(&self) -> bool {
        self.lock().fullscreen
    }

    /// Journal this player records into, if any.
    pub fn journal(&self) -> Option<Arc<Journal>> {
        self.journal.clone()
    }

    fn record(&self, call: PlayerCall) {
        if let Some(journal) = &self.journal {
            journal.record(SimEvent::Player(call));
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state with playback advanced to the current clock time.
    fn advanced(&self) -> MutexGuard<'_, SimState> {
        let now = self.clock.now();
        let mut sim = self.lock();
        if let Some(since) = sim.playing_since {
            let position = sim.anchor + now.saturating_sub(since);
            if position >= self.clip {
                let remaining = self.clip.saturating_sub(sim.anchor);
                sim.played += remaining;
                sim.anchor = self.clip;
                sim.playing_since = None;
                sim.state = PlayerState::Stopped;
            }
        }
        sim
    }

    fn position_of(&self, sim: &SimState) -> Duration {
        match sim.playing_since {
            Some(since) => (sim.anchor + self.clock.now().saturating_sub(since)).min(self.clip),
            None => sim.anchor,
        }
    }

    fn live(&self, sim: &SimState) -> Result<(), PlaybackError> {
        if sim.released {
            return Err(PlaybackError::Released);
        }
        if !sim.loaded {
            return Err(PlaybackError::Engine("no media loaded".to_string()));
        }
        Ok(())
    }
}

impl MediaBackend for SimulatedPlayer {
    fn open(&self, path: &Path) -> Result<(), PlaybackError> {
        self.record(PlayerCall::Open(path.to_path_buf()));
        if self.unplayable {
            return Err(PlaybackError::Init(format!(
                "cannot decode {}",
                path.display()
            )));
        }

        let mut sim = self.lock();
        sim.loaded = true;
        sim.state = PlayerState::Paused;
        sim.anchor = Duration::ZERO;
        sim.playing_since = None;
        tracing::debug!("[simulated] Opened {} ({:?})", path.display(), self.clip);
        Ok(())
    }

    fn play(&self) -> Result<(), PlaybackError> {
        let mut sim = self.advanced();
        self.live(&sim)?;
        self.record(PlayerCall::Play);
        if sim.playing_since.is_none() {
            sim.playing_since = Some(self.clock.now());
            sim.state = PlayerState::Playing;
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), PlaybackError> {
        let mut sim = self.advanced();
        self.live(&sim)?;
        self.record(PlayerCall::Pause);
        if let Some(since) = sim.playing_since.take() {
            let now = self.clock.now();
            sim.played += now.saturating_sub(since);
            sim.anchor = (sim.anchor + now.saturating_sub(since)).min(self.clip);
            sim.state = PlayerState::Paused;
        }
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<(), PlaybackError> {
        let mut sim = self.advanced();
        self.live(&sim)?;
        self.record(PlayerCall::Seek(position));
        let now = self.clock.now();
        if let Some(since) = sim.playing_since {
            sim.played += now.saturating_sub(since);
            sim.playing_since = Some(now);
        }
        sim.anchor = position.min(self.clip);
        if sim.state == PlayerState::Stopped {
            sim.state = PlayerState::Paused;
        }
        Ok(())
    }

    fn position(&self) -> Result<Duration, PlaybackError> {
        let mut sim = self.advanced();
        self.live(&sim)?;
        if sim.failing_queries > 0 {
            sim.failing_queries -= 1;
            return Err(PlaybackError::Query("simulated glitch".to_string()));
        }
        Ok(self.position_of(&sim))
    }

    fn duration(&self) -> Result<Option<Duration>, PlaybackError> {
        let sim = self.advanced();
        self.live(&sim)?;
        let buffered = sim.played
            + sim
                .playing_since
                .map_or(Duration::ZERO, |since| self.clock.now().saturating_sub(since));
        Ok((buffered >= self.buffer_before_duration).then_some(self.clip))
    }

    fn state(&self) -> Result<PlayerState, PlaybackError> {
        let sim = self.advanced();
        if sim.released {
            return Err(PlaybackError::Released);
        }
        Ok(sim.state)
    }

    fn set_fullscreen(&self, fullscreen: bool) -> Result<(), PlaybackError> {
        let mut sim = self.lock();
        self.live(&sim)?;
        self.record(PlayerCall::SetFullscreen(fullscreen));
        sim.fullscreen = fullscreen;
        Ok(())
    }

    fn stop(&self) -> Result<(), PlaybackError> {
        let mut sim = self.lock();
        self.live(&sim)?;
        self.record(PlayerCall::Stop);
        sim.playing_since = None;
        sim.anchor = Duration::ZERO;
        sim.state = PlayerState::Stopped;
        Ok(())
    }

    fn release(&self) -> Result<(), PlaybackError> {
        let mut sim = self.lock();
        if sim.released {
            return Err(PlaybackError::Released);
        }
        self.record(PlayerCall::Release);
        sim.released = true;
        sim.playing_since = None;
        sim.state = PlayerState::Idle;
        Ok(())
    }
}
