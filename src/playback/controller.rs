//! Playback Controller
//!
//! Owns the media engine for the lifetime of a session and exposes the
//! handful of operations the sync protocol needs.

use super::{near_end_threshold, MediaBackend, PlaybackError, PlayerState};
use crate::clock::{format_hms, Clock};
use crate::shutdown::Shutdown;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Default spacing of progress lines while waiting for the clip end
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// How a blocking position wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Position crossed the near-end threshold
    NearEnd(Duration),
    /// Position fell back below the near-end threshold
    Rewound(Duration),
    /// Shutdown was requested while waiting
    Interrupted,
}

/// Handle over a loaded media engine.
///
/// Shared as `Arc<PlaybackController>` when edge callbacks need to restart or
/// resume playback from the dispatch thread.
pub struct PlaybackController {
    backend: Arc<dyn MediaBackend>,
    clock: Arc<dyn Clock>,
    path: PathBuf,
    fullscreen: bool,
    toggle_fullscreen_during_settle: bool,
    progress_interval: Duration,
    duration: OnceLock<Duration>,
    released: AtomicBool,
}

impl PlaybackController {
    /// Open `path` on `backend`. Fails if the engine cannot produce a
    /// playable session.
    pub fn load(
        backend: Arc<dyn MediaBackend>,
        clock: Arc<dyn Clock>,
        path: &Path,
        fullscreen: bool,
    ) -> Result<Self, PlaybackError> {
        tracing::info!("Loading media: {}", path.display());
        backend.open(path)?;

        if fullscreen {
            backend.set_fullscreen(true)?;
        }

        Ok(Self {
            backend,
            clock,
            path: path.to_path_buf(),
            fullscreen,
            toggle_fullscreen_during_settle: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            duration: OnceLock::new(),
            released: AtomicBool::new(false),
        })
    }

    /// Toggle fullscreen off and on while settling; some engines only size
    /// the window correctly after a toggle.
    pub fn with_fullscreen_toggle(mut self, enabled: bool) -> Self {
        self.toggle_fullscreen_during_settle = enabled;
        self
    }

    /// Spacing of progress lines; zero disables them.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Loaded file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Duration learned by [`measure_duration`](Self::measure_duration)
    pub fn duration(&self) -> Option<Duration> {
        self.duration.get().copied()
    }

    /// Play for `settle`, rewind to zero, then read the duration.
    ///
    /// Engines often cannot report a duration until something has been
    /// buffered, so this runs once before the main loop. The result is
    /// cached; later calls return it without playing again.
    pub fn measure_duration(&self, settle: Duration) -> Result<Duration, PlaybackError> {
        self.ensure_live()?;
        if let Some(duration) = self.duration.get() {
            return Ok(*duration);
        }

        tracing::info!("Playing briefly ({:?}) to learn the media duration", settle);
        self.backend.play()?;

        if self.toggle_fullscreen_during_settle && self.fullscreen {
            tracing::debug!("Toggling fullscreen during settle");
            let third = settle / 3;
            self.clock.sleep(third);
            self.backend.set_fullscreen(false)?;
            self.clock.sleep(third);
            self.backend.set_fullscreen(true)?;
            self.clock.sleep(settle - third * 2);
        } else {
            self.clock.sleep(settle);
        }

        self.restart()?;

        let duration = match self.backend.duration() {
            Ok(Some(duration)) if !duration.is_zero() => duration,
            Ok(_) => return Err(PlaybackError::DurationUnavailable),
            Err(e) if e.is_transient() => {
                tracing::warn!("Duration query failed: {}", e);
                return Err(PlaybackError::DurationUnavailable);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Media duration: {} ({} ms)",
            format_hms(duration),
            duration.as_millis()
        );
        Ok(*self.duration.get_or_init(|| duration))
    }

    /// Pause if playing, then seek to zero. Leaves playback paused.
    pub fn restart(&self) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        match self.backend.state()? {
            PlayerState::Playing => self.backend.pause()?,
            state => tracing::debug!("Player is {:?}, skipping pause", state),
        }
        tracing::debug!("Resetting to start");
        self.backend.seek(Duration::ZERO)
    }

    /// Start or continue playback from the current position.
    pub fn resume(&self) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        if self.backend.state()? == PlayerState::Playing {
            tracing::debug!("Already playing, skipping resume");
            return Ok(());
        }
        tracing::debug!("Resuming playback");
        self.backend.play()
    }

    /// Block until `position >= duration - max(guard, 3 * poll_interval)`.
    ///
    /// Transient position-query failures are re-polled on the next interval;
    /// engine failures end the wait with an error.
    pub fn wait_until_near_end(
        &self,
        duration: Duration,
        guard: Duration,
        poll_interval: Duration,
        shutdown: &Shutdown,
    ) -> Result<WaitOutcome, PlaybackError> {
        self.ensure_live()?;
        let threshold = near_end_threshold(duration, guard, poll_interval);
        tracing::debug!(
            "Waiting for position >= {} ms (duration {} ms)",
            threshold.as_millis(),
            duration.as_millis()
        );

        let mut last_progress = None;
        loop {
            if shutdown.is_triggered() {
                return Ok(WaitOutcome::Interrupted);
            }

            match self.backend.position() {
                Ok(position) if position >= threshold => return Ok(WaitOutcome::NearEnd(position)),
                Ok(position) => self.log_progress(position, duration, &mut last_progress),
                Err(e) if e.is_transient() => tracing::debug!("Re-polling after: {}", e),
                Err(e) => return Err(e),
            }

            self.clock.sleep(poll_interval);
        }
    }

    /// Block until the position falls back below the near-end threshold,
    /// i.e. the clip was restarted or looped by the engine.
    pub fn wait_until_rewound(
        &self,
        duration: Duration,
        guard: Duration,
        poll_interval: Duration,
        shutdown: &Shutdown,
    ) -> Result<WaitOutcome, PlaybackError> {
        self.ensure_live()?;
        let threshold = near_end_threshold(duration, guard, poll_interval);

        loop {
            if shutdown.is_triggered() {
                return Ok(WaitOutcome::Interrupted);
            }

            match self.backend.position() {
                Ok(position) if position < threshold => return Ok(WaitOutcome::Rewound(position)),
                Ok(_) => {}
                Err(e) if e.is_transient() => tracing::debug!("Re-polling after: {}", e),
                Err(e) => return Err(e),
            }

            self.clock.sleep(poll_interval);
        }
    }

    /// Stop playback and release the engine. Only the first call has any
    /// effect; dropping the controller releases it too.
    pub fn release(&self) -> Result<(), PlaybackError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Stopping and releasing player");
        let stopped = self.backend.stop();
        let released = self.backend.release();
        stopped.and(released)
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), PlaybackError> {
        if self.is_released() {
            Err(PlaybackError::Released)
        } else {
            Ok(())
        }
    }

    fn log_progress(&self, position: Duration, duration: Duration, last: &mut Option<Duration>) {
        if self.progress_interval.is_zero() {
            return;
        }

        let now = self.clock.now();
        let due = last.map_or(true, |at| now.saturating_sub(at) >= self.progress_interval);
        if due {
            let percent = position.as_millis() * 100 / duration.as_millis().max(1);
            tracing::info!(
                "Waiting for playback to finish. [{} / {}] ({}%)",
                format_hms(position),
                format_hms(duration),
                percent
            );
            *last = Some(now);
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Player release on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("path", &self.path)
            .field("duration", &self.duration.get())
            .field("released", &self.is_released())
            .finish()
    }
}
