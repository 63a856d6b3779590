//! Follower (secondary) loop.
//!
//! A follower never drives a line; it only reacts to the primary's pulse.
//! Its own end-of-clip wait exists to pace the loop, not to decide when to
//! restart.

use super::{FollowerMode, RunSummary};
use crate::config::{FollowerConfig, SessionConfig};
use crate::playback::{PlaybackController, PlaybackError, WaitOutcome};
use crate::session::SessionError;
use crate::shutdown::Shutdown;
use crate::sync_io::{Edge, PinId, SyncIo};
use std::sync::Arc;
use std::time::Duration;

/// Secondary role loop.
pub struct Follower<'a> {
    config: &'a SessionConfig,
    settings: &'a FollowerConfig,
    playback: Arc<PlaybackController>,
    io: Box<dyn SyncIo>,
    shutdown: Shutdown,
}

impl<'a> Follower<'a> {
    pub fn new(
        config: &'a SessionConfig,
        settings: &'a FollowerConfig,
        playback: Arc<PlaybackController>,
        io: Box<dyn SyncIo>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config,
            settings,
            playback,
            io,
            shutdown,
        }
    }

    /// Run until the cycle budget is used up or shutdown is requested, then
    /// release the player and tear down the line.
    pub fn run(mut self) -> Result<RunSummary, SessionError> {
        let result = self.run_mode();
        let drained = self.drain();
        let summary = result?;
        drained?;
        Ok(summary)
    }

    fn run_mode(&mut self) -> Result<RunSummary, SessionError> {
        self.io
            .configure_input(self.settings.input_pin, self.settings.pull)
            .map_err(SessionError::GpioSetup)?;

        let duration = self
            .playback
            .measure_duration(self.config.settle)
            .map_err(SessionError::MeasureDuration)?;

        tracing::info!(
            "Following pin {} in {} mode (restart on {} edge)",
            self.settings.input_pin,
            self.settings.mode,
            self.settings.trigger_edge
        );

        let summary = match self.settings.mode {
            FollowerMode::Poll => self.run_polling(duration)?,
            FollowerMode::Callback => self.run_callbacks(duration)?,
        };

        tracing::info!(
            "Follower stopped after {} cycles{}",
            summary.completed(),
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }

    /// Wait for the trigger edge, restart, play to near the end, repeat.
    ///
    /// A pulse arriving while the clip is still playing is missed; clips are
    /// nominally the same length on every node.
    fn run_polling(&mut self, duration: Duration) -> Result<RunSummary, SessionError> {
        let pin = self.settings.input_pin;
        let mut summary = RunSummary::default();

        while self.config.wants_another_cycle(summary.completed()) {
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }

            tracing::info!("Waiting for {} edge on pin {}", self.settings.trigger_edge, pin);
            self.io.wait_for_edge(pin, self.settings.trigger_edge)?;
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }

            tracing::info!("Sync pulse received, restarting");
            self.playback.restart()?;
            self.playback.resume()?;

            match self.wait_near_end(duration)? {
                Some(position) => {
                    let report = summary.record(position);
                    tracing::info!("Cycle {} complete at {} ms", report.index, position.as_millis());
                }
                None => {
                    summary.interrupted = true;
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// Register restart/resume callbacks and let them drive re-sync; the loop
    /// only counts clips as they near their end and come back round.
    fn run_callbacks(&mut self, duration: Duration) -> Result<RunSummary, SessionError> {
        let pin = self.settings.input_pin;
        let restart_edge = self.settings.trigger_edge;

        self.register(pin, restart_edge, "restart", PlaybackController::restart)?;
        self.register(pin, restart_edge.opposite(), "resume", PlaybackController::resume)?;

        self.playback.resume()?;

        let mut summary = RunSummary::default();
        while self.config.wants_another_cycle(summary.completed()) {
            match self.wait_near_end(duration)? {
                Some(position) => {
                    let report = summary.record(position);
                    tracing::info!("Clip {} reached {} ms", report.index, position.as_millis());
                }
                None => {
                    summary.interrupted = true;
                    break;
                }
            }

            if !self.config.wants_another_cycle(summary.completed()) {
                break;
            }

            let rewound = self.playback.wait_until_rewound(
                duration,
                self.settings.end_guard,
                self.config.poll_interval,
                &self.shutdown,
            )?;
            if rewound == WaitOutcome::Interrupted {
                summary.interrupted = true;
                break;
            }
        }

        Ok(summary)
    }

    fn register(
        &mut self,
        pin: PinId,
        edge: Edge,
        action: &'static str,
        apply: fn(&PlaybackController) -> Result<(), PlaybackError>,
    ) -> Result<(), SessionError> {
        let playback = Arc::clone(&self.playback);
        self.io
            .on_edge(
                pin,
                edge,
                Box::new(move || match apply(&playback) {
                    Ok(()) => tracing::info!("{} edge: {}", edge, action),
                    Err(e) => tracing::warn!("{} edge: {} failed: {}", edge, action, e),
                }),
            )
            .map_err(SessionError::GpioSetup)
    }

    fn wait_near_end(&self, duration: Duration) -> Result<Option<Duration>, SessionError> {
        let outcome = self.playback.wait_until_near_end(
            duration,
            self.settings.end_guard,
            self.config.poll_interval,
            &self.shutdown,
        )?;
        Ok(match outcome {
            WaitOutcome::NearEnd(position) => Some(position),
            WaitOutcome::Rewound(_) | WaitOutcome::Interrupted => None,
        })
    }

    fn drain(&mut self) -> Result<(), SessionError> {
        // Edge dispatch stops before the player goes away.
        let torn_down = self.io.teardown().map_err(SessionError::Sync);
        let released = self.playback.release().map_err(SessionError::Playback);
        if let Err(e) = &torn_down {
            tracing::error!("Sync line teardown failed: {}", e);
        }
        if let Err(e) = &released {
            tracing::error!("Player release failed: {}", e);
        }
        released.and(torn_down)
    }
}
