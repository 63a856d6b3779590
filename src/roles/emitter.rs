//! Emitter (primary) loop.
//!
//! Per cycle: drive the sync lines high, restart playback while they are high,
//! hold, drive them low, resume, then wait for the clip to near its end. The
//! order high < restart < hold elapsed < low is what keeps followers aligned
//! and must not change.

use super::RunSummary;
use crate::clock::Clock;
use crate::config::{EmitterConfig, SessionConfig};
use crate::playback::{PlaybackController, WaitOutcome};
use crate::session::SessionError;
use crate::shutdown::Shutdown;
use crate::sync_io::{Level, SyncIo};
use std::sync::Arc;

/// Emitter state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterPhase {
    /// Start-up: the session has already loaded the media before building
    /// the emitter; this phase claims the output lines and sends the
    /// start-up pulse
    Loading,
    /// Learning the clip duration
    Settling,
    /// Lines going high
    Signalling,
    /// Playback rewinding to zero
    Restarting,
    /// Lines held high
    Holding,
    /// Lines going low
    Deasserting,
    /// Playback resuming
    Resuming,
    /// Waiting for the clip to near its end
    AwaitingEnd,
    /// Releasing player and lines
    Draining,
    /// Done
    Terminated,
}

/// Primary role loop.
pub struct Emitter<'a> {
    config: &'a SessionConfig,
    settings: &'a EmitterConfig,
    playback: Arc<PlaybackController>,
    io: Box<dyn SyncIo>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    phase: EmitterPhase,
}

impl<'a> Emitter<'a> {
    pub fn new(
        config: &'a SessionConfig,
        settings: &'a EmitterConfig,
        playback: Arc<PlaybackController>,
        io: Box<dyn SyncIo>,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config,
            settings,
            playback,
            io,
            clock,
            shutdown,
            phase: EmitterPhase::Loading,
        }
    }

    /// Current phase
    pub fn phase(&self) -> EmitterPhase {
        self.phase
    }

    /// Run every cycle, then drain. The player is released and the lines
    /// torn down on every exit path.
    pub fn run(mut self) -> Result<RunSummary, SessionError> {
        let result = self.run_cycles();
        let drained = self.drain();
        let summary = result?;
        drained?;
        Ok(summary)
    }

    fn enter(&mut self, phase: EmitterPhase) {
        tracing::debug!("Emitter {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn run_cycles(&mut self) -> Result<RunSummary, SessionError> {
        let settings = self.settings;
        let pins = settings.output_pins.as_slice();

        // Media is loaded by the session; finish start-up with the lines.
        self.enter(EmitterPhase::Loading);
        self.io
            .configure_outputs(pins)
            .map_err(SessionError::GpioSetup)?;
        self.init_pulse()?;

        self.enter(EmitterPhase::Settling);
        let duration = self
            .playback
            .measure_duration(self.config.settle)
            .map_err(SessionError::MeasureDuration)?;

        let mut summary = RunSummary::default();
        while self.config.wants_another_cycle(summary.completed()) {
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }

            tracing::info!("Starting cycle {}", summary.completed() + 1);

            self.enter(EmitterPhase::Signalling);
            self.io.set_all(pins, Level::High)?;
            if !settings.signal_lead.is_zero() {
                self.clock.sleep(settings.signal_lead);
            }

            self.enter(EmitterPhase::Restarting);
            self.playback.restart()?;

            self.enter(EmitterPhase::Holding);
            self.clock.sleep(settings.hold);

            self.enter(EmitterPhase::Deasserting);
            self.io.set_all(pins, Level::Low)?;

            self.enter(EmitterPhase::Resuming);
            self.playback.resume()?;

            self.enter(EmitterPhase::AwaitingEnd);
            match self.playback.wait_until_near_end(
                duration,
                settings.end_guard,
                self.config.poll_interval,
                &self.shutdown,
            )? {
                WaitOutcome::NearEnd(position) => {
                    let report = summary.record(position);
                    tracing::info!(
                        "Cycle {} complete at {} ms",
                        report.index,
                        position.as_millis()
                    );
                }
                WaitOutcome::Interrupted => {
                    summary.interrupted = true;
                    break;
                }
                WaitOutcome::Rewound(_) => {}
            }
        }

        if summary.interrupted {
            tracing::info!("Stopping after {} cycles (interrupted)", summary.completed());
        } else {
            tracing::info!("Finished {} cycles", summary.completed());
        }
        Ok(summary)
    }

    /// Freshly started followers miss the first high they see, so pulse once
    /// before the first real cycle.
    fn init_pulse(&mut self) -> Result<(), SessionError> {
        if self.settings.init_pulse.is_zero() {
            return Ok(());
        }

        tracing::info!("Sending start-up pulse ({:?})", self.settings.init_pulse);
        let settings = self.settings;
        let pins = settings.output_pins.as_slice();
        self.io.set_all(pins, Level::High)?;
        self.clock.sleep(self.settings.init_pulse);
        self.io.set_all(pins, Level::Low)?;
        self.clock.sleep(self.settings.init_pulse_settle);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SessionError> {
        self.enter(EmitterPhase::Draining);
        let released = self.playback.release().map_err(SessionError::Playback);
        let torn_down = self.io.teardown().map_err(SessionError::Sync);
        if let Err(e) = &released {
            tracing::error!("Player release failed: {}", e);
        }
        if let Err(e) = &torn_down {
            tracing::error!("Sync line teardown failed: {}", e);
        }
        self.enter(EmitterPhase::Terminated);
        released.and(torn_down)
    }
}
