//! Simulated test rig.
//!
//! One virtual clock and one journal shared by a simulated player and
//! simulated sync lines, wired through `session::run_with`.

use pisync::clock::ManualClock;
use pisync::config::{ConfigFile, SessionConfig};
use pisync::journal::{Journal, SimEvent};
use pisync::playback::{PlayerCall, SimulatedPlayer};
use pisync::session::{self, SessionError};
use pisync::sync_io::{EdgeScript, SimulatedSyncIo};
use pisync::{RunSummary, Shutdown};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Simulated player and lines on a shared virtual clock.
#[derive(Clone)]
pub struct Rig {
    pub clock: Arc<ManualClock>,
    pub journal: Arc<Journal>,
    pub player: Arc<SimulatedPlayer>,
}

impl Rig {
    pub fn new(clip: Duration) -> Self {
        let clock = Arc::new(ManualClock::new());
        let journal = Journal::new(clock.clone());
        let player = Arc::new(
            SimulatedPlayer::new(clock.clone(), clip).with_journal(journal.clone()),
        );
        Self {
            clock,
            journal,
            player,
        }
    }

    /// Unscripted lines: every edge wait takes `interval`.
    pub fn idle_io(&self, interval: Duration) -> SimulatedSyncIo {
        SimulatedSyncIo::new(self.clock.clone(), interval).with_journal(self.journal.clone())
    }

    /// Lines whose input edges come from the returned script.
    pub fn scripted_io(&self) -> (SimulatedSyncIo, EdgeScript) {
        let (io, script) = SimulatedSyncIo::scripted(self.clock.clone());
        (io.with_journal(self.journal.clone()), script)
    }

    pub fn run(
        &self,
        config: &SessionConfig,
        io: SimulatedSyncIo,
        shutdown: Shutdown,
    ) -> Result<RunSummary, SessionError> {
        session::run_with(
            config,
            self.player.clone(),
            Box::new(io),
            self.clock.clone(),
            shutdown,
        )
    }

    /// Number of journaled player calls equal to `call`.
    pub fn calls(&self, call: PlayerCall) -> usize {
        self.journal.count(|e| *e == SimEvent::Player(call.clone()))
    }
}

/// Primary configuration for a bounded run, start-up pulse off.
pub fn primary_config(edit: impl FnOnce(&mut ConfigFile)) -> SessionConfig {
    let mut file = ConfigFile::default();
    file.playback.media_file = Some(PathBuf::from("wall.mp4"));
    file.playback.loop_forever = false;
    file.emitter.init_pulse_secs = 0.0;
    edit(&mut file);
    SessionConfig::from_file(&file).expect("valid primary config")
}

/// Secondary configuration for a bounded run.
pub fn secondary_config(edit: impl FnOnce(&mut ConfigFile)) -> SessionConfig {
    let mut file = ConfigFile::default();
    file.role = "secondary".to_string();
    file.playback.media_file = Some(PathBuf::from("wall.mp4"));
    file.playback.loop_forever = false;
    edit(&mut file);
    SessionConfig::from_file(&file).expect("valid secondary config")
}

/// Poll `condition` in real time until it holds; panics after five seconds.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}
