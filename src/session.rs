//! Session wiring.
//!
//! Picks the media engine and the sync line backend once, loads the media,
//! and hands both to the configured role. This is the only place that knows
//! whether anything is simulated.

use crate::clock::{Clock, SystemClock};
use crate::config::{BackendChoice, RoleConfig, SessionConfig};
use crate::playback::{MediaBackend, PlaybackController, PlaybackError, SimulatedPlayer};
use crate::roles::{Emitter, Follower, RunSummary};
use crate::shutdown::Shutdown;
use crate::sync_io::{SimulatedSyncIo, SyncError, SyncIo};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Exit code for a run stopped by an interrupt
pub const EXIT_INTERRUPTED: u8 = 130;

/// Exit code for configuration errors
pub const EXIT_CONFIG: u8 = 2;

/// Failure of a session, named by the stage that failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to load media: {0}")]
    Load(PlaybackError),

    #[error("Failed to measure media duration: {0}")]
    MeasureDuration(PlaybackError),

    #[error("GPIO setup failed: {0}")]
    GpioSetup(SyncError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Sync line error: {0}")]
    Sync(#[from] SyncError),
}

impl SessionError {
    /// Stage that failed, for operator-facing messages.
    pub fn stage(&self) -> &'static str {
        match self {
            SessionError::Load(_) => "load",
            SessionError::MeasureDuration(_) => "duration-measure",
            SessionError::GpioSetup(_) => "gpio-setup",
            SessionError::Playback(_) => "playback",
            SessionError::Sync(_) => "sync",
        }
    }

    /// Process exit code.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Run a session against real time and the configured backends.
pub fn run(config: &SessionConfig, shutdown: Shutdown) -> Result<RunSummary, SessionError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let backend = build_backend(config, &clock, &shutdown)?;
    let io = build_sync_io(config, &clock)?;

    run_with(config, backend, io, clock, shutdown)
}

/// Run a session on the given backends.
pub fn run_with(
    config: &SessionConfig,
    backend: Arc<dyn MediaBackend>,
    io: Box<dyn SyncIo>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
) -> Result<RunSummary, SessionError> {
    tracing::info!(
        "Starting {} session for {}",
        config.role(),
        config.media_file.display()
    );

    let playback = PlaybackController::load(
        backend,
        Arc::clone(&clock),
        &config.media_file,
        config.fullscreen,
    )
    .map_err(SessionError::Load)?
    .with_fullscreen_toggle(config.toggle_fullscreen_during_settle)
    .with_progress_interval(config.progress_interval);
    let playback = Arc::new(playback);

    match &config.role {
        RoleConfig::Primary(settings) => {
            Emitter::new(config, settings, playback, io, clock, shutdown).run()
        }
        RoleConfig::Secondary(settings) => {
            Follower::new(config, settings, playback, io, shutdown).run()
        }
    }
}

fn build_backend(
    config: &SessionConfig,
    clock: &Arc<dyn Clock>,
    shutdown: &Shutdown,
) -> Result<Arc<dyn MediaBackend>, SessionError> {
    match &config.backend {
        BackendChoice::Simulated { clip } => {
            tracing::info!("Using simulated media engine ({:?} clip)", clip);
            Ok(Arc::new(SimulatedPlayer::new(Arc::clone(clock), *clip)))
        }
        BackendChoice::Mpv { binary, extra_args } => spawn_mpv(binary, extra_args, shutdown),
    }
}

#[cfg(unix)]
fn spawn_mpv(
    binary: &std::path::Path,
    extra_args: &[String],
    shutdown: &Shutdown,
) -> Result<Arc<dyn MediaBackend>, SessionError> {
    use crate::playback::{MpvBackend, MpvOptions};

    let options = MpvOptions {
        binary: binary.to_path_buf(),
        extra_args: extra_args.to_vec(),
        ..Default::default()
    };
    let backend = MpvBackend::spawn(options).map_err(SessionError::Load)?;
    let kill = backend.kill_handle();
    shutdown.on_abandon(move || kill.kill());
    Ok(Arc::new(backend))
}

#[cfg(not(unix))]
fn spawn_mpv(
    _binary: &std::path::Path,
    _extra_args: &[String],
    _shutdown: &Shutdown,
) -> Result<Arc<dyn MediaBackend>, SessionError> {
    Err(SessionError::Load(PlaybackError::Init(
        "the mpv backend needs a Unix IPC socket".to_string(),
    )))
}

fn build_sync_io(
    config: &SessionConfig,
    clock: &Arc<dyn Clock>,
) -> Result<Box<dyn SyncIo>, SessionError> {
    if config.gpio.simulate {
        tracing::info!("GPIO simulation enabled");
        let io = SimulatedSyncIo::new(Arc::clone(clock), config.gpio.simulated_edge_interval)
            .with_debounce(input_debounce(config));
        return Ok(Box::new(io));
    }
    open_gpio(config)
}

/// Bounce window for the input line. Only followers read one.
fn input_debounce(config: &SessionConfig) -> Duration {
    match &config.role {
        RoleConfig::Secondary(settings) => settings.debounce,
        RoleConfig::Primary(_) => Duration::ZERO,
    }
}

#[cfg(target_os = "linux")]
fn open_gpio(config: &SessionConfig) -> Result<Box<dyn SyncIo>, SessionError> {
    use crate::sync_io::GpioSyncIo;

    let io = GpioSyncIo::open(&config.gpio.chip, input_debounce(config))
        .map_err(SessionError::GpioSetup)?;
    Ok(Box::new(io))
}

#[cfg(not(target_os = "linux"))]
fn open_gpio(_config: &SessionConfig) -> Result<Box<dyn SyncIo>, SessionError> {
    Err(SessionError::GpioSetup(SyncError::Unavailable(
        "GPIO character devices need Linux; set gpio.simulate".to_string(),
    )))
}
