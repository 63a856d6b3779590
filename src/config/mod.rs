//! Session configuration.
//!
//! The TOML file and command line produce a [`ConfigFile`]; validation turns
//! it into an immutable [`SessionConfig`] that the role loops take by
//! reference. Nothing inside the loops reads configuration from anywhere else.

pub mod loader;

use crate::roles::FollowerMode;
use crate::sync_io::{Edge, PinId, Pull};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use loader::{
    find_config_path, get_config_dir, get_config_path, load_config, load_config_file,
    save_config, to_toml, Overrides, LOCAL_CONFIG_FILE,
};

/// Node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Drives playback and the sync lines
    Primary,
    /// Follows the primary's pulses
    Secondary,
}

impl std::str::FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Role::Primary),
            "secondary" => Ok(Role::Secondary),
            _ => Err(ConfigError::InvalidRole(s.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

/// Configuration file contents, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// "primary" or "secondary"
    pub role: String,
    /// Media settings
    pub playback: PlaybackSettings,
    /// Loop timing
    pub timing: TimingSettings,
    /// Primary-only settings
    pub emitter: EmitterSettings,
    /// Secondary-only settings
    pub follower: FollowerSettings,
    /// Line backend settings
    pub gpio: GpioSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            role: "primary".to_string(),
            playback: PlaybackSettings::default(),
            timing: TimingSettings::default(),
            emitter: EmitterSettings::default(),
            follower: FollowerSettings::default(),
            gpio: GpioSettings::default(),
        }
    }
}

/// Media settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Video to loop
    pub media_file: Option<PathBuf>,
    /// Start fullscreen
    pub fullscreen: bool,
    /// Loop until interrupted
    pub loop_forever: bool,
    /// Cycles to run when not looping forever
    pub repeat_count: u32,
    /// "mpv" or "simulated"
    pub backend: String,
    /// Toggle fullscreen off and on while settling
    pub toggle_fullscreen_during_settle: bool,
    /// Clip length for the simulated backend
    pub simulated_duration_secs: f64,
    /// mpv process settings
    pub mpv: MpvSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            media_file: None,
            fullscreen: true,
            loop_forever: true,
            repeat_count: 3,
            backend: "mpv".to_string(),
            toggle_fullscreen_during_settle: false,
            simulated_duration_secs: 60.0,
            mpv: MpvSettings::default(),
        }
    }
}

/// mpv process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpvSettings {
    /// Executable name or path
    pub binary: PathBuf,
    /// Extra command line arguments
    pub extra_args: Vec<String>,
}

impl Default for MpvSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mpv"),
            extra_args: Vec::new(),
        }
    }
}

/// Loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Playback time before the duration is read
    pub settle_secs: f64,
    /// Position sampling interval
    pub poll_interval_ms: u64,
    /// Spacing of progress lines (0 disables them)
    pub progress_interval_secs: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_secs: 2.5,
            poll_interval_ms: 200,
            progress_interval_secs: 5.0,
        }
    }
}

/// Primary-only settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterSettings {
    /// Sync output lines
    pub output_pins: Vec<PinId>,
    /// How long the lines stay high each cycle
    pub hold_secs: f64,
    /// Delay between driving the lines high and restarting
    pub signal_lead_secs: f64,
    /// End-of-clip guard band
    pub end_guard_ms: u64,
    /// Start-up pulse length (0 disables it)
    pub init_pulse_secs: f64,
    /// Pause after the start-up pulse
    pub init_pulse_settle_secs: f64,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self {
            output_pins: vec![17, 27, 22],
            hold_secs: 2.0,
            signal_lead_secs: 0.0,
            end_guard_ms: 3000,
            init_pulse_secs: 0.5,
            init_pulse_settle_secs: 2.0,
        }
    }
}

/// Secondary-only settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowerSettings {
    /// Sync input line
    pub input_pin: Option<PinId>,
    /// "none", "up" or "down"
    pub pull: String,
    /// "callback" or "poll"
    pub mode: String,
    /// Edge that restarts playback
    pub trigger_edge: String,
    /// End-of-clip guard band
    pub end_guard_ms: u64,
    /// Edges closer than this to the previous one are dropped
    pub debounce_ms: u64,
}

impl Default for FollowerSettings {
    fn default() -> Self {
        Self {
            input_pin: Some(4),
            pull: "down".to_string(),
            mode: "callback".to_string(),
            trigger_edge: "rising".to_string(),
            end_guard_ms: 1000,
            debounce_ms: 20,
        }
    }
}

/// Line backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioSettings {
    /// GPIO character device
    pub chip: PathBuf,
    /// Use simulated lines instead of hardware
    pub simulate: bool,
    /// How long an unscripted simulated edge wait takes
    pub simulated_edge_interval_secs: f64,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            chip: PathBuf::from("/dev/gpiochip0"),
            simulate: false,
            simulated_edge_interval_secs: 5.0,
        }
    }
}

/// Media engine selection.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendChoice {
    /// External mpv process
    Mpv {
        binary: PathBuf,
        extra_args: Vec<String>,
    },
    /// In-process simulated engine
    Simulated { clip: Duration },
}

/// Validated primary settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterConfig {
    pub output_pins: Vec<PinId>,
    pub hold: Duration,
    pub signal_lead: Duration,
    pub end_guard: Duration,
    pub init_pulse: Duration,
    pub init_pulse_settle: Duration,
}

/// Validated secondary settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowerConfig {
    pub input_pin: PinId,
    pub pull: Pull,
    pub mode: FollowerMode,
    pub trigger_edge: Edge,
    pub end_guard: Duration,
    pub debounce: Duration,
}

/// Role and its role-specific settings.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleConfig {
    Primary(EmitterConfig),
    Secondary(FollowerConfig),
}

impl RoleConfig {
    pub fn role(&self) -> Role {
        match self {
            RoleConfig::Primary(_) => Role::Primary,
            RoleConfig::Secondary(_) => Role::Secondary,
        }
    }
}

/// Validated line backend settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GpioConfig {
    pub chip: PathBuf,
    pub simulate: bool,
    pub simulated_edge_interval: Duration,
}

/// Immutable session configuration, built once at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub role: RoleConfig,
    pub media_file: PathBuf,
    pub fullscreen: bool,
    pub loop_forever: bool,
    pub repeat_count: u32,
    pub backend: BackendChoice,
    pub toggle_fullscreen_during_settle: bool,
    pub settle: Duration,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
    pub gpio: GpioConfig,
}

impl SessionConfig {
    /// Validate a configuration file.
    pub fn from_file(file: &ConfigFile) -> Result<Self, ConfigError> {
        let role: Role = file.role.parse()?;

        let media_file = file
            .playback
            .media_file
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(ConfigError::MissingMediaFile)?;

        if !file.playback.loop_forever && file.playback.repeat_count == 0 {
            return Err(ConfigError::invalid(
                "playback.repeat_count",
                "must be at least 1 unless loop_forever is set",
            ));
        }

        let poll_interval = Duration::from_millis(file.timing.poll_interval_ms);
        if poll_interval.is_zero() {
            return Err(ConfigError::invalid("timing.poll_interval_ms", "must be greater than 0"));
        }

        let backend = match file.playback.backend.trim().to_ascii_lowercase().as_str() {
            "mpv" => BackendChoice::Mpv {
                binary: file.playback.mpv.binary.clone(),
                extra_args: file.playback.mpv.extra_args.clone(),
            },
            "simulated" => {
                let clip = secs("playback.simulated_duration_secs", file.playback.simulated_duration_secs)?;
                if clip.is_zero() {
                    return Err(ConfigError::invalid(
                        "playback.simulated_duration_secs",
                        "must be greater than 0",
                    ));
                }
                BackendChoice::Simulated { clip }
            }
            other => {
                return Err(ConfigError::invalid(
                    "playback.backend",
                    format!("unknown backend '{}' (expected mpv or simulated)", other),
                ))
            }
        };

        let role = match role {
            Role::Primary => RoleConfig::Primary(emitter_config(&file.emitter, poll_interval)?),
            Role::Secondary => RoleConfig::Secondary(follower_config(&file.follower)?),
        };

        Ok(Self {
            role,
            media_file,
            fullscreen: file.playback.fullscreen,
            loop_forever: file.playback.loop_forever,
            repeat_count: file.playback.repeat_count,
            backend,
            toggle_fullscreen_during_settle: file.playback.toggle_fullscreen_during_settle,
            settle: secs("timing.settle_secs", file.timing.settle_secs)?,
            poll_interval,
            progress_interval: secs("timing.progress_interval_secs", file.timing.progress_interval_secs)?,
            gpio: GpioConfig {
                chip: file.gpio.chip.clone(),
                simulate: file.gpio.simulate,
                simulated_edge_interval: secs(
                    "gpio.simulated_edge_interval_secs",
                    file.gpio.simulated_edge_interval_secs,
                )?,
            },
        })
    }

    /// Configured role
    pub fn role(&self) -> Role {
        self.role.role()
    }

    /// Whether another cycle should start after `completed` cycles.
    pub fn wants_another_cycle(&self, completed: u32) -> bool {
        self.loop_forever || completed < self.repeat_count
    }
}

fn emitter_config(settings: &EmitterSettings, poll_interval: Duration) -> Result<EmitterConfig, ConfigError> {
    if settings.output_pins.is_empty() {
        return Err(ConfigError::MissingOutputPins);
    }

    let hold = secs("emitter.hold_secs", settings.hold_secs)?;
    if hold < poll_interval {
        tracing::warn!(
            "emitter.hold_secs ({:?}) is shorter than the poll interval ({:?}); polling followers may miss pulses",
            hold,
            poll_interval
        );
    }

    Ok(EmitterConfig {
        output_pins: settings.output_pins.clone(),
        hold,
        signal_lead: secs("emitter.signal_lead_secs", settings.signal_lead_secs)?,
        end_guard: Duration::from_millis(settings.end_guard_ms),
        init_pulse: secs("emitter.init_pulse_secs", settings.init_pulse_secs)?,
        init_pulse_settle: secs("emitter.init_pulse_settle_secs", settings.init_pulse_settle_secs)?,
    })
}

fn follower_config(settings: &FollowerSettings) -> Result<FollowerConfig, ConfigError> {
    let input_pin = settings.input_pin.ok_or(ConfigError::MissingInputPin)?;

    Ok(FollowerConfig {
        input_pin,
        pull: settings
            .pull
            .parse()
            .map_err(|reason| ConfigError::invalid("follower.pull", reason))?,
        mode: settings
            .mode
            .parse()
            .map_err(|reason| ConfigError::invalid("follower.mode", reason))?,
        trigger_edge: settings
            .trigger_edge
            .parse()
            .map_err(|reason| ConfigError::invalid("follower.trigger_edge", reason))?,
        end_guard: Duration::from_millis(settings.end_guard_ms),
        debounce: Duration::from_millis(settings.debounce_ms),
    })
}

/// Seconds from the file as a `Duration`; negative or non-finite values are rejected.
fn secs(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(field, format!("must be a non-negative number of seconds, got {}", value)));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::invalid(field, format!("{} seconds is out of range: {}", value, e)))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid role '{0}' (expected primary or secondary)")]
    InvalidRole(String),

    #[error("No media file configured")]
    MissingMediaFile,

    #[error("Primary role needs at least one output pin")]
    MissingOutputPins,

    #[error("Secondary role needs an input pin")]
    MissingInputPin,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
