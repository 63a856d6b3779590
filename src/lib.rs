//! pisync - GPIO-synchronised looping video playback
//!
//! Keeps a video wall of Raspberry Pis in lockstep. The primary loops a clip
//! and pulses its sync lines at every restart; secondaries restart their own
//! playback when they see the pulse.

pub mod clock;
pub mod config;
pub mod journal;
pub mod playback;
pub mod roles;
pub mod session;
pub mod shutdown;
pub mod sync_io;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigFile, SessionConfig};
pub use playback::{MediaBackend, PlaybackController};
pub use roles::{Emitter, Follower, RunSummary};
pub use session::SessionError;
pub use shutdown::Shutdown;
pub use sync_io::SyncIo;
