//! mpv backend
//!
//! Spawns `mpv` in idle mode and drives it over its JSON IPC socket: one
//! newline-delimited JSON request per command, replies matched by
//! `request_id`, asynchronous events skipped.

use super::{MediaBackend, PlaybackError, PlayerState};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// mpv process and IPC settings
#[derive(Debug, Clone)]
pub struct MpvOptions {
    /// mpv executable
    pub binary: PathBuf,
    /// IPC socket path
    pub socket_path: PathBuf,
    /// Let the engine loop the file by itself (followers keep showing video
    /// if a pulse is missed)
    pub loop_file: bool,
    /// Extra command line arguments passed through to mpv
    pub extra_args: Vec<String>,
    /// How long to wait for the IPC socket to appear
    pub connect_timeout: Duration,
    /// How long to wait for a command reply
    pub reply_timeout: Duration,
}

impl Default for MpvOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mpv"),
            socket_path: std::env::temp_dir().join(format!("pisync-mpv-{}.sock", std::process::id())),
            loop_file: true,
            extra_args: Vec::new(),
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(2),
        }
    }
}

/// A line read from the IPC socket: either a command reply or an event.
#[derive(Debug, Deserialize)]
struct IpcMessage {
    request_id: Option<u64>,
    error: Option<String>,
    data: Option<Value>,
    event: Option<String>,
}

struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    next_request_id: u64,
}

type SharedChild = Arc<Mutex<Option<Child>>>;

fn lock_child(child: &Mutex<Option<Child>>) -> MutexGuard<'_, Option<Child>> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Put the child in a process group of its own, so a terminal Ctrl-C reaches
/// only pisync and the player stays up while the session drains.
fn own_process_group(command: &mut Command) -> &mut Command {
    command.process_group(0)
}

/// Media backend talking to an external mpv process.
pub struct MpvBackend {
    options: MpvOptions,
    child: SharedChild,
    connection: Mutex<Option<Connection>>,
}

/// Kills the mpv process from outside the session, for when the session
/// thread is stuck and will never release the backend.
#[derive(Debug, Clone)]
pub struct KillHandle {
    child: Weak<Mutex<Option<Child>>>,
    socket_path: PathBuf,
}

impl KillHandle {
    /// Kill and reap mpv if it is still running. No-op once the backend has
    /// released or dropped it.
    pub fn kill(&self) {
        let Some(child) = self.child.upgrade() else {
            return;
        };
        let Some(mut child) = lock_child(&child).take() else {
            return;
        };
        tracing::warn!("Killing mpv (pid {})", child.id());
        let _ = child.kill();
        let _ = child.wait();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl MpvBackend {
    /// Start mpv and connect to its IPC socket.
    pub fn spawn(options: MpvOptions) -> Result<Self, PlaybackError> {
        let _ = std::fs::remove_file(&options.socket_path);

        let mut command = Command::new(&options.binary);
        command
            .arg("--idle=yes")
            .arg("--pause")
            .arg("--force-window=yes")
            .arg("--keep-open=yes")
            .arg("--no-terminal")
            .arg(format!("--input-ipc-server={}", options.socket_path.display()));
        if options.loop_file {
            command.arg("--loop-file=inf");
        }
        command
            .args(&options.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        own_process_group(&mut command);

        tracing::info!("Starting {}", options.binary.display());
        let mut child = command.spawn().map_err(|e| {
            PlaybackError::Init(format!("failed to start {}: {}", options.binary.display(), e))
        })?;

        let stream = match Self::connect(&options, &mut child) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        stream
            .set_read_timeout(Some(options.reply_timeout))
            .map_err(|e| PlaybackError::Init(format!("IPC socket setup failed: {}", e)))?;
        let writer = stream
            .try_clone()
            .map_err(|e| PlaybackError::Init(format!("IPC socket setup failed: {}", e)))?;

        Ok(Self {
            options,
            child: Arc::new(Mutex::new(Some(child))),
            connection: Mutex::new(Some(Connection {
                reader: BufReader::new(stream),
                writer,
                next_request_id: 1,
            })),
        })
    }

    fn connect(options: &MpvOptions, child: &mut Child) -> Result<UnixStream, PlaybackError> {
        let deadline = Instant::now() + options.connect_timeout;
        loop {
            match UnixStream::connect(&options.socket_path) {
                Ok(stream) => {
                    tracing::debug!("Connected to mpv IPC at {}", options.socket_path.display());
                    return Ok(stream);
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(PlaybackError::Init(format!(
                        "mpv IPC socket {} not available: {}",
                        options.socket_path.display(),
                        e
                    )));
                }
                Err(_) => {}
            }

            if let Ok(Some(status)) = child.try_wait() {
                return Err(PlaybackError::Init(format!("mpv exited early ({})", status)));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Handle that can kill mpv after the backend has been moved into a
    /// session.
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            child: Arc::downgrade(&self.child),
            socket_path: self.options.socket_path.clone(),
        }
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send one command and wait for its reply.
    fn command(&self, args: Value) -> Result<Value, PlaybackError> {
        let mut guard = self.connection();
        let conn = guard.as_mut().ok_or(PlaybackError::Released)?;

        let request_id = conn.next_request_id;
        conn.next_request_id += 1;

        let mut line = json!({ "command": args, "request_id": request_id }).to_string();
        line.push('\n');
        conn.writer
            .write_all(line.as_bytes())
            .map_err(|e| PlaybackError::Engine(format!("IPC write failed: {}", e)))?;

        loop {
            let mut buf = String::new();
            let read = conn.reader.read_line(&mut buf).map_err(|e| match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                    PlaybackError::Query(format!("no reply to request {}", request_id))
                }
                _ => PlaybackError::Engine(format!("IPC read failed: {}", e)),
            })?;
            if read == 0 {
                return Err(PlaybackError::Engine("mpv closed the IPC socket".to_string()));
            }

            let message: IpcMessage = match serde_json::from_str(&buf) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!("Skipping malformed IPC line: {}", e);
                    continue;
                }
            };

            if let Some(event) = message.event {
                tracing::trace!("mpv event: {}", event);
                continue;
            }
            if message.request_id != Some(request_id) {
                continue;
            }

            return match message.error.as_deref() {
                Some("success") => Ok(message.data.unwrap_or(Value::Null)),
                Some("property unavailable") => {
                    Err(PlaybackError::Query("property unavailable".to_string()))
                }
                Some(other) => Err(PlaybackError::Engine(format!("mpv rejected command: {}", other))),
                None => Err(PlaybackError::Engine("mpv reply without status".to_string())),
            };
        }
    }

    fn get_property(&self, name: &str) -> Result<Value, PlaybackError> {
        self.command(json!(["get_property", name]))
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), PlaybackError> {
        self.command(json!(["set_property", name, value])).map(|_| ())
    }

    fn get_flag(&self, name: &str) -> Result<bool, PlaybackError> {
        Ok(self.get_property(name)?.as_bool().unwrap_or(false))
    }

    fn wait_for_exit(&self) {
        let Some(mut child) = lock_child(&self.child).take() else {
            return;
        };

        let deadline = Instant::now() + self.options.reply_timeout;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        tracing::warn!("mpv did not quit in time, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl MediaBackend for MpvBackend {
    fn open(&self, path: &Path) -> Result<(), PlaybackError> {
        if !path.exists() {
            return Err(PlaybackError::FileNotFound(path.to_path_buf()));
        }
        let path = path.to_string_lossy();
        self.command(json!(["loadfile", path, "replace"]))
            .map(|_| ())
            .map_err(|e| PlaybackError::Init(format!("loadfile failed: {}", e)))
    }

    fn play(&self) -> Result<(), PlaybackError> {
        self.set_property("pause", json!(false))
    }

    fn pause(&self) -> Result<(), PlaybackError> {
        self.set_property("pause", json!(true))
    }

    fn seek(&self, position: Duration) -> Result<(), PlaybackError> {
        self.command(json!(["seek", position.as_secs_f64(), "absolute+exact"]))
            .map(|_| ())
    }

    fn position(&self) -> Result<Duration, PlaybackError> {
        self.get_property("time-pos")?
            .as_f64()
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
            .ok_or_else(|| PlaybackError::Query("time-pos is not a number".to_string()))
    }

    fn duration(&self) -> Result<Option<Duration>, PlaybackError> {
        match self.get_property("duration") {
            Ok(value) => Ok(value
                .as_f64()
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64)),
            Err(e) if e.is_transient() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn state(&self) -> Result<PlayerState, PlaybackError> {
        if self.get_flag("idle-active")? {
            return Ok(PlayerState::Idle);
        }
        if self.get_flag("eof-reached")? {
            return Ok(PlayerState::Stopped);
        }
        if self.get_flag("pause")? {
            Ok(PlayerState::Paused)
        } else {
            Ok(PlayerState::Playing)
        }
    }

    fn set_fullscreen(&self, fullscreen: bool) -> Result<(), PlaybackError> {
        self.set_property("fullscreen", json!(fullscreen))
    }

    fn stop(&self) -> Result<(), PlaybackError> {
        self.command(json!(["stop"])).map(|_| ())
    }

    fn release(&self) -> Result<(), PlaybackError> {
        if let Err(e) = self.command(json!(["quit"])) {
            tracing::debug!("quit command failed: {}", e);
        }
        self.connection().take();
        self.wait_for_exit();
        let _ = std::fs::remove_file(&self.options.socket_path);
        tracing::info!("mpv released");
        Ok(())
    }
}

impl Drop for MpvBackend {
    fn drop(&mut self) {
        if let Some(mut child) = lock_child(&self.child).take() {
            let _ = child.kill();
            let _ = child.wait();
            let _ = std::fs::remove_file(&self.options.socket_path);
        }
    }
}
