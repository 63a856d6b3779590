//! GPIO character device backend
//!
//! Drives the sync lines through `/dev/gpiochipN`. Line offsets on
//! `gpiochip0` are the BCM pin numbers on every Raspberry Pi model.

use super::{Debounce, Edge, EdgeCallback, Level, PinId, Pull, SyncError, SyncIo};
use gpio_cdev::{Chip, EventRequestFlags, EventType, Line, LineEventHandle, LineHandle, LineRequestFlags};
use std::collections::HashMap;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Consumer label shown by `gpioinfo`
const CONSUMER: &str = "pisync";

/// How long the dispatcher blocks in `poll` before re-checking its stop flag
const DISPATCH_POLL_MS: libc::c_int = 100;

type CallbackTable = Arc<Mutex<HashMap<Edge, EdgeCallback>>>;

struct EdgeDispatcher {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Sync lines on real hardware.
pub struct GpioSyncIo {
    chip: Chip,
    chip_path: PathBuf,
    debounce: Duration,
    outputs: HashMap<PinId, LineHandle>,
    input: Option<Line>,
    callbacks: CallbackTable,
    dispatcher: Option<EdgeDispatcher>,
}

impl GpioSyncIo {
    /// Open the GPIO chip. Fails with [`SyncError::Unavailable`] off target.
    pub fn open(chip_path: &Path, debounce: Duration) -> Result<Self, SyncError> {
        let chip = Chip::new(chip_path).map_err(|e| {
            SyncError::Unavailable(format!("{}: {}", chip_path.display(), e))
        })?;

        tracing::info!(
            "Opened GPIO chip {} ({} lines)",
            chip_path.display(),
            chip.num_lines()
        );

        Ok(Self {
            chip,
            chip_path: chip_path.to_path_buf(),
            debounce,
            outputs: HashMap::new(),
            input: None,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            dispatcher: None,
        })
    }

    fn input_line(&self, pin: PinId) -> Result<&Line, SyncError> {
        self.input
            .as_ref()
            .filter(|line| line.offset() == pin)
            .ok_or(SyncError::PinNotConfigured(pin))
    }

    fn spawn_dispatcher(&mut self, pin: PinId) -> Result<(), SyncError> {
        let line = self.input_line(pin)?.clone();
        let events = line
            .events(LineRequestFlags::INPUT, EventRequestFlags::BOTH_EDGES, CONSUMER)
            .map_err(|e| gpio_error(pin, e))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let callbacks = Arc::clone(&self.callbacks);
        let debounce = self.debounce;

        let handle = std::thread::Builder::new()
            .name(format!("pisync-edges-{}", pin))
            .spawn(move || dispatch_edges(pin, events, callbacks, debounce, thread_stop))
            .map_err(|e| gpio_error(pin, e))?;

        self.dispatcher = Some(EdgeDispatcher { stop, handle });
        Ok(())
    }
}

impl SyncIo for GpioSyncIo {
    fn configure_outputs(&mut self, pins: &[PinId]) -> Result<(), SyncError> {
        for &pin in pins {
            let handle = self
                .chip
                .get_line(pin)
                .and_then(|line| line.request(LineRequestFlags::OUTPUT, Level::Low.as_u8(), CONSUMER))
                .map_err(|e| gpio_error(pin, e))?;
            self.outputs.insert(pin, handle);
            tracing::info!("Pin {} configured as output (initially LOW)", pin);
        }
        Ok(())
    }

    fn configure_input(&mut self, pin: PinId, pull: Pull) -> Result<(), SyncError> {
        let line = self.chip.get_line(pin).map_err(|e| gpio_error(pin, e))?;
        if pull != Pull::None {
            // The v1 character device ABI has no bias flags.
            tracing::info!(
                "Pin {}: pull {:?} must be set in firmware config (e.g. gpio={}=ip,p{})",
                pin,
                pull,
                pin,
                if pull == Pull::Up { "u" } else { "d" }
            );
        }
        tracing::info!("Pin {} configured as input on {}", pin, self.chip_path.display());
        self.input = Some(line);
        Ok(())
    }

    fn set(&mut self, pin: PinId, level: Level) -> Result<(), SyncError> {
        let handle = self
            .outputs
            .get(&pin)
            .ok_or(SyncError::PinNotConfigured(pin))?;
        handle
            .set_value(level.as_u8())
            .map_err(|e| gpio_error(pin, e))
    }

    fn wait_for_edge(&mut self, pin: PinId, edge: Edge) -> Result<(), SyncError> {
        let line = self.input_line(pin)?;
        // A fresh request per wait so edges seen while playing are not replayed.
        let mut events = line
            .events(LineRequestFlags::INPUT, event_flags(edge), CONSUMER)
            .map_err(|e| gpio_error(pin, e))?;

        tracing::debug!("Waiting for {} edge on pin {}", edge, pin);
        loop {
            let event = events.get_event().map_err(|e| gpio_error(pin, e))?;
            if edge_of(event.event_type()) == edge {
                return Ok(());
            }
        }
    }

    fn on_edge(
        &mut self,
        pin: PinId,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<(), SyncError> {
        self.input_line(pin)?;
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(edge, callback);

        if self.dispatcher.is_none() {
            self.spawn_dispatcher(pin)?;
        }
        tracing::info!("Registered {} edge callback on pin {}", edge, pin);
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), SyncError> {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop.store(true, Ordering::SeqCst);
            let _ = dispatcher.handle.join();
        }
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let mut first_error = None;
        for (pin, handle) in self.outputs.drain() {
            if let Err(e) = handle.set_value(Level::Low.as_u8()) {
                first_error.get_or_insert(gpio_error(pin, e));
            }
        }
        self.input = None;

        tracing::info!("GPIO lines released");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for GpioSyncIo {
    fn drop(&mut self) {
        if self.dispatcher.is_some() || !self.outputs.is_empty() {
            let _ = self.teardown();
        }
    }
}

fn dispatch_edges(
    pin: PinId,
    mut events: LineEventHandle,
    callbacks: CallbackTable,
    debounce: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut debounce = Debounce::new(debounce);
    let mut pollfd = libc::pollfd {
        fd: events.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    while !stop.load(Ordering::SeqCst) {
        pollfd.revents = 0;
        // SAFETY: `pollfd` points at one valid pollfd whose fd is owned by
        // `events`, which outlives this call.
        let ready = unsafe { libc::poll(&mut pollfd, 1, DISPATCH_POLL_MS) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!("Edge dispatch on pin {} stopped: {}", pin, err);
            return;
        }
        if ready == 0 {
            continue;
        }

        let event = match events.get_event() {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Edge dispatch on pin {} stopped: {}", pin, e);
                return;
            }
        };

        let edge = edge_of(event.event_type());
        if !debounce.accept(event.timestamp()) {
            tracing::debug!("Ignoring {} edge on pin {} (bounce)", edge, pin);
            continue;
        }

        let mut table = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = table.get_mut(&edge) {
            tracing::debug!("{} edge on pin {}", edge, pin);
            callback();
        }
    }
}

fn event_flags(edge: Edge) -> EventRequestFlags {
    match edge {
        Edge::Rising => EventRequestFlags::RISING_EDGE,
        Edge::Falling => EventRequestFlags::FALLING_EDGE,
    }
}

fn edge_of(event_type: EventType) -> Edge {
    match event_type {
        EventType::RisingEdge => Edge::Rising,
        EventType::FallingEdge => Edge::Falling,
    }
}

fn gpio_error(pin: PinId, err: impl std::fmt::Display) -> SyncError {
    SyncError::Gpio {
        pin,
        reason: err.to_string(),
    }
}
