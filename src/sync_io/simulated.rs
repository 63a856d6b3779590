//! Simulated Sync I/O
//!
//! Stands in for the GPIO backend off target and in tests. Only current line
//! levels are kept by default; attaching a journal also keeps every
//! timestamped transition for inspection. Input edges either come from an
//! [`EdgeScript`] or, when unscripted, are assumed to arrive after a fixed
//! interval on the injected clock.

use super::{level_after, Debounce, Edge, EdgeCallback, Level, PinId, Pull, SyncError, SyncIo};
use crate::clock::Clock;
use crate::journal::{Journal, SimEvent};
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// A recorded level change on a simulated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Clock time of the change
    pub at: Duration,
    /// Line
    pub pin: PinId,
    /// New level
    pub level: Level,
}

#[derive(Debug, Default)]
struct LineState {
    levels: HashMap<PinId, Level>,
    /// Present only while recording
    transitions: Option<Vec<Transition>>,
}

impl LineState {
    fn apply(&mut self, at: Duration, pin: PinId, level: Level) {
        self.levels.insert(pin, level);
        if let Some(transitions) = &mut self.transitions {
            transitions.push(Transition { at, pin, level });
        }
    }
}

type CallbackTable = Arc<Mutex<HashMap<Edge, EdgeCallback>>>;

/// Sender side of a scripted edge sequence.
#[derive(Debug, Clone)]
pub struct EdgeScript {
    tx: Sender<Edge>,
}

impl EdgeScript {
    /// Deliver an edge on the simulated input line. Returns false once the
    /// simulated backend is gone.
    pub fn send(&self, edge: Edge) -> bool {
        self.tx.send(edge).is_ok()
    }
}

/// Read-only view of a simulated backend that stays usable after the backend
/// has been boxed and handed to a role loop.
#[derive(Debug, Clone)]
pub struct LineMonitor {
    lines: Arc<Mutex<LineState>>,
    journal: Option<Arc<Journal>>,
}

impl LineMonitor {
    /// Current level of `pin`, if it was ever driven.
    pub fn level(&self, pin: PinId) -> Option<Level> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .levels
            .get(&pin)
            .copied()
    }

    /// Level of `pin` at clock time `at`; lines idle low. Needs a journal to
    /// have been attached, otherwise every line reads low.
    pub fn level_at(&self, pin: PinId, at: Duration) -> Level {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transitions
            .iter()
            .flatten()
            .filter(|t| t.pin == pin && t.at <= at)
            .last()
            .map(|t| t.level)
            .unwrap_or(Level::Low)
    }

    /// Every recorded level change, in order.
    pub fn transitions(&self) -> Vec<Transition> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transitions
            .clone()
            .unwrap_or_default()
    }

    /// Shared journal, if one is attached.
    pub fn journal(&self) -> Option<Arc<Journal>> {
        self.journal.clone()
    }
}

enum EdgeSource {
    /// No script: pretend an edge arrives after this long
    Idle(Duration),
    /// Edges come from the test script
    Script(Receiver<Edge>),
    /// The script was handed to the callback dispatcher
    Dispatching,
}

struct Dispatcher {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Simulated sync lines.
pub struct SimulatedSyncIo {
    clock: Arc<dyn Clock>,
    journal: Option<Arc<Journal>>,
    lines: Arc<Mutex<LineState>>,
    outputs: Vec<PinId>,
    input: Option<PinId>,
    source: EdgeSource,
    callbacks: CallbackTable,
    debounce: Duration,
    dispatcher: Option<Dispatcher>,
    torn_down: bool,
}

impl SimulatedSyncIo {
    /// Unscripted backend: every `wait_for_edge` returns after
    /// `idle_edge_interval` on `clock`, and callbacks never fire.
    pub fn new(clock: Arc<dyn Clock>, idle_edge_interval: Duration) -> Self {
        Self::with_source(clock, EdgeSource::Idle(idle_edge_interval))
    }

    /// Scripted backend: edges are delivered through the returned script.
    pub fn scripted(clock: Arc<dyn Clock>) -> (Self, EdgeScript) {
        let (tx, rx) = channel::unbounded();
        (Self::with_source(clock, EdgeSource::Script(rx)), EdgeScript { tx })
    }

    fn with_source(clock: Arc<dyn Clock>, source: EdgeSource) -> Self {
        Self {
            clock,
            journal: None,
            lines: Arc::new(Mutex::new(LineState::default())),
            outputs: Vec::new(),
            input: None,
            source,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            debounce: Duration::ZERO,
            dispatcher: None,
            torn_down: false,
        }
    }

    /// Journal every call into `journal` and keep the full transition
    /// history for [`LineMonitor::level_at`].
    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transitions
            .get_or_insert_with(Vec::new);
        self.journal = Some(journal);
        self
    }

    /// Drop callback edges that arrive within `window` of the last one.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Inspection handle.
    pub fn monitor(&self) -> LineMonitor {
        LineMonitor {
            lines: Arc::clone(&self.lines),
            journal: self.journal.clone(),
        }
    }

    fn record(&self, event: SimEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }

    fn apply_level(&self, pin: PinId, level: Level) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(self.clock.now(), pin, level);
    }

    fn require_input(&self, pin: PinId) -> Result<(), SyncError> {
        match self.input {
            Some(input) if input == pin => Ok(()),
            _ => Err(SyncError::PinNotConfigured(pin)),
        }
    }

    fn spawn_dispatcher(&mut self, pin: PinId, script: Receiver<Edge>) {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let callbacks = Arc::clone(&self.callbacks);
        let lines = Arc::clone(&self.lines);
        let journal = self.journal.clone();
        let clock = Arc::clone(&self.clock);
        let mut debounce = Debounce::new(self.debounce);

        let handle = std::thread::spawn(move || loop {
            let next = crossbeam::select! {
                recv(script) -> msg => msg.ok(),
                recv(stop_rx) -> _ => None,
            };
            let Some(edge) = next else { break };

            let at = clock.now();
            lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(at, pin, level_after(edge));

            let at_ns = u64::try_from(at.as_nanos()).unwrap_or(u64::MAX);
            if !debounce.accept(at_ns) {
                tracing::debug!("[simulated] Ignoring {} edge on pin {} (bounce)", edge, pin);
                continue;
            }

            let mut table = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(callback) = table.get_mut(&edge) {
                tracing::debug!("[simulated] {} edge on pin {}", edge, pin);
                if let Some(journal) = &journal {
                    journal.record(SimEvent::EdgeFired { pin, edge });
                }
                callback();
            }
        });

        self.dispatcher = Some(Dispatcher { stop_tx, handle });
    }
}

impl SyncIo for SimulatedSyncIo {
    fn configure_outputs(&mut self, pins: &[PinId]) -> Result<(), SyncError> {
        tracing::info!("[simulated] Configuring output pins {:?}", pins);
        for &pin in pins {
            if !self.outputs.contains(&pin) {
                self.outputs.push(pin);
            }
            self.apply_level(pin, Level::Low);
        }
        Ok(())
    }

    fn configure_input(&mut self, pin: PinId, pull: Pull) -> Result<(), SyncError> {
        tracing::info!("[simulated] Configuring input pin {} (pull {:?})", pin, pull);
        self.input = Some(pin);
        Ok(())
    }

    fn set(&mut self, pin: PinId, level: Level) -> Result<(), SyncError> {
        if !self.outputs.contains(&pin) {
            return Err(SyncError::PinNotConfigured(pin));
        }
        tracing::debug!("[simulated] Pin {} -> {}", pin, level);
        self.apply_level(pin, level);
        self.record(SimEvent::Line { pin, level });
        Ok(())
    }

    fn wait_for_edge(&mut self, pin: PinId, edge: Edge) -> Result<(), SyncError> {
        self.require_input(pin)?;
        self.record(SimEvent::EdgeWait { pin, edge });

        match &self.source {
            EdgeSource::Idle(interval) => {
                tracing::info!(
                    "[simulated] Waiting {:?} for a {} edge on pin {}",
                    interval,
                    edge,
                    pin
                );
                self.clock.sleep(*interval);
                self.apply_level(pin, level_after(edge));
                Ok(())
            }
            EdgeSource::Script(rx) => loop {
                let seen = rx.recv().map_err(|_| SyncError::EdgeSourceClosed)?;
                let at = self.clock.now();
                self.lines
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(at, pin, level_after(seen));
                if seen == edge {
                    return Ok(());
                }
            },
            EdgeSource::Dispatching => {
                tracing::warn!("Blocking edge wait while callbacks own pin {}", pin);
                Err(SyncError::EdgeSourceClosed)
            }
        }
    }

    fn on_edge(
        &mut self,
        pin: PinId,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<(), SyncError> {
        self.require_input(pin)?;
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(edge, callback);
        self.record(SimEvent::EdgeRegistered { pin, edge });

        match std::mem::replace(&mut self.source, EdgeSource::Dispatching) {
            EdgeSource::Script(rx) => self.spawn_dispatcher(pin, rx),
            EdgeSource::Idle(interval) => {
                tracing::info!(
                    "[simulated] Registered {} callback on pin {}; no edges will be delivered",
                    edge,
                    pin
                );
                self.source = EdgeSource::Idle(interval);
            }
            EdgeSource::Dispatching => {}
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), SyncError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        tracing::info!("[simulated] Tearing down sync lines");
        for pin in self.outputs.clone() {
            self.apply_level(pin, Level::Low);
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.stop_tx.send(());
            let _ = dispatcher.handle.join();
        }
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.record(SimEvent::Teardown);
        Ok(())
    }
}

impl Drop for SimulatedSyncIo {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}
