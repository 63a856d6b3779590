//! Simulation journal
//!
//! Ordered, timestamped record of everything the simulated player and the
//! simulated sync lines were asked to do. Both simulators can share one
//! journal so tests can assert cross-component ordering, e.g. that the sync
//! lines go high before the restart seek is issued.

use crate::clock::Clock;
use crate::playback::PlayerCall;
use crate::sync_io::{Edge, Level, PinId};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A single simulated side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Call made on the simulated media engine
    Player(PlayerCall),
    /// Output line driven to a level
    Line { pin: PinId, level: Level },
    /// Blocking wait for an edge started
    EdgeWait { pin: PinId, edge: Edge },
    /// Edge callback registered
    EdgeRegistered { pin: PinId, edge: Edge },
    /// Edge callback invoked
    EdgeFired { pin: PinId, edge: Edge },
    /// Sync lines torn down
    Teardown,
}

/// Journal entry with the clock time it was recorded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Clock time of the event
    pub at: Duration,
    /// What happened
    pub event: SimEvent,
}

/// Shared, append-only event log.
pub struct Journal {
    clock: Arc<dyn Clock>,
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    /// Create an empty journal stamped by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Append an event at the current clock time.
    pub fn record(&self, event: SimEvent) {
        let at = self.clock.now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(JournalEntry { at, event });
    }

    /// Snapshot of all entries in recording order.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the player calls, in order.
    pub fn player_calls(&self) -> Vec<PlayerCall> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e.event {
                SimEvent::Player(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Number of events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SimEvent) -> bool) -> usize {
        self.entries().iter().filter(|e| predicate(&e.event)).count()
    }

    /// Index of the first event matching `predicate`.
    pub fn position_of(&self, predicate: impl Fn(&SimEvent) -> bool) -> Option<usize> {
        self.entries().iter().position(|e| predicate(&e.event))
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("entries", &self.entries().len())
            .finish()
    }
}
