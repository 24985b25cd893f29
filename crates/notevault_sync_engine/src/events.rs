//! Sync event feed.
//!
//! The coordinator reports outcomes through events rather than callbacks,
//! so hosts can react on their own threads:
//!
//! ```rust,ignore
//! let events = coordinator.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         if event == SyncEvent::SessionInvalid {
//!             // prompt for sign-in
//!         }
//!     }
//! });
//! ```

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Something the coordinator wants the host to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync operation finished and all rounds succeeded.
    SyncCompleted {
        /// Items retrieved across all rounds.
        retrieved: usize,
        /// Items the server acknowledged.
        saved: usize,
        /// Conflicts handled.
        conflicts: usize,
    },
    /// Dirty items were written to local storage without contacting the server.
    SyncedOffline {
        /// Items saved.
        saved: usize,
    },
    /// The server rejected the session.
    SessionInvalid,
    /// The server could not be reached.
    ConnectivityFailure,
    /// Any other sync failure.
    SyncError {
        /// Error description.
        message: String,
    },
    /// Enough items changed that views should reload wholesale.
    MajorDataChange,
    /// Stored items have been decrypted and mapped.
    LocalDataLoaded {
        /// Items loaded.
        count: usize,
    },
    /// Local and server state were found to diverge.
    EnterOutOfSync,
    /// Divergence has been resolved.
    ExitOutOfSync,
}

/// Distributes sync events to subscribers.
///
/// Disconnected subscribers are dropped on the next emit.
#[derive(Debug)]
pub struct SyncEventFeed {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
    history: RwLock<Vec<SyncEvent>>,
    max_history: usize,
}

impl SyncEventFeed {
    /// Creates a feed keeping the last 256 events.
    pub fn new() -> Self {
        Self::with_max_history(256)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to every subscriber.
    pub fn emit(&self, event: SyncEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Recent events, oldest first.
    pub fn history(&self) -> Vec<SyncEvent> {
        self.history.read().clone()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for SyncEventFeed {
    fn default() -> Self {
        Self::new()
    }
}
