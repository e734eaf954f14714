//! The typed sync lifecycle event bus (spec.md §4.7): `sync:start`,
//! `sync:progress`, `sync:complete`, `sync:error`, delivered synchronously
//! to subscribers in subscription order. A panicking subscriber is caught
//! so it cannot take down the orchestrator loop that's emitting the event.

use crate::queue::QueueStats;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Start,
    Progress { pending: u64, done: u64, failed: u64 },
    Complete,
    Error { message: String },
}

impl From<QueueStats> for SyncEvent {
    fn from(stats: QueueStats) -> Self {
        SyncEvent::Progress { pending: stats.pending, done: stats.done, failed: stats.failed }
    }
}

type Listener = dyn Fn(&SyncEvent) + Send + Sync;

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<Listener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Delivers `event` to every subscriber in subscription order. A
    /// subscriber that panics is logged and skipped rather than aborting
    /// delivery to the rest.
    pub fn emit(&self, event: SyncEvent) {
        for listener in self.listeners.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!("sync event subscriber panicked");
            }
        }
    }
}
