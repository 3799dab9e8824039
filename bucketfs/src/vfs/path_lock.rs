//! Per-path mutual exclusion for operations that materialize or publish
//! content (open download, flush upload, remove, rename).
//!
//! Gates are created on first use and dropped again once no guard holds and
//! no task awaits them, so the table only ever contains contended or busy
//! paths.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

struct Gate {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

#[derive(Default)]
pub struct PathLocks {
    gates: Mutex<HashMap<String, Gate>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `path` is free and hold it until the guard drops.
    pub async fn lock(&self, path: &str) -> PathGuard<'_> {
        let (ticket, mutex) = self.enter(path);
        // Cancelled while waiting: the ticket drops and releases its claim.
        let held = mutex.lock_owned().await;
        trace!(path, "path lock acquired");
        PathGuard {
            _held: held,
            ticket,
        }
    }

    fn enter(&self, path: &str) -> (Ticket<'_>, Arc<AsyncMutex<()>>) {
        let mut gates = self.gates.lock();
        let gate = gates.entry(path.to_string()).or_insert_with(|| Gate {
            mutex: Arc::new(AsyncMutex::new(())),
            users: 0,
        });
        gate.users += 1;
        let mutex = gate.mutex.clone();
        (
            Ticket {
                table: self,
                path: path.to_string(),
            },
            mutex,
        )
    }

    /// Lock several paths in lexical order; duplicates are locked once.
    pub async fn lock_many(&self, paths: &[&str]) -> Vec<PathGuard<'_>> {
        let mut sorted: Vec<&str> = paths.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for p in sorted {
            guards.push(self.lock(p).await);
        }
        guards
    }

    /// Number of live gates.
    pub fn len(&self) -> usize {
        self.gates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One claim on a gate; the gate leaves the table with its last claim.
struct Ticket<'a> {
    table: &'a PathLocks,
    path: String,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut gates = self.table.gates.lock();
        let idle = match gates.get_mut(&self.path) {
            Some(gate) => {
                gate.users = gate.users.saturating_sub(1);
                gate.users == 0
            }
            None => false,
        };
        if idle {
            gates.remove(&self.path);
        }
    }
}

pub struct PathGuard<'a> {
    // Field order matters: the mutex is released before the claim.
    _held: OwnedMutexGuard<()>,
    ticket: Ticket<'a>,
}

impl PathGuard<'_> {
    pub fn path(&self) -> &str {
        &self.ticket.path
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        trace!(path = %self.ticket.path, "path lock released");
    }
}
