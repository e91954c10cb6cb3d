// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lifecycle monitor.
//
// Watches host objects that are exposed to the foreign side. Once the handle
// table holds the last strong reference to an object, host code can no longer
// reach it and the object is "finalized" from the host's point of view: a
// collection signal is queued for it, exactly once. Draining a signal is what
// finally releases the handle.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tether_core::OverflowPolicy;
use tracing::{debug, warn};

use crate::handle_table::{Handle, lock};
use crate::value::HostObject;

/// Notice that the object behind `handle` is unreachable from host code.
#[derive(Debug, Clone)]
pub struct CollectionSignal {
    pub handle: Handle,
    pub type_name: &'static str,
    pub emitted_at: DateTime<Utc>,
}

struct Watch {
    object: Weak<dyn HostObject>,
    type_name: &'static str,
    signalled: bool,
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub watched: usize,
    pub queued: usize,
    pub emitted: u64,
    pub dropped: u64,
}

pub struct LifecycleMonitor {
    watches: Mutex<HashMap<Handle, Watch>>,
    queue: Mutex<VecDeque<CollectionSignal>>,
    ready: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    poll: Duration,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl LifecycleMonitor {
    pub fn new(capacity: usize, policy: OverflowPolicy, poll: Duration) -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            policy,
            poll,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Start watching an object registered under `handle`.
    pub fn watch(&self, handle: Handle, object: &Arc<dyn HostObject>) {
        lock(&self.watches).insert(
            handle,
            Watch {
                object: Arc::downgrade(object),
                type_name: object.type_name(),
                signalled: false,
            },
        );
    }

    /// Stop watching; called when the handle is released.
    pub fn forget(&self, handle: Handle) {
        lock(&self.watches).remove(&handle);
    }

    /// Clear the signalled mark on a handle whose object turned out to be
    /// reachable again, so a later sweep can report it. `false` if the
    /// handle is not watched.
    pub fn rearm(&self, handle: Handle) -> bool {
        match lock(&self.watches).get_mut(&handle) {
            Some(w) => {
                w.signalled = false;
                true
            }
            None => false,
        }
    }

    /// Queue a signal for every watched object whose only remaining strong
    /// reference is the handle table's. Returns how many were queued.
    pub fn sweep(&self) -> usize {
        let mut watches = lock(&self.watches);
        let mut candidates: Vec<(Handle, &'static str)> = watches
            .iter()
            .filter(|(_, w)| !w.signalled && w.object.strong_count() == 1)
            .map(|(h, w)| (*h, w.type_name))
            .collect();
        if candidates.is_empty() {
            return 0;
        }
        candidates.sort_unstable_by_key(|(h, _)| *h);

        let mut queue = lock(&self.queue);
        let mut queued = 0;
        for (handle, type_name) in candidates {
            if queue.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::Backpressure => {
                        debug!(capacity = self.capacity, "signal queue full, deferring");
                        break;
                    }
                    OverflowPolicy::DropOldest => {
                        if let Some(old) = queue.pop_front() {
                            // Unsignal it so a later sweep reports it again.
                            if let Some(w) = watches.get_mut(&old.handle) {
                                w.signalled = false;
                            }
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(handle = %old.handle, "signal queue full, dropped oldest signal");
                        }
                    }
                }
            }
            if let Some(w) = watches.get_mut(&handle) {
                w.signalled = true;
            }
            queue.push_back(CollectionSignal {
                handle,
                type_name,
                emitted_at: Utc::now(),
            });
            queued += 1;
        }
        drop(queue);
        drop(watches);

        if queued > 0 {
            self.emitted.fetch_add(queued as u64, Ordering::Relaxed);
            self.ready.notify_all();
        }
        queued
    }

    /// Take up to `max` signals, waiting at most `timeout` for the first
    /// ones to appear. Never blocks indefinitely.
    pub fn drain(&self, max: usize, timeout: Duration) -> Vec<CollectionSignal> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        if max == 0 {
            return out;
        }

        loop {
            self.sweep();
            let mut queue = lock(&self.queue);
            while out.len() < max {
                match queue.pop_front() {
                    Some(signal) => out.push(signal),
                    None => break,
                }
            }
            if out.len() >= max {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.poll.min(deadline - now);
            let (_queue, _) = self
                .ready
                .wait_timeout(queue, wait)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        out
    }

    /// Drop all watches and queued signals.
    pub fn clear(&self) {
        lock(&self.watches).clear();
        lock(&self.queue).clear();
        self.ready.notify_all();
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            watched: lock(&self.watches).len(),
            queued: lock(&self.queue).len(),
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
