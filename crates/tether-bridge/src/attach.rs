// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Thread attachment.
//
// Any thread may call into the host, including threads the host never
// created. The first call on such a thread attaches it (through the
// platform's `ThreadAttacher`) and records the attachment in thread-local
// storage; later calls on the same thread reuse it. The attachment is undone
// when the thread exits or when `detach_current_thread` is called.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tether_core::BridgeId;
use tether_core::error::Result;
use tracing::{debug, warn};

/// Platform hook run when a thread first enters the bridge and when it
/// leaves for good.
pub trait ThreadAttacher: Send + Sync {
    fn attach(&self) -> Result<()>;
    fn detach(&self);
}

/// Attacher for platforms where threads need no registration.
pub struct NoopAttacher;

impl ThreadAttacher for NoopAttacher {
    fn attach(&self) -> Result<()> {
        Ok(())
    }

    fn detach(&self) {}
}

struct ThreadAttachment {
    bridge: BridgeId,
    registry: Weak<AttachRegistry>,
    depth: usize,
}

impl Drop for ThreadAttachment {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.attacher.detach();
            registry.attached.fetch_sub(1, Ordering::AcqRel);
            debug!(bridge = %self.bridge, "thread detached");
        }
    }
}

thread_local! {
    static ATTACHMENTS: RefCell<Vec<ThreadAttachment>> = const { RefCell::new(Vec::new()) };
}

/// Per-bridge bookkeeping of attached threads.
pub struct AttachRegistry {
    bridge: BridgeId,
    attacher: Box<dyn ThreadAttacher>,
    attached: AtomicUsize,
    attaches_total: AtomicU64,
}

impl AttachRegistry {
    pub fn new(bridge: BridgeId, attacher: Box<dyn ThreadAttacher>) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            attacher,
            attached: AtomicUsize::new(0),
            attaches_total: AtomicU64::new(0),
        })
    }

    /// Make sure the calling thread is attached for the guard's lifetime.
    /// Nested entries on the same thread are cheap.
    pub fn enter(self: &Arc<Self>) -> Result<AttachGuard> {
        ATTACHMENTS.with(|cell| {
            let mut list = cell.borrow_mut();
            if let Some(existing) = list.iter_mut().find(|a| a.bridge == self.bridge) {
                existing.depth += 1;
                return Ok::<(), tether_core::TetherError>(());
            }

            self.attacher.attach()?;
            self.attached.fetch_add(1, Ordering::AcqRel);
            self.attaches_total.fetch_add(1, Ordering::Relaxed);
            debug!(bridge = %self.bridge, thread = ?std::thread::current().id(), "thread attached");
            list.push(ThreadAttachment {
                bridge: self.bridge,
                registry: Arc::downgrade(self),
                depth: 1,
            });
            Ok(())
        })?;

        Ok(AttachGuard {
            bridge: self.bridge,
            _thread_bound: PhantomData,
        })
    }

    /// Detach the calling thread now instead of at thread exit. Refused
    /// while a call on this thread is still inside the bridge.
    pub fn detach_current(&self) -> bool {
        ATTACHMENTS.with(|cell| {
            let mut list = cell.borrow_mut();
            let Some(pos) = list.iter().position(|a| a.bridge == self.bridge) else {
                return false;
            };
            if list[pos].depth > 0 {
                warn!(bridge = %self.bridge, "detach refused: call in progress on this thread");
                return false;
            }
            list.swap_remove(pos);
            true
        })
    }

    pub fn is_current_attached(&self) -> bool {
        ATTACHMENTS
            .try_with(|cell| cell.borrow().iter().any(|a| a.bridge == self.bridge))
            .unwrap_or(false)
    }

    /// Threads attached right now.
    pub fn attached_threads(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    /// Attach operations performed since the bridge started. Stays flat
    /// while the same threads keep calling in.
    pub fn attaches_total(&self) -> u64 {
        self.attaches_total.load(Ordering::Relaxed)
    }
}

/// Marks the calling thread as inside the bridge. Not `Send`.
pub struct AttachGuard {
    bridge: BridgeId,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        let bridge = self.bridge;
        let _ = ATTACHMENTS.try_with(|cell| {
            if let Ok(mut list) = cell.try_borrow_mut() {
                if let Some(a) = list.iter_mut().find(|a| a.bridge == bridge) {
                    a.depth = a.depth.saturating_sub(1);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingAttacher {
        attaches: Arc<AtomicUsize>,
        detaches: Arc<AtomicUsize>,
    }

    impl ThreadAttacher for CountingAttacher {
        fn attach(&self) -> Result<()> {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn detach(&self) {
            self.detaches.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<AttachRegistry>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let attaches = Arc::new(AtomicUsize::new(0));
        let detaches = Arc::new(AtomicUsize::new(0));
        let registry = AttachRegistry::new(
            BridgeId::new(),
            Box::new(CountingAttacher {
                attaches: Arc::clone(&attaches),
                detaches: Arc::clone(&detaches),
            }),
        );
        (registry, attaches, detaches)
    }

    #[test]
    fn repeated_entries_attach_once() {
        let (registry, attaches, _) = counting();
        let reg = Arc::clone(&registry);
        std::thread::spawn(move || {
            for _ in 0..100 {
                let _g = reg.enter().expect("enter");
                let _nested = reg.enter().expect("nested enter");
            }
            assert!(reg.is_current_attached());
        })
        .join()
        .expect("thread");
        assert_eq!(attaches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.attaches_total(), 1);
    }

    #[test]
    fn thread_exit_detaches() {
        let (registry, _, detaches) = counting();
        let reg = Arc::clone(&registry);
        std::thread::spawn(move || {
            let _g = reg.enter().expect("enter");
            assert_eq!(reg.attached_threads(), 1);
        })
        .join()
        .expect("thread");
        assert_eq!(detaches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.attached_threads(), 0);
    }

    #[test]
    fn explicit_detach_waits_for_outstanding_guard() {
        let (registry, _, detaches) = counting();
        let reg = Arc::clone(&registry);
        std::thread::spawn(move || {
            let guard = reg.enter().expect("enter");
            assert!(!reg.detach_current());
            drop(guard);
            assert!(reg.detach_current());
            assert!(!reg.is_current_attached());
        })
        .join()
        .expect("thread");
        assert_eq!(detaches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_attach_is_reported() {
        struct Refuse;
        impl ThreadAttacher for Refuse {
            fn attach(&self) -> Result<()> {
                Err(tether_core::TetherError::AttachFailed("no vm".into()))
            }
            fn detach(&self) {}
        }
        let registry = AttachRegistry::new(BridgeId::new(), Box::new(Refuse));
        assert!(registry.enter().is_err());
        assert_eq!(registry.attached_threads(), 0);
    }
}
