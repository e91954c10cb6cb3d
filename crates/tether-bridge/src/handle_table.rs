// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Generational handle table.
//
// Slots are striped across independently locked shards so `register`,
// `resolve` and `release` from different threads rarely contend. A handle is
// `(index, generation)`; releasing a slot bumps its generation, which
// invalidates every outstanding copy of the old handle. A slot whose
// generation counter is exhausted is retired instead of being reused.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tether_core::WireRef;
use tether_core::error::{Result, TetherError};

/// Opaque `(index, generation)` key issued by a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    pub fn to_wire(self) -> WireRef {
        WireRef::from_raw((u64::from(self.index) << 32) | u64::from(self.generation))
    }

    /// Read a handle back from its wire form. `None` for the null sentinel.
    ///
    /// This only unpacks the key; whether it still names a live object is
    /// decided by [`HandleTable::resolve`].
    pub fn from_wire(wire: WireRef) -> Option<Self> {
        if wire.is_null() {
            return None;
        }
        let raw = wire.raw();
        Some(Self::new((raw >> 32) as u32, raw as u32))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Shard<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

/// Lock a mutex, recovering the data if a previous holder panicked. Every
/// critical section in this module leaves the slot state consistent before
/// it can panic, so the data is still sound.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe generational table mapping handles to values.
pub struct HandleTable<T> {
    shards: Box<[Mutex<Shard<T>>]>,
    next_shard: AtomicUsize,
    capacity: u32,
    live: AtomicU32,
    resolves: AtomicU64,
}

impl<T: Clone> HandleTable<T> {
    /// Create a table with `shards` lock stripes holding at most `capacity`
    /// live values. `capacity` must stay below `u32::MAX` so no index can
    /// collide with the null sentinel.
    pub fn new(shards: usize, capacity: u32) -> Self {
        let shards = shards.max(1);
        let capacity = capacity.min(u32::MAX - 1);
        Self {
            shards: (0..shards)
                .map(|_| {
                    Mutex::new(Shard {
                        slots: Vec::new(),
                        free: Vec::new(),
                    })
                })
                .collect(),
            next_shard: AtomicUsize::new(0),
            capacity,
            live: AtomicU32::new(0),
            resolves: AtomicU64::new(0),
        }
    }

    /// Store `value` and return a fresh handle for it.
    ///
    /// Fails with `ResourceExhausted` when the table is full; the caller may
    /// retry once handles have been released.
    pub fn register(&self, value: T) -> Result<Handle> {
        let capacity = self.capacity;
        if self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_err()
        {
            return Err(TetherError::ResourceExhausted { capacity });
        }

        let n = self.shards.len();
        let start = self.next_shard.fetch_add(1, Ordering::Relaxed) % n;
        for step in 0..n {
            let shard_no = (start + step) % n;
            let mut shard = lock(&self.shards[shard_no]);

            let local = if let Some(local) = shard.free.pop() {
                local
            } else {
                let local = shard.slots.len();
                let global = local * n + shard_no;
                if global >= capacity as usize {
                    continue;
                }
                shard.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                local as u32
            };

            let slot = &mut shard.slots[local as usize];
            slot.value = Some(value);
            let index = local as usize * n + shard_no;
            return Ok(Handle::new(index as u32, slot.generation));
        }

        // Every slot left is retired.
        self.live.fetch_sub(1, Ordering::AcqRel);
        Err(TetherError::ResourceExhausted { capacity })
    }

    /// Look up the value behind `handle`. O(1) under one shard lock.
    pub fn resolve(&self, handle: Handle) -> Result<T> {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        let (shard_no, local) = self.locate(handle);
        let shard = lock(&self.shards[shard_no]);
        match shard.slots.get(local) {
            Some(Slot {
                generation,
                value: Some(value),
            }) if *generation == handle.generation => Ok(value.clone()),
            _ => Err(TetherError::StaleHandle(handle.to_wire())),
        }
    }

    /// Drop the slot's value and invalidate every copy of `handle`.
    ///
    /// A stale handle is a no-op returning `None`, so duplicate release
    /// signals during shutdown races are harmless.
    pub fn release(&self, handle: Handle) -> Option<T> {
        self.release_if(handle, |_| true)
    }

    /// Like `release`, but only when `approve` accepts the current value.
    /// The check runs under the shard lock, so no `resolve` of `handle` can
    /// slip in between the check and the release.
    pub fn release_if(&self, handle: Handle, approve: impl FnOnce(&T) -> bool) -> Option<T> {
        let (shard_no, local) = self.locate(handle);
        let mut shard = lock(&self.shards[shard_no]);
        let slot = shard.slots.get_mut(local)?;
        if slot.generation != handle.generation {
            return None;
        }
        if !approve(slot.value.as_ref()?) {
            return None;
        }

        let value = slot.value.take();
        match slot.generation.checked_add(1) {
            Some(next) => {
                slot.generation = next;
                shard.free.push(local as u32);
            }
            None => {
                tracing::debug!(%handle, "slot generation exhausted, retiring slot");
            }
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
        value
    }

    /// Remove every live value, invalidating all handles.
    pub fn drain(&self) -> Vec<(Handle, T)> {
        let n = self.shards.len();
        let mut out = Vec::new();
        for (shard_no, shard) in self.shards.iter().enumerate() {
            let mut shard = lock(shard);
            let mut freed = Vec::new();
            for (local, slot) in shard.slots.iter_mut().enumerate() {
                if let Some(value) = slot.value.take() {
                    let handle = Handle::new((local * n + shard_no) as u32, slot.generation);
                    out.push((handle, value));
                    if let Some(next) = slot.generation.checked_add(1) {
                        slot.generation = next;
                        freed.push(local as u32);
                    }
                }
            }
            shard.free.extend(freed);
        }
        self.live.fetch_sub(out.len() as u32, Ordering::AcqRel);
        out
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Total `resolve` calls served, stale or not.
    pub fn resolve_count(&self) -> u64 {
        self.resolves.load(Ordering::Relaxed)
    }

    fn locate(&self, handle: Handle) -> (usize, usize) {
        let n = self.shards.len();
        let index = handle.index as usize;
        (index % n, index / n)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn register_then_resolve() {
        let table = HandleTable::new(4, 64);
        let h = table.register("a").expect("register");
        assert_eq!(table.resolve(h).expect("resolve"), "a");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn released_handle_goes_stale() {
        let table = HandleTable::new(1, 8);
        let h = table.register(1u32).expect("register");
        assert_eq!(table.release(h), Some(1));
        assert!(matches!(table.resolve(h), Err(TetherError::StaleHandle(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn conditional_release_keeps_value_when_refused() {
        let table = HandleTable::new(2, 8);
        let h = table.register(7u32).expect("register");

        assert_eq!(table.release_if(h, |v| *v == 8), None);
        assert_eq!(table.resolve(h).expect("still live"), 7);
        assert_eq!(table.len(), 1);

        assert_eq!(table.release_if(h, |v| *v == 7), Some(7));
        assert!(matches!(table.resolve(h), Err(TetherError::StaleHandle(_))));
        assert_eq!(table.release_if(h, |_| true), None);
    }

    #[test]
    fn reused_slot_gets_newer_generation() {
        let table = HandleTable::new(1, 8);
        let old = table.register("a").expect("register a");
        table.release(old);
        let new = table.register("b").expect("register b");

        assert_eq!(new.index(), old.index());
        assert!(new.generation() > old.generation());
        assert!(table.resolve(old).is_err());
        assert_eq!(table.resolve(new).expect("resolve b"), "b");
    }

    #[test]
    fn stale_release_does_not_touch_new_occupant() {
        let table = HandleTable::new(1, 8);
        let a = table.register("a").expect("register a");
        table.release(a);
        let b = table.register("b").expect("register b");

        assert_eq!(table.release(a), None);
        assert_eq!(table.resolve(b).expect("b still live"), "b");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn full_table_reports_exhaustion_and_recovers() {
        let table = HandleTable::new(3, 4);
        let handles: Vec<_> = (0..4)
            .map(|i| table.register(i).expect("register within capacity"))
            .collect();
        assert!(matches!(
            table.register(99),
            Err(TetherError::ResourceExhausted { capacity: 4 })
        ));

        table.release(handles[2]);
        let again = table.register(5).expect("register after release");
        assert_eq!(table.resolve(again).expect("resolve"), 5);
    }

    #[test]
    fn zero_handle_is_not_null() {
        let table = HandleTable::new(1, 8);
        let h = table.register(()).expect("register");
        assert_eq!(h.to_wire().raw(), 0);
        assert_eq!(Handle::from_wire(h.to_wire()), Some(h));
        assert_eq!(Handle::from_wire(WireRef::NULL), None);
    }

    #[test]
    fn exhausted_generation_retires_slot() {
        let table = HandleTable::new(1, 2);
        let h = table.register(1).expect("register");
        {
            let mut shard = lock(&table.shards[0]);
            shard.slots[0].generation = u32::MAX;
        }
        let h = Handle::new(h.index(), u32::MAX);
        assert_eq!(table.release(h), Some(1));

        // Slot 0 is retired, so the next value lands in slot 1.
        let next = table.register(2).expect("register");
        assert_eq!(next.index(), 1);
    }

    #[test]
    fn drain_invalidates_everything() {
        let table = HandleTable::new(2, 16);
        let hs: Vec<_> = (0..5).map(|i| table.register(i).expect("register")).collect();
        let drained = table.drain();
        assert_eq!(drained.len(), 5);
        assert!(table.is_empty());
        assert!(hs.iter().all(|h| table.resolve(*h).is_err()));
    }

    #[test]
    fn concurrent_register_release() {
        let table = Arc::new(HandleTable::new(4, 1 << 16));
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        let h = table.register((t, i)).expect("register");
                        assert_eq!(table.resolve(h).expect("resolve"), (t, i));
                        assert_eq!(table.release(h), Some((t, i)));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker");
        }
        assert!(table.is_empty());
    }
}
