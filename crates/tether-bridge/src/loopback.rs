// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process foreign runtime.
//
// Stands in for a real foreign VM on desktop and CI builds. Foreign objects
// are plain Rust values living in their own reference-counted heap; calls
// from the host are queued on a tokio channel and executed on the blocking
// pool, so they run on threads the host never created. Foreign code reaches
// back into the host through a `ForeignEnv`.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use tether_core::error::Result;
use tether_core::{BridgeConfig, ForeignError, SelectorRef, WireFault, WireRef, WireResult, WireValue};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::PendingCall;
use crate::handle_table::{Handle, HandleTable, lock};
use crate::runtime::{ForeignRuntime, HostPort};

/// An object living on the foreign side.
pub trait ForeignObject: Send + Sync + 'static {
    fn invoke(
        &self,
        env: &ForeignEnv,
        method: &str,
        args: Vec<WireValue>,
    ) -> std::result::Result<WireValue, ForeignError>;
}

impl<F> ForeignObject for F
where
    F: Fn(&ForeignEnv, &str, Vec<WireValue>) -> std::result::Result<WireValue, ForeignError>
        + Send
        + Sync
        + 'static,
{
    fn invoke(
        &self,
        env: &ForeignEnv,
        method: &str,
        args: Vec<WireValue>,
    ) -> std::result::Result<WireValue, ForeignError> {
        self(env, method, args)
    }
}

#[derive(Clone)]
struct HeapEntry {
    object: Arc<dyn ForeignObject>,
    refs: Arc<AtomicU64>,
}

struct Shared {
    heap: HandleTable<HeapEntry>,
    /// Object address -> handle, so one object keeps one handle. Also
    /// serializes reference-count changes.
    exports: Mutex<HashMap<usize, Handle>>,
    host: OnceLock<HostPort>,
    executed: AtomicU64,
    released: AtomicU64,
}

fn addr(object: &Arc<dyn ForeignObject>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl Shared {
    fn export(&self, object: Arc<dyn ForeignObject>) -> Result<WireRef> {
        let key = addr(&object);
        let mut exports = lock(&self.exports);
        if let Some(&handle) = exports.get(&key) {
            if self.heap.resolve(handle).is_ok() {
                return Ok(handle.to_wire());
            }
        }
        let handle = self.heap.register(HeapEntry {
            object,
            refs: Arc::new(AtomicU64::new(0)),
        })?;
        exports.insert(key, handle);
        Ok(handle.to_wire())
    }

    /// Count one more reference held by the host.
    fn retain(&self, wire: WireRef) {
        let Some(handle) = Handle::from_wire(wire) else {
            return;
        };
        let _exports = lock(&self.exports);
        if let Ok(entry) = self.heap.resolve(handle) {
            entry.refs.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn retain_delivered(&self, values: &[WireValue]) {
        for v in values {
            if let WireValue::Foreign(r) = v {
                self.retain(*r);
            }
        }
    }

    fn release(&self, wire: WireRef) {
        let Some(handle) = Handle::from_wire(wire) else {
            return;
        };
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut exports = lock(&self.exports);
        let Ok(entry) = self.heap.resolve(handle) else {
            warn!(handle = %wire, "release of unknown foreign object");
            return;
        };
        let before = entry.refs.load(Ordering::Acquire);
        if before == 0 {
            warn!(handle = %wire, "foreign object released more often than delivered");
            return;
        }
        entry.refs.store(before - 1, Ordering::Release);
        if before == 1 {
            self.heap.release(handle);
            let key = addr(&entry.object);
            if exports.get(&key) == Some(&handle) {
                exports.remove(&key);
            }
        }
    }

    fn execute(self: &Arc<Self>, mut call: PendingCall) {
        let result = self.run(&mut call);
        self.executed.fetch_add(1, Ordering::Relaxed);
        let late = match &result {
            Ok(WireValue::Foreign(r)) if !r.is_null() => Some(*r),
            _ => None,
        };
        if !call.complete(result) {
            // Nobody is waiting any more; the reference delivered with the
            // result goes back.
            if let Some(r) = late {
                debug!(handle = %r, "late foreign result released");
                self.release(r);
            }
        }
    }

    fn run(self: &Arc<Self>, call: &mut PendingCall) -> WireResult {
        let target = call.target;
        let entry = Handle::from_wire(target)
            .and_then(|h| self.heap.resolve(h).ok())
            .ok_or(WireFault::StaleHandle(target))?;
        let port = self.host.get().ok_or(WireFault::ShutDown)?;
        let catalogue = port.catalogue().ok_or(WireFault::ShutDown)?;
        let (cap, method) = catalogue
            .method(call.selector)
            .ok_or_else(|| WireFault::NoSuchMethod {
                capability: String::new(),
                selector: call.selector.to_string(),
            })?;

        let env = ForeignEnv {
            shared: Arc::clone(self),
        };
        let args = call.take_args();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            entry.object.invoke(&env, &method.name, args)
        }));
        match outcome {
            Ok(Ok(value)) => {
                self.retain_delivered(std::slice::from_ref(&value));
                Ok(value)
            }
            Ok(Err(e)) => Err(WireFault::Domain(e)),
            Err(_) => {
                warn!(capability = %cap.name, method = %method.name, "foreign object panicked");
                Err(WireFault::Internal(format!(
                    "foreign {}.{} panicked",
                    cap.name, method.name
                )))
            }
        }
    }
}

/// What foreign code sees of its runtime.
#[derive(Clone)]
pub struct ForeignEnv {
    shared: Arc<Shared>,
}

impl ForeignEnv {
    /// Call a host object. Foreign object references among `args` count as
    /// handed to the host.
    pub fn call_host(
        &self,
        target: WireRef,
        selector: impl Into<SelectorRef>,
        args: Vec<WireValue>,
    ) -> WireResult {
        let port = self.shared.host.get().ok_or(WireFault::ShutDown)?;
        if !port.is_live() {
            return Err(WireFault::ShutDown);
        }
        self.shared.retain_delivered(&args);
        port.invoke_host(target, selector, args)
    }

    /// Give up this side's reference to host object `target`.
    pub fn release_host(&self, target: WireRef) {
        if let Some(port) = self.shared.host.get() {
            port.release(target);
        }
    }

    /// Put a foreign object in the heap. The same object always gets the
    /// same reference.
    pub fn export(&self, object: Arc<dyn ForeignObject>) -> Result<WireRef> {
        self.shared.export(object)
    }

    /// Look up one of this side's own objects.
    pub fn object(&self, wire: WireRef) -> Option<Arc<dyn ForeignObject>> {
        let handle = Handle::from_wire(wire)?;
        self.shared.heap.resolve(handle).ok().map(|e| e.object)
    }

    /// Start a foreign thread. The host has never seen it before its first
    /// call in.
    pub fn spawn<F>(&self, f: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(ForeignEnv) + Send + 'static,
    {
        let env = self.clone();
        Ok(std::thread::Builder::new()
            .name("tether-foreign".into())
            .spawn(move || f(env))?)
    }
}

/// Foreign runtime backed by an in-process heap and a tokio executor.
pub struct LoopbackRuntime {
    shared: Arc<Shared>,
    tx: Mutex<Option<mpsc::UnboundedSender<PendingCall>>>,
    rt: Mutex<Option<tokio::runtime::Runtime>>,
}

impl LoopbackRuntime {
    #[instrument(skip_all, fields(workers = config.loopback_worker_threads))]
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            heap: HandleTable::new(config.handle_shards, config.max_handles),
            exports: Mutex::new(HashMap::new()),
            host: OnceLock::new(),
            executed: AtomicU64::new(0),
            released: AtomicU64::new(0),
        });

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.loopback_worker_threads)
            .thread_name("tether-loopback")
            .enable_all()
            .build()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<PendingCall>();
        let worker = Arc::clone(&shared);
        rt.spawn(async move {
            while let Some(call) = rx.recv().await {
                let shared = Arc::clone(&worker);
                tokio::task::spawn_blocking(move || shared.execute(call));
            }
            debug!("loopback dispatcher stopped");
        });

        info!("loopback runtime started");
        Ok(Self {
            shared,
            tx: Mutex::new(Some(tx)),
            rt: Mutex::new(Some(rt)),
        })
    }

    pub fn env(&self) -> ForeignEnv {
        ForeignEnv {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Export `object` and count one reference as handed to the host, as if
    /// it had been passed in a call.
    pub fn deliver(&self, object: Arc<dyn ForeignObject>) -> Result<WireRef> {
        let wire = self.shared.export(object)?;
        self.shared.retain(wire);
        Ok(wire)
    }

    /// Objects currently in the foreign heap.
    pub fn live_objects(&self) -> usize {
        self.shared.heap.len()
    }

    /// Host references held on `wire`, or `None` if it is not live.
    pub fn ref_count(&self, wire: WireRef) -> Option<u64> {
        let handle = Handle::from_wire(wire)?;
        self.shared
            .heap
            .resolve(handle)
            .ok()
            .map(|e| e.refs.load(Ordering::Acquire))
    }

    /// Release notifications received from the host.
    pub fn released(&self) -> u64 {
        self.shared.released.load(Ordering::Relaxed)
    }

    /// Host calls executed.
    pub fn executed(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }
}

impl ForeignRuntime for LoopbackRuntime {
    fn name(&self) -> &str {
        "loopback"
    }

    fn bind(&self, host: HostPort) {
        if self.shared.host.set(host).is_err() {
            warn!("loopback runtime is already bound to a bridge");
        }
    }

    fn send(&self, call: PendingCall) {
        let tx = lock(&self.tx).clone();
        match tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(call)) = tx.send(call) {
                    call.complete(Err(WireFault::ShutDown));
                }
            }
            None => {
                call.complete(Err(WireFault::ShutDown));
            }
        }
    }

    fn release(&self, handle: WireRef) {
        self.shared.release(handle);
    }

    fn shutdown(&self) {
        lock(&self.tx).take();
        if let Some(rt) = lock(&self.rt).take() {
            rt.shutdown_background();
            info!(executed = self.executed(), "loopback runtime stopped");
        }
    }
}

impl Drop for LoopbackRuntime {
    fn drop(&mut self) {
        if let Some(rt) = lock(&self.rt).take() {
            rt.shutdown_background();
        }
    }
}
