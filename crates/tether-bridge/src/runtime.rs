// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The seam between the bridge and a foreign runtime.
//
// A runtime implementation owns the foreign heap and its threads. It receives
// host->foreign calls through `send`, reports foreign->host calls through the
// `HostPort` it was bound to, and is told when the host drops its last proxy
// for a foreign object.

use std::sync::{Arc, Weak};

use tether_core::{Catalogue, SelectorRef, WireFault, WireRef, WireResult, WireValue};

use crate::bridge::Core;
use crate::dispatch::{self, PendingCall};
use crate::handle_table::Handle;

/// A foreign runtime the bridge can drive.
pub trait ForeignRuntime: Send + Sync {
    /// Human-readable runtime name (e.g. "loopback", "jvm").
    fn name(&self) -> &str;

    /// Called once when a bridge adopts this runtime.
    fn bind(&self, host: HostPort);

    /// Execute a host->foreign call. The runtime must eventually complete
    /// the call or drop it; it must not block the sending thread on the
    /// result. When `PendingCall::complete` returns false the caller has
    /// given up, and any foreign reference in the result is still owned by
    /// the runtime.
    fn send(&self, call: PendingCall);

    /// The host dropped its last reference to foreign object `handle`.
    fn release(&self, handle: WireRef);

    /// Stop accepting calls. In-flight calls are completed or dropped.
    fn shutdown(&self);
}

/// The host side as seen from a foreign runtime.
///
/// Holds the bridge weakly: a runtime outliving its bridge gets `ShutDown`
/// faults instead of keeping the bridge alive.
#[derive(Clone)]
pub struct HostPort {
    core: Weak<Core>,
}

impl HostPort {
    pub(crate) fn new(core: &Arc<Core>) -> Self {
        Self {
            core: Arc::downgrade(core),
        }
    }

    /// Call `selector` on exposed host object `handle`. Callable from any
    /// thread, including ones the host never created.
    pub fn invoke_host(
        &self,
        handle: WireRef,
        selector: impl Into<SelectorRef>,
        args: Vec<WireValue>,
    ) -> WireResult {
        let core = self.core.upgrade().ok_or(WireFault::ShutDown)?;
        dispatch::invoke_host(&core, handle, selector.into(), args)
    }

    /// The foreign side no longer references host object `handle`.
    /// Releasing a stale handle is a no-op.
    pub fn release(&self, handle: WireRef) {
        if let (Some(core), Some(handle)) = (self.core.upgrade(), Handle::from_wire(handle)) {
            core.release_host(handle);
        }
    }

    pub fn catalogue(&self) -> Option<Arc<Catalogue>> {
        self.core.upgrade().map(|core| Arc::clone(&core.catalogue))
    }

    pub fn is_live(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| !core.is_shut_down())
    }
}
