// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Call dispatcher.
//
// Host -> foreign: a `PendingCall` is handed to the foreign runtime and the
// caller blocks on its completion slot, optionally with a timeout.
// Foreign -> host: the target handle is resolved, the selector looked up in
// the object's vtable, arguments decoded, and the method run with panics
// converted into host errors. Nothing that happens inside a host method is
// allowed to unwind across the boundary.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tether_core::error::{Result, TetherError};
use tether_core::{
    Direction, ForeignError, HostError, Selector, SelectorRef, TypeDesc, WireFault, WireRef,
    WireResult, WireValue,
};
use tracing::{debug, instrument, trace, warn};

use crate::bridge::Core;
use crate::handle_table::{Handle, lock};
use crate::marshal;
use crate::reference;
use crate::value::{Args, Value};

// ---------------------------------------------------------------------------
// Pending calls
// ---------------------------------------------------------------------------

/// Where a call is in its life.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Created,
    Sent,
    Completed(WireValue),
    Failed(WireFault),
    /// The caller gave up waiting; a late result is discarded.
    Abandoned,
}

#[derive(Debug)]
struct CompletionSlot {
    state: Mutex<CallState>,
    done: Condvar,
    /// Shared with the dispatcher so late results can be counted.
    discarded: Arc<AtomicU64>,
}

/// One in-flight cross-boundary call.
///
/// Exactly one of completion, failure or abandonment wins. A call dropped
/// by the runtime without being completed fails with an internal fault, so
/// a waiting caller is never stranded.
#[derive(Debug)]
pub struct PendingCall {
    pub id: u64,
    pub direction: Direction,
    pub target: WireRef,
    pub selector: Selector,
    pub args: Vec<WireValue>,
    slot: Arc<CompletionSlot>,
}

impl PendingCall {
    pub(crate) fn new(
        id: u64,
        direction: Direction,
        target: WireRef,
        selector: Selector,
        args: Vec<WireValue>,
        discarded: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id,
            direction,
            target,
            selector,
            args,
            slot: Arc::new(CompletionSlot {
                state: Mutex::new(CallState::Created),
                done: Condvar::new(),
                discarded,
            }),
        }
    }

    /// Take the arguments out, e.g. to hand them to the callee.
    pub fn take_args(&mut self) -> Vec<WireValue> {
        std::mem::take(&mut self.args)
    }

    pub fn state(&self) -> CallState {
        lock(&self.slot.state).clone()
    }

    /// Deliver the outcome. Returns `false` if the caller had already given
    /// up or the call was completed before; the result is then discarded.
    pub fn complete(&self, result: WireResult) -> bool {
        let mut state = lock(&self.slot.state);
        match *state {
            CallState::Created | CallState::Sent => {
                *state = match result {
                    Ok(v) => CallState::Completed(v),
                    Err(f) => CallState::Failed(f),
                };
                drop(state);
                self.slot.done.notify_all();
                true
            }
            CallState::Abandoned => {
                self.slot.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(call_id = self.id, "late result discarded");
                false
            }
            CallState::Completed(_) | CallState::Failed(_) => false,
        }
    }

    fn waiter(&self) -> Waiter {
        Waiter {
            id: self.id,
            slot: Arc::clone(&self.slot),
        }
    }

    fn mark_sent(&self) {
        let mut state = lock(&self.slot.state);
        if *state == CallState::Created {
            *state = CallState::Sent;
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        let state = lock(&self.slot.state);
        if matches!(*state, CallState::Created | CallState::Sent) {
            drop(state);
            self.complete(Err(WireFault::Internal(format!(
                "call {} dropped before completion",
                self.id
            ))));
        }
    }
}

/// The caller's end of a pending call.
struct Waiter {
    id: u64,
    slot: Arc<CompletionSlot>,
}

impl Waiter {
    fn wait(self, timeout: Option<Duration>) -> Result<WireResult> {
        let started = Instant::now();
        let mut state = lock(&self.slot.state);
        loop {
            match &*state {
                CallState::Completed(v) => return Ok(Ok(v.clone())),
                CallState::Failed(f) => return Ok(Err(f.clone())),
                CallState::Abandoned => {
                    return Err(TetherError::Timeout {
                        call_id: self.id,
                        waited: started.elapsed(),
                    });
                }
                CallState::Created | CallState::Sent => {}
            }
            state = match timeout {
                None => self
                    .slot
                    .done
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        *state = CallState::Abandoned;
                        return Err(TetherError::Timeout {
                            call_id: self.id,
                            waited: elapsed,
                        });
                    }
                    self.slot
                        .done
                        .wait_timeout(state, limit - elapsed)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher state
// ---------------------------------------------------------------------------

/// Counters kept by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub to_foreign: u64,
    pub to_host: u64,
    pub timeouts: u64,
    pub discarded: u64,
    pub host_panics: u64,
}

#[derive(Default)]
pub(crate) struct Dispatcher {
    next_id: AtomicU64,
    to_foreign: AtomicU64,
    to_host: AtomicU64,
    timeouts: AtomicU64,
    discarded: Arc<AtomicU64>,
    host_panics: AtomicU64,
}

impl Dispatcher {
    fn next_call(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn stats(&self) -> DispatchStats {
        DispatchStats {
            to_foreign: self.to_foreign.load(Ordering::Relaxed),
            to_host: self.to_host.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            host_panics: self.host_panics.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Host -> foreign
// ---------------------------------------------------------------------------

/// Call `selector` on the foreign object `target` and wait for its result.
#[instrument(skip(core, args), fields(bridge = %core.id, target = %target))]
pub(crate) fn invoke_foreign(
    core: &Arc<Core>,
    target: WireRef,
    selector: Selector,
    args: Vec<Value>,
    timeout: Option<Duration>,
) -> Result<Value> {
    core.ensure_live()?;
    let (cap, method) = core
        .catalogue
        .method(selector)
        .ok_or_else(|| TetherError::NoSuchMethod {
            capability: format!("#{}", selector.capability.0),
            selector: selector.to_string(),
        })?;
    if args.len() != method.params.len() {
        return Err(TetherError::mismatch(
            format!("{} arguments for {}.{}", method.params.len(), cap.name, method.name),
            args.len(),
        ));
    }
    let returns = method.returns.clone();

    let wire_args = args
        .into_iter()
        .zip(&method.params)
        .map(|(value, ty)| reference::encode(core, value, ty))
        .collect::<Result<Vec<_>>>()?;

    let call = PendingCall::new(
        core.dispatch.next_call(),
        Direction::HostToForeign,
        target,
        selector,
        wire_args,
        Arc::clone(&core.dispatch.discarded),
    );
    let call_id = call.id;
    let waiter = call.waiter();
    call.mark_sent();
    core.dispatch.to_foreign.fetch_add(1, Ordering::Relaxed);
    trace!(call_id, method = %method.name, "sending call to foreign runtime");
    core.runtime.send(call);

    match waiter.wait(timeout) {
        Ok(Ok(wire)) => {
            let delivered = delivered_ref(&wire);
            reference::decode(core, wire, &returns).inspect_err(|_| {
                if let Some(r) = delivered {
                    core.runtime.release(r);
                }
            })
        }
        Ok(Err(fault)) => Err(marshal::error_from_fault(fault)),
        Err(e) => {
            core.dispatch.timeouts.fetch_add(1, Ordering::Relaxed);
            warn!(call_id, ?timeout, "foreign call timed out");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Foreign -> host
// ---------------------------------------------------------------------------

/// Foreign references that arrived with a call and have not been taken over
/// by a proxy yet. The runtime counted each one as handed to the host, so
/// whatever is still here when the call ends is released.
struct Delivered<'a> {
    core: &'a Core,
    args: std::vec::IntoIter<WireValue>,
}

impl<'a> Delivered<'a> {
    fn new(core: &'a Core, args: Vec<WireValue>) -> Self {
        Self {
            core,
            args: args.into_iter(),
        }
    }

    fn len(&self) -> usize {
        self.args.len()
    }

    fn next(&mut self) -> Option<WireValue> {
        self.args.next()
    }
}

impl Drop for Delivered<'_> {
    fn drop(&mut self) {
        for wire in self.args.by_ref() {
            release_delivered(self.core, &wire);
        }
    }
}

fn delivered_ref(wire: &WireValue) -> Option<WireRef> {
    match wire {
        WireValue::Foreign(r) if !r.is_null() => Some(*r),
        _ => None,
    }
}

fn release_delivered(core: &Core, wire: &WireValue) {
    if let Some(r) = delivered_ref(wire) {
        trace!(handle = %r, "unclaimed foreign reference released");
        core.runtime.release(r);
    }
}

/// Serve a call from the foreign side. Never panics and never blocks on
/// anything but the target method itself.
pub(crate) fn invoke_host(
    core: &Arc<Core>,
    target: WireRef,
    selector: SelectorRef,
    args: Vec<WireValue>,
) -> WireResult {
    let args = Delivered::new(core, args);
    if core.is_shut_down() {
        return Err(WireFault::ShutDown);
    }
    let _attached = core.attach.enter().map_err(marshal::fault_from_error)?;
    let id = core.dispatch.next_call();
    core.dispatch.to_host.fetch_add(1, Ordering::Relaxed);

    let selector = core
        .catalogue
        .resolve(&selector)
        .map_err(marshal::fault_from_error)?;
    let call = PendingCall::new(
        id,
        Direction::ForeignToHost,
        target,
        selector,
        Vec::new(),
        Arc::clone(&core.dispatch.discarded),
    );
    let result = serve(core, call, args);
    if let Err(fault) = &result {
        if !matches!(fault, WireFault::Domain(_)) {
            debug!(bridge = %core.id, call_id = id, %target, %fault, "host call failed");
        }
    }
    result
}

fn serve(core: &Arc<Core>, call: PendingCall, args: Delivered<'_>) -> WireResult {
    call.mark_sent();
    let outcome = run(core, &call, args);
    call.complete(outcome.clone());
    outcome
}

fn run(core: &Arc<Core>, call: &PendingCall, mut args: Delivered<'_>) -> WireResult {
    let Some((cap, method)) = core.catalogue.method(call.selector) else {
        return Err(WireFault::NoSuchMethod {
            capability: String::new(),
            selector: call.selector.to_string(),
        });
    };

    let Some(handle) = Handle::from_wire(call.target) else {
        return null_receiver(&method.returns, &format!("{}.{}", cap.name, method.name));
    };
    let entry = core.table.resolve(handle).map_err(marshal::fault_from_error)?;
    let Some(func) = entry.vtable.method(call.selector) else {
        return Err(WireFault::NoSuchMethod {
            capability: cap.name.clone(),
            selector: format!("{} (not implemented by {})", method.name, entry.vtable.type_name),
        });
    };

    if args.len() != method.params.len() {
        return Err(WireFault::TypeMismatch {
            expected: format!("{} arguments", method.params.len()),
            got: args.len().to_string(),
        });
    }
    let mut values = Vec::with_capacity(method.params.len());
    for ty in &method.params {
        let Some(wire) = args.next() else {
            break;
        };
        // A failed decode has not handed the reference to a proxy.
        let delivered = delivered_ref(&wire);
        match reference::decode(core, wire, ty) {
            Ok(value) => values.push(value),
            Err(e) => {
                if let Some(r) = delivered {
                    core.runtime.release(r);
                }
                return Err(marshal::fault_from_error(e));
            }
        }
    }
    drop(args);

    let _serial = entry.gate.as_deref().map(lock);
    let object = Arc::clone(&entry.object);
    let returned = catch_unwind(AssertUnwindSafe(|| func(object.as_any(), Args::new(values))));

    let value = match returned {
        Ok(Ok(v)) => v,
        Ok(Err(TetherError::Host(e))) => return Err(WireFault::Domain(marshal::to_foreign(&e))),
        Ok(Err(other)) => {
            // A bridge failure inside the method body, e.g. an outbound call
            // that hit a stale handle. It belongs to the method, not to the
            // caller's handle, so it surfaces as a domain error.
            let e = HostError::new(other.to_string());
            return Err(WireFault::Domain(marshal::to_foreign(&e)));
        }
        Err(payload) => {
            core.dispatch.host_panics.fetch_add(1, Ordering::Relaxed);
            let msg = panic_message(payload.as_ref());
            warn!(bridge = %core.id, call_id = call.id, method = %method.name, %msg, "host method panicked");
            return Err(WireFault::Domain(ForeignError::new(format!("host panic: {msg}"))));
        }
    };

    reference::encode(core, value, &method.returns).map_err(marshal::fault_from_error)
}

/// A method called through a null reference yields the null form of its
/// return type where one exists.
fn null_receiver(returns: &TypeDesc, method: &str) -> WireResult {
    match returns {
        TypeDesc::Void => Ok(WireValue::Void),
        TypeDesc::Object(_) => Ok(WireValue::NULL),
        TypeDesc::Error => Ok(WireValue::Error(None)),
        _ => Err(WireFault::NullReceiver(method.to_string())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tether_core::CapabilityId;

    use super::*;

    fn call() -> PendingCall {
        PendingCall::new(
            7,
            Direction::HostToForeign,
            WireRef::from_raw(1),
            Selector {
                capability: CapabilityId(0),
                method: 0,
            },
            vec![WireValue::I32(1)],
            Arc::new(AtomicU64::new(0)),
        )
    }

    #[test]
    fn completion_wakes_waiter() {
        let c = call();
        let w = c.waiter();
        c.mark_sent();
        let t = thread::spawn(move || {
            assert!(c.complete(Ok(WireValue::I64(9))));
        });
        let result = w.wait(None).expect("no timeout");
        assert_eq!(result, Ok(WireValue::I64(9)));
        t.join().expect("completer");
    }

    #[test]
    fn timeout_abandons_and_discards_late_result() {
        let discarded = Arc::new(AtomicU64::new(0));
        let c = PendingCall::new(
            1,
            Direction::HostToForeign,
            WireRef::from_raw(0),
            Selector {
                capability: CapabilityId(0),
                method: 0,
            },
            Vec::new(),
            Arc::clone(&discarded),
        );
        let w = c.waiter();
        let err = w.wait(Some(Duration::from_millis(10))).expect_err("times out");
        assert!(matches!(err, TetherError::Timeout { call_id: 1, .. }));
        assert_eq!(c.state(), CallState::Abandoned);

        assert!(!c.complete(Ok(WireValue::Void)));
        assert_eq!(discarded.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn second_completion_loses() {
        let c = call();
        assert!(c.complete(Err(WireFault::ShutDown)));
        assert!(!c.complete(Ok(WireValue::Void)));
        assert_eq!(c.state(), CallState::Failed(WireFault::ShutDown));
    }

    #[test]
    fn dropped_call_fails_waiter() {
        let c = call();
        let w = c.waiter();
        drop(c);
        assert!(matches!(w.wait(None), Ok(Err(WireFault::Internal(_)))));
    }

    #[test]
    fn null_receiver_follows_return_type() {
        assert_eq!(null_receiver(&TypeDesc::Void, "X.F"), Ok(WireValue::Void));
        assert_eq!(
            null_receiver(&TypeDesc::Object("x".into()), "X.Dup"),
            Ok(WireValue::NULL)
        );
        assert_eq!(
            null_receiver(&TypeDesc::Error, "X.Err"),
            Ok(WireValue::Error(None))
        );
        assert_eq!(
            null_receiver(&TypeDesc::I32, "X.V"),
            Err(WireFault::NullReceiver("X.V".into()))
        );
    }
}
