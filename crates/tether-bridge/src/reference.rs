// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reference bridge: exposes host objects to the foreign side, wraps foreign
// references in proxies, and converts values between their host and wire
// forms.
//
// Exposing the same host object twice yields the same handle, so an object
// that travels out and back arrives as the very same object. Proxies for
// identity-preserving capabilities are memoised per foreign handle for the
// same reason on the other side.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tether_core::error::{Result, TetherError};
use tether_core::{CapabilityId, Catalogue, Selector, TypeDesc, WireRef, WireValue};
use tracing::{debug, trace, warn};

use crate::bridge::Core;
use crate::dispatch;
use crate::handle_table::{Handle, lock};
use crate::marshal;
use crate::null_guard;
use crate::value::{HostObject, MethodFn, ObjectRef, Value, host_addr};

// ---------------------------------------------------------------------------
// Vtables
// ---------------------------------------------------------------------------

/// Capabilities and method entry points of one host type, resolved against
/// the catalogue.
pub(crate) struct VTable {
    pub(crate) type_name: &'static str,
    capabilities: Vec<CapabilityId>,
    methods: HashMap<Selector, MethodFn>,
}

impl VTable {
    fn build(catalogue: &Catalogue, object: &dyn HostObject) -> Result<Self> {
        let type_name = object.type_name();
        let mut capabilities = Vec::new();
        let mut methods = HashMap::new();

        for imp in object.capabilities() {
            let desc = catalogue.require(imp.name)?;
            for (index, m) in desc.methods.iter().enumerate() {
                let Some((_, func)) = imp.methods.iter().find(|(name, _)| *name == m.name) else {
                    return Err(TetherError::IncompleteCapability {
                        type_name: type_name.to_string(),
                        capability: desc.name.clone(),
                        method: m.name.clone(),
                    });
                };
                methods.insert(
                    Selector {
                        capability: desc.id,
                        method: index as u16,
                    },
                    *func,
                );
            }
            for (name, _) in imp.methods {
                if desc.method_index(name).is_none() {
                    warn!(type_name, capability = %desc.name, method = name, "method not in catalogue, ignored");
                }
            }
            capabilities.push(desc.id);
        }

        Ok(Self {
            type_name,
            capabilities,
            methods,
        })
    }

    pub(crate) fn method(&self, selector: Selector) -> Option<MethodFn> {
        self.methods.get(&selector).copied()
    }

    pub(crate) fn implements(&self, capability: CapabilityId) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// What the handle table stores for an exposed object.
#[derive(Clone)]
pub(crate) struct Exposed {
    pub(crate) object: Arc<dyn HostObject>,
    pub(crate) vtable: Arc<VTable>,
    pub(crate) gate: Option<Arc<Mutex<()>>>,
}

// ---------------------------------------------------------------------------
// Bookkeeping
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct References {
    /// Host object address -> its current handle.
    exports: Mutex<HashMap<usize, Handle>>,
    vtables: Mutex<HashMap<TypeId, Arc<VTable>>>,
    /// Memoised proxies of identity-preserving capabilities.
    proxies: Mutex<HashMap<(WireRef, CapabilityId), Weak<ProxyInner>>>,
}

impl References {
    pub(crate) fn clear(&self) {
        lock(&self.exports).clear();
        lock(&self.proxies).clear();
    }

    pub(crate) fn cached_proxies(&self) -> usize {
        lock(&self.proxies).len()
    }
}

fn vtable_for(core: &Core, object: &Arc<dyn HostObject>) -> Result<Arc<VTable>> {
    let key = object.as_any().type_id();
    if let Some(vt) = lock(&core.refs.vtables).get(&key) {
        return Ok(Arc::clone(vt));
    }
    let vt = Arc::new(VTable::build(&core.catalogue, object.as_ref())?);
    debug!(type_name = vt.type_name, capabilities = vt.capabilities.len(), "vtable resolved");
    Ok(Arc::clone(
        lock(&core.refs.vtables).entry(key).or_insert(vt),
    ))
}

// ---------------------------------------------------------------------------
// Host objects going out
// ---------------------------------------------------------------------------

/// Register `object` in the handle table, or return its existing handle.
pub(crate) fn expose(core: &Core, object: &Arc<dyn HostObject>) -> Result<Handle> {
    core.ensure_live()?;
    let vtable = vtable_for(core, object)?;
    let addr = host_addr(object);

    let mut exports = lock(&core.refs.exports);
    if let Some(&handle) = exports.get(&addr) {
        if core.table.resolve(handle).is_ok() {
            return Ok(handle);
        }
    }

    let gate = object.serialized().then(|| Arc::new(Mutex::new(())));
    let handle = core.table.register(Exposed {
        object: Arc::clone(object),
        vtable,
        gate,
    })?;
    exports.insert(addr, handle);
    drop(exports);

    core.monitor.watch(handle, object);
    trace!(%handle, type_name = object.type_name(), "host object exposed");
    Ok(handle)
}

/// Drop the table's reference to an exposed object. `false` if the handle
/// was already stale.
pub(crate) fn release(core: &Core, handle: Handle) -> bool {
    let Some(entry) = core.table.release(handle) else {
        trace!(%handle, "stale release ignored");
        return false;
    };
    unlink(core, handle, entry);
    true
}

/// Release `handle` for a collection signal, but only if the table still
/// holds the last reference to the object. A host thread that reached the
/// object again between the signal and the drain keeps the handle, and the
/// object is watched afresh.
pub(crate) fn release_collected(core: &Core, handle: Handle) -> bool {
    let released = core
        .table
        .release_if(handle, |entry| Arc::strong_count(&entry.object) == 1);
    match released {
        Some(entry) => {
            unlink(core, handle, entry);
            true
        }
        None => {
            if core.monitor.rearm(handle) {
                debug!(%handle, "object reachable again, collection signal withdrawn");
            }
            false
        }
    }
}

fn unlink(core: &Core, handle: Handle, entry: Exposed) {
    core.monitor.forget(handle);
    let addr = host_addr(&entry.object);
    let mut exports = lock(&core.refs.exports);
    if exports.get(&addr) == Some(&handle) {
        exports.remove(&addr);
    }
    drop(exports);
    trace!(%handle, type_name = entry.vtable.type_name, "host object released");
}

// ---------------------------------------------------------------------------
// Foreign objects coming in
// ---------------------------------------------------------------------------

/// Wrap a foreign reference. The caller hands over one reference count on
/// `handle`; it is released when the last clone of the returned proxy drops
/// (or right away if a memoised proxy already owns one).
pub(crate) fn wrap_foreign(
    core: &Arc<Core>,
    handle: WireRef,
    capability: CapabilityId,
) -> Result<Option<ForeignProxy>> {
    if handle.is_null() {
        return Ok(None);
    }
    let desc = core.catalogue.capability(capability).ok_or_else(|| {
        TetherError::UnknownCapability(format!("#{}", capability.0))
    })?;

    if !desc.identity_preserving {
        return Ok(Some(ForeignProxy::new(core, handle, capability, false)));
    }

    let key = (handle, capability);
    let mut cache = lock(&core.refs.proxies);
    if let Some(inner) = cache.get(&key).and_then(Weak::upgrade) {
        drop(cache);
        core.runtime.release(handle);
        return Ok(Some(ForeignProxy { inner }));
    }
    let proxy = ForeignProxy::new(core, handle, capability, true);
    cache.insert(key, Arc::downgrade(&proxy.inner));
    Ok(Some(proxy))
}

/// Host-side stand-in for a foreign object.
///
/// Cloning is cheap and shares the foreign reference; the reference is
/// released once, when the last clone drops.
#[derive(Clone)]
pub struct ForeignProxy {
    inner: Arc<ProxyInner>,
}

pub(crate) struct ProxyInner {
    handle: WireRef,
    capability: CapabilityId,
    memoised: bool,
    core: Arc<Core>,
}

impl ForeignProxy {
    fn new(core: &Arc<Core>, handle: WireRef, capability: CapabilityId, memoised: bool) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                handle,
                capability,
                memoised,
                core: Arc::clone(core),
            }),
        }
    }

    pub fn handle(&self) -> WireRef {
        self.inner.handle
    }

    pub fn capability(&self) -> CapabilityId {
        self.inner.capability
    }

    pub fn capability_name(&self) -> &str {
        self.inner
            .core
            .catalogue
            .capability(self.inner.capability)
            .map(|c| c.name.as_str())
            .unwrap_or("?")
    }

    /// Same proxy object, not merely the same foreign handle.
    pub fn ptr_eq(&self, other: &ForeignProxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Call `method` of this proxy's capability, bounded by the configured
    /// default timeout.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let timeout = self.inner.core.config.foreign_call_timeout();
        self.call_with(method, args, timeout)
    }

    pub fn call_timeout(&self, method: &str, args: Vec<Value>, timeout: Duration) -> Result<Value> {
        self.call_with(method, args, Some(timeout))
    }

    fn call_with(&self, method: &str, args: Vec<Value>, timeout: Option<Duration>) -> Result<Value> {
        let core = &self.inner.core;
        let selector = core
            .catalogue
            .capability(self.inner.capability)
            .and_then(|c| c.selector(method))
            .ok_or_else(|| TetherError::NoSuchMethod {
                capability: self.capability_name().to_string(),
                selector: method.to_string(),
            })?;
        dispatch::invoke_foreign(core, self.inner.handle, selector, args, timeout)
    }
}

impl fmt::Debug for ForeignProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignProxy")
            .field("handle", &self.inner.handle)
            .field("capability", &self.capability_name())
            .finish()
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if self.memoised {
            let mut cache = lock(&self.core.refs.proxies);
            let key = (self.handle, self.capability);
            if cache.get(&key).is_some_and(|w| w.strong_count() == 0) {
                cache.remove(&key);
            }
        }
        trace!(handle = %self.handle, "foreign reference released");
        self.core.runtime.release(self.handle);
    }
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

fn object_capability(core: &Core, ty: &TypeDesc) -> Option<CapabilityId> {
    match ty {
        TypeDesc::Object(name) => core.catalogue.by_name(name).map(|c| c.id),
        _ => None,
    }
}

/// Host value -> wire value, checked against the declared type.
pub(crate) fn encode(core: &Core, value: Value, ty: &TypeDesc) -> Result<WireValue> {
    let wire = match (value, ty) {
        (Value::Void, TypeDesc::Void) => WireValue::Void,
        (Value::Bool(v), TypeDesc::Bool) => WireValue::Bool(v),
        (Value::I32(v), TypeDesc::I32) => WireValue::I32(v),
        (Value::I64(v), TypeDesc::I64) => WireValue::I64(v),
        (Value::F32(v), TypeDesc::F32) => WireValue::F32(v),
        (Value::F64(v), TypeDesc::F64) => WireValue::F64(v),
        (Value::Str(v), TypeDesc::String) => WireValue::Str(v),
        (Value::Bytes(v), TypeDesc::Bytes) => WireValue::Bytes(v),
        (Value::Error(e), TypeDesc::Error) => WireValue::Error(marshal::to_foreign_opt(e.as_ref())),
        (Value::Object(None), TypeDesc::Object(_)) => WireValue::NULL,
        (Value::Object(Some(ObjectRef::Host(obj))), TypeDesc::Object(_)) => {
            let cap = object_capability(core, ty);
            let vtable = vtable_for(core, &obj)?;
            if !cap.is_some_and(|c| vtable.implements(c)) {
                return Err(TetherError::mismatch(ty, vtable.type_name));
            }
            WireValue::Host(expose(core, &obj)?.to_wire())
        }
        (Value::Object(Some(ObjectRef::Foreign(proxy))), TypeDesc::Object(_)) => {
            WireValue::Foreign(proxy.handle())
        }
        (value, ty) => return Err(TetherError::mismatch(ty, value.kind())),
    };
    Ok(wire)
}

/// Wire value -> host value, checked against the declared type. Null object
/// references decode to `Object(None)` without a table lookup.
pub(crate) fn decode(core: &Arc<Core>, wire: WireValue, ty: &TypeDesc) -> Result<Value> {
    let value = match (wire, ty) {
        (WireValue::Void, TypeDesc::Void) => Value::Void,
        (WireValue::Bool(v), TypeDesc::Bool) => Value::Bool(v),
        (WireValue::I32(v), TypeDesc::I32) => Value::I32(v),
        (WireValue::I64(v), TypeDesc::I64) => Value::I64(v),
        (WireValue::F32(v), TypeDesc::F32) => Value::F32(v),
        (WireValue::F64(v), TypeDesc::F64) => Value::F64(v),
        (WireValue::Str(v), TypeDesc::String) => Value::Str(v),
        (WireValue::Bytes(v), TypeDesc::Bytes) => Value::Bytes(v),
        (WireValue::Error(e), TypeDesc::Error) => Value::Error(marshal::to_host_opt(e)),
        (w, TypeDesc::Object(_)) if w.is_null_ref() => Value::Object(None),
        (WireValue::Host(r), TypeDesc::Object(_)) => {
            let cap = object_capability(core, ty);
            let Some(entry) = null_guard::decode(&core.table, r)? else {
                return Ok(Value::Object(None));
            };
            if !cap.is_some_and(|c| entry.vtable.implements(c)) {
                return Err(TetherError::mismatch(ty, entry.vtable.type_name));
            }
            Value::Object(Some(ObjectRef::Host(entry.object)))
        }
        (WireValue::Foreign(r), TypeDesc::Object(name)) => {
            let cap = core.catalogue.require(name)?.id;
            Value::Object(wrap_foreign(core, r, cap)?.map(ObjectRef::Foreign))
        }
        (wire, ty) => return Err(TetherError::mismatch(ty, wire.kind())),
    };
    Ok(value)
}
