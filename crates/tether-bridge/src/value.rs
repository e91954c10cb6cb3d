// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host-side values: what host code passes to and receives from proxy calls,
// and what exposed host methods are invoked with.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tether_core::HostError;
use tether_core::error::{Result, TetherError};

use crate::reference::ForeignProxy;

/// Entry point of one exposed method. Receives the object it was called on
/// (downcast with [`receiver`]) and the already type-checked arguments.
pub type MethodFn = fn(&dyn Any, Args) -> Result<Value>;

/// Methods a host type provides for one catalogue capability.
pub struct CapabilityImpl {
    pub name: &'static str,
    pub methods: &'static [(&'static str, MethodFn)],
}

/// A host object that can be handed to the foreign runtime.
///
/// The capability tables are checked against the catalogue when the first
/// object of a type is exposed; a claimed capability with a missing method
/// is refused at that point rather than on first call.
pub trait HostObject: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn capabilities(&self) -> &'static [CapabilityImpl];

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Whether calls into this object must be serialized. Objects are
    /// otherwise called concurrently from any attached thread.
    fn serialized(&self) -> bool {
        false
    }
}

/// Downcast the receiver of a method call.
pub fn receiver<T: 'static>(this: &dyn Any) -> Result<&T> {
    this.downcast_ref::<T>()
        .ok_or_else(|| TetherError::mismatch(std::any::type_name::<T>(), "other host type"))
}

/// An object reference as seen by host code.
#[derive(Clone)]
pub enum ObjectRef {
    Host(Arc<dyn HostObject>),
    Foreign(ForeignProxy),
}

impl ObjectRef {
    pub fn host<T: HostObject>(object: Arc<T>) -> Self {
        Self::Host(object)
    }

    /// Same underlying object (not merely equal contents).
    pub fn same(&self, other: &ObjectRef) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => host_addr(a) == host_addr(b),
            (Self::Foreign(a), Self::Foreign(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn as_foreign(&self) -> Option<&ForeignProxy> {
        match self {
            Self::Foreign(p) => Some(p),
            Self::Host(_) => None,
        }
    }

    /// The concrete host object, if this is one of type `T`.
    pub fn downcast<T: HostObject>(&self) -> Option<Arc<T>> {
        match self {
            Self::Host(obj) => Arc::clone(obj).into_any().downcast::<T>().ok(),
            Self::Foreign(_) => None,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(obj) => write!(f, "Host({})", obj.type_name()),
            Self::Foreign(p) => write!(f, "Foreign({})", p.handle()),
        }
    }
}

/// Address of the object behind an `Arc<dyn HostObject>`, used as its
/// identity key.
pub(crate) fn host_addr(obj: &Arc<dyn HostObject>) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

/// An argument or result in host form.
#[derive(Clone, Debug)]
pub enum Value {
    Void,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Nullable object reference.
    Object(Option<ObjectRef>),
    /// Nullable error value.
    Error(Option<HostError>),
}

impl Value {
    pub fn null() -> Self {
        Self::Object(None)
    }

    pub fn object(obj: ObjectRef) -> Self {
        Self::Object(Some(obj))
    }

    pub fn host<T: HostObject>(obj: Arc<T>) -> Self {
        Self::Object(Some(ObjectRef::Host(obj)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool(_) => "bool",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Object(None) => "null",
            Self::Object(Some(_)) => "object",
            Self::Error(_) => "error",
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            other => Err(TetherError::mismatch("bool", other.kind())),
        }
    }

    pub fn into_i32(self) -> Result<i32> {
        match self {
            Self::I32(v) => Ok(v),
            other => Err(TetherError::mismatch("i32", other.kind())),
        }
    }

    pub fn into_i64(self) -> Result<i64> {
        match self {
            Self::I64(v) => Ok(v),
            other => Err(TetherError::mismatch("i64", other.kind())),
        }
    }

    pub fn into_f64(self) -> Result<f64> {
        match self {
            Self::F64(v) => Ok(v),
            other => Err(TetherError::mismatch("f64", other.kind())),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Self::Str(v) => Ok(v),
            other => Err(TetherError::mismatch("string", other.kind())),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(v) => Ok(v),
            other => Err(TetherError::mismatch("bytes", other.kind())),
        }
    }

    pub fn into_object(self) -> Result<Option<ObjectRef>> {
        match self {
            Self::Object(v) => Ok(v),
            other => Err(TetherError::mismatch("object", other.kind())),
        }
    }

    pub fn into_error(self) -> Result<Option<HostError>> {
        match self {
            Self::Error(v) => Ok(v),
            other => Err(TetherError::mismatch("error", other.kind())),
        }
    }
}

/// Arguments of one call, already checked against the method's signature.
#[derive(Debug, Default)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take argument `i`, leaving `Void` behind.
    pub fn take(&mut self, i: usize) -> Result<Value> {
        self.0
            .get_mut(i)
            .map(|v| std::mem::replace(v, Value::Void))
            .ok_or_else(|| TetherError::mismatch(format!("argument {i}"), "missing"))
    }

    pub fn bool(&mut self, i: usize) -> Result<bool> {
        self.take(i)?.into_bool()
    }

    pub fn i32(&mut self, i: usize) -> Result<i32> {
        self.take(i)?.into_i32()
    }

    pub fn i64(&mut self, i: usize) -> Result<i64> {
        self.take(i)?.into_i64()
    }

    pub fn f64(&mut self, i: usize) -> Result<f64> {
        self.take(i)?.into_f64()
    }

    pub fn string(&mut self, i: usize) -> Result<String> {
        self.take(i)?.into_string()
    }

    pub fn bytes(&mut self, i: usize) -> Result<Vec<u8>> {
        self.take(i)?.into_bytes()
    }

    pub fn object(&mut self, i: usize) -> Result<Option<ObjectRef>> {
        self.take(i)?.into_object()
    }

    pub fn error(&mut self, i: usize) -> Result<Option<HostError>> {
        self.take(i)?.into_error()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}
