// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed host-side glue for the package's capabilities.
//
// Capabilities the host also implements (`I2`, `Interface`) are traits with
// one impl per host type plus one for foreign proxies, so package code calls
// them the same way wherever the object lives. Capabilities only the foreign
// side implements are thin proxy wrappers.

use std::sync::Arc;

use tether_bridge::{ForeignProxy, ObjectRef, Value};
use tether_core::HostError;
use tether_core::error::{Result, TetherError};

use crate::types::{Concrete, MyI2};

/// Capability names as they appear in the catalogue.
pub mod cap {
    pub const PACKAGE: &str = "testpkg.Package";
    pub const I: &str = "testpkg.I";
    pub const I2: &str = "testpkg.I2";
    pub const S: &str = "testpkg.S";
    pub const S2: &str = "testpkg.S2";
    pub const S4: &str = "testpkg.S4";
    pub const INTERFACE: &str = "testpkg.Interface";
    pub const CONCRETE: &str = "testpkg.Concrete";
    pub const INTERFACE_DUPPER: &str = "testpkg.InterfaceDupper";
    pub const CONCRETE_DUPPER: &str = "testpkg.ConcreteDupper";
    pub const RECEIVER: &str = "testpkg.Receiver";
    pub const NULL_TEST: &str = "testpkg.NullTest";
    pub const EMPTY_ERRORER: &str = "testpkg.EmptyErrorer";
    pub const GO_CALLBACK: &str = "testpkg.GoCallback";
    pub const B: &str = "testpkg.B";
}

/// A non-null argument, or a domain error naming what was missing.
fn required(obj: Option<ObjectRef>, capability: &str) -> Result<ObjectRef> {
    obj.ok_or_else(|| HostError::new(format!("nil {capability}")).into())
}

/// A non-null argument implemented on the foreign side.
fn foreign(obj: Option<ObjectRef>, capability: &str) -> Result<ForeignProxy> {
    match required(obj, capability)? {
        ObjectRef::Foreign(proxy) => Ok(proxy),
        ObjectRef::Host(h) => Err(TetherError::mismatch(capability, h.type_name())),
    }
}

fn void(value: Value) -> Result<()> {
    match value {
        Value::Void => Ok(()),
        other => Err(TetherError::mismatch("void", other.kind())),
    }
}

// ---------------------------------------------------------------------------
// I2
// ---------------------------------------------------------------------------

pub trait I2: Send + Sync {
    fn times(&self, v: i32) -> Result<i64>;

    fn error(&self, trigger: bool) -> Result<()>;

    fn string_error(&self, s: &str) -> Result<String>;

    /// The object behind this view, for handing it back out unchanged.
    fn object_ref(self: Arc<Self>) -> ObjectRef;
}

pub struct ForeignI2(ForeignProxy);

impl I2 for ForeignI2 {
    fn times(&self, v: i32) -> Result<i64> {
        self.0.call("Times", vec![Value::I32(v)])?.into_i64()
    }

    fn error(&self, trigger: bool) -> Result<()> {
        void(self.0.call("Error", vec![Value::Bool(trigger)])?)
    }

    fn string_error(&self, s: &str) -> Result<String> {
        self.0
            .call("StringError", vec![Value::Str(s.to_string())])?
            .into_string()
    }

    fn object_ref(self: Arc<Self>) -> ObjectRef {
        ObjectRef::Foreign(self.0.clone())
    }
}

pub fn i2(obj: Option<ObjectRef>) -> Result<Arc<dyn I2>> {
    match required(obj, cap::I2)? {
        ObjectRef::Foreign(proxy) => Ok(Arc::new(ForeignI2(proxy))),
        host => match host.downcast::<MyI2>() {
            Some(mine) => Ok(mine as Arc<dyn I2>),
            None => Err(TetherError::mismatch(cap::I2, format!("{host:?}"))),
        },
    }
}

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

pub trait Interface: Send + Sync {
    fn f(&self) -> Result<()>;

    fn object_ref(self: Arc<Self>) -> ObjectRef;
}

pub struct ForeignInterface(ForeignProxy);

impl Interface for ForeignInterface {
    fn f(&self) -> Result<()> {
        void(self.0.call("F", vec![])?)
    }

    fn object_ref(self: Arc<Self>) -> ObjectRef {
        ObjectRef::Foreign(self.0.clone())
    }
}

pub fn interface(obj: Option<ObjectRef>) -> Result<Arc<dyn Interface>> {
    match required(obj, cap::INTERFACE)? {
        ObjectRef::Foreign(proxy) => Ok(Arc::new(ForeignInterface(proxy))),
        host => match host.downcast::<Concrete>() {
            Some(c) => Ok(c as Arc<dyn Interface>),
            None => Err(TetherError::mismatch(cap::INTERFACE, format!("{host:?}"))),
        },
    }
}

// ---------------------------------------------------------------------------
// Foreign-only capabilities
// ---------------------------------------------------------------------------

pub struct ForeignI(ForeignProxy);

impl ForeignI {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::I).map(Self)
    }

    pub fn f(&self) -> Result<()> {
        void(self.0.call("F", vec![])?)
    }

    pub fn e(&self) -> Result<()> {
        void(self.0.call("E", vec![])?)
    }

    pub fn v(&self) -> Result<i64> {
        self.0.call("V", vec![])?.into_i64()
    }

    pub fn ve(&self) -> Result<i64> {
        self.0.call("VE", vec![])?.into_i64()
    }
}

pub struct Receiver(ForeignProxy);

impl Receiver {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::RECEIVER).map(Self)
    }

    pub fn hello(&self, message: &str) -> Result<()> {
        void(self.0.call("Hello", vec![Value::Str(message.to_string())])?)
    }
}

pub struct GoCallback(ForeignProxy);

impl GoCallback {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::GO_CALLBACK).map(Self)
    }

    pub fn var_update(&self) -> Result<()> {
        void(self.0.call("VarUpdate", vec![])?)
    }
}

pub struct NullTest(ForeignProxy);

impl NullTest {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::NULL_TEST).map(Self)
    }

    pub fn null(&self) -> Result<Option<ObjectRef>> {
        self.0.call("Null", vec![])?.into_object()
    }
}

pub struct InterfaceDupper(ForeignProxy);

impl InterfaceDupper {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::INTERFACE_DUPPER).map(Self)
    }

    pub fn idup(&self, i: Arc<dyn Interface>) -> Result<Option<Arc<dyn Interface>>> {
        let back = self
            .0
            .call("IDup", vec![Value::object(i.object_ref())])?
            .into_object()?;
        back.map(|obj| interface(Some(obj))).transpose()
    }
}

pub struct ConcreteDupper(ForeignProxy);

impl ConcreteDupper {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::CONCRETE_DUPPER).map(Self)
    }

    pub fn cdup(&self, c: Arc<Concrete>) -> Result<Option<Arc<Concrete>>> {
        let back = self
            .0
            .call("CDup", vec![Value::host(c)])?
            .into_object()?;
        match back {
            None => Ok(None),
            Some(obj) => obj
                .downcast::<Concrete>()
                .map(Some)
                .ok_or_else(|| TetherError::mismatch(cap::CONCRETE, format!("{obj:?}"))),
        }
    }
}

pub struct EmptyErrorer(ForeignProxy);

impl EmptyErrorer {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::EMPTY_ERRORER).map(Self)
    }

    pub fn empty_error(&self) -> Result<()> {
        void(self.0.call("EmptyError", vec![])?)
    }
}

pub struct ByteSink(ForeignProxy);

impl ByteSink {
    pub fn from_arg(obj: Option<ObjectRef>) -> Result<Self> {
        foreign(obj, cap::B).map(Self)
    }

    pub fn b(&self, bytes: Vec<u8>) -> Result<()> {
        void(self.0.call("B", vec![Value::Bytes(bytes)])?)
    }
}
