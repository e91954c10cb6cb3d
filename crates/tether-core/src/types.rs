// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Boundary types: what actually crosses between the host and the foreign
// runtime. Nothing in here holds a live object; object values travel as
// opaque `WireRef` keys.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ForeignError;

/// Identifier of one bridge instance. Tags logs and per-thread records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeId(pub Uuid);

impl BridgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BridgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque object key as seen by the other side of the boundary.
///
/// Host handles pack `(index << 32) | generation`. `WireRef::NULL` is the
/// canonical "no object" and is never issued for a live object, so a live
/// handle whose packed value is zero stays distinguishable from null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireRef(u64);

impl WireRef {
    pub const NULL: WireRef = WireRef(u64::MAX);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl std::fmt::Display for WireRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}.{}", self.0 >> 32, self.0 as u32)
        }
    }
}

/// Which way a call is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host code calling a foreign object through a proxy.
    HostToForeign,
    /// Foreign code calling an exposed host object.
    ForeignToHost,
}

/// A marshalled argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Void,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A host object, keyed by its handle in the host's table.
    Host(WireRef),
    /// A foreign object, keyed by whatever the foreign runtime issued.
    Foreign(WireRef),
    /// An error passed as a value (`None` is "no error").
    Error(Option<ForeignError>),
}

impl WireValue {
    /// Canonical null object reference.
    pub const NULL: WireValue = WireValue::Host(WireRef::NULL);

    /// Short name of the variant, for mismatch diagnostics.
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
            Self::Host(r) | Self::Foreign(r) if r.is_null() => "null",
            Self::Host(_) => "host object",
            Self::Foreign(_) => "foreign object",
            Self::Error(_) => "error",
        }
    }

    pub fn is_null_ref(&self) -> bool {
        matches!(self, Self::Host(r) | Self::Foreign(r) if r.is_null())
    }
}

/// Why a cross-boundary call did not produce a value.
///
/// `Domain` is an ordinary error value returned by the callee. Every other
/// variant is a bridge-level condition and must never be confused with a
/// legitimate null or void result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireFault {
    #[error("{0}")]
    Domain(ForeignError),

    #[error("stale handle {0}")]
    StaleHandle(WireRef),

    #[error("`{0}` called through a null reference")]
    NullReceiver(String),

    #[error("no such method `{selector}` on capability `{capability}`")]
    NoSuchMethod { capability: String, selector: String },

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("handle table exhausted ({capacity} slots)")]
    ResourceExhausted { capacity: u32 },

    #[error("bridge is shut down")]
    ShutDown,

    #[error("bridge fault: {0}")]
    Internal(String),
}

/// Outcome of one call as carried across the boundary.
pub type WireResult = std::result::Result<WireValue, WireFault>;
