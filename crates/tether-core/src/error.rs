// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Tether, plus the two domain error values that cross
// the boundary: `HostError` (host side) and `ForeignError` (foreign side).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::types::WireRef;

/// Top-level error type for all Tether operations.
#[derive(Debug, Error)]
pub enum TetherError {
    // -- Identity / marshalling --
    #[error("stale handle {0}")]
    StaleHandle(WireRef),

    #[error("`{0}` called through a null reference")]
    NullReceiver(String),

    #[error("no such method `{selector}` on capability `{capability}`")]
    NoSuchMethod { capability: String, selector: String },

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    // -- Domain errors carried across the boundary --
    #[error("{0}")]
    Host(HostError),

    // -- Resources --
    #[error("handle table exhausted ({capacity} slots)")]
    ResourceExhausted { capacity: u32 },

    #[error("call {call_id} timed out after {waited:?}")]
    Timeout { call_id: u64, waited: Duration },

    #[error("bridge is shut down")]
    ShutDown,

    #[error("failed to attach thread: {0}")]
    AttachFailed(String),

    /// A bridge or runtime failure that is not the callee's error, e.g. a
    /// call dropped before completion or a foreign panic.
    #[error("bridge fault: {0}")]
    Internal(String),

    // -- Catalogue / registration --
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),

    #[error("{type_name} claims capability `{capability}` but does not implement `{method}`")]
    IncompleteCapability {
        type_name: String,
        capability: String,
        method: String,
    },

    #[error("catalogue error: {0}")]
    Catalogue(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Assets / persistence --
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TetherError {
    /// Shorthand for a type mismatch built from displayable parts.
    pub fn mismatch(expected: impl fmt::Display, got: impl fmt::Display) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    /// The domain error carried by this value, if it is one.
    pub fn as_host_error(&self) -> Option<&HostError> {
        match self {
            Self::Host(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HostError> for TetherError {
    fn from(e: HostError) -> Self {
        Self::Host(e)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TetherError>;

// ---------------------------------------------------------------------------
// Domain error values
// ---------------------------------------------------------------------------

static NEXT_ERROR_ID: AtomicU64 = AtomicU64::new(1);

/// A host-side domain error value.
///
/// Equality is identity: two errors built from the same message are different
/// errors, while a clone (or the same error sent out and marshalled back) is
/// the same error. An empty message is still an error; "no error" is spelled
/// `Option::<HostError>::None`.
#[derive(Clone)]
pub struct HostError {
    id: u64,
    message: Arc<str>,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            id: NEXT_ERROR_ID.fetch_add(1, Ordering::Relaxed),
            message: Arc::from(message),
        }
    }

    /// Rebuild an error with a known identity. Used by the error marshaller
    /// when a host error comes back from the foreign side.
    pub fn with_identity(id: u64, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            id,
            message: Arc::from(message),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl PartialEq for HostError {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HostError {}

impl fmt::Debug for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostError")
            .field("id", &self.id)
            .field("message", &&*self.message)
            .finish()
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HostError {}

/// A domain error in its foreign-consumable form.
///
/// `origin` is the identity of the host error it was made from, if any, so
/// the error can be restored to the very same `HostError` on the way back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignError {
    pub message: String,
    pub origin: Option<u64>,
}

impl ForeignError {
    /// An error raised by foreign code itself.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: None,
        }
    }
}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ForeignError {}
