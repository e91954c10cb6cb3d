// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tether core types and error definitions shared across all crates.

pub mod catalogue;
pub mod config;
pub mod error;
pub mod types;

pub use catalogue::{
    CapabilityDesc, CapabilityId, Catalogue, MethodDesc, Selector, SelectorRef, TypeDesc,
};
pub use config::{BridgeConfig, OverflowPolicy};
pub use error::{ForeignError, HostError, Result, TetherError};
pub use types::*;
