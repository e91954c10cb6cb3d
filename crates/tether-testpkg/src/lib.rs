// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Probe package: fixture capabilities and functions that exercise every
// guarantee of the bridge (identity, nulls, callbacks from any thread,
// lifetime coordination, error translation) from the foreign side.

pub mod glue;
pub mod package;
pub mod scenarios;
pub mod types;

pub use package::Package;
pub use scenarios::{Harness, ScenarioError, ScenarioResult};

use tether_core::Catalogue;
use tether_core::error::Result;

const CATALOGUE_JSON: &str = include_str!("catalogue.json");

/// The package's capability catalogue, as the binding generator emits it.
pub fn catalogue() -> Result<Catalogue> {
    Catalogue::from_json(CATALOGUE_JSON)
}
