// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Null Guard: the single place where "no object" is mapped to and from the
// wire. `WireRef::NULL` is never issued for a live object, and decoding it
// never consults a handle table.

use tether_core::WireRef;
use tether_core::error::Result;

use crate::handle_table::{Handle, HandleTable};

/// Register `value` (if any) and return its wire key. Absent encodes as
/// `WireRef::NULL` without touching the table.
pub fn encode<T: Clone>(table: &HandleTable<T>, value: Option<T>) -> Result<WireRef> {
    match value {
        None => Ok(WireRef::NULL),
        Some(value) => Ok(table.register(value)?.to_wire()),
    }
}

/// Resolve `wire` back to its value. `WireRef::NULL` yields `Ok(None)`
/// without a lookup; a stale key is an error, never a silent null.
pub fn decode<T: Clone>(table: &HandleTable<T>, wire: WireRef) -> Result<Option<T>> {
    match Handle::from_wire(wire) {
        None => Ok(None),
        Some(handle) => table.resolve(handle).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use tether_core::TetherError;

    use super::*;

    #[test]
    fn absent_round_trips_without_lookup() {
        let table: HandleTable<&str> = HandleTable::new(2, 8);
        let wire = encode(&table, None).expect("encode null");
        assert!(wire.is_null());
        assert_eq!(decode(&table, wire).expect("decode null"), None);
        assert_eq!(table.resolve_count(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn present_value_round_trips() {
        let table = HandleTable::new(2, 8);
        let wire = encode(&table, Some("x")).expect("encode");
        assert!(!wire.is_null());
        assert_eq!(decode(&table, wire).expect("decode"), Some("x"));
    }

    #[test]
    fn stale_key_is_not_null() {
        let table = HandleTable::new(1, 8);
        let wire = encode(&table, Some(5)).expect("encode");
        let handle = Handle::from_wire(wire).expect("live handle");
        table.release(handle);
        assert!(matches!(
            decode(&table, wire),
            Err(TetherError::StaleHandle(w)) if w == wire
        ));
    }
}
