// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error marshaller. Domain errors keep their identity across a round trip;
// bridge-level failures map to wire faults and back without ever turning
// into a domain error or a null.

use tether_core::{ForeignError, HostError, TetherError, WireFault};

/// Foreign-consumable form of a host error. Tags it with its identity so
/// `to_host` can restore the very same error.
pub fn to_foreign(err: &HostError) -> ForeignError {
    ForeignError {
        message: err.message().to_string(),
        origin: Some(err.id()),
    }
}

/// Host form of a foreign error. Errors that started on the host come back
/// as the original error; errors raised by foreign code get a fresh identity.
pub fn to_host(err: ForeignError) -> HostError {
    match err.origin {
        Some(id) => HostError::with_identity(id, err.message),
        None => HostError::new(err.message),
    }
}

pub fn to_foreign_opt(err: Option<&HostError>) -> Option<ForeignError> {
    err.map(to_foreign)
}

pub fn to_host_opt(err: Option<ForeignError>) -> Option<HostError> {
    err.map(to_host)
}

/// Wire form of a bridge error raised while serving a foreign call.
pub fn fault_from_error(err: TetherError) -> WireFault {
    match err {
        TetherError::Host(e) => WireFault::Domain(to_foreign(&e)),
        TetherError::StaleHandle(r) => WireFault::StaleHandle(r),
        TetherError::NullReceiver(method) => WireFault::NullReceiver(method),
        TetherError::NoSuchMethod {
            capability,
            selector,
        } => WireFault::NoSuchMethod {
            capability,
            selector,
        },
        TetherError::TypeMismatch { expected, got } => WireFault::TypeMismatch { expected, got },
        TetherError::ResourceExhausted { capacity } => WireFault::ResourceExhausted { capacity },
        TetherError::ShutDown => WireFault::ShutDown,
        TetherError::Internal(msg) => WireFault::Internal(msg),
        other => WireFault::Internal(other.to_string()),
    }
}

/// Host form of a fault reported by the foreign side.
pub fn error_from_fault(fault: WireFault) -> TetherError {
    match fault {
        WireFault::Domain(e) => TetherError::Host(to_host(e)),
        WireFault::StaleHandle(r) => TetherError::StaleHandle(r),
        WireFault::NullReceiver(method) => TetherError::NullReceiver(method),
        WireFault::NoSuchMethod {
            capability,
            selector,
        } => TetherError::NoSuchMethod {
            capability,
            selector,
        },
        WireFault::TypeMismatch { expected, got } => TetherError::TypeMismatch { expected, got },
        WireFault::ResourceExhausted { capacity } => TetherError::ResourceExhausted { capacity },
        WireFault::ShutDown => TetherError::ShutDown,
        WireFault::Internal(msg) => TetherError::Internal(msg),
    }
}

#[cfg(test)]
mod tests {
    use tether_core::WireRef;

    use super::*;

    #[test]
    fn host_error_round_trips_to_same_identity() {
        let err = HostError::new("some error");
        let back = to_host(to_foreign(&err));
        assert_eq!(back, err);
        assert_eq!(back.message(), "some error");
    }

    #[test]
    fn empty_message_round_trips_as_error() {
        let err = HostError::new("");
        let back = to_host_opt(to_foreign_opt(Some(&err)));
        assert_eq!(back, Some(err));
    }

    #[test]
    fn no_error_stays_no_error() {
        assert_eq!(to_host_opt(to_foreign_opt(None)), None);
    }

    #[test]
    fn foreign_raised_error_gets_new_identity() {
        let a = to_host(ForeignError::new("x"));
        let b = to_host(ForeignError::new("x"));
        assert_ne!(a, b);
    }

    #[test]
    fn bridge_faults_stay_distinct_from_domain_errors() {
        let stale = WireRef::from_raw(42);
        let fault = fault_from_error(TetherError::StaleHandle(stale));
        assert_eq!(fault, WireFault::StaleHandle(stale));
        assert!(matches!(
            error_from_fault(fault),
            TetherError::StaleHandle(r) if r == stale
        ));

        let domain = HostError::new("domain");
        let fault = fault_from_error(TetherError::Host(domain.clone()));
        assert!(matches!(&fault, WireFault::Domain(_)));
        assert!(matches!(error_from_fault(fault), TetherError::Host(e) if e == domain));
    }

    #[test]
    fn internal_fault_is_not_a_domain_error() {
        let err = error_from_fault(WireFault::Internal("call 3 dropped before completion".into()));
        assert!(err.as_host_error().is_none());
        assert!(matches!(&err, TetherError::Internal(m) if m.contains("dropped")));
        assert_eq!(
            fault_from_error(err),
            WireFault::Internal("call 3 dropped before completion".into())
        );

        let null = fault_from_error(TetherError::NullReceiver("S.String".into()));
        assert!(matches!(error_from_fault(null), TetherError::NullReceiver(m) if m == "S.String"));
    }
}
