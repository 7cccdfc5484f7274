use crate::limits::*;
use crate::model::*;

use super::LedgerError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

pub(crate) fn validate_requester(requester: &str) -> Result<(), LedgerError> {
    if requester.is_empty() {
        return Err(LedgerError::InvalidRequest("requester must not be empty"));
    }
    if requester.len() > MAX_REQUESTER_LEN {
        return Err(LedgerError::LimitExceeded("requester too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, LedgerError> {
    if start >= end {
        return Err(LedgerError::InvalidRequest("window start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(LedgerError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(LedgerError::LimitExceeded("window too wide"));
    }
    Ok(span)
}

/// Turn a raw demand into the claim the resource's policy understands.
pub(crate) fn validate_demand(policy: &Policy, demand: Demand) -> Result<Claim, LedgerError> {
    match (policy, demand) {
        (Policy::Window, Demand::Window { start, end }) => {
            validate_window(start, end).map(Claim::Window)
        }
        (Policy::Pool { .. }, Demand::Quantity(q)) => {
            if q <= 0 {
                return Err(LedgerError::InvalidRequest("quantity must be positive"));
            }
            // Anything past u32 can never fit; let the capacity check reject it.
            Ok(Claim::Quantity(u32::try_from(q).unwrap_or(u32::MAX)))
        }
        (Policy::Window, Demand::Quantity(_)) => Err(LedgerError::InvalidRequest(
            "quantity demand on a window resource",
        )),
        (Policy::Pool { .. }, Demand::Window { .. }) => Err(LedgerError::InvalidRequest(
            "window demand on a pool resource",
        )),
    }
}

/// Reject `claim` if admitting it would break the resource's invariant.
/// Half-open throughout: a window ending at T and one starting at T coexist.
pub(crate) fn check_no_conflict(rs: &ResourceState, claim: &Claim) -> Result<(), LedgerError> {
    if rs.active.len() >= MAX_ACTIVE_PER_RESOURCE {
        return Err(LedgerError::LimitExceeded("too many active reservations on resource"));
    }
    match claim {
        Claim::Window(span) => {
            if let Some(existing) = rs.overlapping(span).next() {
                return Err(LedgerError::Conflict(existing.id));
            }
        }
        Claim::Quantity(requested) => {
            let remaining = rs.remaining();
            if *requested > remaining {
                return Err(LedgerError::CapacityExceeded {
                    requested: *requested,
                    remaining,
                });
            }
        }
    }
    Ok(())
}

/// Check `claim` against claims already accepted earlier in the same batch
/// for the same resource (which are not yet in `rs`).
pub(crate) fn check_no_conflict_within_batch(
    rs: &ResourceState,
    claim: &Claim,
    accepted: &[(ReservationId, Claim)],
) -> Result<(), LedgerError> {
    if rs.active.len() + accepted.len() >= MAX_ACTIVE_PER_RESOURCE {
        return Err(LedgerError::LimitExceeded("too many active reservations on resource"));
    }
    match claim {
        Claim::Window(span) => {
            for (id, other) in accepted {
                if other.span().is_some_and(|s| s.overlaps(span)) {
                    return Err(LedgerError::Conflict(*id));
                }
            }
        }
        Claim::Quantity(requested) => {
            let pending: u32 = accepted.iter().map(|(_, c)| c.units()).sum();
            let remaining = rs.remaining().saturating_sub(pending);
            if *requested > remaining {
                return Err(LedgerError::CapacityExceeded {
                    requested: *requested,
                    remaining,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;

    fn pool(capacity: u32, held: &[u32]) -> ResourceState {
        let rid = Ulid::new();
        let mut rs = ResourceState::new(rid, None, Policy::Pool { capacity });
        for q in held {
            let mut r = Reservation::pending(rid, "x".into(), Claim::Quantity(*q), 0);
            r.confirm();
            rs.insert_active(r);
        }
        rs
    }

    #[test]
    fn window_must_be_ordered() {
        assert!(matches!(validate_window(10, 10), Err(LedgerError::InvalidRequest(_))));
        assert!(matches!(validate_window(11, 10), Err(LedgerError::InvalidRequest(_))));
        assert_eq!(validate_window(10, 11).unwrap(), Span::new(10, 11));
    }

    #[test]
    fn window_limits() {
        assert!(matches!(validate_window(-5, 10), Err(LedgerError::LimitExceeded(_))));
        assert!(matches!(
            validate_window(0, MAX_SPAN_DURATION_MS + 1),
            Err(LedgerError::LimitExceeded("window too wide"))
        ));
    }

    #[test]
    fn demand_must_match_policy() {
        assert!(matches!(
            validate_demand(&Policy::Window, Demand::Quantity(1)),
            Err(LedgerError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_demand(&Policy::Pool { capacity: 4 }, Demand::Window { start: 0, end: H }),
            Err(LedgerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn quantity_must_be_positive() {
        let policy = Policy::Pool { capacity: 2 };
        for q in [0, -1, i64::MIN] {
            assert!(matches!(
                validate_demand(&policy, Demand::Quantity(q)),
                Err(LedgerError::InvalidRequest(_))
            ));
        }
        assert_eq!(validate_demand(&policy, Demand::Quantity(2)).unwrap(), Claim::Quantity(2));
    }

    #[test]
    fn huge_quantity_becomes_capacity_conflict() {
        let rs = pool(2, &[]);
        let claim = validate_demand(&rs.policy, Demand::Quantity(i64::MAX)).unwrap();
        assert!(matches!(
            check_no_conflict(&rs, &claim),
            Err(LedgerError::CapacityExceeded { remaining: 2, .. })
        ));
    }

    #[test]
    fn pool_fills_exactly_to_capacity() {
        let rs = pool(5, &[2, 1]);
        assert!(check_no_conflict(&rs, &Claim::Quantity(2)).is_ok());
        assert!(matches!(
            check_no_conflict(&rs, &Claim::Quantity(3)),
            Err(LedgerError::CapacityExceeded { requested: 3, remaining: 2 })
        ));
    }

    #[test]
    fn batch_members_see_each_other() {
        let rs = pool(5, &[1]);
        let accepted = vec![(Ulid::new(), Claim::Quantity(3))];
        assert!(check_no_conflict_within_batch(&rs, &Claim::Quantity(1), &accepted).is_ok());
        assert!(check_no_conflict_within_batch(&rs, &Claim::Quantity(2), &accepted).is_err());

        let window_rs = ResourceState::new(Ulid::new(), None, Policy::Window);
        let first = Ulid::new();
        let accepted = vec![(first, Claim::Window(Span::new(0, H)))];
        assert!(check_no_conflict_within_batch(&window_rs, &Claim::Window(Span::new(H, 2 * H)), &accepted).is_ok());
        assert!(matches!(
            check_no_conflict_within_batch(&window_rs, &Claim::Window(Span::new(H / 2, 2 * H)), &accepted),
            Err(LedgerError::Conflict(id)) if id == first
        ));
    }
}
