use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every timestamp in the ledger uses it.
pub type Ms = i64;

pub type ResourceId = Ulid;
pub type ReservationId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// How a resource decides whether a new claim fits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Exclusive over time: active windows may never overlap.
    #[default]
    Window,
    /// Countable units: active quantities may never sum past `capacity`.
    Pool { capacity: u32 },
}

impl Policy {
    pub fn capacity(&self) -> u32 {
        match self {
            Policy::Window => 1,
            Policy::Pool { capacity } => *capacity,
        }
    }
}

/// What a caller asks for. Raw integers so malformed input reaches validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Window { start: Ms, end: Ms },
    Quantity(i64),
}

/// What a reservation holds once its demand has been validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Claim {
    Window(Span),
    Quantity(u32),
}

impl Claim {
    pub fn span(&self) -> Option<Span> {
        match self {
            Claim::Window(span) => Some(*span),
            Claim::Quantity(_) => None,
        }
    }

    /// Units of capacity held. A window holds the whole (exclusive) resource.
    pub fn units(&self) -> u32 {
        match self {
            Claim::Window(_) => 1,
            Claim::Quantity(q) => *q,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    /// `pending -> confirmed` and `confirmed -> cancelled` are the only edges.
    /// A rejected pending reservation is dropped, never stored.
    pub fn can_become(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Confirmed)
                | (ReservationStatus::Confirmed, ReservationStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource_id: ResourceId,
    pub requester: String,
    pub claim: Claim,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
}

impl Reservation {
    pub fn pending(resource_id: ResourceId, requester: String, claim: Claim, now: Ms) -> Self {
        Self {
            id: Ulid::new(),
            resource_id,
            requester,
            claim,
            status: ReservationStatus::Pending,
            created_at: now,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != ReservationStatus::Cancelled
    }

    pub(crate) fn confirm(&mut self) {
        debug_assert!(self.status.can_become(ReservationStatus::Confirmed));
        self.status = ReservationStatus::Confirmed;
    }

    pub(crate) fn cancel(&mut self, at: Ms) {
        debug_assert!(self.status.can_become(ReservationStatus::Cancelled));
        self.status = ReservationStatus::Cancelled;
        self.cancelled_at = Some(at);
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: ResourceId,
    pub name: Option<String>,
    pub policy: Policy,
    /// Non-cancelled reservations. Window claims sorted by `span.start`,
    /// quantity claims in creation order.
    pub active: Vec<Reservation>,
    /// Cancelled records, kept so a second cancel is detected.
    pub cancelled: HashMap<ReservationId, Reservation>,
    /// Set under the lock when the resource is deleted; holders of a stale
    /// handle see it and treat the resource as gone.
    pub deleted: bool,
}

impl ResourceState {
    pub fn new(id: ResourceId, name: Option<String>, policy: Policy) -> Self {
        Self {
            id,
            name,
            policy,
            active: Vec::new(),
            cancelled: HashMap::new(),
            deleted: false,
        }
    }

    /// Insert an active reservation, keeping window claims ordered by start.
    pub fn insert_active(&mut self, reservation: Reservation) {
        match reservation.claim {
            Claim::Window(span) => {
                let pos = self
                    .active
                    .partition_point(|r| r.claim.span().is_some_and(|s| s.start <= span.start));
                self.active.insert(pos, reservation);
            }
            Claim::Quantity(_) => self.active.push(reservation),
        }
    }

    pub fn remove_active(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.active.iter().position(|r| r.id == id)?;
        Some(self.active.remove(pos))
    }

    /// Active window reservations whose span overlaps `query`.
    /// Everything starting at or after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .active
            .partition_point(|r| r.claim.span().is_some_and(|s| s.start < query.end));
        self.active[..right_bound]
            .iter()
            .filter(move |r| r.claim.span().is_some_and(|s| s.end > query.start))
    }

    /// Units held by active reservations.
    pub fn used(&self) -> u32 {
        self.active.iter().map(|r| r.claim.units()).sum()
    }

    pub fn remaining(&self) -> u32 {
        self.policy.capacity().saturating_sub(self.used())
    }
}

/// Journal record format. Replaying these in order rebuilds the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: ResourceId,
        name: Option<String>,
        policy: Policy,
    },
    ResourceDeleted {
        id: ResourceId,
    },
    ReservationConfirmed {
        reservation: Reservation,
    },
    /// All-or-nothing admission; one record so replay never sees half a batch.
    ReservationsConfirmed {
        reservations: Vec<Reservation>,
    },
    ReservationCancelled {
        id: ReservationId,
        resource_id: ResourceId,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub name: Option<String>,
    pub policy: Policy,
    pub active: usize,
    /// Unheld units; pools only.
    pub remaining: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(resource_id: ResourceId, start: Ms, end: Ms) -> Reservation {
        let mut r = Reservation::pending(resource_id, "alice".into(), Claim::Window(Span::new(start, end)), 0);
        r.confirm();
        r
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.overlaps(&Span::new(199, 200)));
        assert!(!s.overlaps(&Span::new(200, 201))); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn status_edges() {
        use ReservationStatus::*;
        assert!(Pending.can_become(Confirmed));
        assert!(Confirmed.can_become(Cancelled));
        assert!(!Pending.can_become(Cancelled));
        assert!(!Cancelled.can_become(Confirmed));
        assert!(!Cancelled.can_become(Cancelled));
    }

    #[test]
    fn window_reservations_kept_in_start_order() {
        let rid = Ulid::new();
        let mut rs = ResourceState::new(rid, None, Policy::Window);
        rs.insert_active(window(rid, 300, 400));
        rs.insert_active(window(rid, 100, 200));
        rs.insert_active(window(rid, 200, 300));
        let starts: Vec<Ms> = rs.active.iter().filter_map(|r| r.claim.span()).map(|s| s.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn quantity_reservations_kept_in_creation_order() {
        let rid = Ulid::new();
        let mut rs = ResourceState::new(rid, None, Policy::Pool { capacity: 10 });
        for q in [3, 1, 2] {
            let mut r = Reservation::pending(rid, "bob".into(), Claim::Quantity(q), 0);
            r.confirm();
            rs.insert_active(r);
        }
        let qs: Vec<u32> = rs.active.iter().map(|r| r.claim.units()).collect();
        assert_eq!(qs, vec![3, 1, 2]);
        assert_eq!(rs.used(), 6);
        assert_eq!(rs.remaining(), 4);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let rid = Ulid::new();
        let mut rs = ResourceState::new(rid, None, Policy::Window);
        let reservations: Vec<Reservation> = (0..3).map(|i| window(rid, i * 100, i * 100 + 50)).collect();
        let ids: Vec<ReservationId> = reservations.iter().map(|r| r.id).collect();
        for r in reservations {
            rs.insert_active(r);
        }
        assert!(rs.remove_active(ids[1]).is_some());
        assert_eq!(rs.active.len(), 2);
        assert_eq!(rs.active[0].id, ids[0]);
        assert_eq!(rs.active[1].id, ids[2]);
        assert!(rs.remove_active(ids[1]).is_none());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let rid = Ulid::new();
        let mut rs = ResourceState::new(rid, None, Policy::Window);
        rs.insert_active(window(rid, 100, 200));
        rs.insert_active(window(rid, 450, 600));
        rs.insert_active(window(rid, 1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].claim.span(), Some(Span::new(450, 600)));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let rid = Ulid::new();
        let mut rs = ResourceState::new(rid, None, Policy::Window);
        rs.insert_active(window(rid, 100, 200));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(rs.overlapping(&Span::new(0, 100)).count(), 0);
        assert_eq!(rs.overlapping(&Span::new(199, 300)).count(), 1);
    }

    #[test]
    fn reservation_renders_lowercase_status() {
        let r = window(Ulid::new(), 0, 10);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["claim"]["window"]["start"], 0);
        assert_eq!(json["claim"]["window"]["end"], 10);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationConfirmed {
            reservation: window(Ulid::new(), 5, 9),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
