mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::free_within;
pub use error::{ErrorKind, LedgerError};
pub use mutations::BatchItem;

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::info;

use crate::journal::{FileJournal, Journal, NullJournal};
use crate::model::*;
use crate::notify::NotifyHub;

pub type SharedResourceState = Arc<Mutex<ResourceState>>;

/// Admission and cancellation of reservations against per-resource invariants.
pub trait ReservationLedger: Send + Sync {
    /// Admit `demand` on `resource_id` for `requester`, or reject it leaving
    /// the ledger unchanged.
    fn reserve(
        &self,
        resource_id: ResourceId,
        demand: Demand,
        requester: &str,
    ) -> Result<Reservation, LedgerError>;

    /// Cancel a confirmed reservation, releasing what it held.
    fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation, LedgerError>;

    /// Non-cancelled reservations of a resource: by start for windows,
    /// by creation for quantities.
    fn list_active(&self, resource_id: ResourceId) -> Result<Vec<Reservation>, LedgerError>;
}

pub struct Ledger {
    state: DashMap<ResourceId, SharedResourceState>,
    journal: Box<dyn Journal>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → resource id. Kept for cancelled
    /// reservations until their resource is deleted.
    reservation_to_resource: DashMap<ReservationId, ResourceId>,
    /// Serializes resource creation and deletion with each other.
    catalog: Mutex<()>,
    /// Held shared by every journaled mutation, exclusively by compaction,
    /// so the compacted snapshot never misses an append.
    compaction_gate: RwLock<()>,
}

/// Lock a resource. Mutations are applied only after every fallible step,
/// so a poisoned state is still consistent.
pub(crate) fn lock(rs: &SharedResourceState) -> MutexGuard<'_, ResourceState> {
    rs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply a reservation event directly to a ResourceState (caller holds the lock).
fn apply_to_resource(
    rs: &mut ResourceState,
    event: &Event,
    index: &DashMap<ReservationId, ResourceId>,
) {
    match event {
        Event::ReservationConfirmed { reservation } => {
            index.insert(reservation.id, reservation.resource_id);
            rs.insert_active(reservation.clone());
        }
        Event::ReservationsConfirmed { reservations } => {
            let id = rs.id;
            for reservation in reservations.iter().filter(|r| r.resource_id == id) {
                index.insert(reservation.id, reservation.resource_id);
                rs.insert_active(reservation.clone());
            }
        }
        Event::ReservationCancelled { id, at, .. } => {
            if let Some(mut reservation) = rs.remove_active(*id) {
                reservation.cancel(*at);
                rs.cancelled.insert(*id, reservation);
            }
        }
        // Resource lifecycle is handled at the DashMap level, not here.
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
    }
}

impl Ledger {
    /// A ledger that keeps nothing beyond process memory.
    pub fn in_memory() -> Self {
        Self::with_journal(Box::new(NullJournal::default()), &[], Arc::new(NotifyHub::new()))
    }

    /// Open a ledger journaled to the file at `path`, replaying its history.
    pub fn open(path: &Path, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (journal, history) = FileJournal::open(path)?;
        let ledger = Self::with_journal(Box::new(journal), &history, notify);
        info!(
            path = %path.display(),
            events = history.len(),
            resources = ledger.state.len(),
            "ledger opened"
        );
        Ok(ledger)
    }

    /// Build a ledger over `journal`, rebuilding state from `history`.
    pub fn with_journal(journal: Box<dyn Journal>, history: &[Event], notify: Arc<NotifyHub>) -> Self {
        let ledger = Self {
            state: DashMap::new(),
            journal,
            notify,
            reservation_to_resource: DashMap::new(),
            catalog: Mutex::new(()),
            compaction_gate: RwLock::new(()),
        };
        for event in history {
            ledger.replay(event);
        }
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(ledger.state.len() as f64);
        ledger
    }

    fn replay(&self, event: &Event) {
        match event {
            Event::ResourceCreated { id, name, policy } => {
                let rs = ResourceState::new(*id, name.clone(), *policy);
                self.state.insert(*id, Arc::new(Mutex::new(rs)));
            }
            Event::ResourceDeleted { id } => self.forget_resource(id),
            Event::ReservationsConfirmed { reservations } => {
                let mut resource_ids: Vec<ResourceId> =
                    reservations.iter().map(|r| r.resource_id).collect();
                resource_ids.sort();
                resource_ids.dedup();
                for resource_id in resource_ids {
                    if let Some(rs) = self.get_resource(&resource_id) {
                        apply_to_resource(&mut lock(&rs), event, &self.reservation_to_resource);
                    }
                }
            }
            other => {
                if let Some(resource_id) = event_resource_id(other)
                    && let Some(rs) = self.get_resource(&resource_id)
                {
                    apply_to_resource(&mut lock(&rs), other, &self.reservation_to_resource);
                }
            }
        }
    }

    pub(super) fn get_resource(&self, id: &ResourceId) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_resource_for_reservation(&self, id: &ReservationId) -> Option<ResourceId> {
        self.reservation_to_resource.get(id).map(|e| *e.value())
    }

    /// Remove a resource and every index entry pointing at it.
    fn forget_resource(&self, id: &ResourceId) {
        if let Some((_, rs)) = self.state.remove(id) {
            let guard = lock(&rs);
            for rid in guard.active.iter().map(|r| r.id).chain(guard.cancelled.keys().copied()) {
                self.reservation_to_resource.remove(&rid);
            }
        }
    }

    fn append(&self, event: &Event) -> Result<(), LedgerError> {
        self.journal.append(event).map_err(|e| {
            tracing::warn!(error = %e, "journal append failed");
            LedgerError::Journal(e.to_string())
        })
    }

    /// Journal-append + apply + notify in one call. Caller holds the resource
    /// lock and the compaction gate.
    pub(super) fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), LedgerError> {
        self.append(event)?;
        apply_to_resource(rs, event, &self.reservation_to_resource);
        self.notify.send(rs.id, event);
        Ok(())
    }

    pub(super) fn gate(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        self.compaction_gate.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReservationLedger for Ledger {
    fn reserve(
        &self,
        resource_id: ResourceId,
        demand: Demand,
        requester: &str,
    ) -> Result<Reservation, LedgerError> {
        self.admit(resource_id, demand, requester)
    }

    fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation, LedgerError> {
        self.revoke(reservation_id)
    }

    fn list_active(&self, resource_id: ResourceId) -> Result<Vec<Reservation>, LedgerError> {
        self.active_reservations(resource_id)
    }
}

/// Resource a single-resource event belongs to.
fn event_resource_id(event: &Event) -> Option<ResourceId> {
    match event {
        Event::ReservationConfirmed { reservation } => Some(reservation.resource_id),
        Event::ReservationCancelled { resource_id, .. } => Some(*resource_id),
        Event::ResourceCreated { id, .. } | Event::ResourceDeleted { id } => Some(*id),
        Event::ReservationsConfirmed { .. } => None,
    }
}
