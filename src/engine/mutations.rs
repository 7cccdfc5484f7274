use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::observability::*;

use super::conflict::{
    check_no_conflict, check_no_conflict_within_batch, now_ms, validate_demand, validate_requester,
};
use super::{Ledger, LedgerError, apply_to_resource, lock};

/// One member of an all-or-nothing batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub resource_id: ResourceId,
    pub demand: Demand,
    pub requester: String,
}

impl Ledger {
    pub fn create_resource(
        &self,
        id: ResourceId,
        name: Option<String>,
        policy: Policy,
    ) -> Result<(), LedgerError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(LedgerError::LimitExceeded("resource name too long"));
        }
        if let Policy::Pool { capacity } = policy {
            if capacity == 0 {
                return Err(LedgerError::InvalidRequest("pool capacity must be positive"));
            }
            if capacity > MAX_POOL_CAPACITY {
                return Err(LedgerError::LimitExceeded("pool capacity too large"));
            }
        }

        let _gate = self.gate();
        let _catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.len() >= MAX_RESOURCES {
            return Err(LedgerError::LimitExceeded("too many resources"));
        }
        if self.state.contains_key(&id) {
            return Err(LedgerError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated { id, name: name.clone(), policy };
        self.append(&event)?;
        let rs = ResourceState::new(id, name, policy);
        self.state.insert(id, Arc::new(Mutex::new(rs)));
        self.notify.send(id, &event);
        metrics::gauge!(RESOURCES_ACTIVE).set(self.state.len() as f64);
        info!(resource = %id, policy = policy_label(&policy), "resource created");
        Ok(())
    }

    /// Delete a resource that holds no active reservations. Its cancelled
    /// records go with it.
    pub fn delete_resource(&self, id: ResourceId) -> Result<(), LedgerError> {
        let _gate = self.gate();
        let _catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        let rs = self.get_resource(&id).ok_or(LedgerError::NotFound(id))?;

        let event = Event::ResourceDeleted { id };
        {
            let mut guard = lock(&rs);
            if !guard.active.is_empty() {
                return Err(LedgerError::InUse(id));
            }
            self.append(&event)?;
            // Anyone already holding this handle fails with NotFound from here on.
            guard.deleted = true;
        }
        self.forget_resource(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        metrics::gauge!(RESOURCES_ACTIVE).set(self.state.len() as f64);
        info!(resource = %id, "resource deleted");
        Ok(())
    }

    pub(super) fn admit(
        &self,
        resource_id: ResourceId,
        demand: Demand,
        requester: &str,
    ) -> Result<Reservation, LedgerError> {
        let start = Instant::now();
        let result = self.try_admit(resource_id, demand, requester);
        metrics::histogram!(ADMISSION_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        match &result {
            Ok(reservation) => {
                debug!(resource = %resource_id, reservation = %reservation.id, requester, "reservation admitted");
            }
            Err(e) => {
                metrics::counter!(RESERVATIONS_REJECTED_TOTAL, "reason" => e.label()).increment(1);
                debug!(resource = %resource_id, requester, error = %e, "reservation rejected");
            }
        }
        result
    }

    fn try_admit(
        &self,
        resource_id: ResourceId,
        demand: Demand,
        requester: &str,
    ) -> Result<Reservation, LedgerError> {
        validate_requester(requester)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(LedgerError::NotFound(resource_id))?;

        let _gate = self.gate();
        let mut guard = lock(&rs);
        if guard.deleted {
            return Err(LedgerError::NotFound(resource_id));
        }
        let claim = validate_demand(&guard.policy, demand)?;
        check_no_conflict(&guard, &claim)?;

        let mut reservation = Reservation::pending(resource_id, requester.to_string(), claim, now_ms());
        reservation.confirm();
        let event = Event::ReservationConfirmed {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event)?;
        metrics::counter!(RESERVATIONS_ADMITTED_TOTAL, "policy" => policy_label(&guard.policy))
            .increment(1);
        Ok(reservation)
    }

    pub(super) fn revoke(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        let result = self.try_revoke(id);
        match &result {
            Ok(reservation) => {
                metrics::counter!(RESERVATIONS_CANCELLED_TOTAL).increment(1);
                debug!(resource = %reservation.resource_id, reservation = %id, "reservation cancelled");
            }
            Err(e) => debug!(reservation = %id, error = %e, "cancel rejected"),
        }
        result
    }

    fn try_revoke(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        let resource_id = self
            .get_resource_for_reservation(&id)
            .ok_or(LedgerError::NotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(LedgerError::NotFound(id))?;

        let _gate = self.gate();
        let mut guard = lock(&rs);
        if guard.deleted {
            return Err(LedgerError::NotFound(id));
        }
        if guard.cancelled.contains_key(&id) {
            return Err(LedgerError::AlreadyCancelled(id));
        }
        if !guard.active.iter().any(|r| r.id == id) {
            return Err(LedgerError::NotFound(id));
        }

        let event = Event::ReservationCancelled {
            id,
            resource_id,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event)?;
        guard
            .cancelled
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    /// Atomically admit several demands, possibly across resources.
    /// All-or-nothing: if any member is rejected, none are committed.
    pub fn reserve_all(&self, items: Vec<BatchItem>) -> Result<Vec<Reservation>, LedgerError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if items.len() > MAX_BATCH_SIZE {
            return Err(LedgerError::LimitExceeded("batch too large"));
        }
        for item in &items {
            validate_requester(&item.requester)?;
        }

        // Lock in sorted order to prevent deadlocks between overlapping batches.
        let mut resource_ids: Vec<ResourceId> = items.iter().map(|i| i.resource_id).collect();
        resource_ids.sort();
        resource_ids.dedup();

        let handles = resource_ids
            .iter()
            .map(|rid| self.get_resource(rid).ok_or(LedgerError::NotFound(*rid)))
            .collect::<Result<Vec<_>, _>>()?;

        let _gate = self.gate();
        let mut guards: Vec<_> = handles.iter().map(lock).collect();
        for (guard, rid) in guards.iter().zip(&resource_ids) {
            if guard.deleted {
                return Err(LedgerError::NotFound(*rid));
            }
        }
        let slot = |rid: &ResourceId| resource_ids.binary_search(rid).unwrap_or_else(|pos| pos);

        // Phase 1: validate against current state and earlier batch members.
        let now = now_ms();
        let mut accepted: Vec<Vec<(ReservationId, Claim)>> = vec![Vec::new(); resource_ids.len()];
        let mut reservations = Vec::with_capacity(items.len());
        for item in items {
            let idx = slot(&item.resource_id);
            let guard = &guards[idx];
            let claim = validate_demand(&guard.policy, item.demand)?;
            check_no_conflict(guard, &claim)?;
            check_no_conflict_within_batch(guard, &claim, &accepted[idx])?;

            let mut reservation = Reservation::pending(item.resource_id, item.requester, claim, now);
            reservation.confirm();
            accepted[idx].push((reservation.id, claim));
            reservations.push(reservation);
        }

        // Phase 2: one journal record for the whole batch, then apply everywhere.
        let event = Event::ReservationsConfirmed {
            reservations: reservations.clone(),
        };
        self.append(&event)?;
        for guard in guards.iter_mut() {
            apply_to_resource(guard, &event, &self.reservation_to_resource);
            self.notify.send(guard.id, &event);
        }

        metrics::counter!(RESERVATIONS_ADMITTED_TOTAL, "policy" => "batch")
            .increment(reservations.len() as u64);
        debug!(count = reservations.len(), resources = resource_ids.len(), "batch admitted");
        Ok(reservations)
    }

    /// Rewrite the journal down to the events that recreate the current state.
    pub fn compact(&self) -> Result<(), LedgerError> {
        // Exclusive: no mutation may append between snapshot and rewrite.
        let _gate = self
            .compaction_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut handles: Vec<_> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        let mut events = Vec::new();
        for (_, rs) in &handles {
            let guard = lock(rs);
            events.push(Event::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                policy: guard.policy,
            });
            let mut cancelled: Vec<&Reservation> = guard.cancelled.values().collect();
            cancelled.sort_by_key(|r| r.id);
            for r in cancelled {
                let mut confirmed = r.clone();
                confirmed.status = ReservationStatus::Confirmed;
                confirmed.cancelled_at = None;
                events.push(Event::ReservationConfirmed { reservation: confirmed });
                events.push(Event::ReservationCancelled {
                    id: r.id,
                    resource_id: r.resource_id,
                    at: r.cancelled_at.unwrap_or(r.created_at),
                });
            }
            for r in &guard.active {
                events.push(Event::ReservationConfirmed { reservation: r.clone() });
            }
        }

        let result = self.journal.compact(&events);
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(JOURNAL_COMPACTIONS_TOTAL, "status" => status).increment(1);
        result?;
        info!(events = events.len(), resources = handles.len(), "journal compacted");
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact()
    }
}
