use crate::limits::*;
use crate::model::*;

use super::availability::free_within;
use super::{Ledger, LedgerError, lock};

impl Ledger {
    pub(super) fn active_reservations(
        &self,
        resource_id: ResourceId,
    ) -> Result<Vec<Reservation>, LedgerError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(LedgerError::NotFound(resource_id))?;
        let guard = lock(&rs);
        if guard.deleted {
            return Err(LedgerError::NotFound(resource_id));
        }
        Ok(guard.active.clone())
    }

    /// Any reservation the ledger still knows about, cancelled ones included.
    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        let resource_id = self
            .get_resource_for_reservation(&id)
            .ok_or(LedgerError::NotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(LedgerError::NotFound(id))?;
        let guard = lock(&rs);
        guard
            .active
            .iter()
            .find(|r| r.id == id)
            .or_else(|| guard.cancelled.get(&id))
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    pub fn resource_count(&self) -> usize {
        self.state.len()
    }

    /// Summaries of every resource, ordered by id.
    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        // Clone handles first: never wait on a resource lock while holding a map shard.
        let mut handles: Vec<_> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
            .iter()
            .filter_map(|(_, rs)| {
                let guard = lock(rs);
                if guard.deleted {
                    return None;
                }
                Some(ResourceInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    policy: guard.policy,
                    active: guard.active.len(),
                    remaining: match guard.policy {
                        Policy::Pool { .. } => Some(guard.remaining()),
                        Policy::Window => None,
                    },
                })
            })
            .collect()
    }

    /// Sub-spans of `[start, end)` not held by any active reservation of a
    /// window resource.
    pub fn free_windows(
        &self,
        resource_id: ResourceId,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Span>, LedgerError> {
        if start >= end {
            return Err(LedgerError::InvalidRequest("query start must be before end"));
        }
        if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
            return Err(LedgerError::LimitExceeded("timestamp out of range"));
        }
        if end - start > MAX_QUERY_WINDOW_MS {
            return Err(LedgerError::LimitExceeded("query window too wide"));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(LedgerError::NotFound(resource_id))?;
        let guard = lock(&rs);
        if guard.deleted {
            return Err(LedgerError::NotFound(resource_id));
        }
        if guard.policy != Policy::Window {
            return Err(LedgerError::InvalidRequest("free windows of a pool resource"));
        }

        let query = Span::new(start, end);
        let busy: Vec<Span> = guard
            .overlapping(&query)
            .filter_map(|r| r.claim.span())
            .collect();
        Ok(free_within(query, &busy))
    }

    /// Units of a pool resource not held by any active reservation.
    pub fn remaining(&self, resource_id: ResourceId) -> Result<u32, LedgerError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(LedgerError::NotFound(resource_id))?;
        let guard = lock(&rs);
        if guard.deleted {
            return Err(LedgerError::NotFound(resource_id));
        }
        match guard.policy {
            Policy::Pool { .. } => Ok(guard.remaining()),
            Policy::Window => Err(LedgerError::InvalidRequest("remaining units of a window resource")),
        }
    }
}
