//! In-memory store: a mutex over the full record set.
//!
//! Each transaction stages a clone of the state and swaps it in on success,
//! so a closure that fails midway leaves nothing behind. Holding the mutex
//! for the duration of the closure serializes all transactions, which is the
//! isolation the contract asks for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::types::{Agency, Incident, IncidentStatus, Responder, ResponderStatus};
use super::{Store, StoreError, StoreResult, StoreTxn};

#[derive(Debug, Clone, Default)]
struct Records {
    incidents: HashMap<String, Incident>,
    responders: HashMap<String, Responder>,
    agencies: HashMap<String, Agency>,
}

impl StoreTxn for Records {
    fn incident(&self, id: &str) -> StoreResult<Incident> {
        self.incidents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::IncidentNotFound(id.to_string()))
    }

    fn put_incident(&mut self, incident: Incident) {
        self.incidents.insert(incident.id.clone(), incident);
    }

    fn responder(&self, id: &str) -> StoreResult<Responder> {
        self.responders
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ResponderNotFound(id.to_string()))
    }

    fn put_responder(&mut self, responder: Responder) {
        self.responders.insert(responder.id.clone(), responder);
    }

    fn agency(&self, id: &str) -> StoreResult<Agency> {
        self.agencies
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::AgencyNotFound(id.to_string()))
    }

    fn put_agency(&mut self, agency: Agency) {
        self.agencies.insert(agency.id.clone(), agency);
    }

    fn active_agencies(&self) -> Vec<Agency> {
        let mut agencies: Vec<Agency> =
            self.agencies.values().filter(|a| a.active).cloned().collect();
        agencies.sort_by(|a, b| a.id.cmp(&b.id));
        agencies
    }

    fn available_responders(&self) -> Vec<Responder> {
        let mut responders: Vec<Responder> = self
            .responders
            .values()
            .filter(|r| r.status == ResponderStatus::Available)
            .cloned()
            .collect();
        responders.sort_by(|a, b| a.id.cmp(&b.id));
        responders
    }

    fn incidents_in_status(&self, statuses: &[IncidentStatus]) -> Vec<Incident> {
        let mut incidents: Vec<Incident> = self
            .incidents
            .values()
            .filter(|i| statuses.contains(&i.status))
            .cloned()
            .collect();
        incidents.sort_by(|a, b| a.id.cmp(&b.id));
        incidents
    }

    fn responders_silent_since(&self, cutoff: DateTime<Utc>) -> Vec<Responder> {
        let mut responders: Vec<Responder> = self
            .responders
            .values()
            .filter(|r| r.status != ResponderStatus::Offline && r.last_seen_at < cutoff)
            .cloned()
            .collect();
        responders.sort_by(|a, b| a.id.cmp(&b.id));
        responders
    }
}

/// Mutex-guarded in-memory implementation of the storage contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Store for MemoryStore {
    fn with_txn<R, E: From<StoreError>>(
        &self,
        f: &mut dyn FnMut(&mut dyn StoreTxn) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| E::from(StoreError::LockPoisoned))?;
        let mut staged = guard.clone();
        let result = f(&mut staged)?;
        *guard = staged;
        Ok(result)
    }

    fn with_read<R, E: From<StoreError>>(
        &self,
        f: &mut dyn FnMut(&dyn StoreTxn) -> Result<R, E>,
    ) -> Result<R, E> {
        let guard = self
            .records
            .lock()
            .map_err(|_| E::from(StoreError::LockPoisoned))?;
        f(&*guard)
    }
}
