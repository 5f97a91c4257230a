use std::sync::Arc;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::model::*;
use crate::snapshot::{DaySnapshot, Snapshot, SnapshotStore, SNAPSHOT_VERSION};

use super::ledger::Ledger;
use super::store::DaySchedule;
use super::{Collaborators, Engine, EngineError};

impl Engine {
    /// Consistent copy of the whole ledger, taken under the read lock.
    pub async fn snapshot(&self) -> Snapshot {
        let ledger = self.ledger.read().await;
        snapshot_of(&ledger)
    }

    /// Rebuild an engine from a saved snapshot.
    ///
    /// Slot arrays must match the configured grid. Id counters are advanced past every
    /// restored id so new records never reuse one.
    pub fn restore(
        config: EngineConfig,
        collab: Collaborators,
        snapshot: Snapshot,
    ) -> Result<Self, EngineError> {
        let grid = config.validate()?;
        let slot_count = grid.slot_count();
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(EngineError::Persistence(format!(
                "snapshot version {} is newer than supported version {SNAPSHOT_VERSION}",
                snapshot.version
            )));
        }

        for problem in inconsistencies(&snapshot) {
            warn!("snapshot inconsistency: {problem}");
        }

        let mut ledger = Ledger::new(slot_count);
        for day in snapshot.schedules {
            if day.slots.len() != slot_count {
                return Err(EngineError::InvalidConfig(format!(
                    "snapshot day {} {} has {} slots, grid has {slot_count}",
                    day.company_id,
                    day.date,
                    day.slots.len()
                )));
            }
            ledger
                .schedules
                .insert_day(day.company_id, day.date, DaySchedule::from_slots(day.slots));
        }
        for appt in snapshot.appointments {
            ledger.appointments.insert(appt.id, appt);
        }
        for req in snapshot.requests {
            ledger.requests.insert(req.id, req);
        }

        let max_appt = ledger.appointments.keys().next_back().map_or(0, |id| id.0);
        let max_req = ledger.requests.keys().next_back().map_or(0, |id| id.0);
        ledger.next_appointment_id = snapshot.next_appointment_id.max(max_appt + 1).max(1);
        ledger.next_request_id = snapshot.next_request_id.max(max_req + 1).max(1);

        info!(
            "restored {} days, {} appointments, {} requests",
            ledger.schedules.day_count(),
            ledger.appointments.len(),
            ledger.requests.len()
        );
        Ok(Self::with_ledger(config, grid, ledger, collab))
    }

    /// Save if anything committed since the last save. Returns whether a save happened.
    pub async fn save_to(&self, store: Arc<dyn SnapshotStore>) -> Result<bool, EngineError> {
        let (snapshot, at) = {
            let ledger = self.ledger.read().await;
            // mutations only move under the write lock, so this count matches the copy
            let at = self.mutation_count();
            if self.mutations_since_save() == 0 {
                return Ok(false);
            }
            (snapshot_of(&ledger), at)
        };
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        self.mark_saved(at);
        Ok(true)
    }
}

fn snapshot_of(ledger: &Ledger) -> Snapshot {
    let mut schedules: Vec<DaySnapshot> = ledger
        .schedules
        .iter()
        .map(|(company_id, date, day)| DaySnapshot {
            company_id: company_id.clone(),
            date,
            slots: day.slots().to_vec(),
        })
        .collect();
    schedules.sort_by(|a, b| (&a.company_id, a.date).cmp(&(&b.company_id, b.date)));
    Snapshot {
        version: SNAPSHOT_VERSION,
        schedules,
        appointments: ledger.appointments.values().cloned().collect(),
        requests: ledger.requests.values().cloned().collect(),
        next_appointment_id: ledger.next_appointment_id,
        next_request_id: ledger.next_request_id,
    }
}

/// Appointments and request holds that claim cells which do not back them.
pub(crate) fn inconsistencies(snapshot: &Snapshot) -> Vec<String> {
    let status_at = |company: &CompanyId, date: DateKey, i: usize| {
        snapshot
            .schedules
            .iter()
            .find(|d| &d.company_id == company && d.date == date)
            .and_then(|d| d.slots.get(i).copied())
            .unwrap_or(SlotStatus::Free)
    };
    let mut problems = Vec::new();
    for appt in &snapshot.appointments {
        if let Some(expected) = appt.status.slot_status() {
            for i in appt.range.indices() {
                let actual = status_at(&appt.company_id, appt.date, i);
                if actual != expected {
                    problems.push(format!(
                        "appointment {} expects slot {i} {expected}, found {actual}",
                        appt.id
                    ));
                }
            }
        }
    }
    for req in &snapshot.requests {
        if let Some(hold) = &req.hold {
            for i in hold.range.indices() {
                let actual = status_at(&hold.company_id, hold.date, i);
                if actual != SlotStatus::Held {
                    problems.push(format!(
                        "request {} expects slot {i} HELD, found {actual}",
                        req.id
                    ));
                }
            }
        }
    }
    problems
}
