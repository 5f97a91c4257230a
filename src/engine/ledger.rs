use std::collections::BTreeMap;

use crate::model::*;

use super::error::Entity;
use super::store::ScheduleStore;
use super::EngineError;

/// The whole mutable state: schedules plus the records that point into them.
///
/// Appointment/request records and the cells they occupy are two views of one fact, so
/// the ledger is only ever mutated as a unit under the engine's write lock.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub(crate) schedules: ScheduleStore,
    pub(crate) appointments: BTreeMap<AppointmentId, Appointment>,
    pub(crate) requests: BTreeMap<RequestId, Request>,
    pub(crate) next_appointment_id: u64,
    pub(crate) next_request_id: u64,
}

impl Ledger {
    pub fn new(slot_count: usize) -> Self {
        Self {
            schedules: ScheduleStore::new(slot_count),
            appointments: BTreeMap::new(),
            requests: BTreeMap::new(),
            next_appointment_id: 1,
            next_request_id: 1,
        }
    }

    pub(crate) fn allocate_appointment_id(&mut self) -> AppointmentId {
        let id = AppointmentId(self.next_appointment_id);
        self.next_appointment_id += 1;
        id
    }

    pub(crate) fn allocate_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    pub fn appointment(&self, id: AppointmentId) -> Result<&Appointment, EngineError> {
        self.appointments
            .get(&id)
            .ok_or(EngineError::NotFound(Entity::Appointment(id)))
    }

    pub(crate) fn appointment_mut(&mut self, id: AppointmentId) -> Result<&mut Appointment, EngineError> {
        self.appointments
            .get_mut(&id)
            .ok_or(EngineError::NotFound(Entity::Appointment(id)))
    }

    pub fn request(&self, id: RequestId) -> Result<&Request, EngineError> {
        self.requests
            .get(&id)
            .ok_or(EngineError::NotFound(Entity::Request(id)))
    }

    pub(crate) fn request_mut(&mut self, id: RequestId) -> Result<&mut Request, EngineError> {
        self.requests
            .get_mut(&id)
            .ok_or(EngineError::NotFound(Entity::Request(id)))
    }

    /// Cells a request currently owns: its hold and a still-held proposed appointment.
    pub(crate) fn owned_cells(&self, request: &Request) -> Vec<(CompanyId, DateKey, SlotRange)> {
        let mut owned = Vec::new();
        if let Some(hold) = &request.hold {
            owned.push((hold.company_id.clone(), hold.date, hold.range));
        }
        if let Some(appt) = request
            .appointment_id
            .and_then(|id| self.appointments.get(&id))
            .filter(|a| a.status == AppointmentStatus::Held)
        {
            owned.push((appt.company_id.clone(), appt.date, appt.range));
        }
        owned
    }

    /// Indices of `range` that are neither `Free` nor `Held` by one of `owned`.
    pub(crate) fn blocked_cells(
        &self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
        owned: &[(CompanyId, DateKey, SlotRange)],
    ) -> Result<Vec<usize>, EngineError> {
        let statuses = self.schedules.read_range(company_id, date, range)?;
        Ok(range
            .indices()
            .zip(statuses)
            .filter(|(i, status)| match status {
                SlotStatus::Free => false,
                SlotStatus::Held => !owned
                    .iter()
                    .any(|(c, d, r)| c == company_id && *d == date && r.contains(*i)),
                _ => true,
            })
            .map(|(i, _)| i)
            .collect())
    }
}
