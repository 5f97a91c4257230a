use crate::model::*;

use super::availability::{fits, free_runs, free_windows};
use super::store::check_bounds;
use super::{Engine, EngineError};

impl Engine {
    pub async fn read_range(
        &self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
    ) -> Result<Vec<SlotStatus>, EngineError> {
        self.company(company_id)?;
        let ledger = self.ledger.read().await;
        ledger.schedules.read_range(company_id, date, range)
    }

    /// One company's whole day plus its maximal free runs.
    pub async fn day_view(&self, company_id: &CompanyId, date: DateKey) -> Result<DayView, EngineError> {
        self.company(company_id)?;
        let ledger = self.ledger.read().await;
        let slots = ledger.schedules.statuses(company_id, date);
        let free_runs = free_runs(&slots);
        Ok(DayView {
            company_id: company_id.clone(),
            date,
            slots,
            free_runs,
        })
    }

    /// Per slot: is any company free? The client calendar overview.
    pub async fn combined_day(&self, date: DateKey) -> Vec<bool> {
        let ledger = self.ledger.read().await;
        let mut any_free = vec![false; self.grid().slot_count()];
        for company in self.companies() {
            let slots = ledger.schedules.statuses(&company.id, date);
            for (cell, status) in any_free.iter_mut().zip(slots) {
                *cell |= status == SlotStatus::Free;
            }
        }
        any_free
    }

    /// Every window of `duration_slots` that is free for at least one company.
    ///
    /// A snapshot: the result can go stale, and booking re-checks through `casRange`.
    pub async fn find_free_windows(
        &self,
        date: DateKey,
        duration_slots: usize,
    ) -> Result<Vec<FreeWindow>, EngineError> {
        if duration_slots == 0 {
            return Err(EngineError::InvalidRange("duration must be at least one slot"));
        }
        let ledger = self.ledger.read().await;
        let days = self.companies().iter().map(|c| {
            (
                &c.id,
                ledger.schedules.get(&c.id, date).map(|day| day.slots()),
            )
        });
        Ok(free_windows(days, self.grid().slot_count(), duration_slots))
    }

    /// Companies for which every cell of `range` is free, in configured order.
    pub async fn companies_free_for(
        &self,
        date: DateKey,
        range: SlotRange,
    ) -> Result<Vec<CompanyId>, EngineError> {
        check_bounds(range, self.grid().slot_count())?;
        let ledger = self.ledger.read().await;
        Ok(self
            .companies()
            .iter()
            .filter(|company| fits(&ledger.schedules.statuses(&company.id, date), range))
            .map(|company| company.id.clone())
            .collect())
    }

    pub async fn appointment(&self, id: AppointmentId) -> Result<Appointment, EngineError> {
        let ledger = self.ledger.read().await;
        ledger.appointment(id).cloned()
    }

    /// Matching appointments in id order, terminal ones included.
    pub async fn appointments(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let ledger = self.ledger.read().await;
        ledger
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    pub async fn request(&self, id: RequestId) -> Result<Request, EngineError> {
        let ledger = self.ledger.read().await;
        ledger.request(id).cloned()
    }

    /// All requests, newest first.
    pub async fn requests(&self) -> Vec<Request> {
        let ledger = self.ledger.read().await;
        ledger.requests.values().rev().cloned().collect()
    }
}
