use tracing::{debug, info};

use crate::model::*;

use super::{Effects, Engine, EngineError};

impl Engine {
    /// Create the day if absent. Idempotent; never mutates an existing day.
    pub async fn ensure_day(&self, company_id: &CompanyId, date: DateKey) -> Result<(), EngineError> {
        self.company(company_id)?;
        let mut ledger = self.ledger.write().await;
        if !ledger.schedules.contains(company_id, date) {
            ledger.schedules.ensure(company_id, date);
            self.commit(Effects::default());
        }
        Ok(())
    }

    /// Raw compare-and-set over one company's day. Contention is reported as `Conflict`.
    pub async fn cas_range(
        &self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
        expected: &[SlotStatus],
        new: SlotStatus,
    ) -> Result<(), EngineError> {
        self.company(company_id)?;
        let mut ledger = self.ledger.write().await;
        let mut fx = Effects::default();
        Self::transition(&mut ledger, &mut fx, company_id, date, range, expected, new)?;
        self.commit(fx);
        Ok(())
    }

    /// Block `Free` cells. Held or booked cells are never overwritten.
    pub async fn set_unavailable(
        &self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
    ) -> Result<(), EngineError> {
        self.toggle_availability(company_id, date, range, SlotStatus::Free, SlotStatus::Unavailable)
            .await
    }

    pub async fn set_available(
        &self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
    ) -> Result<(), EngineError> {
        self.toggle_availability(company_id, date, range, SlotStatus::Unavailable, SlotStatus::Free)
            .await
    }

    async fn toggle_availability(
        &self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
        from: SlotStatus,
        to: SlotStatus,
    ) -> Result<(), EngineError> {
        match self.cas_range(company_id, date, range, &[from], to).await {
            Ok(()) => {
                info!("{company_id} {date} {range} set {to}");
                Ok(())
            }
            Err(e) => {
                debug!("{company_id} {date} {range} not set {to}: {e}");
                Err(e)
            }
        }
    }
}
