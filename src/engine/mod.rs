mod appointments;
mod availability;
mod error;
mod ledger;
mod persist;
mod queries;
mod requests;
mod schedule;
mod store;
mod sweep;
mod validate;
#[cfg(test)]
mod tests;

pub use availability::{fits, free_runs, free_windows};
pub use error::{EngineError, Entity};
pub use ledger::Ledger;
pub use store::{DaySchedule, ScheduleStore};
pub use sweep::{HoldRef, SweepReport};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::catalog::{DemoCatalog, ServiceCatalog};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::grid::TimeGrid;
use crate::model::*;
use crate::notify::{Notification, NotificationKind, NotifyHub, Outbox};

/// Everything the engine talks to but does not own.
pub struct Collaborators {
    pub catalog: Arc<dyn ServiceCatalog>,
    pub clock: Arc<dyn Clock>,
    pub outbox: Outbox,
    pub notify: Arc<NotifyHub>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            catalog: Arc::new(DemoCatalog),
            clock: Arc::new(SystemClock),
            outbox: Outbox::disconnected(),
            notify: Arc::new(NotifyHub::new()),
        }
    }
}

/// The single authoritative store.
///
/// All schedule, appointment and request writes go through `ledger`'s write lock, so each
/// multi-field mutation (cells + record + deadline) is one indivisible unit. Effects are
/// published before the lock is released, which keeps event order equal to commit order.
pub struct Engine {
    config: EngineConfig,
    grid: TimeGrid,
    pub(super) ledger: RwLock<Ledger>,
    catalog: Arc<dyn ServiceCatalog>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
    pub notify: Arc<NotifyHub>,
    /// Commits since start.
    mutations: AtomicU64,
    /// Value of `mutations` covered by the last successful save.
    saved_mutations: AtomicU64,
}

/// Side effects of one committed mutation, published together.
#[derive(Debug, Default)]
pub(super) struct Effects {
    pub changes: Vec<ScheduleChange>,
    pub notifications: Vec<Notification>,
}

impl Engine {
    pub fn new(config: EngineConfig, collab: Collaborators) -> Result<Self, EngineError> {
        let grid = config.validate()?;
        Ok(Self::with_ledger(config, grid, Ledger::new(grid.slot_count()), collab))
    }

    pub(super) fn with_ledger(
        config: EngineConfig,
        grid: TimeGrid,
        ledger: Ledger,
        collab: Collaborators,
    ) -> Self {
        Self {
            config,
            grid,
            ledger: RwLock::new(ledger),
            catalog: collab.catalog,
            clock: collab.clock,
            outbox: collab.outbox,
            notify: collab.notify,
            mutations: AtomicU64::new(0),
            saved_mutations: AtomicU64::new(0),
        }
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn companies(&self) -> &[Company] {
        &self.config.companies
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn company(&self, id: &CompanyId) -> Result<&Company, EngineError> {
        self.config
            .companies
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| EngineError::NotFound(Entity::Company(id.clone())))
    }

    pub(super) fn catalog(&self) -> &dyn ServiceCatalog {
        self.catalog.as_ref()
    }

    pub(super) fn hold_deadline(&self, now: Ms) -> Ms {
        let ttl = Ms::try_from(self.config.hold_ttl.as_millis()).unwrap_or(Ms::MAX);
        now.saturating_add(ttl)
    }

    /// `casRange` plus the change record for subscribers.
    pub(super) fn transition(
        ledger: &mut Ledger,
        fx: &mut Effects,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
        expected: &[SlotStatus],
        new: SlotStatus,
    ) -> Result<(), EngineError> {
        ledger
            .schedules
            .cas_range(company_id, date, range, expected, new)?;
        fx.changes.push(ScheduleChange {
            company_id: company_id.clone(),
            date,
            range,
            status: new,
        });
        Ok(())
    }

    /// Publish the effects of a committed mutation. Call while still holding the write lock.
    pub(super) fn commit(&self, fx: Effects) {
        for change in &fx.changes {
            self.notify.send(change);
        }
        for notification in fx.notifications {
            self.outbox.send(notification);
        }
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    /// Map a store-level `Conflict` to `SlotUnavailable` and count it.
    pub(super) fn unavailable(e: EngineError) -> EngineError {
        let e = e.into_unavailable();
        if let EngineError::SlotUnavailable(ix) = &e {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            tracing::debug!("slots {ix:?} unavailable");
        }
        e
    }

    pub(super) fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub(super) fn mark_saved(&self, at: u64) {
        self.saved_mutations.fetch_max(at, Ordering::Relaxed);
    }

    /// Commits not yet covered by a snapshot.
    pub fn mutations_since_save(&self) -> u64 {
        self.mutation_count()
            .saturating_sub(self.saved_mutations.load(Ordering::Relaxed))
    }

    // ── Notification builders ─────────────────────────────────────

    fn window_params(&self, n: Notification, company_id: &CompanyId, date: DateKey, range: SlotRange) -> Notification {
        let company = self
            .company(company_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|_| company_id.to_string());
        n.param("company", company)
            .param("date", date)
            .param("start", self.grid.clock_label(range.start))
            .param("end", self.grid.clock_label(range.end))
    }

    pub(super) fn appointment_notice(&self, kind: NotificationKind, appt: &Appointment, now: Ms) -> Notification {
        let mut n = self.window_params(Notification::new(kind, now), &appt.company_id, appt.date, appt.range);
        if let Some(service) = &appt.service_name {
            n = n.param("service", service);
        }
        n.appointment_id = Some(appt.id);
        n.request_id = appt.request_id;
        n.recipient = appt.customer.as_ref().map(|c| c.email.clone());
        n
    }

    pub(super) fn request_notice(&self, kind: NotificationKind, req: &Request, now: Ms) -> Notification {
        let mut n = Notification::new(kind, now);
        let window = req
            .hold
            .as_ref()
            .map(|h| (h.company_id.clone(), h.date, h.range))
            .or_else(|| {
                let company = req
                    .assigned_company
                    .clone()
                    .or_else(|| req.available_companies.first().cloned())?;
                req.preferred.map(|p| (company, p.date, p.range))
            });
        if let Some((company_id, date, range)) = window {
            n = self.window_params(n, &company_id, date, range);
        }
        let estimate = req
            .estimate
            .map(|p| p.to_string())
            .unwrap_or_else(|| "quotation".to_string());
        n = n
            .param("service", &req.service_name)
            .param("estimate", estimate)
            .param("customer", &req.customer.name);
        n.request_id = Some(req.id);
        n.appointment_id = req.appointment_id;
        n.recipient = Some(req.customer.email.clone());
        n
    }
}
