use std::time::Instant;

use tracing::{debug, info};

use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability::{HOLDS_EXPIRED_TOTAL, SWEEP_DURATION_SECONDS};

use super::error::Entity;
use super::{Effects, Engine, EngineError};

/// A live hold the sweeper may expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldRef {
    Appointment(AppointmentId),
    Request(RequestId),
}

impl std::fmt::Display for HoldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldRef::Appointment(id) => write!(f, "appointment {id}"),
            HoldRef::Request(id) => write!(f, "request {id}"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<HoldRef>,
    /// Candidates that were resolved by someone else between collection and expiry.
    pub skipped: usize,
}

impl Engine {
    /// Held appointments and request holds whose deadline is at or before `now`.
    pub async fn collect_expired(&self, now: Ms) -> Vec<HoldRef> {
        let ledger = self.ledger.read().await;
        let appointments = ledger
            .appointments
            .values()
            .filter(|a| a.status == AppointmentStatus::Held)
            .filter(|a| a.expires_at.is_some_and(|deadline| deadline <= now))
            .map(|a| HoldRef::Appointment(a.id));
        let requests = ledger
            .requests
            .values()
            .filter(|r| r.hold.as_ref().is_some_and(|h| h.expires_at <= now))
            .map(|r| HoldRef::Request(r.id));
        appointments.chain(requests).collect()
    }

    /// Expire one hold. The record is re-checked under the write lock, so a hold that was
    /// confirmed, rejected or released in the meantime is left alone.
    pub async fn expire(&self, target: HoldRef, now: Ms) -> Result<(), EngineError> {
        let mut ledger = self.ledger.write().await;
        let mut fx = Effects::default();
        match target {
            HoldRef::Appointment(id) => {
                let appt = ledger.appointment(id)?.clone();
                let due = appt.status == AppointmentStatus::Held
                    && appt.expires_at.is_some_and(|deadline| deadline <= now);
                if !due {
                    return Err(EngineError::InvalidTransition {
                        entity: Entity::Appointment(id),
                        from: appt.status.as_str(),
                        action: "expire",
                    });
                }
                Self::transition(
                    &mut ledger,
                    &mut fx,
                    &appt.company_id,
                    appt.date,
                    appt.range,
                    &[SlotStatus::Held],
                    SlotStatus::Free,
                )?;
                let record = ledger.appointment_mut(id)?;
                record.status = AppointmentStatus::Expired;
                record.expires_at = None;
                let record = record.clone();
                fx.notifications
                    .push(self.appointment_notice(NotificationKind::Expired, &record, now));
                metrics::counter!(HOLDS_EXPIRED_TOTAL, "kind" => "appointment").increment(1);
            }
            HoldRef::Request(id) => {
                let req = ledger.request(id)?.clone();
                let Some(hold) = req.hold.as_ref().filter(|h| h.expires_at <= now) else {
                    return Err(EngineError::InvalidTransition {
                        entity: Entity::Request(id),
                        from: req.status.as_str(),
                        action: "expire",
                    });
                };
                Self::transition(
                    &mut ledger,
                    &mut fx,
                    &hold.company_id,
                    hold.date,
                    hold.range,
                    &[SlotStatus::Held],
                    SlotStatus::Free,
                )?;
                fx.notifications
                    .push(self.request_notice(NotificationKind::Expired, &req, now));
                ledger.request_mut(id)?.hold = None;
                metrics::counter!(HOLDS_EXPIRED_TOTAL, "kind" => "request").increment(1);
            }
        }
        self.commit(fx);
        Ok(())
    }

    pub async fn sweep_expired(&self) -> SweepReport {
        self.sweep_expired_at(self.now()).await
    }

    /// One sweep pass. Records are expired independently; a failure on one is logged and
    /// skipped.
    pub async fn sweep_expired_at(&self, now: Ms) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();
        for target in self.collect_expired(now).await {
            match self.expire(target, now).await {
                Ok(()) => report.expired.push(target),
                Err(e) => {
                    // May already have been confirmed or released, that's fine
                    debug!("sweep skip {target}: {e}");
                    report.skipped += 1;
                }
            }
        }
        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if !report.expired.is_empty() {
            info!("sweep expired {} holds", report.expired.len());
        }
        report
    }
}
