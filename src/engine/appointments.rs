use tracing::info;

use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability::{BOOKINGS_CONFIRMED_TOTAL, HOLDS_CREATED_TOTAL};

use super::error::Entity;
use super::ledger::Ledger;
use super::validate::validate_new_appointment;
use super::{Effects, Engine, EngineError};

impl Engine {
    /// Take `Free → Held` and record a Held appointment expiring after the hold TTL.
    pub async fn create_hold(&self, new: NewAppointment) -> Result<Appointment, EngineError> {
        self.company(&new.company_id)?;
        validate_new_appointment(&new)?;

        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let mut fx = Effects::default();
        let appt = self.hold_in(&mut ledger, &mut fx, new, None, now)?;
        fx.notifications
            .push(self.appointment_notice(NotificationKind::HoldPlaced, &appt, now));
        self.commit(fx);
        info!("appointment {} held until {:?}", appt.id, appt.expires_at);
        Ok(appt)
    }

    /// Walk-in entry: `Free → Booked` with no hold step.
    pub async fn book_direct(&self, new: NewAppointment) -> Result<Appointment, EngineError> {
        self.company(&new.company_id)?;
        validate_new_appointment(&new)?;

        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let mut fx = Effects::default();
        Self::transition(
            &mut ledger,
            &mut fx,
            &new.company_id,
            new.date,
            new.range,
            &[SlotStatus::Free],
            SlotStatus::Booked,
        )
        .map_err(Self::unavailable)?;
        let appt = Appointment {
            id: ledger.allocate_appointment_id(),
            company_id: new.company_id,
            date: new.date,
            range: new.range,
            status: AppointmentStatus::Confirmed,
            customer: new.customer,
            service_name: new.service_name,
            expires_at: None,
            created_at: now,
            confirmed_late: false,
            request_id: None,
        };
        ledger.appointments.insert(appt.id, appt.clone());
        fx.notifications
            .push(self.appointment_notice(NotificationKind::Confirmed, &appt, now));
        self.commit(fx);
        metrics::counter!(BOOKINGS_CONFIRMED_TOTAL, "path" => "direct").increment(1);
        info!("appointment {} booked directly", appt.id);
        Ok(appt)
    }

    pub async fn confirm(&self, id: AppointmentId) -> Result<ConfirmOutcome, EngineError> {
        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let mut fx = Effects::default();
        let outcome = self.confirm_in(&mut ledger, &mut fx, id, now)?;
        self.commit(fx);
        info!("appointment {id} confirm: {}", outcome.as_str());
        Ok(outcome)
    }

    pub async fn reject(&self, id: AppointmentId) -> Result<(), EngineError> {
        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let mut fx = Effects::default();
        self.reject_in(&mut ledger, &mut fx, id, now, true)?;
        self.commit(fx);
        info!("appointment {id} rejected");
        Ok(())
    }

    /// `Confirmed → Cancelled`, freeing the booked cells. One-way.
    pub async fn cancel(&self, id: AppointmentId) -> Result<(), EngineError> {
        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let appt = ledger.appointment(id)?.clone();
        if appt.status != AppointmentStatus::Confirmed {
            return Err(invalid(id, appt.status, "cancel"));
        }
        let mut fx = Effects::default();
        Self::transition(
            &mut ledger,
            &mut fx,
            &appt.company_id,
            appt.date,
            appt.range,
            &[SlotStatus::Booked],
            SlotStatus::Free,
        )
        .map_err(Self::unavailable)?;
        let record = ledger.appointment_mut(id)?;
        record.status = AppointmentStatus::Cancelled;
        let record = record.clone();
        fx.notifications
            .push(self.appointment_notice(NotificationKind::Cancelled, &record, now));
        self.commit(fx);
        info!("appointment {id} cancelled");
        Ok(())
    }

    // ── In-lock building blocks, shared with the request workflow ──

    pub(super) fn hold_in(
        &self,
        ledger: &mut Ledger,
        fx: &mut Effects,
        new: NewAppointment,
        request_id: Option<RequestId>,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        Self::transition(
            ledger,
            fx,
            &new.company_id,
            new.date,
            new.range,
            &[SlotStatus::Free],
            SlotStatus::Held,
        )
        .map_err(Self::unavailable)?;
        let appt = Appointment {
            id: ledger.allocate_appointment_id(),
            company_id: new.company_id,
            date: new.date,
            range: new.range,
            status: AppointmentStatus::Held,
            customer: new.customer,
            service_name: new.service_name,
            expires_at: Some(self.hold_deadline(now)),
            created_at: now,
            confirmed_late: false,
            request_id,
        };
        ledger.appointments.insert(appt.id, appt.clone());
        metrics::counter!(HOLDS_CREATED_TOTAL).increment(1);
        Ok(appt)
    }

    /// Held: `Held → Booked`, late if past the deadline. Expired: re-take `Free → Booked`
    /// if nobody else has the range, else the record becomes `ExpiredUnavailable`.
    /// A booked proposal confirms its request too.
    pub(super) fn confirm_in(
        &self,
        ledger: &mut Ledger,
        fx: &mut Effects,
        id: AppointmentId,
        now: Ms,
    ) -> Result<ConfirmOutcome, EngineError> {
        let appt = ledger.appointment(id)?.clone();
        // a proposal is only confirmable while it is its open request's current one
        if let Some(request_id) = appt.request_id {
            let req = ledger.request(request_id)?;
            if !req.status.is_open() || req.appointment_id != Some(id) {
                return Err(invalid(id, appt.status, "confirm"));
            }
        }
        let outcome = match appt.status {
            AppointmentStatus::Held => {
                Self::transition(
                    ledger,
                    fx,
                    &appt.company_id,
                    appt.date,
                    appt.range,
                    &[SlotStatus::Held],
                    SlotStatus::Booked,
                )
                .map_err(Self::unavailable)?;
                if appt.expires_at.is_some_and(|deadline| deadline <= now) {
                    ConfirmOutcome::ConfirmedLate
                } else {
                    ConfirmOutcome::Confirmed
                }
            }
            AppointmentStatus::Expired => match Self::transition(
                ledger,
                fx,
                &appt.company_id,
                appt.date,
                appt.range,
                &[SlotStatus::Free],
                SlotStatus::Booked,
            ) {
                Ok(()) => ConfirmOutcome::ConfirmedLate,
                Err(EngineError::Conflict(ix)) => {
                    info!("appointment {id} expired and slots {ix:?} were taken");
                    ConfirmOutcome::ExpiredUnavailable
                }
                Err(e) => return Err(e),
            },
            other => return Err(invalid(id, other, "confirm")),
        };

        let record = ledger.appointment_mut(id)?;
        record.expires_at = None;
        let kind = match outcome {
            ConfirmOutcome::Confirmed => {
                record.status = AppointmentStatus::Confirmed;
                NotificationKind::Confirmed
            }
            ConfirmOutcome::ConfirmedLate => {
                record.status = AppointmentStatus::Confirmed;
                record.confirmed_late = true;
                NotificationKind::ConfirmedLate
            }
            ConfirmOutcome::ExpiredUnavailable => {
                record.status = AppointmentStatus::ExpiredUnavailable;
                NotificationKind::ExpiredUnavailable
            }
        };
        let record = record.clone();
        if let Some(request_id) = record.request_id.filter(|_| outcome.is_booked()) {
            let req = ledger.request_mut(request_id)?;
            req.status = RequestStatus::Confirmed;
            req.assigned_company = Some(record.company_id.clone());
        }
        fx.notifications.push(self.appointment_notice(kind, &record, now));
        if outcome.is_booked() {
            let path = if outcome == ConfirmOutcome::ConfirmedLate { "late" } else { "normal" };
            metrics::counter!(BOOKINGS_CONFIRMED_TOTAL, "path" => path).increment(1);
        }
        Ok(outcome)
    }

    /// `Held → Rejected`, freeing the cells. `notify = false` when a request supersedes the
    /// appointment and the customer hears about it through the request instead.
    pub(super) fn reject_in(
        &self,
        ledger: &mut Ledger,
        fx: &mut Effects,
        id: AppointmentId,
        now: Ms,
        notify: bool,
    ) -> Result<(), EngineError> {
        let appt = ledger.appointment(id)?.clone();
        if appt.status != AppointmentStatus::Held {
            return Err(invalid(id, appt.status, "reject"));
        }
        Self::transition(
            ledger,
            fx,
            &appt.company_id,
            appt.date,
            appt.range,
            &[SlotStatus::Held],
            SlotStatus::Free,
        )
        .map_err(Self::unavailable)?;
        let record = ledger.appointment_mut(id)?;
        record.status = AppointmentStatus::Rejected;
        record.expires_at = None;
        if notify {
            let record = record.clone();
            fx.notifications
                .push(self.appointment_notice(NotificationKind::Rejected, &record, now));
        }
        Ok(())
    }
}

fn invalid(id: AppointmentId, from: AppointmentStatus, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        entity: Entity::Appointment(id),
        from: from.as_str(),
        action,
    }
}
