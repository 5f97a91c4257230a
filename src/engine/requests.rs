use tracing::info;

use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability::BOOKINGS_CONFIRMED_TOTAL;

use super::availability::fits;
use super::error::Entity;
use super::ledger::Ledger;
use super::store::check_bounds;
use super::validate::{validate_answers, validate_contact};
use super::{Effects, Engine, EngineError};

impl Engine {
    /// Record a client inquiry and hold its preferred window on the first company that has
    /// it free, in configured order.
    pub async fn submit_request(&self, input: SubmitRequest) -> Result<Request, EngineError> {
        validate_contact(&input.customer)?;
        validate_answers(&input.answers)?;
        let service = self
            .catalog()
            .service(&input.service_id)
            .ok_or_else(|| EngineError::NotFound(Entity::Service(input.service_id.clone())))?;
        let range = SlotRange::new(input.start, input.start + service.duration_slots);
        check_bounds(range, self.grid().slot_count())?;
        let estimate = self.catalog().price(&input.service_id, &input.answers);

        let mut ledger = self.ledger.write().await;
        let now = self.now();

        let available: Vec<CompanyId> = self
            .companies()
            .iter()
            .filter(|company| fits(&ledger.schedules.statuses(&company.id, input.date), range))
            .map(|company| company.id.clone())
            .collect();
        let Some(chosen) = available.first().cloned() else {
            let first = &self.companies()[0].id;
            let blocked = ledger.blocked_cells(first, input.date, range, &[])?;
            return Err(Self::unavailable(EngineError::Conflict(blocked)));
        };

        let mut fx = Effects::default();
        Self::transition(
            &mut ledger,
            &mut fx,
            &chosen,
            input.date,
            range,
            &[SlotStatus::Free],
            SlotStatus::Held,
        )
        .map_err(Self::unavailable)?;

        let request = Request {
            id: ledger.allocate_request_id(),
            created_at: now,
            customer: input.customer,
            service_id: service.id,
            service_name: service.name,
            answers: input.answers,
            estimate,
            preferred: Some(PreferredWindow {
                date: input.date,
                range,
            }),
            available_companies: available,
            hold: Some(RequestHold {
                company_id: chosen,
                date: input.date,
                range,
                expires_at: self.hold_deadline(now),
            }),
            status: RequestStatus::New,
            appointment_id: None,
            assigned_company: None,
        };
        ledger.requests.insert(request.id, request.clone());
        fx.notifications
            .push(self.request_notice(NotificationKind::RequestReceived, &request, now));
        self.commit(fx);
        info!(
            "request {} received for {}, {} companies free",
            request.id,
            request.service_name,
            request.available_companies.len()
        );
        Ok(request)
    }

    /// Offer the customer a time as a Held appointment at `company_id`.
    ///
    /// `window = None` proposes the preferred window. Whatever the request owned before (its
    /// hold and any earlier proposal) is given up in the same step; if the target is not
    /// obtainable nothing changes.
    pub async fn propose_time(
        &self,
        id: RequestId,
        company_id: &CompanyId,
        window: Option<PreferredWindow>,
    ) -> Result<Appointment, EngineError> {
        self.company(company_id)?;
        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let req = ledger.request(id)?.clone();
        if !req.status.is_open() {
            return Err(invalid(id, req.status, "propose"));
        }
        let target = window
            .or(req.preferred)
            .ok_or(EngineError::InvalidRange("request has no preferred window"))?;

        let owned = ledger.owned_cells(&req);
        let blocked = ledger.blocked_cells(company_id, target.date, target.range, &owned)?;
        if !blocked.is_empty() {
            return Err(Self::unavailable(EngineError::Conflict(blocked)));
        }

        let mut fx = Effects::default();
        Self::give_up_hold(&mut ledger, &mut fx, &req)?;
        if let Some(previous) = held_appointment(&ledger, &req) {
            self.reject_in(&mut ledger, &mut fx, previous, now, false)?;
        }
        let appt = self.hold_in(
            &mut ledger,
            &mut fx,
            NewAppointment {
                company_id: company_id.clone(),
                date: target.date,
                range: target.range,
                customer: Some(req.customer.clone()),
                service_name: Some(req.service_name.clone()),
            },
            Some(id),
            now,
        )?;

        let record = ledger.request_mut(id)?;
        record.hold = None;
        record.status = RequestStatus::Proposed;
        record.appointment_id = Some(appt.id);
        record.assigned_company = Some(company_id.clone());
        if window.is_some() {
            record.preferred = window;
        }
        fx.notifications
            .push(self.appointment_notice(NotificationKind::HoldPlaced, &appt, now));
        self.commit(fx);
        info!("request {id} proposed as appointment {} at {company_id}", appt.id);
        Ok(appt)
    }

    pub async fn reject_request(&self, id: RequestId) -> Result<(), EngineError> {
        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let req = ledger.request(id)?.clone();
        let booked = req
            .appointment_id
            .and_then(|aid| ledger.appointments.get(&aid))
            .is_some_and(|a| a.status == AppointmentStatus::Confirmed);
        if !req.status.is_open() || booked {
            return Err(invalid(id, req.status, "reject"));
        }

        let mut fx = Effects::default();
        Self::give_up_hold(&mut ledger, &mut fx, &req)?;
        if let Some(previous) = held_appointment(&ledger, &req) {
            self.reject_in(&mut ledger, &mut fx, previous, now, false)?;
        }
        let record = ledger.request_mut(id)?;
        record.hold = None;
        record.status = RequestStatus::Rejected;
        let record = record.clone();
        fx.notifications
            .push(self.request_notice(NotificationKind::RequestRejected, &record, now));
        self.commit(fx);
        info!("request {id} rejected");
        Ok(())
    }

    /// Turn the request into a confirmed booking.
    ///
    /// A live hold is promoted `Held → Booked` into a new appointment. Otherwise the
    /// proposed appointment is confirmed, late path included. A request with neither
    /// cannot be approved.
    pub async fn approve_request(
        &self,
        id: RequestId,
    ) -> Result<(AppointmentId, ConfirmOutcome), EngineError> {
        let mut ledger = self.ledger.write().await;
        let now = self.now();
        let req = ledger.request(id)?.clone();
        if !req.status.is_open() {
            return Err(invalid(id, req.status, "approve"));
        }

        let mut fx = Effects::default();
        let (appointment_id, outcome) = if let Some(hold) = &req.hold {
            Self::transition(
                &mut ledger,
                &mut fx,
                &hold.company_id,
                hold.date,
                hold.range,
                &[SlotStatus::Held],
                SlotStatus::Booked,
            )
            .map_err(Self::unavailable)?;
            let late = hold.expires_at <= now;
            let appt = Appointment {
                id: ledger.allocate_appointment_id(),
                company_id: hold.company_id.clone(),
                date: hold.date,
                range: hold.range,
                status: AppointmentStatus::Confirmed,
                customer: Some(req.customer.clone()),
                service_name: Some(req.service_name.clone()),
                expires_at: None,
                created_at: now,
                confirmed_late: late,
                request_id: Some(id),
            };
            ledger.appointments.insert(appt.id, appt.clone());
            let (kind, outcome) = if late {
                (NotificationKind::ConfirmedLate, ConfirmOutcome::ConfirmedLate)
            } else {
                (NotificationKind::Confirmed, ConfirmOutcome::Confirmed)
            };
            fx.notifications.push(self.appointment_notice(kind, &appt, now));
            metrics::counter!(BOOKINGS_CONFIRMED_TOTAL, "path" => "request").increment(1);
            (appt.id, outcome)
        } else if let Some(appointment_id) = req.appointment_id.filter(|aid| {
            ledger.appointments.get(aid).is_some_and(|a| {
                matches!(a.status, AppointmentStatus::Held | AppointmentStatus::Expired)
            })
        }) {
            let outcome = self.confirm_in(&mut ledger, &mut fx, appointment_id, now)?;
            (appointment_id, outcome)
        } else {
            return Err(invalid(id, req.status, "approve"));
        };

        let record = ledger.request_mut(id)?;
        record.appointment_id = Some(appointment_id);
        if let Some(hold) = record.hold.take() {
            record.assigned_company = Some(hold.company_id);
        }
        // an unavailable late confirmation leaves the request open for a new proposal
        if outcome.is_booked() {
            record.status = RequestStatus::Confirmed;
        }
        self.commit(fx);
        info!("request {id} approved as appointment {appointment_id}: {}", outcome.as_str());
        Ok((appointment_id, outcome))
    }

    /// Release the request's hold. Returns `false` if there was none.
    pub async fn release_hold(&self, id: RequestId) -> Result<bool, EngineError> {
        let mut ledger = self.ledger.write().await;
        let req = ledger.request(id)?.clone();
        if req.hold.is_none() {
            return Ok(false);
        }
        let mut fx = Effects::default();
        Self::give_up_hold(&mut ledger, &mut fx, &req)?;
        ledger.request_mut(id)?.hold = None;
        self.commit(fx);
        info!("request {id} hold released");
        Ok(true)
    }

    /// `Held → Free` over the request's hold, if it has one. The caller clears the pointer.
    fn give_up_hold(ledger: &mut Ledger, fx: &mut Effects, req: &Request) -> Result<(), EngineError> {
        if let Some(hold) = &req.hold {
            Self::transition(
                ledger,
                fx,
                &hold.company_id,
                hold.date,
                hold.range,
                &[SlotStatus::Held],
                SlotStatus::Free,
            )
            .map_err(Self::unavailable)?;
        }
        Ok(())
    }
}

fn held_appointment(ledger: &Ledger, req: &Request) -> Option<AppointmentId> {
    req.appointment_id.filter(|id| {
        ledger
            .appointments
            .get(id)
            .is_some_and(|a| a.status == AppointmentStatus::Held)
    })
}

fn invalid(id: RequestId, from: RequestStatus, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        entity: Entity::Request(id),
        from: from.as_str(),
        action,
    }
}
