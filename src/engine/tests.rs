use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::clock::ManualClock;
use crate::notify::Notification;
use crate::snapshot::{MemorySnapshotStore, SnapshotStore};

const T0: Ms = 1_750_000_000_000;

// ── Test infrastructure ──────────────────────────────────────

struct Harness {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    outbox: mpsc::UnboundedReceiver<Notification>,
}

fn config_with(companies: &[&str]) -> EngineConfig {
    EngineConfig {
        hold_ttl: Duration::from_secs(1),
        sweep_interval: Duration::from_millis(100),
        companies: companies
            .iter()
            .map(|id| Company::new(*id, format!("{id} Plumbing")))
            .collect(),
        ..EngineConfig::default()
    }
}

fn harness_for(config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(T0));
    let (outbox, rx) = Outbox::channel();
    let collab = Collaborators {
        clock: clock.clone(),
        outbox,
        ..Collaborators::default()
    };
    Harness {
        engine: Arc::new(Engine::new(config, collab).unwrap()),
        clock,
        outbox: rx,
    }
}

/// 20 slots (08:00-18:00 by 30 min), hold TTL 1s, companies C1, C2, C3.
fn harness() -> Harness {
    harness_for(config_with(&["C1", "C2", "C3"]))
}

fn kinds(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<NotificationKind> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n.kind);
    }
    out
}

fn c(id: &str) -> CompanyId {
    CompanyId::from(id)
}

fn day() -> DateKey {
    DateKey::from_ymd(2025, 6, 2).unwrap()
}

fn ann() -> Contact {
    Contact::new("Ann de Vries", "ann@example.com")
}

fn appt(company: &str, start: usize, end: usize) -> NewAppointment {
    NewAppointment {
        company_id: c(company),
        date: day(),
        range: SlotRange::new(start, end),
        customer: Some(ann()),
        service_name: Some("Blockage / Verstopping".into()),
    }
}

fn blockage(start: usize) -> SubmitRequest {
    let mut answers = Answers::new();
    answers.insert("location".into(), json!("Toilet"));
    answers.insert("severity".into(), json!("Fully blocked"));
    SubmitRequest {
        customer: ann(),
        service_id: "S1".into(),
        answers,
        date: day(),
        start,
    }
}

async fn slots(engine: &Engine, company: &str) -> Vec<SlotStatus> {
    engine.day_view(&c(company), day()).await.unwrap().slots
}

fn expect(len: usize, overrides: &[(std::ops::Range<usize>, SlotStatus)]) -> Vec<SlotStatus> {
    let mut v = vec![SlotStatus::Free; len];
    for (range, status) in overrides {
        for i in range.clone() {
            v[i] = *status;
        }
    }
    v
}

use SlotStatus::{Booked, Free, Held, Unavailable};

// ── Schedule store through the engine ───────────────────────

#[tokio::test]
async fn ensure_day_is_idempotent() {
    let h = harness();
    h.engine.ensure_day(&c("C1"), day()).await.unwrap();
    h.engine
        .cas_range(&c("C1"), day(), SlotRange::new(0, 2), &[Free], Booked)
        .await
        .unwrap();
    h.engine.ensure_day(&c("C1"), day()).await.unwrap();
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(0..2, Booked)]));
}

#[tokio::test]
async fn cas_range_writes_exactly_the_range() {
    let h = harness();
    h.engine
        .cas_range(&c("C1"), day(), SlotRange::new(2, 5), &[Free], Held)
        .await
        .unwrap();
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..5, Held)]));
    assert_eq!(slots(&h.engine, "C2").await, expect(20, &[]));
}

#[tokio::test]
async fn cas_range_conflict_is_all_or_nothing() {
    let h = harness();
    h.engine
        .cas_range(&c("C1"), day(), SlotRange::new(4, 6), &[Free], Held)
        .await
        .unwrap();
    let err = h
        .engine
        .cas_range(&c("C1"), day(), SlotRange::new(5, 7), &[Free], Held)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict(vec![5]));
    assert_eq!(
        h.engine
            .read_range(&c("C1"), day(), SlotRange::new(4, 8))
            .await
            .unwrap(),
        vec![Held, Held, Free, Free]
    );
}

#[tokio::test]
async fn read_range_bounds() {
    let h = harness();
    for range in [SlotRange::new(0, 21), SlotRange::new(5, 5), SlotRange::new(6, 2)] {
        assert!(matches!(
            h.engine.read_range(&c("C1"), day(), range).await,
            Err(EngineError::RangeOutOfBounds { .. })
        ));
    }
    assert_eq!(
        h.engine.read_range(&c("C9"), day(), SlotRange::new(0, 1)).await,
        Err(EngineError::NotFound(Entity::Company(c("C9"))))
    );
}

#[tokio::test]
async fn set_unavailable_never_clobbers_live_cells() {
    let h = harness();
    h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    h.engine.book_direct(appt("C1", 8, 9)).await.unwrap();

    let err = h
        .engine
        .set_unavailable(&c("C1"), day(), SlotRange::new(0, 10))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict(vec![2, 3, 8]));
    assert_eq!(
        slots(&h.engine, "C1").await,
        expect(20, &[(2..4, Held), (8..9, Booked)])
    );

    h.engine
        .set_unavailable(&c("C1"), day(), SlotRange::new(4, 8))
        .await
        .unwrap();
    assert_eq!(
        slots(&h.engine, "C1").await,
        expect(20, &[(2..4, Held), (4..8, Unavailable), (8..9, Booked)])
    );

    // freeing only applies to blocked cells
    assert_eq!(
        h.engine
            .set_available(&c("C1"), day(), SlotRange::new(3, 5))
            .await,
        Err(EngineError::Conflict(vec![3]))
    );
    h.engine
        .set_available(&c("C1"), day(), SlotRange::new(4, 8))
        .await
        .unwrap();
    assert_eq!(
        slots(&h.engine, "C1").await,
        expect(20, &[(2..4, Held), (8..9, Booked)])
    );
}

// ── Appointment lifecycle ────────────────────────────────────

#[tokio::test]
async fn hold_then_confirm_within_ttl() {
    let mut h = harness();
    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Held);
    assert_eq!(a.expires_at, Some(T0 + 1_000));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Held)]));

    h.clock.advance(Duration::from_millis(500));
    assert_eq!(h.engine.confirm(a.id).await, Ok(ConfirmOutcome::Confirmed));

    let a = h.engine.appointment(a.id).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Confirmed);
    assert_eq!(a.expires_at, None);
    assert!(!a.confirmed_late);
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Booked)]));
    assert_eq!(
        kinds(&mut h.outbox),
        vec![NotificationKind::HoldPlaced, NotificationKind::Confirmed]
    );
}

#[tokio::test]
async fn longest_hold_ttl_sets_an_exact_deadline() {
    let h = harness_for(EngineConfig {
        hold_ttl: crate::limits::MAX_HOLD_TTL,
        sweep_interval: Duration::from_secs(60),
        ..config_with(&["C1"])
    });
    let a = h.engine.create_hold(appt("C1", 0, 1)).await.unwrap();
    assert_eq!(a.expires_at, Some(T0 + 7 * 24 * 60 * 60 * 1_000));
    assert_ok!(h.engine.confirm(a.id).await);
}

#[tokio::test]
async fn hold_expires_at_ttl_and_not_before() {
    let mut h = harness();
    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();

    h.clock.advance(Duration::from_millis(999));
    let report = h.engine.sweep_expired().await;
    assert!(report.expired.is_empty());
    assert_eq!(h.engine.appointment(a.id).await.unwrap().status, AppointmentStatus::Held);

    h.clock.advance(Duration::from_millis(1));
    let report = h.engine.sweep_expired().await;
    assert_eq!(report.expired, vec![HoldRef::Appointment(a.id)]);

    let a = h.engine.appointment(a.id).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Expired);
    assert_eq!(a.expires_at, None);
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
    assert_eq!(
        kinds(&mut h.outbox),
        vec![NotificationKind::HoldPlaced, NotificationKind::Expired]
    );

    // a second pass finds nothing
    assert_eq!(h.engine.sweep_expired().await, SweepReport::default());
}

#[tokio::test]
async fn overlapping_hold_is_refused_at_first_taken_index() {
    let h = harness();
    h.engine.create_hold(appt("C1", 4, 6)).await.unwrap();
    let err = h.engine.create_hold(appt("C1", 5, 7)).await.unwrap_err();
    assert_eq!(err, EngineError::SlotUnavailable(vec![5]));
    assert_eq!(
        h.engine
            .read_range(&c("C1"), day(), SlotRange::new(4, 8))
            .await
            .unwrap(),
        vec![Held, Held, Free, Free]
    );
    // the refused attempt left no record behind
    assert_eq!(h.engine.appointments(&AppointmentFilter::default()).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_holds_exactly_one_wins() {
    let h = harness();
    let mut tasks = Vec::new();
    for i in 0..32 {
        let engine = h.engine.clone();
        let (start, end) = if i % 2 == 0 { (4, 6) } else { (5, 7) };
        tasks.push(tokio::spawn(async move {
            engine.create_hold(appt("C1", start, end)).await
        }));
    }
    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(EngineError::SlotUnavailable(ix)) => assert!(ix.contains(&5)),
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(wins, 1);
    let held = slots(&h.engine, "C1").await.iter().filter(|s| **s == Held).count();
    assert_eq!(held, 2);
}

#[tokio::test]
async fn book_direct_skips_the_hold() {
    let mut h = harness();
    let a = h.engine.book_direct(appt("C2", 0, 3)).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Confirmed);
    assert_eq!(a.expires_at, None);
    assert_eq!(slots(&h.engine, "C2").await, expect(20, &[(0..3, Booked)]));
    assert_eq!(kinds(&mut h.outbox), vec![NotificationKind::Confirmed]);
    assert_eq!(
        h.engine.book_direct(appt("C2", 2, 4)).await.unwrap_err(),
        EngineError::SlotUnavailable(vec![2])
    );
}

#[tokio::test]
async fn reject_frees_and_is_terminal() {
    let mut h = harness();
    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    assert_ok!(h.engine.reject(a.id).await);
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
    let rec = h.engine.appointment(a.id).await.unwrap();
    assert_eq!(rec.status, AppointmentStatus::Rejected);
    assert_eq!(rec.expires_at, None);

    assert!(matches!(
        h.engine.reject(a.id).await,
        Err(EngineError::InvalidTransition { from: "REJECTED", action: "reject", .. })
    ));
    assert_err!(h.engine.confirm(a.id).await);
    assert_eq!(
        kinds(&mut h.outbox),
        vec![NotificationKind::HoldPlaced, NotificationKind::Rejected]
    );
}

#[tokio::test]
async fn cancel_only_from_confirmed() {
    let h = harness();
    let held = h.engine.create_hold(appt("C1", 0, 2)).await.unwrap();
    assert!(matches!(
        h.engine.cancel(held.id).await,
        Err(EngineError::InvalidTransition { from: "HELD", .. })
    ));

    let booked = h.engine.book_direct(appt("C1", 4, 6)).await.unwrap();
    h.engine.cancel(booked.id).await.unwrap();
    assert_eq!(
        h.engine.appointment(booked.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(0..2, Held)]));
    // no un-cancel
    assert_err!(h.engine.cancel(booked.id).await);
    assert_err!(h.engine.confirm(booked.id).await);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness();
    assert_eq!(
        h.engine.confirm(AppointmentId(42)).await,
        Err(EngineError::NotFound(Entity::Appointment(AppointmentId(42))))
    );
    assert_eq!(
        h.engine.create_hold(appt("C9", 0, 1)).await.unwrap_err(),
        EngineError::NotFound(Entity::Company(c("C9")))
    );
    assert!(matches!(
        h.engine.approve_request(RequestId(1)).await,
        Err(EngineError::NotFound(Entity::Request(_)))
    ));
}

#[tokio::test]
async fn out_of_grid_ranges_are_refused() {
    let h = harness();
    for (s, e) in [(18, 21), (3, 3), (5, 4)] {
        assert!(matches!(
            h.engine.create_hold(appt("C1", s, e)).await,
            Err(EngineError::RangeOutOfBounds { .. })
        ));
    }
    assert_eq!(h.engine.appointments(&AppointmentFilter::default()).await, vec![]);
}

#[tokio::test]
async fn invalid_contact_is_refused() {
    let h = harness();
    let mut bad = appt("C1", 0, 1);
    bad.customer = Some(Contact::new("Ann", "not-an-email"));
    assert!(matches!(
        h.engine.create_hold(bad).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
}

// ── Late confirmation ────────────────────────────────────────

#[tokio::test]
async fn late_confirm_before_sweep() {
    let mut h = harness();
    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    h.clock.advance(Duration::from_secs(2));
    assert_eq!(h.engine.confirm(a.id).await, Ok(ConfirmOutcome::ConfirmedLate));
    let a = h.engine.appointment(a.id).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Confirmed);
    assert!(a.confirmed_late);
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Booked)]));
    assert_eq!(
        kinds(&mut h.outbox),
        vec![NotificationKind::HoldPlaced, NotificationKind::ConfirmedLate]
    );
    // the sweeper has nothing to do any more
    assert!(h.engine.sweep_expired().await.expired.is_empty());
}

#[tokio::test]
async fn late_confirm_after_sweep_when_still_free() {
    let h = harness();
    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    h.engine.sweep_expired().await;
    assert_eq!(h.engine.confirm(a.id).await, Ok(ConfirmOutcome::ConfirmedLate));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Booked)]));
}

#[tokio::test]
async fn late_confirm_after_someone_else_booked() {
    let mut h = harness();
    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    h.engine.sweep_expired().await;
    let other = h.engine.book_direct(appt("C1", 3, 5)).await.unwrap();

    assert_eq!(h.engine.confirm(a.id).await, Ok(ConfirmOutcome::ExpiredUnavailable));
    assert_eq!(
        h.engine.appointment(a.id).await.unwrap().status,
        AppointmentStatus::ExpiredUnavailable
    );
    // the other occupant's booking stands
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(3..5, Booked)]));
    assert_eq!(
        h.engine.appointment(other.id).await.unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(
        kinds(&mut h.outbox).last(),
        Some(&NotificationKind::ExpiredUnavailable)
    );
    assert_err!(h.engine.confirm(a.id).await);
}

// ── Sweeper ──────────────────────────────────────────────────

#[tokio::test]
async fn expire_rechecks_under_the_lock() {
    let h = harness();
    let a = h.engine.create_hold(appt("C1", 0, 2)).await.unwrap();
    let b = h.engine.create_hold(appt("C2", 0, 2)).await.unwrap();
    h.clock.advance(Duration::from_secs(5));
    let now = h.engine.now();

    let targets = h.engine.collect_expired(now).await;
    assert_eq!(targets.len(), 2);
    // confirmed between collection and expiry
    h.engine.confirm(a.id).await.unwrap();

    assert!(matches!(
        h.engine.expire(HoldRef::Appointment(a.id), now).await,
        Err(EngineError::InvalidTransition { action: "expire", .. })
    ));
    h.engine.expire(HoldRef::Appointment(b.id), now).await.unwrap();
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(0..2, Booked)]));
    assert_eq!(slots(&h.engine, "C2").await, expect(20, &[]));
}

#[tokio::test]
async fn sweep_handles_many_records_independently() {
    let h = harness();
    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(h.engine.create_hold(appt("C1", i * 2, i * 2 + 1)).await.unwrap().id);
    }
    h.engine.reject(ids[3]).await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    let report = h.engine.sweep_expired().await;
    assert_eq!(report.expired.len(), 9);
    assert_eq!(report.skipped, 0);
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
}

// ── Availability search ──────────────────────────────────────

#[tokio::test]
async fn free_windows_scenario() {
    let h = harness_for(config_with(&["C1", "C2"]));
    h.engine.book_direct(appt("C1", 2, 20)).await.unwrap();
    h.engine.book_direct(appt("C2", 3, 20)).await.unwrap();

    let windows = h.engine.find_free_windows(day(), 2).await.unwrap();
    assert_eq!(
        windows,
        vec![
            FreeWindow {
                range: SlotRange::new(0, 2),
                companies: vec![c("C1"), c("C2")],
            },
            FreeWindow {
                range: SlotRange::new(1, 3),
                companies: vec![c("C2")],
            },
        ]
    );
    assert!(windows.iter().all(|w| w.range.start != 2));
}

#[tokio::test]
async fn free_windows_never_cover_taken_cells() {
    let h = harness();
    h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    h.engine.book_direct(appt("C2", 5, 9)).await.unwrap();
    h.engine
        .set_unavailable(&c("C3"), day(), SlotRange::new(0, 12))
        .await
        .unwrap();

    let windows = h.engine.find_free_windows(day(), 3).await.unwrap();
    assert!(!windows.is_empty());
    for w in &windows {
        for company in &w.companies {
            let cells = h.engine.read_range(company, day(), w.range).await.unwrap();
            assert!(cells.iter().all(|s| *s == Free), "{company} {}", w.range);
        }
    }
    // untouched date: every start, every company
    let other = DateKey::from_ymd(2025, 6, 3).unwrap();
    let windows = h.engine.find_free_windows(other, 20).await.unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].companies, vec![c("C1"), c("C2"), c("C3")]);
    assert!(h.engine.find_free_windows(other, 21).await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_duration_search_is_invalid() {
    let h = harness();
    assert!(matches!(
        h.engine.find_free_windows(day(), 0).await,
        Err(EngineError::InvalidRange(_))
    ));
}

#[tokio::test]
async fn admin_views() {
    let h = harness_for(config_with(&["C1", "C2"]));
    h.engine.book_direct(appt("C1", 0, 4)).await.unwrap();
    h.engine.create_hold(appt("C2", 2, 6)).await.unwrap();

    let view = h.engine.day_view(&c("C1"), day()).await.unwrap();
    assert_eq!(view.free_runs, vec![SlotRange::new(4, 20)]);

    let combined = h.engine.combined_day(day()).await;
    assert_eq!(combined.len(), 20);
    assert!(combined[0] && combined[1]);
    assert!(!combined[2] && !combined[3]);
    assert!(combined[4..].iter().all(|free| *free));

    assert_eq!(
        h.engine
            .companies_free_for(day(), SlotRange::new(0, 2))
            .await
            .unwrap(),
        vec![c("C2")]
    );
    assert!(matches!(
        h.engine.companies_free_for(day(), SlotRange::new(19, 21)).await,
        Err(EngineError::RangeOutOfBounds { end: 21, slot_count: 20, .. })
    ));

    let held = AppointmentFilter {
        status: Some(AppointmentStatus::Held),
        ..Default::default()
    };
    let listed = h.engine.appointments(&held).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].company_id, c("C2"));
}

// ── Request workflow ─────────────────────────────────────────

#[tokio::test]
async fn submit_request_holds_first_free_company() {
    let mut h = harness();
    h.engine.book_direct(appt("C1", 2, 4)).await.unwrap();
    kinds(&mut h.outbox);

    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    assert_eq!(req.status, RequestStatus::New);
    assert_eq!(req.available_companies, vec![c("C2"), c("C3")]);
    assert_eq!(req.estimate, Some(Price::from_euros(95 + 20 + 40)));
    assert_eq!(req.service_name, "Blockage / Verstopping");
    let hold = req.hold.clone().unwrap();
    assert_eq!(hold.company_id, c("C2"));
    assert_eq!(hold.range, SlotRange::new(2, 4));
    assert_eq!(hold.expires_at, T0 + 1_000);
    assert_eq!(slots(&h.engine, "C2").await, expect(20, &[(2..4, Held)]));

    let n = h.outbox.try_recv().unwrap();
    assert_eq!(n.kind, NotificationKind::RequestReceived);
    assert_eq!(n.recipient.as_deref(), Some("ann@example.com"));
    assert_eq!(n.params["start"], "09:00");
    assert_eq!(n.params["estimate"], "€155.00");
}

#[tokio::test]
async fn submit_request_without_free_company() {
    let h = harness();
    for company in ["C1", "C2", "C3"] {
        h.engine.book_direct(appt(company, 3, 4)).await.unwrap();
    }
    assert_eq!(
        h.engine.submit_request(blockage(2)).await.unwrap_err(),
        EngineError::SlotUnavailable(vec![3])
    );
    assert!(h.engine.requests().await.is_empty());
}

#[tokio::test]
async fn submit_request_validates_input() {
    let h = harness();
    let mut unknown = blockage(2);
    unknown.service_id = "S9".into();
    assert_eq!(
        h.engine.submit_request(unknown).await.unwrap_err(),
        EngineError::NotFound(Entity::Service("S9".into()))
    );
    let mut bad_mail = blockage(2);
    bad_mail.customer.email = "ann.example.com".into();
    assert!(matches!(
        h.engine.submit_request(bad_mail).await,
        Err(EngineError::InvalidInput(_))
    ));
    // renovation takes 4 slots, so 17 + 4 runs off the grid
    let mut late = blockage(17);
    late.service_id = "S2".into();
    assert!(matches!(
        h.engine.submit_request(late).await,
        Err(EngineError::RangeOutOfBounds { .. })
    ));
}

#[tokio::test]
async fn quotation_service_has_no_estimate() {
    let h = harness();
    let mut reno = blockage(0);
    reno.service_id = "S2".into();
    let req = h.engine.submit_request(reno).await.unwrap();
    assert_eq!(req.estimate, None);
    assert_eq!(req.hold.unwrap().range, SlotRange::new(0, 4));
}

#[tokio::test]
async fn propose_same_company_then_approve() {
    let mut h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let a = h.engine.propose_time(req.id, &c("C1"), None).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Held);
    assert_eq!(a.range, SlotRange::new(2, 4));
    assert_eq!(a.request_id, Some(req.id));
    assert_eq!(a.customer, Some(ann()));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Held)]));

    let r = h.engine.request(req.id).await.unwrap();
    assert_eq!(r.status, RequestStatus::Proposed);
    assert_eq!(r.hold, None);
    assert_eq!(r.appointment_id, Some(a.id));
    assert_eq!(r.assigned_company, Some(c("C1")));

    assert_eq!(
        h.engine.approve_request(req.id).await,
        Ok((a.id, ConfirmOutcome::Confirmed))
    );
    assert_eq!(h.engine.request(req.id).await.unwrap().status, RequestStatus::Confirmed);
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Booked)]));
    assert_eq!(
        kinds(&mut h.outbox),
        vec![
            NotificationKind::RequestReceived,
            NotificationKind::HoldPlaced,
            NotificationKind::Confirmed,
        ]
    );
    // closed requests stay closed
    assert_err!(h.engine.propose_time(req.id, &c("C1"), None).await);
}

#[tokio::test]
async fn propose_other_company_moves_the_hold() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    h.engine.propose_time(req.id, &c("C3"), None).await.unwrap();
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
    assert_eq!(slots(&h.engine, "C3").await, expect(20, &[(2..4, Held)]));
}

#[tokio::test]
async fn propose_custom_window_overlapping_own_hold() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let window = PreferredWindow {
        date: day(),
        range: SlotRange::new(3, 5),
    };
    let a = h
        .engine
        .propose_time(req.id, &c("C1"), Some(window))
        .await
        .unwrap();
    assert_eq!(a.range, SlotRange::new(3, 5));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(3..5, Held)]));
    assert_eq!(h.engine.request(req.id).await.unwrap().preferred, Some(window));
}

#[tokio::test]
async fn propose_conflict_changes_nothing() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    h.engine.book_direct(appt("C2", 6, 8)).await.unwrap();
    let before = h.engine.snapshot().await;

    let window = PreferredWindow {
        date: day(),
        range: SlotRange::new(6, 8),
    };
    assert_eq!(
        h.engine
            .propose_time(req.id, &c("C2"), Some(window))
            .await
            .unwrap_err(),
        EngineError::SlotUnavailable(vec![6, 7])
    );
    assert_eq!(h.engine.snapshot().await, before);
}

#[tokio::test]
async fn repropose_releases_previous_proposal() {
    let mut h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let first = h.engine.propose_time(req.id, &c("C1"), None).await.unwrap();
    let window = PreferredWindow {
        date: day(),
        range: SlotRange::new(10, 12),
    };
    let second = h
        .engine
        .propose_time(req.id, &c("C2"), Some(window))
        .await
        .unwrap();

    assert_eq!(
        h.engine.appointment(first.id).await.unwrap().status,
        AppointmentStatus::Rejected
    );
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
    assert_eq!(slots(&h.engine, "C2").await, expect(20, &[(10..12, Held)]));
    assert_eq!(h.engine.request(req.id).await.unwrap().appointment_id, Some(second.id));
    // the superseded proposal is not announced as a rejection
    assert!(!kinds(&mut h.outbox).contains(&NotificationKind::Rejected));
}

#[tokio::test]
async fn reject_request_releases_everything() {
    let mut h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let a = h.engine.propose_time(req.id, &c("C2"), None).await.unwrap();
    h.engine.reject_request(req.id).await.unwrap();

    let r = h.engine.request(req.id).await.unwrap();
    assert_eq!(r.status, RequestStatus::Rejected);
    assert_eq!(r.hold, None);
    assert_eq!(
        h.engine.appointment(a.id).await.unwrap().status,
        AppointmentStatus::Rejected
    );
    for company in ["C1", "C2", "C3"] {
        assert_eq!(slots(&h.engine, company).await, expect(20, &[]));
    }
    assert_eq!(kinds(&mut h.outbox).last(), Some(&NotificationKind::RequestRejected));
    assert!(matches!(
        h.engine.reject_request(req.id).await,
        Err(EngineError::InvalidTransition { from: "REJECTED", .. })
    ));
}

#[tokio::test]
async fn confirming_a_proposal_closes_its_request() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let a = h.engine.propose_time(req.id, &c("C1"), None).await.unwrap();
    assert_eq!(h.engine.confirm(a.id).await, Ok(ConfirmOutcome::Confirmed));

    let r = h.engine.request(req.id).await.unwrap();
    assert_eq!(r.status, RequestStatus::Confirmed);
    assert_eq!(r.appointment_id, Some(a.id));
    assert_eq!(r.assigned_company, Some(c("C1")));

    assert!(matches!(
        h.engine.approve_request(req.id).await,
        Err(EngineError::InvalidTransition { from: "CONFIRMED", action: "approve", .. })
    ));
    assert!(matches!(
        h.engine.reject_request(req.id).await,
        Err(EngineError::InvalidTransition { from: "CONFIRMED", action: "reject", .. })
    ));
    assert_eq!(
        h.engine.appointment(a.id).await.unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Booked)]));
}

#[tokio::test]
async fn late_confirm_of_a_proposal_closes_its_request() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let a = h.engine.propose_time(req.id, &c("C1"), None).await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    h.engine.sweep_expired().await;

    assert_eq!(h.engine.confirm(a.id).await, Ok(ConfirmOutcome::ConfirmedLate));
    assert_eq!(h.engine.request(req.id).await.unwrap().status, RequestStatus::Confirmed);
    assert_err!(h.engine.reject_request(req.id).await);
}

#[tokio::test]
async fn superseded_proposal_cannot_be_confirmed() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let first = h.engine.propose_time(req.id, &c("C1"), None).await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    h.engine.sweep_expired().await;
    let window = PreferredWindow {
        date: day(),
        range: SlotRange::new(10, 12),
    };
    let second = h
        .engine
        .propose_time(req.id, &c("C2"), Some(window))
        .await
        .unwrap();

    // the expired first offer would otherwise re-take its free cells
    assert!(matches!(
        h.engine.confirm(first.id).await,
        Err(EngineError::InvalidTransition { from: "EXPIRED", action: "confirm", .. })
    ));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
    assert_eq!(h.engine.confirm(second.id).await, Ok(ConfirmOutcome::Confirmed));
    assert_eq!(h.engine.request(req.id).await.unwrap().assigned_company, Some(c("C2")));
}

#[tokio::test]
async fn reject_request_refuses_a_booked_proposal() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    let a = h.engine.propose_time(req.id, &c("C1"), None).await.unwrap();
    // a record restored from an older snapshot can still say Proposed
    h.engine.confirm(a.id).await.unwrap();
    {
        let mut ledger = h.engine.ledger.write().await;
        ledger.request_mut(req.id).unwrap().status = RequestStatus::Proposed;
    }
    assert!(matches!(
        h.engine.reject_request(req.id).await,
        Err(EngineError::InvalidTransition { from: "PROPOSED", action: "reject", .. })
    ));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(2..4, Booked)]));
}

#[tokio::test]
async fn approve_request_promotes_the_hold() {
    let h = harness();
    let req = h.engine.submit_request(blockage(6)).await.unwrap();
    let (appointment_id, outcome) = h.engine.approve_request(req.id).await.unwrap();
    assert_eq!(outcome, ConfirmOutcome::Confirmed);

    let a = h.engine.appointment(appointment_id).await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Confirmed);
    assert_eq!(a.company_id, c("C1"));
    assert_eq!(a.range, SlotRange::new(6, 8));
    assert_eq!(a.request_id, Some(req.id));
    assert_eq!(a.service_name.as_deref(), Some("Blockage / Verstopping"));

    let r = h.engine.request(req.id).await.unwrap();
    assert_eq!(r.status, RequestStatus::Confirmed);
    assert_eq!(r.hold, None);
    assert_eq!(r.assigned_company, Some(c("C1")));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[(6..8, Booked)]));
}

#[tokio::test]
async fn expired_request_hold_is_swept_and_cannot_be_approved() {
    let mut h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    let report = h.engine.sweep_expired().await;
    assert_eq!(report.expired, vec![HoldRef::Request(req.id)]);

    let r = h.engine.request(req.id).await.unwrap();
    assert_eq!(r.status, RequestStatus::New);
    assert_eq!(r.hold, None);
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));
    assert_eq!(kinds(&mut h.outbox).last(), Some(&NotificationKind::Expired));

    assert!(matches!(
        h.engine.approve_request(req.id).await,
        Err(EngineError::InvalidTransition { action: "approve", .. })
    ));
    // the admin can still propose a time
    assert_ok!(h.engine.propose_time(req.id, &c("C1"), None).await);
}

#[tokio::test]
async fn release_hold_is_idempotent() {
    let h = harness();
    let req = h.engine.submit_request(blockage(2)).await.unwrap();
    assert_eq!(h.engine.release_hold(req.id).await, Ok(true));
    assert_eq!(slots(&h.engine, "C1").await, expect(20, &[]));

    let before = h.engine.snapshot().await;
    let saved_before = h.engine.mutations_since_save();
    assert_eq!(h.engine.release_hold(req.id).await, Ok(false));
    assert_eq!(h.engine.snapshot().await, before);
    assert_eq!(h.engine.mutations_since_save(), saved_before);
}

// ── Events ───────────────────────────────────────────────────

#[tokio::test]
async fn schedule_changes_follow_commit_order() {
    let h = harness();
    let mut all = h.engine.notify.subscribe_all();
    let mut c1 = h.engine.notify.subscribe(&c("C1"));

    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    h.engine.book_direct(appt("C2", 0, 1)).await.unwrap();
    h.engine.confirm(a.id).await.unwrap();

    let statuses: Vec<_> = (0..3)
        .map(|_| all.try_recv().unwrap())
        .map(|ch| (ch.company_id, ch.status))
        .collect();
    assert_eq!(
        statuses,
        vec![(c("C1"), Held), (c("C2"), Booked), (c("C1"), Booked)]
    );
    assert_eq!(c1.try_recv().unwrap().status, Held);
    assert_eq!(c1.try_recv().unwrap().status, Booked);
    assert!(c1.try_recv().is_err());
}

#[tokio::test]
async fn bookings_succeed_without_a_notification_consumer() {
    let h = harness();
    drop(h.outbox);
    let a = h.engine.create_hold(appt("C1", 0, 2)).await.unwrap();
    assert_eq!(h.engine.confirm(a.id).await, Ok(ConfirmOutcome::Confirmed));
}

// ── Snapshots ────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_restore_round_trip() {
    let h = harness();
    let a = h.engine.create_hold(appt("C1", 2, 4)).await.unwrap();
    h.engine.book_direct(appt("C2", 0, 2)).await.unwrap();
    let req = h.engine.submit_request(blockage(10)).await.unwrap();
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.next_appointment_id, 3);
    assert_eq!(snapshot.next_request_id, 2);

    let restored = Engine::restore(config_with(&["C1", "C2", "C3"]), Collaborators::default(), snapshot.clone())
        .unwrap();
    assert_eq!(restored.snapshot().await, snapshot);
    assert_eq!(restored.appointment(a.id).await.unwrap().status, AppointmentStatus::Held);
    assert!(restored.request(req.id).await.unwrap().hold.is_some());

    let next = restored.book_direct(appt("C3", 0, 1)).await.unwrap();
    assert_eq!(next.id, AppointmentId(3));
}

#[tokio::test]
async fn restore_advances_counters_past_restored_ids() {
    let h = harness();
    h.engine.book_direct(appt("C1", 0, 1)).await.unwrap();
    h.engine.book_direct(appt("C1", 1, 2)).await.unwrap();
    let mut snapshot = h.engine.snapshot().await;
    snapshot.next_appointment_id = 0;
    snapshot.next_request_id = 0;

    let restored =
        Engine::restore(config_with(&["C1", "C2", "C3"]), Collaborators::default(), snapshot).unwrap();
    let next = restored.book_direct(appt("C1", 2, 3)).await.unwrap();
    assert_eq!(next.id, AppointmentId(3));
    let req = restored.submit_request(blockage(5)).await.unwrap();
    assert_eq!(req.id, RequestId(1));
}

#[tokio::test]
async fn restore_rejects_mismatched_grid() {
    let h = harness();
    h.engine.book_direct(appt("C1", 0, 1)).await.unwrap();
    let mut snapshot = h.engine.snapshot().await;
    snapshot.schedules[0].slots.pop();
    assert!(matches!(
        Engine::restore(config_with(&["C1", "C2", "C3"]), Collaborators::default(), snapshot),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn save_only_when_dirty() {
    let h = harness();
    let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
    assert_eq!(h.engine.save_to(store.clone()).await, Ok(false));

    h.engine.create_hold(appt("C1", 0, 2)).await.unwrap();
    assert_eq!(h.engine.mutations_since_save(), 1);
    assert_eq!(h.engine.save_to(store.clone()).await, Ok(true));
    assert_eq!(h.engine.mutations_since_save(), 0);
    assert_eq!(h.engine.save_to(store.clone()).await, Ok(false));

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded.appointments.len(), 1);
    assert!(persist::inconsistencies(&loaded).is_empty());
}

#[test]
fn inconsistent_snapshot_is_detected() {
    let snapshot = crate::snapshot::Snapshot {
        version: 1,
        schedules: Vec::new(),
        appointments: vec![Appointment {
            id: AppointmentId(1),
            company_id: c("C1"),
            date: day(),
            range: SlotRange::new(0, 2),
            status: AppointmentStatus::Confirmed,
            customer: None,
            service_name: None,
            expires_at: None,
            created_at: 0,
            confirmed_late: false,
            request_id: None,
        }],
        requests: Vec::new(),
        next_appointment_id: 2,
        next_request_id: 1,
    };
    assert_eq!(persist::inconsistencies(&snapshot).len(), 2);
}
