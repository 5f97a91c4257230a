use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{command_label, COMMANDS_TOTAL, COMMAND_DURATION_SECONDS};
use crate::protocol::{self, Command, ProtocolError};

/// Serve one client until it disconnects.
///
/// Replies go out in request order. After `subscribe`, schedule changes are pushed as
/// event lines in between replies.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut events: Option<broadcast::Receiver<ScheduleChange>> = None;

    loop {
        tokio::select! {
            line = framed.next() => {
                let reply = match line {
                    None => break,
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => handle_line(&engine, &line, &mut events).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        protocol::protocol_error_reply(&ProtocolError::LineTooLong)
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                };
                framed.send(reply).await?;
            }
            change = next_event(&mut events) => {
                match change {
                    Ok(change) => {
                        framed.send(protocol::event_line(engine.grid(), &change)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("subscriber lagged, {missed} events dropped");
                        framed
                            .send(json!({ "event": "lagged", "missed": missed }).to_string())
                            .await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => events = None,
                }
            }
        }
    }
    Ok(())
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ScheduleChange>>,
) -> Result<ScheduleChange, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_line(
    engine: &Engine,
    line: &str,
    events: &mut Option<broadcast::Receiver<ScheduleChange>>,
) -> String {
    let cmd = match protocol::parse_command(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => "invalid", "status" => "error")
                .increment(1);
            return protocol::protocol_error_reply(&e);
        }
    };
    let label = command_label(&cmd);
    let started = Instant::now();

    let result = match cmd {
        Command::Subscribe { company } => subscribe(engine, company, events),
        cmd => execute_command(engine, cmd).await,
    };

    metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label)
        .record(started.elapsed().as_secs_f64());
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);

    match result {
        Ok(data) => protocol::ok_reply(data),
        Err(e) => {
            debug!("{label} failed: {e}");
            protocol::engine_error_reply(&e)
        }
    }
}

fn subscribe(
    engine: &Engine,
    company: Option<CompanyId>,
    events: &mut Option<broadcast::Receiver<ScheduleChange>>,
) -> Result<Value, EngineError> {
    let rx = match &company {
        Some(id) => {
            engine.company(id)?;
            engine.notify.subscribe(id)
        }
        None => engine.notify.subscribe_all(),
    };
    *events = Some(rx);
    Ok(json!({ "subscribed": company }))
}

/// Run one command against the engine and shape its result for the wire.
pub async fn execute_command(engine: &Engine, cmd: Command) -> Result<Value, EngineError> {
    let grid = engine.grid();
    match cmd {
        Command::Companies => Ok(json!(engine.companies())),
        Command::EnsureDay { company, date } => {
            engine.ensure_day(&company, date).await?;
            Ok(Value::Null)
        }
        Command::ReadRange {
            company,
            date,
            start,
            end,
        } => {
            let range = grid.parse_range(&start, &end)?;
            let slots = engine.read_range(&company, date, range).await?;
            Ok(json!({ "range": range, "slots": slots }))
        }
        Command::SetUnavailable {
            company,
            date,
            start,
            end,
        } => {
            let range = grid.parse_range(&start, &end)?;
            engine.set_unavailable(&company, date, range).await?;
            Ok(json!({ "range": range }))
        }
        Command::SetAvailable {
            company,
            date,
            start,
            end,
        } => {
            let range = grid.parse_range(&start, &end)?;
            engine.set_available(&company, date, range).await?;
            Ok(json!({ "range": range }))
        }
        Command::Day { company, date } => {
            let view = engine.day_view(&company, date).await?;
            let free_runs: Vec<Value> = view
                .free_runs
                .iter()
                .map(|r| json!({ "start": grid.clock_label(r.start), "end": grid.clock_label(r.end) }))
                .collect();
            Ok(json!({
                "company": view.company_id,
                "date": view.date,
                "slots": view.slots,
                "free_runs": free_runs,
            }))
        }
        Command::CombinedDay { date } => {
            let any_free = engine.combined_day(date).await;
            let slots: Vec<Value> = any_free
                .iter()
                .enumerate()
                .map(|(i, free)| json!({ "time": grid.clock_label(i), "free": free }))
                .collect();
            Ok(json!(slots))
        }
        Command::CreateHold {
            company,
            date,
            start,
            end,
            customer,
            service,
        } => {
            let new = NewAppointment {
                company_id: company,
                date,
                range: grid.parse_range(&start, &end)?,
                customer,
                service_name: service,
            };
            let appt = engine.create_hold(new).await?;
            Ok(protocol::with_times(grid, &appt, appt.range))
        }
        Command::BookDirect {
            company,
            date,
            start,
            end,
            customer,
            service,
        } => {
            let new = NewAppointment {
                company_id: company,
                date,
                range: grid.parse_range(&start, &end)?,
                customer,
                service_name: service,
            };
            let appt = engine.book_direct(new).await?;
            Ok(protocol::with_times(grid, &appt, appt.range))
        }
        Command::Confirm { id } => {
            let outcome = engine.confirm(id).await?;
            Ok(json!({ "id": id, "outcome": outcome.as_str() }))
        }
        Command::Reject { id } => {
            engine.reject(id).await?;
            Ok(json!({ "id": id }))
        }
        Command::Cancel { id } => {
            engine.cancel(id).await?;
            Ok(json!({ "id": id }))
        }
        Command::Appointments {
            company,
            date,
            status,
        } => {
            let filter = AppointmentFilter {
                company_id: company,
                date,
                status,
            };
            let appts: Vec<Value> = engine
                .appointments(&filter)
                .await
                .iter()
                .map(|a| protocol::with_times(grid, a, a.range))
                .collect();
            Ok(json!(appts))
        }
        Command::SubmitRequest {
            customer,
            service,
            answers,
            date,
            start,
        } => {
            let start = grid.to_slot_index(crate::grid::parse_clock(&start)?)?;
            let req = engine
                .submit_request(SubmitRequest {
                    customer,
                    service_id: service,
                    answers,
                    date,
                    start,
                })
                .await?;
            Ok(request_json(engine, &req))
        }
        Command::ProposeTime {
            id,
            company,
            date,
            start,
            end,
        } => {
            let window = protocol::custom_window(grid, date, start.as_deref(), end.as_deref())?;
            let appt = engine.propose_time(id, &company, window).await?;
            Ok(protocol::with_times(grid, &appt, appt.range))
        }
        Command::RejectRequest { id } => {
            engine.reject_request(id).await?;
            Ok(json!({ "id": id }))
        }
        Command::ApproveRequest { id } => {
            let (appointment_id, outcome) = engine.approve_request(id).await?;
            Ok(json!({ "id": id, "appointment_id": appointment_id, "outcome": outcome.as_str() }))
        }
        Command::ReleaseHold { id } => {
            let released = engine.release_hold(id).await?;
            Ok(json!({ "id": id, "released": released }))
        }
        Command::Requests => {
            let reqs: Vec<Value> = engine
                .requests()
                .await
                .iter()
                .map(|r| request_json(engine, r))
                .collect();
            Ok(json!(reqs))
        }
        Command::FreeWindows { date, duration } => {
            let windows: Vec<Value> = engine
                .find_free_windows(date, duration)
                .await?
                .iter()
                .map(|w| protocol::with_times(grid, w, w.range))
                .collect();
            Ok(json!(windows))
        }
        Command::Sweep => {
            let report = engine.sweep_expired().await;
            let expired: Vec<String> = report.expired.iter().map(|h| h.to_string()).collect();
            Ok(json!({ "expired": expired, "skipped": report.skipped }))
        }
        Command::Subscribe { .. } => Err(EngineError::InvalidInput(
            "subscribe is only available on a connection".into(),
        )),
    }
}

fn request_json(engine: &Engine, req: &Request) -> Value {
    match req.preferred {
        Some(p) => protocol::with_times(engine.grid(), req, p.range),
        None => json!(req),
    }
}

