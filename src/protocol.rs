//! Newline-delimited JSON commands for admin and client tooling.
//!
//! One request per line, `{"op": "...", ...}`. Replies are `{"ok": true, "data": ...}` or
//! `{"ok": false, "error": {"kind", "message", "indices"?}}`. Times are `HH:MM`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::EngineError;
use crate::grid::TimeGrid;
use crate::model::*;

const OPS: &[&str] = &[
    "companies",
    "ensure_day",
    "read_range",
    "set_unavailable",
    "set_available",
    "day",
    "combined_day",
    "create_hold",
    "book_direct",
    "confirm",
    "reject",
    "cancel",
    "appointments",
    "submit_request",
    "propose_time",
    "reject_request",
    "approve_request",
    "release_hold",
    "requests",
    "free_windows",
    "sweep",
    "subscribe",
];

/// Parsed command from one input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Companies,
    EnsureDay {
        company: CompanyId,
        date: DateKey,
    },
    ReadRange {
        company: CompanyId,
        date: DateKey,
        start: String,
        end: String,
    },
    SetUnavailable {
        company: CompanyId,
        date: DateKey,
        start: String,
        end: String,
    },
    SetAvailable {
        company: CompanyId,
        date: DateKey,
        start: String,
        end: String,
    },
    Day {
        company: CompanyId,
        date: DateKey,
    },
    CombinedDay {
        date: DateKey,
    },
    CreateHold {
        company: CompanyId,
        date: DateKey,
        start: String,
        end: String,
        #[serde(default)]
        customer: Option<Contact>,
        #[serde(default)]
        service: Option<String>,
    },
    BookDirect {
        company: CompanyId,
        date: DateKey,
        start: String,
        end: String,
        #[serde(default)]
        customer: Option<Contact>,
        #[serde(default)]
        service: Option<String>,
    },
    Confirm {
        id: AppointmentId,
    },
    Reject {
        id: AppointmentId,
    },
    Cancel {
        id: AppointmentId,
    },
    Appointments {
        #[serde(default)]
        company: Option<CompanyId>,
        #[serde(default)]
        date: Option<DateKey>,
        #[serde(default)]
        status: Option<AppointmentStatus>,
    },
    SubmitRequest {
        customer: Contact,
        service: String,
        #[serde(default)]
        answers: Answers,
        date: DateKey,
        start: String,
    },
    ProposeTime {
        id: RequestId,
        company: CompanyId,
        /// Custom window. All three or none.
        #[serde(default)]
        date: Option<DateKey>,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
    },
    RejectRequest {
        id: RequestId,
    },
    ApproveRequest {
        id: RequestId,
    },
    ReleaseHold {
        id: RequestId,
    },
    Requests,
    FreeWindows {
        date: DateKey,
        /// Window length in slots.
        duration: usize,
    },
    Sweep,
    Subscribe {
        #[serde(default)]
        company: Option<CompanyId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Parse(String),
    UnknownCommand(String),
    BadArgument(String),
    LineTooLong,
}

impl ProtocolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Parse(_) => "parse",
            ProtocolError::UnknownCommand(_) => "unknown_command",
            ProtocolError::BadArgument(_) => "bad_argument",
            ProtocolError::LineTooLong => "line_too_long",
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Parse(s) => write!(f, "parse error: {s}"),
            ProtocolError::UnknownCommand(op) => write!(f, "unknown command: {op}"),
            ProtocolError::BadArgument(s) => write!(f, "bad argument: {s}"),
            ProtocolError::LineTooLong => write!(f, "line too long"),
        }
    }
}

impl std::error::Error for ProtocolError {}

pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Parse(e.to_string()))?;
    let op = value
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Parse("missing \"op\" field".into()))?;
    if !OPS.contains(&op) {
        return Err(ProtocolError::UnknownCommand(op.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::BadArgument(e.to_string()))
}

/// The optional custom window of `propose_time`.
pub fn custom_window(
    grid: &TimeGrid,
    date: Option<DateKey>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Option<PreferredWindow>, EngineError> {
    match (date, start, end) {
        (None, None, None) => Ok(None),
        (Some(date), Some(start), Some(end)) => Ok(Some(PreferredWindow {
            date,
            range: grid.parse_range(start, end)?,
        })),
        _ => Err(EngineError::InvalidRange(
            "custom window needs date, start and end",
        )),
    }
}

// ── Replies ─────────────────────────────────────────────────────

pub fn ok_reply(data: Value) -> String {
    json!({ "ok": true, "data": data }).to_string()
}

pub fn engine_error_reply(e: &EngineError) -> String {
    let mut error = json!({ "kind": e.kind(), "message": e.to_string() });
    if let Some(indices) = e.conflicting_indices() {
        error["indices"] = json!(indices);
    }
    json!({ "ok": false, "error": error }).to_string()
}

pub fn protocol_error_reply(e: &ProtocolError) -> String {
    json!({ "ok": false, "error": { "kind": e.kind(), "message": e.to_string() } }).to_string()
}

pub fn event_line(grid: &TimeGrid, change: &ScheduleChange) -> String {
    json!({
        "event": "schedule_changed",
        "company": change.company_id,
        "date": change.date,
        "start": grid.clock_label(change.range.start),
        "end": grid.clock_label(change.range.end),
        "range": change.range,
        "status": change.status,
    })
    .to_string()
}

/// Serialize a record that occupies `range` and add its clock times.
pub fn with_times<T: serde::Serialize>(grid: &TimeGrid, record: &T, range: SlotRange) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("start_time".into(), json!(grid.clock_label(range.start)));
        map.insert("end_time".into(), json!(grid.clock_label(range.end)));
    }
    value
}
