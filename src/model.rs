use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

/// Half-open slot interval `[start, end)` within one day's grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: usize,
    pub end: usize,
}

impl SlotRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Identities ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub String);

impl CompanyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CompanyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A provider that exposes its own slot grid. Configured at startup, never owned by records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
}

impl Company {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: CompanyId::new(id),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub u64);

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#REQ{}", self.0)
    }
}

/// Calendar day a schedule belongs to, written `YYYY-MM-DD` everywhere it leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(pub NaiveDate);

impl DateKey {
    pub const FORMAT: &'static str = "%Y-%m-%d";

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for DateKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), Self::FORMAT).map(Self)
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Slot grid ────────────────────────────────────────────────────

/// State of one grid cell. Exactly one per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Free,
    /// Temporarily reserved by a hold or a request.
    Held,
    Booked,
    /// Administratively blocked.
    Unavailable,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Free => "FREE",
            SlotStatus::Held => "HELD",
            SlotStatus::Booked => "BOOKED",
            SlotStatus::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

impl Contact {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Integer euro cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub u64);

impl Price {
    pub fn from_euros(euros: u64) -> Self {
        Self(euros * 100)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "€{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    /// Cells are `Held`; `expires_at` is set.
    Held,
    /// Cells are `Booked`.
    Confirmed,
    Rejected,
    Expired,
    /// Confirmed after expiry while someone else already occupied the range.
    ExpiredUnavailable,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Held => "HELD",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Rejected => "REJECTED",
            AppointmentStatus::Expired => "EXPIRED",
            AppointmentStatus::ExpiredUnavailable => "EXPIRED_UNAVAILABLE",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }

    /// The cell status backing a live appointment.
    pub fn slot_status(&self) -> Option<SlotStatus> {
        match self {
            AppointmentStatus::Held => Some(SlotStatus::Held),
            AppointmentStatus::Confirmed => Some(SlotStatus::Booked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub company_id: CompanyId,
    pub date: DateKey,
    pub range: SlotRange,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub customer: Option<Contact>,
    #[serde(default)]
    pub service_name: Option<String>,
    /// Present only while `status == Held`.
    #[serde(default)]
    pub expires_at: Option<Ms>,
    #[serde(default)]
    pub created_at: Ms,
    #[serde(default)]
    pub confirmed_late: bool,
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

/// Input to `create_hold` / `book_direct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub company_id: CompanyId,
    pub date: DateKey,
    pub range: SlotRange,
    pub customer: Option<Contact>,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    New,
    Proposed,
    Confirmed,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::New => "NEW",
            RequestStatus::Proposed => "PROPOSED",
            RequestStatus::Confirmed => "CONFIRMED",
            RequestStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RequestStatus::New | RequestStatus::Proposed)
    }
}

/// Lightweight slot reservation owned by a request, scoped to one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHold {
    pub company_id: CompanyId,
    pub date: DateKey,
    pub range: SlotRange,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredWindow {
    pub date: DateKey,
    pub range: SlotRange,
}

pub type Answers = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(default)]
    pub created_at: Ms,
    pub customer: Contact,
    pub service_id: String,
    pub service_name: String,
    #[serde(default)]
    pub answers: Answers,
    /// `None` means a quotation is required.
    #[serde(default)]
    pub estimate: Option<Price>,
    #[serde(default)]
    pub preferred: Option<PreferredWindow>,
    /// Companies that had the preferred window free at submission, in configured order.
    #[serde(default)]
    pub available_companies: Vec<CompanyId>,
    #[serde(default)]
    pub hold: Option<RequestHold>,
    pub status: RequestStatus,
    #[serde(default)]
    pub appointment_id: Option<AppointmentId>,
    #[serde(default)]
    pub assigned_company: Option<CompanyId>,
}

/// Input to `submit_request`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub customer: Contact,
    pub service_id: String,
    pub answers: Answers,
    pub date: DateKey,
    /// First slot of the preferred window; the length comes from the service.
    pub start: usize,
}

// ── Events & query results ───────────────────────────────────────

/// Broadcast after every committed cell mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleChange {
    pub company_id: CompanyId,
    pub date: DateKey,
    pub range: SlotRange,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    /// Confirmed although the hold deadline had passed.
    ConfirmedLate,
    /// The hold had expired and the range is now occupied; nothing was booked.
    ExpiredUnavailable,
}

impl ConfirmOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmOutcome::Confirmed => "CONFIRMED",
            ConfirmOutcome::ConfirmedLate => "CONFIRMED_LATE",
            ConfirmOutcome::ExpiredUnavailable => "EXPIRED_UNAVAILABLE",
        }
    }

    pub fn is_booked(&self) -> bool {
        !matches!(self, ConfirmOutcome::ExpiredUnavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeWindow {
    pub range: SlotRange,
    /// Companies for which every cell of `range` is free, in configured order.
    pub companies: Vec<CompanyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayView {
    pub company_id: CompanyId,
    pub date: DateKey,
    pub slots: Vec<SlotStatus>,
    pub free_runs: Vec<SlotRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub company_id: Option<CompanyId>,
    pub date: Option<DateKey>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appt: &Appointment) -> bool {
        self.company_id.as_ref().is_none_or(|c| *c == appt.company_id)
            && self.date.is_none_or(|d| d == appt.date)
            && self.status.is_none_or(|s| s == appt.status)
    }
}
