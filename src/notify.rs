use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;

const CHANNEL_CAPACITY: usize = 256;

// ── Customer notifications ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestReceived,
    HoldPlaced,
    Confirmed,
    ConfirmedLate,
    Rejected,
    RequestRejected,
    Expired,
    ExpiredUnavailable,
    Cancelled,
}

impl NotificationKind {
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::RequestReceived => "We received your request",
            NotificationKind::HoldPlaced => "Your appointment is temporarily reserved, please confirm",
            NotificationKind::Confirmed => "Your appointment is confirmed",
            NotificationKind::ConfirmedLate => "Your appointment is confirmed after the reservation lapsed",
            NotificationKind::Rejected => "Your appointment was not accepted",
            NotificationKind::RequestRejected => "Your request could not be scheduled",
            NotificationKind::Expired => "Your reservation has expired",
            NotificationKind::ExpiredUnavailable => "Your reservation expired and the time is no longer available",
            NotificationKind::Cancelled => "Your appointment was cancelled",
        }
    }
}

/// Write-once event handed to the external mailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Ulid,
    pub kind: NotificationKind,
    pub subject: String,
    /// Template parameters: company, date, start, end, service, estimate.
    pub params: BTreeMap<String, String>,
    pub appointment_id: Option<AppointmentId>,
    pub request_id: Option<RequestId>,
    /// Customer email, if one is on file.
    pub recipient: Option<String>,
    pub created_at: Ms,
}

impl Notification {
    pub fn new(kind: NotificationKind, created_at: Ms) -> Self {
        Self {
            id: Ulid::new(),
            kind,
            subject: kind.subject().to_string(),
            params: BTreeMap::new(),
            appointment_id: None,
            request_id: None,
            recipient: None,
            created_at,
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }
}

/// Fire-and-forget queue between the engine and a `NotificationSink`.
///
/// Unbounded so a slow mailer never stalls a booking decision.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// An outbox whose receiver is already gone. Everything sent is dropped.
    pub fn disconnected() -> Self {
        Self::channel().0
    }

    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification outbox closed, dropping notification");
        }
    }
}

#[derive(Debug)]
pub struct DeliveryError(pub String);

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "delivery failed: {}", self.0)
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Writes every notification to the log. Stand-in for a mailer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, n: &Notification) -> Result<(), DeliveryError> {
        info!(
            id = %n.id,
            kind = ?n.kind,
            recipient = n.recipient.as_deref().unwrap_or("-"),
            "notification: {}",
            n.subject
        );
        Ok(())
    }
}

/// Drain the outbox into `sink` until every `Outbox` handle is dropped.
pub async fn run_outbox(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    sink: impl NotificationSink,
) {
    while let Some(notification) = rx.recv().await {
        if let Err(e) = sink.deliver(&notification).await {
            warn!("notification {} not delivered: {e}", notification.id);
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
        }
    }
}

// ── Schedule-change signalling ────────────────────────────────────

/// Broadcast hub for schedule changes, one channel per company plus a global one.
pub struct NotifyHub {
    channels: DashMap<CompanyId, broadcast::Sender<ScheduleChange>>,
    all: broadcast::Sender<ScheduleChange>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to changes for one company. Creates the channel if needed.
    pub fn subscribe(&self, company_id: &CompanyId) -> broadcast::Receiver<ScheduleChange> {
        let sender = self
            .channels
            .entry(company_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<ScheduleChange> {
        self.all.subscribe()
    }

    /// Send a change. No-op if nobody is listening.
    pub fn send(&self, change: &ScheduleChange) {
        if let Some(sender) = self.channels.get(&change.company_id) {
            let _ = sender.send(change.clone());
        }
        let _ = self.all.send(change.clone());
    }
}
