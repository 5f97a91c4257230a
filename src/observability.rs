use std::net::SocketAddr;

use crate::protocol::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: protocol commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "slotbook_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "slotbook_command_duration_seconds";

// ── Scheduling metrics ──────────────────────────────────────────

/// Counter: Held appointments created (direct holds and proposals).
pub const HOLDS_CREATED_TOTAL: &str = "slotbook_holds_created_total";

/// Counter: bookings confirmed. Labels: path = normal | late | direct | request.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "slotbook_bookings_confirmed_total";

/// Counter: mutations refused because the cells were taken.
pub const CONFLICTS_TOTAL: &str = "slotbook_conflicts_total";

/// Counter: holds expired by the sweeper. Labels: kind = appointment | request.
pub const HOLDS_EXPIRED_TOTAL: &str = "slotbook_holds_expired_total";

/// Histogram: sweep pass duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "slotbook_sweep_duration_seconds";

/// Counter: notifications the sink failed to deliver.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "slotbook_notifications_failed_total";

/// Counter: snapshots written.
pub const SNAPSHOTS_TOTAL: &str = "slotbook_snapshots_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Companies => "companies",
        Command::EnsureDay { .. } => "ensure_day",
        Command::ReadRange { .. } => "read_range",
        Command::SetUnavailable { .. } => "set_unavailable",
        Command::SetAvailable { .. } => "set_available",
        Command::Day { .. } => "day",
        Command::CombinedDay { .. } => "combined_day",
        Command::CreateHold { .. } => "create_hold",
        Command::BookDirect { .. } => "book_direct",
        Command::Confirm { .. } => "confirm",
        Command::Reject { .. } => "reject",
        Command::Cancel { .. } => "cancel",
        Command::Appointments { .. } => "appointments",
        Command::SubmitRequest { .. } => "submit_request",
        Command::ProposeTime { .. } => "propose_time",
        Command::RejectRequest { .. } => "reject_request",
        Command::ApproveRequest { .. } => "approve_request",
        Command::ReleaseHold { .. } => "release_hold",
        Command::Requests => "requests",
        Command::FreeWindows { .. } => "free_windows",
        Command::Sweep => "sweep",
        Command::Subscribe { .. } => "subscribe",
    }
}
