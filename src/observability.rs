use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotgate_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotgate_query_duration_seconds";

// ── Admission and lifecycle ─────────────────────────────────────

/// Counter: admission decisions. Labels: outcome (admitted/rejected), reason.
pub const ADMISSIONS_TOTAL: &str = "slotgate_admissions_total";

/// Counter: applied lifecycle transitions. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "slotgate_transitions_total";

pub const AVAILABILITY_CACHE_HITS_TOTAL: &str = "slotgate_availability_cache_hits_total";
pub const AVAILABILITY_CACHE_MISSES_TOTAL: &str = "slotgate_availability_cache_misses_total";

/// Counter: notifications the notifier failed to deliver.
pub const NOTIFY_FAILURES_TOTAL: &str = "slotgate_notify_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotgate_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotgate_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotgate_connections_rejected_total";

/// Counter: logins refused because the user is not in the directory.
pub const AUTH_FAILURES_TOTAL: &str = "slotgate_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotgate_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotgate_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
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
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectDayStatus { .. } => "select_day_status",
        Command::SelectQuotaStatus { .. } => "select_quota_status",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::InsertTransition { .. } => "insert_transition",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::InsertCapacityRule { .. } => "insert_capacity_rule",
        Command::DeleteCapacityRule { .. } => "delete_capacity_rule",
        Command::InsertBlackoutRule { .. } => "insert_blackout_rule",
        Command::DeleteBlackoutRule { .. } => "delete_blackout_rule",
        Command::InsertQuotaPolicy { .. } => "insert_quota_policy",
        Command::SelectCapacityRules => "select_capacity_rules",
        Command::SelectBlackoutRules => "select_blackout_rules",
        Command::SelectQuotaPolicy => "select_quota_policy",
        Command::SelectQuotaHistory => "select_quota_history",
    }
}
