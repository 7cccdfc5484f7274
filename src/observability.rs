use std::net::SocketAddr;

// ── Admission metrics ───────────────────────────────────────────

/// Counter: reservations admitted. Labels: policy.
pub const RESERVATIONS_ADMITTED_TOTAL: &str = "reserva_reservations_admitted_total";

/// Counter: reservations rejected. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "reserva_reservations_rejected_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "reserva_reservations_cancelled_total";

/// Histogram: time from lock acquisition request to admission decision, seconds.
pub const ADMISSION_DURATION_SECONDS: &str = "reserva_admission_duration_seconds";

// ── Storage metrics ─────────────────────────────────────────────

/// Gauge: resources currently held by the ledger.
pub const RESOURCES_ACTIVE: &str = "reserva_resources_active";

/// Histogram: journal append + fsync duration in seconds.
pub const JOURNAL_APPEND_DURATION_SECONDS: &str = "reserva_journal_append_duration_seconds";

/// Counter: journal compactions. Labels: status.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "reserva_journal_compactions_total";

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

/// Label for a resource policy.
pub fn policy_label(policy: &crate::model::Policy) -> &'static str {
    match policy {
        crate::model::Policy::Window => "window",
        crate::model::Policy::Pool { .. } => "pool",
    }
}
