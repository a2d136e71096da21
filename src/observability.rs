use std::net::SocketAddr;

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "condopark_bookings_created_total";

/// Counter: writes rejected because the slot was taken. Labels: action.
pub const DOUBLE_BOOKINGS_TOTAL: &str = "condopark_double_bookings_total";

/// Counter: state-machine transitions. Labels: action, status.
pub const TRANSITIONS_TOTAL: &str = "condopark_transitions_total";

/// Counter: XP points granted. Labels: action.
pub const XP_AWARDED_TOTAL: &str = "condopark_xp_awarded_total";

// ── Sweeps ──────────────────────────────────────────────────────

/// Counter: bookings whose reminder was dispatched.
pub const REMINDERS_SENT_TOTAL: &str = "condopark_reminders_sent_total";

/// Counter: sanctions lifted by the expiry sweep.
pub const SANCTIONS_EXPIRED_TOTAL: &str = "condopark_sanctions_expired_total";

/// Histogram: sweep wall time in seconds. Labels: sweep.
pub const SWEEP_DURATION_SECONDS: &str = "condopark_sweep_duration_seconds";

/// Counter: sweeps aborted. Labels: sweep.
pub const SWEEP_FAILURES_TOTAL: &str = "condopark_sweep_failures_total";

// ── Delivery and storage ────────────────────────────────────────

/// Counter: push registrations removed after the service reported them gone.
pub const DEVICES_PRUNED_TOTAL: &str = "condopark_devices_pruned_total";

/// Histogram: journal append + fsync latency in seconds.
pub const WAL_APPEND_DURATION_SECONDS: &str = "condopark_wal_append_duration_seconds";

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
