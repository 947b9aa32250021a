use std::net::SocketAddr;

// ── Booking metrics (request-driven) ────────────────────────────

/// Counter: reservations successfully created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "innkeep_reservations_created_total";

/// Counter: bookings rejected because a room was unavailable.
pub const BOOKINGS_REJECTED_TOTAL: &str = "innkeep_bookings_rejected_total";

/// Counter: reservation lifecycle transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "innkeep_transitions_total";

/// Counter: waitlist entries granted a hold window.
pub const WAITLIST_NOTIFIED_TOTAL: &str = "innkeep_waitlist_notified_total";

/// Counter: waitlist entries converted into bookings.
pub const WAITLIST_CONVERTED_TOTAL: &str = "innkeep_waitlist_converted_total";

/// Counter: waitlist entries whose hold window lapsed.
pub const WAITLIST_EXPIRED_TOTAL: &str = "innkeep_waitlist_expired_total";

// ── Resource metrics ────────────────────────────────────────────

/// Gauge: number of active properties (loaded engines).
pub const PROPERTIES_ACTIVE: &str = "innkeep_properties_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
