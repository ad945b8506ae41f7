use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "slotbook_http_requests_total";

/// Counter: bookings written by the queue.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotbook_bookings_created_total";

/// Counter: bookings removed. Labels: via (id, cancel).
pub const BOOKINGS_REMOVED_TOTAL: &str = "slotbook_bookings_removed_total";

/// Counter: slot collisions. Labels: stage (precheck, queue).
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotbook_booking_conflicts_total";

/// Counter: notices handed to the notifier. Labels: result (sent, skipped, failed).
pub const NOTICES_TOTAL: &str = "slotbook_notices_total";

// ── Queue ───────────────────────────────────────────────────────

/// Gauge: jobs admitted but not yet processing.
pub const QUEUE_DEPTH: &str = "slotbook_queue_depth";

/// Counter: jobs resolved. Labels: op, outcome.
pub const QUEUE_JOBS_TOTAL: &str = "slotbook_queue_jobs_total";

/// Histogram: time a job waited before processing, in seconds.
pub const QUEUE_WAIT_DURATION_SECONDS: &str = "slotbook_queue_wait_duration_seconds";

/// Histogram: time spent processing a job, in seconds. Labels: op.
pub const QUEUE_PROCESS_DURATION_SECONDS: &str = "slotbook_queue_process_duration_seconds";

// ── Data quality ────────────────────────────────────────────────

/// Counter: stored timestamps that could not be normalized.
pub const TIMESTAMP_PARSE_FAILURES_TOTAL: &str = "slotbook_timestamp_parse_failures_total";

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
