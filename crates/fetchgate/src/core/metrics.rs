//! Prometheus metrics for the gateway
//!
//! Tracks:
//! - HTTP requests by endpoint and status
//! - Relay outcomes and streamed bytes by mode
//! - Extractor run durations and failure kinds
//! - Rejected requests by error category

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec, HistogramVec,
};

// Registration only fails on a duplicate name, which would be a programming error
// caught by the first test that touches the metric.
#[allow(clippy::expect_used)]
mod registry {
    use super::*;

    /// Requests by endpoint and response status
    /// Labels: endpoint (metadata/video/audio/ping), status (200/400/...)
    pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "fetchgate_http_requests_total",
            "Total number of HTTP requests by endpoint and status",
            &["endpoint", "status"]
        )
        .expect("register fetchgate_http_requests_total")
    });

    /// Finished relays
    /// Labels: mode (audio/video), outcome (completed/client_aborted/process_failed)
    pub static RELAY_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "fetchgate_relay_outcomes_total",
            "Total number of finished relays by mode and outcome",
            &["mode", "outcome"]
        )
        .expect("register fetchgate_relay_outcomes_total")
    });

    /// Bytes handed to clients
    /// Labels: mode
    pub static BYTES_STREAMED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "fetchgate_bytes_streamed_total",
            "Total number of bytes relayed to clients",
            &["mode"]
        )
        .expect("register fetchgate_bytes_streamed_total")
    });

    /// Relays currently running
    /// Labels: mode
    pub static ACTIVE_RELAYS: Lazy<GaugeVec> = Lazy::new(|| {
        register_gauge_vec!("fetchgate_active_relays", "Number of relays currently streaming", &["mode"])
            .expect("register fetchgate_active_relays")
    });

    /// Extractor wall time
    /// Labels: mode
    pub static EXTRACTOR_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
        register_histogram_vec!(
            "fetchgate_extractor_duration_seconds",
            "Time spent running the extractor",
            &["mode"],
            vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
        )
        .expect("register fetchgate_extractor_duration_seconds")
    });

    /// Failed extractor runs
    /// Labels: mode, kind (video_unavailable/bot_detection/network/unknown)
    pub static EXTRACTOR_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "fetchgate_extractor_failures_total",
            "Total number of failed extractor runs by mode and failure kind",
            &["mode", "kind"]
        )
        .expect("register fetchgate_extractor_failures_total")
    });

    /// Requests answered with an error
    /// Labels: category (validation/launch/upstream_exit/parse/timeout/io)
    pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
        register_counter_vec!(
            "fetchgate_errors_total",
            "Total number of requests answered with an error, by category",
            &["category"]
        )
        .expect("register fetchgate_errors_total")
    });
}

pub use registry::*;

/// Initialize metrics (call this at startup to register all metrics)
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&RELAY_OUTCOMES_TOTAL);
    Lazy::force(&BYTES_STREAMED_TOTAL);
    Lazy::force(&ACTIVE_RELAYS);
    Lazy::force(&EXTRACTOR_DURATION_SECONDS);
    Lazy::force(&EXTRACTOR_FAILURES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);

    // Make the common series show up in /metrics with 0 values
    for mode in ["audio", "video"] {
        ACTIVE_RELAYS.with_label_values(&[mode]).set(0.0);
        BYTES_STREAMED_TOTAL.with_label_values(&[mode]);
        for outcome in ["completed", "client_aborted", "process_failed"] {
            RELAY_OUTCOMES_TOTAL.with_label_values(&[mode, outcome]);
        }
    }

    log::info!("Metrics registry initialized successfully");
}

/// Helper function to record a served request
pub fn record_request(endpoint: &str, status: u16) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

/// Helper function to record a finished relay
pub fn record_relay_outcome(mode: &str, outcome: &str, bytes: u64) {
    RELAY_OUTCOMES_TOTAL.with_label_values(&[mode, outcome]).inc();
    BYTES_STREAMED_TOTAL.with_label_values(&[mode]).inc_by(bytes as f64);
}

/// Helper function to record a failed extractor run
pub fn record_extractor_failure(mode: &str, kind: &str) {
    EXTRACTOR_FAILURES_TOTAL.with_label_values(&[mode, kind]).inc();
}

/// Helper function to record an error response
pub fn record_error(category: &str) {
    ERRORS_TOTAL.with_label_values(&[category]).inc();
}

/// Helper function to record extractor wall time
pub fn observe_extractor_duration(mode: &str, elapsed: Duration) {
    EXTRACTOR_DURATION_SECONDS
        .with_label_values(&[mode])
        .observe(elapsed.as_secs_f64());
}

/// Counts a relay as active for as long as it lives and records its duration.
pub struct ActiveRelayGuard {
    mode: String,
    started: std::time::Instant,
}

impl ActiveRelayGuard {
    pub fn new(mode: &str) -> Self {
        ACTIVE_RELAYS.with_label_values(&[mode]).inc();
        Self {
            mode: mode.to_string(),
            started: std::time::Instant::now(),
        }
    }
}

impl Drop for ActiveRelayGuard {
    fn drop(&mut self) {
        ACTIVE_RELAYS.with_label_values(&[self.mode.as_str()]).dec();
        observe_extractor_duration(&self.mode, self.started.elapsed());
    }
}
