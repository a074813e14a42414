//! Verification metrics
//!
//! Counters and histograms are emitted through the `metrics` facade and are
//! labeled by strategy. With the `prometheus` feature enabled a recorder can
//! be installed and rendered on `GET /metrics`.
//!
//! # Metrics
//!
//! - `traefik_tower_verifications_total`: Counter of verifications started
//! - `traefik_tower_verifications_in_flight`: Gauge of verifications running
//! - `traefik_tower_verification_duration_seconds`: Histogram by outcome
//! - `traefik_tower_verification_outcomes_total`: Counter by outcome
//! - `traefik_tower_upstream_requests_total`: Counter of outbound calls by
//!   endpoint and status

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::cell::Cell;
use std::time::{Duration, Instant};

use crate::error::AuthResult;

/// Metrics for a single verification
///
/// Records the outcome once; dropping it unrecorded still releases the
/// in-flight gauge, so a cancelled request does not leak it.
#[derive(Debug)]
pub struct VerifyMetrics {
    strategy: &'static str,
    start: Instant,
    recorded: Cell<bool>,
}

impl VerifyMetrics {
    /// Start tracking a verification run by `strategy`
    pub fn new(strategy: &'static str) -> Self {
        increment_counter!("traefik_tower_verifications_total", "strategy" => strategy);
        increment_gauge!("traefik_tower_verifications_in_flight", 1.0, "strategy" => strategy);

        Self {
            strategy,
            start: Instant::now(),
            recorded: Cell::new(false),
        }
    }

    /// Record the outcome of the verification
    ///
    /// Only the first call has an effect.
    pub fn record<T>(&self, outcome: &AuthResult<T>) {
        if self.recorded.get() {
            return;
        }
        self.recorded.set(true);

        let label = outcome_label(outcome);
        histogram!(
            "traefik_tower_verification_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "strategy" => self.strategy,
            "outcome" => label
        );
        increment_counter!(
            "traefik_tower_verification_outcomes_total",
            "strategy" => self.strategy,
            "outcome" => label
        );
        decrement_gauge!("traefik_tower_verifications_in_flight", 1.0, "strategy" => self.strategy);
    }

    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for VerifyMetrics {
    fn drop(&mut self) {
        if !self.recorded.get() {
            decrement_gauge!("traefik_tower_verifications_in_flight", 1.0, "strategy" => self.strategy);
        }
    }
}

/// `ok`, `unauthorized` or `internal`
pub fn outcome_label<T>(outcome: &AuthResult<T>) -> &'static str {
    match outcome {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

/// Count one outbound call; `status` is the HTTP status or `error`
pub fn record_upstream(endpoint: &str, status: &str) {
    increment_counter!(
        "traefik_tower_upstream_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    );
}

/// Rendered Prometheus exposition, if an exporter is installed
#[derive(Clone, Default)]
pub struct MetricsRender {
    #[cfg(feature = "prometheus")]
    handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsRender {
    /// Text exposition of every recorded metric, `None` when no exporter
    /// is installed
    pub fn render(&self) -> Option<String> {
        #[cfg(feature = "prometheus")]
        {
            self.handle.as_ref().map(|handle| handle.render())
        }
        #[cfg(not(feature = "prometheus"))]
        {
            None
        }
    }

    fn render_enabled(&self) -> bool {
        #[cfg(feature = "prometheus")]
        {
            self.handle.is_some()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            false
        }
    }
}

impl std::fmt::Debug for MetricsRender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRender")
            .field("enabled", &self.render_enabled())
            .finish()
    }
}

/// Initializes the Prometheus recorder
///
/// When the `prometheus` feature is enabled this installs a global recorder
/// and returns a handle for `GET /metrics`. Without the feature, or when a
/// recorder is already installed, the returned handle renders nothing.
pub fn init_metrics_exporter() -> MetricsRender {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => MetricsRender {
                handle: Some(handle),
            },
            Err(e) => {
                tracing::warn!("Failed to install Prometheus exporter: {}", e);
                MetricsRender::default()
            }
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        MetricsRender::default()
    }
}
