//! Prometheus metrics for the verification engine.
//!
//! [`EngineMetrics`] owns a dedicated [`Registry`] that the bridge's
//! `/metrics` endpoint encodes into the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

/// Central collection of engine metrics.
pub struct EngineMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Challenges delivered to principals.
    pub challenges_issued: IntCounter,
    /// Requests turned away by the cooldown.
    pub challenges_rate_limited: IntCounter,
    /// Challenge deliveries the platform refused.
    pub delivery_failures: IntCounter,
    /// Sessions resolved as verified.
    pub verifications_succeeded: IntCounter,
    /// Sessions resolved as failed (timeout, exhausted, unexpected).
    pub verifications_failed: IntCounter,
    /// Suspensions imposed after repeated failures.
    pub suspensions: IntCounter,
    /// Suspensions lifted by their timer.
    pub suspensions_lifted: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Sessions currently waiting for a response.
    pub pending_sessions: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Seconds from issuance to a correct answer.
    pub solve_time_secs: Histogram,
}

impl EngineMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let challenges_issued = register_int_counter_with_registry!(
            Opts::new("warden_challenges_issued_total", "Challenges delivered"),
            registry
        )
        .expect("failed to register challenges_issued counter");

        let challenges_rate_limited = register_int_counter_with_registry!(
            Opts::new(
                "warden_challenges_rate_limited_total",
                "Challenge requests rejected by the cooldown"
            ),
            registry
        )
        .expect("failed to register challenges_rate_limited counter");

        let delivery_failures = register_int_counter_with_registry!(
            Opts::new(
                "warden_delivery_failures_total",
                "Challenge deliveries refused by the platform"
            ),
            registry
        )
        .expect("failed to register delivery_failures counter");

        let verifications_succeeded = register_int_counter_with_registry!(
            Opts::new(
                "warden_verifications_succeeded_total",
                "Sessions resolved as verified"
            ),
            registry
        )
        .expect("failed to register verifications_succeeded counter");

        let verifications_failed = register_int_counter_with_registry!(
            Opts::new(
                "warden_verifications_failed_total",
                "Sessions resolved as failed"
            ),
            registry
        )
        .expect("failed to register verifications_failed counter");

        let suspensions = register_int_counter_with_registry!(
            Opts::new("warden_suspensions_total", "Suspensions imposed"),
            registry
        )
        .expect("failed to register suspensions counter");

        let suspensions_lifted = register_int_counter_with_registry!(
            Opts::new("warden_suspensions_lifted_total", "Suspensions lifted"),
            registry
        )
        .expect("failed to register suspensions_lifted counter");

        let pending_sessions = register_int_gauge_with_registry!(
            Opts::new("warden_pending_sessions", "Sessions awaiting a response"),
            registry
        )
        .expect("failed to register pending_sessions gauge");

        // 1 s → 128 s covers every sane timeout window.
        let solve_time_secs = register_histogram_with_registry!(
            HistogramOpts::new(
                "warden_solve_time_secs",
                "Seconds from issuance to a correct answer"
            )
            .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
            registry
        )
        .expect("failed to register solve_time_secs histogram");

        Self {
            registry,
            challenges_issued,
            challenges_rate_limited,
            delivery_failures,
            verifications_succeeded,
            verifications_failed,
            suspensions,
            suspensions_lifted,
            pending_sessions,
            solve_time_secs,
        }
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
