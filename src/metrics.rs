//! Prometheus metrics for the pool engine.
//!
//! Call sites go through [`PoolMetrics`]; with the `metrics` feature disabled
//! every method compiles to nothing.

#[cfg(feature = "metrics")]
mod registry {
    use lazy_static::lazy_static;
    use prometheus::{
        register_histogram, register_int_counter_vec, register_int_gauge_vec, Histogram,
        HistogramOpts, IntCounterVec, IntGaugeVec,
    };

    lazy_static! {
        pub static ref POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
            "replica_pool_connections",
            "Number of live pooled connections per service",
            &["service"]
        )
        .expect("register replica_pool_connections gauge");
        pub static ref DIAL_FAILURES: IntCounterVec = register_int_counter_vec!(
            "replica_pool_dial_failures_total",
            "Endpoints skipped because dialing or client construction failed",
            &["service"]
        )
        .expect("register replica_pool_dial_failures_total counter_vec");
        pub static ref PROBE_FAILURES: IntCounterVec = register_int_counter_vec!(
            "replica_pool_probe_failures_total",
            "Liveness probes that failed or timed out",
            &["service"]
        )
        .expect("register replica_pool_probe_failures_total counter_vec");
        pub static ref EVICTIONS: IntCounterVec = register_int_counter_vec!(
            "replica_pool_evictions_total",
            "Connections removed after a failed liveness probe",
            &["service"]
        )
        .expect("register replica_pool_evictions_total counter_vec");
        pub static ref REFRESHES: IntCounterVec = register_int_counter_vec!(
            "replica_pool_refresh_total",
            "Discovery refresh runs by outcome",
            &["service", "outcome"]
        )
        .expect("register replica_pool_refresh_total counter_vec");
        pub static ref HEALTH_CYCLE: Histogram = register_histogram!(HistogramOpts::new(
            "replica_pool_health_cycle_seconds",
            "Duration of one health check cycle across all pools"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]))
        .expect("register replica_pool_health_cycle_seconds histogram");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics;

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
impl PoolMetrics {
    #[inline]
    pub fn set_connections(service: &str, count: usize) {
        #[cfg(feature = "metrics")]
        registry::POOL_CONNECTIONS
            .with_label_values(&[service])
            .set(count as i64);
    }

    #[inline]
    pub fn dial_failure(service: &str) {
        #[cfg(feature = "metrics")]
        registry::DIAL_FAILURES.with_label_values(&[service]).inc();
    }

    #[inline]
    pub fn probe_failure(service: &str) {
        #[cfg(feature = "metrics")]
        registry::PROBE_FAILURES.with_label_values(&[service]).inc();
    }

    #[inline]
    pub fn evictions(service: &str, count: usize) {
        #[cfg(feature = "metrics")]
        registry::EVICTIONS
            .with_label_values(&[service])
            .inc_by(count as u64);
    }

    #[inline]
    pub fn refresh(service: &str, outcome: &str) {
        #[cfg(feature = "metrics")]
        registry::REFRESHES
            .with_label_values(&[service, outcome])
            .inc();
    }

    #[inline]
    pub fn health_cycle(duration: std::time::Duration) {
        #[cfg(feature = "metrics")]
        registry::HEALTH_CYCLE.observe(duration.as_secs_f64());
    }
}
