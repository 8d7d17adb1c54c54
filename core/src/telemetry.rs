//! Logging and metrics bootstrap. `init_telemetry` wires `tracing` to
//! stderr with env-filter control and installs the global OpenTelemetry
//! meter provider every registry/gateway module pulls counters from;
//! `shutdown_telemetry` flushes pending metrics on the way out.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. Safe to call once at
/// process startup, before any `EventGateway` is constructed. Respects
/// `RUST_LOG`, defaulting to `info`.
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Flushes any buffered telemetry. Called once during graceful shutdown.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Rolling latency/throughput snapshot for diagnostic surfaces (e.g. a
/// `system.*` query handler that wants more than raw OTel counters).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Metrics {
    pub total_events: u64,
    pub events_per_second: f64,
    pub avg_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
}

pub struct MetricsCollector {
    metrics: Arc<RwLock<Metrics>>,
    latencies: Arc<RwLock<Vec<Duration>>>,
    error_count: Arc<RwLock<u64>>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(Metrics::default())),
            latencies: Arc::new(RwLock::new(Vec::new())),
            error_count: Arc::new(RwLock::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Folds one more processed event into the rolling snapshot.
    /// `success` is whether `process_event` returned `Ok`.
    pub fn record_event(&self, latency: Duration, success: bool) {
        let mut latencies = self.latencies.write().unwrap();
        latencies.push(latency);

        if !success {
            *self.error_count.write().unwrap() += 1;
        }

        let total_ms: f64 = latencies.iter().map(|d| d.as_millis() as f64).sum();
        let avg_latency_ms = total_ms / latencies.len() as f64;

        let mut sorted = latencies.clone();
        sorted.sort();
        let p99_idx = ((sorted.len() as f64) * 0.99) as usize;
        let p99_latency_ms = sorted
            .get(p99_idx.min(sorted.len().saturating_sub(1)))
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0);

        let elapsed = self.start_time.elapsed().as_secs_f64().max(f64::EPSILON);
        let total_events = latencies.len() as u64;
        let errors = *self.error_count.read().unwrap();

        let mut metrics = self.metrics.write().unwrap();
        metrics.total_events = total_events;
        metrics.avg_latency_ms = avg_latency_ms;
        metrics.p99_latency_ms = p99_latency_ms;
        metrics.events_per_second = total_events as f64 / elapsed;
        metrics.error_rate = errors as f64 / total_events as f64;
    }

    pub fn get_metrics(&self) -> Metrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn print_metrics(&self) {
        let metrics = self.get_metrics();
        tracing::info!(
            total_events = metrics.total_events,
            events_per_second = metrics.events_per_second,
            avg_latency_ms = metrics.avg_latency_ms,
            p99_latency_ms = metrics.p99_latency_ms,
            "gateway metrics"
        );
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
