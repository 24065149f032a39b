//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Histogram, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Summarization metrics
    pub summarizations: CounterVec,
    pub tokens_saved: Histogram,

    // Persistence metrics
    pub persistence_retries: Counter,
    pub persistence_rollbacks: Counter,
    pub critical_inconsistencies: Counter,

    // Session lifecycle metrics
    pub sessions_created: Counter,
    pub sessions_deleted: CounterVec,
    pub titles_generated: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let summarizations = register_counter_vec_with_registry!(
            Opts::new("session_summarizations_total", "Summarization attempts by outcome"),
            &["outcome"],
            registry
        )?;

        let tokens_saved = register_histogram_with_registry!(
            "session_summarization_tokens_saved",
            "Tokens removed from the working context per summarization",
            registry
        )?;

        let persistence_retries = register_counter_with_registry!(
            Opts::new("session_persistence_retries_total", "Layer-2 write retries"),
            registry
        )?;

        let persistence_rollbacks = register_counter_with_registry!(
            Opts::new("session_persistence_rollbacks_total", "Layer-1 rollbacks after Layer-2 failure"),
            registry
        )?;

        let critical_inconsistencies = register_counter_with_registry!(
            Opts::new(
                "session_critical_inconsistencies_total",
                "Failed rollbacks leaving storage layers diverged"
            ),
            registry
        )?;

        let sessions_created = register_counter_with_registry!(
            Opts::new("sessions_created_total", "Sessions created"),
            registry
        )?;

        let sessions_deleted = register_counter_vec_with_registry!(
            Opts::new("sessions_deleted_total", "Sessions deleted by reason"),
            &["reason"],
            registry
        )?;

        let titles_generated = register_counter_vec_with_registry!(
            Opts::new("session_titles_generated_total", "Title generation attempts by status"),
            &["status"],
            registry
        )?;

        Ok(Self {
            registry,
            summarizations,
            tokens_saved,
            persistence_retries,
            persistence_rollbacks,
            critical_inconsistencies,
            sessions_created,
            sessions_deleted,
            titles_generated,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a summarization outcome (`completed`, `skipped`, `failed`)
    pub fn record_summarization(&self, outcome: &str) {
        self.summarizations.with_label_values(&[outcome]).inc();
    }

    pub fn record_tokens_saved(&self, saved: usize) {
        self.tokens_saved.observe(saved as f64);
    }

    pub fn record_session_deleted(&self, reason: &str) {
        self.sessions_deleted.with_label_values(&[reason]).inc();
    }

    pub fn record_title(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.titles_generated.with_label_values(&[status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
