//! Prometheus-compatible performance counters for the extraction pipeline.
//!
//! Every [`PipelineMetrics`] owns its own registry; there is no global
//! instance. The orchestrator holds one and hands out a shared handle.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::event::{Field, ParsingPath};
use crate::router::ProcessingTier;

/// Latency buckets in seconds, from 0.1ms to 10s. Pattern-only parses land
/// in the low buckets; language-model calls in the high ones.
fn default_latency_buckets() -> Vec<f64> {
    vec![
        0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

fn confidence_buckets() -> Vec<f64> {
    vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
}

/// All counters for one orchestrator.
pub struct PipelineMetrics {
    /// Prometheus registry for all metrics.
    pub registry: Registry,

    // =========================================================================
    // Counters
    // =========================================================================
    /// Parse requests received.
    pub requests_total: IntCounter,
    /// Requests answered from the result cache.
    pub cache_hits_total: IntCounter,
    /// Requests that had to be computed.
    pub cache_misses_total: IntCounter,
    /// Requests that produced the minimal fallback record.
    pub fallbacks_total: IntCounter,
    /// Requests whose processing faulted.
    pub faults_total: IntCounter,
    /// Field decisions, labelled by field and tier.
    pub field_decisions_total: IntCounterVec,
    /// Calls made to the language-model enhancer, labelled by outcome.
    pub language_model_calls_total: IntCounterVec,

    // =========================================================================
    // Histograms
    // =========================================================================
    /// End-to-end parse duration in seconds, labelled by parsing path.
    pub parse_duration_seconds: HistogramVec,
    /// Overall record confidence, labelled by parsing path.
    pub record_confidence: HistogramVec,
    /// Enhancer call duration in seconds, labelled by enhancer name.
    pub language_model_duration_seconds: HistogramVec,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total =
            IntCounter::new("almanac_requests_total", "Total number of parse requests")
                .expect("failed to create counter");

        let cache_hits_total = IntCounter::new(
            "almanac_cache_hits_total",
            "Total number of requests served from cache",
        )
        .expect("failed to create counter");

        let cache_misses_total = IntCounter::new(
            "almanac_cache_misses_total",
            "Total number of requests not found in cache",
        )
        .expect("failed to create counter");

        let fallbacks_total = IntCounter::new(
            "almanac_fallbacks_total",
            "Total number of minimal fallback records produced",
        )
        .expect("failed to create counter");

        let faults_total = IntCounter::new(
            "almanac_faults_total",
            "Total number of requests whose processing faulted",
        )
        .expect("failed to create counter");

        let field_decisions_total = IntCounterVec::new(
            Opts::new(
                "almanac_field_decisions_total",
                "Field routing decisions by field and tier",
            ),
            &["field", "tier"],
        )
        .expect("failed to create counter");

        let language_model_calls_total = IntCounterVec::new(
            Opts::new(
                "almanac_language_model_calls_total",
                "Language-model enhancer calls by outcome",
            ),
            &["outcome"],
        )
        .expect("failed to create counter");

        let parse_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "almanac_parse_duration_seconds",
                "End-to-end parse duration in seconds",
            )
            .buckets(default_latency_buckets()),
            &["path"],
        )
        .expect("failed to create histogram");

        let record_confidence = HistogramVec::new(
            HistogramOpts::new("almanac_record_confidence", "Overall record confidence")
                .buckets(confidence_buckets()),
            &["path"],
        )
        .expect("failed to create histogram");

        let language_model_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "almanac_language_model_duration_seconds",
                "Language-model enhancer call duration in seconds",
            )
            .buckets(default_latency_buckets()),
            &["enhancer"],
        )
        .expect("failed to create histogram");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(cache_hits_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(cache_misses_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(fallbacks_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(faults_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(field_decisions_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(language_model_calls_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(parse_duration_seconds.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(record_confidence.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(language_model_duration_seconds.clone()))
            .expect("failed to register metric");

        Self {
            registry,
            requests_total,
            cache_hits_total,
            cache_misses_total,
            fallbacks_total,
            faults_total,
            field_decisions_total,
            language_model_calls_total,
            parse_duration_seconds,
            record_confidence,
            language_model_duration_seconds,
        }
    }

    /// Record which tier a field was routed to.
    pub fn record_decision(&self, field: Field, tier: ProcessingTier) {
        self.field_decisions_total
            .with_label_values(&[field.as_str(), tier.as_str()])
            .inc();
    }

    /// Record one enhancer call; `outcome` is `ok`, `error` or `unavailable`.
    pub fn record_language_model(&self, outcome: &str) {
        self.language_model_calls_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a finished (non-cached) parse.
    pub fn record_parse(&self, path: ParsingPath, confidence: f32, elapsed: Duration) {
        let label = path_label(path);
        self.parse_duration_seconds
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());
        self.record_confidence
            .with_label_values(&[label])
            .observe(f64::from(confidence));
        if path == ParsingPath::Fallback {
            self.fallbacks_total.inc();
        }
    }

    /// Zero every counter and drop every labelled series.
    pub fn reset(&self) {
        self.requests_total.reset();
        self.cache_hits_total.reset();
        self.cache_misses_total.reset();
        self.fallbacks_total.reset();
        self.faults_total.reset();
        self.field_decisions_total.reset();
        self.language_model_calls_total.reset();
        self.parse_duration_seconds.reset();
        self.record_confidence.reset();
        self.language_model_duration_seconds.reset();
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Export the plain counters as a serializable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let lm = |outcome: &str| {
            self.language_model_calls_total
                .get_metric_with_label_values(&[outcome])
                .map(|c| c.get())
                .unwrap_or(0)
        };
        MetricsSnapshot {
            requests_total: self.requests_total.get(),
            cache_hits_total: self.cache_hits_total.get(),
            cache_misses_total: self.cache_misses_total.get(),
            fallbacks_total: self.fallbacks_total.get(),
            faults_total: self.faults_total.get(),
            language_model_ok: lm("ok"),
            language_model_errors: lm("error"),
        }
    }

    /// Time one enhancer call; the duration is recorded when the guard drops.
    pub fn time_language_model(&self, enhancer: &str) -> HistogramTimer {
        Self::start_timer(
            &self
                .language_model_duration_seconds
                .with_label_values(&[enhancer]),
        )
    }

    /// Start a timer that records duration to a histogram when dropped.
    pub fn start_timer(histogram: &Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram: histogram.clone(),
            start: Instant::now(),
        }
    }
}

fn path_label(path: ParsingPath) -> &'static str {
    match path {
        ParsingPath::Pattern => "pattern",
        ParsingPath::Deterministic => "deterministic",
        ParsingPath::LanguageModel => "language_model",
        ParsingPath::Mixed => "mixed",
        ParsingPath::Manual => "manual",
        ParsingPath::Fallback => "fallback",
    }
}

/// Timer that records duration to a histogram when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

impl HistogramTimer {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serializable view of the pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub fallbacks_total: u64,
    pub faults_total: u64,
    pub language_model_ok: u64,
    pub language_model_errors: u64,
}
