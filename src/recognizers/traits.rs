//! Secondary recognizer contract and per-recognizer counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{Candidate, Field, ReferenceTime};

/// Fixed reliability ranking of a recognizer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceReliability {
    High,
    Medium,
    Low,
}

impl SourceReliability {
    /// Weight in [0, 1] used by the arbitration score.
    pub fn weight(self) -> f32 {
        match self {
            SourceReliability::High => 1.0,
            SourceReliability::Medium => 0.7,
            SourceReliability::Low => 0.4,
        }
    }
}

/// A secondary, deterministic entity recognizer.
///
/// Implementations report "nothing found" as `Ok(None)`; an `Err` or a
/// timeout is treated like an unavailable backend.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Stable name, used for counters and candidate sources.
    fn name(&self) -> &str;

    fn reliability(&self) -> SourceReliability;

    /// Whether this recognizer can answer for `field` at all.
    fn supports(&self, _field: Field) -> bool {
        true
    }

    async fn is_available(&self) -> bool;

    async fn extract(
        &self,
        text: &str,
        field: Field,
        reference: &ReferenceTime,
    ) -> Result<Option<Candidate>>;
}

// ============================================================================
// Statistics
// ============================================================================

/// Append-only counters for one recognizer.
#[derive(Debug, Default)]
pub struct RecognizerStats {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
}

impl RecognizerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call. `answered` is true when the call produced a usable
    /// candidate; `failed` when it errored or timed out.
    pub fn record(&self, answered: bool, failed: bool, latency: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if answered {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, name: &str) -> RecognizerStatsSnapshot {
        let calls = self.calls.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let total_latency_us = self.total_latency_us.load(Ordering::Relaxed);
        let (success_rate, mean_latency_ms) = if calls == 0 {
            (0.0, 0.0)
        } else {
            (
                successes as f64 / calls as f64,
                total_latency_us as f64 / calls as f64 / 1000.0,
            )
        };
        RecognizerStatsSnapshot {
            name: name.to_string(),
            calls,
            successes,
            failures,
            success_rate,
            mean_latency_ms,
        }
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of a recognizer's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizerStatsSnapshot {
    pub name: String,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliability_ranking() {
        assert!(SourceReliability::High.weight() > SourceReliability::Medium.weight());
        assert!(SourceReliability::Medium.weight() > SourceReliability::Low.weight());
    }

    #[test]
    fn test_stats_snapshot_and_reset() {
        let stats = RecognizerStats::new();
        stats.record(true, false, Duration::from_millis(4));
        stats.record(false, false, Duration::from_millis(2));
        stats.record(false, true, Duration::from_millis(0));

        let snapshot = stats.snapshot("entity");
        assert_eq!(snapshot.name, "entity");
        assert_eq!(snapshot.calls, 3);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
        assert!((snapshot.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.mean_latency_ms - 2.0).abs() < 1e-9);

        stats.reset();
        let snapshot = stats.snapshot("entity");
        assert_eq!(snapshot.calls, 0);
        assert_eq!(snapshot.success_rate, 0.0);
    }
}
