//! Deterministic Backup Coordinator.
//!
//! Queries every available secondary recognizer for one field, normalizes
//! their answers into the common candidate shape and arbitrates between
//! them with [`aggregate_score`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::FixedOffset;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::deadline::DeadlineRecognizer;
use super::entity::EntityRecognizer;
use super::scoring::aggregate_score;
use super::traits::{Recognizer, RecognizerStats, RecognizerStatsSnapshot};
use crate::config::{RecognizerConfig, MAX_OFFSET_MINUTES};
use crate::error::RecognitionError;
use crate::event::{
    Candidate, CandidateSource, CandidateValue, Field, FieldResult, ReferenceTime,
};

/// Source tag of the failure candidate returned when nothing answered.
pub const BACKUP_SOURCE: &str = "backup";

struct Registered {
    recognizer: Arc<dyn Recognizer>,
    stats: RecognizerStats,
}

/// Fans one field out to the registered recognizers, in registration order.
pub struct BackupCoordinator {
    recognizers: Vec<Registered>,
    config: RecognizerConfig,
}

impl BackupCoordinator {
    /// A coordinator with no recognizers.
    pub fn new(config: RecognizerConfig) -> Self {
        Self {
            recognizers: Vec::new(),
            config,
        }
    }

    /// A coordinator with the built-in recognizers registered when the
    /// configuration enables them.
    pub fn with_builtin(config: RecognizerConfig) -> Self {
        let builtin = config.builtin;
        let mut coordinator = Self::new(config);
        if builtin {
            coordinator.register(Arc::new(DeadlineRecognizer::new()));
            coordinator.register(Arc::new(EntityRecognizer::new()));
        }
        coordinator
    }

    pub fn register(&mut self, recognizer: Arc<dyn Recognizer>) {
        debug!(name = recognizer.name(), "Registered recognizer");
        self.recognizers.push(Registered {
            recognizer,
            stats: RecognizerStats::new(),
        });
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.register(recognizer);
        self
    }

    pub fn len(&self) -> usize {
        self.recognizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recognizers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.recognizers.iter().map(|r| r.recognizer.name()).collect()
    }

    /// Whether any registered recognizer claims `field`.
    pub fn supports(&self, field: Field) -> bool {
        self.recognizers
            .iter()
            .any(|r| r.recognizer.supports(field))
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn default_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.config.default_offset_minutes.checked_mul(60)?)
    }

    /// Extract `field` from `text` through the secondary tier.
    ///
    /// Never fails: when nothing usable comes back the winner is a
    /// zero-confidence failure candidate.
    pub async fn extract_field(
        &self,
        text: &str,
        field: Field,
        reference: &ReferenceTime,
    ) -> FieldResult {
        let started = Instant::now();
        let mut answers: Vec<(Candidate, f32)> = Vec::new();

        for registered in &self.recognizers {
            let recognizer = registered.recognizer.as_ref();
            if !recognizer.supports(field) {
                continue;
            }
            if !self.is_available(recognizer).await {
                debug!(
                    name = recognizer.name(),
                    field = field.as_str(),
                    "Recognizer unavailable, skipping"
                );
                continue;
            }

            let call_started = Instant::now();
            let outcome = timeout(self.timeout(), recognizer.extract(text, field, reference)).await;
            let latency = call_started.elapsed();

            match outcome {
                Ok(Ok(Some(candidate))) => match self.normalize(candidate, recognizer.name()) {
                    Ok(candidate) if !candidate.is_failure() => {
                        registered.stats.record(true, false, latency);
                        let score = aggregate_score(
                            &candidate,
                            recognizer.reliability(),
                            text.len(),
                            reference,
                        );
                        debug!(
                            name = recognizer.name(),
                            field = field.as_str(),
                            confidence = candidate.confidence(),
                            score,
                            "Recognizer answered"
                        );
                        answers.push((candidate, score));
                    }
                    Ok(_) => registered.stats.record(false, false, latency),
                    Err(e) => {
                        warn!(name = recognizer.name(), error = %e, "Rejected recognizer answer");
                        registered.stats.record(false, true, latency);
                    }
                },
                Ok(Ok(None)) => registered.stats.record(false, false, latency),
                Ok(Err(e)) => {
                    warn!(name = recognizer.name(), error = %e, "Recognizer failed");
                    registered.stats.record(false, true, latency);
                }
                Err(_) => {
                    let e = RecognitionError::Timeout {
                        name: recognizer.name().to_string(),
                        timeout_ms: self.config.timeout_ms,
                    };
                    warn!(error = %e, "Recognizer timed out");
                    registered.stats.record(false, true, latency);
                }
            }
        }

        // Stable: equal scores keep registration order.
        answers.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut ranked = answers.into_iter().map(|(candidate, _)| candidate);

        let result = match ranked.next() {
            Some(winner) => FieldResult::new(field, winner).with_alternatives(ranked),
            None => FieldResult::new(
                field,
                Candidate::failure(CandidateSource::recognizer(BACKUP_SOURCE)),
            ),
        };
        result.with_latency(started.elapsed())
    }

    async fn is_available(&self, recognizer: &dyn Recognizer) -> bool {
        matches!(
            timeout(self.timeout(), recognizer.is_available()).await,
            Ok(true)
        )
    }

    /// Enforce an explicit, sane UTC offset on datetime answers. Naive
    /// datetimes take the configured default offset at a small penalty.
    fn normalize(&self, candidate: Candidate, name: &str) -> Result<Candidate, RecognitionError> {
        match candidate.value() {
            CandidateValue::DateTime(dt) => {
                let seconds = dt.offset().local_minus_utc();
                if seconds.abs() > MAX_OFFSET_MINUTES * 60 {
                    return Err(RecognitionError::InvalidTimezone(format!(
                        "{name} returned offset of {seconds}s"
                    )));
                }
                Ok(candidate)
            }
            CandidateValue::LocalDateTime(naive) => {
                let offset = self.default_offset().ok_or_else(|| {
                    RecognitionError::InvalidTimezone(format!(
                        "default offset of {} minutes",
                        self.config.default_offset_minutes
                    ))
                })?;
                let localized = naive
                    .and_local_timezone(offset)
                    .single()
                    .ok_or_else(|| RecognitionError::InvalidTimezone(naive.to_string()))?;
                let confidence = candidate.confidence() - self.config.naive_timezone_penalty;
                Ok(candidate.revalued(CandidateValue::DateTime(localized), confidence))
            }
            _ => Ok(candidate),
        }
    }

    /// Counters for every registered recognizer.
    pub fn stats(&self) -> Vec<RecognizerStatsSnapshot> {
        self.recognizers
            .iter()
            .map(|r| r.stats.snapshot(r.recognizer.name()))
            .collect()
    }

    pub fn reset_stats(&self) {
        for registered in &self.recognizers {
            registered.stats.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::event::{MethodId, Span};
    use crate::recognizers::traits::SourceReliability;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        reliability: SourceReliability,
        available: bool,
        answer: Option<Candidate>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(
            name: &'static str,
            reliability: SourceReliability,
            answer: Option<Candidate>,
        ) -> Self {
            Self {
                name,
                reliability,
                available: true,
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Recognizer for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn reliability(&self) -> SourceReliability {
            self.reliability
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn extract(
            &self,
            _text: &str,
            _field: Field,
            _reference: &ReferenceTime,
        ) -> Result<Option<Candidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl Recognizer for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn reliability(&self) -> SourceReliability {
            SourceReliability::High
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn extract(
            &self,
            _text: &str,
            _field: Field,
            _reference: &ReferenceTime,
        ) -> Result<Option<Candidate>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
    }

    struct Broken;

    #[async_trait]
    impl Recognizer for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn reliability(&self) -> SourceReliability {
            SourceReliability::High
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn extract(
            &self,
            _text: &str,
            _field: Field,
            _reference: &ReferenceTime,
        ) -> Result<Option<Candidate>> {
            Err(RecognitionError::Backend("connection refused".into()).into())
        }
    }

    const TEXT: &str = "Lunch at Blue Bottle Cafe";

    fn reference() -> ReferenceTime {
        ReferenceTime::at(2025, 9, 29, 17, 0).unwrap()
    }

    fn location(name: &str, value: &str, confidence: f32, start: usize, end: usize) -> Candidate {
        Candidate::new(
            CandidateValue::Text(value.to_string()),
            CandidateSource::recognizer(name),
            confidence,
            MethodId::ExternalRecognizer,
        )
        .with_span(Span::new(start, end, TEXT.len()).unwrap(), TEXT)
    }

    fn empty_coordinator() -> BackupCoordinator {
        BackupCoordinator::new(RecognizerConfig {
            builtin: false,
            timeout_ms: 50,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_no_recognizers_yields_failure() {
        let result = empty_coordinator()
            .extract_field(TEXT, Field::Location, &reference())
            .await;
        assert!(result.winner.is_failure());
        assert_eq!(result.confidence(), 0.0);
        assert!(result.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_arbitration_prefers_aggregate_score() {
        // "Blue Bottle Cafe" is compact; the whole-text answer is penalized
        // for its span even though its own confidence is higher.
        let compact = location("a", "Blue Bottle Cafe", 0.7, 9, 25);
        let sprawling = location("b", "Lunch at Blue Bottle Cafe", 0.8, 0, TEXT.len());
        let coordinator = empty_coordinator()
            .with_recognizer(Arc::new(Fixed::new("b", SourceReliability::High, Some(sprawling))))
            .with_recognizer(Arc::new(Fixed::new("a", SourceReliability::Medium, Some(compact))));

        let result = coordinator.extract_field(TEXT, Field::Location, &reference()).await;
        assert_eq!(result.winner.value().as_text(), Some("Blue Bottle Cafe"));
        assert_eq!(result.alternatives.len(), 1);
        assert_eq!(
            result.alternatives[0].value().as_text(),
            Some("Lunch at Blue Bottle Cafe")
        );
    }

    #[tokio::test]
    async fn test_unavailable_and_failing_recognizers_are_skipped() {
        let mut offline = Fixed::new(
            "offline",
            SourceReliability::High,
            Some(location("offline", "Nowhere", 0.9, 0, 5)),
        );
        offline.available = false;
        let offline = Arc::new(offline);
        let coordinator = empty_coordinator()
            .with_recognizer(offline.clone())
            .with_recognizer(Arc::new(Broken))
            .with_recognizer(Arc::new(Slow))
            .with_recognizer(Arc::new(Fixed::new(
                "ok",
                SourceReliability::Low,
                Some(location("ok", "Blue Bottle Cafe", 0.6, 9, 25)),
            )));

        let result = coordinator.extract_field(TEXT, Field::Location, &reference()).await;
        assert_eq!(result.winner.value().as_text(), Some("Blue Bottle Cafe"));
        assert_eq!(offline.calls.load(Ordering::SeqCst), 0);

        let stats = coordinator.stats();
        let broken = stats.iter().find(|s| s.name == "broken").unwrap();
        assert_eq!(broken.failures, 1);
        let slow = stats.iter().find(|s| s.name == "slow").unwrap();
        assert_eq!(slow.failures, 1);
        let ok = stats.iter().find(|s| s.name == "ok").unwrap();
        assert_eq!(ok.successes, 1);
        assert_eq!(ok.success_rate, 1.0);

        coordinator.reset_stats();
        assert!(coordinator.stats().iter().all(|s| s.calls == 0));
    }

    #[tokio::test]
    async fn test_naive_datetime_gets_default_offset() {
        let naive = NaiveDate::from_ymd_opt(2025, 10, 3)
            .unwrap()
            .and_hms_opt(17, 0, 0)
            .unwrap();
        let answer = Candidate::new(
            CandidateValue::LocalDateTime(naive),
            CandidateSource::recognizer("naive"),
            0.7,
            MethodId::ExternalRecognizer,
        );
        let coordinator = BackupCoordinator::new(RecognizerConfig {
            builtin: false,
            default_offset_minutes: 120,
            ..Default::default()
        })
        .with_recognizer(Arc::new(Fixed::new("naive", SourceReliability::High, Some(answer))));

        let result = coordinator
            .extract_field("due Friday", Field::StartDatetime, &reference())
            .await;
        match result.winner.value() {
            CandidateValue::DateTime(dt) => {
                assert_eq!(dt.offset().local_minus_utc(), 7200);
                assert_eq!(dt.naive_local(), naive);
            }
            other => panic!("expected an explicit datetime, got {other:?}"),
        }
        assert!((result.confidence() - 0.65).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_out_of_range_offset_is_rejected() {
        // +14:30 is past the widest real-world offset.
        let dt = DateTime::parse_from_rfc3339("2025-10-03T17:00:00+14:30").unwrap();
        let answer = Candidate::new(
            CandidateValue::DateTime(dt),
            CandidateSource::recognizer("bad"),
            0.9,
            MethodId::ExternalRecognizer,
        );
        let coordinator = empty_coordinator()
            .with_recognizer(Arc::new(Fixed::new("bad", SourceReliability::High, Some(answer))));

        let result = coordinator
            .extract_field("due Friday", Field::StartDatetime, &reference())
            .await;
        assert!(result.winner.is_failure());
        assert_eq!(coordinator.stats()[0].failures, 1);
    }

    #[test]
    fn test_builtin_registration() {
        let coordinator = BackupCoordinator::with_builtin(RecognizerConfig::default());
        assert_eq!(coordinator.names(), vec!["deadline", "entity"]);
        assert!(coordinator.supports(Field::StartDatetime));
        assert!(coordinator.supports(Field::Participants));

        let disabled = BackupCoordinator::with_builtin(RecognizerConfig {
            builtin: false,
            ..Default::default()
        });
        assert!(disabled.is_empty());
    }
}
