//! Hybrid Orchestrator.
//!
//! Drives one parse end to end: pattern extraction, routing, escalation to
//! the secondary recognizers and then to the language-model enhancer, and
//! the merge into one [`EventRecord`]. Every fault below this boundary ends
//! as the minimal fallback record; nothing propagates to the caller.

mod merge;

pub(crate) use merge::RecordMerger;

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheOutcome, ResultCache};
use crate::config::{Config, OrchestratorConfig};
use crate::enhancer::{LanguageModelEnhancer, OpenAiEnhancer};
use crate::error::Result;
use crate::event::{
    Candidate, CandidateSource, EventRecord, Field, FieldResult, MethodId, ParseMode,
    ParseRequest, ParsingPath,
};
use crate::metrics::PipelineMetrics;
use crate::patterns::PatternEngine;
use crate::recognizers::{BackupCoordinator, Recognizer, RecognizerStatsSnapshot};
use crate::router::{FieldRouter, ProcessingTier};

/// Metadata key set when the language-model tier was wanted but could not
/// answer.
pub const LANGUAGE_MODEL_ERROR_KEY: &str = "language_model_error";

/// Metadata key carrying the reason a record is a fault fallback.
pub const ERROR_KEY: &str = "error";

/// Runs the escalation chain for parse requests.
pub struct HybridOrchestrator {
    config: OrchestratorConfig,
    engine: Arc<PatternEngine>,
    router: FieldRouter,
    backup: BackupCoordinator,
    enhancer: Option<Arc<dyn LanguageModelEnhancer>>,
    merger: RecordMerger,
    cache: ResultCache,
    metrics: Arc<PipelineMetrics>,
}

impl HybridOrchestrator {
    /// Build an orchestrator from configuration. The built-in recognizers
    /// are registered when enabled; an OpenAI-compatible enhancer is built
    /// when a language-model section is present.
    pub fn new(config: &Config) -> Self {
        let enhancer: Option<Arc<dyn LanguageModelEnhancer>> =
            config.language_model.clone().and_then(|lm| {
                match OpenAiEnhancer::new(lm) {
                    Ok(enhancer) => Some(Arc::new(enhancer) as Arc<dyn LanguageModelEnhancer>),
                    Err(e) => {
                        warn!(error = %e, "Language-model enhancer disabled");
                        None
                    }
                }
            });

        Self {
            config: config.orchestrator.clone(),
            engine: Arc::new(PatternEngine::new(config.patterns.clone())),
            router: FieldRouter::new(config.routing.clone()),
            backup: BackupCoordinator::with_builtin(config.recognizers.clone()),
            enhancer,
            merger: RecordMerger::new(config.recognizers.default_offset_minutes),
            cache: ResultCache::new(&config.cache),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Register an additional secondary recognizer.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.backup.register(recognizer);
        self
    }

    /// Replace the backup coordinator wholesale.
    pub fn with_backup(mut self, backup: BackupCoordinator) -> Self {
        self.backup = backup;
        self
    }

    /// Use `enhancer` as the language-model tier.
    pub fn with_enhancer(mut self, enhancer: Arc<dyn LanguageModelEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn without_enhancer(mut self) -> Self {
        self.enhancer = None;
        self
    }

    pub fn engine(&self) -> Arc<PatternEngine> {
        Arc::clone(&self.engine)
    }

    pub fn router(&self) -> &FieldRouter {
        &self.router
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Shared handle to the performance counters.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn recognizer_stats(&self) -> Vec<RecognizerStatsSnapshot> {
        self.backup.stats()
    }

    /// Zero the pipeline counters and every recognizer's stats.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        self.backup.reset_stats();
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Parse one request. Never fails.
    pub async fn parse(&self, request: &ParseRequest) -> EventRecord {
        let started = Instant::now();
        self.metrics.requests_total.inc();

        let key = CacheKey::new(request);
        let (mut record, mut outcome) = self
            .cache
            .get_or_compute(key, self.parse_guarded(request))
            .await;

        // A whitespace variant shares the key, but its spans and description
        // belong to the stored text.
        if outcome == CacheOutcome::Hit && record.description != request.text {
            debug!("Cached record is for a whitespace variant; recomputing");
            record = match self.parse_guarded(request).await {
                Ok(record) | Err(record) => record,
            };
            outcome = CacheOutcome::Bypassed;
        }

        match outcome {
            CacheOutcome::Hit => {
                self.metrics.cache_hits_total.inc();
                record.cache_hit = true;
            }
            CacheOutcome::Miss => self.metrics.cache_misses_total.inc(),
            CacheOutcome::Bypassed => {}
        }
        record.processing_time_ms = started.elapsed().as_millis() as u64;
        record
    }

    /// Run the pipeline, converting errors and panics into a fallback
    /// record. `Err` marks a record that must not be cached.
    async fn parse_guarded(
        &self,
        request: &ParseRequest,
    ) -> std::result::Result<EventRecord, EventRecord> {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.run(request)).catch_unwind().await;

        let result = match outcome {
            Ok(Ok(record)) if record.metadata.contains_key(LANGUAGE_MODEL_ERROR_KEY) => {
                Err(record)
            }
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => Err(self.fault(&request.text, e.to_string())),
            Err(panic) => Err(self.fault(&request.text, panic_message(panic))),
        };

        let record = match &result {
            Ok(record) | Err(record) => record,
        };
        if record.parsing_path == ParsingPath::Fallback {
            info!(
                error = record.metadata.get(ERROR_KEY).and_then(|e| e.as_str()),
                "Returning fallback record"
            );
        }
        self.metrics
            .record_parse(record.parsing_path, record.confidence, started.elapsed());
        result
    }

    fn fault(&self, text: &str, reason: String) -> EventRecord {
        warn!(error = %reason, "Parse faulted");
        self.metrics.faults_total.inc();
        EventRecord::fallback(text, Some(reason))
    }

    async fn run(&self, request: &ParseRequest) -> Result<EventRecord> {
        debug!(mode = ?request.mode, len = request.text.len(), "Parsing request");
        match request.mode {
            ParseMode::PatternOnly => self.run_pattern_only(request),
            ParseMode::LanguageModelOnly => self.run_language_model_only(request).await,
            ParseMode::Hybrid => self.run_hybrid(request).await,
        }
    }

    fn run_pattern_only(&self, request: &ParseRequest) -> Result<EventRecord> {
        self.merger.pattern_record(&self.engine, request)
    }

    async fn run_language_model_only(&self, request: &ParseRequest) -> Result<EventRecord> {
        let partial = EventRecord::new(&request.text);
        let mut results = BTreeMap::new();
        let wanted: Vec<Field> = Field::ALL
            .iter()
            .copied()
            .filter(|f| *f != Field::Description)
            .collect();

        match self.call_enhancer(request, &partial).await {
            Ok(answer) => {
                for field in wanted {
                    if let Some(candidate) = self.capped(&answer, field) {
                        results.insert(field, FieldResult::new(field, candidate));
                    }
                }
                let mut record = self.merger.merge(
                    &request.text,
                    &request.reference,
                    results.into_values(),
                    false,
                )?;
                self.add_confirmation_warnings(&mut record);
                Ok(record)
            }
            Err(reason) => {
                let mut record = EventRecord::fallback(&request.text, None);
                record.metadata.insert(
                    LANGUAGE_MODEL_ERROR_KEY.to_string(),
                    serde_json::Value::String(reason),
                );
                Ok(record)
            }
        }
    }

    async fn run_hybrid(&self, request: &ParseRequest) -> Result<EventRecord> {
        let text = request.text.as_str();
        let reference = &request.reference;
        let extraction = self.engine.extract(text, reference, &request.locale);
        let plan = self.router.plan(text, &extraction);
        let language_model_permitted =
            self.config.enable_language_model && self.enhancer.is_some();

        let mut results: BTreeMap<Field, FieldResult> = BTreeMap::new();
        let mut for_language_model: Vec<Field> = Vec::new();

        for &field in &plan.order {
            let pattern = RecordMerger::pattern_result(&extraction, field);
            let pattern_confidence = extraction.best_confidence(field);

            // High-confidence pattern answers are final.
            if pattern_confidence >= self.config.high_confidence {
                self.metrics.record_decision(field, ProcessingTier::FastPattern);
                if let Some(pattern) = pattern {
                    results.insert(field, pattern);
                }
                continue;
            }

            let tier = plan.tier(field);
            self.metrics.record_decision(field, tier);

            // Every escalating tier tries the backup before the language model.
            let mut best = pattern;
            if tier != ProcessingTier::Skip && self.backup.supports(field) {
                let backup = self.backup.extract_field(text, field, reference).await;
                best = Some(prefer(best, backup));
            }

            let best_confidence = best
                .as_ref()
                .filter(|r| !r.winner.is_failure())
                .map(FieldResult::confidence)
                .unwrap_or(0.0);
            if tier != ProcessingTier::Skip
                && language_model_permitted
                && best_confidence < self.config.escalation_floor
            {
                for_language_model.push(field);
            }

            debug!(
                field = field.as_str(),
                tier = tier.as_str(),
                pattern = pattern_confidence,
                best = best_confidence,
                "Field resolved"
            );
            if let Some(best) = best {
                results.insert(field, best);
            }
        }

        let mut language_model_error = None;
        if !for_language_model.is_empty() {
            let partial = self.merger.merge(
                text,
                reference,
                results.values().cloned(),
                extraction.all_day().is_some(),
            )?;
            match self.call_enhancer(request, &partial).await {
                Ok(answer) => {
                    for field in for_language_model {
                        let Some(candidate) = self.capped(&answer, field) else {
                            continue;
                        };
                        let escalated = match results.remove(&field) {
                            Some(current) => {
                                prefer(Some(current), FieldResult::new(field, candidate))
                            }
                            None => FieldResult::new(field, candidate),
                        };
                        results.insert(field, escalated);
                    }
                }
                Err(reason) => language_model_error = Some(reason),
            }
        }

        let mut record = self.merger.merge(
            text,
            reference,
            results.into_values(),
            extraction.all_day().is_some(),
        )?;
        self.add_confirmation_warnings(&mut record);
        if let Some(reason) = language_model_error {
            record.metadata.insert(
                LANGUAGE_MODEL_ERROR_KEY.to_string(),
                serde_json::Value::String(reason),
            );
        }
        Ok(record)
    }

    /// One enhancer call. Unavailability and errors come back as a reason
    /// string; they never fail the parse.
    async fn call_enhancer(
        &self,
        request: &ParseRequest,
        partial: &EventRecord,
    ) -> std::result::Result<EventRecord, String> {
        let Some(enhancer) = self.enhancer.as_ref().filter(|_| self.config.enable_language_model)
        else {
            return Err("language model not configured".to_string());
        };
        if !enhancer.is_available().await {
            self.metrics.record_language_model("unavailable");
            warn!(enhancer = enhancer.name(), "Language model unavailable");
            return Err(format!("{} unavailable", enhancer.name()));
        }

        let _timer = self.metrics.time_language_model(enhancer.name());
        match enhancer
            .enhance(&request.text, partial, &request.reference)
            .await
        {
            Ok(answer) => {
                self.metrics.record_language_model("ok");
                Ok(answer)
            }
            Err(e) => {
                self.metrics.record_language_model("error");
                warn!(enhancer = enhancer.name(), error = %e, "Language model failed");
                Err(e.to_string())
            }
        }
    }

    /// The enhancer's answer for `field`, re-tagged and capped below the
    /// pattern tier's high-confidence threshold.
    fn capped(&self, answer: &EventRecord, field: Field) -> Option<Candidate> {
        let result = answer.field(field)?;
        if result.winner.is_failure() {
            return None;
        }
        let ceiling = self.config.language_model_ceiling();
        Some(Candidate::new(
            result.winner.value().clone(),
            CandidateSource::LanguageModel,
            result.winner.confidence().min(ceiling),
            MethodId::LanguageModel,
        ))
    }

    fn add_confirmation_warnings(&self, record: &mut EventRecord) {
        let from_model: Vec<Field> = record
            .field_results
            .values()
            .filter(|r| r.winner.source() == &CandidateSource::LanguageModel)
            .map(|r| r.field)
            .collect();
        for field in from_model {
            record.warnings.push(confirmation_warning(field));
        }
    }
}

/// Warning attached to a field the language model inferred.
pub(crate) fn confirmation_warning(field: Field) -> String {
    format!(
        "{} was inferred by the language model; please confirm",
        field.label()
    )
}

/// The better of two results for one field; ties keep the current one.
/// The loser's winner joins the alternatives.
fn prefer(current: Option<FieldResult>, challenger: FieldResult) -> FieldResult {
    let Some(current) = current else {
        return challenger;
    };
    if challenger.winner.is_failure() || challenger.confidence() <= current.confidence() {
        let mut alternatives = current.alternatives.clone();
        alternatives.push(challenger.winner.clone());
        alternatives.extend(challenger.alternatives);
        return FieldResult {
            alternatives: Vec::new(),
            ..current
        }
        .with_alternatives(alternatives);
    }
    let mut alternatives = challenger.alternatives.clone();
    alternatives.push(current.winner);
    alternatives.extend(current.alternatives);
    FieldResult {
        alternatives: Vec::new(),
        ..challenger
    }
    .with_alternatives(alternatives)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("internal fault: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("internal fault: {message}")
    } else {
        "internal fault".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CandidateValue, ReferenceTime};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reference() -> ReferenceTime {
        ReferenceTime::at(2025, 9, 29, 17, 0).unwrap()
    }

    fn request(text: &str) -> ParseRequest {
        ParseRequest::new(text, reference())
    }

    fn orchestrator() -> HybridOrchestrator {
        HybridOrchestrator::new(&Config::default())
    }

    struct FakeEnhancer {
        calls: AtomicUsize,
        answer: Option<&'static str>,
    }

    impl FakeEnhancer {
        fn answering(answer: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer: Some(answer),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer: None,
            })
        }
    }

    #[async_trait]
    impl LanguageModelEnhancer for FakeEnhancer {
        async fn is_available(&self) -> bool {
            true
        }

        async fn enhance(
            &self,
            text: &str,
            _partial: &EventRecord,
            _reference: &ReferenceTime,
        ) -> Result<EventRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Some(answer) => crate::enhancer::parse_enhancer_response(text, answer),
                None => Err(crate::error::EnhancerError::Http("connection refused".into()).into()),
            }
        }
    }

    struct Exploding;

    #[async_trait]
    impl Recognizer for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn reliability(&self) -> crate::recognizers::SourceReliability {
            crate::recognizers::SourceReliability::Low
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
            panic!("recognizer exploded");
        }
    }

    #[tokio::test]
    async fn test_pattern_scenario() {
        let record = orchestrator()
            .parse(&request("Meeting on 12/25/2024 at 2:30 PM"))
            .await;
        let start = record.start_datetime.unwrap();
        assert_eq!(
            start.naive_local().format("%Y-%m-%d %H:%M").to_string(),
            "2024-12-25 14:30"
        );
        assert_eq!(record.parsing_path, ParsingPath::Pattern);
        assert!(record.confidence >= 0.85, "confidence {}", record.confidence);
        assert_eq!(record.title.as_deref(), Some("Meeting"));
    }

    #[tokio::test]
    async fn test_vague_text_falls_back() {
        let record = orchestrator()
            .parse(&request("something unclear and vague"))
            .await;
        assert_eq!(record.parsing_path, ParsingPath::Fallback);
        assert!(record.confidence < 0.05);
        assert_eq!(record.description, "something unclear and vague");
        assert!(!record.metadata.contains_key(ERROR_KEY));
    }

    #[tokio::test]
    async fn test_cache_hit_on_repeat() {
        let orchestrator = orchestrator();
        let first = orchestrator.parse(&request("Lunch tomorrow at noon")).await;
        let second = orchestrator.parse(&request("Lunch tomorrow at noon")).await;
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first, second);

        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.cache_hits_total, 1);
        assert_eq!(snapshot.cache_misses_total, 1);
    }

    #[tokio::test]
    async fn test_whitespace_variant_keeps_own_text() {
        let orchestrator = orchestrator();
        let single = "Lunch tomorrow at noon";
        let double = "Lunch  tomorrow at noon";
        let first = orchestrator.parse(&request(single)).await;
        let second = orchestrator.parse(&request(double)).await;

        assert_eq!(first.description, single);
        assert_eq!(second.description, double);
        assert!(!second.cache_hit);
        for result in second.field_results.values() {
            for candidate in result.ranked() {
                if let Some(span) = candidate.span() {
                    assert_eq!(
                        double.get(span.start()..span.end()),
                        Some(candidate.matched_text())
                    );
                }
            }
        }
        assert_eq!(orchestrator.metrics().snapshot().cache_hits_total, 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_fallback() {
        let mut config = Config::default();
        config.recognizers.builtin = false;
        let orchestrator = HybridOrchestrator::new(&config).with_recognizer(Arc::new(Exploding));

        // Weekday-only starts are below the high-confidence threshold.
        let record = orchestrator.parse(&request("Call Monday or Tuesday")).await;
        assert_eq!(record.parsing_path, ParsingPath::Fallback);
        let error = record.metadata.get(ERROR_KEY).and_then(|e| e.as_str()).unwrap();
        assert!(error.contains("recognizer exploded"));
        assert_eq!(orchestrator.metrics().snapshot().faults_total, 1);

        // Faults are not cached.
        let again = orchestrator.parse(&request("Call Monday or Tuesday")).await;
        assert!(!again.cache_hit);
    }

    #[tokio::test]
    async fn test_language_model_fills_gap_below_ceiling() {
        let enhancer = FakeEnhancer::answering(
            r#"{"title": "Planning", "start_datetime": "2025-10-01T10:00:00", "confidence": 0.99}"#,
        );
        let orchestrator = orchestrator().with_enhancer(enhancer.clone());
        let record = orchestrator
            .parse(&request("Roadmap chat in the afternoon"))
            .await;

        assert_eq!(enhancer.calls.load(Ordering::SeqCst), 1);
        let start = record.field(Field::StartDatetime).unwrap();
        assert_eq!(start.winner.source(), &CandidateSource::LanguageModel);
        assert!(start.confidence() <= orchestrator.config().high_confidence);
        assert!((start.confidence() - 0.75).abs() < 1e-6);
        assert!(record.needs_confirmation);
        assert!(record.warnings.iter().any(|w| w.contains("language model")));
        assert_eq!(record.description, "Roadmap chat in the afternoon");
    }

    #[tokio::test]
    async fn test_language_model_not_called_for_confident_fields() {
        let enhancer = FakeEnhancer::answering(r#"{"title": "Other"}"#);
        let orchestrator = orchestrator().with_enhancer(enhancer.clone());
        let record = orchestrator
            .parse(&request("Meeting on 12/25/2024 at 2:30 PM"))
            .await;
        assert_eq!(record.title.as_deref(), Some("Meeting"));
        assert_ne!(
            record.field(Field::StartDatetime).unwrap().winner.source(),
            &CandidateSource::LanguageModel
        );
    }

    #[tokio::test]
    async fn test_language_model_failure_degrades() {
        let enhancer = FakeEnhancer::failing();
        let orchestrator = orchestrator().with_enhancer(enhancer.clone());
        let record = orchestrator
            .parse(&request("Dentist tomorrow at 9am"))
            .await;
        // Pattern answers survive; the failure is only recorded.
        assert!(record.start_datetime.is_some());
        assert_ne!(record.parsing_path, ParsingPath::Fallback);
        if enhancer.calls.load(Ordering::SeqCst) > 0 {
            assert!(record.metadata.contains_key(LANGUAGE_MODEL_ERROR_KEY));
        }
    }

    #[tokio::test]
    async fn test_language_model_only_mode() {
        let enhancer = FakeEnhancer::answering(
            r#"{"title": "Standup", "start_datetime": "2025-09-30T09:30:00+02:00", "confidence": 0.9}"#,
        );
        let orchestrator = orchestrator().with_enhancer(enhancer);
        let record = orchestrator
            .parse(&request("standup tomorrow").with_mode(ParseMode::LanguageModelOnly))
            .await;
        assert_eq!(record.parsing_path, ParsingPath::LanguageModel);
        assert_eq!(record.title.as_deref(), Some("Standup"));
        assert!(record.confidence <= 0.75 + 1e-6);
    }

    #[tokio::test]
    async fn test_language_model_only_without_enhancer() {
        let record = orchestrator()
            .without_enhancer()
            .parse(&request("standup tomorrow").with_mode(ParseMode::LanguageModelOnly))
            .await;
        assert_eq!(record.parsing_path, ParsingPath::Fallback);
        assert!(record.metadata.contains_key(LANGUAGE_MODEL_ERROR_KEY));
    }

    #[tokio::test]
    async fn test_pattern_only_mode_skips_recognizers() {
        let config = Config::default();
        let mut backup = BackupCoordinator::new(config.recognizers.clone());
        backup.register(Arc::new(Exploding));
        let orchestrator = HybridOrchestrator::new(&config).with_backup(backup);
        let record = orchestrator
            .parse(&request("Call Monday or Tuesday").with_mode(ParseMode::PatternOnly))
            .await;
        assert_eq!(record.parsing_path, ParsingPath::Pattern);
        assert!(record.start_datetime.is_some());
    }

    #[tokio::test]
    async fn test_reset_metrics() {
        let orchestrator = orchestrator();
        orchestrator.parse(&request("Lunch tomorrow at noon")).await;
        orchestrator.reset_metrics();
        assert_eq!(orchestrator.metrics().snapshot().requests_total, 0);
        assert!(orchestrator.recognizer_stats().iter().all(|s| s.calls == 0));
    }

    #[test]
    fn test_prefer_keeps_loser_as_alternative() {
        let text = |v: &str, c: f32| {
            Candidate::new(
                CandidateValue::Text(v.into()),
                CandidateSource::Pattern,
                c,
                MethodId::PhraseTitle,
            )
        };
        let current = FieldResult::new(Field::Title, text("Sync", 0.5));
        let challenger = FieldResult::new(Field::Title, text("Team sync", 0.7));
        let merged = prefer(Some(current), challenger);
        assert_eq!(merged.winner.value().as_text(), Some("Team sync"));
        assert_eq!(merged.alternatives.len(), 1);

        let failure = FieldResult::new(Field::Title, Candidate::failure(CandidateSource::Fallback));
        let kept = prefer(Some(merged.clone()), failure);
        assert_eq!(kept, merged);
    }
}
