//! Tier escalation: which tiers run for which fields, and what their
//! answers are worth.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, TimeZone};

use almanac::error::EnhancerError;
use almanac::recognizers::SourceReliability;
use almanac::{
    Candidate, CandidateSource, CandidateValue, Config, EventParser, EventRecord, Field,
    IssueKind, LanguageModelEnhancer, LocalePrefs, MethodId, ParseMode, ParsingPath,
    ProcessingTier, Recognizer, ReferenceTime, Result,
};

use super::{init_tracing, reference};

const CONFIDENT: &str = "Meeting on 12/25/2024 at 2:30 PM";
const WEAK: &str = "Roadmap chat in the afternoon";

/// Recognizer that records every field it is asked about and optionally
/// answers the start datetime.
struct CountingRecognizer {
    asked: Mutex<Vec<Field>>,
    start: Option<CandidateValue>,
}

impl CountingRecognizer {
    fn silent() -> Arc<Self> {
        Arc::new(Self {
            asked: Mutex::new(Vec::new()),
            start: None,
        })
    }

    fn answering_start(value: CandidateValue) -> Arc<Self> {
        Arc::new(Self {
            asked: Mutex::new(Vec::new()),
            start: Some(value),
        })
    }

    fn asked(&self) -> Vec<Field> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for CountingRecognizer {
    fn name(&self) -> &str {
        "calendar_backend"
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
        field: Field,
        _reference: &ReferenceTime,
    ) -> Result<Option<Candidate>> {
        self.asked.lock().unwrap().push(field);
        let answer = match (&self.start, field) {
            (Some(value), Field::StartDatetime) => Some(Candidate::new(
                value.clone(),
                CandidateSource::recognizer(self.name()),
                0.9,
                MethodId::ExternalRecognizer,
            )),
            _ => None,
        };
        Ok(answer)
    }
}

/// Language model that counts calls and answers with fixed JSON, or fails.
struct CountingEnhancer {
    calls: AtomicUsize,
    answer: Option<&'static str>,
}

impl CountingEnhancer {
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

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModelEnhancer for CountingEnhancer {
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
            Some(answer) => almanac::enhancer::parse_enhancer_response(text, answer),
            None => Err(EnhancerError::Timeout(2000).into()),
        }
    }
}

fn without_builtin() -> Config {
    let mut config = Config::default();
    config.recognizers.builtin = false;
    config
}

#[tokio::test]
async fn test_confident_fields_never_escalate() {
    init_tracing();
    let recognizer = CountingRecognizer::silent();
    let enhancer = CountingEnhancer::answering(
        r#"{"title": "Something else", "start_datetime": "2026-01-01T09:00:00", "confidence": 0.99}"#,
    );
    let parser = EventParser::builder()
        .config(without_builtin())
        .recognizer(recognizer.clone())
        .enhancer(enhancer.clone())
        .build()
        .unwrap();

    let (record, _) = parser.parse(&parser.request(CONFIDENT, reference())).await;

    assert!(!recognizer.asked().contains(&Field::StartDatetime));
    assert!(!recognizer.asked().contains(&Field::Title));
    for field in [Field::StartDatetime, Field::Title] {
        assert_eq!(
            record.field(field).unwrap().winner.source(),
            &CandidateSource::Pattern
        );
    }
    assert_eq!(record.title.as_deref(), Some("Meeting"));
}

#[tokio::test]
async fn test_weak_start_escalates_to_backup() {
    init_tracing();
    let recognizer = CountingRecognizer::silent();
    let parser = EventParser::builder()
        .config(without_builtin())
        .recognizer(recognizer.clone())
        .build()
        .unwrap();

    let (record, _) = parser.parse(&parser.request(WEAK, reference())).await;

    assert!(recognizer.asked().contains(&Field::StartDatetime));
    // The pattern answer survives when the backup has nothing better.
    let start = record.field(Field::StartDatetime).unwrap();
    assert_eq!(start.winner.source(), &CandidateSource::Pattern);
}

#[tokio::test]
async fn test_backup_answer_replaces_weak_pattern() {
    init_tracing();
    let offset = FixedOffset::east_opt(0).unwrap();
    let answer = offset
        .from_local_datetime(
            &NaiveDate::from_ymd_opt(2025, 9, 30)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap(),
        )
        .unwrap();
    let recognizer = CountingRecognizer::answering_start(CandidateValue::DateTime(answer));
    let parser = EventParser::builder()
        .config(without_builtin())
        .recognizer(recognizer)
        .build()
        .unwrap();

    let (record, _) = parser.parse(&parser.request(WEAK, reference())).await;

    assert_eq!(record.start_datetime, Some(answer));
    let start = record.field(Field::StartDatetime).unwrap();
    assert!(matches!(start.winner.source(), CandidateSource::Recognizer { .. }));
    // The pattern reading is kept as an alternative.
    assert!(start
        .alternatives
        .iter()
        .any(|alt| alt.source() == &CandidateSource::Pattern));
    assert!(matches!(
        record.parsing_path,
        ParsingPath::Deterministic | ParsingPath::Mixed
    ));
}

#[tokio::test]
async fn test_language_model_answers_are_capped() {
    init_tracing();
    let enhancer = CountingEnhancer::answering(
        r#"{"start_datetime": "2025-09-30T14:00:00", "confidence": 0.99}"#,
    );
    let config = without_builtin();
    let ceiling = config.orchestrator.high_confidence;
    let parser = EventParser::builder()
        .config(config)
        .enhancer(enhancer.clone())
        .build()
        .unwrap();

    let (record, outcome) = parser.parse(&parser.request(WEAK, reference())).await;

    assert_eq!(enhancer.calls(), 1);
    let start = record.field(Field::StartDatetime).unwrap();
    assert_eq!(start.winner.source(), &CandidateSource::LanguageModel);
    for result in record.field_results.values() {
        if result.winner.source() == &CandidateSource::LanguageModel {
            assert!(result.confidence() <= ceiling);
        }
    }
    assert!(record.needs_confirmation);
    assert!(record
        .warnings
        .iter()
        .any(|w| w.contains("inferred by the language model")));
    assert!(!outcome.has(IssueKind::RecognitionUnavailable));
}

#[tokio::test]
async fn test_language_model_failure_degrades() {
    init_tracing();
    let enhancer = CountingEnhancer::failing();
    let parser = EventParser::builder()
        .config(without_builtin())
        .enhancer(enhancer.clone())
        .build()
        .unwrap();
    let request = parser.request(WEAK, reference());

    let (record, outcome) = parser.parse(&request).await;
    assert!(record.start_datetime.is_some());
    assert!(outcome.has(IssueKind::RecognitionUnavailable));

    // Degraded records are not cached, so the tier is retried.
    let (again, _) = parser.parse(&request).await;
    assert!(!again.cache_hit);
    assert_eq!(enhancer.calls(), 2);
    assert_eq!(parser.metrics().snapshot().language_model_errors, 2);
}

#[tokio::test]
async fn test_repeat_requests_hit_the_cache() {
    init_tracing();
    let recognizer = CountingRecognizer::silent();
    let parser = EventParser::builder()
        .config(without_builtin())
        .recognizer(recognizer.clone())
        .build()
        .unwrap();
    let request = parser.request(WEAK, reference());

    let (first, _) = parser.parse(&request).await;
    let asked = recognizer.asked().len();
    let (second, _) = parser.parse(&request).await;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first, second);
    assert_eq!(recognizer.asked().len(), asked);

    let snapshot = parser.metrics().snapshot();
    assert_eq!(snapshot.requests_total, 2);
    assert_eq!(snapshot.cache_hits_total, 1);
}

#[tokio::test]
async fn test_language_model_tier_consults_backup_first() {
    init_tracing();
    let offset = FixedOffset::east_opt(0).unwrap();
    let answer = offset
        .from_local_datetime(
            &NaiveDate::from_ymd_opt(2025, 9, 30)
                .unwrap()
                .and_hms_opt(17, 0, 0)
                .unwrap(),
        )
        .unwrap();
    let recognizer = CountingRecognizer::answering_start(CandidateValue::DateTime(answer));
    let enhancer = CountingEnhancer::answering(
        r#"{"start_datetime": "2026-01-01T09:00:00", "confidence": 0.99}"#,
    );
    let parser = EventParser::builder()
        .config(without_builtin())
        .recognizer(recognizer.clone())
        .enhancer(enhancer.clone())
        .build()
        .unwrap();

    // A bare number: no pattern start, routed straight to the language model.
    let text = "Sam 5";
    let plan = parser.orchestrator().router().plan(
        text,
        &parser
            .orchestrator()
            .engine()
            .extract(text, &reference(), &LocalePrefs::default()),
    );
    assert_eq!(plan.tier(Field::StartDatetime), ProcessingTier::LanguageModel);

    let (record, _) = parser.parse(&parser.request(text, reference())).await;

    assert!(recognizer.asked().contains(&Field::StartDatetime));
    assert_eq!(record.start_datetime, Some(answer));
    let start = record.field(Field::StartDatetime).unwrap();
    assert!(matches!(start.winner.source(), CandidateSource::Recognizer { .. }));
}

#[tokio::test]
async fn test_out_of_range_model_duration_keeps_record() {
    init_tracing();
    let enhancer = CountingEnhancer::answering(
        r#"{"title": "Retreat", "start_datetime": "2025-10-01T09:00:00",
            "duration_minutes": 9223372036854775807, "confidence": 0.9}"#,
    );
    let parser = EventParser::builder()
        .config(without_builtin())
        .enhancer(enhancer)
        .build()
        .unwrap();
    let request = parser
        .request("Retreat on October 1st", reference())
        .with_mode(ParseMode::LanguageModelOnly);

    let (record, outcome) = parser.parse(&request).await;

    assert_eq!(record.parsing_path, ParsingPath::LanguageModel);
    assert_eq!(record.title.as_deref(), Some("Retreat"));
    assert!(record.start_datetime.is_some());
    assert_eq!(record.duration_minutes, None);
    assert!(!outcome.has(IssueKind::InternalFault));
}

#[tokio::test]
async fn test_whitespace_variants_keep_their_own_text() {
    init_tracing();
    let parser = EventParser::builder()
        .config(without_builtin())
        .build()
        .unwrap();
    let single = "Lunch tomorrow at noon";
    let double = "Lunch  tomorrow at noon";

    let (first, _) = parser.parse(&parser.request(single, reference())).await;
    let (second, _) = parser.parse(&parser.request(double, reference())).await;

    assert_eq!(first.description, single);
    assert_eq!(second.description, double);
    assert!(!second.cache_hit);
    for result in second.field_results.values() {
        for candidate in result.ranked() {
            if let Some(span) = candidate.span() {
                assert_eq!(double.get(span.start()..span.end()), Some(candidate.matched_text()));
            }
        }
    }
}
