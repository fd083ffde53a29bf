//! Properties that hold for every input rather than for one scenario.

use chrono::{NaiveDate, NaiveDateTime};

use almanac::config::{BareHourPolicy, PatternConfig};
use almanac::{
    parse_event, Candidate, CandidateSource, CandidateValue, EventParser, EventRecord, Field,
    LocalePrefs, MethodId, ParseMode, PatternEngine, ReferenceTime,
};

use super::{init_tracing, reference};

const TEXTS: &[&str] = &[
    "Meeting on 12/25/2024 at 2:30 PM",
    "Team sync tomorrow at 3pm for 1 hour in Room 204 with Alice and Bob",
    "Café ☕ with Zoë tomorrow at 3pm at Bäckerei Müller",
    "Réunion « budget » lundi 10h–11h ✨",
    "Workshop tomorrow 2-4pm",
    "something unclear and vague",
    "",
];

fn start_of(
    engine: &PatternEngine,
    text: &str,
    reference: &ReferenceTime,
) -> Option<NaiveDateTime> {
    engine
        .extract(text, reference, &LocalePrefs::default())
        .best(Field::StartDatetime)
        .and_then(|c| c.value().naive_datetime())
}

fn naive(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

#[test]
fn test_spans_lie_within_the_text() {
    init_tracing();
    let engine = PatternEngine::default();
    for text in TEXTS {
        let extraction = engine.extract(text, &reference(), &LocalePrefs::default());
        for field in Field::ALL {
            for candidate in extraction.candidates(field) {
                let Some(span) = candidate.span() else {
                    continue;
                };
                assert!(span.start() <= span.end(), "{:?} in {:?}", span, text);
                assert!(span.end() <= text.len(), "{:?} in {:?}", span, text);
                assert_eq!(
                    Some(candidate.matched_text()),
                    text.get(span.start()..span.end()),
                    "{:?} in {:?}",
                    field,
                    text
                );
            }
        }
    }
}

#[test]
fn test_confidence_is_clamped() {
    let make = |confidence| {
        Candidate::new(
            CandidateValue::Text("x".to_string()),
            CandidateSource::Pattern,
            confidence,
            MethodId::KeywordTitle,
        )
        .confidence()
    };
    assert_eq!(make(1.7), 1.0);
    assert_eq!(make(-0.3), 0.0);
    assert_eq!(make(f32::NAN), 0.0);
    assert_eq!(make(0.42), 0.42);

    let mut json = serde_json::to_value(EventRecord::new("text")).unwrap();
    json["confidence"] = serde_json::json!(3.0);
    let record: EventRecord = serde_json::from_value(json).unwrap();
    assert_eq!(record.confidence, 1.0);
}

#[tokio::test]
async fn test_parsing_is_idempotent() {
    init_tracing();
    for text in TEXTS {
        let (first, first_outcome) =
            parse_event(text, reference(), LocalePrefs::default(), ParseMode::Hybrid).await;
        let (second, second_outcome) =
            parse_event(text, reference(), LocalePrefs::default(), ParseMode::Hybrid).await;
        assert_eq!(first, second, "{:?}", text);
        assert_eq!(first_outcome, second_outcome, "{:?}", text);
    }

    let parser = EventParser::default();
    let request = parser.request(TEXTS[1], reference());
    let (first, _) = parser.parse(&request).await;
    let (second, _) = parser.parse(&request).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_record_survives_serialization() {
    init_tracing();
    let (record, outcome) = parse_event(
        "Either 2025-10-01 at 10am or 2025-10-02 at 10am",
        reference(),
        LocalePrefs::default(),
        ParseMode::Hybrid,
    )
    .await;
    assert!(!record.field(Field::StartDatetime).unwrap().alternatives.is_empty());

    let json = serde_json::to_string(&record).unwrap();
    let restored: EventRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, record);

    let json = serde_json::to_string(&outcome).unwrap();
    assert_eq!(serde_json::from_str::<almanac::ValidationOutcome>(&json).unwrap(), outcome);
}

#[test]
fn test_bare_hours_follow_policy() {
    let engine = PatternEngine::default();
    let policy = BareHourPolicy::default();
    for hour in 1..=12 {
        let text = format!("Coffee tomorrow at {}", hour);
        assert_eq!(
            start_of(&engine, &text, &reference()),
            Some(naive(2025, 9, 30, policy.resolve(hour))),
            "{}",
            text
        );
    }

    let literal = PatternEngine::new(PatternConfig {
        bare_hour: BareHourPolicy {
            pm_hours: Vec::new(),
        },
        ..PatternConfig::default()
    });
    assert_eq!(
        start_of(&literal, "Coffee tomorrow at 3", &reference()),
        Some(naive(2025, 9, 30, 3))
    );
}

#[test]
fn test_reference_time_drives_relative_dates() {
    let engine = PatternEngine::default();
    let new_year = ReferenceTime::at(2025, 12, 31, 12, 0).unwrap();
    assert_eq!(
        start_of(&engine, "Tomorrow 7am", &reference()),
        Some(naive(2025, 9, 30, 7))
    );
    assert_eq!(
        start_of(&engine, "Tomorrow 7am", &new_year),
        Some(naive(2026, 1, 1, 7))
    );
}
