//! End-to-end scenarios through the public parser.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Timelike};

use almanac::event::{FALLBACK_CONFIDENCE, NO_EVENT_WARNING};
use almanac::resolver::END_BEFORE_START_WARNING;
use almanac::{
    parse_event, CandidateValue, EventParser, EventRecord, Field, IssueKind, LanguageModelEnhancer,
    LocalePrefs, ParseMode, ParsingPath, ReferenceTime, Result,
};

use super::{init_tracing, reference};

fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

/// Enhancer that always answers with the same JSON.
struct ScriptedEnhancer(&'static str);

#[async_trait]
impl LanguageModelEnhancer for ScriptedEnhancer {
    async fn is_available(&self) -> bool {
        true
    }

    async fn enhance(
        &self,
        text: &str,
        _partial: &EventRecord,
        _reference: &ReferenceTime,
    ) -> Result<EventRecord> {
        almanac::enhancer::parse_enhancer_response(text, self.0)
    }
}

#[tokio::test]
async fn test_numeric_date_meeting() {
    init_tracing();
    let (record, outcome) = parse_event(
        "Meeting on 12/25/2024 at 2:30 PM",
        reference(),
        LocalePrefs::default(),
        ParseMode::Hybrid,
    )
    .await;

    assert_eq!(
        record.start_datetime.unwrap().naive_local(),
        naive(2024, 12, 25, 14, 30)
    );
    assert_eq!(record.parsing_path, ParsingPath::Pattern);
    assert!(record.confidence >= 0.85, "confidence {}", record.confidence);
    assert!(outcome.is_valid);
}

#[tokio::test]
async fn test_tomorrow_at_seven() {
    init_tracing();
    let (record, _) = parse_event(
        "Tomorrow 7am",
        reference(),
        LocalePrefs::default(),
        ParseMode::Hybrid,
    )
    .await;

    assert_eq!(
        record.start_datetime.unwrap().naive_local(),
        naive(2025, 9, 30, 7, 0)
    );
    assert!(!record.all_day);
}

#[tokio::test]
async fn test_vague_text_is_missing_critical() {
    init_tracing();
    let text = "something unclear and vague";
    let (record, outcome) =
        parse_event(text, reference(), LocalePrefs::default(), ParseMode::Hybrid).await;

    assert!(outcome.has(IssueKind::MissingCritical));
    assert!(!outcome.is_valid);
    assert!(record.confidence <= FALLBACK_CONFIDENCE);
    assert!(record.warnings.contains(&NO_EVENT_WARNING.to_string()));
    assert_eq!(record.description, text);
    assert_eq!(record.parsing_path, ParsingPath::Fallback);
}

#[tokio::test]
async fn test_equally_confident_datetimes_are_ambiguous() {
    init_tracing();
    let (record, outcome) = parse_event(
        "Either 2025-10-01 at 10am or 2025-10-02 at 10am",
        reference(),
        LocalePrefs::default(),
        ParseMode::Hybrid,
    )
    .await;

    // The earlier mention wins the tie; the other stays as an alternative.
    assert_eq!(
        record.start_datetime.unwrap().naive_local(),
        naive(2025, 10, 1, 10, 0)
    );
    let start = record.field(Field::StartDatetime).unwrap();
    assert!(start
        .alternatives
        .iter()
        .any(|alt| alt.value().naive_datetime() == Some(naive(2025, 10, 2, 10, 0))));

    let ambiguity = outcome.ambiguity(Field::StartDatetime).unwrap();
    let listed: Vec<_> = ambiguity
        .candidates
        .iter()
        .filter_map(|c| c.value().naive_datetime())
        .collect();
    assert_eq!(listed[0], naive(2025, 10, 1, 10, 0));
    assert!(listed.contains(&naive(2025, 10, 2, 10, 0)));
    assert!(outcome.has(IssueKind::Ambiguous));
}

#[tokio::test]
async fn test_end_equal_to_start_is_inconsistent() {
    init_tracing();
    let parser = EventParser::builder()
        .enhancer(Arc::new(ScriptedEnhancer(
            r#"{"title": "Sync", "start_datetime": "2025-09-30T15:00:00+00:00",
                "end_datetime": "2025-09-30T15:00:00+00:00", "confidence": 0.9}"#,
        )))
        .build()
        .unwrap();
    let request = parser
        .request("Sync tomorrow at 3pm until 3pm", reference())
        .with_mode(ParseMode::LanguageModelOnly);

    let (record, outcome) = parser.parse(&request).await;
    assert_eq!(record.start_datetime, record.end_datetime);
    assert!(outcome
        .warnings
        .contains(&END_BEFORE_START_WARNING.to_string()));
    assert!(outcome.has(IssueKind::Inconsistent));
    assert_eq!(record.title.as_deref(), Some("Sync"));
}

#[tokio::test]
async fn test_rich_sentence() {
    init_tracing();
    let (record, outcome) = parse_event(
        "Team sync tomorrow at 3pm for 1 hour in Room 204 with Alice and Bob",
        reference(),
        LocalePrefs::default(),
        ParseMode::PatternOnly,
    )
    .await;

    assert_eq!(record.title.as_deref(), Some("Team sync"));
    assert_eq!(record.location.as_deref(), Some("Room 204"));
    assert_eq!(record.participants, vec!["Alice".to_string(), "Bob".to_string()]);
    assert_eq!(record.duration_minutes, Some(60));
    assert_eq!(record.end_datetime.unwrap().hour(), 16);
    assert!(outcome.is_valid);
}

#[tokio::test]
async fn test_time_range_sets_end_and_duration() {
    init_tracing();
    let (record, _) = parse_event(
        "Workshop tomorrow 2-4pm",
        reference(),
        LocalePrefs::default(),
        ParseMode::PatternOnly,
    )
    .await;

    assert_eq!(
        record.end_datetime.unwrap().naive_local(),
        naive(2025, 9, 30, 16, 0)
    );
    assert_eq!(record.duration_minutes, Some(120));
}

#[tokio::test]
async fn test_recurring_all_day_event() {
    init_tracing();
    let (record, _) = parse_event(
        "Offsite all day every Friday",
        reference(),
        LocalePrefs::default(),
        ParseMode::PatternOnly,
    )
    .await;

    assert!(record.all_day);
    let recurrence = record.recurrence.as_deref().unwrap();
    assert!(recurrence.starts_with("FREQ=WEEKLY"), "{}", recurrence);
    assert!(matches!(
        record.field(Field::Recurrence).unwrap().winner.value(),
        CandidateValue::Recurrence(_)
    ));
}

#[tokio::test]
async fn test_day_first_locale() {
    init_tracing();
    let (record, _) = parse_event(
        "Dentist 03/04/2026 at 10am",
        reference(),
        LocalePrefs::day_first(),
        ParseMode::Hybrid,
    )
    .await;

    assert_eq!(
        record.start_datetime.unwrap().naive_local(),
        naive(2026, 4, 3, 10, 0)
    );
}
