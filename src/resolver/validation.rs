//! Checks that turn an [`EventRecord`] into a [`ValidationOutcome`].

use std::collections::BTreeSet;

use crate::config::ResolverConfig;
use crate::event::{CandidateSource, CandidateValue, EventRecord, Field, ParsingPath, ReferenceTime};
use crate::orchestrator::{ERROR_KEY, LANGUAGE_MODEL_ERROR_KEY};
use crate::utils::word_overlap;

use super::types::{Ambiguity, ParseIssue, ValidationOutcome};

/// Warning attached when the end does not come after the start.
pub const END_BEFORE_START_WARNING: &str = "end time before or equal to start time";

/// Validate `record` against `reference`.
///
/// Fields in `settled` were decided by a person and are not reported as
/// ambiguous.
pub(crate) fn validate(
    record: &EventRecord,
    reference: &ReferenceTime,
    config: &ResolverConfig,
    settled: &BTreeSet<Field>,
) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::new();

    check_diagnostics(record, &mut outcome);
    check_missing(record, config, &mut outcome);
    check_confidence(record, config, &mut outcome);
    check_ambiguity(record, config, settled, &mut outcome);
    check_consistency(record, reference, config, &mut outcome);

    outcome
}

fn metadata_text(record: &EventRecord, key: &str) -> Option<String> {
    record.metadata.get(key).map(|value| match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn check_diagnostics(record: &EventRecord, outcome: &mut ValidationOutcome) {
    if let Some(reason) = metadata_text(record, ERROR_KEY) {
        outcome.warn(None, format!("Parsing failed internally: {}", reason));
        outcome.push_issue(ParseIssue::InternalFault { reason });
    }
    if let Some(reason) = metadata_text(record, LANGUAGE_MODEL_ERROR_KEY) {
        outcome.warn(None, format!("Language model unavailable: {}", reason));
        outcome.push_issue(ParseIssue::RecognitionUnavailable {
            tier: "language_model".to_string(),
            reason,
        });
    }
}

fn check_missing(record: &EventRecord, config: &ResolverConfig, outcome: &mut ValidationOutcome) {
    let present = |field: Field| match field {
        Field::Title => record.title.is_some(),
        Field::StartDatetime => record.start_datetime.is_some(),
        Field::Location => record.location.is_some(),
        Field::Participants => !record.participants.is_empty(),
        Field::Description => !record.description.trim().is_empty(),
        _ => true,
    };

    for field in Field::ALL {
        if !(field.is_critical() || field.is_optional()) || present(field) {
            continue;
        }
        outcome.missing_fields.push(field);
        if !field.is_critical() {
            continue;
        }
        if config.allow_partial {
            outcome.warn(Some(field), format!("Partial record without a {}", field.label()));
        } else {
            outcome.push_issue(ParseIssue::MissingCritical { field });
            outcome.suggest(Some(field), format!("Add a {} to the text", field.label()));
        }
    }

    if record.parsing_path == ParsingPath::Fallback {
        outcome.suggest(
            None,
            "Add a date, time or title and try again; the original text is kept in the description",
        );
    }
}

fn check_confidence(
    record: &EventRecord,
    config: &ResolverConfig,
    outcome: &mut ValidationOutcome,
) {
    let floor = config.confidence_floor;
    if record.confidence < floor {
        outcome.warn(
            None,
            format!("Low overall confidence ({:.2})", record.confidence),
        );
        outcome.push_issue(ParseIssue::LowConfidence {
            field: None,
            confidence: record.confidence,
            floor,
        });
    }

    for (field, result) in &record.field_results {
        if *field == Field::Description || result.confidence() >= floor {
            continue;
        }
        outcome.confidence_issues.push(*field);
        outcome.warn(
            Some(*field),
            format!("Low confidence in the {} ({:.2})", field.label(), result.confidence()),
        );
        outcome.suggest(Some(*field), format!("Please confirm the {}", field.label()));
        outcome.push_issue(ParseIssue::LowConfidence {
            field: Some(*field),
            confidence: result.confidence(),
            floor,
        });
    }
}

fn check_ambiguity(
    record: &EventRecord,
    config: &ResolverConfig,
    settled: &BTreeSet<Field>,
    outcome: &mut ValidationOutcome,
) {
    for (field, result) in &record.field_results {
        if *field == Field::Description || settled.contains(field) {
            continue;
        }
        let top = result.confidence();
        let close: Vec<_> = result
            .alternatives
            .iter()
            .filter(|alt| top - alt.confidence() <= config.ambiguity_margin)
            .cloned()
            .collect();
        if close.is_empty() {
            continue;
        }

        let candidates: Vec<_> = std::iter::once(result.winner.clone()).chain(close).collect();
        let options = candidates.iter().map(|c| c.value().label()).collect();
        outcome.warn(
            Some(*field),
            format!("Several values fit the {}", field.label()),
        );
        outcome.suggest(
            Some(*field),
            format!("Pick one {} or add detail to the text", field.label()),
        );
        outcome.push_issue(ParseIssue::Ambiguous {
            field: *field,
            options,
        });
        outcome.ambiguities.push(Ambiguity {
            field: *field,
            candidates,
        });
    }
}

fn check_consistency(
    record: &EventRecord,
    reference: &ReferenceTime,
    config: &ResolverConfig,
    outcome: &mut ValidationOutcome,
) {
    let mut inconsistent = |fields: Vec<Field>, message: String| {
        for field in &fields {
            outcome.warn(Some(*field), message.clone());
        }
        outcome.push_issue(ParseIssue::Inconsistent { fields, message });
    };

    if let (Some(start), Some(end)) = (record.start_datetime, record.end_datetime) {
        if end <= start {
            inconsistent(
                vec![Field::StartDatetime, Field::EndDatetime],
                END_BEFORE_START_WARNING.to_string(),
            );
        }
    }

    let span_minutes = match (record.start_datetime, record.end_datetime) {
        (Some(start), Some(end)) if end > start => Some((end - start).num_minutes()),
        _ => None,
    };
    let max_minutes = i64::from(config.max_duration_hours) * 60;
    if let Some(minutes) = record.duration_minutes.or(span_minutes) {
        if minutes <= 0 || minutes > max_minutes {
            inconsistent(
                vec![Field::Duration],
                format!(
                    "implausible duration of {}",
                    CandidateValue::DurationMinutes(minutes).label()
                ),
            );
        }
    }

    for (field, value) in [
        (Field::Title, record.title.as_deref()),
        (Field::Location, record.location.as_deref()),
    ] {
        let Some(value) = value else { continue };
        let typed_in = record
            .field(field)
            .is_some_and(|r| r.winner.source() == &CandidateSource::Manual);
        if typed_in {
            continue;
        }
        let overlap = word_overlap(value, &record.description);
        if overlap < config.min_text_overlap {
            inconsistent(
                vec![field],
                format!(
                    "{} barely matches the text ({:.0}% overlap)",
                    field.label(),
                    overlap * 100.0
                ),
            );
        }
    }

    if let Some(start) = record.start_datetime {
        let days = (start.naive_local().date() - reference.date()).num_days();
        if days < -config.past_window_days {
            inconsistent(
                vec![Field::StartDatetime],
                format!("start date is {} days in the past", -days),
            );
        } else if days > config.future_window_days {
            inconsistent(
                vec![Field::StartDatetime],
                format!("start date is {} days in the future", days),
            );
        }
    }
}
