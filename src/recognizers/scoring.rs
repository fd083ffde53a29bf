//! Arbitration score for competing recognizer answers.
//!
//! score = 0.4 * confidence + 0.3 * span quality + 0.2 * source reliability
//!       + 0.1 * value plausibility

use chrono::Duration;

use super::traits::SourceReliability;
use crate::event::{Candidate, CandidateValue, ReferenceTime};
use crate::patterns::MAX_DURATION_MINUTES;

pub const CONFIDENCE_WEIGHT: f32 = 0.4;
pub const SPAN_WEIGHT: f32 = 0.3;
pub const RELIABILITY_WEIGHT: f32 = 0.2;
pub const PLAUSIBILITY_WEIGHT: f32 = 0.1;

/// Datetimes further in the past than this are implausible.
pub const PAST_WINDOW_DAYS: i64 = 365;
/// Datetimes further in the future than this are implausible.
pub const FUTURE_WINDOW_DAYS: i64 = 730;

const MAX_TEXT_VALUE_LEN: usize = 200;

/// Quality of a candidate's span relative to the text.
///
/// Degenerate spans (under three bytes) and spans covering nearly the whole
/// text score low; compact spans score highest.
pub fn span_quality(candidate: &Candidate, text_len: usize) -> f32 {
    let Some(span) = candidate.span() else {
        return 0.5;
    };
    let len = span.len();
    if len < 3 {
        return 0.1;
    }
    if text_len > 0 && len as f32 / text_len as f32 >= 0.9 {
        return 0.2;
    }
    if len <= 40 {
        1.0
    } else {
        0.6
    }
}

/// Whether a value is plausible for a calendar event: 1.0 or 0.0.
pub fn plausibility(value: &CandidateValue, reference: &ReferenceTime) -> f32 {
    let plausible = match value {
        CandidateValue::DateTime(dt) => in_window(dt.naive_local(), reference),
        CandidateValue::LocalDateTime(dt) => in_window(*dt, reference),
        CandidateValue::DurationMinutes(minutes) => (1..=MAX_DURATION_MINUTES).contains(minutes),
        CandidateValue::Text(text) => {
            let trimmed = text.trim();
            !trimmed.is_empty() && trimmed.len() <= MAX_TEXT_VALUE_LEN
        }
        CandidateValue::People(people) => !people.is_empty() && people.len() <= 100,
        CandidateValue::Recurrence(rule) => rule.interval <= 366,
        CandidateValue::Empty => false,
    };
    if plausible {
        1.0
    } else {
        0.0
    }
}

fn in_window(when: chrono::NaiveDateTime, reference: &ReferenceTime) -> bool {
    let earliest = reference.local - Duration::days(PAST_WINDOW_DAYS);
    let latest = reference.local + Duration::days(FUTURE_WINDOW_DAYS);
    when >= earliest && when <= latest
}

/// Weighted aggregate used to pick a winner among recognizer answers.
pub fn aggregate_score(
    candidate: &Candidate,
    reliability: SourceReliability,
    text_len: usize,
    reference: &ReferenceTime,
) -> f32 {
    CONFIDENCE_WEIGHT * candidate.confidence()
        + SPAN_WEIGHT * span_quality(candidate, text_len)
        + RELIABILITY_WEIGHT * reliability.weight()
        + PLAUSIBILITY_WEIGHT * plausibility(candidate.value(), reference)
}
