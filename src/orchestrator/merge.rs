//! Merging per-field results into one [`EventRecord`].
//!
//! Shared by the orchestrator and by the resolver's pattern-only and manual
//! paths, so every record is localized, derived and scored the same way.

use std::collections::BTreeMap;

use chrono::{Duration, FixedOffset, Offset, Utc};

use crate::error::{AlmanacError, Result};
use crate::event::{
    Candidate, CandidateSource, CandidateValue, EventRecord, Field, FieldResult, MethodId,
    ParseRequest, ParsingPath, ReferenceTime,
};
use crate::patterns::{PatternEngine, PatternExtraction};

/// Weight of each field in the overall confidence. Start and title always
/// count; end and location only when present.
const START_WEIGHT: f32 = 0.45;
const TITLE_WEIGHT: f32 = 0.35;
const END_WEIGHT: f32 = 0.1;
const LOCATION_WEIGHT: f32 = 0.1;

/// Builds records out of field results.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordMerger {
    default_offset: FixedOffset,
}

impl RecordMerger {
    /// `default_offset_minutes` applies to naive datetimes when the request
    /// carries no offset of its own. Out-of-range values fall back to UTC.
    pub fn new(default_offset_minutes: i32) -> Self {
        let default_offset = default_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { default_offset }
    }

    fn offset_for(&self, reference: &ReferenceTime) -> FixedOffset {
        reference.offset().unwrap_or(self.default_offset)
    }

    /// The pattern tier's answer for `field`: its best candidate with the
    /// rest as alternatives.
    pub fn pattern_result(extraction: &PatternExtraction, field: Field) -> Option<FieldResult> {
        let (winner, rest) = extraction.candidates(field).split_first()?;
        Some(FieldResult::new(field, winner.clone()).with_alternatives(rest.iter().cloned()))
    }

    /// Every pattern-tier answer.
    pub fn pattern_results(extraction: &PatternExtraction) -> BTreeMap<Field, FieldResult> {
        Field::ALL
            .iter()
            .filter_map(|&field| Self::pattern_result(extraction, field).map(|r| (field, r)))
            .collect()
    }

    /// A record built from the pattern tier alone.
    pub fn pattern_record(
        &self,
        engine: &PatternEngine,
        request: &ParseRequest,
    ) -> Result<EventRecord> {
        let extraction = engine.extract(&request.text, &request.reference, &request.locale);
        let results = Self::pattern_results(&extraction);
        self.merge(
            &request.text,
            &request.reference,
            results.into_values(),
            extraction.all_day().is_some(),
        )
    }

    /// Give naive datetimes on a result (winner and alternatives) an offset.
    pub fn localize(&self, result: FieldResult, reference: &ReferenceTime) -> Result<FieldResult> {
        if !result.field.is_datetime() {
            return Ok(result);
        }
        let offset = self.offset_for(reference);
        let localize = |candidate: &Candidate| -> Result<Candidate> {
            match candidate.value() {
                CandidateValue::LocalDateTime(naive) => {
                    let dt = CandidateValue::LocalDateTime(*naive)
                        .to_datetime(offset)
                        .ok_or_else(|| {
                            AlmanacError::Internal(format!("cannot localize {naive} at {offset}"))
                        })?;
                    Ok(candidate.revalued(CandidateValue::DateTime(dt), candidate.confidence()))
                }
                _ => Ok(candidate.clone()),
            }
        };

        let winner = localize(&result.winner)?;
        let alternatives = result
            .alternatives
            .iter()
            .map(localize)
            .collect::<Result<Vec<_>>>()?;
        Ok(FieldResult {
            winner,
            alternatives,
            ..result
        })
    }

    /// Merge field results into a record.
    ///
    /// Failure winners are dropped. The end is derived from start plus
    /// duration when missing, and the duration from start and end. Returns
    /// the minimal fallback record when nothing but the description remains.
    pub fn merge(
        &self,
        text: &str,
        reference: &ReferenceTime,
        results: impl IntoIterator<Item = FieldResult>,
        all_day_phrase: bool,
    ) -> Result<EventRecord> {
        let mut record = EventRecord::new(text);
        for result in results {
            if result.winner.is_failure() {
                continue;
            }
            record.attach(self.localize(result, reference)?);
        }

        if !record.has_extractions() {
            return Ok(EventRecord::fallback(text, None));
        }

        if record.field(Field::Description).is_none() {
            record.attach(FieldResult::new(
                Field::Description,
                Candidate::new(
                    CandidateValue::Text(text.to_string()),
                    CandidateSource::Pattern,
                    1.0,
                    MethodId::Verbatim,
                ),
            ));
        }

        derive_end_and_duration(&mut record);

        let start_is_date_only = record
            .field(Field::StartDatetime)
            .is_some_and(|r| r.winner.method() == MethodId::DateOnly);
        record.all_day = all_day_phrase
            || (start_is_date_only
                && record.end_datetime.is_none()
                && record.duration_minutes.is_none());

        record.confidence = overall_confidence(&record);
        record.parsing_path = parsing_path(&record);
        record.needs_confirmation = record
            .field_results
            .values()
            .any(|r| r.winner.source() == &CandidateSource::LanguageModel);
        Ok(record)
    }
}

fn derive_end_and_duration(record: &mut EventRecord) {
    let start = record.field(Field::StartDatetime).map(|r| r.confidence());

    match (record.start_datetime, record.end_datetime, record.duration_minutes) {
        (Some(start_dt), None, Some(minutes)) if minutes > 0 => {
            // Durations out of chrono's range leave the end underived.
            let Some(end) = Duration::try_minutes(minutes)
                .and_then(|delta| start_dt.checked_add_signed(delta))
            else {
                return;
            };
            let confidence = start
                .unwrap_or(0.0)
                .min(record.field(Field::Duration).map(|r| r.confidence()).unwrap_or(0.0));
            record.attach(FieldResult::new(
                Field::EndDatetime,
                Candidate::new(
                    CandidateValue::DateTime(end),
                    CandidateSource::Derived,
                    confidence,
                    MethodId::Derived,
                ),
            ));
        }
        (Some(start_dt), Some(end_dt), None) if end_dt > start_dt => {
            let confidence = start
                .unwrap_or(0.0)
                .min(record.field(Field::EndDatetime).map(|r| r.confidence()).unwrap_or(0.0));
            let minutes = (end_dt - start_dt).num_minutes();
            record.attach(FieldResult::new(
                Field::Duration,
                Candidate::new(
                    CandidateValue::DurationMinutes(minutes),
                    CandidateSource::Derived,
                    confidence,
                    MethodId::Derived,
                ),
            ));
        }
        _ => {}
    }
}

/// Weighted combination dominated by the start datetime and the title.
pub(crate) fn overall_confidence(record: &EventRecord) -> f32 {
    let confidence = |field: Field| record.field(field).map(|r| r.confidence()).unwrap_or(0.0);

    let mut weighted = START_WEIGHT * confidence(Field::StartDatetime)
        + TITLE_WEIGHT * confidence(Field::Title);
    let mut total = START_WEIGHT + TITLE_WEIGHT;
    if record.end_datetime.is_some() {
        weighted += END_WEIGHT * confidence(Field::EndDatetime);
        total += END_WEIGHT;
    }
    if record.location.is_some() {
        weighted += LOCATION_WEIGHT * confidence(Field::Location);
        total += LOCATION_WEIGHT;
    }
    (weighted / total).clamp(0.0, 1.0)
}

/// Which tiers the winners came from. Derived values and the verbatim
/// description do not count.
pub(crate) fn parsing_path(record: &EventRecord) -> ParsingPath {
    let mut tiers: Vec<ParsingPath> = Vec::new();
    for (field, result) in &record.field_results {
        if *field == Field::Description {
            continue;
        }
        let tier = match result.winner.source() {
            CandidateSource::Pattern => ParsingPath::Pattern,
            CandidateSource::Recognizer { .. } => ParsingPath::Deterministic,
            CandidateSource::LanguageModel => ParsingPath::LanguageModel,
            CandidateSource::Manual => ParsingPath::Manual,
            CandidateSource::Derived | CandidateSource::Fallback => continue,
        };
        if !tiers.contains(&tier) {
            tiers.push(tier);
        }
    }

    if tiers.contains(&ParsingPath::Manual) {
        return ParsingPath::Manual;
    }
    match tiers.as_slice() {
        [] => ParsingPath::Fallback,
        [only] => *only,
        _ => ParsingPath::Mixed,
    }
}
