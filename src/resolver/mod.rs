//! Error & Ambiguity Resolver.
//!
//! Turns a merged [`EventRecord`] into a [`ValidationOutcome`] and, given a
//! [`ClarificationChannel`], narrows ambiguous, inferred or missing fields.
//! Without a channel every ambiguity resolves to the top-ranked option.

mod clarify;
mod types;
mod validation;

pub use clarify::{ClarificationChannel, NonInteractive};
pub use types::{Ambiguity, IssueKind, ParseIssue, ValidationOutcome};
pub use validation::END_BEFORE_START_WARNING;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, ResolverConfig};
use crate::event::{
    Candidate, CandidateSource, CandidateValue, EventRecord, Field, FieldResult, MethodId,
    ParseRequest, ReferenceTime, NO_EVENT_WARNING,
};
use crate::orchestrator::{confirmation_warning, RecordMerger, LANGUAGE_MODEL_ERROR_KEY};
use crate::patterns::PatternEngine;
use crate::utils::normalize_whitespace;

/// Metadata key set when a record was rebuilt from the pattern tier after
/// the language model failed.
pub const PATTERN_FALLBACK_KEY: &str = "pattern_fallback";

pub const PATTERN_FALLBACK_WARNING: &str =
    "Language model unavailable; used pattern extraction only";

/// Validates records and resolves what can be resolved.
pub struct AmbiguityResolver {
    config: ResolverConfig,
    engine: Arc<PatternEngine>,
    merger: RecordMerger,
}

impl AmbiguityResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.resolver.clone(),
            engine: Arc::new(PatternEngine::new(config.patterns.clone())),
            merger: RecordMerger::new(config.recognizers.default_offset_minutes),
        }
    }

    /// Share a pattern engine, usually the orchestrator's.
    pub fn with_engine(mut self, engine: Arc<PatternEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Report on `record` without changing it.
    pub fn validate(&self, record: &EventRecord, reference: &ReferenceTime) -> ValidationOutcome {
        validation::validate(record, reference, &self.config, &BTreeSet::new())
    }

    /// Resolve what can be resolved in `record` and report the rest.
    ///
    /// With no channel, ambiguities keep their top-ranked option and a
    /// record with nothing extracted is reported as missing its critical
    /// fields. With a channel, the person picks among ranked options,
    /// confirms language-model answers and can enter fields by hand.
    pub fn resolve(
        &self,
        record: EventRecord,
        request: &ParseRequest,
        channel: Option<&dyn ClarificationChannel>,
    ) -> (EventRecord, ValidationOutcome) {
        let interactive = channel.is_some();
        let channel = channel.unwrap_or(&NonInteractive);
        let mut settled = BTreeSet::new();

        let mut record = self.recover_from_language_model(record, request);
        if !record.has_extractions() {
            record = self.construct_manually(record, request, channel, &mut settled);
        }
        record = self.settle_ambiguities(record, request, channel, interactive, &mut settled);
        if interactive {
            record = self.confirm_inferred(record, request, channel, &mut settled);
        }

        let outcome = validation::validate(&record, &request.reference, &self.config, &settled);
        debug!(
            valid = outcome.is_valid,
            issues = outcome.issues.len(),
            settled = settled.len(),
            "Resolved record"
        );
        (record, outcome)
    }

    /// Rebuild from the pattern tier when the language model failed and
    /// left nothing behind.
    fn recover_from_language_model(
        &self,
        record: EventRecord,
        request: &ParseRequest,
    ) -> EventRecord {
        if !record.metadata.contains_key(LANGUAGE_MODEL_ERROR_KEY) || record.has_extractions() {
            return record;
        }
        match self.merger.pattern_record(&self.engine, request) {
            Ok(mut recovered) if recovered.has_extractions() => {
                info!(path = ?recovered.parsing_path, "Recovered record from pattern tier");
                recovered.metadata = record.metadata;
                recovered
                    .metadata
                    .insert(PATTERN_FALLBACK_KEY.to_string(), serde_json::Value::Bool(true));
                recovered.warnings.push(PATTERN_FALLBACK_WARNING.to_string());
                recovered.processing_time_ms = record.processing_time_ms;
                recovered
            }
            Ok(_) => record,
            Err(e) => {
                warn!(error = %e, "Pattern-only fallback failed");
                record
            }
        }
    }

    fn construct_manually(
        &self,
        record: EventRecord,
        request: &ParseRequest,
        channel: &dyn ClarificationChannel,
        settled: &mut BTreeSet<Field>,
    ) -> EventRecord {
        let mut results = editable(&record);
        for field in [Field::Title, Field::StartDatetime] {
            let prompt = format!("No event found. Enter the {}", field.label());
            let Some(candidate) = channel
                .read_text(&prompt)
                .and_then(|typed| self.typed_value(field, &typed, request))
            else {
                continue;
            };
            results.insert(field, FieldResult::new(field, candidate));
            settled.insert(field);
        }
        if settled.is_empty() {
            return record;
        }
        info!(fields = settled.len(), "Built record from manual input");
        self.rebuild(record, results, request)
    }

    fn settle_ambiguities(
        &self,
        record: EventRecord,
        request: &ParseRequest,
        channel: &dyn ClarificationChannel,
        interactive: bool,
        settled: &mut BTreeSet<Field>,
    ) -> EventRecord {
        let outcome = validation::validate(&record, &request.reference, &self.config, settled);
        if outcome.ambiguities.is_empty() {
            return record;
        }

        let mut results = editable(&record);
        let mut changed = false;
        for ambiguity in &outcome.ambiguities {
            let field = ambiguity.field;
            let Some(current) = results.get(&field).cloned() else {
                continue;
            };
            let mut options: Vec<String> = ambiguity
                .candidates
                .iter()
                .map(|c| c.value().label())
                .collect();
            options.push(format!("Enter the {} manually", field.label()));

            let prompt = format!("Several values fit the {}. Which one is right?", field.label());
            let choice = channel.choose_one(&prompt, &options);
            let chosen = match choice {
                0 => None,
                i if i < ambiguity.candidates.len() => Some(ambiguity.candidates[i].clone()),
                i if i == ambiguity.candidates.len() => channel
                    .read_text(&format!("Enter the {}", field.label()))
                    .and_then(|typed| self.typed_value(field, &typed, request)),
                _ => {
                    warn!(choice, field = %field, "Clarification choice out of range");
                    None
                }
            };

            debug!(field = %field, choice, "Ambiguity settled");
            if interactive {
                settled.insert(field);
            }
            if let Some(chosen) = chosen {
                results.insert(field, promote(&current, chosen));
                changed = true;
            }
        }

        if changed {
            self.rebuild(record, results, request)
        } else {
            record
        }
    }

    fn confirm_inferred(
        &self,
        record: EventRecord,
        request: &ParseRequest,
        channel: &dyn ClarificationChannel,
        settled: &mut BTreeSet<Field>,
    ) -> EventRecord {
        let inferred: Vec<FieldResult> = record
            .field_results
            .values()
            .filter(|r| r.winner.source() == &CandidateSource::LanguageModel)
            .cloned()
            .collect();
        if inferred.is_empty() {
            return record;
        }

        let mut results = editable(&record);
        for result in inferred {
            let field = result.field;
            let prompt = format!(
                "The {} was inferred as \"{}\". Is that right?",
                field.label(),
                result.winner.value().label()
            );
            settled.insert(field);
            if channel.confirm(&prompt) {
                let confirmed = manual(result.winner.value().clone(), result.winner.matched_text());
                results.insert(field, promote(&result, confirmed));
                continue;
            }
            match channel
                .read_text(&format!("Enter the {}", field.label()))
                .and_then(|typed| self.typed_value(field, &typed, request))
            {
                Some(typed) => {
                    results.insert(field, promote(&result, typed));
                }
                None => {
                    results.remove(&field);
                }
            }
        }
        self.rebuild(record, results, request)
    }

    /// Read a typed answer for `field`. Dates, durations and recurrences go
    /// through the pattern engine.
    fn typed_value(&self, field: Field, typed: &str, request: &ParseRequest) -> Option<Candidate> {
        let typed = normalize_whitespace(typed);
        if typed.is_empty() {
            return None;
        }
        let parsed = |target: Field| {
            self.engine
                .extract(&typed, &request.reference, &request.locale)
                .best(target)
                .map(|c| c.value().clone())
        };
        let value = match field {
            Field::Title | Field::Location => CandidateValue::Text(typed.clone()),
            Field::StartDatetime | Field::EndDatetime => parsed(Field::StartDatetime)?,
            Field::Duration | Field::Recurrence => parsed(field)?,
            Field::Participants => CandidateValue::People(
                typed
                    .split([',', ';'])
                    .flat_map(|part| part.split(" and "))
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Field::Description => return None,
        };
        if value.is_empty() {
            return None;
        }
        Some(manual(value, &typed))
    }

    /// Merge edited results back into a record, keeping the old record's
    /// diagnostics.
    fn rebuild(
        &self,
        record: EventRecord,
        results: BTreeMap<Field, FieldResult>,
        request: &ParseRequest,
    ) -> EventRecord {
        let all_day_phrase = self
            .engine
            .extract(&request.text, &request.reference, &request.locale)
            .all_day()
            .is_some();
        let mut merged = match self.merger.merge(
            &request.text,
            &request.reference,
            results.into_values(),
            all_day_phrase,
        ) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(error = %e, "Could not rebuild resolved record");
                return record;
            }
        };

        let still_inferred: Vec<String> = merged
            .field_results
            .values()
            .filter(|r| r.winner.source() == &CandidateSource::LanguageModel)
            .map(|r| confirmation_warning(r.field))
            .collect();
        let stale: Vec<String> = Field::ALL
            .iter()
            .map(|&f| confirmation_warning(f))
            .filter(|w| !still_inferred.contains(w))
            .collect();
        for warning in record.warnings {
            if warning == NO_EVENT_WARNING || stale.contains(&warning) {
                continue;
            }
            if !merged.warnings.contains(&warning) {
                merged.warnings.push(warning);
            }
        }

        merged.metadata = record.metadata;
        merged.processing_time_ms = record.processing_time_ms;
        merged.cache_hit = record.cache_hit;
        merged
    }
}

/// Field results that can be re-merged; derived values are recomputed.
fn editable(record: &EventRecord) -> BTreeMap<Field, FieldResult> {
    record
        .field_results
        .iter()
        .filter(|(_, r)| r.winner.source() != &CandidateSource::Derived)
        .map(|(field, r)| (*field, r.clone()))
        .collect()
}

/// Make `chosen` the winner of `current`, keeping everything else ranked
/// behind it.
fn promote(current: &FieldResult, chosen: Candidate) -> FieldResult {
    let others: Vec<Candidate> = current
        .ranked()
        .into_iter()
        .filter(|c| **c != chosen)
        .cloned()
        .collect();
    FieldResult {
        latency_us: current.latency_us,
        ..FieldResult::new(current.field, chosen).with_alternatives(others)
    }
}

fn manual(value: CandidateValue, typed: &str) -> Candidate {
    Candidate::new(value, CandidateSource::Manual, 1.0, MethodId::Manual).with_matched_text(typed)
}
