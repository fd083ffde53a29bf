//! Pattern Extraction Engine.
//!
//! Runs every pattern family over the text and returns, per field, the
//! plausible candidates sorted by descending confidence. Extraction is a
//! pure function of the text, the reference time, the locale and the
//! configuration.

mod duration;
mod recurrence;
mod temporal;
mod text;

pub use duration::{DurationPatterns, MAX_DURATION_MINUTES};
pub use recurrence::RecurrencePatterns;
pub use temporal::{TemporalCandidates, TemporalPatterns};
pub use text::TextPatterns;

pub(crate) use temporal::{
    end_of_month, end_of_quarter, end_of_week, end_of_year, resolve_weekday, weekday_from_name,
    WeekdayRule, WEEKDAYS,
};

use std::collections::BTreeMap;

use crate::config::PatternConfig;
use crate::event::{
    Candidate, CandidateValue, Field, LocalePrefs, MethodId, ReferenceTime, Span,
};

/// Candidates for every field found by the pattern tier.
#[derive(Debug, Clone, Default)]
pub struct PatternExtraction {
    candidates: BTreeMap<Field, Vec<Candidate>>,
    all_day: Option<Span>,
    temporal_spans: Vec<Span>,
}

impl PatternExtraction {
    /// Candidates for `field`, best first.
    pub fn candidates(&self, field: Field) -> &[Candidate] {
        self.candidates
            .get(&field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The top candidate for `field`.
    pub fn best(&self, field: Field) -> Option<&Candidate> {
        self.candidates(field).first()
    }

    /// Confidence of the top candidate, 0.0 when there is none.
    pub fn best_confidence(&self, field: Field) -> f32 {
        self.best(field).map(Candidate::confidence).unwrap_or(0.0)
    }

    /// Span of an explicit "all day" phrase.
    pub fn all_day(&self) -> Option<Span> {
        self.all_day
    }

    /// Spans of every date and time expression.
    pub fn temporal_spans(&self) -> &[Span] {
        &self.temporal_spans
    }

    /// True when no field other than the verbatim description was found.
    pub fn is_empty(&self) -> bool {
        self.candidates
            .iter()
            .filter(|(field, _)| **field != Field::Description)
            .all(|(_, candidates)| candidates.is_empty())
    }

    fn insert(&mut self, field: Field, candidates: Vec<Candidate>) {
        if !candidates.is_empty() {
            self.candidates.insert(field, candidates);
        }
    }
}

/// The pattern tier: every family, compiled once.
pub struct PatternEngine {
    temporal: TemporalPatterns,
    duration: DurationPatterns,
    recurrence: RecurrencePatterns,
    text: TextPatterns,
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new(PatternConfig::default())
    }
}

impl PatternEngine {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            temporal: TemporalPatterns::new(config),
            duration: DurationPatterns::new(),
            recurrence: RecurrencePatterns::new(),
            text: TextPatterns::new(),
        }
    }

    /// Whether the text names a kind of event.
    pub fn has_event_keyword(&self, text: &str) -> bool {
        self.text.has_event_keyword(text)
    }

    /// Extract candidates for every field.
    pub fn extract(
        &self,
        text: &str,
        reference: &ReferenceTime,
        locale: &LocalePrefs,
    ) -> PatternExtraction {
        let mut extraction = PatternExtraction::default();
        if text.trim().is_empty() {
            return extraction;
        }

        let temporal = self.temporal.extract(text, reference, locale);
        let durations = self.duration.extract(text);
        let recurrences = self.recurrence.extract(text);
        let locations = self.text.locations(text, &temporal.spans);
        let participants = self.text.participants(text);
        let all_day = self.text.all_day(text);

        let mut occupied: Vec<Span> = temporal.spans.clone();
        for candidate in durations
            .iter()
            .chain(&recurrences)
            .chain(&locations)
            .chain(&participants)
        {
            occupied.extend(candidate.span());
        }
        occupied.extend(all_day);

        let has_temporal = !temporal.start.is_empty();
        let titles = self.text.titles(text, &occupied, has_temporal);

        extraction.temporal_spans = temporal.spans;
        extraction.all_day = all_day;
        extraction.insert(Field::StartDatetime, temporal.start);
        extraction.insert(Field::EndDatetime, temporal.end);
        extraction.insert(Field::Duration, durations);
        extraction.insert(Field::Recurrence, recurrences);
        extraction.insert(Field::Location, locations);
        extraction.insert(Field::Participants, participants);
        extraction.insert(Field::Title, titles);

        if let Some(span) = Span::new(0, text.len(), text.len()) {
            let description = Candidate::pattern(
                CandidateValue::Text(text.to_string()),
                1.0,
                MethodId::Verbatim,
                span,
                text,
            );
            extraction.insert(Field::Description, vec![description]);
        }

        tracing::debug!(
            fields = extraction.candidates.len(),
            all_day = extraction.all_day.is_some(),
            "Pattern extraction complete"
        );
        extraction
    }
}

/// Remove overlapping items in place. Items are sorted by span start; of two
/// neighbours that overlap, the one `keep_first` prefers survives.
pub(crate) fn remove_overlaps<T>(
    items: &mut Vec<T>,
    span: impl Fn(&T) -> Span,
    keep_first: impl Fn(&T, &T) -> bool,
) {
    if items.len() < 2 {
        return;
    }
    items.sort_by_key(|item| {
        let s = span(item);
        (s.start(), std::cmp::Reverse(s.end()))
    });

    let mut i = 0;
    while i + 1 < items.len() {
        if span(&items[i + 1]).start() < span(&items[i]).end() {
            if keep_first(&items[i], &items[i + 1]) {
                items.remove(i + 1);
            } else {
                items.remove(i);
                // The survivor may now overlap the item before it.
                i = i.saturating_sub(1);
            }
        } else {
            i += 1;
        }
    }
}
