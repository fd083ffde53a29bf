//! Field Extractability Router.
//!
//! Estimates, per field, how much confidence the cheap tiers can reach from
//! the structure of the text and maps that estimate to a processing tier.
//! The plan is advisory: only the orchestrator invokes tiers.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;
use crate::event::{Candidate, Field};
use crate::patterns::PatternExtraction;

/// Processing tier chosen for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingTier {
    /// The pattern result is good enough.
    FastPattern,
    /// Ask the deterministic backup recognizers.
    SecondaryDeterministic,
    /// Ask the language model.
    LanguageModel,
    /// Signals too weak to be worth escalating.
    Skip,
}

impl ProcessingTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingTier::FastPattern => "fast_pattern",
            ProcessingTier::SecondaryDeterministic => "secondary_deterministic",
            ProcessingTier::LanguageModel => "language_model",
            ProcessingTier::Skip => "skip",
        }
    }
}

/// Structural signals found for one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSignals {
    pub has_digits: bool,
    pub has_keyword: bool,
    /// Distinct values proposed at non-overlapping spans.
    pub conflicting_spans: usize,
    pub pattern_confidence: f32,
}

/// Router output for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub field: Field,
    /// Estimated achievable confidence in [0, 1].
    pub potential: f32,
    pub tier: ProcessingTier,
    pub signals: FieldSignals,
}

/// Per-field decisions plus the order fields should be processed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub decisions: BTreeMap<Field, RoutingDecision>,
    pub order: Vec<Field>,
}

impl RoutingPlan {
    pub fn decision(&self, field: Field) -> Option<&RoutingDecision> {
        self.decisions.get(&field)
    }

    /// Tier for `field`; fields without a decision are skipped.
    pub fn tier(&self, field: Field) -> ProcessingTier {
        self.decision(field)
            .map(|d| d.tier)
            .unwrap_or(ProcessingTier::Skip)
    }
}

/// Maps structural signals to processing tiers.
pub struct FieldRouter {
    config: RoutingConfig,
    temporal_keyword: Regex,
    end_keyword: Regex,
    duration_keyword: Regex,
    location_keyword: Regex,
    participant_keyword: Regex,
    recurrence_keyword: Regex,
    title_keyword: Regex,
}

impl Default for FieldRouter {
    fn default() -> Self {
        Self::new(RoutingConfig::default())
    }
}

impl FieldRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config,
            temporal_keyword: Regex::new(
                r"(?i)\b(today|tonight|tomorrow|tmrw|yesterday|monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tue|wed|thu|fri|sat|sun|january|february|march|april|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec|noon|midnight|morning|afternoon|evening|am|pm|next|week|month|eod|eow|eom)\b",
            )
            .expect("Invalid regex"),
            end_keyword: Regex::new(r"(?i)\b(until|till|til|to|through|ends?|ending)\b|\d\s*[-–]\s*\d")
                .expect("Invalid regex"),
            duration_keyword: Regex::new(
                r"(?i)\b(hours?|hrs?|minutes?|mins?|half|long|lasts?|duration)\b|\b\d+\s*[hm]\b",
            )
            .expect("Invalid regex"),
            location_keyword: Regex::new(
                r"(?i)\b(at|in|location|where|venue|room|office|street|st|ave|avenue|road|zoom|teams|meet|webex|skype)\b|@\s*[A-Z]",
            )
            .expect("Invalid regex"),
            participant_keyword: Regex::new(r"(?i)\b(with|invite|attendees?|participants?|cc)\b|\S@\S")
                .expect("Invalid regex"),
            recurrence_keyword: Regex::new(
                r"(?i)\b(every|daily|weekly|biweekly|bi-weekly|fortnightly|monthly|quarterly|yearly|annually|weekdays|recurring|repeats?)\b|\bon\s+\w+days\b",
            )
            .expect("Invalid regex"),
            title_keyword: Regex::new(
                r#"(?i)\b(meeting|call|lunch|dinner|breakfast|coffee|sync|review|interview|appointment|conference|workshop|party|presentation|demo|session|class|standup|stand-up|dentist|doctor|birthday|flight|title|subject)\b|"[^"]+""#,
            )
            .expect("Invalid regex"),
        }
    }

    /// The dependency-respecting processing order.
    pub fn processing_order(&self) -> &'static [Field] {
        &Field::PROCESSING_ORDER
    }

    /// Build a routing plan for every field.
    pub fn plan(&self, text: &str, extraction: &PatternExtraction) -> RoutingPlan {
        let decisions = Field::ALL
            .iter()
            .map(|&field| (field, self.route(field, text, extraction)))
            .collect();
        RoutingPlan {
            decisions,
            order: self.processing_order().to_vec(),
        }
    }

    /// Route a single field.
    pub fn route(
        &self,
        field: Field,
        text: &str,
        extraction: &PatternExtraction,
    ) -> RoutingDecision {
        let signals = self.signals(field, text, extraction);
        let potential = self.potential(field, &signals);
        let tier = self.tier_for(field, potential);

        tracing::debug!(
            field = field.as_str(),
            potential,
            tier = tier.as_str(),
            conflicts = signals.conflicting_spans,
            "Routed field"
        );

        RoutingDecision {
            field,
            potential,
            tier,
            signals,
        }
    }

    /// Map a confidence potential to a tier. Optional fields use the lowered
    /// thresholds, so their weak signals skip instead of escalating.
    pub fn tier_for(&self, field: Field, potential: f32) -> ProcessingTier {
        let (fast, secondary, language_model) = if field.is_optional() {
            (
                self.config.optional_fast_pattern,
                self.config.optional_secondary,
                self.config.optional_language_model,
            )
        } else {
            (
                self.config.fast_pattern,
                self.config.secondary,
                self.config.language_model,
            )
        };

        if potential >= fast {
            ProcessingTier::FastPattern
        } else if potential >= secondary {
            ProcessingTier::SecondaryDeterministic
        } else if potential >= language_model {
            ProcessingTier::LanguageModel
        } else {
            ProcessingTier::Skip
        }
    }

    fn signals(&self, field: Field, text: &str, extraction: &PatternExtraction) -> FieldSignals {
        let has_digits = text.chars().any(|c| c.is_ascii_digit());
        let has_keyword = match field {
            Field::StartDatetime => self.temporal_keyword.is_match(text),
            Field::EndDatetime => self.end_keyword.is_match(text),
            Field::Duration => self.duration_keyword.is_match(text),
            Field::Location => self.location_keyword.is_match(text),
            Field::Participants => self.participant_keyword.is_match(text),
            Field::Recurrence => self.recurrence_keyword.is_match(text),
            Field::Title => self.title_keyword.is_match(text),
            Field::Description => !text.trim().is_empty(),
        };
        let candidates = extraction.candidates(field);
        FieldSignals {
            has_digits,
            has_keyword,
            conflicting_spans: conflicting_spans(candidates),
            pattern_confidence: extraction.best_confidence(field),
        }
    }

    fn potential(&self, field: Field, signals: &FieldSignals) -> f32 {
        let structural = match field {
            Field::Description => {
                if signals.has_keyword {
                    1.0
                } else {
                    0.0
                }
            }
            Field::StartDatetime | Field::EndDatetime | Field::Duration => {
                match (signals.has_keyword, signals.has_digits) {
                    (true, true) => 0.7,
                    (true, false) => 0.6,
                    (false, true) => 0.45,
                    (false, false) => 0.0,
                }
            }
            Field::Title | Field::Recurrence => {
                if signals.has_keyword {
                    0.65
                } else {
                    0.3
                }
            }
            Field::Location | Field::Participants => {
                if signals.has_keyword {
                    0.55
                } else {
                    0.0
                }
            }
        };

        let mut potential = signals.pattern_confidence.max(structural);
        if signals.conflicting_spans > 1 {
            potential -= self.config.conflict_penalty;
        }
        potential.clamp(0.0, 1.0)
    }
}

/// Number of distinct values proposed at mutually non-overlapping spans.
fn conflicting_spans(candidates: &[Candidate]) -> usize {
    let mut kept: Vec<&Candidate> = Vec::new();
    for candidate in candidates.iter().filter(|c| !c.is_failure()) {
        let Some(span) = candidate.span() else {
            continue;
        };
        let clashes = kept.iter().any(|k| {
            k.value() == candidate.value() || k.span().is_some_and(|s| s.overlaps(&span))
        });
        if !clashes {
            kept.push(candidate);
        }
    }
    kept.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LocalePrefs, ReferenceTime};
    use crate::patterns::PatternEngine;

    fn plan(text: &str) -> RoutingPlan {
        let reference = ReferenceTime::at(2025, 9, 29, 17, 0).unwrap();
        let extraction =
            PatternEngine::default().extract(text, &reference, &LocalePrefs::default());
        FieldRouter::default().plan(text, &extraction)
    }

    #[test]
    fn test_tier_thresholds() {
        let router = FieldRouter::default();
        let field = Field::StartDatetime;
        assert_eq!(router.tier_for(field, 0.85), ProcessingTier::FastPattern);
        assert_eq!(router.tier_for(field, 0.8), ProcessingTier::FastPattern);
        assert_eq!(router.tier_for(field, 0.65), ProcessingTier::SecondaryDeterministic);
        assert_eq!(router.tier_for(field, 0.45), ProcessingTier::LanguageModel);
        assert_eq!(router.tier_for(field, 0.3), ProcessingTier::Skip);
    }

    #[test]
    fn test_optional_fields_skip_weak_signals() {
        let router = FieldRouter::default();
        assert_eq!(router.tier_for(Field::Location, 0.45), ProcessingTier::Skip);
        assert_eq!(router.tier_for(Field::Title, 0.45), ProcessingTier::LanguageModel);
        assert_eq!(
            router.tier_for(Field::Location, 0.55),
            ProcessingTier::SecondaryDeterministic
        );
        assert_eq!(router.tier_for(Field::Location, 0.72), ProcessingTier::FastPattern);
    }

    #[test]
    fn test_processing_order() {
        let plan = plan("Lunch tomorrow at noon");
        assert_eq!(plan.order.first(), Some(&Field::StartDatetime));
        assert_eq!(plan.order.last(), Some(&Field::Description));
        let position = |f: Field| plan.order.iter().position(|x| *x == f).unwrap();
        assert!(position(Field::Duration) < position(Field::EndDatetime));
        assert!(position(Field::EndDatetime) < position(Field::Title));
        assert_eq!(plan.decisions.len(), Field::ALL.len());
    }

    #[test]
    fn test_clear_datetime_is_fast() {
        let plan = plan("Meeting on 12/25/2024 at 2:30 PM");
        assert_eq!(plan.tier(Field::StartDatetime), ProcessingTier::FastPattern);
        assert_eq!(plan.tier(Field::Description), ProcessingTier::FastPattern);
    }

    #[test]
    fn test_vague_text_routes_low() {
        let plan = plan("something unclear and vague");
        assert_eq!(plan.tier(Field::StartDatetime), ProcessingTier::Skip);
        assert_eq!(plan.tier(Field::Location), ProcessingTier::Skip);
        assert_eq!(plan.tier(Field::Participants), ProcessingTier::Skip);
        assert_eq!(plan.tier(Field::Title), ProcessingTier::Skip);
    }

    #[test]
    fn test_location_without_signal_skips() {
        let plan = plan("Dentist sometime next week");
        let decision = plan.decision(Field::Location).unwrap();
        assert_eq!(decision.tier, ProcessingTier::Skip);
        assert!(!decision.signals.has_keyword);
    }

    #[test]
    fn test_conflicting_spans_penalized() {
        let text = "Call Monday or Tuesday";
        let reference = ReferenceTime::at(2025, 9, 29, 17, 0).unwrap();
        let extraction =
            PatternEngine::default().extract(text, &reference, &LocalePrefs::default());
        let router = FieldRouter::default();
        let decision = router.route(Field::StartDatetime, text, &extraction);
        assert!(decision.signals.conflicting_spans > 1);
        assert!(decision.potential < decision.signals.pattern_confidence.max(0.6));
    }
}
