//! Duration phrasings: "for 2 hours", "1h30m", "45 min", "half an hour".

use regex::Regex;

use super::remove_overlaps;
use super::temporal::{dedupe_by_value, parse_count};
use crate::event::{rank_candidates, Candidate, CandidateValue, MethodId, Span};
use crate::utils::word_before;

/// Longest duration a single phrase may express (one week).
pub const MAX_DURATION_MINUTES: i64 = 7 * 24 * 60;

/// Compiled duration pattern library.
pub struct DurationPatterns {
    for_phrase: Regex,
    compound: Regex,
    generic: Regex,
    words: Regex,
}

impl Default for DurationPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl DurationPatterns {
    pub fn new() -> Self {
        Self {
            for_phrase: Regex::new(
                r"(?i)\bfor\s+(\d+(?:\.\d+)?|an?|one|two|three|four|five|six|seven|eight|nine|ten|twelve)\s*(hours?|hrs?|h|minutes?|mins?)\b",
            )
            .expect("Invalid regex"),
            compound: Regex::new(
                r"(?i)\b(\d{1,2})\s*(?:h|hrs?|hours?)\s*(?:and\s+)?(\d{1,2})\s*(?:m|mins?|minutes?)\b",
            )
            .expect("Invalid regex"),
            generic: Regex::new(r"(?i)\b(\d+(?:\.\d+)?)[\s-]*(hours?|hrs?|minutes?|mins?)\b")
                .expect("Invalid regex"),
            words: Regex::new(
                r"(?i)\b(an?\s+hour\s+and\s+a\s+half|half\s+an\s+hour|quarter\s+of\s+an\s+hour|an?\s+hour|a\s+couple\s+of\s+hours)\b",
            )
            .expect("Invalid regex"),
        }
    }

    /// Extract duration candidates, in minutes.
    pub fn extract(&self, text: &str) -> Vec<Candidate> {
        let mut found: Vec<(Span, i64, f32, MethodId)> = Vec::new();

        for cap in self.for_phrase.captures_iter(text) {
            let Some(minutes) = amount_minutes(&cap[1], &cap[2]) else {
                continue;
            };
            if let Some(span) = cap.get(0).and_then(|m| Span::new(m.start(), m.end(), text.len())) {
                found.push((span, minutes, 0.9, MethodId::DurationPhrase));
            }
        }

        for cap in self.compound.captures_iter(text) {
            let (Ok(hours), Ok(minutes)) = (cap[1].parse::<i64>(), cap[2].parse::<i64>()) else {
                continue;
            };
            if let Some(span) = cap.get(0).and_then(|m| Span::new(m.start(), m.end(), text.len())) {
                found.push((span, hours * 60 + minutes, 0.9, MethodId::DurationCompound));
            }
        }

        for cap in self.generic.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            // "in 2 hours" is a point in time, not a length
            if word_before(text, full.start()).as_deref() == Some("in") {
                continue;
            }
            let Some(minutes) = amount_minutes(&cap[1], &cap[2]) else {
                continue;
            };
            if let Some(span) = Span::new(full.start(), full.end(), text.len()) {
                found.push((span, minutes, 0.8, MethodId::DurationPhrase));
            }
        }

        for cap in self.words.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            if word_before(text, full.start()).as_deref() == Some("in") {
                continue;
            }
            let phrase = cap[1].to_lowercase();
            let (minutes, confidence) = if phrase.contains("and a half") {
                (90, 0.85)
            } else if phrase.starts_with("half") {
                (30, 0.8)
            } else if phrase.starts_with("quarter") {
                (15, 0.8)
            } else if phrase.contains("couple") {
                (120, 0.7)
            } else {
                (60, 0.75)
            };
            if let Some(span) = Span::new(full.start(), full.end(), text.len()) {
                found.push((span, minutes, confidence, MethodId::DurationWords));
            }
        }

        // Overlapping phrasings: the longest wording is the most specific.
        remove_overlaps(
            &mut found,
            |f| f.0,
            |a, b| (a.0.len(), a.2) >= (b.0.len(), b.2),
        );

        let mut candidates: Vec<Candidate> = found
            .into_iter()
            .filter(|(_, minutes, _, _)| *minutes > 0 && *minutes <= MAX_DURATION_MINUTES)
            .map(|(span, minutes, confidence, method)| {
                Candidate::pattern(
                    CandidateValue::DurationMinutes(minutes),
                    confidence,
                    method,
                    span,
                    text,
                )
            })
            .collect();
        rank_candidates(&mut candidates);
        dedupe_by_value(&mut candidates);
        candidates
    }
}

fn amount_minutes(amount: &str, unit: &str) -> Option<i64> {
    let unit = unit.to_lowercase();
    let per_unit = if unit.starts_with('h') { 60.0 } else { 1.0 };
    let amount = match amount.parse::<f64>() {
        Ok(value) => value,
        Err(_) => parse_count(amount)? as f64,
    };
    Some((amount * per_unit).round() as i64)
}
