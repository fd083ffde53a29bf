//! Recurring patterns: "every Monday", "every 2 weeks", "weekdays", "monthly".

use chrono::Weekday;
use regex::Regex;

use super::temporal::{parse_count, weekday_from_name, WEEKDAYS};
use crate::event::{
    rank_candidates, Candidate, CandidateValue, MethodId, RecurrencePattern, RecurrenceRule, Span,
};

const WORKWEEK: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// Compiled recurrence pattern library.
pub struct RecurrencePatterns {
    every_weekdays: Regex,
    every_n: Regex,
    every_unit: Regex,
    frequency: Regex,
    plural_weekday: Regex,
    count: Regex,
}

impl Default for RecurrencePatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl RecurrencePatterns {
    pub fn new() -> Self {
        Self {
            every_weekdays: Regex::new(&format!(
                r"(?i)\bevery\s+(?:other\s+)?(({WEEKDAYS})s?(?:\s*(?:,|and|&)\s*(?:{WEEKDAYS})s?)*)\b"
            ))
            .expect("Invalid regex"),
            every_n: Regex::new(
                r"(?i)\bevery\s+(\d{1,2}|two|three|four|five|six)\s+(days?|weeks?|months?|years?)\b",
            )
            .expect("Invalid regex"),
            every_unit: Regex::new(r"(?i)\bevery\s+(other\s+)?(day|weekday|week|month|year)\b")
                .expect("Invalid regex"),
            frequency: Regex::new(
                r"(?i)\b(daily|weekly|bi-?weekly|fortnightly|monthly|quarterly|yearly|annually|weekdays)\b",
            )
            .expect("Invalid regex"),
            plural_weekday: Regex::new(&format!(r"(?i)\bon\s+({WEEKDAYS})s\b"))
                .expect("Invalid regex"),
            count: Regex::new(r"(?i)\bfor\s+(\d{1,3})\s+(?:occurrences|times|sessions)\b")
                .expect("Invalid regex"),
        }
    }

    /// Extract recurrence candidates.
    pub fn extract(&self, text: &str) -> Vec<Candidate> {
        let mut found: Vec<(Span, RecurrenceRule, f32)> = Vec::new();

        for cap in self.every_weekdays.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            let days: Vec<Weekday> = cap[1]
                .split(|c: char| !c.is_alphabetic())
                .filter_map(|w| weekday_from_name(w.trim_end_matches('s')))
                .collect();
            if days.is_empty() {
                continue;
            }
            let interval = if full.as_str().to_lowercase().contains("other") { 2 } else { 1 };
            let rule = RecurrenceRule::new(RecurrencePattern::Weekly, interval).on_days(days);
            push(&mut found, text, full, rule, 0.9);
        }

        for cap in self.every_n.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            let Some(interval) = parse_count(&cap[1]).and_then(|n| u32::try_from(n).ok()) else {
                continue;
            };
            let pattern = unit_pattern(&cap[2]);
            push(&mut found, text, full, RecurrenceRule::new(pattern, interval), 0.9);
        }

        for cap in self.every_unit.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            let interval = if cap.get(1).is_some() { 2 } else { 1 };
            let rule = match cap[2].to_lowercase().as_str() {
                "weekday" => RecurrenceRule::new(RecurrencePattern::Weekly, 1).on_days(WORKWEEK),
                unit => RecurrenceRule::new(unit_pattern(unit), interval),
            };
            push(&mut found, text, full, rule, 0.85);
        }

        for cap in self.frequency.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            let rule = match cap[1].to_lowercase().replace('-', "").as_str() {
                "daily" => RecurrenceRule::new(RecurrencePattern::Daily, 1),
                "weekly" => RecurrenceRule::new(RecurrencePattern::Weekly, 1),
                "biweekly" | "fortnightly" => RecurrenceRule::new(RecurrencePattern::Weekly, 2),
                "monthly" => RecurrenceRule::new(RecurrencePattern::Monthly, 1),
                "quarterly" => RecurrenceRule::new(RecurrencePattern::Monthly, 3),
                "weekdays" => RecurrenceRule::new(RecurrencePattern::Weekly, 1).on_days(WORKWEEK),
                _ => RecurrenceRule::new(RecurrencePattern::Yearly, 1),
            };
            push(&mut found, text, full, rule, 0.85);
        }

        for cap in self.plural_weekday.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            let Some(day) = weekday_from_name(&cap[1]) else {
                continue;
            };
            let rule = RecurrenceRule::new(RecurrencePattern::Weekly, 1).on_days([day]);
            push(&mut found, text, full, rule, 0.75);
        }

        // "for 8 sessions" bounds every rule found in the same text
        if let Some(count) = self
            .count
            .captures(text)
            .and_then(|cap| cap[1].parse::<u32>().ok())
        {
            for (_, rule, _) in found.iter_mut() {
                rule.count = Some(count);
            }
        }

        super::remove_overlaps(
            &mut found,
            |f| f.0,
            |a, b| (a.2, a.0.len()) >= (b.2, b.0.len()),
        );

        let mut candidates: Vec<Candidate> = found
            .into_iter()
            .map(|(span, rule, confidence)| {
                Candidate::pattern(
                    CandidateValue::Recurrence(rule),
                    confidence,
                    MethodId::RecurrencePhrase,
                    span,
                    text,
                )
            })
            .collect();
        rank_candidates(&mut candidates);
        candidates
    }
}

fn unit_pattern(unit: &str) -> RecurrencePattern {
    let unit = unit.to_lowercase();
    if unit.starts_with("day") {
        RecurrencePattern::Daily
    } else if unit.starts_with("week") {
        RecurrencePattern::Weekly
    } else if unit.starts_with("month") {
        RecurrencePattern::Monthly
    } else {
        RecurrencePattern::Yearly
    }
}

fn push(
    found: &mut Vec<(Span, RecurrenceRule, f32)>,
    text: &str,
    m: regex::Match<'_>,
    rule: RecurrenceRule,
    confidence: f32,
) {
    if let Some(span) = Span::new(m.start(), m.end(), text.len()) {
        found.push((span, rule, confidence));
    }
}
