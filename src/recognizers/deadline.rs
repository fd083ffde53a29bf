//! Deadline and period recognizer: "by Friday", "end of month", "EOD",
//! "first thing tomorrow".

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use super::traits::{Recognizer, SourceReliability};
use crate::error::Result;
use crate::event::{
    rank_candidates, Candidate, CandidateSource, CandidateValue, Field, MethodId, ReferenceTime,
    Span,
};
use crate::patterns::{
    end_of_month, end_of_quarter, end_of_week, end_of_year, resolve_weekday, weekday_from_name,
    WeekdayRule, WEEKDAYS,
};

const NAME: &str = "deadline";

/// Close of business, the time a bare deadline lands on.
const DEADLINE_HOUR: u32 = 17;
const FIRST_THING_HOUR: u32 = 9;

/// Recognizes deadline and period phrasings the pattern tier does not cover.
pub struct DeadlineRecognizer {
    by_weekday: Regex,
    end_of_period: Regex,
    abbreviation: Regex,
    by_day: Regex,
    first_thing: Regex,
}

impl Default for DeadlineRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineRecognizer {
    pub fn new() -> Self {
        Self {
            by_weekday: Regex::new(&format!(
                r"(?i)\b(?:by|due|before|deadline)\s+(?:(next)\s+)?({WEEKDAYS})\b"
            ))
            .expect("Invalid regex"),
            end_of_period: Regex::new(
                r"(?i)\b(?:(?:by|due|before)\s+)?(?:the\s+)?end\s+of\s+(?:the\s+)?(day|week|month|quarter|year)\b",
            )
            .expect("Invalid regex"),
            abbreviation: Regex::new(r"\b(EOD|COB|EOW|EOM|EOQ|EOY)\b").expect("Invalid regex"),
            by_day: Regex::new(r"(?i)\b(?:by|due|before)\s+(today|tonight|tomorrow)\b")
                .expect("Invalid regex"),
            first_thing: Regex::new(&format!(
                r"(?i)\bfirst\s+thing\s+(?:(today|tomorrow)|(?:(next)\s+)?({WEEKDAYS}))\b"
            ))
            .expect("Invalid regex"),
        }
    }

    /// Every deadline found in `text`, best first.
    pub fn deadlines(&self, text: &str, reference: &ReferenceTime) -> Vec<Candidate> {
        let today = reference.date();
        let mut found = Vec::new();

        for cap in self.by_weekday.captures_iter(text) {
            let Some(weekday) = weekday_from_name(&cap[2]) else {
                continue;
            };
            let rule = if cap.get(1).is_some() {
                WeekdayRule::Next
            } else {
                WeekdayRule::Upcoming
            };
            let date = resolve_weekday(today, weekday, rule);
            self.push(&mut found, text, cap.get(0), at(date, DEADLINE_HOUR), 0.75, reference);
        }

        for cap in self.end_of_period.captures_iter(text) {
            let date = period_end(&cap[1], today);
            self.push(&mut found, text, cap.get(0), at(date, DEADLINE_HOUR), 0.75, reference);
        }

        for cap in self.abbreviation.captures_iter(text) {
            let period = match &cap[1] {
                "EOD" | "COB" => "day",
                "EOW" => "week",
                "EOM" => "month",
                "EOQ" => "quarter",
                _ => "year",
            };
            let date = period_end(period, today);
            self.push(&mut found, text, cap.get(0), at(date, DEADLINE_HOUR), 0.7, reference);
        }

        for cap in self.by_day.captures_iter(text) {
            let (offset, hour) = match cap[1].to_lowercase().as_str() {
                "tomorrow" => (1, DEADLINE_HOUR),
                "tonight" => (0, 20),
                _ => (0, DEADLINE_HOUR),
            };
            let date = today + Duration::days(offset);
            self.push(&mut found, text, cap.get(0), at(date, hour), 0.75, reference);
        }

        for cap in self.first_thing.captures_iter(text) {
            let date = match (cap.get(1), cap.get(3)) {
                (Some(day), _) if day.as_str().eq_ignore_ascii_case("tomorrow") => {
                    today + Duration::days(1)
                }
                (Some(_), _) => today,
                (None, Some(name)) => {
                    let Some(weekday) = weekday_from_name(name.as_str()) else {
                        continue;
                    };
                    let rule = if cap.get(2).is_some() {
                        WeekdayRule::Next
                    } else {
                        WeekdayRule::Upcoming
                    };
                    resolve_weekday(today, weekday, rule)
                }
                (None, None) => continue,
            };
            self.push(&mut found, text, cap.get(0), at(date, FIRST_THING_HOUR), 0.7, reference);
        }

        rank_candidates(&mut found);
        found
    }

    fn push(
        &self,
        found: &mut Vec<Candidate>,
        text: &str,
        m: Option<regex::Match<'_>>,
        when: Option<NaiveDateTime>,
        confidence: f32,
        reference: &ReferenceTime,
    ) {
        let (Some(m), Some(when)) = (m, when) else {
            return;
        };
        let Some(span) = Span::new(m.start(), m.end(), text.len()) else {
            return;
        };
        // Answer in the caller's offset when it is known; otherwise leave the
        // datetime naive for the coordinator to normalize.
        let value = match reference
            .offset()
            .and_then(|offset| when.and_local_timezone(offset).single())
        {
            Some(dt) => CandidateValue::DateTime(dt),
            None => CandidateValue::LocalDateTime(when),
        };
        found.push(
            Candidate::new(
                value,
                CandidateSource::recognizer(NAME),
                confidence,
                MethodId::DeadlinePhrase,
            )
            .with_span(span, text),
        );
    }
}

fn at(date: NaiveDate, hour: u32) -> Option<NaiveDateTime> {
    NaiveTime::from_hms_opt(hour, 0, 0).map(|time| date.and_time(time))
}

fn period_end(period: &str, today: NaiveDate) -> NaiveDate {
    match period.to_lowercase().as_str() {
        "week" => end_of_week(today),
        "month" => end_of_month(today),
        "quarter" => end_of_quarter(today),
        "year" => end_of_year(today),
        _ => today,
    }
}

#[async_trait]
impl Recognizer for DeadlineRecognizer {
    fn name(&self) -> &str {
        NAME
    }

    fn reliability(&self) -> SourceReliability {
        SourceReliability::High
    }

    fn supports(&self, field: Field) -> bool {
        field == Field::StartDatetime
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn extract(
        &self,
        text: &str,
        field: Field,
        reference: &ReferenceTime,
    ) -> Result<Option<Candidate>> {
        if !self.supports(field) {
            return Ok(None);
        }
        Ok(self.deadlines(text, reference).into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Monday
    fn reference() -> ReferenceTime {
        ReferenceTime::at(2025, 9, 29, 17, 0).unwrap()
    }

    fn first(text: &str) -> NaiveDateTime {
        let found = DeadlineRecognizer::new().deadlines(text, &reference());
        found
            .first()
            .and_then(|c| c.value().naive_datetime())
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_by_weekday() {
        assert_eq!(first("Report due Friday"), date(2025, 10, 3, 17));
        assert_eq!(first("Send slides by next Monday"), date(2025, 10, 6, 17));
    }

    #[test]
    fn test_end_of_period() {
        assert_eq!(first("Invoices by end of month"), date(2025, 9, 30, 17));
        assert_eq!(first("Wrap up by the end of the quarter"), date(2025, 9, 30, 17));
        assert_eq!(first("Plan before end of year"), date(2025, 12, 31, 17));
        assert_eq!(first("Ship it end of week"), date(2025, 10, 5, 17));
    }

    #[test]
    fn test_abbreviations() {
        assert_eq!(first("Review PR EOD"), date(2025, 9, 29, 17));
        assert_eq!(first("Budget numbers EOM"), date(2025, 9, 30, 17));
    }

    #[test]
    fn test_first_thing() {
        assert_eq!(first("Call them first thing tomorrow"), date(2025, 9, 30, 9));
        assert_eq!(first("first thing Wednesday"), date(2025, 10, 1, 9));
    }

    #[test]
    fn test_naive_without_reference_offset() {
        let found = DeadlineRecognizer::new().deadlines("due tomorrow", &reference());
        assert!(matches!(found[0].value(), CandidateValue::LocalDateTime(_)));
        assert_eq!(found[0].matched_text(), "due tomorrow");

        let with_offset = reference().with_offset_minutes(-300);
        let found = DeadlineRecognizer::new().deadlines("due tomorrow", &with_offset);
        match found[0].value() {
            CandidateValue::DateTime(dt) => assert_eq!(dt.offset().local_minus_utc(), -300 * 60),
            other => panic!("expected explicit offset, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_only_start_field() {
        let recognizer = DeadlineRecognizer::new();
        let answer = recognizer
            .extract("due Friday", Field::Location, &reference())
            .await
            .unwrap();
        assert!(answer.is_none());
        let answer = recognizer
            .extract("nothing here", Field::StartDatetime, &reference())
            .await
            .unwrap();
        assert!(answer.is_none());
    }
}
