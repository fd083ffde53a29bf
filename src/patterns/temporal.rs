//! Date and time pattern families.
//!
//! Supported expressions:
//! - Absolute dates: "2024-01-15", "January 15, 2024", "15th of March", "12/25/2024"
//! - Relative dates: "today", "tomorrow", "next Tuesday", "in 2 weeks", "next month"
//! - Times: "3pm", "2:30 PM", "15:30", "at 4", "noon", "tonight"
//! - Ranges and end times: "2-4pm", "from 10:00 to 11:30", "until 5pm"
//!
//! Dates and times that sit close together are combined into one datetime
//! candidate. Everything resolves against the request's reference time.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use regex::{Captures, Regex};

use super::remove_overlaps;
use crate::config::{BareHourPolicy, PatternConfig};
use crate::event::{
    rank_candidates, Candidate, CandidateValue, DateOrder, LocalePrefs, MethodId, ReferenceTime,
    Span,
};
use crate::utils::{safe_slice, word_before};

/// Month names, longest spelling first so alternation prefers it.
pub(crate) const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|sept|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec";

pub(crate) const WEEKDAYS: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";

/// Cap on combined date+time confidence.
const COMBINED_CEILING: f32 = 0.98;

/// Bytes after a numeric time within which "morning"/"evening" qualify it.
const QUALIFIER_DISTANCE: usize = 20;

// ============================================================================
// Calendar helpers
// ============================================================================

pub(crate) fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

pub(crate) fn weekday_from_name(name: &str) -> Option<Weekday> {
    name.trim().parse::<Weekday>().ok()
}

/// Small cardinal numbers written as digits or words.
pub(crate) fn parse_count(word: &str) -> Option<i64> {
    let word = word.trim().to_lowercase();
    if let Ok(n) = word.parse::<i64>() {
        return Some(n);
    }
    let n = match word.as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        w if w.starts_with("a couple") => 2,
        _ => return None,
    };
    Some(n)
}

/// How a weekday name is anchored to the reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WeekdayRule {
    /// Today or the next occurrence.
    Upcoming,
    /// The next occurrence strictly after today.
    Next,
    /// The most recent occurrence strictly before today.
    Last,
}

pub(crate) fn resolve_weekday(
    reference: NaiveDate,
    target: Weekday,
    rule: WeekdayRule,
) -> NaiveDate {
    let current = reference.weekday().num_days_from_monday() as i64;
    let target = target.num_days_from_monday() as i64;
    let ahead = (target - current).rem_euclid(7);
    match rule {
        WeekdayRule::Upcoming => reference + Duration::days(ahead),
        WeekdayRule::Next => reference + Duration::days(if ahead == 0 { 7 } else { ahead }),
        WeekdayRule::Last => {
            let behind = (current - target).rem_euclid(7);
            reference - Duration::days(if behind == 0 { 7 } else { behind })
        }
    }
}

pub(crate) fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

pub(crate) fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// The Sunday closing the reference week.
pub(crate) fn end_of_week(reference: NaiveDate) -> NaiveDate {
    let days_until_sunday = 6 - reference.weekday().num_days_from_monday() as i64;
    reference + Duration::days(days_until_sunday)
}

pub(crate) fn end_of_month(reference: NaiveDate) -> NaiveDate {
    add_months(first_of_month(reference), 1)
        .map(|d| d - Duration::days(1))
        .unwrap_or(reference)
}

pub(crate) fn end_of_quarter(reference: NaiveDate) -> NaiveDate {
    let quarter_end_month = ((reference.month() - 1) / 3 + 1) * 3;
    NaiveDate::from_ymd_opt(reference.year(), quarter_end_month, 1)
        .map(end_of_month)
        .unwrap_or(reference)
}

pub(crate) fn end_of_year(reference: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(reference.year(), 12, 31).unwrap_or(reference)
}

/// A yearless date in the reference year, or next year if already past.
fn roll_forward(reference: NaiveDate, month: u32, day: u32) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
    if this_year < reference {
        NaiveDate::from_ymd_opt(reference.year() + 1, month, day)
    } else {
        Some(this_year)
    }
}

fn expand_year(year: i32) -> i32 {
    if year < 100 {
        2000 + year
    } else {
        year
    }
}

/// Convert a 12-hour clock reading to a 24-hour hour.
pub(crate) fn to_24h(hour: u32, meridiem: char) -> Option<u32> {
    if !(1..=12).contains(&hour) {
        return None;
    }
    match (meridiem.to_ascii_lowercase(), hour) {
        ('a', 12) => Some(0),
        ('a', h) => Some(h),
        ('p', 12) => Some(12),
        ('p', h) => Some(h + 12),
        _ => None,
    }
}

fn span_of(m: &regex::Match<'_>, text: &str) -> Option<Span> {
    Span::new(m.start(), m.end(), text.len())
}

fn meridiem_of(caps: &Captures<'_>, group: usize) -> Option<char> {
    caps.get(group)
        .and_then(|m| m.as_str().chars().next())
        .map(|c| c.to_ascii_lowercase())
}

fn minutes_of(caps: &Captures<'_>, group: usize) -> u32 {
    caps.get(group)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// A "morning"/"evening" style qualifier right after a bare hour.
fn meridiem_hint(text: &str, end: usize) -> Option<char> {
    let tail = safe_slice(text, end, end + 24).to_lowercase();
    let tail = tail.trim_start();
    if tail.starts_with("in the morning") || tail.starts_with("morning") {
        Some('a')
    } else if [
        "in the afternoon",
        "in the evening",
        "at night",
        "tonight",
        "this afternoon",
        "this evening",
    ]
    .iter()
    .any(|p| tail.starts_with(p))
    {
        Some('p')
    } else {
        None
    }
}

// ============================================================================
// Raw matches
// ============================================================================

#[derive(Debug, Clone)]
struct DateMatch {
    date: NaiveDate,
    /// Set when the expression already carries a time ("in 2 hours", ISO datetime).
    time: Option<NaiveTime>,
    span: Span,
    confidence: f32,
    method: MethodId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeRole {
    Start,
    End,
}

#[derive(Debug, Clone)]
struct TimeMatch {
    time: NaiveTime,
    /// End of a range ("2-4pm").
    end: Option<NaiveTime>,
    span: Span,
    confidence: f32,
    method: MethodId,
    role: TimeRole,
}

impl TimeMatch {
    fn is_compound(&self) -> bool {
        matches!(self.method, MethodId::TimeRange | MethodId::UntilTime)
    }
}

/// Start and end datetime candidates found in one text.
#[derive(Debug, Clone, Default)]
pub struct TemporalCandidates {
    pub start: Vec<Candidate>,
    pub end: Vec<Candidate>,
    /// Spans of every date and time expression that survived pruning.
    pub spans: Vec<Span>,
}

// ============================================================================
// Temporal patterns
// ============================================================================

/// Compiled date and time pattern library.
pub struct TemporalPatterns {
    iso: Regex,
    month_day: Regex,
    day_month: Regex,
    numeric: Regex,
    relative_day: Regex,
    relative_weekday: Regex,
    bare_weekday: Regex,
    recurring_weekday: Regex,
    relative_offset: Regex,
    relative_period: Regex,
    range_12h: Regex,
    range_24h: Regex,
    until_time: Regex,
    time_12h: Regex,
    time_colon: Regex,
    at_hour: Regex,
    named_time: Regex,
    config: PatternConfig,
}

impl TemporalPatterns {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            iso: Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::\d{2})?)?\b")
                .expect("Invalid regex"),
            month_day: Regex::new(&format!(
                r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?"
            ))
            .expect("Invalid regex"),
            day_month: Regex::new(&format!(
                r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\b\.?(?:,?\s+(\d{{4}})\b)?"
            ))
            .expect("Invalid regex"),
            numeric: Regex::new(r"\b(\d{1,2})([/.-])(\d{1,2})(?:([/.-])(\d{2,4}))?\b")
                .expect("Invalid regex"),
            relative_day: Regex::new(
                r"(?i)\b(day after tomorrow|today|tonight|tomorrow|tmrw|yesterday)\b",
            )
            .expect("Invalid regex"),
            relative_weekday: Regex::new(&format!(
                r"(?i)\b(next|this|coming|last)\s+({WEEKDAYS})\b"
            ))
            .expect("Invalid regex"),
            bare_weekday: Regex::new(&format!(r"(?i)\b({WEEKDAYS})\b")).expect("Invalid regex"),
            recurring_weekday: Regex::new(&format!(
                r"(?i)\b(?:every\s+({WEEKDAYS})s?|on\s+({WEEKDAYS})s)\b"
            ))
            .expect("Invalid regex"),
            relative_offset: Regex::new(
                r"(?i)\bin\s+(\d{1,3}|an?|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|a\s+couple\s+of)\s+(minutes?|mins?|hours?|hrs?|days?|weeks?|months?|years?)\b",
            )
            .expect("Invalid regex"),
            relative_period: Regex::new(r"(?i)\bnext\s+(week|month|year)\b")
                .expect("Invalid regex"),
            range_12h: Regex::new(
                r"(?i)\b(?:from\s+)?(\d{1,2})(?::([0-5]\d))?\s*(?:([ap])\.?m\.?)?\s*(?:-|–|to|until|till)\s*(\d{1,2})(?::([0-5]\d))?\s*([ap])\.?m\b\.?",
            )
            .expect("Invalid regex"),
            range_24h: Regex::new(
                r"(?i)\b(?:from\s+)?(\d{1,2}):([0-5]\d)\s*(?:-|–|to|until|till)\s*(\d{1,2}):([0-5]\d)\b",
            )
            .expect("Invalid regex"),
            until_time: Regex::new(
                r"(?i)\b(?:until|till|til)\s+(\d{1,2})(?::([0-5]\d))?\s*(?:([ap])\.?m\b\.?)?",
            )
            .expect("Invalid regex"),
            time_12h: Regex::new(r"(?i)\b(\d{1,2})(?::([0-5]\d))?\s*([ap])\.?m\b\.?")
                .expect("Invalid regex"),
            time_colon: Regex::new(r"\b(\d{1,2}):([0-5]\d)\b").expect("Invalid regex"),
            at_hour: Regex::new(r"(?i)\bat\s+(\d{1,2})\b").expect("Invalid regex"),
            named_time: Regex::new(
                r"(?i)\b(noon|midday|midnight|morning|afternoon|evening|tonight)\b",
            )
            .expect("Invalid regex"),
            config,
        }
    }

    fn bare_hour(&self) -> &BareHourPolicy {
        &self.config.bare_hour
    }

    /// Extract start and end datetime candidates from `text`.
    pub fn extract(
        &self,
        text: &str,
        reference: &ReferenceTime,
        locale: &LocalePrefs,
    ) -> TemporalCandidates {
        let dates = self.parse_dates(text, reference, locale);
        let mut times = self.parse_times(text);

        // Times already carried by a date expression are not counted twice.
        times.retain(|t| {
            !dates
                .iter()
                .any(|d| d.time.is_some() && d.span.overlaps(&t.span))
        });

        let mut spans: Vec<Span> = dates.iter().map(|d| d.span).collect();
        spans.extend(times.iter().map(|t| t.span));

        let (mut start, mut end) = self.combine(text, &dates, &times, reference);
        dedupe_by_value(&mut start);
        dedupe_by_value(&mut end);

        TemporalCandidates { start, end, spans }
    }

    // ------------------------------------------------------------------------
    // Dates
    // ------------------------------------------------------------------------

    fn parse_dates(
        &self,
        text: &str,
        reference: &ReferenceTime,
        locale: &LocalePrefs,
    ) -> Vec<DateMatch> {
        let mut results = Vec::new();
        results.extend(self.parse_absolute_dates(text, reference, locale));
        results.extend(self.parse_relative_dates(text, reference));

        // "Monday, Jan 5": the weekday only restates the absolute date.
        let absolute: Vec<Span> = results
            .iter()
            .filter(|d| {
                matches!(
                    d.method,
                    MethodId::IsoDate
                        | MethodId::MonthNameDate
                        | MethodId::DayMonthNameDate
                        | MethodId::NumericDate
                )
            })
            .map(|d| d.span)
            .collect();
        results.retain(|d| {
            !(d.method == MethodId::RelativeWeekday
                && d.confidence < 0.8
                && absolute.iter().any(|a| d.span.gap(a) <= 2))
        });

        remove_overlaps(
            &mut results,
            |d| d.span,
            |a, b| (a.confidence, a.span.len()) >= (b.confidence, b.span.len()),
        );
        results
    }

    fn parse_absolute_dates(
        &self,
        text: &str,
        reference: &ReferenceTime,
        locale: &LocalePrefs,
    ) -> Vec<DateMatch> {
        let mut results = Vec::new();
        let today = reference.date();

        // ISO: 2024-01-15, optionally with a time
        for cap in self.iso.captures_iter(text) {
            let (Ok(year), Ok(month), Ok(day)) = (
                cap[1].parse::<i32>(),
                cap[2].parse::<u32>(),
                cap[3].parse::<u32>(),
            ) else {
                continue;
            };
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let time = match (cap.get(4), cap.get(5)) {
                (Some(h), Some(m)) => match (h.as_str().parse(), m.as_str().parse()) {
                    (Ok(h), Ok(m)) => NaiveTime::from_hms_opt(h, m, 0),
                    _ => None,
                },
                _ => None,
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date,
                time,
                span,
                confidence: 0.95,
                method: MethodId::IsoDate,
            });
        }

        // Month name first: "December 25, 2024", "Dec 25"
        for cap in self.month_day.captures_iter(text) {
            let Some(month) = month_number(&cap[1]) else {
                continue;
            };
            if let Some(m) = self.month_name_match(text, &cap, month, 2, 3, today) {
                results.push(DateMatch {
                    method: MethodId::MonthNameDate,
                    ..m
                });
            }
        }

        // Day first: "25th of December", "3 March 2025"
        for cap in self.day_month.captures_iter(text) {
            let Some(month) = month_number(&cap[2]) else {
                continue;
            };
            if let Some(m) = self.month_name_match(text, &cap, month, 1, 3, today) {
                results.push(DateMatch {
                    method: MethodId::DayMonthNameDate,
                    ..m
                });
            }
        }

        // Numeric: 12/25/2024, 25.12.2024, 3/14
        for cap in self.numeric.captures_iter(text) {
            let separator = &cap[2];
            let year = match (cap.get(4), cap.get(5)) {
                (Some(sep), Some(year)) => {
                    if sep.as_str() != separator {
                        continue;
                    }
                    match year.as_str().parse::<i32>() {
                        Ok(y) => Some(expand_year(y)),
                        Err(_) => continue,
                    }
                }
                // Yearless numeric dates only with a slash; "2-4" and "10.30" are not dates.
                _ if separator == "/" => None,
                _ => continue,
            };
            let (Ok(first), Ok(second)) = (cap[1].parse::<u32>(), cap[3].parse::<u32>()) else {
                continue;
            };
            let (month, day) = match locale.date_order {
                DateOrder::MonthFirst => (first, second),
                DateOrder::DayFirst => (second, first),
            };
            let resolve = |month: u32, day: u32| match year {
                Some(y) => NaiveDate::from_ymd_opt(y, month, day),
                None => roll_forward(today, month, day),
            };
            let preferred = resolve(month, day);
            let swapped = resolve(day, month);
            let (date, confidence) = match (preferred, swapped) {
                // Both readings valid and different: the locale decides.
                (Some(p), Some(s)) if p != s => (p, 0.75),
                (Some(p), _) => (p, 0.85),
                (None, Some(s)) => (s, 0.85),
                (None, None) => continue,
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date,
                time: None,
                span,
                confidence,
                method: MethodId::NumericDate,
            });
        }

        results
    }

    fn month_name_match(
        &self,
        text: &str,
        cap: &Captures<'_>,
        month: u32,
        day_group: usize,
        year_group: usize,
        today: NaiveDate,
    ) -> Option<DateMatch> {
        let day = cap.get(day_group)?.as_str().parse::<u32>().ok()?;
        let (date, confidence) = match cap.get(year_group) {
            Some(year) => {
                let year = year.as_str().parse::<i32>().ok()?;
                (NaiveDate::from_ymd_opt(year, month, day)?, 0.9)
            }
            None => (roll_forward(today, month, day)?, 0.85),
        };
        let full = cap.get(0)?;
        Some(DateMatch {
            date,
            time: None,
            span: span_of(&full, text)?,
            confidence,
            method: MethodId::MonthNameDate,
        })
    }

    fn parse_relative_dates(&self, text: &str, reference: &ReferenceTime) -> Vec<DateMatch> {
        let mut results = Vec::new();
        let today = reference.date();

        // today / tomorrow / day after tomorrow
        for cap in self.relative_day.captures_iter(text) {
            let days = match cap[1].to_lowercase().as_str() {
                "today" | "tonight" => 0,
                "tomorrow" | "tmrw" => 1,
                "day after tomorrow" => 2,
                "yesterday" => -1,
                _ => continue,
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date: today + Duration::days(days),
                time: None,
                span,
                confidence: 0.9,
                method: MethodId::RelativeDay,
            });
        }

        // next / this / last <weekday>
        for cap in self.relative_weekday.captures_iter(text) {
            let Some(weekday) = weekday_from_name(&cap[2]) else {
                continue;
            };
            let (rule, confidence) = match cap[1].to_lowercase().as_str() {
                "next" => (WeekdayRule::Next, 0.85),
                "this" | "coming" => (WeekdayRule::Upcoming, 0.85),
                "last" => (WeekdayRule::Last, 0.8),
                _ => continue,
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date: resolve_weekday(today, weekday, rule),
                time: None,
                span,
                confidence,
                method: MethodId::RelativeWeekday,
            });
        }

        // bare weekday
        for cap in self.bare_weekday.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            if let Some(prev) = word_before(text, full.start()) {
                if matches!(prev.as_str(), "next" | "this" | "coming" | "last" | "every") {
                    continue;
                }
            }
            let Some(weekday) = weekday_from_name(&cap[1]) else {
                continue;
            };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date: resolve_weekday(today, weekday, WeekdayRule::Upcoming),
                time: None,
                span,
                confidence: 0.75,
                method: MethodId::RelativeWeekday,
            });
        }

        // every Monday / on Mondays: the first occurrence anchors the series
        for cap in self.recurring_weekday.captures_iter(text) {
            let Some(name) = cap.get(1).or_else(|| cap.get(2)) else {
                continue;
            };
            let Some(weekday) = weekday_from_name(name.as_str()) else {
                continue;
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date: resolve_weekday(today, weekday, WeekdayRule::Upcoming),
                time: None,
                span,
                confidence: if cap.get(1).is_some() { 0.7 } else { 0.65 },
                method: MethodId::RecurringAnchor,
            });
        }

        // in N minutes / hours / days / weeks / months / years
        for cap in self.relative_offset.captures_iter(text) {
            let Some(count) = parse_count(&cap[1]) else {
                continue;
            };
            let unit = cap[2].to_lowercase();
            let (date, time) = if unit.starts_with("min") || unit.starts_with('h') {
                let delta = if unit.starts_with('h') {
                    Duration::hours(count)
                } else {
                    Duration::minutes(count)
                };
                let Some(at) = reference.local.checked_add_signed(delta) else {
                    continue;
                };
                (at.date(), Some(at.time()))
            } else if unit.starts_with("day") {
                (today + Duration::days(count), None)
            } else if unit.starts_with("week") {
                (today + Duration::weeks(count), None)
            } else if unit.starts_with("month") {
                let Some(date) = add_months(today, count as u32) else {
                    continue;
                };
                (date, None)
            } else {
                let Some(date) = add_months(today, 12 * count as u32) else {
                    continue;
                };
                (date, None)
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date,
                time,
                span,
                confidence: 0.85,
                method: MethodId::RelativeOffset,
            });
        }

        // next week / month / year
        for cap in self.relative_period.captures_iter(text) {
            let date = match cap[1].to_lowercase().as_str() {
                "week" => resolve_weekday(today, Weekday::Mon, WeekdayRule::Next),
                "month" => match add_months(first_of_month(today), 1) {
                    Some(d) => d,
                    None => continue,
                },
                "year" => match NaiveDate::from_ymd_opt(today.year() + 1, 1, 1) {
                    Some(d) => d,
                    None => continue,
                },
                _ => continue,
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(DateMatch {
                date,
                time: None,
                span,
                confidence: 0.6,
                method: MethodId::RelativeWeek,
            });
        }

        results
    }

    // ------------------------------------------------------------------------
    // Times
    // ------------------------------------------------------------------------

    fn parse_times(&self, text: &str) -> Vec<TimeMatch> {
        let mut results = Vec::new();
        results.extend(self.parse_ranges(text));
        results.extend(self.parse_until(text));
        results.extend(self.parse_clock_times(text));

        // "3pm" inside "2-4pm" loses to the range; otherwise higher confidence wins.
        remove_overlaps(
            &mut results,
            |t| t.span,
            |a, b| {
                (a.is_compound(), a.confidence, a.span.len())
                    >= (b.is_compound(), b.confidence, b.span.len())
            },
        );

        let numeric_ends: Vec<usize> = results.iter().map(|t| t.span.end()).collect();
        results.extend(self.parse_named_times(text, &numeric_ends));
        results.sort_by_key(|t| t.span.start());
        results
    }

    fn parse_ranges(&self, text: &str) -> Vec<TimeMatch> {
        let mut results = Vec::new();

        // 2-4pm, 10am to 12pm, from 11 to 1pm
        for cap in self.range_12h.captures_iter(text) {
            let (Ok(start_hour), Ok(end_hour)) = (cap[1].parse::<u32>(), cap[4].parse::<u32>())
            else {
                continue;
            };
            let Some(end_meridiem) = meridiem_of(&cap, 6) else {
                continue;
            };
            let Some(end_hour) = to_24h(end_hour, end_meridiem) else {
                continue;
            };
            let start_hour = match meridiem_of(&cap, 3) {
                Some(m) => to_24h(start_hour, m),
                None => to_24h(start_hour, end_meridiem).map(|h| {
                    // "11-1pm" starts in the morning
                    if h > end_hour && end_meridiem == 'p' {
                        h - 12
                    } else {
                        h
                    }
                }),
            };
            let Some(start_hour) = start_hour else {
                continue;
            };
            let (Some(start), Some(end)) = (
                NaiveTime::from_hms_opt(start_hour, minutes_of(&cap, 2), 0),
                NaiveTime::from_hms_opt(end_hour, minutes_of(&cap, 5), 0),
            ) else {
                continue;
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(TimeMatch {
                time: start,
                end: Some(end),
                span,
                confidence: 0.9,
                method: MethodId::TimeRange,
                role: TimeRole::Start,
            });
        }

        // 10:00-11:30, from 9:30 to 10:15
        for cap in self.range_24h.captures_iter(text) {
            let Some(start) = self.clock_time(&cap[1], &cap[2]) else {
                continue;
            };
            let Some(end) = self.clock_time(&cap[3], &cap[4]) else {
                continue;
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(TimeMatch {
                time: start.0,
                end: Some(end.0),
                span,
                confidence: 0.9,
                method: MethodId::TimeRange,
                role: TimeRole::Start,
            });
        }

        results
    }

    fn parse_until(&self, text: &str) -> Vec<TimeMatch> {
        let mut results = Vec::new();
        for cap in self.until_time.captures_iter(text) {
            let Ok(hour) = cap[1].parse::<u32>() else {
                continue;
            };
            let time = match (meridiem_of(&cap, 3), cap.get(2)) {
                (Some(m), _) => to_24h(hour, m)
                    .and_then(|h| NaiveTime::from_hms_opt(h, minutes_of(&cap, 2), 0)),
                (None, Some(minutes)) => self.clock_time(&cap[1], minutes.as_str()).map(|t| t.0),
                // "until 5" is too vague to read as a time
                (None, None) => None,
            };
            let Some(time) = time else { continue };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(TimeMatch {
                time,
                end: None,
                span,
                confidence: 0.85,
                method: MethodId::UntilTime,
                role: TimeRole::End,
            });
        }
        results
    }

    fn parse_clock_times(&self, text: &str) -> Vec<TimeMatch> {
        let mut results = Vec::new();

        // 12-hour: 3pm, 2:30 PM, 7 a.m.
        for cap in self.time_12h.captures_iter(text) {
            let Ok(hour) = cap[1].parse::<u32>() else {
                continue;
            };
            let Some(meridiem) = meridiem_of(&cap, 3) else {
                continue;
            };
            let Some(time) = to_24h(hour, meridiem)
                .and_then(|h| NaiveTime::from_hms_opt(h, minutes_of(&cap, 2), 0))
            else {
                continue;
            };
            let Some(full) = cap.get(0) else { continue };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(TimeMatch {
                time,
                end: None,
                span,
                confidence: 0.95,
                method: MethodId::Time12h,
                role: TimeRole::Start,
            });
        }

        // H:MM and HH:MM
        for cap in self.time_colon.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            let hint = meridiem_hint(text, full.end());
            let Some((time, confidence, method)) =
                self.hour_reading(&cap[1], minutes_of(&cap, 2), hint)
            else {
                continue;
            };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(TimeMatch {
                time,
                end: None,
                span,
                confidence,
                method,
                role: TimeRole::Start,
            });
        }

        // "at 4"
        for cap in self.at_hour.captures_iter(text) {
            let Some(digits) = cap.get(1) else { continue };
            let next = text[digits.end()..].chars().next();
            if matches!(next, Some(':' | '.' | '/' | '-')) {
                continue;
            }
            let hint = meridiem_hint(text, digits.end());
            let Some((time, confidence, method)) = self.hour_reading(digits.as_str(), 0, hint)
            else {
                continue;
            };
            let Some(span) = span_of(&digits, text) else {
                continue;
            };
            results.push(TimeMatch {
                time,
                end: None,
                span,
                confidence,
                method,
                role: TimeRole::Start,
            });
        }

        results
    }

    /// Read an hour without AM/PM. Leading zeros and hours past noon are
    /// explicit 24-hour times; 1-12 go through the bare-hour policy unless
    /// a "morning"/"evening" qualifier follows.
    fn hour_reading(
        &self,
        hour_text: &str,
        minute: u32,
        hint: Option<char>,
    ) -> Option<(NaiveTime, f32, MethodId)> {
        let hour = hour_text.parse::<u32>().ok()?;
        let explicit =
            (hour_text.len() == 2 && hour_text.starts_with('0')) || hour == 0 || hour >= 13;
        let (hour, confidence, method) = if explicit {
            (hour, 0.85, MethodId::Time24h)
        } else if let Some(meridiem) = hint {
            (to_24h(hour, meridiem)?, 0.8, MethodId::ImplicitTime)
        } else {
            (self.bare_hour().resolve(hour), 0.7, MethodId::ImplicitTime)
        };
        Some((NaiveTime::from_hms_opt(hour, minute, 0)?, confidence, method))
    }

    /// Clock time inside a 24-hour range; bare hours follow the policy.
    fn clock_time(&self, hour_text: &str, minute_text: &str) -> Option<(NaiveTime, f32)> {
        let minute = minute_text.parse::<u32>().ok()?;
        self.hour_reading(hour_text, minute, None)
            .map(|(time, confidence, _)| (time, confidence))
    }

    fn parse_named_times(&self, text: &str, numeric_ends: &[usize]) -> Vec<TimeMatch> {
        let mut results = Vec::new();
        for cap in self.named_time.captures_iter(text) {
            let Some(full) = cap.get(0) else { continue };
            let name = cap[1].to_lowercase();
            let (hour, confidence) = match name.as_str() {
                "noon" | "midday" => (12, 0.85),
                "midnight" => (0, 0.85),
                "tonight" => (20, 0.65),
                "morning" => (9, 0.6),
                "afternoon" => (14, 0.6),
                "evening" => (18, 0.6),
                _ => continue,
            };
            // "7 in the morning": the period only qualifies the clock time.
            let qualifies = hour != 12
                && hour != 0
                && numeric_ends
                    .iter()
                    .any(|&end| end <= full.start() && full.start() - end <= QUALIFIER_DISTANCE);
            if qualifies {
                continue;
            }
            let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
                continue;
            };
            let Some(span) = span_of(&full, text) else {
                continue;
            };
            results.push(TimeMatch {
                time,
                end: None,
                span,
                confidence,
                method: MethodId::NamedTime,
                role: TimeRole::Start,
            });
        }
        results
    }

    // ------------------------------------------------------------------------
    // Combination
    // ------------------------------------------------------------------------

    fn combine(
        &self,
        text: &str,
        dates: &[DateMatch],
        times: &[TimeMatch],
        reference: &ReferenceTime,
    ) -> (Vec<Candidate>, Vec<Candidate>) {
        let mut start = Vec::new();
        let mut end = Vec::new();
        let distance = self.config.combine_distance;

        // Greedy pairing, closest date/time pairs first.
        let mut pairs: Vec<(usize, usize, usize)> = Vec::new();
        for (di, date) in dates.iter().enumerate() {
            if date.time.is_some() {
                continue;
            }
            for (ti, time) in times.iter().enumerate() {
                if time.role != TimeRole::Start {
                    continue;
                }
                let gap = date.span.gap(&time.span);
                if gap <= distance {
                    pairs.push((gap, di, ti));
                }
            }
        }
        pairs.sort();

        let mut date_used = vec![false; dates.len()];
        let mut time_used = vec![false; times.len()];
        for (_, di, ti) in pairs {
            if date_used[di] || time_used[ti] {
                continue;
            }
            date_used[di] = true;
            time_used[ti] = true;
            let (date, time) = (&dates[di], &times[ti]);
            let confidence =
                ((date.confidence + time.confidence) / 2.0 + 0.1).min(COMBINED_CEILING);
            let span = date.span.cover(&time.span);
            let at = NaiveDateTime::new(date.date, time.time);
            start.push(datetime_candidate(text, at, confidence, MethodId::DateTime, span));
            if let Some(end_time) = time.end {
                end.push(range_end(text, at, end_time, confidence, time.span));
            }
        }

        let default_time = self.config.default_time();
        for (di, date) in dates.iter().enumerate() {
            if let Some(time) = date.time {
                let at = NaiveDateTime::new(date.date, time);
                start.push(datetime_candidate(text, at, date.confidence, date.method, date.span));
            } else if !date_used[di] {
                let at = NaiveDateTime::new(date.date, default_time);
                let confidence = date.confidence * self.config.date_only_penalty;
                start.push(datetime_candidate(text, at, confidence, MethodId::DateOnly, date.span));
            }
        }

        let anchor = dates
            .iter()
            .filter(|d| d.time.is_none())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        for (ti, time) in times.iter().enumerate() {
            if time_used[ti] {
                continue;
            }
            let (at, confidence, method) = match anchor {
                Some(date) => (
                    NaiveDateTime::new(date.date, time.time),
                    (date.confidence + time.confidence) / 2.0 - 0.1,
                    MethodId::DateTime,
                ),
                None => {
                    let mut day = reference.date();
                    if time.role == TimeRole::Start && time.time <= reference.time() {
                        day += Duration::days(1);
                    }
                    (
                        NaiveDateTime::new(day, time.time),
                        time.confidence * self.config.time_only_penalty,
                        MethodId::TimeOnly,
                    )
                }
            };
            match time.role {
                TimeRole::Start => {
                    start.push(datetime_candidate(text, at, confidence, method, time.span));
                    if let Some(end_time) = time.end {
                        end.push(range_end(text, at, end_time, confidence, time.span));
                    }
                }
                TimeRole::End => {
                    end.push(datetime_candidate(
                        text,
                        at,
                        confidence.max(time.confidence * self.config.time_only_penalty),
                        MethodId::UntilTime,
                        time.span,
                    ));
                }
            }
        }

        rank_candidates(&mut start);
        rank_candidates(&mut end);
        (start, end)
    }
}

fn datetime_candidate(
    text: &str,
    at: NaiveDateTime,
    confidence: f32,
    method: MethodId,
    span: Span,
) -> Candidate {
    Candidate::pattern(CandidateValue::LocalDateTime(at), confidence, method, span, text)
}

/// End of a range on the start's day, rolling past midnight when needed.
fn range_end(
    text: &str,
    start: NaiveDateTime,
    end_time: NaiveTime,
    confidence: f32,
    span: Span,
) -> Candidate {
    let mut end = NaiveDateTime::new(start.date(), end_time);
    if end <= start {
        end += Duration::days(1);
    }
    datetime_candidate(text, end, confidence, MethodId::TimeRange, span)
}

/// Keep the first (highest ranked) candidate for each distinct value.
pub(crate) fn dedupe_by_value(candidates: &mut Vec<Candidate>) {
    let mut seen: Vec<CandidateValue> = Vec::new();
    candidates.retain(|c| {
        if seen.contains(c.value()) {
            false
        } else {
            seen.push(c.value().clone());
            true
        }
    });
}

// ============================================================================
// Tests
// ============================================================================
