//! Core data model shared by every tier of the extraction pipeline.
//!
//! Candidates and field results are produced once per request and never
//! edited afterwards; the only mutation an [`EventRecord`] sees is
//! [`EventRecord::attach`], which replaces a whole [`FieldResult`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday,
};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum number of alternatives kept on a [`FieldResult`].
pub const MAX_ALTERNATIVES: usize = 5;

/// Confidence given to the minimal record returned when nothing extracts.
pub const FALLBACK_CONFIDENCE: f32 = 0.01;

/// Warning attached to the minimal fallback record.
pub const NO_EVENT_WARNING: &str = "No event information found in text";

/// Clamp a raw confidence into `[0, 1]`. NaN maps to zero.
pub fn clamp_confidence(raw: f32) -> f32 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f32::deserialize(deserializer)?;
    Ok(clamp_confidence(raw))
}

// ============================================================================
// Fields
// ============================================================================

/// A named extraction target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    StartDatetime,
    EndDatetime,
    Location,
    Duration,
    Recurrence,
    Participants,
    Description,
}

impl Field {
    /// Every field, in declaration order.
    pub const ALL: [Field; 8] = [
        Field::Title,
        Field::StartDatetime,
        Field::EndDatetime,
        Field::Location,
        Field::Duration,
        Field::Recurrence,
        Field::Participants,
        Field::Description,
    ];

    /// Dependency-respecting processing order: the end datetime needs the
    /// start and the duration, and the title is carved out of whatever text
    /// the temporal and location spans leave behind.
    pub const PROCESSING_ORDER: [Field; 8] = [
        Field::StartDatetime,
        Field::Duration,
        Field::EndDatetime,
        Field::Title,
        Field::Location,
        Field::Participants,
        Field::Recurrence,
        Field::Description,
    ];

    /// Fields without which a record is not complete.
    pub fn is_critical(self) -> bool {
        matches!(self, Field::Title | Field::StartDatetime)
    }

    /// Fields whose absence is never blocking and whose weak signals are
    /// skipped rather than escalated.
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            Field::Location | Field::Description | Field::Participants
        )
    }

    /// Whether the field holds a datetime value.
    pub fn is_datetime(self) -> bool {
        matches!(self, Field::StartDatetime | Field::EndDatetime)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::StartDatetime => "start_datetime",
            Field::EndDatetime => "end_datetime",
            Field::Location => "location",
            Field::Duration => "duration",
            Field::Recurrence => "recurrence",
            Field::Participants => "participants",
            Field::Description => "description",
        }
    }

    /// Human-readable label used in prompts and warnings.
    pub fn label(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::StartDatetime => "start time",
            Field::EndDatetime => "end time",
            Field::Location => "location",
            Field::Duration => "duration",
            Field::Recurrence => "recurrence",
            Field::Participants => "participants",
            Field::Description => "description",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Spans
// ============================================================================

/// A byte range into the request text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    /// Build a span, rejecting anything outside `0 <= start < end <= text_len`.
    pub fn new(start: usize, end: usize, text_len: usize) -> Option<Self> {
        (start < end && end <= text_len).then_some(Self { start, end })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether the two spans share at least one byte.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Bytes between the two spans; zero when they touch or overlap.
    pub fn gap(&self, other: &Span) -> usize {
        if self.overlaps(other) {
            0
        } else if self.end <= other.start {
            other.start - self.end
        } else {
            self.start - other.end
        }
    }

    /// Smallest span covering both.
    pub fn cover(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ============================================================================
// Recurrence
// ============================================================================

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrencePattern {
    fn as_rrule(self) -> &'static str {
        match self {
            RecurrencePattern::Daily => "DAILY",
            RecurrencePattern::Weekly => "WEEKLY",
            RecurrencePattern::Monthly => "MONTHLY",
            RecurrencePattern::Yearly => "YEARLY",
        }
    }
}

/// A recurrence rule, rendered as an RFC 5545 RRULE expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RecurrenceRule {
    /// The recurrence frequency.
    pub pattern: RecurrencePattern,
    /// Interval (e.g., every 2 weeks).
    pub interval: u32,
    /// Specific days for weekly patterns.
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
    /// Last date of the recurrence.
    pub until: Option<NaiveDate>,
    /// Maximum occurrences.
    pub count: Option<u32>,
}

impl RecurrenceRule {
    pub fn new(pattern: RecurrencePattern, interval: u32) -> Self {
        Self {
            pattern,
            interval: interval.max(1),
            days_of_week: Vec::new(),
            until: None,
            count: None,
        }
    }

    pub fn on_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.days_of_week.extend(days);
        self
    }

    /// Render as `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE`.
    pub fn to_rrule(&self) -> String {
        let mut parts = vec![format!("FREQ={}", self.pattern.as_rrule())];
        if self.interval > 1 {
            parts.push(format!("INTERVAL={}", self.interval));
        }
        if !self.days_of_week.is_empty() {
            let days: Vec<&str> = self.days_of_week.iter().map(|d| rrule_day(*d)).collect();
            parts.push(format!("BYDAY={}", days.join(",")));
        }
        if let Some(count) = self.count {
            parts.push(format!("COUNT={}", count));
        }
        if let Some(until) = self.until {
            parts.push(format!("UNTIL={}", until.format("%Y%m%d")));
        }
        parts.join(";")
    }
}

fn rrule_day(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// The typed value a candidate proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CandidateValue {
    /// A datetime with an explicit UTC offset.
    DateTime(DateTime<FixedOffset>),
    /// A wall-clock datetime whose offset has not been decided yet.
    LocalDateTime(NaiveDateTime),
    DurationMinutes(i64),
    Text(String),
    People(Vec<String>),
    Recurrence(RecurrenceRule),
    /// No value; carried by failure candidates.
    Empty,
}

impl CandidateValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CandidateValue::Empty => true,
            CandidateValue::Text(text) => text.trim().is_empty(),
            CandidateValue::People(people) => people.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CandidateValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Wall-clock datetime regardless of offset.
    pub fn naive_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CandidateValue::DateTime(dt) => Some(dt.naive_local()),
            CandidateValue::LocalDateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Offset-aware datetime, localizing naive values at `default_offset`.
    pub fn to_datetime(&self, default_offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
        match self {
            CandidateValue::DateTime(dt) => Some(*dt),
            CandidateValue::LocalDateTime(dt) => default_offset.from_local_datetime(dt).single(),
            _ => None,
        }
    }

    /// Short human-readable rendering for prompts and warnings.
    pub fn label(&self) -> String {
        match self {
            CandidateValue::DateTime(dt) => dt.format("%a %b %-d %Y, %H:%M (%:z)").to_string(),
            CandidateValue::LocalDateTime(dt) => dt.format("%a %b %-d %Y, %H:%M").to_string(),
            CandidateValue::DurationMinutes(minutes) => format_minutes(*minutes),
            CandidateValue::Text(text) => text.clone(),
            CandidateValue::People(people) => people.join(", "),
            CandidateValue::Recurrence(rule) => rule.to_rrule(),
            CandidateValue::Empty => "(none)".to_string(),
        }
    }
}

fn format_minutes(minutes: i64) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{} min", m),
        (h, 0) => format!("{} h", h),
        (h, m) => format!("{} h {} min", h, m),
    }
}

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum CandidateSource {
    /// The pattern extraction engine.
    Pattern,
    /// A secondary deterministic recognizer.
    Recognizer { name: String },
    /// The language-model enhancer.
    LanguageModel,
    /// Computed from other fields (e.g. end = start + duration).
    Derived,
    /// Supplied by a person through the clarification channel.
    Manual,
    /// Placeholder produced when nothing usable was found.
    Fallback,
}

impl CandidateSource {
    pub fn recognizer(name: impl Into<String>) -> Self {
        CandidateSource::Recognizer { name: name.into() }
    }
}

/// Closed set of extraction methods, one per pattern family or tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MethodId {
    // Dates
    IsoDate,
    MonthNameDate,
    DayMonthNameDate,
    NumericDate,
    RelativeDay,
    RelativeWeekday,
    RelativeOffset,
    RelativeWeek,
    RecurringAnchor,
    // Times
    Time12h,
    Time24h,
    ImplicitTime,
    NamedTime,
    TimeRange,
    UntilTime,
    // Combined datetimes
    DateTime,
    DateOnly,
    TimeOnly,
    // Durations
    DurationPhrase,
    DurationCompound,
    DurationWords,
    // Titles
    QuotedTitle,
    KeywordTitle,
    PhraseTitle,
    ResidualTitle,
    // Locations
    AddressLocation,
    VenueLocation,
    KeywordLocation,
    VirtualLocation,
    RoomLocation,
    // Other fields
    ParticipantList,
    EmailAddress,
    RecurrencePhrase,
    AllDay,
    Verbatim,
    // Other tiers
    EntityRecognition,
    DeadlinePhrase,
    ExternalRecognizer,
    LanguageModel,
    Derived,
    Manual,
    Fallback,
}

/// One typed, scored, span-located extraction proposal for a field.
///
/// Confidence is clamped into `[0, 1]` on construction and on
/// deserialization. Candidates are never edited; [`Candidate::rescored`]
/// and [`Candidate::revalued`] build new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Candidate {
    value: CandidateValue,
    source: CandidateSource,
    #[serde(deserialize_with = "deserialize_confidence")]
    #[schemars(with = "f32")]
    confidence: f32,
    span: Option<Span>,
    #[serde(default)]
    matched_text: String,
    method: MethodId,
}

impl Candidate {
    pub fn new(
        value: CandidateValue,
        source: CandidateSource,
        confidence: f32,
        method: MethodId,
    ) -> Self {
        Self {
            value,
            source,
            confidence: clamp_confidence(confidence),
            span: None,
            matched_text: String::new(),
            method,
        }
    }

    /// Shorthand for a pattern-tier candidate located in `text`.
    pub fn pattern(
        value: CandidateValue,
        confidence: f32,
        method: MethodId,
        span: Span,
        text: &str,
    ) -> Self {
        Self::new(value, CandidateSource::Pattern, confidence, method).with_span(span, text)
    }

    /// Zero-confidence candidate reporting that a tier produced nothing.
    pub fn failure(source: CandidateSource) -> Self {
        Self::new(CandidateValue::Empty, source, 0.0, MethodId::Fallback)
    }

    /// Attach the span and copy the matched substring out of `text`.
    ///
    /// Spans that do not fall on character boundaries of `text` are dropped.
    pub fn with_span(mut self, span: Span, text: &str) -> Self {
        if let Some(matched) = text.get(span.start()..span.end()) {
            self.matched_text = matched.to_string();
            self.span = Some(span);
        }
        self
    }

    /// Record the substring a backend matched without a known position.
    pub fn with_matched_text(mut self, matched: impl Into<String>) -> Self {
        self.matched_text = matched.into();
        self
    }

    pub fn value(&self) -> &CandidateValue {
        &self.value
    }

    pub fn source(&self) -> &CandidateSource {
        &self.source
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn matched_text(&self) -> &str {
        &self.matched_text
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn is_failure(&self) -> bool {
        self.value.is_empty()
    }

    /// A copy of this candidate with a different confidence.
    pub fn rescored(&self, confidence: f32) -> Self {
        Self {
            confidence: clamp_confidence(confidence),
            ..self.clone()
        }
    }

    /// A copy of this candidate with a different value and confidence.
    pub fn revalued(&self, value: CandidateValue, confidence: f32) -> Self {
        Self {
            value,
            confidence: clamp_confidence(confidence),
            ..self.clone()
        }
    }
}

/// Sort candidates by descending confidence; ties keep the earlier span
/// first, and unlocated candidates go last.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.confidence()
            .total_cmp(&a.confidence())
            .then_with(|| {
                let a_start = a.span().map(|s| s.start()).unwrap_or(usize::MAX);
                let b_start = b.span().map(|s| s.start()).unwrap_or(usize::MAX);
                a_start.cmp(&b_start)
            })
    });
}

// ============================================================================
// Field results
// ============================================================================

/// The winning candidate for one field plus its ranked alternatives.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldResult {
    pub field: Field,
    pub winner: Candidate,
    #[serde(default)]
    pub alternatives: Vec<Candidate>,
    /// Time spent producing this result, in microseconds.
    #[serde(default)]
    pub latency_us: u64,
}

impl FieldResult {
    pub fn new(field: Field, winner: Candidate) -> Self {
        Self {
            field,
            winner,
            alternatives: Vec::new(),
            latency_us: 0,
        }
    }

    /// Attach alternatives, dropping failures and values equal to the winner
    /// or to an earlier alternative, and keeping at most [`MAX_ALTERNATIVES`].
    pub fn with_alternatives(mut self, alternatives: impl IntoIterator<Item = Candidate>) -> Self {
        let mut kept: Vec<Candidate> = Vec::new();
        for candidate in alternatives {
            if candidate.is_failure()
                || candidate.value() == self.winner.value()
                || kept.iter().any(|k| k.value() == candidate.value())
            {
                continue;
            }
            kept.push(candidate);
            if kept.len() == MAX_ALTERNATIVES {
                break;
            }
        }
        self.alternatives = kept;
        self
    }

    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency_us = latency.as_micros() as u64;
        self
    }

    pub fn confidence(&self) -> f32 {
        self.winner.confidence()
    }

    /// The winner followed by the alternatives, best first.
    pub fn ranked(&self) -> Vec<&Candidate> {
        std::iter::once(&self.winner)
            .chain(self.alternatives.iter())
            .collect()
    }
}

/// Latency is observational and excluded from equality.
impl PartialEq for FieldResult {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
            && self.winner == other.winner
            && self.alternatives == other.alternatives
    }
}

// ============================================================================
// Requests
// ============================================================================

/// How a single parse is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Pattern tier only.
    PatternOnly,
    /// Language-model tier only.
    LanguageModelOnly,
    /// Full escalation chain.
    #[default]
    Hybrid,
}

/// Which tiers produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParsingPath {
    Pattern,
    Deterministic,
    LanguageModel,
    /// Winners came from more than one tier.
    Mixed,
    /// Entered through the clarification channel.
    Manual,
    /// Nothing extracted; minimal record.
    Fallback,
}

/// Month/day ordering for bare numeric dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    /// `12/25/2024`
    #[default]
    MonthFirst,
    /// `25/12/2024`
    DayFirst,
}

/// Caller-supplied locale formatting preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct LocalePrefs {
    #[serde(default)]
    pub date_order: DateOrder,
}

impl LocalePrefs {
    pub fn day_first() -> Self {
        Self {
            date_order: DateOrder::DayFirst,
        }
    }
}

/// The explicit "now" a request is resolved against.
///
/// Relative expressions ("tomorrow", "in 2 weeks") resolve against this
/// value only; the pipeline never reads a live clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceTime {
    /// Wall-clock time at the caller.
    pub local: NaiveDateTime,
    /// Caller's UTC offset in minutes, if known.
    #[serde(default)]
    pub offset_minutes: Option<i32>,
}

impl ReferenceTime {
    pub fn new(local: NaiveDateTime) -> Self {
        Self {
            local,
            offset_minutes: None,
        }
    }

    /// Convenience constructor; `None` for an invalid date or time.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        Some(Self::new(NaiveDateTime::new(date, time)))
    }

    pub fn with_offset_minutes(mut self, minutes: i32) -> Self {
        self.offset_minutes = Some(minutes);
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.local.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.local.time()
    }

    /// The caller's offset, if it is a representable UTC offset.
    pub fn offset(&self) -> Option<FixedOffset> {
        self.offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes.checked_mul(60)?))
    }
}

/// One parse request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseRequest {
    pub text: String,
    pub reference: ReferenceTime,
    #[serde(default)]
    pub locale: LocalePrefs,
    #[serde(default)]
    pub mode: ParseMode,
}

impl ParseRequest {
    pub fn new(text: impl Into<String>, reference: ReferenceTime) -> Self {
        Self {
            text: text.into(),
            reference,
            locale: LocalePrefs::default(),
            mode: ParseMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_locale(mut self, locale: LocalePrefs) -> Self {
        self.locale = locale;
        self
    }
}

// ============================================================================
// Event records
// ============================================================================

/// The merged, scored output of one parse request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EventRecord {
    pub title: Option<String>,
    pub start_datetime: Option<DateTime<FixedOffset>>,
    pub end_datetime: Option<DateTime<FixedOffset>>,
    pub location: Option<String>,
    /// Always the original request text.
    pub description: String,
    #[serde(default)]
    pub all_day: bool,
    pub duration_minutes: Option<i64>,
    /// RRULE expression, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub recurrence: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub field_results: BTreeMap<Field, FieldResult>,
    #[serde(deserialize_with = "deserialize_confidence")]
    #[schemars(with = "f32")]
    pub confidence: f32,
    pub parsing_path: ParsingPath,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub needs_confirmation: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl EventRecord {
    /// An empty record for `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            title: None,
            start_datetime: None,
            end_datetime: None,
            location: None,
            description: text.into(),
            all_day: false,
            duration_minutes: None,
            recurrence: None,
            participants: Vec::new(),
            field_results: BTreeMap::new(),
            confidence: 0.0,
            parsing_path: ParsingPath::Pattern,
            processing_time_ms: 0,
            cache_hit: false,
            needs_confirmation: false,
            warnings: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Minimal record returned when nothing could be extracted.
    pub fn fallback(text: impl Into<String>, error: Option<String>) -> Self {
        let mut record = Self::new(text);
        record.confidence = FALLBACK_CONFIDENCE;
        record.parsing_path = ParsingPath::Fallback;
        record.needs_confirmation = true;
        record.warnings.push(NO_EVENT_WARNING.to_string());
        if let Some(error) = error {
            record
                .metadata
                .insert("error".to_string(), serde_json::Value::String(error));
        }
        record
    }

    /// Attach (or replace) a field result and project its winner onto the
    /// typed field. Naive datetimes are read as UTC; callers localize first.
    pub fn attach(&mut self, result: FieldResult) {
        let value = result.winner.value().clone();
        let utc = FixedOffset::east_opt(0);
        match result.field {
            Field::Title => self.title = value.as_text().map(|t| t.trim().to_string()),
            Field::StartDatetime => {
                self.start_datetime = utc.and_then(|offset| value.to_datetime(offset));
            }
            Field::EndDatetime => {
                self.end_datetime = utc.and_then(|offset| value.to_datetime(offset));
            }
            Field::Location => self.location = value.as_text().map(|t| t.trim().to_string()),
            Field::Duration => {
                self.duration_minutes = match value {
                    CandidateValue::DurationMinutes(minutes) => Some(minutes),
                    _ => None,
                }
            }
            Field::Recurrence => {
                self.recurrence = match value {
                    CandidateValue::Recurrence(rule) => Some(rule.to_rrule()),
                    CandidateValue::Text(rrule) => Some(rrule),
                    _ => None,
                }
            }
            Field::Participants => {
                self.participants = match value {
                    CandidateValue::People(people) => people,
                    CandidateValue::Text(person) => vec![person],
                    _ => Vec::new(),
                }
            }
            // The description is the request text and is never replaced.
            Field::Description => {}
        }
        self.field_results.insert(result.field, result);
    }

    pub fn field(&self, field: Field) -> Option<&FieldResult> {
        self.field_results.get(&field)
    }

    /// Complete records have both a title and a start datetime.
    pub fn is_complete(&self) -> bool {
        self.title.is_some() && self.start_datetime.is_some()
    }

    /// Whether anything besides the verbatim description was extracted.
    pub fn has_extractions(&self) -> bool {
        self.field_results
            .iter()
            .any(|(field, result)| *field != Field::Description && !result.winner.is_failure())
    }

    /// JSON schema of the serialized record.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EventRecord)
    }
}

/// Timing and cache-hit fields are observational and excluded from equality,
/// so the same request always compares equal to itself.
impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.start_datetime == other.start_datetime
            && self.end_datetime == other.end_datetime
            && self.location == other.location
            && self.description == other.description
            && self.all_day == other.all_day
            && self.duration_minutes == other.duration_minutes
            && self.recurrence == other.recurrence
            && self.participants == other.participants
            && self.field_results == other.field_results
            && self.confidence == other.confidence
            && self.parsing_path == other.parsing_path
            && self.needs_confirmation == other.needs_confirmation
            && self.warnings == other.warnings
            && self.metadata == other.metadata
    }
}

// ============================================================================
// Tests
// ============================================================================
