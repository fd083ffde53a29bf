//! Title, location and participant pattern families.
//!
//! Titles are found in three ways: quoted text, a `title:`/`subject:`
//! keyword, or the residual text left over once the temporal, location and
//! participant spans are carved out.

use regex::Regex;

use super::temporal::{dedupe_by_value, weekday_from_name, MONTHS};
use crate::event::{rank_candidates, Candidate, CandidateValue, MethodId, Span};

const MAX_TITLE_LEN: usize = 80;

/// Words that never make a title on their own.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "to", "on", "at", "in", "for", "with", "from", "by", "of",
    "this", "next", "every", "is", "it", "we", "i", "me", "my", "our", "us", "you", "please",
    "let", "lets", "let's", "some", "something", "thing", "that", "then", "there", "be", "will",
    "should", "could", "would", "can", "maybe", "also", "just", "about", "unclear", "vague",
];

/// Capitalized words that are not place or person names.
const NOT_NAMES: &[&str] = &[
    "today", "tomorrow", "tonight", "noon", "midnight", "morning", "afternoon", "evening",
    "zoom", "teams", "skype", "meet", "webex", "slack", "discord", "facetime", "hangouts",
    "the", "everyone", "team", "all",
];

fn is_temporal_word(word: &str) -> bool {
    let lower = word.to_lowercase();
    weekday_from_name(&lower).is_some()
        || MONTHS.split('|').any(|m| m == lower)
        || NOT_NAMES.contains(&lower.as_str())
}

/// Compiled title, location and participant pattern library.
pub struct TextPatterns {
    quoted: Regex,
    keyword_title: Regex,
    leading_filler: Regex,
    leading_connector: Regex,
    trailing_connector: Regex,
    event_keyword: Regex,
    keyword_location: Regex,
    address: Regex,
    room: Regex,
    platform: Regex,
    meeting_url: Regex,
    venue: Regex,
    named_place: Regex,
    with_people: Regex,
    email: Regex,
    all_day: Regex,
}

impl Default for TextPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl TextPatterns {
    pub fn new() -> Self {
        Self {
            quoted: Regex::new(r#""([^"\n]{2,80})"|“([^”\n]{2,80})”"#).expect("Invalid regex"),
            keyword_title: Regex::new(r"(?im)\b(?:title|subject|event|re)\s*:\s*([^\n,;]{2,80})")
                .expect("Invalid regex"),
            leading_filler: Regex::new(
                r"(?i)^\s*(?:please\s+)?(?:(?:can|could|shall)\s+(?:we|you|i)\s+)?(?:let'?s\s+)?(?:remind\s+me\s+(?:to|about)\s+)?(?:(?:schedule|book|set\s+up|add|create|plan|put\s+in|arrange|organize|have)\s+)?(?:(?:a|an|the|my|our)\s+)?",
            )
            .expect("Invalid regex"),
            leading_connector: Regex::new(
                r"(?i)^(?:\s*\b(?:on|at|in|for|with|and|to|from|by|starting)\b|\s*[@\-–,:;])+\s*",
            )
            .expect("Invalid regex"),
            trailing_connector: Regex::new(
                r"(?i)(?:\s*\b(?:on|at|in|for|with|from|by|this|next|every|starting|due|around|between|and|to|the|is)\b|\s*[@\-–,:;])+\s*$",
            )
            .expect("Invalid regex"),
            event_keyword: Regex::new(
                r"(?i)\b(meeting|meet|call|lunch|dinner|breakfast|brunch|coffee|drinks|stand-?up|sync|review|interview|appointment|appt|conference|workshop|seminar|webinar|party|presentation|demo|session|class|lecture|training|dentist|doctor|check-?up|kick-?off|retro|retrospective|1:1|one-on-one|catch[\s-]?up|deadline|birthday|wedding|anniversary|flight|game|practice|rehearsal|concert|event|gym|workout|yoga|haircut|exam|trip|visit|offsite|all-hands|town\s+hall)\b",
            )
            .expect("Invalid regex"),
            keyword_location: Regex::new(
                r"(?im)\b(?:location|where|venue|address)\s*:\s*([^\n;,]{2,80})",
            )
            .expect("Invalid regex"),
            address: Regex::new(
                r"(?i)\b\d{1,5}\s+(?:[a-z][\w.'-]*\s+){1,4}?(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|way|court|ct|place|pl|square|sq|parkway|pkwy)\b\.?",
            )
            .expect("Invalid regex"),
            room: Regex::new(
                r"\b((?i:conference\s+|meeting\s+)?(?i:room|rm\.?|suite|building|bldg\.?)\s+(?:[A-Z]|\d)[\w-]*)",
            )
            .expect("Invalid regex"),
            platform: Regex::new(
                r"(?i)\b(?:on|via|over|using|through)\s+(zoom|google\s+meet|microsoft\s+teams|ms\s+teams|teams|skype|webex|hangouts|facetime|discord|slack(?:\s+huddle)?)\b",
            )
            .expect("Invalid regex"),
            meeting_url: Regex::new(
                r"(?i)\bhttps?://[^\s]*(?:zoom\.us|meet\.google\.com|teams\.microsoft\.com|webex\.com)[^\s]*",
            )
            .expect("Invalid regex"),
            venue: Regex::new(
                r"(?i)\b(?:at|in)\s+(?:the\s+)?((?:[a-z][\w'&-]*\s+){0,3}?(?:cafe|café|coffee\s+shop|restaurant|office|hotel|library|park|gym|hall|center|centre|bar|pub|school|university|campus|hospital|clinic|studio|church|stadium|airport|station|mall|auditorium|lobby|cafeteria|conference\s+room|meeting\s+room|boardroom|headquarters|hq))\b",
            )
            .expect("Invalid regex"),
            named_place: Regex::new(
                r"\b(?:at|in)\s+([A-Z][\w'&.-]*(?:\s+(?:[A-Z][\w'&.-]*|of|the|de|&))*)",
            )
            .expect("Invalid regex"),
            with_people: Regex::new(
                r"\b[Ww]ith\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?(?:(?:\s*,\s*(?:and\s+)?|\s+and\s+|\s*&\s*)[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)*)",
            )
            .expect("Invalid regex"),
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("Invalid regex"),
            all_day: Regex::new(r"(?i)\ball[\s-]day\b").expect("Invalid regex"),
        }
    }

    /// Whether the text names a kind of event ("meeting", "lunch", ...).
    pub fn has_event_keyword(&self, text: &str) -> bool {
        self.event_keyword.is_match(text)
    }

    /// Span of an explicit "all day" phrase.
    pub fn all_day(&self, text: &str) -> Option<Span> {
        self.all_day
            .find(text)
            .and_then(|m| Span::new(m.start(), m.end(), text.len()))
    }

    // ------------------------------------------------------------------------
    // Locations
    // ------------------------------------------------------------------------

    /// Location candidates. Matches overlapping `temporal` spans are dropped
    /// unless they are street addresses.
    pub fn locations(&self, text: &str, temporal: &[Span]) -> Vec<Candidate> {
        let mut found = Vec::new();

        for cap in self.keyword_location.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                push_text(&mut found, text, m.start(), m.end(), 0.9, MethodId::KeywordLocation);
            }
        }

        for m in self.address.find_iter(text) {
            push_text(&mut found, text, m.start(), m.end(), 0.9, MethodId::AddressLocation);
        }

        for cap in self.venue.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                push_text(&mut found, text, m.start(), m.end(), 0.85, MethodId::VenueLocation);
            }
        }

        for m in self.meeting_url.find_iter(text) {
            push_text(&mut found, text, m.start(), m.end(), 0.85, MethodId::VirtualLocation);
        }

        for cap in self.platform.captures_iter(text) {
            let Some(m) = cap.get(1) else { continue };
            let Some(span) = Span::new(m.start(), m.end(), text.len()) else {
                continue;
            };
            found.push(Candidate::pattern(
                CandidateValue::Text(platform_name(m.as_str()).to_string()),
                0.8,
                MethodId::VirtualLocation,
                span,
                text,
            ));
        }

        for cap in self.room.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                push_text(&mut found, text, m.start(), m.end(), 0.8, MethodId::RoomLocation);
            }
        }

        for cap in self.named_place.captures_iter(text) {
            let Some(m) = cap.get(1) else { continue };
            let first_word = m.as_str().split_whitespace().next().unwrap_or_default();
            if is_temporal_word(first_word.trim_end_matches(|c: char| !c.is_alphanumeric())) {
                continue;
            }
            // Drop trailing lowercase joiners: "Museum of" -> "Museum"
            let place = m
                .as_str()
                .trim_end_matches(|c: char| !c.is_alphanumeric())
                .split_whitespace()
                .collect::<Vec<_>>();
            let keep = place
                .iter()
                .rposition(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
                .map(|i| i + 1)
                .unwrap_or(0);
            let value = place[..keep].join(" ");
            if value.len() < 2 {
                continue;
            }
            let Some(offset) = m.as_str().find(&value) else {
                continue;
            };
            let start = m.start() + offset;
            push_text(&mut found, text, start, start + value.len(), 0.7, MethodId::VenueLocation);
        }

        found.retain(|c| {
            c.method() == MethodId::AddressLocation
                || c.span()
                    .is_none_or(|s| !temporal.iter().any(|t| t.overlaps(&s)))
        });
        rank_candidates(&mut found);
        dedupe_by_value(&mut found);
        found
    }

    // ------------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------------

    pub fn participants(&self, text: &str) -> Vec<Candidate> {
        let mut found = Vec::new();

        for cap in self.with_people.captures_iter(text) {
            let (Some(full), Some(list)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let names: Vec<String> = list
                .as_str()
                .split([',', '&'])
                .flat_map(|part| part.split(" and "))
                .map(|name| {
                    name.split_whitespace()
                        .filter(|w| *w != "and" && !is_temporal_word(w))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .filter(|name| !name.is_empty())
                .collect();
            if names.is_empty() {
                continue;
            }
            if let Some(span) = Span::new(full.start(), full.end(), text.len()) {
                found.push(Candidate::pattern(
                    CandidateValue::People(names),
                    0.7,
                    MethodId::ParticipantList,
                    span,
                    text,
                ));
            }
        }

        let emails: Vec<regex::Match<'_>> = self.email.find_iter(text).collect();
        if let (Some(first), Some(last)) = (emails.first(), emails.last()) {
            let people = emails.iter().map(|m| m.as_str().to_string()).collect();
            if let Some(span) = Span::new(first.start(), last.end(), text.len()) {
                found.push(Candidate::pattern(
                    CandidateValue::People(people),
                    0.9,
                    MethodId::EmailAddress,
                    span,
                    text,
                ));
            }
        }

        rank_candidates(&mut found);
        found
    }

    // ------------------------------------------------------------------------
    // Titles
    // ------------------------------------------------------------------------

    /// Title candidates. `occupied` holds the spans of every other field;
    /// residual titles are only proposed when the text has a temporal
    /// expression or names a kind of event.
    pub fn titles(&self, text: &str, occupied: &[Span], has_temporal: bool) -> Vec<Candidate> {
        let mut found = Vec::new();

        for cap in self.quoted.captures_iter(text) {
            if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
                push_title(&mut found, text, m.start(), m.end(), 0.95, MethodId::QuotedTitle);
            }
        }

        for cap in self.keyword_title.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                push_title(&mut found, text, m.start(), m.end(), 0.9, MethodId::KeywordTitle);
            }
        }

        if found.is_empty() && (has_temporal || self.has_event_keyword(text)) {
            found.extend(self.residual_titles(text, occupied));
        }

        rank_candidates(&mut found);
        dedupe_by_value(&mut found);
        found
    }

    fn residual_titles(&self, text: &str, occupied: &[Span]) -> Vec<Candidate> {
        let mut spans: Vec<Span> = occupied.to_vec();
        spans.sort_by_key(|s| s.start());

        // Gaps between occupied spans, in text order.
        let mut segments = Vec::new();
        let mut cursor = 0;
        for span in &spans {
            if span.start() > cursor {
                segments.push((cursor, span.start()));
            }
            cursor = cursor.max(span.end());
        }
        if cursor < text.len() {
            segments.push((cursor, text.len()));
        }

        let mut found = Vec::new();
        for (index, (start, end)) in segments.into_iter().enumerate() {
            let Some(segment) = text.get(start..end) else {
                continue;
            };
            // Only the first clause of a segment is a title.
            let clause_end = segment
                .find(['.', '!', '?', '\n'])
                .unwrap_or(segment.len());
            let Some((offset, title)) = self.clean_residual(&segment[..clause_end]) else {
                continue;
            };
            let keyword = self.has_event_keyword(title);
            let confidence = match (keyword, index == 0) {
                (true, true) => 0.8,
                (true, false) => 0.75,
                (false, true) => 0.6,
                (false, false) => 0.55,
            };
            let title_start = start + offset;
            push_title(
                &mut found,
                text,
                title_start,
                title_start + title.len(),
                confidence,
                MethodId::ResidualTitle,
            );
        }
        found
    }

    /// Strip fillers and connectors, returning the title's offset within
    /// `segment` and the title text.
    fn clean_residual<'a>(&self, segment: &'a str) -> Option<(usize, &'a str)> {
        let mut start = 0;
        let mut end = segment.len();

        loop {
            let before = (start, end);
            let current = &segment[start..end];
            if let Some(m) = self.leading_connector.find(current) {
                start += m.end();
            }
            let current = &segment[start..end];
            if let Some(m) = self.leading_filler.find(current) {
                start += m.end();
            }
            let current = &segment[start..end];
            if let Some(m) = self.trailing_connector.find(current) {
                end = start + m.start();
            }
            if (start, end) == before || start >= end {
                break;
            }
        }

        let current = segment.get(start..end)?;
        let trimmed = current.trim_matches(|c: char| !c.is_alphanumeric() && c != ')');
        if trimmed.len() < 2 {
            return None;
        }
        let meaningful = trimmed
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .any(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()));
        if !meaningful {
            return None;
        }
        let offset = start + current.find(trimmed)?;
        let title = truncate_words(trimmed, MAX_TITLE_LEN);
        Some((offset, title))
    }
}

/// Cut at the last word boundary within `max_len` bytes.
fn truncate_words(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let cut = crate::utils::floor_char_boundary(s, max_len);
    match s[..cut].rfind(char::is_whitespace) {
        Some(space) if space > 0 => s[..space].trim_end(),
        _ => &s[..cut],
    }
}

fn platform_name(raw: &str) -> &'static str {
    let lower = raw.to_lowercase();
    let lower = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    match lower.as_str() {
        "zoom" => "Zoom",
        "google meet" => "Google Meet",
        "microsoft teams" | "ms teams" | "teams" => "Microsoft Teams",
        "skype" => "Skype",
        "webex" => "Webex",
        "hangouts" => "Google Hangouts",
        "facetime" => "FaceTime",
        "discord" => "Discord",
        _ => "Slack",
    }
}

fn push_text(
    found: &mut Vec<Candidate>,
    text: &str,
    start: usize,
    end: usize,
    confidence: f32,
    method: MethodId,
) {
    let Some(raw) = text.get(start..end) else {
        return;
    };
    let value = raw.trim().trim_end_matches(['.', ',']).trim();
    if value.len() < 2 {
        return;
    }
    let Some(offset) = raw.find(value) else {
        return;
    };
    if let Some(span) = Span::new(start + offset, start + offset + value.len(), text.len()) {
        found.push(Candidate::pattern(
            CandidateValue::Text(value.to_string()),
            confidence,
            method,
            span,
            text,
        ));
    }
}

fn push_title(
    found: &mut Vec<Candidate>,
    text: &str,
    start: usize,
    end: usize,
    confidence: f32,
    method: MethodId,
) {
    let Some(raw) = text.get(start..end) else {
        return;
    };
    let value = raw.trim();
    if value.len() < 2 {
        return;
    }
    let Some(offset) = raw.find(value) else {
        return;
    };
    let Some(span) = Span::new(start + offset, start + offset + value.len(), text.len()) else {
        return;
    };
    found.push(Candidate::pattern(
        CandidateValue::Text(capitalize(value)),
        confidence,
        method,
        span,
        text,
    ));
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
