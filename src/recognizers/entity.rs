//! Rule-based named entity recognizer for people, organizations and places.
//!
//! Uses regex patterns and capitalization heuristics, so it runs offline and
//! answers the same way every time. Suitable for:
//! - E-mail addresses and person names (participants)
//! - Organizations and addresses (locations)

use async_trait::async_trait;
use regex::Regex;

use super::traits::{Recognizer, SourceReliability};
use crate::error::Result;
use crate::event::{
    Candidate, CandidateSource, CandidateValue, Field, MethodId, ReferenceTime, Span,
};

const NAME: &str = "entity";

/// Kind of entity found in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Person,
    Organization,
    Location,
    Email,
}

/// An entity located in the text.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub text: String,
    pub kind: EntityKind,
    pub confidence: f32,
    pub span: Span,
}

/// Capitalized words that start sentences or name dates rather than entities.
const SKIP_WORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "What", "Which", "Where", "When", "Why", "How",
    "Who", "I", "We", "You", "He", "She", "It", "They", "Monday", "Tuesday", "Wednesday",
    "Thursday", "Friday", "Saturday", "Sunday", "January", "February", "March", "April", "May",
    "June", "July", "August", "September", "October", "November", "December", "Today",
    "Tomorrow", "Tonight", "Yesterday", "Next", "Last", "Every", "All", "Some", "Any", "Each",
    "Dear", "Hi", "Hello", "Thanks", "Please", "Note", "Meeting", "Call", "Lunch", "Dinner",
    "Coffee", "Sync", "Review", "Standup", "Email", "Phone", "But", "And", "For", "With",
    "From", "About", "After", "Before", "During", "Until", "Remind", "Schedule", "Book",
    "Let", "Can", "Could", "Zoom", "Teams", "Noon", "Midnight", "Morning", "Afternoon",
    "Evening", "Team",
];

const ORG_INDICATORS: &[&str] = &[
    "Inc", "Inc.", "LLC", "Ltd", "Ltd.", "Corp", "Corp.", "Corporation", "Company", "Co.",
    "Group", "Holdings", "Partners", "Association", "Foundation", "Institute", "University",
    "College", "School", "Bank", "Department", "Dept",
];

const LOCATION_INDICATORS: &[&str] = &[
    "Street", "St", "Avenue", "Ave", "Boulevard", "Blvd", "Road", "Rd", "Drive", "Lane", "Way",
    "Place", "Plaza", "Square", "City", "Park", "Building", "Floor", "Suite", "Room", "Hall",
    "Center", "Centre", "Hotel", "Cafe", "Café", "Restaurant", "Library", "Airport", "Station",
];

/// Pattern-based entity recognizer.
pub struct EntityRecognizer {
    email_pattern: Regex,
    name_pattern: Regex,
    address_pattern: Regex,
    person_cue: Regex,
    place_cue: Regex,
}

impl Default for EntityRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRecognizer {
    pub fn new() -> Self {
        Self {
            email_pattern: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("Invalid regex"),
            name_pattern: Regex::new(r"\b[A-Z][a-zé]+(?:\s+[A-Z][a-zé]+\.?){0,3}\b")
                .expect("Invalid regex"),
            address_pattern: Regex::new(
                r"\b\d{1,5}\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3}\s+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Way|Place|Pl)\b\.?",
            )
            .expect("Invalid regex"),
            person_cue: Regex::new(r"(?i)\b(?:with|and|invite|inviting|meet|meeting|call|cc|ask|tell)\s*$")
                .expect("Invalid regex"),
            place_cue: Regex::new(r"(?i)\b(?:at|in|near|@)\s*$").expect("Invalid regex"),
        }
    }

    /// Every entity in `text`, in text order, with overlaps removed.
    pub fn entities(&self, text: &str) -> Vec<Entity> {
        let mut entities = Vec::new();

        for m in self.email_pattern.find_iter(text) {
            push(&mut entities, text, m.start(), m.end(), EntityKind::Email, 0.95);
        }

        for m in self.address_pattern.find_iter(text) {
            push(&mut entities, text, m.start(), m.end(), EntityKind::Location, 0.85);
        }

        for m in self.name_pattern.find_iter(text) {
            let name = m.as_str().trim_end_matches('.');
            let first_word = name.split_whitespace().next().unwrap_or_default();
            if SKIP_WORDS.contains(&first_word) || name.len() < 3 {
                continue;
            }

            let head = &text[..m.start()];
            // A lone capitalized word opening a sentence is just grammar.
            let opens_sentence = head
                .trim_end()
                .chars()
                .last()
                .is_none_or(|c| matches!(c, '.' | '!' | '?' | '\n'));
            if opens_sentence && !name.contains(' ') {
                continue;
            }

            let last_word = name.split_whitespace().last().unwrap_or_default();
            let is_org = ORG_INDICATORS.contains(&last_word);
            let is_location = LOCATION_INDICATORS.contains(&last_word);

            let kind = if is_org {
                EntityKind::Organization
            } else if is_location || self.place_cue.is_match(head) {
                EntityKind::Location
            } else {
                EntityKind::Person
            };

            // Multi-word names are more likely real.
            let mut confidence: f32 = if name.contains(' ') { 0.75 } else { 0.6 };
            if is_org || is_location {
                confidence = (confidence + 0.1).min(0.9);
            }
            if kind == EntityKind::Person && self.person_cue.is_match(head) {
                confidence = (confidence + 0.1).min(0.9);
            }

            push(&mut entities, text, m.start(), m.start() + name.len(), kind, confidence);
        }

        entities.sort_by_key(|e| e.span.start());
        Self::remove_overlaps(&mut entities);
        entities
    }

    /// Remove overlapping entities, keeping the more specific one.
    fn remove_overlaps(entities: &mut Vec<Entity>) {
        fn priority(kind: EntityKind) -> u8 {
            match kind {
                EntityKind::Email => 10,
                EntityKind::Location => 6,
                EntityKind::Organization => 5,
                EntityKind::Person => 4,
            }
        }

        let mut i = 0;
        while i + 1 < entities.len() {
            if entities[i + 1].span.start() < entities[i].span.end() {
                if priority(entities[i].kind) >= priority(entities[i + 1].kind) {
                    entities.remove(i + 1);
                } else {
                    entities.remove(i);
                }
            } else {
                i += 1;
            }
        }
    }

    fn participants(&self, text: &str) -> Option<Candidate> {
        let people: Vec<Entity> = self
            .entities(text)
            .into_iter()
            .filter(|e| matches!(e.kind, EntityKind::Person | EntityKind::Email))
            .collect();
        let (first, last) = (people.first()?, people.last()?);
        let span = Span::new(first.span.start(), last.span.end(), text.len())?;
        let confidence = people.iter().map(|e| e.confidence).sum::<f32>() / people.len() as f32;
        let names = people.iter().map(|e| e.text.clone()).collect();
        Some(
            Candidate::new(
                CandidateValue::People(names),
                CandidateSource::recognizer(NAME),
                confidence,
                MethodId::EntityRecognition,
            )
            .with_span(span, text),
        )
    }

    fn location(&self, text: &str) -> Option<Candidate> {
        let best = self
            .entities(text)
            .into_iter()
            .filter(|e| matches!(e.kind, EntityKind::Location | EntityKind::Organization))
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.span.start().cmp(&a.span.start()))
            })?;
        Some(
            Candidate::new(
                CandidateValue::Text(best.text),
                CandidateSource::recognizer(NAME),
                best.confidence,
                MethodId::EntityRecognition,
            )
            .with_span(best.span, text),
        )
    }
}

fn push(
    entities: &mut Vec<Entity>,
    text: &str,
    start: usize,
    end: usize,
    kind: EntityKind,
    confidence: f32,
) {
    let Some(span) = Span::new(start, end, text.len()) else {
        return;
    };
    let Some(value) = text.get(start..end) else {
        return;
    };
    entities.push(Entity {
        text: value.to_string(),
        kind,
        confidence,
        span,
    });
}

#[async_trait]
impl Recognizer for EntityRecognizer {
    fn name(&self) -> &str {
        NAME
    }

    fn reliability(&self) -> SourceReliability {
        SourceReliability::Medium
    }

    fn supports(&self, field: Field) -> bool {
        matches!(field, Field::Participants | Field::Location)
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn extract(
        &self,
        text: &str,
        field: Field,
        _reference: &ReferenceTime,
    ) -> Result<Option<Candidate>> {
        Ok(match field {
            Field::Participants => self.participants(text),
            Field::Location => self.location(text),
            _ => None,
        })
    }
}
