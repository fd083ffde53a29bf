//! Validation report types.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::event::{Candidate, Field};

// ============================================================================
// Issues
// ============================================================================

/// A field-level problem found in a record.
///
/// These describe outcomes, not Rust errors: a record is always returned
/// alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseIssue {
    /// A tier could not be reached and was skipped.
    RecognitionUnavailable { tier: String, reason: String },
    /// Extracted, but below the confidence floor. `field` is `None` for the
    /// record's overall confidence.
    LowConfidence {
        field: Option<Field>,
        confidence: f32,
        floor: f32,
    },
    /// More than one interpretation survived for a field.
    Ambiguous { field: Field, options: Vec<String> },
    /// A critical field is absent after every tier.
    MissingCritical { field: Field },
    /// Fields contradict each other or the source text.
    Inconsistent { fields: Vec<Field>, message: String },
    /// An unexpected fault was caught and turned into a fallback record.
    InternalFault { reason: String },
}

impl ParseIssue {
    /// The kind tag, matching the serialized `kind`.
    pub fn kind(&self) -> IssueKind {
        match self {
            ParseIssue::RecognitionUnavailable { .. } => IssueKind::RecognitionUnavailable,
            ParseIssue::LowConfidence { .. } => IssueKind::LowConfidence,
            ParseIssue::Ambiguous { .. } => IssueKind::Ambiguous,
            ParseIssue::MissingCritical { .. } => IssueKind::MissingCritical,
            ParseIssue::Inconsistent { .. } => IssueKind::Inconsistent,
            ParseIssue::InternalFault { .. } => IssueKind::InternalFault,
        }
    }

    /// Blocking issues make the outcome invalid.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            ParseIssue::MissingCritical { .. } | ParseIssue::InternalFault { .. }
        )
    }

    /// The field the issue is about, if it is about a single one.
    pub fn field(&self) -> Option<Field> {
        match self {
            ParseIssue::LowConfidence { field, .. } => *field,
            ParseIssue::Ambiguous { field, .. } | ParseIssue::MissingCritical { field } => {
                Some(*field)
            }
            _ => None,
        }
    }
}

/// Fieldless discriminant of [`ParseIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    RecognitionUnavailable,
    LowConfidence,
    Ambiguous,
    MissingCritical,
    Inconsistent,
    InternalFault,
}

/// Competing candidates for one field, winner first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Ambiguity {
    pub field: Field,
    pub candidates: Vec<Candidate>,
}

// ============================================================================
// Validation outcome
// ============================================================================

/// Structured report of missing, ambiguous and inconsistent fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationOutcome {
    /// False when a blocking issue was found.
    pub is_valid: bool,
    #[serde(default)]
    pub missing_fields: Vec<Field>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub field_warnings: BTreeMap<Field, Vec<String>>,
    #[serde(default)]
    pub field_suggestions: BTreeMap<Field, Vec<String>>,
    /// Fields whose winner is below the confidence floor.
    #[serde(default)]
    pub confidence_issues: Vec<Field>,
    #[serde(default)]
    pub ambiguities: Vec<Ambiguity>,
    #[serde(default)]
    pub issues: Vec<ParseIssue>,
}

impl Default for ValidationOutcome {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationOutcome {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            missing_fields: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            field_warnings: BTreeMap::new(),
            field_suggestions: BTreeMap::new(),
            confidence_issues: Vec::new(),
            ambiguities: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Record an issue; blocking issues clear `is_valid`.
    pub fn push_issue(&mut self, issue: ParseIssue) {
        if issue.is_blocking() {
            self.is_valid = false;
        }
        self.issues.push(issue);
    }

    /// Add a warning, optionally tied to a field.
    pub fn warn(&mut self, field: Option<Field>, message: impl Into<String>) {
        let message = message.into();
        if let Some(field) = field {
            self.field_warnings
                .entry(field)
                .or_default()
                .push(message.clone());
        }
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    /// Add a suggestion, optionally tied to a field.
    pub fn suggest(&mut self, field: Option<Field>, message: impl Into<String>) {
        let message = message.into();
        if let Some(field) = field {
            self.field_suggestions
                .entry(field)
                .or_default()
                .push(message.clone());
        }
        if !self.suggestions.contains(&message) {
            self.suggestions.push(message);
        }
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind() == kind)
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &ParseIssue> {
        self.issues.iter().filter(move |issue| issue.kind() == kind)
    }

    pub fn ambiguity(&self, field: Field) -> Option<&Ambiguity> {
        self.ambiguities.iter().find(|a| a.field == field)
    }

    /// JSON schema of the serialized outcome.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ValidationOutcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_issue_invalidates() {
        let mut outcome = ValidationOutcome::new();
        outcome.push_issue(ParseIssue::Inconsistent {
            fields: vec![Field::StartDatetime, Field::EndDatetime],
            message: "end time before or equal to start time".into(),
        });
        assert!(outcome.is_valid);

        outcome.push_issue(ParseIssue::MissingCritical {
            field: Field::Title,
        });
        assert!(!outcome.is_valid);
        assert!(outcome.has(IssueKind::MissingCritical));
        assert_eq!(outcome.issues_of(IssueKind::Inconsistent).count(), 1);
    }

    #[test]
    fn test_warnings_deduplicate() {
        let mut outcome = ValidationOutcome::new();
        outcome.warn(Some(Field::Title), "title barely matches the text");
        outcome.warn(None, "title barely matches the text");
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.field_warnings[&Field::Title].len(), 1);
    }

    #[test]
    fn test_issue_serializes_with_kind_tag() {
        let issue = ParseIssue::MissingCritical {
            field: Field::StartDatetime,
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "missing_critical");
        assert_eq!(json["field"], "start_datetime");

        let back: ParseIssue = serde_json::from_value(json).unwrap();
        assert_eq!(back, issue);
        assert_eq!(back.field(), Some(Field::StartDatetime));
    }
}
