//! OpenAI-compatible chat-completions enhancer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

use super::LanguageModelEnhancer;
use crate::config::LanguageModelConfig;
use crate::error::{EnhancerError, Result};
use crate::event::{
    Candidate, CandidateSource, CandidateValue, EventRecord, Field, FieldResult, MethodId,
    ParsingPath, ReferenceTime,
};
use crate::patterns::MAX_DURATION_MINUTES;

/// Confidence given to model answers that do not state one.
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.7;

/// Enhancer backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiEnhancer {
    config: LanguageModelConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiEnhancer {
    pub fn new(config: LanguageModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnhancerError::Http(e.to_string()))?;
        Ok(Self {
            api_key: config.resolve_api_key(),
            config,
            client,
        })
    }

    fn prompt(&self, text: &str, partial: &EventRecord, reference: &ReferenceTime) -> String {
        let known = serde_json::json!({
            "title": partial.title,
            "start_datetime": partial.start_datetime.map(|dt| dt.to_rfc3339()),
            "end_datetime": partial.end_datetime.map(|dt| dt.to_rfc3339()),
            "location": partial.location,
        });
        format!(
            r#"Extract one calendar event from the text. Return a JSON object with these fields (null when absent):
- "title": short event title
- "start_datetime": ISO 8601 datetime
- "end_datetime": ISO 8601 datetime
- "location": place or meeting link
- "participants": array of names or e-mail addresses
- "duration_minutes": integer
- "confidence": a number from 0.0 to 1.0

The current time is {now}{offset}. Already known: {known}

Text:
---
{text}
---

Return ONLY valid JSON, no explanation:"#,
            now = reference.local.format("%Y-%m-%dT%H:%M"),
            offset = reference
                .offset()
                .map(|o| o.to_string())
                .unwrap_or_default(),
        )
    }
}

#[async_trait]
impl LanguageModelEnhancer for OpenAiEnhancer {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn enhance(
        &self,
        text: &str,
        partial: &EventRecord,
        reference: &ReferenceTime,
    ) -> Result<EventRecord> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EnhancerError::MissingApiKey.into());
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_endpoint))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "model": self.config.model,
                "messages": [
                    {
                        "role": "system",
                        "content": "You extract calendar events from text and return valid JSON."
                    },
                    {
                        "role": "user",
                        "content": self.prompt(text, partial, reference)
                    }
                ],
                "temperature": 0.0,
                "max_tokens": self.config.max_tokens
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnhancerError::Timeout(self.config.timeout_secs * 1000)
                } else {
                    EnhancerError::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EnhancerError::Api { status, body }.into());
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EnhancerError::InvalidResponse(e.to_string()))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EnhancerError::InvalidResponse("missing message content".to_string()))?;

        tracing::debug!(model = %self.config.model, "Language model answered");
        parse_enhancer_response(text, content)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelEvent {
    title: Option<String>,
    start_datetime: Option<String>,
    end_datetime: Option<String>,
    location: Option<String>,
    participants: Vec<String>,
    duration_minutes: Option<i64>,
    confidence: Option<f32>,
}

/// Turn a model's JSON answer into a record for `text`.
///
/// Accepts the object bare or inside a Markdown code fence. Datetimes
/// without an offset are kept naive.
pub fn parse_enhancer_response(text: &str, content: &str) -> Result<EventRecord> {
    let json = strip_code_fence(content);
    let event: ModelEvent = serde_json::from_str(json)
        .map_err(|e| EnhancerError::InvalidResponse(e.to_string()))?;
    let confidence = event.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE);

    let mut record = EventRecord::new(text);
    record.parsing_path = ParsingPath::LanguageModel;

    let mut attach = |field: Field, value: CandidateValue| {
        if value.is_empty() {
            return;
        }
        let candidate = Candidate::new(
            value,
            CandidateSource::LanguageModel,
            confidence,
            MethodId::LanguageModel,
        );
        record.attach(FieldResult::new(field, candidate));
    };

    if let Some(title) = event.title {
        attach(Field::Title, CandidateValue::Text(title));
    }
    if let Some(start) = event.start_datetime.as_deref().and_then(parse_datetime) {
        attach(Field::StartDatetime, start);
    }
    if let Some(end) = event.end_datetime.as_deref().and_then(parse_datetime) {
        attach(Field::EndDatetime, end);
    }
    if let Some(location) = event.location {
        attach(Field::Location, CandidateValue::Text(location));
    }
    if !event.participants.is_empty() {
        attach(Field::Participants, CandidateValue::People(event.participants));
    }
    let duration = event
        .duration_minutes
        .filter(|m| (1..=MAX_DURATION_MINUTES).contains(m));
    if let Some(minutes) = duration {
        attach(Field::Duration, CandidateValue::DurationMinutes(minutes));
    }

    Ok(record)
}

fn parse_datetime(raw: &str) -> Option<CandidateValue> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(CandidateValue::DateTime(dt));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(CandidateValue::LocalDateTime)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
