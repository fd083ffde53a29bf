//! Top-level entry point: text in, record and validation report out.

use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::enhancer::LanguageModelEnhancer;
use crate::error::Result;
use crate::event::{EventRecord, LocalePrefs, ParseMode, ParseRequest, ReferenceTime};
use crate::metrics::PipelineMetrics;
use crate::orchestrator::HybridOrchestrator;
use crate::recognizers::Recognizer;
use crate::resolver::{AmbiguityResolver, ClarificationChannel, ValidationOutcome};

/// Parse one piece of text with a default parser.
///
/// No language model is configured, so the hybrid chain stops at the
/// deterministic tiers.
pub async fn parse_event(
    text: &str,
    reference: ReferenceTime,
    locale: LocalePrefs,
    mode: ParseMode,
) -> (EventRecord, ValidationOutcome) {
    let request = ParseRequest::new(text, reference)
        .with_locale(locale)
        .with_mode(mode);
    EventParser::default().parse(&request).await
}

/// Orchestrator plus resolver behind one call.
pub struct EventParser {
    orchestrator: HybridOrchestrator,
    resolver: AmbiguityResolver,
    mode: ParseMode,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::from_parts(&Config::default(), Vec::new(), None)
    }
}

impl EventParser {
    pub fn builder() -> EventParserBuilder {
        EventParserBuilder::new()
    }

    /// Build a parser from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        Self::builder().config(config).build()
    }

    fn from_parts(
        config: &Config,
        recognizers: Vec<Arc<dyn Recognizer>>,
        enhancer: Option<Arc<dyn LanguageModelEnhancer>>,
    ) -> Self {
        let mut orchestrator = HybridOrchestrator::new(config);
        for recognizer in recognizers {
            orchestrator = orchestrator.with_recognizer(recognizer);
        }
        if let Some(enhancer) = enhancer {
            orchestrator = orchestrator.with_enhancer(enhancer);
        }
        let resolver = AmbiguityResolver::new(config).with_engine(orchestrator.engine());
        Self {
            orchestrator,
            resolver,
            mode: config.orchestrator.mode,
        }
    }

    /// A request in the configured mode.
    pub fn request(&self, text: impl Into<String>, reference: ReferenceTime) -> ParseRequest {
        ParseRequest::new(text, reference).with_mode(self.mode)
    }

    /// Parse without a person to ask; ambiguities take the top option.
    pub async fn parse(&self, request: &ParseRequest) -> (EventRecord, ValidationOutcome) {
        let record = self.orchestrator.parse(request).await;
        let (record, outcome) = self.resolver.resolve(record, request, None);
        debug!(
            path = ?record.parsing_path,
            confidence = record.confidence,
            valid = outcome.is_valid,
            "Parsed event"
        );
        (record, outcome)
    }

    /// Parse and let `channel` settle what the pipeline could not.
    pub async fn parse_interactive(
        &self,
        request: &ParseRequest,
        channel: &dyn ClarificationChannel,
    ) -> (EventRecord, ValidationOutcome) {
        let record = self.orchestrator.parse(request).await;
        self.resolver.resolve(record, request, Some(channel))
    }

    pub fn orchestrator(&self) -> &HybridOrchestrator {
        &self.orchestrator
    }

    pub fn resolver(&self) -> &AmbiguityResolver {
        &self.resolver
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.orchestrator.metrics()
    }
}

/// Builder for [`EventParser`].
pub struct EventParserBuilder {
    config: Option<Config>,
    recognizers: Vec<Arc<dyn Recognizer>>,
    enhancer: Option<Arc<dyn LanguageModelEnhancer>>,
}

impl Default for EventParserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventParserBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            recognizers: Vec::new(),
            enhancer: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Add a secondary recognizer next to the built-in ones.
    pub fn recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizers.push(recognizer);
        self
    }

    /// Use `enhancer` for the language-model tier instead of one built
    /// from configuration.
    pub fn enhancer(mut self, enhancer: Arc<dyn LanguageModelEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Validate the configuration and build the parser.
    pub fn build(self) -> Result<EventParser> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(EventParser::from_parts(&config, self.recognizers, self.enhancer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Field, ParsingPath};
    use crate::resolver::{IssueKind, NonInteractive};
    use chrono::{Datelike, Timelike};

    fn reference() -> ReferenceTime {
        ReferenceTime::at(2025, 9, 29, 17, 0).unwrap()
    }

    #[tokio::test]
    async fn test_parse_event() {
        let (record, outcome) = parse_event(
            "Meeting on 12/25/2024 at 2:30 PM",
            reference(),
            LocalePrefs::default(),
            ParseMode::Hybrid,
        )
        .await;

        let start = record.start_datetime.unwrap();
        assert_eq!((start.month(), start.day(), start.hour(), start.minute()), (12, 25, 14, 30));
        assert_eq!(record.parsing_path, ParsingPath::Pattern);
        assert!(outcome.is_valid);
    }

    #[tokio::test]
    async fn test_vague_text_is_reported() {
        let (record, outcome) = parse_event(
            "something unclear and vague",
            reference(),
            LocalePrefs::default(),
            ParseMode::Hybrid,
        )
        .await;
        assert_eq!(record.description, "something unclear and vague");
        assert!(outcome.has(IssueKind::MissingCritical));
        assert!(outcome.missing_fields.contains(&Field::Title));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = Config::default();
        config.routing.secondary = 0.95;
        assert!(EventParser::builder().config(config).build().is_err());
    }

    #[tokio::test]
    async fn test_request_uses_configured_mode() {
        let mut config = Config::default();
        config.orchestrator.mode = ParseMode::PatternOnly;
        let parser = EventParser::new(config).unwrap();

        let request = parser.request("Tomorrow 7am", reference());
        assert_eq!(request.mode, ParseMode::PatternOnly);

        let (record, _) = parser.parse_interactive(&request, &NonInteractive).await;
        assert_eq!(record.start_datetime.unwrap().hour(), 7);
        assert_eq!(parser.metrics().snapshot().requests_total, 1);
    }
}
