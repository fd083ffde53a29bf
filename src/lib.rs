//! Almanac: hybrid calendar-event extraction
//!
//! Extracts calendar events from natural-language text through a chain of
//! tiers with increasing cost: fast patterns, deterministic recognizers and
//! an optional language model. Each field escalates only when the cheaper
//! tier's confidence proved insufficient, and every parse returns a record
//! together with a validation report.

pub mod cache;
pub mod config;
pub mod enhancer;
pub mod error;
pub mod event;
pub mod metrics;
pub mod orchestrator;
pub mod parser;
pub mod patterns;
pub mod recognizers;
pub mod resolver;
pub mod router;
pub mod utils;

pub use cache::{CacheKey, CacheOutcome, CacheStats, ResultCache};
pub use config::Config;
pub use enhancer::{LanguageModelEnhancer, OpenAiEnhancer};
pub use error::{AlmanacError, ConfigError, EnhancerError, RecognitionError, Result};
pub use event::{
    Candidate, CandidateSource, CandidateValue, DateOrder, EventRecord, Field, FieldResult,
    LocalePrefs, MethodId, ParseMode, ParseRequest, ParsingPath, RecurrencePattern,
    RecurrenceRule, ReferenceTime, Span,
};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use orchestrator::HybridOrchestrator;
pub use parser::{parse_event, EventParser, EventParserBuilder};
pub use patterns::{PatternEngine, PatternExtraction};
pub use recognizers::{
    BackupCoordinator, DeadlineRecognizer, EntityRecognizer, Recognizer, RecognizerStatsSnapshot,
};
pub use resolver::{
    Ambiguity, AmbiguityResolver, ClarificationChannel, IssueKind, NonInteractive, ParseIssue,
    ValidationOutcome,
};
pub use router::{FieldRouter, ProcessingTier, RoutingPlan};
