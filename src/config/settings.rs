//! Configuration settings for the Almanac extraction pipeline.

use crate::error::{ConfigError, Result};
use crate::event::ParseMode;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub patterns: PatternConfig,
    pub routing: RoutingConfig,
    pub recognizers: RecognizerConfig,
    pub orchestrator: OrchestratorConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    /// Language-model enhancer settings; absent means no enhancer is built.
    pub language_model: Option<LanguageModelConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("almanac.toml"),
            dirs::config_dir()
                .map(|p| p.join("almanac/config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".almanac/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.patterns.validate()?;

        let r = &self.routing;
        for (name, value) in [
            ("routing.fast_pattern", r.fast_pattern),
            ("routing.secondary", r.secondary),
            ("routing.language_model", r.language_model),
            ("routing.optional_fast_pattern", r.optional_fast_pattern),
            ("routing.optional_secondary", r.optional_secondary),
            ("routing.optional_language_model", r.optional_language_model),
            ("orchestrator.high_confidence", self.orchestrator.high_confidence),
            ("orchestrator.escalation_floor", self.orchestrator.escalation_floor),
            ("resolver.confidence_floor", self.resolver.confidence_floor),
            ("resolver.min_text_overlap", self.resolver.min_text_overlap),
        ] {
            check_unit_interval(name, value)?;
        }
        if !(r.fast_pattern >= r.secondary && r.secondary >= r.language_model) {
            return Err(ConfigError::Invalid(
                "routing thresholds must be non-increasing: fast_pattern >= secondary >= language_model"
                    .to_string(),
            )
            .into());
        }
        if !(r.optional_fast_pattern >= r.optional_secondary
            && r.optional_secondary >= r.optional_language_model)
        {
            return Err(ConfigError::Invalid(
                "optional routing thresholds must be non-increasing".to_string(),
            )
            .into());
        }

        let o = &self.orchestrator;
        if o.language_model_margin <= 0.0 || o.language_model_margin >= o.high_confidence {
            return Err(ConfigError::Invalid(
                "orchestrator.language_model_margin must be in (0, high_confidence)".to_string(),
            )
            .into());
        }
        if o.escalation_floor > o.high_confidence {
            return Err(ConfigError::Invalid(
                "orchestrator.escalation_floor must not exceed high_confidence".to_string(),
            )
            .into());
        }

        if self.recognizers.timeout_ms == 0 {
            return Err(
                ConfigError::Invalid("recognizers.timeout_ms must be > 0".to_string()).into(),
            );
        }
        if self.recognizers.default_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "recognizers.default_offset_minutes must be within ±{}",
                MAX_OFFSET_MINUTES
            ))
            .into());
        }

        if self.resolver.max_duration_hours == 0 {
            return Err(
                ConfigError::Invalid("resolver.max_duration_hours must be > 0".to_string()).into(),
            );
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be > 0".to_string()).into());
        }

        if let Some(lm) = &self.language_model {
            if lm.api_endpoint.is_empty() {
                return Err(
                    ConfigError::MissingField("language_model.api_endpoint".to_string()).into(),
                );
            }
            if lm.model.is_empty() {
                return Err(ConfigError::MissingField("language_model.model".to_string()).into());
            }
        }

        Ok(())
    }
}

/// Largest UTC offset accepted anywhere in the pipeline (±14h).
pub const MAX_OFFSET_MINUTES: i32 = 14 * 60;

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be within [0, 1], got {}", name, value)).into())
    }
}

/// Pattern extraction engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Max bytes between a date and a time for them to combine
    pub combine_distance: usize,
    /// Time-of-day used for date-only candidates ("HH:MM")
    pub default_time: String,
    /// Confidence multiplier for date-only candidates
    pub date_only_penalty: f32,
    /// Confidence multiplier for time-only candidates
    pub time_only_penalty: f32,
    /// How hours without AM/PM are read
    pub bare_hour: BareHourPolicy,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            combine_distance: 30,
            default_time: "09:00".to_string(),
            date_only_penalty: 0.8,
            time_only_penalty: 0.75,
            bare_hour: BareHourPolicy::default(),
        }
    }
}

impl PatternConfig {
    /// The configured default time-of-day, or 09:00 if it does not parse.
    pub fn default_time(&self) -> NaiveTime {
        NaiveTime::parse_from_str(&self.default_time, "%H:%M")
            .unwrap_or_else(|_| NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN))
    }

    fn validate(&self) -> Result<()> {
        if NaiveTime::parse_from_str(&self.default_time, "%H:%M").is_err() {
            return Err(ConfigError::Invalid(format!(
                "patterns.default_time must be HH:MM, got {:?}",
                self.default_time
            ))
            .into());
        }
        check_unit_interval("patterns.date_only_penalty", self.date_only_penalty)?;
        check_unit_interval("patterns.time_only_penalty", self.time_only_penalty)?;
        if let Some(bad) = self.bare_hour.pm_hours.iter().find(|h| !(1..=11).contains(*h)) {
            return Err(ConfigError::Invalid(format!(
                "patterns.bare_hour.pm_hours entries must be within 1..=11, got {}",
                bad
            ))
            .into());
        }
        Ok(())
    }
}

/// Policy for hours written without AM/PM ("at 3", "2:30").
///
/// Hours listed in `pm_hours` are read as afternoon/evening; every other
/// hour is taken literally. This is a business-hours heuristic and is
/// tunable per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BareHourPolicy {
    /// Hours (1-11) read as PM when no meridiem is given
    pub pm_hours: Vec<u32>,
}

impl Default for BareHourPolicy {
    fn default() -> Self {
        Self {
            pm_hours: (1..=7).collect(),
        }
    }
}

impl BareHourPolicy {
    /// Map a bare hour (0-23) to a 24-hour clock hour.
    pub fn resolve(&self, hour: u32) -> u32 {
        if self.pm_hours.contains(&hour) {
            hour + 12
        } else {
            hour
        }
    }
}

/// Field extractability router thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub fast_pattern: f32,
    pub secondary: f32,
    pub language_model: f32,
    /// Thresholds used for location, description and participants
    pub optional_fast_pattern: f32,
    pub optional_secondary: f32,
    pub optional_language_model: f32,
    /// Potential subtracted when a field has conflicting spans
    pub conflict_penalty: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fast_pattern: 0.8,
            secondary: 0.6,
            language_model: 0.4,
            optional_fast_pattern: 0.7,
            optional_secondary: 0.5,
            optional_language_model: 0.5,
            conflict_penalty: 0.15,
        }
    }
}

/// Secondary recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Offset applied to naive datetimes, in minutes east of UTC
    pub default_offset_minutes: i32,
    /// Confidence subtracted when a naive datetime is normalized
    pub naive_timezone_penalty: f32,
    /// Register the built-in entity and deadline recognizers
    pub builtin: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            default_offset_minutes: 0,
            naive_timezone_penalty: 0.05,
            builtin: true,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Mode used when a request does not name one
    pub mode: ParseMode,
    /// Pattern confidence accepted without escalation
    pub high_confidence: f32,
    /// Language-model answers are capped at high_confidence minus this
    pub language_model_margin: f32,
    /// Below this after the deterministic tier, a field goes to the language model
    pub escalation_floor: f32,
    pub enable_language_model: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: ParseMode::Hybrid,
            high_confidence: 0.8,
            language_model_margin: 0.05,
            escalation_floor: 0.6,
            enable_language_model: true,
        }
    }
}

impl OrchestratorConfig {
    /// Highest confidence a language-model answer may carry.
    pub fn language_model_ceiling(&self) -> f32 {
        (self.high_confidence - self.language_model_margin).max(0.0)
    }
}

/// Error and ambiguity resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Overall and per-field confidence below this is flagged
    pub confidence_floor: f32,
    /// Alternatives within this margin of the winner count as ambiguous
    pub ambiguity_margin: f32,
    /// Accept records missing critical fields
    pub allow_partial: bool,
    pub max_duration_hours: u32,
    /// Minimum share of title/location words found in the source text
    pub min_text_overlap: f32,
    pub past_window_days: i64,
    pub future_window_days: i64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            ambiguity_margin: 0.05,
            allow_partial: false,
            max_duration_hours: 24,
            min_text_overlap: 0.5,
            past_window_days: 365,
            future_window_days: 730,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching
    pub enabled: bool,
    /// Maximum number of cached entries
    pub max_entries: u64,
    /// TTL for cached entries in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl_secs: 300,
        }
    }
}

/// OpenAI-compatible language-model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageModelConfig {
    /// Base URL of the chat-completions API
    pub api_endpoint: String,
    /// API key (falls back to OPENAI_API_KEY)
    pub api_key: Option<String>,
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_tokens: 512,
        }
    }
}

impl LanguageModelConfig {
    /// The configured key, or `OPENAI_API_KEY` from the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.mode, ParseMode::Hybrid);
        assert_eq!(config.routing.fast_pattern, 0.8);
        assert!(config.language_model.is_none());
        assert!((config.orchestrator.language_model_ceiling() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [patterns]
            combine_distance = 40
            default_time = "10:30"

            [patterns.bare_hour]
            pm_hours = [1, 2, 3, 4, 5]

            [orchestrator]
            mode = "pattern_only"
            high_confidence = 0.85

            [language_model]
            model = "gpt-4o"
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.patterns.combine_distance, 40);
        assert_eq!(
            config.patterns.default_time(),
            NaiveTime::from_hms_opt(10, 30, 0).unwrap()
        );
        assert_eq!(config.patterns.bare_hour.resolve(6), 6);
        assert_eq!(config.orchestrator.mode, ParseMode::PatternOnly);
        let lm = config.language_model.unwrap();
        assert_eq!(lm.model, "gpt-4o");
        assert_eq!(lm.api_endpoint, "https://api.openai.com/v1");
    }

    #[test]
    fn test_validate_bad_default_time() {
        let toml = r#"
            [patterns]
            default_time = "9 o'clock"
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_validate_thresholds_out_of_order() {
        let toml = r#"
            [routing]
            fast_pattern = 0.5
            secondary = 0.6
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_validate_out_of_range_offset() {
        let toml = r#"
            [recognizers]
            default_offset_minutes = 1200
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_validate_missing_model() {
        let toml = r#"
            [language_model]
            model = ""
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_bare_hour_policy_default() {
        let policy = BareHourPolicy::default();
        assert_eq!(policy.resolve(3), 15);
        assert_eq!(policy.resolve(7), 19);
        assert_eq!(policy.resolve(8), 8);
        assert_eq!(policy.resolve(12), 12);
        assert_eq!(policy.resolve(0), 0);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nenabled = false\nttl_secs = 60").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 60);
    }

    #[test]
    fn test_from_missing_file() {
        let result = Config::from_file("/nonexistent/almanac.toml");
        assert!(result.is_err());
    }
}
