//! Result cache for parsed event records.
//!
//! Entries are keyed by a SHA-256 digest of the whitespace-normalised text
//! together with everything else that changes the answer: the mode, the
//! reference time and the date order. Concurrent requests for the same key
//! share one computation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::event::{DateOrder, EventRecord, ParseMode, ParseRequest};
use crate::utils::normalize_whitespace;

/// Hash key for the result cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(request: &ParseRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_whitespace(&request.text).as_bytes());
        hasher.update([0u8]);
        hasher.update(match request.mode {
            ParseMode::PatternOnly => b"pattern_only".as_slice(),
            ParseMode::LanguageModelOnly => b"language_model_only".as_slice(),
            ParseMode::Hybrid => b"hybrid".as_slice(),
        });
        hasher.update([0u8]);
        hasher.update(request.reference.local.format("%Y-%m-%dT%H:%M:%S").to_string());
        if let Some(offset) = request.reference.offset_minutes {
            hasher.update(offset.to_le_bytes());
        }
        hasher.update([match request.locale.date_order {
            DateOrder::MonthFirst => 0u8,
            DateOrder::DayFirst => 1u8,
        }]);
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// Computed but not stored (cache disabled or the computation faulted).
    Bypassed,
}

/// Cache of finished records.
#[derive(Clone)]
pub struct ResultCache {
    records: Cache<CacheKey, Arc<EventRecord>>,
    enabled: bool,
}

impl ResultCache {
    /// Create a new result cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let records = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();
        Self {
            records,
            enabled: true,
        }
    }

    /// Create a disabled cache.
    pub fn disabled() -> Self {
        Self {
            records: Cache::builder().max_capacity(0).build(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached record for `key`, or run `compute` once and store
    /// its result.
    ///
    /// `compute` yields `Ok` for a cacheable record and `Err` for a fault
    /// record, which is returned to the caller but never stored. Callers
    /// racing on the same key wait for the first computation.
    pub async fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> (EventRecord, CacheOutcome)
    where
        F: Future<Output = std::result::Result<EventRecord, EventRecord>>,
    {
        if !self.enabled {
            let record = match compute.await {
                Ok(record) | Err(record) => record,
            };
            return (record, CacheOutcome::Bypassed);
        }

        let computed = AtomicBool::new(false);
        let init = async {
            computed.store(true, Ordering::Relaxed);
            compute.await.map(Arc::new)
        };

        match self.records.try_get_with(key, init).await {
            Ok(record) => {
                let outcome = if computed.load(Ordering::Relaxed) {
                    CacheOutcome::Miss
                } else {
                    CacheOutcome::Hit
                };
                (record.as_ref().clone(), outcome)
            }
            Err(fault) => (fault.as_ref().clone(), CacheOutcome::Bypassed),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<EventRecord> {
        if !self.enabled {
            return None;
        }
        self.records.get(key).await.map(|r| r.as_ref().clone())
    }

    /// Invalidate all cache entries.
    pub async fn invalidate_all(&self) {
        self.records.invalidate_all();
        self.records.run_pending_tasks().await;
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            entries: self.records.entry_count(),
        }
    }

    /// Run cache maintenance (cleanup expired entries).
    pub async fn run_pending_tasks(&self) {
        self.records.run_pending_tasks().await;
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LocalePrefs, ReferenceTime};

    fn test_config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_entries: 100,
            ttl_secs: 60,
        }
    }

    fn request(text: &str) -> ParseRequest {
        ParseRequest::new(text, ReferenceTime::at(2025, 9, 29, 17, 0).unwrap())
    }

    #[test]
    fn test_key_normalizes_whitespace() {
        let a = CacheKey::new(&request("lunch  tomorrow\tat noon"));
        let b = CacheKey::new(&request(" lunch tomorrow at noon "));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_key_depends_on_context() {
        let base = CacheKey::new(&request("lunch tomorrow"));
        let mode = CacheKey::new(&request("lunch tomorrow").with_mode(ParseMode::PatternOnly));
        let locale =
            CacheKey::new(&request("lunch tomorrow").with_locale(LocalePrefs::day_first()));
        let mut later = request("lunch tomorrow");
        later.reference = ReferenceTime::at(2025, 9, 30, 17, 0).unwrap();
        let offset = CacheKey::new(&ParseRequest::new(
            "lunch tomorrow",
            ReferenceTime::at(2025, 9, 29, 17, 0)
                .unwrap()
                .with_offset_minutes(60),
        ));

        for other in [mode, locale, CacheKey::new(&later), offset] {
            assert_ne!(base, other);
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = ResultCache::new(&test_config());
        let key = CacheKey::new(&request("lunch"));

        let (first, outcome) = cache
            .get_or_compute(key.clone(), async { Ok(EventRecord::new("lunch")) })
            .await;
        assert_eq!(outcome, CacheOutcome::Miss);

        let (second, outcome) = cache
            .get_or_compute(key.clone(), async { Ok(EventRecord::new("recomputed")) })
            .await;
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(first, second);
        assert_eq!(second.description, "lunch");
    }

    #[tokio::test]
    async fn test_faults_are_not_cached() {
        let cache = ResultCache::new(&test_config());
        let key = CacheKey::new(&request("boom"));

        let (record, outcome) = cache
            .get_or_compute(key.clone(), async {
                Err(EventRecord::fallback("boom", Some("fault".into())))
            })
            .await;
        assert_eq!(outcome, CacheOutcome::Bypassed);
        assert!(record.metadata.contains_key("error"));
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = ResultCache::disabled();
        assert!(!cache.is_enabled());
        let key = CacheKey::new(&request("x"));
        let (_, outcome) = cache
            .get_or_compute(key.clone(), async { Ok(EventRecord::new("x")) })
            .await;
        assert_eq!(outcome, CacheOutcome::Bypassed);
        assert!(cache.get(&key).await.is_none());
        assert!(!cache.stats().enabled);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = ResultCache::new(&test_config());
        let key = CacheKey::new(&request("y"));
        cache
            .get_or_compute(key.clone(), async { Ok(EventRecord::new("y")) })
            .await;
        assert!(cache.get(&key).await.is_some());

        cache.invalidate_all().await;
        assert!(cache.get(&key).await.is_none());
    }
}
