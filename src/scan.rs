//! The scan engine: one pass over every configured source per cycle.
//!
//! The engine is the sole writer of the cursor and the dedupe cache; the
//! monitor loop owns exactly one engine, so no locking is needed around
//! scan state.

use crate::config::Config;
use crate::cursor::LogCursor;
use crate::error::ConfigError;
use crate::patterns::PatternMatcher;
use crate::util;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A newly discovered error line, ready for diagnosis.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub source: PathBuf,
    pub raw_text: String,
    pub matched_pattern: String,
    pub timestamp: DateTime<Utc>,
    pub dedupe_key: String,
}

/// Stable, pattern-agnostic key for an error line: FNV hash of the text
/// after trimming, lowercasing, and collapsing runs of whitespace. The same
/// error logged with different spacing or casing dedupes to one key.
pub fn dedupe_key(raw_text: &str) -> String {
    let normalized = raw_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    util::hash_str(&normalized)
}

/// Bounded, time-windowed memory of recently analyzed errors.
///
/// An entry older than the TTL counts as new again; when the map is full
/// the oldest key is evicted first.
#[derive(Debug)]
pub struct RecentErrorsCache {
    last_seen: HashMap<String, Instant>,
    order: VecDeque<String>,
    capacity: usize,
    ttl: Duration,
}

impl RecentErrorsCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            last_seen: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Whether this key should be treated as a new error.
    pub fn is_new(&self, key: &str) -> bool {
        match self.last_seen.get(key) {
            Some(seen) => seen.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// Record that `key` was analyzed just now.
    pub fn record(&mut self, key: &str) {
        if self.last_seen.insert(key.to_string(), Instant::now()).is_some() {
            self.order.retain(|k| k != key);
        }
        self.order.push_back(key.to_string());

        while self.last_seen.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.last_seen.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// Scans every configured source once per cycle and emits deduplicated
/// error events in per-source line order.
#[derive(Debug)]
pub struct ScanEngine {
    matcher: PatternMatcher,
    cursor: LogCursor,
    cache: RecentErrorsCache,
    sources: Vec<PathBuf>,
}

impl ScanEngine {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            matcher: PatternMatcher::new(&config.log_patterns)?,
            cursor: LogCursor::new(config.rotation),
            cache: RecentErrorsCache::new(
                config.dedupe_capacity,
                Duration::from_secs(config.dedupe_ttl_secs),
            ),
            sources: config.sources.clone(),
        })
    }

    /// Run one scan cycle. A source that fails to read is logged and
    /// skipped; it never aborts the cycle or the other sources.
    pub fn scan_cycle(&mut self) -> Vec<ErrorEvent> {
        let mut events = Vec::new();

        for source in &self.sources {
            let lines = match self.cursor.read_new(source) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(source = %source.display(), "skipping source this cycle: {e}");
                    continue;
                }
            };

            for line in lines {
                let Some(pattern) = self.matcher.classify(&line) else {
                    continue;
                };
                let key = dedupe_key(&line);
                if !self.cache.is_new(&key) {
                    debug!(
                        source = %source.display(),
                        dedupe_key = %key,
                        "suppressing recurring error"
                    );
                    continue;
                }
                self.cache.record(&key);
                events.push(ErrorEvent {
                    source: source.clone(),
                    raw_text: line,
                    matched_pattern: pattern.to_string(),
                    timestamp: Utc::now(),
                    dedupe_key: key,
                });
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    fn test_config(sources: Vec<PathBuf>) -> Config {
        Config {
            sources,
            ..Config::default()
        }
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_scan_emits_one_event_per_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "info: booting\nerror: disk full\nerror: oom\n").unwrap();

        let mut engine = ScanEngine::new(&test_config(vec![log.clone()])).unwrap();
        let events = engine.scan_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].raw_text, "error: disk full");
        assert_eq!(events[0].matched_pattern, "error:");
        assert_eq!(events[1].raw_text, "error: oom");
    }

    #[test]
    fn test_rescan_with_no_new_content_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "error: once\n").unwrap();

        let mut engine = ScanEngine::new(&test_config(vec![log.clone()])).unwrap();
        assert_eq!(engine.scan_cycle().len(), 1);
        assert!(engine.scan_cycle().is_empty());
    }

    #[test]
    fn test_identical_error_is_deduplicated_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "error: flaky network\n").unwrap();

        let mut engine = ScanEngine::new(&test_config(vec![log.clone()])).unwrap();
        assert_eq!(engine.scan_cycle().len(), 1);

        // Same line recurring: suppressed. A distinct line still gets through.
        append(&log, "error: flaky network\nerror: something else\n");
        let events = engine.scan_cycle();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_text, "error: something else");
    }

    #[test]
    fn test_unreadable_source_does_not_abort_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.log");
        let log = dir.path().join("app.log");
        fs::write(&log, "error: real problem\n").unwrap();

        let mut engine = ScanEngine::new(&test_config(vec![missing, log])).unwrap();
        let events = engine.scan_cycle();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_text, "error: real problem");
    }

    #[test]
    fn test_dedupe_key_normalizes_case_and_whitespace() {
        assert_eq!(
            dedupe_key("Error:   Disk Full"),
            dedupe_key("error: disk full")
        );
        assert_ne!(dedupe_key("error: disk full"), dedupe_key("error: oom"));
    }

    #[test]
    fn test_cache_ttl_expiry_treats_key_as_new() {
        let mut cache = RecentErrorsCache::new(16, Duration::from_millis(10));
        cache.record("k");
        assert!(!cache.is_new("k"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.is_new("k"));
    }

    #[test]
    fn test_cache_evicts_oldest_at_capacity() {
        let mut cache = RecentErrorsCache::new(2, Duration::from_secs(60));
        cache.record("a");
        cache.record("b");
        cache.record("c");
        assert_eq!(cache.len(), 2);
        assert!(cache.is_new("a"));
        assert!(!cache.is_new("b"));
        assert!(!cache.is_new("c"));
    }

    #[test]
    fn test_cache_refresh_moves_key_to_back_of_eviction_order() {
        let mut cache = RecentErrorsCache::new(2, Duration::from_secs(60));
        cache.record("a");
        cache.record("b");
        cache.record("a");
        cache.record("c");
        // "b" is now the oldest and gets evicted, not the refreshed "a".
        assert!(cache.is_new("b"));
        assert!(!cache.is_new("a"));
    }
}
