//! Classifies log lines against the configured error patterns.

use crate::error::ConfigError;
use regex::{Regex, RegexBuilder};

/// A set of compiled error patterns, evaluated in configured order.
///
/// Matching is case-insensitive and first-match-wins, so classification is
/// deterministic and the cost per line is bounded by the pattern list.
#[derive(Debug)]
pub struct PatternMatcher {
    patterns: Vec<(String, Regex)>,
}

impl PatternMatcher {
    /// Compile every configured pattern up front. An invalid pattern is a
    /// configuration error, surfaced before the monitor starts.
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        if patterns.is_empty() {
            return Err(ConfigError::NoPatterns);
        }

        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::BadPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            compiled.push((pattern.clone(), regex));
        }

        Ok(Self { patterns: compiled })
    }

    /// Return the first configured pattern that matches `line`, or `None`
    /// for a non-error line.
    pub fn classify(&self, line: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(line))
            .map(|(pattern, _)| pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> PatternMatcher {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        PatternMatcher::new(&owned).unwrap()
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let m = matcher(&["error:"]);
        assert_eq!(m.classify("ERROR: disk full"), Some("error:"));
        assert_eq!(m.classify("Error: disk full"), Some("error:"));
        assert_eq!(m.classify("all good"), None);
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        let m = matcher(&["exception", "error:"]);
        assert_eq!(
            m.classify("error: unhandled exception in worker"),
            Some("exception")
        );
    }

    #[test]
    fn test_invalid_pattern_is_a_config_error() {
        let patterns = vec!["[unclosed".to_string()];
        match PatternMatcher::new(&patterns) {
            Err(ConfigError::BadPattern { pattern, .. }) => assert_eq!(pattern, "[unclosed"),
            other => panic!("expected BadPattern, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_pattern_list_is_rejected() {
        assert!(matches!(
            PatternMatcher::new(&[]),
            Err(ConfigError::NoPatterns)
        ));
    }
}
