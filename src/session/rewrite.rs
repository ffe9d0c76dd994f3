//! Manifest URI rewriting
//!
//! Rules are plain substring replacements applied in configuration order. Each
//! rule replaces every occurrence of its match string before the next rule runs,
//! so later rules see the output of earlier ones.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::{PlayerError, PlayerResult};

/// A single `(match, replacement)` substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRewriteRule {
    #[serde(rename = "match")]
    pub match_substring: String,
    pub replacement: String,
}

impl ManifestRewriteRule {
    pub fn new<M: Into<String>, R: Into<String>>(match_substring: M, replacement: R) -> Self {
        Self {
            match_substring: match_substring.into(),
            replacement: replacement.into(),
        }
    }
}

/// Ordered rule set applied to every manifest URI before load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestRewriter {
    rules: Vec<ManifestRewriteRule>,
}

impl ManifestRewriter {
    /// Build a rewriter, rejecting rules with an empty match string
    pub fn new(rules: Vec<ManifestRewriteRule>) -> PlayerResult<Self> {
        let rewriter = Self { rules };
        rewriter.validate()?;
        Ok(rewriter)
    }

    pub fn validate(&self) -> PlayerResult<()> {
        if let Some(position) = self.rules.iter().position(|r| r.match_substring.is_empty()) {
            return Err(PlayerError::configuration(format!(
                "manifest rewrite rule #{position} has an empty match string"
            )));
        }
        Ok(())
    }

    pub fn rules(&self) -> &[ManifestRewriteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, uri: &str) -> String {
        let rewritten = self.rules.iter().fold(uri.to_string(), |current, rule| {
            if rule.match_substring.is_empty() {
                current
            } else {
                current.replace(&rule.match_substring, &rule.replacement)
            }
        });
        if rewritten != uri {
            trace!("Rewrote manifest URI {} -> {}", uri, rewritten);
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn operator_rules() -> ManifestRewriter {
        ManifestRewriter::new(vec![
            ManifestRewriteRule::new("https://rr.example.net", "http://origin-01.example.net"),
            ManifestRewriteRule::new("__op/mss-pr", "__op/dash-default"),
            ManifestRewriteRule::new("__op/dash-wv", "__op/dash-default"),
            ManifestRewriteRule::new("__op/hls-fp", "__op/dash-default"),
            ManifestRewriteRule::new("/Manifest", "/manifest.mpd"),
        ])
        .unwrap()
    }

    #[rstest]
    #[case(
        "https://rr.example.net/live/__op/mss-pr/ch1/Manifest",
        "http://origin-01.example.net/live/__op/dash-default/ch1/manifest.mpd"
    )]
    #[case(
        "https://rr.example.net/vod/__op/hls-fp/movie/Manifest",
        "http://origin-01.example.net/vod/__op/dash-default/movie/manifest.mpd"
    )]
    #[case("http://other.example.org/stream.mpd", "http://other.example.org/stream.mpd")]
    fn test_operator_rules(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(operator_rules().apply(input), expected);
    }

    #[test]
    fn test_all_occurrences_replaced() {
        let rewriter = ManifestRewriter::new(vec![ManifestRewriteRule::new("a", "b")]).unwrap();
        assert_eq!(rewriter.apply("a/a/a"), "b/b/b");
    }

    #[test]
    fn test_rules_applied_in_order() {
        let rewriter = ManifestRewriter::new(vec![
            ManifestRewriteRule::new("x", "y"),
            ManifestRewriteRule::new("y", "z"),
        ])
        .unwrap();
        assert_eq!(rewriter.apply("x-y"), "z-z");

        let reversed = ManifestRewriter::new(vec![
            ManifestRewriteRule::new("y", "z"),
            ManifestRewriteRule::new("x", "y"),
        ])
        .unwrap();
        assert_eq!(reversed.apply("x-y"), "y-z");
    }

    #[test]
    fn test_empty_match_rejected() {
        let result = ManifestRewriter::new(vec![ManifestRewriteRule::new("", "boom")]);
        assert!(matches!(result, Err(PlayerError::Configuration { .. })));
    }

    #[test]
    fn test_empty_rule_set_is_identity() {
        assert_eq!(ManifestRewriter::default().apply("http://a/b"), "http://a/b");
    }
}
