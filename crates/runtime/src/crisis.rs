//! Crisis keyword detection.
//!
//! Pure classification with no I/O: lower-case the message and look for any
//! configured keyword as a substring.  There is no stemming, negation or
//! context handling, so quoted crisis statements still match and paraphrases
//! that avoid the literal keywords do not.

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct CrisisDetector {
    keywords: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl CrisisDetector {
    pub fn new<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // An empty pattern would match every message.
        let keywords = keywords
            .into_iter()
            .map(|keyword| keyword.as_ref().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect::<Vec<_>>();

        let matcher = if keywords.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&keywords).context("building crisis keyword matcher")?)
        };

        Ok(Self { keywords, matcher })
    }

    pub fn detect(&self, message: &str) -> bool {
        self.matched_keyword(message).is_some()
    }

    /// The first keyword found in `message`, by position.
    pub fn matched_keyword(&self, message: &str) -> Option<&str> {
        let matcher = self.matcher.as_ref()?;
        let lowered = message.to_lowercase();
        matcher
            .find(&lowered)
            .map(|found| self.keywords[found.pattern().as_usize()].as_str())
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

#[cfg(test)]
mod tests {
    use mindful_config::DEFAULT_CRISIS_KEYWORDS;

    use super::*;

    fn default_detector() -> CrisisDetector {
        CrisisDetector::new(DEFAULT_CRISIS_KEYWORDS).unwrap()
    }

    #[test]
    fn detects_every_default_keyword_in_any_case_and_position() {
        let detector = default_detector();
        for keyword in DEFAULT_CRISIS_KEYWORDS {
            let upper = keyword.to_uppercase();
            for message in [
                keyword.to_string(),
                format!("lately I think {upper} is all I feel"),
                format!("...{keyword}"),
            ] {
                assert!(detector.detect(&message), "missed {message:?}");
            }
        }
    }

    #[test]
    fn scenario_message_is_a_crisis() {
        let detector = default_detector();
        assert_eq!(
            detector.matched_keyword("I want to END MY LIFE"),
            Some("end my life")
        );
    }

    #[test]
    fn ordinary_messages_pass() {
        let detector = default_detector();
        for message in ["I feel anxious today", "I can go on a walk", "hope you're well", ""] {
            assert!(!detector.detect(message), "false positive on {message:?}");
        }
    }

    #[test]
    fn substring_matching_has_known_false_positives() {
        // "hopelessly" contains "hopeless"; accepted behaviour.
        assert!(default_detector().detect("I'm hopelessly in love with this song"));
    }

    #[test]
    fn empty_keywords_never_match() {
        let detector = CrisisDetector::new(["", ""]).unwrap();
        assert!(detector.keywords().is_empty());
        assert!(!detector.detect("anything at all"));
    }

    #[test]
    fn configured_keywords_are_lowercased() {
        let detector = CrisisDetector::new(["Give Up"]).unwrap();
        assert!(detector.detect("i just want to give up"));
    }
}
