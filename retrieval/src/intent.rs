//! Binning intent detection.
//!
//! Decides whether a question is about semiconductor binning, which gates the
//! secondary (research paper) source. Matching is case-insensitive and
//! Unicode word-boundary aware, so "binary", "cabin" and "combine" never
//! count as the term "bin".

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Multi-word phrases, checked first so the reported match is the most
/// specific one.
const PHRASES: &[(&str, &str)] = &[
    ("bin yield", r"bin\s+yield"),
    ("binning yield", r"binning\s+yield"),
    ("test bin", r"test\s+bins?"),
    ("product bin", r"product\s+bins?"),
    ("bin distribution", r"bin\s+distributions?"),
    ("bin map", r"bin\s+maps?"),
    ("bin split", r"bin\s+splits?"),
    ("speed bin", r"speed\s+bins?"),
    ("yield bin", r"yield\s+bins?"),
];

/// The root term with its plural and participle forms.
const ROOT: (&str, &str) = ("bin", r"bin(?:s|ned|ning)?");

/// Term pairs that indicate binning when both appear, in any order.
const PAIRS: &[(&str, &str)] = &[("sort", "yield"), ("die", "grade"), ("wafer", "sort")];

static DEFAULT: LazyLock<IntentClassifier> = LazyLock::new(IntentClassifier::new);

/// Classify with the default rules.
pub fn classify(question: &str) -> bool {
    DEFAULT.classify(question)
}

/// Outcome of classification with the rule that fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentDecision {
    pub activated: bool,
    pub matched: Option<String>,
}

#[derive(Debug, Clone)]
enum Rule {
    Pattern { name: String, regex: Regex },
    Pair { name: String, first: Regex, second: Regex },
}

impl Rule {
    fn matches(&self, question: &str) -> Option<&str> {
        match self {
            Rule::Pattern { name, regex } => regex.is_match(question).then_some(name.as_str()),
            Rule::Pair {
                name,
                first,
                second,
            } => (first.is_match(question) && second.is_match(question)).then_some(name.as_str()),
        }
    }
}

/// Rule-based binning classifier.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rules: Vec<Rule>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    /// Classifier with the built-in binning vocabulary.
    pub fn new() -> Self {
        let mut rules = Vec::new();

        for (name, pattern) in PHRASES.iter().chain(std::iter::once(&ROOT)) {
            if let Some(regex) = word_regex(pattern) {
                rules.push(Rule::Pattern {
                    name: (*name).to_string(),
                    regex,
                });
            }
        }

        for (a, b) in PAIRS {
            if let (Some(first), Some(second)) = (word_regex(a), word_regex(b)) {
                rules.push(Rule::Pair {
                    name: format!("{a} + {b}"),
                    first,
                    second,
                });
            }
        }

        Self { rules }
    }

    /// Add a whole-word pattern. An invalid pattern is ignored.
    pub fn with_pattern(mut self, name: impl Into<String>, pattern: &str) -> Self {
        let name = name.into();
        match word_regex(pattern) {
            Some(regex) => self.rules.push(Rule::Pattern { name, regex }),
            None => debug!("skipping invalid intent pattern {name}: {pattern}"),
        }
        self
    }

    /// Whether the question is binning-related.
    pub fn classify(&self, question: &str) -> bool {
        self.classify_detailed(question).activated
    }

    /// Classify and report which rule matched.
    pub fn classify_detailed(&self, question: &str) -> IntentDecision {
        let matched = self
            .rules
            .iter()
            .find_map(|rule| rule.matches(question))
            .map(str::to_string);

        IntentDecision {
            activated: matched.is_some(),
            matched,
        }
    }
}

/// Case-insensitive whole-word regex, or `None` if it does not compile.
fn word_regex(pattern: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b(?:{pattern})\b")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reference_questions() {
        assert!(classify("What is bin yield?"));
        assert!(!classify("How does binary search work?"));
        assert!(classify("Explain test binning procedures."));
        assert!(!classify("What is the cabin pressure?"));
    }

    #[test]
    fn test_inflections() {
        for question in [
            "Which bin failed?",
            "How many bins are there?",
            "The chips are binned into categories",
            "Show me binning results",
            "BINNING rules",
        ] {
            assert!(classify(question), "{question}");
        }
    }

    #[test]
    fn test_near_misses() {
        for question in [
            "Combine the results",
            "Robin asked about yields",
            "What is a binary tree?",
            "Check the cabinet",
            "bins_total is a variable",
            "What are the specifications for temperature?",
        ] {
            assert!(!classify(question), "{question}");
        }
    }

    #[test]
    fn test_punctuation_adjacent_terms() {
        assert!(classify("(bin) assignment"));
        assert!(classify("bin-level yield"));
        assert!(classify("What about bins?"));
        assert!(classify("\"Binning\", explained"));
    }

    #[test]
    fn test_compound_pairs() {
        assert!(classify("How does wafer sort affect throughput?"));
        assert!(classify("Yield after final sort"));
        assert!(classify("What grade does a die get?"));
        assert!(!classify("How do I sort a list?"));
        assert!(!classify("Improve wafer yield"));
    }

    #[test]
    fn test_detailed_reports_most_specific_match() {
        let classifier = IntentClassifier::new();
        assert_eq!(
            classifier.classify_detailed("What drives speed bins?"),
            IntentDecision {
                activated: true,
                matched: Some("speed bin".to_string())
            }
        );
        assert_eq!(
            classifier.classify_detailed("wafer sort results"),
            IntentDecision {
                activated: true,
                matched: Some("wafer + sort".to_string())
            }
        );
        assert_eq!(
            classifier.classify_detailed("Hello"),
            IntentDecision {
                activated: false,
                matched: None
            }
        );
    }

    #[test]
    fn test_unicode_boundaries() {
        assert!(!classify("Größenbin"));
        assert!(classify("Was ist ein bin?"));
        assert!(!classify("binärer Baum"));
    }

    #[test]
    fn test_invalid_extra_pattern_is_skipped() {
        let classifier = IntentClassifier::new()
            .with_pattern("broken", "(unclosed")
            .with_pattern("lot", "lots?");
        assert!(classifier.classify("two lots"));
        assert!(!classifier.classify("(unclosed"));
    }
}
