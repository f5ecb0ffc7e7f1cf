//! Rule-based question detection over the raw query string.
//!
//! Interrogative queries skip the multi-source fan-out and go to the
//! deep research path instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static STARTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^what\s",
        r"^why\s",
        r"^how\s",
        r"^when\s",
        r"^where\s",
        r"^who\s",
        r"^which\s",
        r"^can\s+you\s+(explain|tell|describe)",
        r"^could\s+you\s+(explain|tell|describe)",
        r"^tell\s+me\s+about",
        r"^explain\s",
        r"^describe\s",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("valid starter pattern"))
    .collect()
});

static PHRASE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"history\s+of\s+",
        r"story\s+of\s+",
        r"origin\s+of\s+",
        r"significance\s+of\s+",
        r"importance\s+of\s+",
        r"meaning\s+of\s+",
        r"purpose\s+of\s+",
        r"reason\s+for\s+",
        r"cause\s+of\s+",
        r"impact\s+of\s+",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("valid phrase pattern"))
    .collect()
});

static OF_SUBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bof\s+(?:the\s+)?([A-Z][A-Za-z\s,\-']+?)(?:\?|$|,|\s+in\s+|\s+at\s+)")
        .expect("valid subject pattern")
});

static ABOUT_SUBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\babout\s+(?:the\s+)?([A-Z][A-Za-z\s,\-']+?)(?:\?|$|,|\s+in\s+|\s+at\s+)")
        .expect("valid subject pattern")
});

static CAPITALIZED_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)\b").expect("valid run pattern"));

static TRAILING_FILLER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(and|or|but|with|from|to|for|by)\s*$").expect("valid filler pattern")
});

const QUESTION_WORDS: [&str; 10] =
    ["What", "Why", "How", "When", "Where", "Who", "Which", "Tell", "Explain", "Describe"];

#[derive(Debug, Clone, Serialize)]
pub struct QuestionDetection {
    pub is_question: bool,
    pub confidence: f64,
    pub question_type: Option<String>,
    /// Probable subject/location the question is about
    pub subject: Option<String>,
}

pub struct QuestionDetector;

impl QuestionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Score the query: trailing `?` +0.5, question starter +0.4,
    /// question phrase +0.3. Classified as a question at confidence 0.3,
    /// or on a trailing `?` with more than two tokens.
    pub fn detect(&self, text: &str) -> QuestionDetection {
        let text = text.trim();
        if text.is_empty() {
            return QuestionDetection {
                is_question: false,
                confidence: 0.0,
                question_type: None,
                subject: None,
            };
        }

        let mut confidence: f64 = 0.0;
        let mut question_type = None;

        let ends_with_question_mark = text.ends_with('?');
        if ends_with_question_mark {
            confidence += 0.5;
        }

        for pattern in STARTER_PATTERNS.iter() {
            if let Some(matched) = pattern.find(text) {
                question_type = matched
                    .as_str()
                    .split_whitespace()
                    .next()
                    .map(|w| w.to_lowercase());
                confidence += 0.4;
                break;
            }
        }

        if PHRASE_PATTERNS.iter().any(|p| p.is_match(text)) {
            confidence += 0.3;
        }

        let token_count = text.split_whitespace().count();
        let is_question =
            confidence >= 0.3 || (ends_with_question_mark && token_count > 2);

        let subject = if is_question { extract_subject(text) } else { None };

        tracing::debug!(
            "Question detection: is_question={} confidence={:.1} type={:?}",
            is_question,
            confidence,
            question_type
        );

        QuestionDetection {
            is_question,
            confidence: confidence.min(1.0),
            question_type,
            subject,
        }
    }
}

impl Default for QuestionDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the probable subject out of a question:
/// "What's the history of Tokyo?" -> "Tokyo".
fn extract_subject(question: &str) -> Option<String> {
    for pattern in [&*OF_SUBJECT_RE, &*ABOUT_SUBJECT_RE] {
        if let Some(caps) = pattern.captures(question) {
            let subject = TRAILING_FILLER_RE.replace(caps[1].trim(), "").to_string();
            if !subject.is_empty() {
                return Some(subject);
            }
        }
    }

    // Fall back to the longest run of capitalized words; on a length tie
    // the first-seen run wins
    CAPITALIZED_RUN_RE
        .captures_iter(question)
        .map(|c| c[1].to_string())
        .filter(|run| !QUESTION_WORDS.contains(&run.as_str()))
        .fold(None, |best: Option<String>, run| match best {
            Some(best) if run.len() > best.len() => Some(run),
            Some(best) => Some(best),
            None => Some(run),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_mark_and_starter() {
        let detector = QuestionDetector::new();
        let result = detector.detect("Why did the Roman Empire fall?");
        assert!(result.is_question);
        assert!(result.confidence >= 0.9);
        assert_eq!(result.question_type.as_deref(), Some("why"));
        assert_eq!(result.subject.as_deref(), Some("Roman Empire"));
    }

    #[test]
    fn phrase_without_question_mark() {
        let detector = QuestionDetector::new();
        let result = detector.detect("history of the Eiffel Tower");
        assert!(result.is_question);
        assert_eq!(result.subject.as_deref(), Some("Eiffel Tower"));
    }

    #[test]
    fn tell_me_about_counts_as_starter() {
        let detector = QuestionDetector::new();
        let result = detector.detect("Tell me about Kyoto");
        assert!(result.is_question);
        assert_eq!(result.question_type.as_deref(), Some("tell"));
        assert_eq!(result.subject.as_deref(), Some("Kyoto"));
    }

    #[test]
    fn subject_tie_keeps_the_first_proper_noun() {
        let detector = QuestionDetector::new();
        // "Tokyo" and "Paris" tie on length; the earlier one wins
        let result = detector.detect("Why do Tokyo and Paris differ?");
        assert!(result.is_question);
        assert_eq!(result.subject.as_deref(), Some("Tokyo"));
    }

    #[test]
    fn plain_place_is_not_a_question() {
        let detector = QuestionDetector::new();
        assert!(!detector.detect("Paris, France").is_question);
        assert!(!detector.detect("Reykjavik").is_question);
    }

    #[test]
    fn trailing_question_mark_alone_classifies() {
        let detector = QuestionDetector::new();
        let result = detector.detect("Is Reykjavik expensive?");
        assert!(result.is_question);
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_input() {
        let detector = QuestionDetector::new();
        let result = detector.detect("  ");
        assert!(!result.is_question);
        assert_eq!(result.confidence, 0.0);
    }
}
