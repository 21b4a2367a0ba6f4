// Reflex tier: keyword/regex rules evaluated in a fixed order — PII,
// greeting, code, math/reasoning — the first match wins.

// Pattern literals below are fixed at compile time; a failed `Regex::new`
// here is a programming error, not a runtime condition to propagate.
#![allow(clippy::expect_used)]

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflexMatch {
    Pii,
    Greeting,
    Code,
    Math,
}

impl ReflexMatch {
    pub fn intent(&self) -> &'static str {
        match self {
            ReflexMatch::Pii => "pii_detected",
            ReflexMatch::Greeting => "chat",
            ReflexMatch::Code => "coding",
            ReflexMatch::Math => "reasoning",
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            ReflexMatch::Pii => 0.99,
            ReflexMatch::Greeting => 0.95,
            ReflexMatch::Code => 0.90,
            ReflexMatch::Math => 0.85,
        }
    }

    pub fn privacy(&self) -> &'static str {
        match self {
            ReflexMatch::Pii => "pii",
            _ => "none",
        }
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("static regex is valid"))
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}[-.\s]?\d{3,4}[-.\s]?\d{4}\b").expect("static regex is valid"))
}

fn ssn_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static regex is valid"))
}

pub fn contains_pii(content: &str) -> bool {
    email_regex().is_match(content) || phone_regex().is_match(content) || ssn_regex().is_match(content)
}

fn greeting_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(hi|hello|hey|good\s+(morning|afternoon|evening))\b").expect("static regex is valid")
    })
}

fn is_greeting(content: &str) -> bool {
    greeting_regex().is_match(content) && content.split_whitespace().count() <= 6
}

const CODE_MARKERS: &[&str] = &["```", "def ", "function ", "class ", "fn ", "import ", "#include", "=>", "{\n"];

fn looks_like_code(content: &str) -> bool {
    CODE_MARKERS.iter().any(|m| content.contains(m))
}

fn math_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\bsolve\b|\bprove\b|\bderivative\b|\bintegral\b|\btheorem\b|\d+\s*[+\-*/^]\s*\d+)")
            .expect("static regex is valid")
    })
}

fn looks_like_math(content: &str) -> bool {
    math_regex().is_match(content)
}

/// Classifies `content` against the reflex rules in priority order.
/// Returns `None` when nothing matches, deferring to the semantic tier.
pub fn classify(content: &str) -> Option<ReflexMatch> {
    if contains_pii(content) {
        return Some(ReflexMatch::Pii);
    }
    if is_greeting(content) {
        return Some(ReflexMatch::Greeting);
    }
    if looks_like_code(content) {
        return Some(ReflexMatch::Code);
    }
    if looks_like_math(content) {
        return Some(ReflexMatch::Math);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pii_email_and_phone() {
        let content = "My email is test@example.com and phone 555-1234";
        assert_eq!(classify(content), Some(ReflexMatch::Pii));
    }

    #[test]
    fn detects_greeting() {
        assert_eq!(classify("hello there"), Some(ReflexMatch::Greeting));
    }

    #[test]
    fn detects_code() {
        let content = "def fibonacci(n): return n if n<=1 else fibonacci(n-1)+fibonacci(n-2)";
        assert_eq!(classify(content), Some(ReflexMatch::Code));
    }

    #[test]
    fn detects_math() {
        assert_eq!(classify("please solve for x: 2x + 3 = 7"), Some(ReflexMatch::Math));
    }

    #[test]
    fn falls_through_to_none_for_unmatched_content() {
        assert_eq!(classify("what is the capital of France"), None);
    }

    #[test]
    fn pii_takes_priority_over_other_patterns() {
        let content = "hello, my email is a@b.com and here's some code: def f(): pass";
        assert_eq!(classify(content), Some(ReflexMatch::Pii));
    }
}
