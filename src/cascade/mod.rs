// Cascade Manager — post-response quality-driven retry at a higher
// capability tier (`fast -> standard -> reasoning`). A list of named
// pattern checks over response text each produce a severity-scored
// quality signal.

// Pattern literals below are fixed at compile time; a failed `Regex::new`
// here is a programming error, not a runtime condition to propagate.
#![allow(clippy::expect_used)]

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::model::{CascadeTier, Tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySignal {
    pub signal_type: String,
    pub severity: f64,
    pub description: String,
}

struct Pattern {
    signal_type: &'static str,
    severity: f64,
    description: &'static str,
    critical: bool,
    check: fn(&str) -> bool,
}

fn idk_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(i\s+don'?t\s+know|i'?m\s+not\s+sure|i\s+cannot\s+(determine|answer))\b")
            .expect("static regex is valid")
    })
}

fn hallucinated_citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[\d+\]|\(source:\s*unknown\)").expect("static regex is valid"))
}

fn has_unmatched_fences(text: &str) -> bool {
    text.matches("```").count() % 2 == 1
}

fn has_idk(text: &str) -> bool {
    idk_regex().is_match(text)
}

fn has_hallucinated_citation(text: &str) -> bool {
    hallucinated_citation_regex().is_match(text) && !text.to_lowercase().contains("references")
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Pattern {
                signal_type: "i_dont_know",
                severity: 0.9,
                description: "response disclaims knowledge instead of answering",
                critical: true,
                check: has_idk,
            },
            Pattern {
                signal_type: "truncated_code",
                severity: 0.6,
                description: "response ends mid code fence",
                critical: false,
                check: has_unmatched_fences,
            },
            Pattern {
                signal_type: "unverifiable_citation",
                severity: 0.4,
                description: "response cites a source without a references section",
                critical: false,
                check: has_hallucinated_citation,
            },
        ]
    })
}

/// Scans `response` for known low-quality shapes, each mapped to a
/// `QualitySignal`.
pub struct QualitySignalDetector;

impl QualitySignalDetector {
    pub fn scan(response: &str) -> Vec<QualitySignal> {
        patterns()
            .iter()
            .filter(|p| (p.check)(response))
            .map(|p| QualitySignal {
                signal_type: p.signal_type.to_string(),
                severity: p.severity,
                description: p.description.to_string(),
            })
            .collect()
    }
}

/// `CalculateOverallQuality`: 1.0 minus the highest severity observed,
/// floored at 0 — one severe signal dominates rather than averaging away.
pub fn calculate_overall_quality(signals: &[QualitySignal]) -> f64 {
    let worst = signals.iter().map(|s| s.severity).fold(0.0_f64, f64::max);
    (1.0 - worst).max(0.0)
}

pub fn has_critical_signals(signals: &[QualitySignal]) -> bool {
    let critical_types: &[&str] = &["i_dont_know"];
    signals.iter().any(|s| critical_types.contains(&s.signal_type.as_str()) && s.severity >= 0.8)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeResult {
    pub original_tier: CascadeTier,
    pub final_tier: CascadeTier,
    pub cascade_count: u32,
    pub total_latency_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CascadeEvaluation {
    pub should_cascade: bool,
    pub next_tier: Option<CascadeTier>,
    pub quality: f64,
}

/// Evaluates one response: accept if quality clears `quality_threshold`
/// and no critical signal fired, else propose the next capability tier.
pub fn evaluate_response(response: &str, tier: CascadeTier, quality_threshold: f64) -> CascadeEvaluation {
    let signals = QualitySignalDetector::scan(response);
    let quality = calculate_overall_quality(&signals);
    let critical = has_critical_signals(&signals);

    if quality >= quality_threshold && !critical {
        return CascadeEvaluation { should_cascade: false, next_tier: None, quality };
    }

    match Tier::next_cascade_tier(tier) {
        Some(next) => CascadeEvaluation { should_cascade: true, next_tier: Some(next), quality },
        None => CascadeEvaluation { should_cascade: false, next_tier: None, quality },
    }
}

/// Tracks in-flight cascade attempts for one request and enforces
/// `max_cascades` (default 2). Metrics are atomic counters so a shared
/// tracker can be read concurrently without locking.
pub struct CascadeTracker {
    max_cascades: u32,
    total_cascades: AtomicU64,
    total_requests: AtomicU64,
    attempts: AtomicU32,
}

impl CascadeTracker {
    pub fn new(max_cascades: u32) -> Self {
        Self {
            max_cascades,
            total_cascades: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Runs the cascade loop for one request, invoking `respond` once per
    /// tier attempted; stops when the response is accepted, the tier chain
    /// is exhausted, or `max_cascades` attempts have been made.
    pub fn run<F>(&self, original_tier: CascadeTier, quality_threshold: f64, mut respond: F) -> CascadeResult
    where
        F: FnMut(CascadeTier) -> (String, u64),
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.attempts.store(0, Ordering::Relaxed);

        let mut tier = original_tier;
        let mut total_latency_ms = 0u64;
        let mut cascade_count = 0u32;

        loop {
            let (response, latency_ms) = respond(tier);
            total_latency_ms += latency_ms;
            let eval = evaluate_response(&response, tier, quality_threshold);

            if !eval.should_cascade || cascade_count >= self.max_cascades {
                return CascadeResult {
                    original_tier,
                    final_tier: tier,
                    cascade_count,
                    total_latency_ms,
                    success: !eval.should_cascade,
                };
            }

            let Some(next) = eval.next_tier else {
                return CascadeResult {
                    original_tier,
                    final_tier: tier,
                    cascade_count,
                    total_latency_ms,
                    success: false,
                };
            };

            tier = next;
            cascade_count += 1;
            self.total_cascades.fetch_add(1, Ordering::Relaxed);
            self.attempts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_cascades(&self) -> u64 {
        self.total_cascades.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idk_response_triggers_cascade_to_standard() {
        let eval = evaluate_response("I don't know the answer to that.", CascadeTier::Fast, 0.7);
        assert!(eval.should_cascade);
        assert_eq!(eval.next_tier, Some(CascadeTier::Standard));
    }

    #[test]
    fn high_quality_response_is_accepted() {
        let eval = evaluate_response("The capital of France is Paris.", CascadeTier::Fast, 0.7);
        assert!(!eval.should_cascade);
    }

    #[test]
    fn reasoning_tier_has_nowhere_left_to_cascade() {
        let eval = evaluate_response("I don't know.", CascadeTier::Reasoning, 0.7);
        assert!(!eval.should_cascade);
        assert_eq!(eval.next_tier, None);
    }

    #[test]
    fn tracker_stops_after_max_cascades() {
        let tracker = CascadeTracker::new(2);
        let mut calls = 0;
        let result = tracker.run(CascadeTier::Fast, 0.99, |_tier| {
            calls += 1;
            ("I don't know.".to_string(), 10)
        });
        assert_eq!(calls, 3); // original + 2 cascades
        assert_eq!(result.cascade_count, 2);
        assert!(!result.success);
    }

    #[test]
    fn tracker_accepts_once_quality_clears_threshold() {
        let tracker = CascadeTracker::new(2);
        let mut calls = 0;
        let result = tracker.run(CascadeTier::Fast, 0.7, |tier| {
            calls += 1;
            match tier {
                CascadeTier::Fast => ("I don't know.".to_string(), 5),
                _ => ("Here is a complete, confident answer.".to_string(), 5),
            }
        });
        assert_eq!(calls, 2);
        assert!(result.success);
        assert_eq!(result.final_tier, CascadeTier::Standard);
    }
}
