// Shared request-routing data model.
// Tagged variants (tier, event kind, quota status, health status, cascade
// tier) are closed enums, never free-form strings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Steered,
    Learned,
    Reflex,
    Semantic,
    Cognitive,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Steered => "steered",
            Tier::Learned => "learned",
            Tier::Reflex => "reflex",
            Tier::Semantic => "semantic",
            Tier::Cognitive => "cognitive",
        }
    }

    /// `fast -> standard -> reasoning` escalation used by the Cascade Manager.
    /// A cascade "tier" is a capability rank, distinct from the router's
    /// classification tier above — they share a word but not a type.
    pub fn next_cascade_tier(tier: CascadeTier) -> Option<CascadeTier> {
        match tier {
            CascadeTier::Fast => Some(CascadeTier::Standard),
            CascadeTier::Standard => Some(CascadeTier::Reasoning),
            CascadeTier::Reasoning => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeTier {
    Fast,
    Standard,
    Reasoning,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingContext {
    pub intent: String,
    pub api_key_hash: String,
    pub provider: String,
    pub content_length: usize,
    pub hour: u8,
    pub day_of_week: u8,
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub api_key_hash: String,
    pub request_hash: String,
    pub timestamp: i64,
    pub intent: String,
    pub complexity: String,
    pub privacy: String,
    pub tier: Tier,
    pub selected_model: String,
    pub provider: String,
    pub confidence: f64,
    pub latency_ms: u64,
    pub used_memory: bool,
    pub memory_source: Option<String>,
    pub reason: String,
}

impl RoutingDecision {
    /// Completeness invariant: every decision returned to a caller must
    /// carry a non-empty tier and model, a confidence in [0,1], a
    /// non-zero timestamp, and an `sha256:`-prefixed key hash.
    pub fn is_complete(&self) -> bool {
        !self.tier.as_str().is_empty()
            && !self.selected_model.is_empty()
            && (0.0..=1.0).contains(&self.confidence)
            && self.timestamp != 0
            && self.api_key_hash.starts_with("sha256:")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingOutcome {
    pub decision: RoutingDecision,
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub quality_score: f64,
    pub user_feedback: Option<String>,
}

/// 0 on error/failure; on success starts at 1.0 and decays with latency
/// past 1s, floored at 0.3.
pub fn calculate_quality_score(success: bool, response_time_ms: u64, had_error: bool) -> f64 {
    if !success || had_error {
        return 0.0;
    }
    let over_secs = (response_time_ms as f64 / 1000.0 - 1.0).max(0.0);
    (1.0 - 0.1 * over_secs).max(0.3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestReceived,
    RoutingDecision,
    ProviderUnavailable,
    ProviderRecovered,
    QuotaWarning,
    QuotaCritical,
    QuotaExceeded,
    HealthCheckFailed,
    ModelDiscovered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    pub event: EventKind,
    pub timestamp: i64,
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl EventContext {
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            timestamp: crate::clock::now_unix(),
            provider: None,
            model: None,
            data: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_score_decays_with_latency() {
        assert_eq!(calculate_quality_score(false, 100, false), 0.0);
        assert_eq!(calculate_quality_score(true, 500, false), 1.0);
        let at_3s = calculate_quality_score(true, 3000, false);
        assert!((at_3s - 0.8).abs() < 1e-9);
        assert_eq!(calculate_quality_score(true, 100_000, false), 0.3);
    }

    #[test]
    fn decision_completeness_invariant() {
        let d = RoutingDecision {
            api_key_hash: "sha256:abc".into(),
            request_hash: "req".into(),
            timestamp: 1,
            intent: "chat".into(),
            complexity: "low".into(),
            privacy: "none".into(),
            tier: Tier::Reflex,
            selected_model: "ollama:qwen:0.5b".into(),
            provider: "ollama".into(),
            confidence: 0.95,
            latency_ms: 1,
            used_memory: false,
            memory_source: None,
            reason: "greeting".into(),
        };
        assert!(d.is_complete());
    }
}
