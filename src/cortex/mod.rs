// Cortex Router — the tiered classifier that decides a (model, provider)
// pair for every request: Steered -> Learned (memory) -> Reflex ->
// Semantic -> Cognitive, first tier to produce a candidate wins. Holds
// `Arc`-shared handles to every other subsystem rather than owning them
// outright.

pub mod reflex;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CortexResult;
use crate::hooks::EventBus;
use crate::memory::MemoryManager;
use crate::model::{EventContext, EventKind, RoutingContext, RoutingDecision, Tier};
use crate::registry::ModelRegistry;
use crate::steering::SteeringEngine;

#[derive(Debug, Clone, Default)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Inbound request to the router. `blocked_models` lets a caller that
/// already tried and failed to dispatch to a model ask the router to
/// escalate past it, without the router itself ever erroring.
#[derive(Debug, Clone, Default)]
pub struct RoutingRequest {
    pub content: Option<String>,
    pub messages: Vec<Message>,
    pub api_key: String,
    pub metadata: HashMap<String, String>,
    pub blocked_models: Vec<String>,
}

fn extract_content(request: &RoutingRequest) -> String {
    if let Some(content) = &request.content {
        if !content.is_empty() {
            return content.clone();
        }
    }
    request
        .messages
        .iter()
        .filter(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Static intent -> model mapping consulted by the learned-preference,
/// semantic, and cognitive tiers when no per-user override exists. Reflex
/// carries its own fixed mapping.
#[derive(Debug, Clone)]
pub struct IntentCatalog {
    models: HashMap<String, String>,
}

impl IntentCatalog {
    pub fn default_catalog() -> Self {
        let mut models = HashMap::new();
        models.insert("pii_detected".to_string(), "ollama:qwen2.5:0.5b".to_string());
        models.insert("chat".to_string(), "ollama:qwen:0.5b".to_string());
        models.insert("coding".to_string(), "claudecli:claude-sonnet-4".to_string());
        models.insert("reasoning".to_string(), "claudecli:claude-opus-4".to_string());
        models.insert("factual".to_string(), "ollama:qwen2.5:7b".to_string());
        Self { models }
    }

    pub fn model_for(&self, intent: &str) -> Option<String> {
        self.models.get(intent).cloned()
    }

    pub fn set(&mut self, intent: impl Into<String>, model: impl Into<String>) {
        self.models.insert(intent.into(), model.into());
    }

    /// Cognitive tier's fallback when the classifier names an intent this
    /// catalog has no mapping for — a routing call never fails.
    pub fn default_fallback_model(&self) -> String {
        self.models
            .get("factual")
            .cloned()
            .unwrap_or_else(|| "ollama:qwen2.5:7b".to_string())
    }
}

impl Default for IntentCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

/// One entry of the semantic tier's reference catalog: an intent, its
/// mapped model, and a precomputed embedding of a representative utterance.
#[derive(Debug, Clone)]
pub struct SemanticEntry {
    pub intent: String,
    pub model: String,
    pub embedding: Vec<f32>,
}

#[async_trait::async_trait]
pub trait EmbeddingEngine: Send + Sync {
    async fn embed(&self, text: &str) -> CortexResult<Vec<f32>>;
}

/// What a semantic cache hands back on a hit: the model and provider of the
/// *originally cached decision*, never a placeholder string.
#[derive(Debug, Clone)]
pub struct CachedRouting {
    pub selected_model: String,
    pub provider: String,
}

#[async_trait::async_trait]
pub trait SemanticCache: Send + Sync {
    async fn lookup(&self, request_hash: &str) -> CortexResult<Option<CachedRouting>>;
    async fn store(&self, request_hash: &str, decision: &RoutingDecision) -> CortexResult<()>;
}

#[derive(Debug, Clone)]
pub struct CognitiveClassification {
    pub intent: String,
    pub complexity: String,
    pub privacy: String,
    pub confidence: f64,
}

#[async_trait::async_trait]
pub trait CognitiveClassifier: Send + Sync {
    async fn classify(&self, content: &str) -> CortexResult<CognitiveClassification>;
}

/// `adjusted = clamp(base + learnedBonus + providerBias*0.1 + timeBonus, 0, 1)`,
/// applied once per decision.
pub fn adjust_confidence(base: f64, has_learned_preference: bool, provider_bias: f64, is_time_pattern_match: bool) -> f64 {
    let adjusted = base
        + if has_learned_preference { 0.15 } else { 0.0 }
        + provider_bias * 0.1
        + if is_time_pattern_match { 0.10 } else { 0.0 };
    adjusted.clamp(0.0, 1.0)
}

/// `coding` peaks 09:00-17:00, `chat` 18:00-22:00, `reasoning` 10:00-16:00 —
/// used when no explicit learned pattern exists. Reused by the Learning
/// Engine's peak-intent detection.
pub fn is_time_pattern_match(intent: &str, hour: u8) -> bool {
    match intent {
        "coding" => (9..17).contains(&hour),
        "chat" => (18..22).contains(&hour),
        "reasoning" => (10..16).contains(&hour),
        _ => false,
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

fn provider_of(model: &str) -> String {
    model.split_once(':').map(|(p, _)| p.to_string()).unwrap_or_else(|| model.to_string())
}

struct Candidate {
    tier: Tier,
    selected_model: String,
    base_confidence: f64,
    memory_source: Option<String>,
    used_memory: bool,
    intent: String,
    privacy: String,
    complexity: String,
    reason: String,
}

/// What `route()` hands back to a dispatcher. `RoutingDecision` is the
/// persisted, spec-shaped record; a steering rule can additionally inject a
/// system prompt and override metadata (§4.4's `ApplySteering(ctx, messages,
/// metadata, rules)`) even when it names no `primary_model`, and that has no
/// field on `RoutingDecision` to live in. Surfaced here instead so it
/// actually reaches the caller rather than being silently dropped.
#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub decision: RoutingDecision,
    pub injected_system_message: Option<String>,
    pub metadata: HashMap<String, String>,
}

pub struct CortexRouter {
    steering: Arc<SteeringEngine>,
    memory: Arc<MemoryManager>,
    registry: Arc<ModelRegistry>,
    bus: Arc<EventBus>,
    embedding: Option<Arc<dyn EmbeddingEngine>>,
    semantic_cache: Option<Arc<dyn SemanticCache>>,
    cognitive: Option<Arc<dyn CognitiveClassifier>>,
    semantic_catalog: RwLock<Vec<SemanticEntry>>,
    intent_catalog: IntentCatalog,
    semantic_threshold: f64,
}

impl CortexRouter {
    pub fn new(
        steering: Arc<SteeringEngine>,
        memory: Arc<MemoryManager>,
        registry: Arc<ModelRegistry>,
        bus: Arc<EventBus>,
        semantic_threshold: f64,
    ) -> Self {
        Self {
            steering,
            memory,
            registry,
            bus,
            embedding: None,
            semantic_cache: None,
            cognitive: None,
            semantic_catalog: RwLock::new(Vec::new()),
            intent_catalog: IntentCatalog::default_catalog(),
            semantic_threshold,
        }
    }

    pub fn with_embedding_engine(mut self, engine: Arc<dyn EmbeddingEngine>) -> Self {
        self.embedding = Some(engine);
        self
    }

    pub fn with_semantic_cache(mut self, cache: Arc<dyn SemanticCache>) -> Self {
        self.semantic_cache = Some(cache);
        self
    }

    pub fn with_cognitive_classifier(mut self, classifier: Arc<dyn CognitiveClassifier>) -> Self {
        self.cognitive = Some(classifier);
        self
    }

    pub fn set_semantic_catalog(&self, entries: Vec<SemanticEntry>) {
        *self.semantic_catalog.write() = entries;
    }

    pub fn intent_catalog(&self) -> &IntentCatalog {
        &self.intent_catalog
    }

    /// Lets a dispatcher check effective availability before committing to
    /// a decision this router returned, to support blocked-model
    /// escalation.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// `Route`: never returns an error. Records the decision into Memory
    /// and publishes a `RoutingDecision` event before returning; both are
    /// best-effort and logged, never propagated into the request path.
    pub async fn route(&self, request: &RoutingRequest) -> RoutingResult {
        let wall_start = std::time::Instant::now();
        let now = crate::clock::now_unix();
        let content = extract_content(request);
        let request_hash = crate::hashing::hash_content(&content);
        let api_key_hash = crate::hashing::hash_api_key(&request.api_key);
        let (hour, day_of_week) = hour_and_weekday(now);

        let reflex_match = reflex::classify(&content);
        let tentative_intent = reflex_match.map(|m| m.intent().to_string()).unwrap_or_else(|| "factual".to_string());

        let ctx = RoutingContext {
            intent: tentative_intent.clone(),
            api_key_hash: api_key_hash.clone(),
            provider: String::new(),
            content_length: content.len(),
            hour,
            day_of_week,
            timestamp: now,
            metadata: request.metadata.clone(),
        };

        let preferences = self.memory.get_user_preferences(&api_key_hash).unwrap_or(None);

        let steering_matches = self.steering.find_matching_rules(&ctx);
        let steering_outcome = if steering_matches.is_empty() {
            None
        } else {
            Some(self.steering.apply_steering(&ctx, &steering_matches))
        };

        let mut candidate = steering_outcome
            .as_ref()
            .and_then(|outcome| self.steered_candidate(outcome, &ctx));
        if candidate.is_none() {
            candidate = self.learned_candidate(&ctx, preferences.as_ref(), request);
        }
        if candidate.is_none() {
            candidate = self.reflex_candidate(reflex_match, request);
        }
        if candidate.is_none() {
            candidate = self.semantic_candidate(&content, request).await;
        }
        let candidate = match candidate {
            Some(c) => c,
            None => self.cognitive_candidate(&content, request).await,
        };

        let provider = provider_of(&candidate.selected_model);
        let has_learned_preference = preferences
            .as_ref()
            .map(|p| p.model_preferences.contains_key(&candidate.intent))
            .unwrap_or(false);
        let provider_bias = preferences
            .as_ref()
            .and_then(|p| p.provider_bias.get(&provider).copied())
            .unwrap_or(0.0);
        // The time-pattern bonus only applies once a learned preference for
        // this intent actually exists — otherwise a memory-less reflex
        // decision (S2, S3) would drift off its fixed confidence for a
        // several-hour window every day purely by coincidence of the clock.
        let is_time_match = has_learned_preference && is_time_pattern_match(&candidate.intent, hour);
        let confidence = if matches!(candidate.tier, Tier::Steered) {
            candidate.base_confidence
        } else {
            adjust_confidence(candidate.base_confidence, has_learned_preference, provider_bias, is_time_match)
        };

        let decision = RoutingDecision {
            api_key_hash,
            request_hash,
            timestamp: now,
            intent: candidate.intent,
            complexity: candidate.complexity,
            privacy: candidate.privacy,
            tier: candidate.tier,
            selected_model: candidate.selected_model,
            provider,
            confidence,
            latency_ms: wall_start.elapsed().as_millis() as u64,
            used_memory: candidate.used_memory,
            memory_source: candidate.memory_source,
            reason: candidate.reason,
        };

        if let Err(e) = self.memory.record_routing(&decision) {
            log::warn!("failed to record routing decision: {e}");
        }

        let event = EventContext::new(EventKind::RoutingDecision)
            .with_provider(decision.provider.clone())
            .with_model(decision.selected_model.clone())
            .with_data("tier", decision.tier.as_str())
            .with_data("intent", decision.intent.clone());
        self.bus.publish_async(event);

        let mut metadata = request.metadata.clone();
        let mut injected_system_message = None;
        if let Some(outcome) = steering_outcome {
            for (k, v) in outcome.metadata_overrides {
                metadata.insert(k, v);
            }
            injected_system_message = outcome.context_injection;
        }

        RoutingResult {
            decision,
            injected_system_message,
            metadata,
        }
    }

    fn steered_candidate(&self, outcome: &crate::steering::SteeringOutcome, ctx: &RoutingContext) -> Option<Candidate> {
        let model = outcome.selected_model.clone()?;
        Some(Candidate {
            tier: Tier::Steered,
            selected_model: model,
            base_confidence: 1.0,
            memory_source: None,
            used_memory: false,
            intent: ctx.intent.clone(),
            privacy: "none".to_string(),
            complexity: "unknown".to_string(),
            reason: "steering rule matched".to_string(),
        })
    }

    fn learned_candidate(
        &self,
        ctx: &RoutingContext,
        preferences: Option<&crate::memory::UserPreferences>,
        request: &RoutingRequest,
    ) -> Option<Candidate> {
        let intent = &ctx.intent;
        let prefs = preferences?;
        let model = prefs.model_preferences.get(intent)?;
        if request.blocked_models.contains(model) {
            return None;
        }
        Some(Candidate {
            tier: Tier::Learned,
            selected_model: model.clone(),
            base_confidence: 0.85,
            memory_source: Some("preferences".to_string()),
            used_memory: true,
            intent: intent.clone(),
            privacy: "none".to_string(),
            complexity: "unknown".to_string(),
            reason: "learned user preference".to_string(),
        })
    }

    fn reflex_candidate(&self, reflex_match: Option<reflex::ReflexMatch>, request: &RoutingRequest) -> Option<Candidate> {
        let m = reflex_match?;
        let model = self.intent_catalog.model_for(m.intent())?;
        if request.blocked_models.contains(&model) {
            return None;
        }
        Some(Candidate {
            tier: Tier::Reflex,
            selected_model: model,
            base_confidence: m.confidence(),
            memory_source: None,
            used_memory: false,
            intent: m.intent().to_string(),
            privacy: m.privacy().to_string(),
            complexity: "low".to_string(),
            reason: format!("reflex match: {}", m.intent()),
        })
    }

    async fn semantic_candidate(&self, content: &str, request: &RoutingRequest) -> Option<Candidate> {
        // Learned-tier cache lookup lives here rather than in
        // `learned_candidate` because it needs an async round-trip; the
        // cache hit still reports `tier = learned`.
        if let Some(cache) = &self.semantic_cache {
            let hash = crate::hashing::hash_content(content);
            if let Ok(Some(cached)) = cache.lookup(&hash).await {
                if !request.blocked_models.contains(&cached.selected_model) {
                    return Some(Candidate {
                        tier: Tier::Learned,
                        selected_model: cached.selected_model,
                        base_confidence: 0.95,
                        memory_source: Some("cache".to_string()),
                        used_memory: true,
                        intent: "cached".to_string(),
                        privacy: "none".to_string(),
                        complexity: "unknown".to_string(),
                        reason: "semantic cache hit".to_string(),
                    });
                }
            }
        }

        let embedding = self.embedding.as_ref()?;
        let catalog = self.semantic_catalog.read().clone();
        if catalog.is_empty() {
            return None;
        }
        let query = embedding.embed(content).await.ok()?;
        let best = catalog
            .iter()
            .map(|entry| (entry, cosine_similarity(&query, &entry.embedding)))
            .filter(|(_, sim)| *sim >= self.semantic_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let (entry, similarity) = best;
        if request.blocked_models.contains(&entry.model) {
            return None;
        }
        Some(Candidate {
            tier: Tier::Semantic,
            selected_model: entry.model.clone(),
            base_confidence: similarity,
            memory_source: None,
            used_memory: false,
            intent: entry.intent.clone(),
            privacy: "none".to_string(),
            complexity: "unknown".to_string(),
            reason: format!("semantic match: {} ({:.2})", entry.intent, similarity),
        })
    }

    async fn cognitive_candidate(&self, content: &str, request: &RoutingRequest) -> Candidate {
        if let Some(classifier) = &self.cognitive {
            if let Ok(result) = classifier.classify(content).await {
                let model = self
                    .intent_catalog
                    .model_for(&result.intent)
                    .unwrap_or_else(|| self.intent_catalog.default_fallback_model());
                if !request.blocked_models.contains(&model) {
                    return Candidate {
                        tier: Tier::Cognitive,
                        selected_model: model,
                        base_confidence: result.confidence,
                        memory_source: None,
                        used_memory: false,
                        intent: result.intent,
                        privacy: result.privacy,
                        complexity: result.complexity,
                        reason: "cognitive classification".to_string(),
                    };
                }
            }
        }
        Candidate {
            tier: Tier::Cognitive,
            selected_model: self.intent_catalog.default_fallback_model(),
            base_confidence: 0.60,
            memory_source: None,
            used_memory: false,
            intent: "factual".to_string(),
            privacy: "none".to_string(),
            complexity: "unknown".to_string(),
            reason: "cognitive fallback".to_string(),
        }
    }
}

fn hour_and_weekday(timestamp: i64) -> (u8, u8) {
    use chrono::{Datelike, Timelike};
    let dt = chrono::DateTime::from_timestamp(timestamp, 0).unwrap_or_default();
    (dt.hour() as u8, dt.weekday().num_days_from_monday() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::EventBus;
    use std::path::PathBuf;

    fn router(base: PathBuf) -> CortexRouter {
        router_with_steering(base, Arc::new(SteeringEngine::new()))
    }

    fn router_with_steering(base: PathBuf, steering: Arc<SteeringEngine>) -> CortexRouter {
        let memory = Arc::new(MemoryManager::new(base, 90, 64).unwrap());
        let registry = Arc::new(ModelRegistry::new(300));
        let bus = Arc::new(EventBus::new(16));
        CortexRouter::new(steering, memory, registry, bus, 0.85)
    }

    #[tokio::test]
    async fn pii_content_routes_to_reflex_tier_with_fixed_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(dir.path().to_path_buf());
        let req = RoutingRequest {
            content: Some("My email is test@example.com and phone 555-1234".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_eq!(decision.tier, Tier::Reflex);
        assert_eq!(decision.intent, "pii_detected");
        assert_eq!(decision.privacy, "pii");
        assert_eq!(decision.provider, "ollama");
        assert!((decision.confidence - 0.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn greeting_routes_to_exact_reflex_model() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(dir.path().to_path_buf());
        let req = RoutingRequest {
            content: Some("hello there".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_eq!(decision.tier, Tier::Reflex);
        assert_eq!(decision.selected_model, "ollama:qwen:0.5b");
        assert!((decision.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn code_content_routes_to_claude_sonnet() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(dir.path().to_path_buf());
        let req = RoutingRequest {
            content: Some("def fibonacci(n): return n if n<=1 else fibonacci(n-1)+fibonacci(n-2)".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_eq!(decision.tier, Tier::Reflex);
        assert_eq!(decision.selected_model, "claudecli:claude-sonnet-4");
    }

    #[tokio::test]
    async fn learned_preference_overrides_reflex_for_same_user() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(dir.path().to_path_buf());
        let api_key = "sk-specific-user";
        let api_key_hash = crate::hashing::hash_api_key(api_key);
        r.memory
            .update_user_preferences(&crate::memory::UserPreferences {
                api_key_hash: api_key_hash.clone(),
                model_preferences: [("coding".to_string(), "geminicli:gemini-2.5-pro".to_string())].into(),
                last_updated: crate::clock::now_unix(),
                ..Default::default()
            })
            .unwrap();

        let req = RoutingRequest {
            content: Some("def add(a, b): return a + b".to_string()),
            api_key: api_key.to_string(),
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_eq!(decision.tier, Tier::Learned);
        assert_eq!(decision.selected_model, "geminicli:gemini-2.5-pro");
        assert_eq!(decision.memory_source.as_deref(), Some("preferences"));
    }

    #[tokio::test]
    async fn steering_rule_overrides_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let steering_dir = dir.path().join("steering");
        std::fs::create_dir_all(&steering_dir).unwrap();
        std::fs::write(
            steering_dir.join("code.yaml"),
            "name: code\nactivation:\n  condition: \"Intent == 'coding'\"\n  priority: 100\npreferences:\n  primary_model: claudecli:claude-opus-4\n  override_router: true\n",
        )
        .unwrap();

        let steering = Arc::new(SteeringEngine::new());
        steering.load_dir(&steering_dir).unwrap();
        let memory = Arc::new(MemoryManager::new(dir.path().join("memory"), 90, 64).unwrap());
        let registry = Arc::new(ModelRegistry::new(300));
        let bus = Arc::new(EventBus::new(16));
        let r = CortexRouter::new(steering, memory, registry, bus, 0.85);

        let req = RoutingRequest {
            content: Some("def add(a, b): return a + b".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_eq!(decision.tier, Tier::Steered);
        assert_eq!(decision.selected_model, "claudecli:claude-opus-4");
        assert_eq!(decision.confidence, 1.0);
    }

    /// A rule that matches but sets only `context_injection` (no
    /// `primary_model`) yields no steered candidate — routing falls through
    /// to a lower tier — but the injected system prompt and any
    /// `provider_settings` must still surface on the `RoutingResult` for the
    /// dispatcher to apply, not be silently dropped.
    #[tokio::test]
    async fn context_injection_without_primary_model_still_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let steering_dir = dir.path().join("steering");
        std::fs::create_dir_all(&steering_dir).unwrap();
        std::fs::write(
            steering_dir.join("inject.yaml"),
            "name: inject\nactivation:\n  condition: \"Intent == 'chat'\"\n  priority: 10\npreferences:\n  context_injection: \"Be concise.\"\n  provider_settings:\n    temperature: \"0.2\"\n",
        )
        .unwrap();

        let steering = Arc::new(SteeringEngine::new());
        steering.load_dir(&steering_dir).unwrap();
        let r = router_with_steering(dir.path().join("memory"), steering);

        let req = RoutingRequest {
            content: Some("hello there".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let result = r.route(&req).await;

        assert_eq!(result.decision.tier, Tier::Reflex);
        assert_eq!(result.injected_system_message.as_deref(), Some("Be concise."));
        assert_eq!(result.metadata.get("temperature").map(String::as_str), Some("0.2"));
    }

    #[tokio::test]
    async fn unclassifiable_content_falls_through_to_cognitive_default() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(dir.path().to_path_buf());
        let req = RoutingRequest {
            content: Some("what is the capital of France".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_eq!(decision.tier, Tier::Cognitive);
        assert_eq!(decision.intent, "factual");
        assert!((decision.confidence - 0.60).abs() < 1e-9);
    }

    #[tokio::test]
    async fn blocked_model_escalates_past_reflex_tier() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(dir.path().to_path_buf());
        let req = RoutingRequest {
            content: Some("hello there".to_string()),
            api_key: "sk-test".to_string(),
            blocked_models: vec!["ollama:qwen:0.5b".to_string()],
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_ne!(decision.tier, Tier::Reflex);
    }

    #[test]
    fn confidence_adjustment_matches_formula() {
        let adjusted = adjust_confidence(0.85, true, 0.5, false);
        assert!((adjusted - (0.85 + 0.15 + 0.05)).abs() < 1e-9);
        assert_eq!(adjust_confidence(0.99, true, 1.0, true), 1.0);
    }

    #[test]
    fn time_pattern_matches_documented_windows() {
        assert!(is_time_pattern_match("coding", 10));
        assert!(!is_time_pattern_match("coding", 20));
        assert!(is_time_pattern_match("chat", 19));
        assert!(is_time_pattern_match("reasoning", 11));
    }

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingEngine for StubEmbedder {
        async fn embed(&self, text: &str) -> CortexResult<Vec<f32>> {
            if text.contains("weather") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    #[tokio::test]
    async fn semantic_tier_matches_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let r = router(dir.path().to_path_buf()).with_embedding_engine(Arc::new(StubEmbedder));
        r.set_semantic_catalog(vec![SemanticEntry {
            intent: "weather".to_string(),
            model: "ollama:qwen2.5:7b".to_string(),
            embedding: vec![1.0, 0.0],
        }]);
        let req = RoutingRequest {
            content: Some("what is the weather like".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let decision = r.route(&req).await.decision;
        assert_eq!(decision.tier, Tier::Semantic);
        assert_eq!(decision.selected_model, "ollama:qwen2.5:7b");
    }
}
