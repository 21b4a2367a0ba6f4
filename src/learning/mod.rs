// Learning Engine — periodic statistical pass over a user's routing
// history that produces a `PreferenceModel`, optionally writing it back
// as `UserPreferences` when confident enough.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cortex::is_time_pattern_match;
use crate::error::CortexResult;
use crate::memory::{HistoryRecord, MemoryManager, UserPreferences};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelIntentStat {
    pub model: String,
    pub samples: u32,
    pub successes: u32,
    pub avg_quality: f64,
}

/// Statistical summary of one user's history, prior to any write-through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceModel {
    pub api_key_hash: String,
    pub sample_size: usize,
    /// intent -> best-performing model, with its confidence.
    pub model_preferences: HashMap<String, String>,
    pub model_confidences: HashMap<String, f64>,
    /// provider -> bias in [-1, 1].
    pub provider_bias: HashMap<String, f64>,
    /// intent -> hour-of-day in which it holds a >50% share of that hour's
    /// requests, among hours with at least 5 observations.
    pub peak_hours: HashMap<String, u8>,
    pub suggestions: Vec<String>,
}

/// `CalculatePreferenceConfidence`: `(successRate*0.7 + avgQuality*0.3) *
/// sizePenalty(n)`, where `sizePenalty = ln(n+1)/ln(101)` clamped at 1.0 —
/// more samples and a higher success rate both raise confidence, and a
/// single lucky sample never reaches the auto-apply threshold thanks to
/// the logarithmic sample-size penalty.
pub fn calculate_preference_confidence(samples: u32, successes: u32, avg_quality: f64) -> f64 {
    if samples == 0 {
        return 0.0;
    }
    let success_rate = successes as f64 / samples as f64;
    let size_penalty = ((samples as f64 + 1.0).ln() / 101f64.ln()).min(1.0);
    (success_rate * 0.7 + avg_quality * 0.3) * size_penalty
}

/// Provider bias in `[-1, 1]`: `clamp(2*(providerSuccessRate -
/// globalSuccessRate), -1, 1)` — a provider performing exactly at the
/// user's own overall success rate is neutral, not pinned to a constant
/// 50% baseline.
pub fn calculate_provider_bias(successes: u32, total: u32, global_success_rate: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let provider_success_rate = successes as f64 / total as f64;
    (2.0 * (provider_success_rate - global_success_rate)).clamp(-1.0, 1.0)
}

pub struct LearningEngine {
    memory: Arc<MemoryManager>,
    min_sample_size: usize,
    confidence_threshold: f64,
    auto_apply: bool,
    history_window: usize,
}

impl LearningEngine {
    pub fn new(
        memory: Arc<MemoryManager>,
        min_sample_size: usize,
        confidence_threshold: f64,
        auto_apply: bool,
        history_window: usize,
    ) -> Self {
        Self {
            memory,
            min_sample_size,
            confidence_threshold,
            auto_apply,
            history_window,
        }
    }

    /// `AnalyzeUser`: builds a `PreferenceModel` from the user's recent
    /// history, skipping analysis entirely if below `min_sample_size`.
    pub fn analyze_user(&self, api_key_hash: &str) -> CortexResult<Option<PreferenceModel>> {
        let history = self.memory.get_history(api_key_hash, self.history_window)?;
        if history.len() < self.min_sample_size {
            return Ok(None);
        }
        Ok(Some(self.build_model(api_key_hash, &history)))
    }

    fn build_model(&self, api_key_hash: &str, history: &[HistoryRecord]) -> PreferenceModel {
        struct Agg {
            samples: u32,
            successes: u32,
            quality_sum: f64,
        }

        const MIN_MODEL_SAMPLES: u32 = 5;
        const MIN_PROVIDER_SAMPLES: u32 = 10;
        const MIN_HOUR_SAMPLES: u32 = 5;

        let mut per_intent_model: HashMap<(String, String), Agg> = HashMap::new();
        let mut per_provider: HashMap<String, (u32, u32)> = HashMap::new();
        let mut per_hour_intent_counts: HashMap<u8, HashMap<String, u32>> = HashMap::new();
        let mut global_total = 0u32;
        let mut global_successes = 0u32;

        for record in history {
            let intent = record.decision.intent.clone();
            let model = record.decision.selected_model.clone();
            let provider = record.decision.provider.clone();
            let success = record.outcome.as_ref().map(|o| o.success).unwrap_or(false);
            let quality = record.outcome.as_ref().map(|o| o.quality_score).unwrap_or(record.decision.confidence);

            let agg = per_intent_model.entry((intent.clone(), model)).or_insert(Agg { samples: 0, successes: 0, quality_sum: 0.0 });
            agg.samples += 1;
            if success {
                agg.successes += 1;
            }
            agg.quality_sum += quality;

            let provider_agg = per_provider.entry(provider).or_insert((0, 0));
            provider_agg.0 += 1;
            if success {
                provider_agg.1 += 1;
            }

            global_total += 1;
            if success {
                global_successes += 1;
            }

            let hour = hour_of(record.decision.timestamp);
            *per_hour_intent_counts.entry(hour).or_default().entry(intent).or_insert(0) += 1;
        }

        let global_success_rate = if global_total > 0 { global_successes as f64 / global_total as f64 } else { 0.0 };

        // §4.7: a model only becomes a candidate preference for an intent
        // once it has at least `MIN_MODEL_SAMPLES` observations.
        let mut best_per_intent: HashMap<String, (String, f64)> = HashMap::new();
        for ((intent, model), agg) in &per_intent_model {
            if agg.samples < MIN_MODEL_SAMPLES {
                continue;
            }
            let avg_quality = agg.quality_sum / agg.samples as f64;
            let confidence = calculate_preference_confidence(agg.samples, agg.successes, avg_quality);
            let entry = best_per_intent.entry(intent.clone()).or_insert_with(|| (model.clone(), confidence));
            if confidence > entry.1 {
                *entry = (model.clone(), confidence);
            }
        }

        let model_preferences: HashMap<String, String> =
            best_per_intent.iter().map(|(intent, (model, _))| (intent.clone(), model.clone())).collect();
        let model_confidences: HashMap<String, f64> =
            best_per_intent.iter().map(|(intent, (_, confidence))| (intent.clone(), *confidence)).collect();

        // §4.7: a provider only gets a bias entry once it has at least
        // `MIN_PROVIDER_SAMPLES` observations.
        let provider_bias: HashMap<String, f64> = per_provider
            .iter()
            .filter(|(_, (total, _))| *total >= MIN_PROVIDER_SAMPLES)
            .map(|(provider, (total, successes))| {
                (provider.clone(), calculate_provider_bias(*successes, *total, global_success_rate))
            })
            .collect();

        // §4.7: for each hour with at least `MIN_HOUR_SAMPLES` observations
        // across all intents, the intent holding a >50% share of that hour
        // is recorded as a peak intent. An intent that qualifies in more
        // than one hour keeps the hour with the largest share (ties broken
        // by the earliest hour, for determinism).
        let mut peak_hours_with_share: HashMap<String, (u8, f64)> = HashMap::new();
        let mut qualifying_hours: Vec<u8> = per_hour_intent_counts.keys().copied().collect();
        qualifying_hours.sort_unstable();
        for hour in qualifying_hours {
            let intents = &per_hour_intent_counts[&hour];
            let total: u32 = intents.values().sum();
            if total < MIN_HOUR_SAMPLES {
                continue;
            }
            let mut ranked: Vec<(&String, &u32)> = intents.iter().collect();
            ranked.sort_unstable_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            if let Some((intent, count)) = ranked.into_iter().next() {
                let share = *count as f64 / total as f64;
                if share > 0.5 {
                    let entry = peak_hours_with_share.entry(intent.clone()).or_insert((hour, share));
                    if share > entry.1 {
                        *entry = (hour, share);
                    }
                }
            }
        }
        let peak_hours: HashMap<String, u8> =
            peak_hours_with_share.into_iter().map(|(intent, (hour, _))| (intent, hour)).collect();

        let suggestions = self.generate_suggestions(&model_confidences, &provider_bias, &peak_hours);

        PreferenceModel {
            api_key_hash: api_key_hash.to_string(),
            sample_size: history.len(),
            model_preferences,
            model_confidences,
            provider_bias,
            peak_hours,
            suggestions,
        }
    }

    /// Textual suggestions: positive reinforcement for high-confidence
    /// preferences, warnings for providers with bias below -0.5, and volume
    /// annotations for detected time patterns.
    fn generate_suggestions(
        &self,
        model_confidences: &HashMap<String, f64>,
        provider_bias: &HashMap<String, f64>,
        peak_hours: &HashMap<String, u8>,
    ) -> Vec<String> {
        let mut suggestions = Vec::new();
        for (intent, confidence) in model_confidences {
            if *confidence >= self.confidence_threshold {
                suggestions.push(format!("strong preference detected for intent '{intent}' (confidence {confidence:.2})"));
            }
        }
        for (provider, bias) in provider_bias {
            if *bias < -0.5 {
                suggestions.push(format!("provider '{provider}' has a poor track record for this user (bias {bias:.2})"));
            }
        }
        for (intent, hour) in peak_hours {
            if is_time_pattern_match(intent, *hour) {
                suggestions.push(format!("'{intent}' requests peak around {hour}:00, matching the expected pattern"));
            }
        }
        suggestions
    }

    /// Writes through to `UserPreferences` only the intents whose
    /// confidence clears `confidence_threshold`, plus the full provider
    /// bias map, when `auto_apply` is enabled.
    pub fn apply_if_confident(&self, model: &PreferenceModel) -> CortexResult<bool> {
        if !self.auto_apply {
            return Ok(false);
        }
        let qualifying: HashMap<String, String> = model
            .model_confidences
            .iter()
            .filter(|(_, confidence)| **confidence >= self.confidence_threshold)
            .filter_map(|(intent, _)| model.model_preferences.get(intent).map(|m| (intent.clone(), m.clone())))
            .collect();
        if qualifying.is_empty() {
            return Ok(false);
        }

        let mut prefs = self.memory.get_user_preferences(&model.api_key_hash)?.unwrap_or(UserPreferences {
            api_key_hash: model.api_key_hash.clone(),
            ..Default::default()
        });
        for (intent, selected_model) in qualifying {
            prefs.model_preferences.insert(intent.clone(), selected_model);
            if let Some(confidence) = model.model_confidences.get(&intent) {
                prefs.model_confidences.insert(intent, *confidence);
            }
        }
        prefs.provider_bias = model.provider_bias.clone();
        prefs.last_updated = crate::clock::now_unix();
        prefs.last_analyzed = crate::clock::now_unix();
        self.memory.update_user_preferences(&prefs)?;
        Ok(true)
    }

    /// `AnalyzeAll`: runs `analyze_user` + `apply_if_confident` for every
    /// known user, returning the models produced (skipping users below the
    /// sample-size floor).
    pub fn analyze_all(&self) -> CortexResult<Vec<PreferenceModel>> {
        let users = self.memory.list_known_users()?;
        let mut models = Vec::new();
        for user in users {
            if let Some(model) = self.analyze_user(&user)? {
                if let Err(e) = self.apply_if_confident(&model) {
                    log::warn!("failed to apply learned preferences for a user: {e}");
                }
                models.push(model);
            }
        }
        Ok(models)
    }

    /// Launch the periodic analysis loop; cancellable via a `watch` channel
    /// closed by the caller.
    pub fn schedule(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.analyze_all() {
                            log::warn!("learning engine analysis pass failed: {e}");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn hour_of(timestamp: i64) -> u8 {
    use chrono::Timelike;
    chrono::DateTime::from_timestamp(timestamp, 0).unwrap_or_default().hour() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoutingDecision, Tier};

    fn decision(intent: &str, model: &str, provider: &str, hour: u8, confidence: f64) -> RoutingDecision {
        let timestamp = 1_700_000_000 + hour as i64 * 3600;
        RoutingDecision {
            api_key_hash: "sha256:u1".into(),
            request_hash: format!("h{timestamp}{model}"),
            timestamp,
            intent: intent.into(),
            complexity: "low".into(),
            privacy: "none".into(),
            tier: Tier::Reflex,
            selected_model: model.into(),
            provider: provider.into(),
            confidence,
            latency_ms: 10,
            used_memory: false,
            memory_source: None,
            reason: "test".into(),
        }
    }

    #[test]
    fn below_sample_size_skips_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryManager::new(dir.path().to_path_buf(), 90, 64).unwrap());
        memory.record_routing(&decision("coding", "m1", "p1", 10, 0.9)).unwrap();
        let engine = LearningEngine::new(memory, 5, 0.85, true, 1000);
        assert!(engine.analyze_user("sha256:u1").unwrap().is_none());
    }

    #[test]
    fn preferred_model_emerges_from_repeated_successful_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryManager::new(dir.path().to_path_buf(), 90, 64).unwrap());
        for i in 0..10u8 {
            let d = decision("coding", "geminicli:gemini-2.5-pro", "geminicli", 10, 0.9);
            memory.record_routing(&d).unwrap();
            memory
                .record_outcome(&crate::memory::OutcomeRecord {
                    request_hash: d.request_hash.clone(),
                    timestamp: d.timestamp,
                    success: true,
                    response_time_ms: 200,
                    error: None,
                    quality_score: 0.95,
                    user_feedback: None,
                })
                .unwrap();
            let _ = i;
        }
        let engine = LearningEngine::new(memory, 5, 0.5, true, 1000);
        let model = engine.analyze_user("sha256:u1").unwrap().unwrap();
        assert_eq!(model.model_preferences["coding"], "geminicli:gemini-2.5-pro");
        assert!(model.model_confidences["coding"] > 0.0);
    }

    #[test]
    fn provider_bias_reflects_deviation_from_global_success_rate() {
        // at the global rate, a provider is neutral regardless of its own rate's distance from 50%.
        assert_eq!(calculate_provider_bias(5, 10, 0.5), 0.0);
        // a provider running ten points above the user's global rate gets a proportional positive bias.
        assert!((calculate_provider_bias(6, 10, 0.5) - 0.2).abs() < 1e-9);
        // clamps at the extremes rather than overshooting [-1, 1].
        assert_eq!(calculate_provider_bias(10, 10, 0.0), 1.0);
        assert_eq!(calculate_provider_bias(0, 10, 1.0), -1.0);
    }

    #[test]
    fn sample_size_penalizes_confidence_of_a_single_observation() {
        let single = calculate_preference_confidence(1, 1, 1.0);
        let many = calculate_preference_confidence(100, 100, 1.0);
        assert!(single < many);
        assert!((many - 1.0).abs() < 1e-9);
    }

    #[test]
    fn model_preference_ignored_below_minimum_samples_per_model() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryManager::new(dir.path().to_path_buf(), 90, 64).unwrap());
        // Two candidate models for the same intent, three observations each —
        // below the 5-sample-per-model floor, so neither should be admitted.
        for (i, model) in ["model-a", "model-b"].iter().enumerate() {
            for j in 0..3u8 {
                let d = decision("coding", model, "p1", (i * 3 + j as usize) as u8, 0.9);
                memory.record_routing(&d).unwrap();
            }
        }
        let engine = LearningEngine::new(memory, 5, 0.5, true, 1000);
        let model = engine.analyze_user("sha256:u1").unwrap().unwrap();
        assert!(!model.model_preferences.contains_key("coding"));
    }

    #[test]
    fn provider_bias_ignored_below_minimum_samples_per_provider() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryManager::new(dir.path().to_path_buf(), 90, 64).unwrap());
        // Two providers, three observations each — below the 10-sample floor.
        for (i, provider) in ["p1", "p2"].iter().enumerate() {
            for j in 0..3u8 {
                let d = decision("coding", "m1", provider, (i * 3 + j as usize) as u8, 0.9);
                memory.record_routing(&d).unwrap();
            }
        }
        let engine = LearningEngine::new(memory, 5, 0.5, true, 1000);
        let model = engine.analyze_user("sha256:u1").unwrap().unwrap();
        assert!(model.provider_bias.is_empty());
    }

    #[test]
    fn peak_hour_requires_more_than_half_share_of_that_hour() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryManager::new(dir.path().to_path_buf(), 90, 64).unwrap());
        // `decision`'s `hour` is a dial on the fixture timestamp, not the
        // resulting UTC clock hour; derive the expected clock hour the same
        // way `build_model` does rather than assume the two match.
        let majority_hour = hour_of(decision("", "", "", 14, 0.0).timestamp);

        // The split hour: 3 "coding", 3 "chat" — neither holds a majority, no peak.
        for i in 0..3u8 {
            let mut d = decision("coding", "m1", "p1", 9, 0.9);
            d.request_hash = format!("{}-coding-{i}", d.request_hash);
            memory.record_routing(&d).unwrap();
        }
        for i in 0..3u8 {
            let mut d = decision("chat", "m1", "p1", 9, 0.9);
            d.request_hash = format!("{}-chat-{i}", d.request_hash);
            memory.record_routing(&d).unwrap();
        }
        // The majority hour: 6 "reasoning" out of 6 total — clears both the
        // 5-sample floor and the >50% share requirement.
        for i in 0..6u8 {
            let mut d = decision("reasoning", "m1", "p1", 14, 0.9);
            d.request_hash = format!("{}-reasoning-{i}", d.request_hash);
            memory.record_routing(&d).unwrap();
        }
        let engine = LearningEngine::new(memory, 5, 0.5, true, 1000);
        let model = engine.analyze_user("sha256:u1").unwrap().unwrap();
        assert_eq!(model.peak_hours.get("reasoning"), Some(&majority_hour));
        assert!(!model.peak_hours.contains_key("coding"));
        assert!(!model.peak_hours.contains_key("chat"));
    }

    #[test]
    fn auto_apply_writes_through_only_confident_intents() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryManager::new(dir.path().to_path_buf(), 90, 64).unwrap());
        let engine = LearningEngine::new(memory.clone(), 5, 0.85, true, 1000);
        let mut model = PreferenceModel {
            api_key_hash: "sha256:u1".into(),
            sample_size: 20,
            ..Default::default()
        };
        model.model_preferences.insert("coding".into(), "high-conf-model".into());
        model.model_confidences.insert("coding".into(), 0.95);
        model.model_preferences.insert("chat".into(), "low-conf-model".into());
        model.model_confidences.insert("chat".into(), 0.2);

        let applied = engine.apply_if_confident(&model).unwrap();
        assert!(applied);
        let prefs = memory.get_user_preferences("sha256:u1").unwrap().unwrap();
        assert_eq!(prefs.model_preferences.get("coding"), Some(&"high-conf-model".to_string()));
        assert!(!prefs.model_preferences.contains_key("chat"));
    }
}
