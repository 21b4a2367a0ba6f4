// Model Registry — authoritative catalog of (modelId, provider)
// combinations with per-client reference counts and quota/suspension
// overlays. A single struct owns a `HashMap` of live registrations,
// reconciled under one writer lock, with cloned data handed back to
// every caller.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CortexError, CortexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerDialect {
    Openai,
    Claude,
    Gemini,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBudget {
    pub min: u32,
    pub max: u32,
    pub zero_allowed: bool,
    pub dynamic_allowed: bool,
    pub levels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub display_name: String,
    pub version: String,
    pub description: String,
    pub input_token_limit: u64,
    pub output_token_limit: u64,
    pub context_length: u64,
    pub max_completion_tokens: u64,
    pub supported_parameters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingBudget>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistration {
    pub info: Option<ModelInfo>,
    /// Total reference count across all clients serving this model.
    pub count: u32,
    pub last_updated: i64,
    /// clientId -> timestamp quota was marked exceeded.
    pub quota_exceeded_clients: HashMap<String, i64>,
    /// providerId -> count of clients of that provider serving this model.
    pub providers: HashMap<String, u32>,
    /// clientId -> suspension reason ("quota" is a cooldown, not a hide).
    pub suspended_clients: HashMap<String, String>,
}

impl ModelRegistration {
    fn invariant_ok(&self) -> bool {
        self.count == self.providers.values().sum::<u32>()
    }

    /// Effective availability: count minus clients still in their quota
    /// cooldown window minus non-quota suspended clients.
    fn effective_count(&self, now: i64, cooldown_secs: i64) -> u32 {
        let active_cooldowns = self
            .quota_exceeded_clients
            .values()
            .filter(|&&ts| now - ts < cooldown_secs)
            .count() as u32;

        let non_quota_suspended = self
            .suspended_clients
            .values()
            .filter(|reason| reason.as_str() != "quota")
            .count() as u32;

        self.count
            .saturating_sub(active_cooldowns)
            .saturating_sub(non_quota_suspended)
    }
}

#[derive(Default)]
struct RegistryState {
    models: HashMap<String, ModelRegistration>,
    /// clientId -> model ids it currently serves.
    client_models: HashMap<String, Vec<String>>,
    /// clientId -> modelId -> info, used to diff on re-registration.
    client_model_infos: HashMap<String, HashMap<String, ModelInfo>>,
    /// clientId -> providerId.
    client_providers: HashMap<String, String>,
}

pub struct ModelRegistry {
    state: RwLock<RegistryState>,
    cooldown_secs: i64,
}

impl ModelRegistry {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            cooldown_secs,
        }
    }

    /// Reconcile `clientId`'s served models against its previous set.
    /// Empty `models` performs a full unregister.
    pub fn register_client(&self, client_id: &str, provider: &str, models: Vec<ModelInfo>) {
        if models.is_empty() {
            self.unregister_client(client_id);
            return;
        }

        let mut state = self.state.write();
        let now = crate::clock::now_unix();

        let previous: Vec<String> = state
            .client_models
            .get(client_id)
            .cloned()
            .unwrap_or_default();
        let next: Vec<String> = models.iter().map(|m| m.id.clone()).collect();

        let removed: Vec<&String> = previous.iter().filter(|id| !next.contains(id)).collect();
        let added: Vec<&ModelInfo> = models.iter().filter(|m| !previous.contains(&m.id)).collect();
        let kept: Vec<&ModelInfo> = models.iter().filter(|m| previous.contains(&m.id)).collect();

        for model_id in removed {
            Self::decrement(&mut state, client_id, model_id, provider);
        }
        for info in added {
            Self::increment(&mut state, client_id, provider, info.clone(), now);
        }
        for info in kept {
            // Refresh the cloned ModelInfo in case it changed upstream.
            if let Some(reg) = state.models.get_mut(&info.id) {
                reg.info = Some(info.clone());
                reg.last_updated = now;
            }
        }

        state.client_providers.insert(client_id.to_string(), provider.to_string());
        state.client_models.insert(client_id.to_string(), next);
        let infos: HashMap<String, ModelInfo> =
            models.into_iter().map(|m| (m.id.clone(), m)).collect();
        state.client_model_infos.insert(client_id.to_string(), infos);

        debug_assert!(state.models.values().all(|r| r.invariant_ok()));
    }

    pub fn unregister_client(&self, client_id: &str) {
        let mut state = self.state.write();
        let provider = state
            .client_providers
            .get(client_id)
            .cloned()
            .unwrap_or_default();
        let models = state
            .client_models
            .remove(client_id)
            .unwrap_or_default();
        for model_id in models {
            Self::decrement(&mut state, client_id, &model_id, &provider);
        }
        state.client_providers.remove(client_id);
        state.client_model_infos.remove(client_id);
    }

    fn increment(
        state: &mut RegistryState,
        client_id: &str,
        provider: &str,
        info: ModelInfo,
        now: i64,
    ) {
        let reg = state.models.entry(info.id.clone()).or_default();
        reg.info = Some(info);
        reg.count += 1;
        reg.last_updated = now;
        *reg.providers.entry(provider.to_string()).or_insert(0) += 1;
        let _ = client_id;
    }

    fn decrement(state: &mut RegistryState, client_id: &str, model_id: &str, provider: &str) {
        if let Some(reg) = state.models.get_mut(model_id) {
            reg.count = reg.count.saturating_sub(1);
            if let Some(c) = reg.providers.get_mut(provider) {
                *c = c.saturating_sub(1);
                if *c == 0 {
                    reg.providers.remove(provider);
                }
            }
            reg.quota_exceeded_clients.remove(client_id);
            reg.suspended_clients.remove(client_id);
            if reg.count == 0 {
                state.models.remove(model_id);
            }
        }
    }

    pub fn set_model_quota_exceeded(&self, client_id: &str, model_id: &str) {
        let mut state = self.state.write();
        let now = crate::clock::now_unix();
        if let Some(reg) = state.models.get_mut(model_id) {
            reg.quota_exceeded_clients.insert(client_id.to_string(), now);
        }
    }

    pub fn clear_model_quota_exceeded(&self, client_id: &str, model_id: &str) {
        let mut state = self.state.write();
        if let Some(reg) = state.models.get_mut(model_id) {
            reg.quota_exceeded_clients.remove(client_id);
        }
    }

    pub fn suspend_client_model(&self, client_id: &str, model_id: &str, reason: &str) {
        let mut state = self.state.write();
        if let Some(reg) = state.models.get_mut(model_id) {
            reg.suspended_clients
                .insert(client_id.to_string(), reason.to_string());
        }
    }

    pub fn resume_client_model(&self, client_id: &str, model_id: &str) {
        let mut state = self.state.write();
        if let Some(reg) = state.models.get_mut(model_id) {
            reg.suspended_clients.remove(client_id);
        }
    }

    /// Effective availability as seen by routing.
    pub fn get_model_count(&self, model_id: &str) -> u32 {
        let state = self.state.read();
        let now = crate::clock::now_unix();
        state
            .models
            .get(model_id)
            .map(|r| r.effective_count(now, self.cooldown_secs))
            .unwrap_or(0)
    }

    pub fn get_available_models(&self, dialect: HandlerDialect) -> Vec<ModelInfo> {
        let state = self.state.read();
        let now = crate::clock::now_unix();
        let mut models: Vec<ModelInfo> = state
            .models
            .iter()
            .filter(|(_, reg)| reg.effective_count(now, self.cooldown_secs) > 0)
            .filter_map(|(_, reg)| reg.info.clone())
            .collect();
        models.sort_by(|a, b| b.created.cmp(&a.created));
        apply_dialect(&mut models, dialect);
        models
    }

    /// Walk `priority_list` first (supporting `"provider:modelId"` fully
    /// qualified ids), then fall back to all available models by recency.
    pub fn get_first_available_model(
        &self,
        priority_list: &[String],
    ) -> CortexResult<ModelInfo> {
        let state = self.state.read();
        let now = crate::clock::now_unix();

        for candidate in priority_list {
            let model_id = candidate.split_once(':').map(|(_, id)| id).unwrap_or(candidate);
            if let Some(reg) = state.models.get(model_id) {
                if reg.effective_count(now, self.cooldown_secs) > 0 {
                    if let Some(info) = &reg.info {
                        return Ok(info.clone());
                    }
                }
            }
        }

        let mut available: Vec<&ModelInfo> = state
            .models
            .values()
            .filter(|r| r.effective_count(now, self.cooldown_secs) > 0)
            .filter_map(|r| r.info.as_ref())
            .collect();
        available.sort_by(|a, b| b.created.cmp(&a.created));

        available
            .into_iter()
            .next()
            .cloned()
            .ok_or_else(|| CortexError::not_found("NoAvailableModel"))
    }

    pub fn cleanup_expired_quotas(&self) {
        let mut state = self.state.write();
        let now = crate::clock::now_unix();
        let cooldown = self.cooldown_secs;
        for reg in state.models.values_mut() {
            reg.quota_exceeded_clients
                .retain(|_, ts| now - *ts < cooldown);
        }
    }
}

fn apply_dialect(models: &mut [ModelInfo], dialect: HandlerDialect) {
    // The wire shape per dialect is owned by the (out-of-scope) HTTP
    // frontend; here we only normalize the `object` discriminant the
    // frontend keys its rendering off of.
    let object = match dialect {
        HandlerDialect::Openai => "model",
        HandlerDialect::Claude => "model",
        HandlerDialect::Gemini => "models/model",
        HandlerDialect::Generic => "model",
    };
    for m in models.iter_mut() {
        m.object = object.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, created: i64) -> ModelInfo {
        ModelInfo {
            id: id.into(),
            object: "model".into(),
            created,
            owned_by: "test".into(),
            model_type: "chat".into(),
            display_name: id.into(),
            version: "1".into(),
            description: String::new(),
            input_token_limit: 4096,
            output_token_limit: 4096,
            context_length: 8192,
            max_completion_tokens: 4096,
            supported_parameters: vec![],
            thinking: None,
        }
    }

    #[test]
    fn refcount_invariant_after_register_and_unregister() {
        let reg = ModelRegistry::new(300);
        reg.register_client("c1", "ollama", vec![info("m1", 1)]);
        reg.register_client("c2", "ollama", vec![info("m1", 1)]);
        assert_eq!(reg.get_model_count("m1"), 2);
        reg.unregister_client("c1");
        assert_eq!(reg.get_model_count("m1"), 1);
        reg.unregister_client("c2");
        assert_eq!(reg.get_model_count("m1"), 0);
    }

    #[test]
    fn quota_cooldown_hides_then_restores_model() {
        let reg = ModelRegistry::new(300);
        reg.register_client("c1", "ollama", vec![info("m1", 1)]);
        reg.set_model_quota_exceeded("c1", "m1");
        assert_eq!(reg.get_model_count("m1"), 0);

        // Simulate expiry by clearing directly — exercised against the wall
        // clock elsewhere; the cooldown arithmetic itself is unit tested via
        // `ModelRegistration::effective_count`.
        reg.clear_model_quota_exceeded("c1", "m1");
        assert_eq!(reg.get_model_count("m1"), 1);
    }

    #[test]
    fn effective_count_expires_quota_after_cooldown() {
        let mut reg = ModelRegistration {
            count: 1,
            ..Default::default()
        };
        reg.providers.insert("ollama".into(), 1);
        reg.quota_exceeded_clients.insert("c1".into(), 1_000);
        assert_eq!(reg.effective_count(1_000, 300), 0);
        assert_eq!(reg.effective_count(1_000 + 301, 300), 1);
    }

    #[test]
    fn quota_reason_cooldown_does_not_double_count_with_other_suspensions() {
        let mut reg = ModelRegistration {
            count: 2,
            ..Default::default()
        };
        reg.providers.insert("ollama".into(), 2);
        reg.suspended_clients.insert("c1".into(), "quota".into());
        reg.suspended_clients.insert("c2".into(), "manual".into());
        // "quota" suspensions don't additionally reduce availability —
        // only the dedicated quota_exceeded_clients map does that.
        assert_eq!(reg.effective_count(0, 300), 1);
    }

    #[test]
    fn first_available_honors_priority_list_then_recency() {
        let reg = ModelRegistry::new(300);
        reg.register_client("c1", "ollama", vec![info("m1", 1), info("m2", 2)]);
        let picked = reg
            .get_first_available_model(&["ollama:m1".to_string()])
            .unwrap();
        assert_eq!(picked.id, "m1");

        let picked = reg.get_first_available_model(&[]).unwrap();
        assert_eq!(picked.id, "m2"); // more recent `created`
    }

    #[test]
    fn no_available_model_errors_when_empty() {
        let reg = ModelRegistry::new(300);
        assert!(reg.get_first_available_model(&[]).is_err());
    }
}
