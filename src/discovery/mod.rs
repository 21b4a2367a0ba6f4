// Model Discovery: fetches upstream model catalogs through pluggable
// per-source parsers, caches them on disk with a TTL plus a grace period
// for degraded operation, and always appends the static Claude catalog
// (its upstream source is closed).

mod parsers;

pub use parsers::{static_claude_models, ParsedSource, SourceParser};

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CortexError, CortexResult};
use crate::registry::ModelInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub provider_id: String,
    pub fetched_at: i64,
    pub ttl_seconds: i64,
    pub models: Vec<ModelInfo>,
    pub source_url: String,
    pub source_type: String,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.fetched_at + self.ttl_seconds
    }

    pub fn is_in_grace(&self, now: i64, grace_days: i64) -> bool {
        now < self.fetched_at + grace_days * 86_400
    }
}

#[derive(Debug, Clone)]
pub struct Source {
    pub provider_id: String,
    pub url: String,
    pub ttl_seconds: i64,
    pub parser: SourceParser,
    pub auth_header: Option<String>,
}

/// Fetches, parses, and caches upstream catalogs. The in-memory map and
/// the on-disk cache directory are kept in sync under a single mutex;
/// network I/O happens outside the lock.
pub struct ModelDiscovery {
    sources: Vec<Source>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_dir: PathBuf,
    grace_days: i64,
    http: Client,
}

impl ModelDiscovery {
    pub fn new(cache_dir: PathBuf, grace_days: i64) -> CortexResult<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        let http = Client::builder()
            .user_agent("switchAILocal/1.0 (internal-discovery)")
            .build()
            .map_err(CortexError::from)?;
        Ok(Self {
            sources: Vec::new(),
            cache: Mutex::new(HashMap::new()),
            cache_dir,
            grace_days,
            http,
        })
    }

    pub fn register_source(&mut self, source: Source) {
        self.sources.push(source);
    }

    fn cache_path(&self, provider_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{provider_id}.json"))
    }

    fn load_cached(&self, provider_id: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.cache.lock().get(provider_id).cloned() {
            return Some(entry);
        }
        let path = self.cache_path(provider_id);
        let text = std::fs::read_to_string(path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&text).ok()?;
        self.cache.lock().insert(provider_id.to_string(), entry.clone());
        Some(entry)
    }

    fn store_cached(&self, entry: CacheEntry) -> CortexResult<()> {
        let path = self.cache_path(&entry.provider_id);
        let text = serde_json::to_string_pretty(&entry)?;
        std::fs::write(path, text)?;
        self.cache.lock().insert(entry.provider_id.clone(), entry);
        Ok(())
    }

    async fn fetch_and_parse(&self, source: &Source, now: i64) -> CortexResult<CacheEntry> {
        let mut req = self.http.get(&source.url);
        if let Some(auth) = &source.auth_header {
            req = req.header("Authorization", auth);
        }
        let resp = req.send().await.map_err(CortexError::from)?;
        if !resp.status().is_success() {
            return Err(CortexError::transient(format!(
                "discovery fetch for {} returned {}",
                source.provider_id,
                resp.status()
            )));
        }
        let body = resp.text().await.map_err(CortexError::from)?;
        let models = source.parser.parse(&body)?;
        Ok(CacheEntry {
            provider_id: source.provider_id.clone(),
            fetched_at: now,
            ttl_seconds: source.ttl_seconds,
            models,
            source_url: source.url.clone(),
            source_type: source.parser.name().to_string(),
        })
    }

    /// Fresh-cache-hit, else fetch-and-cache, else grace-period fallback.
    async fn discover_one(&self, source: &Source, now: i64) -> Vec<ModelInfo> {
        if let Some(cached) = self.load_cached(&source.provider_id) {
            if cached.is_fresh(now) {
                return cached.models;
            }
        }

        match self.fetch_and_parse(source, now).await {
            Ok(entry) => {
                let models = entry.models.clone();
                if let Err(e) = self.store_cached(entry) {
                    log::warn!("failed to persist discovery cache for {}: {e}", source.provider_id);
                }
                models
            }
            Err(e) => {
                log::warn!("discovery fetch failed for {}: {e}", source.provider_id);
                match self.load_cached(&source.provider_id) {
                    Some(cached) if cached.is_in_grace(now, self.grace_days) => cached.models,
                    _ => Vec::new(),
                }
            }
        }
    }

    /// `DiscoverAll`: runs every source concurrently, appends the static
    /// Claude catalog unconditionally, returns a `providerId -> models` map.
    pub async fn discover_all(&self, now: i64) -> HashMap<String, Vec<ModelInfo>> {
        let futures = self.sources.iter().map(|s| async move {
            (s.provider_id.clone(), self.discover_one(s, now).await)
        });
        let results = futures::future::join_all(futures).await;
        let mut map: HashMap<String, Vec<ModelInfo>> = results.into_iter().collect();
        map.insert("claude".to_string(), static_claude_models());
        map
    }

    /// Cache lookup without grace fallback.
    pub fn get(&self, provider_id: &str, now: i64) -> Option<Vec<ModelInfo>> {
        self.load_cached(provider_id)
            .filter(|c| c.is_fresh(now))
            .map(|c| c.models)
    }

    /// `GetWithGrace`: returns the cached entry if fresh or within
    /// `grace_days` of staleness, else `None`.
    pub fn get_with_grace(&self, provider_id: &str, now: i64, grace_days: i64) -> Option<Vec<ModelInfo>> {
        self.load_cached(provider_id)
            .filter(|c| c.is_fresh(now) || c.is_in_grace(now, grace_days))
            .map(|c| c.models)
    }
}

pub fn cache_dir_for(base: &Path) -> PathBuf {
    base.join("discovery-cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            object: "model".to_string(),
            created: 1,
            owned_by: "test".to_string(),
            model_type: "model".to_string(),
            display_name: id.to_string(),
            version: "1".to_string(),
            description: String::new(),
            input_token_limit: 4096,
            output_token_limit: 4096,
            context_length: 4096,
            max_completion_tokens: 4096,
            supported_parameters: vec![],
            thinking: None,
        }
    }

    #[test]
    fn cache_entry_freshness_and_grace() {
        let entry = CacheEntry {
            provider_id: "ollama".into(),
            fetched_at: 1_000,
            ttl_seconds: 60,
            models: vec![model("m1")],
            source_url: "http://localhost/api/tags".into(),
            source_type: "ollama".into(),
        };
        assert!(entry.is_fresh(1_030));
        assert!(!entry.is_fresh(1_061));
        assert!(entry.is_in_grace(1_061, 7));
        assert!(!entry.is_in_grace(1_000 + 8 * 86_400, 7));
    }

    #[tokio::test]
    async fn discover_all_always_includes_static_claude_models() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = ModelDiscovery::new(dir.path().to_path_buf(), 7).unwrap();
        let models = discovery.discover_all(1_000).await;
        assert!(models.contains_key("claude"));
        assert!(!models["claude"].is_empty());
    }

    #[test]
    fn get_with_grace_falls_back_then_expires() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = ModelDiscovery::new(dir.path().to_path_buf(), 7).unwrap();
        discovery
            .store_cached(CacheEntry {
                provider_id: "pr".into(),
                fetched_at: 0,
                ttl_seconds: 1,
                models: vec![model("stale-model")],
                source_url: "http://example".into(),
                source_type: "openai".into(),
            })
            .unwrap();

        assert!(discovery.get("pr", 1).is_none());
        assert!(discovery.get_with_grace("pr", 1, 7).is_some());
        assert!(discovery.get_with_grace("pr", 8 * 86_400, 7).is_none());
    }
}
