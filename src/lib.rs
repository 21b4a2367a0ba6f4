// cortex-router — local routing proxy core: tiered request classification,
// learned preferences, declarative steering, provider health, and the
// event bus that ties them together.
//
// `IntelligenceService` is the lifecycle root: one fallible constructor
// wires every subsystem in dependency order, and owns their background
// tasks for the life of the process.

pub mod cascade;
pub mod clock;
pub mod config;
pub mod cortex;
pub mod discovery;
pub mod error;
pub mod expr;
pub mod feedback;
pub mod hashing;
pub mod heartbeat;
pub mod hooks;
pub mod learning;
pub mod memory;
pub mod model;
pub mod registry;
pub mod steering;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cascade::{CascadeResult, CascadeTracker};
use crate::config::Config;
use crate::cortex::{CortexRouter, RoutingRequest, RoutingResult};
use crate::discovery::ModelDiscovery;
use crate::error::CortexResult;
use crate::feedback::{Collector as FeedbackCollector, FeedbackRecord};
use crate::heartbeat::{HealthChecker, HeartbeatMonitor};
use crate::hooks::{EventBus, HookManager};
use crate::learning::LearningEngine;
use crate::memory::{MemoryManager, OutcomeRecord};
use crate::model::{CascadeTier, RoutingDecision, Tier};
use crate::registry::ModelRegistry;
use crate::steering::SteeringEngine;

/// Owns every subsystem in this crate plus their wiring. One instance per
/// running router process.
pub struct IntelligenceService {
    config: Config,
    memory: Arc<MemoryManager>,
    registry: Arc<ModelRegistry>,
    heartbeat: Arc<HeartbeatMonitor>,
    discovery: Arc<ModelDiscovery>,
    steering: Arc<SteeringEngine>,
    bus: Arc<EventBus>,
    hooks: Mutex<HookManager>,
    learning: Arc<LearningEngine>,
    cascade: Arc<CascadeTracker>,
    feedback: Arc<FeedbackCollector>,
    router: Arc<CortexRouter>,

    steering_watcher: Mutex<Option<notify::RecommendedWatcher>>,
    task_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shut_down: AtomicBool,
}

impl IntelligenceService {
    /// Constructs, in order, Memory -> Model Registry -> Heartbeat Monitor
    /// -> Discovery -> Steering Engine -> Hook Event Bus -> Hook Manager ->
    /// Learning Engine -> Cascade Manager -> Feedback Collector -> Cortex
    /// Router. `health_checkers` are supplied by the out-of-scope
    /// provider-transport layer; this crate has no concrete `HealthChecker`
    /// implementations of its own.
    pub fn new(config: Config, health_checkers: Vec<Arc<dyn HealthChecker>>) -> CortexResult<Self> {
        config.ensure_dirs()?;

        let memory = Arc::new(MemoryManager::new(
            config.base_dir.clone(),
            config.memory_retention_days,
            config.memory_max_log_size_mb,
        )?);
        let registry = Arc::new(ModelRegistry::new(config.quota_cooldown_secs as i64));
        let bus = Arc::new(EventBus::new(config.event_queue_capacity));

        let mut heartbeat = HeartbeatMonitor::new(
            bus.clone(),
            Duration::from_secs(config.heartbeat_checker_timeout_secs),
            Duration::from_secs(config.heartbeat_checkall_timeout_secs),
        );
        for checker in health_checkers {
            heartbeat.register(checker);
        }
        let heartbeat = Arc::new(heartbeat);

        let discovery = Arc::new(ModelDiscovery::new(config.discovery_cache_dir(), config.discovery_grace_days as i64)?);

        let steering = Arc::new(SteeringEngine::new());
        steering.load_dir(&config.steering_dir)?;

        let mut hook_manager = HookManager::new(Arc::new(crate::hooks::LoggingActionRunner));
        hook_manager.load_dir(&config.hooks_dir)?;
        hook_manager.install(&bus);
        let hooks = Mutex::new(hook_manager);

        let learning = Arc::new(LearningEngine::new(
            memory.clone(),
            config.learning_min_sample_size,
            config.learning_confidence_threshold,
            config.learning_auto_apply,
            config.learning_history_window,
        ));

        let cascade = Arc::new(CascadeTracker::new(config.cascade_max));

        let feedback = Arc::new(FeedbackCollector::new(config.feedback_db_path(), config.feedback_retention_days()));
        feedback.initialize()?;

        let router = Arc::new(CortexRouter::new(
            steering.clone(),
            memory.clone(),
            registry.clone(),
            bus.clone(),
            config.semantic_threshold,
        ));

        let (shutdown_tx, _rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            memory,
            registry,
            heartbeat,
            discovery,
            steering,
            bus,
            hooks,
            learning,
            cascade,
            feedback,
            router,
            steering_watcher: Mutex::new(None),
            task_handles: Mutex::new(Vec::new()),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Launches the long-lived background tasks: steering hot-reload,
    /// heartbeat polling, learning analysis interval, and a combined
    /// memory/feedback retention sweep. Runs one discovery sweep
    /// immediately, registering each provider's models under its own
    /// `"discovery:<provider>"` client id — `register_client` reconciles a
    /// single client's *entire* served set against its previous one, so
    /// sharing one id across providers would have the last provider's sweep
    /// evict every earlier provider's models.
    pub async fn start(&self) -> CortexResult<()> {
        let watcher = crate::steering::spawn_watcher(self.steering.clone(), self.config.steering_dir.clone())
            .map_err(|e| crate::error::CortexError::transient(e.to_string()))?;
        *self.steering_watcher.lock() = Some(watcher);

        let mut handles = self.task_handles.lock();
        handles.push(
            self.heartbeat
                .clone()
                .schedule(Duration::from_secs(self.config.heartbeat_interval_secs), self.shutdown_tx.subscribe()),
        );
        handles.push(
            self.learning
                .clone()
                .schedule(Duration::from_secs(self.config.learning_interval_secs), self.shutdown_tx.subscribe()),
        );
        handles.push(self.spawn_retention_sweep());
        drop(handles);

        let now = crate::clock::now_unix();
        let discovered = self.discovery.discover_all(now).await;
        for (provider, models) in discovered {
            if !models.is_empty() {
                self.registry.register_client(&format!("discovery:{provider}"), &provider, models);
            }
        }

        Ok(())
    }

    fn spawn_retention_sweep(&self) -> tokio::task::JoinHandle<()> {
        let memory = self.memory.clone();
        let feedback = self.feedback.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = memory.cleanup() {
                            log::warn!("memory retention sweep failed: {e}");
                        }
                        if let Err(e) = feedback.cleanup() {
                            log::warn!("feedback retention sweep failed: {e}");
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

    /// `Route`: the single entry point the (out-of-scope) HTTP frontend
    /// calls. Never fails. The returned `RoutingResult` carries both the
    /// persisted decision and whatever steering injected (system prompt,
    /// metadata overrides) for the dispatcher to apply before it sends the
    /// request upstream.
    pub async fn route(&self, request: &RoutingRequest) -> RoutingResult {
        self.router.route(request).await
    }

    /// Runs the Cascade Manager's quality evaluation over a response
    /// already produced for `decision` at `tier`.
    pub fn evaluate_cascade(&self, tier: CascadeTier, response: &str) -> crate::cascade::CascadeEvaluation {
        crate::cascade::evaluate_response(response, tier, self.config.cascade_quality_threshold)
    }

    /// Drives a full cascade loop via `respond`, recording cascade metrics
    /// in the shared `CascadeTracker`.
    pub fn run_cascade<F>(&self, original_tier: CascadeTier, respond: F) -> CascadeResult
    where
        F: FnMut(CascadeTier) -> (String, u64),
    {
        self.cascade.run(original_tier, self.config.cascade_quality_threshold, respond)
    }

    /// Persists a routing outcome into Memory and, when enabled, the
    /// Feedback Collector. Best-effort: errors are logged, never
    /// propagated into the request path.
    pub fn record_outcome(
        &self,
        decision: &RoutingDecision,
        success: bool,
        response_time_ms: u64,
        error: Option<String>,
        user_feedback: Option<String>,
        cascade_count: u32,
    ) {
        let quality_score = crate::model::calculate_quality_score(success, response_time_ms, error.is_some());
        let timestamp = crate::clock::now_unix();
        let outcome = OutcomeRecord {
            request_hash: decision.request_hash.clone(),
            timestamp,
            success,
            response_time_ms,
            error: error.clone(),
            quality_score,
            user_feedback,
        };
        if let Err(e) = self.memory.record_outcome(&outcome) {
            log::warn!("failed to record outcome into memory: {e}");
        }

        if self.feedback.is_enabled() {
            let record = FeedbackRecord {
                timestamp,
                api_key_hash: decision.api_key_hash.clone(),
                tier: decision.tier,
                selected_model: decision.selected_model.clone(),
                provider: decision.provider.clone(),
                success,
                latency_ms: response_time_ms,
                cascade_count,
            };
            if let Err(e) = self.feedback.record(&record) {
                log::warn!("failed to record feedback: {e}");
            }
        }
    }

    /// Shuts down in reverse init order. Idempotent.
    pub async fn shutdown(&self, deadline: Duration) -> CortexResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(true);
        *self.steering_watcher.lock() = None;

        let handles: Vec<_> = self.task_handles.lock().drain(..).collect();
        let joined = futures::future::join_all(handles);
        if tokio::time::timeout(deadline, joined).await.is_err() {
            log::warn!("shutdown deadline exceeded while waiting for background tasks");
        }

        self.bus.shutdown();
        if let Err(e) = self.feedback.shutdown() {
            log::warn!("feedback collector shutdown failed: {e}");
        }
        if let Err(e) = self.memory.cleanup() {
            log::warn!("final memory cleanup failed: {e}");
        }
        Ok(())
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    pub fn steering(&self) -> &Arc<SteeringEngine> {
        &self.steering
    }

    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    pub fn hooks(&self) -> &Mutex<HookManager> {
        &self.hooks
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base: &std::path::Path) -> Config {
        Config {
            base_dir: base.join("data"),
            steering_dir: base.join("steering"),
            hooks_dir: base.join("hooks"),
            learning_min_sample_size: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn constructs_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let service = IntelligenceService::new(config, Vec::new()).unwrap();
        service.start().await.unwrap();

        let request = RoutingRequest {
            content: Some("hello there".to_string()),
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let result = service.route(&request).await;
        assert_eq!(result.decision.tier, Tier::Reflex);

        service.record_outcome(&result.decision, true, 120, None, None, 0);

        service.shutdown(Duration::from_secs(5)).await.unwrap();
        // a second shutdown call must be a no-op, not a panic or hang
        service.shutdown(Duration::from_secs(5)).await.unwrap();
    }
}
