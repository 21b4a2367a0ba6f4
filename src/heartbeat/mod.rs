// Heartbeat Monitor — periodically probes registered `HealthChecker`s,
// maintains a status map, and emits lifecycle events on state transitions
// and quota threshold crossings.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CortexError, CortexResult};
use crate::hooks::EventBus;
use crate::model::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub provider: String,
    pub status: HealthState,
    pub last_check: i64,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub quota_used: Option<u64>,
    pub quota_limit: Option<u64>,
    pub models_count: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaLevel {
    Ok,
    Warning,
    Critical,
    Exceeded,
}

/// Ladder: `used/limit >= 1 -> Exceeded`, `>= critical -> Critical`,
/// `>= warning -> Warning`, else `OK`.
pub fn calculate_quota_status(used: u64, limit: u64, warning: f64, critical: f64) -> QuotaLevel {
    if limit == 0 {
        return QuotaLevel::Ok;
    }
    let ratio = used as f64 / limit as f64;
    if ratio >= 1.0 {
        QuotaLevel::Exceeded
    } else if ratio >= critical {
        QuotaLevel::Critical
    } else if ratio >= warning {
        QuotaLevel::Warning
    } else {
        QuotaLevel::Ok
    }
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> CortexResult<HealthStatus>;
    fn supports_quota(&self) -> bool;
}

pub struct HeartbeatMonitor {
    checkers: Vec<Arc<dyn HealthChecker>>,
    statuses: RwLock<HashMap<String, HealthStatus>>,
    bus: Arc<EventBus>,
    checker_timeout: Duration,
    checkall_timeout: Duration,
    warning_threshold: f64,
    critical_threshold: f64,
}

impl HeartbeatMonitor {
    pub fn new(
        bus: Arc<EventBus>,
        checker_timeout: Duration,
        checkall_timeout: Duration,
    ) -> Self {
        Self {
            checkers: Vec::new(),
            statuses: RwLock::new(HashMap::new()),
            bus,
            checker_timeout,
            checkall_timeout,
            warning_threshold: 0.75,
            critical_threshold: 0.90,
        }
    }

    pub fn register(&mut self, checker: Arc<dyn HealthChecker>) {
        self.checkers.push(checker);
    }

    pub async fn check_provider(&self, name: &str) -> CortexResult<HealthStatus> {
        let checker = self
            .checkers
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| CortexError::not_found(format!("unknown provider: {name}")))?;
        let status = self.probe_one(checker.clone()).await;
        self.apply_transition(&status);
        self.statuses.write().insert(name.to_string(), status.clone());
        Ok(status)
    }

    /// Concurrently probes every registered checker under `checkall_timeout`,
    /// merges results, and emits transition/quota events.
    pub async fn check_all(&self) {
        let deadline = tokio::time::Instant::now() + self.checkall_timeout;
        let futures = self.checkers.iter().cloned().map(|c| {
            let deadline = deadline;
            async move {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                tokio::time::timeout(remaining, c.check())
                    .await
                    .unwrap_or_else(|_| {
                        Ok(HealthStatus {
                            provider: c.name().to_string(),
                            status: HealthState::Unknown,
                            last_check: crate::clock::now_unix(),
                            response_time_ms: remaining.as_millis() as u64,
                            error_message: Some("timeout".to_string()),
                            quota_used: None,
                            quota_limit: None,
                            models_count: 0,
                            metadata: HashMap::new(),
                        })
                    })
                    .unwrap_or_else(|e| HealthStatus {
                        provider: c.name().to_string(),
                        status: HealthState::Unknown,
                        last_check: crate::clock::now_unix(),
                        response_time_ms: 0,
                        error_message: Some(crate::error::redact(&e.to_string())),
                        quota_used: None,
                        quota_limit: None,
                        models_count: 0,
                        metadata: HashMap::new(),
                    })
            }
        });

        let results = futures::future::join_all(futures).await;
        for status in results {
            self.apply_transition(&status);
            self.statuses
                .write()
                .insert(status.provider.clone(), status);
        }
    }

    async fn probe_one(&self, checker: Arc<dyn HealthChecker>) -> HealthStatus {
        match tokio::time::timeout(self.checker_timeout, checker.check()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => HealthStatus {
                provider: checker.name().to_string(),
                status: HealthState::Unknown,
                last_check: crate::clock::now_unix(),
                response_time_ms: 0,
                error_message: Some(crate::error::redact(&e.to_string())),
                quota_used: None,
                quota_limit: None,
                models_count: 0,
                metadata: HashMap::new(),
            },
            Err(_) => HealthStatus {
                provider: checker.name().to_string(),
                status: HealthState::Unknown,
                last_check: crate::clock::now_unix(),
                response_time_ms: self.checker_timeout.as_millis() as u64,
                error_message: Some("timeout".to_string()),
                quota_used: None,
                quota_limit: None,
                models_count: 0,
                metadata: HashMap::new(),
            },
        }
    }

    fn apply_transition(&self, status: &HealthStatus) {
        let previous = self.statuses.read().get(&status.provider).cloned();
        let was_bad = previous
            .as_ref()
            .map(|p| matches!(p.status, HealthState::Unhealthy | HealthState::Degraded))
            .unwrap_or(false);
        let is_bad = matches!(status.status, HealthState::Unhealthy | HealthState::Degraded);

        if is_bad && !was_bad {
            let event = crate::model::EventContext::new(EventKind::ProviderUnavailable)
                .with_provider(status.provider.clone());
            crate::hooks::bridge_heartbeat_event(&self.bus, event);
        } else if !is_bad && was_bad {
            let event = crate::model::EventContext::new(EventKind::ProviderRecovered)
                .with_provider(status.provider.clone());
            crate::hooks::bridge_heartbeat_event(&self.bus, event);
        }

        if matches!(status.status, HealthState::Unhealthy) {
            let event = crate::model::EventContext::new(EventKind::HealthCheckFailed)
                .with_provider(status.provider.clone());
            crate::hooks::bridge_heartbeat_event(&self.bus, event);
        }

        if let (Some(used), Some(limit)) = (status.quota_used, status.quota_limit) {
            let level = calculate_quota_status(used, limit, self.warning_threshold, self.critical_threshold);
            let kind = match level {
                QuotaLevel::Warning => Some(EventKind::QuotaWarning),
                QuotaLevel::Critical => Some(EventKind::QuotaCritical),
                QuotaLevel::Exceeded => Some(EventKind::QuotaExceeded),
                QuotaLevel::Ok => None,
            };
            if let Some(kind) = kind {
                let event = crate::model::EventContext::new(kind)
                    .with_provider(status.provider.clone());
                crate::hooks::bridge_heartbeat_event(&self.bus, event);
            }
        }
    }

    pub fn get_all_statuses(&self) -> HashMap<String, HealthStatus> {
        self.statuses.read().clone()
    }

    pub fn get_status(&self, name: &str) -> Option<HealthStatus> {
        self.statuses.read().get(name).cloned()
    }

    /// Launch the periodic check loop; returns a handle cancellable via
    /// `tokio::sync::watch` closed from the caller (cooperative shutdown).
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
                        self.check_all().await;
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
