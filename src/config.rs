// Cortex configuration — loaded from TOML once at startup; environment
// variables are consumed only as opaque strings handed to store backends.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CortexError, CortexResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for memory logs, preferences, discovery cache, feedback DB.
    pub base_dir: PathBuf,
    /// Directory scanned recursively for steering YAML rules.
    pub steering_dir: PathBuf,
    /// Directory scanned for hook YAML files (`<authDir>/hooks/`).
    pub hooks_dir: PathBuf,

    /// Quota cooldown, in seconds. Open Question #4 — configurable, default 5 min.
    pub quota_cooldown_secs: u64,
    /// Discovery cache TTL, in seconds, default per-source unless overridden.
    pub discovery_grace_days: u64,
    /// Heartbeat poll interval, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Per-checker timeout, in seconds.
    pub heartbeat_checker_timeout_secs: u64,
    /// `CheckAll` overall timeout, in seconds.
    pub heartbeat_checkall_timeout_secs: u64,

    /// Memory retention, in days.
    pub memory_retention_days: u64,
    /// Roll the routing-history log after it exceeds this size.
    pub memory_max_log_size_mb: u64,

    /// Learning engine analysis interval, in seconds (default 24h).
    pub learning_interval_secs: u64,
    /// Minimum sample size before analysis runs.
    pub learning_min_sample_size: usize,
    /// Confidence threshold for auto-apply.
    pub learning_confidence_threshold: f64,
    /// Whether the learning engine writes preferences back automatically.
    pub learning_auto_apply: bool,
    /// How many recent decisions `AnalyzeUser` reads.
    pub learning_history_window: usize,

    /// Semantic tier cosine-similarity acceptance threshold.
    pub semantic_threshold: f64,

    /// Cascade quality acceptance threshold.
    pub cascade_quality_threshold: f64,
    /// Max cascades per request.
    pub cascade_max: u32,

    /// Feedback retention, in days (minimum 1).
    pub feedback_retention_days: u64,

    /// Hook/event bus bounded queue capacity per event type.
    pub event_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cortex-router");
        Self {
            steering_dir: base_dir.join("steering"),
            hooks_dir: base_dir.join("hooks"),
            base_dir,
            quota_cooldown_secs: 5 * 60,
            discovery_grace_days: 7,
            heartbeat_interval_secs: 60,
            heartbeat_checker_timeout_secs: 5,
            heartbeat_checkall_timeout_secs: 30,
            memory_retention_days: 90,
            memory_max_log_size_mb: 64,
            learning_interval_secs: 24 * 60 * 60,
            learning_min_sample_size: 100,
            learning_confidence_threshold: 0.85,
            learning_auto_apply: true,
            learning_history_window: 1000,
            semantic_threshold: 0.85,
            cascade_quality_threshold: 0.7,
            cascade_max: 2,
            feedback_retention_days: 90,
            event_queue_capacity: 1024,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> CortexResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    /// Store-selection environment variables (`DEPLOY`, `PGSTORE_DSN`,
    /// `GITSTORE_GIT_URL`, `OBJECTSTORE_ENDPOINT`, `OPENAI_API_KEY`,
    /// `GEMINI_API_KEY`, `ANTHROPIC_API_KEY`) are opaque to this crate; they
    /// are read only by the external `ConfigStore`/`TokenStore` collaborators.
    pub fn load_or_default(path: &Path) -> CortexResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_secs(self.quota_cooldown_secs)
    }

    pub fn feedback_retention_days(&self) -> u64 {
        self.feedback_retention_days.max(1)
    }

    pub fn history_path(&self) -> PathBuf {
        self.base_dir.join("routing-history.jsonl")
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.base_dir.join("daily")
    }

    pub fn preferences_dir(&self) -> PathBuf {
        self.base_dir.join("user-preferences")
    }

    pub fn quirks_path(&self) -> PathBuf {
        self.base_dir.join("provider-quirks.md")
    }

    pub fn analytics_dir(&self) -> PathBuf {
        self.base_dir.join("analytics")
    }

    pub fn discovery_cache_dir(&self) -> PathBuf {
        self.base_dir.join("discovery-cache")
    }

    pub fn feedback_db_path(&self) -> PathBuf {
        self.discovery_cache_dir().join("feedback.db")
    }

    pub fn ensure_dirs(&self) -> CortexResult<()> {
        for dir in [
            &self.base_dir,
            &self.steering_dir,
            &self.hooks_dir,
            &self.daily_dir(),
            &self.preferences_dir(),
            &self.analytics_dir(),
            &self.discovery_cache_dir(),
        ] {
            std::fs::create_dir_all(dir).map_err(CortexError::Io)?;
        }
        Ok(())
    }
}
