// Memory Subsystem — append-only routing history, learned user
// preferences, provider quirks, and periodically computed analytics.
//
// The router appends a `RoutingDecision` with no outcome yet;
// `record_outcome` appends a correlating outcome record keyed by
// `request_hash`. Readers fold the two without ever rewriting an existing
// line, preserving the append-only invariant. `learn_from_outcome` is a
// no-op here — the Learning Engine (`crate::learning`) is the sole writer
// of `UserPreferences`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::CortexResult;
use crate::hashing::format_bytes;
use crate::model::RoutingDecision;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogEntry {
    Decision(RoutingDecision),
    Outcome(OutcomeRecord),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub request_hash: String,
    pub timestamp: i64,
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub quality_score: f64,
    pub user_feedback: Option<String>,
}

/// A decision folded with its (possibly absent) outcome — what readers
/// actually work with.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub decision: RoutingDecision,
    pub outcome: Option<OutcomeRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub api_key_hash: String,
    #[serde(default)]
    pub model_preferences: HashMap<String, String>,
    #[serde(default)]
    pub model_confidences: HashMap<String, f64>,
    #[serde(default)]
    pub provider_bias: HashMap<String, f64>,
    #[serde(default)]
    pub custom_rules: Vec<String>,
    pub last_updated: i64,
    pub last_analyzed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quirk {
    pub provider: String,
    pub issue: String,
    pub workaround: String,
    pub discovered: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_decisions: u64,
    pub total_users: u64,
    pub disk_usage_bytes: u64,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

impl MemoryStats {
    pub fn disk_usage_human(&self) -> String {
        format_bytes(self.disk_usage_bytes)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analytics {
    pub tier_counts: HashMap<String, u64>,
    pub avg_confidence: f64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}

/// Owns every on-disk artifact under `base_dir`. History writes are
/// serialized by a single file lock; per-user preference writes are
/// serialized per user so a decision and its later outcome for the same
/// user can never interleave with another write for that same user.
pub struct MemoryManager {
    base_dir: PathBuf,
    retention_days: u64,
    max_log_size_mb: u64,
    history_lock: Mutex<()>,
    user_locks: Mutex<HashMap<String, std::sync::Arc<Mutex<()>>>>,
}

impl MemoryManager {
    pub fn new(base_dir: PathBuf, retention_days: u64, max_log_size_mb: u64) -> CortexResult<Self> {
        std::fs::create_dir_all(&base_dir)?;
        std::fs::create_dir_all(base_dir.join("daily"))?;
        std::fs::create_dir_all(base_dir.join("user-preferences"))?;
        std::fs::create_dir_all(base_dir.join("analytics"))?;
        Ok(Self {
            base_dir,
            retention_days,
            max_log_size_mb,
            history_lock: Mutex::new(()),
            user_locks: Mutex::new(HashMap::new()),
        })
    }

    fn history_path(&self) -> PathBuf {
        self.base_dir.join("routing-history.jsonl")
    }

    fn daily_path(&self, day: &str) -> PathBuf {
        self.base_dir.join("daily").join(format!("{day}.jsonl"))
    }

    fn preferences_path(&self, api_key_hash: &str) -> PathBuf {
        self.base_dir.join("user-preferences").join(format!("{}.json", sanitize(api_key_hash)))
    }

    fn quirks_path(&self) -> PathBuf {
        self.base_dir.join("provider-quirks.md")
    }

    fn user_lock(&self, api_key_hash: &str) -> std::sync::Arc<Mutex<()>> {
        self.user_locks
            .lock()
            .entry(api_key_hash.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }

    fn append_line(path: &Path, line: &str) -> CortexResult<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }

    fn day_for(timestamp: i64) -> String {
        chrono::DateTime::from_timestamp(timestamp, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string()
    }

    /// `RecordRouting`: fsync'd append; idempotent on retry by
    /// `(timestamp, request_hash)` — a duplicate append with the same pair
    /// already present in the day's shard is skipped.
    pub fn record_routing(&self, decision: &RoutingDecision) -> CortexResult<()> {
        let _guard = self.history_lock.lock();
        let day = Self::day_for(decision.timestamp);
        let daily_path = self.daily_path(&day);

        if Self::already_recorded(&daily_path, decision.timestamp, &decision.request_hash) {
            return Ok(());
        }

        let line = serde_json::to_string(&LogEntry::Decision(decision.clone()))?;
        Self::append_line(&self.history_path(), &line)?;
        Self::append_line(&daily_path, &line)?;
        self.maybe_roll_history()?;
        Ok(())
    }

    fn already_recorded(daily_path: &Path, timestamp: i64, request_hash: &str) -> bool {
        let Ok(file) = File::open(daily_path) else { return false };
        for line in BufReader::new(file).lines().map_while(Result::ok) {
            if let Ok(LogEntry::Decision(d)) = serde_json::from_str::<LogEntry>(&line) {
                if d.timestamp == timestamp && d.request_hash == request_hash {
                    return true;
                }
            }
        }
        false
    }

    /// Appends a correlating outcome record (Open Question #1's decision).
    pub fn record_outcome(&self, outcome: &OutcomeRecord) -> CortexResult<()> {
        let _guard = self.history_lock.lock();
        let day = Self::day_for(outcome.timestamp);
        let line = serde_json::to_string(&LogEntry::Outcome(outcome.clone()))?;
        Self::append_line(&self.history_path(), &line)?;
        Self::append_line(&self.daily_path(&day), &line)?;
        Ok(())
    }

    /// Rolls `routing-history.jsonl` to a timestamped, gzip-compressed
    /// file once it exceeds `max_log_size_mb`.
    fn maybe_roll_history(&self) -> CortexResult<()> {
        let path = self.history_path();
        let Ok(meta) = std::fs::metadata(&path) else { return Ok(()) };
        let max_bytes = self.max_log_size_mb * 1024 * 1024;
        if meta.len() < max_bytes {
            return Ok(());
        }

        let rolled_name = format!("routing-history-{}.jsonl.gz", crate::clock::now_unix());
        let rolled_path = self.base_dir.join(rolled_name);
        let raw = std::fs::read(&path)?;
        let out = File::create(&rolled_path)?;
        let mut encoder = flate2::write::GzEncoder::new(out, flate2::Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()?;
        std::fs::write(&path, b"")?;
        Ok(())
    }

    /// Reads every entry across the daily shards (bounded by `retention_days`
    /// worth of files on disk) and folds decisions with their outcomes.
    fn read_all_raw(&self) -> CortexResult<Vec<HistoryRecord>> {
        let daily_dir = self.base_dir.join("daily");
        let mut decisions: HashMap<String, RoutingDecision> = HashMap::new();
        let mut outcomes: HashMap<String, OutcomeRecord> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        let mut shard_paths: Vec<PathBuf> = Vec::new();
        if let Ok(read_dir) = std::fs::read_dir(&daily_dir) {
            for entry in read_dir.flatten() {
                shard_paths.push(entry.path());
            }
        }
        shard_paths.sort();

        for path in shard_paths {
            let Ok(file) = File::open(&path) else { continue };
            for line in BufReader::new(file).lines() {
                let Ok(line) = line else { continue };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(&line) {
                    Ok(LogEntry::Decision(d)) => {
                        if !decisions.contains_key(&d.request_hash) {
                            order.push(d.request_hash.clone());
                        }
                        decisions.insert(d.request_hash.clone(), d);
                    }
                    Ok(LogEntry::Outcome(o)) => {
                        outcomes.insert(o.request_hash.clone(), o);
                    }
                    // Corrupt line (e.g. truncated by a crash mid-write) — skip
                    // and keep reading; readers must tolerate a partial line.
                    Err(_) => continue,
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|hash| {
                let decision = decisions.remove(&hash)?;
                let outcome = outcomes.remove(&hash);
                Some(HistoryRecord { decision, outcome })
            })
            .collect())
    }

    /// `GetHistory`: most-recent-first, limited to `limit`, for one user.
    pub fn get_history(&self, api_key_hash: &str, limit: usize) -> CortexResult<Vec<HistoryRecord>> {
        let mut all = self.read_all_raw()?;
        all.retain(|r| r.decision.api_key_hash == api_key_hash);
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }

    /// `GetAllHistory`: most-recent-first across every user.
    pub fn get_all_history(&self, limit: usize) -> CortexResult<Vec<HistoryRecord>> {
        let mut all = self.read_all_raw()?;
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }

    /// Every distinct `api_key_hash` that has ever routed — the Learning
    /// Engine's starting point for `AnalyzeAll`.
    pub fn list_known_users(&self) -> CortexResult<Vec<String>> {
        let all = self.read_all_raw()?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut users = Vec::new();
        for record in all {
            if seen.insert(record.decision.api_key_hash.clone()) {
                users.push(record.decision.api_key_hash);
            }
        }
        Ok(users)
    }

    pub fn get_user_preferences(&self, api_key_hash: &str) -> CortexResult<Option<UserPreferences>> {
        let path = self.preferences_path(api_key_hash);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Write-then-rename for atomic replace.
    pub fn update_user_preferences(&self, prefs: &UserPreferences) -> CortexResult<()> {
        let lock = self.user_lock(&prefs.api_key_hash);
        let _guard = lock.lock();
        let path = self.preferences_path(&prefs.api_key_hash);
        let tmp_path = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(prefs)?;
        std::fs::write(&tmp_path, text)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn delete_user_preferences(&self, api_key_hash: &str) -> CortexResult<()> {
        let lock = self.user_lock(api_key_hash);
        let _guard = lock.lock();
        let path = self.preferences_path(api_key_hash);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn add_quirk(&self, quirk: &Quirk) -> CortexResult<()> {
        let _guard = self.history_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(self.quirks_path())?;
        writeln!(
            file,
            "## {} — {}\n- issue: {}\n- workaround: {}\n",
            quirk.provider, quirk.discovered, quirk.issue, quirk.workaround
        )?;
        Ok(())
    }

    pub fn get_provider_quirks(&self, provider: &str) -> CortexResult<Vec<Quirk>> {
        let path = self.quirks_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        // The quirks file is a human-readable append log, not a structured
        // store; provider filtering here is best-effort text matching over
        // the section headers written by `add_quirk`.
        let text = std::fs::read_to_string(path)?;
        let mut quirks = Vec::new();
        let mut lines = text.lines().peekable();
        while let Some(line) = lines.next() {
            let Some(rest) = line.strip_prefix("## ") else { continue };
            let Some((p, discovered)) = rest.split_once(" — ") else { continue };
            if p != provider {
                continue;
            }
            let mut issue = String::new();
            let mut workaround = String::new();
            while let Some(next) = lines.peek() {
                if next.starts_with("## ") || next.trim().is_empty() {
                    break;
                }
                let next = lines.next().unwrap();
                if let Some(v) = next.strip_prefix("- issue: ") {
                    issue = v.to_string();
                } else if let Some(v) = next.strip_prefix("- workaround: ") {
                    workaround = v.to_string();
                }
            }
            quirks.push(Quirk {
                provider: p.to_string(),
                issue,
                workaround,
                discovered: discovered.parse().unwrap_or(0),
            });
        }
        Ok(quirks)
    }

    /// Online learning signal — intentionally a no-op (Open Question #3).
    /// The Learning Engine (`crate::learning`) is the sole writer of
    /// `UserPreferences`; this function only logs that it was invoked so a
    /// caller relying on the old dual-write behavior notices in logs.
    pub fn learn_from_outcome(&self, decision: &RoutingDecision) {
        log::debug!(
            "learn_from_outcome no-op for api_key_hash={} intent={} (owned by the learning engine)",
            decision.api_key_hash,
            decision.intent
        );
    }

    pub fn get_stats(&self) -> CortexResult<MemoryStats> {
        let all = self.read_all_raw()?;
        let mut users: HashSet<&str> = HashSet::new();
        let mut oldest = None;
        let mut newest = None;
        for r in &all {
            users.insert(r.decision.api_key_hash.as_str());
            oldest = Some(oldest.map_or(r.decision.timestamp, |o: i64| o.min(r.decision.timestamp)));
            newest = Some(newest.map_or(r.decision.timestamp, |n: i64| n.max(r.decision.timestamp)));
        }
        let disk_usage_bytes = dir_size(&self.base_dir).unwrap_or(0);
        Ok(MemoryStats {
            total_decisions: all.len() as u64,
            total_users: users.len() as u64,
            disk_usage_bytes,
            oldest_timestamp: oldest,
            newest_timestamp: newest,
        })
    }

    pub fn compute_analytics(&self) -> CortexResult<Analytics> {
        let all = self.read_all_raw()?;
        if all.is_empty() {
            return Ok(Analytics::default());
        }
        let mut tier_counts: HashMap<String, u64> = HashMap::new();
        let mut confidence_sum = 0.0;
        let mut latency_sum = 0.0;
        let mut success_count = 0u64;
        let mut with_outcome = 0u64;
        for r in &all {
            *tier_counts.entry(r.decision.tier.as_str().to_string()).or_insert(0) += 1;
            confidence_sum += r.decision.confidence;
            latency_sum += r.decision.latency_ms as f64;
            if let Some(outcome) = &r.outcome {
                with_outcome += 1;
                if outcome.success {
                    success_count += 1;
                }
            }
        }
        let n = all.len() as f64;
        Ok(Analytics {
            tier_counts,
            avg_confidence: confidence_sum / n,
            avg_latency_ms: latency_sum / n,
            success_rate: if with_outcome > 0 { success_count as f64 / with_outcome as f64 } else { 0.0 },
        })
    }

    pub fn get_analytics(&self) -> CortexResult<Analytics> {
        self.compute_analytics()
    }

    /// Removes history older than `retention_days`; in production a
    /// fuller implementation would also gzip aged shards in place, but
    /// `maybe_roll_history`'s rotation already covers size-driven
    /// compression, so cleanup here only prunes by age.
    pub fn cleanup(&self) -> CortexResult<()> {
        let _guard = self.history_lock.lock();
        let now = crate::clock::now_unix();
        let cutoff = now - (self.retention_days as i64) * 86_400;
        let daily_dir = self.base_dir.join("daily");
        let Ok(read_dir) = std::fs::read_dir(&daily_dir) else { return Ok(()) };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let Ok(day) = chrono::NaiveDate::parse_from_str(stem, "%Y-%m-%d") else { continue };
            let day_ts = day.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
            if day_ts < cutoff {
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

fn sanitize(hash: &str) -> String {
    hash.chars().map(|c| if c.is_ascii_alphanumeric() || c == ':' { c } else { '_' }).collect()
}

fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    if !dir.exists() {
        return Ok(0);
    }
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}
