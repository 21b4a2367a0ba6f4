// Feedback Collector — durably records routing outcomes keyed by
// timestamp for later analytics, with retention enforcement.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CortexError, CortexResult};
use crate::model::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub timestamp: i64,
    pub api_key_hash: String,
    pub tier: Tier,
    pub selected_model: String,
    pub provider: String,
    pub success: bool,
    pub latency_ms: u64,
    pub cascade_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: u64,
    pub success_rate: f64,
    pub tier_distribution: HashMap<String, u64>,
    pub cascade_rate: f64,
    pub avg_latency_ms: f64,
}

/// Embedded SQLite-backed recorder for routing outcomes. Records are
/// rejected until `initialize` has run; `retention_days` is clamped to a
/// minimum of 1.
pub struct Collector {
    db_path: PathBuf,
    retention_days: u64,
    conn: Mutex<Option<Connection>>,
    initialized: AtomicBool,
}

impl Collector {
    pub fn new(db_path: PathBuf, retention_days: u64) -> Self {
        Self {
            db_path,
            retention_days: retention_days.max(1),
            conn: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn initialize(&self) -> CortexResult<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path).map_err(CortexError::from)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                api_key_hash TEXT NOT NULL,
                tier TEXT NOT NULL,
                selected_model TEXT NOT NULL,
                provider TEXT NOT NULL,
                success INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                cascade_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_timestamp ON feedback(timestamp);",
        )
        .map_err(CortexError::from)?;
        *self.conn.lock() = Some(conn);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn record(&self, record: &FeedbackRecord) -> CortexResult<()> {
        if !self.is_enabled() {
            return Err(CortexError::invalid_input("feedback collector not initialized"));
        }
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| {
            CortexError::Fatal("feedback collector connection missing after initialization".into())
        })?;
        conn.execute(
            "INSERT INTO feedback
                (timestamp, api_key_hash, tier, selected_model, provider, success, latency_ms, cascade_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.timestamp,
                record.api_key_hash,
                record.tier.as_str(),
                record.selected_model,
                record.provider,
                record.success as i64,
                record.latency_ms as i64,
                record.cascade_count as i64,
            ],
        )
        .map_err(CortexError::from)?;
        Ok(())
    }

    pub fn get_recent(&self, limit: usize) -> CortexResult<Vec<FeedbackRecord>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| {
            CortexError::Fatal("feedback collector connection missing after initialization".into())
        })?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, api_key_hash, tier, selected_model, provider, success, latency_ms, cascade_count
                 FROM feedback ORDER BY timestamp DESC LIMIT ?1",
            )
            .map_err(CortexError::from)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_record)
            .map_err(CortexError::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(CortexError::from)?);
        }
        Ok(out)
    }

    pub fn get_stats(&self) -> CortexResult<FeedbackStats> {
        if !self.is_enabled() {
            return Ok(FeedbackStats::default());
        }
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| {
            CortexError::Fatal("feedback collector connection missing after initialization".into())
        })?;

        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM feedback", [], |r| r.get(0))
            .map_err(CortexError::from)?;
        if total == 0 {
            return Ok(FeedbackStats::default());
        }

        let successes: i64 = conn
            .query_row("SELECT COUNT(*) FROM feedback WHERE success = 1", [], |r| r.get(0))
            .map_err(CortexError::from)?;
        let cascaded: i64 = conn
            .query_row("SELECT COUNT(*) FROM feedback WHERE cascade_count > 0", [], |r| r.get(0))
            .map_err(CortexError::from)?;
        let avg_latency: f64 = conn
            .query_row("SELECT AVG(latency_ms) FROM feedback", [], |r| r.get(0))
            .map_err(CortexError::from)?;

        let mut tier_distribution = HashMap::new();
        let mut stmt = conn
            .prepare("SELECT tier, COUNT(*) FROM feedback GROUP BY tier")
            .map_err(CortexError::from)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
            .map_err(CortexError::from)?;
        for row in rows {
            let (tier, count) = row.map_err(CortexError::from)?;
            tier_distribution.insert(tier, count as u64);
        }

        Ok(FeedbackStats {
            total: total as u64,
            success_rate: successes as f64 / total as f64,
            tier_distribution,
            cascade_rate: cascaded as f64 / total as f64,
            avg_latency_ms: avg_latency,
        })
    }

    /// Deletes rows older than `retention_days`; called on `shutdown` and
    /// from a periodic cleanup tick.
    pub fn cleanup(&self) -> CortexResult<u64> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let cutoff = crate::clock::now_unix() - (self.retention_days as i64) * 86_400;
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| {
            CortexError::Fatal("feedback collector connection missing after initialization".into())
        })?;
        let deleted = conn
            .execute("DELETE FROM feedback WHERE timestamp < ?1", params![cutoff])
            .map_err(CortexError::from)?;
        Ok(deleted as u64)
    }

    pub fn shutdown(&self) -> CortexResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.cleanup()?;
        self.initialized.store(false, Ordering::Release);
        *self.conn.lock() = None;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<FeedbackRecord> {
    let tier_str: String = row.get(2)?;
    let tier = match tier_str.as_str() {
        "steered" => Tier::Steered,
        "learned" => Tier::Learned,
        "semantic" => Tier::Semantic,
        "cognitive" => Tier::Cognitive,
        _ => Tier::Reflex,
    };
    Ok(FeedbackRecord {
        timestamp: row.get(0)?,
        api_key_hash: row.get(1)?,
        tier,
        selected_model: row.get(3)?,
        provider: row.get(4)?,
        success: row.get::<_, i64>(5)? != 0,
        latency_ms: row.get::<_, i64>(6)? as u64,
        cascade_count: row.get::<_, i64>(7)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64, success: bool) -> FeedbackRecord {
        FeedbackRecord {
            timestamp: ts,
            api_key_hash: "sha256:u1".into(),
            tier: Tier::Reflex,
            selected_model: "ollama:qwen:0.5b".into(),
            provider: "ollama".into(),
            success,
            latency_ms: 120,
            cascade_count: 0,
        }
    }

    #[test]
    fn records_are_rejected_before_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(dir.path().join("feedback.db"), 90);
        assert!(collector.record(&record(1, true)).is_err());
    }

    #[test]
    fn record_and_stats_after_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(dir.path().join("feedback.db"), 90);
        collector.initialize().unwrap();
        collector.record(&record(1, true)).unwrap();
        collector.record(&record(2, false)).unwrap();
        let stats = collector.get_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cleanup_respects_retention_minimum_of_one_day() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(dir.path().join("feedback.db"), 0);
        collector.initialize().unwrap();
        let old_ts = crate::clock::now_unix() - 5 * 86_400;
        collector.record(&record(old_ts, true)).unwrap();
        collector.record(&record(crate::clock::now_unix(), true)).unwrap();
        let deleted = collector.cleanup().unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(collector.get_stats().unwrap().total, 1);
    }

    #[test]
    fn get_recent_orders_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(dir.path().join("feedback.db"), 90);
        collector.initialize().unwrap();
        collector.record(&record(1, true)).unwrap();
        collector.record(&record(2, true)).unwrap();
        let recent = collector.get_recent(10).unwrap();
        assert_eq!(recent[0].timestamp, 2);
        assert_eq!(recent[1].timestamp, 1);
    }
}
