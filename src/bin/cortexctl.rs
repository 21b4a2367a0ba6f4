// cortexctl — operator CLI for the router: memory/heartbeat/steering/
// hooks/learning subcommands in clap's derive idiom.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use cortex_router::config::Config;
use cortex_router::discovery::ModelDiscovery;
use cortex_router::error::{CortexError, CortexResult};
use cortex_router::expr::{self, FieldValue, Fields};
use cortex_router::heartbeat::HeartbeatMonitor;
use cortex_router::hooks::{EventBus, Hook, HookManager, LoggingActionRunner};
use cortex_router::learning::LearningEngine;
use cortex_router::memory::{HistoryRecord, MemoryManager};
use cortex_router::model::EventKind;
use cortex_router::registry::ModelRegistry;
use cortex_router::steering::SteeringEngine;

/// `HistoryRecord` folds a decision with its (possibly absent) outcome but
/// isn't itself serializable; this is the flattened shape `--format json`
/// renders for `memory history`.
#[derive(serde::Serialize)]
struct HistoryRow {
    timestamp: i64,
    tier: String,
    intent: String,
    selected_model: String,
    confidence: f64,
    success: Option<bool>,
}

impl From<&HistoryRecord> for HistoryRow {
    fn from(r: &HistoryRecord) -> Self {
        Self {
            timestamp: r.decision.timestamp,
            tier: r.decision.tier.as_str().to_string(),
            intent: r.decision.intent.clone(),
            selected_model: r.decision.selected_model.clone(),
            confidence: r.decision.confidence,
            success: r.outcome.as_ref().map(|o| o.success),
        }
    }
}

/// `Hook`/`HookAction` carry no `Serialize` impl (they're load-only
/// definitions); this is the flattened shape `--format json` renders for
/// `hooks list`.
#[derive(serde::Serialize)]
struct HookRow {
    id: String,
    name: String,
    enabled: bool,
    event: String,
    action: String,
}

impl From<&Hook> for HookRow {
    fn from(h: &Hook) -> Self {
        Self {
            id: h.id.clone(),
            name: h.name.clone(),
            enabled: h.enabled,
            event: format!("{:?}", h.event),
            action: format!("{:?}", h.action),
        }
    }
}

#[derive(Parser)]
#[command(name = "cortexctl", version, about = "Operate a local cortex-router instance")]
struct Cli {
    /// Path to the TOML config file. Falls back to built-in defaults if absent.
    #[arg(long, global = true, env = "CORTEX_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Command {
    /// Routing history, user preferences, and disk-resident memory.
    Memory {
        #[command(subcommand)]
        cmd: MemoryCmd,
    },
    /// Provider health and quota status, and model discovery.
    Heartbeat {
        #[command(subcommand)]
        cmd: HeartbeatCmd,
    },
    /// Declarative steering rules.
    Steering {
        #[command(subcommand)]
        cmd: SteeringCmd,
    },
    /// Declarative hook definitions and event-condition dry runs.
    Hooks {
        #[command(subcommand)]
        cmd: HooksCmd,
    },
    /// Per-user statistical preference learning.
    Learning {
        #[command(subcommand)]
        cmd: LearningCmd,
    },
}

#[derive(Subcommand)]
enum MemoryCmd {
    /// Create the on-disk memory layout if it doesn't already exist.
    Init,
    /// Disk usage and decision/user counts.
    Status,
    /// Routing history for one user (most-recent-first).
    History {
        #[arg(long)]
        api_key_hash: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// A user's learned preferences.
    Preferences {
        #[arg(long)]
        api_key_hash: String,
    },
    /// Destroy all memory after backing it up to a tarball. Requires --confirm.
    Reset {
        #[arg(long)]
        confirm: bool,
    },
    /// Write a gzip-compressed tarball of the memory directory.
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum HeartbeatCmd {
    /// Status of every registered health checker.
    Status,
    /// Probe one provider by name.
    Check { provider: String },
    /// Quota levels derived from the last known health status of each provider.
    Quota,
    /// Run one model-discovery sweep and print what was found.
    Discover,
}

#[derive(Subcommand)]
enum SteeringCmd {
    /// Print every loaded steering rule, in priority order.
    List,
    /// Evaluate the loaded rules against a synthetic request.
    Test {
        #[arg(long)]
        intent: String,
        #[arg(long, default_value_t = 12)]
        hour: u8,
        #[arg(long, default_value_t = 0)]
        day_of_week: u8,
    },
    /// Reload the steering directory from disk.
    Reload,
    /// Reload and report how many well-formed rules were loaded.
    Validate,
}

#[derive(Subcommand)]
enum HooksCmd {
    /// Print every loaded hook definition.
    List,
    /// Flip a hook's `enabled` flag to true and rewrite its file.
    Enable { id: String },
    /// Flip a hook's `enabled` flag to false and rewrite its file.
    Disable { id: String },
    /// Evaluate every hook registered for --event against synthetic --data.
    Test {
        #[arg(long)]
        event: String,
        #[arg(long = "data", value_parser = parse_key_val)]
        data: Vec<(String, String)>,
    },
    /// Report what's loaded (the core keeps no persisted firing log).
    Logs,
    /// Reload the hooks directory from disk.
    Reload,
}

#[derive(Subcommand)]
enum LearningCmd {
    /// Print the learning engine's configured thresholds and schedule.
    Status,
    /// Run one analysis pass for a user without writing anything back.
    Analyze {
        #[arg(long)]
        api_key_hash: String,
    },
    /// Run one analysis pass and force a write-through regardless of
    /// auto-apply configuration, provided confidence clears the threshold.
    Apply {
        #[arg(long)]
        api_key_hash: String,
    },
    /// Delete a user's learned preferences.
    Reset {
        #[arg(long)]
        api_key_hash: String,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected key=value, got '{s}'")),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

fn load_config(cli: &Cli) -> CortexResult<Config> {
    let path = cli.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cortex-router")
            .join("config.toml")
    });
    let config = Config::load_or_default(&path)?;
    config.ensure_dirs()?;
    Ok(config)
}

fn run(cli: Cli) -> CortexResult<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Memory { cmd } => run_memory(&config, format, cmd),
        Command::Heartbeat { cmd } => run_heartbeat(&config, format, cmd),
        Command::Steering { cmd } => run_steering(&config, format, cmd),
        Command::Hooks { cmd } => run_hooks(&config, format, cmd),
        Command::Learning { cmd } => run_learning(&config, format, cmd),
    }
}

fn memory_manager(config: &Config) -> CortexResult<MemoryManager> {
    MemoryManager::new(config.base_dir.clone(), config.memory_retention_days, config.memory_max_log_size_mb)
}

fn run_memory(config: &Config, format: OutputFormat, cmd: MemoryCmd) -> CortexResult<()> {
    match cmd {
        MemoryCmd::Init => {
            let _ = memory_manager(config)?;
            println!("memory directory initialized at {}", config.base_dir.display());
            Ok(())
        }
        MemoryCmd::Status => {
            let mgr = memory_manager(config)?;
            let stats = mgr.get_stats()?;
            print_serializable(format, &stats, |s| {
                vec![
                    ("total_decisions".into(), s.total_decisions.to_string()),
                    ("total_users".into(), s.total_users.to_string()),
                    ("disk_usage".into(), s.disk_usage_human()),
                    ("oldest_timestamp".into(), s.oldest_timestamp.map(|t| t.to_string()).unwrap_or_default()),
                    ("newest_timestamp".into(), s.newest_timestamp.map(|t| t.to_string()).unwrap_or_default()),
                ]
            });
            Ok(())
        }
        MemoryCmd::History { api_key_hash, limit } => {
            let mgr = memory_manager(config)?;
            let history = mgr.get_history(&api_key_hash, limit)?;
            let rows: Vec<HistoryRow> = history.iter().map(HistoryRow::from).collect();
            print_json_or_text(format, &rows, |rows| {
                for r in rows {
                    println!(
                        "{} [{}] intent={} model={} confidence={:.2} success={}",
                        r.timestamp,
                        r.tier,
                        r.intent,
                        r.selected_model,
                        r.confidence,
                        r.success.map(|s| s.to_string()).unwrap_or_else(|| "pending".to_string()),
                    );
                }
            });
            Ok(())
        }
        MemoryCmd::Preferences { api_key_hash } => {
            let mgr = memory_manager(config)?;
            match mgr.get_user_preferences(&api_key_hash)? {
                Some(prefs) => {
                    print_json_or_text(format, &prefs, |p| {
                        println!("api_key_hash: {}", p.api_key_hash);
                        for (intent, model) in &p.model_preferences {
                            let confidence = p.model_confidences.get(intent).copied().unwrap_or(0.0);
                            println!("  {intent} -> {model} (confidence {confidence:.2})");
                        }
                        for (provider, bias) in &p.provider_bias {
                            println!("  provider bias {provider}: {bias:.2}");
                        }
                    });
                    Ok(())
                }
                None => {
                    println!("no preferences recorded for this user");
                    Ok(())
                }
            }
        }
        MemoryCmd::Reset { confirm } => {
            if !confirm {
                return Err(CortexError::invalid_input("memory reset requires --confirm"));
            }
            let backup_path = backup_path_for(config)?;
            write_backup_tarball(&config.base_dir, &backup_path)?;
            std::fs::remove_dir_all(&config.base_dir)?;
            config.ensure_dirs()?;
            println!("backed up to {} and reset memory at {}", backup_path.display(), config.base_dir.display());
            Ok(())
        }
        MemoryCmd::Export { output } => {
            let output = output.unwrap_or_else(|| {
                let suffix = uuid::Uuid::new_v4();
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(format!("memory-export-{suffix}.tar.gz"))
            });
            write_backup_tarball(&config.base_dir, &output)?;
            println!("exported memory to {}", output.display());
            Ok(())
        }
    }
}

fn backup_path_for(config: &Config) -> CortexResult<PathBuf> {
    let now = chrono::DateTime::from_timestamp(cortex_router::clock::now_unix(), 0).unwrap_or_default();
    let name = format!("memory-backup-before-reset-{}.tar.gz", now.format("%Y%m%d-%H%M%S"));
    let parent = config.base_dir.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    Ok(parent.join(name))
}

/// Tars and gzips `source_dir` into `dest`, entry paths relative to
/// `source_dir`. Aborts (returns `Err`, leaving `source_dir` untouched)
/// on any failure.
fn write_backup_tarball(source_dir: &std::path::Path, dest: &std::path::Path) -> CortexResult<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(dest)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    if source_dir.exists() {
        builder.append_dir_all(".", source_dir)?;
    }
    let encoder = builder.into_inner().map_err(CortexError::Io)?;
    let mut file = encoder.finish().map_err(CortexError::Io)?;
    file.flush()?;
    Ok(())
}

fn run_heartbeat(config: &Config, format: OutputFormat, cmd: HeartbeatCmd) -> CortexResult<()> {
    // No out-of-scope HealthChecker implementations are wired into this CLI:
    // the core defines the `HealthChecker` trait but provider transports are
    // the (out-of-scope) HTTP frontend's concern. `status`/`check`/`quota`
    // therefore always observe an empty checker set; `discover` still
    // exercises the real Model Discovery subsystem end to end.
    let bus = Arc::new(EventBus::new(config.event_queue_capacity));
    let monitor = HeartbeatMonitor::new(
        bus,
        std::time::Duration::from_secs(config.heartbeat_checker_timeout_secs),
        std::time::Duration::from_secs(config.heartbeat_checkall_timeout_secs),
    );

    match cmd {
        HeartbeatCmd::Status => {
            let statuses = monitor.get_all_statuses();
            if statuses.is_empty() {
                println!("no health checkers registered");
            }
            print_json_or_text(format, &statuses, |statuses| {
                for (name, status) in statuses {
                    println!("{name}: {:?} (last_check={})", status.status, status.last_check);
                }
            });
            Ok(())
        }
        HeartbeatCmd::Check { provider } => {
            let rt = tokio::runtime::Runtime::new().map_err(CortexError::Io)?;
            let status = rt.block_on(monitor.check_provider(&provider))?;
            print_json_or_text(format, &status, |s| {
                println!("{}: {:?}", s.provider, s.status);
            });
            Ok(())
        }
        HeartbeatCmd::Quota => {
            let statuses = monitor.get_all_statuses();
            print_json_or_text(format, &statuses, |statuses| {
                for (name, status) in statuses {
                    match (status.quota_used, status.quota_limit) {
                        (Some(used), Some(limit)) => {
                            let level = cortex_router::heartbeat::calculate_quota_status(used, limit, 0.75, 0.90);
                            println!("{name}: {used}/{limit} ({level:?})");
                        }
                        _ => println!("{name}: quota not reported"),
                    }
                }
            });
            Ok(())
        }
        HeartbeatCmd::Discover => {
            let rt = tokio::runtime::Runtime::new().map_err(CortexError::Io)?;
            let discovery = ModelDiscovery::new(config.discovery_cache_dir(), config.discovery_grace_days as i64)?;
            let registry = ModelRegistry::new(config.quota_cooldown_secs as i64);
            let now = cortex_router::clock::now_unix();
            let discovered = rt.block_on(discovery.discover_all(now));
            for (provider, models) in &discovered {
                if !models.is_empty() {
                    registry.register_client(&format!("discovery:{provider}"), provider, models.clone());
                }
            }
            print_json_or_text(format, &discovered, |discovered| {
                for (provider, models) in discovered {
                    println!("{provider}: {} models", models.len());
                    for m in models {
                        println!("  {}", m.id);
                    }
                }
            });
            Ok(())
        }
    }
}

fn run_steering(config: &Config, format: OutputFormat, cmd: SteeringCmd) -> CortexResult<()> {
    let engine = SteeringEngine::new();
    engine.load_dir(&config.steering_dir)?;

    match cmd {
        SteeringCmd::List => {
            let rules = engine.rules();
            print_json_or_text(format, &rules, |rules| {
                for r in rules {
                    println!("{} (priority {}) — {}", r.name, r.activation.priority, r.activation.condition);
                }
            });
            Ok(())
        }
        SteeringCmd::Test { intent, hour, day_of_week } => {
            let ctx = cortex_router::model::RoutingContext {
                intent,
                api_key_hash: "sha256:cli-test".to_string(),
                provider: String::new(),
                content_length: 0,
                hour,
                day_of_week,
                timestamp: cortex_router::clock::now_unix(),
                metadata: Default::default(),
            };
            let matches = engine.find_matching_rules(&ctx);
            let outcome = engine.apply_steering(&ctx, &matches);
            println!("{} rule(s) matched", matches.len());
            for r in &matches {
                println!("  matched: {}", r.name);
            }
            println!("selected_model: {:?}", outcome.selected_model);
            println!("override_router: {}", outcome.override_router);
            Ok(())
        }
        SteeringCmd::Reload => {
            engine.load_dir(&config.steering_dir)?;
            println!("reloaded {} rule(s) from {}", engine.rules().len(), config.steering_dir.display());
            Ok(())
        }
        SteeringCmd::Validate => {
            engine.load_dir(&config.steering_dir)?;
            println!("{} well-formed rule(s) under {}", engine.rules().len(), config.steering_dir.display());
            Ok(())
        }
    }
}

fn run_hooks(config: &Config, format: OutputFormat, cmd: HooksCmd) -> CortexResult<()> {
    let mut mgr = HookManager::new(Arc::new(LoggingActionRunner));
    mgr.load_dir(&config.hooks_dir)?;

    match cmd {
        HooksCmd::List => {
            let rows: Vec<HookRow> = mgr.hooks().iter().map(HookRow::from).collect();
            print_json_or_text(format, &rows, |rows| {
                for h in rows {
                    println!("{} [{}] enabled={} event={} -> {}", h.id, h.name, h.enabled, h.event, h.action);
                }
            });
            Ok(())
        }
        HooksCmd::Enable { id } => set_hook_enabled(config, &id, true),
        HooksCmd::Disable { id } => set_hook_enabled(config, &id, false),
        HooksCmd::Test { event, data } => {
            let kind = parse_event_kind(&event)?;
            let mut fields = Fields::new();
            for (k, v) in &data {
                fields = fields.set(k.clone(), FieldValue::Str(v.clone()));
            }
            let matching: Vec<_> = mgr.hooks().iter().filter(|h| h.event == kind && h.enabled).collect();
            if matching.is_empty() {
                println!("no enabled hooks registered for {event}");
            }
            for hook in matching {
                let fires = match &hook.condition {
                    None => true,
                    Some(cond) => expr::evaluate(cond, &fields).unwrap_or(false),
                };
                println!("{} ({}): {}", hook.id, hook.name, if fires { "fires" } else { "does not fire" });
            }
            Ok(())
        }
        HooksCmd::Logs => {
            println!("the core keeps no persisted hook-firing log; showing loaded definitions instead");
            for h in mgr.hooks() {
                println!("{} [{}] enabled={} event={:?}", h.id, h.name, h.enabled, h.event);
            }
            Ok(())
        }
        HooksCmd::Reload => {
            mgr.load_dir(&config.hooks_dir)?;
            println!("reloaded {} hook(s) from {}", mgr.hooks().len(), config.hooks_dir.display());
            Ok(())
        }
    }
}

/// Hooks have no in-memory enable/disable toggle exposed by the core (a
/// hook's `enabled` flag is part of its on-disk definition); enabling or
/// disabling from the CLI means rewriting the hook's YAML file in place.
fn set_hook_enabled(config: &Config, id: &str, enabled: bool) -> CortexResult<()> {
    let mut found = false;
    for entry in walkdir::WalkDir::new(&config.hooks_dir).into_iter().filter_map(|e| e.ok()) {
        if entry.path_is_symlink() || !entry.file_type().is_file() {
            continue;
        }
        let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != "yaml" && ext != "yml" {
            continue;
        }
        let text = std::fs::read_to_string(entry.path())?;
        let Ok(mut value): Result<serde_yaml::Value, _> = serde_yaml::from_str(&text) else { continue };
        let matches_id = value.get("id").and_then(|v| v.as_str()).map(|v| v == id).unwrap_or(false);
        if !matches_id {
            continue;
        }
        if let serde_yaml::Value::Mapping(map) = &mut value {
            map.insert(serde_yaml::Value::String("enabled".to_string()), serde_yaml::Value::Bool(enabled));
        }
        let rewritten = serde_yaml::to_string(&value).map_err(CortexError::from)?;
        std::fs::write(entry.path(), rewritten)?;
        found = true;
        break;
    }
    if !found {
        return Err(CortexError::not_found(format!("hook id: {id}")));
    }
    println!("hook {id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn parse_event_kind(s: &str) -> CortexResult<EventKind> {
    match s {
        "request_received" => Ok(EventKind::RequestReceived),
        "routing_decision" => Ok(EventKind::RoutingDecision),
        "provider_unavailable" => Ok(EventKind::ProviderUnavailable),
        "provider_recovered" => Ok(EventKind::ProviderRecovered),
        "quota_warning" => Ok(EventKind::QuotaWarning),
        "quota_critical" => Ok(EventKind::QuotaCritical),
        "quota_exceeded" => Ok(EventKind::QuotaExceeded),
        "health_check_failed" => Ok(EventKind::HealthCheckFailed),
        "model_discovered" => Ok(EventKind::ModelDiscovered),
        other => Err(CortexError::invalid_input(format!("unknown event kind: {other}"))),
    }
}

fn run_learning(config: &Config, format: OutputFormat, cmd: LearningCmd) -> CortexResult<()> {
    let memory = Arc::new(memory_manager(config)?);

    match cmd {
        LearningCmd::Status => {
            println!("interval_secs: {}", config.learning_interval_secs);
            println!("min_sample_size: {}", config.learning_min_sample_size);
            println!("confidence_threshold: {}", config.learning_confidence_threshold);
            println!("auto_apply: {}", config.learning_auto_apply);
            println!("history_window: {}", config.learning_history_window);
            Ok(())
        }
        LearningCmd::Analyze { api_key_hash } => {
            let engine = LearningEngine::new(
                memory,
                config.learning_min_sample_size,
                config.learning_confidence_threshold,
                false,
                config.learning_history_window,
            );
            match engine.analyze_user(&api_key_hash)? {
                Some(model) => {
                    print_json_or_text(format, &model, |m| {
                        println!("sample_size: {}", m.sample_size);
                        for (intent, model) in &m.model_preferences {
                            let confidence = m.model_confidences.get(intent).copied().unwrap_or(0.0);
                            println!("  {intent} -> {model} (confidence {confidence:.2})");
                        }
                        for suggestion in &m.suggestions {
                            println!("  suggestion: {suggestion}");
                        }
                    });
                    Ok(())
                }
                None => {
                    println!("below configured minimum sample size; no analysis run");
                    Ok(())
                }
            }
        }
        LearningCmd::Apply { api_key_hash } => {
            // Force `auto_apply` for this one invocation — an operator
            // explicitly running `learning apply` wants a write-through even
            // if the scheduled engine is configured conservatively.
            let engine = LearningEngine::new(
                memory,
                config.learning_min_sample_size,
                config.learning_confidence_threshold,
                true,
                config.learning_history_window,
            );
            match engine.analyze_user(&api_key_hash)? {
                Some(model) => {
                    let applied = engine.apply_if_confident(&model)?;
                    println!("{}", if applied { "preferences updated" } else { "no intent cleared the confidence threshold" });
                    Ok(())
                }
                None => {
                    println!("below configured minimum sample size; nothing to apply");
                    Ok(())
                }
            }
        }
        LearningCmd::Reset { api_key_hash } => {
            memory.delete_user_preferences(&api_key_hash)?;
            println!("cleared learned preferences for {api_key_hash}");
            Ok(())
        }
    }
}

fn print_serializable<T: serde::Serialize>(format: OutputFormat, value: &T, rows: impl Fn(&T) -> Vec<(String, String)>) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("failed to serialize: {e}"),
        },
        OutputFormat::Table => {
            for (key, value) in rows(value) {
                println!("{key:<20} {value}");
            }
        }
        OutputFormat::Text => {
            for (key, value) in rows(value) {
                println!("{key}: {value}");
            }
        }
    }
}

/// Shared rendering for the commands whose JSON shape is already the most
/// useful "table": fall back to the caller's `text` closure for text/table.
fn print_json_or_text<T: serde::Serialize>(format: OutputFormat, value: &T, text: impl Fn(&T)) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to serialize: {e}"),
        },
        OutputFormat::Text | OutputFormat::Table => text(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_val_pairs() {
        assert_eq!(parse_key_val("provider=ollama").unwrap(), ("provider".to_string(), "ollama".to_string()));
        assert!(parse_key_val("no-equals-sign").is_err());
    }

    #[test]
    fn parses_known_event_kinds_and_rejects_unknown() {
        assert_eq!(parse_event_kind("quota_warning").unwrap(), EventKind::QuotaWarning);
        assert!(parse_event_kind("not_a_kind").is_err());
    }

    #[test]
    fn backup_tarball_round_trips_directory_contents() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub").join("b.txt"), b"world").unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let archive = out_dir.path().join("backup.tar.gz");
        write_backup_tarball(src.path(), &archive).unwrap();
        assert!(archive.exists());

        let file = std::fs::File::open(&archive).unwrap();
        let decoder = flate2::read::GzDecoder::new(file);
        let mut ar = tar::Archive::new(decoder);
        let mut names: Vec<String> = ar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        names.sort();
        assert!(names.iter().any(|n| n.ends_with("a.txt")));
        assert!(names.iter().any(|n| n.ends_with("b.txt")));
    }

    #[test]
    fn backup_path_uses_expected_filename_shape() {
        let config = Config {
            base_dir: PathBuf::from("/tmp/some-base/data"),
            ..Default::default()
        };
        let path = backup_path_for(&config).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("memory-backup-before-reset-"));
        assert!(name.ends_with(".tar.gz"));
    }
}
