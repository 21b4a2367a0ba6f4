// Steering Engine: user-authored YAML rules evaluated against a
// `RoutingContext`, producing a preferred model, optional injected system
// prompt, and metadata overrides. Rules live behind a lock as a priority-
// sorted `Vec`, replaced wholesale on reload.

mod watcher;

pub use watcher::spawn_watcher;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{CortexError, CortexResult};
use crate::expr::{self, FieldValue, Fields};
use crate::model::RoutingContext;

const MAX_RULE_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBasedRule {
    pub start_hour: u8,
    pub end_hour: u8,
    pub model: String,
}

impl TimeBasedRule {
    fn contains(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // wraps past midnight
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub primary_model: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub context_injection: Option<String>,
    #[serde(default)]
    pub provider_settings: HashMap<String, String>,
    #[serde(default)]
    pub time_based_rules: Vec<TimeBasedRule>,
    #[serde(default)]
    pub override_router: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Activation {
    pub condition: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringRule {
    pub name: String,
    #[serde(default)]
    pub file_path: String,
    pub activation: Activation,
    #[serde(default)]
    pub preferences: Preferences,
}

fn fields_from_context(ctx: &RoutingContext) -> Fields {
    let mut fields = Fields::new()
        .set("Intent", FieldValue::Str(ctx.intent.clone()))
        .set("Provider", FieldValue::Str(ctx.provider.clone()))
        .set("ContentLength", FieldValue::Num(ctx.content_length as f64))
        .set("Hour", FieldValue::Num(ctx.hour as f64))
        .set("DayOfWeek", FieldValue::Num(ctx.day_of_week as f64));
    for (k, v) in &ctx.metadata {
        fields = fields.set(k.clone(), FieldValue::Str(v.clone()));
    }
    fields
}

/// Outcome of applying the ordered, matched rules to a request.
#[derive(Debug, Clone, Default)]
pub struct SteeringOutcome {
    pub selected_model: Option<String>,
    pub context_injection: Option<String>,
    pub metadata_overrides: HashMap<String, String>,
    pub override_router: bool,
}

pub struct SteeringEngine {
    rules: RwLock<Vec<SteeringRule>>,
}

impl Default for SteeringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SteeringEngine {
    pub fn new() -> Self {
        Self { rules: RwLock::new(Vec::new()) }
    }

    pub fn rules(&self) -> Vec<SteeringRule> {
        self.rules.read().clone()
    }

    /// Recursively walks `dir`, skipping symlinks and oversized files,
    /// parses every YAML file as a `SteeringRule`, sorts by
    /// `activation.priority` descending, and atomically replaces the
    /// rule set.
    pub fn load_dir(&self, dir: &Path) -> CortexResult<()> {
        let mut loaded = Vec::new();
        if !dir.exists() {
            *self.rules.write() = loaded;
            return Ok(());
        }
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.path_is_symlink() || !entry.file_type().is_file() {
                continue;
            }
            let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                continue;
            }
            let meta = entry.metadata().map_err(|e| CortexError::invalid_input(e.to_string()))?;
            if meta.len() > MAX_RULE_FILE_BYTES {
                log::warn!("skipping oversized steering rule file: {}", entry.path().display());
                continue;
            }
            let text = std::fs::read_to_string(entry.path())?;
            match serde_yaml::from_str::<SteeringRule>(&text) {
                Ok(mut rule) => {
                    rule.file_path = entry.path().display().to_string();
                    loaded.push(rule);
                }
                Err(e) => log::warn!("skipping malformed steering rule {}: {e}", entry.path().display()),
            }
        }
        loaded.sort_by(|a, b| b.activation.priority.cmp(&a.activation.priority));
        *self.rules.write() = loaded;
        Ok(())
    }

    /// `FindMatchingRules`: copies of every rule whose condition holds,
    /// already in priority order.
    pub fn find_matching_rules(&self, ctx: &RoutingContext) -> Vec<SteeringRule> {
        let fields = fields_from_context(ctx);
        self.rules
            .read()
            .iter()
            .filter(|r| expr::evaluate(&r.activation.condition, &fields).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// `ApplySteering`: applies matched rules in order, stopping at the
    /// first rule whose `override_router` is set.
    pub fn apply_steering(&self, ctx: &RoutingContext, rules: &[SteeringRule]) -> SteeringOutcome {
        let mut outcome = SteeringOutcome::default();
        for rule in rules {
            if let Some(time_rule) = rule
                .preferences
                .time_based_rules
                .iter()
                .find(|t| t.contains(ctx.hour))
            {
                outcome.selected_model = Some(time_rule.model.clone());
            } else if let Some(model) = &rule.preferences.primary_model {
                outcome.selected_model = Some(model.clone());
            }

            if let Some(injection) = &rule.preferences.context_injection {
                outcome.context_injection = Some(injection.clone());
            }

            for (k, v) in &rule.preferences.provider_settings {
                outcome.metadata_overrides.insert(k.clone(), v.clone());
            }

            if rule.preferences.override_router {
                outcome.override_router = true;
                break;
            }
        }
        outcome
    }

    pub fn steering_dir_path(base: &Path) -> PathBuf {
        base.join("steering")
    }
}
