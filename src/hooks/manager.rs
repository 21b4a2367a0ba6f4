// Hook definitions and the manager that loads them. Loading follows the
// same walk-and-validate shape as the Steering Engine (size cap, symlink
// skip, default priority), since both read declarative YAML rule
// directories under the auth/config dir.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{CortexError, CortexResult};
use crate::expr::{self, FieldValue, Fields};
use crate::model::{EventContext, EventKind};

const MAX_HOOK_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Hook {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub event: EventKind,
    #[serde(default)]
    pub condition: Option<String>,
    pub action: HookAction,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    NotifyWebhook,
    RetryWithFallback,
    RestartProvider,
    LogWarning,
}

/// External collaborator a hook's `action` is dispatched through. Keeping
/// this behind a trait rather than calling webhook/process code directly
/// from the manager means the manager doesn't need to know how an action
/// is actually carried out, only that something implements it.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, action: HookAction, params: &HashMap<String, String>, ctx: &EventContext);
}

/// Default runner: logs every action via `log::warn!`, which is also the
/// entire behavior of `log_warning`. Real deployments substitute their own
/// `ActionRunner` (webhook client, provider process supervisor, ...).
pub struct LoggingActionRunner;

#[async_trait]
impl ActionRunner for LoggingActionRunner {
    async fn run(&self, action: HookAction, params: &HashMap<String, String>, ctx: &EventContext) {
        log::warn!(
            "hook action {action:?} fired for {:?} (provider={:?}, params={params:?})",
            ctx.event,
            ctx.provider
        );
    }
}

pub struct HookManager {
    hooks: Vec<Hook>,
    runner: Arc<dyn ActionRunner>,
}

impl HookManager {
    pub fn new(runner: Arc<dyn ActionRunner>) -> Self {
        Self { hooks: Vec::new(), runner }
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }

    /// Loads (or reloads) every `*.yaml`/`*.yml` hook file under `dir`.
    /// Oversized files and symlinks are skipped, matching the Steering
    /// Engine's loader rules.
    pub fn load_dir(&mut self, dir: &Path) -> CortexResult<()> {
        let mut loaded = Vec::new();
        if !dir.exists() {
            self.hooks = loaded;
            return Ok(());
        }
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.path_is_symlink() {
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                continue;
            }
            let meta = entry.metadata().map_err(|e| CortexError::invalid_input(e.to_string()))?;
            if meta.len() > MAX_HOOK_FILE_BYTES {
                log::warn!("skipping oversized hook file: {}", entry.path().display());
                continue;
            }
            let text = std::fs::read_to_string(entry.path())?;
            match serde_yaml::from_str::<Hook>(&text) {
                Ok(hook) => loaded.push(hook),
                Err(e) => log::warn!("skipping malformed hook file {}: {e}", entry.path().display()),
            }
        }
        self.hooks = loaded;
        Ok(())
    }

    /// Subscribes a synthetic handler per enabled hook onto `bus`.
    pub fn install(&self, bus: &super::EventBus) {
        for hook in self.hooks.iter().filter(|h| h.enabled) {
            let hook = hook.clone();
            let runner = self.runner.clone();
            bus.subscribe(hook.event, move |ctx| {
                let hook = hook.clone();
                let runner = runner.clone();
                Box::pin(async move {
                    if let Some(condition) = &hook.condition {
                        match expr::evaluate(condition, &fields_from_event(&ctx)) {
                            Ok(true) => {}
                            Ok(false) => return,
                            Err(e) => {
                                log::warn!("hook {} condition error: {e}", hook.id);
                                return;
                            }
                        }
                    }
                    runner.run(hook.action, &hook.params, &ctx).await;
                })
            });
        }
    }
}

fn fields_from_event(ctx: &EventContext) -> Fields {
    let mut fields = Fields::new()
        .set("event", FieldValue::Str(format!("{:?}", ctx.event)))
        .set("provider", FieldValue::Str(ctx.provider.clone().unwrap_or_default()))
        .set("model", FieldValue::Str(ctx.model.clone().unwrap_or_default()));
    for (k, v) in &ctx.data {
        fields = fields.set(k.clone(), FieldValue::Str(v.clone()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRunner(Arc<AtomicUsize>);

    #[async_trait]
    impl ActionRunner for CountingRunner {
        async fn run(&self, _action: HookAction, _params: &HashMap<String, String>, _ctx: &EventContext) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn loads_well_formed_hook_file_and_skips_bad_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.yaml"),
            "id: h1\nname: warn on quota\nevent: quota_warning\naction: log_warning\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "not: [valid, hook").unwrap();
        let mut mgr = HookManager::new(Arc::new(LoggingActionRunner));
        mgr.load_dir(dir.path()).unwrap();
        assert_eq!(mgr.hooks().len(), 1);
        assert_eq!(mgr.hooks()[0].id, "h1");
    }

    #[tokio::test]
    async fn disabled_hook_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("off.yaml"),
            "id: h2\nname: off\nenabled: false\nevent: quota_warning\naction: log_warning\n",
        )
        .unwrap();
        let mut mgr = HookManager::new(Arc::new(LoggingActionRunner));
        mgr.load_dir(dir.path()).unwrap();
        let bus = super::super::EventBus::new(8);
        let count = Arc::new(AtomicUsize::new(0));
        mgr.install(&bus);
        bus.publish_async(EventContext::new(EventKind::QuotaWarning));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn condition_gates_action_execution() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut mgr = HookManager::new(Arc::new(CountingRunner(count.clone())));
        mgr.hooks.push(Hook {
            id: "h3".into(),
            name: "gated".into(),
            enabled: true,
            event: EventKind::ProviderUnavailable,
            condition: Some("provider == 'ollama'".into()),
            action: HookAction::LogWarning,
            params: HashMap::new(),
            description: String::new(),
        });
        let bus = super::super::EventBus::new(8);
        mgr.install(&bus);
        bus.publish_async(
            EventContext::new(EventKind::ProviderUnavailable).with_provider("anthropic"),
        );
        bus.publish_async(
            EventContext::new(EventKind::ProviderUnavailable).with_provider("ollama"),
        );
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
