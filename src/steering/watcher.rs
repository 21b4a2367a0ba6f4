// Hot-reload watcher for the steering directory: a filesystem watcher with
// a 100 ms debounce that reloads the rule set on any change.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};

use super::SteeringEngine;

/// Spawns a blocking OS thread that watches `dir` and reloads `engine`
/// whenever the directory changes, coalescing bursts of events within a
/// 100 ms window into a single reload. Returns the `notify::Watcher`
/// handle; dropping it stops the watch.
pub fn spawn_watcher(
    engine: Arc<SteeringEngine>,
    dir: PathBuf,
) -> notify::Result<notify::RecommendedWatcher> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&dir, RecursiveMode::Recursive)?;

    std::thread::spawn(move || {
        loop {
            let first = match rx.recv() {
                Ok(event) => event,
                Err(_) => return,
            };
            // drain any further events within the debounce window so a
            // burst of writes (editor save, git checkout) triggers one
            // reload, not N.
            let mut pending = vec![first];
            while let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) {
                pending.push(event);
            }
            if pending.iter().any(|e| e.is_ok()) {
                if let Err(e) = engine.load_dir(&dir) {
                    log::warn!("steering hot-reload failed: {e}");
                }
            }
        }
    });

    Ok(watcher)
}
