//! Hot-reload watcher for the configuration directory.
//!
//! Any change to a `.yaml` file in the config directory triggers a reload.
//! A reload that fails validation keeps the prior snapshot and logs a
//! warning; running pipelines are never affected by a broken edit.

use std::path::Path;
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::registry::Registry;

/// Keeps the underlying filesystem watcher alive; dropping it stops
/// hot reload.
pub struct RegistryWatcher {
    _watcher: RecommendedWatcher,
}

/// Start watching the registry's config directory.
pub fn watch(registry: Arc<Registry>) -> notify::Result<RegistryWatcher> {
    let dir = registry.config_dir().to_path_buf();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let event = match result {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "config watcher error");
                return;
            }
        };

        if !event.paths.iter().any(|p| is_yaml(p)) {
            return;
        }

        match registry.reload() {
            Ok(()) => info!("registry reloaded"),
            Err(error) => {
                warn!(%error, "registry reload failed; keeping previous snapshot");
            }
        }
    })?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    debug!(dir = %dir.display(), "watching registry config");

    Ok(RegistryWatcher { _watcher: watcher })
}

fn is_yaml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("yaml")
}
