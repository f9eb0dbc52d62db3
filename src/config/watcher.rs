//! Configuration file watcher for hot reload.
//!
//! Only the forwarding, filter, rewrite and inspection tables take effect on
//! reload. Listener settings are bound once at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

type ReloadFn = Box<dyn Fn(ProxyConfig) + Send + Sync>;

/// Watches the configuration file and publishes each valid revision.
pub struct ConfigWatcher {
    path: PathBuf,
    current: Arc<ArcSwap<ProxyConfig>>,
    on_reload: ReloadFn,
}

impl ConfigWatcher {
    /// Create a watcher starting from `initial`, the file's contents as last
    /// loaded (before any command-line overrides); `on_reload` receives every
    /// revision that loads and validates.
    pub fn new<F>(path: &Path, initial: ProxyConfig, on_reload: F) -> Self
    where
        F: Fn(ProxyConfig) + Send + Sync + 'static,
    {
        Self {
            path: path.to_path_buf(),
            current: Arc::new(ArcSwap::from_pointee(initial)),
            on_reload: Box::new(on_reload),
        }
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let current = self.current;
        let on_reload = self.on_reload;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(new_config) => {
                            if record_revision(&current, &new_config) {
                                tracing::warn!("Listener settings changed; restart required for them to apply");
                            }
                            on_reload(new_config);
                            tracing::info!("Configuration reloaded");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Store `new_config` as the latest file revision and report whether its
/// listener section differs from the previous revision.
fn record_revision(current: &ArcSwap<ProxyConfig>, new_config: &ProxyConfig) -> bool {
    let changed = listener_changed(&current.load(), new_config);
    current.store(Arc::new(new_config.clone()));
    changed
}

fn listener_changed(old: &ProxyConfig, new: &ProxyConfig) -> bool {
    old.listener != new.listener
}
