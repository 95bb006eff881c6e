use anyhow::Result;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::Config;

/// Delay before re-reading a changed file so the writer can finish
const SETTLE_DELAY: Duration = Duration::from_millis(100);

type ReloadHook = Arc<dyn Fn(&Config) + Send + Sync>;

/// Owns the live configuration and reloads it when the file changes.
///
/// The reload hook receives every successfully parsed configuration; a file
/// that fails to parse or validate leaves the current one in place.
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
    _watcher: Option<RecommendedWatcher>,
    reload_hook: Option<ReloadHook>,
}

impl ConfigManager {
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Config::from_file_with_env(&config_path).await?;

        Ok(ConfigManager {
            config: Arc::new(RwLock::new(config)),
            config_path,
            _watcher: None,
            reload_hook: None,
        })
    }

    pub fn get_config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install the callback run after each successful reload.
    /// Must be set before [`ConfigManager::start_hot_reload`].
    pub fn set_reload_hook<F>(&mut self, hook: F)
    where
        F: Fn(&Config) + Send + Sync + 'static,
    {
        self.reload_hook = Some(Arc::new(hook));
    }

    /// Watch the config file and its directory, reloading on writes
    pub async fn start_hot_reload(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Event>(64);

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if tx.blocking_send(event).is_err() {
                        debug!("Config watch channel closed");
                    }
                }
                Err(e) => error!("Config watch error: {}", e),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        // Editors often replace the file, so the parent directory is watched too
        watcher.watch(&self.config_path, RecursiveMode::NonRecursive)?;
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                watcher.watch(parent, RecursiveMode::NonRecursive)?;
            }
        }
        info!("Watching {:?} for configuration changes", self.config_path);

        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();
        let hook = self.reload_hook.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !touches_config(&event, &config_path) {
                    continue;
                }
                tokio::time::sleep(SETTLE_DELAY).await;
                // Coalesce the burst of events a single save produces
                while rx.try_recv().is_ok() {}

                match Config::from_file_with_env(&config_path).await {
                    Ok(new_config) => {
                        install(&config, new_config, hook.as_ref());
                        info!("Configuration hot-reloaded from {:?}", config_path);
                    }
                    Err(e) => warn!("Ignoring invalid configuration change: {}", e),
                }
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }

    /// Re-read the file now
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Config::from_file_with_env(&self.config_path)
            .await
            .map_err(|e| {
                error!("Failed to reload {:?}: {}", self.config_path, e);
                e
            })?;

        install(&self.config, new_config, self.reload_hook.as_ref());
        info!("Configuration reloaded from {:?}", self.config_path);
        Ok(())
    }
}

fn touches_config(event: &Event, config_path: &Path) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|path| path == config_path)
}

fn install(config: &RwLock<Config>, new_config: Config, hook: Option<&ReloadHook>) {
    *config.write().unwrap_or_else(PoisonError::into_inner) = new_config.clone();

    // Hook runs outside the lock
    if let Some(hook) = hook {
        (**hook)(&new_config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::NamedTempFile;

    fn write_config(file: &NamedTempFile, default_delay: u64) {
        let content = format!(
            "[server]\nbind = \"127.0.0.1:8080\"\n\n[politeness]\ndefault_delay = {}\n",
            default_delay
        );
        std::fs::write(file.path(), content).unwrap();
    }

    #[tokio::test]
    async fn test_manual_reload_runs_hook() {
        let file = NamedTempFile::new().unwrap();
        write_config(&file, 1000);

        let mut manager = ConfigManager::new(file.path()).await.unwrap();
        assert_eq!(manager.get_config().politeness.default_delay, 1000);

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        manager.set_reload_hook(move |cfg| {
            seen_clone.store(cfg.politeness.default_delay, Ordering::SeqCst);
        });

        write_config(&file, 2500);
        manager.reload_config().await.unwrap();

        assert_eq!(manager.get_config().politeness.default_delay, 2500);
        assert_eq!(seen.load(Ordering::SeqCst), 2500);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_current() {
        let file = NamedTempFile::new().unwrap();
        write_config(&file, 1000);
        let manager = ConfigManager::new(file.path()).await.unwrap();

        std::fs::write(file.path(), "not = [valid").unwrap();
        assert!(manager.reload_config().await.is_err());
        assert_eq!(manager.get_config().politeness.default_delay, 1000);
    }

    #[test]
    fn test_only_config_writes_trigger_reload() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};

        let path = Path::new("/etc/polite/config.toml");
        let write = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.to_path_buf());
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(path.to_path_buf());
        let other = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/polite/other.toml"));
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.to_path_buf());

        assert!(touches_config(&write, path));
        assert!(touches_config(&create, path));
        assert!(!touches_config(&other, path));
        assert!(!touches_config(&removed, path));
    }
}
