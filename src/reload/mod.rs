// SPDX-License-Identifier: Apache-2.0

//! Configuration generations and hot reload.
//!
//! A generation is one validated configuration plus the set of tailer tasks
//! serving it. The orchestrator watches the configuration source; on a valid
//! change it starts a complete new generation, stops and joins every tailer
//! of the outgoing one, and only then publishes the new configuration
//! through the process-wide atomic pointer. Readers always see a fully
//! formed generation or its predecessor, never a half-updated one.
//!
//! Start-new-before-stop-old trades a brief double-counting window for
//! uninterrupted coverage; see DESIGN.md for the alternative ordering.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::metrics::MetricStore;
use crate::watch::{DirWatcher, PathEvent, PathEventKind, Tailer, WatchError};

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Stop/join handle for one running tailer task.
struct TailerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// One activated configuration and its live tailer set.
struct Generation {
    config: Arc<Config>,
    tailers: Vec<TailerHandle>,
}

pub struct ReloadOrchestrator {
    config_path: PathBuf,
    active: Arc<ArcSwap<Config>>,
    store: Arc<MetricStore>,
    reload_tx: watch::Sender<u64>,
    current: Generation,
}

impl ReloadOrchestrator {
    /// Activate the initial generation from an already-loaded configuration.
    ///
    /// Tailer setup failures here are fatal: there is no previous generation
    /// to fall back to. Returns the orchestrator plus the shared active
    /// pointer and the reload notification channel consumed by the flush
    /// scheduler.
    pub fn start(
        config_path: PathBuf,
        initial: Config,
        store: Arc<MetricStore>,
    ) -> Result<(Self, Arc<ArcSwap<Config>>, watch::Receiver<u64>), ReloadError> {
        let config = Arc::new(initial);
        let current = spawn_generation(&config, &store)?;

        let active = Arc::new(ArcSwap::from(config));
        let (reload_tx, reload_rx) = watch::channel(0u64);

        let orchestrator = Self {
            config_path,
            active: active.clone(),
            store,
            reload_tx,
            current,
        };
        Ok((orchestrator, active, reload_rx))
    }

    /// Watch the configuration source and reload on qualifying changes,
    /// until cancelled. Tears the final generation down on exit.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let watch_dir = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        // Losing the config watch means losing hot reload entirely, so a
        // subscription failure here is a startup error.
        let mut watcher = DirWatcher::new()?;
        watcher.watch(&watch_dir)?;

        info!(config = %self.config_path.display(), "watching configuration source");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    stop_generation(self.current).await;
                    return Ok(());
                }
                ev = watcher.next() => {
                    match ev {
                        None => {
                            stop_generation(self.current).await;
                            return Err("configuration watcher closed unexpectedly".into());
                        }
                        Some(ev) if self.is_config_event(&ev) => self.reload().await,
                        Some(_) => {}
                    }
                }
            }
        }
    }

    /// A write or replacement of the configuration source. The origin (an
    /// editor, the admin endpoint rewriting the file) is irrelevant.
    fn is_config_event(&self, ev: &PathEvent) -> bool {
        if !matches!(ev.kind, PathEventKind::Create | PathEventKind::Modify) {
            return false;
        }
        let config_name = self.config_path.file_name();
        ev.paths.iter().any(|p| p.file_name() == config_name)
    }

    async fn reload(&mut self) {
        info!("configuration change detected");

        let new = match Config::load(&self.config_path) {
            Ok(cfg) => Arc::new(cfg),
            Err(e) => {
                error!(error = %e, "invalid configuration, keeping previous generation");
                return;
            }
        };

        // Start the full new generation before touching the old one. If any
        // tailer cannot be set up the reload aborts wholesale and the old
        // generation keeps serving.
        let next = match spawn_generation(&new, &self.store) {
            Ok(gen) => gen,
            Err(e) => {
                error!(
                    error = %e,
                    "unable to start tailers for new configuration, keeping previous generation"
                );
                return;
            }
        };

        let old = std::mem::replace(&mut self.current, next);
        stop_generation(old).await;

        self.active.store(new.clone());
        self.reload_tx.send_modify(|gen| *gen += 1);

        info!(
            files = new.files.len(),
            timer = new.timer,
            "new configuration generation active"
        );
    }
}

/// Set up and spawn one tailer per watch spec.
///
/// All tailers are set up before any is spawned, so a watcher-subscription
/// failure on a later spec aborts cleanly with nothing running.
fn spawn_generation(
    config: &Arc<Config>,
    store: &Arc<MetricStore>,
) -> Result<Generation, ReloadError> {
    let mut pending = Vec::with_capacity(config.files.len());
    for spec in &config.files {
        pending.push(Tailer::setup(config.clone(), spec.clone(), store.clone())?);
    }

    let mut tailers = Vec::with_capacity(pending.len());
    for tailer in pending {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(tailer.run(cancel.clone()));
        tailers.push(TailerHandle { cancel, join });
    }

    Ok(Generation {
        config: config.clone(),
        tailers,
    })
}

/// Signal every tailer of `gen` to stop and wait for each to acknowledge by
/// exiting. Publishing a successor before this completes would widen the
/// window where two generations write overlapping metric keys.
async fn stop_generation(gen: Generation) {
    debug!(files = gen.config.files.len(), "stopping generation");

    for tailer in &gen.tailers {
        tailer.cancel.cancel();
    }
    for tailer in gen.tailers {
        if let Err(e) = tailer.join.await {
            error!(error = %e, "tailer task failed to join");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_config(path: &Path, watch_dir: &Path, timer: u64, exp: &str) {
        let doc = format!(
            r#"{{
                "metric": "log.console", "timer": {timer}, "host": "web01",
                "agent": "http://127.0.0.1:1988/v1/push",
                "files": [{{
                    "path": "{}",
                    "filepattern": "app\\.log.*",
                    "keywords": [{{"exp": "{exp}", "tag": "k", "type": "count"}}]
                }}]
            }}"#,
            watch_dir.display()
        );
        fs::write(path, doc).unwrap();
    }

    async fn append_until_counted(
        store: &MetricStore,
        log: &Path,
        line: &str,
        min_value: f64,
    ) -> bool {
        for _ in 0..50 {
            {
                let mut f = fs::OpenOptions::new().append(true).open(log).unwrap();
                writeln!(f, "{line}").unwrap();
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            let total: f64 = store.drain_all().iter().map(|r| r.value).sum();
            if total >= min_value {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn test_initial_generation_tails_and_aggregates() {
        let logs = TempDir::new().unwrap();
        let cfg_dir = TempDir::new().unwrap();
        let cfg_path = cfg_dir.path().join("cfg.json");
        write_config(&cfg_path, logs.path(), 5, "ERROR");

        let log = logs.path().join("app.log");
        fs::write(&log, "").unwrap();

        let store = Arc::new(MetricStore::new());
        let initial = Config::load(&cfg_path).unwrap();
        let (orchestrator, _active, _rx) =
            ReloadOrchestrator::start(cfg_path, initial, store.clone()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(orchestrator.run(cancel.clone()));
        // Let the tailer attach before appending.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(append_until_counted(&store, &log, "ERROR: boom", 1.0).await);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_previous_generation() {
        let logs = TempDir::new().unwrap();
        let cfg_dir = TempDir::new().unwrap();
        let cfg_path = cfg_dir.path().join("cfg.json");
        write_config(&cfg_path, logs.path(), 5, "ERROR");

        let log = logs.path().join("app.log");
        fs::write(&log, "").unwrap();

        let store = Arc::new(MetricStore::new());
        let initial = Config::load(&cfg_path).unwrap();
        let (orchestrator, active, _rx) =
            ReloadOrchestrator::start(cfg_path.clone(), initial, store.clone()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(orchestrator.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Corrupt the configuration source.
        fs::write(&cfg_path, "{ not json").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Old generation still active and still tailing.
        assert_eq!(active.load().timer, 5);
        assert!(append_until_counted(&store, &log, "ERROR: still here", 1.0).await);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_valid_reload_swaps_generation_and_notifies() {
        let logs = TempDir::new().unwrap();
        let cfg_dir = TempDir::new().unwrap();
        let cfg_path = cfg_dir.path().join("cfg.json");
        write_config(&cfg_path, logs.path(), 5, "ERROR");

        fs::write(logs.path().join("app.log"), "").unwrap();

        let store = Arc::new(MetricStore::new());
        let initial = Config::load(&cfg_path).unwrap();
        let (orchestrator, active, mut rx) =
            ReloadOrchestrator::start(cfg_path.clone(), initial, store.clone()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(orchestrator.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;

        write_config(&cfg_path, logs.path(), 30, "WARN");

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("no reload notification")
            .unwrap();
        assert_eq!(active.load().timer, 30);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
