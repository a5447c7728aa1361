// SPDX-License-Identifier: Apache-2.0

//! Flush scheduler: on every push-interval tick, fill in zero records for
//! idle rules, drain the store, and dispatch the batch under a bounded
//! concurrency gate.
//!
//! The period is re-read from the active configuration on every tick, and a
//! reload notification rebuilds the in-flight timer immediately, so interval
//! changes take effect without waiting out the old period.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::metrics::{MetricKey, MetricRecord, MetricStore};
use crate::push::Pusher;

pub struct FlushScheduler {
    active: Arc<ArcSwap<Config>>,
    store: Arc<MetricStore>,
    pusher: Arc<Pusher>,
    reload_rx: watch::Receiver<u64>,
    push_permits: Arc<Semaphore>,
}

impl FlushScheduler {
    pub fn new(
        active: Arc<ArcSwap<Config>>,
        store: Arc<MetricStore>,
        pusher: Pusher,
        reload_rx: watch::Receiver<u64>,
        max_concurrent_pushes: usize,
    ) -> Self {
        Self {
            active,
            store,
            pusher: Arc::new(pusher),
            reload_rx,
            push_permits: Arc::new(Semaphore::new(max_concurrent_pushes)),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut reload_rx = self.reload_rx.clone();
        let mut reload_closed = false;

        'timer: loop {
            let period = self.active.load().interval();
            let sleep = tokio::time::sleep(period);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = &mut sleep => {
                        self.tick().await;
                        continue 'timer;
                    }
                    res = reload_rx.changed(), if !reload_closed => {
                        if res.is_err() {
                            reload_closed = true;
                            continue;
                        }
                        if self.active.load().interval() != period {
                            info!(
                                period = ?self.active.load().interval(),
                                "push interval changed, rebuilding timer"
                            );
                            continue 'timer;
                        }
                        // Same period; keep waiting out the current timer.
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let cfg = self.active.load_full();

        fill_empty(&self.store, &cfg);

        let batch = self.store.drain_all();
        if batch.is_empty() {
            return;
        }

        info!(records = batch.len(), "pushing metrics batch");

        // Blocks when every push slot is busy; the tick (and therefore the
        // next drain) waits for a slot instead of dropping the batch.
        let permit = match self.push_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed, shutting down
        };

        let pusher = self.pusher.clone();
        let agent = cfg.agent.clone();
        tokio::spawn(async move {
            match pusher.push(&agent, &batch).await {
                Ok(body) => info!(response = %body, "agent push complete"),
                Err(e) => warn!(error = %e, agent = %agent, "push failed, dropping batch"),
            }
            drop(permit);
        });
    }
}

/// Insert a zero-valued record for every configured rule with no data this
/// interval, so the agent receives a reading for inactive rules too. Never
/// overwrites a live record. The fill-in carries no samples: a match that
/// folds in before the drain replaces it instead of aggregating against the
/// placeholder zero.
pub fn fill_empty(store: &MetricStore, cfg: &Config) {
    for spec in &cfg.files {
        for rule in &spec.keywords {
            store.get_or_init(MetricKey::new(spec, rule), || MetricRecord::zero(cfg, rule));
        }
    }
}
