// SPDX-License-Identifier: Apache-2.0

use crate::admin::ConfigServer;
use crate::config::Config;
use crate::flush::FlushScheduler;
use crate::init::args::AgentRun;
use crate::init::wait;
use crate::listener::Listener;
use crate::metrics::MetricStore;
use crate::push::Pusher;
use crate::reload::ReloadOrchestrator;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long tasks get to wind down after cancellation before we give up.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Agent {
    args: Box<AgentRun>,
    admin_listener: Option<Listener>,
}

impl Agent {
    pub fn new(args: Box<AgentRun>, admin_listener: Option<Listener>) -> Self {
        Self {
            args,
            admin_listener,
        }
    }

    pub async fn run(
        self,
        agent_cancel: CancellationToken,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!("Starting logdog.");

        // A broken configuration at startup is fatal; there is nothing to
        // fall back to. After this point reloads fail soft.
        let initial = Config::load(&self.args.config)?;
        info!(
            config = %self.args.config.display(),
            files = initial.files.len(),
            timer = initial.timer,
            "Configuration loaded."
        );

        let store = Arc::new(MetricStore::new());
        let (orchestrator, active, reload_rx) =
            ReloadOrchestrator::start(self.args.config.clone(), initial, store.clone())?;

        let mut task_set: JoinSet<Result<(), Box<dyn Error + Send + Sync>>> = JoinSet::new();
        let tasks_cancel = CancellationToken::new();

        {
            let token = tasks_cancel.clone();
            task_set.spawn(orchestrator.run(token));
        }

        {
            let token = tasks_cancel.clone();
            let scheduler = FlushScheduler::new(
                active,
                store,
                Pusher::new(),
                reload_rx,
                self.args.push_limit(),
            );
            task_set.spawn(async move {
                scheduler.run(token).await;
                Ok(())
            });
        }

        if let Some(listener) = self.admin_listener {
            let token = tasks_cancel.clone();
            let config_path = self.args.config.clone();
            info!(endpoint = %self.args.admin_endpoint, "Starting config push server.");
            task_set.spawn(async move {
                let server = ConfigServer::new(config_path);
                server.serve(listener, token).await
            });
        }

        select! {
            _ = agent_cancel.cancelled() => {}
            res = wait::wait_for_any_task(&mut task_set) => {
                match res {
                    Ok(()) => warn!("Unexpected early exit of task."),
                    Err(e) => {
                        tasks_cancel.cancel();
                        let _ = wait::wait_for_tasks_with_timeout(
                            &mut task_set,
                            TASK_SHUTDOWN_TIMEOUT,
                        )
                        .await;
                        return Err(e);
                    }
                }
            }
        }

        tasks_cancel.cancel();
        wait::wait_for_tasks_with_timeout(&mut task_set, TASK_SHUTDOWN_TIMEOUT).await?;

        Ok(())
    }
}
