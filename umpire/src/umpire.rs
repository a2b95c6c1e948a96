//! The supervisor: initialization, the heartbeat loop and shutdown.

use std::sync::Arc;

use futures::future;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apps::AppRepo;
use crate::broker::Broker;
use crate::config::Config;
use crate::control;
use crate::error::Result;
use crate::heal;
use crate::keys::{self, ActionKey, ACTION_RESULTS_GROUP, WORKFLOW_GROUP, WORKFLOW_QUEUE};
use crate::runtime::ContainerRuntime;
use crate::scale;
use crate::snapshot::ClusterSnapshot;
use crate::status::StatusSink;

/// Which reconciliation passes run on each tick.
#[derive(Clone, Copy, Debug)]
pub struct Toggles {
    pub autoscale_worker: bool,
    pub autoscale_app: bool,
    pub autoheal_worker: bool,
    pub autoheal_app: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            autoscale_worker: true,
            autoscale_app: true,
            autoheal_worker: true,
            autoheal_app: true,
        }
    }
}

/// The controller. Holds no state that survives a restart: everything is
/// reconstructed from the broker and the runtime on each tick.
#[derive(Debug)]
pub struct Umpire<B, R, S> {
    broker: B,
    runtime: R,
    status: S,
    repo: Mutex<AppRepo>,
    config: Config,
    toggles: Toggles,
}

impl<B, R, S> Umpire<B, R, S>
where
    B: Broker + 'static,
    R: ContainerRuntime + 'static,
    S: StatusSink + 'static,
{
    /// Load the app repository (fatal when empty) and create the workflow
    /// consumer group.
    pub async fn init(
        broker: B,
        runtime: R,
        status: S,
        config: Config,
        toggles: Toggles,
    ) -> Result<Arc<Self>> {
        let repo = AppRepo::load(&config.apps_path)?;
        info!(apps = repo.len(), path = %config.apps_path.display(), "app repository loaded");

        broker.create_group(WORKFLOW_QUEUE, WORKFLOW_GROUP).await?;
        debug!(stream = WORKFLOW_QUEUE, group = WORKFLOW_GROUP, "workflow group ready");

        Ok(Arc::new(Self {
            broker,
            runtime,
            status,
            repo: Mutex::new(repo),
            config,
            toggles,
        }))
    }

    /// Run the control listener and the heartbeat loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let listener = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                control::listen(&this.broker, &this.runtime, &this.status, &this.config, &cancel)
                    .await;
            })
        };
        let monitor = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.monitor_queues(&cancel).await })
        };
        let _ = future::join(listener, monitor).await;
    }

    /// Heartbeat loop: snapshot, scale, heal, plus a periodic repository
    /// refresh. Ticks never overlap; the next one starts only after the
    /// sleep completes.
    async fn monitor_queues(&self, cancel: &CancellationToken) {
        let mut beats: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            self.tick().await;

            if beats * self.config.heartbeat.as_secs() >= self.config.app_refresh.as_secs() {
                beats = 0;
                info!("refreshing apps");
                let mut repo = self.repo.lock().await;
                if let Err(e) = repo.reload() {
                    warn!(error = %e, "app refresh failed");
                }
                repo.evict_unused();
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.heartbeat) => {}
            }
            beats += 1;
        }
    }

    /// One reconciliation pass. Failures are logged and retried next tick.
    pub(crate) async fn tick(&self) {
        let snapshot =
            match ClusterSnapshot::observe(&self.runtime, &self.config.app_prefix).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!(error = %e, "snapshot failed; skipping tick");
                    return;
                }
            };
        debug!(
            services = snapshot.replicas.len(),
            running_apps = snapshot.running_apps.len(),
            "tick"
        );

        if self.toggles.autoscale_worker {
            if let Err(e) =
                scale::scale_worker(&self.broker, &self.runtime, &snapshot, &self.config).await
            {
                log_pass("worker autoscale", &e);
            }
        }
        if self.toggles.autoscale_app {
            let repo = self.repo.lock().await;
            if let Err(e) =
                scale::scale_apps(&self.broker, &self.runtime, &repo, &snapshot, &self.config)
                    .await
            {
                log_pass("app autoscale", &e);
            }
        }
        if self.toggles.autoheal_worker {
            if let Err(e) =
                heal::heal_workflow_queue(&self.broker, &self.runtime, &self.config).await
            {
                log_pass("worker autoheal", &e);
            }
        }
        if self.toggles.autoheal_app {
            if let Err(e) =
                heal::heal_action_queues(&self.broker, &self.runtime, &self.config).await
            {
                log_pass("app autoheal", &e);
            }
        }
    }

    /// Destroy the consumer groups and streams this controller manages.
    ///
    /// Idempotent, and tolerant of a broker that is already gone.
    pub async fn shutdown(&self) {
        info!("shutting down");

        let mut doomed = vec![WORKFLOW_QUEUE.to_owned()];
        if let Err(e) = self.broker.destroy_group(WORKFLOW_QUEUE, WORKFLOW_GROUP).await {
            debug!(error = %e, "could not destroy workflow group");
        }
        match self.broker.keys_matching(&keys::action_queue_glob()).await {
            Ok(streams) => {
                for stream in streams {
                    if let Some(action) = ActionKey::parse(&stream) {
                        if let Err(e) = self.broker.destroy_group(&stream, &action.group()).await {
                            debug!(stream = %stream, error = %e, "could not destroy group");
                        }
                    }
                    doomed.push(stream);
                }
            }
            Err(e) => debug!(error = %e, "could not enumerate action queues"),
        }
        match self.broker.keys_matching(&keys::results_key_glob()).await {
            Ok(results) => {
                for key in results {
                    if let Err(e) = self.broker.destroy_group(&key, ACTION_RESULTS_GROUP).await {
                        debug!(key = %key, error = %e, "could not destroy results group");
                    }
                    doomed.push(key);
                }
            }
            Err(e) => debug!(error = %e, "could not enumerate results keys"),
        }
        for key in doomed {
            if let Err(e) = self.broker.delete_key(&key).await {
                debug!(key = %key, error = %e, "could not delete stream");
            }
        }
        info!("shutdown complete");
    }
}

fn log_pass(pass: &str, error: &crate::Error) {
    if error.is_transient() {
        debug!(pass, error = %error, "pass skipped; broker or runtime unavailable");
    } else {
        warn!(pass, error = %error, "pass failed");
    }
}
