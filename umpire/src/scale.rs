//! Queue-depth driven autoscaling of the worker and app services.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::apps::AppRepo;
use crate::broker::Broker;
use crate::config::Config;
use crate::error::Result;
use crate::keys::{self, ActionKey, WORKFLOW_GROUP, WORKFLOW_QUEUE};
use crate::runtime::{ContainerRuntime, Error as RuntimeError};
use crate::snapshot::ClusterSnapshot;

/// Work observed for one `(app, version)` across all of its ActionQueues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Workload {
    total: u64,
    queued: u64,
    executing: u64,
}

/// Scale the generic worker service to the workflow-queue depth.
///
/// The worker is only ever grown here; shrinking idle workers is operator
/// policy, not the controller's.
pub async fn scale_worker<B: Broker, R: ContainerRuntime>(
    broker: &B,
    runtime: &R,
    snapshot: &ClusterSnapshot,
    config: &Config,
) -> Result<()> {
    let total = broker.length(WORKFLOW_QUEUE).await?;
    let executing = match broker.pending_summary(WORKFLOW_QUEUE, WORKFLOW_GROUP).await {
        Ok(summary) => summary.count,
        Err(e) if e.is_missing() => 0,
        Err(e) => return Err(e.into()),
    };
    let queued = total.saturating_sub(executing);
    debug!(queued, executing, "workflow queue depth");

    let current = snapshot.desired(&config.worker_service);
    let needed = total.min(config.max_workers);
    if needed > current {
        set_replicas(runtime, &config.worker_service, current, needed).await?;
    }
    Ok(())
}

/// Scale each app service to the summed depth of its ActionQueues,
/// capped by the app spec's `max_replicas`.
pub async fn scale_apps<B: Broker, R: ContainerRuntime>(
    broker: &B,
    runtime: &R,
    repo: &AppRepo,
    snapshot: &ClusterSnapshot,
    config: &Config,
) -> Result<()> {
    let streams = broker.keys_matching(&keys::action_queue_glob()).await?;

    let mut workloads: BTreeMap<(String, String), Workload> = BTreeMap::new();
    for stream in &streams {
        let Some(action) = ActionKey::parse(stream) else {
            continue;
        };
        // The listener may delete streams while we iterate; skip casualties.
        let executing = match broker.pending_summary(stream, &action.group()).await {
            Ok(summary) => summary.count,
            Err(e) => {
                debug!(stream = %stream, error = %e, "stream vanished mid-iteration");
                continue;
            }
        };
        let total = match broker.length(stream).await {
            Ok(total) => total,
            Err(e) => {
                debug!(stream = %stream, error = %e, "stream vanished mid-iteration");
                continue;
            }
        };
        let entry = workloads
            .entry((action.app, action.version))
            .or_default();
        entry.total += total;
        entry.executing += executing;
        entry.queued += total.saturating_sub(executing);
    }

    for ((app, version), workload) in &workloads {
        debug!(
            app = %app,
            version = %version,
            queued = workload.queued,
            executing = workload.executing,
            "app workload"
        );
        let Some(spec) = repo.get(app, version) else {
            warn!(app = %app, version = %version, "streams observed for an unknown app; skipping");
            continue;
        };
        let service = format!("{}_{}", config.app_prefix, app);
        let needed = workload.total.min(spec.max_replicas);
        let current = snapshot.desired(&service);
        if needed == current {
            continue;
        }
        if let Err(e) = set_replicas(runtime, &service, current, needed).await {
            warn!(service = %service, error = %e, "service failed to update");
        }
    }
    Ok(())
}

/// Apply a replica count, growing through zero in two steps.
async fn set_replicas<R: ContainerRuntime>(
    runtime: &R,
    service: &str,
    current: u64,
    needed: u64,
) -> Result<()> {
    if current == 0 && needed > 0 {
        // The orchestrator may ignore a direct zero-to-N update; pin the
        // count to zero first, then grow.
        apply(runtime, service, 0).await?;
    }
    apply(runtime, service, needed).await
}

/// Issue one replica update against a freshly-read version index,
/// re-reading and retrying once on a conflicting concurrent change.
async fn apply<R: ContainerRuntime>(runtime: &R, service: &str, replicas: u64) -> Result<()> {
    let mut retried = false;
    loop {
        let Some(current) = runtime.get_service(service).await? else {
            warn!(service = %service, "service not deployed; cannot scale");
            return Ok(());
        };
        match runtime
            .update_service(&current.id, current.version, &current.image, replicas)
            .await
        {
            Ok(()) => {
                debug!(service = %service, replicas, "service scaled");
                return Ok(());
            }
            Err(RuntimeError::Conflict(_)) if !retried => {
                retried = true;
                continue;
            }
            Err(RuntimeError::Conflict(_)) => {
                warn!(service = %service, "service kept changing underneath the update; deferring to next tick");
                return Ok(());
            }
            Err(RuntimeError::NotFound(_)) => {
                warn!(service = %service, "service disappeared during update");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}
