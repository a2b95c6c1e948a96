//! Redelivery of messages stranded on dead consumers.
//!
//! A consumer that read a message and then died leaves it pending forever;
//! nothing in the broker will hand it to anyone else. The healer diffs each
//! group's pending-entry holders against the live container set and walks
//! stranded entries through claim, re-append, ack, delete, in that order,
//! so an interruption at any point leaves the message recoverable.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::keys::{self, ActionKey, RECLAIM_CONSUMER, WORKFLOW_GROUP, WORKFLOW_QUEUE};
use crate::runtime::ContainerRuntime;

/// Entries idle for less than this are left alone, so a redelivery already
/// racing toward a live consumer is never stolen.
const MIN_CLAIM_IDLE: Duration = Duration::from_millis(1000);

/// Reclaim stranded messages on every ActionQueue.
pub async fn heal_action_queues<B: Broker, R: ContainerRuntime>(
    broker: &B,
    runtime: &R,
    config: &Config,
) -> Result<()> {
    let streams = broker.keys_matching(&keys::action_queue_glob()).await?;
    for stream in streams {
        let Some(action) = ActionKey::parse(&stream) else {
            continue;
        };
        let group = action.group();
        let service = action.service(&config.app_prefix);
        match reclaim_stranded(broker, runtime, &stream, &group, &service).await {
            Ok(()) => {}
            // Deleted underneath us by an abort.
            Err(Error::Broker(e)) if e.is_missing() => {}
            Err(e) => warn!(stream = %stream, error = %e, "failed to heal stream"),
        }
    }
    Ok(())
}

/// Reclaim workflow-queue messages stranded on dead worker containers.
pub async fn heal_workflow_queue<B: Broker, R: ContainerRuntime>(
    broker: &B,
    runtime: &R,
    config: &Config,
) -> Result<()> {
    reclaim_stranded(
        broker,
        runtime,
        WORKFLOW_QUEUE,
        WORKFLOW_GROUP,
        &config.worker_service,
    )
    .await
}

/// Re-enqueue the oldest pending entry of each dead consumer of
/// `(stream, group)`, where "dead" means absent from `service`'s live
/// container set.
async fn reclaim_stranded<B: Broker, R: ContainerRuntime>(
    broker: &B,
    runtime: &R,
    stream: &str,
    group: &str,
    service: &str,
) -> Result<()> {
    let pending = broker.pending_summary(stream, group).await?;
    if pending.count == 0 {
        return Ok(());
    }
    let live = runtime.containers_of(service).await?;

    for (consumer, held) in &pending.consumers {
        if live.iter().any(|c| c == consumer) {
            continue;
        }
        debug!(stream = %stream, consumer = %consumer, held, "dead consumer holds pending entries");

        for entry in broker.pending_range(stream, group, consumer, 1).await? {
            let claimed = broker
                .claim(stream, group, RECLAIM_CONSUMER, MIN_CLAIM_IDLE, &entry.id)
                .await?;
            for (id, fields) in claimed {
                // Re-append before acknowledging, so the payload is live in
                // the stream before the original stops being pending.
                broker.append(stream, &fields).await?;
                broker.ack(stream, group, &id).await?;
                broker.delete_entry(stream, &id).await?;
                info!(stream = %stream, id = %id, consumer = %consumer, "redelivered stranded message");
            }
        }
    }
    Ok(())
}
