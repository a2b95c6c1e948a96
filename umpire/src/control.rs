//! The workflow-abort listener.
//!
//! Consumes the control stream and cancels in-flight executions: the owning
//! worker is asked to stop gracefully, app containers are killed, and the
//! execution's streams are purged. The ordering matters: signal before
//! purge, acknowledge before delete, so a crash mid-abort leaves a
//! retryable control entry rather than a half-forgotten execution.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Delivery};
use crate::config::Config;
use crate::error::Result;
use crate::keys::{self, ActionKey, WORKFLOW_CONTROL, WORKFLOW_CONTROL_GROUP, WORKFLOW_GROUP, WORKFLOW_QUEUE};
use crate::runtime::{ContainerRuntime, Signal};
use crate::status::{StatusSink, WorkflowStatusMessage};

/// How long one group read blocks before the loop re-checks cancellation.
const READ_BLOCK: Duration = Duration::from_millis(1000);

/// The workflow document embedded in an abort command.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WorkflowRef {
    pub id: String,
    pub name: String,
}

/// A decoded abort command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortCommand {
    pub execution_id: String,
    pub workflow: WorkflowRef,
}

impl AbortCommand {
    /// Decode the `{execution_id, workflow}` fields of a control entry;
    /// `workflow` is a JSON document carrying at least `{id, name}`.
    pub fn decode(delivery: &Delivery) -> Option<Self> {
        let execution_id = delivery.field("execution_id")?.to_owned();
        let workflow = serde_json::from_str(delivery.field("workflow")?).ok()?;
        Some(Self {
            execution_id,
            workflow,
        })
    }
}

/// Consume the control stream until cancelled.
///
/// Transient failures are logged and the loop re-entered; a missing control
/// stream or group is (re)created on the fly.
pub async fn listen<B, R, S>(
    broker: &B,
    runtime: &R,
    status: &S,
    config: &Config,
    cancel: &CancellationToken,
) where
    B: Broker,
    R: ContainerRuntime,
    S: StatusSink,
{
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = broker.read_group(
                &[WORKFLOW_CONTROL],
                WORKFLOW_CONTROL_GROUP,
                &config.consumer_id,
                1,
                READ_BLOCK,
            ) => read,
        };
        let deliveries = match read {
            Ok(deliveries) => deliveries,
            Err(e) if e.is_missing() => {
                debug!("control stream missing; creating it");
                if let Err(e) = broker.create_group(WORKFLOW_CONTROL, WORKFLOW_CONTROL_GROUP).await
                {
                    warn!(error = %e, "failed to create control group");
                    tokio::time::sleep(READ_BLOCK).await;
                }
                continue;
            }
            Err(e) => {
                debug!(error = %e, "control read failed");
                tokio::time::sleep(READ_BLOCK).await;
                continue;
            }
        };

        for delivery in deliveries {
            let Some(command) = AbortCommand::decode(&delivery) else {
                // A poison entry would otherwise be redelivered forever.
                warn!(id = %delivery.id, "undecodable control entry; discarding");
                let _ = broker
                    .ack(&delivery.stream, WORKFLOW_CONTROL_GROUP, &delivery.id)
                    .await;
                let _ = broker.delete_entry(&delivery.stream, &delivery.id).await;
                continue;
            };
            if let Err(e) = handle_abort(broker, runtime, status, &command, &delivery).await {
                warn!(
                    execution_id = %command.execution_id,
                    error = %e,
                    "abort failed; the control entry stays pending for redelivery"
                );
            }
        }
    }
}

/// Abort one execution.
///
/// Ordering per execution: signal the owning worker, signal each app
/// container, delete its ActionQueues, delete the results key, then ack and
/// delete the control entry. Each step is best-effort but never reordered.
pub(crate) async fn handle_abort<B, R, S>(
    broker: &B,
    runtime: &R,
    status: &S,
    command: &AbortCommand,
    entry: &Delivery,
) -> Result<()>
where
    B: Broker,
    R: ContainerRuntime,
    S: StatusSink,
{
    let executing = match broker.pending_summary(WORKFLOW_QUEUE, WORKFLOW_GROUP).await {
        Ok(summary) => summary,
        Err(e) if e.is_missing() => Default::default(),
        Err(e) => return Err(e.into()),
    };

    if executing.count < 1 {
        // No worker owns the workflow any more; report the abort directly.
        let message = WorkflowStatusMessage::aborted(
            &command.execution_id,
            &command.workflow.id,
            &command.workflow.name,
        );
        if let Err(e) = status.send(message).await {
            warn!(execution_id = %command.execution_id, error = %e, "failed to post aborted status");
        }
    } else if let Some((worker, _)) = executing.consumers.first() {
        if let Err(e) = runtime.signal_container(worker, Signal::Quit).await {
            warn!(container = %worker, error = %e, "failed to signal worker");
        }
    }

    for stream in broker
        .keys_matching(&keys::execution_glob(&command.execution_id))
        .await?
    {
        let Some(action) = ActionKey::parse(&stream) else {
            continue;
        };
        let pending = match broker.pending_summary(&stream, &action.group()).await {
            Ok(pending) => pending,
            Err(e) if e.is_missing() => continue,
            Err(e) => {
                warn!(stream = %stream, error = %e, "could not read holders; skipping stream");
                continue;
            }
        };
        for (consumer, _) in &pending.consumers {
            if let Err(e) = runtime.signal_container(consumer, Signal::Kill).await {
                warn!(container = %consumer, error = %e, "failed to signal app container");
            }
        }
        broker.delete_key(&stream).await?;
    }
    broker
        .delete_key(&keys::results_key(&command.execution_id))
        .await?;

    broker
        .ack(&entry.stream, WORKFLOW_CONTROL_GROUP, &entry.id)
        .await?;
    broker.delete_entry(&entry.stream, &entry.id).await?;
    info!(
        execution_id = %command.execution_id,
        workflow = %command.workflow.name,
        "workflow aborted"
    );
    Ok(())
}
