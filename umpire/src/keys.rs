//! Well-known stream, group and key names shared across the control plane.
//!
//! Per-execution state is never cached: the set of in-flight executions is
//! reconstructed on demand by matching [`action_queue_glob`] against the
//! broker keyspace, so these patterns are the single source of truth.

use std::sync::LazyLock;

/// Shared stream of workflows waiting for a generic worker.
pub const WORKFLOW_QUEUE: &str = "workflow-queue";
/// Consumer group of worker containers on [`WORKFLOW_QUEUE`].
pub const WORKFLOW_GROUP: &str = "workflow-group";
/// Stream carrying abort commands for in-flight executions.
pub const WORKFLOW_CONTROL: &str = "workflow-control";
/// Consumer group of controllers on [`WORKFLOW_CONTROL`].
pub const WORKFLOW_CONTROL_GROUP: &str = "workflow-control-group";
/// Consumer group attached to per-execution results streams.
pub const ACTION_RESULTS_GROUP: &str = "action-results-group";

/// Synthetic consumer name used when reclaiming stranded messages.
///
/// Kept stable so reclaimed traffic is distinguishable in stream telemetry.
pub const RECLAIM_CONSUMER: &str = "UMPIRE";

/// Glob matching a lowercase hex UUID in its 8-4-4-4-12 form.
pub static UUID_GLOB: LazyLock<String> = LazyLock::new(|| {
    [8usize, 4, 4, 4, 12]
        .into_iter()
        .map(|n| "[0-9a-f]".repeat(n))
        .collect::<Vec<_>>()
        .join("-")
});

/// Glob matching every ActionQueue key (`<uuid>:<app>:<version>`).
pub fn action_queue_glob() -> String {
    format!("{}:*:*", &*UUID_GLOB)
}

/// Glob matching every results key (`<uuid>:results`).
pub fn results_key_glob() -> String {
    format!("{}:results", &*UUID_GLOB)
}

/// Glob matching the ActionQueues of one execution.
pub fn execution_glob(execution_id: &str) -> String {
    format!("{execution_id}:*:*")
}

/// Results key of one execution.
pub fn results_key(execution_id: &str) -> String {
    format!("{execution_id}:results")
}

/// A parsed ActionQueue key.
///
/// One stream exists per `(execution, app, version)` triple; its consumer
/// group is shared by all replicas of the owning app service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionKey {
    pub execution_id: String,
    pub app: String,
    pub version: String,
}

impl ActionKey {
    /// Splits `<execution_id>:<app>:<version>`, returning `None` for keys
    /// that do not have exactly three segments.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, ':');
        let execution_id = parts.next()?.to_owned();
        let app = parts.next()?.to_owned();
        let version = parts.next()?.to_owned();
        if execution_id.is_empty() || app.is_empty() || version.is_empty() || version.contains(':') {
            return None;
        }
        Some(Self {
            execution_id,
            app,
            version,
        })
    }

    /// Consumer group shared by all streams of this `(app, version)`.
    pub fn group(&self) -> String {
        format!("{}:{}", self.app, self.version)
    }

    /// Name of the app service owning this stream's consumers.
    pub fn service(&self, app_prefix: &str) -> String {
        format!("{app_prefix}_{}", self.app)
    }

    /// The full stream key.
    pub fn stream(&self) -> String {
        format!("{}:{}:{}", self.execution_id, self.app, self.version)
    }
}
