//! Workflow status reporting over HTTP.
//!
//! Used by the abort path when there is no in-flight worker left to signal;
//! the status endpoint is told directly that the execution was aborted.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("status endpoint unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Aborted,
}

/// Status update for one workflow execution.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct WorkflowStatusMessage {
    pub execution_id: String,
    pub workflow_id: String,
    pub name: String,
    pub status: WorkflowStatus,
}

impl WorkflowStatusMessage {
    pub fn aborted(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            name: name.into(),
            status: WorkflowStatus::Aborted,
        }
    }
}

/// Sink for workflow status messages.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn send(&self, message: WorkflowStatusMessage) -> Result<(), Error>;
}

/// POSTs status messages as JSON to a configured endpoint.
#[derive(Clone)]
pub struct HttpStatusSink {
    http: reqwest::Client,
    url: String,
}

impl HttpStatusSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn send(&self, message: WorkflowStatusMessage) -> Result<(), Error> {
        self.http
            .post(&self.url)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_aborted_status() {
        let message = WorkflowStatusMessage::aborted("e1", "wf1", "demo");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "execution_id": "e1",
                "workflow_id": "wf1",
                "name": "demo",
                "status": "ABORTED",
            })
        );
    }
}
