//! Capability surface over the container orchestrator.
//!
//! Mirrors [`crate::broker`]: logic talks to [`ContainerRuntime`], the one
//! production implementation is [`DockerRuntime`].

use async_trait::async_trait;
use thiserror::Error;

mod docker;
pub use docker::DockerRuntime;

/// Possible failures of a runtime operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or availability failure; safe to retry on a later tick.
    #[error("container runtime unavailable: {0}")]
    Transient(#[source] bollard::errors::Error),

    /// The named service does not exist.
    #[error("service {0} not found")]
    NotFound(String),

    /// Optimistic-concurrency conflict: the service changed underneath the
    /// update. Callers re-read for a fresh version index and retry once.
    #[error("conflicting update for service {0}")]
    Conflict(String),
}

/// A replicated service in the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Version index required for optimistic-concurrency updates.
    pub version: u64,
    pub image: String,
}

/// Observed and requested replica counts of a service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Replicas {
    pub running: u64,
    pub desired: u64,
}

/// Signal delivered to a single container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Graceful stop; workers finish their in-flight workflow first.
    Quit,
    /// Immediate termination, used for app containers on abort.
    Kill,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Quit => "SIGQUIT",
            Signal::Kill => "SIGKILL",
        }
    }
}

/// Orchestrator operations required by the control plane.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List every service.
    async fn list_services(&self) -> Result<Vec<Service>, Error>;

    /// Look up one service by name or id.
    async fn get_service(&self, name_or_id: &str) -> Result<Option<Service>, Error>;

    /// Set the replica count of a service.
    ///
    /// `version` must be the caller's last observed version index; a stale
    /// index fails with [`Error::Conflict`].
    async fn update_service(
        &self,
        id: &str,
        version: u64,
        image: &str,
        replicas: u64,
    ) -> Result<(), Error>;

    /// Replica counts of a service.
    async fn replicas(&self, name_or_id: &str) -> Result<Replicas, Error>;

    /// Short container ids of a service's running containers.
    ///
    /// These are the names stream consumers register under, so the healer
    /// diffs pending-entry holders directly against this list.
    async fn containers_of(&self, service_name: &str) -> Result<Vec<String>, Error>;

    /// Deliver a signal to one container.
    async fn signal_container(&self, container_id: &str, signal: Signal) -> Result<(), Error>;
}
