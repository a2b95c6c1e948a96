//! Queue-driven orchestration control plane for workflow executors.
//!
//! A single long-lived controller (the *umpire*) reconciles three signals
//! against desired-state policy on a fixed heartbeat:
//!
//! - depth of the shared workflow queue and the per-execution action queues
//!   drives the replica counts of the worker and app services ([`scale`]);
//! - membership diffs between pending-entry holders and the live container
//!   set drive redelivery of stranded messages ([`heal`]);
//! - abort commands on the control stream drive cooperative cancellation of
//!   in-flight executions ([`control`]).
//!
//! All authoritative state lives in the message broker and the container
//! runtime; the controller persists nothing and reconstructs its view from
//! both on every tick. The broker and runtime are reached through the
//! [`broker::Broker`] and [`runtime::ContainerRuntime`] traits, backed in
//! production by Redis streams and Docker Swarm.

pub mod apps;
pub mod broker;
pub mod config;
pub mod control;
mod error;
pub mod heal;
pub mod keys;
pub mod runtime;
pub mod scale;
pub mod snapshot;
pub mod status;
mod umpire;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use umpire::{Toggles, Umpire};
