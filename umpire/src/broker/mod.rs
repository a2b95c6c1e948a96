//! Capability surface over a stream-group message broker.
//!
//! The control plane only ever touches the broker through the [`Broker`]
//! trait, so the scaling, healing and abort logic can be exercised against
//! recording mocks. The one production implementation is [`RedisBroker`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod redis_impl;
pub use redis_impl::RedisBroker;

/// Possible failures of a broker operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or availability failure; safe to retry on a later tick.
    #[error("broker unavailable: {0}")]
    Transient(#[source] redis::RedisError),

    /// The stream or group disappeared between enumeration and use.
    ///
    /// Common while an abort is purging per-execution streams; callers
    /// skip the key and move on.
    #[error("stream or group missing: {0}")]
    MissingStreamOrGroup(String),
}

impl Error {
    /// Whether this failure means the target key/group no longer exists.
    pub fn is_missing(&self) -> bool {
        matches!(self, Error::MissingStreamOrGroup(_))
    }
}

/// Summary of a stream's pending entries for one consumer group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingSummary {
    /// Number of delivered-but-unacknowledged entries.
    pub count: u64,
    /// Smallest pending entry id, if any.
    pub min_id: Option<String>,
    /// Largest pending entry id, if any.
    pub max_id: Option<String>,
    /// `(consumer, pending-count)` per consumer holding entries.
    pub consumers: Vec<(String, u64)>,
}

/// One entry of a `pending_range` listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle: Duration,
    pub deliveries: u64,
}

/// A message delivered through a consumer-group read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub stream: String,
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl Delivery {
    /// Looks up a field value by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Stream-group operations required by the control plane.
///
/// Implementations must uphold:
/// - [`create_group`](Broker::create_group) is idempotent ("group already
///   exists" is success) and creates the stream if absent;
/// - [`destroy_group`](Broker::destroy_group) and
///   [`delete_key`](Broker::delete_key) are idempotent;
/// - [`read_group`](Broker::read_group) blocks for at most `block` and
///   returns an empty batch on timeout, so callers stay cancellable.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create `group` on `stream`, creating the stream if needed.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), Error>;

    /// Destroy `group` on `stream`.
    async fn destroy_group(&self, stream: &str, group: &str) -> Result<(), Error>;

    /// Append an entry; returns the new entry id.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, Error>;

    /// Read undelivered entries as `consumer` of `group`.
    async fn read_group(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, Error>;

    /// Summarize the pending entries of `(stream, group)`.
    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, Error>;

    /// List up to `count` oldest pending entries held by `consumer`.
    async fn pending_range(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, Error>;

    /// Transfer ownership of a pending entry to `new_consumer`.
    ///
    /// Entries idle for less than `min_idle` are not claimed. Returns the
    /// claimed `(id, fields)` pairs, payload preserved.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_consumer: &str,
        min_idle: Duration,
        id: &str,
    ) -> Result<Vec<(String, Vec<(String, String)>)>, Error>;

    /// Acknowledge an entry for `group`.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), Error>;

    /// Remove an entry from the stream itself.
    async fn delete_entry(&self, stream: &str, id: &str) -> Result<(), Error>;

    /// Delete a whole key (stream or plain).
    async fn delete_key(&self, key: &str) -> Result<(), Error>;

    /// Enumerate keys matching a glob.
    async fn keys_matching(&self, glob: &str) -> Result<Vec<String>, Error>;

    /// Total number of entries in a stream (0 for a missing key).
    async fn length(&self, stream: &str) -> Result<u64, Error>;
}
