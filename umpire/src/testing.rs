//! Recording mock adapters used by the unit tests.
//!
//! Each mock serves canned data and appends every mutating call to an
//! operation trace, so tests can assert the *order* of broker and runtime
//! operations, not just their presence.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{self, Broker, Delivery, PendingEntry, PendingSummary};
use crate::runtime::{self, ContainerRuntime, Replicas, Service, Signal};
use crate::status::{self, StatusSink, WorkflowStatusMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BrokerOp {
    CreateGroup { stream: String, group: String },
    DestroyGroup { stream: String, group: String },
    Append { stream: String, fields: Vec<(String, String)> },
    Claim { stream: String, group: String, consumer: String, id: String },
    Ack { stream: String, group: String, id: String },
    DeleteEntry { stream: String, id: String },
    DeleteKey { key: String },
}

fn transient() -> broker::Error {
    broker::Error::Transient(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "mock broker down",
    )))
}

#[derive(Default, Debug)]
pub(crate) struct MockBroker {
    pub ops: Mutex<Vec<BrokerOp>>,
    lengths: HashMap<String, u64>,
    pending: HashMap<(String, String), PendingSummary>,
    pending_entries: HashMap<(String, String), Vec<PendingEntry>>,
    claims: HashMap<(String, String), Vec<(String, String)>>,
    keys_for: HashMap<String, Vec<String>>,
    missing: HashSet<String>,
    fail_all: bool,
}

impl MockBroker {
    pub fn with_length(mut self, stream: &str, length: u64) -> Self {
        self.lengths.insert(stream.to_owned(), length);
        self
    }

    pub fn with_pending(mut self, stream: &str, group: &str, summary: PendingSummary) -> Self {
        self.pending
            .insert((stream.to_owned(), group.to_owned()), summary);
        self
    }

    pub fn with_pending_entry(mut self, stream: &str, consumer: &str, id: &str) -> Self {
        self.pending_entries
            .entry((stream.to_owned(), consumer.to_owned()))
            .or_default()
            .push(PendingEntry {
                id: id.to_owned(),
                consumer: consumer.to_owned(),
                idle: Duration::from_secs(5),
                deliveries: 1,
            });
        self
    }

    pub fn with_claim(mut self, stream: &str, id: &str, fields: &[(&str, &str)]) -> Self {
        self.claims.insert(
            (stream.to_owned(), id.to_owned()),
            fields
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        );
        self
    }

    pub fn with_keys(mut self, glob: &str, keys: &[&str]) -> Self {
        self.keys_for.insert(
            glob.to_owned(),
            keys.iter().map(|k| (*k).to_owned()).collect(),
        );
        self
    }

    /// Mark a stream as vanished: its pending summary reports missing.
    pub fn with_missing(mut self, stream: &str) -> Self {
        self.missing.insert(stream.to_owned());
        self
    }

    /// Every operation fails with a transient error (broker down).
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn ops(&self) -> Vec<BrokerOp> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: BrokerOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn check_up(&self) -> Result<(), broker::Error> {
        if self.fail_all {
            Err(transient())
        } else {
            Ok(())
        }
    }
}

/// Shorthand for a [`PendingSummary`] with the given holders.
pub(crate) fn summary(count: u64, consumers: &[(&str, u64)]) -> PendingSummary {
    PendingSummary {
        count,
        min_id: (count > 0).then(|| "1-0".to_owned()),
        max_id: (count > 0).then(|| "9-0".to_owned()),
        consumers: consumers
            .iter()
            .map(|(name, held)| ((*name).to_owned(), *held))
            .collect(),
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), broker::Error> {
        self.check_up()?;
        self.record(BrokerOp::CreateGroup {
            stream: stream.to_owned(),
            group: group.to_owned(),
        });
        Ok(())
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<(), broker::Error> {
        self.check_up()?;
        self.record(BrokerOp::DestroyGroup {
            stream: stream.to_owned(),
            group: group.to_owned(),
        });
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, broker::Error> {
        self.check_up()?;
        self.record(BrokerOp::Append {
            stream: stream.to_owned(),
            fields: fields.to_vec(),
        });
        Ok("1-1".to_owned())
    }

    async fn read_group(
        &self,
        _streams: &[&str],
        _group: &str,
        _consumer: &str,
        _count: usize,
        _block: Duration,
    ) -> Result<Vec<Delivery>, broker::Error> {
        self.check_up()?;
        Ok(Vec::new())
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, broker::Error> {
        self.check_up()?;
        if self.missing.contains(stream) {
            return Err(broker::Error::MissingStreamOrGroup(stream.to_owned()));
        }
        Ok(self
            .pending
            .get(&(stream.to_owned(), group.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    async fn pending_range(
        &self,
        stream: &str,
        _group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, broker::Error> {
        self.check_up()?;
        let mut entries = self
            .pending_entries
            .get(&(stream.to_owned(), consumer.to_owned()))
            .cloned()
            .unwrap_or_default();
        entries.truncate(count);
        Ok(entries)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_consumer: &str,
        _min_idle: Duration,
        id: &str,
    ) -> Result<Vec<(String, Vec<(String, String)>)>, broker::Error> {
        self.check_up()?;
        self.record(BrokerOp::Claim {
            stream: stream.to_owned(),
            group: group.to_owned(),
            consumer: new_consumer.to_owned(),
            id: id.to_owned(),
        });
        Ok(self
            .claims
            .get(&(stream.to_owned(), id.to_owned()))
            .map(|fields| vec![(id.to_owned(), fields.clone())])
            .unwrap_or_default())
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), broker::Error> {
        self.check_up()?;
        self.record(BrokerOp::Ack {
            stream: stream.to_owned(),
            group: group.to_owned(),
            id: id.to_owned(),
        });
        Ok(())
    }

    async fn delete_entry(&self, stream: &str, id: &str) -> Result<(), broker::Error> {
        self.check_up()?;
        self.record(BrokerOp::DeleteEntry {
            stream: stream.to_owned(),
            id: id.to_owned(),
        });
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), broker::Error> {
        self.check_up()?;
        self.record(BrokerOp::DeleteKey {
            key: key.to_owned(),
        });
        Ok(())
    }

    async fn keys_matching(&self, glob: &str) -> Result<Vec<String>, broker::Error> {
        self.check_up()?;
        Ok(self.keys_for.get(glob).cloned().unwrap_or_default())
    }

    async fn length(&self, stream: &str) -> Result<u64, broker::Error> {
        self.check_up()?;
        Ok(self.lengths.get(stream).copied().unwrap_or(0))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RuntimeOp {
    Update { service: String, replicas: u64 },
    Signal { container: String, signal: Signal },
}

#[derive(Default, Debug)]
pub(crate) struct MockRuntime {
    pub ops: Mutex<Vec<RuntimeOp>>,
    services: Mutex<HashMap<String, (Service, Replicas)>>,
    containers: HashMap<String, Vec<String>>,
    conflicts: Mutex<HashMap<String, u32>>,
}

impl MockRuntime {
    pub fn with_service(self, service: Service, replicas: Replicas) -> Self {
        self.services
            .lock()
            .unwrap()
            .insert(service.name.clone(), (service, replicas));
        self
    }

    pub fn with_containers(mut self, service: &str, ids: &[&str]) -> Self {
        self.containers.insert(
            service.to_owned(),
            ids.iter().map(|id| (*id).to_owned()).collect(),
        );
        self
    }

    /// The next `count` updates of `service` fail with a version conflict.
    pub fn with_conflicts(self, service: &str, count: u32) -> Self {
        self.conflicts
            .lock()
            .unwrap()
            .insert(service.to_owned(), count);
        self
    }

    pub fn ops(&self) -> Vec<RuntimeOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, u64)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RuntimeOp::Update { service, replicas } => Some((service, replicas)),
                RuntimeOp::Signal { .. } => None,
            })
            .collect()
    }

    pub fn signals(&self) -> Vec<(String, Signal)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RuntimeOp::Signal { container, signal } => Some((container, signal)),
                RuntimeOp::Update { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_services(&self) -> Result<Vec<Service>, runtime::Error> {
        let mut services: Vec<Service> = self
            .services
            .lock()
            .unwrap()
            .values()
            .map(|(service, _)| service.clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn get_service(&self, name_or_id: &str) -> Result<Option<Service>, runtime::Error> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .values()
            .find(|(service, _)| service.name == name_or_id || service.id == name_or_id)
            .map(|(service, _)| service.clone()))
    }

    async fn update_service(
        &self,
        id: &str,
        _version: u64,
        _image: &str,
        replicas: u64,
    ) -> Result<(), runtime::Error> {
        let mut services = self.services.lock().unwrap();
        let Some((service, counts)) = services
            .values_mut()
            .find(|(service, _)| service.id == id || service.name == id)
        else {
            return Err(runtime::Error::NotFound(id.to_owned()));
        };
        let name = service.name.clone();
        if let Some(remaining) = self.conflicts.lock().unwrap().get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(runtime::Error::Conflict(name));
            }
        }
        service.version += 1;
        counts.desired = replicas;
        self.ops.lock().unwrap().push(RuntimeOp::Update {
            service: name,
            replicas,
        });
        Ok(())
    }

    async fn replicas(&self, name_or_id: &str) -> Result<Replicas, runtime::Error> {
        self.services
            .lock()
            .unwrap()
            .values()
            .find(|(service, _)| service.name == name_or_id || service.id == name_or_id)
            .map(|(_, counts)| *counts)
            .ok_or_else(|| runtime::Error::NotFound(name_or_id.to_owned()))
    }

    async fn containers_of(&self, service_name: &str) -> Result<Vec<String>, runtime::Error> {
        Ok(self
            .containers
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn signal_container(
        &self,
        container_id: &str,
        signal: Signal,
    ) -> Result<(), runtime::Error> {
        self.ops.lock().unwrap().push(RuntimeOp::Signal {
            container: container_id.to_owned(),
            signal,
        });
        Ok(())
    }
}

#[derive(Default, Debug)]
pub(crate) struct MockStatus {
    pub sent: Mutex<Vec<WorkflowStatusMessage>>,
}

impl MockStatus {
    pub fn sent(&self) -> Vec<WorkflowStatusMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for MockStatus {
    async fn send(&self, message: WorkflowStatusMessage) -> Result<(), status::Error> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// A worker/app service fixture.
pub(crate) fn service(id: &str, name: &str, version: u64) -> Service {
    Service {
        id: id.to_owned(),
        name: name.to_owned(),
        version,
        image: format!("{name}:latest"),
    }
}
