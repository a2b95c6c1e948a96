//! Point-in-time view of services and replica counts, taken once per tick.

use std::collections::HashMap;

use crate::runtime::{ContainerRuntime, Error, Replicas};

/// Per-tick observation of the cluster.
///
/// Scalers consult this instead of re-querying the runtime so one tick sees
/// a consistent view. A snapshot is never carried across ticks.
#[derive(Clone, Debug, Default)]
pub struct ClusterSnapshot {
    /// Service name to observed replica counts.
    pub replicas: HashMap<String, Replicas>,
    /// Names of currently-deployed app services (matched by prefix).
    pub running_apps: Vec<String>,
}

impl ClusterSnapshot {
    /// Observe all services and their replica counts.
    pub async fn observe<R: ContainerRuntime>(
        runtime: &R,
        app_prefix: &str,
    ) -> Result<Self, Error> {
        let services = runtime.list_services().await?;
        let mut replicas = HashMap::with_capacity(services.len());
        let mut running_apps = Vec::new();
        for service in services {
            let counts = runtime.replicas(&service.id).await?;
            if service.name.contains(app_prefix) {
                running_apps.push(service.name.clone());
            }
            replicas.insert(service.name, counts);
        }
        running_apps.sort();
        Ok(Self {
            replicas,
            running_apps,
        })
    }

    /// Desired replica count of a service, defaulting to zero when the
    /// service is not deployed.
    pub fn desired(&self, service: &str) -> u64 {
        self.replicas.get(service).copied().unwrap_or_default().desired
    }
}
