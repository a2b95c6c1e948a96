//! [`ContainerRuntime`] implementation over the Docker Swarm API.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::KillContainerOptions;
use bollard::service::{InspectServiceOptions, ListServicesOptions, UpdateServiceOptions};
use bollard::task::ListTasksOptions;
use bollard::Docker;

use super::{ContainerRuntime, Error, Replicas, Service, Signal};

/// Consumers register under the 12-character short form of their container id.
const SHORT_ID_LEN: usize = 12;

/// Swarm-backed runtime over a shared [`Docker`] handle.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local daemon defaults (`DOCKER_HOST` honored).
    pub fn connect() -> Result<Self, Error> {
        let docker = Docker::connect_with_local_defaults().map_err(Error::Transient)?;
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    fn classify(name: &str, err: bollard::errors::Error) -> Error {
        match &err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => Error::NotFound(name.to_owned()),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            } => Error::Conflict(name.to_owned()),
            // Swarm reports a stale version index as a plain server error.
            bollard::errors::Error::DockerResponseServerError { message, .. }
                if message.contains("update out of sequence") =>
            {
                Error::Conflict(name.to_owned())
            }
            _ => Error::Transient(err),
        }
    }
}

fn convert(service: bollard::models::Service) -> Option<Service> {
    let id = service.id?;
    let spec = service.spec.unwrap_or_default();
    let image = spec
        .task_template
        .as_ref()
        .and_then(|t| t.container_spec.as_ref())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    Some(Service {
        id,
        name: spec.name.unwrap_or_default(),
        version: service.version.and_then(|v| v.index).unwrap_or_default(),
        image,
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_services(&self) -> Result<Vec<Service>, Error> {
        let services = self
            .docker
            .list_services(None::<ListServicesOptions<String>>)
            .await
            .map_err(|e| Self::classify("", e))?;
        Ok(services.into_iter().filter_map(convert).collect())
    }

    async fn get_service(&self, name_or_id: &str) -> Result<Option<Service>, Error> {
        match self
            .docker
            .inspect_service(name_or_id, None::<InspectServiceOptions>)
            .await
        {
            Ok(service) => Ok(convert(service)),
            Err(err) => match Self::classify(name_or_id, err) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn update_service(
        &self,
        id: &str,
        version: u64,
        image: &str,
        replicas: u64,
    ) -> Result<(), Error> {
        // The update endpoint wants a full spec; start from the current one
        // and rewrite only the replica count and image.
        let current = self
            .docker
            .inspect_service(id, None::<InspectServiceOptions>)
            .await
            .map_err(|e| Self::classify(id, e))?;
        let mut spec = current.spec.unwrap_or_default();
        if let Some(container) = spec
            .task_template
            .as_mut()
            .and_then(|t| t.container_spec.as_mut())
        {
            container.image = Some(image.to_owned());
        }
        if let Some(replicated) = spec.mode.as_mut().and_then(|m| m.replicated.as_mut()) {
            replicated.replicas = Some(replicas as i64);
        } else {
            spec.mode = Some(bollard::models::ServiceSpecMode {
                replicated: Some(bollard::models::ServiceSpecModeReplicated {
                    replicas: Some(replicas as i64),
                }),
                ..Default::default()
            });
        }

        let options = UpdateServiceOptions {
            version,
            ..Default::default()
        };
        self.docker
            .update_service(id, spec, options, None)
            .await
            .map_err(|e| Self::classify(id, e))?;
        Ok(())
    }

    async fn replicas(&self, name_or_id: &str) -> Result<Replicas, Error> {
        let service = self
            .docker
            .inspect_service(name_or_id, None::<InspectServiceOptions>)
            .await
            .map_err(|e| Self::classify(name_or_id, e))?;
        let name = service
            .spec
            .as_ref()
            .and_then(|s| s.name.clone())
            .unwrap_or_else(|| name_or_id.to_owned());
        let desired = service
            .spec
            .as_ref()
            .and_then(|s| s.mode.as_ref())
            .and_then(|m| m.replicated.as_ref())
            .and_then(|r| r.replicas)
            .unwrap_or_default() as u64;
        let running = self.containers_of(&name).await?.len() as u64;
        Ok(Replicas { running, desired })
    }

    async fn containers_of(&self, service_name: &str) -> Result<Vec<String>, Error> {
        let filters = HashMap::from([
            ("service", vec![service_name]),
            ("desired-state", vec!["running"]),
        ]);
        let tasks = self
            .docker
            .list_tasks(Some(ListTasksOptions {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Self::classify(service_name, e))?;
        Ok(tasks
            .into_iter()
            .filter_map(|task| {
                task.status
                    .and_then(|s| s.container_status)
                    .and_then(|c| c.container_id)
            })
            .map(|mut id| {
                id.truncate(SHORT_ID_LEN);
                id
            })
            .collect())
    }

    async fn signal_container(&self, container_id: &str, signal: Signal) -> Result<(), Error> {
        self.docker
            .kill_container(
                container_id,
                Some(KillContainerOptions {
                    signal: signal.as_str(),
                }),
            )
            .await
            .map_err(|e| Self::classify(container_id, e))
    }
}
