//! Filesystem-backed repository of deployable app specifications.
//!
//! Layout: `{apps_path}/{app}/{version}/app.yaml`. The repository is loaded
//! once at startup (fatal if empty) and refreshed periodically from the
//! heartbeat loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read apps directory: {0}")]
    Io(#[from] io::Error),

    #[error("malformed app spec {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The repository contains no apps; the controller cannot start.
    #[error("no apps found in repository")]
    NoApps,
}

/// Deployment limits of one `(app, version)`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AppSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Ceiling on the app service's replica count.
    pub max_replicas: u64,
}

/// In-memory map of apps to their versioned specs, plus the backing directory.
#[derive(Debug)]
pub struct AppRepo {
    path: PathBuf,
    apps: HashMap<String, HashMap<String, AppSpec>>,
}

impl AppRepo {
    /// Scan `path` and build the repository. Errors with [`Error::NoApps`]
    /// when nothing loadable is found.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let apps = scan(&path)?;
        if apps.is_empty() {
            return Err(Error::NoApps);
        }
        debug!(apps = apps.len(), path = %path.display(), "loaded app repository");
        Ok(Self { path, apps })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        path: PathBuf,
        apps: HashMap<String, HashMap<String, AppSpec>>,
    ) -> Self {
        Self { path, apps }
    }

    /// Look up the spec of one `(app, version)`.
    pub fn get(&self, app: &str, version: &str) -> Option<&AppSpec> {
        self.apps.get(app).and_then(|versions| versions.get(version))
    }

    /// Number of known apps.
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Re-scan the backing directory, merging new and updated specs in.
    pub fn reload(&mut self) -> Result<(), Error> {
        let fresh = scan(&self.path)?;
        for (app, versions) in fresh {
            self.apps.entry(app).or_default().extend(versions);
        }
        Ok(())
    }

    /// Drop entries whose backing directory no longer exists.
    pub fn evict_unused(&mut self) {
        let path = self.path.clone();
        self.apps.retain(|app, versions| {
            versions.retain(|version, _| path.join(app).join(version).is_dir());
            !versions.is_empty()
        });
    }
}

fn scan(path: &Path) -> Result<HashMap<String, HashMap<String, AppSpec>>, Error> {
    let mut apps: HashMap<String, HashMap<String, AppSpec>> = HashMap::new();
    if !path.is_dir() {
        return Ok(apps);
    }
    for app_entry in fs::read_dir(path)? {
        let app_entry = app_entry?;
        if !app_entry.file_type()?.is_dir() {
            continue;
        }
        let app_name = app_entry.file_name().to_string_lossy().into_owned();
        let mut versions = HashMap::new();
        for version_entry in fs::read_dir(app_entry.path())? {
            let version_entry = version_entry?;
            if !version_entry.file_type()?.is_dir() {
                continue;
            }
            let version = version_entry.file_name().to_string_lossy().into_owned();
            let spec_path = version_entry.path().join("app.yaml");
            let raw = match fs::read_to_string(&spec_path) {
                Ok(raw) => raw,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let mut spec: AppSpec = serde_yaml::from_str(&raw).map_err(|source| Error::Parse {
                path: spec_path,
                source,
            })?;
            if spec.name.is_empty() {
                spec.name = app_name.clone();
            }
            if spec.version.is_empty() {
                spec.version = version.clone();
            }
            versions.insert(version, spec);
        }
        if !versions.is_empty() {
            apps.insert(app_name, versions);
        }
    }
    Ok(apps)
}
