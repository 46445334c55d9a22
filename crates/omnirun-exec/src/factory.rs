//! Adapter construction from resolved targets

use std::sync::Arc;

use omnirun_inventory::{BackendConfig, Target};

use crate::docker::DockerAdapter;
use crate::error::ExecError;
use crate::kube::KubeAdapter;
use crate::local::LocalAdapter;
use crate::ssh::SshAdapter;
use crate::traits::Adapter;

/// Builds the adapter matching a target's backend
///
/// Engines take a factory instead of constructing adapters themselves so
/// tests can substitute mock backends.
pub trait AdapterFactory: Send + Sync {
    /// Build an adapter for `target`
    ///
    /// # Errors
    /// Returns [`ExecError::Key`] when SSH key material cannot be resolved;
    /// connection problems surface later, on first use.
    fn create(&self, target: &Target) -> Result<Arc<dyn Adapter>, ExecError>;
}

/// Factory producing the real backends
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, target: &Target) -> Result<Arc<dyn Adapter>, ExecError> {
        match &target.config {
            BackendConfig::Local => Ok(Arc::new(LocalAdapter::new())),
            BackendConfig::Ssh(config) => Ok(Arc::new(SshAdapter::new(config)?)),
            BackendConfig::Docker(config) => Ok(Arc::new(DockerAdapter::new(config.clone()))),
            BackendConfig::Kube(config) => Ok(Arc::new(KubeAdapter::new(config.clone()))),
        }
    }
}

/// Build an adapter for `target` with the default factory
///
/// # Errors
/// See [`AdapterFactory::create`].
pub fn adapter_for(target: &Target) -> Result<Arc<dyn Adapter>, ExecError> {
    DefaultAdapterFactory.create(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnirun_inventory::{DockerConfig, KubeConfig};

    #[test]
    fn factory_matches_backend_kind() {
        let local = Target::local();
        assert_eq!(adapter_for(&local).unwrap().kind(), "local");

        let docker = Target::from_entry(
            "containers",
            "app",
            BackendConfig::Docker(DockerConfig::new("my-app")),
        );
        assert_eq!(adapter_for(&docker).unwrap().kind(), "docker");

        let kube = Target::from_entry("pods", "api", BackendConfig::Kube(KubeConfig::new("api-0")));
        assert_eq!(adapter_for(&kube).unwrap().kind(), "kube");
    }
}
