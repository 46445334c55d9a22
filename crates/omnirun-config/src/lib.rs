//! omnirun-config: project file loading
//!
//! Reads `omnirun.toml` into an [`Inventory`], a named-task table and
//! per-command defaults. Entry arrays keep declaration order, which the
//! resolver relies on for pattern expansion.
//!
//! ```toml
//! [[hosts]]
//! name = "web-1"
//! host = "10.0.0.1"
//! user = "deploy"
//! ssh_key = "~/.ssh/id_ed25519"
//!
//! [[containers]]
//! name = "app"
//! container = "my-app"
//!
//! [[groups.build]]
//! name = "runner"
//! type = "docker"
//! container = "ci-runner"
//!
//! [tasks]
//! check = "cargo check"
//!
//! [defaults.copy]
//! preserve = true
//! ```

pub mod error;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use omnirun_inventory::{BackendConfig, DockerConfig, Inventory, KubeConfig, SshConfig};
use serde::Deserialize;
use tracing::debug;

pub use error::ConfigError;

/// Well-known project file name
pub const CONFIG_FILE: &str = "omnirun.toml";

/// Fully loaded project configuration
#[derive(Debug, Default)]
pub struct ProjectConfig {
    /// Target inventory, declaration order preserved
    pub inventory: Inventory,
    /// Named tasks runnable via the watch engine's `task` option
    pub tasks: HashMap<String, String>,
    /// Per-command defaults merged beneath explicit options
    pub defaults: Defaults,
}

impl ProjectConfig {
    /// Load a project file
    ///
    /// # Errors
    /// `NotFound` / `Io` for filesystem problems, `Parse` for schema
    /// violations (reported with file context).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw, &path.display().to_string())
    }

    /// Look for [`CONFIG_FILE`] in `dir`
    ///
    /// # Errors
    /// Same as [`ProjectConfig::load`]; an absent file is `Ok(None)`.
    pub fn discover(dir: &Path) -> Result<Option<Self>, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "loading project config");
        Self::load(&path).map(Some)
    }

    /// Parse config text; `origin` names the source in error messages
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for invalid TOML or unknown keys.
    pub fn parse(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;

        let mut inventory = Inventory::new();
        for entry in raw.hosts {
            inventory.add_host(&entry.name, entry.config);
        }
        for entry in raw.containers {
            inventory.add_container(&entry.name, entry.config);
        }
        for entry in raw.pods {
            inventory.add_pod(&entry.name, entry.config);
        }
        for (group, entries) in raw.groups {
            for entry in entries {
                let config = match entry.backend {
                    BackendEntry::Ssh(c) => BackendConfig::Ssh(c),
                    BackendEntry::Docker(c) => BackendConfig::Docker(c),
                    BackendEntry::Kube(c) => BackendConfig::Kube(c),
                };
                inventory.add(&group, &entry.name, config);
            }
        }

        Ok(Self {
            inventory,
            tasks: raw.tasks,
            defaults: raw.defaults,
        })
    }
}

/// Per-command option defaults
///
/// Every field is optional; explicit call options always win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Defaults for `cp`
    #[serde(default)]
    pub copy: CopyDefaults,
    /// Defaults for `watch`
    #[serde(default)]
    pub watch: WatchDefaults,
    /// Defaults for `on`
    #[serde(default)]
    pub on: OnDefaults,
}

/// Defaults for the copy engine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyDefaults {
    pub preserve: Option<bool>,
    pub force: Option<bool>,
    pub parallel: Option<bool>,
    pub max_concurrent: Option<usize>,
}

/// Defaults for the watch engine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchDefaults {
    pub debounce_ms: Option<u64>,
    pub interval_ms: Option<u64>,
    pub poll: Option<bool>,
    pub initial: Option<bool>,
}

/// Defaults for dispatch
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnDefaults {
    pub parallel: Option<bool>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    hosts: Vec<HostEntry>,
    #[serde(default)]
    containers: Vec<ContainerEntry>,
    #[serde(default)]
    pods: Vec<PodEntry>,
    #[serde(default)]
    groups: BTreeMap<String, Vec<GroupEntry>>,
    #[serde(default)]
    tasks: HashMap<String, String>,
    #[serde(default)]
    defaults: Defaults,
}

#[derive(Debug, Deserialize)]
struct HostEntry {
    name: String,
    #[serde(flatten)]
    config: SshConfig,
}

#[derive(Debug, Deserialize)]
struct ContainerEntry {
    name: String,
    #[serde(flatten)]
    config: DockerConfig,
}

#[derive(Debug, Deserialize)]
struct PodEntry {
    name: String,
    #[serde(flatten)]
    config: KubeConfig,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    name: String,
    #[serde(flatten)]
    backend: BackendEntry,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BackendEntry {
    Ssh(SshConfig),
    Docker(DockerConfig),
    Kube(KubeConfig),
}
