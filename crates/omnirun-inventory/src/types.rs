//! Inventory type definitions

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Reserved group name for SSH hosts
pub const GROUP_HOSTS: &str = "hosts";
/// Reserved group name for Docker containers
pub const GROUP_CONTAINERS: &str = "containers";
/// Reserved group name for Kubernetes pods
pub const GROUP_PODS: &str = "pods";

/// Backend kind of a resolved target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// The local machine
    Local,
    /// Remote host reachable over SSH
    Ssh,
    /// Docker container
    Docker,
    /// Kubernetes pod
    Kube,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Local => write!(f, "local"),
            TargetKind::Ssh => write!(f, "ssh"),
            TargetKind::Docker => write!(f, "docker"),
            TargetKind::Kube => write!(f, "kube"),
        }
    }
}

/// SSH connection parameters for one inventory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (default root)
    #[serde(default = "default_user")]
    pub user: String,
    /// Path to SSH private key
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    /// Environment variable holding a base64-encoded private key
    #[serde(default)]
    pub key_env: Option<String>,
    /// Password (discouraged, but supported for hosts without keys)
    #[serde(default)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

/// How an SSH session authenticates
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// Private key file on disk
    KeyPath(PathBuf),
    /// Base64-encoded private key from an environment variable
    KeyEnv(String),
    /// Plain password
    Password(String),
    /// SSH agent
    Agent,
}

impl SshConfig {
    /// Create connection parameters for `user@host` with defaults
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            ssh_key: None,
            key_env: None,
            password: None,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(path.into());
        self
    }

    /// Set password authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Authentication method, by priority: password, key file, env key, agent
    #[must_use]
    pub fn auth(&self) -> SshAuth {
        if let Some(password) = &self.password {
            SshAuth::Password(password.clone())
        } else if let Some(key) = &self.ssh_key {
            SshAuth::KeyPath(key.clone())
        } else if let Some(var) = &self.key_env {
            SshAuth::KeyEnv(var.clone())
        } else {
            SshAuth::Agent
        }
    }
}

/// Docker exec parameters for one inventory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Container name or id
    pub container: String,
    /// User to exec as
    #[serde(default)]
    pub user: Option<String>,
    /// Shell used for command execution (default `sh`)
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl DockerConfig {
    /// Exec parameters for a container, with defaults
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            user: None,
            shell: default_shell(),
        }
    }
}

/// Kubernetes exec parameters for one inventory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeConfig {
    /// Pod name
    pub pod: String,
    /// Namespace (default `default`)
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Container within the pod
    #[serde(default)]
    pub container: Option<String>,
    /// kubectl context override
    #[serde(default)]
    pub context: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl KubeConfig {
    /// Exec parameters for a pod in the default namespace
    pub fn new(pod: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            namespace: default_namespace(),
            container: None,
            context: None,
        }
    }

    /// Set namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Backend-specific connection parameters, one variant per [`TargetKind`]
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local,
    Ssh(SshConfig),
    Docker(DockerConfig),
    Kube(KubeConfig),
}

impl BackendConfig {
    /// Kind tag matching this variant
    #[must_use]
    pub fn kind(&self) -> TargetKind {
        match self {
            BackendConfig::Local => TargetKind::Local,
            BackendConfig::Ssh(_) => TargetKind::Ssh,
            BackendConfig::Docker(_) => TargetKind::Docker,
            BackendConfig::Kube(_) => TargetKind::Kube,
        }
    }
}

/// A resolved, concrete compute endpoint
///
/// Immutable once resolved. The `kind` tag always matches the populated
/// [`BackendConfig`] variant because both are derived from the same entry.
#[derive(Debug, Clone)]
pub struct Target {
    /// Unique id: `local` or `group.name`
    pub id: String,
    /// Backend kind
    pub kind: TargetKind,
    /// Entry name within its group
    pub name: String,
    /// Dotted group path, e.g. `hosts.web-1`
    pub group_path: String,
    /// Connection parameters
    pub config: BackendConfig,
}

impl Target {
    /// The implicit local target
    #[must_use]
    pub fn local() -> Self {
        Self {
            id: "local".to_string(),
            kind: TargetKind::Local,
            name: "local".to_string(),
            group_path: "local".to_string(),
            config: BackendConfig::Local,
        }
    }

    /// A target from an inventory entry
    pub fn from_entry(group: &str, name: &str, config: BackendConfig) -> Self {
        let id = format!("{group}.{name}");
        Self {
            id: id.clone(),
            kind: config.kind(),
            name: name.to_string(),
            group_path: id,
            config,
        }
    }

    /// Whether this is the local machine
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.kind == TargetKind::Local
    }
}

/// A named group of inventory entries, in declaration order
#[derive(Debug, Clone)]
pub struct TargetGroup {
    /// Group name
    pub name: String,
    entries: Vec<(String, BackendConfig)>,
}

impl TargetGroup {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Entries in declaration order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &BackendConfig)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Look up one entry by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BackendConfig> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the group has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The project inventory: groups of named targets, declaration order preserved
///
/// Group plus entry name is the unique key; the same entry name may appear in
/// different groups and the groups are never merged.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    groups: Vec<TargetGroup>,
}

impl Inventory {
    /// Empty inventory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, creating its group on first use
    ///
    /// A second entry with the same group and name replaces the first.
    pub fn add(&mut self, group: &str, name: &str, config: BackendConfig) {
        let index = match self.groups.iter().position(|g| g.name == group) {
            Some(index) => index,
            None => {
                self.groups.push(TargetGroup::new(group));
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[index];
        if let Some(slot) = group.entries.iter_mut().find(|(n, _)| n == name) {
            slot.1 = config;
        } else {
            group.entries.push((name.to_string(), config));
        }
    }

    /// Add an SSH host under the `hosts` group
    pub fn add_host(&mut self, name: &str, config: SshConfig) {
        self.add(GROUP_HOSTS, name, BackendConfig::Ssh(config));
    }

    /// Add a Docker container under the `containers` group
    pub fn add_container(&mut self, name: &str, config: DockerConfig) {
        self.add(GROUP_CONTAINERS, name, BackendConfig::Docker(config));
    }

    /// Add a Kubernetes pod under the `pods` group
    pub fn add_pod(&mut self, name: &str, config: KubeConfig) {
        self.add(GROUP_PODS, name, BackendConfig::Kube(config));
    }

    /// Look up a group by name
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&TargetGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Whether `name` is a declared or reserved group name
    #[must_use]
    pub fn is_group_name(&self, name: &str) -> bool {
        matches!(name, GROUP_HOSTS | GROUP_CONTAINERS | GROUP_PODS)
            || self.groups.iter().any(|g| g.name == name)
    }

    /// Groups in declaration order
    pub fn groups(&self) -> impl Iterator<Item = &TargetGroup> {
        self.groups.iter()
    }

    /// Every target in the inventory, in declaration order
    #[must_use]
    pub fn targets(&self) -> Vec<Target> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.entries()
                    .map(|(name, config)| Target::from_entry(&g.name, name, config.clone()))
            })
            .collect()
    }

    /// Look up a single target by group and name
    #[must_use]
    pub fn get(&self, group: &str, name: &str) -> Option<Target> {
        self.group(group)?
            .get(name)
            .map(|config| Target::from_entry(group, name, config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_id_is_group_dot_name() {
        let target = Target::from_entry("hosts", "web-1", BackendConfig::Ssh(SshConfig::new("10.0.0.1", "deploy")));
        assert_eq!(target.id, "hosts.web-1");
        assert_eq!(target.kind, TargetKind::Ssh);
        assert_eq!(target.group_path, "hosts.web-1");
    }

    #[test]
    fn inventory_preserves_declaration_order() {
        let mut inv = Inventory::new();
        inv.add_host("web-2", SshConfig::new("b", "root"));
        inv.add_host("web-1", SshConfig::new("a", "root"));
        inv.add_host("db-1", SshConfig::new("c", "root"));

        let names: Vec<_> = inv
            .group("hosts")
            .unwrap()
            .entries()
            .map(|(n, _)| n.to_string())
            .collect();
        assert_eq!(names, vec!["web-2", "web-1", "db-1"]);
    }

    #[test]
    fn duplicate_entry_replaces() {
        let mut inv = Inventory::new();
        inv.add_host("web-1", SshConfig::new("old", "root"));
        inv.add_host("web-1", SshConfig::new("new", "root"));

        assert_eq!(inv.group("hosts").unwrap().len(), 1);
        let target = inv.get("hosts", "web-1").unwrap();
        match target.config {
            BackendConfig::Ssh(ref c) => assert_eq!(c.host, "new"),
            _ => panic!("expected ssh config"),
        }
    }

    #[test]
    fn same_name_in_two_groups_stays_distinct() {
        let mut inv = Inventory::new();
        inv.add_host("web-1", SshConfig::new("a", "root"));
        inv.add("build", "web-1", BackendConfig::Docker(DockerConfig::new("web-build")));

        assert_eq!(inv.get("hosts", "web-1").unwrap().kind, TargetKind::Ssh);
        assert_eq!(inv.get("build", "web-1").unwrap().kind, TargetKind::Docker);
    }

    #[test]
    fn ssh_auth_priority() {
        let config = SshConfig::new("h", "u")
            .with_key("/tmp/id_ed25519")
            .with_password("secret");
        assert!(matches!(config.auth(), SshAuth::Password(_)));

        let config = SshConfig::new("h", "u").with_key("/tmp/id_ed25519");
        assert!(matches!(config.auth(), SshAuth::KeyPath(_)));

        let config = SshConfig::new("h", "u");
        assert!(matches!(config.auth(), SshAuth::Agent));
    }
}
