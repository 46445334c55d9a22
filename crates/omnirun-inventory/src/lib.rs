//! omnirun-inventory: Target inventory and specifier resolution
//!
//! Holds the project inventory (groups of named targets with their backend
//! connection parameters) and resolves user-facing specifier strings such as
//! `hosts.web-1`, `containers.*` or `local` into concrete [`Target`] records.

pub mod error;
pub mod resolver;
pub mod types;

pub use error::ResolveError;
pub use resolver::Endpoint;
pub use types::{
    BackendConfig, DockerConfig, Inventory, KubeConfig, SshAuth, SshConfig, Target, TargetGroup,
    TargetKind,
};
