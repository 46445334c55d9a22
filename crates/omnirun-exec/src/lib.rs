//! omnirun-exec: Uniform execution and transfer across backends
//!
//! One [`Adapter`] contract (run, stream, upload, download, list) with four
//! implementations: the local machine, SSH hosts, Docker containers and
//! Kubernetes pods. Engines construct adapters through an [`AdapterFactory`]
//! so backends stay swappable in tests.

pub mod docker;
pub mod error;
pub mod factory;
pub mod globs;
mod keys;
pub mod kube;
pub mod local;
pub mod options;
pub mod report;
pub mod result;
pub mod shell;
pub mod ssh;
pub mod stream;
pub mod traits;

pub use docker::DockerAdapter;
pub use error::ExecError;
pub use factory::{AdapterFactory, DefaultAdapterFactory, adapter_for};
pub use kube::KubeAdapter;
pub use local::LocalAdapter;
pub use options::{ListOptions, RunOptions, TransferOptions};
pub use report::{LogReporter, MemoryReporter, Reporter};
pub use result::{ExecResult, FileEntry};
pub use ssh::SshAdapter;
pub use stream::{OutputStream, StreamEvent};
pub use traits::Adapter;
