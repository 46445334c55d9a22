//! The adapter contract every backend implements

use std::path::Path;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::options::{ListOptions, RunOptions, TransferOptions};
use crate::result::{ExecResult, FileEntry};
use crate::stream::OutputStream;

/// Uniform execution and transfer interface, one implementation per backend
///
/// Every method may suspend on network or process I/O. Adapters that pool a
/// connection (SSH) establish it lazily on first use and release it in
/// [`Adapter::close`]; the others are stateless per invocation.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Run a command and collect its output
    ///
    /// # Errors
    /// `CommandFailed` on non-zero exit while `opts.check` is set, `Timeout`
    /// after forcibly terminating a command that outlived `opts.timeout`,
    /// `Connection`/`Auth` when the backend session cannot be established.
    async fn run(&self, cmd: &str, opts: &RunOptions) -> Result<ExecResult, ExecError>;

    /// Run a command and consume its output incrementally
    ///
    /// The returned stream is lazy and bounded; restarting means issuing a
    /// new call.
    async fn stream(&self, cmd: &str, opts: &RunOptions) -> Result<OutputStream, ExecError>;

    /// Copy a local file or directory onto this target, byte-exact
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        opts: &TransferOptions,
    ) -> Result<(), ExecError>;

    /// Copy a file or directory from this target to the local machine
    async fn download(
        &self,
        remote: &str,
        local: &Path,
        opts: &TransferOptions,
    ) -> Result<(), ExecError>;

    /// List files matching a path or glob
    async fn list_files(
        &self,
        pattern: &str,
        opts: &ListOptions,
    ) -> Result<Vec<FileEntry>, ExecError>;

    /// Metadata for one path, or `None` if it does not exist
    async fn stat(&self, path: &str) -> Result<Option<FileEntry>, ExecError>;

    /// Create a directory and any missing parents
    async fn mkdirp(&self, path: &str) -> Result<(), ExecError>;

    /// Release pooled connections, if any
    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Backend tag for logging
    fn kind(&self) -> &'static str;
}
