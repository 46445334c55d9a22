//! Docker container adapter
//!
//! Shells out to the `docker` CLI per invocation: `docker exec` for commands
//! and `docker cp` for transfer. No persistent session is held; the daemon's
//! availability is probed once per adapter.

use std::path::Path;

use async_trait::async_trait;
use omnirun_inventory::DockerConfig;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::local::{LocalAdapter, apply_metadata};
use crate::options::{ListOptions, RunOptions, TransferOptions};
use crate::result::{ExecResult, FileEntry};
use crate::shell::{self, ShellRunner, compose, parent, quote};
use crate::stream::OutputStream;
use crate::traits::Adapter;

/// Docker target adapter
#[derive(Debug)]
pub struct DockerAdapter {
    config: DockerConfig,
    runner: LocalAdapter,
    available: OnceCell<()>,
}

impl DockerAdapter {
    /// Create an adapter for one inventory container entry
    #[must_use]
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            runner: LocalAdapter::new(),
            available: OnceCell::new(),
        }
    }

    /// Probe the docker CLI and daemon once
    async fn ensure_available(&self) -> Result<(), ExecError> {
        self.available
            .get_or_try_init(|| async {
                let result = self
                    .runner
                    .run(
                        "docker version --format '{{.Server.Version}}'",
                        &RunOptions::new().unchecked(),
                    )
                    .await
                    .map_err(|e| ExecError::Connection(format!("docker unavailable: {e}")))?;
                if result.success() {
                    debug!(version = %result.stdout.trim(), "docker daemon reachable");
                    Ok(())
                } else {
                    Err(ExecError::Connection(format!(
                        "docker daemon unreachable: {}",
                        result.stderr.trim()
                    )))
                }
            })
            .await
            .map(|_| ())
    }

    /// Full `docker exec` invocation around a shell script
    fn exec_command(&self, script: &str) -> String {
        let mut cmd = String::from("docker exec");
        if let Some(user) = &self.config.user {
            cmd.push_str(" -u ");
            cmd.push_str(&quote(user));
        }
        cmd.push(' ');
        cmd.push_str(&quote(&self.config.container));
        cmd.push(' ');
        cmd.push_str(&self.config.shell);
        cmd.push_str(" -c ");
        cmd.push_str(&quote(script));
        cmd
    }

    fn container_spec(&self, path: &str) -> String {
        format!("{}:{path}", self.config.container)
    }

    fn classify(result: ExecResult, check: bool) -> Result<ExecResult, ExecError> {
        if !result.success() && is_unreachable(&result.stderr) {
            return Err(ExecError::Connection(result.stderr.trim().to_string()));
        }
        if check { result.check() } else { Ok(result) }
    }

    async fn docker_cp(&self, from: &str, to: &str) -> Result<(), ExecError> {
        let cmd = format!("docker cp {} {}", quote(from), quote(to));
        let result = self
            .runner
            .run(&cmd, &RunOptions::new().unchecked())
            .await?;
        if !result.success() {
            if is_unreachable(&result.stderr) {
                return Err(ExecError::Connection(result.stderr.trim().to_string()));
            }
            return Err(ExecError::Transfer(result.stderr.trim().to_string()));
        }
        Ok(())
    }
}

fn is_unreachable(stderr: &str) -> bool {
    stderr.contains("No such container")
        || stderr.contains("is not running")
        || stderr.contains("Cannot connect to the Docker daemon")
}

#[async_trait]
impl ShellRunner for DockerAdapter {
    async fn shell(&self, cmd: &str) -> Result<ExecResult, ExecError> {
        self.ensure_available().await?;
        let result = self
            .runner
            .run(&self.exec_command(cmd), &RunOptions::new().unchecked())
            .await?;
        Self::classify(result, false)
    }
}

#[async_trait]
impl Adapter for DockerAdapter {
    #[instrument(skip(self, cmd, opts), fields(container = %self.config.container))]
    async fn run(&self, cmd: &str, opts: &RunOptions) -> Result<ExecResult, ExecError> {
        self.ensure_available().await?;

        let script = compose(cmd, opts);
        let mut local_opts = RunOptions::new().unchecked();
        local_opts.timeout = opts.timeout;

        let result = self
            .runner
            .run(&self.exec_command(&script), &local_opts)
            .await?;
        Self::classify(result, opts.check)
    }

    async fn stream(&self, cmd: &str, opts: &RunOptions) -> Result<OutputStream, ExecError> {
        self.ensure_available().await?;
        let script = compose(cmd, opts);
        self.runner
            .stream(&self.exec_command(&script), &RunOptions::new().unchecked())
            .await
    }

    #[instrument(skip(self, opts), fields(container = %self.config.container))]
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        opts: &TransferOptions,
    ) -> Result<(), ExecError> {
        self.ensure_available().await?;

        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;

        if meta.is_dir() {
            if !opts.recursive {
                return Err(ExecError::Transfer(format!(
                    "{} is a directory",
                    local.display()
                )));
            }
            // `local/.` copies the directory's contents into `remote`.
            shell::mkdirp(self, remote).await?;
            let from = format!("{}/.", local.display());
            return self.docker_cp(&from, &self.container_spec(remote)).await;
        }

        if let Some(dir) = parent(remote) {
            shell::mkdirp(self, dir).await?;
        }
        self.docker_cp(&local.to_string_lossy(), &self.container_spec(remote))
            .await
        // docker cp moves tar archives, so file mtimes survive on their own.
    }

    #[instrument(skip(self, opts), fields(container = %self.config.container))]
    async fn download(
        &self,
        remote: &str,
        local: &Path,
        opts: &TransferOptions,
    ) -> Result<(), ExecError> {
        self.ensure_available().await?;

        let Some(entry) = shell::stat(self, remote).await? else {
            return Err(ExecError::Transfer(format!(
                "{remote}: no such file or directory"
            )));
        };

        if entry.is_dir {
            if !opts.recursive {
                return Err(ExecError::Transfer(format!("{remote} is a directory")));
            }
            tokio::fs::create_dir_all(local)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;
            let from = format!("{}/.", remote.trim_end_matches('/'));
            return self
                .docker_cp(&self.container_spec(&from), &local.to_string_lossy())
                .await;
        }

        if let Some(dir) = local.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", dir.display())))?;
        }
        self.docker_cp(&self.container_spec(remote), &local.to_string_lossy())
            .await?;

        if opts.preserve {
            apply_metadata(local, entry.mtime, entry.mode)
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;
        }
        Ok(())
    }

    async fn list_files(
        &self,
        pattern: &str,
        opts: &ListOptions,
    ) -> Result<Vec<FileEntry>, ExecError> {
        self.ensure_available().await?;
        shell::list_files(self, pattern, opts).await
    }

    async fn stat(&self, path: &str) -> Result<Option<FileEntry>, ExecError> {
        self.ensure_available().await?;
        shell::stat(self, path).await
    }

    async fn mkdirp(&self, path: &str) -> Result<(), ExecError> {
        self.ensure_available().await?;
        shell::mkdirp(self, path).await
    }

    fn kind(&self) -> &'static str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_command_wraps_script() {
        let adapter = DockerAdapter::new(DockerConfig::new("my-app"));
        let cmd = adapter.exec_command("echo hi");
        assert_eq!(cmd, "docker exec 'my-app' sh -c 'echo hi'");
    }

    #[test]
    fn exec_command_includes_user() {
        let mut config = DockerConfig::new("my-app");
        config.user = Some("deploy".to_string());
        let adapter = DockerAdapter::new(config);
        assert!(adapter.exec_command("id").starts_with("docker exec -u 'deploy'"));
    }

    #[test]
    fn unreachable_stderr_is_classified_as_connection() {
        let result = ExecResult {
            status: 1,
            stdout: String::new(),
            stderr: "Error response from daemon: No such container: my-app".to_string(),
            duration: std::time::Duration::from_millis(1),
        };
        assert!(matches!(
            DockerAdapter::classify(result, true),
            Err(ExecError::Connection(_))
        ));
    }

    #[test]
    fn plain_failure_is_command_failed() {
        let result = ExecResult {
            status: 2,
            stdout: String::new(),
            stderr: "oops".to_string(),
            duration: std::time::Duration::from_millis(1),
        };
        assert!(matches!(
            DockerAdapter::classify(result, true),
            Err(ExecError::CommandFailed { status: 2, .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires docker daemon"]
    async fn run_in_container() {
        let adapter = DockerAdapter::new(DockerConfig::new("omnirun-test"));
        let result = adapter.run("echo hello", &RunOptions::new()).await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
    }
}
