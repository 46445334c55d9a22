//! Kubernetes pod adapter
//!
//! Shells out to `kubectl exec` / `kubectl cp` per invocation, scoped by
//! namespace, optional container and optional context. Like the Docker
//! backend there is no persistent session.

use std::path::Path;

use async_trait::async_trait;
use omnirun_inventory::KubeConfig;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::local::{LocalAdapter, apply_metadata};
use crate::options::{ListOptions, RunOptions, TransferOptions};
use crate::result::{ExecResult, FileEntry};
use crate::shell::{self, ShellRunner, compose, parent, quote};
use crate::stream::OutputStream;
use crate::traits::Adapter;

/// Kubernetes target adapter
#[derive(Debug)]
pub struct KubeAdapter {
    config: KubeConfig,
    runner: LocalAdapter,
    available: OnceCell<()>,
}

impl KubeAdapter {
    /// Create an adapter for one inventory pod entry
    #[must_use]
    pub fn new(config: KubeConfig) -> Self {
        Self {
            config,
            runner: LocalAdapter::new(),
            available: OnceCell::new(),
        }
    }

    async fn ensure_available(&self) -> Result<(), ExecError> {
        self.available
            .get_or_try_init(|| async {
                let result = self
                    .runner
                    .run("kubectl version --client", &RunOptions::new().unchecked())
                    .await
                    .map_err(|e| ExecError::Connection(format!("kubectl unavailable: {e}")))?;
                if result.success() {
                    debug!("kubectl client present");
                    Ok(())
                } else {
                    Err(ExecError::Connection(format!(
                        "kubectl not usable: {}",
                        result.stderr.trim()
                    )))
                }
            })
            .await
            .map(|_| ())
    }

    fn kubectl(&self) -> String {
        let mut cmd = String::from("kubectl");
        if let Some(context) = &self.config.context {
            cmd.push_str(" --context ");
            cmd.push_str(&quote(context));
        }
        cmd
    }

    /// Full `kubectl exec` invocation around a shell script
    fn exec_command(&self, script: &str) -> String {
        let mut cmd = format!(
            "{} exec -n {} {}",
            self.kubectl(),
            quote(&self.config.namespace),
            quote(&self.config.pod)
        );
        if let Some(container) = &self.config.container {
            cmd.push_str(" -c ");
            cmd.push_str(&quote(container));
        }
        cmd.push_str(" -- sh -c ");
        cmd.push_str(&quote(script));
        cmd
    }

    fn pod_spec(&self, path: &str) -> String {
        format!("{}/{}:{path}", self.config.namespace, self.config.pod)
    }

    fn cp_command(&self, from: &str, to: &str) -> String {
        let mut cmd = format!("{} cp {} {}", self.kubectl(), quote(from), quote(to));
        if let Some(container) = &self.config.container {
            cmd.push_str(" -c ");
            cmd.push_str(&quote(container));
        }
        cmd
    }

    fn classify(result: ExecResult, check: bool) -> Result<ExecResult, ExecError> {
        if !result.success() && is_unreachable(&result.stderr) {
            return Err(ExecError::Connection(result.stderr.trim().to_string()));
        }
        if check { result.check() } else { Ok(result) }
    }

    async fn kubectl_cp(&self, from: &str, to: &str) -> Result<(), ExecError> {
        let result = self
            .runner
            .run(&self.cp_command(from, to), &RunOptions::new().unchecked())
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
    stderr.contains("NotFound")
        || stderr.contains("Unable to connect to the server")
        || stderr.contains("error dialing backend")
}

#[async_trait]
impl ShellRunner for KubeAdapter {
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
impl Adapter for KubeAdapter {
    #[instrument(skip(self, cmd, opts), fields(pod = %self.config.pod, namespace = %self.config.namespace))]
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

    #[instrument(skip(self, opts), fields(pod = %self.config.pod))]
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
            shell::mkdirp(self, remote).await?;
            return self
                .kubectl_cp(&local.to_string_lossy(), &self.pod_spec(remote))
                .await;
        }

        if let Some(dir) = parent(remote) {
            shell::mkdirp(self, dir).await?;
        }
        self.kubectl_cp(&local.to_string_lossy(), &self.pod_spec(remote))
            .await
    }

    #[instrument(skip(self, opts), fields(pod = %self.config.pod))]
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
            return self
                .kubectl_cp(&self.pod_spec(remote), &local.to_string_lossy())
                .await;
        }

        if let Some(dir) = local.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", dir.display())))?;
        }
        self.kubectl_cp(&self.pod_spec(remote), &local.to_string_lossy())
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
        "kube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_command_scopes_namespace_and_container() {
        let mut config = KubeConfig::new("api-0").with_namespace("staging");
        config.container = Some("app".to_string());
        let adapter = KubeAdapter::new(config);

        let cmd = adapter.exec_command("uptime");
        assert_eq!(
            cmd,
            "kubectl exec -n 'staging' 'api-0' -c 'app' -- sh -c 'uptime'"
        );
    }

    #[test]
    fn context_prefixes_every_invocation() {
        let mut config = KubeConfig::new("api-0");
        config.context = Some("prod-cluster".to_string());
        let adapter = KubeAdapter::new(config);

        assert!(adapter.exec_command("true").starts_with("kubectl --context 'prod-cluster'"));
        assert!(adapter.cp_command("/a", "/b").starts_with("kubectl --context 'prod-cluster' cp"));
    }

    #[test]
    fn pod_spec_embeds_namespace() {
        let adapter = KubeAdapter::new(KubeConfig::new("api-0").with_namespace("staging"));
        assert_eq!(adapter.pod_spec("/var/log"), "staging/api-0:/var/log");
    }

    #[tokio::test]
    #[ignore = "requires kubernetes cluster"]
    async fn run_in_pod() {
        let adapter = KubeAdapter::new(KubeConfig::new("omnirun-test"));
        let result = adapter.run("echo hello", &RunOptions::new()).await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
    }
}
