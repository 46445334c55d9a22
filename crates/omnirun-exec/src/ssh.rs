//! SSH adapter using the russh crate
//!
//! One authenticated session is pooled per adapter and reused across calls
//! until [`Adapter::close`]. File transfer rides the same exec channel as
//! commands (`cat` in and out), so no extra subsystem is negotiated.

use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use async_trait::async_trait;
use omnirun_inventory::SshConfig;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};
use walkdir::WalkDir;

use crate::error::ExecError;
use crate::globs::relative;
use crate::keys::{self, Credentials};
use crate::local::apply_metadata;
use crate::options::{ListOptions, RunOptions, TransferOptions};
use crate::result::{ExecResult, FileEntry};
use crate::shell::{self, ShellRunner, compose, join, parent, quote};
use crate::stream::{OutputStream, STREAM_BUFFER, StreamEvent};
use crate::traits::Adapter;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        // In production, this should verify against known_hosts
        Ok(true)
    }
}

/// SSH target adapter
///
/// The session is established on first use and owned exclusively by this
/// adapter; it is never shared across targets.
pub struct SshAdapter {
    config: SshConfig,
    credentials: Credentials,
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshAdapter")
            .field("host", &self.config.host)
            .field("user", &self.config.user)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SshAdapter {
    /// Create an adapter for one inventory host entry
    ///
    /// # Errors
    /// Returns [`ExecError::Key`] if the entry's key material cannot be
    /// resolved.
    pub fn new(config: &SshConfig) -> Result<Self, ExecError> {
        let credentials = keys::resolve(&config.auth())?;
        Ok(Self {
            config: config.clone(),
            credentials,
            session: Mutex::new(None),
        })
    }

    fn is_connected(&self) -> bool {
        self.session
            .try_lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// Connect and authenticate, reusing an existing session
    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn connect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if session_lock.is_some() {
            return Ok(());
        }

        info!(
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());
        let mut session = client::connect(
            config,
            (&self.config.host[..], self.config.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::Connection(e.to_string()))?;

        let auth_res = match &self.credentials {
            Credentials::Password(password) => session
                .authenticate_password(&self.config.user, password)
                .await
                .map_err(|e| ExecError::Auth(e.to_string()))?,
            Credentials::Key(material) => {
                let key_pair = load_secret_key(material.path(), None)
                    .map_err(|e| ExecError::Key(e.to_string()))?;
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                session
                    .authenticate_publickey(
                        &self.config.user,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                    )
                    .await
                    .map_err(|e| ExecError::Auth(e.to_string()))?
            }
            Credentials::Agent => {
                // TODO: agent auth needs russh's agent client wired in
                return Err(ExecError::Auth(
                    "SSH agent authentication not yet implemented; set ssh_key, key_env or password"
                        .to_string(),
                ));
            }
        };

        if !auth_res.success() {
            return Err(ExecError::Auth(format!(
                "authentication rejected for {}@{}",
                self.config.user, self.config.host
            )));
        }

        info!(host = %self.config.host, "SSH connected and authenticated");

        *session_lock = Some(session);
        Ok(())
    }

    /// Execute a command on the open session, optionally feeding stdin
    #[instrument(skip(self, cmd, stdin), fields(host = %self.config.host))]
    async fn exec_raw(
        &self,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<(i32, Vec<u8>, Vec<u8>), ExecError> {
        let mut session_lock = self.session.lock().await;
        let session = session_lock.as_mut().ok_or(ExecError::NotConnected)?;

        debug!(command = %cmd, "executing remote command");

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;

        if let Some(data) = stdin {
            channel
                .data(data)
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?;
            channel
                .eof()
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?;
        }

        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = exit_status.cast_signed();
                }
                Some(ChannelMsg::Eof) | None => break,
                _ => {}
            }
        }

        Ok((status, stdout, stderr))
    }

    async fn execute(&self, cmd: &str, opts: &RunOptions) -> Result<ExecResult, ExecError> {
        self.connect().await?;

        let script = compose(cmd, opts);
        let start = Instant::now();

        let raw = match opts.timeout {
            // Dropping the exec future closes its channel and the command with it.
            Some(limit) => match timeout(limit, self.exec_raw(&script, None)).await {
                Ok(raw) => raw?,
                Err(_) => {
                    error!(
                        host = %self.config.host,
                        command = %cmd,
                        timeout = ?limit,
                        "remote command timed out"
                    );
                    return Err(ExecError::Timeout { timeout: limit });
                }
            },
            None => self.exec_raw(&script, None).await?,
        };

        let (status, stdout, stderr) = raw;
        Ok(ExecResult {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration: start.elapsed(),
        })
    }

    async fn upload_file(
        &self,
        local: &Path,
        remote: &str,
        preserve: bool,
    ) -> Result<(), ExecError> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;

        let cmd = match parent(remote) {
            Some(dir) => format!("mkdir -p {} && cat > {}", quote(dir), quote(remote)),
            None => format!("cat > {}", quote(remote)),
        };
        let (status, _, stderr) = self.exec_raw(&cmd, Some(&data)).await?;
        if status != 0 {
            return Err(ExecError::Transfer(format!(
                "{remote}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        if preserve {
            let meta = tokio::fs::metadata(local)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;
            self.push_metadata(remote, &meta).await?;
        }
        Ok(())
    }

    /// Stamp mtime and permission bits onto an uploaded path
    async fn push_metadata(
        &self,
        remote: &str,
        meta: &std::fs::Metadata,
    ) -> Result<(), ExecError> {
        let epoch = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        #[cfg(unix)]
        let chmod = {
            use std::os::unix::fs::PermissionsExt;
            format!(" && chmod {:o} {}", meta.permissions().mode() & 0o7777, quote(remote))
        };
        #[cfg(not(unix))]
        let chmod = String::new();

        let cmd = format!("touch -m -d @{epoch:.6} {}{chmod}", quote(remote));
        let (status, _, stderr) = self.exec_raw(&cmd, None).await?;
        if status != 0 {
            return Err(ExecError::Transfer(format!(
                "preserve failed for {remote}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(())
    }

    async fn download_file(
        &self,
        remote: &str,
        local: &Path,
        entry: Option<&FileEntry>,
        preserve: bool,
    ) -> Result<(), ExecError> {
        let (status, data, stderr) = self
            .exec_raw(&format!("cat {}", quote(remote)), None)
            .await?;
        if status != 0 {
            return Err(ExecError::Transfer(format!(
                "{remote}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        if let Some(dir) = local.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", dir.display())))?;
        }
        tokio::fs::write(local, &data)
            .await
            .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;

        if preserve && let Some(entry) = entry {
            apply_metadata(local, entry.mtime, entry.mode)
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;
        }
        Ok(())
    }

    /// Disconnect from the remote host
    async fn disconnect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?;
            info!(host = %self.config.host, "SSH disconnected");
        }
        Ok(())
    }
}

#[async_trait]
impl ShellRunner for SshAdapter {
    async fn shell(&self, cmd: &str) -> Result<ExecResult, ExecError> {
        self.connect().await?;
        let start = Instant::now();
        let (status, stdout, stderr) = self.exec_raw(cmd, None).await?;
        Ok(ExecResult {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}

#[async_trait]
impl Adapter for SshAdapter {
    #[instrument(skip(self, cmd, opts), fields(host = %self.config.host))]
    async fn run(&self, cmd: &str, opts: &RunOptions) -> Result<ExecResult, ExecError> {
        let result = self.execute(cmd, opts).await?;
        if opts.check { result.check() } else { Ok(result) }
    }

    async fn stream(&self, cmd: &str, opts: &RunOptions) -> Result<OutputStream, ExecError> {
        self.connect().await?;

        let script = compose(cmd, opts);
        let mut channel = {
            let mut session_lock = self.session.lock().await;
            let session = session_lock.as_mut().ok_or(ExecError::NotConnected)?;
            session
                .channel_open_session()
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?
        };
        channel
            .exec(true, &script[..])
            .await
            .map_err(|e| ExecError::Io(e.to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut status = -1;
            let mut stdout_buf = LineBuffer::default();
            let mut stderr_buf = LineBuffer::default();
            loop {
                tokio::select! {
                    // Dropping the channel on the way out closes the remote command.
                    _ = &mut stop_rx => return,
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { data }) => {
                            for line in stdout_buf.push(&data) {
                                if tx.send(StreamEvent::Stdout(line)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                            for line in stderr_buf.push(&data) {
                                if tx.send(StreamEvent::Stderr(line)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            status = exit_status.cast_signed();
                        }
                        Some(ChannelMsg::Eof) | None => break,
                        _ => {}
                    },
                }
            }
            if let Some(line) = stdout_buf.flush() {
                let _ = tx.send(StreamEvent::Stdout(line)).await;
            }
            if let Some(line) = stderr_buf.flush() {
                let _ = tx.send(StreamEvent::Stderr(line)).await;
            }
            let _ = tx.send(StreamEvent::Exit(status)).await;
        });

        Ok(OutputStream::new(rx, stop_tx, task))
    }

    #[instrument(skip(self, opts), fields(host = %self.config.host))]
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        opts: &TransferOptions,
    ) -> Result<(), ExecError> {
        self.connect().await?;

        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;

        if !meta.is_dir() {
            return self.upload_file(local, remote, opts.preserve).await;
        }
        if !opts.recursive {
            return Err(ExecError::Transfer(format!(
                "{} is a directory",
                local.display()
            )));
        }

        // Recreate the directory skeleton first so empty directories survive.
        let mut dirs = vec![remote.to_string()];
        let mut files = Vec::new();
        for entry in WalkDir::new(local).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ExecError::Transfer(e.to_string()))?;
            let rel = entry
                .path()
                .strip_prefix(local)
                .map_err(|e| ExecError::Transfer(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            if entry.file_type().is_dir() {
                dirs.push(join(remote, &rel));
            } else {
                files.push((entry.path().to_path_buf(), join(remote, &rel)));
            }
        }

        let mkdir = format!(
            "mkdir -p {}",
            dirs.iter().map(|d| quote(d)).collect::<Vec<_>>().join(" ")
        );
        let (status, _, stderr) = self.exec_raw(&mkdir, None).await?;
        if status != 0 {
            return Err(ExecError::Transfer(
                String::from_utf8_lossy(&stderr).trim().to_string(),
            ));
        }

        for (local_path, remote_path) in files {
            self.upload_file(&local_path, &remote_path, opts.preserve)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, opts), fields(host = %self.config.host))]
    async fn download(
        &self,
        remote: &str,
        local: &Path,
        opts: &TransferOptions,
    ) -> Result<(), ExecError> {
        self.connect().await?;

        let Some(entry) = shell::stat(self, remote).await? else {
            return Err(ExecError::Transfer(format!(
                "{remote}: no such file or directory"
            )));
        };

        if !entry.is_dir {
            return self
                .download_file(remote, local, Some(&entry), opts.preserve)
                .await;
        }
        if !opts.recursive {
            return Err(ExecError::Transfer(format!("{remote} is a directory")));
        }

        tokio::fs::create_dir_all(local)
            .await
            .map_err(|e| ExecError::Transfer(format!("{}: {e}", local.display())))?;

        let entries = shell::list_files(self, remote, &ListOptions::new().recursive()).await?;
        for item in &entries {
            let Some(rel) = relative(&item.path, remote) else {
                continue;
            };
            let target = local.join(rel);
            if item.is_dir {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| ExecError::Transfer(format!("{}: {e}", target.display())))?;
            } else {
                self.download_file(&item.path, &target, Some(item), opts.preserve)
                    .await?;
            }
        }
        Ok(())
    }

    async fn list_files(
        &self,
        pattern: &str,
        opts: &ListOptions,
    ) -> Result<Vec<FileEntry>, ExecError> {
        shell::list_files(self, pattern, opts).await
    }

    async fn stat(&self, path: &str) -> Result<Option<FileEntry>, ExecError> {
        shell::stat(self, path).await
    }

    async fn mkdirp(&self, path: &str) -> Result<(), ExecError> {
        shell::mkdirp(self, path).await
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.disconnect().await
    }

    fn kind(&self) -> &'static str {
        "ssh"
    }
}

/// Accumulates raw chunks and emits complete lines
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        Some(text)
    }
}
