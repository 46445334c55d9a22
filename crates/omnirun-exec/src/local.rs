//! Local command execution and file operations using `tokio::process` and `tokio::fs`

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, instrument};
use walkdir::WalkDir;

use crate::error::ExecError;
use crate::globs::{matcher_for, relative, split_glob};
use crate::options::{ListOptions, RunOptions, TransferOptions};
use crate::result::{ExecResult, FileEntry};
use crate::stream::{OutputStream, STREAM_BUFFER, StreamEvent};
use crate::traits::Adapter;

/// Local machine adapter
///
/// Commands run through `sh -c` with `tokio::process::Command`; transfers and
/// listings use the filesystem directly.
#[derive(Debug, Clone, Default)]
pub struct LocalAdapter;

impl LocalAdapter {
    /// Create a new local adapter
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &str, opts: &RunOptions) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &opts.env {
            command.env(key, value);
        }
        command
    }

    #[instrument(skip(self, cmd), level = "debug")]
    async fn execute(&self, cmd: &str, opts: &RunOptions) -> Result<ExecResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, "executing local command");

        let child = Self::command(cmd, opts)
            .spawn()
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        let waited = match opts.timeout {
            // Dropping the in-flight future kills the child via kill_on_drop.
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    error!(command = %cmd, timeout = ?limit, "command timed out");
                    return Err(ExecError::Timeout { timeout: limit });
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|e| ExecError::Io(e.to_string()))?;

        let duration = start.elapsed();
        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "command completed"
        );

        Ok(ExecResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

#[async_trait]
impl Adapter for LocalAdapter {
    #[instrument(skip(self, cmd, opts), level = "debug")]
    async fn run(&self, cmd: &str, opts: &RunOptions) -> Result<ExecResult, ExecError> {
        let result = self.execute(cmd, opts).await?;
        if opts.check { result.check() } else { Ok(result) }
    }

    async fn stream(&self, cmd: &str, opts: &RunOptions) -> Result<OutputStream, ExecError> {
        let mut child = Self::command(cmd, opts)
            .spawn()
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take().ok_or_else(|| ExecError::Io("missing stdout pipe".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| ExecError::Io("missing stderr pipe".into()))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut out_done = false;
            let mut err_done = false;

            while !(out_done && err_done) {
                tokio::select! {
                    _ = &mut stop_rx => {
                        let _ = child.kill().await;
                        return;
                    }
                    line = out_lines.next_line(), if !out_done => match line {
                        Ok(Some(line)) => {
                            if tx.send(StreamEvent::Stdout(line)).await.is_err() {
                                let _ = child.kill().await;
                                return;
                            }
                        }
                        _ => out_done = true,
                    },
                    line = err_lines.next_line(), if !err_done => match line {
                        Ok(Some(line)) => {
                            if tx.send(StreamEvent::Stderr(line)).await.is_err() {
                                let _ = child.kill().await;
                                return;
                            }
                        }
                        _ => err_done = true,
                    },
                }
            }

            let status = child
                .wait()
                .await
                .ok()
                .and_then(|s| s.code())
                .unwrap_or(-1);
            let _ = tx.send(StreamEvent::Exit(status)).await;
        });

        Ok(OutputStream::new(rx, stop_tx, task))
    }

    #[instrument(skip(self, opts))]
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        opts: &TransferOptions,
    ) -> Result<(), ExecError> {
        copy_local(local, Path::new(remote), opts).await
    }

    #[instrument(skip(self, opts))]
    async fn download(
        &self,
        remote: &str,
        local: &Path,
        opts: &TransferOptions,
    ) -> Result<(), ExecError> {
        copy_local(Path::new(remote), local, opts).await
    }

    async fn list_files(
        &self,
        pattern: &str,
        opts: &ListOptions,
    ) -> Result<Vec<FileEntry>, ExecError> {
        let (base, rest) = split_glob(pattern);
        match rest {
            None => {
                let Some(entry) = self.stat(&base).await? else {
                    return Ok(Vec::new());
                };
                if !entry.is_dir {
                    return Ok(vec![entry]);
                }
                let depth = if opts.recursive { None } else { Some(1) };
                Ok(walk(Path::new(&base), depth))
            }
            Some(rest) => {
                let deep = opts.recursive || rest.contains('/');
                let depth = if deep { None } else { Some(1) };
                let matcher = matcher_for(&rest)?;
                Ok(walk(Path::new(&base), depth)
                    .into_iter()
                    .filter(|e| {
                        relative(&e.path, &base).is_some_and(|rel| matcher.is_match(rel))
                    })
                    .collect())
            }
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<FileEntry>, ExecError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(entry_from_meta(path, &meta))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExecError::Io(e.to_string())),
        }
    }

    async fn mkdirp(&self, path: &str) -> Result<(), ExecError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

fn entry_from_meta(path: &str, meta: &std::fs::Metadata) -> FileEntry {
    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        Some(meta.permissions().mode() & 0o7777)
    };
    #[cfg(not(unix))]
    let mode = None;

    FileEntry {
        path: path.to_string(),
        is_dir: meta.is_dir(),
        size: meta.len(),
        mtime: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
        mode,
    }
}

fn walk(base: &Path, max_depth: Option<usize>) -> Vec<FileEntry> {
    let mut walker = WalkDir::new(base).min_depth(1).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    walker
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let meta = entry.metadata().ok()?;
            Some(entry_from_meta(&entry.path().to_string_lossy(), &meta))
        })
        .collect()
}

async fn copy_local(src: &Path, dest: &Path, opts: &TransferOptions) -> Result<(), ExecError> {
    let meta = tokio::fs::metadata(src)
        .await
        .map_err(|e| ExecError::Transfer(format!("{}: {e}", src.display())))?;

    if meta.is_dir() {
        if !opts.recursive {
            return Err(ExecError::Transfer(format!(
                "{} is a directory",
                src.display()
            )));
        }
        return copy_tree(src, dest, opts).await;
    }

    copy_file(src, dest, &meta, opts).await
}

async fn copy_tree(src: &Path, dest: &Path, opts: &TransferOptions) -> Result<(), ExecError> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| ExecError::Transfer(format!("{}: {e}", dest.display())))?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ExecError::Transfer(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ExecError::Transfer(e.to_string()))?;
        let target = dest.join(rel);
        let meta = entry
            .metadata()
            .map_err(|e| ExecError::Transfer(e.to_string()))?;

        if meta.is_dir() {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| ExecError::Transfer(format!("{}: {e}", target.display())))?;
        } else {
            copy_file(entry.path(), &target, &meta, opts).await?;
        }
    }
    Ok(())
}

async fn copy_file(
    src: &Path,
    dest: &Path,
    src_meta: &std::fs::Metadata,
    opts: &TransferOptions,
) -> Result<(), ExecError> {
    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExecError::Transfer(format!("{}: {e}", parent.display())))?;
    }
    tokio::fs::copy(src, dest)
        .await
        .map_err(|e| ExecError::Transfer(format!("{} -> {}: {e}", src.display(), dest.display())))?;

    if opts.preserve {
        preserve_metadata(src_meta, dest)
            .map_err(|e| ExecError::Transfer(format!("{}: {e}", dest.display())))?;
    }
    Ok(())
}

/// Carry mtime (and unix permission bits) from source metadata to `dest`
pub(crate) fn preserve_metadata(
    src_meta: &std::fs::Metadata,
    dest: &Path,
) -> std::io::Result<()> {
    let mtime = src_meta.modified()?;
    let file = std::fs::OpenOptions::new().write(true).open(dest)?;
    file.set_modified(mtime)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = src_meta.permissions().mode() & 0o7777;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Apply an explicit mtime and optional mode to a local path
pub(crate) fn apply_metadata(
    dest: &Path,
    mtime: std::time::SystemTime,
    mode: Option<u32>,
) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(dest)?;
    file.set_modified(mtime)?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn run_success() {
        let adapter = LocalAdapter::new();
        let result = adapter.run("echo hello", &RunOptions::new()).await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_failure_is_error_when_checked() {
        let adapter = LocalAdapter::new();
        let err = adapter.run("exit 42", &RunOptions::new()).await.unwrap_err();

        assert!(matches!(err, ExecError::CommandFailed { status: 42, .. }));
    }

    #[tokio::test]
    async fn run_failure_is_data_when_unchecked() {
        let adapter = LocalAdapter::new();
        let result = adapter
            .run("exit 42", &RunOptions::new().unchecked())
            .await
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.status, 42);
    }

    #[tokio::test]
    async fn run_timeout() {
        let adapter = LocalAdapter::new();
        let result = adapter
            .run(
                "sleep 5",
                &RunOptions::new().with_timeout(Duration::from_millis(100)),
            )
            .await;

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn run_with_stderr() {
        let adapter = LocalAdapter::new();
        let result = adapter.run("echo error >&2", &RunOptions::new()).await.unwrap();

        assert!(result.success());
        assert_eq!(result.stderr.trim(), "error");
    }

    #[tokio::test]
    async fn run_with_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalAdapter::new();
        let result = adapter
            .run(
                "echo \"$GREETING\"; pwd",
                &RunOptions::new()
                    .with_env("GREETING", "hi there")
                    .with_cwd(dir.path().to_string_lossy()),
            )
            .await
            .unwrap();

        let mut lines = result.stdout.lines();
        assert_eq!(lines.next(), Some("hi there"));
        assert!(lines.next().unwrap().contains(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn stream_yields_lines_then_exit() {
        let adapter = LocalAdapter::new();
        let mut stream = adapter
            .stream("printf 'one\\ntwo\\n'; exit 3", &RunOptions::new())
            .await
            .unwrap();

        let mut lines = Vec::new();
        let mut exit = None;
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::Stdout(line) => lines.push(line),
                StreamEvent::Stderr(_) => {}
                StreamEvent::Exit(status) => exit = Some(status),
            }
        }
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(exit, Some(3));
    }

    #[tokio::test]
    async fn stream_close_terminates_command() {
        let adapter = LocalAdapter::new();
        let mut stream = adapter
            .stream("echo ready; sleep 30", &RunOptions::new())
            .await
            .unwrap();

        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::Stdout("ready".to_string()))
        );
        // Must return promptly instead of waiting out the sleep.
        tokio::time::timeout(Duration::from_secs(5), stream.close())
            .await
            .expect("close should not hang");
    }

    #[tokio::test]
    async fn upload_copies_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("out/dest.bin");
        tokio::fs::write(&src, b"\x00\x01binary\xff").await.unwrap();

        let adapter = LocalAdapter::new();
        adapter
            .upload(&src, &dest.to_string_lossy(), &TransferOptions::new())
            .await
            .unwrap();

        assert_eq!(
            tokio::fs::read(&dest).await.unwrap(),
            b"\x00\x01binary\xff"
        );
    }

    #[tokio::test]
    async fn directory_without_recursive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalAdapter::new();
        let err = adapter
            .upload(
                dir.path(),
                &dir.path().join("copy").to_string_lossy(),
                &TransferOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Transfer(_)));
    }

    #[tokio::test]
    async fn recursive_copy_includes_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        tokio::fs::create_dir_all(src.join("sub")).await.unwrap();
        tokio::fs::create_dir_all(src.join("empty")).await.unwrap();
        tokio::fs::write(src.join("sub/a.txt"), "a").await.unwrap();

        let dest = dir.path().join("out");
        let adapter = LocalAdapter::new();
        adapter
            .upload(
                &src,
                &dest.to_string_lossy(),
                &TransferOptions::new().recursive(),
            )
            .await
            .unwrap();

        assert_eq!(
            tokio::fs::read_to_string(dest.join("sub/a.txt")).await.unwrap(),
            "a"
        );
        assert!(dest.join("empty").is_dir());
    }

    #[tokio::test]
    async fn preserve_keeps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        tokio::fs::write(&src, "x").await.unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(3600);
        std::fs::OpenOptions::new()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let dest = dir.path().join("b.txt");
        let adapter = LocalAdapter::new();
        adapter
            .upload(
                &src,
                &dest.to_string_lossy(),
                &TransferOptions::new().preserve(),
            )
            .await
            .unwrap();

        let src_mtime = std::fs::metadata(&src).unwrap().modified().unwrap();
        let dest_mtime = std::fs::metadata(&dest).unwrap().modified().unwrap();
        let drift = src_mtime
            .duration_since(dest_mtime)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_millis(1000), "drift was {drift:?}");
    }

    #[tokio::test]
    async fn list_files_glob_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "").await.unwrap();
        tokio::fs::write(dir.path().join("b.txt"), "").await.unwrap();
        tokio::fs::write(dir.path().join("c.log"), "").await.unwrap();

        let adapter = LocalAdapter::new();
        let pattern = format!("{}/*.txt", dir.path().display());
        let entries = adapter
            .list_files(&pattern, &ListOptions::new())
            .await
            .unwrap();

        let mut names: Vec<_> = entries.iter().map(|e| e.file_name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn stat_missing_path_is_none() {
        let adapter = LocalAdapter::new();
        assert!(adapter.stat("/definitely/not/here").await.unwrap().is_none());
    }

}
