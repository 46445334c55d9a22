//! Shell command building and parsing shared by the remote backends
//!
//! SSH, Docker and Kubernetes all execute through a POSIX shell on the far
//! side, so quoting, env/cwd composition and `find`-based listings live here.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::warn;

use crate::error::ExecError;
use crate::globs::{contains_meta, matcher_for, relative, split_glob};
use crate::options::{ListOptions, RunOptions};
use crate::result::{ExecResult, FileEntry};

/// Single-quote a string for a POSIX shell
#[must_use]
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap a command with the env exports and working directory from `opts`
#[must_use]
pub fn compose(cmd: &str, opts: &RunOptions) -> String {
    let mut script = String::new();
    for (key, value) in &opts.env {
        script.push_str("export ");
        script.push_str(key);
        script.push('=');
        script.push_str(&quote(value));
        script.push_str("; ");
    }
    if let Some(cwd) = &opts.cwd {
        script.push_str("cd ");
        script.push_str(&quote(cwd));
        script.push_str(" || exit 1; ");
    }
    script.push_str(cmd);
    script
}

/// Parent directory of a remote path, if it has one
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((dir, _)) => Some(dir),
        None => None,
    }
}

/// Join a remote directory and a relative path
#[must_use]
pub fn join(base: &str, rest: &str) -> String {
    if base.is_empty() || base == "." {
        rest.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rest)
    }
}

/// Backend hook for the shared listing helpers: run a shell command without
/// exit-status checking
#[async_trait]
pub(crate) trait ShellRunner: Send + Sync {
    async fn shell(&self, cmd: &str) -> Result<ExecResult, ExecError>;
}

const LISTING_FORMAT: &str = r"%y\t%s\t%T@\t%m\t%p\n";

fn listing_cmd(base: &str, max_depth: Option<u32>) -> String {
    let depth = match max_depth {
        Some(d) => format!(" -maxdepth {d}"),
        None => String::new(),
    };
    format!(
        "find {} -mindepth 1{depth} -printf '{LISTING_FORMAT}'",
        quote(base)
    )
}

/// Parse `find -printf` listing output
///
/// Lines that do not match the expected shape are skipped with a warning so
/// one odd file name cannot poison a whole listing.
#[must_use]
pub fn parse_listing(output: &str) -> Vec<FileEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.splitn(5, '\t');
        let parsed = (|| {
            let kind = fields.next()?;
            let size: u64 = fields.next()?.parse().ok()?;
            let epoch: f64 = fields.next()?.parse().ok()?;
            let mode = u32::from_str_radix(fields.next()?, 8).ok()?;
            let path = fields.next()?;
            Some(FileEntry {
                path: path.to_string(),
                is_dir: kind == "d",
                size,
                mtime: UNIX_EPOCH + Duration::from_secs_f64(epoch.max(0.0)),
                mode: Some(mode),
            })
        })();
        match parsed {
            Some(entry) => entries.push(entry),
            None => warn!(line, "skipping unparseable listing line"),
        }
    }
    entries
}

pub(crate) async fn stat(runner: &dyn ShellRunner, path: &str) -> Result<Option<FileEntry>, ExecError> {
    let cmd = format!(
        "find {} -maxdepth 0 -printf '{LISTING_FORMAT}'",
        quote(path)
    );
    let result = runner.shell(&cmd).await?;
    if !result.success() {
        return Ok(None);
    }
    Ok(parse_listing(&result.stdout).into_iter().next())
}

pub(crate) async fn mkdirp(runner: &dyn ShellRunner, path: &str) -> Result<(), ExecError> {
    let result = runner.shell(&format!("mkdir -p {}", quote(path))).await?;
    result.check().map(|_| ()).map_err(|e| match e {
        ExecError::CommandFailed { stderr, .. } => ExecError::Transfer(stderr),
        other => other,
    })
}

pub(crate) async fn list_files(
    runner: &dyn ShellRunner,
    pattern: &str,
    opts: &ListOptions,
) -> Result<Vec<FileEntry>, ExecError> {
    let (base, rest) = split_glob(pattern);
    match rest {
        None => {
            let Some(entry) = stat(runner, &base).await? else {
                return Ok(Vec::new());
            };
            if !entry.is_dir {
                return Ok(vec![entry]);
            }
            let depth = if opts.recursive { None } else { Some(1) };
            fetch(runner, &base, depth).await
        }
        Some(rest) => {
            let deep = opts.recursive || rest.contains('/');
            let depth = if deep { None } else { Some(1) };
            let matcher = matcher_for(&rest)?;
            let entries = fetch(runner, &base, depth).await?;
            Ok(entries
                .into_iter()
                .filter(|e| {
                    relative(&e.path, &base).is_some_and(|rel| matcher.is_match(rel))
                })
                .collect())
        }
    }
}

async fn fetch(
    runner: &dyn ShellRunner,
    base: &str,
    max_depth: Option<u32>,
) -> Result<Vec<FileEntry>, ExecError> {
    // find exits non-zero for a vanished base; whatever it printed still counts
    let result = runner.shell(&listing_cmd(base, max_depth)).await?;
    Ok(parse_listing(&result.stdout))
}

/// `true` if a listing pattern has glob metacharacters
#[must_use]
pub fn is_glob(pattern: &str) -> bool {
    contains_meta(pattern)
}
