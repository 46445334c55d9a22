//! Remote change detection
//!
//! Remote backends have no native push channel, so watching is emulated:
//! if `inotifywait` is on the target's PATH its `-m` stream is consumed
//! line by line; otherwise the engine polls a `find`-based snapshot of
//! paths and modification times and diffs successive snapshots. Both run
//! through the adapter's ordinary `run`/`stream` contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use omnirun_exec::shell::quote;
use omnirun_exec::{Adapter, Reporter, RunOptions, StreamEvent};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Probe for a change-notification utility on the target
pub const NOTIFY_PROBE: &str = "command -v inotifywait";

/// Streaming watch command for targets that have `inotifywait`
#[must_use]
pub fn notify_stream_cmd(paths: &[String]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| quote(p)).collect();
    format!(
        "inotifywait -m -r -q -e modify,create,delete,move --format '%w%f' {}",
        quoted.join(" ")
    )
}

/// Snapshot command for the polling fallback: `mtime<TAB>path` per file
#[must_use]
pub fn poll_list_cmd(paths: &[String]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| quote(p)).collect();
    format!(
        r"find {} -type f -printf '%T@\t%p\n' 2>/dev/null",
        quoted.join(" ")
    )
}

/// Parse one line of watcher output into a changed path
///
/// Blank and whitespace-only lines mean "no event".
#[must_use]
pub fn parse_change_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Path → mtime token, one polling round's view of the watched paths
pub type Snapshot = HashMap<String, String>;

/// Parse the output of [`poll_list_cmd`]
#[must_use]
pub fn parse_snapshot(output: &str) -> Snapshot {
    output
        .lines()
        .filter_map(|line| {
            let (mtime, path) = line.split_once('\t')?;
            if path.is_empty() {
                return None;
            }
            Some((path.to_string(), mtime.to_string()))
        })
        .collect()
}

/// Paths added, modified or removed between two snapshots
#[must_use]
pub fn diff_snapshots(prev: &Snapshot, next: &Snapshot) -> Vec<String> {
    let mut changed = Vec::new();
    for (path, mtime) in next {
        match prev.get(path) {
            Some(old) if old == mtime => {}
            _ => changed.push(path.clone()),
        }
    }
    for path in prev.keys() {
        if !next.contains_key(path) {
            changed.push(path.clone());
        }
    }
    changed.sort();
    changed
}

/// Drive a remote target's change events into `events`
///
/// Selects the streaming strategy when the notification utility is present
/// and polling is not forced, and falls back to polling otherwise. Returns
/// when the shutdown signal fires or the event source dies.
pub(crate) async fn produce_events(
    adapter: Arc<dyn Adapter>,
    paths: Vec<String>,
    force_poll: bool,
    interval: Duration,
    reporter: Arc<dyn Reporter>,
    events: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let use_stream = !force_poll && probe_notify(&*adapter).await;

    if use_stream {
        debug!("using inotifywait stream for remote watch");
        stream_events(&*adapter, &paths, &reporter, &events, &mut shutdown).await;
    } else {
        debug!(interval = ?interval, "using polling for remote watch");
        poll_events(&*adapter, &paths, interval, &reporter, &events, &mut shutdown).await;
    }
}

async fn probe_notify(adapter: &dyn Adapter) -> bool {
    match adapter.run(NOTIFY_PROBE, &RunOptions::new().unchecked()).await {
        Ok(result) => result.success(),
        Err(e) => {
            warn!(error = %e, "notification utility probe failed");
            false
        }
    }
}

async fn stream_events(
    adapter: &dyn Adapter,
    paths: &[String],
    reporter: &Arc<dyn Reporter>,
    events: &mpsc::Sender<String>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let cmd = notify_stream_cmd(paths);
    let mut stream = match adapter.stream(&cmd, &RunOptions::new().unchecked()).await {
        Ok(stream) => stream,
        Err(e) => {
            reporter.warn(&format!("remote watch stream failed to start: {e}"));
            return;
        }
    };

    let stopped = loop {
        tokio::select! {
            _ = shutdown.changed() => break true,
            event = stream.next_event() => match event {
                Some(StreamEvent::Stdout(line)) => {
                    if let Some(path) = parse_change_line(&line)
                        && events.send(path).await.is_err()
                    {
                        break true;
                    }
                }
                Some(StreamEvent::Stderr(_)) => {}
                Some(StreamEvent::Exit(status)) => {
                    reporter.warn(&format!("remote watcher exited with status {status}"));
                    break false;
                }
                None => break false,
            },
        }
    };
    if stopped {
        // Terminate the remote inotifywait rather than leaking it.
        stream.close().await;
    }
}

async fn poll_events(
    adapter: &dyn Adapter,
    paths: &[String],
    interval: Duration,
    reporter: &Arc<dyn Reporter>,
    events: &mpsc::Sender<String>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let cmd = poll_list_cmd(paths);
    let mut previous: Option<Snapshot> = None;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                let result = match adapter.run(&cmd, &RunOptions::new().unchecked()).await {
                    Ok(result) => result,
                    Err(e) => {
                        reporter.warn(&format!("poll listing failed: {e}"));
                        continue;
                    }
                };
                let next = parse_snapshot(&result.stdout);
                if let Some(prev) = &previous {
                    for path in diff_snapshots(prev, &next) {
                        if events.send(path).await.is_err() {
                            return;
                        }
                    }
                }
                previous = Some(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_no_event() {
        assert_eq!(parse_change_line(""), None);
        assert_eq!(parse_change_line("   \t"), None);
        assert_eq!(
            parse_change_line("/srv/app/index.ts\n"),
            Some("/srv/app/index.ts".to_string())
        );
    }

    #[test]
    fn snapshot_parses_mtime_and_path() {
        let snap = parse_snapshot("1700000000.123\t/a\n1700000001.000\t/b/c\n");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("/a"), Some(&"1700000000.123".to_string()));
    }

    #[test]
    fn diff_detects_added_changed_and_removed() {
        let prev = parse_snapshot("1\t/same\n1\t/touched\n1\t/gone\n");
        let next = parse_snapshot("1\t/same\n2\t/touched\n1\t/fresh\n");
        assert_eq!(diff_snapshots(&prev, &next), vec!["/fresh", "/gone", "/touched"]);
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let snap = parse_snapshot("1\t/a\n2\t/b\n");
        assert!(diff_snapshots(&snap, &snap).is_empty());
    }

    #[test]
    fn poll_cmd_quotes_paths() {
        let cmd = poll_list_cmd(&["/srv/my app".to_string()]);
        assert!(cmd.contains("'/srv/my app'"));
        assert!(cmd.starts_with("find"));
    }

    #[test]
    fn stream_cmd_watches_all_paths() {
        let cmd = notify_stream_cmd(&["/a".to_string(), "/b".to_string()]);
        assert!(cmd.contains("'/a' '/b'"));
        assert!(cmd.contains("-m -r"));
    }
}
