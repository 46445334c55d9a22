//! Watch session lifecycle and debounced execution
//!
//! Sessions move `Idle → Watching → Stopped`: a session is created on
//! `start`, lives in the engine's registry keyed by target id, and is torn
//! down on `stop`, engine shutdown or a fatal watcher error. There is no way
//! back from `Stopped`; watching again means a fresh session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use omnirun_exec::{Adapter, AdapterFactory, DefaultAdapterFactory, Reporter, RunOptions};
use omnirun_inventory::{Inventory, Target};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, warn};

use crate::error::WatchError;
use crate::filter::should_ignore_file;
use crate::remote;

/// Default quiet period before a burst of changes triggers one run
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
/// Default interval for the polling fallback
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const EVENT_BUFFER: usize = 256;

/// Options for one watch session
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Command line to run on changes
    pub command: Option<String>,
    /// Named task (from the engine's task table) to run on changes
    pub task: Option<String>,
    /// Keep only files matching at least one of these globs
    pub pattern: Vec<String>,
    /// Drop files matching any of these globs
    pub exclude: Vec<String>,
    /// Quiet period; a burst of changes collapses into one run
    pub debounce: Duration,
    /// Run the action once immediately after the session starts
    pub initial: bool,
    /// Force the polling strategy even where push notification exists
    pub poll: bool,
    /// Polling interval
    pub interval: Duration,
    /// Report what would be watched without creating a session
    pub dry_run: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            command: None,
            task: None,
            pattern: Vec::new(),
            exclude: Vec::new(),
            debounce: DEFAULT_DEBOUNCE,
            initial: false,
            poll: false,
            interval: DEFAULT_POLL_INTERVAL,
            dry_run: false,
        }
    }
}

struct SessionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The watch engine: owns the live session registry
///
/// Each engine instance has its own registry, so embedders and tests can run
/// independent engines side by side.
pub struct WatchEngine {
    factory: Arc<dyn AdapterFactory>,
    reporter: Arc<dyn Reporter>,
    tasks: HashMap<String, String>,
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl WatchEngine {
    /// Engine with the real backends
    #[must_use]
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self::with_factory(Arc::new(DefaultAdapterFactory), reporter)
    }

    /// Engine with an injected adapter factory
    #[must_use]
    pub fn with_factory(factory: Arc<dyn AdapterFactory>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            factory,
            reporter,
            tasks: HashMap::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Provide the named-task table consulted by the `task` option
    #[must_use]
    pub fn with_tasks(mut self, tasks: HashMap<String, String>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Start watching `paths` on every target the specifier resolves to
    ///
    /// # Errors
    /// `MissingTarget` / `MissingAction` / `UnknownTask` for invalid calls,
    /// `AlreadyWatching` when a session for a resolved target id exists,
    /// `Watcher` when the native filesystem watcher cannot be created.
    #[instrument(skip(self, inventory, paths, opts))]
    pub async fn start(
        &self,
        inventory: &Inventory,
        target_spec: &str,
        paths: &[String],
        opts: &WatchOptions,
    ) -> Result<(), WatchError> {
        if target_spec.trim().is_empty() {
            return Err(WatchError::MissingTarget);
        }
        let command = self.resolve_action(opts)?;

        let targets = inventory.resolve(target_spec)?;
        if targets.is_empty() {
            self.reporter
                .info(&format!("no targets matched {target_spec}"));
            return Ok(());
        }

        let paths: Vec<String> = if paths.is_empty() {
            vec![".".to_string()]
        } else {
            paths.to_vec()
        };

        if opts.dry_run {
            for target in &targets {
                self.reporter.info(&format!(
                    "dry run: would watch {} (paths: {}; pattern: {}; exclude: {}) and run `{command}`",
                    target.id,
                    paths.join(", "),
                    fmt_list(&opts.pattern),
                    fmt_list(&opts.exclude),
                ));
            }
            return Ok(());
        }

        {
            let sessions = self.sessions.lock().unwrap();
            for target in &targets {
                if sessions.contains_key(&target.id) {
                    return Err(WatchError::AlreadyWatching(target.id.clone()));
                }
            }
        }

        for target in targets {
            self.start_session(target, &paths, &command, opts)?;
        }
        Ok(())
    }

    /// Stop one session, closing its watcher before deregistering it
    ///
    /// # Errors
    /// Returns [`WatchError::NotWatching`] for an unknown target id.
    pub async fn stop(&self, target_id: &str) -> Result<(), WatchError> {
        let handle = self
            .sessions
            .lock()
            .unwrap()
            .remove(target_id)
            .ok_or_else(|| WatchError::NotWatching(target_id.to_string()))?;

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            warn!(target = %target_id, error = %e, "watch session task failed");
        }
        info!(target = %target_id, "watch session stopped");
        Ok(())
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }

    /// Target ids with a live session
    #[must_use]
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a session exists for this target id
    #[must_use]
    pub fn is_watching(&self, target_id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(target_id)
    }

    /// Exactly one of command/task, with tasks looked up in the table
    fn resolve_action(&self, opts: &WatchOptions) -> Result<String, WatchError> {
        match (&opts.command, &opts.task) {
            (Some(command), None) => Ok(command.clone()),
            (None, Some(task)) => self
                .tasks
                .get(task)
                .cloned()
                .ok_or_else(|| WatchError::UnknownTask(task.clone())),
            _ => Err(WatchError::MissingAction),
        }
    }

    fn start_session(
        &self,
        target: Target,
        paths: &[String],
        command: &str,
        opts: &WatchOptions,
    ) -> Result<(), WatchError> {
        let adapter = self.factory.create(&target)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let guard = if target.is_local() && !opts.poll {
            Some(local_watcher(paths, events_tx)?)
        } else {
            tokio::spawn(remote::produce_events(
                Arc::clone(&adapter),
                paths.to_vec(),
                opts.poll,
                opts.interval,
                Arc::clone(&self.reporter),
                events_tx,
                shutdown_rx.clone(),
            ));
            None
        };

        let ctx = SessionCtx {
            target_id: target.id.clone(),
            adapter,
            command: command.to_string(),
            pattern: opts.pattern.clone(),
            exclude: opts.exclude.clone(),
            debounce: opts.debounce,
            initial: opts.initial,
            reporter: Arc::clone(&self.reporter),
        };

        // The session only starts consuming once its handle is registered,
        // so a fast failure cannot race the registry insert.
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let sessions = Arc::clone(&self.sessions);
        let id = target.id.clone();
        let task = tokio::spawn(async move {
            let _ = ready_rx.await;
            session_loop(events_rx, shutdown_rx, ctx, guard).await;
            sessions.lock().unwrap().remove(&id);
        });

        self.sessions.lock().unwrap().insert(
            target.id.clone(),
            SessionHandle {
                shutdown: shutdown_tx,
                task,
            },
        );
        let _ = ready_tx.send(());

        info!(target = %target.id, "watch session started");
        Ok(())
    }
}

fn fmt_list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn local_watcher(
    paths: &[String],
    events: mpsc::Sender<String>,
) -> Result<notify::RecommendedWatcher, WatchError> {
    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                for path in event.paths {
                    let _ = events.blocking_send(path.to_string_lossy().to_string());
                }
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        })
        .map_err(|e| WatchError::Watcher(e.to_string()))?;

    for path in paths {
        watcher
            .watch(Path::new(path), RecursiveMode::Recursive)
            .map_err(|e| WatchError::Watcher(e.to_string()))?;
    }
    Ok(watcher)
}

struct SessionCtx {
    target_id: String,
    adapter: Arc<dyn Adapter>,
    command: String,
    pattern: Vec<String>,
    exclude: Vec<String>,
    debounce: Duration,
    initial: bool,
    reporter: Arc<dyn Reporter>,
}

/// One session's event loop: filter, debounce, execute
///
/// The debounce timer resets on every surviving event; only a quiet period
/// runs the action, and events arriving during an in-flight run coalesce
/// into at most one follow-up run.
async fn session_loop(
    mut events: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
    ctx: SessionCtx,
    guard: Option<notify::RecommendedWatcher>,
) {
    // Keeps the native watcher alive exactly as long as the session.
    let _guard = guard;

    if ctx.initial {
        run_action(&ctx).await;
    }

    let mut deadline: Option<Instant> = None;
    loop {
        let timer = {
            let at = deadline;
            async move {
                match at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            () = timer => {
                deadline = None;
                run_action(&ctx).await;
            }
            event = events.recv() => match event {
                Some(path) => {
                    if should_ignore_file(&path, &ctx.pattern, &ctx.exclude) {
                        debug!(path, "ignoring change");
                    } else {
                        debug!(path, "change detected");
                        deadline = Some(Instant::now() + ctx.debounce);
                    }
                }
                None => {
                    ctx.reporter
                        .warn(&format!("watcher for {} ended", ctx.target_id));
                    break;
                }
            },
        }
    }
}

/// Run the configured action; failures are reported, never fatal
async fn run_action(ctx: &SessionCtx) {
    debug!(target = %ctx.target_id, command = %ctx.command, "running watch action");
    match ctx
        .adapter
        .run(&ctx.command, &RunOptions::new().unchecked())
        .await
    {
        Ok(result) if result.success() => {
            ctx.reporter
                .info(&format!("[{}] command completed", ctx.target_id));
        }
        Ok(result) => ctx.reporter.warn(&format!(
            "[{}] command exited with status {}",
            ctx.target_id, result.status
        )),
        Err(e) => ctx
            .reporter
            .warn(&format!("[{}] command failed: {e}", ctx.target_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnirun_exec::MemoryReporter;

    fn engine() -> (WatchEngine, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        (WatchEngine::new(reporter.clone()), reporter)
    }

    #[tokio::test]
    async fn missing_target_is_rejected() {
        let (engine, _) = engine();
        let err = engine
            .start(
                &Inventory::new(),
                "  ",
                &[],
                &WatchOptions {
                    command: Some("true".into()),
                    ..WatchOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Target specification is required");
    }

    #[tokio::test]
    async fn action_is_mandatory_and_exclusive() {
        let (engine, _) = engine();
        let err = engine
            .start(&Inventory::new(), "local", &[], &WatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Either --command or --task must be specified"
        );

        let err = engine
            .start(
                &Inventory::new(),
                "local",
                &[],
                &WatchOptions {
                    command: Some("true".into()),
                    task: Some("build".into()),
                    ..WatchOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::MissingAction));
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let (engine, _) = engine();
        let err = engine
            .start(
                &Inventory::new(),
                "local",
                &[],
                &WatchOptions {
                    task: Some("deploy".into()),
                    ..WatchOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn named_task_resolves_through_table() {
        let reporter = Arc::new(MemoryReporter::new());
        let engine = WatchEngine::new(reporter.clone())
            .with_tasks(HashMap::from([("noop".to_string(), "true".to_string())]));

        let dir = tempfile::tempdir().unwrap();
        engine
            .start(
                &Inventory::new(),
                "local",
                &[dir.path().to_string_lossy().to_string()],
                &WatchOptions {
                    task: Some("noop".into()),
                    ..WatchOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(engine.is_watching("local"));
        engine.shutdown().await;
        assert!(engine.active().is_empty());
    }

    #[tokio::test]
    async fn dry_run_registers_no_session() {
        let (engine, reporter) = engine();
        let dir = tempfile::tempdir().unwrap();
        engine
            .start(
                &Inventory::new(),
                "local",
                &[dir.path().to_string_lossy().to_string()],
                &WatchOptions {
                    command: Some("true".into()),
                    dry_run: true,
                    ..WatchOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(engine.active().is_empty());
        assert!(reporter.contains("dry run: would watch local"));
    }

    #[tokio::test]
    async fn second_session_on_same_target_is_rejected() {
        let (engine, _) = engine();
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![dir.path().to_string_lossy().to_string()];
        let opts = WatchOptions {
            command: Some("true".into()),
            ..WatchOptions::default()
        };

        engine
            .start(&Inventory::new(), "local", &paths, &opts)
            .await
            .unwrap();
        let err = engine
            .start(&Inventory::new(), "local", &paths, &opts)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Already watching target: local");

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn stopping_unknown_session_is_an_error() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.stop("hosts.web-1").await,
            Err(WatchError::NotWatching(_))
        ));
    }

    #[tokio::test]
    async fn pattern_matching_nothing_reports_no_targets() {
        let (engine, reporter) = engine();
        engine
            .start(
                &Inventory::new(),
                "hosts.web-*",
                &[],
                &WatchOptions {
                    command: Some("true".into()),
                    ..WatchOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(reporter.contains("no targets matched"));
        assert!(engine.active().is_empty());
    }
}
