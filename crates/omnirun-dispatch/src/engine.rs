//! Multi-target command fan-out
//!
//! Resolves a specifier to one or more targets and runs a command on each,
//! strictly in resolution order or concurrently. Every target runs to
//! completion; per-target failures are collected, not propagated mid-flight,
//! so partial results stay usable.

use std::sync::Arc;
use std::time::Duration;

use omnirun_exec::{
    AdapterFactory, DefaultAdapterFactory, ExecError, ExecResult, Reporter, RunOptions,
};
use omnirun_inventory::Inventory;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::error::DispatchError;

/// Options for one dispatch
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Run all targets concurrently instead of in resolution order
    pub parallel: bool,
    /// Per-target command timeout
    pub timeout: Option<Duration>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory on each target
    pub cwd: Option<String>,
    /// Suppress per-target output reporting
    pub quiet: bool,
}

/// What happened on one target
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    /// Id of the resolved target
    pub target_id: String,
    /// The command's result, or why it never completed
    pub result: Result<ExecResult, ExecError>,
}

impl TargetOutcome {
    /// Whether the command completed with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(&self.result, Ok(result) if result.success())
    }
}

/// Aggregate of a dispatch across all resolved targets
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Per-target outcomes, in resolution order
    pub outcomes: Vec<TargetOutcome>,
}

impl DispatchReport {
    /// Whether every target succeeded
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(TargetOutcome::success)
    }

    /// Outcomes that failed
    #[must_use]
    pub fn failed(&self) -> Vec<&TargetOutcome> {
        self.outcomes.iter().filter(|o| !o.success()).collect()
    }
}

/// The dispatch engine
pub struct Dispatcher {
    factory: Arc<dyn AdapterFactory>,
    reporter: Arc<dyn Reporter>,
}

impl Dispatcher {
    /// Dispatcher with the real backends
    #[must_use]
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self::with_factory(Arc::new(DefaultAdapterFactory), reporter)
    }

    /// Dispatcher with an injected adapter factory
    #[must_use]
    pub fn with_factory(factory: Arc<dyn AdapterFactory>, reporter: Arc<dyn Reporter>) -> Self {
        Self { factory, reporter }
    }

    /// Run `command` on every target the specifier resolves to
    ///
    /// A pattern matching nothing reports "no targets matched" and returns an
    /// empty report; an absent explicit name is a resolution error.
    ///
    /// # Errors
    /// Only validation and resolution problems; per-target failures land in
    /// the report.
    #[instrument(skip(self, inventory, command, opts))]
    pub async fn execute(
        &self,
        inventory: &Inventory,
        target_spec: &str,
        command: &str,
        opts: &ExecuteOptions,
    ) -> Result<DispatchReport, DispatchError> {
        if command.trim().is_empty() {
            return Err(DispatchError::Validation("command is required".to_string()));
        }

        let targets = inventory.resolve(target_spec)?;
        if targets.is_empty() {
            self.reporter
                .info(&format!("no targets matched {target_spec}"));
            return Ok(DispatchReport::default());
        }

        let run_opts = RunOptions {
            cwd: opts.cwd.clone(),
            env: opts.env.clone(),
            timeout: opts.timeout,
            check: true,
        };

        debug!(
            spec = %target_spec,
            targets = targets.len(),
            parallel = opts.parallel,
            "dispatching command"
        );

        let outcomes = if opts.parallel && targets.len() > 1 {
            let mut set = JoinSet::new();
            for (index, target) in targets.iter().enumerate() {
                let factory = Arc::clone(&self.factory);
                let target = target.clone();
                let command = command.to_string();
                let run_opts = run_opts.clone();
                set.spawn(async move {
                    let result = match factory.create(&target) {
                        Ok(adapter) => adapter.run(&command, &run_opts).await,
                        Err(e) => Err(e),
                    };
                    (index, target.id, result)
                });
            }

            // All targets settle before the aggregate is assembled.
            let mut slots: Vec<Option<TargetOutcome>> =
                targets.iter().map(|_| None).collect();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, target_id, result)) => {
                        let outcome = TargetOutcome { target_id, result };
                        self.report(&outcome, opts.quiet);
                        slots[index] = Some(outcome);
                    }
                    Err(e) => warn!(error = %e, "dispatch task panicked"),
                }
            }
            slots.into_iter().flatten().collect()
        } else {
            let mut outcomes = Vec::with_capacity(targets.len());
            for target in targets {
                let result = match self.factory.create(&target) {
                    Ok(adapter) => adapter.run(command, &run_opts).await,
                    Err(e) => Err(e),
                };
                let outcome = TargetOutcome {
                    target_id: target.id,
                    result,
                };
                self.report(&outcome, opts.quiet);
                outcomes.push(outcome);
            }
            outcomes
        };

        Ok(DispatchReport { outcomes })
    }

    fn report(&self, outcome: &TargetOutcome, quiet: bool) {
        match &outcome.result {
            Ok(result) => {
                if !quiet {
                    let trimmed = result.stdout.trim_end();
                    if trimmed.is_empty() {
                        self.reporter.info(&format!("[{}] ok", outcome.target_id));
                    } else {
                        self.reporter
                            .info(&format!("[{}] {trimmed}", outcome.target_id));
                    }
                }
            }
            Err(e) => self
                .reporter
                .warn(&format!("[{}] {e}", outcome.target_id)),
        }
    }
}
