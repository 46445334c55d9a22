//! omnirun CLI
//!
//! Thin wiring around the engines: parse flags, load the project file,
//! merge defaults beneath explicit options, invoke one operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use omnirun_config::ProjectConfig;
use omnirun_copy::{CopyEngine, CopyOptions, DEFAULT_MAX_CONCURRENT};
use omnirun_dispatch::{Dispatcher, ExecuteOptions};
use omnirun_exec::Reporter;
use omnirun_watch::{DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL, WatchEngine, WatchOptions};

/// Reporter printing to the console; the engines never print themselves
struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }
}

#[derive(Parser)]
#[command(name = "omnirun")]
#[command(
    about = "Run commands and move files across local, SSH, Docker and Kubernetes targets",
    long_about = None
)]
struct Cli {
    /// Project file (default: ./omnirun.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on one or more targets
    On {
        /// Target specifier: local, hosts.web-1, containers.*, ...
        target: String,
        /// Command line to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Named task from [tasks] to run instead of a command
        #[arg(short, long)]
        task: Option<String>,
        /// Run all matched targets concurrently
        #[arg(long)]
        parallel: bool,
        /// Per-target timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Working directory on each target
        #[arg(long)]
        cwd: Option<String>,
        /// Extra environment as KEY=VALUE (repeatable)
        #[arg(short, long = "env")]
        env: Vec<String>,
        /// Suppress per-target output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Copy files between targets
    Cp {
        /// Source endpoint: [target:]path, glob allowed
        source: String,
        /// Destination endpoint: [target:]path, may use {name}
        dest: String,
        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,
        /// Transfer files through a worker pool
        #[arg(long)]
        parallel: bool,
        /// Worker pool size
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Carry mtime and permissions to the destination
        #[arg(short, long)]
        preserve: bool,
        /// Overwrite existing destination files
        #[arg(short, long)]
        force: bool,
        /// Report the plan without transferring
        #[arg(long)]
        dry_run: bool,
        /// Suppress per-file progress
        #[arg(short, long)]
        quiet: bool,
    },

    /// Watch paths on a target and run a command on changes
    Watch {
        /// Target specifier
        target: String,
        /// Paths to watch (default: current directory)
        paths: Vec<String>,
        /// Command to run on changes
        #[arg(short, long)]
        command: Option<String>,
        /// Named task from [tasks] to run on changes
        #[arg(short, long)]
        task: Option<String>,
        /// Only react to files matching these globs (repeatable)
        #[arg(long)]
        pattern: Vec<String>,
        /// Never react to files matching these globs (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        /// Debounce window in milliseconds
        #[arg(long)]
        debounce: Option<u64>,
        /// Run the command once immediately
        #[arg(long)]
        initial: bool,
        /// Force the polling strategy
        #[arg(long)]
        poll: bool,
        /// Polling interval in milliseconds
        #[arg(long)]
        interval: Option<u64>,
        /// Report what would be watched, then exit
        #[arg(long)]
        dry_run: bool,
    },

    /// List resolved targets
    Targets {
        /// Specifier to filter by, e.g. hosts.web-*
        pattern: Option<String>,
        /// Emit one JSON object per target
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project = load_project(cli.config.as_deref())?;
    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter);

    match cli.command {
        Commands::On {
            target,
            command,
            task,
            parallel,
            timeout,
            cwd,
            env,
            quiet,
        } => {
            let command_line = match (&task, command.is_empty()) {
                (Some(name), true) => project
                    .tasks
                    .get(name)
                    .cloned()
                    .ok_or_else(|| eyre!("unknown task: {name}"))?,
                (None, false) => command.join(" "),
                _ => return Err(eyre!("provide either a command or --task, not both")),
            };
            let opts = ExecuteOptions {
                parallel: parallel || project.defaults.on.parallel.unwrap_or(false),
                timeout: timeout
                    .or(project.defaults.on.timeout_secs)
                    .map(Duration::from_secs),
                env: parse_env(&env)?,
                cwd,
                quiet,
            };
            let dispatcher = Dispatcher::new(reporter);
            let report = dispatcher
                .execute(&project.inventory, &target, &command_line, &opts)
                .await?;
            if !report.success() {
                let failed: Vec<&str> = report
                    .failed()
                    .iter()
                    .map(|o| o.target_id.as_str())
                    .collect();
                return Err(eyre!("command failed on: {}", failed.join(", ")));
            }
        }

        Commands::Cp {
            source,
            dest,
            recursive,
            parallel,
            max_concurrent,
            preserve,
            force,
            dry_run,
            quiet,
        } => {
            let defaults = &project.defaults.copy;
            let opts = CopyOptions {
                recursive,
                parallel: parallel || defaults.parallel.unwrap_or(false),
                max_concurrent: max_concurrent
                    .or(defaults.max_concurrent)
                    .unwrap_or(DEFAULT_MAX_CONCURRENT),
                preserve: preserve || defaults.preserve.unwrap_or(false),
                force: force || defaults.force.unwrap_or(false),
                dry_run,
                quiet,
            };
            let engine = CopyEngine::new(reporter);
            let summary = engine
                .copy(&project.inventory, &source, &dest, &opts)
                .await?;
            if !summary.success() {
                return Err(eyre!("{} transfer(s) failed", summary.failures.len()));
            }
        }

        Commands::Watch {
            target,
            paths,
            command,
            task,
            pattern,
            exclude,
            debounce,
            initial,
            poll,
            interval,
            dry_run,
        } => {
            let defaults = &project.defaults.watch;
            let opts = WatchOptions {
                command,
                task,
                pattern,
                exclude,
                debounce: debounce
                    .or(defaults.debounce_ms)
                    .map_or(DEFAULT_DEBOUNCE, Duration::from_millis),
                initial: initial || defaults.initial.unwrap_or(false),
                poll: poll || defaults.poll.unwrap_or(false),
                interval: interval
                    .or(defaults.interval_ms)
                    .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
                dry_run,
            };
            let engine = WatchEngine::new(reporter).with_tasks(project.tasks.clone());
            engine
                .start(&project.inventory, &target, &paths, &opts)
                .await?;
            if opts.dry_run || engine.active().is_empty() {
                return Ok(());
            }

            println!("watching, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            engine.shutdown().await;
        }

        Commands::Targets { pattern, json } => {
            let targets = match pattern {
                Some(pattern) => project.inventory.find(&pattern),
                None => project.inventory.targets(),
            };
            for target in targets {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "id": target.id,
                            "kind": target.kind.to_string(),
                            "name": target.name,
                        })
                    );
                } else {
                    println!("{}\t{}", target.id, target.kind);
                }
            }
        }
    }

    Ok(())
}

fn load_project(explicit: Option<&Path>) -> Result<ProjectConfig> {
    match explicit {
        Some(path) => Ok(ProjectConfig::load(path)?),
        None => {
            let cwd = std::env::current_dir()?;
            Ok(ProjectConfig::discover(&cwd)?.unwrap_or_default())
        }
    }
}

fn parse_env(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| eyre!("invalid --env value {pair:?}, expected KEY=VALUE"))
        })
        .collect()
}
