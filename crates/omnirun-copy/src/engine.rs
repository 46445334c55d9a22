//! Cross-backend file copying
//!
//! Parses both endpoints, expands the source (glob, directory or single
//! file) into a plan of `(source, dest)` pairs, then executes the plan
//! sequentially or through a bounded worker pool. Remote→remote transfers
//! stage through a local temp file.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use omnirun_exec::globs::{contains_meta, relative};
use omnirun_exec::{
    Adapter, AdapterFactory, DefaultAdapterFactory, FileEntry, ListOptions, Reporter,
    TransferOptions,
};
use omnirun_inventory::Inventory;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use crate::error::CopyError;
use crate::plan::{
    NAME_TOKEN, TransferItem, has_name_token, is_dir_like, join_under, render_dest, subtree_dirs,
};

/// Default bound for the parallel worker pool
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Options for one copy operation
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Allow directory sources and reproduce their subtree
    pub recursive: bool,
    /// Dispatch transfers through a worker pool
    pub parallel: bool,
    /// Worker pool size when `parallel` is set
    pub max_concurrent: usize,
    /// Carry mtime and permission bits to the destination
    pub preserve: bool,
    /// Overwrite existing destination files
    pub force: bool,
    /// Plan and report without transferring anything
    pub dry_run: bool,
    /// Suppress per-file progress reporting
    pub quiet: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            parallel: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            preserve: false,
            force: false,
            dry_run: false,
            quiet: false,
        }
    }
}

/// One failed transfer inside a multi-file plan
#[derive(Debug, Clone)]
pub struct CopyFailure {
    /// Source path
    pub source: String,
    /// Destination path
    pub dest: String,
    /// What went wrong
    pub error: String,
}

/// Outcome of a copy operation
#[derive(Debug, Clone, Default)]
pub struct CopySummary {
    /// Files planned for transfer
    pub planned: usize,
    /// Files actually transferred
    pub copied: usize,
    /// Files skipped because the destination existed
    pub skipped: usize,
    /// Per-file failures; empty means full success
    pub failures: Vec<CopyFailure>,
}

impl CopySummary {
    /// Whether every planned transfer succeeded or was skipped
    #[must_use]
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The copy engine
pub struct CopyEngine {
    factory: Arc<dyn AdapterFactory>,
    reporter: Arc<dyn Reporter>,
}

impl CopyEngine {
    /// Engine with the real backends
    #[must_use]
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self::with_factory(Arc::new(DefaultAdapterFactory), reporter)
    }

    /// Engine with an injected adapter factory
    #[must_use]
    pub fn with_factory(factory: Arc<dyn AdapterFactory>, reporter: Arc<dyn Reporter>) -> Self {
        Self { factory, reporter }
    }

    /// Copy `source` to `dest`, each a `[target:]path` endpoint
    ///
    /// # Errors
    /// `Validation` for missing specs or a multi-file plan against a
    /// non-directory destination; `IsDirectory` for a directory source
    /// without `recursive`; `SourceMissing` for an absent explicit source;
    /// `Transfer` when a single-file plan fails. Failures inside a
    /// multi-file plan are accumulated in the summary instead.
    #[instrument(skip(self, inventory, opts))]
    pub async fn copy(
        &self,
        inventory: &Inventory,
        source: &str,
        dest: &str,
        opts: &CopyOptions,
    ) -> Result<CopySummary, CopyError> {
        if source.trim().is_empty() {
            return Err(CopyError::Validation(
                "source specification is required".to_string(),
            ));
        }
        if dest.trim().is_empty() {
            return Err(CopyError::Validation(
                "destination specification is required".to_string(),
            ));
        }

        let src_ep = inventory.parse_endpoint(source)?;
        let dest_ep = inventory.parse_endpoint(dest)?;

        let src_adapter = self.factory.create(&src_ep.target)?;
        let dest_adapter = self.factory.create(&dest_ep.target)?;

        debug!(
            source = %src_ep.path,
            dest = %dest_ep.path,
            src_target = %src_ep.target.id,
            dest_target = %dest_ep.target.id,
            "planning copy"
        );

        // Destination directories to recreate before any file lands.
        let mut pre_dirs: Vec<String> = Vec::new();
        let items: Vec<TransferItem>;

        if contains_meta(&src_ep.path) {
            let listed = src_adapter
                .list_files(
                    &src_ep.path,
                    &ListOptions {
                        recursive: opts.recursive,
                    },
                )
                .await?;
            let files: Vec<&FileEntry> = listed.iter().filter(|e| !e.is_dir).collect();
            if files.is_empty() {
                self.reporter
                    .info(&format!("no files matched {}", src_ep.path));
                return Ok(CopySummary::default());
            }

            let dirish = self.dest_is_dirish(&*dest_adapter, &dest_ep.path).await?;
            if files.len() > 1 && !dirish {
                return Err(CopyError::Validation(format!(
                    "destination must be a directory or {NAME_TOKEN} template when copying multiple files"
                )));
            }
            items = files
                .iter()
                .map(|f| TransferItem {
                    source: f.path.clone(),
                    dest: if dirish {
                        render_dest(&dest_ep.path, f.file_name())
                    } else {
                        dest_ep.path.clone()
                    },
                })
                .collect();
        } else {
            let Some(entry) = src_adapter.stat(&src_ep.path).await? else {
                return Err(CopyError::SourceMissing(src_ep.path.clone()));
            };

            if entry.is_dir {
                if !opts.recursive {
                    return Err(CopyError::IsDirectory {
                        path: src_ep.path.clone(),
                    });
                }
                let src_root = src_ep.path.trim_end_matches('/').to_string();
                let listed = src_adapter
                    .list_files(&src_root, &ListOptions::new().recursive())
                    .await?;

                let dir_name = entry.file_name().to_string();
                let dest_root = if has_name_token(&dest_ep.path) {
                    dest_ep.path.replace(NAME_TOKEN, &dir_name)
                } else if is_dir_like(&dest_ep.path) {
                    format!("{}{dir_name}", dest_ep.path)
                } else {
                    dest_ep.path.clone()
                };

                pre_dirs.push(dest_root.clone());
                for dir in subtree_dirs(&listed) {
                    if let Some(rel) = relative(&dir, &src_root) {
                        pre_dirs.push(join_under(&dest_root, rel));
                    }
                }

                items = listed
                    .iter()
                    .filter(|e| !e.is_dir)
                    .filter_map(|f| {
                        relative(&f.path, &src_root).map(|rel| TransferItem {
                            source: f.path.clone(),
                            dest: join_under(&dest_root, rel),
                        })
                    })
                    .collect();
            } else {
                let dirish = self.dest_is_dirish(&*dest_adapter, &dest_ep.path).await?;
                let dest_path = if dirish {
                    render_dest(&dest_ep.path, entry.file_name())
                } else {
                    dest_ep.path.clone()
                };
                items = vec![TransferItem {
                    source: src_ep.path.clone(),
                    dest: dest_path,
                }];
            }
        }

        let ctx = TransferCtx {
            src: src_adapter,
            dest: dest_adapter,
            src_local: src_ep.target.is_local(),
            dest_local: dest_ep.target.is_local(),
            preserve: opts.preserve,
            force: opts.force,
            quiet: opts.quiet,
            reporter: Arc::clone(&self.reporter),
        };

        if opts.dry_run {
            return self.dry_run(&ctx, &items).await;
        }

        for dir in &pre_dirs {
            ctx.dest.mkdirp(dir).await?;
        }

        let single = items.len() == 1;
        let summary = self.run_plan(items, &ctx, opts).await;

        if single && let Some(failure) = summary.failures.first() {
            return Err(CopyError::Transfer {
                path: failure.source.clone(),
                message: failure.error.clone(),
            });
        }
        for failure in &summary.failures {
            self.reporter.warn(&format!(
                "failed to copy {} -> {}: {}",
                failure.source, failure.dest, failure.error
            ));
        }
        Ok(summary)
    }

    /// Report every planned pair without touching any state
    async fn dry_run(
        &self,
        ctx: &TransferCtx,
        items: &[TransferItem],
    ) -> Result<CopySummary, CopyError> {
        let mut summary = CopySummary {
            planned: items.len(),
            ..CopySummary::default()
        };
        for item in items {
            let exists = ctx.dest.stat(&item.dest).await?.is_some();
            if exists && !ctx.force {
                self.reporter
                    .info(&format!("would skip existing {}", item.dest));
                summary.skipped += 1;
            } else {
                self.reporter
                    .info(&format!("would copy {} -> {}", item.source, item.dest));
            }
        }
        self.reporter.info(&format!(
            "dry run: {} file(s), nothing transferred",
            items.len()
        ));
        Ok(summary)
    }

    async fn run_plan(
        &self,
        items: Vec<TransferItem>,
        ctx: &TransferCtx,
        opts: &CopyOptions,
    ) -> CopySummary {
        let mut summary = CopySummary {
            planned: items.len(),
            ..CopySummary::default()
        };

        if opts.parallel && items.len() > 1 {
            let copied = Arc::new(AtomicUsize::new(0));
            let skipped = Arc::new(AtomicUsize::new(0));
            let failures: Arc<Mutex<Vec<CopyFailure>>> = Arc::new(Mutex::new(Vec::new()));
            let semaphore = Arc::new(Semaphore::new(opts.max_concurrent.max(1)));
            let mut set = JoinSet::new();

            for item in items {
                let ctx = ctx.clone();
                let semaphore = Arc::clone(&semaphore);
                let copied = Arc::clone(&copied);
                let skipped = Arc::clone(&skipped);
                let failures = Arc::clone(&failures);
                set.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    match transfer_one(&ctx, &item).await {
                        Ok(Outcome::Copied) => {
                            copied.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Outcome::Skipped) => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => failures.lock().unwrap().push(CopyFailure {
                            source: item.source,
                            dest: item.dest,
                            error,
                        }),
                    }
                });
            }
            while set.join_next().await.is_some() {}

            summary.copied = copied.load(Ordering::Relaxed);
            summary.skipped = skipped.load(Ordering::Relaxed);
            summary.failures = std::mem::take(&mut *failures.lock().unwrap());
        } else {
            for item in items {
                match transfer_one(ctx, &item).await {
                    Ok(Outcome::Copied) => summary.copied += 1,
                    Ok(Outcome::Skipped) => summary.skipped += 1,
                    Err(error) => summary.failures.push(CopyFailure {
                        source: item.source,
                        dest: item.dest,
                        error,
                    }),
                }
            }
        }
        summary
    }

    /// Whether the destination should receive files *under* it
    async fn dest_is_dirish(&self, adapter: &dyn Adapter, dest: &str) -> Result<bool, CopyError> {
        if has_name_token(dest) || is_dir_like(dest) {
            return Ok(true);
        }
        Ok(adapter.stat(dest).await?.is_some_and(|e| e.is_dir))
    }
}

#[derive(Clone)]
struct TransferCtx {
    src: Arc<dyn Adapter>,
    dest: Arc<dyn Adapter>,
    src_local: bool,
    dest_local: bool,
    preserve: bool,
    force: bool,
    quiet: bool,
    reporter: Arc<dyn Reporter>,
}

enum Outcome {
    Copied,
    Skipped,
}

/// Move one file, routing by endpoint locality
async fn transfer_one(ctx: &TransferCtx, item: &TransferItem) -> Result<Outcome, String> {
    // The existence check is per-file and as late as possible.
    let exists = ctx
        .dest
        .stat(&item.dest)
        .await
        .map_err(|e| e.to_string())?
        .is_some();
    if exists && !ctx.force {
        if !ctx.quiet {
            ctx.reporter
                .info(&format!("skipping existing {}", item.dest));
        }
        return Ok(Outcome::Skipped);
    }

    let topts = TransferOptions {
        recursive: false,
        preserve: ctx.preserve,
    };

    let result = match (ctx.src_local, ctx.dest_local) {
        (true, true) => {
            ctx.src
                .upload(Path::new(&item.source), &item.dest, &topts)
                .await
        }
        (false, true) => {
            ctx.src
                .download(&item.source, Path::new(&item.dest), &topts)
                .await
        }
        (true, false) => {
            ctx.dest
                .upload(Path::new(&item.source), &item.dest, &topts)
                .await
        }
        (false, false) => stage_through_local(ctx, item, &topts).await,
    };
    result.map_err(|e| e.to_string())?;

    if !ctx.quiet {
        ctx.reporter
            .info(&format!("copied {} -> {}", item.source, item.dest));
    }
    Ok(Outcome::Copied)
}

/// Remote→remote: download to a temp file, then upload
async fn stage_through_local(
    ctx: &TransferCtx,
    item: &TransferItem,
    topts: &TransferOptions,
) -> Result<(), omnirun_exec::ExecError> {
    let staging = tempfile::Builder::new()
        .prefix("omnirun-stage-")
        .tempfile()
        .map_err(|e| omnirun_exec::ExecError::Transfer(e.to_string()))?;
    let staging_path = staging.path().to_path_buf();

    // Preserve through the staging hop so the final mtime is the source's.
    ctx.src
        .download(&item.source, &staging_path, topts)
        .await?;
    ctx.dest.upload(&staging_path, &item.dest, topts).await
    // `staging` drops here, removing the file on success and failure alike.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_conservative() {
        let opts = CopyOptions::default();
        assert!(!opts.recursive);
        assert!(!opts.force);
        assert!(!opts.parallel);
        assert_eq!(opts.max_concurrent, DEFAULT_MAX_CONCURRENT);
    }
}
