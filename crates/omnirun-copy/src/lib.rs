//! omnirun-copy: Cross-backend file transfer
//!
//! Builds a transfer plan from `[target:]path` endpoints (glob expansion,
//! recursive directory walks, `{name}` destination templates) and executes
//! it against the adapter layer, sequentially or with bounded parallelism.

pub mod engine;
pub mod error;
pub mod plan;

pub use engine::{CopyEngine, CopyFailure, CopyOptions, CopySummary, DEFAULT_MAX_CONCURRENT};
pub use error::CopyError;
pub use plan::{NAME_TOKEN, TransferItem};
