//! omnirun-watch: Change-triggered execution
//!
//! Watches paths on a resolved target and runs a command after each quiet
//! period of changes. Local targets use native filesystem notification;
//! remote targets are emulated through the adapter layer with an
//! `inotifywait` stream or a polling snapshot diff.

pub mod engine;
pub mod error;
pub mod filter;
pub mod remote;

pub use engine::{DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL, WatchEngine, WatchOptions};
pub use error::WatchError;
pub use filter::should_ignore_file;
