//! omnirun-dispatch: Command fan-out across resolved targets

pub mod engine;
pub mod error;

pub use engine::{DispatchReport, Dispatcher, ExecuteOptions, TargetOutcome};
pub use error::DispatchError;
