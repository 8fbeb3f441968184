//! Execution contexts.

mod execution;

pub use execution::{RunContext, StageContext};
