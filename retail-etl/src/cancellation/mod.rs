//! Run cancellation.

mod token;

pub use token::{CancelCallback, CancellationToken};
