//! Utility modules.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};
