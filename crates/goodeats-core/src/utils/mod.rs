//! Small helpers shared by the telemetry and cache modules.

pub mod clock;
pub mod format;

pub use clock::{Clock, ManualClock, SystemClock};
pub use format::{age_display, truncate_chars};
