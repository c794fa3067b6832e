pub mod log;
pub mod process;
pub mod stats;

pub use log::{ControlResult, LogEvent, LogSnapshot, LogStream, SessionState};
pub use process::{ProcessId, ProcessRecord, ProcessStatus};
pub use stats::MetricsSnapshot;
