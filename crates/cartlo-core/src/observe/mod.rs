//! # Observability
//!
//! - **Logging**: `tracing` subscriber setup
//! - **Sinks**: status/progress/event reporting and tab-delimited data rows

pub mod logging;
pub mod sink;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use sink::{tab_row, MemorySink, OpEvent, RecordSink, Sinks, StatusSink, TracingSink};
