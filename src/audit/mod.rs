//! Audit counters.
//!
//! Counts what the monitor handled without storing any subject data.

mod log;

pub use log::{create_shared_log, AuditLog, AuditStats, SharedAuditLog};
