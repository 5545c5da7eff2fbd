//! Audit counters for the monitor.
//!
//! Tracks how many readings, sessions and insight calls the monitor handled
//! so a clinic can see what the screening actually saw. No subject data is
//! stored here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for the current process.
#[derive(Debug)]
pub struct AuditLog {
    /// Ticks that delivered a usable heart-rate sample
    readings_received: AtomicU64,
    /// Ticks that delivered nothing usable
    empty_ticks: AtomicU64,
    /// Device signals dropped by the freshness/ordering checks
    stale_signals: AtomicU64,
    /// Sessions that entered measuring
    sessions_started: AtomicU64,
    /// Sessions that produced a result
    sessions_completed: AtomicU64,
    /// Sessions whose window ended with an empty buffer
    sessions_without_data: AtomicU64,
    /// Genuine insights attached
    insights_generated: AtomicU64,
    /// Fallback insights attached
    insight_fallbacks: AtomicU64,
    /// Process start time
    started_at: DateTime<Utc>,
}

impl AuditLog {
    /// Create a new audit log.
    pub fn new() -> Self {
        Self {
            readings_received: AtomicU64::new(0),
            empty_ticks: AtomicU64::new(0),
            stale_signals: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_without_data: AtomicU64::new(0),
            insights_generated: AtomicU64::new(0),
            insight_fallbacks: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_reading(&self) {
        self.readings_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_tick(&self) {
        self.empty_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_signal(&self) {
        self.stale_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_without_data(&self) {
        self.sessions_without_data.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insight(&self, fallback: bool) {
        if fallback {
            self.insight_fallbacks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.insights_generated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get the current statistics.
    pub fn stats(&self) -> AuditStats {
        AuditStats {
            readings_received: self.readings_received.load(Ordering::Relaxed),
            empty_ticks: self.empty_ticks.load(Ordering::Relaxed),
            stale_signals: self.stale_signals.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_without_data: self.sessions_without_data.load(Ordering::Relaxed),
            insights_generated: self.insights_generated.load(Ordering::Relaxed),
            insight_fallbacks: self.insight_fallbacks.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Monitor Statistics:\n\
             - Readings received: {}\n\
             - Ticks without data: {}\n\
             - Stale device signals ignored: {}\n\
             - Check-ups started: {}\n\
             - Check-ups completed: {}\n\
             - Check-ups without data: {}\n\
             - AI insights generated: {}\n\
             - AI insight fallbacks: {}\n\
             - Uptime: {} seconds",
            stats.readings_received,
            stats.empty_ticks,
            stats.stale_signals,
            stats.sessions_started,
            stats.sessions_completed,
            stats.sessions_without_data,
            stats.insights_generated,
            stats.insight_fallbacks,
            stats.uptime_secs
        )
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of audit statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub readings_received: u64,
    pub empty_ticks: u64,
    pub stale_signals: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_without_data: u64,
    pub insights_generated: u64,
    pub insight_fallbacks: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared audit log.
pub type SharedAuditLog = Arc<AuditLog>;

/// Create a new shared audit log.
pub fn create_shared_log() -> SharedAuditLog {
    Arc::new(AuditLog::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log_counting() {
        let log = AuditLog::new();

        log.record_reading();
        log.record_reading();
        log.record_empty_tick();
        log.record_insight(true);
        log.record_insight(false);
        log.record_insight(false);

        let stats = log.stats();
        assert_eq!(stats.readings_received, 2);
        assert_eq!(stats.empty_ticks, 1);
        assert_eq!(stats.insight_fallbacks, 1);
        assert_eq!(stats.insights_generated, 2);
    }

    #[test]
    fn test_summary_format() {
        let log = AuditLog::new();
        let summary = log.summary();

        assert!(summary.contains("Readings received"));
        assert!(summary.contains("Check-ups completed"));
        assert!(summary.contains("AI insight fallbacks"));
    }
}
