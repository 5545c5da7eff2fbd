//! Core check-up logic.
//!
//! This module contains:
//! - Aggregation of a heart-rate buffer into a summary
//! - Result and insight types
//! - The session state machine

pub mod aggregate;
pub mod report;
pub mod session;

// Re-export commonly used types
pub use aggregate::{confidence_score, summarize, AggregateError, RiskLevel, Stability, Summary};
pub use report::{
    CheckUpResult, Insight, InsightRequest, SignalQuality, Symptom, FALLBACK_SUMMARY,
};
pub use session::{
    CheckupMachine, Effect, Event, IgnoredSignal, MachineConfig, Notice, Phase, Session,
    SessionError, SessionSnapshot, Transition, DEMO_SUBJECT, GUEST_SUBJECT,
};
