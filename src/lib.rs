//! MediBand Check-up - heart-rate screening sessions for clinic staff.
//!
//! This library runs short check-ups against a wearable heart-rate band and
//! turns each one into a screening result with a plain-language insight.
//!
//! # Screening, not diagnosis
//!
//! - **Indicators only**: stability and risk are simple thresholds on the
//!   captured heart rate
//! - **Best-effort insight**: the AI text is context for staff and always
//!   degrades to a fixed fallback
//! - **In memory**: results live for the process lifetime unless exported
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       MediBand Check-up                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐          │
//! │  │   Sample    │──▶│   Session   │──▶│  Aggregate  │          │
//! │  │   Source    │   │   Machine   │   │  (summary)  │          │
//! │  └─────────────┘   └─────────────┘   └─────────────┘          │
//! │   relay / local          │                  │                 │
//! │                          ▼                  ▼                 │
//! │                   ┌─────────────┐   ┌─────────────┐           │
//! │                   │   History   │◀──│   Insight   │           │
//! │                   │  (bounded)  │   │ Orchestrator│           │
//! │                   └─────────────┘   └─────────────┘           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediband_checkup::{
//!     insight::{InsightOrchestrator, NoopInsightGenerator},
//!     monitor::{CheckupController, ControllerConfig},
//!     relay::{RelayClient, RelayConfig},
//!     device::RemoteSource,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RelayClient::new(RelayConfig::new(
//!     "http://127.0.0.1:8787",
//!     std::time::Duration::from_millis(900),
//! ))?;
//! let controller = CheckupController::new(
//!     ControllerConfig::default(),
//!     Arc::new(RemoteSource::new(client.clone())),
//!     Arc::new(client),
//!     InsightOrchestrator::new(Arc::new(NoopInsightGenerator)),
//! );
//! controller.start().await;
//! controller.start_demo().await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod device;
pub mod history;
pub mod insight;
pub mod monitor;
pub mod relay;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use audit::{AuditLog, AuditStats, SharedAuditLog};
pub use config::{Config, ConfigError};
pub use core::{
    CheckUpResult, CheckupMachine, Event, Insight, Phase, RiskLevel, SessionError,
    SessionSnapshot, Stability, Symptom,
};
pub use device::{DeviceReading, SampleSource, SourceKind};
pub use history::History;
pub use monitor::{CheckupController, ControlError, ControllerConfig};
pub use relay::{RelayClient, RelayConfig, RelayError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown before a monitoring session.
pub const DISCLAIMER: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              MEDIBAND CHECK-UP - SCREENING NOTICE                ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This tool supports heart-rate screening by clinic staff.        ║
║                                                                  ║
║  ✓ WHAT IT PROVIDES:                                             ║
║    • Average, minimum and maximum heart rate over 15 seconds     ║
║    • A rhythm stability and risk indicator                       ║
║    • Non-diagnostic context generated by an AI model             ║
║                                                                  ║
║  ✗ WHAT IT IS NOT:                                               ║
║    • A medical device or a diagnosis                             ║
║    • A replacement for clinical assessment                       ║
║    • A substitute for an ECG                                     ║
║                                                                  ║
║  Results are kept in memory only. Escalate any concern to a      ║
║  qualified clinician regardless of the indicator shown.          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
