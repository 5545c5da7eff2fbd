//! Device-facing inputs: reading types and the sources that produce them.

pub mod source;
pub mod types;

// Re-export commonly used types
pub use source::{
    synthesize_spo2, CommandSink, LocalGenerator, RemoteSource, SampleSource, DEMO_BPM_RANGE,
    DISPLAY_SPO2_RANGE,
};
pub use types::{
    DeviceReading, Sample, SourceKind, MAX_VALID_BPM, MIN_VALID_BPM, STATUS_MEASURING,
};
