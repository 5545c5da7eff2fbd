//! Sample sources and the control-command channel.
//!
//! Two interchangeable sources feed a session: [`RemoteSource`] polls the
//! relay for the device's latest reading, [`LocalGenerator`] synthesizes
//! readings for self-contained demo sessions. A session never mixes them.

use crate::device::types::DeviceReading;
use crate::relay::{ControlCommand, RelayClient, RelayError};
use async_trait::async_trait;
use rand::Rng;
use std::ops::RangeInclusive;

/// Heart-rate range of the local generator.
pub const DEMO_BPM_RANGE: RangeInclusive<u16> = 60..=100;

/// SpO2 range of the local generator and of the display fallback.
pub const DISPLAY_SPO2_RANGE: RangeInclusive<u8> = 95..=100;

/// Produces at most one reading per call.
///
/// Implementations swallow their own failures: `None` means "no reading this
/// tick" and must never abort a session.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn next_reading(&self) -> Option<DeviceReading>;
}

/// Dispatches control commands to the device.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, command: &ControlCommand) -> Result<(), RelayError>;
}

/// Source backed by the relay's latest-sample endpoint.
pub struct RemoteSource {
    client: RelayClient,
}

impl RemoteSource {
    pub fn new(client: RelayClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SampleSource for RemoteSource {
    async fn next_reading(&self) -> Option<DeviceReading> {
        match self.client.fetch_latest().await {
            Ok(reading) => Some(reading),
            Err(e) => {
                tracing::debug!("No reading from relay this tick: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CommandSink for RelayClient {
    async fn send(&self, command: &ControlCommand) -> Result<(), RelayError> {
        self.post_command(command).await
    }
}

/// Pseudo-random source for demo sessions. Performs no I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalGenerator;

impl LocalGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Synthesize one reading.
    pub fn generate(&self) -> DeviceReading {
        let mut rng = rand::thread_rng();
        let bpm = rng.gen_range(DEMO_BPM_RANGE);
        let spo2 = rng.gen_range(DISPLAY_SPO2_RANGE);
        DeviceReading::sample(bpm, spo2)
    }
}

#[async_trait]
impl SampleSource for LocalGenerator {
    async fn next_reading(&self) -> Option<DeviceReading> {
        Some(self.generate())
    }
}

/// Display-only SpO2 value used when the device does not report one.
pub fn synthesize_spo2() -> u8 {
    rand::thread_rng().gen_range(DISPLAY_SPO2_RANGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_generator_ranges() {
        let generator = LocalGenerator::new();
        for _ in 0..200 {
            let reading = generator.generate();
            let bpm = reading.valid_bpm().unwrap();
            let spo2 = reading.valid_spo2().unwrap();
            assert!(DEMO_BPM_RANGE.contains(&bpm));
            assert!(DISPLAY_SPO2_RANGE.contains(&spo2));
            assert!(reading.time_left.is_none());
            assert!(!reading.is_measuring());
        }
    }

    #[test]
    fn test_synthesized_spo2_range() {
        for _ in 0..100 {
            assert!(DISPLAY_SPO2_RANGE.contains(&synthesize_spo2()));
        }
    }

    #[tokio::test]
    async fn test_remote_source_swallows_network_errors() {
        let config = crate::relay::RelayConfig::new(
            "http://127.0.0.1:9",
            std::time::Duration::from_millis(200),
        );
        let source = RemoteSource::new(RelayClient::new(config).unwrap());
        assert!(source.next_reading().await.is_none());
    }
}
