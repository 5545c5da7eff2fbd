//! Reading and sample types exchanged with the heart-rate device.
//!
//! A [`DeviceReading`] is whatever the relay last stored for the device; a
//! [`Sample`] is a validated heart-rate value accepted into a session buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest heart rate accepted as a physiological reading.
pub const MIN_VALID_BPM: u16 = 30;

/// Highest heart rate accepted as a physiological reading.
pub const MAX_VALID_BPM: u16 = 220;

/// Status string the device reports while a measurement window is running.
pub const STATUS_MEASURING: &str = "MEASURING";

/// Raw payload of the latest-sample endpoint.
///
/// Every field is optional. A reading without a numeric `bpm` carries no
/// sample; non-numeric values in numeric fields read as absent so the rest
/// of the packet stays usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReading {
    /// Heart rate in beats per minute
    #[serde(
        default,
        deserialize_with = "lenient::number",
        skip_serializing_if = "Option::is_none"
    )]
    pub bpm: Option<f64>,
    /// Blood-oxygen saturation in percent
    #[serde(
        default,
        deserialize_with = "lenient::number",
        skip_serializing_if = "Option::is_none"
    )]
    pub spo2: Option<f64>,
    /// Device status, e.g. `"MEASURING"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Seconds remaining in the device's own window
    #[serde(
        default,
        deserialize_with = "lenient::number",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_left: Option<f64>,
    /// Relay timestamp, epoch milliseconds
    #[serde(
        default,
        deserialize_with = "lenient::millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

/// Deserializers that map non-numeric JSON values to `None`.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(Value::as_f64))
    }

    pub fn millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|ms| ms.is_finite()).map(|ms| ms as i64))
        }))
    }
}

impl DeviceReading {
    /// A reading carrying only a heart rate and SpO2, stamped now.
    pub fn sample(bpm: u16, spo2: u8) -> Self {
        Self {
            bpm: Some(f64::from(bpm)),
            spo2: Some(f64::from(spo2)),
            status: None,
            time_left: None,
            timestamp: Some(Utc::now().timestamp_millis()),
        }
    }

    /// Whether the device says it is measuring.
    pub fn is_measuring(&self) -> bool {
        self.status.as_deref() == Some(STATUS_MEASURING)
    }

    /// Heart rate rounded to whole beats, if present and physiologically valid.
    pub fn valid_bpm(&self) -> Option<u16> {
        let bpm = self.bpm?;
        if !bpm.is_finite() {
            return None;
        }
        let rounded = bpm.round();
        if rounded < f64::from(MIN_VALID_BPM) || rounded > f64::from(MAX_VALID_BPM) {
            return None;
        }
        Some(rounded as u16)
    }

    /// SpO2 rounded to whole percent, if present and within 0..=100.
    pub fn valid_spo2(&self) -> Option<u8> {
        let spo2 = self.spo2?;
        if !spo2.is_finite() || !(0.0..=100.0).contains(&spo2) {
            return None;
        }
        Some(spo2.round() as u8)
    }

    /// Remaining seconds reported by the device, if any.
    pub fn remaining_secs(&self) -> Option<f64> {
        self.time_left.filter(|t| t.is_finite())
    }
}

/// A heart-rate value accepted into a session buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Heart rate in beats per minute
    pub bpm: u16,
}

impl Sample {
    pub fn new(bpm: u16) -> Self {
        Self {
            timestamp: Utc::now(),
            bpm,
        }
    }
}

/// Which kind of source feeds a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The remote device via the relay
    Remote,
    /// The local pseudo-random generator (demo sessions)
    Local,
}
