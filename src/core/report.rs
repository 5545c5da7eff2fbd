//! Check-up result artifacts: symptoms, insight payload and the result itself.

use crate::core::aggregate::{RiskLevel, Stability, Summary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Symptom reported by the subject. The vocabulary is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Symptom {
    #[serde(rename = "Dizziness")]
    Dizziness,
    #[serde(rename = "Fatigue")]
    Fatigue,
    #[serde(rename = "Shortness of Breath")]
    ShortnessOfBreath,
    #[serde(rename = "Chest Discomfort")]
    ChestDiscomfort,
    #[serde(rename = "Anxiety")]
    Anxiety,
}

impl Symptom {
    pub const ALL: [Symptom; 5] = [
        Symptom::Dizziness,
        Symptom::Fatigue,
        Symptom::ShortnessOfBreath,
        Symptom::ChestDiscomfort,
        Symptom::Anxiety,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Symptom::Dizziness => "Dizziness",
            Symptom::Fatigue => "Fatigue",
            Symptom::ShortnessOfBreath => "Shortness of Breath",
            Symptom::ChestDiscomfort => "Chest Discomfort",
            Symptom::Anxiety => "Anxiety",
        }
    }
}

impl std::fmt::Display for Symptom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Symptom {
    type Err = String;

    /// Accepts the display label or a compact form (`shortness-of-breath`,
    /// `chest_discomfort`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Symptom::ALL
            .into_iter()
            .find(|symptom| {
                let label: String = symptom
                    .label()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                label == normalized
            })
            .ok_or_else(|| format!("Unknown symptom '{s}'"))
    }
}

/// Advisory signal-quality indicator. Never blocks completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignalQuality {
    #[default]
    Good,
    Fair,
    Poor,
}

impl SignalQuality {
    /// Grade from the share of ticks that delivered a usable sample.
    pub fn from_ticks(ticks: u32, delivered: u32) -> Self {
        if ticks == 0 {
            return SignalQuality::Good;
        }
        let ratio = f64::from(delivered) / f64::from(ticks);
        if ratio >= 0.9 {
            SignalQuality::Good
        } else if ratio >= 0.6 {
            SignalQuality::Fair
        } else {
            SignalQuality::Poor
        }
    }
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SignalQuality::Good => "Good",
            SignalQuality::Fair => "Fair",
            SignalQuality::Poor => "Poor",
        };
        f.write_str(label)
    }
}

/// Natural-language interpretation attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub contributing_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
}

/// Summary shown when no genuine insight could be generated.
pub const FALLBACK_SUMMARY: &str = "AI Insight unavailable. Please rely on clinical judgment.";

impl Insight {
    /// The fixed insight used whenever generation fails.
    pub fn fallback() -> Self {
        Self {
            contributing_factors: vec![
                "Data unavailable".to_string(),
                "Check connection".to_string(),
            ],
            recommendations: vec!["Proceed with standard clinical protocol".to_string()],
            summary: FALLBACK_SUMMARY.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == Self::fallback()
    }
}

/// Structured data sent to the insight backend for one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub avg_bpm: u16,
    pub stability: Stability,
    pub risk: RiskLevel,
    pub symptoms: Vec<Symptom>,
}

impl InsightRequest {
    pub fn from_result(result: &CheckUpResult) -> Self {
        Self {
            avg_bpm: result.avg_bpm,
            stability: result.stability,
            risk: result.risk_level,
            symptoms: result.symptoms.clone(),
        }
    }
}

/// Result of a completed check-up.
///
/// Created once at completion with `insight: None`; the insight is attached in
/// place exactly once, after which the result is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUpResult {
    pub id: Uuid,
    pub session_id: Uuid,
    pub subject_id: String,
    pub station_id: String,
    pub recorded_at: DateTime<Utc>,
    pub avg_bpm: u16,
    pub min_bpm: u16,
    pub max_bpm: u16,
    pub sample_count: usize,
    pub stability: Stability,
    pub risk_level: RiskLevel,
    pub confidence_score: u8,
    pub symptoms: Vec<Symptom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<u8>,
    pub signal_quality: SignalQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight: Option<Insight>,
}

impl CheckUpResult {
    /// Build a result from an aggregated summary. The insight starts empty.
    pub fn from_summary(
        session_id: Uuid,
        subject_id: &str,
        station_id: &str,
        summary: &Summary,
        symptoms: Vec<Symptom>,
        spo2: Option<u8>,
        signal_quality: SignalQuality,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            subject_id: subject_id.to_string(),
            station_id: station_id.to_string(),
            recorded_at: Utc::now(),
            avg_bpm: summary.avg_bpm,
            min_bpm: summary.min_bpm,
            max_bpm: summary.max_bpm,
            sample_count: summary.sample_count,
            stability: summary.stability,
            risk_level: summary.risk,
            confidence_score: summary.confidence,
            symptoms,
            spo2,
            signal_quality,
            insight: None,
        }
    }

    /// Whether the insight has been attached.
    pub fn is_final(&self) -> bool {
        self.insight.is_some()
    }
}
