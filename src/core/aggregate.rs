//! Reduction of a finished heart-rate buffer into screening statistics.
//!
//! Everything here is a pure function of the buffer. Partial buffers are never
//! classified: the state machine calls [`summarize`] once, at completion.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Spread (max - min, bpm) up to which the rhythm counts as stable.
pub const STABLE_MAX_SPREAD: u16 = 15;

/// Spread up to which the rhythm counts as slightly irregular.
pub const SLIGHTLY_IRREGULAR_MAX_SPREAD: u16 = 25;

/// Confidence before penalties.
pub const BASE_CONFIDENCE: u8 = 98;

/// Lowest confidence ever reported.
pub const MIN_CONFIDENCE: u8 = 60;

/// Penalty applied when the rhythm is not stable.
const INSTABILITY_PENALTY: u8 = 15;

/// Penalty applied when fewer samples than the window length were captured.
const INCOMPLETE_CAPTURE_PENALTY: u8 = 20;

/// Rhythm stability classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stability {
    #[serde(rename = "Stable")]
    Stable,
    #[serde(rename = "Slightly Irregular")]
    SlightlyIrregular,
    #[serde(rename = "Irregular")]
    Irregular,
}

impl Stability {
    /// Classify from the spread (max - min) of a buffer.
    pub fn from_spread(spread: u16) -> Self {
        if spread > SLIGHTLY_IRREGULAR_MAX_SPREAD {
            Stability::Irregular
        } else if spread > STABLE_MAX_SPREAD {
            Stability::SlightlyIrregular
        } else {
            Stability::Stable
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stability::Stable => "Stable",
            Stability::SlightlyIrregular => "Slightly Irregular",
            Stability::Irregular => "Irregular",
        }
    }
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Coarse screening risk. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Normal,
    Moderate,
    High,
}

impl RiskLevel {
    /// Classify from the rounded average and the stability.
    ///
    /// The moderate rule is evaluated first; the high rule supersedes it.
    pub fn classify(avg_bpm: u16, stability: Stability) -> Self {
        let mut risk = RiskLevel::Normal;
        if avg_bpm > 100 || avg_bpm < 50 {
            risk = RiskLevel::Moderate;
        }
        if avg_bpm > 120 || avg_bpm < 40 || stability == Stability::Irregular {
            risk = risk.max(RiskLevel::High);
        }
        risk
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Normal => "Normal",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Confidence score for a capture: penalties stack, only the floor bounds it.
pub fn confidence_score(stability: Stability, sample_count: usize, window_samples: usize) -> u8 {
    let mut confidence = BASE_CONFIDENCE;
    if stability != Stability::Stable {
        confidence = confidence.saturating_sub(INSTABILITY_PENALTY);
    }
    if sample_count < window_samples {
        confidence = confidence.saturating_sub(INCOMPLETE_CAPTURE_PENALTY);
    }
    confidence.clamp(MIN_CONFIDENCE, BASE_CONFIDENCE)
}

/// Aggregated statistics of a finished buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub avg_bpm: u16,
    pub min_bpm: u16,
    pub max_bpm: u16,
    /// max - min
    pub spread: u16,
    /// Sample standard deviation, 0 for fewer than two samples
    pub std_dev: f64,
    pub sample_count: usize,
    pub stability: Stability,
    pub risk: RiskLevel,
    pub confidence: u8,
}

/// Aggregation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    /// No samples were captured during the window
    EmptyBuffer,
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::EmptyBuffer => write!(f, "No heart-rate samples were captured"),
        }
    }
}

impl std::error::Error for AggregateError {}

/// Summarize a finished buffer.
///
/// `window_samples` is the number of samples a complete capture holds; a
/// shorter buffer is penalized in the confidence score.
pub fn summarize(buffer: &[u16], window_samples: usize) -> Result<Summary, AggregateError> {
    let (Some(&min_bpm), Some(&max_bpm)) = (buffer.iter().min(), buffer.iter().max()) else {
        return Err(AggregateError::EmptyBuffer);
    };

    let values: Vec<f64> = buffer.iter().map(|&b| f64::from(b)).collect();
    let avg_bpm = values.iter().mean().round() as u16;
    let std_dev = if values.len() < 2 {
        0.0
    } else {
        values.iter().std_dev()
    };

    let spread = max_bpm - min_bpm;
    let stability = Stability::from_spread(spread);
    let risk = RiskLevel::classify(avg_bpm, stability);
    let confidence = confidence_score(stability, buffer.len(), window_samples);

    Ok(Summary {
        avg_bpm,
        min_bpm,
        max_bpm,
        spread,
        std_dev,
        sample_count: buffer.len(),
        stability,
        risk,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: usize = 15;

    #[test]
    fn test_steady_full_capture() {
        let buffer = [70, 72, 68, 74, 71, 70, 72, 69, 71, 73, 70, 72, 71, 70, 72];
        let summary = summarize(&buffer, WINDOW).unwrap();

        assert_eq!(summary.spread, 6);
        assert_eq!(summary.stability, Stability::Stable);
        assert_eq!(summary.risk, RiskLevel::Normal);
        assert_eq!(summary.confidence, 98);
        assert_eq!(summary.avg_bpm, 71);
        assert_eq!(summary.min_bpm, 68);
        assert_eq!(summary.max_bpm, 74);
        assert_eq!(summary.sample_count, 15);
    }

    #[test]
    fn test_short_irregular_capture() {
        let buffer = [60, 90, 70, 75, 80, 65, 85, 72, 78, 68];
        let summary = summarize(&buffer, WINDOW).unwrap();

        assert_eq!(summary.spread, 30);
        assert_eq!(summary.stability, Stability::Irregular);
        assert_eq!(summary.risk, RiskLevel::High);
        assert_eq!(summary.confidence, 63);
    }

    #[test]
    fn test_high_average_is_high_risk_regardless_of_stability() {
        let buffer = [130; 15];
        let summary = summarize(&buffer, WINDOW).unwrap();
        assert_eq!(summary.stability, Stability::Stable);
        assert_eq!(summary.risk, RiskLevel::High);

        assert_eq!(RiskLevel::classify(130, Stability::SlightlyIrregular), RiskLevel::High);
        assert_eq!(RiskLevel::classify(130, Stability::Irregular), RiskLevel::High);
    }

    #[test]
    fn test_moderate_band() {
        assert_eq!(RiskLevel::classify(105, Stability::Stable), RiskLevel::Moderate);
        assert_eq!(RiskLevel::classify(45, Stability::Stable), RiskLevel::Moderate);
        assert_eq!(RiskLevel::classify(100, Stability::Stable), RiskLevel::Normal);
        assert_eq!(RiskLevel::classify(50, Stability::Stable), RiskLevel::Normal);
        assert_eq!(RiskLevel::classify(39, Stability::Stable), RiskLevel::High);
        assert_eq!(RiskLevel::classify(121, Stability::Stable), RiskLevel::High);
    }

    #[test]
    fn test_stability_boundaries() {
        assert_eq!(Stability::from_spread(15), Stability::Stable);
        assert_eq!(Stability::from_spread(16), Stability::SlightlyIrregular);
        assert_eq!(Stability::from_spread(25), Stability::SlightlyIrregular);
        assert_eq!(Stability::from_spread(26), Stability::Irregular);
    }

    #[test]
    fn test_stability_monotonic_in_spread() {
        let mut previous = Stability::from_spread(0);
        for spread in 1..=190 {
            let current = Stability::from_spread(spread);
            assert!(current >= previous, "spread {spread} downgraded stability");
            previous = current;
        }
    }

    #[test]
    fn test_risk_escalation_monotonic() {
        let stabilities = [
            Stability::Stable,
            Stability::SlightlyIrregular,
            Stability::Irregular,
        ];
        for avg in 30..=220u16 {
            for (i, &stability) in stabilities.iter().enumerate() {
                let risk = RiskLevel::classify(avg, stability);
                if risk != RiskLevel::High {
                    continue;
                }
                // Less stable never downgrades.
                for &worse in &stabilities[i..] {
                    assert_eq!(RiskLevel::classify(avg, worse), RiskLevel::High);
                }
                // A more extreme average never downgrades.
                if avg > 120 {
                    for more in avg..=220 {
                        assert_eq!(RiskLevel::classify(more, stability), RiskLevel::High);
                    }
                }
                if avg < 40 {
                    for less in 30..=avg {
                        assert_eq!(RiskLevel::classify(less, stability), RiskLevel::High);
                    }
                }
            }
        }
    }

    #[test]
    fn test_confidence_bounds() {
        for stability in [
            Stability::Stable,
            Stability::SlightlyIrregular,
            Stability::Irregular,
        ] {
            for count in 0..=20 {
                let confidence = confidence_score(stability, count, WINDOW);
                assert!((MIN_CONFIDENCE..=BASE_CONFIDENCE).contains(&confidence));
            }
        }
        assert_eq!(confidence_score(Stability::SlightlyIrregular, 15, WINDOW), 83);
        assert_eq!(confidence_score(Stability::Stable, 3, WINDOW), 78);
    }

    #[test]
    fn test_min_avg_max_ordering() {
        let buffers: [&[u16]; 4] = [&[30], &[220, 30], &[99, 100, 101, 180], &[45, 46, 200, 201, 202]];
        for buffer in buffers {
            let summary = summarize(buffer, WINDOW).unwrap();
            assert!(summary.min_bpm <= summary.avg_bpm);
            assert!(summary.avg_bpm <= summary.max_bpm);
        }
    }

    #[test]
    fn test_average_rounds_half_up() {
        let summary = summarize(&[70, 71], WINDOW).unwrap();
        assert_eq!(summary.avg_bpm, 71);
    }

    #[test]
    fn test_std_dev() {
        let single = summarize(&[80], WINDOW).unwrap();
        assert_eq!(single.std_dev, 0.0);

        let pair = summarize(&[70, 80], WINDOW).unwrap();
        assert!((pair.std_dev - 7.0711).abs() < 0.001);
    }

    #[test]
    fn test_empty_buffer_rejected() {
        assert_eq!(summarize(&[], WINDOW), Err(AggregateError::EmptyBuffer));
    }
}
