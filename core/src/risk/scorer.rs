//! Weighted-signal risk scoring (§4.E), following the same
//! additive-signal-then-threshold idiom the policy complexity estimator
//! uses: normalise each signal to `[0, 1]`, weight it, sum, map the sum to
//! a band via configured thresholds.

use serde::{Deserialize, Serialize};

/// Raw, already-normalised inputs to the scorer. Callers (the recovery
/// engine) are responsible for turning device/location/IP history into
/// these booleans and ratios before calling [`RiskScorer::score`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiskSignals {
    pub new_device: bool,
    pub new_location: bool,
    pub new_ip: bool,
    pub recent_failure_count: u32,
    pub velocity_cap: u32,
    pub rolling_failure_ratio: f64,
}

impl RiskSignals {
    fn velocity(&self) -> f64 {
        if self.velocity_cap == 0 {
            return 0.0;
        }
        (self.recent_failure_count as f64 / self.velocity_cap as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { low: 30.0, medium: 60.0, high: 80.0 }
    }
}

impl RiskThresholds {
    fn band(&self, score: f64) -> RiskBand {
        if score < self.low {
            RiskBand::Low
        } else if score < self.medium {
            RiskBand::Medium
        } else {
            RiskBand::High
        }
    }
}

/// Required verification step tags for each band. Missing entries (an
/// empty vec, or one shorter than `minimum_steps`) are padded out from
/// [`RiskScorerConfig::fallback_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsByBand {
    pub low: Vec<String>,
    pub medium: Vec<String>,
    pub high: Vec<String>,
}

impl Default for StepsByBand {
    fn default() -> Self {
        Self {
            low: vec!["codes".to_string()],
            medium: vec!["codes".to_string(), "email".to_string()],
            high: vec![
                "codes".to_string(),
                "email".to_string(),
                "sms".to_string(),
            ],
        }
    }
}

impl StepsByBand {
    fn for_band(&self, band: RiskBand) -> &[String] {
        match band {
            RiskBand::Low => &self.low,
            RiskBand::Medium => &self.medium,
            RiskBand::High => &self.high,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScorerConfig {
    pub thresholds: RiskThresholds,
    pub steps_by_band: StepsByBand,
    pub minimum_steps: usize,
    pub require_review_above: f64,
    pub fallback_order: Vec<String>,
}

impl Default for RiskScorerConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            steps_by_band: StepsByBand::default(),
            minimum_steps: 1,
            require_review_above: 85.0,
            fallback_order: vec![
                "codes".to_string(),
                "security_questions".to_string(),
                "email".to_string(),
                "sms".to_string(),
                "trusted_contact".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub score: f64,
    pub band: RiskBand,
    pub required_steps: Vec<String>,
    pub requires_review: bool,
}

const WEIGHT_NEW_DEVICE: f64 = 0.25;
const WEIGHT_NEW_LOCATION: f64 = 0.20;
const WEIGHT_NEW_IP: f64 = 0.15;
const WEIGHT_VELOCITY: f64 = 0.20;
const WEIGHT_HISTORY: f64 = 0.20;

pub struct RiskScorer {
    config: RiskScorerConfig,
}

impl RiskScorer {
    pub fn new(config: RiskScorerConfig) -> Self {
        Self { config }
    }

    /// Weighted sum of normalised sub-signals, scaled into `[0, 100]`.
    pub fn score(&self, signals: &RiskSignals) -> f64 {
        let raw = WEIGHT_NEW_DEVICE * signals.new_device as u8 as f64
            + WEIGHT_NEW_LOCATION * signals.new_location as u8 as f64
            + WEIGHT_NEW_IP * signals.new_ip as u8 as f64
            + WEIGHT_VELOCITY * signals.velocity()
            + WEIGHT_HISTORY * signals.rolling_failure_ratio.clamp(0.0, 1.0);
        (raw * 100.0).clamp(0.0, 100.0)
    }

    pub fn band(&self, score: f64) -> RiskBand {
        self.config.thresholds.band(score)
    }

    pub fn requires_review(&self, score: f64) -> bool {
        score > self.config.require_review_above
    }

    /// Required step tags for `band`, padded from the fallback order if
    /// shorter than `minimum_steps`.
    pub fn required_steps(&self, band: RiskBand) -> Vec<String> {
        let mut steps: Vec<String> = self.config.steps_by_band.for_band(band).to_vec();
        if steps.len() < self.config.minimum_steps {
            for candidate in &self.config.fallback_order {
                if steps.len() >= self.config.minimum_steps {
                    break;
                }
                if !steps.contains(candidate) {
                    steps.push(candidate.clone());
                }
            }
        }
        steps
    }

    #[tracing::instrument(skip(self, signals))]
    pub fn assess(&self, signals: &RiskSignals) -> RiskAssessment {
        let score = self.score(signals);
        let band = self.band(score);
        let required_steps = self.required_steps(band);
        let requires_review = self.requires_review(score);
        tracing::debug!(score, %band, requires_review, "risk assessed");
        RiskAssessment { score, band, required_steps, requires_review }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_clear_signals_score_zero_and_band_low() {
        let scorer = RiskScorer::new(RiskScorerConfig::default());
        let signals = RiskSignals::default();
        assert_eq!(scorer.score(&signals), 0.0);
        assert_eq!(scorer.band(0.0), RiskBand::Low);
    }

    #[test]
    fn every_signal_present_maxes_the_score() {
        let scorer = RiskScorer::new(RiskScorerConfig::default());
        let signals = RiskSignals {
            new_device: true,
            new_location: true,
            new_ip: true,
            recent_failure_count: 10,
            velocity_cap: 10,
            rolling_failure_ratio: 1.0,
        };
        assert_eq!(scorer.score(&signals), 100.0);
        assert_eq!(scorer.band(100.0), RiskBand::High);
    }

    #[test]
    fn above_review_threshold_requires_review() {
        let scorer = RiskScorer::new(RiskScorerConfig::default());
        assert!(scorer.requires_review(90.0));
        assert!(!scorer.requires_review(50.0));
    }

    #[test]
    fn required_steps_padded_to_minimum_from_fallback_order() {
        let config = RiskScorerConfig {
            minimum_steps: 3,
            steps_by_band: StepsByBand {
                low: vec!["codes".to_string()],
                ..StepsByBand::default()
            },
            ..RiskScorerConfig::default()
        };
        let scorer = RiskScorer::new(config);
        let steps = scorer.required_steps(RiskBand::Low);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], "codes");
    }
}
