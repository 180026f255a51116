//! Risk scoring (§4.E): maps account-recovery attempt signals to a band
//! and a required-step set.

pub mod scorer;

pub use scorer::{RiskAssessment, RiskBand, RiskScorer, RiskScorerConfig, RiskSignals, RiskThresholds, StepsByBand};
