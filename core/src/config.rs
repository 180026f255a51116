//! Immutable startup configuration: one struct per component, aggregated
//! into `WardlineConfig` and held behind `Arc` by every component. No
//! hot-reload; "replaced atomically" means swapping the `Arc` wholesale.

use crate::methods::{CodesConfig, ContactsConfig, OtpConfig, QuestionsConfig};
use crate::policy::{CompilerConfig, EvaluatorConfig};
use crate::ratelimit::RateLimitConfig;
use crate::recovery::RecoverySessionConfig;
use crate::risk::RiskScorerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration aggregate, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardlineConfig {
    pub recovery: RecoverySessionConfig,
    pub risk: RiskScorerConfig,
    pub rate_limit: RateLimitConfig,
    pub evaluator: EvaluatorConfig,
    pub compiler: CompilerConfig,
    pub methods: MethodConfig,
    pub attribute_cache_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for WardlineConfig {
    fn default() -> Self {
        Self {
            recovery: RecoverySessionConfig::default(),
            risk: RiskScorerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            evaluator: EvaluatorConfig::default(),
            compiler: CompilerConfig::default(),
            methods: MethodConfig::default(),
            attribute_cache_ttl_secs: 300,
            sweep_interval_secs: 3600,
        }
    }
}

impl WardlineConfig {
    pub fn attribute_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.attribute_cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Per-verification-method configuration, aggregated here so the recovery
/// engine and the sub-protocols share one source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodConfig {
    pub codes: CodesConfig,
    pub questions: QuestionsConfig,
    pub contacts: ContactsConfig,
    pub otp: OtpConfig,
}

impl Default for MethodConfig {
    fn default() -> Self {
        Self {
            codes: CodesConfig::default(),
            questions: QuestionsConfig::default(),
            contacts: ContactsConfig::default(),
            otp: OtpConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = WardlineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WardlineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.recovery.max_attempts, config.recovery.max_attempts);
    }

    #[test]
    fn attribute_cache_ttl_matches_spec_default() {
        let config = WardlineConfig::default();
        assert_eq!(config.attribute_cache_ttl(), Duration::from_secs(300));
    }
}
