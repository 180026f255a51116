//! Small value types shared by `recovery::engine` and its callers, plus the
//! component's `Default`-bearing configuration struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySessionConfig {
    pub session_ttl: Duration,
    pub max_attempts: u32,
    pub recovery_token_bytes: usize,
    pub idempotency_window: Duration,
}

impl Default for RecoverySessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            max_attempts: 5,
            recovery_token_bytes: 16,
            idempotency_window: Duration::from_secs(300),
        }
    }
}

/// What the client should do next after `continue_session` selects a
/// method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInstructions {
    pub method: String,
    pub step_index: usize,
    pub message: String,
}

/// Opaque token minted by `complete`, to be presented to a separate
/// password-reset endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryToken {
    pub token: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
