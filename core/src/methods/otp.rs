//! Email / SMS one-time codes (§4.F.4). A numeric code is generated with
//! the CSPRNG, its hash stored scoped by `(user, app, org?, channel)`, and
//! compared in constant time on verification.

use crate::audit::AuditLog;
use crate::error::{Error, Result};
use crate::methods::{advance_step, ensure_session_active, log_attempt, record_failure, MethodInput, MethodTag, VerificationMethod};
use crate::providers::{EmailPort, SmsPort};
use crate::recovery::session::RecoverySession;
use crate::tenant::TenantScope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;
use subtle::ConstantTimeEq;

static E164_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("valid E.164 regex"));

pub fn validate_phone(phone: &str) -> Result<()> {
    if E164_PATTERN.is_match(phone) {
        Ok(())
    } else {
        Err(Error::InvalidPhoneNumber(phone.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpChannel {
    Email,
    Sms,
}

impl OtpChannel {
    fn as_str(&self) -> &'static str {
        match self {
            OtpChannel::Email => "email",
            OtpChannel::Sms => "sms",
        }
    }

    fn tag(&self) -> MethodTag {
        match self {
            OtpChannel::Email => MethodTag::Email,
            OtpChannel::Sms => MethodTag::Sms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    pub code_length: usize,
    pub expiry: Duration,
    pub max_attempts: u32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            expiry: Duration::from_secs(600),
            max_attempts: 5,
        }
    }
}

fn generate_numeric_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length).map(|_| rng.gen_range(0..10u8).to_string()).collect()
}

fn hash_otp(code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.finalize().into()
}

#[derive(Debug, Clone)]
struct OtpEntry {
    hash: [u8; 32],
    expires_at: DateTime<Utc>,
    attempts: u32,
}

fn otp_key(user_id: &str, tenant: &TenantScope, channel: OtpChannel) -> String {
    format!("{}:{}:{}", tenant.key_prefix(), user_id, channel.as_str())
}

#[async_trait]
pub trait OtpRepository: Send + Sync {
    async fn store(&self, key: &str, hash: [u8; 32], expires_at: DateTime<Utc>);
    async fn get(&self, key: &str) -> Option<(([u8; 32], DateTime<Utc>), u32)>;
    async fn increment_attempts(&self, key: &str);
    async fn consume(&self, key: &str);
}

#[derive(Default)]
pub struct InMemoryOtpRepository {
    entries: Mutex<HashMap<String, OtpEntry>>,
}

impl InMemoryOtpRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpRepository for InMemoryOtpRepository {
    async fn store(&self, key: &str, hash: [u8; 32], expires_at: DateTime<Utc>) {
        self.entries
            .lock()
            .expect("otp repository lock poisoned")
            .insert(key.to_string(), OtpEntry { hash, expires_at, attempts: 0 });
    }

    async fn get(&self, key: &str) -> Option<(([u8; 32], DateTime<Utc>), u32)> {
        self.entries
            .lock()
            .expect("otp repository lock poisoned")
            .get(key)
            .map(|e| ((e.hash, e.expires_at), e.attempts))
    }

    async fn increment_attempts(&self, key: &str) {
        if let Some(entry) = self.entries.lock().expect("otp repository lock poisoned").get_mut(key) {
            entry.attempts += 1;
        }
    }

    async fn consume(&self, key: &str) {
        self.entries.lock().expect("otp repository lock poisoned").remove(key);
    }
}

pub struct OtpMethod {
    channel: OtpChannel,
    repository: Arc<dyn OtpRepository>,
    email: Option<Arc<dyn EmailPort>>,
    sms: Option<Arc<dyn SmsPort>>,
    audit: Arc<dyn AuditLog>,
    config: OtpConfig,
}

impl OtpMethod {
    pub fn email(repository: Arc<dyn OtpRepository>, email: Arc<dyn EmailPort>, audit: Arc<dyn AuditLog>, config: OtpConfig) -> Self {
        Self { channel: OtpChannel::Email, repository, email: Some(email), sms: None, audit, config }
    }

    pub fn sms(repository: Arc<dyn OtpRepository>, sms: Arc<dyn SmsPort>, audit: Arc<dyn AuditLog>, config: OtpConfig) -> Self {
        Self { channel: OtpChannel::Sms, repository, email: None, sms: Some(sms), audit, config }
    }

    #[tracing::instrument(skip(self, destination), fields(channel = ?self.channel))]
    pub async fn send(&self, user_id: &str, tenant: &TenantScope, destination: &str) -> Result<()> {
        if self.channel == OtpChannel::Sms {
            validate_phone(destination)?;
        }
        let code = generate_numeric_code(self.config.code_length);
        let expires_at = Utc::now() + chrono::Duration::from_std(self.config.expiry).unwrap_or_default();
        let key = otp_key(user_id, tenant, self.channel);
        self.repository.store(&key, hash_otp(&code), expires_at).await;

        match self.channel {
            OtpChannel::Email => {
                let port = self.email.as_ref().ok_or_else(|| Error::ProviderNotConfigured("email".to_string()))?;
                port.send_verification_email(destination, &code, expires_at).await
            }
            OtpChannel::Sms => {
                let port = self.sms.as_ref().ok_or_else(|| Error::ProviderNotConfigured("sms".to_string()))?;
                port.send_verification_sms(destination, &code, expires_at).await
            }
        }
    }
}

#[async_trait]
impl VerificationMethod for OtpMethod {
    fn tag(&self) -> MethodTag {
        self.channel.tag()
    }

    #[tracing::instrument(skip(self, session, input), fields(session_id = %session.id))]
    async fn verify(&self, session: &mut RecoverySession, input: MethodInput) -> Result<()> {
        ensure_session_active(session)?;
        let code = match input {
            MethodInput::OtpCode(code) => code,
            _ => return Err(Error::MissingField("code".to_string())),
        };

        let key = otp_key(&session.user_id, &session.tenant, self.channel);
        let Some(((stored_hash, expires_at), attempts)) = self.repository.get(&key).await else {
            record_failure(session);
            log_attempt(&self.audit, session, self.tag(), false, Some("not_found")).await;
            return Err(Error::InvalidCode);
        };

        if attempts >= self.config.max_attempts {
            return Err(Error::TooManyAttempts);
        }
        if Utc::now() > expires_at {
            record_failure(session);
            log_attempt(&self.audit, session, self.tag(), false, Some("expired")).await;
            return Err(Error::InvalidCode);
        }

        let submitted_hash = hash_otp(&code);
        if bool::from(submitted_hash.ct_eq(&stored_hash)) {
            self.repository.consume(&key).await;
            advance_step(session, self.tag());
            log_attempt(&self.audit, session, self.tag(), true, None).await;
            Ok(())
        } else {
            self.repository.increment_attempts(&key).await;
            record_failure(session);
            log_attempt(&self.audit, session, self.tag(), false, Some("mismatch")).await;
            Err(Error::InvalidCode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::providers::noop::{LoggingEmailPort, LoggingSmsPort};

    #[test]
    fn e164_validation_accepts_and_rejects() {
        assert!(validate_phone("+15551234567").is_ok());
        assert!(validate_phone("5551234567").is_err());
        assert!(validate_phone("+0123").is_err());
    }

    #[tokio::test]
    async fn correct_code_completes_the_step() {
        let repo = Arc::new(InMemoryOtpRepository::new());
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let method = OtpMethod::email(repo.clone(), Arc::new(LoggingEmailPort), audit, OtpConfig::default());

        let tenant = TenantScope::app("app1");
        method.send("user1", &tenant, "user1@example.com").await.unwrap();
        let key = otp_key("user1", &tenant, OtpChannel::Email);
        let (_, _) = repo.get(&key).await.unwrap();

        // Re-derive the code is not possible from the hash; exercise the
        // repository directly to simulate the client round-trip.
        let mut session = RecoverySession::new("user1", tenant, vec!["email".to_string()]);
        // Force a known code for the assertion by writing it back through store().
        let known_code = "123456";
        repo.store(&key, hash_otp(known_code), Utc::now() + chrono::Duration::seconds(60)).await;
        method.verify(&mut session, MethodInput::OtpCode(known_code.to_string())).await.unwrap();
        assert!(session.completed_steps.contains(&"email".to_string()));
    }

    #[tokio::test]
    async fn wrong_code_increments_attempts_and_session_attempts() {
        let repo = Arc::new(InMemoryOtpRepository::new());
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let method = OtpMethod::sms(repo.clone(), Arc::new(LoggingSmsPort), audit, OtpConfig::default());
        let tenant = TenantScope::app("app1");
        let key = otp_key("user1", &tenant, OtpChannel::Sms);
        repo.store(&key, hash_otp("000000"), Utc::now() + chrono::Duration::seconds(60)).await;

        let mut session = RecoverySession::new("user1", tenant, vec!["sms".to_string()]);
        let err = method.verify(&mut session, MethodInput::OtpCode("999999".to_string())).await.unwrap_err();
        assert_eq!(err.code(), "invalid_code");
        assert_eq!(session.attempts, 1);
    }
}
