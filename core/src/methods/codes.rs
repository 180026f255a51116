//! Recovery codes (§4.F.1). Codes are shown once; only SHA-256 hashes are
//! ever persisted, split across two tables per the resolution of Open
//! Question #1 (SPEC_FULL.md §9): `IssuedCodeHash` records every code
//! generated for a user, `RecoveryCodeUsage` is the uniqueness-constrained
//! set of codes actually consumed.

use crate::audit::AuditLog;
use crate::error::{Error, Result};
use crate::methods::{advance_step, ensure_session_active, log_attempt, record_failure, MethodInput, MethodTag, VerificationMethod};
use crate::recovery::session::RecoverySession;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeAlphabet {
    Alphanumeric,
    Numeric,
    Hex,
}

impl CodeAlphabet {
    fn charset(&self) -> &'static [u8] {
        match self {
            CodeAlphabet::Alphanumeric => b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789",
            CodeAlphabet::Numeric => b"0123456789",
            CodeAlphabet::Hex => b"0123456789abcdef",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodesConfig {
    pub code_count: u32,
    pub code_length: usize,
    pub alphabet: CodeAlphabet,
}

impl Default for CodesConfig {
    fn default() -> Self {
        Self {
            code_count: 10,
            code_length: 10,
            alphabet: CodeAlphabet::Alphanumeric,
        }
    }
}

pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn generate_code(alphabet: CodeAlphabet, length: usize) -> String {
    let charset = alphabet.charset();
    let mut rng = OsRng;
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..charset.len());
            charset[idx] as char
        })
        .collect()
}

/// Generate `config.code_count` fresh codes. Callers must surface the raw
/// codes to the user exactly once and persist only their hashes via
/// [`CodesRepository::store_issued`].
///
/// `code_length == 0` or `code_count == 0` is a configuration error, not a
/// silent empty-code/empty-set result (SPEC_FULL.md §8).
pub fn generate_codes(config: &CodesConfig) -> Result<Vec<String>> {
    if config.code_length == 0 {
        return Err(Error::InvalidConfiguration("code_length must be greater than zero".to_string()));
    }
    if config.code_count == 0 {
        return Err(Error::InvalidConfiguration("code_count must be greater than zero".to_string()));
    }
    Ok((0..config.code_count)
        .map(|_| generate_code(config.alphabet, config.code_length))
        .collect())
}

#[async_trait]
pub trait CodesRepository: Send + Sync {
    /// Record that `hash` was issued to `user_key` at setup time.
    async fn store_issued(&self, user_key: &str, hash: &str) -> Result<()>;

    /// Whether `hash` was ever issued to `user_key`.
    async fn is_issued(&self, user_key: &str, hash: &str) -> Result<bool>;

    /// Attempt to consume `hash` for `user_key`. Returns `true` if this call
    /// consumed it, `false` if it was already consumed by a prior call
    /// (the uniqueness-constraint-violation case).
    async fn mark_used(&self, user_key: &str, hash: &str) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryCodesRepository {
    issued: Mutex<HashMap<String, HashSet<String>>>,
    used: Mutex<HashSet<String>>,
}

impl InMemoryCodesRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn composite_key(user_key: &str, hash: &str) -> String {
        format!("{user_key}:{hash}")
    }
}

#[async_trait]
impl CodesRepository for InMemoryCodesRepository {
    async fn store_issued(&self, user_key: &str, hash: &str) -> Result<()> {
        let mut issued = self.issued.lock().expect("codes repository lock poisoned");
        issued.entry(user_key.to_string()).or_default().insert(hash.to_string());
        Ok(())
    }

    async fn is_issued(&self, user_key: &str, hash: &str) -> Result<bool> {
        let issued = self.issued.lock().expect("codes repository lock poisoned");
        Ok(issued.get(user_key).map(|set| set.contains(hash)).unwrap_or(false))
    }

    async fn mark_used(&self, user_key: &str, hash: &str) -> Result<bool> {
        let mut used = self.used.lock().expect("codes repository lock poisoned");
        Ok(used.insert(Self::composite_key(user_key, hash)))
    }
}

/// SQLite-backed issued/used code tables, the persisted form of Open
/// Question #1's two-table resolution: `issued_code_hash` is written at
/// setup time, `recovery_code_usage` is uniqueness-constrained on
/// `(user_key, hash)` so a concurrent double-submit of the same code can
/// only consume it once.
pub struct SqliteCodesRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCodesRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS issued_code_hash (
                user_key TEXT NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (user_key, hash)
            );
            CREATE TABLE IF NOT EXISTS recovery_code_usage (
                user_key TEXT NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (user_key, hash)
            );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().expect("codes repository connection lock poisoned");
        Ok(f(&conn)?)
    }
}

#[async_trait]
impl CodesRepository for SqliteCodesRepository {
    async fn store_issued(&self, user_key: &str, hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO issued_code_hash (user_key, hash) VALUES (?1, ?2)",
                params![user_key, hash],
            )
        })?;
        Ok(())
    }

    async fn is_issued(&self, user_key: &str, hash: &str) -> Result<bool> {
        let found: Option<i64> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM issued_code_hash WHERE user_key = ?1 AND hash = ?2",
                params![user_key, hash],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(found.is_some())
    }

    async fn mark_used(&self, user_key: &str, hash: &str) -> Result<bool> {
        let inserted = self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO recovery_code_usage (user_key, hash) VALUES (?1, ?2)",
                params![user_key, hash],
            )
        })?;
        Ok(inserted == 1)
    }
}

pub struct RecoveryCodesMethod {
    repository: Arc<dyn CodesRepository>,
    audit: Arc<dyn AuditLog>,
}

impl RecoveryCodesMethod {
    pub fn new(repository: Arc<dyn CodesRepository>, audit: Arc<dyn AuditLog>) -> Self {
        Self { repository, audit }
    }

    /// Generate and persist a fresh code set for `user_key`, returning the
    /// raw codes to show the user once.
    pub async fn setup(&self, user_key: &str, config: &CodesConfig) -> Result<Vec<String>> {
        let codes = generate_codes(config)?;
        for code in &codes {
            self.repository.store_issued(user_key, &hash_code(code)).await?;
        }
        Ok(codes)
    }
}

#[async_trait]
impl VerificationMethod for RecoveryCodesMethod {
    fn tag(&self) -> MethodTag {
        MethodTag::Codes
    }

    #[tracing::instrument(skip(self, session, input), fields(session_id = %session.id))]
    async fn verify(&self, session: &mut RecoverySession, input: MethodInput) -> Result<()> {
        ensure_session_active(session)?;
        let code = match input {
            MethodInput::Code(code) => code,
            _ => return Err(Error::MissingField("code".to_string())),
        };

        let user_key = session.user_id.clone();
        let hash = hash_code(&code);
        let issued = self.repository.is_issued(&user_key, &hash).await?;
        if !issued {
            record_failure(session);
            log_attempt(&self.audit, session, self.tag(), false, Some("invalid_code")).await;
            return Err(Error::InvalidCode);
        }

        let consumed = self.repository.mark_used(&user_key, &hash).await?;
        if !consumed {
            log_attempt(&self.audit, session, self.tag(), false, Some("already_used")).await;
            return Err(Error::RecoveryCodeAlreadyUsed);
        }

        advance_step(session, self.tag());
        log_attempt(&self.audit, session, self.tag(), true, None).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::recovery::session::RecoverySession;
    use crate::tenant::TenantScope;

    fn session() -> RecoverySession {
        RecoverySession::new("user1", TenantScope::app("app1"), vec!["codes".to_string()])
    }

    #[test]
    fn generated_codes_match_requested_length_and_count() {
        let config = CodesConfig { code_count: 5, code_length: 8, alphabet: CodeAlphabet::Numeric };
        let codes = generate_codes(&config).unwrap();
        assert_eq!(codes.len(), 5);
        assert!(codes.iter().all(|c| c.len() == 8 && c.chars().all(|ch| ch.is_ascii_digit())));
    }

    #[test]
    fn zero_length_code_generation_is_an_error() {
        let config = CodesConfig { code_count: 5, code_length: 0, alphabet: CodeAlphabet::Numeric };
        let err = generate_codes(&config).unwrap_err();
        assert_eq!(err.code(), "invalid_configuration");
    }

    #[test]
    fn zero_count_code_generation_is_an_error() {
        let config = CodesConfig { code_count: 0, code_length: 8, alphabet: CodeAlphabet::Numeric };
        let err = generate_codes(&config).unwrap_err();
        assert_eq!(err.code(), "invalid_configuration");
    }

    #[tokio::test]
    async fn sqlite_repository_consumes_each_issued_code_exactly_once() {
        let repo = SqliteCodesRepository::in_memory().unwrap();
        repo.store_issued("user1", "hash-a").await.unwrap();
        assert!(repo.is_issued("user1", "hash-a").await.unwrap());
        assert!(!repo.is_issued("user1", "hash-b").await.unwrap());

        assert!(repo.mark_used("user1", "hash-a").await.unwrap());
        assert!(!repo.mark_used("user1", "hash-a").await.unwrap());
    }

    #[tokio::test]
    async fn a_valid_unused_code_completes_the_step() {
        let repo = Arc::new(InMemoryCodesRepository::new());
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let method = RecoveryCodesMethod::new(repo, audit);
        let config = CodesConfig::default();
        let codes = method.setup("user1", &config).await.unwrap();

        let mut session = session();
        method.verify(&mut session, MethodInput::Code(codes[0].clone())).await.unwrap();
        assert!(session.completed_steps.contains(&"codes".to_string()));
    }

    #[tokio::test]
    async fn a_reused_code_is_rejected() {
        let repo = Arc::new(InMemoryCodesRepository::new());
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let method = RecoveryCodesMethod::new(repo, audit);
        let codes = method.setup("user1", &CodesConfig::default()).await.unwrap();

        let mut session = session();
        method.verify(&mut session, MethodInput::Code(codes[0].clone())).await.unwrap();
        let mut second_session = session();
        let err = method.verify(&mut second_session, MethodInput::Code(codes[0].clone())).await.unwrap_err();
        assert_eq!(err.code(), "recovery_code_already_used");
    }

    #[tokio::test]
    async fn an_unissued_code_is_invalid() {
        let repo = Arc::new(InMemoryCodesRepository::new());
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let method = RecoveryCodesMethod::new(repo, audit);
        let mut session = session();
        let err = method.verify(&mut session, MethodInput::Code("bogus".to_string())).await.unwrap_err();
        assert_eq!(err.code(), "invalid_code");
        assert_eq!(session.attempts, 1);
    }
}
