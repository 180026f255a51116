//! Trusted contacts (§4.F.3). A verified contact receives a one-time
//! approval token out-of-band (via `NotificationPort`); presenting that
//! token back through [`TrustedContactMethod::verify`] advances the step.

use crate::audit::AuditLog;
use crate::error::{Error, Result};
use crate::methods::{advance_step, ensure_session_active, log_attempt, record_failure, MethodInput, MethodTag, VerificationMethod};
use crate::providers::{NotificationEvent, NotificationPort};
use crate::recovery::session::RecoverySession;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactsConfig {
    pub maximum_contacts: u32,
    pub cooldown_period: Duration,
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            maximum_contacts: 5,
            cooldown_period: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedContact {
    pub id: String,
    pub destination: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl TrustedContact {
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Option<Duration> {
        let last = self.last_notified_at?;
        let cooldown = chrono::Duration::from_std(cooldown).unwrap_or_default();
        let ready_at = last + cooldown;
        if ready_at > now {
            (ready_at - now).to_std().ok()
        } else {
            None
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[async_trait]
pub trait ContactsRepository: Send + Sync {
    async fn list(&self, user_key: &str) -> Result<Vec<TrustedContact>>;
    async fn add(&self, user_key: &str, contact: TrustedContact, config: &ContactsConfig) -> Result<()>;
    async fn mark_notified(&self, user_key: &str, contact_id: &str, now: DateTime<Utc>) -> Result<()>;
    async fn issue_token(&self, session_id: Uuid, contact_id: &str, token: &str) -> Result<()>;
    async fn consume_token(&self, token: &str) -> Result<Option<(Uuid, String)>>;
}

#[derive(Default)]
pub struct InMemoryContactsRepository {
    contacts: Mutex<HashMap<String, Vec<TrustedContact>>>,
    tokens: Mutex<HashMap<String, (Uuid, String)>>,
}

impl InMemoryContactsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactsRepository for InMemoryContactsRepository {
    async fn list(&self, user_key: &str) -> Result<Vec<TrustedContact>> {
        Ok(self.contacts.lock().expect("contacts repository lock poisoned").get(user_key).cloned().unwrap_or_default())
    }

    async fn add(&self, user_key: &str, contact: TrustedContact, config: &ContactsConfig) -> Result<()> {
        let mut contacts = self.contacts.lock().expect("contacts repository lock poisoned");
        let list = contacts.entry(user_key.to_string()).or_default();
        if list.len() as u32 >= config.maximum_contacts {
            return Err(Error::LimitExceeded("maximum trusted contacts reached".to_string()));
        }
        list.push(contact);
        Ok(())
    }

    async fn mark_notified(&self, user_key: &str, contact_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut contacts = self.contacts.lock().expect("contacts repository lock poisoned");
        if let Some(list) = contacts.get_mut(user_key) {
            if let Some(contact) = list.iter_mut().find(|c| c.id == contact_id) {
                contact.last_notified_at = Some(now);
            }
        }
        Ok(())
    }

    async fn issue_token(&self, session_id: Uuid, contact_id: &str, token: &str) -> Result<()> {
        self.tokens
            .lock()
            .expect("contacts repository lock poisoned")
            .insert(token.to_string(), (session_id, contact_id.to_string()));
        Ok(())
    }

    async fn consume_token(&self, token: &str) -> Result<Option<(Uuid, String)>> {
        Ok(self.tokens.lock().expect("contacts repository lock poisoned").remove(token))
    }
}

/// SQLite-backed store: one table for the contact roster, one for
/// outstanding single-use approval tokens (deleted on consumption).
pub struct SqliteContactsRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContactsRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trusted_contact (
                user_key TEXT NOT NULL,
                id TEXT NOT NULL,
                destination TEXT NOT NULL,
                verified_at TEXT,
                last_notified_at TEXT,
                PRIMARY KEY (user_key, id)
            );
            CREATE TABLE IF NOT EXISTS trusted_contact_token (
                token TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                contact_id TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().expect("contacts repository connection lock poisoned");
        Ok(f(&conn)?)
    }
}

#[async_trait]
impl ContactsRepository for SqliteContactsRepository {
    async fn list(&self, user_key: &str) -> Result<Vec<TrustedContact>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, destination, verified_at, last_notified_at
                 FROM trusted_contact WHERE user_key = ?1",
            )?;
            let rows = stmt.query_map(params![user_key], |row| {
                let verified_at: Option<String> = row.get(2)?;
                let last_notified_at: Option<String> = row.get(3)?;
                Ok(TrustedContact {
                    id: row.get(0)?,
                    destination: row.get(1)?,
                    verified_at: verified_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
                    last_notified_at: last_notified_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    async fn add(&self, user_key: &str, contact: TrustedContact, config: &ContactsConfig) -> Result<()> {
        let count: u32 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM trusted_contact WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
        })?;
        if count >= config.maximum_contacts {
            return Err(Error::LimitExceeded("maximum trusted contacts reached".to_string()));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO trusted_contact (user_key, id, destination, verified_at, last_notified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_key,
                    contact.id,
                    contact.destination,
                    contact.verified_at.map(|ts| ts.to_rfc3339()),
                    contact.last_notified_at.map(|ts| ts.to_rfc3339()),
                ],
            )
        })?;
        Ok(())
    }

    async fn mark_notified(&self, user_key: &str, contact_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE trusted_contact SET last_notified_at = ?1 WHERE user_key = ?2 AND id = ?3",
                params![now.to_rfc3339(), user_key, contact_id],
            )
        })?;
        Ok(())
    }

    async fn issue_token(&self, session_id: Uuid, contact_id: &str, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO trusted_contact_token (token, session_id, contact_id) VALUES (?1, ?2, ?3)",
                params![token, session_id.to_string(), contact_id],
            )
        })?;
        Ok(())
    }

    async fn consume_token(&self, token: &str) -> Result<Option<(Uuid, String)>> {
        let row: Option<(String, String)> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT session_id, contact_id FROM trusted_contact_token WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;
        let Some((session_id, contact_id)) = row else {
            return Ok(None);
        };
        self.with_conn(|conn| conn.execute("DELETE FROM trusted_contact_token WHERE token = ?1", params![token]))?;
        let session_id = session_id.parse().map_err(|_| Error::MalformedSessionId(session_id))?;
        Ok(Some((session_id, contact_id)))
    }
}

pub struct TrustedContactMethod {
    repository: Arc<dyn ContactsRepository>,
    notification: Arc<dyn NotificationPort>,
    audit: Arc<dyn AuditLog>,
    config: ContactsConfig,
}

impl TrustedContactMethod {
    pub fn new(
        repository: Arc<dyn ContactsRepository>,
        notification: Arc<dyn NotificationPort>,
        audit: Arc<dyn AuditLog>,
        config: ContactsConfig,
    ) -> Self {
        Self { repository, notification, audit, config }
    }

    /// Send a one-time approval request to `contact_id`, subject to the
    /// per-contact cooldown.
    #[tracing::instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn request_approval(&self, session: &RecoverySession, contact_id: &str) -> Result<()> {
        let user_key = session.user_id.clone();
        let contacts = self.repository.list(&user_key).await?;
        let contact = contacts
            .iter()
            .find(|c| c.id == contact_id && c.is_verified())
            .ok_or_else(|| Error::MissingField("verified trusted contact".to_string()))?;

        let now = Utc::now();
        if let Some(remaining) = contact.cooldown_remaining(now, self.config.cooldown_period) {
            tracing::debug!(remaining_secs = remaining.as_secs(), "trusted contact cooldown active");
            return Err(Error::CooldownActive);
        }

        let token = generate_token();
        self.repository.issue_token(session.id, contact_id, &token).await?;
        self.repository.mark_notified(&user_key, contact_id, now).await?;
        self.notification
            .notify(NotificationEvent::TrustedContactApprovalRequested {
                contact_destination: &contact.destination,
                session_id: session.id,
                token: &token,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VerificationMethod for TrustedContactMethod {
    fn tag(&self) -> MethodTag {
        MethodTag::TrustedContact
    }

    #[tracing::instrument(skip(self, session, input), fields(session_id = %session.id))]
    async fn verify(&self, session: &mut RecoverySession, input: MethodInput) -> Result<()> {
        ensure_session_active(session)?;
        let token = match input {
            MethodInput::ContactApproval { token, .. } => token,
            _ => return Err(Error::MissingField("approval token".to_string())),
        };

        match self.repository.consume_token(&token).await? {
            Some((session_id, _contact_id)) if session_id == session.id => {
                advance_step(session, self.tag());
                log_attempt(&self.audit, session, self.tag(), true, None).await;
                Ok(())
            }
            _ => {
                record_failure(session);
                log_attempt(&self.audit, session, self.tag(), false, Some("invalid_approval_token")).await;
                Err(Error::InvalidCode)
            }
        }
    }
}
