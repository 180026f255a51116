//! Security questions (§4.F.2). Answers are normalised, checked against a
//! small blacklist, then salted and hashed with Argon2id; verification
//! uses Argon2's constant-time comparison. Storage is behind a
//! [`QuestionsRepository`] trait object, mirroring `methods::codes`'s
//! repository split.

use crate::audit::AuditLog;
use crate::error::{Error, Result};
use crate::methods::{advance_step, ensure_session_active, log_attempt, record_failure, MethodInput, MethodTag, VerificationMethod};
use crate::recovery::session::RecoverySession;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BLACKLISTED_ANSWERS: &[&str] = &["password", "123456", "none", "n/a", "idk", "test"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsConfig {
    pub minimum_questions: u32,
    pub required_to_recover: u32,
    pub case_sensitive: bool,
    pub min_answer_length: usize,
    pub max_attempts: u32,
    pub lockout_duration: Duration,
}

impl Default for QuestionsConfig {
    fn default() -> Self {
        Self {
            minimum_questions: 3,
            required_to_recover: 2,
            case_sensitive: false,
            min_answer_length: 2,
            max_attempts: 5,
            lockout_duration: Duration::from_secs(900),
        }
    }
}

fn normalize(answer: &str, case_sensitive: bool) -> String {
    let trimmed = answer.trim();
    if case_sensitive {
        trimmed.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Validate a candidate answer at setup time, before it is hashed.
pub fn validate_answer(answer: &str, config: &QuestionsConfig) -> Result<()> {
    let normalized = normalize(answer, config.case_sensitive);
    if normalized.len() < config.min_answer_length {
        return Err(Error::InvalidConfiguration("answer too short".to_string()));
    }
    if BLACKLISTED_ANSWERS.contains(&normalized.as_str()) {
        return Err(Error::InvalidConfiguration("answer is too common".to_string()));
    }
    Ok(())
}

pub fn hash_answer(answer: &str, config: &QuestionsConfig) -> Result<String> {
    let normalized = normalize(answer, config.case_sensitive);
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::EncryptionFailure(e.to_string()))
}

fn verify_answer(answer: &str, stored_hash: &str, config: &QuestionsConfig) -> bool {
    let normalized = normalize(answer, config.case_sensitive);
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default().verify_password(normalized.as_bytes(), &parsed).is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityQuestion {
    pub id: String,
    pub prompt: String,
    pub answer_hash: String,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl SecurityQuestion {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Count how many submitted `{question_id: answer}` pairs match the stored
/// hashes for `questions`, skipping any question currently locked out.
pub fn score_answers(
    submitted: &HashMap<String, String>,
    questions: &[SecurityQuestion],
    config: &QuestionsConfig,
    now: DateTime<Utc>,
) -> (u32, HashSet<String>) {
    let mut correct = 0;
    let mut wrong_ids = HashSet::new();
    for question in questions {
        if question.is_locked(now) {
            continue;
        }
        match submitted.get(&question.id) {
            Some(answer) if verify_answer(answer, &question.answer_hash, config) => correct += 1,
            Some(_) => {
                wrong_ids.insert(question.id.clone());
            }
            None => {}
        }
    }
    (correct, wrong_ids)
}

#[async_trait]
pub trait QuestionsRepository: Send + Sync {
    async fn get_questions(&self, user_key: &str) -> Result<Vec<SecurityQuestion>>;
    async fn record_wrong_answer(&self, user_key: &str, question_id: &str, now: DateTime<Utc>, config: &QuestionsConfig) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryQuestionsRepository {
    questions: Mutex<HashMap<String, Vec<SecurityQuestion>>>,
}

impl InMemoryQuestionsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_questions(&self, user_key: &str, questions: Vec<SecurityQuestion>) {
        self.questions.lock().expect("questions repository lock poisoned").insert(user_key.to_string(), questions);
    }
}

#[async_trait]
impl QuestionsRepository for InMemoryQuestionsRepository {
    async fn get_questions(&self, user_key: &str) -> Result<Vec<SecurityQuestion>> {
        Ok(self
            .questions
            .lock()
            .expect("questions repository lock poisoned")
            .get(user_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_wrong_answer(&self, user_key: &str, question_id: &str, now: DateTime<Utc>, config: &QuestionsConfig) -> Result<()> {
        let mut questions = self.questions.lock().expect("questions repository lock poisoned");
        if let Some(list) = questions.get_mut(user_key) {
            if let Some(question) = list.iter_mut().find(|q| q.id == question_id) {
                question.failed_attempts += 1;
                if question.failed_attempts >= config.max_attempts {
                    question.locked_until = Some(now + chrono::Duration::from_std(config.lockout_duration).unwrap_or_default());
                }
            }
        }
        Ok(())
    }
}

/// SQLite-backed store, one row per `(user_key, question_id)` — at most one
/// record per pair, per §3's `SecurityQuestion` uniqueness constraint.
pub struct SqliteQuestionsRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQuestionsRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS security_question (
                user_key TEXT NOT NULL,
                question_id TEXT NOT NULL,
                prompt TEXT NOT NULL,
                answer_hash TEXT NOT NULL,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                locked_until TEXT,
                PRIMARY KEY (user_key, question_id)
            );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().expect("questions repository connection lock poisoned");
        Ok(f(&conn)?)
    }

    /// Insert or replace a question record for `user_key`, used at setup time.
    pub fn set_question(&self, user_key: &str, question: &SecurityQuestion) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO security_question
                 (user_key, question_id, prompt, answer_hash, failed_attempts, locked_until)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user_key,
                    question.id,
                    question.prompt,
                    question.answer_hash,
                    question.failed_attempts,
                    question.locked_until.map(|ts| ts.to_rfc3339()),
                ],
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl QuestionsRepository for SqliteQuestionsRepository {
    async fn get_questions(&self, user_key: &str) -> Result<Vec<SecurityQuestion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT question_id, prompt, answer_hash, failed_attempts, locked_until
                 FROM security_question WHERE user_key = ?1",
            )?;
            let rows = stmt.query_map(params![user_key], |row| {
                let locked_until: Option<String> = row.get(4)?;
                Ok(SecurityQuestion {
                    id: row.get(0)?,
                    prompt: row.get(1)?,
                    answer_hash: row.get(2)?,
                    failed_attempts: row.get(3)?,
                    locked_until: locked_until.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    async fn record_wrong_answer(&self, user_key: &str, question_id: &str, now: DateTime<Utc>, config: &QuestionsConfig) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE security_question SET failed_attempts = failed_attempts + 1
                 WHERE user_key = ?1 AND question_id = ?2",
                params![user_key, question_id],
            )
        })?;
        let failed_attempts: u32 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT failed_attempts FROM security_question WHERE user_key = ?1 AND question_id = ?2",
                params![user_key, question_id],
                |row| row.get(0),
            )
        })?;
        if failed_attempts >= config.max_attempts {
            let locked_until = now + chrono::Duration::from_std(config.lockout_duration).unwrap_or_default();
            self.with_conn(|conn| {
                conn.execute(
                    "UPDATE security_question SET locked_until = ?1 WHERE user_key = ?2 AND question_id = ?3",
                    params![locked_until.to_rfc3339(), user_key, question_id],
                )
            })?;
        }
        Ok(())
    }
}

pub struct SecurityQuestionsMethod {
    repository: Arc<dyn QuestionsRepository>,
    audit: Arc<dyn AuditLog>,
    config: QuestionsConfig,
}

impl SecurityQuestionsMethod {
    pub fn new(repository: Arc<dyn QuestionsRepository>, audit: Arc<dyn AuditLog>, config: QuestionsConfig) -> Self {
        Self { repository, audit, config }
    }
}

#[async_trait]
impl VerificationMethod for SecurityQuestionsMethod {
    fn tag(&self) -> MethodTag {
        MethodTag::SecurityQuestions
    }

    #[tracing::instrument(skip(self, session, input), fields(session_id = %session.id))]
    async fn verify(&self, session: &mut RecoverySession, input: MethodInput) -> Result<()> {
        ensure_session_active(session)?;
        let answers = match input {
            MethodInput::Answers(answers) => answers,
            _ => return Err(Error::MissingField("answers".to_string())),
        };

        let user_key = session.user_id.clone();
        let questions = self.repository.get_questions(&user_key).await?;
        if (questions.len() as u32) < self.config.minimum_questions {
            return Err(Error::InsufficientSecurityQuestions {
                have: questions.len() as u32,
                need: self.config.minimum_questions,
            });
        }

        let now = Utc::now();
        let (correct, wrong_ids) = score_answers(&answers, &questions, &self.config, now);
        for question_id in &wrong_ids {
            self.repository.record_wrong_answer(&user_key, question_id, now, &self.config).await?;
        }

        if correct >= self.config.required_to_recover {
            advance_step(session, self.tag());
            log_attempt(&self.audit, session, self.tag(), true, None).await;
            Ok(())
        } else {
            record_failure(session);
            log_attempt(&self.audit, session, self.tag(), false, Some("insufficient_correct_answers")).await;
            Err(Error::InsufficientCorrectAnswers {
                correct,
                required: self.config.required_to_recover,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::tenant::TenantScope;

    fn make_question(id: &str, answer: &str, config: &QuestionsConfig) -> SecurityQuestion {
        SecurityQuestion {
            id: id.to_string(),
            prompt: "prompt".to_string(),
            answer_hash: hash_answer(answer, config).unwrap(),
            failed_attempts: 0,
            locked_until: None,
        }
    }

    #[test]
    fn blacklisted_answers_are_rejected() {
        let config = QuestionsConfig::default();
        assert!(validate_answer("password", &config).is_err());
        assert!(validate_answer("my childhood pet", &config).is_ok());
    }

    #[test]
    fn hashed_answer_verifies_case_insensitively_by_default() {
        let config = QuestionsConfig::default();
        let hash = hash_answer("Fluffy", &config).unwrap();
        assert!(verify_answer("fluffy", &hash, &config));
        assert!(!verify_answer("rex", &hash, &config));
    }

    #[tokio::test]
    async fn sqlite_repository_locks_a_question_after_max_attempts() {
        let config = QuestionsConfig { max_attempts: 2, ..QuestionsConfig::default() };
        let repo = SqliteQuestionsRepository::in_memory().unwrap();
        repo.set_question("user1", &make_question("q1", "blue", &config)).unwrap();

        let now = Utc::now();
        repo.record_wrong_answer("user1", "q1", now, &config).await.unwrap();
        let questions = repo.get_questions("user1").await.unwrap();
        assert!(!questions[0].is_locked(now));

        repo.record_wrong_answer("user1", "q1", now, &config).await.unwrap();
        let questions = repo.get_questions("user1").await.unwrap();
        assert!(questions[0].is_locked(now));
    }

    #[tokio::test]
    async fn enough_correct_answers_completes_the_step() {
        let config = QuestionsConfig { minimum_questions: 2, required_to_recover: 2, ..QuestionsConfig::default() };
        let repo = Arc::new(InMemoryQuestionsRepository::new());
        repo.set_questions(
            "user1",
            vec![make_question("q1", "blue", &config), make_question("q2", "rex", &config)],
        );
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let method = SecurityQuestionsMethod::new(repo, audit, config);

        let mut session = RecoverySession::new("user1", TenantScope::app("app1"), vec!["security_questions".to_string()]);
        let mut answers = HashMap::new();
        answers.insert("q1".to_string(), "blue".to_string());
        answers.insert("q2".to_string(), "rex".to_string());
        method.verify(&mut session, MethodInput::Answers(answers)).await.unwrap();
        assert!(session.completed_steps.contains(&"security_questions".to_string()));
    }

    #[tokio::test]
    async fn insufficient_correct_answers_increments_attempts() {
        let config = QuestionsConfig { minimum_questions: 2, required_to_recover: 2, ..QuestionsConfig::default() };
        let repo = Arc::new(InMemoryQuestionsRepository::new());
        repo.set_questions(
            "user1",
            vec![make_question("q1", "blue", &config), make_question("q2", "rex", &config)],
        );
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let method = SecurityQuestionsMethod::new(repo, audit, config);

        let mut session = RecoverySession::new("user1", TenantScope::app("app1"), vec!["security_questions".to_string()]);
        let mut answers = HashMap::new();
        answers.insert("q1".to_string(), "blue".to_string());
        answers.insert("q2".to_string(), "wrong".to_string());
        let err = method.verify(&mut session, MethodInput::Answers(answers)).await.unwrap_err();
        assert_eq!(err.code(), "insufficient_correct_answers");
        assert_eq!(session.attempts, 1);
    }
}
