//! Account recovery state machine (§2, §3, §4.G): session lifecycle,
//! risk-derived step plans, idempotent replays, and expiry sweeping.

pub mod engine;
pub mod idempotency;
pub mod repository;
pub mod session;
pub mod sweeper;
pub mod types;

pub use engine::RecoveryStateMachine;
pub use idempotency::IdempotencyStore;
pub use repository::{InMemorySessionRepository, SessionRepository, SqliteSessionRepository};
pub use session::{RecoverySession, RequestContext, ReviewDecision, ReviewState, SessionStatus};
pub use sweeper::RecoverySweeper;
pub use types::{MethodInstructions, RecoverySessionConfig, RecoveryToken};
