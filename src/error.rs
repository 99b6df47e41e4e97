//! Error taxonomy for the bot core.
//!
//! Three failure classes escape a handler: transient collaborator failures
//! (LLM, transport, profile lookup), session-store I/O, and data consistency
//! violations (a pool slot missing its counterpart, corrupt persisted state).
//! Malformed user input is never an error; handlers re-prompt locally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
  #[error("configuration error: {0}")]
  Config(String),

  #[error("session store error: {0}")]
  Store(String),

  /// A collaborator (LLM, chat platform, profile API) failed or timed out.
  /// The affected user gets one generic retry-later reply.
  #[error("transient collaborator failure: {0}")]
  Transient(String),

  /// Persisted state violates an invariant. The step is aborted and logged;
  /// state is left as-is so the user can retry.
  #[error("data consistency error: {0}")]
  DataConsistency(String),
}

pub type BotResult<T> = Result<T, BotError>;

impl From<reqwest::Error> for BotError {
  fn from(e: reqwest::Error) -> Self {
    BotError::Transient(e.to_string())
  }
}

impl From<redis::RedisError> for BotError {
  fn from(e: redis::RedisError) -> Self {
    BotError::Store(e.to_string())
  }
}
