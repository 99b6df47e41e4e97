//! Domain models: user identity, profiles, issued questions, and the two
//! tagged session states (quiz mode and the nested admin flow).
//!
//! Conversational progress is encoded as a single enum value per user (and a
//! single enum value per administrator), persisted as JSON in the session
//! store. One active variant at a time makes conflicting step flags
//! impossible by construction.

use serde::{Deserialize, Serialize};

/// Stable chat-participant identifier, as delivered by the transport.
pub type UserId = i64;

/// Per-user attributes fetched from the platform profile API on first quiz
/// start. The reward balance lives separately in the ledger hash.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
  pub first_name: String,
  pub last_name: String,
  pub birth_date: String,
  pub sex: String,
  pub city: String,
  pub country: String,
}

/// The single currently-outstanding question for a user, held apart from the
/// pool once drawn. Overwritten by the next draw rather than deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuedQuestion {
  pub question: String,
  pub answer: String,
  pub slot: u64,
}

/// One append-only answer-log record, keyed in the store by submission time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnswerLogEntry {
  pub question: String,
  pub answer: String,
}

/// Where a user is in the main flow. The LLM chat fallback is the default;
/// the quiz takes over between the start and stop keywords.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
  #[default]
  LlmChat,
  QuizActive,
}

/// Where an administrator is in the nested admin flow. Absence of a persisted
/// state means the user is not in the admin flow at all; pending string
/// fields (edit target, staged document name) live inside the variant that
/// needs them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AdminState {
  AwaitingLogin,
  AwaitingPassword,
  Menu,
  QaMenu,
  UploadQa,
  EditQaAwaitTarget,
  EditQaAwaitSheet { target: UserId },
  DeleteQaConfirm,
  UsersInfoAwaitSheet,
  GenerateQaAwaitDocument,
  GenerateQaAwaitCount { document: String },
  ChangeLogin,
  ChangePassword,
}
