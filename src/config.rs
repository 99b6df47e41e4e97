//! Loading bot configuration (prompts + trigger keywords) from TOML.
//!
//! See `BotConfig`, `Prompts` and `Keywords` for the expected schema. Every
//! field has a sensible default, so the file is optional and may override
//! only the parts being tuned.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize)]
pub struct BotConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub keywords: Keywords,
  /// Directory where uploaded question-source files are staged. Created at
  /// startup; cleared by the admin bulk-delete flow.
  #[serde(default = "default_staging_dir")]
  pub staging_dir: String,
  /// Default credentials seeded into the store the first time anyone opens
  /// the admin flow. Changeable afterwards from the admin menu.
  #[serde(default = "default_admin_login")]
  pub default_admin_login: String,
  #[serde(default = "default_admin_password")]
  pub default_admin_password: String,
}

impl Default for BotConfig {
  fn default() -> Self {
    Self {
      prompts: Prompts::default(),
      keywords: Keywords::default(),
      staging_dir: default_staging_dir(),
      default_admin_login: default_admin_login(),
      default_admin_password: default_admin_password(),
    }
  }
}

fn default_staging_dir() -> String {
  "./qa_sources".into()
}
fn default_admin_login() -> String {
  "quizmaster".into()
}
fn default_admin_password() -> String {
  "0000".into()
}

/// Prompts used by the LLM client. Defaults are sensible for a trivia quiz.
/// You can override them in TOML if you need to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  // Fallback small talk
  pub chat_system: String,
  // Answer grading
  pub grade_system: String,
  pub grade_user_template: String,
  // QA generation from a document
  pub generate_system: String,
  pub generate_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      chat_system: "You are the quiz club's friendly assistant. Answer briefly and helpfully.".into(),
      grade_system: "You are an experienced teacher grading student answers against a reference answer. Be strict but fair.".into(),
      grade_user_template: "You are grading this question:\n{question}\n\nReference answer:\n{reference}\n\nStudent answer:\n{answer}\n\nReply in exactly this format:\nGrade: <integer from 0 to 10, where 0 is no similarity and 10 is a fully correct answer>\nReason: <one or two sentences explaining the grade>".into(),
      generate_system: "You are a teacher composing trivia questions for a quiz. Respond ONLY with question/answer pairs in the requested format.".into(),
      generate_user_template: "Based strictly on the following document, write {count} question/answer pairs.\nEach question must start on a line \"Question: \" and each answer on a line \"Answer: \". Separate pairs with one blank line. Keep answers short, clear and unambiguous, and vary the difficulty.\n\nExample format:\n\nQuestion: question here\nAnswer: answer here\n\nQuestion: question here\nAnswer: answer here\n\nThe number of pairs must be exactly {count}.\n\n<document>\n{document}\n</document>".into(),
    }
  }
}

/// Trigger keywords and button labels. Keyword lists are matched
/// case-insensitively against the whole trimmed message; button labels are
/// also what the one-time keyboards display.
#[derive(Clone, Debug, Deserialize)]
pub struct Keywords {
  pub start: Vec<String>,
  pub stop: Vec<String>,
  pub admin_entry: Vec<String>,
  pub admin_exit: Vec<String>,
  pub back: Vec<String>,

  pub question_button: String,
  pub balance_button: String,
  pub stop_button: String,
  pub yes_button: String,
  pub no_button: String,

  pub menu_players: String,
  pub menu_qa: String,
  pub menu_generate: String,
  pub menu_credentials: String,

  pub qa_add: String,
  pub qa_edit: String,
  pub qa_delete: String,
  pub qa_back: String,
}

impl Default for Keywords {
  fn default() -> Self {
    Self {
      start: vec!["start".into(), "begin".into()],
      stop: vec!["stop".into(), "end".into()],
      admin_entry: vec!["admin".into()],
      admin_exit: vec!["exit".into()],
      back: vec!["back".into()],

      question_button: "Question".into(),
      balance_button: "Balance".into(),
      stop_button: "Stop".into(),
      yes_button: "Yes".into(),
      no_button: "No".into(),

      menu_players: "Player data".into(),
      menu_qa: "Questions and answers".into(),
      menu_generate: "Generate questions".into(),
      menu_credentials: "Change login and password".into(),

      qa_add: "Add questions".into(),
      qa_edit: "Edit questions".into(),
      qa_delete: "Delete questions".into(),
      qa_back: "Back".into(),
    }
  }
}

impl Keywords {
  fn matches(list: &[String], text: &str) -> bool {
    list.iter().any(|k| k.eq_ignore_ascii_case(text))
  }

  pub fn is_start(&self, text: &str) -> bool {
    Self::matches(&self.start, text)
  }
  pub fn is_stop(&self, text: &str) -> bool {
    Self::matches(&self.stop, text) || self.stop_button.eq_ignore_ascii_case(text)
  }
  pub fn is_admin_entry(&self, text: &str) -> bool {
    Self::matches(&self.admin_entry, text)
  }
  pub fn is_admin_exit(&self, text: &str) -> bool {
    Self::matches(&self.admin_exit, text)
  }
  pub fn is_back(&self, text: &str) -> bool {
    Self::matches(&self.back, text) || self.qa_back.eq_ignore_ascii_case(text)
  }
  pub fn is_yes(&self, text: &str) -> bool {
    self.yes_button.eq_ignore_ascii_case(text)
  }
}

/// Attempt to load `BotConfig` from BOT_CONFIG_PATH. On any parsing/IO error,
/// returns None and the caller falls back to defaults.
pub fn load_bot_config_from_env() -> Option<BotConfig> {
  let path = std::env::var("BOT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<BotConfig>(&s) {
      Ok(cfg) => {
        info!(target: "quizbot_backend", %path, "Loaded bot config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizbot_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizbot_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
