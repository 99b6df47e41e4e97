//! Conversation state machine: routes every inbound message to the quiz
//! flow, the LLM chat fallback, or the nested admin sub-machine.
//!
//! Precedence is explicit: active admin state short-circuits everything,
//! then the admin-entry keyword, then start/stop keywords, then the mode
//! decides: chat fallback forwards to the LLM, quiz mode recognizes the
//! question/balance buttons and treats any other text as an answer attempt.
//!
//! Handlers return the outbound replies instead of sending them; the main
//! loop owns delivery. At most one in-flight message per user is assumed,
//! matching the single ordered receive loop.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::admin;
use crate::config::BotConfig;
use crate::domain::{AnswerLogEntry, ChatMode, UserId, UserProfile};
use crate::error::{BotError, BotResult};
use crate::llm::{ChatMessage, LlmClient};
use crate::pool;
use crate::profile::ProfileClient;
use crate::scoring;
use crate::store::{keys, SessionStore};
use crate::transport::{ButtonColor, Inbound, Keyboard, Outbound, Transport};

/// Generic reply for transient collaborator failures.
pub const RETRY_LATER: &str =
  "Something went wrong on our side. Please try again in a minute.";

pub struct Bot {
  pub store: Arc<dyn SessionStore>,
  pub llm: LlmClient,
  pub profiles: ProfileClient,
  pub transport: Transport,
  pub config: BotConfig,
}

impl Bot {
  /// The quiz reply keyboard: question/stop on top, balance below.
  pub(crate) fn quiz_keyboard(&self) -> Keyboard {
    let kw = &self.config.keywords;
    Keyboard::one_time()
      .add_button(&kw.question_button, ButtonColor::Primary)
      .add_button(&kw.stop_button, ButtonColor::Negative)
      .add_line()
      .add_button(&kw.balance_button, ButtonColor::Positive)
  }

  /// Every user with a stored profile, the audience for admin bulk ops.
  pub(crate) async fn known_users(&self) -> BotResult<Vec<UserId>> {
    let ids = self.store.hkeys(keys::PROFILES).await?;
    Ok(ids.iter().filter_map(|s| s.parse().ok()).collect())
  }

  async fn chat_mode(&self, user: UserId) -> BotResult<ChatMode> {
    match self.store.hget(&keys::session(user), "mode").await? {
      None => Ok(ChatMode::default()),
      Some(raw) => match serde_json::from_str(&raw) {
        Ok(mode) => Ok(mode),
        Err(e) => {
          warn!(target: "engine", %user, error = %e, "Corrupt chat mode, falling back to default");
          Ok(ChatMode::default())
        }
      },
    }
  }

  async fn set_chat_mode(&self, user: UserId, mode: ChatMode) -> BotResult<()> {
    let raw = serde_json::to_string(&mode).map_err(|e| BotError::Store(e.to_string()))?;
    self.store.hset(&keys::session(user), "mode", &raw).await
  }

  /// Route one inbound message and produce the replies to send.
  #[instrument(level = "info", skip(self, inbound), fields(user = inbound.user_id, text_len = inbound.text.len()))]
  pub async fn handle_message(&self, inbound: &Inbound) -> BotResult<Vec<Outbound>> {
    let user = inbound.user_id;
    let text = inbound.text.trim();
    let kw = &self.config.keywords;

    // An active admin state short-circuits the whole quiz flow; quiz/chat
    // state is left untouched and resumes unchanged on admin exit.
    if let Some(state) = admin::active_state(self.store.as_ref(), user).await? {
      return admin::handle(self, user, state, inbound).await;
    }
    if kw.is_admin_entry(text) {
      return admin::enter(self, user).await;
    }

    if kw.is_start(text) {
      return self.start_quiz(user).await;
    }
    if kw.is_stop(text) {
      return self.stop_quiz(user).await;
    }

    match self.chat_mode(user).await? {
      ChatMode::LlmChat => self.chat_reply(user, text).await,
      ChatMode::QuizActive => {
        if text.eq_ignore_ascii_case(&kw.question_button) {
          self.next_question(user).await
        } else if text.eq_ignore_ascii_case(&kw.balance_button) {
          self.show_balance(user).await
        } else {
          // Anything unrecognized while a question may be outstanding is an
          // answer attempt, including near-keyword typos.
          self.submit_answer(user, text).await
        }
      }
    }
  }

  async fn start_quiz(&self, user: UserId) -> BotResult<Vec<Outbound>> {
    info!(target: "engine", %user, "Quiz started");

    // Load the shared question source only for users who never had a pool.
    // The slot counter survives exhaustion, so it doubles as the marker.
    if self.store.hget(keys::SLOTS, &user.to_string()).await?.is_none() {
      let dir = self.config.staging_dir.clone();
      if let Err(e) = pool::load_dir(self.store.as_ref(), Path::new(&dir), user).await {
        warn!(target: "engine", %user, error = %e, "Question source load failed; pool stays empty");
      }
    }

    if self.store.hget(keys::PROFILES, &user.to_string()).await?.is_none() {
      let profile = match self.profiles.lookup_profile(user).await {
        Ok(p) => p,
        Err(e) => {
          // Enroll the user anyway; attributes can be backfilled by the
          // admin player-data sheet later.
          warn!(target: "engine", %user, error = %e, "Profile lookup failed, storing empty profile");
          UserProfile::default()
        }
      };
      let raw = serde_json::to_string(&profile).map_err(|e| BotError::Store(e.to_string()))?;
      self.store.hset(keys::PROFILES, &user.to_string(), &raw).await?;
    }

    self.set_chat_mode(user, ChatMode::QuizActive).await?;
    Ok(vec![Outbound::with_keyboard(
      format!("Quiz time! Press \"{}\" to get a question.", self.config.keywords.question_button),
      self.quiz_keyboard(),
    )])
  }

  async fn stop_quiz(&self, user: UserId) -> BotResult<Vec<Outbound>> {
    info!(target: "engine", %user, "Quiz stopped");
    self.set_chat_mode(user, ChatMode::LlmChat).await?;
    Ok(vec![Outbound::text("You left the quiz. Write \"start\" whenever you want back in!")])
  }

  async fn next_question(&self, user: UserId) -> BotResult<Vec<Outbound>> {
    match pool::draw_question(self.store.as_ref(), user).await? {
      Some(issued) => {
        info!(target: "engine", %user, slot = issued.slot, "Question issued");
        Ok(vec![Outbound::with_keyboard(issued.question, self.quiz_keyboard())])
      }
      None => {
        // Exhaustion is not a failure; hand the user back to the chat.
        info!(target: "engine", %user, "Pool exhausted");
        self.set_chat_mode(user, ChatMode::LlmChat).await?;
        Ok(vec![Outbound::text(
          "You have been through every question for now — come back later for more!",
        )])
      }
    }
  }

  async fn show_balance(&self, user: UserId) -> BotResult<Vec<Outbound>> {
    let balance = self
      .store
      .hget(keys::LEDGER, &user.to_string())
      .await?
      .and_then(|v| v.parse::<i64>().ok())
      .unwrap_or(0);
    Ok(vec![Outbound::with_keyboard(
      format!("You have {balance} point(s) on your balance."),
      self.quiz_keyboard(),
    )])
  }

  async fn submit_answer(&self, user: UserId, text: &str) -> BotResult<Vec<Outbound>> {
    let Some(issued) = pool::issued_question(self.store.as_ref(), user).await? else {
      // Deterministic reply for the never-issued case rather than guessing.
      return Ok(vec![Outbound::with_keyboard(
        format!("No active question — press \"{}\" to get one.", self.config.keywords.question_button),
        self.quiz_keyboard(),
      )]);
    };

    let reference = scoring::normalize(&issued.answer);
    let (bonus, rationale) =
      scoring::score(&self.llm, &self.config.prompts, text, &reference, &issued.question).await?;
    if bonus > 0 {
      let balance = scoring::apply_bonus(self.store.as_ref(), user, bonus).await?;
      debug!(target: "engine", %user, bonus, balance, "Bonus applied");
    }

    // Append-only log entry keyed by submission time; zero-bonus attempts
    // are logged too.
    let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
    let entry = serde_json::to_string(&AnswerLogEntry {
      question: issued.question.clone(),
      answer: text.to_string(),
    })
    .map_err(|e| BotError::Store(e.to_string()))?;
    self.store.hset(&keys::answer_log(user), &stamp, &entry).await?;

    Ok(vec![Outbound::with_keyboard(scoring::tier_message(bonus, &rationale), self.quiz_keyboard())])
  }

  /// Default flow: forward the message with stored history to the LLM chat.
  async fn chat_reply(&self, user: UserId, text: &str) -> BotResult<Vec<Outbound>> {
    let key = keys::chat_history(user);
    let mut history: Vec<ChatMessage> = match self.store.hget(&key, "messages").await? {
      Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(target: "engine", %user, error = %e, "Corrupt chat history, starting over");
        Vec::new()
      }),
      None => Vec::new(),
    };
    if history.is_empty() {
      history.push(ChatMessage::system(&self.config.prompts.chat_system));
    }
    history.push(ChatMessage::user(text));

    let reply = self.llm.chat(&history).await?;
    history.push(ChatMessage::assistant(reply.clone()));

    let raw = serde_json::to_string(&history).map_err(|e| BotError::Store(e.to_string()))?;
    self.store.hset(&key, "messages", &raw).await?;
    Ok(vec![Outbound::text(reply)])
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use crate::store::MemoryStore;

  /// A bot over the in-memory store; the HTTP clients point at a closed
  /// local port so any accidental network call fails fast.
  pub(crate) fn bot() -> Bot {
    Bot {
      store: Arc::new(MemoryStore::new()),
      llm: LlmClient::new(
        "http://127.0.0.1:9/oauth".into(),
        "http://127.0.0.1:9".into(),
        "dGVzdDp0ZXN0".into(),
        "TEST_SCOPE".into(),
        "chat-model".into(),
        "embed-model".into(),
      )
      .expect("test llm client"),
      profiles: ProfileClient::new("http://127.0.0.1:9".into(), "token".into())
        .expect("test profile client"),
      transport: Transport::new("http://127.0.0.1:9".into(), "token".into(), "1".into())
        .expect("test transport"),
      config: BotConfig::default(),
    }
  }

  pub(crate) fn inbound(user: UserId, text: &str) -> Inbound {
    Inbound { user_id: user, peer_id: user, text: text.to_string(), document: None }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::{bot, inbound};
  use super::*;
  use std::collections::HashSet;

  const SOURCE: &str = "Question: Q1?\nAnswer: A1.\n\nQuestion: Q2?\nAnswer: A2.\n\nQuestion: Q3?\nAnswer: A3.";

  async fn activate_quiz(b: &Bot, user: UserId) {
    b.set_chat_mode(user, ChatMode::QuizActive).await.unwrap();
  }

  #[tokio::test]
  async fn question_trigger_draws_until_exhaustion() {
    let b = bot();
    let user = 1;
    pool::load_pool(b.store.as_ref(), SOURCE, &[user]).await.unwrap();
    activate_quiz(&b, user).await;

    let mut seen = HashSet::new();
    for _ in 0..3 {
      let replies = b.handle_message(&inbound(user, "Question")).await.unwrap();
      assert_eq!(replies.len(), 1);
      assert!(seen.insert(replies[0].text.clone()), "question repeated: {}", replies[0].text);
    }

    let replies = b.handle_message(&inbound(user, "Question")).await.unwrap();
    assert!(replies[0].text.contains("every question"), "expected exhaustion notice");
    // Exhaustion re-enables the chat fallback.
    assert_eq!(b.chat_mode(user).await.unwrap(), ChatMode::LlmChat);
  }

  #[tokio::test]
  async fn answer_without_issued_question_gets_deterministic_reply() {
    let b = bot();
    activate_quiz(&b, 2).await;
    let replies = b.handle_message(&inbound(2, "some answer")).await.unwrap();
    assert!(replies[0].text.contains("No active question"));
  }

  #[tokio::test]
  async fn balance_reads_the_ledger() {
    let b = bot();
    activate_quiz(&b, 3).await;
    scoring::apply_bonus(b.store.as_ref(), 3, 70).await.unwrap();
    let replies = b.handle_message(&inbound(3, "Balance")).await.unwrap();
    assert!(replies[0].text.contains("70"));
  }

  #[tokio::test]
  async fn start_enrolls_profile_and_enables_quiz_mode() {
    let b = bot();
    let replies = b.handle_message(&inbound(4, "start")).await.unwrap();
    assert!(replies[0].keyboard.is_some());
    // Profile lookup fails against the closed port; an empty profile is
    // stored so the user is still enrolled.
    assert!(b.store.hget(keys::PROFILES, "4").await.unwrap().is_some());
    assert_eq!(b.chat_mode(4).await.unwrap(), ChatMode::QuizActive);

    let replies = b.handle_message(&inbound(4, "Stop")).await.unwrap();
    assert!(replies[0].keyboard.is_none());
    assert_eq!(b.chat_mode(4).await.unwrap(), ChatMode::LlmChat);
  }

  #[tokio::test]
  async fn stop_keyword_wins_over_answer_interpretation() {
    let b = bot();
    let user = 5;
    pool::load_pool(b.store.as_ref(), SOURCE, &[user]).await.unwrap();
    activate_quiz(&b, user).await;
    b.handle_message(&inbound(user, "Question")).await.unwrap();

    // "stop" is a recognized command even while a question is outstanding.
    let replies = b.handle_message(&inbound(user, "stop")).await.unwrap();
    assert!(replies[0].text.contains("left the quiz"));
  }
}
