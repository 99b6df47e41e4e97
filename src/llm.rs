//! Minimal LLM-service client for our use-cases: chat completion for the
//! fallback assistant, answer grading, embeddings for the similarity signal,
//! and QA generation from an uploaded document.
//!
//! The service authenticates with a short-lived OAuth token exchanged from a
//! basic-auth key; we cache the token until shortly before expiry. Calls are
//! instrumented and log model names and response sizes (not contents).
//!
//! NOTE: We never log the auth key and we keep payload truncations short.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use base64::Engine;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::config::Prompts;
use crate::error::{BotError, BotResult};
use crate::pool;
use crate::util::fill_template;

/// One turn of a chat exchange, persisted verbatim as fallback-chat history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: String,
  pub content: String,
}

impl ChatMessage {
  pub fn system(content: impl Into<String>) -> Self {
    Self { role: "system".into(), content: content.into() }
  }
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: "user".into(), content: content.into() }
  }
  pub fn assistant(content: impl Into<String>) -> Self {
    Self { role: "assistant".into(), content: content.into() }
  }
}

struct CachedToken {
  value: String,
  valid_until: Instant,
}

pub struct LlmClient {
  client: reqwest::Client,
  auth_key: String,
  oauth_url: String,
  base_url: String,
  scope: String,
  chat_model: String,
  embed_model: String,
  token: RwLock<Option<CachedToken>>,
}

impl LlmClient {
  pub fn new(
    oauth_url: String,
    base_url: String,
    auth_key: String,
    scope: String,
    chat_model: String,
    embed_model: String,
  ) -> BotResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| BotError::Config(e.to_string()))?;
    Ok(Self {
      client,
      auth_key,
      oauth_url,
      base_url,
      scope,
      chat_model,
      embed_model,
      token: RwLock::new(None),
    })
  }

  /// Construct the client from LLM_* environment variables. The auth key is
  /// either LLM_AUTH_KEY (already base64) or LLM_CLIENT_ID/LLM_CLIENT_SECRET.
  pub fn from_env() -> BotResult<Self> {
    let auth_key = match std::env::var("LLM_AUTH_KEY") {
      Ok(k) => k,
      Err(_) => {
        let id = std::env::var("LLM_CLIENT_ID")
          .map_err(|_| BotError::Config("LLM_AUTH_KEY or LLM_CLIENT_ID/LLM_CLIENT_SECRET must be set".into()))?;
        let secret = std::env::var("LLM_CLIENT_SECRET")
          .map_err(|_| BotError::Config("LLM_CLIENT_SECRET must be set alongside LLM_CLIENT_ID".into()))?;
        base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"))
      }
    };
    let oauth_url = std::env::var("LLM_OAUTH_URL")
      .unwrap_or_else(|_| "https://ngw.devices.sberbank.ru:9443/api/v2/oauth".into());
    let base_url = std::env::var("LLM_BASE_URL")
      .unwrap_or_else(|_| "https://gigachat.devices.sberbank.ru/api/v1".into());
    let scope = std::env::var("LLM_SCOPE").unwrap_or_else(|_| "GIGACHAT_API_PERS".into());
    let chat_model = std::env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "GigaChat:latest".into());
    let embed_model = std::env::var("LLM_EMBED_MODEL").unwrap_or_else(|_| "Embeddings".into());
    Self::new(oauth_url, base_url, auth_key, scope, chat_model, embed_model)
  }

  /// Exchange the basic-auth key for an access token, or reuse the cached
  /// one while it is still comfortably within its validity window.
  async fn access_token(&self) -> BotResult<String> {
    {
      let cached = self.token.read().await;
      if let Some(t) = cached.as_ref() {
        if t.valid_until > Instant::now() {
          return Ok(t.value.clone());
        }
      }
    }

    let rq_uid = uuid::Uuid::new_v4().to_string();
    let res = self
      .client
      .post(&self.oauth_url)
      .header(USER_AGENT, "quizbot-backend/0.1")
      .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
      .header(ACCEPT, "application/json")
      .header("RqUID", rq_uid)
      .header(AUTHORIZATION, format!("Basic {}", self.auth_key))
      .form(&[("scope", self.scope.as_str())])
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(BotError::Transient(format!(
        "LLM oauth HTTP {}: {}",
        status,
        extract_error(&body).unwrap_or(body)
      )));
    }

    #[derive(Deserialize)]
    struct TokenResponse {
      access_token: String,
      /// Milliseconds since the epoch.
      expires_at: i64,
    }
    let tok: TokenResponse = res.json().await.map_err(BotError::from)?;

    let now_ms = chrono::Utc::now().timestamp_millis();
    // Refresh a minute early so in-flight calls never race expiry.
    let remaining_ms = (tok.expires_at - now_ms - 60_000).max(0) as u64;
    let value = tok.access_token.clone();
    *self.token.write().await = Some(CachedToken {
      value: tok.access_token,
      valid_until: Instant::now() + Duration::from_millis(remaining_ms),
    });
    Ok(value)
  }

  /// Chat completion returning the assistant text of the first choice.
  #[instrument(level = "info", skip(self, messages), fields(model = %self.chat_model, turns = messages.len()))]
  async fn chat_raw(&self, messages: Vec<ChatMessage>, temperature: f32) -> BotResult<String> {
    let token = self.access_token().await?;
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.chat_model.clone(),
      messages,
      temperature,
      max_tokens: Some(512),
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "quizbot-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {token}"))
      .json(&req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(BotError::Transient(format!(
        "LLM HTTP {}: {}",
        status,
        extract_error(&body).unwrap_or(body)
      )));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(BotError::from)?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "LLM usage");
    }
    let text = body
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .unwrap_or_default()
      .trim()
      .to_string();
    Ok(text)
  }

  /// Conversational reply over the caller-supplied history.
  pub async fn chat(&self, messages: &[ChatMessage]) -> BotResult<String> {
    self.chat_raw(messages.to_vec(), 1.0).await
  }

  /// Embedding vector for one text.
  #[instrument(level = "info", skip(self, text), fields(model = %self.embed_model, text_len = text.len()))]
  pub async fn embed(&self, text: &str) -> BotResult<Vec<f32>> {
    let token = self.access_token().await?;
    let url = format!("{}/embeddings", self.base_url);
    let req = EmbeddingsRequest {
      model: self.embed_model.clone(),
      input: vec![text.to_string()],
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "quizbot-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {token}"))
      .json(&req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(BotError::Transient(format!(
        "LLM embeddings HTTP {}: {}",
        status,
        extract_error(&body).unwrap_or(body)
      )));
    }

    let body: EmbeddingsResponse = res.json().await.map_err(BotError::from)?;
    body
      .data
      .into_iter()
      .next()
      .map(|d| d.embedding)
      .ok_or_else(|| BotError::Transient("empty embeddings response".into()))
  }

  /// Grade a candidate answer against the reference: 0–1 score plus a short
  /// rationale. An unparseable reply is a transient failure, never a default
  /// tier.
  #[instrument(level = "info", skip_all, fields(question_len = question.len(), answer_len = candidate.len()))]
  pub async fn grade_answer(
    &self,
    prompts: &Prompts,
    question: &str,
    reference: &str,
    candidate: &str,
  ) -> BotResult<(f32, String)> {
    let user = fill_template(
      &prompts.grade_user_template,
      &[("question", question), ("reference", reference), ("answer", candidate)],
    );
    let text = self
      .chat_raw(vec![ChatMessage::system(&prompts.grade_system), ChatMessage::user(user)], 0.2)
      .await?;
    parse_grade(&text)
  }

  /// Generate `count` question/answer pairs from a document, in the same
  /// marker format the pool loader parses, so the output round-trips
  /// through `load_pool` by construction.
  #[instrument(level = "info", skip(self, prompts, document), fields(doc_len = document.len(), count))]
  pub async fn generate_qa(
    &self,
    prompts: &Prompts,
    document: &str,
    count: usize,
  ) -> BotResult<Vec<(String, String)>> {
    let user = fill_template(
      &prompts.generate_user_template,
      &[("document", document), ("count", &count.to_string())],
    );
    let text = self
      .chat_raw(vec![ChatMessage::system(&prompts.generate_system), ChatMessage::user(user)], 0.7)
      .await?;
    let pairs = pool::parse_marker_text(&text);
    if pairs.is_empty() {
      return Err(BotError::Transient("QA generation returned no parseable pairs".into()));
    }
    Ok(pairs)
  }
}

static GRADE_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("grade digits regex"));

/// Extract the 0–10 grade and the rationale from the model's graded reply.
fn parse_grade(text: &str) -> BotResult<(f32, String)> {
  let (head, rationale) = match text.split_once("Reason:") {
    Some((head, tail)) => (head, tail.trim().to_string()),
    None => (text, "No comment.".to_string()),
  };
  let grade: u32 = GRADE_DIGITS
    .find(head)
    .and_then(|m| m.as_str().parse().ok())
    .ok_or_else(|| BotError::Transient(format!("unparseable grade in LLM reply: {}", crate::util::trunc_for_log(text, 120))))?;
  Ok(((grade as f32 / 10.0).clamp(0.0, 1.0), rationale))
}

// --- wire DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessage>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

#[derive(Serialize)]
struct EmbeddingsRequest {
  model: String,
  input: Vec<String>,
}
#[derive(Deserialize)]
struct EmbeddingsResponse {
  data: Vec<EmbeddingData>,
}
#[derive(Deserialize)]
struct EmbeddingData {
  embedding: Vec<f32>,
}

/// Try to extract a clean error message from an LLM-service error body.
fn extract_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EObj>(body).ok().map(|e| e.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grade_parsing_extracts_score_and_rationale() {
    let (score, why) = parse_grade("Grade: 7\nReason: close, but the year is wrong.").unwrap();
    assert!((score - 0.7).abs() < f32::EPSILON);
    assert_eq!(why, "close, but the year is wrong.");
  }

  #[test]
  fn grade_parsing_defaults_rationale_and_clamps() {
    let (score, why) = parse_grade("I'd give this a 12 out of 10").unwrap();
    assert!((score - 1.0).abs() < f32::EPSILON);
    assert_eq!(why, "No comment.");
  }

  #[test]
  fn grade_without_digits_is_an_error() {
    assert!(parse_grade("excellent answer, no complaints").is_err());
  }
}
