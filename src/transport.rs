//! Chat-platform transport: group long-poll subscription, message sending
//! with one-time reply keyboards, and document upload/download.
//!
//! The platform API is method-call style: GET {base}/{method} with the group
//! token and API version appended, every reply wrapped in a
//! `{"response": ...}` / `{"error": ...}` envelope. Long-polling follows the
//! usual server/key/ts handshake; a stale `ts` (failed=1) is resynced in
//! place, an expired key (failed=2/3) bubbles up so the main loop
//! re-subscribes without touching any other state.

use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::UserId;
use crate::error::{BotError, BotResult};

// ------------------------------------------------------------ messages ----

/// One inbound text message, with at most one document attachment.
#[derive(Clone, Debug)]
pub struct Inbound {
  pub user_id: UserId,
  pub peer_id: i64,
  pub text: String,
  pub document: Option<DocAttachment>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DocAttachment {
  pub title: String,
  pub url: String,
  #[serde(default)]
  pub ext: String,
}

/// One outbound reply: text, optional one-time keyboard, optional document.
#[derive(Clone, Debug)]
pub struct Outbound {
  pub text: String,
  pub keyboard: Option<Keyboard>,
  pub document: Option<OutboundDocument>,
}

#[derive(Clone, Debug)]
pub struct OutboundDocument {
  pub name: String,
  pub bytes: Vec<u8>,
}

impl Outbound {
  pub fn text(text: impl Into<String>) -> Self {
    Self { text: text.into(), keyboard: None, document: None }
  }

  pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
    Self { text: text.into(), keyboard: Some(keyboard), document: None }
  }

  pub fn attach_document(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
    self.document = Some(OutboundDocument { name: name.into(), bytes });
    self
  }
}

// ------------------------------------------------------------ keyboards ----

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonColor {
  Primary,
  Secondary,
  Positive,
  Negative,
}

#[derive(Clone, Debug, Serialize)]
struct ButtonAction {
  #[serde(rename = "type")]
  kind: String,
  label: String,
}

#[derive(Clone, Debug, Serialize)]
struct Button {
  action: ButtonAction,
  color: ButtonColor,
}

/// One-time reply keyboard, built row by row.
#[derive(Clone, Debug, Serialize)]
pub struct Keyboard {
  one_time: bool,
  buttons: Vec<Vec<Button>>,
}

impl Keyboard {
  pub fn one_time() -> Self {
    Self { one_time: true, buttons: vec![vec![]] }
  }

  pub fn add_button(mut self, label: &str, color: ButtonColor) -> Self {
    if let Some(row) = self.buttons.last_mut() {
      row.push(Button {
        action: ButtonAction { kind: "text".into(), label: label.to_string() },
        color,
      });
    }
    self
  }

  pub fn add_line(mut self) -> Self {
    self.buttons.push(vec![]);
    self
  }
}

// ------------------------------------------------------------ transport ----

pub struct Transport {
  client: reqwest::Client,
  base_url: String,
  token: String,
  group_id: String,
  version: String,
}

impl Transport {
  pub fn new(base_url: String, token: String, group_id: String) -> BotResult<Self> {
    // The long-poll wait is 25s; keep the client timeout comfortably above.
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(90))
      .build()
      .map_err(|e| BotError::Config(e.to_string()))?;
    Ok(Self { client, base_url, token, group_id, version: "5.131".into() })
  }

  pub fn from_env() -> BotResult<Self> {
    let base_url = std::env::var("PLATFORM_API_BASE")
      .unwrap_or_else(|_| "https://api.vk.com/method".into());
    let token = std::env::var("PLATFORM_GROUP_TOKEN")
      .map_err(|_| BotError::Config("PLATFORM_GROUP_TOKEN must be set".into()))?;
    let group_id = std::env::var("PLATFORM_GROUP_ID")
      .map_err(|_| BotError::Config("PLATFORM_GROUP_ID must be set".into()))?;
    Self::new(base_url, token, group_id)
  }

  /// Envelope-unwrapping method call.
  async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> BotResult<T> {
    let url = format!("{}/{}", self.base_url, method);
    let mut query: Vec<(&str, String)> = params.to_vec();
    query.push(("access_token", self.token.clone()));
    query.push(("v", self.version.clone()));

    let res = self.client.get(&url).query(&query).send().await?;
    let envelope: ApiEnvelope<T> = res.json().await.map_err(BotError::from)?;
    if let Some(err) = envelope.error {
      return Err(BotError::Transient(format!(
        "platform API {method}: {} (code {})",
        err.error_msg, err.error_code
      )));
    }
    envelope
      .response
      .ok_or_else(|| BotError::Transient(format!("platform API {method}: empty response")))
  }

  /// Open a long-poll session for the group.
  #[instrument(level = "info", skip(self))]
  pub async fn subscribe(&self) -> BotResult<LongPollSession> {
    #[derive(Deserialize)]
    struct LongPollServer {
      key: String,
      server: String,
      ts: String,
    }
    let lp: LongPollServer = self
      .call("groups.getLongPollServer", &[("group_id", self.group_id.clone())])
      .await?;
    info!(target: "transport", server = %lp.server, "Long-poll subscription established");
    Ok(LongPollSession { client: self.client.clone(), server: lp.server, key: lp.key, ts: lp.ts })
  }

  /// Send one outbound reply, uploading its document first if present.
  #[instrument(level = "info", skip(self, out), fields(%peer, text_len = out.text.len(), has_doc = out.document.is_some()))]
  pub async fn send(&self, peer: i64, out: &Outbound) -> BotResult<()> {
    let mut params: Vec<(&str, String)> = vec![
      ("user_id", peer.to_string()),
      ("random_id", rand::thread_rng().gen::<i32>().to_string()),
      ("message", out.text.clone()),
    ];
    if let Some(kb) = &out.keyboard {
      let json = serde_json::to_string(kb).map_err(|e| BotError::Transient(e.to_string()))?;
      params.push(("keyboard", json));
    }
    if let Some(doc) = &out.document {
      let attachment = self.upload_document(peer, &doc.name, doc.bytes.clone()).await?;
      params.push(("attachment", attachment));
    }
    let _: serde_json::Value = self.call("messages.send", &params).await?;
    Ok(())
  }

  /// Upload document bytes for a peer and return the attachment reference.
  async fn upload_document(&self, peer: i64, name: &str, bytes: Vec<u8>) -> BotResult<String> {
    #[derive(Deserialize)]
    struct UploadServer {
      upload_url: String,
    }
    #[derive(Deserialize)]
    struct Uploaded {
      file: String,
    }
    #[derive(Deserialize)]
    struct SavedDoc {
      id: i64,
      owner_id: i64,
    }
    #[derive(Deserialize)]
    struct Saved {
      doc: SavedDoc,
    }

    let us: UploadServer = self
      .call(
        "docs.getMessagesUploadServer",
        &[("type", "doc".into()), ("peer_id", peer.to_string())],
      )
      .await?;

    let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);
    let res = self.client.post(&us.upload_url).multipart(form).send().await?;
    let up: Uploaded = res.json().await.map_err(BotError::from)?;

    let saved: Saved = self.call("docs.save", &[("file", up.file)]).await?;
    debug!(target: "transport", name, "Document uploaded");
    Ok(format!("doc{}_{}", saved.doc.owner_id, saved.doc.id))
  }

  /// Fetch an inbound attachment by its download URL.
  pub async fn download(&self, url: &str) -> BotResult<Vec<u8>> {
    let res = self.client.get(url).send().await?;
    if !res.status().is_success() {
      return Err(BotError::Transient(format!("attachment download HTTP {}", res.status())));
    }
    Ok(res.bytes().await?.to_vec())
  }
}

/// A live long-poll cursor. `poll` blocks up to the server wait and returns
/// the batch of new inbound messages.
pub struct LongPollSession {
  client: reqwest::Client,
  server: String,
  key: String,
  ts: String,
}

impl LongPollSession {
  pub async fn poll(&mut self) -> BotResult<Vec<Inbound>> {
    let res = self
      .client
      .get(&self.server)
      .query(&[
        ("act", "a_check"),
        ("key", self.key.as_str()),
        ("ts", self.ts.as_str()),
        ("wait", "25"),
      ])
      .send()
      .await?;
    let body: PollResponse = res.json().await.map_err(BotError::from)?;

    if let Some(failed) = body.failed {
      if failed == 1 {
        // History is ahead of our cursor; resync and carry on.
        if let Some(ts) = body.ts {
          self.ts = ts;
        }
        return Ok(vec![]);
      }
      return Err(BotError::Transient(format!("long-poll key expired (failed={failed})")));
    }
    if let Some(ts) = body.ts {
      self.ts = ts;
    }

    let inbound: Vec<Inbound> = body
      .updates
      .into_iter()
      .filter(|u| u.kind == "message_new")
      .filter_map(|u| u.object.and_then(|o| o.message))
      .map(|m| Inbound {
        user_id: m.from_id,
        peer_id: m.peer_id,
        text: m.text,
        document: m
          .attachments
          .into_iter()
          .find(|a| a.kind == "doc")
          .and_then(|a| a.doc),
      })
      .collect();

    if !inbound.is_empty() {
      debug!(target: "transport", count = inbound.len(), "Inbound messages received");
    }
    Ok(inbound)
  }
}

// --- wire DTOs ---

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
  #[serde(default)]
  response: Option<T>,
  #[serde(default)]
  error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
  error_code: i64,
  error_msg: String,
}

#[derive(Deserialize)]
struct PollResponse {
  #[serde(default)]
  ts: Option<String>,
  #[serde(default)]
  updates: Vec<Update>,
  #[serde(default)]
  failed: Option<u8>,
}

#[derive(Deserialize)]
struct Update {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  object: Option<UpdateObject>,
}

#[derive(Deserialize)]
struct UpdateObject {
  #[serde(default)]
  message: Option<WireMessage>,
}

#[derive(Deserialize)]
struct WireMessage {
  from_id: i64,
  peer_id: i64,
  #[serde(default)]
  text: String,
  #[serde(default)]
  attachments: Vec<WireAttachment>,
}

#[derive(Deserialize)]
struct WireAttachment {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  doc: Option<DocAttachment>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keyboard_serializes_to_platform_json() {
    let kb = Keyboard::one_time()
      .add_button("Question", ButtonColor::Primary)
      .add_button("Stop", ButtonColor::Negative)
      .add_line()
      .add_button("Balance", ButtonColor::Positive);
    let json = serde_json::to_value(&kb).unwrap();
    assert_eq!(json["one_time"], true);
    assert_eq!(json["buttons"][0][0]["action"]["label"], "Question");
    assert_eq!(json["buttons"][0][1]["color"], "negative");
    assert_eq!(json["buttons"][1][0]["action"]["label"], "Balance");
  }

  #[test]
  fn poll_response_extracts_message_and_doc() {
    let raw = r#"{
      "ts": "42",
      "updates": [
        {"type": "message_new", "object": {"message": {
          "from_id": 7, "peer_id": 7, "text": "hello",
          "attachments": [{"type": "doc", "doc": {"title": "qa.txt", "url": "http://files/qa.txt", "ext": "txt"}}]
        }}},
        {"type": "message_typing_state", "object": {}}
      ]
    }"#;
    let parsed: PollResponse = serde_json::from_str(raw).unwrap();
    assert_eq!(parsed.ts.as_deref(), Some("42"));
    let msgs: Vec<_> = parsed
      .updates
      .into_iter()
      .filter(|u| u.kind == "message_new")
      .filter_map(|u| u.object.and_then(|o| o.message))
      .collect();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].text, "hello");
    assert_eq!(msgs[0].attachments[0].doc.as_ref().unwrap().title, "qa.txt");
  }
}
