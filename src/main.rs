//! Quizbot · chat-driven trivia backend
//!
//! - Long-poll chat transport, per-user conversation state machine
//! - LLM-backed answer scoring, chat fallback and QA generation
//! - Redis-backed session store (in-memory fallback for local runs)
//!
//! Important env variables:
//!   REDIS_URL             : session store, e.g. "redis://127.0.0.1/"
//!   PLATFORM_GROUP_TOKEN  : group token for the chat transport
//!   PLATFORM_GROUP_ID     : group id for the long-poll subscription
//!   PLATFORM_USER_TOKEN   : user token for profile lookups
//!   PLATFORM_API_BASE     : default "https://api.vk.com/method"
//!   LLM_AUTH_KEY          : base64 client credentials for the LLM service
//!   LLM_BASE_URL / LLM_OAUTH_URL / LLM_SCOPE / LLM_CHAT_MODEL / LLM_EMBED_MODEL
//!   BOT_CONFIG_PATH       : path to TOML config (prompts + keywords)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod admin;
mod config;
mod domain;
mod engine;
mod error;
mod llm;
mod pool;
mod profile;
mod scoring;
mod sheets;
mod store;
mod telemetry;
mod transport;
mod util;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::engine::{Bot, RETRY_LATER};
use crate::llm::LlmClient;
use crate::profile::ProfileClient;
use crate::store::{MemoryStore, RedisStore, SessionStore};
use crate::transport::{Inbound, Outbound, Transport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = config::load_bot_config_from_env().unwrap_or_default();

  let store: Arc<dyn SessionStore> = match std::env::var("REDIS_URL") {
    Ok(url) => {
      info!(target: "quizbot_backend", "Connecting to the session store");
      Arc::new(RedisStore::connect(&url).await?)
    }
    Err(_) => {
      warn!(target: "quizbot_backend", "REDIS_URL not set; using the in-memory store (state is lost on restart)");
      Arc::new(MemoryStore::new())
    }
  };

  std::fs::create_dir_all(&config.staging_dir)?;

  let bot = Bot {
    store,
    llm: LlmClient::from_env()?,
    profiles: ProfileClient::from_env()?,
    transport: Transport::from_env()?,
    config,
  };

  info!(target: "quizbot_backend", "Bot starting");
  run(bot).await;
  Ok(())
}

/// Supervised receive loop: only the long-poll subscription is restarted on
/// failure, never the application state.
async fn run(bot: Bot) {
  loop {
    let mut session = match bot.transport.subscribe().await {
      Ok(s) => s,
      Err(e) => {
        error!(target: "quizbot_backend", error = %e, "Long-poll subscribe failed; retrying");
        tokio::time::sleep(Duration::from_secs(5)).await;
        continue;
      }
    };

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => {
          info!(target: "quizbot_backend", "Shutdown signal received");
          return;
        }
        polled = session.poll() => match polled {
          Ok(batch) => {
            for inbound in batch {
              dispatch(&bot, &inbound).await;
            }
          }
          Err(e) => {
            warn!(target: "quizbot_backend", error = %e, "Long-poll failed; re-subscribing");
            break;
          }
        }
      }
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
  }
}

/// Per-message error boundary: one user's failure never stops processing
/// for other users.
async fn dispatch(bot: &Bot, inbound: &Inbound) {
  match bot.handle_message(inbound).await {
    Ok(replies) => {
      for reply in replies {
        if let Err(e) = bot.transport.send(inbound.peer_id, &reply).await {
          error!(target: "quizbot_backend", user = inbound.user_id, error = %e, "Reply send failed");
        }
      }
    }
    Err(e) => {
      error!(target: "quizbot_backend", user = inbound.user_id, error = %e, "Message handling failed");
      if let Err(send_err) = bot.transport.send(inbound.peer_id, &Outbound::text(RETRY_LATER)).await {
        error!(target: "quizbot_backend", user = inbound.user_id, error = %send_err, "Retry notice send failed");
      }
    }
  }
}
