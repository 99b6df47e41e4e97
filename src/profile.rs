//! Platform profile lookup: name, birth date and locale attributes for a
//! user, fetched once on first quiz start with a user-scoped token.

use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::domain::{UserId, UserProfile};
use crate::error::{BotError, BotResult};

pub struct ProfileClient {
  client: reqwest::Client,
  base_url: String,
  token: String,
  version: String,
}

impl ProfileClient {
  pub fn new(base_url: String, token: String) -> BotResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(15))
      .build()
      .map_err(|e| BotError::Config(e.to_string()))?;
    Ok(Self { client, base_url, token, version: "5.131".into() })
  }

  pub fn from_env() -> BotResult<Self> {
    let base_url = std::env::var("PLATFORM_API_BASE")
      .unwrap_or_else(|_| "https://api.vk.com/method".into());
    let token = std::env::var("PLATFORM_USER_TOKEN")
      .map_err(|_| BotError::Config("PLATFORM_USER_TOKEN must be set".into()))?;
    Self::new(base_url, token)
  }

  #[instrument(level = "info", skip(self), fields(%user))]
  pub async fn lookup_profile(&self, user: UserId) -> BotResult<UserProfile> {
    let url = format!("{}/users.get", self.base_url);
    let res = self
      .client
      .get(&url)
      .query(&[
        ("user_ids", user.to_string()),
        ("fields", "sex,bdate,city,country".into()),
        ("access_token", self.token.clone()),
        ("v", self.version.clone()),
      ])
      .send()
      .await?;

    let envelope: UsersEnvelope = res.json().await.map_err(BotError::from)?;
    let wire = envelope
      .response
      .into_iter()
      .next()
      .ok_or_else(|| BotError::Transient(format!("profile API returned no user for {user}")))?;

    Ok(UserProfile {
      first_name: wire.first_name,
      last_name: wire.last_name,
      birth_date: wire.bdate.unwrap_or_default(),
      sex: match wire.sex {
        Some(1) => "female".into(),
        Some(2) => "male".into(),
        _ => "unknown".into(),
      },
      city: wire.city.map(|c| c.title).unwrap_or_default(),
      country: wire.country.map(|c| c.title).unwrap_or_default(),
    })
  }
}

#[derive(Deserialize)]
struct UsersEnvelope {
  #[serde(default)]
  response: Vec<WireUser>,
}

#[derive(Deserialize)]
struct WireUser {
  first_name: String,
  last_name: String,
  #[serde(default)]
  sex: Option<u8>,
  #[serde(default)]
  bdate: Option<String>,
  #[serde(default)]
  city: Option<Titled>,
  #[serde(default)]
  country: Option<Titled>,
}

#[derive(Deserialize)]
struct Titled {
  title: String,
}
