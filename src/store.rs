//! Session store: the shared key-value collaborator behind every component.
//!
//! The store exposes hash-style operations only (field→value maps under a
//! namespaced key). Single-key reads and writes are atomic; there are no
//! multi-key transactions, so the engine assumes at most one in-flight
//! message per user. Reward accrual goes through `hincrby` so the ledger
//! update is atomic on its own.
//!
//! Two implementations:
//!   - `RedisStore` for production, over a tokio connection manager.
//!   - `MemoryStore` for tests and tokenless local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::UserId;
use crate::error::{BotError, BotResult};

/// Key namespaces, one constructor per purpose. Field names within each hash
/// are the slot keys, user ids, or attribute names documented on the callers.
pub mod keys {
    use super::UserId;

    pub const SLOTS: &str = "slots";
    pub const PROFILES: &str = "profiles";
    pub const LEDGER: &str = "ledger";
    pub const ADMIN_CREDENTIALS: &str = "admin:credentials";

    pub fn questions(user: UserId) -> String {
        format!("questions:{user}")
    }
    pub fn answers(user: UserId) -> String {
        format!("answers:{user}")
    }
    pub fn issued(user: UserId) -> String {
        format!("issued:{user}")
    }
    pub fn answer_log(user: UserId) -> String {
        format!("log:{user}")
    }
    pub fn session(user: UserId) -> String {
        format!("session:{user}")
    }
    pub fn admin(user: UserId) -> String {
        format!("admin:{user}")
    }
    pub fn chat_history(user: UserId) -> String {
        format!("chat-history:{user}")
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> BotResult<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> BotResult<()>;
    async fn hdel(&self, key: &str, field: &str) -> BotResult<()>;
    async fn hgetall(&self, key: &str) -> BotResult<HashMap<String, String>>;
    async fn hkeys(&self, key: &str) -> BotResult<Vec<String>>;
    async fn hlen(&self, key: &str) -> BotResult<usize>;
    async fn del(&self, key: &str) -> BotResult<()>;
    /// Atomic add on an integer-valued field; missing fields count as 0.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> BotResult<i64>;
}

// ---------------------------------------------------------------- Redis ----

pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect eagerly so a bad URL fails at startup, not on first message.
    pub async fn connect(url: &str) -> BotResult<Self> {
        let client = redis::Client::open(url).map_err(BotError::from)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(BotError::from)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn hget(&self, key: &str, field: &str) -> BotResult<Option<String>> {
        let mut conn = self.conn.clone();
        let v: Option<String> = redis::AsyncCommands::hget(&mut conn, key, field).await?;
        Ok(v)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> BotResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::AsyncCommands::hset(&mut conn, key, field, value).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> BotResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::AsyncCommands::hdel(&mut conn, key, field).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> BotResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let v: HashMap<String, String> = redis::AsyncCommands::hgetall(&mut conn, key).await?;
        Ok(v)
    }

    async fn hkeys(&self, key: &str) -> BotResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let v: Vec<String> = redis::AsyncCommands::hkeys(&mut conn, key).await?;
        Ok(v)
    }

    async fn hlen(&self, key: &str) -> BotResult<usize> {
        let mut conn = self.conn.clone();
        let v: usize = redis::AsyncCommands::hlen(&mut conn, key).await?;
        Ok(v)
    }

    async fn del(&self, key: &str) -> BotResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::AsyncCommands::del(&mut conn, key).await?;
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> BotResult<i64> {
        let mut conn = self.conn.clone();
        let v: i64 = redis::AsyncCommands::hincr(&mut conn, key, field, delta).await?;
        Ok(v)
    }
}

// --------------------------------------------------------------- Memory ----

/// In-process store with the same contract, keyed hash-of-hashes behind one
/// lock. Used by the test suite and when no REDIS_URL is configured.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn hget(&self, key: &str, field: &str) -> BotResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> BotResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> BotResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(h) = inner.get_mut(key) {
            h.remove(field);
            if h.is_empty() {
                inner.remove(key);
            }
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> BotResult<HashMap<String, String>> {
        let inner = self.inner.read().await;
        Ok(inner.get(key).cloned().unwrap_or_default())
    }

    async fn hkeys(&self, key: &str) -> BotResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> BotResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner.get(key).map(|h| h.len()).unwrap_or(0))
    }

    async fn del(&self, key: &str) -> BotResult<()> {
        let mut inner = self.inner.write().await;
        inner.remove(key);
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> BotResult<i64> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let current: i64 = slot
            .parse()
            .map_err(|_| BotError::Store(format!("non-integer field {key}/{field}: {slot}")))?;
        let next = current + delta;
        *slot = next.to_string();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hincrby_initializes_missing_fields_from_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.hincrby(keys::LEDGER, "7", 50).await.unwrap(), 50);
        assert_eq!(store.hincrby(keys::LEDGER, "7", 100).await.unwrap(), 150);
        assert_eq!(
            store.hget(keys::LEDGER, "7").await.unwrap().as_deref(),
            Some("150")
        );
    }

    #[tokio::test]
    async fn del_removes_the_whole_hash() {
        let store = MemoryStore::new();
        store.hset("questions:1", "0", "q").await.unwrap();
        store.hset("questions:1", "1", "r").await.unwrap();
        store.del("questions:1").await.unwrap();
        assert_eq!(store.hlen("questions:1").await.unwrap(), 0);
        assert!(store.hget("questions:1", "0").await.unwrap().is_none());
    }
}
