//! Question pool manager: parsing of the marker-format question source,
//! per-user pool load/draw/delete/replace, and the issued-question record.
//!
//! A pool is two parallel hashes (`questions:<user>`, `answers:<user>`) keyed
//! by slot. Slot keys come from a per-user monotone counter and are never
//! reused within a pool generation, so a freshly loaded batch cannot collide
//! with a previously drawn-and-deleted slot. `replace_pool` is the one
//! operation that restarts the numbering.

use std::path::Path;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::domain::{IssuedQuestion, UserId};
use crate::error::{BotError, BotResult};
use crate::store::{keys, SessionStore};

pub const QUESTION_MARKER: &str = "Question:";
pub const ANSWER_MARKER: &str = "Answer:";

/// Parse a question source: units separated by a blank line, each unit
/// holding one line prefixed `Question:` and one prefixed `Answer:`.
/// Units missing either marker are skipped silently: tolerance for
/// hand-edited files, not an error to propagate.
pub fn parse_marker_text(text: &str) -> Vec<(String, String)> {
  let mut pairs = Vec::new();
  for unit in text.split("\n\n") {
    let question = unit
      .lines()
      .find_map(|l| l.trim().strip_prefix(QUESTION_MARKER));
    let answer = unit
      .lines()
      .find_map(|l| l.trim().strip_prefix(ANSWER_MARKER));
    match (question, answer) {
      (Some(q), Some(a)) if !q.trim().is_empty() && !a.trim().is_empty() => {
        pairs.push((q.trim().to_string(), a.trim().to_string()));
      }
      _ => {}
    }
  }
  pairs
}

/// Inverse of `parse_marker_text`; round-trips modulo whitespace.
pub fn render_marker_text(pairs: &[(String, String)]) -> String {
  pairs
    .iter()
    .map(|(q, a)| format!("{QUESTION_MARKER} {q}\n{ANSWER_MARKER} {a}"))
    .collect::<Vec<_>>()
    .join("\n\n")
}

async fn next_slot(store: &dyn SessionStore, user: UserId) -> BotResult<u64> {
  match store.hget(keys::SLOTS, &user.to_string()).await? {
    None => Ok(0),
    Some(raw) => raw
      .parse()
      .map_err(|_| BotError::DataConsistency(format!("corrupt slot counter for user {user}: {raw}"))),
  }
}

/// Append parsed pairs from a source text to the pool of every given user,
/// continuing each user's slot counter from its persisted value.
#[instrument(level = "info", skip(store, text), fields(users = user_ids.len(), text_len = text.len()))]
pub async fn load_pool(
  store: &dyn SessionStore,
  text: &str,
  user_ids: &[UserId],
) -> BotResult<usize> {
  let pairs = parse_marker_text(text);
  if pairs.is_empty() {
    warn!(target: "pool", "Source text yielded no question/answer pairs");
    return Ok(0);
  }
  for &user in user_ids {
    let start = next_slot(store, user).await?;
    for (i, (q, a)) in pairs.iter().enumerate() {
      let slot = (start + i as u64).to_string();
      store.hset(&keys::questions(user), &slot, q).await?;
      store.hset(&keys::answers(user), &slot, a).await?;
    }
    store
      .hset(keys::SLOTS, &user.to_string(), &(start + pairs.len() as u64).to_string())
      .await?;
    debug!(target: "pool", %user, added = pairs.len(), from_slot = start, "Pool extended");
  }
  Ok(pairs.len())
}

/// Load every staged source file for one user (the first-quiz-start path).
#[instrument(level = "info", skip(store, dir), fields(%user))]
pub async fn load_dir(store: &dyn SessionStore, dir: &Path, user: UserId) -> BotResult<usize> {
  let entries = std::fs::read_dir(dir)
    .map_err(|e| BotError::Store(format!("staging dir {}: {e}", dir.display())))?;
  let mut total = 0;
  for entry in entries.flatten() {
    if !entry.path().is_file() {
      continue;
    }
    match std::fs::read_to_string(entry.path()) {
      Ok(text) => total += load_pool(store, &text, &[user]).await?,
      Err(e) => {
        warn!(target: "pool", path = %entry.path().display(), error = %e, "Skipping unreadable source file");
      }
    }
  }
  info!(target: "pool", %user, total, "Loaded staged question sources");
  Ok(total)
}

/// Draw one slot uniformly at random: record it as the issued question and
/// remove it from both pool hashes. `Ok(None)` signals pool exhaustion,
/// a normal outcome the caller turns into a user-facing notice.
#[instrument(level = "info", skip(store), fields(%user))]
pub async fn draw_question(
  store: &dyn SessionStore,
  user: UserId,
) -> BotResult<Option<IssuedQuestion>> {
  let slots = store.hkeys(&keys::questions(user)).await?;
  if slots.is_empty() {
    return Ok(None);
  }
  let slot = &slots[rand::thread_rng().gen_range(0..slots.len())];

  let question = store
    .hget(&keys::questions(user), slot)
    .await?
    .ok_or_else(|| BotError::DataConsistency(format!("slot {slot} vanished for user {user}")))?;
  let answer = store.hget(&keys::answers(user), slot).await?.ok_or_else(|| {
    BotError::DataConsistency(format!("slot {slot} has no reference answer for user {user}"))
  })?;

  let issued_key = keys::issued(user);
  store.hset(&issued_key, "question", &question).await?;
  store.hset(&issued_key, "answer", &answer).await?;
  store.hset(&issued_key, "slot", slot).await?;

  store.hdel(&keys::questions(user), slot).await?;
  store.hdel(&keys::answers(user), slot).await?;

  let slot_num = slot.parse().unwrap_or(0);
  debug!(target: "pool", %user, slot = %slot, "Question drawn");
  Ok(Some(IssuedQuestion { question, answer, slot: slot_num }))
}

/// The currently-outstanding question, if one was ever issued.
pub async fn issued_question(
  store: &dyn SessionStore,
  user: UserId,
) -> BotResult<Option<IssuedQuestion>> {
  let record = store.hgetall(&keys::issued(user)).await?;
  match (record.get("question"), record.get("answer")) {
    (Some(q), Some(a)) => Ok(Some(IssuedQuestion {
      question: q.clone(),
      answer: a.clone(),
      slot: record.get("slot").and_then(|s| s.parse().ok()).unwrap_or(0),
    })),
    _ => Ok(None),
  }
}

/// Clear pool, answers and slot counter for each given user. The admin
/// bulk-delete path.
#[instrument(level = "info", skip(store), fields(users = user_ids.len()))]
pub async fn delete_all_pools(store: &dyn SessionStore, user_ids: &[UserId]) -> BotResult<()> {
  for &user in user_ids {
    store.del(&keys::questions(user)).await?;
    store.del(&keys::answers(user)).await?;
    store.hdel(keys::SLOTS, &user.to_string()).await?;
  }
  info!(target: "pool", users = user_ids.len(), "Pools cleared");
  Ok(())
}

/// Discard a user's pool entirely and repopulate from an ordered pair list,
/// slot keys restarting at zero. The admin bulk-edit path.
#[instrument(level = "info", skip(store, pairs), fields(%user, pairs = pairs.len()))]
pub async fn replace_pool(
  store: &dyn SessionStore,
  user: UserId,
  pairs: &[(String, String)],
) -> BotResult<()> {
  store.del(&keys::questions(user)).await?;
  store.del(&keys::answers(user)).await?;
  for (i, (q, a)) in pairs.iter().enumerate() {
    let slot = i.to_string();
    store.hset(&keys::questions(user), &slot, q).await?;
    store.hset(&keys::answers(user), &slot, a).await?;
  }
  store
    .hset(keys::SLOTS, &user.to_string(), &pairs.len().to_string())
    .await?;
  Ok(())
}

/// Ordered snapshot of a user's remaining pool, for the edit-qa export.
pub async fn user_pairs(
  store: &dyn SessionStore,
  user: UserId,
) -> BotResult<Vec<(u64, String, String)>> {
  let questions = store.hgetall(&keys::questions(user)).await?;
  let answers = store.hgetall(&keys::answers(user)).await?;
  let mut rows = Vec::with_capacity(questions.len());
  for (slot, q) in &questions {
    let a = answers.get(slot).ok_or_else(|| {
      BotError::DataConsistency(format!("slot {slot} has no reference answer for user {user}"))
    })?;
    rows.push((slot.parse().unwrap_or(0), q.clone(), a.clone()));
  }
  rows.sort_by_key(|(slot, _, _)| *slot);
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use std::collections::HashSet;

  const SOURCE: &str = "Question: When was the company founded?\nAnswer: In 1995.\n\nQuestion: What is the brand called?\nAnswer: Golden Sticks.\n\nbroken unit without markers\n\nQuestion: orphaned question, no answer\n";

  #[test]
  fn parse_skips_units_missing_either_marker() {
    let pairs = parse_marker_text(SOURCE);
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].0, "When was the company founded?");
    assert_eq!(pairs[1].1, "Golden Sticks.");
  }

  #[test]
  fn marker_format_round_trips() {
    let pairs = parse_marker_text(SOURCE);
    let rendered = render_marker_text(&pairs);
    assert_eq!(parse_marker_text(&rendered), pairs);
  }

  #[tokio::test]
  async fn draws_are_unique_until_exhaustion() {
    let store = MemoryStore::new();
    let n = load_pool(&store, SOURCE, &[1]).await.unwrap();
    assert_eq!(n, 2);

    let mut seen = HashSet::new();
    for _ in 0..n {
      let iq = draw_question(&store, 1).await.unwrap().expect("question available");
      assert!(seen.insert(iq.slot), "slot {} drawn twice", iq.slot);
    }
    assert!(draw_question(&store, 1).await.unwrap().is_none(), "pool should be exhausted");
  }

  #[tokio::test]
  async fn slot_counter_continues_across_loads() {
    let store = MemoryStore::new();
    load_pool(&store, SOURCE, &[5]).await.unwrap();
    load_pool(&store, SOURCE, &[5]).await.unwrap();

    let rows = user_pairs(&store, 5).await.unwrap();
    let slots: Vec<u64> = rows.iter().map(|(s, _, _)| *s).collect();
    assert_eq!(slots, vec![0, 1, 2, 3]);
  }

  #[tokio::test]
  async fn delete_all_pools_leaves_other_users_untouched() {
    let store = MemoryStore::new();
    load_pool(&store, SOURCE, &[1, 2, 3]).await.unwrap();

    delete_all_pools(&store, &[1, 2]).await.unwrap();

    assert_eq!(store.hlen(&keys::questions(1)).await.unwrap(), 0);
    assert_eq!(store.hlen(&keys::answers(2)).await.unwrap(), 0);
    assert!(store.hget(keys::SLOTS, "1").await.unwrap().is_none());
    assert_eq!(store.hlen(&keys::questions(3)).await.unwrap(), 2);
    assert_eq!(store.hget(keys::SLOTS, "3").await.unwrap().as_deref(), Some("2"));
  }

  #[tokio::test]
  async fn replace_pool_restarts_slots_at_zero() {
    let store = MemoryStore::new();
    load_pool(&store, SOURCE, &[9]).await.unwrap();
    draw_question(&store, 9).await.unwrap();

    let fresh = vec![("New question?".to_string(), "New answer.".to_string())];
    replace_pool(&store, 9, &fresh).await.unwrap();

    let rows = user_pairs(&store, 9).await.unwrap();
    assert_eq!(rows, vec![(0, "New question?".to_string(), "New answer.".to_string())]);
    assert_eq!(store.hget(keys::SLOTS, "9").await.unwrap().as_deref(), Some("1"));
  }
}
