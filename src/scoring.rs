//! Answer-scoring pipeline: reference-answer normalization, the tiered bonus
//! table over the two similarity signals, and reward-ledger accrual.
//!
//! The two signals are independent: cosine similarity between embeddings of
//! the submitted and reference answers, and a 0–1 grade assigned by the LLM
//! with a rationale. The tier table is ordered first-match, not an average:
//! near-verbatim answers win the top tiers on cosine alone even if the
//! grader is miscalibrated; below that only the grade decides.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use crate::config::Prompts;
use crate::domain::UserId;
use crate::error::BotResult;
use crate::llm::LlmClient;
use crate::store::{keys, SessionStore};

static ASIDES: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[(\[].*?[)\]]").expect("asides regex"));

/// Normalize a reference answer before comparison: drop parenthetical and
/// bracketed asides, lowercase, trim surrounding whitespace and trailing
/// periods. Idempotent, so source-material formatting cannot bias grading.
pub fn normalize(text: &str) -> String {
  let stripped = ASIDES.replace_all(text, "");
  stripped
    .to_lowercase()
    .trim()
    .trim_end_matches('.')
    .trim()
    .to_string()
}

/// The discrete reward for a graded answer. Ordered first-match; the
/// grade bound for the top tier is strict, every other bound is inclusive.
pub fn bonus_tier(cosine: f32, grade: f32) -> u32 {
  if cosine >= 0.98 || grade > 0.8 {
    100
  } else if cosine >= 0.97 || grade >= 0.7 {
    70
  } else if grade >= 0.5 {
    50
  } else if grade >= 0.3 {
    30
  } else if grade >= 0.1 {
    10
  } else {
    0
  }
}

/// User-facing wording per tier, with the grader's rationale attached.
pub fn tier_message(bonus: u32, rationale: &str) -> String {
  match bonus {
    100 => format!("Correct! You earn 100 points.\nReason: {rationale}"),
    70 => format!("Almost correct! You earn 70 points.\nReason: {rationale}"),
    50 => format!("Partially correct. You earn 50 points.\nReason: {rationale}"),
    30 => format!("Mostly incorrect. You earn 30 points.\nReason: {rationale}"),
    10 => format!("Hmm... You earn 10 points.\nReason: {rationale}"),
    _ => format!("No, that's wrong.\nReason: {rationale}"),
  }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm_a == 0.0 || norm_b == 0.0 {
    return 0.0;
  }
  dot / (norm_a * norm_b)
}

/// Run both signals for one submission and fold them into a bonus tier.
/// Any LLM failure (or an unparseable grade) aborts the whole step; the
/// caller surfaces a generic retry-later message, never a silent tier.
#[instrument(level = "info", skip_all, fields(answer_len = submitted.len()))]
pub async fn score(
  llm: &LlmClient,
  prompts: &Prompts,
  submitted: &str,
  reference: &str,
  question: &str,
) -> BotResult<(u32, String)> {
  let submitted_emb = llm.embed(submitted).await?;
  let reference_emb = llm.embed(reference).await?;
  let cosine = cosine_similarity(&submitted_emb, &reference_emb);

  let (grade, rationale) = llm.grade_answer(prompts, question, reference, submitted).await?;
  let bonus = bonus_tier(cosine, grade);
  debug!(target: "scoring", cosine, grade, bonus, "Answer scored");
  Ok((bonus, rationale))
}

/// Add a bonus to the user's reward balance, initializing from zero for a
/// user with no prior balance. Atomic in the store, so two accruals cannot
/// lose an update. Returns the new balance.
pub async fn apply_bonus(store: &dyn SessionStore, user: UserId, bonus: u32) -> BotResult<i64> {
  store.hincrby(keys::LEDGER, &user.to_string(), i64::from(bonus)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;

  #[test]
  fn normalize_strips_asides_and_is_idempotent() {
    let raw = "  The Golden Sticks brand (founded 1995) [citation].  ";
    let once = normalize(raw);
    assert_eq!(once, "the golden sticks brand");
    assert_eq!(normalize(&once), once);
  }

  #[test]
  fn normalize_trims_trailing_periods() {
    assert_eq!(normalize("In 1995."), "in 1995");
    assert_eq!(normalize(normalize("In 1995.").as_str()), "in 1995");
  }

  #[test]
  fn tier_boundaries_cosine_and_grade() {
    // Cosine alone can award the top two tiers.
    assert_eq!(bonus_tier(0.98, 0.0), 100);
    assert_eq!(bonus_tier(0.97, 0.0), 70);
    assert_eq!(bonus_tier(0.969, 0.0), 0);
    // The 0.8 grade bound is strict; 0.7 and below are inclusive.
    assert_eq!(bonus_tier(0.0, 0.81), 100);
    assert_eq!(bonus_tier(0.0, 0.8), 70);
    assert_eq!(bonus_tier(0.0, 0.7), 70);
    assert_eq!(bonus_tier(0.0, 0.5), 50);
    assert_eq!(bonus_tier(0.0, 0.3), 30);
    assert_eq!(bonus_tier(0.0, 0.1), 10);
    assert_eq!(bonus_tier(0.0, 0.09), 0);
  }

  #[test]
  fn tier_table_is_total_over_the_unit_square() {
    // Exactly one tier applies to any signal pair; sweep a coarse grid.
    for ci in 0..=20 {
      for gi in 0..=20 {
        let cosine = ci as f32 / 20.0;
        let grade = gi as f32 / 20.0;
        let bonus = bonus_tier(cosine, grade);
        assert!(matches!(bonus, 0 | 10 | 30 | 50 | 70 | 100));
        // Determinism: same inputs, same tier.
        assert_eq!(bonus, bonus_tier(cosine, grade));
      }
    }
  }

  #[test]
  fn identical_embeddings_have_unit_cosine() {
    let v = vec![0.5, -1.0, 2.0];
    let cos = cosine_similarity(&v, &v);
    assert!((cos - 1.0).abs() < 1e-6);
    // An exact-match answer therefore lands in the 100 tier.
    assert_eq!(bonus_tier(cos, 0.0), 100);
  }

  #[test]
  fn zero_vectors_do_not_divide_by_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
  }

  #[tokio::test]
  async fn bonus_accrues_from_absent_balance() {
    let store = MemoryStore::new();
    // grade 0.45 → tier 50, no prior balance → 50.
    let bonus = bonus_tier(0.5, 0.45);
    assert_eq!(bonus, 50);
    let balance = apply_bonus(&store, 42, bonus).await.unwrap();
    assert_eq!(balance, 50);

    // An exact match afterwards brings it to 150.
    let balance = apply_bonus(&store, 42, 100).await.unwrap();
    assert_eq!(balance, 150);
  }
}
