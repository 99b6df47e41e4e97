//! Spreadsheet import/export: tabular CSV documents for question/answer
//! pools (edit-qa flow) and user profiles with balances (player-data flow).
//!
//! Exports and imports use the same headers, so a downloaded sheet can be
//! edited and re-uploaded unchanged.

use serde::{Deserialize, Serialize};

use crate::domain::{UserId, UserProfile};
use crate::error::{BotError, BotResult};

#[derive(Debug, Serialize, Deserialize)]
struct QaRecord {
  question: String,
  answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileRecord {
  id: UserId,
  first_name: String,
  last_name: String,
  birth_date: String,
  sex: String,
  city: String,
  country: String,
  balance: i64,
}

/// A profile row joined with its ledger balance, as exported/imported.
#[derive(Clone, Debug)]
pub struct ProfileRow {
  pub user_id: UserId,
  pub profile: UserProfile,
  pub balance: i64,
}

fn csv_err(e: csv::Error) -> BotError {
  BotError::DataConsistency(format!("spreadsheet: {e}"))
}

pub fn export_qa_csv(rows: &[(u64, String, String)]) -> BotResult<Vec<u8>> {
  let mut writer = csv::Writer::from_writer(Vec::new());
  for (_, question, answer) in rows {
    writer
      .serialize(QaRecord { question: question.clone(), answer: answer.clone() })
      .map_err(csv_err)?;
  }
  writer
    .into_inner()
    .map_err(|e| BotError::DataConsistency(format!("spreadsheet: {e}")))
}

pub fn parse_qa_csv(bytes: &[u8]) -> BotResult<Vec<(String, String)>> {
  let mut reader = csv::Reader::from_reader(bytes);
  let mut pairs = Vec::new();
  for record in reader.deserialize::<QaRecord>() {
    let r = record.map_err(csv_err)?;
    if !r.question.trim().is_empty() && !r.answer.trim().is_empty() {
      pairs.push((r.question.trim().to_string(), r.answer.trim().to_string()));
    }
  }
  Ok(pairs)
}

pub fn export_profiles_csv(rows: &[ProfileRow]) -> BotResult<Vec<u8>> {
  let mut writer = csv::Writer::from_writer(Vec::new());
  for row in rows {
    writer
      .serialize(ProfileRecord {
        id: row.user_id,
        first_name: row.profile.first_name.clone(),
        last_name: row.profile.last_name.clone(),
        birth_date: row.profile.birth_date.clone(),
        sex: row.profile.sex.clone(),
        city: row.profile.city.clone(),
        country: row.profile.country.clone(),
        balance: row.balance,
      })
      .map_err(csv_err)?;
  }
  writer
    .into_inner()
    .map_err(|e| BotError::DataConsistency(format!("spreadsheet: {e}")))
}

pub fn parse_profiles_csv(bytes: &[u8]) -> BotResult<Vec<ProfileRow>> {
  let mut reader = csv::Reader::from_reader(bytes);
  let mut rows = Vec::new();
  for record in reader.deserialize::<ProfileRecord>() {
    let r = record.map_err(csv_err)?;
    rows.push(ProfileRow {
      user_id: r.id,
      profile: UserProfile {
        first_name: r.first_name,
        last_name: r.last_name,
        birth_date: r.birth_date,
        sex: r.sex,
        city: r.city,
        country: r.country,
      },
      balance: r.balance,
    });
  }
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn qa_sheet_round_trips() {
    let rows = vec![
      (0, "When was the company founded?".to_string(), "In 1995.".to_string()),
      (1, "What, exactly, is \"quoted\"?".to_string(), "Commas, too.".to_string()),
    ];
    let bytes = export_qa_csv(&rows).unwrap();
    let parsed = parse_qa_csv(&bytes).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].0, rows[0].1);
    assert_eq!(parsed[1].1, rows[1].2);
  }

  #[test]
  fn profile_sheet_round_trips_with_balance() {
    let rows = vec![ProfileRow {
      user_id: 77,
      profile: UserProfile {
        first_name: "Ada".into(),
        last_name: "L".into(),
        birth_date: "10.12.1985".into(),
        sex: "female".into(),
        city: "London".into(),
        country: "UK".into(),
      },
      balance: 170,
    }];
    let bytes = export_profiles_csv(&rows).unwrap();
    let parsed = parse_profiles_csv(&bytes).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].user_id, 77);
    assert_eq!(parsed[0].profile.city, "London");
    assert_eq!(parsed[0].balance, 170);
  }

  #[test]
  fn malformed_sheet_is_an_error_not_a_panic() {
    assert!(parse_profiles_csv(b"id,first_name\nnot-a-number,x").is_err());
  }
}
