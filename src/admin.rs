//! Admin sub-machine: a login gate followed by a menu of question-bank and
//! player-data functions, nested inside the conversation engine.
//!
//! The whole flow is one persisted `AdminState` value per administrator.
//! Every leaf step either finishes back to the menu or re-prompts in place
//! on malformed input; the exit keyword wipes the state unconditionally from
//! any step. The quiz/chat state of the same user is never touched here.

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::domain::{AdminState, UserId};
use crate::engine::Bot;
use crate::error::{BotError, BotResult};
use crate::pool;
use crate::sheets::{self, ProfileRow};
use crate::store::{keys, SessionStore};
use crate::transport::{ButtonColor, Inbound, Keyboard, Outbound};

/// The persisted admin state for a user, if any. A value that no longer
/// deserializes (e.g. after an incompatible deploy) is dropped with a
/// warning so the administrator is never locked into a dead step.
pub async fn active_state(store: &dyn SessionStore, user: UserId) -> BotResult<Option<AdminState>> {
  match store.hget(&keys::admin(user), "state").await? {
    None => Ok(None),
    Some(raw) => match serde_json::from_str(&raw) {
      Ok(state) => Ok(Some(state)),
      Err(e) => {
        warn!(target: "admin", %user, error = %e, "Dropping unreadable admin state");
        store.del(&keys::admin(user)).await?;
        Ok(None)
      }
    },
  }
}

async fn save_state(store: &dyn SessionStore, user: UserId, state: &AdminState) -> BotResult<()> {
  let raw = serde_json::to_string(state).map_err(|e| BotError::Store(e.to_string()))?;
  store.hset(&keys::admin(user), "state", &raw).await
}

async fn clear_state(store: &dyn SessionStore, user: UserId) -> BotResult<()> {
  store.del(&keys::admin(user)).await
}

fn admin_menu_keyboard(bot: &Bot) -> Keyboard {
  let kw = &bot.config.keywords;
  Keyboard::one_time()
    .add_button(&kw.menu_players, ButtonColor::Primary)
    .add_button(&kw.menu_qa, ButtonColor::Negative)
    .add_line()
    .add_button(&kw.menu_generate, ButtonColor::Positive)
    .add_line()
    .add_button(&kw.menu_credentials, ButtonColor::Secondary)
}

fn qa_menu_keyboard(bot: &Bot) -> Keyboard {
  let kw = &bot.config.keywords;
  Keyboard::one_time()
    .add_button(&kw.qa_add, ButtonColor::Primary)
    .add_line()
    .add_button(&kw.qa_edit, ButtonColor::Negative)
    .add_line()
    .add_button(&kw.qa_delete, ButtonColor::Positive)
    .add_line()
    .add_button(&kw.qa_back, ButtonColor::Secondary)
}

fn yes_no_keyboard(bot: &Bot) -> Keyboard {
  let kw = &bot.config.keywords;
  Keyboard::one_time()
    .add_button(&kw.yes_button, ButtonColor::Positive)
    .add_button(&kw.no_button, ButtonColor::Negative)
}

/// Open the login gate, seeding the singleton credentials on first entry.
#[instrument(level = "info", skip(bot), fields(%user))]
pub async fn enter(bot: &Bot, user: UserId) -> BotResult<Vec<Outbound>> {
  let store = bot.store.as_ref();
  if store.hget(keys::ADMIN_CREDENTIALS, "login").await?.is_none() {
    store.hset(keys::ADMIN_CREDENTIALS, "login", &bot.config.default_admin_login).await?;
    store
      .hset(keys::ADMIN_CREDENTIALS, "password", &bot.config.default_admin_password)
      .await?;
    info!(target: "admin", "Seeded default admin credentials");
  }
  save_state(store, user, &AdminState::AwaitingLogin).await?;
  Ok(vec![Outbound::text("Enter login:")])
}

/// Route one message through the active admin step.
#[instrument(level = "info", skip(bot, state, inbound), fields(%user, step = ?state))]
pub async fn handle(
  bot: &Bot,
  user: UserId,
  state: AdminState,
  inbound: &Inbound,
) -> BotResult<Vec<Outbound>> {
  let store = bot.store.as_ref();
  let text = inbound.text.trim();
  let kw = &bot.config.keywords;

  // The exit keyword clears every admin flag unconditionally, from any step.
  if kw.is_admin_exit(text) {
    clear_state(store, user).await?;
    info!(target: "admin", %user, "Left admin mode");
    return Ok(vec![Outbound::text("Left admin mode.")]);
  }

  match state {
    AdminState::AwaitingLogin => {
      let expected = store.hget(keys::ADMIN_CREDENTIALS, "login").await?;
      if expected.as_deref() == Some(text) {
        save_state(store, user, &AdminState::AwaitingPassword).await?;
        Ok(vec![Outbound::text("Enter password:")])
      } else {
        Ok(vec![Outbound::text(
          "Wrong login. Try again, or write \"exit\" to leave admin mode.",
        )])
      }
    }

    AdminState::AwaitingPassword => {
      let expected = store.hget(keys::ADMIN_CREDENTIALS, "password").await?;
      if expected.as_deref() == Some(text) {
        save_state(store, user, &AdminState::Menu).await?;
        info!(target: "admin", %user, "Admin authenticated");
        Ok(vec![Outbound::with_keyboard("Entered admin mode.", admin_menu_keyboard(bot))])
      } else {
        Ok(vec![Outbound::text(
          "Wrong password. Try again, or write \"exit\" to leave admin mode.",
        )])
      }
    }

    AdminState::Menu => match menu_select(bot, user, text).await? {
      Some(replies) => Ok(replies),
      None => Ok(vec![Outbound::with_keyboard("Choose a function.", admin_menu_keyboard(bot))]),
    },

    AdminState::QaMenu => {
      if text.eq_ignore_ascii_case(&kw.qa_add) {
        save_state(store, user, &AdminState::UploadQa).await?;
        Ok(vec![Outbound::with_keyboard(upload_qa_instructions(), qa_menu_keyboard(bot))])
      } else if text.eq_ignore_ascii_case(&kw.qa_edit) {
        save_state(store, user, &AdminState::EditQaAwaitTarget).await?;
        Ok(vec![Outbound::with_keyboard(
          "Enter the id of the user whose questions you want to edit (digits only).",
          qa_menu_keyboard(bot),
        )])
      } else if text.eq_ignore_ascii_case(&kw.qa_delete) {
        save_state(store, user, &AdminState::DeleteQaConfirm).await?;
        Ok(vec![Outbound::with_keyboard(
          "Do you really want to delete every question and answer?",
          yes_no_keyboard(bot),
        )])
      } else if kw.is_back(text) {
        save_state(store, user, &AdminState::Menu).await?;
        Ok(vec![Outbound::with_keyboard("Back to the main screen.", admin_menu_keyboard(bot))])
      } else {
        Ok(vec![Outbound::with_keyboard(
          "Wrong input — choose a function.",
          qa_menu_keyboard(bot),
        )])
      }
    }

    AdminState::UploadQa => match &inbound.document {
      Some(doc) if has_ext(doc, "txt") => {
        let bytes = bot.transport.download(&doc.url).await?;
        let body = String::from_utf8_lossy(&bytes).into_owned();
        // Stage the file so users who start later get it too.
        let path = Path::new(&bot.config.staging_dir).join(&doc.title);
        std::fs::write(&path, &bytes)
          .map_err(|e| BotError::Store(format!("staging {}: {e}", path.display())))?;

        let users = bot.known_users().await?;
        let added = pool::load_pool(store, &body, &users).await?;
        info!(target: "admin", %user, added, users = users.len(), "Question file uploaded");
        save_state(store, user, &AdminState::Menu).await?;
        Ok(vec![Outbound::with_keyboard("File uploaded.", admin_menu_keyboard(bot))])
      }
      _ => Ok(vec![Outbound::with_keyboard(
        "Attach a .txt file with the questions.",
        qa_menu_keyboard(bot),
      )]),
    },

    AdminState::EditQaAwaitTarget => {
      let target: Option<UserId> = text.parse().ok();
      let known = match target {
        Some(id) => store.hget(keys::PROFILES, &id.to_string()).await?.is_some(),
        None => false,
      };
      match target {
        Some(target) if known => {
          let rows = pool::user_pairs(store, target).await?;
          let csv = sheets::export_qa_csv(&rows)?;
          save_state(store, user, &AdminState::EditQaAwaitSheet { target }).await?;
          Ok(vec![
            Outbound::with_keyboard(
              format!("Current questions for user {target} attached."),
              qa_menu_keyboard(bot),
            )
            .attach_document(format!("qa_{target}.csv"), csv),
            Outbound::with_keyboard(
              "Upload a sheet in the same format to fully replace this user's questions.",
              qa_menu_keyboard(bot),
            ),
          ])
        }
        _ => Ok(vec![Outbound::with_keyboard(
          "Invalid user id. Enter the id of an enrolled user (digits only).",
          qa_menu_keyboard(bot),
        )]),
      }
    }

    AdminState::EditQaAwaitSheet { target } => match &inbound.document {
      Some(doc) if has_ext(doc, "csv") => {
        let bytes = bot.transport.download(&doc.url).await?;
        match sheets::parse_qa_csv(&bytes) {
          Ok(pairs) => {
            pool::replace_pool(store, target, &pairs).await?;
            info!(target: "admin", %user, target_user = target, pairs = pairs.len(), "Question set replaced");
            save_state(store, user, &AdminState::Menu).await?;
            Ok(vec![Outbound::with_keyboard(
              format!("Question set replaced for user {target}."),
              admin_menu_keyboard(bot),
            )])
          }
          Err(e) => {
            warn!(target: "admin", %user, error = %e, "Unparseable replacement sheet");
            Ok(vec![Outbound::with_keyboard(
              "The sheet could not be parsed — upload a csv with question,answer columns.",
              qa_menu_keyboard(bot),
            )])
          }
        }
      }
      _ => Ok(vec![Outbound::with_keyboard(
        "Attach the replacement spreadsheet (.csv).",
        qa_menu_keyboard(bot),
      )]),
    },

    AdminState::DeleteQaConfirm => {
      save_state(store, user, &AdminState::Menu).await?;
      if kw.is_yes(text) {
        let users = bot.known_users().await?;
        pool::delete_all_pools(store, &users).await?;
        clear_staging_dir(&bot.config.staging_dir);
        info!(target: "admin", %user, users = users.len(), "All question pools deleted");
        Ok(vec![Outbound::with_keyboard(
          "All questions and answers have been deleted.",
          admin_menu_keyboard(bot),
        )])
      } else {
        Ok(vec![Outbound::with_keyboard(
          "Questions and answers were not deleted.",
          admin_menu_keyboard(bot),
        )])
      }
    }

    AdminState::UsersInfoAwaitSheet => {
      if let Some(doc) = inbound.document.as_ref().filter(|d| has_ext(d, "csv")) {
        let bytes = bot.transport.download(&doc.url).await?;
        match sheets::parse_profiles_csv(&bytes) {
          Ok(rows) => {
            store.del(keys::PROFILES).await?;
            for row in &rows {
              let raw = serde_json::to_string(&row.profile)
                .map_err(|e| BotError::Store(e.to_string()))?;
              store.hset(keys::PROFILES, &row.user_id.to_string(), &raw).await?;
              store
                .hset(keys::LEDGER, &row.user_id.to_string(), &row.balance.to_string())
                .await?;
            }
            info!(target: "admin", %user, rows = rows.len(), "Player data replaced");
            save_state(store, user, &AdminState::Menu).await?;
            Ok(vec![Outbound::with_keyboard("File uploaded.", admin_menu_keyboard(bot))])
          }
          Err(e) => {
            warn!(target: "admin", %user, error = %e, "Unparseable player-data sheet");
            Ok(vec![Outbound::with_keyboard(
              "The file was not in the expected csv format. Try again.",
              admin_menu_keyboard(bot),
            )])
          }
        }
      } else if let Some(replies) = menu_select(bot, user, text).await? {
        // The replacement upload is optional; menu buttons still work here.
        Ok(replies)
      } else {
        Ok(vec![Outbound::with_keyboard(
          "Upload a .csv file to replace player data, or pick a menu function.",
          admin_menu_keyboard(bot),
        )])
      }
    }

    AdminState::GenerateQaAwaitDocument => match &inbound.document {
      Some(doc) if has_ext(doc, "txt") => {
        let bytes = bot.transport.download(&doc.url).await?;
        let path = Path::new(&bot.config.staging_dir).join(&doc.title);
        std::fs::write(&path, &bytes)
          .map_err(|e| BotError::Store(format!("staging {}: {e}", path.display())))?;
        save_state(store, user, &AdminState::GenerateQaAwaitCount { document: doc.title.clone() })
          .await?;
        Ok(vec![Outbound::text("How many questions do you want to generate?")])
      }
      _ => Ok(vec![Outbound::with_keyboard(
        "Upload a .txt document to generate questions from.",
        admin_menu_keyboard(bot),
      )]),
    },

    AdminState::GenerateQaAwaitCount { document } => {
      if kw.is_back(text) {
        save_state(store, user, &AdminState::Menu).await?;
        return Ok(vec![Outbound::with_keyboard(
          "Back to the main screen.",
          admin_menu_keyboard(bot),
        )]);
      }
      match text.parse::<usize>() {
        Ok(count) if count > 0 => {
          let path = Path::new(&bot.config.staging_dir).join(&document);
          let doc_text = std::fs::read_to_string(&path)
            .map_err(|e| BotError::Store(format!("staged document {}: {e}", path.display())))?;
          let pairs = bot.llm.generate_qa(&bot.config.prompts, &doc_text, count).await?;
          let rendered = pool::render_marker_text(&pairs);
          info!(target: "admin", %user, count, generated = pairs.len(), "QA generated");
          // Stay on this step so more batches can come from the same document.
          Ok(vec![
            Outbound::text("Generated questions attached.")
              .attach_document("generated_qa.txt", rendered.into_bytes()),
            Outbound::text("Enter another count to generate again, or \"back\" for the menu."),
          ])
        }
        _ => Ok(vec![Outbound::text("Invalid number. Enter a positive integer.")]),
      }
    }

    AdminState::ChangeLogin => {
      if kw.is_admin_entry(text) {
        Ok(vec![Outbound::text(
          "The reserved admin keyword cannot be the login. Enter another login.",
        )])
      } else {
        store.hset(keys::ADMIN_CREDENTIALS, "login", text).await?;
        save_state(store, user, &AdminState::ChangePassword).await?;
        Ok(vec![
          Outbound::text(format!("Admin login changed to: {text}")),
          Outbound::text("Enter new password:"),
        ])
      }
    }

    AdminState::ChangePassword => {
      store.hset(keys::ADMIN_CREDENTIALS, "password", text).await?;
      save_state(store, user, &AdminState::Menu).await?;
      Ok(vec![Outbound::with_keyboard("Admin password changed.", admin_menu_keyboard(bot))])
    }
  }
}

/// Top-level menu dispatch, shared by `Menu` and the optional-upload step.
/// Returns None when the text is not a menu button.
async fn menu_select(bot: &Bot, user: UserId, text: &str) -> BotResult<Option<Vec<Outbound>>> {
  let store = bot.store.as_ref();
  let kw = &bot.config.keywords;

  if text.eq_ignore_ascii_case(&kw.menu_players) {
    let profiles = store.hgetall(keys::PROFILES).await?;
    let mut rows: Vec<ProfileRow> = Vec::with_capacity(profiles.len());
    for (id, raw) in &profiles {
      let Ok(user_id) = id.parse::<UserId>() else {
        warn!(target: "admin", id = %id, "Skipping profile with non-numeric id");
        continue;
      };
      let profile = serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(target: "admin", id = %id, error = %e, "Corrupt profile row in export");
        Default::default()
      });
      let balance = store
        .hget(keys::LEDGER, id)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
      rows.push(ProfileRow { user_id, profile, balance });
    }
    rows.sort_by_key(|r| r.user_id);
    let csv = sheets::export_profiles_csv(&rows)?;
    save_state(store, user, &AdminState::UsersInfoAwaitSheet).await?;
    return Ok(Some(vec![
      Outbound::with_keyboard("Player data attached.", admin_menu_keyboard(bot))
        .attach_document("players.csv", csv),
      Outbound::with_keyboard(
        "Upload an edited .csv file to replace player data.",
        admin_menu_keyboard(bot),
      ),
    ]));
  }

  if text.eq_ignore_ascii_case(&kw.menu_qa) {
    save_state(store, user, &AdminState::QaMenu).await?;
    return Ok(Some(vec![Outbound::with_keyboard("Choose a function.", qa_menu_keyboard(bot))]));
  }

  if text.eq_ignore_ascii_case(&kw.menu_generate) {
    save_state(store, user, &AdminState::GenerateQaAwaitDocument).await?;
    return Ok(Some(vec![Outbound::with_keyboard(
      "Upload a .txt document.",
      admin_menu_keyboard(bot),
    )]));
  }

  if text.eq_ignore_ascii_case(&kw.menu_credentials) {
    save_state(store, user, &AdminState::ChangeLogin).await?;
    return Ok(Some(vec![Outbound::text("Enter new login:")]));
  }

  Ok(None)
}

/// Wrong attachment types are user input errors: the step re-prompts.
fn has_ext(doc: &crate::transport::DocAttachment, ext: &str) -> bool {
  doc.ext.eq_ignore_ascii_case(ext)
}

fn upload_qa_instructions() -> String {
  format!(
    "Upload a .txt file.\nEvery question must start on a line \"{q} \" and every answer on a line \"{a} \". Pairs must be separated by blank lines.\n\nExample:\n{q} When was our company founded?\n{a} Our company was founded in 1995.\n\n{q} What is our corn-stick brand called?\n{a} Our brand is called \"Golden Sticks\".",
    q = pool::QUESTION_MARKER,
    a = pool::ANSWER_MARKER
  )
}

/// Remove staged source files; directory-level problems are logged, not fatal.
fn clear_staging_dir(dir: &str) {
  match std::fs::read_dir(dir) {
    Ok(entries) => {
      for entry in entries.flatten() {
        if entry.path().is_file() {
          if let Err(e) = std::fs::remove_file(entry.path()) {
            warn!(target: "admin", path = %entry.path().display(), error = %e, "Failed to remove staged file");
          }
        }
      }
    }
    Err(e) => warn!(target: "admin", dir, error = %e, "Failed to read staging dir"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::testing::{bot, inbound};
  use crate::store::keys;

  async fn authenticate(b: &crate::engine::Bot, user: UserId) {
    b.handle_message(&inbound(user, "admin")).await.unwrap();
    b.handle_message(&inbound(user, "quizmaster")).await.unwrap();
    let replies = b.handle_message(&inbound(user, "0000")).await.unwrap();
    assert!(replies[0].text.contains("Entered admin mode"));
  }

  #[tokio::test]
  async fn wrong_password_twice_then_exit_clears_all_flags() {
    let b = bot();
    let user = 10;
    b.handle_message(&inbound(user, "admin")).await.unwrap();
    b.handle_message(&inbound(user, "quizmaster")).await.unwrap();

    for _ in 0..2 {
      let replies = b.handle_message(&inbound(user, "nope")).await.unwrap();
      assert!(replies[0].text.contains("Wrong password"));
    }

    let replies = b.handle_message(&inbound(user, "exit")).await.unwrap();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("Left admin mode"));
    assert!(active_state(b.store.as_ref(), user).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn active_admin_state_short_circuits_the_quiz() {
    let b = bot();
    let user = 11;
    crate::pool::load_pool(b.store.as_ref(), "Question: Q?\nAnswer: A.", &[user])
      .await
      .unwrap();
    b.handle_message(&inbound(user, "admin")).await.unwrap();

    // "Question" is a quiz trigger, but admin routing wins: it is treated
    // as a (wrong) login attempt and no question is drawn.
    let replies = b.handle_message(&inbound(user, "Question")).await.unwrap();
    assert!(replies[0].text.contains("Wrong login"));
    assert_eq!(b.store.hlen(&keys::questions(user)).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn change_credentials_rejects_the_reserved_keyword() {
    let b = bot();
    let user = 12;
    authenticate(&b, user).await;
    b.handle_message(&inbound(user, "Change login and password")).await.unwrap();

    let replies = b.handle_message(&inbound(user, "admin")).await.unwrap();
    assert!(replies[0].text.contains("reserved admin keyword"));
    // Still awaiting a login, so a valid one is accepted next.
    let replies = b.handle_message(&inbound(user, "chief")).await.unwrap();
    assert!(replies[0].text.contains("login changed"));
    let replies = b.handle_message(&inbound(user, "s3cret")).await.unwrap();
    assert!(replies[0].text.contains("password changed"));

    let store = b.store.as_ref();
    assert_eq!(store.hget(keys::ADMIN_CREDENTIALS, "login").await.unwrap().as_deref(), Some("chief"));
    assert_eq!(store.hget(keys::ADMIN_CREDENTIALS, "password").await.unwrap().as_deref(), Some("s3cret"));
  }

  #[tokio::test]
  async fn delete_qa_needs_explicit_yes() {
    let mut b = bot();
    let staging = tempfile::tempdir().unwrap();
    std::fs::write(staging.path().join("batch.txt"), "Question: Q?\nAnswer: A.").unwrap();
    b.config.staging_dir = staging.path().to_string_lossy().into_owned();

    let user = 13;
    // Two enrolled players with pools.
    for id in [100, 200] {
      b.store.hset(keys::PROFILES, &id.to_string(), "{}").await.unwrap();
    }
    crate::pool::load_pool(b.store.as_ref(), "Question: Q?\nAnswer: A.", &[100, 200])
      .await
      .unwrap();

    authenticate(&b, user).await;
    b.handle_message(&inbound(user, "Questions and answers")).await.unwrap();
    b.handle_message(&inbound(user, "Delete questions")).await.unwrap();

    // Declining leaves everything in place.
    let replies = b.handle_message(&inbound(user, "No")).await.unwrap();
    assert!(replies[0].text.contains("not deleted"));
    assert_eq!(b.store.hlen(&keys::questions(100)).await.unwrap(), 1);
    assert!(staging.path().join("batch.txt").exists());

    // Confirming clears pools and the staging directory.
    b.handle_message(&inbound(user, "Questions and answers")).await.unwrap();
    b.handle_message(&inbound(user, "Delete questions")).await.unwrap();
    let replies = b.handle_message(&inbound(user, "Yes")).await.unwrap();
    assert!(replies[0].text.contains("have been deleted"));
    assert_eq!(b.store.hlen(&keys::questions(100)).await.unwrap(), 0);
    assert_eq!(b.store.hlen(&keys::questions(200)).await.unwrap(), 0);
    assert!(!staging.path().join("batch.txt").exists());
  }

  #[tokio::test]
  async fn edit_qa_validates_the_target_id() {
    let b = bot();
    let user = 14;
    authenticate(&b, user).await;
    b.handle_message(&inbound(user, "Questions and answers")).await.unwrap();
    b.handle_message(&inbound(user, "Edit questions")).await.unwrap();

    // Unknown id re-prompts on the same step.
    let replies = b.handle_message(&inbound(user, "999")).await.unwrap();
    assert!(replies[0].text.contains("Invalid user id"));
    assert_eq!(
      active_state(b.store.as_ref(), user).await.unwrap(),
      Some(AdminState::EditQaAwaitTarget)
    );

    // A known id exports the current pool and awaits the replacement sheet.
    b.store.hset(keys::PROFILES, "300", "{}").await.unwrap();
    crate::pool::load_pool(b.store.as_ref(), "Question: Q?\nAnswer: A.", &[300])
      .await
      .unwrap();
    let replies = b.handle_message(&inbound(user, "300")).await.unwrap();
    assert!(replies[0].document.is_some());
    assert_eq!(
      active_state(b.store.as_ref(), user).await.unwrap(),
      Some(AdminState::EditQaAwaitSheet { target: 300 })
    );
  }

  #[tokio::test]
  async fn generate_qa_reprompts_on_a_bad_count() {
    let b = bot();
    let user = 15;
    authenticate(&b, user).await;
    b.handle_message(&inbound(user, "Generate questions")).await.unwrap();
    // Jump straight to the count step as if a document had been staged.
    save_state(b.store.as_ref(), user, &AdminState::GenerateQaAwaitCount {
      document: "notes.txt".into(),
    })
    .await
    .unwrap();

    let replies = b.handle_message(&inbound(user, "lots")).await.unwrap();
    assert!(replies[0].text.contains("Invalid number"));

    let replies = b.handle_message(&inbound(user, "back")).await.unwrap();
    assert!(replies[0].text.contains("main screen"));
    assert_eq!(active_state(b.store.as_ref(), user).await.unwrap(), Some(AdminState::Menu));
  }
}
