use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foundations::BootstrapResult;
use sqlx::MySqlPool;

use crate::{
  model::{NewUser, StatsUpdate, UserRecord},
  store::{RosterStore, StoreError},
};

const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS users (
  id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
  username VARCHAR(255) NOT NULL,
  roll_num VARCHAR(32) NOT NULL,
  class VARCHAR(8) NULL,
  leetcode_id VARCHAR(255) NULL,
  profileimg TEXT NULL,
  totalsolved INT UNSIGNED NOT NULL DEFAULT 0,
  easy_solved INT UNSIGNED NOT NULL DEFAULT 0,
  medium_solved INT UNSIGNED NOT NULL DEFAULT 0,
  hard_solved INT UNSIGNED NOT NULL DEFAULT 0,
  weekly_solved INT UNSIGNED NOT NULL DEFAULT 0,
  acceptance_rate DOUBLE NOT NULL DEFAULT 0,
  ranking INT UNSIGNED NULL,
  recent_languages TEXT NULL,
  last_active TIMESTAMP NULL,
  about TEXT NULL,
  INDEX users_leetcode_id (leetcode_id)
)";

const SELECT_USERS: &str = "SELECT id, username, roll_num, class, leetcode_id, profileimg, \
                            totalsolved, easy_solved, medium_solved, hard_solved, weekly_solved, \
                            acceptance_rate, ranking, recent_languages, last_active, about FROM \
                            users";

#[derive(sqlx::FromRow)]
struct UserRow {
  id: u64,
  username: String,
  roll_num: String,
  class: Option<String>,
  leetcode_id: Option<String>,
  profileimg: Option<String>,
  totalsolved: u32,
  easy_solved: u32,
  medium_solved: u32,
  hard_solved: u32,
  weekly_solved: u32,
  acceptance_rate: f64,
  ranking: Option<u32>,
  /// JSON array of strings
  recent_languages: Option<String>,
  last_active: Option<DateTime<Utc>>,
  about: Option<String>,
}

impl From<UserRow> for UserRecord {
  fn from(row: UserRow) -> Self {
    let class = row.class.as_deref().and_then(|class| match class.parse() {
      Ok(class) => Some(class),
      Err(err) => {
        warn!("Ignoring bad class for user id={}: {err}", row.id);
        None
      },
    });
    let recent_languages = match row.recent_languages.as_deref() {
      None | Some("") => Vec::new(),
      Some(raw) => serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!("Ignoring bad recent_languages for user id={}: {err}", row.id);
        Vec::new()
      }),
    };

    UserRecord {
      id: row.id,
      username: row.username,
      roll_num: row.roll_num,
      class,
      leetcode_id: row.leetcode_id,
      profileimg: row.profileimg,
      totalsolved: row.totalsolved,
      easy_solved: row.easy_solved,
      medium_solved: row.medium_solved,
      hard_solved: row.hard_solved,
      weekly_solved: row.weekly_solved,
      acceptance_rate: row.acceptance_rate,
      ranking: row.ranking,
      recent_languages,
      last_active: row.last_active,
      about: row.about,
    }
  }
}

fn backend_err(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
  move |err| {
    error!("{context}: {err}");
    StoreError::Backend(format!("{context}: {err}"))
  }
}

pub(crate) async fn init_db_pool(db_url: &str) -> BootstrapResult<MySqlPool> {
  let pool = MySqlPool::connect(db_url).await?;
  sqlx::query(CREATE_USERS_TABLE).execute(&pool).await?;
  Ok(pool)
}

/// Roster kept in the `users` table of a MySQL database.
pub struct SqlRosterStore {
  pool: MySqlPool,
}

impl SqlRosterStore {
  pub fn new(pool: MySqlPool) -> Self { SqlRosterStore { pool } }

  async fn fetch_user(&self, id: u64) -> Result<UserRecord, StoreError> {
    let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USERS} WHERE id = ?"))
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(backend_err("Error fetching user"))?;
    row.map(Into::into).ok_or(StoreError::NotFound(id))
  }
}

#[async_trait]
impl RosterStore for SqlRosterStore {
  async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
    let rows: Vec<UserRow> = sqlx::query_as(&format!("{SELECT_USERS} ORDER BY id ASC"))
      .fetch_all(&self.pool)
      .await
      .map_err(backend_err("Error listing users"))?;
    Ok(rows.into_iter().map(Into::into).collect())
  }

  async fn find_by_leetcode_id(
    &self,
    leetcode_id: &str,
  ) -> Result<Option<UserRecord>, StoreError> {
    let row: Option<UserRow> =
      sqlx::query_as(&format!("{SELECT_USERS} WHERE leetcode_id = ? ORDER BY id ASC LIMIT 1"))
        .bind(leetcode_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err("Error fetching user by leetcode_id"))?;
    Ok(row.map(Into::into))
  }

  async fn insert_users(&self, users: Vec<NewUser>) -> Result<Vec<UserRecord>, StoreError> {
    if users.is_empty() {
      return Ok(Vec::new());
    }

    let mut txn = self
      .pool
      .begin()
      .await
      .map_err(backend_err("Error starting transaction"))?;

    let mut inserted = Vec::with_capacity(users.len());
    for user in users {
      let mut record = UserRecord::from_new(0, user);
      let res = sqlx::query(
        "INSERT INTO users (username, roll_num, class, leetcode_id, profileimg, recent_languages) \
         VALUES (?, ?, ?, ?, ?, '[]')",
      )
      .bind(&record.username)
      .bind(&record.roll_num)
      .bind(record.class.map(|class| class.as_str()))
      .bind(&record.leetcode_id)
      .bind(&record.profileimg)
      .execute(&mut *txn)
      .await
      .map_err(backend_err("Error inserting user"))?;

      // one row per statement, so this is exactly the new row's id
      record.id = res.last_insert_id();
      inserted.push(record);
    }

    txn
      .commit()
      .await
      .map_err(backend_err("Error committing inserted users"))?;
    Ok(inserted)
  }

  async fn update_stats(&self, id: u64, update: &StatsUpdate) -> Result<UserRecord, StoreError> {
    let recent_languages = serde_json::to_string(&update.recent_languages)
      .map_err(|err| StoreError::Backend(format!("Error encoding recent_languages: {err}")))?;

    let res = sqlx::query(
      "UPDATE users SET totalsolved = ?, easy_solved = ?, medium_solved = ?, hard_solved = ?, \
       weekly_solved = ?, acceptance_rate = ?, ranking = ?, recent_languages = ?, profileimg = ?, \
       about = ?, last_active = ? WHERE id = ?",
    )
    .bind(update.totalsolved)
    .bind(update.easy_solved)
    .bind(update.medium_solved)
    .bind(update.hard_solved)
    .bind(update.weekly_solved)
    .bind(update.acceptance_rate)
    .bind(update.ranking)
    .bind(recent_languages)
    .bind(&update.profileimg)
    .bind(&update.about)
    .bind(update.last_active)
    .bind(id)
    .execute(&self.pool)
    .await
    .map_err(backend_err("Error updating user stats"))?;

    if res.rows_affected() == 0 {
      warn!("Stats update for user id={id} touched no rows");
    }
    self.fetch_user(id).await
  }

  async fn delete_user(&self, id: u64) -> Result<bool, StoreError> {
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
      .bind(id)
      .execute(&self.pool)
      .await
      .map_err(backend_err("Error deleting user"))?;
    Ok(res.rows_affected() > 0)
  }
}
