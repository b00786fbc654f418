#[cfg(any(test, not(feature = "sql")))]
use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(any(test, not(feature = "sql")))]
use tokio::sync::RwLock;

use crate::model::{NewUser, StatsUpdate, UserRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("No user with id {0}")]
  NotFound(u64),
  #[error("{0}")]
  Backend(String),
}

/// Access to the roster table. One instance is created at startup and shared by every handler.
#[async_trait]
pub trait RosterStore: Send + Sync {
  async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;

  async fn find_by_leetcode_id(&self, leetcode_id: &str)
    -> Result<Option<UserRecord>, StoreError>;

  /// Inserts every user or none of them.
  async fn insert_users(&self, users: Vec<NewUser>) -> Result<Vec<UserRecord>, StoreError>;

  async fn update_stats(&self, id: u64, update: &StatsUpdate) -> Result<UserRecord, StoreError>;

  /// Returns `false` if there was no such user.
  async fn delete_user(&self, id: u64) -> Result<bool, StoreError>;
}

#[cfg(any(test, not(feature = "sql")))]
struct MemoryRoster {
  next_id: u64,
  users: BTreeMap<u64, UserRecord>,
}

/// Roster held in process memory. Used when the `sql` feature is off and by tests.
#[cfg(any(test, not(feature = "sql")))]
pub struct MemoryRosterStore {
  inner: RwLock<MemoryRoster>,
}

#[cfg(any(test, not(feature = "sql")))]
impl Default for MemoryRosterStore {
  fn default() -> Self {
    MemoryRosterStore {
      inner: RwLock::new(MemoryRoster {
        next_id: 1,
        users: BTreeMap::new(),
      }),
    }
  }
}

#[cfg(any(test, not(feature = "sql")))]
impl MemoryRosterStore {
  pub fn new() -> Self { Self::default() }
}

#[cfg(any(test, not(feature = "sql")))]
#[async_trait]
impl RosterStore for MemoryRosterStore {
  async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
    Ok(self.inner.read().await.users.values().cloned().collect())
  }

  async fn find_by_leetcode_id(
    &self,
    leetcode_id: &str,
  ) -> Result<Option<UserRecord>, StoreError> {
    let roster = self.inner.read().await;
    Ok(
      roster
        .users
        .values()
        .find(|user| user.leetcode_id.as_deref() == Some(leetcode_id))
        .cloned(),
    )
  }

  async fn insert_users(&self, users: Vec<NewUser>) -> Result<Vec<UserRecord>, StoreError> {
    let mut roster = self.inner.write().await;
    let mut inserted = Vec::with_capacity(users.len());
    for user in users {
      let id = roster.next_id;
      roster.next_id += 1;
      let record = UserRecord::from_new(id, user);
      roster.users.insert(id, record.clone());
      inserted.push(record);
    }
    Ok(inserted)
  }

  async fn update_stats(&self, id: u64, update: &StatsUpdate) -> Result<UserRecord, StoreError> {
    let mut roster = self.inner.write().await;
    let record = roster.users.get_mut(&id).ok_or(StoreError::NotFound(id))?;
    record.apply(update);
    Ok(record.clone())
  }

  async fn delete_user(&self, id: u64) -> Result<bool, StoreError> {
    Ok(self.inner.write().await.users.remove(&id).is_some())
  }
}
