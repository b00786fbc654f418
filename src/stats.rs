use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  metrics::http_server,
  model::{StatsUpdate, UserRecord},
  store::RosterStore,
};

pub const WEEK_SECS: i64 = 7 * 24 * 3600;

/// Stats gathered from upstream for one user. Every field is optional because any provider may
/// fail or answer partially.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsFetch {
  pub easy: Option<u32>,
  pub medium: Option<u32>,
  pub hard: Option<u32>,
  pub weekly_solved: Option<u32>,
  /// Percentage, 0-100
  pub acceptance_rate: Option<f64>,
  pub recent_languages: Option<Vec<String>>,
  pub avatar: Option<String>,
  pub ranking: Option<u32>,
  pub about: Option<String>,
}

impl StatsFetch {
  pub fn total_solved(&self) -> u64 {
    [self.easy, self.medium, self.hard]
      .into_iter()
      .map(|count| u64::from(count.unwrap_or(0)))
      .sum()
  }

  /// Keeps every value already present and takes the rest from `fallback`.
  pub fn or(self, fallback: StatsFetch) -> StatsFetch {
    StatsFetch {
      easy: self.easy.or(fallback.easy),
      medium: self.medium.or(fallback.medium),
      hard: self.hard.or(fallback.hard),
      weekly_solved: self.weekly_solved.or(fallback.weekly_solved),
      acceptance_rate: self.acceptance_rate.or(fallback.acceptance_rate),
      recent_languages: self.recent_languages.or(fallback.recent_languages),
      avatar: self.avatar.or(fallback.avatar),
      ranking: self.ranking.or(fallback.ranking),
      about: self.about.or(fallback.about),
    }
  }

  /// Whether a secondary source could still add anything.
  pub fn has_gaps(&self) -> bool {
    self.easy.is_none()
      || self.medium.is_none()
      || self.hard.is_none()
      || self.weekly_solved.is_none()
      || self.acceptance_rate.is_none()
      || self.recent_languages.is_none()
      || self.avatar.is_none()
  }
}

/// Anything that can produce stats for a LeetCode username.
///
/// Implementations never fail: upstream errors are logged and whatever could be gathered is
/// returned, possibly nothing at all.
#[async_trait]
pub trait StatsProvider: Send + Sync {
  async fn fetch_stats(&self, leetcode_id: &str) -> StatsFetch;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  NoExternalId,
  /// Upstream reported zero solves across all difficulties, which is treated as a failed fetch.
  EmptyFetch,
  /// The merged difficulty buckets add up to more than a stored total can hold.
  OutOfRange,
}

impl SkipReason {
  fn metric_label(self) -> &'static str {
    match self {
      SkipReason::NoExternalId => "skipped_no_external_id",
      SkipReason::EmptyFetch => "skipped_empty_fetch",
      SkipReason::OutOfRange => "skipped_out_of_range",
    }
  }
}

#[derive(Debug, PartialEq)]
pub enum Merge {
  Unchanged(SkipReason),
  Update(StatsUpdate),
}

/// Merges freshly fetched stats into `record`.
///
/// Each field takes the fetched value, then the stored value, then a default. `totalsolved` is
/// always recomputed from the three difficulty buckets.
pub fn merge(record: &UserRecord, fetch: &StatsFetch, now: DateTime<Utc>) -> Merge {
  if !record.is_refreshable() {
    return Merge::Unchanged(SkipReason::NoExternalId);
  }
  if fetch.total_solved() == 0 {
    return Merge::Unchanged(SkipReason::EmptyFetch);
  }

  let easy_solved = fetch.easy.unwrap_or(record.easy_solved);
  let medium_solved = fetch.medium.unwrap_or(record.medium_solved);
  let hard_solved = fetch.hard.unwrap_or(record.hard_solved);
  let sum = u64::from(easy_solved) + u64::from(medium_solved) + u64::from(hard_solved);
  let Ok(totalsolved) = u32::try_from(sum) else {
    return Merge::Unchanged(SkipReason::OutOfRange);
  };

  Merge::Update(StatsUpdate {
    totalsolved,
    easy_solved,
    medium_solved,
    hard_solved,
    weekly_solved: fetch.weekly_solved.unwrap_or(record.weekly_solved),
    acceptance_rate: fetch.acceptance_rate.unwrap_or(record.acceptance_rate),
    ranking: fetch.ranking.or(record.ranking),
    recent_languages: fetch
      .recent_languages
      .clone()
      .unwrap_or_else(|| record.recent_languages.clone()),
    profileimg: fetch.avatar.clone().or_else(|| record.profileimg.clone()),
    about: fetch.about.clone().or_else(|| record.about.clone()),
    last_active: now,
  })
}

/// Counts accepted submissions inside the trailing week ending at `now`. The boundary itself
/// counts as inside.
pub fn weekly_solved_from_timestamps(timestamps: &[i64], now: DateTime<Utc>) -> u32 {
  let week_ago = now.timestamp() - WEEK_SECS;
  timestamps.iter().filter(|&&ts| ts >= week_ago).count() as u32
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RefreshStatus {
  Updated,
  Skipped(SkipReason),
  StoreFailed(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct RefreshOutcome {
  pub record: UserRecord,
  #[serde(flatten)]
  pub status: RefreshStatus,
}

/// Fetches, merges and persists stats for one user. Always hands back a usable record: the
/// updated one, or the record it was given if anything went wrong or there was nothing to write.
pub async fn refresh_user(
  store: &dyn RosterStore,
  provider: &dyn StatsProvider,
  record: UserRecord,
) -> RefreshOutcome {
  let Some(leetcode_id) = record.leetcode_id.clone().filter(|_| record.is_refreshable()) else {
    http_server::refresh_total(SkipReason::NoExternalId.metric_label()).inc();
    return RefreshOutcome {
      record,
      status: RefreshStatus::Skipped(SkipReason::NoExternalId),
    };
  };

  let fetch = provider.fetch_stats(&leetcode_id).await;
  let update = match merge(&record, &fetch, Utc::now()) {
    Merge::Update(update) => update,
    Merge::Unchanged(reason) => {
      warn!(
        user_id = record.id,
        %leetcode_id,
        ?reason,
        "Not updating stats for user"
      );
      http_server::refresh_total(reason.metric_label()).inc();
      return RefreshOutcome {
        record,
        status: RefreshStatus::Skipped(reason),
      };
    },
  };

  match store.update_stats(record.id, &update).await {
    Ok(updated) => {
      info!(
        user_id = record.id,
        %leetcode_id,
        totalsolved = updated.totalsolved,
        weekly_solved = updated.weekly_solved,
        "Refreshed stats"
      );
      http_server::refresh_total("updated").inc();
      RefreshOutcome {
        record: updated,
        status: RefreshStatus::Updated,
      }
    },
    Err(err) => {
      error!(user_id = record.id, %leetcode_id, "Failed to store refreshed stats: {err}");
      http_server::refresh_total("store_failed").inc();
      RefreshOutcome {
        record,
        status: RefreshStatus::StoreFailed(err.to_string()),
      }
    },
  }
}


#[cfg(test)]
mod tests {
  use async_trait::async_trait;
  use chrono::TimeZone;

  use super::{test_util::*, *};
  use crate::{
    model::{test_util::user, NewUser},
    store::{MemoryRosterStore, StoreError},
  };

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap() }

  fn stored_user() -> UserRecord {
    let mut u = user(1, "25mx101", 4, 60);
    u.easy_solved = 30;
    u.medium_solved = 25;
    u.hard_solved = 5;
    u.acceptance_rate = 51.5;
    u.recent_languages = vec!["Rust".to_owned()];
    u.profileimg = Some("old.png".to_owned());
    u
  }

  #[test]
  fn zero_total_leaves_record_alone() {
    let fetch = StatsFetch {
      weekly_solved: Some(12),
      acceptance_rate: Some(99.),
      avatar: Some("new.png".to_owned()),
      ..solved(0, 0, 0)
    };
    assert_eq!(
      merge(&stored_user(), &fetch, now()),
      Merge::Unchanged(SkipReason::EmptyFetch)
    );
    assert_eq!(
      merge(&stored_user(), &StatsFetch::default(), now()),
      Merge::Unchanged(SkipReason::EmptyFetch)
    );
  }

  #[test]
  fn missing_external_id_is_a_no_op() {
    let mut record = stored_user();
    record.leetcode_id = None;
    assert_eq!(
      merge(&record, &solved(10, 10, 10), now()),
      Merge::Unchanged(SkipReason::NoExternalId)
    );
  }

  #[test]
  fn partial_fetch_falls_back_to_stored_values() {
    let fetch = StatsFetch {
      easy: Some(40),
      weekly_solved: Some(7),
      ..Default::default()
    };
    let Merge::Update(update) = merge(&stored_user(), &fetch, now()) else {
      panic!("expected an update");
    };
    assert_eq!(update.easy_solved, 40);
    assert_eq!(update.medium_solved, 25);
    assert_eq!(update.hard_solved, 5);
    assert_eq!(update.totalsolved, 70);
    assert_eq!(update.weekly_solved, 7);
    assert_eq!(update.acceptance_rate, 51.5);
    assert_eq!(update.recent_languages, vec!["Rust".to_owned()]);
    assert_eq!(update.profileimg.as_deref(), Some("old.png"));
    assert_eq!(update.last_active, now());
  }

  #[test]
  fn fresh_values_take_precedence() {
    let fetch = StatsFetch {
      acceptance_rate: Some(60.25),
      recent_languages: Some(vec!["C++".to_owned(), "Python3".to_owned()]),
      avatar: Some("new.png".to_owned()),
      ranking: Some(123_456),
      ..solved(50, 30, 8)
    };
    let Merge::Update(update) = merge(&stored_user(), &fetch, now()) else {
      panic!("expected an update");
    };
    assert_eq!(update.totalsolved, 88);
    assert_eq!(update.acceptance_rate, 60.25);
    assert_eq!(update.recent_languages, vec!["C++", "Python3"]);
    assert_eq!(update.profileimg.as_deref(), Some("new.png"));
    assert_eq!(update.ranking, Some(123_456));
  }

  #[test]
  fn oversized_buckets_are_skipped_not_wrapped() {
    let fetch = StatsFetch {
      easy: Some(u32::MAX),
      medium: Some(1),
      ..Default::default()
    };
    assert_eq!(fetch.total_solved(), u64::from(u32::MAX) + 1);
    assert_eq!(
      merge(&stored_user(), &fetch, now()),
      Merge::Unchanged(SkipReason::OutOfRange)
    );

    // the stored medium and hard buckets still count towards the total
    let fetch = StatsFetch {
      easy: Some(u32::MAX - 10),
      ..Default::default()
    };
    assert_eq!(
      merge(&stored_user(), &fetch, now()),
      Merge::Unchanged(SkipReason::OutOfRange)
    );

    let Merge::Update(update) = merge(&stored_user(), &solved(u32::MAX, 0, 0), now()) else {
      panic!("expected an update");
    };
    assert_eq!(update.totalsolved, u32::MAX);
  }

  #[test]
  fn or_only_fills_gaps() {
    let primary = StatsFetch {
      easy: Some(1),
      avatar: Some("primary.png".to_owned()),
      ..Default::default()
    };
    let fallback = StatsFetch {
      easy: Some(100),
      medium: Some(2),
      avatar: Some("fallback.png".to_owned()),
      about: Some("hi".to_owned()),
      ..Default::default()
    };
    let merged = primary.or(fallback);
    assert_eq!(merged.easy, Some(1));
    assert_eq!(merged.medium, Some(2));
    assert_eq!(merged.avatar.as_deref(), Some("primary.png"));
    assert_eq!(merged.about.as_deref(), Some("hi"));
    assert!(merged.has_gaps());
  }

  #[test]
  fn weekly_window_includes_boundary() {
    let now = now();
    let ts = now.timestamp();
    let stamps = [ts, ts - 3600, ts - WEEK_SECS, ts - WEEK_SECS - 1, ts - 30 * 86400];
    assert_eq!(weekly_solved_from_timestamps(&stamps, now), 3);
    assert_eq!(weekly_solved_from_timestamps(&[], now), 0);
  }

  async fn seeded_store() -> (MemoryRosterStore, UserRecord) {
    let store = MemoryRosterStore::new();
    let mut inserted = store
      .insert_users(vec![NewUser {
        username: "alice".to_owned(),
        roll_num: "25mx101".to_owned(),
        class: None,
        leetcode_id: Some("alice_lc".to_owned()),
        profileimg: None,
      }])
      .await
      .unwrap();
    let record = inserted.remove(0);
    let seeded = store
      .update_stats(record.id, &StatsUpdate {
        totalsolved: 60,
        easy_solved: 30,
        medium_solved: 25,
        hard_solved: 5,
        weekly_solved: 4,
        acceptance_rate: 50.,
        ranking: Some(900_000),
        recent_languages: vec![],
        profileimg: None,
        about: None,
        last_active: now(),
      })
      .await
      .unwrap();
    (store, seeded)
  }

  #[tokio::test]
  async fn refresh_with_empty_upstream_keeps_prior_stats() {
    let (store, seeded) = seeded_store().await;
    let provider = FakeProvider::default().with("alice_lc", solved(0, 0, 0));

    let outcome = refresh_user(&store, &provider, seeded.clone()).await;
    assert_eq!(outcome.status, RefreshStatus::Skipped(SkipReason::EmptyFetch));
    assert_eq!(outcome.record, seeded);

    let stored = store.list_users().await.unwrap().remove(0);
    assert_eq!(stored.totalsolved, 60);
    assert_eq!(stored.easy_solved, 30);
    assert_eq!(stored.medium_solved, 25);
    assert_eq!(stored.hard_solved, 5);
    assert_eq!(stored.weekly_solved, 4);
    assert_eq!(stored.last_active, Some(now()));
  }

  #[tokio::test]
  async fn refresh_persists_merged_stats() {
    let (store, seeded) = seeded_store().await;
    let provider = FakeProvider::default().with("alice_lc", StatsFetch {
      weekly_solved: Some(9),
      ..solved(31, 26, 6)
    });

    let outcome = refresh_user(&store, &provider, seeded).await;
    assert_eq!(outcome.status, RefreshStatus::Updated);
    assert_eq!(outcome.record.totalsolved, 63);
    assert_eq!(outcome.record.weekly_solved, 9);
    assert_eq!(outcome.record.ranking, Some(900_000));
    assert_eq!(store.list_users().await.unwrap().remove(0), outcome.record);
  }

  #[tokio::test]
  async fn refresh_without_external_id_never_calls_upstream() {
    let (store, mut seeded) = seeded_store().await;
    seeded.leetcode_id = None;
    let provider = FakeProvider::default();

    let outcome = refresh_user(&store, &provider, seeded.clone()).await;
    assert_eq!(outcome.status, RefreshStatus::Skipped(SkipReason::NoExternalId));
    assert_eq!(outcome.record, seeded);
    assert!(provider.calls.lock().unwrap().is_empty());
  }

  struct BrokenStore;

  #[async_trait]
  impl RosterStore for BrokenStore {
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
      Err(StoreError::Backend("down".to_owned()))
    }

    async fn find_by_leetcode_id(&self, _: &str) -> Result<Option<UserRecord>, StoreError> {
      Err(StoreError::Backend("down".to_owned()))
    }

    async fn insert_users(&self, _: Vec<NewUser>) -> Result<Vec<UserRecord>, StoreError> {
      Err(StoreError::Backend("down".to_owned()))
    }

    async fn update_stats(&self, _: u64, _: &StatsUpdate) -> Result<UserRecord, StoreError> {
      Err(StoreError::Backend("connection refused".to_owned()))
    }

    async fn delete_user(&self, _: u64) -> Result<bool, StoreError> {
      Err(StoreError::Backend("down".to_owned()))
    }
  }

  #[tokio::test]
  async fn store_failure_returns_prior_record() {
    let record = stored_user();
    let provider = FakeProvider::default().with("lc_user1", solved(40, 40, 40));

    let outcome = refresh_user(&BrokenStore, &provider, record.clone()).await;
    assert_eq!(
      outcome.status,
      RefreshStatus::StoreFailed("connection refused".to_owned())
    );
    assert_eq!(outcome.record, record);
  }
}
