use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use arc_swap::ArcSwapOption;
use axum::{
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  Json,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
  model::UserRecord,
  roster::{validate_bulk, AddUserRequest},
  stats::{refresh_user, RefreshOutcome, RefreshStatus},
};

use super::{list_roster, track, APIError, AppState};

pub(crate) const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub(crate) fn validate_admin_token(headers: &HeaderMap, expected: &str) -> Result<(), APIError> {
  let provided = headers
    .get(ADMIN_TOKEN_HEADER)
    .and_then(|value| value.to_str().ok())
    .unwrap_or_default();
  if provided.is_empty() {
    return Err(APIError {
      status: StatusCode::BAD_REQUEST,
      message: format!("Missing admin token in {ADMIN_TOKEN_HEADER} header"),
    });
  }
  if expected.is_empty() || provided != expected {
    return Err(APIError {
      status: StatusCode::UNAUTHORIZED,
      message: format!("Invalid admin token in {ADMIN_TOKEN_HEADER} header"),
    });
  }

  Ok(())
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, APIError> {
  serde_json::from_str(body).map_err(|err| APIError {
    status: StatusCode::BAD_REQUEST,
    message: format!("Error parsing request body: {err}"),
  })
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct RefreshAllReport {
  pub total: usize,
  pub updated: usize,
  pub skipped: usize,
  pub failed: usize,
  /// The run died part way. `failed` then counts every user it never finished.
  pub aborted: bool,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
}

/// Progress of the roster-wide refresh. Only one may run at a time.
#[derive(Default)]
pub struct RefreshTracker {
  running: AtomicBool,
  completed: AtomicUsize,
  total: AtomicUsize,
  last_report: ArcSwapOption<RefreshAllReport>,
}

impl RefreshTracker {
  fn try_start(&self, total: usize) -> bool {
    if self
      .running
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return false;
    }
    self.completed.store(0, Ordering::SeqCst);
    self.total.store(total, Ordering::SeqCst);
    true
  }

  fn finish(&self, report: RefreshAllReport) {
    self.last_report.store(Some(report.into()));
    self.running.store(false, Ordering::SeqCst);
  }
}

/// Refreshes `users` one at a time, pausing `state.refresh_delay` between them.
pub(crate) async fn refresh_sequentially(
  state: &AppState,
  users: Vec<UserRecord>,
  tracker: Option<&RefreshTracker>,
) -> (Vec<RefreshOutcome>, RefreshAllReport) {
  let started_at = Utc::now();
  let total = users.len();
  let mut outcomes = Vec::with_capacity(total);
  let (mut updated, mut skipped, mut failed) = (0, 0, 0);

  for (i, user) in users.into_iter().enumerate() {
    if i > 0 && !state.refresh_delay.is_zero() {
      tokio::time::sleep(state.refresh_delay).await;
    }

    let outcome = refresh_user(state.store.as_ref(), state.provider.as_ref(), user).await;
    match outcome.status {
      RefreshStatus::Updated => updated += 1,
      RefreshStatus::Skipped(_) => skipped += 1,
      RefreshStatus::StoreFailed(_) => failed += 1,
    }
    outcomes.push(outcome);

    if let Some(tracker) = tracker {
      let completed = tracker.completed.fetch_add(1, Ordering::SeqCst) + 1;
      info!("Refreshed {completed}/{total} users");
    }
  }

  let report = RefreshAllReport {
    total,
    updated,
    skipped,
    failed,
    aborted: false,
    started_at,
    finished_at: Utc::now(),
  };
  (outcomes, report)
}

pub(super) async fn add_user(
  State(state): State<AppState>,
  headers: HeaderMap,
  body: String,
) -> Result<Json<RefreshOutcome>, APIError> {
  track("add_user", async move {
    validate_admin_token(&headers, &state.admin_token)?;
    let user = parse_body::<AddUserRequest>(&body)?.validate()?;

    let inserted = state.store.insert_users(vec![user]).await?;
    let Some(record) = inserted.into_iter().next() else {
      return Err(APIError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "Store returned no inserted user".to_owned(),
      });
    };
    info!(
      "Added user id={} username={} roll_num={}",
      record.id, record.username, record.roll_num
    );

    Ok(Json(
      refresh_user(state.store.as_ref(), state.provider.as_ref(), record).await,
    ))
  })
  .await
}

#[derive(Serialize)]
pub(super) struct BulkAddResponse {
  users: Vec<RefreshOutcome>,
  report: RefreshAllReport,
}

pub(super) async fn bulk_add_users(
  State(state): State<AppState>,
  headers: HeaderMap,
  body: String,
) -> Result<Json<BulkAddResponse>, APIError> {
  track("bulk_add_users", async move {
    validate_admin_token(&headers, &state.admin_token)?;
    let users = validate_bulk(parse_body::<Vec<AddUserRequest>>(&body)?)?;

    let inserted = state.store.insert_users(users).await?;
    info!("Bulk added {} users; refreshing their stats", inserted.len());

    let (users, report) = refresh_sequentially(&state, inserted, None).await;
    Ok(Json(BulkAddResponse { users, report }))
  })
  .await
}

pub(super) async fn delete_user(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(id): Path<u64>,
) -> Result<(), APIError> {
  track("delete_user", async move {
    validate_admin_token(&headers, &state.admin_token)?;
    if !state.store.delete_user(id).await? {
      return Err(APIError {
        status: StatusCode::NOT_FOUND,
        message: format!("No user with id {id}"),
      });
    }
    info!("Deleted user id={id}");
    Ok(())
  })
  .await
}

#[derive(Serialize)]
pub(super) struct RefreshAllStarted {
  total: usize,
}

pub(super) async fn refresh_all(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<(StatusCode, Json<RefreshAllStarted>), APIError> {
  track("refresh_all", async move {
    validate_admin_token(&headers, &state.admin_token)?;

    let users: Vec<UserRecord> = list_roster(state.store.as_ref())
      .await?
      .into_iter()
      .filter(UserRecord::is_refreshable)
      .collect();
    let total = users.len();
    if !state.refresh.try_start(total) {
      return Err(APIError {
        status: StatusCode::TOO_MANY_REQUESTS,
        message: "A roster refresh is already in progress".to_owned(),
      });
    }

    info!("Starting refresh of {total} users");
    let started_at = Utc::now();
    tokio::spawn(async move {
      let job_state = state.clone();
      let job = tokio::spawn(async move {
        refresh_sequentially(&job_state, users, Some(job_state.refresh.as_ref()))
          .await
          .1
      });

      // the tracker is released even when the job panics
      let report = match job.await {
        Ok(report) => report,
        Err(err) => {
          let completed = state.refresh.completed.load(Ordering::SeqCst);
          error!("Roster refresh aborted after {completed}/{total} users: {err}");
          RefreshAllReport {
            total,
            updated: 0,
            skipped: 0,
            failed: total.saturating_sub(completed),
            aborted: true,
            started_at,
            finished_at: Utc::now(),
          }
        },
      };
      info!(
        "Done refreshing roster: {} updated, {} skipped, {} failed",
        report.updated, report.skipped, report.failed
      );
      state.refresh.finish(report);
    });

    Ok((StatusCode::ACCEPTED, Json(RefreshAllStarted { total })))
  })
  .await
}

#[derive(Serialize)]
pub(super) struct RefreshAllStatus {
  in_progress: bool,
  completed: usize,
  total: usize,
  last_report: Option<RefreshAllReport>,
}

pub(super) async fn refresh_all_status(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<Json<RefreshAllStatus>, APIError> {
  track("refresh_all_status", async move {
    validate_admin_token(&headers, &state.admin_token)?;
    let tracker = &state.refresh;
    Ok(Json(RefreshAllStatus {
      in_progress: tracker.running.load(Ordering::SeqCst),
      completed: tracker.completed.load(Ordering::SeqCst),
      total: tracker.total.load(Ordering::SeqCst),
      last_report: tracker.last_report.load_full().map(|report| (*report).clone()),
    }))
  })
  .await
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use async_trait::async_trait;
  use serde_json::{json, Value};

  use super::*;
  use crate::{
    model::NewUser,
    server::test_util::*,
    stats::{test_util::solved, test_util::FakeProvider, StatsFetch, StatsProvider},
  };

  async fn wait_for_refresh_all(state: &AppState) -> Value {
    for _ in 0..100 {
      let (status, body) =
        send(state, "GET", "/admin/refresh-all/status", Some(ADMIN_TOKEN), None).await;
      assert_eq!(status, StatusCode::OK);
      if body["in_progress"] == false && !body["last_report"].is_null() {
        return body;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("refresh-all never finished");
  }

  async fn seed_refreshable(state: &AppState, leetcode_ids: &[&str]) {
    let users = leetcode_ids
      .iter()
      .enumerate()
      .map(|(i, leetcode_id)| NewUser {
        username: leetcode_id.to_string(),
        roll_num: format!("25mx{}", 101 + i),
        class: None,
        leetcode_id: Some(leetcode_id.to_string()),
        profileimg: None,
      })
      .collect();
    state.store.insert_users(users).await.unwrap();
  }

  struct PanickingProvider;

  #[async_trait]
  impl StatsProvider for PanickingProvider {
    async fn fetch_stats(&self, leetcode_id: &str) -> StatsFetch {
      panic!("provider blew up on {leetcode_id}");
    }
  }

  #[test]
  fn admin_token_checks() {
    let mut headers = HeaderMap::new();
    let err = validate_admin_token(&headers, "secret").unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);

    headers.insert(ADMIN_TOKEN_HEADER, "nope".parse().unwrap());
    let err = validate_admin_token(&headers, "secret").unwrap_err();
    assert_eq!(err.status, StatusCode::UNAUTHORIZED);

    // an unset token locks the admin surface rather than opening it
    let err = validate_admin_token(&headers, "").unwrap_err();
    assert_eq!(err.status, StatusCode::UNAUTHORIZED);

    headers.insert(ADMIN_TOKEN_HEADER, "secret".parse().unwrap());
    assert!(validate_admin_token(&headers, "secret").is_ok());
  }

  #[tokio::test]
  async fn admin_routes_require_token() {
    let state = test_state(FakeProvider::default());
    let body = json!({ "username": "alice", "roll_num": "25mx101" });

    let (status, _) = send(&state, "POST", "/admin/users", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&state, "POST", "/admin/users", Some("wrong"), Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&state, "DELETE", "/admin/users/1", Some("wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&state, "POST", "/admin/refresh-all", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.store.list_users().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn add_user_validates_then_refreshes() {
    let state = test_state(FakeProvider::default().with("alice_lc", StatsFetch {
      weekly_solved: Some(3),
      ..solved(20, 10, 2)
    }));

    let (status, body) = send(
      &state,
      "POST",
      "/admin/users",
      Some(ADMIN_TOKEN),
      Some(json!({ "username": "alice", "roll_num": "25mx999", "leetcode_id": "alice_lc" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("25mx999"));
    assert!(state.store.list_users().await.unwrap().is_empty());

    let (status, body) = send(
      &state,
      "POST",
      "/admin/users",
      Some(ADMIN_TOKEN),
      Some(json!({
        "username": "alice",
        "roll_num": "25MX101",
        "class": "G1",
        "leetcode_id": "alice_lc"
      })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "updated");
    assert_eq!(body["record"]["class"], "G1");
    assert_eq!(body["record"]["totalsolved"], 32);
    assert_eq!(body["record"]["weekly_solved"], 3);
  }

  #[tokio::test]
  async fn add_user_without_leetcode_id_is_kept_but_not_refreshed() {
    let provider = FakeProvider::default();
    let state = test_state(provider);
    let (status, body) = send(
      &state,
      "POST",
      "/admin/users",
      Some(ADMIN_TOKEN),
      Some(json!({ "username": "carol", "roll_num": "25mx200" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
    assert_eq!(body["detail"], "no_external_id");
    assert_eq!(state.store.list_users().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn bulk_add_is_all_or_nothing() {
    let state = test_state(FakeProvider::default().with("a_lc", solved(1, 0, 0)));
    let (status, body) = send(
      &state,
      "POST",
      "/admin/users/bulk",
      Some(ADMIN_TOKEN),
      Some(json!([
        { "name": "a", "rollnum": "25mx101", "leetcode_id": "a_lc" },
        { "name": "b", "rollnum": "25mx102", "class": "G7" }
      ])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().starts_with("Record 1:"));
    assert!(state.store.list_users().await.unwrap().is_empty());

    let (status, body) = send(
      &state,
      "POST",
      "/admin/users/bulk",
      Some(ADMIN_TOKEN),
      Some(json!([
        { "name": "a", "rollnum": "25mx101", "leetcode_id": "a_lc" },
        { "name": "b", "rollnum": "25mx102", "class": "G2" }
      ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["total"], 2);
    assert_eq!(body["report"]["updated"], 1);
    assert_eq!(body["report"]["skipped"], 1);
    assert_eq!(state.store.list_users().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn delete_user_then_missing() {
    let state = test_state(FakeProvider::default());
    let (status, _) = send(
      &state,
      "POST",
      "/admin/users",
      Some(ADMIN_TOKEN),
      Some(json!({ "username": "dave", "roll_num": "25mx300" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&state, "DELETE", "/admin/users/1", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&state, "DELETE", "/admin/users/1", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn refresh_all_runs_in_background_and_reports() {
    let state = test_state(
      FakeProvider::default()
        .with("a_lc", solved(5, 0, 0))
        .with("b_lc", solved(0, 0, 0)),
    );
    let (status, _) = send(
      &state,
      "POST",
      "/admin/users/bulk",
      Some(ADMIN_TOKEN),
      Some(json!([
        { "name": "a", "rollnum": "25mx101", "leetcode_id": "a_lc" },
        { "name": "b", "rollnum": "25mx102", "leetcode_id": "b_lc" },
        { "name": "c", "rollnum": "25mx103" }
      ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&state, "POST", "/admin/refresh-all", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["total"], 2);

    let body = wait_for_refresh_all(&state).await;
    assert_eq!(body["completed"], 2);
    assert_eq!(body["last_report"]["updated"], 1);
    assert_eq!(body["last_report"]["skipped"], 1);
  }

  #[tokio::test]
  async fn only_one_refresh_all_at_a_time() {
    let state = test_state(FakeProvider::default());
    assert!(state.refresh.try_start(3));
    let (status, _) = send(&state, "POST", "/admin/refresh-all", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
  }

  #[tokio::test]
  async fn refresh_all_survives_oversized_upstream_counts() {
    let state = test_state(FakeProvider::default().with("huge_lc", StatsFetch {
      easy: Some(u32::MAX),
      medium: Some(1),
      ..Default::default()
    }));
    seed_refreshable(&state, &["huge_lc"]).await;

    let (status, _) = send(&state, "POST", "/admin/refresh-all", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body = wait_for_refresh_all(&state).await;
    assert_eq!(body["completed"], 1);
    assert_eq!(body["last_report"]["skipped"], 1);
    assert_eq!(body["last_report"]["aborted"], false);
    assert_eq!(state.store.list_users().await.unwrap()[0].totalsolved, 0);

    let (status, _) = send(&state, "POST", "/admin/refresh-all", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_refresh_all(&state).await;
  }

  #[tokio::test]
  async fn panicking_refresh_all_releases_the_tracker() {
    let state = AppState {
      provider: Arc::new(PanickingProvider),
      ..test_state(FakeProvider::default())
    };
    seed_refreshable(&state, &["a_lc", "b_lc"]).await;

    let (status, _) = send(&state, "POST", "/admin/refresh-all", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body = wait_for_refresh_all(&state).await;
    assert_eq!(body["last_report"]["aborted"], true);
    assert_eq!(body["last_report"]["failed"], 2);

    let (status, _) = send(&state, "POST", "/admin/refresh-all", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
  }
}
