use std::{future::Future, sync::Arc, time::Duration};

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{delete, get, post},
  Json, Router,
};
use foundations::BootstrapResult;
use tower_http::{
  cors,
  trace::{DefaultMakeSpan, DefaultOnResponse},
};
use tracing::Level;

use crate::{
  leetcode::{LeetCodeClient, Potd, SubmissionCalendar, UserStats},
  metrics::http_server,
  model::UserRecord,
  roster::ValidationError,
  settings::ServerSettings,
  stats::{refresh_user, RefreshOutcome, RefreshStatus, StatsProvider},
  store::{RosterStore, StoreError},
};

pub(crate) mod admin;
mod leaderboard;

use admin::RefreshTracker;

async fn index() -> &'static str {
  http_server::requests_total("index").inc();
  http_server::requests_success_total("index").inc();
  "leetboard up and running successfully!"
}

#[derive(Debug)]
pub struct APIError {
  pub status: StatusCode,
  pub message: String,
}

impl IntoResponse for APIError {
  fn into_response(self) -> Response { (self.status, self.message).into_response() }
}

impl From<StoreError> for APIError {
  fn from(err: StoreError) -> Self {
    let status = match err {
      StoreError::NotFound(_) => StatusCode::NOT_FOUND,
      StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    APIError {
      status,
      message: err.to_string(),
    }
  }
}

impl From<ValidationError> for APIError {
  fn from(err: ValidationError) -> Self {
    APIError {
      status: StatusCode::BAD_REQUEST,
      message: err.to_string(),
    }
  }
}

/// Everything a handler needs. Built once in `start_server` and cloned into each request.
#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn RosterStore>,
  pub provider: Arc<dyn StatsProvider>,
  pub leetcode: Arc<LeetCodeClient>,
  pub admin_token: Arc<str>,
  pub refresh: Arc<RefreshTracker>,
  pub refresh_delay: Duration,
}

/// Records request/success/failure metrics for `endpoint_name` around `fut`.
pub(crate) async fn track<T>(
  endpoint_name: &'static str,
  fut: impl Future<Output = Result<T, APIError>>,
) -> Result<T, APIError> {
  http_server::requests_total(endpoint_name).inc();
  match fut.await {
    Ok(res) => {
      http_server::requests_success_total(endpoint_name).inc();
      Ok(res)
    },
    Err(err) => {
      http_server::requests_failed_total(endpoint_name).inc();
      Err(err)
    },
  }
}

pub(crate) async fn list_roster(store: &dyn RosterStore) -> Result<Vec<UserRecord>, APIError> {
  let users = store.list_users().await?;
  http_server::roster_users().set(users.len() as u64);
  Ok(users)
}

async fn get_user_stats(
  State(state): State<AppState>,
  Path(username): Path<String>,
) -> Result<Json<UserStats>, APIError> {
  track("get_user_stats", async move {
    Ok(Json(state.leetcode.fetch_user_stats(&username).await?))
  })
  .await
}

async fn get_user_calendar(
  State(state): State<AppState>,
  Path(username): Path<String>,
) -> Result<Json<SubmissionCalendar>, APIError> {
  track("get_user_calendar", async move {
    Ok(Json(
      state.leetcode.fetch_submission_calendar(&username).await?,
    ))
  })
  .await
}

async fn get_potd(State(state): State<AppState>) -> Result<Json<Potd>, APIError> {
  track("get_potd", async move { Ok(Json(state.leetcode.fetch_potd().await?)) }).await
}

async fn get_roster(State(state): State<AppState>) -> Result<Json<Vec<UserRecord>>, APIError> {
  track("get_roster", async move {
    Ok(Json(list_roster(state.store.as_ref()).await?))
  })
  .await
}

async fn refresh_user_route(
  State(state): State<AppState>,
  Path(leetcode_id): Path<String>,
) -> Result<Json<RefreshOutcome>, APIError> {
  track("refresh_user", async move {
    let Some(user) = state.store.find_by_leetcode_id(&leetcode_id).await? else {
      return Err(APIError {
        status: StatusCode::NOT_FOUND,
        message: format!("No user found with leetcode_id={leetcode_id}"),
      });
    };

    let outcome = refresh_user(state.store.as_ref(), state.provider.as_ref(), user).await;
    if let RefreshStatus::StoreFailed(message) = &outcome.status {
      return Err(APIError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: format!("Failed to save refreshed stats: {message}"),
      });
    }
    Ok(Json(outcome))
  })
  .await
}

pub fn build_router(state: AppState) -> Router {
  Router::new()
    .route("/", get(index))
    .route("/potd", get(get_potd))
    .route("/roster", get(get_roster))
    .route("/leaderboard", get(leaderboard::get_leaderboard))
    .route("/summary", get(leaderboard::get_summary))
    .route("/users/{username}/stats", get(get_user_stats))
    .route("/users/{username}/calendar", get(get_user_calendar))
    .route("/users/{leetcode_id}/refresh", post(refresh_user_route))
    .route("/admin/users", post(admin::add_user))
    .route("/admin/users/bulk", post(admin::bulk_add_users))
    .route("/admin/users/{id}", delete(admin::delete_user))
    .route("/admin/refresh-all", post(admin::refresh_all))
    .route("/admin/refresh-all/status", get(admin::refresh_all_status))
    .with_state(state)
    .layer(
      tower_http::cors::CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_headers(cors::Any)
        .allow_methods(cors::Any),
    )
    .layer(
      tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::default().level(Level::INFO)),
    )
}

#[cfg(feature = "sql")]
async fn build_store(settings: &ServerSettings) -> BootstrapResult<Arc<dyn RosterStore>> {
  let pool = crate::db::init_db_pool(&settings.sql.db_url).await?;
  Ok(Arc::new(crate::db::SqlRosterStore::new(pool)))
}

#[cfg(not(feature = "sql"))]
async fn build_store(_settings: &ServerSettings) -> BootstrapResult<Arc<dyn RosterStore>> {
  warn!("Built without the `sql` feature; roster is kept in memory and lost on exit");
  Ok(Arc::new(crate::store::MemoryRosterStore::new()))
}

pub async fn start_server(settings: &ServerSettings) -> BootstrapResult<()> {
  if settings.admin.token.is_empty() {
    warn!("No admin token configured; admin routes will reject every request");
  }

  let leetcode = Arc::new(LeetCodeClient::new(settings.leetcode.clone())?);
  let state = AppState {
    store: build_store(settings).await?,
    provider: leetcode.clone(),
    leetcode,
    admin_token: settings.admin.token.as_str().into(),
    refresh: Arc::new(RefreshTracker::default()),
    refresh_delay: Duration::from_millis(settings.refresh.delay_ms),
  };

  let router = build_router(state);
  let addr = format!("0.0.0.0:{}", settings.port);
  info!("Server is listening on http://{}", addr);
  let listener = tokio::net::TcpListener::bind(addr).await?;
  axum::serve(listener, router).await?;
  Ok(())
}
