use axum::{
  extract::{Query, State},
  Json,
};
use fxhash::FxHashSet;
use serde::Deserialize;

use crate::{
  rank::{compute_ranks, sort_by_rank, RankKey, RankedUser, RankingStyle},
  roster::{filter_users, paginate, parse_class_filter, summarize, Page, RosterSummary},
};

use super::{list_roster, track, APIError, AppState};

#[derive(Debug, Default, Deserialize)]
pub(super) struct LeaderboardParams {
  #[serde(default)]
  class: Option<String>,
  #[serde(default)]
  search: Option<String>,
  #[serde(default)]
  sort: RankKey,
  #[serde(default)]
  style: RankingStyle,
  #[serde(default)]
  page: Option<usize>,
  #[serde(default)]
  per_page: Option<usize>,
}

/// Ranks are computed over the selected class before the search is applied, so searching for a
/// user shows their real standing.
pub(super) async fn get_leaderboard(
  State(state): State<AppState>,
  Query(params): Query<LeaderboardParams>,
) -> Result<Json<Page<RankedUser>>, APIError> {
  track("get_leaderboard", async move {
    let class = parse_class_filter(params.class.as_deref())?;
    let users = filter_users(list_roster(state.store.as_ref()).await?, class, None);

    let mut ranked = compute_ranks(&users, params.style);
    if params.search.is_some() {
      let visible: FxHashSet<u64> = filter_users(users, None, params.search.as_deref())
        .iter()
        .map(|user| user.id)
        .collect();
      ranked.retain(|ranked| visible.contains(&ranked.user.id));
    }
    sort_by_rank(&mut ranked, params.sort);

    Ok(Json(paginate(ranked, params.page, params.per_page)))
  })
  .await
}

pub(super) async fn get_summary(
  State(state): State<AppState>,
) -> Result<Json<RosterSummary>, APIError> {
  track("get_summary", async move {
    let users = list_roster(state.store.as_ref()).await?;
    Ok(Json(summarize(&users)))
  })
  .await
}
