use std::{collections::BTreeMap, time::Duration, time::Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use crate::{
  metrics::http_server,
  server::APIError,
  settings::LeetCodeSettings,
  stats::{weekly_solved_from_timestamps, StatsFetch, StatsProvider},
  util::{deserialize_i64_lenient, parse_percentage},
};

const LEETCODE_BASE_URL: &str = "https://leetcode.com";

const USER_STATS_QUERY: &str = r#"
query userStats($username: String!, $limit: Int!) {
  matchedUser(username: $username) {
    username
    profile {
      realName
      userAvatar
      ranking
      aboutMe
    }
    submitStatsGlobal {
      acSubmissionNum {
        difficulty
        count
      }
      totalSubmissionNum {
        difficulty
        count
      }
    }
    languageProblemCount {
      languageName
      problemsSolved
    }
  }
  recentAcSubmissionList(username: $username, limit: $limit) {
    timestamp
  }
}
"#;

const CALENDAR_QUERY: &str = r#"
query userProfileCalendar($username: String!) {
  matchedUser(username: $username) {
    userCalendar {
      submissionCalendar
    }
  }
}
"#;

const POTD_QUERY: &str = r#"
query questionOfToday {
  activeDailyCodingChallengeQuestion {
    date
    link
    question {
      title
      titleSlug
      difficulty
      acRate
    }
  }
}
"#;

#[derive(Deserialize)]
struct GraphQLResponse<T> {
  data: Option<T>,
  errors: Option<Vec<GraphQLError>>,
}

#[derive(Deserialize)]
struct GraphQLError {
  message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatsData {
  matched_user: Option<MatchedUser>,
  recent_ac_submission_list: Option<Vec<RecentSubmission>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchedUser {
  username: String,
  profile: Profile,
  submit_stats_global: SubmitStats,
  language_problem_count: Option<Vec<LanguageCount>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
  real_name: Option<String>,
  user_avatar: Option<String>,
  ranking: Option<u32>,
  about_me: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitStats {
  ac_submission_num: Vec<DifficultyCount>,
  total_submission_num: Vec<DifficultyCount>,
}

#[derive(Deserialize)]
struct DifficultyCount {
  difficulty: String,
  count: u32,
}

fn count_for(counts: &[DifficultyCount], difficulty: &str) -> Option<u32> {
  counts
    .iter()
    .find(|c| c.difficulty == difficulty)
    .map(|c| c.count)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguageCount {
  language_name: String,
  problems_solved: u32,
}

#[derive(Deserialize)]
struct RecentSubmission {
  #[serde(deserialize_with = "deserialize_i64_lenient")]
  timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Solved {
  pub easy: Option<u32>,
  pub medium: Option<u32>,
  pub hard: Option<u32>,
}

/// Reshaped result of the profile + stats query, as served by `/users/{username}/stats`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
  pub username: String,
  pub real_name: Option<String>,
  pub avatar: Option<String>,
  /// Global LeetCode ranking
  pub ranking: Option<u32>,
  pub about: Option<String>,
  pub total_submissions: u32,
  /// Formatted like "45.20%"
  pub acceptance_rate: String,
  pub most_used_language: String,
  pub solved: Solved,
  pub weekly_solved: Option<u32>,
  /// Languages ordered by problems solved, most first.
  pub recent_languages: Option<Vec<String>>,
}

impl UserStats {
  fn from_response(
    user: MatchedUser,
    recent: Option<Vec<RecentSubmission>>,
    now: DateTime<Utc>,
  ) -> UserStats {
    let stats = &user.submit_stats_global;
    let total = count_for(&stats.total_submission_num, "All").unwrap_or(0);
    let accepted = count_for(&stats.ac_submission_num, "All").unwrap_or(0);
    let rate = if total > 0 {
      accepted as f64 / total as f64 * 100.
    } else {
      0.
    };

    let recent_languages = user.language_problem_count.map(|mut langs| {
      langs.sort_by(|a, b| b.problems_solved.cmp(&a.problems_solved));
      langs
        .into_iter()
        .map(|lang| lang.language_name)
        .collect::<Vec<_>>()
    });
    let weekly_solved = recent.map(|subs| {
      let timestamps: Vec<i64> = subs.iter().map(|s| s.timestamp).collect();
      weekly_solved_from_timestamps(&timestamps, now)
    });

    UserStats {
      username: user.username,
      real_name: user.profile.real_name,
      avatar: user.profile.user_avatar,
      ranking: user.profile.ranking,
      about: user.profile.about_me.filter(|about| !about.is_empty()),
      total_submissions: total,
      acceptance_rate: format!("{rate:.2}%"),
      most_used_language: recent_languages
        .as_ref()
        .and_then(|langs| langs.first().cloned())
        .unwrap_or_else(|| "N/A".to_owned()),
      solved: Solved {
        easy: count_for(&stats.ac_submission_num, "Easy"),
        medium: count_for(&stats.ac_submission_num, "Medium"),
        hard: count_for(&stats.ac_submission_num, "Hard"),
      },
      weekly_solved,
      recent_languages,
    }
  }
}

impl From<UserStats> for StatsFetch {
  fn from(stats: UserStats) -> Self {
    StatsFetch {
      easy: stats.solved.easy,
      medium: stats.solved.medium,
      hard: stats.solved.hard,
      weekly_solved: stats.weekly_solved,
      acceptance_rate: if stats.total_submissions > 0 {
        parse_percentage(&stats.acceptance_rate)
      } else {
        None
      },
      recent_languages: stats.recent_languages,
      avatar: stats.avatar,
      ranking: stats.ranking,
      about: stats.about,
    }
  }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarData {
  matched_user: Option<CalendarUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarUser {
  user_calendar: Option<UserCalendar>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserCalendar {
  submission_calendar: Option<String>,
}

/// Day-start unix timestamp -> number of submissions that day.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionCalendar {
  pub submission_calendar: BTreeMap<i64, u32>,
}

/// LeetCode hands the calendar out as a JSON object encoded inside a string.
fn parse_submission_calendar(raw: &str) -> Result<SubmissionCalendar, serde_json::Error> {
  let submission_calendar = serde_json::from_str(raw)?;
  Ok(SubmissionCalendar {
    submission_calendar,
  })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PotdData {
  active_daily_coding_challenge_question: Option<Potd>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Potd {
  pub date: String,
  pub link: String,
  pub question: PotdQuestion,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PotdQuestion {
  pub title: String,
  pub title_slug: String,
  pub difficulty: String,
  pub ac_rate: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsApiResponse {
  status: Option<String>,
  easy_solved: Option<u32>,
  medium_solved: Option<u32>,
  hard_solved: Option<u32>,
  acceptance_rate: Option<f64>,
  ranking: Option<u32>,
}

impl From<StatsApiResponse> for StatsFetch {
  fn from(res: StatsApiResponse) -> Self {
    StatsFetch {
      easy: res.easy_solved,
      medium: res.medium_solved,
      hard: res.hard_solved,
      acceptance_rate: res.acceptance_rate,
      ranking: res.ranking.filter(|&r| r > 0),
      ..Default::default()
    }
  }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileApiResponse {
  avatar: Option<String>,
  about: Option<String>,
  skill_tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AcSubmissionsResponse {
  Wrapped { submission: Vec<RecentSubmission> },
  Bare(Vec<RecentSubmission>),
}

impl AcSubmissionsResponse {
  fn timestamps(&self) -> Vec<i64> {
    let subs = match self {
      AcSubmissionsResponse::Wrapped { submission } => submission,
      AcSubmissionsResponse::Bare(subs) => subs,
    };
    subs.iter().map(|s| s.timestamp).collect()
  }
}

pub struct LeetCodeClient {
  client: Client,
  settings: LeetCodeSettings,
}

impl LeetCodeClient {
  pub fn new(settings: LeetCodeSettings) -> reqwest::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .build()?;
    Ok(LeetCodeClient { client, settings })
  }

  async fn send<T: DeserializeOwned>(
    &self,
    endpoint_name: &'static str,
    req: RequestBuilder,
  ) -> Result<T, APIError> {
    http_server::upstream_requests_total(endpoint_name).inc();
    let now = Instant::now();
    let res = req
      .header("Accept", "application/json")
      .send()
      .await
      .map_err(|err| {
        error!("Failed to send {endpoint_name} request: {err}");
        http_server::upstream_requests_failed_total(
          endpoint_name,
          err.status().map(|s| s.as_u16()).unwrap_or(0),
        )
        .inc();
        APIError {
          status: StatusCode::BAD_GATEWAY,
          message: format!("Failed to send {endpoint_name} request"),
        }
      })?;
    let status_code = res.status();
    let res_text = res.text().await.map_err(|err| {
      error!(?status_code, "Failed to read {endpoint_name} response: {err}");
      http_server::upstream_requests_failed_total(endpoint_name, status_code.as_u16()).inc();
      APIError {
        status: StatusCode::BAD_GATEWAY,
        message: format!("Failed to read {endpoint_name} response"),
      }
    })?;

    http_server::upstream_response_time_seconds(endpoint_name)
      .observe(now.elapsed().as_nanos() as u64);

    if !status_code.is_success() {
      error!(
        ?status_code,
        "{endpoint_name} request failed; status: {status_code}; res: {res_text}"
      );
      http_server::upstream_requests_failed_total(endpoint_name, status_code.as_u16()).inc();
      return Err(APIError {
        status: StatusCode::from_u16(status_code.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
        message: format!("{endpoint_name} request failed"),
      });
    }

    let deserializer = &mut serde_json::Deserializer::from_str(&res_text);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
      error!(
        ?status_code,
        "Failed to parse {endpoint_name} response; res: {res_text}; err: {err}"
      );
      http_server::upstream_requests_failed_total(endpoint_name, status_code.as_u16()).inc();
      APIError {
        status: StatusCode::BAD_GATEWAY,
        message: format!("Failed to parse {endpoint_name} response"),
      }
    })
  }

  async fn graphql<T: DeserializeOwned>(
    &self,
    endpoint_name: &'static str,
    query: &str,
    variables: serde_json::Value,
  ) -> Result<T, APIError> {
    let req = self
      .client
      .post(&self.settings.graphql_url)
      .header("Content-Type", "application/json")
      .header("Referer", LEETCODE_BASE_URL)
      .json(&json!({ "query": query, "variables": variables }));
    let res: GraphQLResponse<T> = self.send(endpoint_name, req).await?;

    if let Some(errors) = res.errors.filter(|errors| !errors.is_empty()) {
      let message = errors
        .into_iter()
        .map(|err| err.message)
        .collect::<Vec<_>>()
        .join("; ");
      warn!("{endpoint_name} query returned errors: {message}");
      return Err(APIError {
        status: StatusCode::BAD_REQUEST,
        message,
      });
    }

    res.data.ok_or_else(|| APIError {
      status: StatusCode::BAD_GATEWAY,
      message: format!("{endpoint_name} query returned no data"),
    })
  }

  pub async fn fetch_user_stats(&self, username: &str) -> Result<UserStats, APIError> {
    let data: UserStatsData = self
      .graphql(
        "fetch_user_stats",
        USER_STATS_QUERY,
        json!({ "username": username, "limit": self.settings.recent_submissions_limit }),
      )
      .await?;

    let Some(user) = data.matched_user else {
      return Err(APIError {
        status: StatusCode::NOT_FOUND,
        message: format!("User {username} not found"),
      });
    };
    Ok(UserStats::from_response(
      user,
      data.recent_ac_submission_list,
      Utc::now(),
    ))
  }

  pub async fn fetch_submission_calendar(
    &self,
    username: &str,
  ) -> Result<SubmissionCalendar, APIError> {
    let data: CalendarData = self
      .graphql(
        "fetch_submission_calendar",
        CALENDAR_QUERY,
        json!({ "username": username }),
      )
      .await?;

    let Some(user) = data.matched_user else {
      return Err(APIError {
        status: StatusCode::NOT_FOUND,
        message: format!("User {username} not found"),
      });
    };
    let Some(raw) = user.user_calendar.and_then(|cal| cal.submission_calendar) else {
      return Ok(SubmissionCalendar::default());
    };
    parse_submission_calendar(&raw).map_err(|err| {
      error!("Failed to parse submission calendar for {username}: {err}; raw: {raw}");
      APIError {
        status: StatusCode::BAD_GATEWAY,
        message: "Failed to parse submission calendar".to_owned(),
      }
    })
  }

  pub async fn fetch_potd(&self) -> Result<Potd, APIError> {
    let data: PotdData = self
      .graphql("fetch_potd", POTD_QUERY, json!({}))
      .await?;

    let mut potd = data
      .active_daily_coding_challenge_question
      .ok_or_else(|| APIError {
        status: StatusCode::BAD_GATEWAY,
        message: "POTD not found".to_owned(),
      })?;
    if potd.link.starts_with('/') {
      potd.link = format!("{LEETCODE_BASE_URL}{}", potd.link);
    }
    Ok(potd)
  }

  async fn fetch_stats_api(&self, username: &str) -> Result<StatsFetch, APIError> {
    let url = format!(
      "{}/{username}",
      self.settings.stats_api_url.trim_end_matches('/')
    );
    let res: StatsApiResponse = self.send("fetch_stats_api", self.client.get(url)).await?;
    if res.status.as_deref() == Some("error") {
      return Err(APIError {
        status: StatusCode::NOT_FOUND,
        message: format!("Stats API has no data for {username}"),
      });
    }
    Ok(res.into())
  }

  async fn fetch_profile_api(&self, username: &str) -> Result<StatsFetch, APIError> {
    let url = format!(
      "{}/{username}",
      self.settings.profile_api_url.trim_end_matches('/')
    );
    let res: ProfileApiResponse = self.send("fetch_profile_api", self.client.get(url)).await?;
    Ok(StatsFetch {
      avatar: res.avatar.filter(|avatar| !avatar.is_empty()),
      about: res.about.filter(|about| !about.is_empty()),
      recent_languages: res.skill_tags,
      ..Default::default()
    })
  }

  async fn fetch_profile_api_weekly(&self, username: &str) -> Result<StatsFetch, APIError> {
    let url = format!(
      "{}/{username}/acSubmission",
      self.settings.profile_api_url.trim_end_matches('/')
    );
    let res: AcSubmissionsResponse = self
      .send("fetch_profile_api_submissions", self.client.get(url))
      .await?;
    Ok(StatsFetch {
      weekly_solved: Some(weekly_solved_from_timestamps(&res.timestamps(), Utc::now())),
      ..Default::default()
    })
  }

  /// Queries the secondary providers one after another. Failures are logged and skipped.
  async fn fetch_secondary_stats(&self, username: &str) -> StatsFetch {
    let mut fetch = StatsFetch::default();
    match self.fetch_stats_api(username).await {
      Ok(stats) => fetch = fetch.or(stats),
      Err(err) => warn!("Stats API fallback failed for {username}: {err:?}"),
    }
    match self.fetch_profile_api(username).await {
      Ok(profile) => fetch = fetch.or(profile),
      Err(err) => warn!("Profile API fallback failed for {username}: {err:?}"),
    }
    if fetch.weekly_solved.is_none() {
      match self.fetch_profile_api_weekly(username).await {
        Ok(weekly) => fetch = fetch.or(weekly),
        Err(err) => warn!("Submissions API fallback failed for {username}: {err:?}"),
      }
    }
    fetch
  }
}

#[async_trait]
impl StatsProvider for LeetCodeClient {
  /// GraphQL results are authoritative; the secondary providers only fill in what's missing.
  async fn fetch_stats(&self, leetcode_id: &str) -> StatsFetch {
    let primary = match self.fetch_user_stats(leetcode_id).await {
      Ok(stats) => StatsFetch::from(stats),
      Err(err) => {
        warn!("GraphQL stats fetch failed for {leetcode_id}: {err:?}");
        StatsFetch::default()
      },
    };
    if !self.settings.fallback_enabled || !primary.has_gaps() {
      return primary;
    }

    primary.or(self.fetch_secondary_stats(leetcode_id).await)
  }
}
