use foundations::{settings::settings, telemetry::settings::TelemetrySettings};
use serde_default_utils::*;

fn default_graphql_url() -> String { "https://leetcode.com/graphql".to_owned() }

fn default_stats_api_url() -> String { "https://leetcode-stats-api.herokuapp.com".to_owned() }

fn default_profile_api_url() -> String { "https://alfa-leetcode-api.onrender.com".to_owned() }

#[settings]
pub struct LeetCodeSettings {
  /// LeetCode GraphQL endpoint. Authoritative source for stats.
  #[serde(default = "default_graphql_url")]
  pub graphql_url: String,
  /// Secondary stats API, queried as `{stats_api_url}/{username}`.
  #[serde(default = "default_stats_api_url")]
  pub stats_api_url: String,
  /// Secondary profile API, queried as `{profile_api_url}/{username}`.
  #[serde(default = "default_profile_api_url")]
  pub profile_api_url: String,
  /// Whether to fill gaps in GraphQL results from the secondary providers.
  #[serde(default = "default_bool::<true>")]
  pub fallback_enabled: bool,
  /// How many recent accepted submissions to ask for when computing weekly solves.
  #[serde(default = "default_u32::<20>")]
  pub recent_submissions_limit: u32,
  /// Timeout for a single upstream request.
  #[serde(default = "default_u64::<10>")]
  pub timeout_secs: u64,
}

#[settings]
pub struct RefreshSettings {
  /// Pause between users during a roster-wide refresh, to go easy on rate-limited upstreams.
  #[serde(default = "default_u64::<500>")]
  pub delay_ms: u64,
}

#[settings]
pub struct AdminSettings {
  /// Token expected in the `x-admin-token` header on admin routes.
  pub token: String,
}

#[cfg(feature = "sql")]
#[settings]
pub struct SqlSettings {
  pub db_url: String,
}

#[settings]
pub struct ServerSettings {
  /// Telemetry settings.
  pub telemetry: TelemetrySettings,

  /// Port that the HTTP server will listen on.
  #[serde(default = "default_u16::<4520>")]
  pub port: u16,
  pub leetcode: LeetCodeSettings,
  pub refresh: RefreshSettings,
  pub admin: AdminSettings,
  #[cfg(feature = "sql")]
  pub sql: SqlSettings,
}
