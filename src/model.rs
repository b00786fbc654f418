use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PROFILE_IMG: &str = "https://img.freepik.com/premium-vector/default-avatar-profile-icon-social-media-user-image-gray-avatar-icon-blank-profile-silhouette-vector-illustration_561158-3383.jpg?semt=ais_hybrid&w=740&q=80";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Class {
  G1,
  G2,
}

impl Class {
  pub const ALL: [Class; 2] = [Class::G1, Class::G2];

  pub fn as_str(&self) -> &'static str {
    match self {
      Class::G1 => "G1",
      Class::G2 => "G2",
    }
  }
}

impl Display for Class {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Class {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "G1" => Ok(Class::G1),
      "G2" => Ok(Class::G2),
      _ => Err(format!("Unknown class: {s}")),
    }
  }
}

impl<'de> Deserialize<'de> for Class {
  fn deserialize<D>(deserializer: D) -> Result<Class, D::Error>
  where
    D: Deserializer<'de>,
  {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// One row of the roster table.
///
/// Field names follow the persisted column names so the JSON handed out by the API lines up with
/// what the store holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
  pub id: u64,
  pub username: String,
  pub roll_num: String,
  pub class: Option<Class>,
  pub leetcode_id: Option<String>,
  pub profileimg: Option<String>,
  #[serde(default)]
  pub totalsolved: u32,
  #[serde(default)]
  pub easy_solved: u32,
  #[serde(default)]
  pub medium_solved: u32,
  #[serde(default)]
  pub hard_solved: u32,
  /// Accepted submissions inside the trailing 7 day window as of the last refresh.
  #[serde(default)]
  pub weekly_solved: u32,
  #[serde(default)]
  pub acceptance_rate: f64,
  /// Global ranking reported by LeetCode. Lower is better.
  pub ranking: Option<u32>,
  #[serde(default)]
  pub recent_languages: Vec<String>,
  pub last_active: Option<DateTime<Utc>>,
  pub about: Option<String>,
}

impl UserRecord {
  /// Records without an external identity are displayed but can never be refreshed.
  pub fn is_refreshable(&self) -> bool {
    self
      .leetcode_id
      .as_deref()
      .is_some_and(|id| !id.trim().is_empty())
  }

  pub(crate) fn from_new(id: u64, user: NewUser) -> Self {
    UserRecord {
      id,
      username: user.username,
      roll_num: user.roll_num,
      class: user.class,
      leetcode_id: user.leetcode_id,
      profileimg: Some(
        user
          .profileimg
          .unwrap_or_else(|| DEFAULT_PROFILE_IMG.to_owned()),
      ),
      totalsolved: 0,
      easy_solved: 0,
      medium_solved: 0,
      hard_solved: 0,
      weekly_solved: 0,
      acceptance_rate: 0.,
      ranking: None,
      recent_languages: Vec::new(),
      last_active: None,
      about: None,
    }
  }

  #[cfg(any(test, not(feature = "sql")))]
  pub(crate) fn apply(&mut self, update: &StatsUpdate) {
    self.totalsolved = update.totalsolved;
    self.easy_solved = update.easy_solved;
    self.medium_solved = update.medium_solved;
    self.hard_solved = update.hard_solved;
    self.weekly_solved = update.weekly_solved;
    self.acceptance_rate = update.acceptance_rate;
    self.ranking = update.ranking;
    self.recent_languages = update.recent_languages.clone();
    self.profileimg = update.profileimg.clone();
    self.about = update.about.clone();
    self.last_active = Some(update.last_active);
  }
}

/// A validated roster entry that hasn't been assigned an id by the store yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
  pub username: String,
  pub roll_num: String,
  pub class: Option<Class>,
  pub leetcode_id: Option<String>,
  pub profileimg: Option<String>,
}

/// Stats columns written back by a successful refresh.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsUpdate {
  pub totalsolved: u32,
  pub easy_solved: u32,
  pub medium_solved: u32,
  pub hard_solved: u32,
  pub weekly_solved: u32,
  pub acceptance_rate: f64,
  pub ranking: Option<u32>,
  pub recent_languages: Vec<String>,
  pub profileimg: Option<String>,
  pub about: Option<String>,
  pub last_active: DateTime<Utc>,
}
