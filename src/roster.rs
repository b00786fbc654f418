use fxhash::FxHashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
  model::{Class, NewUser, UserRecord},
  rank::{rank, RankKey, RankingStyle},
};

pub const DEFAULT_PER_PAGE: usize = 12;
pub const MAX_PER_PAGE: usize = 100;

const MIN_ROLL_NUMBER: u32 = 100;
const MAX_ROLL_NUMBER: u32 = 370;

lazy_static! {
  static ref ROLL_NUM_RE: Regex = Regex::new(r"(?i)^25mx(\d{3})$").unwrap();
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
  #[error("Missing required field: {0}")]
  MissingField(&'static str),
  #[error("Invalid roll number {0:?}; expected 25mx100 through 25mx370")]
  InvalidRollNumber(String),
  #[error("Invalid class {0:?}; expected G1 or G2")]
  InvalidClass(String),
  #[error("Record {index}: {source}")]
  BulkRecord {
    index: usize,
    source: Box<ValidationError>,
  },
  #[error("No records to upload")]
  EmptyBatch,
}

pub fn is_valid_roll_number(roll_num: &str) -> bool {
  ROLL_NUM_RE
    .captures(roll_num)
    .and_then(|caps| caps[1].parse::<u32>().ok())
    .is_some_and(|n| (MIN_ROLL_NUMBER..=MAX_ROLL_NUMBER).contains(&n))
}

/// Admin payload for one roster entry. Bulk uploads also accept `name` and `rollnum`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AddUserRequest {
  #[serde(default, alias = "name")]
  pub username: Option<String>,
  #[serde(default, alias = "rollnum")]
  pub roll_num: Option<String>,
  #[serde(default)]
  pub class: Option<String>,
  #[serde(default)]
  pub leetcode_id: Option<String>,
  #[serde(default)]
  pub profileimg: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_owned())
    .filter(|v| !v.is_empty())
}

impl AddUserRequest {
  pub fn validate(self) -> Result<NewUser, ValidationError> {
    let username = non_empty(self.username).ok_or(ValidationError::MissingField("username"))?;
    let roll_num = non_empty(self.roll_num).ok_or(ValidationError::MissingField("roll_num"))?;
    if !is_valid_roll_number(&roll_num) {
      return Err(ValidationError::InvalidRollNumber(roll_num));
    }
    let class = non_empty(self.class)
      .map(|class| {
        class
          .parse::<Class>()
          .map_err(|_| ValidationError::InvalidClass(class))
      })
      .transpose()?;

    Ok(NewUser {
      username,
      roll_num,
      class,
      leetcode_id: non_empty(self.leetcode_id),
      profileimg: non_empty(self.profileimg),
    })
  }
}

/// Validates a whole upload up front so that a single bad record rejects the batch.
pub fn validate_bulk(records: Vec<AddUserRequest>) -> Result<Vec<NewUser>, ValidationError> {
  if records.is_empty() {
    return Err(ValidationError::EmptyBatch);
  }
  records
    .into_iter()
    .enumerate()
    .map(|(index, record)| {
      record
        .validate()
        .map_err(|err| ValidationError::BulkRecord {
          index,
          source: Box::new(err),
        })
    })
    .collect()
}

/// `ALL` or an empty value means no class filter.
pub fn parse_class_filter(raw: Option<&str>) -> Result<Option<Class>, ValidationError> {
  match raw.map(str::trim) {
    None | Some("") => Ok(None),
    Some(raw) if raw.eq_ignore_ascii_case("all") => Ok(None),
    Some(raw) => raw
      .parse()
      .map(Some)
      .map_err(|_| ValidationError::InvalidClass(raw.to_owned())),
  }
}

/// Keeps users in `class` (if given) whose username or roll number contains `search`, ignoring
/// case.
pub fn filter_users(
  users: Vec<UserRecord>,
  class: Option<Class>,
  search: Option<&str>,
) -> Vec<UserRecord> {
  let needle = search
    .map(|s| s.trim().to_lowercase())
    .filter(|s| !s.is_empty());
  users
    .into_iter()
    .filter(|user| class.is_none() || user.class == class)
    .filter(|user| match &needle {
      Some(needle) => {
        user.username.to_lowercase().contains(needle.as_str())
          || user.roll_num.to_lowercase().contains(needle.as_str())
      },
      None => true,
    })
    .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: usize,
  pub per_page: usize,
  pub total: usize,
  pub total_pages: usize,
}

/// Pages are 1-indexed. Out-of-range pages come back empty rather than erroring.
pub fn paginate<T>(items: Vec<T>, page: Option<usize>, per_page: Option<usize>) -> Page<T> {
  let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
  let page = page.unwrap_or(1).max(1);
  let total = items.len();
  let total_pages = total.div_ceil(per_page);
  let items = items
    .into_iter()
    .skip((page - 1).saturating_mul(per_page))
    .take(per_page)
    .collect();

  Page {
    items,
    page,
    per_page,
    total,
    total_pages,
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopUser {
  pub id: u64,
  pub username: String,
  pub solved: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupSummary {
  /// `None` for the whole roster.
  pub class: Option<Class>,
  pub members: usize,
  pub total_solved: u64,
  pub weekly_progress: u64,
  pub weekly_top: Option<TopUser>,
  pub overall_top: Option<TopUser>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RosterSummary {
  pub overall: GroupSummary,
  pub classes: Vec<GroupSummary>,
}

fn top_user(users: &[UserRecord], key: RankKey) -> Option<TopUser> {
  let (id, _) = *rank(key, RankingStyle::Strict, users).first()?;
  let user = users.iter().find(|u| u.id == id)?;
  Some(TopUser {
    id,
    username: user.username.clone(),
    solved: match key {
      RankKey::Weekly => user.weekly_solved,
      RankKey::Overall => user.totalsolved,
    },
  })
}

fn summarize_group(class: Option<Class>, users: &[UserRecord]) -> GroupSummary {
  GroupSummary {
    class,
    members: users.len(),
    total_solved: users.iter().map(|u| u.totalsolved as u64).sum(),
    weekly_progress: users.iter().map(|u| u.weekly_solved as u64).sum(),
    weekly_top: top_user(users, RankKey::Weekly),
    overall_top: top_user(users, RankKey::Overall),
  }
}

/// Totals and leaders for the whole roster and for each class. Users without a class only count
/// towards the overall group.
pub fn summarize(users: &[UserRecord]) -> RosterSummary {
  let mut by_class: FxHashMap<Class, Vec<UserRecord>> = FxHashMap::default();
  for user in users {
    if let Some(class) = user.class {
      by_class.entry(class).or_default().push(user.clone());
    }
  }

  RosterSummary {
    overall: summarize_group(None, users),
    classes: Class::ALL
      .iter()
      .map(|&class| {
        let members = by_class.remove(&class).unwrap_or_default();
        summarize_group(Some(class), &members)
      })
      .collect(),
  }
}
