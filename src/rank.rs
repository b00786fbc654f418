use std::cmp::{Ordering, Reverse};

use serde::{Deserialize, Serialize};

use crate::model::UserRecord;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankKey {
  #[default]
  Weekly,
  Overall,
}

/// How tied records are numbered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingStyle {
  /// Ties share a rank and the next distinct value resumes after the tied block: 1, 2, 2, 4
  #[default]
  Competition,
  /// Ties share a rank and the next distinct value takes the next integer: 1, 2, 2, 3
  Dense,
  /// No shared ranks; ties are broken by the secondary key and then roll number.
  Strict,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedUser {
  #[serde(flatten)]
  pub user: UserRecord,
  #[serde(rename = "weeklyRank")]
  pub weekly_rank: u32,
  #[serde(rename = "overallRank")]
  pub overall_rank: u32,
}

impl RankedUser {
  pub fn rank(&self, key: RankKey) -> u32 {
    match key {
      RankKey::Weekly => self.weekly_rank,
      RankKey::Overall => self.overall_rank,
    }
  }
}

fn primary(user: &UserRecord, key: RankKey) -> u32 {
  match key {
    RankKey::Weekly => user.weekly_solved,
    RankKey::Overall => user.totalsolved,
  }
}

fn secondary(user: &UserRecord, key: RankKey) -> u32 {
  match key {
    RankKey::Weekly => user.totalsolved,
    RankKey::Overall => user.weekly_solved,
  }
}

/// Total order used for every ranking: primary desc, secondary desc, roll number asc, id asc.
///
/// The id comparison only matters for duplicate roll numbers, which the store doesn't prevent.
fn compare(a: &UserRecord, b: &UserRecord, key: RankKey) -> Ordering {
  Reverse(primary(a, key))
    .cmp(&Reverse(primary(b, key)))
    .then_with(|| Reverse(secondary(a, key)).cmp(&Reverse(secondary(b, key))))
    .then_with(|| a.roll_num.cmp(&b.roll_num))
    .then_with(|| a.id.cmp(&b.id))
}

/// Returns `(position in input, rank)` pairs, ordered best first.
fn rank_indices(users: &[UserRecord], key: RankKey, style: RankingStyle) -> Vec<(usize, u32)> {
  let mut order: Vec<usize> = (0..users.len()).collect();
  order.sort_by(|&a, &b| compare(&users[a], &users[b], key));

  let mut ranked: Vec<(usize, u32)> = Vec::with_capacity(order.len());
  for (pos, &ix) in order.iter().enumerate() {
    let rank = match ranked.last() {
      None => 1,
      Some(&(prev_ix, prev_rank)) => {
        let tied = primary(&users[ix], key) == primary(&users[prev_ix], key);
        match style {
          RankingStyle::Competition if tied => prev_rank,
          RankingStyle::Competition => pos as u32 + 1,
          RankingStyle::Dense if tied => prev_rank,
          RankingStyle::Dense => prev_rank + 1,
          RankingStyle::Strict => pos as u32 + 1,
        }
      },
    };
    ranked.push((ix, rank));
  }
  ranked
}

/// Ranks `users` along one ordering, returning `(id, rank)` pairs best first.
pub fn rank(key: RankKey, style: RankingStyle, users: &[UserRecord]) -> Vec<(u64, u32)> {
  rank_indices(users, key, style)
    .into_iter()
    .map(|(ix, rank)| (users[ix].id, rank))
    .collect()
}

/// Annotates clones of `users` with both ranks. Output follows input order and the input is left
/// untouched, so the same records can be ranked again as part of a different subset.
pub fn compute_ranks(users: &[UserRecord], style: RankingStyle) -> Vec<RankedUser> {
  let mut weekly = vec![0; users.len()];
  for (ix, rank) in rank_indices(users, RankKey::Weekly, style) {
    weekly[ix] = rank;
  }
  let mut overall = vec![0; users.len()];
  for (ix, rank) in rank_indices(users, RankKey::Overall, style) {
    overall[ix] = rank;
  }

  users
    .iter()
    .zip(weekly.into_iter().zip(overall))
    .map(|(user, (weekly_rank, overall_rank))| RankedUser {
      user: user.clone(),
      weekly_rank,
      overall_rank,
    })
    .collect()
}

pub fn sort_by_rank(ranked: &mut [RankedUser], key: RankKey) {
  ranked.sort_by(|a, b| {
    a.rank(key)
      .cmp(&b.rank(key))
      .then_with(|| compare(&a.user, &b.user, key))
  });
}
