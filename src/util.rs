use serde::{Deserialize, Deserializer};

/// LeetCode hands out some numbers as JSON strings (submission timestamps) and others as
/// numbers depending on which API answered; accept both.
pub fn deserialize_i64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum StringOrNumber {
    String(String),
    Number(i64),
  }

  match StringOrNumber::deserialize(deserializer)? {
    StringOrNumber::Number(n) => Ok(n),
    StringOrNumber::String(s) => s
      .trim()
      .parse()
      .map_err(|err| serde::de::Error::custom(format!("Invalid integer {s:?}: {err}"))),
  }
}

/// Parses an acceptance rate given like "45.20%", "45.2" or " 45 % ".
pub fn parse_percentage(raw: &str) -> Option<f64> {
  let trimmed = raw.trim().trim_end_matches('%').trim();
  let value: f64 = trimmed.parse().ok()?;
  value.is_finite().then_some(value)
}
