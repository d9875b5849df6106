use uuid::Uuid;

use crate::prelude::*;

/// Lowercase, spaces to underscores, drop anything outside `[a-z0-9_]`.
pub fn slugify(name: &str) -> String {
  name
    .to_lowercase()
    .replace(' ', "_")
    .chars()
    .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
    .collect()
}

/// Single-use request token, 32 hex chars.
pub fn nonce() -> String {
  Uuid::new_v4().simple().to_string()
}

pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// Unix millis at which something living for `ttl` from now expires.
pub fn deadline(ttl: Duration) -> i64 {
  let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
  now_millis().saturating_add(ttl)
}

/// Keeps the first four characters of a key, enough to tell keys apart in
/// logs and UI without exposing them.
pub fn mask(key: &str) -> String {
  let visible: String = key.chars().take(4).collect();
  let hidden = key.chars().count().saturating_sub(4);
  format!("{visible}{}", "*".repeat(hidden))
}
