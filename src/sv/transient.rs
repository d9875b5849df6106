//! Named values that expire on their own.
//!
//! Backs the activation lock and the activation notice. An entry whose
//! expiry has passed reads as absent even if nobody deleted it.

use dashmap::mapref::entry::Entry;
use sea_orm::{DbBackend, Statement, sea_query::OnConflict};

use crate::{entity::transient, prelude::*};

#[async_trait]
pub trait Transients: Send + Sync {
  async fn get(&self, name: &str) -> Result<Option<String>>;

  /// Stores `value`, replacing whatever was there.
  async fn set(&self, name: &str, value: &str, ttl: Duration) -> Result<()>;

  /// Stores `value` only if `name` is absent or expired. Returns whether it
  /// did; concurrent callers racing on the same name see exactly one `true`.
  async fn add(&self, name: &str, value: &str, ttl: Duration) -> Result<bool>;

  async fn delete(&self, name: &str) -> Result<()>;

  /// Deletes `name` only while it still holds `value`. Returns whether it
  /// did; a holder whose entry expired and was taken over removes nothing.
  async fn release(&self, name: &str, value: &str) -> Result<bool>;

  /// Drops expired entries, returning how many went.
  async fn purge(&self) -> Result<u64>;
}

/// Database backend, shared by every process using the same database.
pub struct Db {
  db: DatabaseConnection,
}

impl Db {
  pub fn new(db: DatabaseConnection) -> Self {
    Self { db }
  }
}

#[async_trait]
impl Transients for Db {
  async fn get(&self, name: &str) -> Result<Option<String>> {
    let entry = transient::Entity::find_by_id(name)
      .filter(transient::Column::ExpiresAt.gt(utils::now_millis()))
      .one(&self.db)
      .await?;
    Ok(entry.map(|entry| entry.value))
  }

  async fn set(&self, name: &str, value: &str, ttl: Duration) -> Result<()> {
    let entry = transient::ActiveModel {
      name: Set(name.to_string()),
      value: Set(value.to_string()),
      expires_at: Set(utils::deadline(ttl)),
    };

    transient::Entity::insert(entry)
      .on_conflict(
        OnConflict::column(transient::Column::Name)
          .update_columns([
            transient::Column::Value,
            transient::Column::ExpiresAt,
          ])
          .to_owned(),
      )
      .exec_without_returning(&self.db)
      .await?;

    Ok(())
  }

  async fn add(&self, name: &str, value: &str, ttl: Duration) -> Result<bool> {
    // single statement: the check and the write cannot interleave with
    // another writer
    let stmt = Statement::from_sql_and_values(
      DbBackend::Sqlite,
      "INSERT INTO transients (name, value, expires_at) VALUES (?, ?, ?) \
       ON CONFLICT (name) DO UPDATE \
       SET value = excluded.value, expires_at = excluded.expires_at \
       WHERE transients.expires_at <= ?",
      [
        name.into(),
        value.into(),
        utils::deadline(ttl).into(),
        utils::now_millis().into(),
      ],
    );

    let res = self.db.execute(stmt).await?;
    Ok(res.rows_affected() == 1)
  }

  async fn delete(&self, name: &str) -> Result<()> {
    transient::Entity::delete_by_id(name).exec(&self.db).await?;
    Ok(())
  }

  async fn release(&self, name: &str, value: &str) -> Result<bool> {
    let res = transient::Entity::delete_many()
      .filter(transient::Column::Name.eq(name))
      .filter(transient::Column::Value.eq(value))
      .exec(&self.db)
      .await?;
    Ok(res.rows_affected == 1)
  }

  async fn purge(&self) -> Result<u64> {
    let res = transient::Entity::delete_many()
      .filter(transient::Column::ExpiresAt.lte(utils::now_millis()))
      .exec(&self.db)
      .await?;
    Ok(res.rows_affected)
  }
}

#[derive(Debug, Clone)]
struct Slot {
  value: String,
  expires_at: i64,
}

impl Slot {
  fn new(value: &str, ttl: Duration) -> Self {
    Self { value: value.to_string(), expires_at: utils::deadline(ttl) }
  }

  fn is_live(&self, now: i64) -> bool {
    self.expires_at > now
  }
}

/// Process-local backend. Only guards against triggers inside one process.
#[derive(Default)]
pub struct Memory {
  slots: DashMap<String, Slot>,
}

impl Memory {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Transients for Memory {
  async fn get(&self, name: &str) -> Result<Option<String>> {
    let now = utils::now_millis();
    Ok(
      self
        .slots
        .get(name)
        .filter(|slot| slot.is_live(now))
        .map(|slot| slot.value.clone()),
    )
  }

  async fn set(&self, name: &str, value: &str, ttl: Duration) -> Result<()> {
    self.slots.insert(name.to_string(), Slot::new(value, ttl));
    Ok(())
  }

  async fn add(&self, name: &str, value: &str, ttl: Duration) -> Result<bool> {
    let now = utils::now_millis();
    match self.slots.entry(name.to_string()) {
      Entry::Occupied(slot) if slot.get().is_live(now) => Ok(false),
      Entry::Occupied(mut slot) => {
        slot.insert(Slot::new(value, ttl));
        Ok(true)
      }
      Entry::Vacant(slot) => {
        slot.insert(Slot::new(value, ttl));
        Ok(true)
      }
    }
  }

  async fn delete(&self, name: &str) -> Result<()> {
    self.slots.remove(name);
    Ok(())
  }

  async fn release(&self, name: &str, value: &str) -> Result<bool> {
    Ok(self.slots.remove_if(name, |_, slot| slot.value == value).is_some())
  }

  async fn purge(&self) -> Result<u64> {
    let now = utils::now_millis();
    let before = self.slots.len();
    self.slots.retain(|_, slot| slot.is_live(now));
    Ok(before.saturating_sub(self.slots.len()) as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::state::tests::setup_test_db;

  const TTL: Duration = Duration::from_secs(30);

  async fn exercise(store: &dyn Transients) {
    assert_eq!(store.get("lock").await.unwrap(), None);

    assert!(store.add("lock", "1", TTL).await.unwrap());
    assert!(!store.add("lock", "2", TTL).await.unwrap());
    assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("1"));

    store.delete("lock").await.unwrap();
    assert_eq!(store.get("lock").await.unwrap(), None);
    assert!(store.add("lock", "3", TTL).await.unwrap());

    // only the current holder's value releases it
    assert!(!store.release("lock", "1").await.unwrap());
    assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("3"));
    assert!(store.release("lock", "3").await.unwrap());
    assert_eq!(store.get("lock").await.unwrap(), None);
    assert!(!store.release("lock", "3").await.unwrap());

    store.set("notice", "a", TTL).await.unwrap();
    store.set("notice", "b", TTL).await.unwrap();
    assert_eq!(store.get("notice").await.unwrap().as_deref(), Some("b"));
  }

  async fn exercise_expiry(store: &dyn Transients) {
    store.set("gone", "x", Duration::ZERO).await.unwrap();
    assert_eq!(store.get("gone").await.unwrap(), None);

    // an expired holder does not block a new one
    assert!(store.add("gone", "y", TTL).await.unwrap());
    assert_eq!(store.get("gone").await.unwrap().as_deref(), Some("y"));

    store.set("stale", "z", Duration::ZERO).await.unwrap();
    assert_eq!(store.purge().await.unwrap(), 1);
    assert_eq!(store.get("gone").await.unwrap().as_deref(), Some("y"));
  }

  #[tokio::test]
  async fn test_memory() {
    let store = Memory::new();
    exercise(&store).await;
    exercise_expiry(&store).await;
  }

  #[tokio::test]
  async fn test_database() {
    let store = Db::new(setup_test_db().await);
    exercise(&store).await;
    exercise_expiry(&store).await;
  }

  #[tokio::test]
  async fn test_concurrent_add_has_one_winner() {
    let store = Arc::new(Memory::new());

    let handles: Vec<_> = (0..16)
      .map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
          store.add("lock", &i.to_string(), TTL).await.unwrap()
        })
      })
      .collect();

    let mut winners = 0;
    for handle in handles {
      if handle.await.unwrap() {
        winners += 1;
      }
    }
    assert_eq!(winners, 1);
  }
}
