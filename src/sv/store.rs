use std::fmt;

use sea_orm::sea_query::OnConflict;
use serde::Serialize;

use crate::{entity::option, prelude::*, state::Config};

/// Locally cached belief about the entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Active,
  #[default]
  Inactive,
}

impl Status {
  pub fn as_str(self) -> &'static str {
    match self {
      Status::Active => "active",
      Status::Inactive => "inactive",
    }
  }

  /// Only the literal `"active"` counts as active.
  pub fn parse(raw: &str) -> Self {
    if raw == "active" { Status::Active } else { Status::Inactive }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// License key and status, kept as two rows of the `options` table.
#[derive(Clone, Copy)]
pub struct Store<'a> {
  db: &'a DatabaseConnection,
  config: &'a Config,
}

impl<'a> Store<'a> {
  pub fn new(db: &'a DatabaseConnection, config: &'a Config) -> Self {
    Self { db, config }
  }

  async fn get(&self, name: &str) -> Result<Option<String>> {
    let row = option::Entity::find_by_id(name).one(self.db).await?;
    Ok(row.map(|row| row.value))
  }

  async fn put(&self, name: &str, value: &str) -> Result<()> {
    let row = option::ActiveModel {
      name: Set(name.to_string()),
      value: Set(value.to_string()),
    };

    option::Entity::insert(row)
      .on_conflict(
        OnConflict::column(option::Column::Name)
          .update_column(option::Column::Value)
          .to_owned(),
      )
      .exec_without_returning(self.db)
      .await?;

    Ok(())
  }

  pub async fn key(&self) -> Result<String> {
    Ok(self.get(&self.config.key_option).await?.unwrap_or_default())
  }

  pub async fn set_key(&self, key: &str) -> Result<()> {
    self.put(&self.config.key_option, key).await
  }

  pub async fn status(&self) -> Result<Status> {
    let raw = self.get(&self.config.status_option).await?;
    Ok(raw.as_deref().map(Status::parse).unwrap_or_default())
  }

  pub async fn set_status(&self, status: Status) -> Result<()> {
    self.put(&self.config.status_option, status.as_str()).await
  }

  pub async fn is_active(&self) -> Result<bool> {
    Ok(self.status().await? == Status::Active)
  }
}
