//! Short-lived named values with an expiry

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transients")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub name: String,
  #[sea_orm(column_type = "Text")]
  pub value: String,
  /// Unix millis; the row reads as absent from this instant on.
  pub expires_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
