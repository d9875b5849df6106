use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Transients::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Transients::Name).string().not_null().primary_key(),
          )
          .col(ColumnDef::new(Transients::Value).text().not_null())
          // unix millis
          .col(ColumnDef::new(Transients::ExpiresAt).big_integer().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_transients_expires_at")
          .table(Transients::Table)
          .col(Transients::ExpiresAt)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Transients::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Transients {
  Table,
  Name,
  Value,
  ExpiresAt,
}
