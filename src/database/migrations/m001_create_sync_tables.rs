use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Append-only mutation log; SQLite AUTOINCREMENT needs an INTEGER primary key
        manager
            .create_table(
                Table::create()
                    .table(WorkspaceChanges::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(WorkspaceChanges::Id).integer().not_null().auto_increment().primary_key())
                    .col(ColumnDef::new(WorkspaceChanges::WorkspaceId).text().not_null())
                    .col(ColumnDef::new(WorkspaceChanges::EntityType).text().not_null())
                    .col(ColumnDef::new(WorkspaceChanges::Method).text().not_null())
                    .col(ColumnDef::new(WorkspaceChanges::Key).text().not_null())
                    .col(ColumnDef::new(WorkspaceChanges::Payload).json())
                    .col(ColumnDef::new(WorkspaceChanges::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Issues::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Issues::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Issues::WorkspaceId).text().not_null())
                    .col(ColumnDef::new(Issues::Title).text().not_null())
                    .col(ColumnDef::new(Issues::Status).text().not_null())
                    .col(ColumnDef::new(Issues::Priority).text().not_null())
                    .col(ColumnDef::new(Issues::Creator).text().not_null())
                    .col(ColumnDef::new(Issues::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Issues::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Comments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Comments::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Comments::WorkspaceId).text().not_null())
                    .col(ColumnDef::new(Comments::IssueId).text().not_null())
                    .col(ColumnDef::new(Comments::Body).text().not_null())
                    .col(ColumnDef::new(Comments::Creator).text().not_null())
                    .col(ColumnDef::new(Comments::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Comments::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Descriptions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Descriptions::IssueId).text().not_null().primary_key())
                    .col(ColumnDef::new(Descriptions::WorkspaceId).text().not_null())
                    .col(ColumnDef::new(Descriptions::Body).text().not_null())
                    .col(ColumnDef::new(Descriptions::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Descriptions::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workspace_changes_workspace_id")
                    .table(WorkspaceChanges::Table)
                    .col(WorkspaceChanges::WorkspaceId)
                    .col(WorkspaceChanges::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workspace_changes_key")
                    .table(WorkspaceChanges::Table)
                    .col(WorkspaceChanges::WorkspaceId)
                    .col(WorkspaceChanges::EntityType)
                    .col(WorkspaceChanges::Key)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_issues_workspace_id")
                    .table(Issues::Table)
                    .col(Issues::WorkspaceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_comments_page")
                    .table(Comments::Table)
                    .col(Comments::WorkspaceId)
                    .col(Comments::CreatedAt)
                    .col(Comments::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_descriptions_page")
                    .table(Descriptions::Table)
                    .col(Descriptions::WorkspaceId)
                    .col(Descriptions::CreatedAt)
                    .col(Descriptions::IssueId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Descriptions::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Comments::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Issues::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(WorkspaceChanges::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum WorkspaceChanges {
    Table,
    Id,
    WorkspaceId,
    EntityType,
    Method,
    Key,
    Payload,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Issues {
    Table,
    Id,
    WorkspaceId,
    Title,
    Status,
    Priority,
    Creator,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Comments {
    Table,
    Id,
    WorkspaceId,
    IssueId,
    Body,
    Creator,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Descriptions {
    Table,
    IssueId,
    WorkspaceId,
    Body,
    CreatedAt,
    UpdatedAt,
}
