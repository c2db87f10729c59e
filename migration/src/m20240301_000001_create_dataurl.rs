use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 创建 dataurl 表
        manager
            .create_table(
                Table::create()
                    .table(DataUrl::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataUrl::CorrelationId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DataUrl::ShortUrl).string().not_null())
                    // MySQL utf8mb4 唯一索引上限 3072 字节，故不用 TEXT
                    .col(
                        ColumnDef::new(DataUrl::OriginalUrl)
                            .string_len(768)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DataUrl::UserId).string().null())
                    .col(
                        ColumnDef::new(DataUrl::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        // original_url 唯一约束，冲突检测的依据
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_dataurl_original_url")
                    .table(DataUrl::Table)
                    .col(DataUrl::OriginalUrl)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 同一短码不能指向两个 URL
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_dataurl_short_url")
                    .table(DataUrl::Table)
                    .col(DataUrl::ShortUrl)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 按用户查询/批量删除
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_dataurl_user_id")
                    .table(DataUrl::Table)
                    .col(DataUrl::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_dataurl_user_id").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_dataurl_short_url").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_dataurl_original_url").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(DataUrl::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DataUrl {
    #[sea_orm(iden = "dataurl")]
    Table,
    CorrelationId,
    ShortUrl,
    OriginalUrl,
    UserId,
    IsDeleted,
}
