use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // uri is the identity key when present; NULLs never collide under UNIQUE,
        // so tuple identity for uri-less rows is enforced by the cache itself.
        manager
            .create_table(
                Table::create()
                    .table("lyrics")
                    .if_not_exists()
                    .col(pk_auto("id"))
                    .col(string_null("title"))
                    .col(string_null("artist"))
                    .col(string_null("album"))
                    .col(integer_null("tracknum"))
                    .col(string_null("uri").unique_key())
                    .col(string_null("lrcpath"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_lyrics_title_artist_album")
                    .table("lyrics")
                    .col("title")
                    .col("artist")
                    .col("album")
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_lyrics_title_artist_album")
                    .table("lyrics")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table("lyrics").to_owned())
            .await
    }
}
