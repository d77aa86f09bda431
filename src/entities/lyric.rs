use sea_orm::entity::prelude::*;

/// One remembered association between a track and a lyric file.
///
/// Tracks with a uri are keyed by it; the rest are keyed by the
/// (title, artist, album) tuple with NULLs compared as equal.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "lyrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub tracknum: Option<i32>,
    #[sea_orm(unique)]
    pub uri: Option<String>,
    pub lrcpath: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
