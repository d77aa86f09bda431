//! Persistent mapping from tracks to the lyric files chosen for them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder,
};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::database::Database;
use crate::entities::lyric;
use crate::error::LyricResult;
use crate::models::TrackQuery;

/// `column = value`, or `column IS NULL` when the value is absent.
fn eq_or_null(column: lyric::Column, value: Option<&str>) -> Condition {
    match value {
        Some(value) => Condition::all().add(column.eq(value)),
        None => Condition::all().add(column.is_null()),
    }
}

/// Identity of a uri-less row: its (title, artist, album) tuple.
fn tuple_condition(query: &TrackQuery) -> Condition {
    Condition::all()
        .add(lyric::Column::Uri.is_null())
        .add(eq_or_null(lyric::Column::Title, query.title.as_deref()))
        .add(eq_or_null(lyric::Column::Artist, query.artist.as_deref()))
        .add(eq_or_null(lyric::Column::Album, query.album.as_deref()))
}

fn path_string(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().to_string())
}

pub struct LyricCache {
    db: Arc<Database>,
    // SQLite allows one writer; funnel reads through the same lock so a
    // lookup never observes a half-applied assign.
    lock: Mutex<()>,
}

impl LyricCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            lock: Mutex::new(()),
        }
    }

    /// Associates `path` with the track. `None` records the track without a
    /// lyric file. The last assignment for a given identity wins.
    #[instrument(skip(self, query, path), fields(query = %query.describe()))]
    pub async fn assign(&self, query: &TrackQuery, path: Option<&Path>) -> LyricResult<()> {
        let query = query.clone().normalized();
        query.validate()?;
        let lrcpath = path_string(path);
        let _guard = self.lock.lock().await;

        if query.uri.is_some() {
            let row = lyric::ActiveModel {
                title: Set(query.title.clone()),
                artist: Set(query.artist.clone()),
                album: Set(query.album.clone()),
                tracknum: Set(query.track_number),
                uri: Set(query.uri.clone()),
                lrcpath: Set(lrcpath),
                ..Default::default()
            };
            lyric::Entity::insert(row)
                .on_conflict(
                    OnConflict::column(lyric::Column::Uri)
                        .update_columns([
                            lyric::Column::Title,
                            lyric::Column::Artist,
                            lyric::Column::Album,
                            lyric::Column::Tracknum,
                            lyric::Column::Lrcpath,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&self.db.conn)
                .await?;
            tracing::debug!("Stored lyric assignment by uri");
            return Ok(());
        }

        let existing = lyric::Entity::find()
            .filter(tuple_condition(&query))
            .one(&self.db.conn)
            .await?;
        match existing {
            Some(model) => {
                let mut row = model.into_active_model();
                row.tracknum = Set(query.track_number);
                row.lrcpath = Set(lrcpath);
                row.update(&self.db.conn).await?;
                tracing::debug!("Updated lyric assignment by metadata");
            }
            None => {
                let row = lyric::ActiveModel {
                    title: Set(query.title.clone()),
                    artist: Set(query.artist.clone()),
                    album: Set(query.album.clone()),
                    tracknum: Set(query.track_number),
                    uri: Set(None),
                    lrcpath: Set(lrcpath),
                    ..Default::default()
                };
                row.insert(&self.db.conn).await?;
                tracing::debug!("Inserted lyric assignment by metadata");
            }
        }
        Ok(())
    }

    /// Looks up the lyric file for a track: by uri first, then by the
    /// metadata tuple among rows without a uri.
    ///
    /// A uri row that exists without a path is a definite answer and does
    /// not fall back to the tuple lookup.
    #[instrument(skip(self, query), fields(query = %query.describe()))]
    pub async fn find(&self, query: &TrackQuery) -> LyricResult<Option<PathBuf>> {
        let query = query.clone().normalized();
        let _guard = self.lock.lock().await;

        if let Some(uri) = query.uri.as_deref() {
            let by_uri = lyric::Entity::find()
                .filter(lyric::Column::Uri.eq(uri))
                .one(&self.db.conn)
                .await?;
            if let Some(row) = by_uri {
                return Ok(row.lrcpath.map(PathBuf::from));
            }
        }

        if query.title.is_none() && query.artist.is_none() && query.album.is_none() {
            return Ok(None);
        }

        let by_tuple = lyric::Entity::find()
            .filter(tuple_condition(&query))
            .one(&self.db.conn)
            .await?;
        Ok(by_tuple.and_then(|row| row.lrcpath).map(PathBuf::from))
    }

    /// Deletes the identity row for a track. Returns whether a row existed.
    #[instrument(skip(self, query), fields(query = %query.describe()))]
    pub async fn remove(&self, query: &TrackQuery) -> LyricResult<bool> {
        let query = query.clone().normalized();
        query.validate()?;
        let _guard = self.lock.lock().await;

        let condition = match query.uri.as_deref() {
            Some(uri) => Condition::all().add(lyric::Column::Uri.eq(uri)),
            None => tuple_condition(&query),
        };
        let result = lyric::Entity::delete_many()
            .filter(condition)
            .exec(&self.db.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn entries(&self) -> LyricResult<Vec<lyric::Model>> {
        let _guard = self.lock.lock().await;
        Ok(lyric::Entity::find()
            .order_by_asc(lyric::Column::Id)
            .all(&self.db.conn)
            .await?)
    }
}
