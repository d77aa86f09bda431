use std::sync::Arc;

use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database as SeaDatabase};

use crate::database::Database;
use crate::error::LyricResult;
use crate::models::{Candidate, EngineId, RawLyrics, TrackQuery};
use crate::ports::lyric_engine::{LyricEngine, MockLyricEngine, RequestHints};

pub async fn test_db() -> Arc<Database> {
    // A single connection keeps every query on the same in-memory database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = SeaDatabase::connect(opt).await.unwrap();

    migration::Migrator::up(&conn, None).await.unwrap();

    Arc::new(Database { conn })
}

/// A mock engine with its identity already wired up; tests only add
/// `search`/`download` expectations.
pub fn mock_engine(id: &str) -> MockLyricEngine {
    let mut engine = MockLyricEngine::new();
    engine.expect_id().return_const(EngineId::new(id));
    engine.expect_display_name().return_const(id.to_string());
    engine.expect_scores_results().return_const(false);
    engine
}

/// An engine whose requests never finish, for exercising cancellation.
pub struct PendingEngine {
    id: EngineId,
}

impl PendingEngine {
    pub fn new(id: &str) -> Self {
        Self {
            id: EngineId::new(id),
        }
    }
}

#[async_trait::async_trait]
impl LyricEngine for PendingEngine {
    fn id(&self) -> EngineId {
        self.id.clone()
    }

    fn display_name(&self) -> String {
        self.id.to_string()
    }

    async fn search(
        &self,
        _query: &TrackQuery,
        _hints: &RequestHints,
    ) -> LyricResult<Vec<Candidate>> {
        std::future::pending().await
    }

    async fn download(
        &self,
        _candidate: &Candidate,
        _hints: &RequestHints,
    ) -> LyricResult<RawLyrics> {
        std::future::pending().await
    }
}
