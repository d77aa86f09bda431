use std::sync::Arc;

use color_eyre::{Result, eyre::Context};

use crate::config::Config;
use crate::database::Database;
use crate::engines::{EngineRegistry, build_registry};
use crate::ports::lyric_engine::RequestHints;
use crate::services::download::LyricDownloader;
use crate::services::lyric_cache::LyricCache;
use crate::services::search::SearchOrchestrator;

/// Everything a command needs, built once from the config.
pub struct AppContext {
    pub config: Config,
    pub registry: Arc<EngineRegistry>,
    pub cache: LyricCache,
    pub searches: SearchOrchestrator,
    pub downloads: LyricDownloader,
}

impl AppContext {
    pub async fn new(config: Config) -> Result<Self> {
        let registry =
            Arc::new(build_registry(&config).wrap_err("Failed to set up lyric engines")?);
        log::debug!("Registered engines: {:?}", registry.ids());

        let database = Database::open(&config.database_path()).await?;
        let hints = RequestHints {
            locale: config.locale.clone(),
            charset: config.charset.clone(),
        };

        Ok(AppContext {
            cache: LyricCache::new(Arc::new(database)),
            searches: SearchOrchestrator::new(registry.clone(), config.candidate_capacity)
                .with_hints(hints.clone()),
            downloads: LyricDownloader::new(registry.clone()).with_hints(hints),
            registry,
            config,
        })
    }
}
