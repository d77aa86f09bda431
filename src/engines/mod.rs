//! Concrete lyric sources and the registry that holds them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;
use crate::error::LyricResult;
use crate::models::TrackQuery;

pub mod http;
pub mod local_directory;
pub mod lrclib;
pub mod netease;
pub mod registry;

pub use local_directory::LocalDirectoryEngine;
pub use lrclib::LrclibEngine;
pub use netease::NeteaseEngine;
pub use registry::EngineRegistry;

/// The closed set of engines this build knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Lrclib,
    Netease,
    Local,
}

impl EngineKind {
    pub fn id(&self) -> &'static str {
        match self {
            EngineKind::Lrclib => lrclib::ENGINE_ID,
            EngineKind::Netease => netease::ENGINE_ID,
            EngineKind::Local => local_directory::ENGINE_ID,
        }
    }
}

/// Free-text search terms for engines that take a single query string:
/// "artist title" when a title is known, otherwise the file stem of the uri.
pub fn search_text(query: &TrackQuery) -> Option<String> {
    if let Some(title) = query.title.as_deref() {
        return Some(match query.artist.as_deref() {
            Some(artist) => format!("{artist} {title}"),
            None => title.to_string(),
        });
    }
    uri_stem(query.uri.as_deref()?)
}

/// Splits a file stem of the form `Artist - Title` into its parts.
pub fn split_artist_title(stem: &str) -> (Option<String>, String) {
    match stem.split_once(" - ") {
        Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
            (Some(artist.trim().to_string()), title.trim().to_string())
        }
        _ => (None, stem.trim().to_string()),
    }
}

/// Fills a missing title (and artist) from the uri's file stem, so engines
/// and the scorer rank against the same metadata.
pub fn with_uri_metadata(mut query: TrackQuery) -> TrackQuery {
    if query.title.is_some() {
        return query;
    }
    let Some(stem) = query.uri.as_deref().and_then(uri_stem) else {
        return query;
    };
    let (artist, title) = split_artist_title(&stem);
    query.title = Some(title);
    if query.artist.is_none() {
        query.artist = artist;
    }
    query
}

fn uri_stem(uri: &str) -> Option<String> {
    let last_segment = match Url::parse(uri) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(|segment| segment.to_string()),
        Err(_) => uri.rsplit(['/', '\\']).next().map(|s| s.to_string()),
    }?;
    let decoded = urlencoding::decode(&last_segment)
        .map(|s| s.into_owned())
        .unwrap_or(last_segment);
    let stem = Path::new(&decoded)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())?;
    (!stem.is_empty()).then_some(stem)
}

/// Builds the registry for the engines enabled in `config`.
pub fn build_registry(config: &Config) -> LyricResult<EngineRegistry> {
    let timeout = Duration::from_secs(config.http_timeout_secs);
    let mut registry = EngineRegistry::new();
    for kind in &config.engines {
        let id = kind.id();
        match kind {
            EngineKind::Lrclib => {
                let client = http::build_client(&config.user_agent, timeout, id)?;
                registry.register(Arc::new(LrclibEngine::new(
                    client,
                    &config.lrclib.base_url,
                    config.lrclib.requests_per_second,
                )))?;
            }
            EngineKind::Netease => {
                let client = http::build_client(&config.user_agent, timeout, id)?;
                registry.register(Arc::new(NeteaseEngine::new(
                    client,
                    &config.netease.base_url,
                    config.netease.requests_per_second,
                    config.netease.search_limit,
                )))?;
            }
            EngineKind::Local => {
                registry.register(Arc::new(LocalDirectoryEngine::new(
                    config.local_directory_path(),
                )))?;
            }
        }
        log::debug!("Configured engine `{}`", id);
    }
    Ok(registry)
}
