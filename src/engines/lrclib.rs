//! LRCLIB (https://lrclib.net), an open JSON lyrics database.

use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::engines::http::{self, EngineRateLimiter};
use crate::engines::search_text;
use crate::error::{LyricError, LyricResult};
use crate::models::{Candidate, EngineId, RawLyrics, TrackQuery};
use crate::ports::lyric_engine::{LyricEngine, RequestHints};

pub const ENGINE_ID: &str = "lrclib";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibRecord {
    id: i64,
    track_name: Option<String>,
    artist_name: Option<String>,
    album_name: Option<String>,
    #[serde(default)]
    instrumental: bool,
    plain_lyrics: Option<String>,
    synced_lyrics: Option<String>,
}

pub struct LrclibEngine {
    client: Client,
    base_url: String,
    limiter: EngineRateLimiter,
}

impl LrclibEngine {
    pub fn new(client: Client, base_url: &str, requests_per_second: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: http::rate_limiter(requests_per_second),
        }
    }

    fn search_url(&self, query: &TrackQuery) -> Option<String> {
        let mut url = format!("{}/api/search?", self.base_url);
        match query.title.as_deref() {
            Some(title) => {
                url.push_str(&format!("track_name={}", urlencoding::encode(title)));
                if let Some(artist) = query.artist.as_deref() {
                    url.push_str(&format!("&artist_name={}", urlencoding::encode(artist)));
                }
                if let Some(album) = query.album.as_deref() {
                    url.push_str(&format!("&album_name={}", urlencoding::encode(album)));
                }
            }
            None => {
                let text = search_text(query)?;
                url.push_str(&format!("q={}", urlencoding::encode(&text)));
            }
        }
        Some(url)
    }

    fn record_url(&self, id: i64) -> String {
        format!("{}/api/get/{}", self.base_url, id)
    }

    fn to_candidates(&self, records: Vec<LrclibRecord>) -> Vec<Candidate> {
        records
            .into_iter()
            .filter(|record| !record.instrumental)
            .filter(|record| record.synced_lyrics.is_some() || record.plain_lyrics.is_some())
            .map(|record| Candidate {
                url: self.record_url(record.id),
                title: record.track_name,
                artist: record.artist_name,
                album: record.album_name,
                rank: 0,
                engine: EngineId::new(ENGINE_ID),
            })
            .collect()
    }
}

/// Synced lyrics win over plain text.
fn record_lyrics(record: LrclibRecord) -> Option<String> {
    record
        .synced_lyrics
        .filter(|text| !text.trim().is_empty())
        .or(record.plain_lyrics.filter(|text| !text.trim().is_empty()))
}

#[async_trait::async_trait]
impl LyricEngine for LrclibEngine {
    fn id(&self) -> EngineId {
        EngineId::new(ENGINE_ID)
    }

    fn display_name(&self) -> String {
        "LRCLIB".to_string()
    }

    #[instrument(skip(self, query, _hints), fields(query = %query.describe()))]
    async fn search(
        &self,
        query: &TrackQuery,
        _hints: &RequestHints,
    ) -> LyricResult<Vec<Candidate>> {
        let Some(url) = self.search_url(query) else {
            return Ok(Vec::new());
        };
        let records: Vec<LrclibRecord> =
            http::get_json(&self.client, &self.limiter, ENGINE_ID, &url)
                .await?
                .unwrap_or_default();
        tracing::debug!(results = records.len(), "LRCLIB search finished");
        Ok(self.to_candidates(records))
    }

    #[instrument(skip(self, candidate, _hints), fields(url = %candidate.url))]
    async fn download(
        &self,
        candidate: &Candidate,
        _hints: &RequestHints,
    ) -> LyricResult<RawLyrics> {
        let record: LrclibRecord =
            http::get_json(&self.client, &self.limiter, ENGINE_ID, &candidate.url)
                .await?
                .ok_or_else(|| LyricError::network(ENGINE_ID, "lyrics record no longer exists"))?;
        let text = record_lyrics(record)
            .ok_or_else(|| LyricError::parse(ENGINE_ID, "record carries no lyrics"))?;
        Ok(RawLyrics::utf8(text))
    }
}
