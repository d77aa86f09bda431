//! NetEase Cloud Music web API.

use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::engines::http::{self, EngineRateLimiter};
use crate::engines::search_text;
use crate::error::{LyricError, LyricResult};
use crate::models::{Candidate, EngineId, RawLyrics, TrackQuery};
use crate::ports::lyric_engine::{LyricEngine, RequestHints};

pub const ENGINE_ID: &str = "netease";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    code: i32,
    result: Option<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    songs: Vec<Song>,
}

#[derive(Debug, Deserialize)]
struct Song {
    id: i64,
    name: Option<String>,
    #[serde(default)]
    artists: Vec<NamedRef>,
    album: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LyricResponse {
    code: i32,
    lrc: Option<LyricBody>,
    #[serde(default)]
    nolyric: bool,
    #[serde(default)]
    uncollected: bool,
}

#[derive(Debug, Deserialize)]
struct LyricBody {
    lyric: Option<String>,
}

pub struct NeteaseEngine {
    client: Client,
    base_url: String,
    limiter: EngineRateLimiter,
    search_limit: u32,
}

impl NeteaseEngine {
    pub fn new(client: Client, base_url: &str, requests_per_second: u32, search_limit: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: http::rate_limiter(requests_per_second),
            search_limit: search_limit.max(1),
        }
    }

    fn search_url(&self, text: &str) -> String {
        format!(
            "{}/api/search/get/web?s={}&type=1&offset=0&limit={}",
            self.base_url,
            urlencoding::encode(text),
            self.search_limit
        )
    }

    fn lyric_url(&self, song_id: i64) -> String {
        format!("{}/api/song/lyric?id={}&lv=-1&kv=-1&tv=-1", self.base_url, song_id)
    }

    fn to_candidates(&self, response: SearchResponse) -> LyricResult<Vec<Candidate>> {
        if response.code != 200 {
            return Err(LyricError::network(
                ENGINE_ID,
                format!("search answered with code {}", response.code),
            ));
        }
        let songs = response.result.map(|r| r.songs).unwrap_or_default();
        Ok(songs
            .into_iter()
            .map(|song| {
                let artists: Vec<String> =
                    song.artists.into_iter().filter_map(|a| a.name).collect();
                Candidate {
                    url: self.lyric_url(song.id),
                    title: song.name,
                    artist: (!artists.is_empty()).then(|| artists.join("/")),
                    album: song.album.and_then(|a| a.name),
                    rank: 0,
                    engine: EngineId::new(ENGINE_ID),
                }
            })
            .collect())
    }
}

fn lyric_text(response: LyricResponse) -> LyricResult<String> {
    if response.code != 200 {
        return Err(LyricError::network(
            ENGINE_ID,
            format!("lyric request answered with code {}", response.code),
        ));
    }
    if response.nolyric || response.uncollected {
        return Err(LyricError::parse(ENGINE_ID, "song has no lyrics"));
    }
    response
        .lrc
        .and_then(|body| body.lyric)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| LyricError::parse(ENGINE_ID, "response carries no lyric body"))
}

#[async_trait::async_trait]
impl LyricEngine for NeteaseEngine {
    fn id(&self) -> EngineId {
        EngineId::new(ENGINE_ID)
    }

    fn display_name(&self) -> String {
        "NetEase Cloud Music".to_string()
    }

    #[instrument(skip(self, query, _hints), fields(query = %query.describe()))]
    async fn search(
        &self,
        query: &TrackQuery,
        _hints: &RequestHints,
    ) -> LyricResult<Vec<Candidate>> {
        let Some(text) = search_text(query) else {
            return Ok(Vec::new());
        };
        let url = self.search_url(&text);
        match http::get_json::<SearchResponse>(&self.client, &self.limiter, ENGINE_ID, &url).await? {
            Some(response) => self.to_candidates(response),
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self, candidate, _hints), fields(url = %candidate.url))]
    async fn download(
        &self,
        candidate: &Candidate,
        _hints: &RequestHints,
    ) -> LyricResult<RawLyrics> {
        let response: LyricResponse =
            http::get_json(&self.client, &self.limiter, ENGINE_ID, &candidate.url)
                .await?
                .ok_or_else(|| LyricError::network(ENGINE_ID, "lyric endpoint returned 404"))?;
        Ok(RawLyrics::utf8(lyric_text(response)?))
    }
}
