use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LyricError, LyricResult};

/// Stable identifier of a registered lyric engine, e.g. `lrclib`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineId(String);

impl EngineId {
    pub fn new(id: impl Into<String>) -> Self {
        EngineId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(value: &str) -> Self {
        EngineId::new(value)
    }
}

/// Now-playing metadata handed over by the player collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackQuery {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<i32>,
    pub uri: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TrackQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_track_number(mut self, track_number: i32) -> Self {
        self.track_number = Some(track_number);
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Players frequently report blank strings for missing tags; those are
    /// treated as absent everywhere in the core.
    pub fn normalized(self) -> Self {
        TrackQuery {
            title: non_blank(self.title),
            artist: non_blank(self.artist),
            album: non_blank(self.album),
            track_number: self.track_number,
            uri: non_blank(self.uri),
        }
    }

    /// A search is only meaningful with a title or a uri.
    pub fn validate(&self) -> LyricResult<()> {
        let has_title = self.title.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_uri = self.uri.as_deref().is_some_and(|u| !u.trim().is_empty());
        if has_title || has_uri {
            Ok(())
        } else {
            Err(LyricError::InvalidQuery)
        }
    }

    pub fn describe(&self) -> String {
        match (self.artist.as_deref(), self.title.as_deref()) {
            (Some(artist), Some(title)) => format!("{artist} - {title}"),
            (None, Some(title)) => title.to_string(),
            _ => self.uri.clone().unwrap_or_else(|| "<unknown track>".into()),
        }
    }
}

/// A lyric result proposed by one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Opaque locator only the owning engine knows how to resolve.
    pub url: String,
    /// Similarity on the 0..=100000 scale.
    pub rank: u32,
    pub engine: EngineId,
}

impl Candidate {
    pub fn new(engine: EngineId, url: impl Into<String>) -> Self {
        Candidate {
            title: None,
            artist: None,
            album: None,
            url: url.into(),
            rank: 0,
            engine,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }
}

/// Undecoded lyric payload as returned by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLyrics {
    pub bytes: Vec<u8>,
    /// Charset label the engine declared for `bytes`, if it knows one.
    pub charset: Option<String>,
}

impl RawLyrics {
    pub fn new(bytes: Vec<u8>) -> Self {
        RawLyrics {
            bytes,
            charset: None,
        }
    }

    pub fn utf8(text: impl Into<String>) -> Self {
        RawLyrics {
            bytes: text.into().into_bytes(),
            charset: Some("utf-8".into()),
        }
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }
}
