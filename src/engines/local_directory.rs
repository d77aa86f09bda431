//! Lyric files already on disk, named `Artist - Title.lrc` or `Title.lrc`.

use std::path::{Path, PathBuf};

use tracing::instrument;
use walkdir::WalkDir;

use crate::engines::split_artist_title;
use crate::error::{LyricError, LyricResult};
use crate::models::{Candidate, EngineId, RawLyrics, TrackQuery};
use crate::ports::lyric_engine::{LyricEngine, RequestHints};
use crate::ranked_list::ACCEPTANCE_THRESHOLD;
use crate::scoring;

pub const ENGINE_ID: &str = "local";

pub const LYRIC_EXTENSIONS: &[&str] = &["lrc", "txt"];

pub struct LocalDirectoryEngine {
    root: PathBuf,
}

impl LocalDirectoryEngine {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn has_lyric_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            LYRIC_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Walks `root` and returns scored candidates that clear the acceptance
/// threshold, best first.
fn scan(root: &Path, query: &TrackQuery) -> Vec<Candidate> {
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "Local lyric directory does not exist");
        return Vec::new();
    }

    let mut candidates: Vec<Candidate> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && has_lyric_extension(entry.path()))
        .filter_map(|entry| {
            let stem = entry.path().file_stem()?.to_str()?.to_string();
            let (artist, title) = split_artist_title(&stem);
            let mut candidate = Candidate::new(
                EngineId::new(ENGINE_ID),
                entry.path().to_string_lossy().to_string(),
            )
            .with_title(title);
            candidate.artist = artist;
            candidate.rank = scoring::score(query, &candidate);
            (candidate.rank >= ACCEPTANCE_THRESHOLD).then_some(candidate)
        })
        .collect();
    candidates.sort_by(|a, b| b.rank.cmp(&a.rank));
    candidates
}

#[async_trait::async_trait]
impl LyricEngine for LocalDirectoryEngine {
    fn id(&self) -> EngineId {
        EngineId::new(ENGINE_ID)
    }

    fn display_name(&self) -> String {
        "Local lyric directory".to_string()
    }

    fn scores_results(&self) -> bool {
        true
    }

    #[instrument(skip(self, query, _hints), fields(query = %query.describe()))]
    async fn search(
        &self,
        query: &TrackQuery,
        _hints: &RequestHints,
    ) -> LyricResult<Vec<Candidate>> {
        let root = self.root.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || scan(&root, &query))
            .await
            .map_err(|e| LyricError::network(ENGINE_ID, e))
    }

    #[instrument(skip(self, candidate, _hints), fields(path = %candidate.url))]
    async fn download(
        &self,
        candidate: &Candidate,
        _hints: &RequestHints,
    ) -> LyricResult<RawLyrics> {
        let path = PathBuf::from(&candidate.url);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LyricError::io("read lyric file", &path, e))?;
        Ok(RawLyrics::new(bytes))
    }
}
