//! Fetching one candidate's lyrics, decoding them, and writing them to disk.

use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use futures::FutureExt;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::engines::EngineRegistry;
use crate::error::{LyricError, LyricResult};
use crate::models::{Candidate, RawLyrics, TrackQuery};
use crate::ports::lyric_engine::RequestHints;

pub type DownloadId = u64;

/// Matches an LRC time tag such as `[01:23.45]` at the start of a line.
static TIME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\[\d{1,3}:\d{1,2}(?:[.:]\d{1,3})?\]").expect("valid time tag regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LyricFormat {
    /// LRC with time tags.
    Synced,
    Plain,
}

impl LyricFormat {
    pub fn detect(text: &str) -> Self {
        if TIME_TAG.is_match(text) {
            LyricFormat::Synced
        } else {
            LyricFormat::Plain
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            LyricFormat::Synced => "lrc",
            LyricFormat::Plain => "txt",
        }
    }
}

/// Decoded lyric text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricContent {
    pub text: String,
    /// Canonical name of the encoding the bytes were decoded from.
    pub encoding: &'static str,
    pub format: LyricFormat,
}

impl LyricContent {
    /// Decodes raw engine bytes.
    ///
    /// Label precedence: the charset the engine declared, then `fallback`,
    /// then a byte order mark. Without any of those, valid UTF-8 stays UTF-8
    /// and anything else goes through charset detection. Unknown labels are
    /// skipped. Malformed input is an error rather than being replaced.
    pub fn decode(raw: &RawLyrics, fallback: Option<&str>) -> LyricResult<Self> {
        let labelled = [raw.charset.as_deref(), fallback]
            .into_iter()
            .flatten()
            .find_map(|label| {
                let encoding = Encoding::for_label(label.trim().as_bytes());
                if encoding.is_none() {
                    tracing::debug!(label, "Ignoring unknown charset label");
                }
                encoding
            });

        let (encoding, body) = match labelled {
            // A BOM is authoritative for its own encoding family.
            Some(encoding) => match Encoding::for_bom(&raw.bytes) {
                Some((bom, len)) if bom == encoding => (encoding, &raw.bytes[len..]),
                _ => (encoding, raw.bytes.as_slice()),
            },
            None => match Encoding::for_bom(&raw.bytes) {
                Some((bom, len)) => (bom, &raw.bytes[len..]),
                None => (detect(&raw.bytes), raw.bytes.as_slice()),
            },
        };

        let text = encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .ok_or_else(|| LyricError::Encoding {
                encoding: encoding.name().to_string(),
                message: "input is not valid in this encoding".to_string(),
            })?
            .into_owned();

        Ok(LyricContent {
            format: LyricFormat::detect(&text),
            encoding: encoding.name(),
            text,
        })
    }

    /// Writes the text as UTF-8 to `dest`.
    ///
    /// The file is staged next to `dest` and renamed into place, so a failed
    /// save never leaves a partial file behind.
    pub async fn save_to(&self, dest: &Path) -> LyricResult<()> {
        let dest = dest.to_path_buf();
        let text = self.text.clone();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, text.as_bytes()))
            .await
            .map_err(|e| {
                LyricError::io(
                    "save lyrics",
                    &dest,
                    std::io::Error::other(e.to_string()),
                )
            })?
    }
}

/// Guesses the charset of undeclared bytes.
fn detect(bytes: &[u8]) -> &'static Encoding {
    if Encoding::utf8_valid_up_to(bytes) == bytes.len() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, true);
    tracing::debug!(encoding = guess.name(), "Detected lyric charset");
    guess
}

fn write_atomically(dest: &Path, bytes: &[u8]) -> LyricResult<()> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .map_err(|e| LyricError::io("create lyric directory", &parent, e))?;

    let mut staged = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|e| LyricError::io("create temporary lyric file", &parent, e))?;
    staged
        .write_all(bytes)
        .and_then(|_| staged.flush())
        .map_err(|e| LyricError::io("write lyric file", dest, e))?;
    staged
        .persist(dest)
        .map_err(|e| LyricError::io("persist lyric file", dest, e.error))?;
    Ok(())
}

fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_matches('.')
        .to_string()
}

/// File name for saved lyrics: `Artist - Title.lrc`, or `Title.lrc` without
/// an artist. Falls back to the uri's stem when there is no title.
pub fn lyric_file_name(query: &TrackQuery, format: LyricFormat) -> String {
    let base = match (query.artist.as_deref(), query.title.as_deref()) {
        (Some(artist), Some(title)) => format!("{artist} - {title}"),
        (None, Some(title)) => title.to_string(),
        _ => crate::engines::search_text(query).unwrap_or_else(|| "lyrics".to_string()),
    };
    let base = sanitize_file_component(&base);
    let base = if base.is_empty() { "lyrics".to_string() } else { base };
    format!("{}.{}", base, format.extension())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub id: DownloadId,
    pub state: DownloadState,
    pub content: Option<LyricContent>,
    pub error: Option<LyricError>,
}

/// Starts lyric downloads through the engine that produced a candidate.
pub struct LyricDownloader {
    registry: Arc<EngineRegistry>,
    hints: RequestHints,
    next_id: AtomicU64,
}

impl LyricDownloader {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self {
            registry,
            hints: RequestHints::default(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_hints(mut self, hints: RequestHints) -> Self {
        self.hints = hints;
        self
    }

    /// Starts downloading `candidate`. An unknown engine is reported through
    /// the outcome as a failed download.
    pub fn start(&self, candidate: Candidate) -> DownloadTask {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (state_tx, state_rx) = watch::channel(DownloadState::Created);
        let cancel = CancellationToken::new();
        let engine = self.registry.get(&candidate.engine);
        let hints = self.hints.clone();
        let token = cancel.clone();

        let span = tracing::info_span!("download_task", id, engine = %candidate.engine);
        let join = tokio::spawn(
            async move {
                if token.is_cancelled() {
                    state_tx.send_replace(DownloadState::Cancelled);
                    return DownloadOutcome {
                        id,
                        state: DownloadState::Cancelled,
                        content: None,
                        error: None,
                    };
                }
                state_tx.send_replace(DownloadState::Running);

                let result = match engine {
                    None => Err(LyricError::UnknownEngine(candidate.engine.clone())),
                    Some(engine) => {
                        let download =
                            AssertUnwindSafe(async { engine.download(&candidate, &hints).await })
                                .catch_unwind();
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                tracing::info!("Download cancelled");
                                state_tx.send_replace(DownloadState::Cancelled);
                                return DownloadOutcome {
                                    id,
                                    state: DownloadState::Cancelled,
                                    content: None,
                                    error: None,
                                };
                            }
                            raw = download => raw.unwrap_or_else(|_| {
                                Err(LyricError::network(
                                    candidate.engine.as_str(),
                                    "engine panicked during download",
                                ))
                            }),
                        }
                    }
                };

                let outcome = match result
                    .and_then(|raw| LyricContent::decode(&raw, hints.charset.as_deref()))
                {
                    Ok(content) => {
                        tracing::info!(
                            encoding = content.encoding,
                            format = ?content.format,
                            "Lyrics downloaded"
                        );
                        DownloadOutcome {
                            id,
                            state: DownloadState::Completed,
                            content: Some(content),
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Lyric download failed");
                        DownloadOutcome {
                            id,
                            state: DownloadState::Failed,
                            content: None,
                            error: Some(e),
                        }
                    }
                };
                state_tx.send_replace(outcome.state);
                outcome
            }
            .instrument(span),
        );

        DownloadTask {
            id,
            state: state_rx,
            cancel,
            join,
        }
    }
}

pub struct DownloadTask {
    id: DownloadId,
    state: watch::Receiver<DownloadState>,
    cancel: CancellationToken,
    join: JoinHandle<DownloadOutcome>,
}

impl DownloadTask {
    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> DownloadOutcome {
        let id = self.id;
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => DownloadOutcome {
                id,
                state: DownloadState::Failed,
                content: None,
                error: Some(LyricError::network(
                    "download",
                    format!("download task died: {e}"),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngineId;
    use crate::test_utils::{PendingEngine, mock_engine};

    fn registry_with(engine: Arc<dyn crate::ports::lyric_engine::LyricEngine>) -> Arc<EngineRegistry> {
        let mut registry = EngineRegistry::new();
        registry.register(engine).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(LyricFormat::detect("[00:12.34]Hello"), LyricFormat::Synced);
        assert_eq!(
            LyricFormat::detect("[ti:Song]\n[01:02]Line"),
            LyricFormat::Synced
        );
        assert_eq!(LyricFormat::detect("Just words\n[chorus]"), LyricFormat::Plain);
    }

    #[test]
    fn test_decode_declared_charset() {
        // "晴天" in GBK.
        let raw = RawLyrics::new(vec![0xC7, 0xE7, 0xCC, 0xEC]).with_charset("gbk");
        let content = LyricContent::decode(&raw, None).unwrap();
        assert_eq!(content.text, "晴天");
        assert_eq!(content.encoding, "GBK");
        assert_eq!(content.format, LyricFormat::Plain);
    }

    #[test]
    fn test_decode_uses_fallback_hint() {
        let raw = RawLyrics::new(vec![0xC7, 0xE7, 0xCC, 0xEC]);
        let content = LyricContent::decode(&raw, Some("gb18030")).unwrap();
        assert_eq!(content.text, "晴天");
    }

    #[test]
    fn test_declared_charset_beats_hint() {
        let raw = RawLyrics::utf8("café");
        let content = LyricContent::decode(&raw, Some("gbk")).unwrap();
        assert_eq!(content.text, "café");
        assert_eq!(content.encoding, "UTF-8");
    }

    #[test]
    fn test_decode_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "[00:01.00]hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let content = LyricContent::decode(&RawLyrics::new(bytes), None).unwrap();
        assert_eq!(content.text, "[00:01.00]hi");
        assert_eq!(content.encoding, "UTF-16LE");
        assert_eq!(content.format, LyricFormat::Synced);

        let content =
            LyricContent::decode(&RawLyrics::new(b"\xEF\xBB\xBFplain".to_vec()), None).unwrap();
        assert_eq!(content.text, "plain");
    }

    #[test]
    fn test_unknown_label_is_skipped() {
        let raw = RawLyrics::new(b"hello".to_vec()).with_charset("x-made-up");
        let content = LyricContent::decode(&raw, None).unwrap();
        assert_eq!(content.encoding, "UTF-8");
    }

    #[test]
    fn test_malformed_input_is_an_encoding_error() {
        let raw = RawLyrics::new(vec![0x66, 0xFF, 0xFE, 0x67]).with_charset("utf-8");
        assert!(matches!(
            LyricContent::decode(&raw, None),
            Err(LyricError::Encoding { .. })
        ));
    }

    #[test]
    fn test_lyric_file_name() {
        let query = TrackQuery::new().with_title("Who/What?").with_artist("AC:DC");
        assert_eq!(
            lyric_file_name(&query, LyricFormat::Synced),
            "AC_DC - Who_What_.lrc"
        );
        let query = TrackQuery::new().with_title("Song");
        assert_eq!(lyric_file_name(&query, LyricFormat::Plain), "Song.txt");
        let query = TrackQuery::new().with_uri("file:///music/Track%2001.flac");
        assert_eq!(lyric_file_name(&query, LyricFormat::Synced), "Track 01.lrc");
    }

    #[tokio::test]
    async fn test_save_to_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("Song.lrc");
        let content = LyricContent {
            text: "[00:00.00]la".to_string(),
            encoding: "UTF-8",
            format: LyricFormat::Synced,
        };
        content.save_to(&dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "[00:00.00]la");

        let leftovers: Vec<_> = std::fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        // The destination is an existing directory, so the rename must fail.
        let dest = dir.path().join("taken");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("keep"), "x").unwrap();

        let content = LyricContent {
            text: "text".to_string(),
            encoding: "UTF-8",
            format: LyricFormat::Plain,
        };
        let result = content.save_to(&dest).await;
        assert!(matches!(result, Err(LyricError::Io { .. })));

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("taken")]);
    }

    #[tokio::test]
    async fn test_download_completes() {
        let mut engine = mock_engine("e1");
        engine
            .expect_download()
            .times(1)
            .returning(|_, _| Ok(RawLyrics::utf8("[00:01.00]line")));
        let downloader = LyricDownloader::new(registry_with(Arc::new(engine)));

        let task = downloader.start(Candidate::new(EngineId::new("e1"), "e1/a"));
        let outcome = task.wait().await;

        assert_eq!(outcome.state, DownloadState::Completed);
        let content = outcome.content.unwrap();
        assert_eq!(content.text, "[00:01.00]line");
        assert_eq!(content.format, LyricFormat::Synced);
    }

    #[tokio::test]
    async fn test_download_engine_error_fails() {
        let mut engine = mock_engine("e1");
        engine
            .expect_download()
            .returning(|_, _| Err(LyricError::network("e1", "timeout")));
        let downloader = LyricDownloader::new(registry_with(Arc::new(engine)));

        let outcome = downloader
            .start(Candidate::new(EngineId::new("e1"), "e1/a"))
            .wait()
            .await;
        assert_eq!(outcome.state, DownloadState::Failed);
        assert!(matches!(outcome.error, Some(LyricError::Network { .. })));
    }

    #[tokio::test]
    async fn test_download_unknown_engine_fails() {
        let downloader = LyricDownloader::new(Arc::new(EngineRegistry::new()));
        let outcome = downloader
            .start(Candidate::new(EngineId::new("gone"), "x"))
            .wait()
            .await;
        assert_eq!(outcome.state, DownloadState::Failed);
        assert!(matches!(outcome.error, Some(LyricError::UnknownEngine(_))));
    }

    #[tokio::test]
    async fn test_download_cancel() {
        let downloader =
            LyricDownloader::new(registry_with(Arc::new(PendingEngine::new("slow"))));
        let task = downloader.start(Candidate::new(EngineId::new("slow"), "slow/a"));
        tokio::task::yield_now().await;
        task.cancel();

        let outcome = task.wait().await;
        assert_eq!(outcome.state, DownloadState::Cancelled);
        assert!(outcome.content.is_none());
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_undeclared_gbk_is_detected() {
        let text = "[00:01.00]故事的小黄花\n[00:05.00]从出生那年就飘着\n[00:09.00]童年的荡秋千\n[00:13.00]随记忆一直晃到现在";
        let (bytes, _, had_errors) = encoding_rs::GBK.encode(text);
        assert!(!had_errors);

        let content = LyricContent::decode(&RawLyrics::new(bytes.into_owned()), None).unwrap();
        assert_eq!(content.text, text);
        assert_eq!(content.encoding, "GBK");
        assert_eq!(content.format, LyricFormat::Synced);
    }

    #[tokio::test]
    async fn test_local_gbk_file_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let text = "[00:01.00]故事的小黄花\n[00:05.00]从出生那年就飘着\n[00:09.00]童年的荡秋千";
        let path = dir.path().join("周杰伦 - 晴天.lrc");
        std::fs::write(&path, encoding_rs::GBK.encode(text).0).unwrap();

        let engine = crate::engines::LocalDirectoryEngine::new(dir.path().to_path_buf());
        let downloader = LyricDownloader::new(registry_with(Arc::new(engine)));
        let candidate = Candidate::new(
            EngineId::new(crate::engines::local_directory::ENGINE_ID),
            path.to_string_lossy().to_string(),
        );

        let outcome = downloader.start(candidate).wait().await;
        assert_eq!(outcome.state, DownloadState::Completed);
        assert_eq!(outcome.content.unwrap().text, text);
    }

    #[tokio::test]
    async fn test_panicking_download_fails() {
        let mut engine = mock_engine("e1");
        engine
            .expect_download()
            .returning(|_, _| panic!("engine blew up"));
        let downloader = LyricDownloader::new(registry_with(Arc::new(engine)));

        let task = downloader.start(Candidate::new(EngineId::new("e1"), "e1/a"));
        let state = task.state.clone();
        let outcome = task.wait().await;

        assert_eq!(outcome.state, DownloadState::Failed);
        assert!(matches!(outcome.error, Some(LyricError::Network { .. })));
        assert_eq!(*state.borrow(), DownloadState::Failed);
    }
}
