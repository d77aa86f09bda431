use crate::error::LyricResult;
use crate::models::{Candidate, EngineId, RawLyrics, TrackQuery};

/// Hints forwarded to engines with every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHints {
    /// Preferred locale of the user, e.g. `zh_CN`.
    pub locale: Option<String>,
    /// Charset to assume for lyric bytes when the source does not declare one.
    pub charset: Option<String>,
}

/// Port trait every lyric source implements.
///
/// Implementations live in `engines` (production) or test mocks. Each call
/// returns owned data; engines own their wire format, rate limiting and
/// timeouts.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LyricEngine: Send + Sync {
    fn id(&self) -> EngineId;

    fn display_name(&self) -> String;

    /// Whether candidates come back already ranked against the query.
    /// When false the orchestrator scores them itself.
    fn scores_results(&self) -> bool {
        false
    }

    async fn search(&self, query: &TrackQuery, hints: &RequestHints)
    -> LyricResult<Vec<Candidate>>;

    async fn download(&self, candidate: &Candidate, hints: &RequestHints)
    -> LyricResult<RawLyrics>;
}
