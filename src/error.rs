use crate::models::EngineId;

/// Errors produced by the lyric acquisition core.
///
/// Engine failures (`Network`, `Parse`, `Encoding`) are isolated to the engine
/// that produced them; `Cache` errors are returned straight to the caller.
#[derive(Debug, thiserror::Error)]
pub enum LyricError {
    #[error("Network error from {engine}: {message}")]
    Network { engine: String, message: String },

    #[error("Malformed response from {engine}: {message}")]
    Parse { engine: String, message: String },

    #[error("Failed to decode lyrics as {encoding}: {message}")]
    Encoding { encoding: String, message: String },

    #[error("Lyric cache error: {0}")]
    Cache(#[from] sea_orm::DbErr),

    #[error("File system error during {operation} on {path}: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A lyric query needs at least a title or a uri")]
    InvalidQuery,

    #[error("No engine registered with id `{0}`")]
    UnknownEngine(EngineId),

    #[error("An engine with id `{0}` is already registered")]
    DuplicateEngine(EngineId),
}

impl LyricError {
    pub fn network(engine: impl Into<String>, message: impl ToString) -> Self {
        LyricError::Network {
            engine: engine.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(engine: impl Into<String>, message: impl ToString) -> Self {
        LyricError::Parse {
            engine: engine.into(),
            message: message.to_string(),
        }
    }

    /// Maps a reqwest failure onto the taxonomy: body decoding problems are
    /// parse errors, everything else is a network error.
    pub fn from_reqwest(engine: impl Into<String>, error: reqwest::Error) -> Self {
        if error.is_decode() {
            LyricError::parse(engine, error)
        } else {
            LyricError::network(engine, error)
        }
    }

    pub fn io(operation: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        LyricError::Io {
            operation,
            path: path.display().to_string(),
            source,
        }
    }
}

pub type LyricResult<T> = Result<T, LyricError>;
