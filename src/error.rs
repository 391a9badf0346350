use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the engine. Worker threads log these instead of
/// propagating them; the HTTP layer maps them onto `AppError`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {0}")]
    Parse(PathBuf),

    #[error("failed to load grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    #[error("invalid tree-sitter query: {0}")]
    Query(#[from] tree_sitter::QueryError),

    #[error("options script `{script}` failed: {message}")]
    OptionsScript { script: String, message: String },

    #[error("static analysis of {path} failed: {message}")]
    Analyzer { path: PathBuf, message: String },

    #[error("invalid settings: {0}")]
    Settings(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
