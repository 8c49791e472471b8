use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("offset {offset} is outside the buffer")]
    BadLocation { offset: usize },

    #[error("line {line} is outside the buffer")]
    BadLine { line: usize },

    #[error("buffer out of sync with {0}")]
    OutOfSync(PathBuf),

    #[error("invalid comment key: {0}")]
    InvalidKey(String),

    #[error("comment already tagged in buffer: {0}")]
    DuplicateKey(String),

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("comment not found: {0}")]
    NotFound(String),

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("failed to persist buffer: {0}")]
    Persist(String),

    #[error("comment store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
