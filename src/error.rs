use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unrecognized region code: {0}")]
    InvalidRegion(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(i64),

    #[error("Invalid article state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// True for failures reading or writing the article store.
    pub fn is_storage(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Sqlite(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
