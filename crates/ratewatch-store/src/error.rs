use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed document for {key}: {reason}")]
    MalformedDocument { key: String, reason: String },

    #[error("stored key unparseable: {0}")]
    BadStoredKey(#[from] ratewatch_core::KeyError),

    #[error("stored date unparseable: {0}")]
    BadStoredDate(String),
}
