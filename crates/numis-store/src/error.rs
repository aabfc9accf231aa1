use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("invalid stored row: {0}")]
    InvalidRow(String),

    /// A remote backend failed; carries the backend's own error text.
    #[error("remote store: {0}")]
    Remote(String),

    #[error("{0}")]
    Other(String),
}
