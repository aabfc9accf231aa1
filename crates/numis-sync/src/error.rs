use numis_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SyncError> for StoreError {
    fn from(e: SyncError) -> Self {
        StoreError::Remote(e.to_string())
    }
}

/// Turn a non-success response into [`SyncError::Server`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SyncError::Server {
        status: status.as_u16(),
        body,
    })
}
