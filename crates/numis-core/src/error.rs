use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The model reply could not be read as a JSON object at all.
    #[error("malformed model reply: {0}")]
    MalformedResponse(String),

    /// Free text that contains no number.
    #[error("no number found in {0:?}")]
    ValueParse(String),
}
